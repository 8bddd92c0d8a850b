use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub tool_name: String,
    /// The build under test.
    pub binary: PathBuf,
    pub testdata_dir: PathBuf,
    /// Pin a cluster profile; otherwise each scenario gets a random one.
    pub profile: Option<String>,
    pub driver: String,
    pub start_args: Vec<String>,
    pub mount_args: Vec<String>,
    pub mount_target: String,
    pub mount_start_args: Vec<String>,
    pub oldest_k8s_version: String,
    pub newest_k8s_version: String,
    pub release_version: String,
    pub release_base_url: String,
    pub access_time_platforms: Vec<String>,
    /// Where the mount workload is created and observed.
    pub namespace: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            tool_name: "minikube".to_string(),
            binary: PathBuf::from("./out/minikube"),
            testdata_dir: PathBuf::from("./testdata"),
            profile: None,
            driver: "virtualbox".to_string(),
            start_args: Vec::new(),
            mount_args: Vec::new(),
            mount_target: "/mount-9p".to_string(),
            mount_start_args: vec!["--wait=false".to_string()],
            oldest_k8s_version: "v1.11.10".to_string(),
            newest_k8s_version: "v1.16.0".to_string(),
            release_version: "latest".to_string(),
            release_base_url: "https://storage.googleapis.com/minikube/releases".to_string(),
            access_time_platforms: vec!["windows".to_string()],
            namespace: "default".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Defaults, then the optional YAML file, then `E2E_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut config = match path {
            Some(path) => Self::from_yaml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(binary) = lookup("E2E_BINARY") {
            self.binary = PathBuf::from(binary);
        }
        if let Some(dir) = lookup("E2E_TESTDATA_DIR") {
            self.testdata_dir = PathBuf::from(dir);
        }
        if let Some(profile) = lookup("E2E_PROFILE") {
            self.profile = Some(profile);
        }
        if let Some(driver) = lookup("E2E_DRIVER") {
            self.driver = driver;
        }
        if let Some(args) = lookup("E2E_START_ARGS") {
            self.start_args = split_args(&args);
        }
        if let Some(args) = lookup("E2E_MOUNT_ARGS") {
            self.mount_args = split_args(&args);
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.tool_name.is_empty() {
            return Err(Error::Config("tool_name must not be empty".to_string()));
        }
        if !self.mount_target.starts_with('/') {
            return Err(Error::Config(format!(
                "mount_target must be an absolute guest path, got {:?}",
                self.mount_target
            )));
        }
        if self.oldest_k8s_version.is_empty() || self.newest_k8s_version.is_empty() {
            return Err(Error::Config(
                "kubernetes versions must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The profile a scenario should use: `<pinned>-<scenario>`, or
    /// `<scenario>-<random hex>`. Scenarios never share a cluster.
    pub fn profile_for(&self, scenario: &str) -> String {
        match &self.profile {
            Some(profile) => format!("{}-{}", profile, scenario),
            None => format!("{}-{:08x}", scenario, rand::random::<u32>()),
        }
    }
}

fn split_args(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = HarnessConfig::from_yaml(
            "
            driver: kvm2
            mount_args: [\"--9p-version=9p2000.L\"]
            ",
        )
        .unwrap();
        assert_eq!(config.driver, "kvm2");
        assert_eq!(config.mount_args, vec!["--9p-version=9p2000.L"]);
        assert_eq!(config.mount_target, "/mount-9p");
        assert_eq!(config.release_version, "latest");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(HarnessConfig::from_yaml("drivr: kvm2").is_err());
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("E2E_BINARY", "/tmp/minikube"),
            ("E2E_PROFILE", "upgrade"),
            ("E2E_START_ARGS", "--driver=kvm2  --memory=2200"),
        ]
        .into_iter()
        .collect();
        let mut config = HarnessConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.binary, PathBuf::from("/tmp/minikube"));
        assert_eq!(config.profile.as_deref(), Some("upgrade"));
        assert_eq!(config.start_args, vec!["--driver=kvm2", "--memory=2200"]);
    }

    #[test]
    fn random_profiles_are_scoped_by_scenario() {
        let config = HarnessConfig::default();
        let profile = config.profile_for("mount");
        assert!(profile.starts_with("mount-"));
        assert_eq!(profile.len(), "mount-".len() + 8);
    }

    #[test]
    fn scenarios_never_share_a_pinned_profile() {
        let config = HarnessConfig {
            profile: Some("shared".to_string()),
            ..HarnessConfig::default()
        };
        let mount = config.profile_for("mount");
        let upgrade = config.profile_for("version-upgrade");
        assert_ne!(mount, upgrade);
        assert_eq!(mount, "shared-mount");
        assert_eq!(upgrade, "shared-version-upgrade");
    }

    #[test]
    fn relative_mount_target_is_invalid() {
        let config = HarnessConfig {
            mount_target: "mount-9p".to_string(),
            ..HarnessConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(HarnessConfig::default().validate().is_ok());
    }
}

//! Host platform facts the scenarios branch on: artifact names, skip
//! conditions, and which timestamps the mount is expected to propagate.

use std::fmt;

/// Drivers that run the cluster directly on the host, with no VM boundary.
const DRIVERS_WITHOUT_VM: &[&str] = &["none"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Platform {
            os: os.into(),
            arch: arch.into(),
        }
    }

    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Platform::new(os, arch)
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    fn exe_suffix(&self) -> &'static str {
        if self.is_windows() {
            ".exe"
        } else {
            ""
        }
    }

    /// Name of the published release artifact, e.g. `minikube-linux-amd64`.
    pub fn artifact_name(&self, tool: &str) -> String {
        format!("{}-{}-{}{}", tool, self.os, self.arch, self.exe_suffix())
    }

    /// Name under which the latest release is cached in the testdata dir.
    pub fn cached_release_name(&self, tool: &str) -> String {
        format!(
            "{}-{}-{}-latest-stable{}",
            tool,
            self.os,
            self.arch,
            self.exe_suffix()
        )
    }

    /// Decide once, up front, whether the mount scenario can run here.
    pub fn mount_precondition(&self, driver: &str) -> Precondition {
        if self.os == "darwin" {
            return Precondition::Skip(
                "mount tests disabled on darwin due to mount transport timeouts".to_string(),
            );
        }
        if !driver_needs_vm(driver) {
            return Precondition::Skip(format!(
                "driver {:?} does not run a VM, so there is nothing to mount",
                driver
            ));
        }
        Precondition::Proceed
    }

    pub fn timestamp_checks(&self, access_time_platforms: &[String]) -> TimestampChecks {
        TimestampChecks {
            modify: true,
            access: access_time_platforms.iter().any(|os| *os == self.os),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

pub fn driver_needs_vm(driver: &str) -> bool {
    !DRIVERS_WITHOUT_VM.contains(&driver)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    Proceed,
    Skip(String),
}

/// Which `stat` timestamps must not read as the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampChecks {
    pub modify: bool,
    pub access: bool,
}

impl Default for TimestampChecks {
    fn default() -> Self {
        TimestampChecks {
            modify: true,
            access: false,
        }
    }
}

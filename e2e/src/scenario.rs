//! Wires the production collaborators into each scenario.

use std::fmt;

use tracing::info;

use crate::cleanup::Cleanup;
use crate::cluster::{ClusterControl, ClusterTool};
use crate::config::HarnessConfig;
use crate::error::Error;
use crate::mount::{ExpectedFileState, MountLifecycle, POD_MANIFEST};
use crate::platform::{Platform, Precondition};
use crate::release::ReleaseDownloader;
use crate::retry::RetryPolicy;
use crate::upgrade::{UpgradeRun, UpgradeWorkflow};
use crate::workload::KubeWorkloads;

/// What the mount workload writes and what the host writes for it.
pub const MOUNT_FILE_CONTENT: &[u8] = b"test\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Skipped(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => f.write_str("passed"),
            Outcome::Skipped(reason) => write!(f, "skipped: {}", reason),
        }
    }
}

pub async fn mount_scenario(config: &HarnessConfig, platform: &Platform) -> Result<Outcome, Error> {
    if let Precondition::Skip(reason) = platform.mount_precondition(&config.driver) {
        info!("skipping mount scenario: {}", reason);
        return Ok(Outcome::Skipped(reason));
    }
    let profile = config.profile_for("mount");
    let tool = ClusterTool::new(&config.binary, &profile)
        .with_start_args(config.start_args.iter().cloned())
        .with_start_args(config.mount_start_args.iter().cloned())
        .with_mount_args(config.mount_args.iter().cloned());
    let manifest = config.testdata_dir.join(POD_MANIFEST);
    let mut cleanup = Cleanup::new();
    let result = async {
        tool.start(&[]).await?;
        if config.profile.is_none() {
            cleanup.defer("delete profile", tool.delete());
        }
        let kube = KubeWorkloads::connect(&profile, &RetryPolicy::eventual())
            .await?
            .with_namespace(&config.namespace);
        MountLifecycle::new(&tool, &kube, manifest)
            .with_namespace(&config.namespace)
            .with_target(&config.mount_target)
            .with_timestamp_checks(platform.timestamp_checks(&config.access_time_platforms))
            .run(&ExpectedFileState::standard_set(MOUNT_FILE_CONTENT))
            .await
    }
    .await;
    cleanup.release_all().await;
    result?;
    Ok(Outcome::Passed)
}

pub async fn upgrade_scenario(config: &HarnessConfig, platform: &Platform) -> Result<Outcome, Error> {
    let profile = config.profile_for("version-upgrade");
    let run = UpgradeRun {
        release_binary: config
            .testdata_dir
            .join(platform.cached_release_name(&config.tool_name)),
        release_version: config.release_version.clone(),
        oldest_k8s_version: config.oldest_k8s_version.clone(),
        newest_k8s_version: config.newest_k8s_version.clone(),
    };
    let release = ClusterTool::new(&run.release_binary, &profile)
        .with_start_args(config.start_args.iter().cloned());
    let current = ClusterTool::new(&config.binary, &profile)
        .with_start_args(config.start_args.iter().cloned());
    let fetcher = ReleaseDownloader::new(&config.release_base_url, &config.tool_name, platform);
    let mut workflow = UpgradeWorkflow::new(&release, &current, &fetcher, run);
    if config.profile.is_some() {
        workflow = workflow.keep_profile();
    }
    workflow.run().await?;
    Ok(Outcome::Passed)
}

//! Version upgrade scenario: a released build starts a cluster on the oldest
//! supported Kubernetes version, stops it, and the current build restarts the
//! same profile on the newest one.

use std::path::PathBuf;

use tracing::info;

use crate::cleanup::Cleanup;
use crate::cluster::{ClusterControl, RUNNING, STOPPED};
use crate::error::{Error, UpgradeFailure, UpgradeStep};
use crate::release::{file_exists, ArtifactFetcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRun {
    pub release_binary: PathBuf,
    pub release_version: String,
    pub oldest_k8s_version: String,
    pub newest_k8s_version: String,
}

pub fn kubernetes_version_flag(version: &str) -> String {
    format!("--kubernetes-version={}", version)
}

/// The tool must accept versions without their `v` prefix.
pub fn strip_version_prefix(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

pub struct UpgradeWorkflow<'a, R, C, F> {
    release: &'a R,
    current: &'a C,
    fetcher: &'a F,
    run: UpgradeRun,
    delete_profile: bool,
}

impl<'a, R, C, F> UpgradeWorkflow<'a, R, C, F>
where
    R: ClusterControl,
    C: ClusterControl,
    F: ArtifactFetcher,
{
    pub fn new(release: &'a R, current: &'a C, fetcher: &'a F, run: UpgradeRun) -> Self {
        UpgradeWorkflow {
            release,
            current,
            fetcher,
            run,
            delete_profile: true,
        }
    }

    /// Leave the profile running once the workflow is done.
    pub fn keep_profile(mut self) -> Self {
        self.delete_profile = false;
        self
    }

    pub async fn run(&self) -> Result<(), Error> {
        let mut cleanup = Cleanup::new();
        let result = self.exercise(&mut cleanup).await;
        cleanup.release_all().await;
        result
    }

    async fn exercise<'s>(&'s self, cleanup: &mut Cleanup<'s>) -> Result<(), Error> {
        self.ensure_release_binary()
            .await
            .map_err(|e| UpgradeFailure::new(UpgradeStep::EnsureReleaseBinary, e))?;
        let binary = &self.run.release_binary;
        cleanup.defer("remove release binary", async move {
            std::fs::remove_file(binary).map_err(Error::from)
        });
        if self.delete_profile {
            cleanup.defer("delete profile", self.current.delete());
        }

        let oldest = kubernetes_version_flag(&self.run.oldest_k8s_version);
        start_and_check(self.release, UpgradeStep::StartRelease, oldest).await?;

        step(UpgradeStep::StopRelease, async {
            self.release.stop().await?;
            self.release.check_status(STOPPED).await
        })
        .await?;

        let newest =
            kubernetes_version_flag(strip_version_prefix(&self.run.newest_k8s_version));
        start_and_check(self.current, UpgradeStep::StartCurrent, newest).await?;
        info!("upgrade reached {} with the current build", RUNNING);
        Ok(())
    }

    /// Use the cached release binary if it is there, download it otherwise.
    pub async fn ensure_release_binary(&self) -> Result<(), Error> {
        let path = &self.run.release_binary;
        if let Err(e) = file_exists(path).await {
            info!("{}; fetching release {}", e, self.run.release_version);
            self.fetcher.fetch(&self.run.release_version, path).await?;
        }
        Ok(())
    }
}

async fn start_and_check<T: ClusterControl>(
    tool: &T,
    which: UpgradeStep,
    version_flag: String,
) -> Result<(), Error> {
    step(which, async {
        tool.start(&[version_flag]).await?;
        tool.check_status(RUNNING).await
    })
    .await
}

async fn step(
    which: UpgradeStep,
    body: impl std::future::Future<Output = Result<(), Error>>,
) -> Result<(), Error> {
    info!("upgrade step: {}", which);
    body.await
        .map_err(|e| UpgradeFailure::new(which, e).into())
}

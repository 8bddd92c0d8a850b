use std::path::PathBuf;

use tempfile::TempDir;
use tracing::{info, warn};

use crate::cleanup::Cleanup;
use crate::cluster::{MountLauncher, RemoteExec};
use crate::error::Error;
use crate::fsutil::write_locked;
use crate::mount::{ExpectedFileState, MountPoint, MountVerifier, Origin, POD_LABELS, POD_NAME};
use crate::platform::TimestampChecks;
use crate::process::DaemonHandle;
use crate::retry::{retry, RetryPolicy};
use crate::workload::{PodObserver, WorkloadApplier};

/// A running mount: the host temp dir and the daemon bridging it into the VM.
pub struct MountSession {
    point: MountPoint,
    daemon: DaemonHandle,
    host_dir: TempDir,
}

impl MountSession {
    pub fn point(&self) -> &MountPoint {
        &self.point
    }

    pub fn daemon_alive(&mut self) -> bool {
        self.daemon.is_alive()
    }

    /// Stop the daemon, then remove the host dir. Never fails.
    pub async fn close(mut self) {
        self.daemon.kill().await;
        let path = self.host_dir.path().to_path_buf();
        if let Err(e) = self.host_dir.close() {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Owns the ordering of the mount scenario: daemon, host files, workload,
/// readiness, verification, and the teardown of all of it.
pub struct MountLifecycle<'a, T, K> {
    tool: &'a T,
    kube: &'a K,
    manifest: PathBuf,
    namespace: String,
    target: String,
    timestamps: TimestampChecks,
    policy: RetryPolicy,
}

impl<'a, T, K> MountLifecycle<'a, T, K>
where
    T: MountLauncher + RemoteExec,
    K: WorkloadApplier + PodObserver,
{
    pub fn new(tool: &'a T, kube: &'a K, manifest: impl Into<PathBuf>) -> Self {
        MountLifecycle {
            tool,
            kube,
            manifest: manifest.into(),
            namespace: "default".to_string(),
            target: "/mount-9p".to_string(),
            timestamps: TimestampChecks::default(),
            policy: RetryPolicy::eventual(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_timestamp_checks(mut self, timestamps: TimestampChecks) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run the whole scenario. Everything acquired is released before this
    /// returns, whatever the outcome.
    pub async fn run(&self, expected: &[ExpectedFileState]) -> Result<(), Error> {
        let mut session = self.start_mount()?;
        let mut cleanup = Cleanup::new();
        let result = self.exercise(&mut session, &mut cleanup, expected).await;
        cleanup.release_all().await;
        session.close().await;
        result
    }

    async fn exercise<'s>(
        &'s self,
        session: &mut MountSession,
        cleanup: &mut Cleanup<'s>,
        expected: &[ExpectedFileState],
    ) -> Result<(), Error> {
        write_files_from_host(session.point(), expected)?;
        cleanup.defer("delete mount workload", self.teardown_workload());
        self.deploy_workload(session).await?;
        self.await_workload_running().await?;
        info!("Pods appear to be running");
        MountVerifier::new(self.tool, self.kube, &self.namespace)
            .with_timestamp_checks(self.timestamps)
            .with_policy(self.policy)
            .verify(session.point(), expected)
            .await
    }

    pub fn start_mount(&self) -> Result<MountSession, Error> {
        let host_dir = tempfile::Builder::new().prefix("mounttest").tempdir()?;
        let daemon = self.tool.start_mount(host_dir.path(), &self.target)?;
        info!(
            "mounting {} at {} via {}",
            host_dir.path().display(),
            self.target,
            daemon.name()
        );
        Ok(MountSession {
            point: MountPoint {
                host_dir: host_dir.path().to_path_buf(),
                target: self.target.clone(),
                pod_name: POD_NAME.to_string(),
            },
            daemon,
            host_dir,
        })
    }

    /// Apply the workload manifest, retrying while the control plane settles.
    pub async fn deploy_workload(&self, session: &mut MountSession) -> Result<(), Error> {
        if !session.daemon_alive() {
            return Err(Error::MountDaemonExited(session.daemon.name().to_string()));
        }
        info!("Deploying pod from: {}", self.manifest.display());
        retry(&self.policy, || self.kube.apply(&self.manifest)).await?;
        Ok(())
    }

    pub async fn await_workload_running(&self) -> Result<(), Error> {
        retry(&self.policy, || {
            self.kube.pods_running(&self.namespace, POD_LABELS)
        })
        .await
    }

    pub async fn teardown_workload(&self) -> Result<(), Error> {
        info!("Deleting pod from: {}", self.manifest.display());
        self.kube.delete(&self.manifest).await?;
        Ok(())
    }
}

/// Write every host-originated file, before the workload starts reading them.
pub fn write_files_from_host(
    point: &MountPoint,
    expected: &[ExpectedFileState],
) -> Result<(), Error> {
    for file in expected.iter().filter(|f| f.origin == Origin::Host) {
        write_locked(&point.host_path(&file.name), &file.content, 0o644)?;
    }
    Ok(())
}

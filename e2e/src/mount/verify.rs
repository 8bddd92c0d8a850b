use std::path::PathBuf;

use tracing::info;

use crate::cluster::RemoteExec;
use crate::error::{Error, MountCheck, MountMismatch};
use crate::mount::{ExpectedFileState, MountPoint, Origin};
use crate::platform::TimestampChecks;
use crate::retry::{retry, RetryPolicy};
use crate::workload::PodObserver;

const EPOCH_DATE: &str = "1970-01-01";

/// Checks a mount from the host side, reaching into the guest through SSH and
/// the workload's logs.
pub struct MountVerifier<'a, E, P> {
    remote: &'a E,
    pods: &'a P,
    namespace: &'a str,
    timestamps: TimestampChecks,
    policy: RetryPolicy,
}

impl<'a, E: RemoteExec, P: PodObserver> MountVerifier<'a, E, P> {
    pub fn new(remote: &'a E, pods: &'a P, namespace: &'a str) -> Self {
        MountVerifier {
            remote,
            pods,
            namespace,
            timestamps: TimestampChecks::default(),
            policy: RetryPolicy::eventual(),
        }
    }

    pub fn with_timestamp_checks(mut self, timestamps: TimestampChecks) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Retry [`check`](Self::check) until the mount has caught up, then remove
    /// the pod-written files that the host is expected to delete.
    pub async fn verify(
        &self,
        point: &MountPoint,
        expected: &[ExpectedFileState],
    ) -> Result<(), Error> {
        retry(&self.policy, || self.check(point, expected)).await?;
        info!("mount at {} is consistent", point.target);
        self.remove_pod_files(point, expected)
    }

    /// One full verification attempt. The first failing check aborts it.
    pub async fn check(
        &self,
        point: &MountPoint,
        expected: &[ExpectedFileState],
    ) -> Result<(), Error> {
        self.check_pod_to_host(point, expected)?;
        self.check_host_to_pod(point, expected).await?;
        self.check_timestamps(point, expected).await?;
        self.check_host_deletion(point, expected)?;
        Ok(())
    }

    fn check_pod_to_host(
        &self,
        point: &MountPoint,
        expected: &[ExpectedFileState],
    ) -> Result<(), Error> {
        for file in written_by(expected, Origin::Pod) {
            let path = point.host_path(&file.name);
            let actual = std::fs::read(&path).map_err(|e| MountMismatch {
                check: MountCheck::PodToHost,
                path: path.clone(),
                expected: lossy(&file.content),
                actual: format!("unreadable: {}", e),
            })?;
            if actual != file.content {
                return Err(MountMismatch {
                    check: MountCheck::PodToHost,
                    path,
                    expected: lossy(&file.content),
                    actual: lossy(&actual),
                }
                .into());
            }
        }
        Ok(())
    }

    async fn check_host_to_pod(
        &self,
        point: &MountPoint,
        expected: &[ExpectedFileState],
    ) -> Result<(), Error> {
        let logs = self.pods.logs(self.namespace, &point.pod_name).await?;
        for file in written_by(expected, Origin::Host) {
            let content = lossy(&file.content);
            if !logs.contains(&content) {
                return Err(MountMismatch {
                    check: MountCheck::HostToPod,
                    path: PathBuf::from(point.guest_path(&file.name)),
                    expected: content,
                    actual: logs,
                }
                .into());
            }
        }
        Ok(())
    }

    async fn check_timestamps(
        &self,
        point: &MountPoint,
        expected: &[ExpectedFileState],
    ) -> Result<(), Error> {
        for file in expected.iter().filter(|f| f.must_exist) {
            let guest_path = point.guest_path(&file.name);
            let stat = self.remote.ssh(&format!("stat {}", guest_path)).await?;
            let fields = [
                (self.timestamps.access, "Access"),
                (self.timestamps.modify, "Modify"),
            ];
            for (enabled, field) in fields {
                if !enabled {
                    continue;
                }
                if let Some(line) = epoch_line(&stat, field) {
                    return Err(MountMismatch {
                        check: MountCheck::Timestamps,
                        path: PathBuf::from(guest_path),
                        expected: format!("{} time after the Unix epoch", field.to_lowercase()),
                        actual: line.trim().to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    fn check_host_deletion(
        &self,
        point: &MountPoint,
        expected: &[ExpectedFileState],
    ) -> Result<(), Error> {
        for file in deleted_from(expected, Origin::Host) {
            let path = point.host_path(&file.name);
            if path.symlink_metadata().is_ok() {
                return Err(MountMismatch {
                    check: MountCheck::HostDeletion,
                    path,
                    expected: "removed by the pod".to_string(),
                    actual: "still present on the host".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Runs once, after the retried checks pass; a failed remove is final.
    pub fn remove_pod_files(
        &self,
        point: &MountPoint,
        expected: &[ExpectedFileState],
    ) -> Result<(), Error> {
        for file in deleted_from(expected, Origin::Pod) {
            let path = point.host_path(&file.name);
            std::fs::remove_file(&path).map_err(|e| MountMismatch {
                check: MountCheck::PodDeletion,
                path: path.clone(),
                expected: "removable from the host".to_string(),
                actual: e.to_string(),
            })?;
        }
        Ok(())
    }
}

fn written_by(expected: &[ExpectedFileState], origin: Origin) -> impl Iterator<Item = &ExpectedFileState> {
    expected
        .iter()
        .filter(move |f| f.origin == origin && f.must_exist)
}

fn deleted_from(expected: &[ExpectedFileState], origin: Origin) -> impl Iterator<Item = &ExpectedFileState> {
    expected
        .iter()
        .filter(move |f| f.origin == origin && !f.must_exist)
}

fn epoch_line<'s>(stat: &'s str, field: &str) -> Option<&'s str> {
    let needle = format!("{}: {}", field, EPOCH_DATE);
    stat.lines().find(|line| line.contains(&needle))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_string()
}

//! Host to guest filesystem mount scenario.
//!
//! The host writes files into a temp dir that the cluster tool mounts into the
//! VM. A busybox pod mounts the same guest path, reads what the host wrote,
//! deletes one host file, and writes two of its own. The verifier then checks
//! every direction of that exchange from the host side.

pub mod lifecycle;
pub mod verify;

use std::path::PathBuf;

pub use lifecycle::{MountLifecycle, MountSession};
pub use verify::MountVerifier;

pub const POD_NAME: &str = "busybox-mount";
pub const POD_LABELS: &[(&str, &str)] = &[("integration-test", "busybox-mount")];
pub const POD_MANIFEST: &str = "busybox-mount-test.yaml";

/// Which side of the mount creates a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Host,
    Pod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedFileState {
    pub name: String,
    pub content: Vec<u8>,
    pub origin: Origin,
    /// `false` means the opposite side is expected to delete it.
    pub must_exist: bool,
}

impl ExpectedFileState {
    pub fn new(name: &str, content: &[u8], origin: Origin, must_exist: bool) -> Self {
        ExpectedFileState {
            name: name.to_string(),
            content: content.to_vec(),
            origin,
            must_exist,
        }
    }

    /// The four files the busybox workload exercises.
    pub fn standard_set(content: &[u8]) -> Vec<ExpectedFileState> {
        vec![
            ExpectedFileState::new("fromhost", content, Origin::Host, true),
            ExpectedFileState::new("fromhostremove", content, Origin::Host, false),
            ExpectedFileState::new("frompod", content, Origin::Pod, true),
            ExpectedFileState::new("frompodremove", content, Origin::Pod, false),
        ]
    }
}

/// The two ends of a mount plus the pod observing the guest end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub host_dir: PathBuf,
    pub target: String,
    pub pod_name: String,
}

impl MountPoint {
    pub fn host_path(&self, name: &str) -> PathBuf {
        self.host_dir.join(name)
    }

    pub fn guest_path(&self, name: &str) -> String {
        format!("{}/{}", self.target.trim_end_matches('/'), name)
    }
}

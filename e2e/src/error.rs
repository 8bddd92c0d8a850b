use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to get kube client: {0}")]
    ClientGetFailed(#[from] kube::Error),

    #[error("Failed to load kubeconfig: {0}")]
    KubeconfigFailed(#[from] kube::config::KubeconfigError),

    #[error("Failed to apply yaml file: {0}")]
    ApplyFailed(String),

    #[error("Failed to parse the yaml file: {0}")]
    ParseYamlFailed(#[from] serde_yaml::Error),

    #[error("Failed to parse the json format: {0}")]
    ParseJsonFailed(#[from] serde_json::Error),

    #[error("Failed to access the local filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start `{command}`: {source}")]
    CommandSpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}\nstdout: {stdout}\nstderr: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("Mount daemon `{0}` exited before the workload was deployed")]
    MountDaemonExited(String),

    #[error("Pods matching {selector} are not running: {detail}")]
    PodsNotRunning { selector: String, detail: String },

    #[error("Expected file {0} to exist")]
    FileMissing(PathBuf),

    #[error("Expected {0} to be a file, found a directory")]
    NotAFile(PathBuf),

    #[error("Failed to download release binary: {0}")]
    DownloadFailed(#[from] reqwest::Error),

    #[error("Expected cluster status {expected:?}, got {actual:?}")]
    StatusMismatch {
        expected: String,
        actual: String,
        stdout: String,
        stderr: String,
    },

    #[error(transparent)]
    Mount(#[from] MountMismatch),

    #[error(transparent)]
    Upgrade(#[from] UpgradeFailure),

    #[error("after {attempts} attempts ({elapsed:?}): {source}")]
    RetryExhausted {
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: Box<Error>,
    },

    #[error("Invalid harness configuration: {0}")]
    Config(String),
}

impl Error {
    /// Captured stdout/stderr of the external command behind this error, if any.
    pub fn command_output(&self) -> Option<(&str, &str)> {
        match self {
            Error::CommandFailed { stdout, stderr, .. }
            | Error::StatusMismatch { stdout, stderr, .. } => Some((stdout, stderr)),
            Error::RetryExhausted { source, .. } => source.command_output(),
            _ => None,
        }
    }
}

/// The individual mount consistency checks, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountCheck {
    PodToHost,
    HostToPod,
    Timestamps,
    HostDeletion,
    PodDeletion,
}

impl fmt::Display for MountCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MountCheck::PodToHost => "pod-to-host visibility",
            MountCheck::HostToPod => "host-to-pod visibility",
            MountCheck::Timestamps => "timestamp",
            MountCheck::HostDeletion => "host-side deletion",
            MountCheck::PodDeletion => "pod-side deletion",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("Mount {check} check failed for {path}: expected {expected:?}, got {actual:?}")]
pub struct MountMismatch {
    pub check: MountCheck,
    pub path: PathBuf,
    pub expected: String,
    pub actual: String,
}

/// Steps of the version upgrade, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStep {
    EnsureReleaseBinary,
    StartRelease,
    StopRelease,
    StartCurrent,
}

impl fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpgradeStep::EnsureReleaseBinary => "ensure release binary",
            UpgradeStep::StartRelease => "start release binary",
            UpgradeStep::StopRelease => "stop release binary",
            UpgradeStep::StartCurrent => "start current binary",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("Version upgrade failed at step '{step}': {source}\nstdout: {stdout}\nstderr: {stderr}")]
pub struct UpgradeFailure {
    pub step: UpgradeStep,
    pub stdout: String,
    pub stderr: String,
    #[source]
    pub source: Box<Error>,
}

impl UpgradeFailure {
    pub fn new(step: UpgradeStep, source: Error) -> Self {
        let (stdout, stderr) = source
            .command_output()
            .map(|(out, err)| (out.to_string(), err.to_string()))
            .unwrap_or_default();
        UpgradeFailure {
            step,
            stdout,
            stderr,
            source: Box::new(source),
        }
    }
}

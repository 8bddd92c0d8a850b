//! Driving the cluster tool binary: lifecycle commands, SSH into the VM, and
//! the background mount daemon.

#![allow(async_fn_in_trait)]

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Error;
use crate::process::{run_command, run_command_output, CommandOutput, DaemonHandle};

pub const RUNNING: &str = "Running";
pub const STOPPED: &str = "Stopped";

/// Execute a command inside the provisioned VM.
pub trait RemoteExec {
    async fn ssh(&self, command: &str) -> Result<String, Error>;
}

/// Start the daemon that bridges a host directory into the VM.
pub trait MountLauncher {
    fn start_mount(&self, host_dir: &Path, target: &str) -> Result<DaemonHandle, Error>;
}

pub trait ClusterControl {
    async fn start(&self, args: &[String]) -> Result<CommandOutput, Error>;
    async fn stop(&self) -> Result<CommandOutput, Error>;
    /// The status query's output; stdout carries the host state, e.g. `Running`.
    async fn status(&self) -> Result<CommandOutput, Error>;
    async fn delete(&self) -> Result<(), Error>;

    async fn check_status(&self, expected: &str) -> Result<(), Error> {
        let output = self.status().await?;
        let actual = output.stdout.trim();
        if actual == expected {
            Ok(())
        } else {
            Err(Error::StatusMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
                stdout: output.stdout.clone(),
                stderr: output.stderr,
            })
        }
    }
}

/// One cluster tool binary bound to one profile.
#[derive(Debug, Clone)]
pub struct ClusterTool {
    binary: PathBuf,
    profile: String,
    start_args: Vec<String>,
    mount_args: Vec<String>,
}

impl ClusterTool {
    pub fn new(binary: impl Into<PathBuf>, profile: impl Into<String>) -> Self {
        ClusterTool {
            binary: binary.into(),
            profile: profile.into(),
            start_args: Vec::new(),
            mount_args: Vec::new(),
        }
    }

    pub fn with_start_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.start_args.extend(args);
        self
    }

    pub fn with_mount_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.mount_args.extend(args);
        self
    }

    fn args<'a>(&'a self, subcommand: &'a str) -> Vec<&'a str> {
        vec![subcommand, "-p", &self.profile]
    }

    pub fn start_command(&self, args: &[String]) -> Vec<String> {
        let mut cmd: Vec<String> = self.args("start").into_iter().map(String::from).collect();
        cmd.extend(self.start_args.iter().cloned());
        cmd.extend(args.iter().cloned());
        cmd
    }

    pub fn mount_command(&self, host_dir: &Path, target: &str) -> Vec<String> {
        let mut cmd: Vec<String> = self.args("mount").into_iter().map(String::from).collect();
        cmd.extend(self.mount_args.iter().cloned());
        cmd.push(format!("{}:{}", host_dir.display(), target));
        cmd
    }
}

impl ClusterControl for ClusterTool {
    async fn start(&self, args: &[String]) -> Result<CommandOutput, Error> {
        run_command(&self.binary, &self.start_command(args)).await
    }

    async fn stop(&self) -> Result<CommandOutput, Error> {
        run_command(&self.binary, &self.args("stop")).await
    }

    async fn status(&self) -> Result<CommandOutput, Error> {
        // `status` exits non-zero whenever the cluster is not running, so the
        // printed state is what matters.
        let mut args = self.args("status");
        args.push("--format={{.Host}}");
        let output = run_command_output(&self.binary, &args).await?;
        if output.stdout.trim().is_empty() {
            return Err(Error::CommandFailed {
                command: format!("{} {}", self.binary.display(), args.join(" ")),
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    async fn delete(&self) -> Result<(), Error> {
        info!("deleting profile {}", self.profile);
        run_command(&self.binary, &self.args("delete")).await?;
        Ok(())
    }
}

impl RemoteExec for ClusterTool {
    async fn ssh(&self, command: &str) -> Result<String, Error> {
        let mut args = self.args("ssh");
        args.push(command);
        Ok(run_command(&self.binary, &args).await?.stdout)
    }
}

impl MountLauncher for ClusterTool {
    fn start_mount(&self, host_dir: &Path, target: &str) -> Result<DaemonHandle, Error> {
        DaemonHandle::spawn(&self.binary, &self.mount_command(host_dir, target))
    }
}

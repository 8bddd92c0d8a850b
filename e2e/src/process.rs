use std::ffi::OsStr;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub status: String,
}

impl CommandOutput {
    fn from_parts(status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Self {
        CommandOutput {
            stdout: String::from_utf8_lossy(stdout).to_string(),
            stderr: String::from_utf8_lossy(stderr).to_string(),
            success: status.success(),
            status: status.to_string(),
        }
    }
}

fn render<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> String {
    let mut rendered = program.display().to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.as_ref().to_string_lossy());
    }
    rendered
}

/// Run a short-lived command to completion, whatever its exit status.
pub async fn run_command_output<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
) -> Result<CommandOutput, Error> {
    let command = render(program, args);
    info!("{}", command);
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| Error::CommandSpawnFailed {
            command: command.clone(),
            source,
        })?;
    let output = CommandOutput::from_parts(output.status, &output.stdout, &output.stderr);
    debug!("cmd output: {}", output.stdout);
    debug!("cmd error: {}", output.stderr);
    Ok(output)
}

/// Run a short-lived command; a non-zero exit is an error carrying the captured output.
pub async fn run_command<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
) -> Result<CommandOutput, Error> {
    let output = run_command_output(program, args).await?;
    if output.success {
        Ok(output)
    } else {
        Err(Error::CommandFailed {
            command: render(program, args),
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// A long-lived background process owned by exactly one scenario.
///
/// Only `kill` and `is_alive` are exposed. The child is also killed if the
/// handle is dropped without being stopped.
#[derive(Debug)]
pub struct DaemonHandle {
    name: String,
    child: Option<Child>,
}

impl DaemonHandle {
    pub fn spawn<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> Result<Self, Error> {
        let name = render(program, args);
        info!("starting daemon: {}", name);
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::CommandSpawnFailed {
                command: name.clone(),
                source,
            })?;
        Ok(DaemonHandle {
            name,
            child: Some(child),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Kill and reap the process. Calling this on a dead or already-stopped
    /// handle is a no-op; kill failures are logged, not returned.
    pub async fn kill(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!("daemon {} already exited with {}", self.name, status);
            return;
        }
        if let Err(e) = child.kill().await {
            warn!("Failed to kill daemon {}: {}", self.name, e);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    #[tokio::test]
    async fn run_command_captures_stdout() {
        let out = run_command(&sh(), &["-c", "echo test"]).await.unwrap();
        assert_eq!(out.stdout, "test\n");
        assert!(out.success);
    }

    #[tokio::test]
    async fn run_command_reports_failure_with_output() {
        let err = run_command(&sh(), &["-c", "echo partial; echo boom >&2; exit 3"])
            .await
            .unwrap_err();
        let (stdout, stderr) = err.command_output().unwrap();
        assert_eq!(stdout, "partial\n");
        assert_eq!(stderr, "boom\n");
    }

    #[tokio::test]
    async fn run_command_output_tolerates_non_zero_exit() {
        let out = run_command_output(&sh(), &["-c", "echo Stopped; exit 7"])
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.stdout.trim(), "Stopped");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = run_command::<&str>(Path::new("/nonexistent/cluster-tool"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandSpawnFailed { .. }));
    }

    #[tokio::test]
    async fn kill_is_idempotent() {
        let mut daemon = DaemonHandle::spawn(Path::new("sleep"), &["30"]).unwrap();
        assert!(daemon.is_alive());
        daemon.kill().await;
        assert!(!daemon.is_alive());
        daemon.kill().await;
        assert!(!daemon.is_alive());
    }

    #[tokio::test]
    async fn kill_tolerates_an_exited_process() {
        let mut daemon = DaemonHandle::spawn(&sh(), &["-c", "exit 0"]).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        daemon.kill().await;
        assert!(!daemon.is_alive());
    }
}

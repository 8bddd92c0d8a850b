//! Runs the upgrade workflow against two shell scripts standing in for the
//! released and the current cluster tool builds.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use cluster_e2e::cluster::ClusterTool;
use cluster_e2e::error::Error;
use cluster_e2e::release::ArtifactFetcher;
use cluster_e2e::upgrade::{UpgradeRun, UpgradeWorkflow};

struct NoDownloads;

impl ArtifactFetcher for NoDownloads {
    async fn fetch(&self, version: &str, _dest: &Path) -> Result<(), Error> {
        panic!("release {version} should have come from the cache");
    }
}

fn fake_tool(path: &Path, name: &str, state: &Path, log: &Path) {
    let script = format!(
        r#"#!/bin/sh
echo "{name} $*" >> {log}
case "$1" in
  start) echo Running > {state} ;;
  stop) echo Stopped > {state} ;;
  status) cat {state}; [ "$(cat {state})" = Running ] || exit 7 ;;
  delete) rm -f {state} ;;
esac
"#,
        name = name,
        log = log.display(),
        state = state.display(),
    );
    std::fs::write(path, script).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[tokio::test]
async fn released_build_hands_the_profile_to_the_current_build() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state");
    let log = dir.path().join("log");
    let run = UpgradeRun {
        release_binary: dir.path().join("minikube-linux-amd64-latest-stable"),
        release_version: "latest".to_string(),
        oldest_k8s_version: "v1.11.10".to_string(),
        newest_k8s_version: "v1.16.0".to_string(),
    };
    let current_binary = dir.path().join("minikube");
    fake_tool(&run.release_binary, "release", &state, &log);
    fake_tool(&current_binary, "current", &state, &log);

    let release = ClusterTool::new(&run.release_binary, "upgrade-test");
    let current = ClusterTool::new(&current_binary, "upgrade-test");
    UpgradeWorkflow::new(&release, &current, &NoDownloads, run.clone())
        .run()
        .await
        .unwrap();

    let invocations = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = invocations.lines().collect();
    assert_eq!(
        lines,
        vec![
            "release start -p upgrade-test --kubernetes-version=v1.11.10",
            "release status -p upgrade-test --format={{.Host}}",
            "release stop -p upgrade-test",
            "release status -p upgrade-test --format={{.Host}}",
            "current start -p upgrade-test --kubernetes-version=1.16.0",
            "current status -p upgrade-test --format={{.Host}}",
            "current delete -p upgrade-test",
        ]
    );
    assert!(!run.release_binary.exists());
    assert!(!state.exists());
}

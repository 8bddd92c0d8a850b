//! Previously released tool binaries.

#![allow(async_fn_in_trait)]

use std::path::Path;

use tracing::info;

use crate::error::Error;
use crate::fsutil::write_locked;
use crate::platform::Platform;
use crate::retry::{retry, RetryPolicy};

/// Produce the binary for `version` ("latest" or a semantic version) at `dest`.
pub trait ArtifactFetcher {
    async fn fetch(&self, version: &str, dest: &Path) -> Result<(), Error>;
}

pub struct ReleaseDownloader {
    client: reqwest::Client,
    base_url: String,
    artifact: String,
}

impl ReleaseDownloader {
    pub fn new(base_url: impl Into<String>, tool: &str, platform: &Platform) -> Self {
        ReleaseDownloader {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            artifact: platform.artifact_name(tool),
        }
    }

    pub fn url(&self, version: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            version,
            self.artifact
        )
    }
}

impl ArtifactFetcher for ReleaseDownloader {
    async fn fetch(&self, version: &str, dest: &Path) -> Result<(), Error> {
        let url = self.url(version);
        info!("downloading {} to {}", url, dest.display());
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_locked(dest, &bytes, 0o755)
    }
}

/// Poll for a regular file at `path`, giving an in-flight download a few
/// seconds to land.
pub async fn file_exists(path: &Path) -> Result<(), Error> {
    retry(&RetryPolicy::local_file(), || async move {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Err(Error::NotAFile(path.to_path_buf())),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::FileMissing(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_versioned_and_platform_specific() {
        let downloader = ReleaseDownloader::new(
            "https://storage.googleapis.com/minikube/releases/",
            "minikube",
            &Platform::new("linux", "amd64"),
        );
        assert_eq!(
            downloader.url("latest"),
            "https://storage.googleapis.com/minikube/releases/latest/minikube-linux-amd64"
        );
        assert_eq!(
            downloader.url("v1.4.0"),
            "https://storage.googleapis.com/minikube/releases/v1.4.0/minikube-linux-amd64"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn existing_file_is_found_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minikube-linux-amd64-latest-stable");
        std::fs::write(&path, b"binary").unwrap();
        let start = tokio::time::Instant::now();
        file_exists(&path).await.unwrap();
        assert_eq!(start.elapsed(), std::time::Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_file_gives_up_after_three_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minikube-linux-amd64-latest-stable");
        let err = file_exists(&path).await.unwrap_err();
        match err {
            Error::RetryExhausted {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, Error::FileMissing(_)));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn a_directory_is_not_a_binary() {
        let dir = tempfile::tempdir().unwrap();
        let err = file_exists(dir.path()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::RetryExhausted { ref source, .. } if matches!(**source, Error::NotAFile(_))
        ));
    }
}

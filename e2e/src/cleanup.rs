//! Deferred release of scenario resources.
//!
//! Acquiring a resource registers a lazy release future on a [`Cleanup`]
//! stack. The scenario runner calls [`Cleanup::release_all`] on every exit
//! path; releases run in reverse registration order and their failures are
//! logged, never returned, so they cannot mask the scenario's own result.

use std::future::Future;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use tracing::{info, warn};

use crate::error::Error;

#[derive(Default)]
pub struct Cleanup<'a> {
    releases: Vec<(String, LocalBoxFuture<'a, Result<(), Error>>)>,
}

impl<'a> Cleanup<'a> {
    pub fn new() -> Self {
        Cleanup {
            releases: Vec::new(),
        }
    }

    pub fn defer<F>(&mut self, label: impl Into<String>, release: F)
    where
        F: Future<Output = Result<(), Error>> + 'a,
    {
        self.releases.push((label.into(), release.boxed_local()));
    }

    /// Run every outstanding release, most recently registered first.
    pub async fn release_all(self) {
        for (label, release) in self.releases.into_iter().rev() {
            info!("cleanup: {}", label);
            if let Err(e) = release.await {
                warn!("cleanup '{}' failed: {}", label, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn releases_run_in_reverse_order() {
        let log = Mutex::new(Vec::new());
        let mut cleanup = Cleanup::new();
        for name in ["host dir", "mount daemon", "workload"] {
            let log = &log;
            cleanup.defer(name, async move {
                log.lock().unwrap().push(name);
                Ok(())
            });
        }
        cleanup.release_all().await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["workload", "mount daemon", "host dir"]
        );
    }

    #[tokio::test]
    async fn a_failing_release_does_not_stop_the_others() {
        let log = Mutex::new(Vec::new());
        let mut cleanup = Cleanup::new();
        let first = &log;
        cleanup.defer("delete profile", async move {
            first.lock().unwrap().push("delete profile");
            Ok(())
        });
        cleanup.defer("delete workload", async {
            Err(Error::ApplyFailed("pod busybox-mount not found".to_string()))
        });
        cleanup.release_all().await;
        assert_eq!(*log.lock().unwrap(), vec!["delete profile"]);
    }

    #[tokio::test]
    async fn nothing_runs_until_released() {
        let log = Mutex::new(Vec::<&str>::new());
        {
            let mut cleanup = Cleanup::new();
            let log = &log;
            cleanup.defer("remove release binary", async move {
                log.lock().unwrap().push("ran");
                Ok(())
            });
            assert!(log.lock().unwrap().is_empty());
            cleanup.release_all().await;
        }
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}

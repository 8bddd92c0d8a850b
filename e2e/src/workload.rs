#![allow(async_fn_in_trait)]

use std::future::Future;
use std::path::Path;

use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{
        Api, DeleteParams, DynamicObject, ListParams, LogParams, Patch, PatchParams, ResourceExt,
    },
    config::KubeConfigOptions,
    core::GroupVersionKind,
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
    Client, Config,
};
use tracing::{debug, info};

use crate::error::Error;
use crate::retry::{retry, RetryPolicy};

/// Create and delete the workload described by a manifest file.
pub trait WorkloadApplier {
    /// Returns the name of the applied object.
    async fn apply(&self, manifest: &Path) -> Result<String, Error>;
    async fn delete(&self, manifest: &Path) -> Result<String, Error>;
}

pub trait PodObserver {
    /// Succeeds when at least one pod matches `labels` and every match is `Running`.
    async fn pods_running(&self, namespace: &str, labels: &[(&str, &str)]) -> Result<(), Error>;
    async fn logs(&self, namespace: &str, pod: &str) -> Result<String, Error>;
}

pub fn label_selector(labels: &[(&str, &str)]) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Workloads and pods reached through the Kubernetes API of one cluster profile.
#[derive(Clone)]
pub struct KubeWorkloads {
    client: Client,
    discovery: std::sync::Arc<Discovery>,
    namespace: Option<String>,
}

impl KubeWorkloads {
    /// [`for_profile`](Self::for_profile), retried under `policy`. A cluster
    /// started without waiting may not be serving its API yet.
    pub async fn connect(profile: &str, policy: &RetryPolicy) -> Result<Self, Error> {
        await_api_server(policy, profile, || Self::for_profile(profile)).await
    }

    /// Connect using the kubeconfig context the cluster tool writes for `profile`.
    pub async fn for_profile(profile: &str) -> Result<Self, Error> {
        let options = KubeConfigOptions {
            context: Some(profile.to_string()),
            ..KubeConfigOptions::default()
        };
        let config = Config::from_kubeconfig(&options).await?;
        let client = Client::try_from(config)?;
        Self::new(client).await
    }

    pub async fn new(client: Client) -> Result<Self, Error> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(KubeWorkloads {
            client,
            discovery: std::sync::Arc::new(discovery),
            namespace: None,
        })
    }

    /// Place namespaced objects from every manifest in `namespace`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn resolve(&self, manifest: &Path) -> Result<(DynamicObject, Api<DynamicObject>), Error> {
        let yaml = std::fs::read_to_string(manifest)?;
        let mut obj: DynamicObject = serde_yaml::from_str(&yaml)?;
        let gvk = match &obj.types {
            Some(tm) => GroupVersionKind::try_from(tm)
                .map_err(|e| Error::ApplyFailed(format!("{}: {}", manifest.display(), e)))?,
            None => {
                return Err(Error::ApplyFailed(format!(
                    "{}: cannot apply object without valid TypeMeta",
                    manifest.display()
                )))
            }
        };
        let Some((ar, caps)) = self.discovery.resolve_gvk(&gvk) else {
            return Err(Error::ApplyFailed(format!(
                "{}: unknown kind {:?}",
                manifest.display(),
                gvk
            )));
        };
        place_in_namespace(&mut obj, &caps.scope, self.namespace.as_deref());
        let namespace = obj.metadata.namespace.clone();
        let api = dynamic_api(ar, caps, self.client.clone(), namespace.as_deref());
        Ok((obj, api))
    }
}

impl WorkloadApplier for KubeWorkloads {
    async fn apply(&self, manifest: &Path) -> Result<String, Error> {
        let (obj, api) = self.resolve(manifest)?;
        let name = obj.name_any();
        info!("Applying {} from {}", name, manifest.display());
        let ssapply = PatchParams::apply("cluster-e2e").force();
        let data: serde_json::Value = serde_json::to_value(&obj)?;
        api.patch(&name, &ssapply, &Patch::Apply(data)).await?;
        info!("applied {}", name);
        Ok(name)
    }

    async fn delete(&self, manifest: &Path) -> Result<String, Error> {
        let (obj, api) = self.resolve(manifest)?;
        let name = obj.name_any();
        info!("Deleting {} from {}", name, manifest.display());
        api.delete(&name, &DeleteParams::default()).await?;
        Ok(name)
    }
}

impl PodObserver for KubeWorkloads {
    async fn pods_running(&self, namespace: &str, labels: &[(&str, &str)]) -> Result<(), Error> {
        let selector = label_selector(labels);
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod_list = pods.list(&ListParams::default().labels(&selector)).await?;
        let phases: Vec<(String, Option<String>)> = pod_list
            .items
            .iter()
            .map(|p| {
                (
                    p.name_any(),
                    p.status.as_ref().and_then(|s| s.phase.clone()),
                )
            })
            .collect();
        check_phases(&selector, &phases)
    }

    async fn logs(&self, namespace: &str, pod: &str) -> Result<String, Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let logs = pods.logs(pod, &LogParams::default()).await?;
        debug!("logs of {}: {}", pod, logs);
        Ok(logs)
    }
}

pub async fn await_api_server<T, F, Fut>(
    policy: &RetryPolicy,
    profile: &str,
    connect: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    info!("Connecting to the API server of {}", profile);
    retry(policy, connect).await
}

fn place_in_namespace(obj: &mut DynamicObject, scope: &Scope, namespace: Option<&str>) {
    if let (Scope::Namespaced, Some(namespace)) = (scope, namespace) {
        obj.metadata.namespace = Some(namespace.to_string());
    }
}

fn check_phases(selector: &str, phases: &[(String, Option<String>)]) -> Result<(), Error> {
    if phases.is_empty() {
        return Err(Error::PodsNotRunning {
            selector: selector.to_string(),
            detail: "no matching pods".to_string(),
        });
    }
    for (name, phase) in phases {
        if phase.as_deref() != Some("Running") {
            return Err(Error::PodsNotRunning {
                selector: selector.to_string(),
                detail: format!("pod {} is in phase {:?}", name, phase),
            });
        }
    }
    Ok(())
}

fn dynamic_api(
    ar: ApiResource,
    caps: ApiCapabilities,
    client: Client,
    ns: Option<&str>,
) -> Api<DynamicObject> {
    if caps.scope == Scope::Cluster {
        Api::all_with(client, &ar)
    } else if let Some(namespace) = ns {
        Api::namespaced_with(client, namespace, &ar)
    } else {
        Api::default_namespaced_with(client, &ar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_joins_labels() {
        assert_eq!(
            label_selector(&[("integration-test", "busybox-mount")]),
            "integration-test=busybox-mount"
        );
        assert_eq!(label_selector(&[("a", "1"), ("b", "2")]), "a=1,b=2");
    }

    #[test]
    fn no_pods_is_not_running() {
        assert!(matches!(
            check_phases("integration-test=busybox-mount", &[]),
            Err(Error::PodsNotRunning { .. })
        ));
    }

    #[test]
    fn every_pod_must_be_running() {
        let pending = vec![
            ("busybox-mount".to_string(), Some("Running".to_string())),
            ("busybox-mount-2".to_string(), Some("Pending".to_string())),
        ];
        let err = check_phases("integration-test=busybox-mount", &pending).unwrap_err();
        assert!(err.to_string().contains("busybox-mount-2"));

        let running = vec![("busybox-mount".to_string(), Some("Running".to_string()))];
        assert!(check_phases("integration-test=busybox-mount", &running).is_ok());
    }

    #[test]
    fn shipped_manifest_parses_as_a_pod() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata/busybox-mount-test.yaml");
        let yaml = std::fs::read_to_string(path).unwrap();
        let obj: DynamicObject = serde_yaml::from_str(&yaml).unwrap();
        let types = obj.types.unwrap();
        assert_eq!(types.kind, "Pod");
        assert_eq!(obj.metadata.name.as_deref(), Some("busybox-mount"));
        assert_eq!(
            obj.metadata
                .labels
                .unwrap()
                .get("integration-test")
                .map(String::as_str),
            Some("busybox-mount")
        );
    }

    fn shipped_manifest() -> DynamicObject {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata/busybox-mount-test.yaml");
        serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn configured_namespace_replaces_the_manifest_one() {
        let mut obj = shipped_manifest();
        assert_eq!(obj.metadata.namespace.as_deref(), Some("default"));
        place_in_namespace(&mut obj, &Scope::Namespaced, Some("e2e"));
        assert_eq!(obj.metadata.namespace.as_deref(), Some("e2e"));

        let mut obj = shipped_manifest();
        place_in_namespace(&mut obj, &Scope::Namespaced, None);
        assert_eq!(obj.metadata.namespace.as_deref(), Some("default"));
        place_in_namespace(&mut obj, &Scope::Cluster, Some("e2e"));
        assert_eq!(obj.metadata.namespace.as_deref(), Some("default"));
    }

    fn refused() -> Error {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn api_server_is_awaited_until_it_answers() {
        let calls = std::cell::Cell::new(0);
        let start = tokio::time::Instant::now();
        let connected = await_api_server(&RetryPolicy::eventual(), "mount-1a2b3c4d", || {
            calls.set(calls.get() + 1);
            let attempt = calls.get();
            async move {
                if attempt <= 3 {
                    Err(refused())
                } else {
                    Ok("client")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(connected, "client");
        assert_eq!(calls.get(), 4);
        assert_eq!(start.elapsed(), std::time::Duration::from_millis(500 + 1000 + 2000));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_api_server_exhausts_the_policy() {
        let policy = RetryPolicy::attempts(std::time::Duration::from_millis(500), 3);
        let err = await_api_server(&policy, "mount-1a2b3c4d", || async {
            Err::<(), _>(refused())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::RetryExhausted { attempts: 3, .. }));
    }
}

//! uptrack kubehub – the orchestrator seam, deployment evaluation and the two feeders

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use futures::{stream::BoxStream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{
    api::{Api, ApiResource, DynamicObject, ListParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::GroupVersionKind,
    runtime::watcher::{self, Event},
    Client, Config,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub mod evaluate;
pub mod feed;
pub mod quantity;

pub use evaluate::{entity_key, evaluate, format_selector};
pub use feed::{poll_once, run_poll, run_watch, watch_session, PollConfig, SessionEnd, Tracker, WatchConfig};

/// Which deployments are monitored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    All,
    Namespace(String),
}

impl Scope {
    /// Empty namespace means all namespaces.
    pub fn from_namespace(ns: Option<&str>) -> Self {
        match ns {
            Some(ns) if !ns.is_empty() => Scope::Namespace(ns.to_string()),
            _ => Scope::All,
        }
    }
}

/// One item off the change stream.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Applied(Box<Deployment>),
    Deleted(Box<Deployment>),
    Bookmark,
    /// Transport or server-side watch error; the subscriber abandons the stream.
    Error(String),
}

/// Per-container live usage as reported by `metrics.k8s.io`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerUsage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub usage: BTreeMap<String, Quantity>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodUsage {
    #[serde(default)]
    pub containers: Vec<ContainerUsage>,
}

/// What the feeders need from the orchestration API.
#[async_trait::async_trait]
pub trait WorkloadSource: Send + Sync {
    async fn list(&self, scope: &Scope) -> Result<Vec<Deployment>>;

    /// Open a change subscription. Errors after opening arrive as `ChangeEvent::Error`.
    async fn watch(&self, scope: &Scope) -> Result<BoxStream<'static, ChangeEvent>>;

    async fn pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;

    /// May fail permanently when metrics-server is absent; callers degrade.
    async fn pod_metrics(&self, namespace: &str, selector: &str) -> Result<Vec<PodUsage>>;
}

/// `WorkloadSource` over a kube-rs client.
#[derive(Clone)]
pub struct KubeSource {
    client: Client,
    metrics_api: ApiResource,
}

impl KubeSource {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        Self { client, metrics_api: ApiResource::from_gvk_with_plural(&gvk, "pods") }
    }

    /// Build a client from an explicit kubeconfig, or the default chain (in-cluster, `KUBECONFIG`, `~/.kube/config`).
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
                let cfg = Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                    .await
                    .context("building client config from kubeconfig")?;
                Client::try_from(cfg).context("creating kube client")?
            }
            None => Client::try_default().await.context("creating kube client from default config")?,
        };
        info!(kubeconfig = ?kubeconfig, "kube client ready");
        Ok(Self::new(client))
    }

    fn deployments(&self, scope: &Scope) -> Api<Deployment> {
        match scope {
            Scope::All => Api::all(self.client.clone()),
            Scope::Namespace(ns) => Api::namespaced(self.client.clone(), ns),
        }
    }
}

#[async_trait::async_trait]
impl WorkloadSource for KubeSource {
    async fn list(&self, scope: &Scope) -> Result<Vec<Deployment>> {
        let list = self.deployments(scope).list(&ListParams::default()).await.context("listing deployments")?;
        Ok(list.items)
    }

    async fn watch(&self, scope: &Scope) -> Result<BoxStream<'static, ChangeEvent>> {
        let stream = watcher::watcher(self.deployments(scope), watcher::Config::default());
        let events = stream.flat_map(|ev| {
            let batch = match ev {
                Ok(Event::Applied(d)) => vec![ChangeEvent::Applied(Box::new(d))],
                Ok(Event::Deleted(d)) => vec![ChangeEvent::Deleted(Box::new(d))],
                Ok(Event::Restarted(list)) => {
                    debug!(count = list.len(), "watch restart");
                    list.into_iter().map(|d| ChangeEvent::Applied(Box::new(d))).collect()
                }
                Err(e) => vec![ChangeEvent::Error(e.to_string())],
            };
            futures::stream::iter(batch)
        });
        Ok(events.boxed())
    }

    async fn pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(selector))
            .await
            .with_context(|| format!("listing pods in {} for {}", namespace, selector))?;
        Ok(list.items)
    }

    async fn pod_metrics(&self, namespace: &str, selector: &str) -> Result<Vec<PodUsage>> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &self.metrics_api);
        let list = api.list(&ListParams::default().labels(selector)).await.context("listing pod metrics")?;
        let mut out = Vec::with_capacity(list.items.len());
        for obj in list.items {
            match serde_json::from_value::<PodUsage>(obj.data) {
                Ok(u) => out.push(u),
                Err(e) => debug!(error = %e, "skipping undecodable PodMetrics"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_namespace_means_all() {
        assert_eq!(Scope::from_namespace(None), Scope::All);
        assert_eq!(Scope::from_namespace(Some("")), Scope::All);
        assert_eq!(Scope::from_namespace(Some("prod")), Scope::Namespace("prod".into()));
    }

    #[test]
    fn pod_usage_decodes_metrics_payload() {
        let raw = serde_json::json!({
            "timestamp": "2024-01-01T00:00:00Z",
            "window": "30s",
            "containers": [
                { "name": "app", "usage": { "cpu": "120m", "memory": "64Mi" } },
                { "name": "sidecar", "usage": { "cpu": "5m" } }
            ]
        });
        let u: PodUsage = serde_json::from_value(raw).unwrap();
        assert_eq!(u.containers.len(), 2);
        assert_eq!(u.containers[0].usage.get("memory").map(|q| q.0.as_str()), Some("64Mi"));
        assert!(u.containers[1].usage.get("memory").is_none());
    }
}

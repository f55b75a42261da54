//! Watch and poll feeders. Both end in `Tracker::observe`, which is safe to call
//! from any number of tasks at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};
use uptrack_core::{Clock, EntityKey, Snapshot};
use uptrack_sink::MetricSink;
use uptrack_store::TransitionEngine;

use crate::evaluate::{evaluate, format_selector};
use crate::{ChangeEvent, Scope, WorkloadSource};

/// Engine + sink + clock, shared by both feeders.
#[derive(Clone)]
pub struct Tracker {
    engine: TransitionEngine,
    sink: Arc<dyn MetricSink>,
    clock: Arc<dyn Clock>,
}

impl Tracker {
    pub fn new(engine: TransitionEngine, sink: Arc<dyn MetricSink>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, sink, clock }
    }

    pub fn engine(&self) -> &TransitionEngine {
        &self.engine
    }

    /// Apply one observation and publish its intents. Returns how many were written.
    pub fn observe(&self, key: &EntityKey, snap: &Snapshot) -> usize {
        let intents = self.engine.apply(key, snap, self.clock.now());
        self.sink.record(&intents);
        intents.len()
    }

    /// Evaluate a watch-stream object (no pod data) and observe it. Invalid objects are dropped.
    fn observe_object(&self, d: &Deployment) -> bool {
        match evaluate(d, None, None) {
            Ok((key, snap)) => {
                self.observe(&key, &snap);
                true
            }
            Err(e) => {
                debug!(error = %e, "dropping deployment without identity");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchConfig {
    /// Flat wait between a failed or ended subscription and the next attempt.
    pub backoff: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { backoff: Duration::from_secs(5) }
    }
}

/// Why a watch session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    OpenFailed(String),
    StreamError(String),
    Closed,
}

/// Consume one subscription until it fails or the server closes it.
pub async fn watch_session(source: &dyn WorkloadSource, tracker: &Tracker, scope: &Scope) -> SessionEnd {
    let mut stream = match source.watch(scope).await {
        Ok(s) => s,
        Err(e) => return SessionEnd::OpenFailed(format!("{e:#}")),
    };
    info!(scope = ?scope, "deployment watch opened");
    while let Some(ev) = stream.next().await {
        match ev {
            ChangeEvent::Applied(d) | ChangeEvent::Deleted(d) => {
                tracker.observe_object(&d);
            }
            ChangeEvent::Bookmark => {}
            ChangeEvent::Error(msg) => return SessionEnd::StreamError(msg),
        }
    }
    SessionEnd::Closed
}

/// Keep a subscription open forever, reopening after `cfg.backoff` whenever it ends.
pub async fn run_watch(source: Arc<dyn WorkloadSource>, tracker: Arc<Tracker>, scope: Scope, cfg: WatchConfig) {
    loop {
        let end = watch_session(source.as_ref(), &tracker, &scope).await;
        match &end {
            SessionEnd::OpenFailed(e) => warn!(error = %e, "failed to open deployment watch"),
            SessionEnd::StreamError(e) => warn!(error = %e, "deployment watch failed"),
            SessionEnd::Closed => warn!("deployment watch closed by server"),
        }
        metrics::counter!("uptrack_watch_restarts_total", 1);
        tokio::time::sleep(cfg.backoff).await;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    /// Query pods and `metrics.k8s.io` for each deployment.
    pub resource_metrics: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(15), resource_metrics: true }
    }
}

/// One full listing pass. Returns the number of deployments observed.
///
/// Pod or usage lookups failing only drop the resource figures for that deployment.
pub async fn poll_once(source: &dyn WorkloadSource, tracker: &Tracker, scope: &Scope, resource_metrics: bool) -> Result<usize> {
    let started = Instant::now();
    let deployments = source.list(scope).await?;
    let mut observed = 0usize;
    for d in &deployments {
        let Some(ns) = d.metadata.namespace.as_deref() else {
            debug!("listed deployment without namespace");
            continue;
        };
        let selector = d.spec.as_ref().and_then(|s| format_selector(&s.selector));
        let (pods, usage) = match (resource_metrics, selector) {
            (true, Some(sel)) => match source.pods(ns, &sel).await {
                Ok(pods) => {
                    let usage = match source.pod_metrics(ns, &sel).await {
                        Ok(u) => Some(u),
                        Err(e) => {
                            debug!(namespace = ns, error = %e, "pod metrics unavailable");
                            None
                        }
                    };
                    (Some(pods), usage)
                }
                Err(e) => {
                    warn!(namespace = ns, selector = %sel, error = %e, "listing pods failed");
                    (None, None)
                }
            },
            _ => (None, None),
        };
        match evaluate(d, pods.as_deref(), usage.as_deref()) {
            Ok((key, snap)) => {
                tracker.observe(&key, &snap);
                observed += 1;
            }
            Err(e) => debug!(error = %e, "dropping deployment without identity"),
        }
    }
    metrics::histogram!("uptrack_poll_tick_ms", started.elapsed().as_secs_f64() * 1000.0);
    debug!(listed = deployments.len(), observed, "poll pass done");
    Ok(observed)
}

/// Poll every `cfg.interval`, first tick one interval after start. A failed listing skips the tick.
pub async fn run_poll(source: Arc<dyn WorkloadSource>, tracker: Arc<Tracker>, scope: Scope, cfg: PollConfig) {
    let mut ticker = interval_at(tokio::time::Instant::now() + cfg.interval, cfg.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = poll_once(source.as_ref(), &tracker, &scope, cfg.resource_metrics).await {
            metrics::counter!("uptrack_poll_errors_total", 1);
            warn!(error = %e, "listing deployments failed; skipping tick");
        }
    }
}

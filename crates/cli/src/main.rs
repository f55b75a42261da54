use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use clap::{ArgAction, Parser};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::signal;
use tracing::{error, info};
use uptrack_core::SystemClock;
use uptrack_kubehub::{run_poll, run_watch, KubeSource, PollConfig, Scope, Tracker, WatchConfig, WorkloadSource};
use uptrack_sink::{MetricSink, RecorderSink};
use uptrack_store::{AvailabilityStore, TransitionEngine};

#[derive(Parser, Debug)]
#[command(name = "uptrackd", version, about = "Deployment availability and recovery exporter")]
struct Config {
    /// Namespace to monitor (empty = all namespaces)
    #[arg(long, env = "UPTRACK_NAMESPACE", default_value = "")]
    namespace: String,

    /// Seconds between full listing passes
    #[arg(long = "poll-interval-secs", visible_alias = "scrape-interval", default_value_t = 15)]
    poll_interval_secs: u64,

    /// Flat wait before reopening a failed watch
    #[arg(long = "watch-backoff-secs", default_value_t = 5)]
    watch_backoff_secs: u64,

    /// Address serving /metrics and /health
    #[arg(long = "metrics-addr", env = "UPTRACK_METRICS_ADDR", default_value = "0.0.0.0:9101")]
    metrics_addr: SocketAddr,

    /// Path to kubeconfig (default: in-cluster, then KUBECONFIG, then ~/.kube/config)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Lock shards in the availability store
    #[arg(long, default_value_t = 16)]
    shards: usize,

    /// Skip pod and metrics.k8s.io lookups during polling
    #[arg(long = "no-resource-metrics", action = ArgAction::SetTrue)]
    no_resource_metrics: bool,
}

impl Config {
    fn scope(&self) -> Scope {
        Scope::from_namespace(Some(self.namespace.as_str()))
    }

    fn watch(&self) -> WatchConfig {
        WatchConfig { backoff: Duration::from_secs(self.watch_backoff_secs) }
    }

    fn poll(&self) -> PollConfig {
        PollConfig { interval: Duration::from_secs(self.poll_interval_secs.max(1)), resource_metrics: !self.no_resource_metrics }
    }
}

fn init_tracing() {
    let env = std::env::var("UPTRACK_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().context("installing Prometheus recorder")?;
    RecorderSink::describe_all();
    Ok(handle)
}

fn router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(metrics_handler)).route("/health", get(health_handler)).with_state(handle)
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], handle.render())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cfg = Config::parse();
    let handle = init_metrics()?;

    let source: Arc<dyn WorkloadSource> = Arc::new(KubeSource::connect(cfg.kubeconfig.as_deref()).await?);
    let store = Arc::new(AvailabilityStore::with_shards(cfg.shards));
    let sink: Arc<dyn MetricSink> = Arc::new(RecorderSink::new());
    let tracker = Arc::new(Tracker::new(TransitionEngine::new(store), sink, Arc::new(SystemClock)));

    let scope = cfg.scope();
    info!(scope = ?scope, poll_secs = cfg.poll_interval_secs, shards = cfg.shards, "starting feeders");
    let watch = tokio::spawn(run_watch(source.clone(), tracker.clone(), scope.clone(), cfg.watch()));
    let poll = tokio::spawn(run_poll(source, tracker, scope, cfg.poll()));

    let listener = tokio::net::TcpListener::bind(cfg.metrics_addr)
        .await
        .with_context(|| format!("binding {}", cfg.metrics_addr))?;
    info!(addr = %cfg.metrics_addr, "serving /metrics and /health");
    let mut server = tokio::spawn(async move { axum::serve(listener, router(handle)).await });

    let outcome = tokio::select! {
        res = signal::ctrl_c() => {
            info!("shutdown requested");
            res.context("waiting for ctrl-c")
        }
        res = &mut server => match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow::Error::from(e).context("http server failed")),
            Err(e) => Err(anyhow::Error::from(e).context("http server task")),
        },
    };
    if let Err(e) = &outcome {
        error!(error = ?e, "exiting");
    }
    watch.abort();
    poll.abort();
    server.abort();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_exporter() {
        let cfg = Config::try_parse_from(["uptrackd"]).unwrap();
        assert_eq!(cfg.scope(), Scope::All);
        assert_eq!(cfg.metrics_addr, "0.0.0.0:9101".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.poll().interval, Duration::from_secs(15));
        assert!(cfg.poll().resource_metrics);
        assert_eq!(cfg.watch().backoff, Duration::from_secs(5));
        assert_eq!(cfg.shards, 16);
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = Config::try_parse_from([
            "uptrackd",
            "--namespace",
            "prod",
            "--scrape-interval",
            "30",
            "--watch-backoff-secs",
            "2",
            "--no-resource-metrics",
        ])
        .unwrap();
        assert_eq!(cfg.scope(), Scope::Namespace("prod".into()));
        assert_eq!(cfg.poll().interval, Duration::from_secs(30));
        assert!(!cfg.poll().resource_metrics);
        assert_eq!(cfg.watch().backoff, Duration::from_secs(2));
    }

    #[test]
    fn bad_address_is_rejected() {
        assert!(Config::try_parse_from(["uptrackd", "--metrics-addr", "nowhere"]).is_err());
    }

    #[tokio::test]
    async fn health_says_ok() {
        let resp = health_handler().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

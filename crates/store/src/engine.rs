use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uptrack_core::{EntityKey, MetricIntent, MetricName, ResourceFigures, Snapshot};

use crate::AvailabilityStore;

const MIB: f64 = 1024.0 * 1024.0;

/// Two-state (Up/Down) availability machine per entity key.
///
/// Up is the absence of a downtime record, Down its presence. Up→Down emits the
/// downtime start; Down→Up emits duration, recovery time and one restart increment.
/// Self-transitions only refresh the always-on gauges.
#[derive(Clone)]
pub struct TransitionEngine {
    store: Arc<AvailabilityStore>,
}

impl TransitionEngine {
    pub fn new(store: Arc<AvailabilityStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<AvailabilityStore> {
        &self.store
    }

    pub fn apply(&self, key: &EntityKey, snap: &Snapshot, now: DateTime<Utc>) -> Vec<MetricIntent> {
        let mut out = Vec::with_capacity(16 + snap.conditions.len());
        let ready = snap.verdict().is_ready();

        out.push(MetricIntent::gauge(MetricName::Heartbeat, key, now.timestamp() as f64));
        push_observed(&mut out, key, snap);
        if let Some(res) = &snap.resources {
            push_resources(&mut out, key, res);
        }

        if ready {
            out.push(MetricIntent::gauge(MetricName::Status, key, 1.0));
            if let Some(rec) = self.store.end_downtime(key) {
                let elapsed = (now - rec.down_since).to_std().unwrap_or_default();
                let secs = elapsed.as_secs_f64();
                let ms = elapsed.as_millis() as u64;
                info!(namespace = %key.namespace, deployment = %key.name, downtime_secs = secs, downtime_ms = ms, "deployment recovered");
                out.push(MetricIntent::gauge(MetricName::DowntimeDuration, key, secs));
                out.push(MetricIntent::gauge(MetricName::RecoveryTime, key, ms as f64));
                out.push(MetricIntent::increment(MetricName::Restarts, key, 1));
            }
        } else {
            out.push(MetricIntent::gauge(MetricName::Status, key, 0.0));
            if let Some(rec) = self.store.begin_downtime(key, now) {
                info!(namespace = %key.namespace, deployment = %key.name, since = %rec.down_since, "deployment went down");
                out.push(MetricIntent::gauge(MetricName::DowntimeStart, key, rec.down_since.timestamp() as f64));
            }
        }
        out
    }
}

fn push_observed(out: &mut Vec<MetricIntent>, key: &EntityKey, snap: &Snapshot) {
    if let Some(created) = snap.created_at {
        out.push(MetricIntent::gauge(MetricName::Created, key, created.timestamp() as f64));
    }
    out.push(MetricIntent::gauge(MetricName::Generation, key, snap.generation as f64));
    out.push(MetricIntent::gauge(MetricName::ObservedGeneration, key, snap.observed_generation as f64));

    if let Some(desired) = snap.desired_replicas {
        out.push(MetricIntent::gauge(MetricName::ReplicasDesired, key, desired as f64));
    }
    out.push(MetricIntent::gauge(MetricName::ReplicasReady, key, snap.ready_replicas as f64));
    out.push(MetricIntent::gauge(MetricName::ReplicasAvailable, key, snap.available_replicas as f64));
    out.push(MetricIntent::gauge(MetricName::ReplicasUnavailable, key, snap.unavailable_replicas as f64));
    out.push(MetricIntent::gauge(MetricName::ReplicasUpdated, key, snap.updated_replicas as f64));

    if let Some(desired) = snap.desired_replicas {
        let ratio = if desired > 0 { snap.ready_replicas as f64 / desired as f64 } else { 0.0 };
        out.push(
            MetricIntent::gauge(MetricName::AvailabilityRatio, key, ratio)
                .with_label("available", snap.ready_replicas.to_string())
                .with_label("desired", desired.to_string()),
        );
    }

    for c in &snap.conditions {
        out.push(
            MetricIntent::gauge(MetricName::ConditionStatus, key, c.gauge_value())
                .with_label("condition", c.kind.clone())
                .with_label("status", c.status.clone()),
        );
    }
}

fn push_resources(out: &mut Vec<MetricIntent>, key: &EntityKey, res: &ResourceFigures) {
    out.push(MetricIntent::gauge(MetricName::CpuRequest, key, res.cpu_request_millicores));
    out.push(MetricIntent::gauge(MetricName::MemoryRequest, key, res.memory_request_bytes / MIB));
    out.push(MetricIntent::gauge(MetricName::CpuLimit, key, res.cpu_limit_millicores));
    out.push(MetricIntent::gauge(MetricName::MemoryLimit, key, res.memory_limit_bytes / MIB));

    let Some(usage) = res.usage else { return };
    out.push(MetricIntent::gauge(MetricName::CpuUsage, key, usage.cpu_millicores));
    out.push(MetricIntent::gauge(MetricName::MemoryUsage, key, usage.memory_bytes / MIB));
    if res.cpu_request_millicores > 0.0 {
        out.push(MetricIntent::gauge(MetricName::CpuUsagePercent, key, usage.cpu_millicores / res.cpu_request_millicores * 100.0));
    }
    if res.memory_request_bytes > 0.0 {
        out.push(MetricIntent::gauge(MetricName::MemoryUsagePercent, key, usage.memory_bytes / res.memory_request_bytes * 100.0));
    }
}

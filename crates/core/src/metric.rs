//! Metric intent vocabulary: the series uptrack exports and the `(name, labels, value)`
//! tuples the transition engine hands to a sink.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::EntityKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Every series exported per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricName {
    Status,
    Heartbeat,
    DowntimeStart,
    DowntimeDuration,
    RecoveryTime,
    Restarts,
    ConditionStatus,
    ReplicasDesired,
    ReplicasReady,
    ReplicasAvailable,
    ReplicasUnavailable,
    ReplicasUpdated,
    AvailabilityRatio,
    Created,
    Generation,
    ObservedGeneration,
    CpuRequest,
    CpuLimit,
    CpuUsage,
    CpuUsagePercent,
    MemoryRequest,
    MemoryLimit,
    MemoryUsage,
    MemoryUsagePercent,
}

impl MetricName {
    pub const ALL: [MetricName; 24] = [
        MetricName::Status,
        MetricName::Heartbeat,
        MetricName::DowntimeStart,
        MetricName::DowntimeDuration,
        MetricName::RecoveryTime,
        MetricName::Restarts,
        MetricName::ConditionStatus,
        MetricName::ReplicasDesired,
        MetricName::ReplicasReady,
        MetricName::ReplicasAvailable,
        MetricName::ReplicasUnavailable,
        MetricName::ReplicasUpdated,
        MetricName::AvailabilityRatio,
        MetricName::Created,
        MetricName::Generation,
        MetricName::ObservedGeneration,
        MetricName::CpuRequest,
        MetricName::CpuLimit,
        MetricName::CpuUsage,
        MetricName::CpuUsagePercent,
        MetricName::MemoryRequest,
        MetricName::MemoryLimit,
        MetricName::MemoryUsage,
        MetricName::MemoryUsagePercent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricName::Status => "k8s_deployment_status",
            MetricName::Heartbeat => "k8s_deployment_heartbeat_timestamp_seconds",
            MetricName::DowntimeStart => "k8s_deployment_downtime_start_timestamp_seconds",
            MetricName::DowntimeDuration => "k8s_deployment_downtime_duration_seconds",
            MetricName::RecoveryTime => "k8s_deployment_recovery_time_milliseconds",
            MetricName::Restarts => "k8s_deployment_restart_total",
            MetricName::ConditionStatus => "k8s_deployment_condition_status",
            MetricName::ReplicasDesired => "k8s_deployment_replicas_desired",
            MetricName::ReplicasReady => "k8s_deployment_replicas_ready",
            MetricName::ReplicasAvailable => "k8s_deployment_replicas_available",
            MetricName::ReplicasUnavailable => "k8s_deployment_replicas_unavailable",
            MetricName::ReplicasUpdated => "k8s_deployment_replicas_updated",
            MetricName::AvailabilityRatio => "k8s_deployment_availability_ratio",
            MetricName::Created => "k8s_deployment_created_timestamp_seconds",
            MetricName::Generation => "k8s_deployment_metadata_generation",
            MetricName::ObservedGeneration => "k8s_deployment_status_observed_generation",
            MetricName::CpuRequest => "k8s_deployment_cpu_request_millicores",
            MetricName::CpuLimit => "k8s_deployment_cpu_limit_millicores",
            MetricName::CpuUsage => "k8s_deployment_cpu_usage_millicores",
            MetricName::CpuUsagePercent => "k8s_deployment_cpu_usage_percent",
            MetricName::MemoryRequest => "k8s_deployment_memory_request_mebibytes",
            MetricName::MemoryLimit => "k8s_deployment_memory_limit_mebibytes",
            MetricName::MemoryUsage => "k8s_deployment_memory_usage_mebibytes",
            MetricName::MemoryUsagePercent => "k8s_deployment_memory_usage_percent",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            MetricName::Status => "Current deployment status (1=ready, 0=not ready)",
            MetricName::Heartbeat => "Timestamp of last heartbeat check (Unix epoch)",
            MetricName::DowntimeStart => "Unix timestamp when the deployment went down",
            MetricName::DowntimeDuration => "Duration in seconds that a deployment was down (from not ready to ready)",
            MetricName::RecoveryTime => "Time taken for deployment to recover from down state in milliseconds",
            MetricName::Restarts => "Total number of down to ready recoveries",
            MetricName::ConditionStatus => "Deployment condition status (1=true, 0=false, -1=unknown)",
            MetricName::ReplicasDesired => "Number of desired replicas for deployment",
            MetricName::ReplicasReady => "Number of ready replicas for deployment",
            MetricName::ReplicasAvailable => "Number of available replicas for deployment",
            MetricName::ReplicasUnavailable => "Number of unavailable replicas for deployment",
            MetricName::ReplicasUpdated => "Number of updated replicas for deployment",
            MetricName::AvailabilityRatio => "Deployment availability ratio (ready/desired)",
            MetricName::Created => "Unix timestamp when the deployment was created",
            MetricName::Generation => "Sequence number representing a specific generation of the desired state",
            MetricName::ObservedGeneration => "The generation observed by the deployment controller",
            MetricName::CpuRequest => "Total CPU requests in millicores for all pods in the deployment",
            MetricName::CpuLimit => "Total CPU limits in millicores for all pods in the deployment",
            MetricName::CpuUsage => "Total CPU usage in millicores for all pods in the deployment",
            MetricName::CpuUsagePercent => "CPU usage as percentage of request",
            MetricName::MemoryRequest => "Total memory requests in MiB for all pods in the deployment",
            MetricName::MemoryLimit => "Total memory limits in MiB for all pods in the deployment",
            MetricName::MemoryUsage => "Total memory usage in MiB for all pods in the deployment",
            MetricName::MemoryUsagePercent => "Memory usage as percentage of request",
        }
    }

    pub fn kind(self) -> MetricKind {
        match self {
            MetricName::Restarts => MetricKind::Counter,
            _ => MetricKind::Gauge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    /// Absolute gauge value.
    Gauge(f64),
    /// Monotonic counter increment.
    Increment(u64),
}

pub type Labels = SmallVec<[(String, String); 4]>;

/// One write the sink should perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricIntent {
    pub name: MetricName,
    pub labels: Labels,
    pub value: MetricValue,
}

impl MetricIntent {
    pub fn gauge(name: MetricName, key: &EntityKey, value: f64) -> Self {
        Self { name, labels: base_labels(key), value: MetricValue::Gauge(value) }
    }

    pub fn increment(name: MetricName, key: &EntityKey, by: u64) -> Self {
        Self { name, labels: base_labels(key), value: MetricValue::Increment(by) }
    }

    /// Append a metric-specific label after the entity pair.
    pub fn with_label(mut self, k: &str, v: impl Into<String>) -> Self {
        self.labels.push((k.to_string(), v.into()));
        self
    }

    pub fn label(&self, k: &str) -> Option<&str> {
        self.labels.iter().find(|(lk, _)| lk == k).map(|(_, v)| v.as_str())
    }
}

fn base_labels(key: &EntityKey) -> Labels {
    key.labels().iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_and_prefixed() {
        let mut seen = std::collections::HashSet::new();
        for n in MetricName::ALL {
            assert!(n.as_str().starts_with("k8s_deployment_"));
            assert!(seen.insert(n.as_str()), "duplicate {}", n.as_str());
            assert!(!n.help().is_empty());
        }
    }

    #[test]
    fn only_restarts_is_a_counter() {
        let counters: Vec<_> = MetricName::ALL.iter().filter(|n| n.kind() == MetricKind::Counter).collect();
        assert_eq!(counters, vec![&MetricName::Restarts]);
    }

    #[test]
    fn intent_labels_start_with_entity() {
        let key = EntityKey::new("prod", "api");
        let i = MetricIntent::gauge(MetricName::ConditionStatus, &key, 1.0)
            .with_label("condition", "Available")
            .with_label("status", "True");
        let names: Vec<_> = i.labels.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["namespace", "deployment", "condition", "status"]);
        assert_eq!(i.label("deployment"), Some("api"));
        assert_eq!(i.label("missing"), None);
    }
}

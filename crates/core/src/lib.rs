//! uptrack core types: entity identity, observation snapshots and downtime records

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod metric;

pub use metric::{MetricIntent, MetricKind, MetricName, MetricValue};

/// Canonical identity of a monitored workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub namespace: String,
    pub name: String,
}

impl EntityKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    /// Base label pair carried by every series of this entity.
    pub fn labels(&self) -> [(&'static str, &str); 2] {
        [("namespace", self.namespace.as_str()), ("deployment", self.name.as_str())]
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Raised when an orchestrator object lacks the identity fields needed to key it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidObject {
    #[error("object missing metadata.{0}")]
    MissingField(&'static str),
}

/// A single `(type, status)` condition reported by the workload controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub kind: String,
    pub status: String,
}

impl Condition {
    pub fn new(kind: impl Into<String>, status: impl Into<String>) -> Self {
        Self { kind: kind.into(), status: status.into() }
    }

    /// `True` → 1, `False` → 0, anything else (usually `Unknown`) → -1.
    pub fn gauge_value(&self) -> f64 {
        match self.status.as_str() {
            "True" => 1.0,
            "False" => 0.0,
            _ => -1.0,
        }
    }
}

/// Live usage reported by the metrics API, summed over the entity's pods.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_millicores: f64,
    pub memory_bytes: f64,
}

/// Requests and limits summed over every container of every pod matching the selector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceFigures {
    pub cpu_request_millicores: f64,
    pub cpu_limit_millicores: f64,
    pub memory_request_bytes: f64,
    pub memory_limit_bytes: f64,
    pub usage: Option<ResourceUsage>,
}

/// One observation of a workload. Built fresh per event, consumed once.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// `None` when `spec.replicas` is unset.
    pub desired_replicas: Option<i32>,
    pub ready_replicas: i32,
    pub available_replicas: i32,
    pub unavailable_replicas: i32,
    pub updated_replicas: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub generation: i64,
    pub observed_generation: i64,
    pub conditions: SmallVec<[Condition; 4]>,
    pub resources: Option<ResourceFigures>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessVerdict {
    Ready,
    NotReady,
}

impl ReadinessVerdict {
    pub fn is_ready(self) -> bool {
        matches!(self, ReadinessVerdict::Ready)
    }
}

impl Snapshot {
    /// Ready iff every desired replica is ready, none is unavailable, and at least one is desired.
    /// A workload scaled to zero (or with unset replicas) is never ready.
    pub fn verdict(&self) -> ReadinessVerdict {
        let desired = self.desired_replicas.unwrap_or(0);
        if desired > 0 && self.ready_replicas == desired && self.unavailable_replicas == 0 {
            ReadinessVerdict::Ready
        } else {
            ReadinessVerdict::NotReady
        }
    }
}

/// Marker that an entity is currently down. Its presence in the store is the Down state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DowntimeRecord {
    pub down_since: DateTime<Utc>,
}

/// Time source for transition accounting.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = t;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut g = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *g += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---- sharding primitives ----

/// Maps an entity key onto one of a fixed number of lock shards.
pub trait ShardPlanner: Send + Sync {
    fn plan(&self, key: &EntityKey) -> usize;
    fn shards(&self) -> usize;
}

/// Default planner: FNV-1a over `namespace/name`, modulo the shard count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FnvKeyPlanner {
    buckets: u16,
}

impl FnvKeyPlanner {
    pub fn new(buckets: usize) -> Self {
        Self { buckets: buckets.clamp(1, u16::MAX as usize) as u16 }
    }
}

impl ShardPlanner for FnvKeyPlanner {
    fn plan(&self, key: &EntityKey) -> usize {
        if self.buckets <= 1 {
            return 0;
        }
        let mut h: u64 = 0xcbf29ce484222325; // 64-bit FNV-1a offset
        let bytes = key.namespace.as_bytes().iter().chain(b"/").chain(key.name.as_bytes());
        for b in bytes {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h % self.buckets as u64) as usize
    }

    fn shards(&self) -> usize {
        self.buckets as usize
    }
}

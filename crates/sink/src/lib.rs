//! uptrack sink: where metric intents end up.
//!
//! `RecorderSink` forwards to whatever `metrics` recorder the process installed
//! (the daemon installs the Prometheus one). `MemorySink` keeps everything in RAM
//! so feeders and the engine can be exercised without a global recorder.

#![forbid(unsafe_code)]

use std::sync::Mutex;

use metrics::{counter, describe_counter, describe_gauge, gauge, Label};
use rustc_hash::FxHashMap;
use uptrack_core::{EntityKey, MetricIntent, MetricKind, MetricName, MetricValue};

/// Write-only time-series register.
pub trait MetricSink: Send + Sync {
    fn set_gauge(&self, name: MetricName, labels: &[(String, String)], value: f64);
    fn increment_counter(&self, name: MetricName, labels: &[(String, String)], delta: u64);

    fn record(&self, intents: &[MetricIntent]) {
        for i in intents {
            match i.value {
                MetricValue::Gauge(v) => self.set_gauge(i.name, &i.labels, v),
                MetricValue::Increment(d) => self.increment_counter(i.name, &i.labels, d),
            }
        }
    }
}

/// Sink backed by the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderSink;

impl RecorderSink {
    pub fn new() -> Self {
        Self
    }

    /// Register help text for every exported series. Call once after installing the recorder.
    pub fn describe_all() {
        for name in MetricName::ALL {
            match name.kind() {
                MetricKind::Gauge => describe_gauge!(name.as_str(), name.help()),
                MetricKind::Counter => describe_counter!(name.as_str(), name.help()),
            }
        }
    }
}

impl MetricSink for RecorderSink {
    fn set_gauge(&self, name: MetricName, labels: &[(String, String)], value: f64) {
        gauge!(name.as_str(), value, to_labels(labels));
    }

    fn increment_counter(&self, name: MetricName, labels: &[(String, String)], delta: u64) {
        counter!(name.as_str(), delta, to_labels(labels));
    }
}

fn to_labels(labels: &[(String, String)]) -> Vec<Label> {
    labels.iter().map(|(k, v)| Label::new(k.clone(), v.clone())).collect()
}

type SeriesKey = (MetricName, Vec<(String, String)>);

#[derive(Default)]
struct MemoryState {
    gauges: FxHashMap<SeriesKey, f64>,
    counters: FxHashMap<SeriesKey, u64>,
    log: Vec<MetricIntent>,
}

/// In-RAM sink: latest gauge values, counter totals and the full write log.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Gauge value of the series carrying only the entity labels.
    pub fn gauge(&self, name: MetricName, key: &EntityKey) -> Option<f64> {
        self.gauge_with(name, &entity_labels(key))
    }

    pub fn gauge_with(&self, name: MetricName, labels: &[(String, String)]) -> Option<f64> {
        self.lock().gauges.get(&(name, labels.to_vec())).copied()
    }

    pub fn counter(&self, name: MetricName, key: &EntityKey) -> u64 {
        self.lock().counters.get(&(name, entity_labels(key))).copied().unwrap_or(0)
    }

    /// Number of writes of `name` for `key`, across all label sets.
    pub fn writes(&self, name: MetricName, key: &EntityKey) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|i| i.name == name && i.label("namespace") == Some(key.namespace.as_str()) && i.label("deployment") == Some(key.name.as_str()))
            .count()
    }

    pub fn intents(&self) -> Vec<MetricIntent> {
        self.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }
}

impl MetricSink for MemorySink {
    fn set_gauge(&self, name: MetricName, labels: &[(String, String)], value: f64) {
        let mut st = self.lock();
        st.gauges.insert((name, labels.to_vec()), value);
        st.log.push(MetricIntent { name, labels: labels.iter().cloned().collect(), value: MetricValue::Gauge(value) });
    }

    fn increment_counter(&self, name: MetricName, labels: &[(String, String)], delta: u64) {
        let mut st = self.lock();
        *st.counters.entry((name, labels.to_vec())).or_insert(0) += delta;
        st.log.push(MetricIntent { name, labels: labels.iter().cloned().collect(), value: MetricValue::Increment(delta) });
    }
}

fn entity_labels(key: &EntityKey) -> Vec<(String, String)> {
    key.labels().iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

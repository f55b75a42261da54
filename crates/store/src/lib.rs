//! uptrack store: in-RAM availability state and the transition engine driving it

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use uptrack_core::{DowntimeRecord, EntityKey, FnvKeyPlanner, ShardPlanner};

mod engine;

pub use engine::TransitionEngine;

pub const DEFAULT_SHARDS: usize = 16;

type Shard = FxHashMap<EntityKey, DowntimeRecord>;

/// Open downtime records keyed by entity.
///
/// Keys are spread over independently locked shards; every operation takes exactly
/// one shard lock and releases it before returning, so concurrent feeders never see
/// a torn read-modify-write on the same key.
pub struct AvailabilityStore {
    shards: Box<[Mutex<Shard>]>,
    planner: Box<dyn ShardPlanner>,
}

impl AvailabilityStore {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(n: usize) -> Self {
        Self::with_planner(FnvKeyPlanner::new(n))
    }

    pub fn with_planner(planner: impl ShardPlanner + 'static) -> Self {
        let shards = (0..planner.shards().max(1)).map(|_| Mutex::new(Shard::default())).collect();
        Self { shards, planner: Box::new(planner) }
    }

    fn shard(&self, key: &EntityKey) -> MutexGuard<'_, Shard> {
        let idx = self.planner.plan(key) % self.shards.len();
        // Poisoning is recovered: shards hold plain values.
        self.shards[idx].lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &EntityKey) -> Option<DowntimeRecord> {
        self.shard(key).get(key).copied()
    }

    /// Insert or replace; returns the previous record.
    pub fn put(&self, key: EntityKey, record: DowntimeRecord) -> Option<DowntimeRecord> {
        self.shard(&key).insert(key, record)
    }

    pub fn remove(&self, key: &EntityKey) -> Option<DowntimeRecord> {
        self.shard(key).remove(key)
    }

    /// Open a downtime record unless one already exists. Returns the record only when it was created here.
    pub fn begin_downtime(&self, key: &EntityKey, now: DateTime<Utc>) -> Option<DowntimeRecord> {
        let mut shard = self.shard(key);
        if shard.contains_key(key) {
            return None;
        }
        let rec = DowntimeRecord { down_since: now };
        shard.insert(key.clone(), rec);
        Some(rec)
    }

    /// Close the open downtime record, if any.
    pub fn end_downtime(&self, key: &EntityKey) -> Option<DowntimeRecord> {
        self.remove(key)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl Default for AvailabilityStore {
    fn default() -> Self {
        Self::new()
    }
}

#![forbid(unsafe_code)]

use std::sync::{Arc, Barrier};

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use uptrack_core::{EntityKey, MetricIntent, MetricName, Snapshot};
use uptrack_store::{AvailabilityStore, TransitionEngine};

fn at_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

fn observation(ready: bool) -> Snapshot {
    if ready {
        Snapshot { desired_replicas: Some(2), ready_replicas: 2, available_replicas: 2, ..Default::default() }
    } else {
        Snapshot { desired_replicas: Some(2), ready_replicas: 0, unavailable_replicas: 2, ..Default::default() }
    }
}

fn count(out: &[MetricIntent], name: MetricName) -> usize {
    out.iter().filter(|i| i.name == name).count()
}

/// Down→Up edges implied by a verdict sequence starting from Up.
fn expected_recoveries(seq: &[bool]) -> usize {
    let mut up = true;
    let mut n = 0;
    for &ready in seq {
        if ready && !up {
            n += 1;
        }
        up = ready;
    }
    n
}

proptest! {
    #[test]
    fn recoveries_match_down_up_edges(seq in proptest::collection::vec(any::<bool>(), 0..64)) {
        let store = Arc::new(AvailabilityStore::new());
        let engine = TransitionEngine::new(store.clone());
        let key = EntityKey::new("prod", "api");
        let mut restarts = 0;
        let mut starts = 0;
        for (i, &ready) in seq.iter().enumerate() {
            let out = engine.apply(&key, &observation(ready), at_ms(i as i64 * 1000));
            restarts += count(&out, MetricName::Restarts);
            starts += count(&out, MetricName::DowntimeStart);
        }
        prop_assert_eq!(restarts, expected_recoveries(&seq));
        let open = store.get(&key).is_some();
        prop_assert_eq!(starts, restarts + usize::from(open));
    }

    #[test]
    fn record_present_iff_last_verdict_down(seq in proptest::collection::vec(any::<bool>(), 1..64)) {
        let store = Arc::new(AvailabilityStore::new());
        let engine = TransitionEngine::new(store.clone());
        let key = EntityKey::new("prod", "api");
        let mut first_down_in_run: Option<i64> = None;
        for (i, &ready) in seq.iter().enumerate() {
            let t = i as i64 * 1000;
            engine.apply(&key, &observation(ready), at_ms(t));
            if ready {
                first_down_in_run = None;
            } else if first_down_in_run.is_none() {
                first_down_in_run = Some(t);
            }
            prop_assert_eq!(store.get(&key).map(|r| r.down_since), first_down_in_run.map(at_ms));
        }
    }

    #[test]
    fn concurrent_feeders_never_double_count(
        watch in proptest::collection::vec(any::<bool>(), 1..48),
        poll in proptest::collection::vec(any::<bool>(), 1..48),
    ) {
        let store = Arc::new(AvailabilityStore::with_shards(4));
        let engine = TransitionEngine::new(store.clone());
        let key = EntityKey::new("prod", "api");
        let barrier = Arc::new(Barrier::new(2));

        let spawn = |seq: Vec<bool>, offset: i64| {
            let engine = engine.clone();
            let key = key.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                let mut starts = 0;
                let mut restarts = 0;
                for (i, ready) in seq.into_iter().enumerate() {
                    let out = engine.apply(&key, &observation(ready), at_ms(offset + i as i64 * 10));
                    starts += count(&out, MetricName::DowntimeStart);
                    restarts += count(&out, MetricName::Restarts);
                }
                (starts, restarts)
            })
        };

        let a = spawn(watch, 0);
        let b = spawn(poll, 5);
        let (sa, ra) = a.join().unwrap();
        let (sb, rb) = b.join().unwrap();

        prop_assert!(store.len() <= 1);
        let open = store.get(&key).is_some();
        // every opened outage is either still open or was closed exactly once
        prop_assert_eq!(sa + sb, ra + rb + usize::from(open));
    }
}

#[test]
fn hammered_key_keeps_single_record() {
    let store = Arc::new(AvailabilityStore::new());
    let engine = TransitionEngine::new(store.clone());
    let key = EntityKey::new("prod", "api");
    let threads: Vec<_> = (0..8)
        .map(|n| {
            let engine = engine.clone();
            let key = key.clone();
            std::thread::spawn(move || {
                let mut starts = 0;
                for i in 0..200 {
                    let out = engine.apply(&key, &observation(false), at_ms(n * 1000 + i));
                    starts += count(&out, MetricName::DowntimeStart);
                }
                starts
            })
        })
        .collect();
    let starts: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();
    assert_eq!(starts, 1);
    assert_eq!(store.len(), 1);

    let out = engine.apply(&key, &observation(true), at_ms(1_000_000));
    assert_eq!(count(&out, MetricName::Restarts), 1);
    assert!(store.is_empty());
}

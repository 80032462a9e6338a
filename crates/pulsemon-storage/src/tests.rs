use crate::file::FileStore;
use crate::memory::MemoryStore;
use crate::sqlite::SqliteStore;
use crate::{MetricStore, StorageError};
use pulsemon_common::types::{Metric, MetricKind};
use std::time::Duration;
use tempfile::TempDir;

/// One instance of every backend, each in its own temp directory.
fn backends() -> (TempDir, Vec<Box<dyn MetricStore>>) {
    let dir = TempDir::new().unwrap();
    let stores: Vec<Box<dyn MetricStore>> = vec![
        Box::new(MemoryStore::new()),
        Box::new(FileStore::open(&dir.path().join("metrics.json"), true, false).unwrap()),
        Box::new(
            SqliteStore::open(&dir.path().join("metrics.db"), Duration::from_secs(1), Vec::new())
                .unwrap(),
        ),
    ];
    (dir, stores)
}

fn sorted(mut metrics: Vec<Metric>) -> Vec<Metric> {
    metrics.sort_by(|a, b| (&a.id, a.kind).cmp(&(&b.id, b.kind)));
    metrics
}

fn gauge_without_value(id: &str) -> Metric {
    Metric {
        id: id.to_string(),
        kind: MetricKind::Gauge,
        delta: None,
        value: None,
    }
}

#[test]
fn counter_sum_is_the_same_for_single_and_batched_saves() {
    let deltas = [4, -2, 10, 1];
    let (_dir, stores) = backends();
    for store in &stores {
        for d in deltas {
            store.save(&Metric::counter("single", d)).unwrap();
        }
        let batch: Vec<_> = deltas.iter().map(|d| Metric::counter("batched", *d)).collect();
        store.save_many(&batch).unwrap();

        let expected: i64 = deltas.iter().sum();
        assert_eq!(store.get(MetricKind::Counter, "single").unwrap().delta, Some(expected), "{}", store.backend());
        assert_eq!(store.get(MetricKind::Counter, "batched").unwrap().delta, Some(expected), "{}", store.backend());
    }
}

#[test]
fn last_gauge_wins_regardless_of_batching() {
    let (_dir, stores) = backends();
    for store in &stores {
        store.save(&Metric::gauge("a", 1.0)).unwrap();
        store.save(&Metric::gauge("a", 2.0)).unwrap();
        store
            .save_many(&[Metric::gauge("b", 1.0), Metric::gauge("b", 2.0)])
            .unwrap();
        assert_eq!(store.get(MetricKind::Gauge, "a").unwrap().value, Some(2.0));
        assert_eq!(store.get(MetricKind::Gauge, "b").unwrap().value, Some(2.0));
    }
}

#[test]
fn read_your_write_and_stable_listing() {
    let (_dir, stores) = backends();
    for store in &stores {
        let saved = store.save(&Metric::gauge("Alloc", 512.5)).unwrap();
        assert_eq!(store.get(MetricKind::Gauge, "Alloc").unwrap(), saved);

        let batch = store
            .save_many(&[Metric::counter("PollCount", 1), Metric::gauge("RandomValue", 0.5)])
            .unwrap();
        for m in &batch {
            assert_eq!(&store.get(m.kind, &m.id).unwrap(), m);
        }

        let first = sorted(store.get_all().unwrap());
        let second = sorted(store.get_all().unwrap());
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }
}

#[test]
fn backends_agree_on_the_same_update_sequence() {
    let steps: Vec<Vec<Metric>> = vec![
        vec![Metric::counter("PollCount", 1), Metric::gauge("Alloc", 10.0)],
        vec![Metric::gauge("Alloc", 11.5), Metric::counter("x", 3), Metric::gauge("x", -1.0)],
        vec![Metric::counter("PollCount", 1), Metric::counter("PollCount", 1)],
    ];
    let (_dir, stores) = backends();
    let mut listings = Vec::new();
    for store in &stores {
        for step in &steps {
            store.save_many(step).unwrap();
        }
        listings.push(sorted(store.get_all().unwrap()));
    }
    assert_eq!(listings[0], listings[1]);
    assert_eq!(listings[1], listings[2]);
    assert_eq!(listings[0].len(), 4);
}

#[test]
fn file_round_trip_through_close_and_restore() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.json");

    let store = FileStore::open(&path, true, false).unwrap();
    let written: Vec<Metric> = (0..20)
        .map(|i| {
            if i % 2 == 0 {
                Metric::gauge(format!("g{i}"), i as f64 / 4.0)
            } else {
                Metric::counter(format!("c{i}"), i)
            }
        })
        .collect();
    store.save_many(&written).unwrap();
    store.close().unwrap();

    let reopened = FileStore::open(&path, true, false).unwrap();
    assert_eq!(sorted(reopened.get_all().unwrap()), sorted(written));
}

#[test]
fn scenario_counter_accumulates_to_eight() {
    let (_dir, stores) = backends();
    for store in &stores {
        store.save(&Metric::counter("requests", 5)).unwrap();
        let merged = store.save(&Metric::counter("requests", 3)).unwrap();
        assert_eq!(merged.delta, Some(8));
        assert_eq!(store.get(MetricKind::Counter, "requests").unwrap().delta, Some(8));
    }
}

#[test]
fn scenario_batch_gauge_keeps_last_value() {
    let (_dir, stores) = backends();
    for store in &stores {
        let out = store
            .save_many(&[Metric::gauge("temp", 10.0), Metric::gauge("temp", 12.0)])
            .unwrap();
        assert_eq!(out, vec![Metric::gauge("temp", 12.0)]);
        assert_eq!(store.get(MetricKind::Gauge, "temp").unwrap().value, Some(12.0));
    }
}

#[test]
fn scenario_missing_metric_is_not_found() {
    let (_dir, stores) = backends();
    for store in &stores {
        match store.get(MetricKind::Gauge, "missing") {
            Err(StorageError::NotFound { kind, id }) => {
                assert_eq!(kind, MetricKind::Gauge);
                assert_eq!(id, "missing");
            }
            other => panic!("{}: expected NotFound, got {other:?}", store.backend()),
        }
    }
}

#[test]
fn scenario_invalid_entry_rejects_the_whole_batch() {
    let (_dir, stores) = backends();
    for store in &stores {
        let err = store
            .save_many(&[Metric::counter("hits", 1), gauge_without_value("temp")])
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidBatch(_)), "{}", store.backend());
        assert!(store.get_all().unwrap().is_empty(), "{} persisted a partial batch", store.backend());
    }
}

#[test]
fn single_invalid_save_is_a_validation_error() {
    let (_dir, stores) = backends();
    for store in &stores {
        let err = store.save(&Metric::gauge("", 1.0)).unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)), "{}", store.backend());
    }
}

#[test]
fn only_the_relational_backend_pings() {
    let (_dir, stores) = backends();
    let results: Vec<bool> = stores.iter().map(|s| s.ping().is_ok()).collect();
    assert_eq!(results, [false, false, true]);
}

//! Merge rules shared by every backend.
//!
//! A batch is applied as one unit: all entries are validated and the new
//! totals computed against a scratch copy before the stored snapshot is
//! touched. If any entry is invalid the snapshot is left as it was and every
//! offending entry is reported together.

use crate::error::{Invalid, Result, StorageError, Violation};
use pulsemon_common::types::{Metric, MetricKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Current value of every metric, keyed by kind and then id.
///
/// Serialized as `{"gauge": {...}, "counter": {...}}`, which is also the
/// on-disk format of the file backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    #[serde(default)]
    pub gauge: BTreeMap<String, f64>,
    #[serde(default)]
    pub counter: BTreeMap<String, i64>,
}

impl MetricSnapshot {
    pub fn get(&self, kind: MetricKind, id: &str) -> Option<Metric> {
        match kind {
            MetricKind::Gauge => self.gauge.get(id).map(|v| Metric::gauge(id, *v)),
            MetricKind::Counter => self.counter.get(id).map(|d| Metric::counter(id, *d)),
        }
    }

    /// All metrics, gauges first, each group ordered by id.
    pub fn metrics(&self) -> Vec<Metric> {
        let gauges = self.gauge.iter().map(|(id, v)| Metric::gauge(id.as_str(), *v));
        let counters = self.counter.iter().map(|(id, d)| Metric::counter(id.as_str(), *d));
        gauges.chain(counters).collect()
    }

    pub fn len(&self) -> usize {
        self.gauge.len() + self.counter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauge.is_empty() && self.counter.is_empty()
    }
}

/// Checks the shape of each entry without looking at stored state.
///
/// Used directly by the relational backend, which computes totals in SQL.
pub fn validate(incoming: &[Metric]) -> Result<()> {
    let violations: Vec<Violation> = incoming
        .iter()
        .enumerate()
        .filter_map(|(index, m)| shape_error(m).map(|problem| violation(index, m, problem)))
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(StorageError::rejected(violations, incoming.len()))
    }
}

fn shape_error(m: &Metric) -> Option<Invalid> {
    if m.id.is_empty() {
        return Some(Invalid::EmptyId);
    }
    match m.kind {
        MetricKind::Counter if m.delta.is_none() => Some(Invalid::MissingDelta),
        MetricKind::Gauge => match m.value {
            None => Some(Invalid::MissingValue),
            Some(v) if !v.is_finite() => Some(Invalid::NonFiniteValue(v)),
            Some(_) => None,
        },
        MetricKind::Counter => None,
    }
}

fn violation(index: usize, m: &Metric, problem: Invalid) -> Violation {
    Violation {
        index,
        id: m.id.clone(),
        kind: m.kind,
        problem,
    }
}

/// Applies `incoming` to `current` and returns the post-merge metrics, one
/// per distinct `(kind, id)` in first-appearance order.
///
/// The result is the same as applying the entries one at a time in order.
///
/// # Examples
///
/// ```
/// use pulsemon_common::types::{Metric, MetricKind};
/// use pulsemon_storage::accumulator::{merge, MetricSnapshot};
///
/// let mut snapshot = MetricSnapshot::default();
/// merge(&mut snapshot, &[Metric::counter("requests", 5)]).unwrap();
/// let out = merge(&mut snapshot, &[Metric::counter("requests", 3)]).unwrap();
/// assert_eq!(out, vec![Metric::counter("requests", 8)]);
/// assert_eq!(snapshot.get(MetricKind::Counter, "requests"), Some(Metric::counter("requests", 8)));
/// ```
pub fn merge(current: &mut MetricSnapshot, incoming: &[Metric]) -> Result<Vec<Metric>> {
    validate(incoming)?;

    let mut gauges: HashMap<&str, f64> = HashMap::new();
    let mut counters: HashMap<&str, i64> = HashMap::new();
    let mut order = Latest::default();
    let mut violations = Vec::new();

    for (index, m) in incoming.iter().enumerate() {
        match (m.kind, m.value, m.delta) {
            (MetricKind::Gauge, Some(value), _) => {
                gauges.insert(&m.id, value);
            }
            (MetricKind::Counter, _, Some(delta)) => {
                let prior = match counters.get(m.id.as_str()) {
                    Some(total) => *total,
                    None => current.counter.get(&m.id).copied().unwrap_or(0),
                };
                match prior.checked_add(delta) {
                    Some(total) => {
                        counters.insert(&m.id, total);
                    }
                    None => {
                        violations.push(violation(
                            index,
                            m,
                            Invalid::CounterOverflow {
                                current: prior,
                                delta,
                            },
                        ));
                        continue;
                    }
                }
            }
            // Shapes were checked by `validate`.
            _ => continue,
        }
        order.touch(m.kind, &m.id);
    }

    if !violations.is_empty() {
        return Err(StorageError::rejected(violations, incoming.len()));
    }

    for (id, value) in &gauges {
        current.gauge.insert((*id).to_string(), *value);
    }
    for (id, total) in &counters {
        current.counter.insert((*id).to_string(), *total);
    }

    Ok(order
        .keys()
        .map(|(kind, id)| match kind {
            MetricKind::Gauge => Metric::gauge(id, gauges[id]),
            MetricKind::Counter => Metric::counter(id, counters[id]),
        })
        .collect())
}

/// Distinct `(kind, id)` keys in first-appearance order.
#[derive(Debug, Default)]
pub(crate) struct Latest<'a> {
    seen: HashMap<(MetricKind, &'a str), usize>,
    keys: Vec<(MetricKind, &'a str)>,
}

impl<'a> Latest<'a> {
    /// Records the key and returns its slot.
    pub(crate) fn touch(&mut self, kind: MetricKind, id: &'a str) -> usize {
        *self.seen.entry((kind, id)).or_insert_with(|| {
            self.keys.push((kind, id));
            self.keys.len() - 1
        })
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = (MetricKind, &'a str)> + '_ {
        self.keys.iter().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }
}

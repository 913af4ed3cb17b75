use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use serde::Serialize;

use crate::{AggregationType, Stage, Treatment};

/// Identifies a metric aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricKey {
    #[serde(rename = "experimentID")]
    pub experiment_id: String,
    pub stage: Stage,
    pub dimension: String,
    pub treatment: Treatment,
    pub metric_name: String,
    pub aggregation_type: AggregationType,
}

/// Running aggregate of all observations recorded for a [`MetricKey`] since the last flush.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricBucket {
    pub sum: f64,
    pub count: u64,
    /// Raw observations. Only kept for [`AggregationType::Percentile`].
    pub values: Vec<f64>,
}

impl MetricBucket {
    fn add(&mut self, aggregation_type: AggregationType, value: f64) {
        self.sum += value;
        self.count += 1;
        if aggregation_type == AggregationType::Percentile {
            self.values.push(value);
        }
    }
}

/// Thread-safe buffer of metric aggregates awaiting upload.
///
/// A single mutex guards the whole map. Critical sections are a hash lookup and a few additions,
/// so contention stays low even with many recording threads.
#[derive(Debug, Default)]
pub struct MetricsBuffer {
    buckets: Mutex<HashMap<MetricKey, MetricBucket>>,
}

impl MetricsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` to the aggregate for `key`, creating it on first use.
    ///
    /// `value` is expected to have passed [`AggregationType::validate_value`].
    pub fn record(&self, key: MetricKey, value: f64) {
        let aggregation_type = key.aggregation_type;
        let mut buckets = self.lock();
        buckets.entry(key).or_default().add(aggregation_type, value);
    }

    /// Detach all aggregates, leaving an empty buffer behind.
    ///
    /// Each observation ends up either in the returned map or in the new buffer, never both.
    pub fn take(&self) -> HashMap<MetricKey, MetricBucket> {
        std::mem::take(&mut *self.lock())
    }

    /// Copy of the current aggregates, for diagnostics.
    pub fn snapshot(&self) -> HashMap<MetricKey, MetricBucket> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<MetricKey, MetricBucket>> {
        // Nothing panics while the lock is held, so a poisoned map is still consistent.
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

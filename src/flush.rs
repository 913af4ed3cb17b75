//! Turning buffered aggregates into upload batches.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};

use crate::{
    metrics::{MetricBucket, MetricKey, MetricsBuffer},
    remote::{MetricsSender, SEND_BATCH_SIZE},
    AggregationType, Stage, Treatment,
};

/// A single aggregated metric, as uploaded to the SimpleAB API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    #[serde(rename = "experimentID")]
    pub experiment_id: String,
    pub stage: Stage,
    pub dimension: String,
    pub treatment: Treatment,
    pub metric_name: String,
    pub aggregation_type: AggregationType,
    #[serde(flatten)]
    pub value: AggregatedValue,
    pub count: u64,
}

/// Aggregated value of a [`MetricRecord`]. Its shape depends on the aggregation type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregatedValue {
    /// Total for [`AggregationType::Sum`] or mean for [`AggregationType::Average`].
    Value { value: f64 },
    /// Percentiles for [`AggregationType::Percentile`].
    Percentiles { p50: f64, p90: f64, p99: f64 },
}

/// Outcome of a [`Client::flush`](crate::Client::flush) call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Number of records produced from the buffer.
    pub records: usize,
    pub batches_sent: usize,
    /// Batches that failed to upload. Their records are lost.
    pub batches_failed: usize,
}

/// Drains [`MetricsBuffer`] into batches and hands them to a [`MetricsSender`].
pub struct FlushDispatcher {
    buffer: Arc<MetricsBuffer>,
    sender: Arc<dyn MetricsSender + Send + Sync>,
    /// Timed and explicit flushes must not interleave.
    flush_lock: Mutex<()>,
}

impl FlushDispatcher {
    pub fn new(buffer: Arc<MetricsBuffer>, sender: Arc<dyn MetricsSender + Send + Sync>) -> Self {
        FlushDispatcher {
            buffer,
            sender,
            flush_lock: Mutex::new(()),
        }
    }

    /// Detach the buffer contents and upload them in batches of [`SEND_BATCH_SIZE`].
    ///
    /// Recording continues against the fresh buffer while batches are being sent. A failed batch
    /// is logged and does not prevent the remaining batches from being sent.
    pub fn flush(&self) -> FlushSummary {
        let _guard = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let records = build_records(self.buffer.take());
        let mut summary = FlushSummary {
            records: records.len(),
            ..FlushSummary::default()
        };
        if records.is_empty() {
            return summary;
        }

        log::debug!(target: "simpleab", records = records.len(); "flushing metrics");
        for batch in records.chunks(SEND_BATCH_SIZE) {
            match self.sender.send_metrics(batch) {
                Ok(()) => summary.batches_sent += 1,
                Err(err) => {
                    summary.batches_failed += 1;
                    log::warn!(target: "simpleab",
                        batch_size = batch.len();
                        "error sending metrics batch: {err}");
                }
            }
        }

        summary
    }
}

fn build_records(buckets: HashMap<MetricKey, MetricBucket>) -> Vec<MetricRecord> {
    let mut buckets: Vec<_> = buckets.into_iter().collect();
    // Stable output order makes batches reproducible.
    buckets.sort_by(|(a, _), (b, _)| a.cmp(b));
    buckets
        .into_iter()
        .map(|(key, bucket)| build_record(key, bucket))
        .collect()
}

fn build_record(key: MetricKey, bucket: MetricBucket) -> MetricRecord {
    let value = match key.aggregation_type {
        AggregationType::Sum => AggregatedValue::Value { value: bucket.sum },
        // A bucket only exists after at least one observation, so count >= 1.
        AggregationType::Average => AggregatedValue::Value {
            value: bucket.sum / bucket.count as f64,
        },
        AggregationType::Percentile => {
            let mut values = bucket.values;
            values.sort_by(f64::total_cmp);
            let [p50, p90, p99] = AggregationType::PERCENTILES.map(|p| percentile(&values, p));
            AggregatedValue::Percentiles { p50, p90, p99 }
        }
    };

    MetricRecord {
        experiment_id: key.experiment_id,
        stage: key.stage,
        dimension: key.dimension,
        treatment: key.treatment,
        metric_name: key.metric_name,
        aggregation_type: key.aggregation_type,
        value,
        count: bucket.count,
    }
}

/// Nearest-rank percentile of ascending `sorted`: element at `ceil(p/100 * N) - 1`, clamped to
/// the valid index range.
fn percentile(sorted: &[f64], p: u32) -> f64 {
    let Some(last) = sorted.len().checked_sub(1) else {
        return 0.0;
    };
    // Integer arithmetic keeps ceil() exact, e.g. for p=99 and N=100.
    let rank = (p as usize * sorted.len()).div_ceil(100);
    sorted[rank.saturating_sub(1).min(last)]
}

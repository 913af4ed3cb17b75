//! Remote operations the SDK depends on.
//!
//! [`HttpApi`](crate::HttpApi) implements both traits against the SimpleAB API. Closures implement
//! them as well, which is handy for tests and for hosts that bring their own transport.
use serde::{Deserialize, Serialize};

use crate::{
    experiment::{Experiment, TryParse},
    flush::MetricRecord,
    Result,
};

/// Maximum number of experiment identifiers per [`ExperimentFetcher::fetch_experiments`] call.
pub const FETCH_BATCH_SIZE: usize = 50;

/// Maximum number of records per [`MetricsSender::send_metrics`] call.
pub const SEND_BATCH_SIZE: usize = 150;

/// Response of a batch experiment lookup.
///
/// Identifiers unknown to the service are simply absent from `success`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchExperimentsResponse {
    #[serde(default)]
    pub success: Vec<TryParse<Experiment>>,
    #[serde(default)]
    pub failures: Vec<serde_json::Value>,
}

impl FromIterator<Experiment> for FetchExperimentsResponse {
    fn from_iter<I: IntoIterator<Item = Experiment>>(iter: I) -> Self {
        FetchExperimentsResponse {
            success: iter.into_iter().map(TryParse::from).collect(),
            failures: Vec::new(),
        }
    }
}

/// Looks up experiment definitions by identifier.
pub trait ExperimentFetcher {
    /// Fetch definitions for at most [`FETCH_BATCH_SIZE`] identifiers.
    fn fetch_experiments(&self, ids: &[String]) -> Result<FetchExperimentsResponse>;
}

impl<T: Fn(&[String]) -> Result<FetchExperimentsResponse>> ExperimentFetcher for T {
    fn fetch_experiments(&self, ids: &[String]) -> Result<FetchExperimentsResponse> {
        self(ids)
    }
}

/// Uploads aggregated metrics.
pub trait MetricsSender {
    /// Send at most [`SEND_BATCH_SIZE`] records.
    ///
    /// Failures are logged by the caller and the batch is dropped; implementations that need
    /// stronger delivery guarantees should retry internally.
    fn send_metrics(&self, batch: &[MetricRecord]) -> Result<()>;
}

impl<T: Fn(&[MetricRecord]) -> Result<()>> MetricsSender for T {
    fn send_metrics(&self, batch: &[MetricRecord]) -> Result<()> {
        self(batch)
    }
}

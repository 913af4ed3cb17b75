//! The Rust SDK for SimpleAB, an A/B/n experimentation service.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that assigns visitors to experiment treatments and
//! collects outcome metrics for those treatments.
//!
//! Assignment is deterministic: the same experiment definition, stage, dimension and allocation
//! key always produce the same [`Treatment`], in every process. Each visitor first passes an
//! exposure gate and is then bucketed into one of the treatment allocations, using two
//! independent MD5-based hashes of the allocation key. Overrides force a treatment for specific
//! allocation keys.
//!
//! Experiment definitions are fetched from the SimpleAB API on first use and cached. Metrics are
//! aggregated in memory (sum, average or percentiles) and uploaded in batches when
//! [`Client::flush`] is called or by a background flush thread.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! [`Client::get_treatment`] never fails: a broken experiment results in [`Treatment::None`] so
//! that it cannot break the feature it gates. [`Client::track_metric`] reports invalid input as
//! [`Error::Validation`], as these errors usually indicate a bug in the calling code.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages. Consider integrating a `log`-compatible logger implementation for better visibility
//! into SDK operations.
//!
//! # Examples
//!
//! ```no_run
//! # use simpleab::{ClientConfig, Metric};
//! let client = ClientConfig::from_api_key("api-key").to_client()?;
//!
//! let treatment = client.get_treatment("checkout-button", "Prod", "GLO-all", "user-42");
//!
//! client.track_metric(&Metric {
//!     experiment_id: "checkout-button".to_owned(),
//!     stage: "Prod".to_owned(),
//!     dimension: "GLO-all".to_owned(),
//!     treatment: treatment.to_string(),
//!     metric_name: "purchases".to_owned(),
//!     metric_value: 1.0,
//!     aggregation_type: None,
//! })?;
//!
//! client.shutdown();
//! # Ok::<(), simpleab::Error>(())
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod config;
mod error;
mod eval;
mod experiment_store;
mod flush;
mod http;
mod metrics;
mod poller;
mod remote;
mod segment;
mod sharder;
mod vocabulary;

pub mod experiment;

pub use client::{Client, Metric, SegmentMetric};
pub use config::ClientConfig;
pub use error::{Error, Result, ValidationError};
pub use flush::{AggregatedValue, FlushSummary, MetricRecord};
pub use http::{HttpApi, HttpApiConfig};
pub use metrics::{MetricBucket, MetricKey};
pub use poller::PollerThread;
pub use remote::{
    ExperimentFetcher, FetchExperimentsResponse, MetricsSender, FETCH_BATCH_SIZE, SEND_BATCH_SIZE,
};
pub use segment::Segment;
pub use sharder::{Md5Sharder, Sharder};
pub use vocabulary::{AggregationType, Stage, Treatment};

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

#[cfg(doc)]
use crate::Error;
use crate::{
    experiment::Experiment,
    experiment_store::ExperimentStore,
    flush::{FlushDispatcher, FlushSummary},
    http::{HttpApi, HttpApiConfig},
    metrics::{MetricBucket, MetricKey, MetricsBuffer},
    poller::{PollerThread, PollerThreadConfig},
    remote::{ExperimentFetcher, MetricsSender},
    segment::Segment,
    sharder::Md5Sharder,
    AggregationType, ClientConfig, Result, Stage, Treatment,
};

/// A metric observation for [`Client::track_metric`].
///
/// Field values are validated when recorded, so this can be deserialized directly from untrusted
/// input such as a tracking request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    #[serde(rename = "experimentID")]
    pub experiment_id: String,
    pub stage: String,
    pub dimension: String,
    pub treatment: String,
    pub metric_name: String,
    pub metric_value: f64,
    /// Defaults to `sum`.
    #[serde(default)]
    pub aggregation_type: Option<String>,
}

/// A metric observation for [`Client::track_metric_with_segment`]. The dimension is resolved
/// from `segment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMetric {
    #[serde(rename = "experimentID")]
    pub experiment_id: String,
    pub stage: String,
    pub segment: Segment,
    pub treatment: String,
    pub metric_name: String,
    pub metric_value: f64,
    /// Defaults to `sum`.
    #[serde(default)]
    pub aggregation_type: Option<String>,
}

/// A client for the SimpleAB API.
///
/// The client assigns treatments and buffers metrics. It does not start any threads on its own:
/// call [`Client::start_refresh_thread`] and [`Client::start_flush_thread`] to keep experiments
/// fresh and upload metrics periodically, and [`Client::shutdown`] to upload whatever is left.
///
/// # Examples
/// ```no_run
/// # use simpleab::{ClientConfig, Treatment};
/// let client = ClientConfig::from_api_key("api-key").to_client().unwrap();
/// let flush_thread = client.start_flush_thread().unwrap();
///
/// let treatment = client.get_treatment("checkout-button", "Prod", "GLO-all", "user-42");
/// if treatment == Treatment::Control {
///     // render the original checkout button
/// }
/// ```
pub struct Client {
    experiment_store: Arc<ExperimentStore>,
    metrics_buffer: Arc<MetricsBuffer>,
    flush_dispatcher: Arc<FlushDispatcher>,
    config: ClientConfig,
}

impl Client {
    /// Create a new `Client` talking to the SimpleAB API over HTTP.
    ///
    /// Experiments listed in [`ClientConfig::preload_experiments`] are fetched right away. A
    /// failure to preload is logged and the experiments are fetched again on first use.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidBaseUrl`] if the base URL configuration is invalid.
    /// - [`Error::Network`] if the HTTP client cannot be initialized.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api = Arc::new(HttpApi::new(HttpApiConfig {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
        })?);
        Ok(Client::with_remote(config, api.clone(), api))
    }

    /// Create a new `Client` using custom remote collaborators instead of the HTTP API.
    pub fn with_remote(
        config: ClientConfig,
        fetcher: Arc<dyn ExperimentFetcher + Send + Sync>,
        sender: Arc<dyn MetricsSender + Send + Sync>,
    ) -> Self {
        let experiment_store = Arc::new(ExperimentStore::new(fetcher));
        let metrics_buffer = Arc::new(MetricsBuffer::new());
        let flush_dispatcher = Arc::new(FlushDispatcher::new(metrics_buffer.clone(), sender));

        if !config.preload_experiments.is_empty() {
            if let Err(err) = experiment_store.load(&config.preload_experiments) {
                log::warn!(target: "simpleab", "error preloading experiments: {err}");
            }
        }

        Client {
            experiment_store,
            metrics_buffer,
            flush_dispatcher,
            config,
        }
    }

    /// Get treatment for the given experiment, stage, dimension and allocation key.
    ///
    /// Never fails: any error (unknown experiment, stage or dimension, network failure) is logged
    /// and results in [`Treatment::None`], so a broken experiment cannot break the feature it
    /// gates. Use [`Client::try_get_treatment`] to see the error.
    pub fn get_treatment(
        &self,
        experiment_id: &str,
        stage: &str,
        dimension: &str,
        allocation_key: &str,
    ) -> Treatment {
        self.try_get_treatment(experiment_id, stage, dimension, allocation_key)
            .unwrap_or_else(|err| {
                log::warn!(target: "simpleab",
                    experiment_id,
                    stage,
                    dimension,
                    allocation_key;
                    "error occurred while assigning a treatment: {err}");
                Treatment::None
            })
    }

    /// Same as [`Client::get_treatment`] but returns the error instead of swallowing it.
    ///
    /// `Ok(Treatment::None)` is a normal outcome: the dimension is disabled or the visitor is not
    /// exposed or allocated.
    ///
    /// # Errors
    ///
    /// - [`Error::ExperimentNotFound`], [`Error::StageNotFound`] or [`Error::DimensionNotFound`]
    /// if the lookup fails.
    /// - Any error from fetching the experiment.
    pub fn try_get_treatment(
        &self,
        experiment_id: &str,
        stage: &str,
        dimension: &str,
        allocation_key: &str,
    ) -> Result<Treatment> {
        let experiment = self.experiment_store.get(experiment_id)?;
        let treatment = experiment.assign(stage, dimension, allocation_key, &Md5Sharder)?;

        log::trace!(target: "simpleab",
            experiment_id,
            stage,
            dimension,
            allocation_key,
            treatment:display;
            "assigned a treatment");

        Ok(treatment)
    }

    /// Get treatment, resolving the dimension from a visitor segment.
    ///
    /// Returns [`Treatment::None`] if no enabled dimension matches the segment. Like
    /// [`Client::get_treatment`], never fails.
    pub fn get_treatment_with_segment(
        &self,
        experiment_id: &str,
        stage: &str,
        segment: &Segment,
        allocation_key: &str,
    ) -> Treatment {
        let dimension = self
            .experiment_store
            .get(experiment_id)
            .and_then(|experiment| experiment.resolve_dimension(stage, segment));

        match dimension {
            Ok(Some(dimension)) => {
                self.get_treatment(experiment_id, stage, &dimension, allocation_key)
            }
            Ok(None) => Treatment::None,
            Err(err) => {
                log::warn!(target: "simpleab",
                    experiment_id,
                    stage,
                    segment:serde;
                    "error occurred while resolving a segment: {err}");
                Treatment::None
            }
        }
    }

    /// Record a metric observation for later upload.
    ///
    /// Observations for [`Treatment::None`] are silently ignored: the visitor is not part of the
    /// experiment.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if the treatment, stage, aggregation type or value is invalid.
    /// - [`Error::ExperimentNotFound`], [`Error::StageNotFound`], [`Error::DimensionNotFound`] or
    /// [`Error::TreatmentNotFound`] if the metric does not belong to a known experiment.
    pub fn track_metric(&self, metric: &Metric) -> Result<()> {
        let Some((treatment, stage, aggregation_type)) = validate_observation(
            &metric.treatment,
            &metric.stage,
            metric.aggregation_type.as_deref(),
            &metric.metric_name,
            metric.metric_value,
        )?
        else {
            return Ok(());
        };

        let experiment = self.experiment_store.get(&metric.experiment_id)?;
        experiment
            .find_stage(stage.as_str())?
            .find_dimension(&metric.dimension)?;
        experiment.find_treatment(treatment)?;

        self.metrics_buffer.record(
            MetricKey {
                experiment_id: metric.experiment_id.clone(),
                stage,
                dimension: metric.dimension.clone(),
                treatment,
                metric_name: metric.metric_name.clone(),
                aggregation_type,
            },
            metric.metric_value,
        );
        Ok(())
    }

    /// Record a metric observation, resolving the dimension from a visitor segment.
    ///
    /// Does nothing if no enabled dimension matches the segment. Invalid input is reported even
    /// then.
    ///
    /// # Errors
    ///
    /// Same as [`Client::track_metric`].
    pub fn track_metric_with_segment(&self, metric: &SegmentMetric) -> Result<()> {
        if validate_observation(
            &metric.treatment,
            &metric.stage,
            metric.aggregation_type.as_deref(),
            &metric.metric_name,
            metric.metric_value,
        )?
        .is_none()
        {
            return Ok(());
        }

        let experiment = self.experiment_store.get(&metric.experiment_id)?;
        let Some(dimension) = experiment.resolve_dimension(&metric.stage, &metric.segment)? else {
            return Ok(());
        };

        self.track_metric(&Metric {
            experiment_id: metric.experiment_id.clone(),
            stage: metric.stage.clone(),
            dimension,
            treatment: metric.treatment.clone(),
            metric_name: metric.metric_name.clone(),
            metric_value: metric.metric_value,
            aggregation_type: metric.aggregation_type.clone(),
        })
    }

    /// Upload all buffered metrics now.
    ///
    /// Blocks until every batch has been attempted. Failed batches are logged and dropped.
    pub fn flush(&self) -> FlushSummary {
        self.flush_dispatcher.flush()
    }

    /// Re-fetch all cached experiments now.
    pub fn refresh_experiments(&self) {
        self.experiment_store.refresh()
    }

    /// Currently cached experiments, for diagnostics.
    pub fn cached_experiments(&self) -> HashMap<String, Arc<Experiment>> {
        self.experiment_store.snapshot()
    }

    /// Currently buffered metric aggregates, for diagnostics.
    pub fn buffered_metrics(&self) -> HashMap<MetricKey, MetricBucket> {
        self.metrics_buffer.snapshot()
    }

    /// Start a thread that re-fetches cached experiments every
    /// [`ClientConfig::refresh_interval`].
    pub fn start_refresh_thread(&self) -> Result<PollerThread> {
        let store = self.experiment_store.clone();
        PollerThread::start(
            "simpleab-refresh",
            PollerThreadConfig {
                interval: self.config.refresh_interval,
                jitter: self.config.poll_jitter,
            },
            move || store.refresh(),
        )
    }

    /// Start a thread that uploads buffered metrics every [`ClientConfig::flush_interval`].
    ///
    /// Timed flushes never overlap with [`Client::flush`] calls.
    pub fn start_flush_thread(&self) -> Result<PollerThread> {
        let dispatcher = self.flush_dispatcher.clone();
        PollerThread::start(
            "simpleab-flush",
            PollerThreadConfig {
                interval: self.config.flush_interval,
                jitter: self.config.poll_jitter,
            },
            move || {
                dispatcher.flush();
            },
        )
    }

    /// Upload remaining metrics and drop the client.
    ///
    /// Poller threads should be shut down first, so that no timed flush races with this one.
    pub fn shutdown(self) -> FlushSummary {
        self.flush()
    }
}

/// Check caller input for a metric observation.
///
/// Returns `None` for an observation without treatment, which is ignored.
fn validate_observation(
    treatment: &str,
    stage: &str,
    aggregation_type: Option<&str>,
    metric_name: &str,
    metric_value: f64,
) -> Result<Option<(Treatment, Stage, AggregationType)>> {
    let treatment: Treatment = treatment.parse()?;
    let stage: Stage = stage.parse()?;
    let aggregation_type = parse_aggregation_type(aggregation_type)?;

    if treatment.is_none() {
        return Ok(None);
    }

    aggregation_type.validate_value(metric_name, metric_value)?;
    Ok(Some((treatment, stage, aggregation_type)))
}

fn parse_aggregation_type(value: Option<&str>) -> Result<AggregationType> {
    Ok(value
        .map(str::parse::<AggregationType>)
        .transpose()?
        .unwrap_or_default())
}

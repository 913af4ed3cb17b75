use std::sync::Arc;

/// Represents a result type for operations in the SimpleAB SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the SimpleAB SDK.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The caller passed invalid metric data.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The experiment is unknown to the remote service.
    #[error("experiment {0} not found")]
    ExperimentNotFound(String),

    /// The experiment has no stage with the requested name.
    #[error("stage {stage} not found for experiment {experiment_id}")]
    StageNotFound {
        /// Experiment that was searched.
        experiment_id: String,
        /// Requested stage name.
        stage: String,
    },

    /// The stage has no dimension with the requested name.
    #[error("dimension {dimension} not found for stage {stage}")]
    DimensionNotFound {
        /// Stage that was searched.
        stage: String,
        /// Requested dimension name.
        dimension: String,
    },

    /// The experiment does not define the requested treatment.
    #[error("treatment {treatment} not found in experiment {experiment_id}")]
    TreatmentNotFound {
        /// Experiment that was searched.
        experiment_id: String,
        /// Requested treatment.
        treatment: String,
    },

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// A background thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error or a non-success response from the remote service.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

/// Caller mistakes detected while recording a metric.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ValidationError {
    /// Treatment is not `""`, `"C"` or `"T1"`..`"T255"`.
    #[error("invalid treatment string: {0:?}")]
    InvalidTreatment(String),

    /// Stage is not one of the recognized stage names.
    #[error("invalid stage string: {0:?}")]
    InvalidStage(String),

    /// Aggregation type is not `sum`, `average` or `percentile`.
    #[error("invalid aggregation type: {0:?}")]
    InvalidAggregationType(String),

    /// Sums model counts and durations, so they cannot go down.
    #[error("metric {metric_name} cannot be negative for sum aggregation")]
    NegativeSum {
        /// Name of the offending metric.
        metric_name: String,
    },

    /// NaN and infinities would poison every aggregate they touch.
    #[error("metric {metric_name} must be a finite number")]
    NonFiniteValue {
        /// Name of the offending metric.
        metric_name: String,
    },
}

impl Error {
    /// Return `true` if the error was caused by invalid input from the caller.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

use std::time::Duration;

use crate::{Client, Result};

/// Configuration for [`Client`].
///
/// # Examples
/// ```
/// # use std::time::Duration;
/// # use simpleab::ClientConfig;
/// let config = ClientConfig::from_api_key("api-key")
///     .flush_interval(Duration::from_secs(30))
///     .preload_experiments(["checkout-button"]);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) request_timeout: Duration,
    pub(crate) flush_interval: Duration,
    pub(crate) refresh_interval: Duration,
    pub(crate) poll_jitter: Duration,
    pub(crate) preload_experiments: Vec<String>,
}

impl ClientConfig {
    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.captchify.com";
    /// Default value for [`ClientConfig::request_timeout`].
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default value for [`ClientConfig::flush_interval`].
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
    /// Default value for [`ClientConfig::refresh_interval`].
    pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);
    /// Default value for [`ClientConfig::poll_jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(3);

    /// Create a default configuration using the specified API key.
    ///
    /// ```
    /// # use simpleab::ClientConfig;
    /// ClientConfig::from_api_key("api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            request_timeout: ClientConfig::DEFAULT_REQUEST_TIMEOUT,
            flush_interval: ClientConfig::DEFAULT_FLUSH_INTERVAL,
            refresh_interval: ClientConfig::DEFAULT_REFRESH_INTERVAL,
            poll_jitter: ClientConfig::DEFAULT_POLL_JITTER,
            preload_experiments: Vec::new(),
        }
    }

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Timeout for a single request to the API.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// How often the flush thread uploads buffered metrics.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// How often the refresh thread re-fetches cached experiments.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Maximum random amount subtracted from flush and refresh intervals.
    pub fn poll_jitter(mut self, jitter: Duration) -> Self {
        self.poll_jitter = jitter;
        self
    }

    /// Experiments to fetch when the client is created, saving a remote call on first use.
    pub fn preload_experiments<I, S>(mut self, experiment_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preload_experiments = experiment_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use simpleab::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_api_key("api-key").to_client().unwrap();
    /// ```
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }
}

//! An HTTP client for the SimpleAB API.
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use reqwest::{StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    flush::MetricRecord,
    remote::{ExperimentFetcher, FetchExperimentsResponse, MetricsSender},
    segment::Segment,
    Error, Result,
};

pub struct HttpApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

const EXPERIMENTS_ENDPOINT: &str = "/experiments/batch/list";
const METRICS_ENDPOINT: &str = "/metrics/track/batch";
const SEGMENT_ENDPOINT: &str = "/segment";

const API_KEY_HEADER: &str = "X-API-Key";

/// A blocking client for the SimpleAB API.
pub struct HttpApi {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    /// If we receive a 401 Unauthorized error during a request, it means the API key is not
    /// valid. We cache this error so we don't issue additional requests to the server.
    unauthorized: AtomicBool,
}

#[derive(Serialize)]
struct FetchExperimentsRequest<'a> {
    ids: &'a [String],
}

#[derive(Serialize)]
struct SendMetricsRequest<'a> {
    metrics: &'a [MetricRecord],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SegmentRequest<'a> {
    ip: Option<&'a str>,
    user_agent: Option<&'a str>,
}

impl HttpApi {
    /// # Errors
    ///
    /// - [`Error::InvalidBaseUrl`] if `base_url` cannot be parsed.
    /// - [`Error::Network`] if the HTTP client cannot be initialized.
    pub fn new(config: HttpApiConfig) -> Result<HttpApi> {
        Url::parse(&config.base_url).map_err(Error::InvalidBaseUrl)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(HttpApi {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key,
            unauthorized: AtomicBool::new(false),
        })
    }

    /// Look up the visitor segment for an IP address and user agent.
    pub fn fetch_segment(&self, ip: Option<&str>, user_agent: Option<&str>) -> Result<Segment> {
        self.post(SEGMENT_ENDPOINT, &SegmentRequest { ip, user_agent })
    }

    fn post<Req: Serialize + ?Sized, Resp: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Req,
    ) -> Result<Resp> {
        let response = self.send(endpoint, body)?;
        Ok(response.json()?)
    }

    fn send<Req: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &Req,
    ) -> Result<reqwest::blocking::Response> {
        if self.unauthorized.load(Ordering::Relaxed) {
            return Err(Error::Unauthorized);
        }

        let url = Url::parse(&format!("{}{}", self.base_url, endpoint))
            .map_err(Error::InvalidBaseUrl)?;

        log::debug!(target: "simpleab", endpoint; "sending request");
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()?;

        response.error_for_status().map_err(|err| {
            if err.status() == Some(StatusCode::UNAUTHORIZED) {
                log::warn!(target: "simpleab", "client is not authorized. Check your API key");
                self.unauthorized.store(true, Ordering::Relaxed);
                Error::Unauthorized
            } else {
                log::warn!(target: "simpleab",
                    endpoint;
                    "received non-200 response: {:?}", err.status());
                Error::from(err)
            }
        })
    }
}

impl ExperimentFetcher for HttpApi {
    fn fetch_experiments(&self, ids: &[String]) -> Result<FetchExperimentsResponse> {
        self.post(EXPERIMENTS_ENDPOINT, &FetchExperimentsRequest { ids })
    }
}

impl MetricsSender for HttpApi {
    fn send_metrics(&self, batch: &[MetricRecord]) -> Result<()> {
        // The response body carries nothing we need.
        self.send(METRICS_ENDPOINT, &SendMetricsRequest { metrics: batch })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{FetchExperimentsRequest, HttpApi, HttpApiConfig, SegmentRequest};
    use crate::Error;

    fn config(base_url: &str) -> HttpApiConfig {
        HttpApiConfig {
            base_url: base_url.to_owned(),
            api_key: "api-key".to_owned(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(
            HttpApi::new(config("not a url")),
            Err(Error::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn strips_trailing_slash() {
        let api = HttpApi::new(config("https://api.example.com/")).unwrap();
        assert_eq!(api.base_url, "https://api.example.com");
    }

    #[test]
    fn request_bodies_use_api_field_names() {
        let ids = vec!["a".to_owned(), "b".to_owned()];
        assert_eq!(
            serde_json::to_value(FetchExperimentsRequest { ids: &ids }).unwrap(),
            serde_json::json!({"ids": ["a", "b"]})
        );
        assert_eq!(
            serde_json::to_value(SegmentRequest {
                ip: Some("127.0.0.1"),
                user_agent: None
            })
            .unwrap(),
            serde_json::json!({"ip": "127.0.0.1", "userAgent": null})
        );
    }
}

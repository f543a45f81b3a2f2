use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::error::PmrError;
use crate::hypermedia::PMR_JSON_MEDIA_TYPE;

/// Fetches PMR JSON documents.
///
/// Any transport, status or decoding failure yields `None`; callers treat
/// that as "this branch has no data" and carry on.
pub trait PmrClient: Send + Sync {
    fn fetch_json(&self, url: &str) -> Option<Value>;
}

#[derive(Clone)]
pub struct PmrHttpClient {
    client: Client,
}

impl PmrHttpClient {
    pub fn new() -> Result<Self, PmrError> {
        Self::with_timeout(Duration::from_secs(60))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, PmrError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pmr-utils/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PmrError::Http(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static(PMR_JSON_MEDIA_TYPE));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| PmrError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    fn get_json(&self, url: &str) -> Result<Value, PmrError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| PmrError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(PmrError::Http(format!(
                "{url} returned status {}",
                response.status().as_u16()
            )));
        }
        response
            .json::<Value>()
            .map_err(|err| PmrError::Http(format!("{url} did not return JSON: {err}")))
    }
}

impl PmrClient for PmrHttpClient {
    fn fetch_json(&self, url: &str) -> Option<Value> {
        let start = std::time::Instant::now();
        match self.get_json(url) {
            Ok(value) => {
                tracing::trace!(
                    url = %url,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "fetched PMR document"
                );
                Some(value)
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "requested URL did not return JSON");
                None
            }
        }
    }
}

use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use ureq::Agent;

use super::{RemoteTable, RetryPolicy, TransportError, TransportFailure};
use crate::constants::transport::DEFAULT_MAX_BODY_BYTES;
use crate::query::SoqlQuery;

/// Upper bound on how much of an error body is kept for logs.
const ERROR_BODY_PREVIEW_CHARS: usize = 512;
/// Header carrying an optional Socrata application token.
const APP_TOKEN_HEADER: &str = "X-App-Token";

/// Blocking client for one Socrata resource endpoint, e.g.
/// `https://data.cityofnewyork.us/resource/erm2-nwe9.csv`.
pub struct SocrataClient {
    base_url: String,
    agent: Agent,
    retry: RetryPolicy,
    app_token: Option<String>,
    max_body_bytes: u64,
}

impl SocrataClient {
    /// Create a client for `base_url` with the given retry policy.
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        let agent: Agent = Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            base_url: base_url.into(),
            agent,
            retry,
            app_token: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Send an application token with every request (raises Socrata's throttling limits).
    pub fn with_app_token(mut self, token: impl Into<String>) -> Self {
        self.app_token = Some(token.into());
        self
    }

    /// Cap on the bytes read from one response body.
    pub fn with_max_body_bytes(mut self, limit: u64) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Endpoint this client queries.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Retry policy applied per fetch.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn attempt(&self, query: &SoqlQuery, timeout: Duration) -> Result<String, TransportError> {
        let mut request = self
            .agent
            .get(&self.base_url)
            .config()
            .timeout_global(Some(timeout))
            .build();
        for (name, value) in query.params() {
            request = request.query(name, value);
        }
        if let Some(token) = &self.app_token {
            request = request.header(APP_TOKEN_HEADER, token);
        }

        let response = request
            .call()
            .map_err(|err| TransportError::Request(err.to_string()))?;
        let status = response.status();
        let body = response
            .into_body()
            .with_config()
            .limit(self.max_body_bytes)
            .read_to_string()
            .map_err(|err| match err {
                ureq::Error::BodyExceedsLimit(limit) => TransportError::BodyTooLarge { limit },
                other => TransportError::Body(other.to_string()),
            })?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect(),
            });
        }
        Ok(body)
    }
}

impl RemoteTable for SocrataClient {
    fn fetch_csv(&self, query: &SoqlQuery, timeout: Duration) -> Result<String, TransportFailure> {
        let max_attempts = self.retry.max_attempts();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt(query, timeout) {
                Ok(body) => {
                    debug!(
                        "[strata:http] {} bytes from {} (attempt {})",
                        body.len(),
                        self.base_url,
                        attempts
                    );
                    return Ok(body);
                }
                Err(error) if error.is_retryable() && attempts < max_attempts => {
                    let delay = self.retry.delay_for(attempts - 1);
                    warn!(
                        "[strata:http] attempt {}/{} failed: {}; retrying in {:?}",
                        attempts, max_attempts, error, delay
                    );
                    thread::sleep(delay);
                }
                Err(error @ TransportError::BodyTooLarge { .. }) => {
                    warn!(
                        "[strata:http] {}; lower the page size or raise the body limit",
                        error
                    );
                    return Err(TransportFailure { error, attempts });
                }
                Err(error) => return Err(TransportFailure { error, attempts }),
            }
        }
    }
}

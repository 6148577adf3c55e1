//! Remote table access.
//!
//! `RemoteTable` is the seam between the samplers and the network: the
//! samplers compose a `SoqlQuery`, a transport turns it into one CSV body.
//! Tests substitute scripted tables; production uses `SocrataClient`.

use std::time::Duration;
use thiserror::Error;

use crate::query::SoqlQuery;

/// Blocking HTTP transport for Socrata-style endpoints.
pub mod http;

pub use http::SocrataClient;

/// Why a single attempt failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection, DNS, TLS or timeout failure before a status was received.
    #[error("request failed: {0}")]
    Request(String),
    /// Non-success HTTP status.
    #[error("remote returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Truncated response body, useful for Socrata error messages.
        body: String,
    },
    /// The response body could not be read.
    #[error("failed reading response body: {0}")]
    Body(String),
    /// The response body exceeded the client's read limit.
    #[error("response body larger than {limit} bytes")]
    BodyTooLarge {
        /// Limit in bytes that was exceeded.
        limit: u64,
    },
}

impl TransportError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Request(_) | TransportError::Body(_) => true,
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::BodyTooLarge { .. } => false,
        }
    }
}

/// Final failure of a fetch after retries.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{error}")]
pub struct TransportFailure {
    /// Error from the last attempt.
    pub error: TransportError,
    /// Attempts made, including the first.
    pub attempts: u32,
}

/// Source of CSV pages for SoQL queries.
pub trait RemoteTable {
    /// Execute `query` and return the raw CSV body.
    ///
    /// `timeout` bounds each individual attempt.
    fn fetch_csv(&self, query: &SoqlQuery, timeout: Duration) -> Result<String, TransportFailure>;
}

impl<T: RemoteTable + ?Sized> RemoteTable for &T {
    fn fetch_csv(&self, query: &SoqlQuery, timeout: Duration) -> Result<String, TransportFailure> {
        (**self).fetch_csv(query, timeout)
    }
}

/// Bounded exponential backoff applied per fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first; `0` means a single attempt.
    pub max_retries: u32,
    /// Wait before the first retry; doubles on each following retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Wait before retry number `retry` (0-based): `base_delay * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1_u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

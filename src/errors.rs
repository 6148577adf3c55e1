use std::io;

use thiserror::Error;

use crate::types::StratumValue;

/// Error type for invalid inputs, configuration, and fatal acquisition failures.
#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid range: end '{end}' must be after start '{start}'")]
    InvalidRange { start: String, end: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("stratum counts unavailable: {0}")]
    CountUnavailable(#[source] AcquisitionFailure),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A single remote call that did not produce rows.
///
/// Raised for transport errors, timeouts, non-success statuses and unreadable
/// bodies. Executors record it and move on; it never aborts a run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("acquisition failed for '{stratum}' in {window} after {attempts} attempt(s): {reason}")]
pub struct AcquisitionFailure {
    /// Stratum value the request was scoped to.
    pub stratum: StratumValue,
    /// Rendered window bounds, e.g. `[2024-01-01T00:00:00, 2024-01-02T00:00:00)`.
    pub window: String,
    /// Human-readable failure cause.
    pub reason: String,
    /// Number of HTTP attempts made before giving up (0 when rejected locally).
    pub attempts: u32,
}

impl AcquisitionFailure {
    pub(crate) fn new(
        stratum: impl Into<StratumValue>,
        window: impl Into<String>,
        reason: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            stratum: stratum.into(),
            window: window.into(),
            reason: reason.into(),
            attempts,
        }
    }
}

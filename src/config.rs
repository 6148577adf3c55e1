use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::config::{
    DEFAULT_ENV_FILE, DEFAULT_GROUP_BY_VALUES, ENV_BASE_DELAY, ENV_BASE_URL, ENV_DAYS_IN_MONTH, ENV_DEFAULT_SINCE,
    ENV_DEFAULT_UNTIL, ENV_GROUP_BY, ENV_GROUP_BY_VALUE, ENV_MAX_RETRIES, ENV_SLEEP_FOR_SECONDS,
    ENV_TARGET_SAMPLE, ENV_TIMEOUT, MAX_DAYS_IN_MONTH,
};
use crate::constants::sampler::{
    DAY_MAX_OFFSET, DEFAULT_OVERFETCH_MULTIPLIER, DEFAULT_PER_DAY_MULTIPLIER, MAX_TARGET_SAMPLE,
    WINDOW_MAX_OFFSET,
};
use crate::data::FetchWindow;
use crate::errors::SamplingError;
use crate::query::DatasetLayout;
use crate::transport::RetryPolicy;
use crate::types::{ColumnName, StratumValue};

/// Connection and sampling settings for one dataset, normally read from the environment.
///
/// Values may carry inline comments (`TARGET_SAMPLE=5000 # per run`); everything
/// after the first `#` is dropped and the rest is trimmed. Empty values count as
/// unset.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingSettings {
    /// CSV resource endpoint.
    pub base_url: String,
    /// First calendar year of the default window.
    pub default_since: i32,
    /// Last calendar year of the default window (inclusive).
    pub default_until: i32,
    /// Overall sample budget distributed across strata.
    pub target_sample: i64,
    /// Extra attempts per request after the first.
    pub max_retries: u32,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Backoff before the first retry; doubles on each retry.
    pub base_delay: Duration,
    /// Stratification column.
    pub group_by: ColumnName,
    /// Strata kept from the count query, in preferred order.
    pub group_by_values: Vec<StratumValue>,
    /// Days drawn per calendar month on the day-stratified path.
    pub days_in_month: usize,
    /// Pause after every remote call.
    pub sleep_for: Duration,
}

impl SamplingSettings {
    /// Load from `./.env` (when present) layered over the process environment.
    pub fn from_env() -> Result<Self, SamplingError> {
        Self::from_lookup(env_lookup(Path::new(DEFAULT_ENV_FILE))?)
    }

    /// Load through `lookup`, which returns the raw value for a key.
    ///
    /// `BASE_URL`, `DEFAULT_SINCE`, `DEFAULT_UNTIL`, `TARGET_SAMPLE` and
    /// `GROUP_BY` are required; the rest fall back to conservative defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SamplingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(|raw| clean_value(&raw));
        let required = |key: &str| {
            get(key).ok_or_else(|| SamplingError::Configuration(format!("{key} is not set")))
        };

        let settings = Self {
            base_url: required(ENV_BASE_URL)?,
            default_since: parse_value(ENV_DEFAULT_SINCE, &required(ENV_DEFAULT_SINCE)?)?,
            default_until: parse_value(ENV_DEFAULT_UNTIL, &required(ENV_DEFAULT_UNTIL)?)?,
            target_sample: parse_value(ENV_TARGET_SAMPLE, &required(ENV_TARGET_SAMPLE)?)?,
            max_retries: get(ENV_MAX_RETRIES)
                .map(|raw| parse_value(ENV_MAX_RETRIES, &raw))
                .transpose()?
                .unwrap_or(RetryPolicy::default().max_retries),
            timeout: get(ENV_TIMEOUT)
                .map(|raw| parse_seconds(ENV_TIMEOUT, &raw))
                .transpose()?
                .unwrap_or(Duration::from_secs(30)),
            base_delay: get(ENV_BASE_DELAY)
                .map(|raw| parse_seconds(ENV_BASE_DELAY, &raw))
                .transpose()?
                .unwrap_or(RetryPolicy::default().base_delay),
            group_by: required(ENV_GROUP_BY)?,
            group_by_values: get(ENV_GROUP_BY_VALUE)
                .map(|raw| split_list(&raw))
                .unwrap_or_else(|| {
                    DEFAULT_GROUP_BY_VALUES
                        .iter()
                        .map(|value| value.to_string())
                        .collect()
                }),
            days_in_month: get(ENV_DAYS_IN_MONTH)
                .map(|raw| parse_value(ENV_DAYS_IN_MONTH, &raw))
                .transpose()?
                .unwrap_or(5),
            sleep_for: get(ENV_SLEEP_FOR_SECONDS)
                .map(|raw| parse_seconds(ENV_SLEEP_FOR_SECONDS, &raw))
                .transpose()?
                .unwrap_or(Duration::from_secs(1)),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that cannot drive a run.
    pub fn validate(&self) -> Result<(), SamplingError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(SamplingError::Configuration(format!(
                "{ENV_BASE_URL} must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if self.default_since > self.default_until {
            return Err(SamplingError::Configuration(format!(
                "{ENV_DEFAULT_SINCE} ({}) must not be after {ENV_DEFAULT_UNTIL} ({})",
                self.default_since, self.default_until
            )));
        }
        if self.target_sample <= 0 || self.target_sample > MAX_TARGET_SAMPLE {
            return Err(SamplingError::Configuration(format!(
                "{ENV_TARGET_SAMPLE} must be in 1..={MAX_TARGET_SAMPLE}, got {}",
                self.target_sample
            )));
        }
        if self.timeout.is_zero() {
            return Err(SamplingError::Configuration(format!(
                "{ENV_TIMEOUT} must be positive"
            )));
        }
        if self.days_in_month == 0 || self.days_in_month > MAX_DAYS_IN_MONTH {
            return Err(SamplingError::Configuration(format!(
                "{ENV_DAYS_IN_MONTH} must be between 1 and {MAX_DAYS_IN_MONTH}, got {}",
                self.days_in_month
            )));
        }
        if !is_identifier(&self.group_by) {
            return Err(SamplingError::Configuration(format!(
                "{ENV_GROUP_BY} must be a plain column name, got '{}'",
                self.group_by
            )));
        }
        Ok(())
    }

    /// Retry schedule for the HTTP client.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
        }
    }

    /// Query layout for the configured stratification column.
    pub fn layout(&self) -> DatasetLayout {
        DatasetLayout::new(self.group_by.clone())
    }

    /// Default window: whole years `default_since..=default_until`.
    pub fn default_window(&self) -> Result<FetchWindow, SamplingError> {
        FetchWindow::from_years(self.default_since, self.default_until)
    }
}

/// Runtime knobs that are not part of the environment contract.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplerOptions {
    /// Page size factor on the window path (`limit = n * multiplier`).
    pub overfetch_multiplier: usize,
    /// Over-request factor on the day path.
    pub per_day_multiplier: f64,
    /// Inclusive random offset bound for whole-window pages.
    pub window_max_offset: u64,
    /// Inclusive random offset bound for single-day pages.
    pub day_max_offset: u64,
    /// Optional wall-clock budget for a whole run.
    pub run_budget: Option<Duration>,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            overfetch_multiplier: DEFAULT_OVERFETCH_MULTIPLIER,
            per_day_multiplier: DEFAULT_PER_DAY_MULTIPLIER,
            window_max_offset: WINDOW_MAX_OFFSET,
            day_max_offset: DAY_MAX_OFFSET,
            run_budget: None,
        }
    }
}

/// Key lookup over an optional dotenv file and the process environment.
///
/// Keys present in `env_file` take precedence. A missing file is not an
/// error; an unreadable or malformed one is.
pub fn env_lookup(env_file: &Path) -> Result<impl Fn(&str) -> Option<String> + use<>, SamplingError> {
    let file_values = read_env_file(env_file)?;
    Ok(move |key: &str| {
        file_values
            .get(key)
            .cloned()
            .or_else(|| env::var(key).ok())
    })
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, SamplingError> {
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let unreadable = |err: dotenvy::Error| {
        SamplingError::Configuration(format!("cannot load {}: {err}", path.display()))
    };
    dotenvy::from_path_iter(path)
        .map_err(unreadable)?
        .map(|item| item.map_err(unreadable))
        .collect()
}

fn clean_value(raw: &str) -> Option<String> {
    let value = raw.split('#').next().unwrap_or_default().trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, SamplingError> {
    raw.parse::<T>().map_err(|_| {
        SamplingError::Configuration(format!("{key} has an invalid value '{raw}'"))
    })
}

fn parse_seconds(key: &str, raw: &str) -> Result<Duration, SamplingError> {
    let seconds: f64 = parse_value(key, raw)?;
    Duration::try_from_secs_f64(seconds).map_err(|_| {
        SamplingError::Configuration(format!(
            "{key} must be a non-negative number of seconds, got '{raw}'"
        ))
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

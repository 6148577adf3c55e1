/// Constants used by remote query composition.
pub mod query {
    /// Column used to bound fetch windows and order pages.
    pub const DEFAULT_ORDER_COLUMN: &str = "created_date";
    /// Alias of the aggregate column produced by count queries.
    pub const COUNT_TOTAL_COLUMN: &str = "total";
    /// Timestamp rendering used inside `$where` literals (SoQL floating timestamp).
    pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
    /// Select list parameter.
    pub const PARAM_SELECT: &str = "$select";
    /// Filter predicate parameter.
    pub const PARAM_WHERE: &str = "$where";
    /// Page size parameter.
    pub const PARAM_LIMIT: &str = "$limit";
    /// Page start parameter.
    pub const PARAM_OFFSET: &str = "$offset";
    /// Sort parameter.
    pub const PARAM_ORDER: &str = "$order";
    /// Aggregation key parameter.
    pub const PARAM_GROUP: &str = "$group";
}

/// Constants used by the window and day samplers.
pub mod sampler {
    /// Upper bound (inclusive) for the random page offset of a stratum window fetch.
    pub const WINDOW_MAX_OFFSET: u64 = 10_000;
    /// Upper bound (inclusive) for the random page offset of a single-day fetch.
    pub const DAY_MAX_OFFSET: u64 = 1_000;
    /// Page size multiplier used when a caller does not override it.
    pub const DEFAULT_OVERFETCH_MULTIPLIER: usize = 2;
    /// Per-day over-request factor anticipating downstream filtering.
    pub const DEFAULT_PER_DAY_MULTIPLIER: f64 = 1.4;
    /// Largest accepted sample target; shares stay exact in `f64` up to 2^53.
    pub const MAX_TARGET_SAMPLE: i64 = 1 << 53;
}

/// Constants used by environment configuration.
pub mod config {
    /// Optional dotenv file read from the working directory; its values win over the process environment.
    pub const DEFAULT_ENV_FILE: &str = ".env";
    /// Remote endpoint, e.g. `https://data.cityofnewyork.us/resource/erm2-nwe9.csv`.
    pub const ENV_BASE_URL: &str = "BASE_URL";
    /// First calendar year included in the default window.
    pub const ENV_DEFAULT_SINCE: &str = "DEFAULT_SINCE";
    /// Last calendar year included in the default window.
    pub const ENV_DEFAULT_UNTIL: &str = "DEFAULT_UNTIL";
    /// Overall sample budget.
    pub const ENV_TARGET_SAMPLE: &str = "TARGET_SAMPLE";
    /// Extra attempts per request after the first.
    pub const ENV_MAX_RETRIES: &str = "MAX_RETRIES";
    /// Per-request timeout in seconds.
    pub const ENV_TIMEOUT: &str = "TIMEOUT";
    /// Base backoff delay in seconds.
    pub const ENV_BASE_DELAY: &str = "BASE_DELAY";
    /// Stratification column.
    pub const ENV_GROUP_BY: &str = "GROUP_BY";
    /// Comma-separated stratum values to keep.
    pub const ENV_GROUP_BY_VALUE: &str = "GROUP_BY_VALUE";
    /// Days drawn per calendar month on the day-stratified path.
    pub const ENV_DAYS_IN_MONTH: &str = "DAYS_IN_MONTH";
    /// Pause between remote calls in seconds.
    pub const ENV_SLEEP_FOR_SECONDS: &str = "SLEEP_FOR_SECONDS";

    /// Strata used when `GROUP_BY_VALUE` is unset.
    pub const DEFAULT_GROUP_BY_VALUES: [&str; 6] = [
        "BRONX",
        "BROOKLYN",
        "MANHATTAN",
        "QUEENS",
        "STATEN ISLAND",
        "Unspecified",
    ];
    /// Columns requested by sample fetches when no override is given.
    pub const DEFAULT_SELECT_COLUMNS: [&str; 10] = [
        "unique_key",
        "created_date",
        "closed_date",
        "agency",
        "complaint_type",
        "descriptor",
        "incident_zip",
        "borough",
        "latitude",
        "longitude",
    ];
    /// Largest accepted `DAYS_IN_MONTH`.
    pub const MAX_DAYS_IN_MONTH: usize = 31;
}

/// Constants used by the HTTP transport.
pub mod transport {
    /// Largest response body read into memory (ureq's own default is 10 MiB).
    pub const DEFAULT_MAX_BODY_BYTES: u64 = 512 * 1024 * 1024;
}

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// End-to-end count, allocate and collect runs.
pub mod acquisition;
/// Proportional allocation of a sample budget across strata.
pub mod allocation;
/// Command-line runners shared by the demo binaries.
pub mod app;
/// Random calendar-day selection for day-stratified sampling.
pub mod calendar;
/// Environment-driven settings and runtime options.
pub mod config;
/// Centralized constants for queries, samplers, and configuration keys.
pub mod constants;
/// CSV parsing of response bodies and CSV export of samples.
pub mod csv_rows;
/// Counts, plans, windows, rows and assembled samples.
pub mod data;
/// Per-day sampling of one stratum.
pub mod day_sampler;
/// Plan execution over a whole window.
pub mod executor;
/// Stratum skew and proportionality metrics.
pub mod metrics;
/// Request pacing and run deadlines.
pub mod pacing;
/// SoQL query composition.
pub mod query;
/// Collection outcomes, warnings and reports.
pub mod report;
/// Seedable deterministic random generator.
pub mod rng;
/// Remote table access (HTTP today).
pub mod transport;
/// Shared type aliases.
pub mod types;
/// Randomized page fetches with local subsampling.
pub mod window;

mod errors;

pub use acquisition::{Acquisition, AcquisitionRun};
pub use allocation::{allocate, split_evenly};
pub use calendar::{choose_days, per_day_target};
pub use config::{SamplerOptions, SamplingSettings};
pub use data::{
    AllocationEntry, AllocationPlan, AssembledSample, DayPlan, FetchWindow, RawSampleBatch, Row,
    StratumCount,
};
pub use day_sampler::DayStratifiedExecutor;
pub use errors::{AcquisitionFailure, SamplingError};
pub use executor::PlanExecutor;
pub use pacing::{Deadline, Pacer, ThreadSleepPacer};
pub use query::{DatasetLayout, SoqlQuery, SortDirection};
pub use report::{CollectionReport, FetchOutcome, FetchScope, OutcomeStatus, PartialCollectionWarning};
pub use rng::DeterministicRng;
pub use transport::{RemoteTable, RetryPolicy, SocrataClient, TransportError, TransportFailure};
pub use types::{ColumnName, FieldValue, LogMessage, ParamName, StratumValue};
pub use window::WindowSampler;

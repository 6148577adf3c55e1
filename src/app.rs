use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, error::ErrorKind};
use serde::Serialize;
use tracing::info;

use crate::acquisition::Acquisition;
use crate::allocation::allocate;
use crate::config::{SamplerOptions, SamplingSettings, env_lookup};
use crate::constants::config::DEFAULT_ENV_FILE;
use crate::csv_rows::write_sample;
use crate::data::{AllocationPlan, FetchWindow, StratumCount};
use crate::metrics::StratumSkew;
use crate::pacing::ThreadSleepPacer;
use crate::report::{CollectionReport, PartialCollectionWarning};
use crate::rng::DeterministicRng;
use crate::transport::SocrataClient;

/// Which collection strategy a run uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleMode {
    /// One randomized page per stratum over the whole window.
    Proportional,
    /// A few random days per stratum and calendar month.
    Days,
}

impl SampleMode {
    fn program_name(self) -> &'static str {
        match self {
            SampleMode::Proportional => "proportional_sample",
            SampleMode::Days => "day_sample",
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    disable_help_subcommand = true,
    about = "Draw a stratified sample from a Socrata CSV endpoint",
    long_about = "Count rows per stratum, allocate the target sample proportionally, collect it with randomized paged queries, and write the rows as CSV.",
    after_help = "Connection and sampling settings come from the environment (BASE_URL, DEFAULT_SINCE, DEFAULT_UNTIL, TARGET_SAMPLE, GROUP_BY, ...). Flags override them for one run."
)]
struct SampleCli {
    #[arg(long, help = "Seed for every random choice; printed when omitted")]
    seed: Option<u64>,
    #[arg(long, value_name = "YEAR", help = "Override DEFAULT_SINCE")]
    since: Option<i32>,
    #[arg(long, value_name = "YEAR", help = "Override DEFAULT_UNTIL")]
    until: Option<i32>,
    #[arg(
        long,
        value_parser = parse_positive_i64,
        help = "Override TARGET_SAMPLE"
    )]
    target: Option<i64>,
    #[arg(long = "days-in-month", help = "Override DAYS_IN_MONTH (day sampling only)")]
    days_in_month: Option<usize>,
    #[arg(
        long,
        value_name = "PATH",
        default_value = "sample.csv",
        help = "Where the sampled rows are written as CSV"
    )]
    output: PathBuf,
    #[arg(
        long,
        value_name = "PATH",
        help = "Optional path for the JSON collection report"
    )]
    report: Option<PathBuf>,
    #[arg(
        long = "budget-secs",
        value_name = "SECONDS",
        help = "Stop issuing new requests after this many seconds"
    )]
    budget_secs: Option<u64>,
    #[arg(long = "app-token", help = "Socrata application token")]
    app_token: Option<String>,
}

#[derive(Debug, Parser)]
#[command(
    name = "plan_preview",
    disable_help_subcommand = true,
    about = "Show stratum counts and the allocation plan without sampling",
    after_help = "Issues only the count query; settings come from the environment."
)]
struct PlanPreviewCli {
    #[arg(long, value_name = "YEAR", help = "Override DEFAULT_SINCE")]
    since: Option<i32>,
    #[arg(long, value_name = "YEAR", help = "Override DEFAULT_UNTIL")]
    until: Option<i32>,
    #[arg(
        long,
        value_parser = parse_positive_i64,
        help = "Override TARGET_SAMPLE"
    )]
    target: Option<i64>,
}

/// Machine-readable account of one sampling run.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    /// Strategy used.
    pub mode: SampleMode,
    /// Seed that reproduces the run's random choices.
    pub seed: u64,
    /// Sampled window.
    pub window: FetchWindow,
    /// Population per stratum.
    pub counts: Vec<StratumCount>,
    /// Allocation that was executed.
    pub plan: AllocationPlan,
    /// Rows written to the CSV output.
    pub rows_written: usize,
    /// Planned versus collected accounting.
    pub report: CollectionReport,
    /// Warnings derived from the report.
    pub warnings: Vec<PartialCollectionWarning>,
    /// Realized stratum shares against population shares.
    pub skew: Option<StratumSkew>,
}

/// Proportional sampling runner reading settings from the process environment and `./.env`.
pub fn run_proportional_sample<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let lookup = env_lookup(Path::new(DEFAULT_ENV_FILE))?;
    run_sample_with(SampleMode::Proportional, args_iter, lookup).map(|_| ())
}

/// Day-stratified sampling runner reading settings from the process environment and `./.env`.
pub fn run_day_sample<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let lookup = env_lookup(Path::new(DEFAULT_ENV_FILE))?;
    run_sample_with(SampleMode::Days, args_iter, lookup).map(|_| ())
}

/// Run a sampling CLI with settings resolved through `lookup`.
///
/// Returns `None` when help or version output was requested.
pub fn run_sample_with<I, L>(
    mode: SampleMode,
    args_iter: I,
    lookup: L,
) -> Result<Option<RunSummary>, Box<dyn Error>>
where
    I: Iterator<Item = String>,
    L: Fn(&str) -> Option<String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let Some(cli) = parse_cli::<SampleCli, _>(
        std::iter::once(mode.program_name().to_string()).chain(args_iter),
    )?
    else {
        return Ok(None);
    };

    let mut settings = SamplingSettings::from_lookup(lookup)?;
    settings.default_since = cli.since.unwrap_or(settings.default_since);
    settings.default_until = cli.until.unwrap_or(settings.default_until);
    settings.target_sample = cli.target.unwrap_or(settings.target_sample);
    settings.days_in_month = cli.days_in_month.unwrap_or(settings.days_in_month);
    settings.validate()?;

    let options = SamplerOptions {
        run_budget: cli.budget_secs.map(Duration::from_secs),
        ..SamplerOptions::default()
    };
    let mut client = SocrataClient::new(settings.base_url.clone(), settings.retry_policy());
    if let Some(token) = cli.app_token {
        client = client.with_app_token(token);
    }
    let window = settings.default_window()?;
    let seed = cli.seed.unwrap_or_else(rand::random);
    info!("[strata:app] seed {} (pass --seed {} to replay)", seed, seed);
    let mut rng = DeterministicRng::new(seed);

    let acquisition = Acquisition::new(&client, &settings, ThreadSleepPacer).with_options(options);
    let run = match mode {
        SampleMode::Proportional => acquisition.collect_proportional(&window, &mut rng)?,
        SampleMode::Days => acquisition.collect_by_days(&window, &mut rng)?,
    };

    let mut out = BufWriter::new(File::create(&cli.output)?);
    write_sample(&run.sample, &mut out)?;
    out.flush()?;

    let summary = RunSummary {
        mode,
        seed,
        window,
        skew: run.skew(&settings.group_by),
        warnings: run.sample.report.warnings(),
        counts: run.counts,
        plan: run.plan,
        rows_written: run.sample.rows.len(),
        report: run.sample.report,
    };
    if let Some(path) = &cli.report {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &summary)?;
        writer.flush()?;
    }

    print_summary(&summary, &settings.group_by, &cli.output);
    Ok(Some(summary))
}

/// Count-only preview of the allocation plan, reading settings from the environment.
pub fn run_plan_preview<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let lookup = env_lookup(Path::new(DEFAULT_ENV_FILE))?;
    run_plan_preview_with(args_iter, lookup).map(|_| ())
}

/// Count-only preview with settings resolved through `lookup`.
pub fn run_plan_preview_with<I, L>(
    args_iter: I,
    lookup: L,
) -> Result<Option<AllocationPlan>, Box<dyn Error>>
where
    I: Iterator<Item = String>,
    L: Fn(&str) -> Option<String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let Some(cli) = parse_cli::<PlanPreviewCli, _>(
        std::iter::once("plan_preview".to_string()).chain(args_iter),
    )?
    else {
        return Ok(None);
    };

    let mut settings = SamplingSettings::from_lookup(lookup)?;
    settings.default_since = cli.since.unwrap_or(settings.default_since);
    settings.default_until = cli.until.unwrap_or(settings.default_until);
    settings.target_sample = cli.target.unwrap_or(settings.target_sample);
    settings.validate()?;

    let client = SocrataClient::new(settings.base_url.clone(), settings.retry_policy());
    let window = settings.default_window()?;
    let acquisition = Acquisition::new(&client, &settings, ThreadSleepPacer);
    let counts = acquisition.fetch_stratum_counts(&window)?;
    let plan = allocate(&counts, settings.target_sample)?;

    let grand_total: u64 = counts.iter().map(|count| count.total).sum();
    println!("=== allocation plan for {} ===", window);
    println!(
        "{} rows across {} strata in {}; target {}",
        grand_total,
        counts.len(),
        settings.group_by,
        settings.target_sample
    );
    for (count, entry) in counts.iter().zip(&plan.entries) {
        let share = count.total as f64 / grand_total as f64;
        println!(
            "  {:<20} population {:>12}  share {:>6.2}%  planned {:>8}",
            entry.stratum_value,
            count.total,
            share * 100.0,
            entry.sample_size
        );
    }
    Ok(Some(plan))
}

fn print_summary(summary: &RunSummary, group_by: &str, output: &std::path::Path) {
    println!("=== {:?} sample for {} ===", summary.mode, summary.window);
    println!(
        "wrote {} rows to {} (planned {}, collected {}, {} duplicates dropped)",
        summary.rows_written,
        output.display(),
        summary.report.planned_rows,
        summary.report.collected_rows,
        summary.report.duplicates_removed
    );
    if let Some(skew) = &summary.skew {
        println!("rows per {}:", group_by);
        for entry in &skew.per_stratum {
            let population = entry
                .population_share
                .map(|share| format!("{:.2}%", share * 100.0))
                .unwrap_or_else(|| "n/a".to_string());
            println!(
                "  {:<20} {:>8}  share {:>6.2}%  population {}",
                entry.stratum,
                entry.count,
                entry.share * 100.0,
                population
            );
        }
    }
    if !summary.warnings.is_empty() {
        println!("{} warnings:", summary.warnings.len());
        for warning in &summary.warnings {
            println!("  - {}", warning);
        }
    }
    println!("seed: {}", summary.seed);
}

fn parse_positive_i64(raw: &str) -> Result<i64, String> {
    let parsed = raw
        .parse::<i64>()
        .map_err(|_| format!("Could not parse '{}' as a positive integer", raw))?;
    if parsed <= 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(parsed)
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}

//! End-to-end acquisition runs.
//!
//! Both runs start from the per-stratum count query. The proportional run hands
//! the allocation to `PlanExecutor`; the day run spreads every stratum's share
//! over the window's calendar months and samples a few days in each.

use rand::Rng;
use tracing::{info, warn};

use crate::allocation::{allocate, split_evenly};
use crate::calendar::{choose_days, per_day_target};
use crate::config::{SamplerOptions, SamplingSettings};
use crate::csv_rows::parse_counts;
use crate::data::{AllocationPlan, AssembledSample, FetchWindow, StratumCount};
use crate::day_sampler::DayStratifiedExecutor;
use crate::errors::{AcquisitionFailure, SamplingError};
use crate::executor::PlanExecutor;
use crate::metrics::{StratumSkew, stratum_skew};
use crate::pacing::{Deadline, Pacer};
use crate::query::DatasetLayout;
use crate::report::{CollectionReport, FetchOutcome, FetchScope, OutcomeStatus};
use crate::transport::RemoteTable;
use crate::window::WindowSampler;

/// Everything one run produced: the population it saw, the plan it followed,
/// and the rows it collected.
#[derive(Clone, Debug)]
pub struct AcquisitionRun {
    /// Per-stratum population counts inside the run window.
    pub counts: Vec<StratumCount>,
    /// Allocation derived from `counts`.
    pub plan: AllocationPlan,
    /// Collected rows plus the collection report.
    pub sample: AssembledSample,
}

impl AcquisitionRun {
    /// Realized stratum shares set against population shares.
    pub fn skew(&self, group_by: &str) -> Option<StratumSkew> {
        stratum_skew(&self.sample.counts_by(group_by)).map(|skew| skew.with_population(&self.counts))
    }
}

/// Drives count, allocation and collection against one remote table.
pub struct Acquisition<'a, T: RemoteTable + ?Sized, P: Pacer> {
    table: &'a T,
    settings: &'a SamplingSettings,
    options: SamplerOptions,
    layout: DatasetLayout,
    pacer: P,
}

impl<'a, T: RemoteTable + ?Sized, P: Pacer> Acquisition<'a, T, P> {
    /// Acquisition with default runtime options.
    pub fn new(table: &'a T, settings: &'a SamplingSettings, pacer: P) -> Self {
        Self {
            table,
            settings,
            options: SamplerOptions::default(),
            layout: settings.layout(),
            pacer,
        }
    }

    /// Override runtime options.
    pub fn with_options(mut self, options: SamplerOptions) -> Self {
        self.options = options;
        self
    }

    /// Override the query layout (select list, ordering column).
    pub fn with_layout(mut self, layout: DatasetLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Layout queries are built from.
    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    /// Population per stratum inside `window`, restricted to the configured strata.
    ///
    /// Unlike a sample fetch, a failed count is fatal: nothing can be allocated
    /// without it.
    pub fn fetch_stratum_counts(
        &self,
        window: &FetchWindow,
    ) -> Result<Vec<StratumCount>, SamplingError> {
        let query = self.layout.count_query(window);
        info!(
            "[strata:acquire] counting rows per {} in {}",
            self.layout.group_by, window
        );
        let counted = self.table.fetch_csv(&query, self.settings.timeout);
        self.pacer.pause(self.settings.sleep_for);
        let body = counted.map_err(|failure| {
            SamplingError::CountUnavailable(AcquisitionFailure::new(
                self.layout.group_by.as_str(),
                window.to_string(),
                failure.error.to_string(),
                failure.attempts,
            ))
        })?;
        let counts = parse_counts(body.as_bytes(), &self.layout.group_by)?;

        let wanted = &self.settings.group_by_values;
        if wanted.is_empty() {
            return Ok(counts);
        }
        for value in wanted {
            if !counts.iter().any(|count| &count.stratum_value == value) {
                warn!(
                    "[strata:acquire] configured stratum '{}' has no rows in {}",
                    value, window
                );
            }
        }
        Ok(counts
            .into_iter()
            .filter(|count| wanted.contains(&count.stratum_value))
            .collect())
    }

    /// Count, allocate `TARGET_SAMPLE` proportionally, then sample every stratum
    /// over the whole window.
    pub fn collect_proportional<R: Rng + ?Sized>(
        &self,
        window: &FetchWindow,
        rng: &mut R,
    ) -> Result<AcquisitionRun, SamplingError> {
        let counts = self.fetch_stratum_counts(window)?;
        let plan = allocate(&counts, self.settings.target_sample)?;
        info!(
            "[strata:acquire] plan for {} strata: {:?}",
            plan.len(),
            plan.sizes()
        );

        let sampler = WindowSampler::new(self.table, &self.layout, self.settings.timeout)
            .with_max_offset(self.options.window_max_offset);
        let executor = PlanExecutor::new(sampler, &self.pacer)
            .with_overfetch_multiplier(self.options.overfetch_multiplier)
            .with_deadline(self.deadline());
        let sample = executor.execute(&plan, window, self.settings.sleep_for, rng);
        info!(
            "[strata:acquire] collected {} of {} planned rows",
            sample.len(),
            plan.total()
        );

        Ok(AcquisitionRun {
            counts,
            plan,
            sample,
        })
    }

    /// Count and allocate as in [`Self::collect_proportional`], then spread
    /// every stratum's size evenly over the window's calendar months and fetch
    /// `DAYS_IN_MONTH` random days per month.
    pub fn collect_by_days<R: Rng + ?Sized>(
        &self,
        window: &FetchWindow,
        rng: &mut R,
    ) -> Result<AcquisitionRun, SamplingError> {
        let counts = self.fetch_stratum_counts(window)?;
        let plan = allocate(&counts, self.settings.target_sample)?;
        let months = window.months();
        let deadline = self.deadline();
        let executor = DayStratifiedExecutor::new(self.table, &self.layout, &self.pacer)
            .with_max_offset(self.options.day_max_offset)
            .with_deadline(deadline);

        let mut sample = AssembledSample::default();
        for entry in &plan.entries {
            if entry.sample_size <= 0 {
                warn!(
                    "[strata:acquire] skipping '{}': planned size {}",
                    entry.stratum_value, entry.sample_size
                );
                let mut report = CollectionReport::default();
                report.record(FetchOutcome {
                    stratum: entry.stratum_value.clone(),
                    scope: FetchScope::Window {
                        window: window.to_string(),
                    },
                    planned: 0,
                    collected: 0,
                    status: OutcomeStatus::Skipped {
                        reason: format!("non-positive planned size {}", entry.sample_size),
                    },
                });
                sample.report.merge(report);
                continue;
            }

            let shares = split_evenly(entry.sample_size, months.len())?;
            for (month, share) in months.iter().zip(shares) {
                if share <= 0 {
                    continue;
                }
                let days = choose_days(
                    month.first_day(),
                    month.end_day(),
                    self.settings.days_in_month,
                    rng,
                )?;
                let per_day = per_day_target(
                    share as usize,
                    self.options.per_day_multiplier,
                    days.len(),
                )?;
                info!(
                    "[strata:acquire] '{}' {}: {} days x {} rows",
                    entry.stratum_value,
                    month,
                    days.len(),
                    per_day
                );
                let month_sample = executor.execute(
                    &entry.stratum_value,
                    &days,
                    per_day,
                    self.settings.timeout,
                    self.settings.sleep_for,
                    rng,
                );
                sample.append(month_sample);
            }
        }

        info!(
            "[strata:acquire] collected {} rows over {} strata and {} months ({} duplicates dropped)",
            sample.len(),
            plan.len(),
            months.len(),
            sample.report.duplicates_removed
        );
        Ok(AcquisitionRun {
            counts,
            plan,
            sample,
        })
    }

    fn deadline(&self) -> Deadline {
        self.options
            .run_budget
            .map(Deadline::after)
            .unwrap_or_default()
    }
}

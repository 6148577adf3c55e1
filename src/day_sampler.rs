use rand::Rng;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::constants::sampler::DAY_MAX_OFFSET;
use crate::data::{AssembledSample, DayPlan, FetchWindow, RawSampleBatch};
use crate::pacing::{Deadline, Pacer};
use crate::query::DatasetLayout;
use crate::report::{CollectionReport, FetchOutcome, FetchScope, OutcomeStatus};
use crate::transport::RemoteTable;
use crate::window::WindowSampler;

/// One bounded fetch per selected calendar day for a single stratum.
///
/// Each day is its own `[day, day + 1)` window, so the random page offset only
/// has to cover one day's worth of rows. Overlapping pages can return the same
/// record twice; exact duplicates are dropped once all days are in.
pub struct DayStratifiedExecutor<'a, T: RemoteTable + ?Sized, P: Pacer> {
    table: &'a T,
    layout: &'a DatasetLayout,
    pacer: P,
    max_offset: u64,
    deadline: Deadline,
}

impl<'a, T: RemoteTable + ?Sized, P: Pacer> DayStratifiedExecutor<'a, T, P> {
    /// Executor over `table`, pausing through `pacer` after every day.
    pub fn new(table: &'a T, layout: &'a DatasetLayout, pacer: P) -> Self {
        Self {
            table,
            layout,
            pacer,
            max_offset: DAY_MAX_OFFSET,
            deadline: Deadline::none(),
        }
    }

    /// Override the inclusive upper bound of the per-day page offset.
    pub fn with_max_offset(mut self, max_offset: u64) -> Self {
        self.max_offset = max_offset;
        self
    }

    /// Stop visiting days once `deadline` expires.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Collect up to `per_day_target` rows of `stratum_value` from each day in `days`.
    ///
    /// Days are visited in ascending order. Failed or empty days are recorded
    /// and skipped; the result is explicitly empty when no day produced rows.
    pub fn execute<R: Rng + ?Sized>(
        &self,
        stratum_value: &str,
        days: &DayPlan,
        per_day_target: usize,
        window_timeout: Duration,
        pacing_delay: Duration,
        rng: &mut R,
    ) -> AssembledSample {
        let sampler = WindowSampler::new(self.table, self.layout, window_timeout);
        let mut report = CollectionReport::default();
        let mut batches = Vec::new();
        let planned = per_day_target as u64;
        let days: Vec<_> = days.iter().copied().collect();

        for (idx, day) in days.iter().copied().enumerate() {
            let scope = FetchScope::Day { day };
            let record = |report: &mut CollectionReport, collected: u64, status: OutcomeStatus| {
                report.record(FetchOutcome {
                    stratum: stratum_value.to_string(),
                    scope: scope.clone(),
                    planned,
                    collected,
                    status,
                })
            };

            if self.deadline.expired() {
                warn!(
                    "[strata:day] deadline reached; {} of {} days for '{}' not attempted",
                    days.len() - idx,
                    days.len(),
                    stratum_value
                );
                report.deadline_reached = true;
                for remaining in &days[idx..] {
                    report.record(FetchOutcome {
                        stratum: stratum_value.to_string(),
                        scope: FetchScope::Day { day: *remaining },
                        planned,
                        collected: 0,
                        status: OutcomeStatus::NotAttempted,
                    });
                }
                break;
            }

            if per_day_target == 0 {
                record(
                    &mut report,
                    0,
                    OutcomeStatus::Skipped {
                        reason: "per-day target is zero".to_string(),
                    },
                );
                continue;
            }

            let window = match FetchWindow::day(day) {
                Ok(window) => window,
                Err(err) => {
                    error!("[strata:day] cannot build window for {}: {}", day, err);
                    record(
                        &mut report,
                        0,
                        OutcomeStatus::Skipped {
                            reason: err.to_string(),
                        },
                    );
                    continue;
                }
            };

            match sampler.fetch_page(stratum_value, &window, per_day_target, self.max_offset, rng) {
                Ok(rows) if rows.is_empty() => {
                    warn!("[strata:day] no rows for '{}' on {}", stratum_value, day);
                    record(&mut report, 0, OutcomeStatus::Empty);
                }
                Ok(rows) => {
                    info!(
                        "[strata:day] {} rows for '{}' on {}",
                        rows.len(),
                        stratum_value,
                        day
                    );
                    record(&mut report, rows.len() as u64, OutcomeStatus::Collected);
                    batches.push(RawSampleBatch {
                        stratum_value: stratum_value.to_string(),
                        rows,
                    });
                }
                Err(failure) => {
                    error!(
                        "[strata:day] skipping '{}' on {}: {}",
                        stratum_value, day, failure
                    );
                    record(
                        &mut report,
                        0,
                        OutcomeStatus::Failed {
                            reason: failure.reason,
                        },
                    );
                }
            }
            self.pacer.pause(pacing_delay);
        }

        if batches.is_empty() {
            report.log_warnings("day");
            return AssembledSample::empty(report);
        }
        let mut sample = AssembledSample::concat(batches, report);
        let removed = sample.remove_exact_duplicates();
        if removed > 0 {
            info!(
                "[strata:day] dropped {} duplicate rows for '{}'",
                removed, stratum_value
            );
        }
        sample.report.duplicates_removed += removed as u64;
        sample.report.log_warnings("day");
        sample
    }
}

use rand::Rng;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::constants::sampler::DEFAULT_OVERFETCH_MULTIPLIER;
use crate::data::{AllocationEntry, AllocationPlan, AssembledSample, FetchWindow};
use crate::pacing::{Deadline, Pacer};
use crate::report::{CollectionReport, FetchOutcome, FetchScope, OutcomeStatus};
use crate::transport::RemoteTable;
use crate::window::WindowSampler;

/// Walks an allocation plan one stratum at a time.
///
/// A failing stratum is recorded and skipped; the loop never aborts on a
/// per-stratum basis, so a run with some failures still yields a usable
/// partial sample.
pub struct PlanExecutor<'a, T: RemoteTable + ?Sized, P: Pacer> {
    sampler: WindowSampler<'a, T>,
    pacer: P,
    overfetch_multiplier: usize,
    deadline: Deadline,
}

impl<'a, T: RemoteTable + ?Sized, P: Pacer> PlanExecutor<'a, T, P> {
    /// Executor driving `sampler`, pausing through `pacer` after every call.
    pub fn new(sampler: WindowSampler<'a, T>, pacer: P) -> Self {
        Self {
            sampler,
            pacer,
            overfetch_multiplier: DEFAULT_OVERFETCH_MULTIPLIER,
            deadline: Deadline::none(),
        }
    }

    /// Page size factor relative to each stratum's planned size.
    pub fn with_overfetch_multiplier(mut self, multiplier: usize) -> Self {
        self.overfetch_multiplier = multiplier;
        self
    }

    /// Stop visiting strata once `deadline` expires.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Sample every planned stratum inside `window` and concatenate the results.
    ///
    /// Never fails: an all-failed run returns an explicitly empty sample whose
    /// report explains what happened.
    pub fn execute<R: Rng + ?Sized>(
        &self,
        plan: &AllocationPlan,
        window: &FetchWindow,
        pacing_delay: Duration,
        rng: &mut R,
    ) -> AssembledSample {
        let scope = FetchScope::Window {
            window: window.to_string(),
        };
        let mut report = CollectionReport::default();
        let mut batches = Vec::new();

        for (idx, entry) in plan.entries.iter().enumerate() {
            if self.deadline.expired() {
                warn!(
                    "[strata:plan] deadline reached; {} of {} strata not attempted",
                    plan.len() - idx,
                    plan.len()
                );
                report.deadline_reached = true;
                for remaining in &plan.entries[idx..] {
                    report.record(outcome(remaining, &scope, 0, OutcomeStatus::NotAttempted));
                }
                break;
            }

            let Ok(target_n) = usize::try_from(entry.sample_size) else {
                warn!(
                    "[strata:plan] skipping '{}': planned size {} is negative",
                    entry.stratum_value, entry.sample_size
                );
                report.record(outcome(
                    entry,
                    &scope,
                    0,
                    OutcomeStatus::Skipped {
                        reason: format!("negative planned size {}", entry.sample_size),
                    },
                ));
                continue;
            };
            if target_n == 0 {
                report.record(outcome(
                    entry,
                    &scope,
                    0,
                    OutcomeStatus::Skipped {
                        reason: "planned size is zero".to_string(),
                    },
                ));
                continue;
            }

            info!(
                "[strata:plan] loading {} rows for {}='{}'",
                target_n,
                self.sampler.layout().group_by,
                entry.stratum_value
            );
            match self.sampler.sample(
                &entry.stratum_value,
                window,
                target_n,
                self.overfetch_multiplier,
                rng,
            ) {
                Ok(batch) => {
                    info!(
                        "[strata:plan] {} rows loaded for '{}'",
                        batch.len(),
                        entry.stratum_value
                    );
                    let status = if batch.is_empty() {
                        OutcomeStatus::Empty
                    } else {
                        OutcomeStatus::Collected
                    };
                    report.record(outcome(entry, &scope, batch.len() as u64, status));
                    batches.push(batch);
                }
                Err(failure) => {
                    error!("[strata:plan] skipping '{}': {}", entry.stratum_value, failure);
                    report.record(outcome(
                        entry,
                        &scope,
                        0,
                        OutcomeStatus::Failed {
                            reason: failure.reason,
                        },
                    ));
                }
            }
            self.pacer.pause(pacing_delay);
        }

        report.log_warnings("plan");
        if batches.iter().all(|batch| batch.is_empty()) {
            return AssembledSample::empty(report);
        }
        AssembledSample::concat(batches, report)
    }
}

fn outcome(
    entry: &AllocationEntry,
    scope: &FetchScope,
    collected: u64,
    status: OutcomeStatus,
) -> FetchOutcome {
    FetchOutcome {
        stratum: entry.stratum_value.clone(),
        scope: scope.clone(),
        planned: u64::try_from(entry.sample_size).unwrap_or(0),
        collected,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{DatasetLayout, SoqlQuery};
    use crate::report::PartialCollectionWarning;
    use crate::transport::{TransportError, TransportFailure};
    use chrono::NaiveDate;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::cell::RefCell;
    use std::time::Instant;

    /// Answers by the stratum literal in `$where`; unknown strata fail.
    struct StratumTable {
        rows_per_stratum: Vec<(&'static str, usize)>,
        calls: RefCell<Vec<String>>,
    }

    impl RemoteTable for StratumTable {
        fn fetch_csv(
            &self,
            query: &SoqlQuery,
            _timeout: Duration,
        ) -> Result<String, TransportFailure> {
            let predicate = query.get("$where").unwrap_or_default().to_string();
            self.calls.borrow_mut().push(predicate.clone());
            for (stratum, rows) in &self.rows_per_stratum {
                if predicate.ends_with(&format!("='{stratum}'")) {
                    let mut body = String::from("unique_key,borough\n");
                    for idx in 0..*rows {
                        body.push_str(&format!("{stratum}-{idx},{stratum}\n"));
                    }
                    return Ok(body);
                }
            }
            Err(TransportFailure {
                error: TransportError::Request("connection reset".into()),
                attempts: 1,
            })
        }
    }

    #[derive(Default)]
    struct CountingPacer {
        pauses: RefCell<Vec<Duration>>,
    }

    impl Pacer for CountingPacer {
        fn pause(&self, delay: Duration) {
            self.pauses.borrow_mut().push(delay);
        }
    }

    fn plan(entries: &[(&str, i64)]) -> AllocationPlan {
        AllocationPlan {
            entries: entries
                .iter()
                .map(|(stratum, size)| AllocationEntry {
                    stratum_value: stratum.to_string(),
                    sample_size: *size,
                })
                .collect(),
        }
    }

    fn window() -> FetchWindow {
        FetchWindow::from_dates(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn pauses_after_every_call_including_failures() {
        let table = StratumTable {
            rows_per_stratum: vec![("A", 10)],
            calls: RefCell::new(Vec::new()),
        };
        let layout = DatasetLayout::new("borough");
        let pacer = CountingPacer::default();
        let executor = PlanExecutor::new(
            WindowSampler::new(&table, &layout, Duration::from_secs(1)),
            &pacer,
        );
        let sample = executor.execute(
            &plan(&[("A", 2), ("B", 2)]),
            &window(),
            Duration::from_millis(300),
            &mut StdRng::seed_from_u64(1),
        );
        assert_eq!(sample.len(), 2);
        assert_eq!(
            *pacer.pauses.borrow(),
            vec![Duration::from_millis(300), Duration::from_millis(300)]
        );
    }

    #[test]
    fn non_positive_entries_are_skipped_without_requests() {
        let table = StratumTable {
            rows_per_stratum: vec![("A", 10), ("B", 10), ("C", 10)],
            calls: RefCell::new(Vec::new()),
        };
        let layout = DatasetLayout::new("borough");
        let executor = PlanExecutor::new(
            WindowSampler::new(&table, &layout, Duration::from_secs(1)),
            CountingPacer::default(),
        );
        let sample = executor.execute(
            &plan(&[("A", -1), ("B", 0), ("C", 3)]),
            &window(),
            Duration::ZERO,
            &mut StdRng::seed_from_u64(2),
        );
        assert_eq!(table.calls.borrow().len(), 1);
        assert_eq!(sample.len(), 3);
        let skipped = sample
            .report
            .warnings()
            .into_iter()
            .filter(|warning| matches!(warning, PartialCollectionWarning::Skipped { .. }))
            .count();
        assert_eq!(skipped, 2);
    }

    #[test]
    fn all_failures_yield_explicitly_empty_sample() {
        let table = StratumTable {
            rows_per_stratum: Vec::new(),
            calls: RefCell::new(Vec::new()),
        };
        let layout = DatasetLayout::new("borough");
        let executor = PlanExecutor::new(
            WindowSampler::new(&table, &layout, Duration::from_secs(1)),
            CountingPacer::default(),
        );
        let sample = executor.execute(
            &plan(&[("A", 2), ("B", 2)]),
            &window(),
            Duration::ZERO,
            &mut StdRng::seed_from_u64(3),
        );
        assert!(sample.is_empty());
        assert!(sample.columns.is_empty());
        assert_eq!(sample.report.failed(), 2);
        assert!(
            sample
                .report
                .warnings()
                .contains(&PartialCollectionWarning::NothingCollected { planned_entries: 2 })
        );
    }

    #[test]
    fn expired_deadline_stops_before_first_call() {
        let table = StratumTable {
            rows_per_stratum: vec![("A", 10)],
            calls: RefCell::new(Vec::new()),
        };
        let layout = DatasetLayout::new("borough");
        let executor = PlanExecutor::new(
            WindowSampler::new(&table, &layout, Duration::from_secs(1)),
            CountingPacer::default(),
        )
        .with_deadline(Deadline::at(Instant::now()));
        let sample = executor.execute(
            &plan(&[("A", 2), ("A", 3)]),
            &window(),
            Duration::ZERO,
            &mut StdRng::seed_from_u64(4),
        );
        assert!(table.calls.borrow().is_empty());
        assert!(sample.report.deadline_reached);
        assert_eq!(sample.report.outcomes.len(), 2);
        assert_eq!(sample.report.planned_rows, 5);
    }

    #[test]
    fn overfetch_multiplier_scales_page_size() {
        struct LimitProbe(RefCell<Vec<u64>>);
        impl RemoteTable for LimitProbe {
            fn fetch_csv(
                &self,
                query: &SoqlQuery,
                _timeout: Duration,
            ) -> Result<String, TransportFailure> {
                self.0.borrow_mut().push(query.limit_value().unwrap());
                Ok("unique_key\n".to_string())
            }
        }
        let probe = LimitProbe(RefCell::new(Vec::new()));
        let layout = DatasetLayout::new("borough");
        let executor = PlanExecutor::new(
            WindowSampler::new(&probe, &layout, Duration::from_secs(1)),
            CountingPacer::default(),
        )
        .with_overfetch_multiplier(5);
        let sample = executor.execute(
            &plan(&[("A", 4)]),
            &window(),
            Duration::ZERO,
            &mut StdRng::seed_from_u64(5),
        );
        assert_eq!(*probe.0.borrow(), vec![20]);
        assert!(sample.is_empty());
        assert!(matches!(
            sample.report.outcomes[0].status,
            OutcomeStatus::Empty
        ));
    }
}

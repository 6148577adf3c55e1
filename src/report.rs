//! Collection accounting shared by both executors.
//!
//! Executors record one `FetchOutcome` per planned stratum or day. Warnings are
//! derived from the outcomes at the end of a run rather than raised mid-loop,
//! so a partially failed run still hands back everything it collected.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::types::{LogMessage, StratumValue};

/// What a single planned fetch was scoped to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchScope {
    /// A stratum over the run's whole window.
    Window {
        /// Rendered window bounds.
        window: String,
    },
    /// A stratum over one calendar day.
    Day {
        /// The sampled day.
        day: NaiveDate,
    },
}

impl fmt::Display for FetchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchScope::Window { window } => write!(f, "window {window}"),
            FetchScope::Day { day } => write!(f, "day {day}"),
        }
    }
}

/// Result of one planned fetch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Rows were returned (possibly fewer than planned).
    Collected,
    /// The call succeeded but returned no rows.
    Empty,
    /// The call failed after all attempts.
    Failed {
        /// Failure cause.
        reason: LogMessage,
    },
    /// The entry was never requested because its plan was unusable.
    Skipped {
        /// Why it was skipped.
        reason: LogMessage,
    },
    /// The run's deadline expired before this entry was reached.
    NotAttempted,
}

/// Accounting for one planned stratum or day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOutcome {
    /// Stratum the fetch was scoped to.
    pub stratum: StratumValue,
    /// Window or day.
    pub scope: FetchScope,
    /// Rows requested by the plan.
    pub planned: u64,
    /// Rows kept from the response.
    pub collected: u64,
    /// How the fetch ended.
    pub status: OutcomeStatus,
}

/// Non-fatal condition accumulated over a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum PartialCollectionWarning {
    /// A fetch failed; its rows are missing from the sample.
    FetchFailed {
        /// Affected stratum.
        stratum: StratumValue,
        /// Affected window or day.
        scope: FetchScope,
        /// Failure cause.
        reason: LogMessage,
    },
    /// A fetch succeeded with no rows.
    EmptyFetch {
        /// Affected stratum.
        stratum: StratumValue,
        /// Affected window or day.
        scope: FetchScope,
    },
    /// A fetch returned fewer rows than planned.
    Shortfall {
        /// Affected stratum.
        stratum: StratumValue,
        /// Affected window or day.
        scope: FetchScope,
        /// Rows planned.
        planned: u64,
        /// Rows collected.
        collected: u64,
    },
    /// A planned entry was skipped without a request.
    Skipped {
        /// Affected stratum.
        stratum: StratumValue,
        /// Why it was skipped.
        reason: LogMessage,
    },
    /// The deadline stopped the run early.
    DeadlineReached {
        /// Entries left unattempted.
        not_attempted: usize,
    },
    /// Every fetch failed or came back empty.
    NothingCollected {
        /// Entries that were planned.
        planned_entries: usize,
    },
}

impl fmt::Display for PartialCollectionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchFailed {
                stratum,
                scope,
                reason,
            } => write!(f, "fetch for '{stratum}' ({scope}) failed: {reason}"),
            Self::EmptyFetch { stratum, scope } => {
                write!(f, "fetch for '{stratum}' ({scope}) returned no rows")
            }
            Self::Shortfall {
                stratum,
                scope,
                planned,
                collected,
            } => write!(
                f,
                "'{stratum}' ({scope}) returned {collected} of {planned} planned rows"
            ),
            Self::Skipped { stratum, reason } => write!(f, "skipped '{stratum}': {reason}"),
            Self::DeadlineReached { not_attempted } => {
                write!(f, "deadline reached with {not_attempted} entries unattempted")
            }
            Self::NothingCollected { planned_entries } => {
                write!(f, "no rows collected across {planned_entries} planned entries")
            }
        }
    }
}

/// Planned versus collected accounting for one run (or several merged runs).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionReport {
    /// Sum of planned rows over all entries.
    pub planned_rows: u64,
    /// Rows kept from responses, before duplicate removal.
    pub collected_rows: u64,
    /// Rows dropped as exact duplicates.
    pub duplicates_removed: u64,
    /// Whether a deadline cut the run short.
    pub deadline_reached: bool,
    /// One entry per planned stratum or day, in visiting order.
    pub outcomes: Vec<FetchOutcome>,
}

impl CollectionReport {
    /// Record one outcome and keep the row totals in step.
    pub fn record(&mut self, outcome: FetchOutcome) {
        self.planned_rows += outcome.planned;
        self.collected_rows += outcome.collected;
        self.outcomes.push(outcome);
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: CollectionReport) {
        self.planned_rows += other.planned_rows;
        self.collected_rows += other.collected_rows;
        self.duplicates_removed += other.duplicates_removed;
        self.deadline_reached |= other.deadline_reached;
        self.outcomes.extend(other.outcomes);
    }

    /// Number of outcomes with the given predicate on status.
    fn count_where(&self, predicate: impl Fn(&OutcomeStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }

    /// Number of fetches that failed.
    pub fn failed(&self) -> usize {
        self.count_where(|status| matches!(status, OutcomeStatus::Failed { .. }))
    }

    /// Number of fetches that returned rows.
    pub fn succeeded(&self) -> usize {
        self.count_where(|status| matches!(status, OutcomeStatus::Collected))
    }

    /// Derive the warnings this run accumulated.
    pub fn warnings(&self) -> Vec<PartialCollectionWarning> {
        let mut warnings = Vec::new();
        let mut not_attempted = 0usize;
        for outcome in &self.outcomes {
            match &outcome.status {
                OutcomeStatus::Collected if outcome.collected < outcome.planned => {
                    warnings.push(PartialCollectionWarning::Shortfall {
                        stratum: outcome.stratum.clone(),
                        scope: outcome.scope.clone(),
                        planned: outcome.planned,
                        collected: outcome.collected,
                    });
                }
                OutcomeStatus::Collected => {}
                OutcomeStatus::Empty => warnings.push(PartialCollectionWarning::EmptyFetch {
                    stratum: outcome.stratum.clone(),
                    scope: outcome.scope.clone(),
                }),
                OutcomeStatus::Failed { reason } => {
                    warnings.push(PartialCollectionWarning::FetchFailed {
                        stratum: outcome.stratum.clone(),
                        scope: outcome.scope.clone(),
                        reason: reason.clone(),
                    })
                }
                OutcomeStatus::Skipped { reason } => {
                    warnings.push(PartialCollectionWarning::Skipped {
                        stratum: outcome.stratum.clone(),
                        reason: reason.clone(),
                    })
                }
                OutcomeStatus::NotAttempted => not_attempted += 1,
            }
        }
        if self.deadline_reached {
            warnings.push(PartialCollectionWarning::DeadlineReached { not_attempted });
        }
        if self.collected_rows == 0 && !self.outcomes.is_empty() {
            warnings.push(PartialCollectionWarning::NothingCollected {
                planned_entries: self.outcomes.len(),
            });
        }
        warnings
    }

    /// Emit every warning through `tracing` with the run's totals.
    pub fn log_warnings(&self, context: &str) {
        let warnings = self.warnings();
        if warnings.is_empty() {
            return;
        }
        warn!(
            "[strata:{}] partial collection: {} of {} planned rows, {} failed fetches, {} warnings",
            context,
            self.collected_rows,
            self.planned_rows,
            self.failed(),
            warnings.len()
        );
        for warning in &warnings {
            warn!("[strata:{}] {}", context, warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(stratum: &str, planned: u64, collected: u64, status: OutcomeStatus) -> FetchOutcome {
        FetchOutcome {
            stratum: stratum.to_string(),
            scope: FetchScope::Window {
                window: "[a, b)".to_string(),
            },
            planned,
            collected,
            status,
        }
    }

    #[test]
    fn complete_run_has_no_warnings() {
        let mut report = CollectionReport::default();
        report.record(outcome("A", 5, 5, OutcomeStatus::Collected));
        assert!(report.warnings().is_empty());
        assert_eq!(report.succeeded(), 1);
    }

    #[test]
    fn failures_and_shortfalls_become_warnings() {
        let mut report = CollectionReport::default();
        report.record(outcome("A", 5, 3, OutcomeStatus::Collected));
        report.record(outcome(
            "B",
            5,
            0,
            OutcomeStatus::Failed {
                reason: "timeout".into(),
            },
        ));
        let warnings = report.warnings();
        assert_eq!(warnings.len(), 2);
        assert!(matches!(
            warnings[0],
            PartialCollectionWarning::Shortfall {
                planned: 5,
                collected: 3,
                ..
            }
        ));
        assert!(warnings[1].to_string().contains("timeout"));
        assert_eq!(report.planned_rows, 10);
        assert_eq!(report.collected_rows, 3);
    }

    #[test]
    fn nothing_collected_and_deadline_are_reported() {
        let mut report = CollectionReport::default();
        report.record(outcome("A", 5, 0, OutcomeStatus::Empty));
        report.record(outcome("B", 5, 0, OutcomeStatus::NotAttempted));
        report.deadline_reached = true;
        let warnings = report.warnings();
        assert!(warnings.contains(&PartialCollectionWarning::DeadlineReached { not_attempted: 1 }));
        assert!(warnings.contains(&PartialCollectionWarning::NothingCollected { planned_entries: 2 }));
    }

    #[test]
    fn merge_accumulates_totals() {
        let mut left = CollectionReport::default();
        left.record(outcome("A", 2, 2, OutcomeStatus::Collected));
        let mut right = CollectionReport::default();
        right.record(outcome("B", 3, 1, OutcomeStatus::Collected));
        right.duplicates_removed = 4;
        left.merge(right);
        assert_eq!(left.planned_rows, 5);
        assert_eq!(left.collected_rows, 3);
        assert_eq!(left.duplicates_removed, 4);
        assert_eq!(left.outcomes.len(), 2);
    }
}

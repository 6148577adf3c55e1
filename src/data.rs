use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::constants::query::TIMESTAMP_FORMAT;
use crate::errors::SamplingError;
use crate::report::CollectionReport;
use crate::types::{ColumnName, FieldValue, StratumValue};

/// Population size of one stratum as reported by the remote count query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratumCount {
    /// Value of the grouping key, e.g. `BROOKLYN`.
    pub stratum_value: StratumValue,
    /// Number of remote rows carrying this value inside the counted window.
    pub total: u64,
}

impl StratumCount {
    /// Convenience constructor.
    pub fn new(stratum_value: impl Into<StratumValue>, total: u64) -> Self {
        Self {
            stratum_value: stratum_value.into(),
            total,
        }
    }
}

/// Planned sample size for one stratum.
///
/// `sample_size` is signed: the remainder correction applied to the first
/// entry is not clamped, so a pathological input can drive it below zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntry {
    /// Stratum this entry belongs to.
    pub stratum_value: StratumValue,
    /// Rows to request for the stratum.
    pub sample_size: i64,
}

/// Ordered per-stratum allocation whose sizes sum exactly to the target.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    /// Entries in the order the counts were supplied; the first absorbed the rounding remainder.
    pub entries: Vec<AllocationEntry>,
}

impl AllocationPlan {
    /// Sum of all planned sizes.
    pub fn total(&self) -> i64 {
        self.entries.iter().map(|entry| entry.sample_size).sum()
    }

    /// Planned sizes in plan order.
    pub fn sizes(&self) -> Vec<i64> {
        self.entries.iter().map(|entry| entry.sample_size).collect()
    }

    /// Planned size for `stratum`, if present.
    pub fn size_for(&self, stratum: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|entry| entry.stratum_value == stratum)
            .map(|entry| entry.sample_size)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the plan has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Half-open time range `[start, end)` scoping one remote query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchWindow {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl FetchWindow {
    /// Build a window, rejecting empty or inverted ranges.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, SamplingError> {
        if end <= start {
            return Err(SamplingError::InvalidRange {
                start: start.format(TIMESTAMP_FORMAT).to_string(),
                end: end.format(TIMESTAMP_FORMAT).to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Window covering whole days `[start, end)`.
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Result<Self, SamplingError> {
        Self::new(start.and_time(NaiveTime::MIN), end.and_time(NaiveTime::MIN))
    }

    /// One calendar day `[day, day + 1)`.
    pub fn day(day: NaiveDate) -> Result<Self, SamplingError> {
        let next = day.succ_opt().ok_or_else(|| {
            SamplingError::InvalidInput(format!("no calendar day follows {day}"))
        })?;
        Self::from_dates(day, next)
    }

    /// Whole calendar years `since..=until`, i.e. `[since-01-01, (until + 1)-01-01)`.
    pub fn from_years(since: i32, until: i32) -> Result<Self, SamplingError> {
        let start = NaiveDate::from_ymd_opt(since, 1, 1)
            .ok_or_else(|| SamplingError::InvalidInput(format!("year {since} out of range")))?;
        let end = until
            .checked_add(1)
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
            .ok_or_else(|| SamplingError::InvalidInput(format!("year {until} out of range")))?;
        Self::from_dates(start, end)
    }

    /// Inclusive lower bound.
    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// Exclusive upper bound.
    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    /// `true` when `ts` falls inside the window.
    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts < self.end
    }

    /// First calendar day touched by the window.
    pub fn first_day(&self) -> NaiveDate {
        self.start.date()
    }

    /// Day after the last day touched by the window (exclusive day bound).
    pub fn end_day(&self) -> NaiveDate {
        let end_date = self.end.date();
        if self.end.time() == NaiveTime::MIN {
            end_date
        } else {
            end_date.succ_opt().unwrap_or(end_date)
        }
    }

    /// Split into calendar-month windows, clipped to this window's bounds.
    pub fn months(&self) -> Vec<FetchWindow> {
        let mut windows = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let date = cursor.date();
            let next_month = if date.month() == 12 {
                NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
            };
            let boundary = next_month
                .map(|day| day.and_time(NaiveTime::MIN))
                .unwrap_or(self.end)
                .min(self.end);
            windows.push(FetchWindow {
                start: cursor,
                end: boundary,
            });
            cursor = boundary;
        }
        windows
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format(TIMESTAMP_FORMAT),
            self.end.format(TIMESTAMP_FORMAT)
        )
    }
}

/// One opaque record: ordered column/value cells exactly as the remote sent them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    cells: IndexMap<ColumnName, FieldValue>,
}

impl Row {
    /// Empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `column`, if present.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells.get(column).map(String::as_str)
    }

    /// Set `column`, keeping its position when it already exists.
    pub fn set(&mut self, column: impl Into<ColumnName>, value: impl Into<FieldValue>) {
        self.cells.insert(column.into(), value.into());
    }

    /// Column names in cell order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// `true` when the row has no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn identity_key(&self, columns: &[ColumnName]) -> Vec<Option<FieldValue>> {
        columns
            .iter()
            .map(|column| self.cells.get(column).cloned())
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for Row
where
    K: Into<ColumnName>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            cells: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Rows fetched for one stratum (and one window or day).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawSampleBatch {
    /// Stratum the batch was scoped to; also present as a column on every row.
    pub stratum_value: StratumValue,
    /// Fetched rows after local subsampling.
    pub rows: Vec<Row>,
}

impl RawSampleBatch {
    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// `true` when the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Distinct calendar days selected for day-stratified sampling.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayPlan {
    days: BTreeSet<NaiveDate>,
}

impl DayPlan {
    /// Number of selected days.
    pub fn len(&self) -> usize {
        self.days.len()
    }

    /// `true` when no day was selected.
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// `true` when `day` was selected.
    pub fn contains(&self, day: &NaiveDate) -> bool {
        self.days.contains(day)
    }

    /// Selected days in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &NaiveDate> {
        self.days.iter()
    }
}

impl FromIterator<NaiveDate> for DayPlan {
    fn from_iter<I: IntoIterator<Item = NaiveDate>>(iter: I) -> Self {
        Self {
            days: iter.into_iter().collect(),
        }
    }
}

/// Concatenation of every batch a run managed to retrieve.
#[derive(Clone, Debug, Default)]
pub struct AssembledSample {
    /// Union of batch columns in first-seen order.
    pub columns: Vec<ColumnName>,
    /// Retrieved rows.
    pub rows: Vec<Row>,
    /// What was planned, attempted and collected.
    pub report: CollectionReport,
}

impl AssembledSample {
    /// Explicitly empty result carrying the report that explains why.
    pub fn empty(report: CollectionReport) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            report,
        }
    }

    /// Concatenate batches in order.
    pub fn concat(batches: Vec<RawSampleBatch>, report: CollectionReport) -> Self {
        let mut sample = Self::empty(report);
        for batch in batches {
            sample.extend_rows(batch.rows);
        }
        sample
    }

    /// Append another sample's rows and merge its report.
    pub fn append(&mut self, other: AssembledSample) {
        self.extend_rows(other.rows);
        self.report.merge(other.report);
    }

    fn extend_rows(&mut self, rows: Vec<Row>) {
        let mut known: HashSet<ColumnName> = self.columns.iter().cloned().collect();
        for row in &rows {
            for column in row.columns() {
                if known.insert(column.to_string()) {
                    self.columns.push(column.to_string());
                }
            }
        }
        self.rows.extend(rows);
    }

    /// Drop rows identical to an earlier row across all columns; returns how many were removed.
    pub fn remove_exact_duplicates(&mut self) -> usize {
        let before = self.rows.len();
        let columns = &self.columns;
        let mut seen = HashSet::new();
        self.rows.retain(|row| seen.insert(row.identity_key(columns)));
        before - self.rows.len()
    }

    /// Row counts per value of `column` (rows missing the column are skipped).
    pub fn counts_by(&self, column: &str) -> HashMap<StratumValue, usize> {
        let mut counts = HashMap::new();
        for row in &self.rows {
            if let Some(value) = row.get(column) {
                *counts.entry(value.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// `true` when nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

//! SoQL query composition for Socrata-style endpoints.
//!
//! Queries are plain ordered `(param, value)` lists so transports can append
//! them to any URL and tests can assert on them without a server.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::config::DEFAULT_SELECT_COLUMNS;
use crate::constants::query::{
    COUNT_TOTAL_COLUMN, DEFAULT_ORDER_COLUMN, PARAM_GROUP, PARAM_LIMIT, PARAM_OFFSET, PARAM_ORDER,
    PARAM_SELECT, PARAM_WHERE, TIMESTAMP_FORMAT,
};
use crate::data::FetchWindow;
use crate::types::{ColumnName, ParamName};

/// Sort direction for the window's ordering column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Oldest first.
    Asc,
    /// Newest first.
    Desc,
}

impl SortDirection {
    /// Fair coin flip between the two directions.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        if rng.random_bool(0.5) {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        }
    }

    /// SoQL keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Columns that shape every query against one dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetLayout {
    /// Columns requested by sample fetches.
    pub select: Vec<ColumnName>,
    /// Stratification column, e.g. `borough`.
    pub group_by: ColumnName,
    /// Timestamp column bounding windows and ordering pages.
    pub order_column: ColumnName,
}

impl DatasetLayout {
    /// Layout with the default select list and ordering column.
    pub fn new(group_by: impl Into<ColumnName>) -> Self {
        Self {
            select: DEFAULT_SELECT_COLUMNS
                .iter()
                .map(|column| column.to_string())
                .collect(),
            group_by: group_by.into(),
            order_column: DEFAULT_ORDER_COLUMN.to_string(),
        }
    }

    /// `<order_column> >= '<start>' AND <order_column> < '<end>'`.
    pub fn window_predicate(&self, window: &FetchWindow) -> String {
        format!(
            "{col} >= {start} AND {col} < {end}",
            col = self.order_column,
            start = quote_literal(&window.start().format(TIMESTAMP_FORMAT).to_string()),
            end = quote_literal(&window.end().format(TIMESTAMP_FORMAT).to_string()),
        )
    }

    /// Window predicate combined with `<group_by>='<stratum>'`.
    pub fn stratum_predicate(&self, window: &FetchWindow, stratum: &str) -> String {
        format!(
            "{} AND {}={}",
            self.window_predicate(window),
            self.group_by,
            quote_literal(stratum)
        )
    }

    /// Randomized page of one stratum inside `window`.
    pub fn page_query(
        &self,
        window: &FetchWindow,
        stratum: &str,
        limit: u64,
        offset: u64,
        direction: SortDirection,
    ) -> SoqlQuery {
        SoqlQuery::new()
            .select(&self.select)
            .filter(self.stratum_predicate(window, stratum))
            .limit(limit)
            .offset(offset)
            .order(&self.order_column, direction)
    }

    /// Per-stratum population count inside `window`.
    pub fn count_query(&self, window: &FetchWindow) -> SoqlQuery {
        SoqlQuery::new()
            .select_expr(format!(
                "{}, count(*) as {}",
                self.group_by, COUNT_TOTAL_COLUMN
            ))
            .filter(self.window_predicate(window))
            .group(&self.group_by)
    }
}

/// Ordered SoQL query parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SoqlQuery {
    params: Vec<(ParamName, String)>,
}

impl SoqlQuery {
    /// Empty query.
    pub fn new() -> Self {
        Self::default()
    }

    fn set(mut self, name: &str, value: String) -> Self {
        if let Some(slot) = self.params.iter_mut().find(|(key, _)| key == name) {
            slot.1 = value;
        } else {
            self.params.push((name.to_string(), value));
        }
        self
    }

    /// `$select` from a column list.
    pub fn select<S: AsRef<str>>(self, columns: &[S]) -> Self {
        let joined = columns
            .iter()
            .map(|column| column.as_ref())
            .collect::<Vec<_>>()
            .join(",");
        self.set(PARAM_SELECT, joined)
    }

    /// `$select` from a raw expression.
    pub fn select_expr(self, expr: impl Into<String>) -> Self {
        self.set(PARAM_SELECT, expr.into())
    }

    /// `$where`.
    pub fn filter(self, predicate: impl Into<String>) -> Self {
        self.set(PARAM_WHERE, predicate.into())
    }

    /// `$limit`.
    pub fn limit(self, limit: u64) -> Self {
        self.set(PARAM_LIMIT, limit.to_string())
    }

    /// `$offset`.
    pub fn offset(self, offset: u64) -> Self {
        self.set(PARAM_OFFSET, offset.to_string())
    }

    /// `$order`.
    pub fn order(self, column: &str, direction: SortDirection) -> Self {
        self.set(PARAM_ORDER, format!("{column} {direction}"))
    }

    /// `$group`.
    pub fn group(self, column: &str) -> Self {
        self.set(PARAM_GROUP, column.to_string())
    }

    /// Parameters in insertion order.
    pub fn params(&self) -> &[(ParamName, String)] {
        &self.params
    }

    /// Value of one parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Parsed `$limit`, if set.
    pub fn limit_value(&self) -> Option<u64> {
        self.get(PARAM_LIMIT).and_then(|raw| raw.parse().ok())
    }

    /// Parsed `$offset`, if set.
    pub fn offset_value(&self) -> Option<u64> {
        self.get(PARAM_OFFSET).and_then(|raw| raw.parse().ok())
    }
}

/// Quote a SoQL string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

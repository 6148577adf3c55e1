use rand::Rng;
use rand::seq::index;
use std::time::Duration;
use tracing::{error, info};

use crate::constants::sampler::WINDOW_MAX_OFFSET;
use crate::csv_rows::parse_rows;
use crate::data::{FetchWindow, RawSampleBatch, Row};
use crate::errors::AcquisitionFailure;
use crate::query::{DatasetLayout, SortDirection};
use crate::transport::RemoteTable;

/// Pulls one randomized page for a stratum and reduces it locally.
///
/// Socrata only offers ordered pagination, so each call picks a uniform page
/// offset and a random sort direction; repeated calls then land on different
/// slices of the population instead of the same first page.
pub struct WindowSampler<'a, T: RemoteTable + ?Sized> {
    table: &'a T,
    layout: &'a DatasetLayout,
    timeout: Duration,
    max_offset: u64,
}

impl<'a, T: RemoteTable + ?Sized> WindowSampler<'a, T> {
    /// Sampler over `table` using `timeout` per attempt.
    pub fn new(table: &'a T, layout: &'a DatasetLayout, timeout: Duration) -> Self {
        Self {
            table,
            layout,
            timeout,
            max_offset: WINDOW_MAX_OFFSET,
        }
    }

    /// Override the inclusive upper bound of the random page offset.
    pub fn with_max_offset(mut self, max_offset: u64) -> Self {
        self.max_offset = max_offset;
        self
    }

    /// Dataset layout queries are composed from.
    pub fn layout(&self) -> &DatasetLayout {
        self.layout
    }

    /// Fetch `target_n * overfetch_multiplier` rows at a random offset and keep
    /// a uniform subset of at most `target_n` of them.
    ///
    /// Under-supply is not a failure: a page with fewer rows than `target_n`
    /// is returned whole.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        stratum: &str,
        window: &FetchWindow,
        target_n: usize,
        overfetch_multiplier: usize,
        rng: &mut R,
    ) -> Result<RawSampleBatch, AcquisitionFailure> {
        if target_n == 0 || overfetch_multiplier == 0 {
            return Err(AcquisitionFailure::new(
                stratum,
                window.to_string(),
                format!(
                    "target ({target_n}) and overfetch multiplier ({overfetch_multiplier}) must be positive"
                ),
                0,
            ));
        }
        let Some(limit) = target_n.checked_mul(overfetch_multiplier) else {
            return Err(AcquisitionFailure::new(
                stratum,
                window.to_string(),
                "page size overflows",
                0,
            ));
        };
        info!(
            "[strata:window] sampling {} rows for {}='{}' in {}",
            target_n, self.layout.group_by, stratum, window
        );

        let mut rows = self.fetch_page(stratum, window, limit, self.max_offset, rng)?;
        let fetched = rows.len();
        if rows.len() > target_n {
            rows = subsample(rows, target_n, rng);
        }
        info!(
            "[strata:window] kept {} of {} fetched rows for '{}'",
            rows.len(),
            fetched,
            stratum
        );

        Ok(RawSampleBatch {
            stratum_value: stratum.to_string(),
            rows,
        })
    }

    /// One request for up to `limit` rows at a uniform offset in `0..=max_offset`.
    ///
    /// The stratum column is (re)set on every returned row.
    pub fn fetch_page<R: Rng + ?Sized>(
        &self,
        stratum: &str,
        window: &FetchWindow,
        limit: usize,
        max_offset: u64,
        rng: &mut R,
    ) -> Result<Vec<Row>, AcquisitionFailure> {
        let offset = rng.random_range(0..=max_offset);
        let direction = SortDirection::random(rng);
        let query = self
            .layout
            .page_query(window, stratum, limit as u64, offset, direction);

        let body = self.table.fetch_csv(&query, self.timeout).map_err(|failure| {
            error!(
                "[strata:window] fetch for {}='{}' in {} failed after {} attempt(s): {}",
                self.layout.group_by, stratum, window, failure.attempts, failure.error
            );
            AcquisitionFailure::new(
                stratum,
                window.to_string(),
                failure.error.to_string(),
                failure.attempts,
            )
        })?;

        let mut rows = parse_rows(body.as_bytes()).map_err(|err| {
            error!(
                "[strata:window] unreadable CSV for {}='{}' in {}: {}",
                self.layout.group_by, stratum, window, err
            );
            AcquisitionFailure::new(stratum, window.to_string(), format!("invalid CSV: {err}"), 1)
        })?;

        for row in &mut rows {
            row.set(self.layout.group_by.as_str(), stratum);
        }
        Ok(rows)
    }
}

/// Uniform subset of exactly `amount` rows without replacement, in source order.
fn subsample<R: Rng + ?Sized>(rows: Vec<Row>, amount: usize, rng: &mut R) -> Vec<Row> {
    let mut keep = vec![false; rows.len()];
    for idx in index::sample(rng, rows.len(), amount) {
        keep[idx] = true;
    }
    rows.into_iter()
        .zip(keep)
        .filter_map(|(row, kept)| kept.then_some(row))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SoqlQuery;
    use crate::transport::{TransportError, TransportFailure};
    use chrono::NaiveDate;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::cell::RefCell;
    use std::collections::HashSet;

    struct CannedTable {
        body: Result<String, TransportFailure>,
        queries: RefCell<Vec<SoqlQuery>>,
    }

    impl CannedTable {
        fn ok(body: String) -> Self {
            Self {
                body: Ok(body),
                queries: RefCell::new(Vec::new()),
            }
        }
    }

    impl RemoteTable for CannedTable {
        fn fetch_csv(
            &self,
            query: &SoqlQuery,
            _timeout: Duration,
        ) -> Result<String, TransportFailure> {
            self.queries.borrow_mut().push(query.clone());
            self.body.clone()
        }
    }

    fn csv_with_rows(n: usize) -> String {
        let mut body = String::from("unique_key,created_date,borough\n");
        for idx in 0..n {
            body.push_str(&format!("{idx},2024-01-05T10:00:00.000,brooklyn\n"));
        }
        body
    }

    fn window() -> FetchWindow {
        FetchWindow::from_dates(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn oversupplied_page_is_reduced_to_target_without_replacement() {
        let table = CannedTable::ok(csv_with_rows(250));
        let layout = DatasetLayout::new("borough");
        let sampler = WindowSampler::new(&table, &layout, Duration::from_secs(1));
        let mut rng = StdRng::seed_from_u64(5);
        let batch = sampler
            .sample("BROOKLYN", &window(), 100, 3, &mut rng)
            .unwrap();

        assert_eq!(batch.len(), 100);
        let keys: HashSet<&str> = batch
            .rows
            .iter()
            .map(|row| row.get("unique_key").unwrap())
            .collect();
        assert_eq!(keys.len(), 100);
        assert!(batch.rows.iter().all(|row| row.get("borough") == Some("BROOKLYN")));

        let query = &table.queries.borrow()[0];
        assert_eq!(query.limit_value(), Some(300));
        assert!(query.offset_value().unwrap() <= WINDOW_MAX_OFFSET);
    }

    #[test]
    fn undersupplied_page_is_returned_whole() {
        let table = CannedTable::ok(csv_with_rows(7));
        let layout = DatasetLayout::new("borough");
        let sampler = WindowSampler::new(&table, &layout, Duration::from_secs(1));
        let batch = sampler
            .sample("BROOKLYN", &window(), 20, 2, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(batch.len(), 7);
    }

    #[test]
    fn transport_failure_becomes_acquisition_failure() {
        let table = CannedTable {
            body: Err(TransportFailure {
                error: TransportError::Status {
                    status: 503,
                    body: "unavailable".into(),
                },
                attempts: 4,
            }),
            queries: RefCell::new(Vec::new()),
        };
        let layout = DatasetLayout::new("borough");
        let sampler = WindowSampler::new(&table, &layout, Duration::from_secs(1));
        let failure = sampler
            .sample("BRONX", &window(), 10, 2, &mut StdRng::seed_from_u64(2))
            .unwrap_err();
        assert_eq!(failure.stratum, "BRONX");
        assert_eq!(failure.attempts, 4);
        assert!(failure.reason.contains("503"));
    }

    #[test]
    fn zero_target_is_rejected_without_a_request() {
        let table = CannedTable::ok(csv_with_rows(3));
        let layout = DatasetLayout::new("borough");
        let sampler = WindowSampler::new(&table, &layout, Duration::from_secs(1));
        let failure = sampler
            .sample("BRONX", &window(), 0, 2, &mut StdRng::seed_from_u64(2))
            .unwrap_err();
        assert_eq!(failure.attempts, 0);
        assert!(table.queries.borrow().is_empty());
    }

    #[test]
    fn stratum_column_is_added_when_absent() {
        let table = CannedTable::ok("unique_key\n1\n2\n".to_string());
        let layout = DatasetLayout::new("borough");
        let sampler = WindowSampler::new(&table, &layout, Duration::from_secs(1));
        let batch = sampler
            .sample("QUEENS", &window(), 5, 1, &mut StdRng::seed_from_u64(3))
            .unwrap();
        assert!(batch.rows.iter().all(|row| row.get("borough") == Some("QUEENS")));
    }

    #[test]
    fn same_seed_selects_same_rows() {
        let layout = DatasetLayout::new("borough");
        let run = |seed| {
            let table = CannedTable::ok(csv_with_rows(50));
            let sampler = WindowSampler::new(&table, &layout, Duration::from_secs(1));
            let batch = sampler
                .sample("BROOKLYN", &window(), 10, 2, &mut StdRng::seed_from_u64(seed))
                .unwrap();
            let offset = table.queries.borrow()[0].offset_value();
            (batch.rows, offset)
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn offset_bound_can_be_narrowed() {
        let table = CannedTable::ok(csv_with_rows(1));
        let layout = DatasetLayout::new("borough");
        let sampler =
            WindowSampler::new(&table, &layout, Duration::from_secs(1)).with_max_offset(0);
        sampler
            .sample("BRONX", &window(), 1, 1, &mut StdRng::seed_from_u64(9))
            .unwrap();
        assert_eq!(table.queries.borrow()[0].offset_value(), Some(0));
    }
}

use std::cell::RefCell;
use std::collections::HashSet;
use std::time::Duration;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use strata::report::PartialCollectionWarning;
use strata::{
    AllocationEntry, AllocationPlan, DatasetLayout, DayStratifiedExecutor, DeterministicRng,
    FetchWindow, Pacer, PlanExecutor, RemoteTable, SoqlQuery, StratumCount, TransportError,
    TransportFailure, WindowSampler, allocate, choose_days,
};

/// Page fetches answer with `rows` distinct rows per stratum; listed strata fail.
struct ScriptedTable {
    rows: usize,
    failing: Vec<&'static str>,
    repeat_rows: bool,
    calls: RefCell<usize>,
}

impl ScriptedTable {
    fn new(rows: usize) -> Self {
        Self {
            rows,
            failing: Vec::new(),
            repeat_rows: false,
            calls: RefCell::new(0),
        }
    }
}

impl RemoteTable for ScriptedTable {
    fn fetch_csv(&self, query: &SoqlQuery, _timeout: Duration) -> Result<String, TransportFailure> {
        *self.calls.borrow_mut() += 1;
        let predicate = query.get("$where").unwrap_or_default();
        if self
            .failing
            .iter()
            .any(|stratum| predicate.ends_with(&format!("='{stratum}'")))
        {
            return Err(TransportFailure {
                error: TransportError::Status {
                    status: 504,
                    body: "gateway timeout".into(),
                },
                attempts: 1,
            });
        }
        let call = *self.calls.borrow();
        let mut body = String::from("unique_key,complaint_type\n");
        for idx in 0..self.rows {
            if self.repeat_rows {
                body.push_str(&format!("{idx},Noise\n"));
            } else {
                body.push_str(&format!("{call}-{idx},Noise\n"));
            }
        }
        Ok(body)
    }
}

struct NoPause;

impl Pacer for NoPause {
    fn pause(&self, _delay: Duration) {}
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn year_2024() -> FetchWindow {
    FetchWindow::from_years(2024, 2024).unwrap()
}

#[test]
fn allocation_sums_exactly_for_arbitrary_counts() {
    let mut rng = StdRng::seed_from_u64(2024);
    for _ in 0..500 {
        let strata = rng.random_range(1..=8);
        let counts: Vec<StratumCount> = (0..strata)
            .map(|idx| StratumCount::new(format!("s{idx}"), rng.random_range(0..50_000)))
            .collect();
        if counts.iter().all(|count| count.total == 0) {
            continue;
        }
        let target = rng.random_range(1..=20_000);
        let plan = allocate(&counts, target).unwrap();
        assert_eq!(plan.total(), target);
        assert_eq!(plan.len(), counts.len());
    }
}

#[test]
fn allocation_matches_reference_shapes() {
    let counts = |totals: &[u64]| -> Vec<StratumCount> {
        totals
            .iter()
            .enumerate()
            .map(|(idx, total)| StratumCount::new(format!("s{idx}"), *total))
            .collect()
    };
    assert_eq!(allocate(&counts(&[10, 20, 30]), 6).unwrap().sizes(), vec![1, 2, 3]);
    assert_eq!(allocate(&counts(&[1, 1, 1]), 10).unwrap().sizes(), vec![4, 3, 3]);
    assert_eq!(allocate(&counts(&[0, 5]), 5).unwrap().sizes(), vec![0, 5]);
    // The rounding remainder is applied to the first entry without clamping.
    assert_eq!(allocate(&counts(&[1, 1, 1, 1]), 2).unwrap().sizes(), vec![-1, 1, 1, 1]);
}

#[test]
fn window_sample_keeps_distinct_rows_up_to_target() {
    let table = ScriptedTable::new(250);
    let layout = DatasetLayout::new("borough");
    let sampler = WindowSampler::new(&table, &layout, Duration::from_secs(1));
    let batch = sampler
        .sample("BROOKLYN", &year_2024(), 100, 3, &mut DeterministicRng::new(11))
        .unwrap();
    assert_eq!(batch.len(), 100);
    let keys: HashSet<_> = batch
        .rows
        .iter()
        .map(|row| row.get("unique_key").unwrap().to_string())
        .collect();
    assert_eq!(keys.len(), 100);
}

#[test]
fn one_failing_stratum_of_three_leaves_the_others() {
    let mut table = ScriptedTable::new(40);
    table.failing.push("MANHATTAN");
    let layout = DatasetLayout::new("borough");
    let plan = AllocationPlan {
        entries: ["BRONX", "MANHATTAN", "QUEENS"]
            .into_iter()
            .map(|stratum| AllocationEntry {
                stratum_value: stratum.to_string(),
                sample_size: 10,
            })
            .collect(),
    };
    let executor = PlanExecutor::new(
        WindowSampler::new(&table, &layout, Duration::from_secs(1)),
        NoPause,
    );
    let sample = executor.execute(
        &plan,
        &year_2024(),
        Duration::ZERO,
        &mut DeterministicRng::new(5),
    );

    assert_eq!(sample.len(), 20);
    let by_stratum = sample.counts_by("borough");
    assert_eq!(by_stratum.get("BRONX"), Some(&10));
    assert_eq!(by_stratum.get("QUEENS"), Some(&10));
    assert_eq!(by_stratum.get("MANHATTAN"), None);
    assert_eq!(sample.report.failed(), 1);
    let warnings = sample.report.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(
        &warnings[0],
        PartialCollectionWarning::FetchFailed { stratum, .. } if stratum == "MANHATTAN"
    ));
}

#[test]
fn chosen_days_are_distinct_and_in_range() {
    let mut rng = DeterministicRng::new(99);
    for _ in 0..50 {
        let plan = choose_days(date(2024, 1, 1), date(2024, 1, 10), 5, &mut rng).unwrap();
        assert_eq!(plan.len(), 5);
        assert!(
            plan.iter()
                .all(|day| *day >= date(2024, 1, 1) && *day < date(2024, 1, 10))
        );
    }
}

#[test]
fn repeated_rows_across_days_are_kept_once() {
    let mut table = ScriptedTable::new(3);
    table.repeat_rows = true;
    let layout = DatasetLayout::new("borough");
    let executor = DayStratifiedExecutor::new(&table, &layout, NoPause);
    let days = choose_days(date(2024, 2, 1), date(2024, 3, 1), 4, &mut DeterministicRng::new(1))
        .unwrap();
    let sample = executor.execute(
        "BRONX",
        &days,
        10,
        Duration::from_secs(1),
        Duration::ZERO,
        &mut DeterministicRng::new(2),
    );
    assert_eq!(*table.calls.borrow(), 4);
    assert_eq!(sample.len(), 3);
    assert_eq!(sample.report.collected_rows, 12);
    assert_eq!(sample.report.duplicates_removed, 9);
}

#[test]
fn same_seed_reproduces_the_same_sample() {
    let layout = DatasetLayout::new("borough");
    let plan = AllocationPlan {
        entries: vec![AllocationEntry {
            stratum_value: "QUEENS".to_string(),
            sample_size: 15,
        }],
    };
    let run = |seed| {
        let table = ScriptedTable::new(60);
        let executor = PlanExecutor::new(
            WindowSampler::new(&table, &layout, Duration::from_secs(1)),
            NoPause,
        );
        executor
            .execute(&plan, &year_2024(), Duration::ZERO, &mut DeterministicRng::new(seed))
            .rows
    };
    assert_eq!(run(3), run(3));
    assert_ne!(run(3), run(4));
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::data::StratumCount;
use crate::types::StratumValue;

/// Aggregate skew metrics for per-stratum sample counts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StratumSkew {
    pub total: usize,
    pub strata: usize,
    pub min: usize,
    pub max: usize,
    pub mean: f64,
    pub max_share: f64,
    pub min_share: f64,
    pub ratio: f64,
    pub per_stratum: Vec<StratumShare>,
}

/// Per-stratum share of a sample, set against its share of the population.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StratumShare {
    pub stratum: StratumValue,
    pub count: usize,
    pub share: f64,
    /// Population share from the count query; `None` when the stratum was not counted.
    pub population_share: Option<f64>,
}

impl StratumShare {
    /// Realized share minus population share.
    pub fn deviation(&self) -> Option<f64> {
        self.population_share
            .map(|population_share| self.share - population_share)
    }
}

impl StratumSkew {
    /// Attach population shares from the count query to every stratum.
    pub fn with_population(mut self, population: &[StratumCount]) -> Self {
        let grand_total: u64 = population.iter().map(|count| count.total).sum();
        if grand_total == 0 {
            return self;
        }
        for entry in &mut self.per_stratum {
            entry.population_share = population
                .iter()
                .find(|count| count.stratum_value == entry.stratum)
                .map(|count| count.total as f64 / grand_total as f64);
        }
        self
    }

    /// Largest absolute gap between realized and population share.
    pub fn max_abs_deviation(&self) -> Option<f64> {
        self.per_stratum
            .iter()
            .filter_map(StratumShare::deviation)
            .map(f64::abs)
            .reduce(f64::max)
    }
}

/// Compute skew metrics from per-stratum counts.
pub fn stratum_skew(counts: &HashMap<StratumValue, usize>) -> Option<StratumSkew> {
    let min = *counts.values().min()?;
    let max = *counts.values().max()?;
    let total: usize = counts.values().sum();
    let strata = counts.len();
    let mean = total as f64 / strata as f64;
    let share_of = |count: usize| {
        if total == 0 {
            0.0
        } else {
            count as f64 / total as f64
        }
    };
    let ratio = if min == 0 {
        f64::INFINITY
    } else {
        max as f64 / min as f64
    };
    let mut per_stratum: Vec<StratumShare> = counts
        .iter()
        .map(|(stratum, count)| StratumShare {
            stratum: stratum.clone(),
            count: *count,
            share: share_of(*count),
            population_share: None,
        })
        .collect();
    per_stratum.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.stratum.cmp(&b.stratum)));
    Some(StratumSkew {
        total,
        strata,
        min,
        max,
        mean,
        max_share: share_of(max),
        min_share: share_of(min),
        ratio,
        per_stratum,
    })
}

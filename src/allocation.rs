use crate::constants::sampler::MAX_TARGET_SAMPLE;
use crate::data::{AllocationEntry, AllocationPlan, StratumCount};
use crate::errors::SamplingError;

/// Split `target` rows across strata in proportion to their population counts.
///
/// Each stratum receives `round(total / grand_total * target)` (half away from
/// zero). Whatever rounding leaves over, positive or negative, is added to the
/// first entry in input order so the plan sums to exactly `target`.
///
/// The remainder is not clamped: for adversarial inputs the first entry may
/// end up at zero or below. Executors skip non-positive entries.
pub fn allocate(counts: &[StratumCount], target: i64) -> Result<AllocationPlan, SamplingError> {
    if target <= 0 || target > MAX_TARGET_SAMPLE {
        return Err(SamplingError::InvalidInput(format!(
            "target sample must be in 1..={MAX_TARGET_SAMPLE}, got {target}"
        )));
    }
    let grand_total: u128 = counts.iter().map(|count| u128::from(count.total)).sum();
    if grand_total == 0 {
        return Err(SamplingError::InvalidInput(
            "no population counts to allocate".to_string(),
        ));
    }

    let mut entries: Vec<AllocationEntry> = counts
        .iter()
        .map(|count| {
            let share = count.total as f64 / grand_total as f64;
            AllocationEntry {
                stratum_value: count.stratum_value.clone(),
                sample_size: (share * target as f64).round() as i64,
            }
        })
        .collect();

    let overflow = || SamplingError::InvalidInput(format!("allocation of {target} overflows"));
    let assigned = entries
        .iter()
        .try_fold(0_i64, |sum, entry| sum.checked_add(entry.sample_size))
        .ok_or_else(overflow)?;
    let diff = target.checked_sub(assigned).ok_or_else(overflow)?;
    if diff != 0
        && let Some(first) = entries.first_mut()
    {
        first.sample_size = first.sample_size.checked_add(diff).ok_or_else(overflow)?;
    }

    Ok(AllocationPlan { entries })
}

/// Split `target` evenly over `parts` buckets, remainder on the first bucket.
///
/// Used to spread one stratum's budget over calendar months. Unlike
/// [`allocate`] this never produces a negative bucket.
pub fn split_evenly(target: i64, parts: usize) -> Result<Vec<i64>, SamplingError> {
    if target < 0 {
        return Err(SamplingError::InvalidInput(format!(
            "cannot split a negative budget ({target})"
        )));
    }
    let Ok(divisor) = i64::try_from(parts) else {
        return Err(SamplingError::InvalidInput(format!("too many parts ({parts})")));
    };
    if divisor == 0 {
        return Err(SamplingError::InvalidInput(
            "cannot split a budget over zero parts".to_string(),
        ));
    }
    let mut buckets = vec![target / divisor; parts];
    buckets[0] += target % divisor;
    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(totals: &[u64]) -> Vec<StratumCount> {
        totals
            .iter()
            .enumerate()
            .map(|(idx, total)| StratumCount::new(format!("s{idx}"), *total))
            .collect()
    }

    #[test]
    fn proportional_sizes_without_correction() {
        let plan = allocate(&counts(&[10, 20, 30]), 6).unwrap();
        assert_eq!(plan.sizes(), vec![1, 2, 3]);
        assert_eq!(plan.total(), 6);
    }

    #[test]
    fn remainder_lands_on_first_entry() {
        let plan = allocate(&counts(&[1, 1, 1]), 10).unwrap();
        assert_eq!(plan.sizes(), vec![4, 3, 3]);
    }

    #[test]
    fn negative_remainder_is_taken_from_first_entry() {
        // Each share rounds 0.5 up to 1, overshooting by 2.
        let plan = allocate(&counts(&[1, 1, 1, 1]), 2).unwrap();
        assert_eq!(plan.sizes(), vec![-1, 1, 1, 1]);
        assert_eq!(plan.total(), 2);
    }

    #[test]
    fn first_entry_is_by_input_order_not_magnitude() {
        let plan = allocate(&counts(&[1, 1000, 1000]), 4).unwrap();
        assert_eq!(plan.sizes(), vec![0, 2, 2]);
        let plan = allocate(&counts(&[1, 1, 998]), 7).unwrap();
        assert_eq!(plan.sizes(), vec![0, 0, 7]);
        let plan = allocate(&counts(&[2, 2, 1]), 8).unwrap();
        assert_eq!(plan.sizes(), vec![3, 3, 2]);
    }

    #[test]
    fn rejects_degenerate_inputs() {
        assert!(matches!(
            allocate(&counts(&[0, 0]), 10),
            Err(SamplingError::InvalidInput(_))
        ));
        assert!(allocate(&[], 10).is_err());
        assert!(allocate(&counts(&[1]), 0).is_err());
        assert!(allocate(&counts(&[1]), -3).is_err());
    }

    #[test]
    fn huge_targets_are_rejected_not_overflowed() {
        assert!(matches!(
            allocate(&counts(&[3, 5, 7]), i64::MAX),
            Err(SamplingError::InvalidInput(_))
        ));
        let plan = allocate(&counts(&[3, 5, 7]), MAX_TARGET_SAMPLE).unwrap();
        assert_eq!(plan.total(), MAX_TARGET_SAMPLE);
    }

    #[test]
    fn zero_total_strata_still_get_an_entry() {
        let plan = allocate(&counts(&[0, 5]), 3).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.sizes(), vec![0, 3]);
    }

    #[test]
    fn sums_are_exact_across_many_shapes() {
        let shapes: &[&[u64]] = &[
            &[7],
            &[3, 3, 3],
            &[1, 2, 3, 4, 5, 6, 7],
            &[999_983, 17, 1, 400_000],
            &[5, 0, 5, 0, 5],
        ];
        for shape in shapes {
            for target in [1_i64, 2, 9, 100, 10_001] {
                let plan = allocate(&counts(shape), target).unwrap();
                assert_eq!(plan.total(), target, "shape {shape:?} target {target}");
            }
        }
    }

    #[test]
    fn split_evenly_spreads_remainder_first() {
        assert_eq!(split_evenly(10, 3).unwrap(), vec![4, 3, 3]);
        assert_eq!(split_evenly(2, 4).unwrap(), vec![2, 0, 0, 0]);
        assert!(split_evenly(10, 0).is_err());
        assert!(split_evenly(-1, 2).is_err());
    }
}

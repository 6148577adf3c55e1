use chrono::NaiveDate;
use rand::Rng;
use rand::seq::IndexedRandom;

use crate::data::DayPlan;
use crate::errors::SamplingError;

/// Draw `min(k_days, available)` distinct days uniformly from `[start, end)`.
pub fn choose_days<R: Rng + ?Sized>(
    start: NaiveDate,
    end: NaiveDate,
    k_days: usize,
    rng: &mut R,
) -> Result<DayPlan, SamplingError> {
    if end <= start {
        return Err(SamplingError::InvalidRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    if k_days == 0 {
        return Err(SamplingError::InvalidInput(
            "k_days must be positive".to_string(),
        ));
    }
    let available: Vec<NaiveDate> = start.iter_days().take_while(|day| *day < end).collect();
    let amount = k_days.min(available.len());
    Ok(available.choose_multiple(rng, amount).copied().collect())
}

/// Rows to request per day: `floor(target * per_day_multiplier / days)`.
///
/// A multiplier above 1 over-requests slightly to absorb downstream filtering.
pub fn per_day_target(
    target: usize,
    per_day_multiplier: f64,
    days: usize,
) -> Result<usize, SamplingError> {
    if days == 0 {
        return Err(SamplingError::InvalidInput(
            "cannot spread a target over zero days".to_string(),
        ));
    }
    if !per_day_multiplier.is_finite() || per_day_multiplier <= 0.0 {
        return Err(SamplingError::InvalidInput(format!(
            "per-day multiplier must be positive, got {per_day_multiplier}"
        )));
    }
    Ok((target as f64 * per_day_multiplier / days as f64).floor() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn draws_requested_number_of_distinct_days_in_range() {
        let mut rng = StdRng::seed_from_u64(17);
        let plan = choose_days(date(2024, 1, 1), date(2024, 1, 10), 5, &mut rng).unwrap();
        assert_eq!(plan.len(), 5);
        assert!(
            plan.iter()
                .all(|day| *day >= date(2024, 1, 1) && *day < date(2024, 1, 10))
        );
    }

    #[test]
    fn caps_at_available_days() {
        let mut rng = StdRng::seed_from_u64(3);
        let plan = choose_days(date(2024, 2, 27), date(2024, 3, 2), 31, &mut rng).unwrap();
        assert_eq!(plan.len(), 4);
        assert!(plan.contains(&date(2024, 2, 29)));
        assert!(!plan.contains(&date(2024, 3, 2)));
    }

    #[test]
    fn rejects_empty_range_and_zero_days() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            choose_days(date(2024, 1, 5), date(2024, 1, 5), 2, &mut rng),
            Err(SamplingError::InvalidRange { .. })
        ));
        assert!(matches!(
            choose_days(date(2024, 1, 1), date(2024, 1, 5), 0, &mut rng),
            Err(SamplingError::InvalidInput(_))
        ));
    }

    #[test]
    fn every_day_is_eventually_drawn() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let plan = choose_days(date(2024, 6, 1), date(2024, 6, 11), 2, &mut rng).unwrap();
            seen.extend(plan.iter().copied());
        }
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn per_day_target_floors_after_multiplying() {
        assert_eq!(per_day_target(1000, 1.4, 12).unwrap(), 116);
        assert_eq!(per_day_target(10, 1.0, 3).unwrap(), 3);
        assert_eq!(per_day_target(1, 1.4, 5).unwrap(), 0);
        assert!(per_day_target(10, 1.4, 0).is_err());
        assert!(per_day_target(10, 0.0, 2).is_err());
    }
}

use serde::Serialize;
use thiserror::Error;

use crate::lib::model::SampleSeries;

/// Below this many samples a value is still produced but flagged for caution
pub const MIN_CONFIDENT_SAMPLES: usize = 2;

/// The series had no samples to rank
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("insufficient data: series has no samples")]
pub struct InsufficientData;

/// Summary of a sample series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsageStats {
    pub samples: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl UsageStats {
    pub fn from_series(series: &SampleSeries) -> Result<Self, InsufficientData> {
        let sorted = sorted_values(series)?;
        let avg = sorted.iter().sum::<f64>() / sorted.len() as f64;

        Ok(Self {
            samples: sorted.len(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            avg,
            p50: rank(&sorted, 50.0),
            p95: rank(&sorted, 95.0),
            p99: rank(&sorted, 99.0),
        })
    }

    pub fn is_low_confidence(&self) -> bool {
        self.samples < MIN_CONFIDENT_SAMPLES
    }
}

/// `p`-th percentile (0..=100) with linear interpolation between closest ranks.
///
/// Values are sorted first, so the result does not depend on arrival order.
pub fn percentile(series: &SampleSeries, p: f64) -> Result<f64, InsufficientData> {
    let sorted = sorted_values(series)?;
    Ok(rank(&sorted, p))
}

fn sorted_values(series: &SampleSeries) -> Result<Vec<f64>, InsufficientData> {
    if series.is_empty() {
        return Err(InsufficientData);
    }
    let mut values = series.values();
    values.sort_by(f64::total_cmp);
    Ok(values)
}

fn rank(sorted: &[f64], p: f64) -> f64 {
    let p = p.clamp(0.0, 100.0);
    let position = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn p95_interpolates_between_ranks() {
        let series = SampleSeries::from_values(&[0.1, 0.2, 0.3, 0.4, 0.5]);
        let p95 = percentile(&series, 95.0).unwrap();
        assert!((p95 - 0.48).abs() < 1e-9);
    }

    #[test]
    fn empty_series_is_insufficient() {
        assert_eq!(
            percentile(&SampleSeries::default(), 95.0),
            Err(InsufficientData)
        );
        assert!(UsageStats::from_series(&SampleSeries::default()).is_err());
    }

    #[test]
    fn single_sample_is_flagged_but_usable() {
        let stats = UsageStats::from_series(&SampleSeries::from_values(&[0.7])).unwrap();
        assert_eq!(stats.p95, 0.7);
        assert!(stats.is_low_confidence());
    }

    #[test]
    fn stats_summarise_series() {
        let stats =
            UsageStats::from_series(&SampleSeries::from_values(&[4.0, 1.0, 3.0, 2.0])).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.avg, 2.5);
        assert_eq!(stats.p50, 2.5);
        assert!(!stats.is_low_confidence());
    }

    proptest! {
        #[test]
        fn percentile_ignores_arrival_order(
            mut values in prop::collection::vec(0.0f64..1e9, 1..200),
            seed in any::<u64>(),
        ) {
            let expected = percentile(&SampleSeries::from_values(&values), 95.0).unwrap();

            // Deterministic shuffle driven by the generated seed
            let mut state = seed | 1;
            for i in (1..values.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                values.swap(i, (state % (i as u64 + 1)) as usize);
            }

            let shuffled = percentile(&SampleSeries::from_values(&values), 95.0).unwrap();
            prop_assert_eq!(expected, shuffled);
        }
    }
}

//! Summary statistics over timing samples
//!
//! Percentiles use the nearest-rank convention: the value is taken directly
//! from the sorted array, never interpolated (except the even-count median,
//! which is the mean of the two middle elements).

/// Average, median, and 95th percentile of one timing metric. All null when
/// no samples exist.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricSummary {
    pub avg: Option<f64>,
    pub median: Option<f64>,
    pub p95: Option<f64>,
}

pub fn summarize(values: &[i64]) -> MetricSummary {
    if values.is_empty() {
        return MetricSummary::default();
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();

    let avg = sorted.iter().sum::<i64>() as f64 / n as f64;

    let median = if n % 2 == 1 {
        sorted[n / 2] as f64
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0
    };

    let p95_idx = ((n - 1) as f64 * 0.95).floor() as usize;
    let p95 = sorted[p95_idx] as f64;

    MetricSummary {
        avg: Some(avg),
        median: Some(median),
        p95: Some(p95),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_five_samples() {
        // [10, 20, 30, 40, 50]: median 30, p95 at floor(4*0.95)=3 -> 40, avg 30.
        let summary = summarize(&[50, 10, 40, 20, 30]);
        assert_eq!(summary.avg, Some(30.0));
        assert_eq!(summary.median, Some(30.0));
        assert_eq!(summary.p95, Some(40.0));
    }

    #[test]
    fn test_even_count_median_is_mean_of_middles() {
        let summary = summarize(&[10, 20, 30, 40]);
        assert_eq!(summary.median, Some(25.0));
    }

    #[test]
    fn test_single_sample() {
        let summary = summarize(&[42]);
        assert_eq!(summary.avg, Some(42.0));
        assert_eq!(summary.median, Some(42.0));
        assert_eq!(summary.p95, Some(42.0));
    }

    #[test]
    fn test_empty_is_all_null() {
        assert_eq!(summarize(&[]), MetricSummary::default());
    }

    #[test]
    fn test_p95_is_nearest_rank_not_interpolated() {
        // 21 samples: floor(20*0.95)=19, the 20th element ascending.
        let values: Vec<i64> = (1..=21).collect();
        let summary = summarize(&values);
        assert_eq!(summary.p95, Some(20.0));
    }
}

//! Latency sample statistics

/// Summary of one candidate's stability re-scan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterStats {
    /// Mean latency in milliseconds
    pub mean: f64,
    /// Sample standard deviation in milliseconds
    pub stddev: f64,
    /// `mean + weight * stddev`
    pub score: f64,
}

impl JitterStats {
    /// Summarise `samples`; `None` when there are no samples
    pub fn from_samples(samples: &[f64], jitter_weight: f64) -> Option<Self> {
        let mean = mean(samples)?;
        let stddev = sample_stddev(samples, mean);
        Some(Self {
            mean,
            stddev,
            score: composite_score(mean, stddev, jitter_weight),
        })
    }
}

/// Arithmetic mean
pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// Sample (n - 1) standard deviation; zero for fewer than two samples
pub fn sample_stddev(samples: &[f64], mean: f64) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|s| (s - mean).powi(2)).sum();
    (sum_sq / (samples.len() - 1) as f64).sqrt()
}

/// Score that penalises jitter on top of the average
pub fn composite_score(mean: f64, stddev: f64, jitter_weight: f64) -> f64 {
    mean + jitter_weight * stddev
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_composite_score_penalises_jitter() {
        assert!(approx(composite_score(50.0, 40.0, 1.5), 110.0));
        assert!(approx(composite_score(55.0, 2.0, 1.5), 58.0));
    }

    #[test]
    fn test_mean_empty() {
        assert_eq!(mean(&[]), None);
        assert!(JitterStats::from_samples(&[], 1.5).is_none());
    }

    #[test]
    fn test_single_sample_has_no_jitter() {
        let stats = JitterStats::from_samples(&[42.0], 1.5).unwrap();
        assert!(approx(stats.mean, 42.0));
        assert!(approx(stats.stddev, 0.0));
        assert!(approx(stats.score, 42.0));
    }

    #[test]
    fn test_sample_stddev() {
        // deviations -2, 2, -2, 2 -> 16 / 3
        let samples = [53.0, 57.0, 53.0, 57.0];
        let stats = JitterStats::from_samples(&samples, 1.5).unwrap();
        assert!(approx(stats.mean, 55.0));
        assert!(approx(stats.stddev, (16.0f64 / 3.0).sqrt()));
    }
}

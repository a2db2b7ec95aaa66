/// ROI summary statistics over flattened voxel samples.
pub struct StatsHelper;

impl StatsHelper {
    pub fn mean(samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    pub fn median(samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }

    pub fn weighted_mean(samples: &[f64], weights: &[f64]) -> f64 {
        let weight_sum: f64 = weights.iter().sum();
        if samples.is_empty() || weight_sum == 0.0 {
            return 0.0;
        }
        let weighted_sum: f64 = samples
            .iter()
            .zip(weights.iter())
            .map(|(value, weight)| value * weight)
            .sum();
        weighted_sum / weight_sum
    }

    /// Weighted median: smallest sample whose cumulative weight reaches half
    /// of the total weight. When a sample's cumulative weight lands exactly
    /// on the midpoint, the result is the mean of that sample and the next.
    pub fn weighted_median(samples: &[f64], weights: &[f64]) -> f64 {
        if samples.is_empty() || samples.len() != weights.len() {
            return 0.0;
        }
        let mut pairs: Vec<(f64, f64)> = samples
            .iter()
            .copied()
            .zip(weights.iter().copied())
            .collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let total: f64 = pairs.iter().map(|(_, weight)| weight).sum();
        if total == 0.0 {
            return 0.0;
        }
        let midpoint = total / 2.0;

        let mut cumulative = 0.0;
        for (position, (value, weight)) in pairs.iter().enumerate() {
            cumulative += weight;
            if cumulative > midpoint {
                return *value;
            }
            if cumulative == midpoint {
                return match pairs.get(position + 1) {
                    Some((next, _)) => (value + next) / 2.0,
                    None => *value,
                };
            }
        }
        pairs[pairs.len() - 1].0
    }

    /// Round to two decimals, matching the precision the results protocol
    /// reports for the built-in statistics.
    pub fn round2(value: f64) -> f64 {
        (value * 100.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_empty_sequence_is_zero() {
        assert_eq!(StatsHelper::mean(&[]), 0.0);
    }

    #[test]
    fn mean_of_values() {
        assert_eq!(StatsHelper::mean(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn median_odd_and_even_lengths() {
        assert_eq!(StatsHelper::median(&[5.0, 1.0, 3.0]), 3.0);
        assert_eq!(StatsHelper::median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn weighted_mean_respects_weights() {
        let samples = [10.0, 20.0];
        let weights = [3.0, 1.0];
        assert_eq!(StatsHelper::weighted_mean(&samples, &weights), 12.5);
    }

    #[test]
    fn weighted_median_with_dominant_weight() {
        let samples = [1.0, 2.0, 3.0];
        let weights = [0.1, 0.1, 10.0];
        assert_eq!(StatsHelper::weighted_median(&samples, &weights), 3.0);
    }

    #[test]
    fn weighted_median_splits_on_exact_midpoint() {
        let samples = [1.0, 2.0];
        let weights = [1.0, 1.0];
        assert_eq!(StatsHelper::weighted_median(&samples, &weights), 1.5);
    }

    #[test]
    fn round2_truncates_to_cents() {
        assert_eq!(StatsHelper::round2(1000.126), 1000.13);
        assert_eq!(StatsHelper::round2(3.14159), 3.14);
    }
}

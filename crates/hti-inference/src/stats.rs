//! Numerical helpers shared by the calculators and the rebuilder.

/// Standard normal CDF.
pub fn normal_cdf(x: f64) -> f64 {
    // Φ(x) = 0.5 * erfc(-x / sqrt(2)) keeps precision in the tails.
    0.5 * statrs::function::erf::erfc(-x / std::f64::consts::SQRT_2)
}

/// Right-tail probability from counts, with add-one smoothing.
pub fn tail_prob_counts(n_ge: usize, n_valid: usize) -> f64 {
    if n_valid == 0 {
        return 0.0;
    }
    // Add-one smoothing to avoid exact 0/1 tail-probabilities.
    (n_ge as f64 + 1.0) / (n_valid as f64 + 1.0)
}

/// Right-tail probability `P(X >= threshold)` of an ascending sample.
pub fn tail_prob_sorted(sorted: &[f64], threshold: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let idx = sorted.partition_point(|v| *v < threshold);
    tail_prob_counts(n - idx, n)
}

/// Binomial standard error of a tail probability estimated from `n` toys.
pub fn binomial_error(p: f64, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    (p * (1.0 - p) / n as f64).max(0.0).sqrt()
}

/// Empirical quantile of an ascending sample with linear-interpolated rank.
///
/// `idx = p * (n - 1)`; `p` outside [0, 1] is clamped. Empty input gives NaN.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 1.0 {
        return sorted[n - 1];
    }
    let idx = p * ((n - 1) as f64);
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let w = idx - (lo as f64);
    sorted[lo] + w * (sorted[hi] - sorted[lo])
}

/// Sort a sample ascending, dropping non-finite values.
pub fn sorted_finite(values: impl IntoIterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.into_iter().filter(|x| x.is_finite()).collect();
    v.sort_by(f64::total_cmp);
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn normal_cdf_reference_values() {
        assert_relative_eq!(normal_cdf(0.0), 0.5, epsilon = 1e-15);
        assert_relative_eq!(normal_cdf(-1.0), 0.158_655_253_931_457_05, epsilon = 1e-12);
        assert_relative_eq!(normal_cdf(2.0), 0.977_249_868_051_820_8, epsilon = 1e-12);
    }

    #[test]
    fn tail_prob_uses_add_one_smoothing() {
        let sorted = [0.0, 1.0, 2.0, 3.0];
        // Two values >= 2.0 out of four.
        assert_relative_eq!(tail_prob_sorted(&sorted, 2.0), 3.0 / 5.0);
        assert_relative_eq!(tail_prob_sorted(&sorted, 10.0), 1.0 / 5.0);
        assert_eq!(tail_prob_sorted(&[], 1.0), 0.0);
    }

    #[test]
    fn quantile_linear_rank() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_relative_eq!(quantile_sorted(&sorted, 0.5), 50.5, epsilon = 1e-12);
        assert_relative_eq!(quantile_sorted(&sorted, 0.16), 16.84, epsilon = 1e-9);
        assert_relative_eq!(quantile_sorted(&sorted, 0.84), 84.16, epsilon = 1e-9);
        assert_eq!(quantile_sorted(&sorted, 0.0), 1.0);
        assert_eq!(quantile_sorted(&sorted, 1.5), 100.0);
        assert!(quantile_sorted(&[], 0.5).is_nan());
    }

    #[test]
    fn sorted_finite_drops_nan() {
        assert_eq!(sorted_finite([3.0, f64::NAN, 1.0, f64::INFINITY, 2.0]), vec![1.0, 2.0, 3.0]);
    }
}

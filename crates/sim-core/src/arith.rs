//! Numerically careful helpers used across the resource model.

/// Generic epsilon for floating-point comparisons.
pub const EPS: f64 = 1e-6;

/// Epsilon used by resource quantities (kg or the product's declared unit).
pub const EPS_RSRC: f64 = 1e-6;

/// Returns true if `d` is below `-EPS`.
pub fn is_negative(d: f64) -> bool {
    d < -EPS
}

/// Returns true if two doubles are within [`EPS`] of one another.
pub fn almost_eq_dbl(d1: f64, d2: f64) -> bool {
    (d1 - d2).abs() < EPS
}

/// Sums `input` with Kahan compensation, after sorting ascending so small
/// terms accumulate before large ones swallow their low-order bits.
pub fn kahan_sum(mut input: Vec<f64>) -> f64 {
    input.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut sum = 0.0;
    // Running compensation for lost low-order bits.
    let mut c = 0.0;
    for x in input {
        let y = x - c;
        let t = sum + y;
        // (t - sum) recovers the high-order part of y; subtracting y
        // recovers -(low part of y).
        c = (t - sum) - y;
        sum = t;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sum_is_zero() {
        assert_eq!(kahan_sum(vec![]), 0.0);
    }

    #[test]
    fn compensates_small_terms() {
        // 1e16 + 1.0 + 1.0 naively loses one of the ones.
        let vals = vec![1e16, 1.0, 1.0];
        let sum = kahan_sum(vals);
        assert_eq!(sum, 1e16 + 2.0);
    }

    #[test]
    fn negativity_uses_eps() {
        assert!(!is_negative(-0.5 * EPS));
        assert!(is_negative(-2.0 * EPS));
    }
}

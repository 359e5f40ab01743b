//! Indicator math used by the strategies.

pub mod atr;

/// Default epsilon for float comparisons in indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-9;

#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() <= epsilon,
        "expected {expected}, got {actual} (epsilon {epsilon})"
    );
}

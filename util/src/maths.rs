//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::{Float, FloatConst};

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float,
{
    target_range.0
        + ((value - source_range.0) * (target_range.1 - target_range.0)
            / (source_range.1 - source_range.0))
}

/// Clamp a value into `[min, max]`.
///
/// NaN values are passed through unchanged so that callers can detect them.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float,
{
    if value > max {
        max
    } else if value < min {
        min
    } else {
        value
    }
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
///
/// In particular, the return value `r` satisfies `0.0 <= r < rhs.abs()` in
/// most cases. However, due to a floating point round-off error it can
/// result in `r == rhs.abs()` if `lhs` is much smaller than `rhs.abs()` in
/// magnitude and `lhs < 0.0`.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float,
{
    let r = lhs % rhs;
    if r < T::zero() {
        r + rhs.abs()
    } else {
        r
    }
}

/// Wrap an angle into the range `[-pi, pi)`.
pub fn wrap_to_pi<T>(angle: T) -> T
where
    T: Float + FloatConst,
{
    rem_euclid(angle + T::PI(), T::TAU()) - T::PI()
}

/// Evaluate a polynomial with coefficients in ascending order of power, using Horner's method.
pub fn poly_eval<T>(coeffs: &[T], x: T) -> T
where
    T: Float,
{
    coeffs.iter().rev().fold(T::zero(), |acc, &c| acc * x + c)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_lin_map() {
        assert_eq!(lin_map((0f64, 10f64), (0f64, 1f64), 5f64), 0.5);
        assert_eq!(lin_map((-0.5f64, 0.5f64), (-1f64, 1f64), 0.25f64), 0.5);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(2f64, -1f64, 1f64), 1f64);
        assert_eq!(clamp(-2f64, -1f64, 1f64), -1f64);
        assert_eq!(clamp(0.3f64, -1f64, 1f64), 0.3f64);
        assert!(clamp(f64::NAN, -1f64, 1f64).is_nan());
    }

    #[test]
    fn test_wrap_to_pi() {
        assert!((wrap_to_pi(0.5f64) - 0.5).abs() < 1e-12);
        assert!((wrap_to_pi(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
        assert!((wrap_to_pi(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-12);
        assert!((wrap_to_pi(4.0 * PI + 0.1) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_poly_eval() {
        // 1 + 2x + 3x^2
        assert_eq!(poly_eval(&[1f64, 2f64, 3f64], 2f64), 17f64);
        assert_eq!(poly_eval::<f64>(&[], 2f64), 0f64);
    }
}

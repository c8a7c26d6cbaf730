//! # Reference curve fitting
//!
//! The reference path is a polynomial `y = c0 + c1 x + c2 x^2 + c3 x^3` in the vehicle frame,
//! fitted through the transformed waypoints by linear least squares.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::frame::Point2;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of stored coefficients, fits of a lower degree are zero padded.
pub const NUM_COEFFS: usize = 4;

/// Highest supported fit degree.
pub const MAX_DEGREE: usize = NUM_COEFFS - 1;

/// Diagonal entries of R smaller than this (relative to the largest) mark a rank deficient fit.
const RANK_TOL: f64 = 1e-10;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A cubic reference curve, with coefficients ordered from the constant term upward.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RefCurve {
    pub coeffs: [f64; NUM_COEFFS],
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur while fitting a [`RefCurve`].
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FitError {
    #[error("Expected at least {required} points to fit the curve, found {found}")]
    InsufficientPoints { required: usize, found: usize },

    #[error("The fit is singular, the points do not have enough distinct x values")]
    SingularFit,

    #[error("Polynomial degree must be between 1 and 3, got {0}")]
    InvalidDegree(usize),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RefCurve {
    pub fn from_coeffs(coeffs: [f64; NUM_COEFFS]) -> Self {
        Self { coeffs }
    }

    /// Fit a polynomial of the given degree through the points.
    ///
    /// The Vandermonde system is solved with a Householder QR decomposition rather than the normal
    /// equations.
    pub fn fit(points: &[Point2<f64>], degree: usize) -> Result<Self, FitError> {
        if degree < 1 || degree > MAX_DEGREE {
            return Err(FitError::InvalidDegree(degree));
        }

        let num_cols = degree + 1;

        if points.len() < num_cols {
            return Err(FitError::InsufficientPoints {
                required: num_cols,
                found: points.len(),
            });
        }

        // Design matrix, column i holds x^i
        let a = DMatrix::from_fn(points.len(), num_cols, |r, c| points[r].x.powi(c as i32));
        let b = DVector::from_iterator(points.len(), points.iter().map(|p| p.y));

        let qr = a.qr();
        let r = qr.r();

        let r_max = r.diagonal().amax();
        if !(r_max > 0.0) || r.diagonal().iter().any(|d| d.abs() < RANK_TOL * r_max) {
            return Err(FitError::SingularFit);
        }

        let qt_b = qr.q().transpose() * b;
        let sol = r
            .solve_upper_triangular(&qt_b)
            .ok_or(FitError::SingularFit)?;

        if sol.iter().any(|c| !c.is_finite()) {
            return Err(FitError::SingularFit);
        }

        let mut coeffs = [0f64; NUM_COEFFS];
        coeffs[..num_cols].copy_from_slice(sol.as_slice());

        Ok(Self { coeffs })
    }

    /// Evaluate the curve at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        util::maths::poly_eval(&self.coeffs, x)
    }

    /// The first derivative of the curve at `x`. At `x = 0` this is exactly `coeffs[1]`.
    pub fn derivative_at(&self, x: f64) -> f64 {
        self.derivative().eval(x)
    }

    /// The derivative of this curve, which is itself a (lower degree) curve.
    pub fn derivative(&self) -> Self {
        let mut coeffs = [0f64; NUM_COEFFS];

        for i in 1..NUM_COEFFS {
            coeffs[i - 1] = self.coeffs[i] * i as f64;
        }

        Self { coeffs }
    }

    /// Sample `count` points along the curve, `spacing` apart in x, starting one spacing ahead of
    /// the origin.
    pub fn sample(&self, spacing: f64, count: usize) -> Vec<Point2<f64>> {
        (1..=count)
            .map(|i| {
                let x = spacing * i as f64;
                Point2::new(x, self.eval(x))
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_points(curve: &RefCurve, xs: &[f64]) -> Vec<Point2<f64>> {
        xs.iter().map(|&x| Point2::new(x, curve.eval(x))).collect()
    }

    #[test]
    fn test_recover_cubic() {
        let truth = RefCurve::from_coeffs([1.5, -0.3, 0.02, -0.001]);
        let pts = sample_points(&truth, &[-5.0, 0.0, 4.0, 10.0, 17.0, 25.0, 40.0]);

        let fit = RefCurve::fit(&pts, 3).unwrap();

        for i in 0..NUM_COEFFS {
            assert!(
                (fit.coeffs[i] - truth.coeffs[i]).abs() < 1e-8,
                "Coefficient {} differs: {} vs {}",
                i,
                fit.coeffs[i],
                truth.coeffs[i]
            );
        }
    }

    #[test]
    fn test_exact_fit_min_points() {
        let truth = RefCurve::from_coeffs([0.0, 0.0, 0.02, 0.0]);
        let pts = sample_points(&truth, &[10.0, 20.0, 30.0]);

        let fit = RefCurve::fit(&pts, 2).unwrap();

        assert!(fit.coeffs[0].abs() < 1e-9);
        assert!(fit.coeffs[1].abs() < 1e-9);
        assert!((fit.coeffs[2] - 0.02).abs() < 1e-12);
        assert_eq!(fit.coeffs[3], 0.0);
    }

    #[test]
    fn test_least_squares_line() {
        // Symmetric noise about y = 2 + x
        let pts = vec![
            Point2::new(0.0, 2.1),
            Point2::new(1.0, 2.9),
            Point2::new(2.0, 4.1),
            Point2::new(3.0, 4.9),
        ];

        let fit = RefCurve::fit(&pts, 1).unwrap();

        assert!((fit.coeffs[0] - 2.06).abs() < 1e-9);
        assert!((fit.coeffs[1] - 0.96).abs() < 1e-9);
    }

    #[test]
    fn test_derivative() {
        let c = RefCurve::from_coeffs([3.0, -0.7, 0.25, 0.125]);

        assert_eq!(c.derivative_at(0.0), c.coeffs[1]);
        assert_eq!(c.derivative().coeffs, [-0.7, 0.5, 0.375, 0.0]);
        assert!((c.derivative_at(2.0) - (-0.7 + 1.0 + 1.5)).abs() < 1e-12);

        let fit = RefCurve::fit(
            &sample_points(&c, &[1.0, 2.0, 3.5, 5.0, 8.0]),
            3,
        )
        .unwrap();
        assert_eq!(fit.derivative_at(0.0), fit.coeffs[1]);
    }

    #[test]
    fn test_insufficient_points() {
        let pts = vec![Point2::new(1.0, 1.0), Point2::new(2.0, 2.0)];

        assert_eq!(
            RefCurve::fit(&pts, 3),
            Err(FitError::InsufficientPoints {
                required: 4,
                found: 2
            })
        );
        assert_eq!(
            RefCurve::fit(&[], 1),
            Err(FitError::InsufficientPoints {
                required: 2,
                found: 0
            })
        );
    }

    #[test]
    fn test_singular_fit() {
        let pts = vec![
            Point2::new(5.0, 1.0),
            Point2::new(5.0, 2.0),
            Point2::new(5.0, 3.0),
            Point2::new(5.0, 4.0),
        ];

        assert_eq!(RefCurve::fit(&pts, 3), Err(FitError::SingularFit));
        assert_eq!(RefCurve::fit(&pts, 1), Err(FitError::SingularFit));
    }

    #[test]
    fn test_invalid_degree() {
        let pts = vec![Point2::new(1.0, 1.0); 6];

        assert_eq!(RefCurve::fit(&pts, 0), Err(FitError::InvalidDegree(0)));
        assert_eq!(RefCurve::fit(&pts, 4), Err(FitError::InvalidDegree(4)));
    }

    #[test]
    fn test_sample() {
        let c = RefCurve::from_coeffs([1.0, 0.5, 0.0, 0.0]);
        let s = c.sample(2.5, 4);

        assert_eq!(s.len(), 4);
        assert_eq!(s[0], Point2::new(2.5, 2.25));
        assert_eq!(s[3], Point2::new(10.0, 6.0));
    }
}

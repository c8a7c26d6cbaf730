//! # Box constrained quadratic programs
//!
//! Solves `min 0.5 x' H x + g' x` subject to `lb <= x <= ub` with a projected Newton method. At
//! each iteration the variables held at a bound by the gradient form the binding set, a Newton
//! step is taken in the remaining free variables and the step is projected back onto the box with
//! an Armijo backtracking search.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use nalgebra::{DMatrix, DVector};
use std::time::Instant;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Sufficient decrease factor of the projected line search.
const ARMIJO_SIGMA: f64 = 1e-4;

/// Smallest step length tried by the projected line search.
const MIN_STEP: f64 = 1e-12;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A box constrained QP. `h` must be symmetric positive definite.
#[derive(Debug, Clone)]
pub struct BoxQp {
    pub h: DMatrix<f64>,
    pub g: DVector<f64>,
    pub lb: DVector<f64>,
    pub ub: DVector<f64>,
}

/// Result of a QP solve.
#[derive(Debug, Clone)]
pub struct QpSolution {
    pub x: DVector<f64>,

    /// Objective value at `x`.
    pub obj: f64,

    pub num_iters: usize,

    /// True if the projected gradient met the tolerance within the iteration budget.
    pub converged: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QpError {
    #[error("QP dimensions do not agree")]
    DimensionMismatch,

    #[error("QP bounds are inconsistent or not finite")]
    InvalidBounds,

    #[error("QP Hessian is not positive definite over the free variables")]
    NotPositiveDefinite,

    #[error("QP produced a non-finite value")]
    NonFinite,

    #[error("QP deadline exceeded")]
    DeadlineExceeded,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl BoxQp {
    /// Objective value at `x`.
    pub fn objective(&self, x: &DVector<f64>) -> f64 {
        0.5 * x.dot(&(&self.h * x)) + self.g.dot(x)
    }

    /// Project `x` onto the box.
    pub fn project(&self, x: &DVector<f64>) -> DVector<f64> {
        x.zip_zip_map(&self.lb, &self.ub, |v, l, u| v.max(l).min(u))
    }

    /// Solve the QP starting from `x0`, which is first projected onto the box.
    ///
    /// If a `deadline` is given and passes before the solve finishes,
    /// [`QpError::DeadlineExceeded`] is returned.
    pub fn solve(
        &self,
        x0: &DVector<f64>,
        max_iters: usize,
        tol: f64,
        deadline: Option<Instant>,
    ) -> Result<QpSolution, QpError> {
        let n = self.g.len();
        if self.h.nrows() != n
            || self.h.ncols() != n
            || self.lb.len() != n
            || self.ub.len() != n
            || x0.len() != n
        {
            return Err(QpError::DimensionMismatch);
        }
        if self
            .lb
            .iter()
            .zip(self.ub.iter())
            .any(|(l, u)| !(l <= u) || !l.is_finite() || !u.is_finite())
        {
            return Err(QpError::InvalidBounds);
        }

        let mut x = self.project(x0);
        let mut obj = self.objective(&x);

        for iter in 0..max_iters {
            if deadline.map_or(false, |d| Instant::now() >= d) {
                return Err(QpError::DeadlineExceeded);
            }

            let grad = &self.h * &x + &self.g;

            if !obj.is_finite() || grad.iter().any(|g| !g.is_finite()) {
                return Err(QpError::NonFinite);
            }

            // Variables held at a bound by the gradient are fixed for this iteration
            let free: Vec<usize> = (0..n)
                .filter(|&i| {
                    let at_lower = x[i] <= self.lb[i] && grad[i] > 0.0;
                    let at_upper = x[i] >= self.ub[i] && grad[i] < 0.0;
                    !(at_lower || at_upper)
                })
                .collect();

            let proj_grad_norm = free.iter().fold(0f64, |m, &i| m.max(grad[i].abs()));

            trace!(
                "QP iteration {}: obj = {:.6e}, free = {}/{}, |pg| = {:.3e}",
                iter,
                obj,
                free.len(),
                n,
                proj_grad_norm
            );

            if proj_grad_norm <= tol {
                return Ok(QpSolution {
                    x,
                    obj,
                    num_iters: iter,
                    converged: true,
                });
            }

            // Newton step over the free variables
            let h_ff = DMatrix::from_fn(free.len(), free.len(), |r, c| self.h[(free[r], free[c])]);
            let g_f = DVector::from_iterator(free.len(), free.iter().map(|&i| -grad[i]));

            let d_f = h_ff
                .cholesky()
                .ok_or(QpError::NotPositiveDefinite)?
                .solve(&g_f);

            let mut dir = DVector::zeros(n);
            for (k, &i) in free.iter().enumerate() {
                dir[i] = d_f[k];
            }

            // Projected backtracking
            let mut step = 1.0;
            let mut accepted = None;

            while step >= MIN_STEP {
                let candidate = self.project(&(&x + &dir * step));
                let cand_obj = self.objective(&candidate);
                let decrease = grad.dot(&(&candidate - &x));

                if cand_obj <= obj + ARMIJO_SIGMA * decrease {
                    accepted = Some((candidate, cand_obj));
                    break;
                }

                step *= 0.5;
            }

            match accepted {
                Some((candidate, cand_obj)) => {
                    x = candidate;
                    obj = cand_obj;
                }
                // No further decrease is possible at this precision
                None => {
                    return Ok(QpSolution {
                        x,
                        obj,
                        num_iters: iter + 1,
                        converged: false,
                    })
                }
            }
        }

        Ok(QpSolution {
            x,
            obj,
            num_iters: max_iters,
            converged: false,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn qp_2d(lb: f64, ub: f64) -> BoxQp {
        BoxQp {
            h: DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 2.0]),
            g: DVector::from_row_slice(&[-1.0, -1.0]),
            lb: DVector::from_element(2, lb),
            ub: DVector::from_element(2, ub),
        }
    }

    #[test]
    fn test_unconstrained_minimum() {
        let qp = qp_2d(-10.0, 10.0);
        let sol = qp.solve(&DVector::zeros(2), 50, 1e-12, None).unwrap();

        // H x = -g gives x = [1/7, 3/7]
        assert!(sol.converged);
        assert!((sol.x[0] - 1.0 / 7.0).abs() < 1e-10);
        assert!((sol.x[1] - 3.0 / 7.0).abs() < 1e-10);
        assert!(sol.num_iters <= 2);
    }

    #[test]
    fn test_active_bound() {
        // The unconstrained minimum has x1 = 3/7, clamp it at 0.2. The remaining variable then
        // minimises 2 x0^2 + 0.2 x0 - x0, so x0 = 0.2.
        let qp = qp_2d(-1.0, 0.2);
        let sol = qp.solve(&DVector::from_row_slice(&[-1.0, -1.0]), 50, 1e-12, None).unwrap();

        assert!(sol.converged);
        assert!((sol.x[1] - 0.2).abs() < 1e-12);
        assert!((sol.x[0] - 0.2).abs() < 1e-10);
    }

    #[test]
    fn test_start_outside_box() {
        let qp = qp_2d(-0.05, 0.05);
        let sol = qp.solve(&DVector::from_row_slice(&[5.0, -5.0]), 50, 1e-12, None).unwrap();

        assert!(sol.converged);
        assert!(sol.x.iter().all(|v| *v >= -0.05 && *v <= 0.05));
        assert!((sol.x[0] - 0.05).abs() < 1e-12);
        assert!((sol.x[1] - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_not_positive_definite() {
        let qp = BoxQp {
            h: DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]),
            g: DVector::from_row_slice(&[1.0, 1.0]),
            lb: DVector::from_element(2, -1.0),
            ub: DVector::from_element(2, 1.0),
        };

        assert_eq!(
            qp.solve(&DVector::zeros(2), 10, 1e-9, None).unwrap_err(),
            QpError::NotPositiveDefinite
        );
    }

    #[test]
    fn test_bad_inputs() {
        let mut qp = qp_2d(1.0, -1.0);
        assert_eq!(
            qp.solve(&DVector::zeros(2), 10, 1e-9, None).unwrap_err(),
            QpError::InvalidBounds
        );

        qp.ub = DVector::from_element(3, 1.0);
        assert_eq!(
            qp.solve(&DVector::zeros(2), 10, 1e-9, None).unwrap_err(),
            QpError::DimensionMismatch
        );
    }

    #[test]
    fn test_deadline() {
        let qp = qp_2d(-10.0, 10.0);

        assert_eq!(
            qp.solve(&DVector::zeros(2), 50, 1e-12, Some(Instant::now()))
                .unwrap_err(),
            QpError::DeadlineExceeded
        );

        let later = Instant::now() + std::time::Duration::from_secs(10);
        assert!(qp.solve(&DVector::zeros(2), 50, 1e-12, Some(later)).unwrap().converged);
    }
}

//! # Trajectory optimiser
//!
//! Finds the actuation sequence minimising the tracking cost over the prediction horizon, subject
//! to the bicycle model dynamics and the actuator bounds.
//!
//! The problem is solved by sequential quadratic programming over the actuations. The first state
//! is pinned to the input state and every iterate is a rollout of the model, so the dynamics hold
//! at every accepted iterate. At each iteration the dynamics are linearised about the current
//! trajectory, the state deviations are condensed onto the actuation deviations
//! (`ds = M du`), and the box constrained QP
//!
//! ```text
//! min  0.5 du' (M' Q M + R) du + (M' Q r + R u)' du
//! s.t. u_min - u <= du <= u_max - u
//! ```
//!
//! gives the step, which is then shortened by a backtracking search on the true cost.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use nalgebra::{DMatrix, DVector, Dyn, OMatrix, Vector2, Vector6, U6};
use std::time::{Duration, Instant};

use super::{
    model::{
        Actuation, BicycleModel, VehicleState, ACT_DIM, IDX_ACCEL, IDX_CTE, IDX_EPSI, IDX_STEER,
        IDX_V, IDX_X, IDX_Y, STATE_DIM,
    },
    qp::{BoxQp, QpError},
    MpcCtrlError, Params,
};
use crate::{frame::Point2, poly::RefCurve};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Sufficient decrease factor of the SQP line search.
const ARMIJO_SIGMA: f64 = 1e-4;

/// Smallest step length tried by the SQP line search.
const MIN_STEP: f64 = 1e-8;

/// Number of penalised residuals per state (speed error, cte, epsi).
const NUM_RESIDUALS: usize = 3;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The trajectory optimiser.
///
/// Holds only its configuration, each call to [`TrajectoryOptimizer::solve`] is independent.
#[derive(Debug, Clone)]
pub struct TrajectoryOptimizer {
    params: Params,
    model: BicycleModel,

    /// Quadratic actuation cost `u' P u`, covering magnitude and rate terms.
    act_cost: DMatrix<f64>,

    lb: DVector<f64>,
    ub: DVector<f64>,
}

/// The optimal plan over the horizon.
#[derive(Debug, Clone)]
pub struct MpcSolution {
    /// The first actuation of the plan, the only one which should be applied.
    pub actuation: Actuation,

    /// Predicted positions of the vehicle, one per horizon state, starting with the input state.
    pub path: Vec<Point2<f64>>,

    pub num_iters: usize,

    /// Cost of the plan.
    pub cost: f64,

    /// Units: seconds
    pub solve_time_s: f64,
}

/// A trajectory produced by rolling the model out from the pinned state.
struct Rollout {
    states: Vec<Vector6<f64>>,
    cost: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur during a solve.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SolveError {
    #[error("The solver diverged: {0}")]
    SolverDiverged(String),

    #[error("The solver did not converge within its budget ({num_iters} iterations, {elapsed_s:.4} s)")]
    SolverTimeout { num_iters: usize, elapsed_s: f64 },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TrajectoryOptimizer {
    /// Create a new optimiser, validating the parameters.
    pub fn new(params: &Params) -> Result<Self, MpcCtrlError> {
        params.validate()?;

        Ok(Self::from_valid(params))
    }

    /// Create a new optimiser from parameters which are already known to be valid.
    pub(super) fn from_valid(params: &Params) -> Self {
        let num_act = params.num_actuations();
        let n_u = num_act * ACT_DIM;
        let w = &params.weights;

        let mut act_cost = DMatrix::zeros(n_u, n_u);

        for k in 0..num_act {
            act_cost[(k * ACT_DIM + IDX_STEER, k * ACT_DIM + IDX_STEER)] += w.steer;
            act_cost[(k * ACT_DIM + IDX_ACCEL, k * ACT_DIM + IDX_ACCEL)] += w.accel;
        }

        // Rate terms (u_{k+1} - u_k)^2
        for k in 0..num_act.saturating_sub(1) {
            for &(idx, weight) in [(IDX_STEER, w.steer_rate), (IDX_ACCEL, w.accel_rate)].iter() {
                let i = k * ACT_DIM + idx;
                let j = (k + 1) * ACT_DIM + idx;

                act_cost[(i, i)] += weight;
                act_cost[(j, j)] += weight;
                act_cost[(i, j)] -= weight;
                act_cost[(j, i)] -= weight;
            }
        }

        let lb = DVector::from_fn(n_u, |i, _| match i % ACT_DIM {
            IDX_STEER => -params.max_steer_rad,
            _ => -params.max_decel_mss,
        });
        let ub = DVector::from_fn(n_u, |i, _| match i % ACT_DIM {
            IDX_STEER => params.max_steer_rad,
            _ => params.max_accel_mss,
        });

        Self {
            params: params.clone(),
            model: BicycleModel {
                lf_m: params.lf_m,
                dt_s: params.step_s,
            },
            act_cost,
            lb,
            ub,
        }
    }

    /// Solve for the optimal plan starting from `state`, tracking `curve`.
    ///
    /// The solve is abandoned with [`SolveError::SolverTimeout`] as soon as either the iteration
    /// or the wall clock budget runs out, including part way through an iteration.
    pub fn solve(&self, state: &VehicleState, curve: &RefCurve) -> Result<MpcSolution, SolveError> {
        let start = Instant::now();
        let sp = &self.params.solver;
        let n_u = self.lb.len();

        // No deadline if the budget can't be represented
        let deadline = Duration::try_from_secs_f64(sp.max_solve_time_s)
            .ok()
            .and_then(|d| start.checked_add(d));
        let expired = || deadline.map_or(false, |d| Instant::now() >= d);
        let timeout = |num_iters| SolveError::SolverTimeout {
            num_iters,
            elapsed_s: start.elapsed().as_secs_f64(),
        };

        let s0 = state.to_vector();
        if s0.iter().any(|e| !e.is_finite()) {
            return Err(SolveError::SolverDiverged(
                "input state is not finite".into(),
            ));
        }

        // Start from zero actuation, which is always within the bounds
        let mut u = DVector::zeros(n_u);
        let mut traj = self.rollout(&s0, &u, curve);
        check_finite(&traj)?;

        let mut converged = false;
        let mut num_iters = 0;

        while num_iters < sp.max_iters {
            if expired() {
                return Err(timeout(num_iters));
            }

            num_iters += 1;

            // ---- QP SUBPROBLEM ----

            let (mut h, g) = self.quadratic_model(&traj, &u, curve);
            for i in 0..n_u {
                h[(i, i)] += sp.hessian_reg;
            }

            let qp = BoxQp {
                h,
                g,
                lb: &self.lb - &u,
                ub: &self.ub - &u,
            };

            let du = match qp.solve(&DVector::zeros(n_u), sp.qp_max_iters, sp.qp_tol, deadline) {
                Ok(sol) => sol.x,
                Err(QpError::DeadlineExceeded) => return Err(timeout(num_iters)),
                Err(e) => {
                    return Err(SolveError::SolverDiverged(format!("QP failed: {}", e)))
                }
            };

            let du_max = du.amax();
            let slope = qp.g.dot(&du);

            trace!(
                "SQP iteration {}: cost = {:.6e}, |du| = {:.3e}, slope = {:.3e}",
                num_iters,
                traj.cost,
                du_max,
                slope
            );

            if du_max < sp.step_tol || slope >= 0.0 {
                converged = true;
                break;
            }

            // ---- LINE SEARCH ----

            let mut alpha = 1.0;
            let mut accepted = None;

            while alpha >= MIN_STEP {
                if expired() {
                    return Err(timeout(num_iters));
                }

                let u_new = self.project(&(&u + &du * alpha));
                let traj_new = self.rollout(&s0, &u_new, curve);

                if traj_new.cost.is_finite()
                    && traj_new.cost <= traj.cost + ARMIJO_SIGMA * alpha * slope
                {
                    accepted = Some((u_new, traj_new));
                    break;
                }

                alpha *= 0.5;
            }

            let (u_new, traj_new) = match accepted {
                Some(a) => a,
                // No descent is possible along the step, the iterate is a local minimum
                None => {
                    converged = true;
                    break;
                }
            };

            check_finite(&traj_new)?;

            let rel_decrease = (traj.cost - traj_new.cost) / traj.cost.abs().max(1.0);

            u = u_new;
            traj = traj_new;

            if alpha * du_max < sp.step_tol || rel_decrease < sp.cost_tol {
                converged = true;
                break;
            }
        }

        // Plans finished past the deadline are rejected too
        if !converged || expired() {
            return Err(timeout(num_iters));
        }

        let elapsed_s = start.elapsed().as_secs_f64();

        let actuation = Actuation::new(
            u[IDX_STEER].max(self.lb[IDX_STEER]).min(self.ub[IDX_STEER]),
            u[IDX_ACCEL].max(self.lb[IDX_ACCEL]).min(self.ub[IDX_ACCEL]),
        );

        Ok(MpcSolution {
            actuation,
            path: traj
                .states
                .iter()
                .map(|s| Point2::new(s[IDX_X], s[IDX_Y]))
                .collect(),
            num_iters,
            cost: traj.cost,
            solve_time_s: elapsed_s,
        })
    }

    /// Roll the model out from `s0` under the actuations `u` and evaluate the cost.
    fn rollout(&self, s0: &Vector6<f64>, u: &DVector<f64>, curve: &RefCurve) -> Rollout {
        let mut states = Vec::with_capacity(self.params.num_steps);
        states.push(*s0);

        for k in 0..self.params.num_actuations() {
            let next = self.model.step(&states[k], &actuation_at(u, k), curve);
            states.push(next);
        }

        let state_cost: f64 = states
            .iter()
            .map(|s| {
                self.residuals(s)
                    .iter()
                    .zip(self.residual_weights().iter())
                    .map(|(r, w)| w * r * r)
                    .sum::<f64>()
            })
            .sum();

        let cost = state_cost + u.dot(&(&self.act_cost * u));

        Rollout { states, cost }
    }

    /// Gauss-Newton model of the cost about the trajectory, in terms of actuation deviations.
    fn quadratic_model(
        &self,
        traj: &Rollout,
        u: &DVector<f64>,
        curve: &RefCurve,
    ) -> (DMatrix<f64>, DVector<f64>) {
        let num_steps = self.params.num_steps;
        let n_u = u.len();

        // Sensitivity of each state to the actuations, stacked by state
        let mut sens = DMatrix::zeros(num_steps * STATE_DIM, n_u);

        for k in 0..num_steps - 1 {
            let (a, b) = self.model.linearise(&traj.states[k], &actuation_at(u, k), curve);

            let prev: OMatrix<f64, U6, Dyn> = sens.fixed_rows::<6>(k * STATE_DIM).clone_owned();
            let mut next = a * prev;
            let mut next_u = next.fixed_columns_mut::<2>(k * ACT_DIM);
            next_u += b;

            sens.fixed_rows_mut::<6>((k + 1) * STATE_DIM).copy_from(&next);
        }

        // Weighted residual jacobian and residuals, scaled by sqrt(2 w) so that J'J and J'r are
        // the Gauss-Newton hessian and gradient
        let scale = self.residual_weights().map(|w| (2.0 * w).sqrt());
        let mut jac = DMatrix::zeros(num_steps * NUM_RESIDUALS, n_u);
        let mut res = DVector::zeros(num_steps * NUM_RESIDUALS);

        for (k, s) in traj.states.iter().enumerate() {
            let r = self.residuals(s);

            for (j, &idx) in [IDX_V, IDX_CTE, IDX_EPSI].iter().enumerate() {
                let row = k * NUM_RESIDUALS + j;
                jac.row_mut(row)
                    .copy_from(&(sens.row(k * STATE_DIM + idx) * scale[j]));
                res[row] = r[j] * scale[j];
            }
        }

        let jac_t = jac.transpose();
        let h = &jac_t * &jac + &self.act_cost * 2.0;
        let g = &jac_t * res + (&self.act_cost * u) * 2.0;

        (h, g)
    }

    /// Penalised residuals of a state: speed error, cross track error, heading error.
    fn residuals(&self, s: &Vector6<f64>) -> [f64; NUM_RESIDUALS] {
        [s[IDX_V] - self.params.ref_speed_ms, s[IDX_CTE], s[IDX_EPSI]]
    }

    fn residual_weights(&self) -> [f64; NUM_RESIDUALS] {
        let w = &self.params.weights;
        [w.speed, w.cte, w.epsi]
    }

    fn project(&self, u: &DVector<f64>) -> DVector<f64> {
        u.zip_zip_map(&self.lb, &self.ub, |v, l, h| v.max(l).min(h))
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn actuation_at(u: &DVector<f64>, k: usize) -> Vector2<f64> {
    Vector2::new(u[k * ACT_DIM + IDX_STEER], u[k * ACT_DIM + IDX_ACCEL])
}

fn check_finite(traj: &Rollout) -> Result<(), SolveError> {
    let finite = traj.cost.is_finite()
        && traj
            .states
            .iter()
            .all(|s| s.iter().all(|e| e.is_finite()));

    match finite {
        true => Ok(()),
        false => Err(SolveError::SolverDiverged(
            "trajectory is not finite".into(),
        )),
    }
}

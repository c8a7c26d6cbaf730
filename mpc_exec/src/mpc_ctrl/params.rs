//! Parameters structure for MpcCtrl

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::MpcCtrlError;
use crate::poly::MAX_DEGREE;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the MPC controller.
///
/// Loaded once at initialisation and never modified afterwards.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Params {
    // ---- HORIZON ----
    /// Number of states in the prediction horizon (N). The horizon holds `N - 1` actuations.
    pub num_steps: usize,

    /// Time between horizon states.
    ///
    /// Units: seconds
    pub step_s: f64,

    // ---- VEHICLE ----
    /// Distance between the front axle and the centre of gravity.
    ///
    /// Units: meters
    pub lf_m: f64,

    /// Time between a command being sent and it taking effect on the vehicle.
    ///
    /// Units: seconds
    pub latency_s: f64,

    /// Factor converting telemetry speed into meters/second.
    pub speed_scale: f64,

    /// Maximum steering angle magnitude.
    ///
    /// Units: radians
    pub max_steer_rad: f64,

    /// Maximum forward acceleration.
    ///
    /// Units: meters/second^2
    pub max_accel_mss: f64,

    /// Maximum braking deceleration, given as a positive number.
    ///
    /// Units: meters/second^2
    pub max_decel_mss: f64,

    // ---- REFERENCE ----
    /// Speed the controller tries to hold.
    ///
    /// Units: meters/second
    pub ref_speed_ms: f64,

    /// Degree of the reference polynomial, between 1 and 3.
    pub poly_degree: usize,

    /// Spacing in x of the reference line samples returned for display.
    ///
    /// Units: meters
    pub ref_sample_spacing_m: f64,

    /// Number of reference line samples returned for display.
    pub ref_sample_count: usize,

    // ---- FALLBACK ----
    /// Acceleration commanded (with zero steering) when a cycle cannot produce a solution.
    ///
    /// Units: meters/second^2
    pub fallback_accel_mss: f64,

    pub weights: CostWeights,

    pub solver: SolverParams,
}

/// Weights of each term of the trajectory cost.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct CostWeights {
    pub cte: f64,
    pub epsi: f64,
    pub speed: f64,
    pub steer: f64,
    pub accel: f64,
    pub steer_rate: f64,
    pub accel_rate: f64,
}

/// Budgets and tolerances of the trajectory optimiser.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct SolverParams {
    /// Maximum number of SQP iterations before the solve is abandoned.
    pub max_iters: usize,

    /// Wall clock budget of one solve.
    ///
    /// Units: seconds
    pub max_solve_time_s: f64,

    /// The solve has converged once the largest actuation change of an iteration is below this.
    pub step_tol: f64,

    /// The solve has converged once the relative cost decrease of an iteration is below this.
    pub cost_tol: f64,

    /// Regularisation added to the diagonal of each QP Hessian.
    pub hessian_reg: f64,

    /// Iteration budget of each QP subproblem.
    pub qp_max_iters: usize,

    /// Projected gradient tolerance of each QP subproblem.
    pub qp_tol: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Params {
    /// Check that the parameters describe a solvable problem.
    pub fn validate(&self) -> Result<(), MpcCtrlError> {
        let invalid = |msg: &str| Err(MpcCtrlError::InvalidParams(msg.to_string()));

        if self.num_steps < 2 {
            return invalid("num_steps must be at least 2");
        }
        if !(self.step_s > 0.0) {
            return invalid("step_s must be positive");
        }
        if !(self.lf_m > 0.0) {
            return invalid("lf_m must be positive");
        }
        if !(self.latency_s >= 0.0) {
            return invalid("latency_s must not be negative");
        }
        if !(self.speed_scale > 0.0) {
            return invalid("speed_scale must be positive");
        }
        if !(self.max_steer_rad > 0.0) {
            return invalid("max_steer_rad must be positive");
        }
        if !(self.max_accel_mss > 0.0) || !(self.max_decel_mss > 0.0) {
            return invalid("max_accel_mss and max_decel_mss must be positive");
        }
        if !self.ref_speed_ms.is_finite() {
            return invalid("ref_speed_ms must be finite");
        }
        if self.poly_degree < 1 || self.poly_degree > MAX_DEGREE {
            return invalid("poly_degree must be between 1 and 3");
        }
        if !(self.ref_sample_spacing_m > 0.0) {
            return invalid("ref_sample_spacing_m must be positive");
        }
        if !(self.fallback_accel_mss >= -self.max_decel_mss
            && self.fallback_accel_mss <= self.max_accel_mss)
        {
            return invalid("fallback_accel_mss must be within the acceleration bounds");
        }

        let w = &self.weights;
        let weights = [
            w.cte,
            w.epsi,
            w.speed,
            w.steer,
            w.accel,
            w.steer_rate,
            w.accel_rate,
        ];
        if weights.iter().any(|w| !(*w >= 0.0) || !w.is_finite()) {
            return invalid("cost weights must be finite and not negative");
        }

        let s = &self.solver;
        if s.max_iters == 0 || s.qp_max_iters == 0 {
            return invalid("solver iteration budgets must be positive");
        }
        if !(s.max_solve_time_s > 0.0) {
            return invalid("max_solve_time_s must be positive");
        }
        if !(s.step_tol > 0.0) || !(s.cost_tol > 0.0) || !(s.qp_tol > 0.0) {
            return invalid("solver tolerances must be positive");
        }
        if !(s.hessian_reg >= 0.0) {
            return invalid("hessian_reg must not be negative");
        }

        Ok(())
    }

    /// Number of actuations in the horizon.
    pub fn num_actuations(&self) -> usize {
        self.num_steps - 1
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            num_steps: 10,
            step_s: 0.1,
            lf_m: 2.67,
            latency_s: 0.1,
            speed_scale: 0.44704,
            max_steer_rad: 0.436332,
            max_accel_mss: 1.0,
            max_decel_mss: 1.0,
            ref_speed_ms: 17.88,
            poly_degree: 3,
            ref_sample_spacing_m: 2.5,
            ref_sample_count: 25,
            fallback_accel_mss: -0.3,
            weights: CostWeights {
                cte: 2000.0,
                epsi: 2000.0,
                speed: 1.0,
                steer: 5.0,
                accel: 5.0,
                steer_rate: 200.0,
                accel_rate: 10.0,
            },
            solver: SolverParams {
                max_iters: 100,
                max_solve_time_s: 0.08,
                step_tol: 1e-6,
                cost_tol: 1e-9,
                hessian_reg: 1e-8,
                qp_max_iters: 200,
                qp_tol: 1e-9,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shipped_params() {
        let p: Params = util::params::load_path(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../params/mpc_ctrl.toml"
        ))
        .unwrap();

        p.validate().unwrap();

        assert_eq!(p.num_steps, 10);
        assert_eq!(p.num_actuations(), 9);
        assert_eq!(p.poly_degree, 3);
    }

    #[test]
    fn test_default_valid() {
        Params::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_params() {
        let mut p = Params::default();
        p.num_steps = 1;
        assert!(matches!(p.validate(), Err(MpcCtrlError::InvalidParams(_))));

        let mut p = Params::default();
        p.max_decel_mss = 0.2;
        assert!(matches!(p.validate(), Err(MpcCtrlError::InvalidParams(_))));

        let mut p = Params::default();
        p.weights.steer_rate = -1.0;
        assert!(matches!(p.validate(), Err(MpcCtrlError::InvalidParams(_))));

        let mut p = Params::default();
        p.solver.max_solve_time_s = f64::NAN;
        assert!(matches!(p.validate(), Err(MpcCtrlError::InvalidParams(_))));
    }
}

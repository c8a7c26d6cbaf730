//! Implementations for the MpcCtrl state structure

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use comms_if::telem::{SteerCmd, Telemetry};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::Path;

// Internal
use super::{
    Actuation, MpcCtrlError, MpcSolution, Params, SolveError, TrajectoryOptimizer, VehicleState,
};
use crate::{
    frame::{self, Point2, Pose},
    poly::{FitError, RefCurve, MAX_DEGREE},
};
use util::{
    archive::{ArchiveError, Archiver},
    maths::{clamp, lin_map},
    module::State,
    params,
    session::{self, Session},
};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// MPC control module state
pub struct MpcCtrl {
    params: Params,

    optimizer: TrajectoryOptimizer,

    report: StatusReport,
    arch_report: Option<Archiver>,
}

/// Input data to MpcCtrl, in SI units.
#[derive(Debug, Clone, Default)]
pub struct InputData {
    /// Reference waypoints.
    ///
    /// Frame: World
    pub waypoints_w: Vec<Point2<f64>>,

    pub pose: Pose,

    /// Units: meters/second
    pub speed_ms: f64,

    /// The currently applied steering angle.
    ///
    /// Units: radians
    pub steering_rad: f64,

    /// The currently applied throttle, used as an acceleration.
    pub throttle: f64,
}

/// Output of one MpcCtrl cycle.
#[derive(Debug, Clone, Default)]
pub struct OutputData {
    /// Commanded actuation, always within the actuator bounds.
    pub actuation: Actuation,

    /// Commanded steering divided by the maximum steering angle, in [-1, 1].
    pub steering_norm: f64,

    /// Predicted vehicle positions over the horizon.
    ///
    /// Frame: Vehicle (at the time of the telemetry)
    pub predicted_path: Vec<Point2<f64>>,

    /// Samples of the reference curve.
    ///
    /// Frame: Vehicle (at the time of the telemetry)
    pub ref_line: Vec<Point2<f64>>,
}

/// Reason for using the fallback actuation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum FallbackCause {
    InsufficientPoints,
    SingularFit,
    SolverDiverged,
    SolverTimeout,
}

/// Status report for MpcCtrl processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatusReport {
    /// Session time of the cycle.
    pub time_s: f64,

    /// Degree of the fitted curve, 0 if the fit failed.
    pub fit_degree: usize,

    /// Cross track error after latency compensation.
    pub cte_m: f64,

    /// Heading error after latency compensation.
    pub epsi_rad: f64,

    pub speed_ms: f64,

    pub steering_rad: f64,
    pub accel_mss: f64,

    pub steering_limited: bool,
    pub accel_limited: bool,

    pub num_iters: usize,
    pub cost: f64,
    pub solve_time_s: f64,

    /// Set if the fallback actuation was used.
    pub fallback: Option<FallbackCause>,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl State for MpcCtrl {
    const NAME: &'static str = "mpc_ctrl";

    type InitData = &'static str;
    type InitError = MpcCtrlError;

    type InputData = InputData;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = std::convert::Infallible;

    /// Initialise the MpcCtrl module.
    ///
    /// Expected init data is the path to the parameter file, relative to the params directory.
    fn init(&mut self, init_data: Self::InitData, session: &Session) -> Result<(), Self::InitError> {
        let params: Params = params::load(init_data).map_err(MpcCtrlError::ParamLoadError)?;

        *self = Self::new(params)?;

        // Create the arch folder for mpc_ctrl
        std::fs::create_dir_all(session.arch_root.join(Self::NAME))
            .map_err(|e| MpcCtrlError::ArchiveError(ArchiveError::FileOpenError(e)))?;

        self.arch_report = Some(
            Archiver::from_path(session, Path::new(Self::NAME).join("status_report.csv"))
                .map_err(MpcCtrlError::ArchiveError)?,
        );

        info!(
            "MpcCtrl initialised: N = {}, dt = {} s, reference speed = {} m/s",
            self.params.num_steps, self.params.step_s, self.params.ref_speed_ms
        );

        Ok(())
    }

    /// Perform one control cycle.
    ///
    /// Never fails, a cycle which cannot produce a solution outputs the fallback actuation and
    /// flags it in the status report.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        self.report = StatusReport {
            time_s: session::get_elapsed_seconds(),
            speed_ms: input_data.speed_ms,
            ..Default::default()
        };

        // ---- REFERENCE CURVE ----

        let waypoints_v = frame::to_vehicle_frame(&input_data.pose, &input_data.waypoints_w);

        let curve = match self.fit_curve(&waypoints_v) {
            Ok(c) => c,
            Err(e) => {
                let cause = match e {
                    FitError::SingularFit => FallbackCause::SingularFit,
                    _ => FallbackCause::InsufficientPoints,
                };
                warn!("Could not fit the reference curve ({}), using fallback", e);
                return Ok(self.fallback(cause, Vec::new()));
            }
        };

        let ref_line = curve.sample(
            self.params.ref_sample_spacing_m,
            self.params.ref_sample_count,
        );

        // ---- LATENCY COMPENSATION ----

        let state = VehicleState::from_curve(&curve, input_data.speed_ms).compensate_latency(
            input_data.steering_rad,
            input_data.throttle,
            self.params.latency_s,
            self.params.lf_m,
        );

        self.report.cte_m = state.cte_m;
        self.report.epsi_rad = state.epsi_rad;

        // ---- OPTIMISATION ----

        let solution = match self.optimizer.solve(&state, &curve) {
            Ok(s) => s,
            Err(e) => {
                let cause = match e {
                    SolveError::SolverDiverged(_) => FallbackCause::SolverDiverged,
                    SolveError::SolverTimeout { .. } => FallbackCause::SolverTimeout,
                };
                warn!("Trajectory optimisation failed ({}), using fallback", e);
                return Ok(self.fallback(cause, ref_line));
            }
        };

        let MpcSolution {
            actuation,
            path,
            num_iters,
            cost,
            solve_time_s,
        } = solution;

        self.report.num_iters = num_iters;
        self.report.cost = cost;
        self.report.solve_time_s = solve_time_s;

        let actuation = self.limit(actuation);

        debug!(
            "MpcCtrl: cte = {:.3} m, epsi = {:.4} rad, steer = {:.4} rad, accel = {:.3} m/s^2, \
            {} iterations in {:.2} ms",
            state.cte_m,
            state.epsi_rad,
            actuation.steering_rad,
            actuation.accel_mss,
            num_iters,
            solve_time_s * 1e3
        );

        Ok(self.finish(actuation, path, ref_line))
    }
}

impl Default for MpcCtrl {
    fn default() -> Self {
        let params = Params::default();

        Self {
            optimizer: TrajectoryOptimizer::from_valid(&params),
            params,
            report: StatusReport::default(),
            arch_report: None,
        }
    }
}

impl MpcCtrl {
    /// Create a controller from the given parameters, without archiving.
    pub fn new(params: Params) -> Result<Self, MpcCtrlError> {
        Ok(Self {
            optimizer: TrajectoryOptimizer::new(&params)?,
            params,
            report: StatusReport::default(),
            arch_report: None,
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Fit the reference curve, lowering the degree when there are too few points for the
    /// configured one.
    fn fit_curve(&mut self, waypoints_v: &[Point2<f64>]) -> Result<RefCurve, FitError> {
        let mut degree = self.params.poly_degree.min(MAX_DEGREE);

        if waypoints_v.len() >= 2 && waypoints_v.len() <= degree {
            let reduced = waypoints_v.len() - 1;
            warn!(
                "Only {} waypoints, fitting a degree {} curve instead of degree {}",
                waypoints_v.len(),
                reduced,
                degree
            );
            degree = reduced;
        }

        let curve = RefCurve::fit(waypoints_v, degree)?;
        self.report.fit_degree = degree;

        Ok(curve)
    }

    fn fallback(
        &mut self,
        cause: FallbackCause,
        ref_line: Vec<Point2<f64>>,
    ) -> (OutputData, StatusReport) {
        self.report.fallback = Some(cause);

        let actuation = self.limit(Actuation::new(0.0, self.params.fallback_accel_mss));

        self.finish(actuation, Vec::new(), ref_line)
    }

    /// Build the output and archive the report.
    fn finish(
        &mut self,
        actuation: Actuation,
        predicted_path: Vec<Point2<f64>>,
        ref_line: Vec<Point2<f64>>,
    ) -> (OutputData, StatusReport) {
        self.report.steering_rad = actuation.steering_rad;
        self.report.accel_mss = actuation.accel_mss;

        if let Some(ref mut arch) = self.arch_report {
            if let Err(e) = arch.serialise(self.report) {
                warn!("Could not archive the MpcCtrl status report: {}", e);
            }
        }

        let output = OutputData {
            actuation,
            steering_norm: lin_map(
                (-self.params.max_steer_rad, self.params.max_steer_rad),
                (-1.0, 1.0),
                actuation.steering_rad,
            ),
            predicted_path,
            ref_line,
        };

        (output, self.report)
    }

    /// Clamp the actuation to the actuator bounds, flagging any limiting in the report.
    ///
    /// Non-finite values are replaced by the fallback values.
    fn limit(&mut self, actuation: Actuation) -> Actuation {
        let limited = self.limit_silent(actuation);

        self.report.steering_limited = limited.steering_rad != actuation.steering_rad;
        self.report.accel_limited = limited.accel_mss != actuation.accel_mss;

        limited
    }

    fn limit_silent(&self, actuation: Actuation) -> Actuation {
        let p = &self.params;

        let steering = match actuation.steering_rad.is_finite() {
            true => actuation.steering_rad,
            false => 0.0,
        };
        let accel = match actuation.accel_mss.is_finite() {
            true => actuation.accel_mss,
            false => p.fallback_accel_mss,
        };

        Actuation::new(
            clamp(steering, -p.max_steer_rad, p.max_steer_rad),
            clamp(accel, -p.max_decel_mss, p.max_accel_mss),
        )
    }
}

impl InputData {
    /// Build the input from simulator telemetry, converting the heading convention and the speed
    /// units.
    pub fn from_telemetry(telem: &Telemetry, speed_scale: f64) -> Self {
        Self {
            waypoints_w: telem
                .ptsx
                .iter()
                .zip(telem.ptsy.iter())
                .map(|(&x, &y)| Point2::new(x, y))
                .collect(),
            pose: Pose::from_nav_heading(telem.x, telem.y, telem.psi_unity),
            speed_ms: telem.speed * speed_scale,
            steering_rad: telem.steering_angle,
            throttle: telem.throttle,
        }
    }
}

impl OutputData {
    /// Build the steering command sent back to the simulator.
    pub fn to_steer_cmd(&self) -> SteerCmd {
        let (mpc_x, mpc_y) = self.predicted_path.iter().map(|p| (p.x, p.y)).unzip();
        let (next_x, next_y) = self.ref_line.iter().map(|p| (p.x, p.y)).unzip();

        SteerCmd {
            steering_angle: self.steering_norm,
            throttle: self.actuation.accel_mss,
            mpc_x,
            mpc_y,
            next_x,
            next_y,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_ctrl() -> MpcCtrl {
        let mut params = Params::default();
        params.solver.max_solve_time_s = 10.0;
        MpcCtrl::new(params).unwrap()
    }

    fn input(waypoints: &[(f64, f64)], speed_ms: f64) -> InputData {
        InputData {
            waypoints_w: waypoints.iter().map(|&(x, y)| Point2::new(x, y)).collect(),
            pose: Pose::new(0.0, 0.0, 0.0),
            speed_ms,
            steering_rad: 0.0,
            throttle: 0.0,
        }
    }

    #[test]
    fn test_straight_ahead() {
        let mut ctrl = test_ctrl();
        let inp = input(&[(10.0, 0.0), (20.0, 0.0), (30.0, 0.0)], 10.0);

        // The vehicle frame is the world frame
        let local = frame::to_vehicle_frame(&inp.pose, &inp.waypoints_w);
        assert_eq!(local, inp.waypoints_w);

        let (out, report) = ctrl.proc(&inp).unwrap();

        assert_eq!(report.fallback, None);
        assert_eq!(report.fit_degree, 2);
        assert!(report.cte_m.abs() < 1e-9);
        assert!(report.epsi_rad.abs() < 1e-9);

        assert!(out.actuation.steering_rad.abs() < 1e-6);
        assert!(out.steering_norm.abs() < 1e-6);

        // Latency compensation moves the vehicle forward only
        assert_eq!(out.predicted_path.len(), ctrl.params().num_steps);
        assert!((out.predicted_path[0].x - 1.0).abs() < 1e-9);
        assert!(out.predicted_path[0].y.abs() < 1e-9);
        for w in out.predicted_path.windows(2) {
            assert!(w[0].x >= 0.0);
            assert!(w[1].x > w[0].x);
            assert!(w[1].y.abs() < 1e-6);
        }

        assert_eq!(out.ref_line.len(), ctrl.params().ref_sample_count);
        assert!(out.ref_line.iter().all(|p| p.y.abs() < 1e-9));
    }

    #[test]
    fn test_left_curve() {
        let mut ctrl = test_ctrl();
        let waypoints = [(10.0, 2.0), (20.0, 8.0), (30.0, 18.0)];

        let curve = RefCurve::fit(
            &waypoints
                .iter()
                .map(|&(x, y)| Point2::new(x, y))
                .collect::<Vec<_>>(),
            2,
        )
        .unwrap();
        assert!(curve.coeffs[2] > 0.0);

        let (out, report) = ctrl.proc(&input(&waypoints, 10.0)).unwrap();

        assert_eq!(report.fallback, None);

        // Turning left is negative steering
        assert!(out.actuation.steering_rad < -1e-3);
        assert!(out.steering_norm < 0.0 && out.steering_norm >= -1.0);

        let path = &out.predicted_path;
        assert_eq!(path.len(), ctrl.params().num_steps);
        for w in path.windows(2) {
            assert!(w[1].y >= w[0].y - 1e-9);
        }
        assert!(path[path.len() - 1].y > path[0].y);
    }

    #[test]
    fn test_fallback_on_bad_waypoints() {
        let mut ctrl = test_ctrl();
        let fallback_accel = ctrl.params().fallback_accel_mss;

        let (out, report) = ctrl.proc(&input(&[(10.0, 0.0)], 5.0)).unwrap();
        assert_eq!(report.fallback, Some(FallbackCause::InsufficientPoints));
        assert_eq!(out.actuation, Actuation::new(0.0, fallback_accel));
        assert!(out.predicted_path.is_empty());

        let (out, report) = ctrl
            .proc(&input(&[(10.0, 0.0), (10.0, 1.0), (10.0, 2.0)], 5.0))
            .unwrap();
        assert_eq!(report.fallback, Some(FallbackCause::SingularFit));
        assert_eq!(out.steering_norm, 0.0);

        let (_, report) = ctrl.proc(&input(&[], 5.0)).unwrap();
        assert_eq!(report.fallback, Some(FallbackCause::InsufficientPoints));
    }

    #[test]
    fn test_fallback_on_solver_failure() {
        let mut params = Params::default();
        params.solver.max_iters = 1;
        params.solver.cost_tol = 1e-300;
        params.solver.step_tol = 1e-300;
        let mut ctrl = MpcCtrl::new(params).unwrap();

        let (out, report) = ctrl
            .proc(&input(&[(10.0, 2.0), (20.0, 8.0), (30.0, 18.0)], 10.0))
            .unwrap();

        assert_eq!(report.fallback, Some(FallbackCause::SolverTimeout));
        assert_eq!(out.actuation.steering_rad, 0.0);
        assert_eq!(out.actuation.accel_mss, ctrl.params().fallback_accel_mss);
        assert!(!out.ref_line.is_empty());

        let (_, report) = ctrl
            .proc(&input(&[(10.0, 2.0), (20.0, 8.0), (30.0, 18.0)], f64::NAN))
            .unwrap();
        assert_eq!(report.fallback, Some(FallbackCause::SolverDiverged));
    }

    #[test]
    fn test_outputs_bounded() {
        let mut ctrl = test_ctrl();
        let max_steer = ctrl.params().max_steer_rad;

        // Sharp turn well off to the side at speed
        let mut inp = input(&[(5.0, -40.0), (10.0, -60.0), (20.0, -70.0), (30.0, -75.0)], 30.0);
        inp.steering_rad = 1.0;
        inp.throttle = 1.0;

        let (out, _) = ctrl.proc(&inp).unwrap();

        assert!(out.actuation.steering_rad.abs() <= max_steer);
        assert!(out.steering_norm.abs() <= 1.0);
        assert!(out.actuation.accel_mss <= ctrl.params().max_accel_mss);
        assert!(out.actuation.accel_mss >= -ctrl.params().max_decel_mss);
    }

    #[test]
    fn test_from_telemetry() {
        let telem = Telemetry {
            ptsx: vec![1.0, 2.0],
            ptsy: vec![3.0, 4.0],
            x: 5.0,
            y: 6.0,
            psi_unity: std::f64::consts::FRAC_PI_2,
            speed: 10.0,
            steering_angle: -0.1,
            throttle: 0.2,
        };

        let inp = InputData::from_telemetry(&telem, 0.44704);

        assert_eq!(inp.waypoints_w, vec![Point2::new(1.0, 3.0), Point2::new(2.0, 4.0)]);
        assert!(inp.pose.psi_rad.abs() < 1e-12);
        assert!((inp.speed_ms - 4.4704).abs() < 1e-12);
        assert_eq!(inp.steering_rad, -0.1);
    }

    #[test]
    fn test_steer_cmd() {
        let out = OutputData {
            actuation: Actuation::new(-0.2, 0.5),
            steering_norm: -0.2 / 0.436332,
            predicted_path: vec![Point2::new(1.0, 0.0), Point2::new(2.0, 0.1)],
            ref_line: vec![Point2::new(2.5, 0.2)],
        };

        let cmd = out.to_steer_cmd();

        assert_eq!(cmd.steering_angle, out.steering_norm);
        assert_eq!(cmd.throttle, 0.5);
        assert_eq!(cmd.mpc_x, vec![1.0, 2.0]);
        assert_eq!(cmd.mpc_y, vec![0.0, 0.1]);
        assert_eq!(cmd.next_x, vec![2.5]);
        assert_eq!(cmd.next_y, vec![0.2]);
    }
}

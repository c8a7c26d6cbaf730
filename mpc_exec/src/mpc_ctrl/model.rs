//! # Kinematic bicycle model
//!
//! The vehicle state is `[x, y, psi, v, cte, epsi]` in the vehicle frame at fit time. Positive
//! steering angles turn the vehicle clockwise, so the heading changes by `-v * delta * dt / Lf`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Matrix6, Matrix6x2, Vector2, Vector6};
use serde::Serialize;

use crate::poly::RefCurve;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of elements in the state vector.
pub const STATE_DIM: usize = 6;

/// Number of elements in the actuation vector.
pub const ACT_DIM: usize = 2;

pub const IDX_X: usize = 0;
pub const IDX_Y: usize = 1;
pub const IDX_PSI: usize = 2;
pub const IDX_V: usize = 3;
pub const IDX_CTE: usize = 4;
pub const IDX_EPSI: usize = 5;

pub const IDX_STEER: usize = 0;
pub const IDX_ACCEL: usize = 1;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// State of the vehicle in the vehicle frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct VehicleState {
    pub x_m: f64,
    pub y_m: f64,
    pub psi_rad: f64,
    pub v_ms: f64,

    /// Cross track error, the reference curve's y minus the vehicle's y.
    pub cte_m: f64,

    /// Heading error, the vehicle's heading minus the reference curve's tangent direction.
    pub epsi_rad: f64,
}

/// A steering and acceleration pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Actuation {
    pub steering_rad: f64,
    pub accel_mss: f64,
}

/// Discretised bicycle model following a reference curve.
#[derive(Debug, Clone, Copy)]
pub struct BicycleModel {
    pub lf_m: f64,
    pub dt_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl VehicleState {
    /// The state of a vehicle at the origin of the frame the curve was fitted in.
    pub fn from_curve(curve: &RefCurve, v_ms: f64) -> Self {
        Self {
            x_m: 0.0,
            y_m: 0.0,
            psi_rad: 0.0,
            v_ms,
            cte_m: curve.eval(0.0),
            epsi_rad: -curve.derivative_at(0.0).atan(),
        }
    }

    /// Advance the state over the actuation latency, assuming the current steering and throttle
    /// hold, with a single Euler step.
    ///
    /// The throttle is used as an acceleration.
    pub fn compensate_latency(
        &self,
        steering_rad: f64,
        throttle: f64,
        latency_s: f64,
        lf_m: f64,
    ) -> Self {
        let v = self.v_ms;
        let dpsi = -v * steering_rad * latency_s / lf_m;
        let epsi = self.epsi_rad + dpsi;

        Self {
            x_m: self.x_m + v * self.psi_rad.cos() * latency_s,
            y_m: self.y_m + v * self.psi_rad.sin() * latency_s,
            psi_rad: self.psi_rad + dpsi,
            v_ms: v + throttle * latency_s,
            cte_m: self.cte_m + v * latency_s * epsi.sin(),
            epsi_rad: epsi,
        }
    }

    pub fn to_vector(&self) -> Vector6<f64> {
        Vector6::new(
            self.x_m,
            self.y_m,
            self.psi_rad,
            self.v_ms,
            self.cte_m,
            self.epsi_rad,
        )
    }

    pub fn from_vector(s: &Vector6<f64>) -> Self {
        Self {
            x_m: s[IDX_X],
            y_m: s[IDX_Y],
            psi_rad: s[IDX_PSI],
            v_ms: s[IDX_V],
            cte_m: s[IDX_CTE],
            epsi_rad: s[IDX_EPSI],
        }
    }

    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|e| e.is_finite())
    }
}

impl Actuation {
    pub fn new(steering_rad: f64, accel_mss: f64) -> Self {
        Self {
            steering_rad,
            accel_mss,
        }
    }
}

impl BicycleModel {
    /// Advance the state by one step.
    pub fn step(&self, s: &Vector6<f64>, u: &Vector2<f64>, curve: &RefCurve) -> Vector6<f64> {
        let (x, y, psi, v, epsi) = (s[IDX_X], s[IDX_Y], s[IDX_PSI], s[IDX_V], s[IDX_EPSI]);
        let (delta, a) = (u[IDX_STEER], u[IDX_ACCEL]);
        let dt = self.dt_s;

        let dpsi = -v * delta * dt / self.lf_m;
        let psi_des = curve.derivative_at(x).atan();

        Vector6::new(
            x + v * psi.cos() * dt,
            y + v * psi.sin() * dt,
            psi + dpsi,
            v + a * dt,
            (curve.eval(x) - y) + v * epsi.sin() * dt,
            (psi - psi_des) + dpsi,
        )
    }

    /// Jacobians of [`BicycleModel::step`] with respect to the state and the actuation.
    pub fn linearise(
        &self,
        s: &Vector6<f64>,
        u: &Vector2<f64>,
        curve: &RefCurve,
    ) -> (Matrix6<f64>, Matrix6x2<f64>) {
        let (x, psi, v, epsi) = (s[IDX_X], s[IDX_PSI], s[IDX_V], s[IDX_EPSI]);
        let delta = u[IDX_STEER];
        let dt = self.dt_s;
        let k = dt / self.lf_m;

        let df = curve.derivative_at(x);
        let d2f = curve.derivative().derivative_at(x);

        let mut a = Matrix6::zeros();
        let mut b = Matrix6x2::zeros();

        a[(IDX_X, IDX_X)] = 1.0;
        a[(IDX_X, IDX_PSI)] = -v * psi.sin() * dt;
        a[(IDX_X, IDX_V)] = psi.cos() * dt;

        a[(IDX_Y, IDX_Y)] = 1.0;
        a[(IDX_Y, IDX_PSI)] = v * psi.cos() * dt;
        a[(IDX_Y, IDX_V)] = psi.sin() * dt;

        a[(IDX_PSI, IDX_PSI)] = 1.0;
        a[(IDX_PSI, IDX_V)] = -delta * k;
        b[(IDX_PSI, IDX_STEER)] = -v * k;

        a[(IDX_V, IDX_V)] = 1.0;
        b[(IDX_V, IDX_ACCEL)] = dt;

        a[(IDX_CTE, IDX_X)] = df;
        a[(IDX_CTE, IDX_Y)] = -1.0;
        a[(IDX_CTE, IDX_V)] = epsi.sin() * dt;
        a[(IDX_CTE, IDX_EPSI)] = v * epsi.cos() * dt;

        a[(IDX_EPSI, IDX_X)] = -d2f / (1.0 + df * df);
        a[(IDX_EPSI, IDX_PSI)] = 1.0;
        a[(IDX_EPSI, IDX_V)] = -delta * k;
        b[(IDX_EPSI, IDX_STEER)] = -v * k;

        (a, b)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn model() -> BicycleModel {
        BicycleModel {
            lf_m: 2.67,
            dt_s: 0.1,
        }
    }

    #[test]
    fn test_from_curve() {
        let curve = RefCurve::from_coeffs([0.5, 1.0, 0.1, 0.0]);
        let s = VehicleState::from_curve(&curve, 4.0);

        assert_eq!(s.cte_m, 0.5);
        assert!((s.epsi_rad + std::f64::consts::FRAC_PI_4).abs() < 1e-12);
        assert_eq!(s.v_ms, 4.0);
        assert_eq!((s.x_m, s.y_m, s.psi_rad), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_latency_straight() {
        let s = VehicleState::from_curve(&RefCurve::default(), 10.0);
        let l = s.compensate_latency(0.0, 0.0, 0.1, 2.67);

        assert!((l.x_m - 1.0).abs() < 1e-12);
        assert_eq!(l.y_m, 0.0);
        assert_eq!(l.psi_rad, 0.0);
        assert_eq!(l.v_ms, 10.0);
        assert_eq!(l.cte_m, 0.0);
        assert_eq!(l.epsi_rad, 0.0);
    }

    #[test]
    fn test_latency_turning() {
        let mut s = VehicleState::from_curve(&RefCurve::default(), 10.0);
        s.cte_m = 0.2;
        s.epsi_rad = 0.05;

        let lf = 2.67;
        let l = s.compensate_latency(0.1, 0.5, 0.1, lf);

        let psi = -10.0 * 0.1 * 0.1 / lf;
        assert!((l.psi_rad - psi).abs() < 1e-12);
        assert!((l.epsi_rad - (0.05 + psi)).abs() < 1e-12);
        assert!((l.cte_m - (0.2 + 10.0 * 0.1 * (0.05 + psi).sin())).abs() < 1e-12);
        assert!((l.v_ms - 10.05).abs() < 1e-12);
        assert!((l.x_m - 1.0).abs() < 1e-12);
        assert_eq!(l.y_m, 0.0);

        // Positive steering turns clockwise
        assert!(l.psi_rad < 0.0);
    }

    #[test]
    fn test_step_left_turn() {
        let m = model();
        let s = Vector6::new(0.0, 0.0, 0.0, 5.0, 0.0, 0.0);
        let u = Vector2::new(-0.2, 0.0);

        let mut next = m.step(&s, &u, &RefCurve::default());
        for _ in 0..5 {
            next = m.step(&next, &u, &RefCurve::default());
        }

        assert!(next[IDX_PSI] > 0.0);
        assert!(next[IDX_Y] > 0.0);
    }

    #[test]
    fn test_linearise_matches_finite_difference() {
        let m = model();
        let curve = RefCurve::from_coeffs([0.3, -0.2, 0.05, -0.004]);
        let s = Vector6::new(1.3, -0.4, 0.2, 7.0, 0.3, -0.1);
        let u = Vector2::new(0.12, -0.4);

        let (a, b) = m.linearise(&s, &u, &curve);
        let h = 1e-6;

        for j in 0..STATE_DIM {
            let mut sp = s;
            let mut sm = s;
            sp[j] += h;
            sm[j] -= h;
            let col = (m.step(&sp, &u, &curve) - m.step(&sm, &u, &curve)) / (2.0 * h);

            for i in 0..STATE_DIM {
                assert!(
                    (a[(i, j)] - col[i]).abs() < 1e-6,
                    "A[({}, {})] = {} but finite difference gives {}",
                    i,
                    j,
                    a[(i, j)],
                    col[i]
                );
            }
        }

        for j in 0..ACT_DIM {
            let mut up = u;
            let mut um = u;
            up[j] += h;
            um[j] -= h;
            let col = (m.step(&s, &up, &curve) - m.step(&s, &um, &curve)) / (2.0 * h);

            for i in 0..STATE_DIM {
                assert!((b[(i, j)] - col[i]).abs() < 1e-6);
            }
        }
    }
}

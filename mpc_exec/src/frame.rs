//! # Coordinate frames
//!
//! Waypoints arrive in the world frame. The controller works in the vehicle frame, where the
//! vehicle sits at the origin facing along +x.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Isometry2, Vector2};
use serde::Serialize;

pub use nalgebra::Point2;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Pose of the vehicle in the world frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Pose {
    /// Units: meters, Frame: World
    pub x_m: f64,

    /// Units: meters, Frame: World
    pub y_m: f64,

    /// Heading, 0 along +x and positive counter-clockwise.
    ///
    /// Units: radians, Frame: World
    pub psi_rad: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Pose {
    pub fn new(x_m: f64, y_m: f64, psi_rad: f64) -> Self {
        Self { x_m, y_m, psi_rad }
    }

    /// Build a pose from a navigation heading (0 along +y, positive clockwise).
    pub fn from_nav_heading(x_m: f64, y_m: f64, nav_heading_rad: f64) -> Self {
        Self {
            x_m,
            y_m,
            psi_rad: util::maths::wrap_to_pi(std::f64::consts::FRAC_PI_2 - nav_heading_rad),
        }
    }

    /// The transform taking vehicle frame points into the world frame.
    fn isometry(&self) -> Isometry2<f64> {
        Isometry2::new(Vector2::new(self.x_m, self.y_m), self.psi_rad)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Express world frame points in the frame of a vehicle at `pose`.
///
/// Each point is translated by the negated vehicle position then rotated by the negated heading.
pub fn to_vehicle_frame(pose: &Pose, points_w: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let iso = pose.isometry();
    points_w.iter().map(|p| iso.inverse_transform_point(p)).collect()
}

/// Express vehicle frame points in the world frame. Inverse of [`to_vehicle_frame`].
pub fn to_world_frame(pose: &Pose, points_v: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let iso = pose.isometry();
    points_v.iter().map(|p| iso.transform_point(p)).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn assert_close(a: &Point2<f64>, b: &Point2<f64>) {
        assert!(
            (a - b).norm() < 1e-9,
            "Points differ: {:?} and {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_identity_pose() {
        let pts = vec![
            Point2::new(10.0, 0.0),
            Point2::new(20.0, 0.0),
            Point2::new(30.0, 0.0),
        ];

        let local = to_vehicle_frame(&Pose::default(), &pts);

        for (l, p) in local.iter().zip(pts.iter()) {
            assert_close(l, p);
        }
    }

    #[test]
    fn test_rotated_pose() {
        // Vehicle at (1, 1) facing along +y, a point ahead of it lies on the local +x axis and a
        // point to its left (smaller world x) on the local +y axis.
        let pose = Pose::new(1.0, 1.0, FRAC_PI_2);
        let pts = vec![Point2::new(1.0, 3.0), Point2::new(-1.0, 1.0)];

        let local = to_vehicle_frame(&pose, &pts);

        assert_close(&local[0], &Point2::new(2.0, 0.0));
        assert_close(&local[1], &Point2::new(0.0, 2.0));
    }

    #[test]
    fn test_round_trip() {
        let pts: Vec<Point2<f64>> = (0..20)
            .map(|i| Point2::new(-50.0 + 7.3 * i as f64, 12.0 - 3.1 * i as f64))
            .collect();

        for k in 0..16 {
            let pose = Pose::new(-4.2 + k as f64, 3.3 * k as f64, -PI + 0.41 * k as f64);

            let world = to_world_frame(&pose, &to_vehicle_frame(&pose, &pts));

            for (w, p) in world.iter().zip(pts.iter()) {
                assert_close(w, p);
            }
        }
    }

    #[test]
    fn test_empty() {
        assert!(to_vehicle_frame(&Pose::new(1.0, 2.0, 0.3), &[]).is_empty());
    }

    #[test]
    fn test_nav_heading() {
        // North in the navigation convention is +y
        let p = Pose::from_nav_heading(0.0, 0.0, 0.0);
        assert!((p.psi_rad - FRAC_PI_2).abs() < 1e-12);

        // East is +x
        let p = Pose::from_nav_heading(0.0, 0.0, FRAC_PI_2);
        assert!(p.psi_rad.abs() < 1e-12);

        // West, wrapped into [-pi, pi)
        let p = Pose::from_nav_heading(0.0, 0.0, 3.0 * FRAC_PI_2);
        assert!((p.psi_rad.abs() - PI).abs() < 1e-12);
    }
}

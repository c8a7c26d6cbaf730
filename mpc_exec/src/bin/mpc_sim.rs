//! # MPC Simulation
//!
//! Runs the MPC controller in closed loop against a simulated vehicle following a sinusoidal
//! track, without requiring the simulator. Every cycle the vehicle's telemetry is encoded into a
//! frame, passed through the same frame handling as the server, and the decoded command is
//! applied to the simulated vehicle.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use comms_if::telem::{SteerCmd, Telemetry};
use log::{debug, info, warn};
use structopt::StructOpt;

use mpc_lib::{mpc_ctrl::MpcCtrl, telem_server::handle_frame};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    maths::rem_euclid,
    module::State,
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Distance in x between track waypoints.
const WAYPOINT_SPACING_M: f64 = 5.0;

/// Number of waypoints sent to the controller each cycle.
const NUM_WAYPOINTS: usize = 6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "mpc_sim", about = "Closed loop simulation of the MPC controller")]
struct Opts {
    /// Number of control cycles to simulate
    #[structopt(short, long, default_value = "300")]
    num_cycles: usize,

    /// Simulated time between control cycles in seconds
    #[structopt(long, default_value = "0.1")]
    cycle_period_s: f64,

    /// Amplitude of the track in meters
    #[structopt(long, default_value = "15.0")]
    amplitude_m: f64,

    /// Wavelength of the track in meters
    #[structopt(long, default_value = "200.0")]
    wavelength_m: f64,
}

/// The simulated vehicle.
struct Vehicle {
    x_m: f64,
    y_m: f64,
    psi_rad: f64,
    v_ms: f64,
    steering_rad: f64,
    accel_mss: f64,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new("mpc_sim", "sessions").wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Info, &session).wrap_err("Failed to initialise logging")?;

    info!("MPC Simulation\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);
    info!("Options: {:?}", opts);

    if !(opts.cycle_period_s > 0.0) || !(opts.wavelength_m > 0.0) {
        return Err(eyre!("The cycle period and track wavelength must be positive"));
    }

    // ---- MODULE INIT ----

    let mut mpc_ctrl = MpcCtrl::default();
    mpc_ctrl
        .init("mpc_ctrl.toml", &session)
        .wrap_err("Failed to initialise MpcCtrl")?;

    let params = mpc_ctrl.params().clone();
    let track = |x: f64| opts.amplitude_m * (std::f64::consts::TAU * x / opts.wavelength_m).sin();
    let track_slope = |x: f64| {
        opts.amplitude_m * std::f64::consts::TAU / opts.wavelength_m
            * (std::f64::consts::TAU * x / opts.wavelength_m).cos()
    };

    let mut vehicle = Vehicle {
        x_m: 0.0,
        y_m: track(0.0),
        psi_rad: track_slope(0.0).atan(),
        v_ms: 0.0,
        steering_rad: 0.0,
        accel_mss: 0.0,
    };

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let mut sum_sq_error = 0.0;
    let mut max_error: f64 = 0.0;
    let mut num_fallbacks = 0usize;

    for cycle in 0..opts.num_cycles {
        // Waypoints from the first one ahead of the vehicle
        let first = (vehicle.x_m / WAYPOINT_SPACING_M).floor() as i64 + 1;
        let (ptsx, ptsy): (Vec<f64>, Vec<f64>) = (0..NUM_WAYPOINTS as i64)
            .map(|i| {
                let x = (first + i) as f64 * WAYPOINT_SPACING_M;
                (x, track(x))
            })
            .unzip();

        let telem = Telemetry {
            ptsx,
            ptsy,
            x: vehicle.x_m,
            y: vehicle.y_m,
            psi_unity: rem_euclid(
                std::f64::consts::FRAC_PI_2 - vehicle.psi_rad,
                std::f64::consts::TAU,
            ),
            speed: vehicle.v_ms / params.speed_scale,
            steering_angle: vehicle.steering_rad,
            throttle: vehicle.accel_mss,
        };

        let frame = telem.to_frame().wrap_err("Failed to encode telemetry")?;
        let (reply, report) = handle_frame(&mut mpc_ctrl, &frame);

        if report.map(|r| r.fallback.is_some()).unwrap_or(true) {
            num_fallbacks += 1;
        }

        // The previous command acts for the latency, then the new one for the rest of the cycle
        let latency_s = params.latency_s.min(opts.cycle_period_s);
        vehicle.step(latency_s, params.lf_m);

        match SteerCmd::from_frame(&reply) {
            Ok(cmd) => {
                vehicle.steering_rad = cmd.steering_angle * params.max_steer_rad;
                vehicle.accel_mss = cmd.throttle;
            }
            Err(e) => warn!("Could not decode the reply ({}), holding the last command", e),
        }

        vehicle.step(opts.cycle_period_s - latency_s, params.lf_m);

        let error = vehicle.y_m - track(vehicle.x_m);
        sum_sq_error += error * error;
        max_error = max_error.max(error.abs());

        debug!(
            "Cycle {}: pos = ({:.2}, {:.2}) m, v = {:.2} m/s, steer = {:.4} rad, accel = {:.3}, \
            error = {:.3} m",
            cycle,
            vehicle.x_m,
            vehicle.y_m,
            vehicle.v_ms,
            vehicle.steering_rad,
            vehicle.accel_mss,
            error
        );
    }

    let rms_error = (sum_sq_error / opts.num_cycles.max(1) as f64).sqrt();

    info!(
        "Simulation complete: {} cycles, {} fallbacks, RMS tracking error {:.3} m, max {:.3} m",
        opts.num_cycles, num_fallbacks, rms_error, max_error
    );
    info!("Final speed {:.2} m/s", vehicle.v_ms);

    session.exit();

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Vehicle {
    /// Integrate the bicycle model over `duration_s` in small Euler steps.
    fn step(&mut self, duration_s: f64, lf_m: f64) {
        const SUB_STEP_S: f64 = 0.01;

        let mut remaining = duration_s;

        while remaining > 1e-9 {
            let dt = remaining.min(SUB_STEP_S);

            self.x_m += self.v_ms * self.psi_rad.cos() * dt;
            self.y_m += self.v_ms * self.psi_rad.sin() * dt;
            self.psi_rad -= self.v_ms * self.steering_rad * dt / lf_m;
            self.v_ms = (self.v_ms + self.accel_mss * dt).max(0.0);

            remaining -= dt;
        }
    }
}

//! # MPC Controller Library
//!
//! Steering and throttle control of a vehicle by model predictive control, plus the server which
//! connects the controller to the simulator.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Conversion of waypoints between the world and vehicle frames.
pub mod frame;

/// MPC control module.
pub mod mpc_ctrl;

/// Parameters for the MPC executable.
pub mod params;

/// Reference curve fitting.
pub mod poly;

/// Telemetry server, receiving simulator frames and replying with commands.
pub mod telem_server;

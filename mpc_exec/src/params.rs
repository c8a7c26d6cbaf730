//! # MPC Executable Parameters
//!
//! This module provides parameters for the MPC executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpcExecParams {
    /// Network endpoint of the telemetry server
    pub telem_endpoint: String,

    /// Time the server waits for a frame before checking in again.
    ///
    /// Units: milliseconds
    pub recv_timeout_ms: i32,

    /// Time the server waits for a reply to be sent.
    ///
    /// Units: milliseconds
    pub send_timeout_ms: i32,

    /// Delay added before each reply, emulating the actuation latency of a real vehicle.
    ///
    /// Units: seconds
    pub pacing_delay_s: f64,

    /// If true the raw frames of cycles which used the fallback are saved in the session.
    pub save_failed_frames: bool,

    /// Log level of the executable, one of "info", "debug" or "trace".
    pub log_level: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shipped_params() {
        let p: MpcExecParams = util::params::load_path(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../params/mpc_exec.toml"
        ))
        .unwrap();

        assert!(p.pacing_delay_s >= 0.0);
        assert!(p.telem_endpoint.starts_with("tcp://"));
        assert!(p.log_level.parse::<util::logger::LevelFilter>().is_ok());
    }
}

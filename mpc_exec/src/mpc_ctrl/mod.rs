//! # MPC control module
//!
//! Computes steering and throttle commands by solving a finite horizon trajectory optimisation
//! problem on every control cycle. Each cycle:
//!
//! 1. transforms the waypoints into the vehicle frame,
//! 2. fits the reference curve through them,
//! 3. advances the vehicle state over the actuation latency,
//! 4. solves for the optimal actuation sequence and applies the first actuation.
//!
//! If the curve can't be fitted or the solve fails the cycle outputs the fallback actuation
//! (no steering, configured braking) instead.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod model;
mod nlp;
mod params;
pub mod qp;
mod state;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

pub use model::*;
pub use nlp::*;
pub use params::*;
pub use state::*;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Possible errors that can occur during MpcCtrl initialisation.
#[derive(Debug, thiserror::Error)]
pub enum MpcCtrlError {
    #[error("Could not load the parameters: {0}")]
    ParamLoadError(util::params::LoadError),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Could not open the archive: {0}")]
    ArchiveError(util::archive::ArchiveError),
}

//! # Communications interface crate.
//!
//! Provides the communications interfaces shared between the controller executable and its
//! clients.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Telemetry and steering command definitions, including the simulator's event framing
pub mod telem;

/// Network module
pub mod net;

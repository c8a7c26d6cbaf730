//! Module interfaces
//!
//! Each cyclic module in `mpc_exec` shall implement [`State`]. A module is initialised once from
//! its parameter file and then processed once per control cycle, strictly in order. Processing
//! must not block on anything other than its own computation.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal imports
use crate::session::Session;

// ---------------------------------------------------------------------------
// MODULE STATE
// ---------------------------------------------------------------------------

/// The module's internal state.
pub trait State {
    /// Short name of the module, used for log messages and as the module's archive directory.
    const NAME: &'static str;

    /// Data required during initialisation
    type InitData;
    /// An error which can occur during initialisation.
    type InitError;

    /// Data required for cyclic processing.
    type InputData;
    /// Data produced by cyclic processing.
    type OutputData;
    /// A report on the status of the cyclic processing.
    type StatusReport;
    /// An error which can occur during cyclic processing.
    type ProcError;

    /// Initialise the module, loading its parameters and opening its archives within the session.
    fn init(&mut self, init_data: Self::InitData, session: &Session)
        -> Result<(), Self::InitError>;

    /// Process one cycle.
    ///
    /// Returns the output data and status report of the cycle. Errors are reserved for faults of
    /// the module itself, recoverable per-cycle failures are reported through the status report.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>;
}

//! Simulated collaborators.
//!
//! Stand-ins for the scoring engine and the instrument so the scheduler can be
//! exercised end to end without hardware: the `simulate` command of the binary
//! and the integration tests both run on these.

pub mod instrument;
pub mod oracle;

pub use instrument::SimulatedInstrument;
pub use oracle::SimulatedOracle;

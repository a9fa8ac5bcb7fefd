//! Custom error types for the scheduler.
//!
//! This module defines the primary error type, `FaimsError`, together with the
//! narrower error enums of each component. Using the `thiserror` crate, it
//! provides a consistent way to describe what went wrong without letting any of
//! it escape to the instrument polling loop.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: loading or validating the method configuration failed.
//! - **`ScanFactory`**: the scan-descriptor factory could not build a request.
//!   The scheduler substitutes the factory's default scan.
//! - **`Oracle`**: the result oracle failed to score a spectrum. The spectrum is
//!   treated as having produced no candidates.
//! - **`Pipeline`**: the ingress pipeline was used after shutdown or one of its
//!   stages terminated abnormally.
//! - **`Scheduler`**: internal planner faults. These are always recovered inside
//!   `ScanScheduler::dequeue` and only ever show up in logs.
//!
//! By using `#[from]`, `FaimsError` can be created from each component error,
//! so setup code can use the `?` operator throughout.

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, FaimsError>;

/// Top-level error for the crate.
#[derive(Error, Debug)]
pub enum FaimsError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Scan descriptor construction failed.
    #[error("Scan factory error: {0}")]
    ScanFactory(#[from] ScanFactoryError),

    /// The result oracle failed.
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Ingress pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Internal scheduler fault.
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Failure while turning named parameters into a scan request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanFactoryError {
    /// A mass range where `first >= last`.
    #[error("Invalid mass range {first}-{last}")]
    InvalidMassRange {
        /// First mass of the rejected range
        first: f64,
        /// Last mass of the rejected range
        last: f64,
    },

    /// An isolation window with a non-positive width.
    #[error("Invalid isolation width {0}")]
    InvalidIsolationWidth(f64),

    /// The collaborator refused to build the request for another reason.
    #[error("Scan construction failed: {0}")]
    Construction(String),
}

/// Failure reported by the result oracle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    /// The spectrum could not be scored.
    #[error("Scoring failed for scan {scan}: {reason}")]
    Scoring {
        /// Scan number of the spectrum
        scan: u64,
        /// Reason given by the oracle
        reason: String,
    },
}

/// Ingress pipeline errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The pipeline no longer accepts spectra.
    #[error("Ingress pipeline is closed")]
    Closed,

    /// A stage task panicked or was cancelled.
    #[error("Pipeline stage '{stage}' failed: {reason}")]
    StageFailed {
        /// Stage name
        stage: &'static str,
        /// Join error description
        reason: String,
    },
}

/// Internal scheduler faults.
///
/// None of these propagate out of `dequeue`; they are logged and replaced by
/// the default scan.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The factory failed while synthesizing a planned scan.
    #[error("Failed to synthesize scan: {0}")]
    Synthesis(#[from] ScanFactoryError),

    /// The queue was refilled but popping it returned nothing.
    #[error("Pending queue empty after refill")]
    QueueUnderrun,

    /// The refill loop ran out of passes without producing work.
    #[error("Planner made no progress after {0} passes")]
    NoProgress(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FaimsError::from(ScanFactoryError::InvalidMassRange {
            first: 1600.0,
            last: 350.0,
        });
        assert_eq!(
            err.to_string(),
            "Scan factory error: Invalid mass range 1600-350"
        );
    }

    #[test]
    fn test_scheduler_error_wraps_factory() {
        let err = SchedulerError::from(ScanFactoryError::Construction("busy".into()));
        assert!(err.to_string().contains("busy"));
        assert!(matches!(err, SchedulerError::Synthesis(_)));
    }
}

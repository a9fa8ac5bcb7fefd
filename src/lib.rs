//! Real-time FAIMS scan scheduling for data-dependent acquisition.
//!
//! The crate decides, poll by poll, which scan a mass spectrometer acquires
//! next while cycling through a set of FAIMS compensation voltages (CVs).
//! Survey spectra flow in through the [`pipeline::IngressPipeline`], are scored
//! by a [`oracle::ResultOracle`], and turn into targeted requests and planner
//! feedback for the [`scheduler::ScanScheduler`], which the host polls with
//! `dequeue`.

pub mod config;
pub mod error;
pub mod factory;
pub mod logging;
pub mod oracle;
pub mod pipeline;
pub mod processor;
pub mod scan;
pub mod scheduler;
pub mod sim;
pub mod spectrum;

pub use config::MethodConfig;
pub use error::{AppResult, FaimsError};
pub use pipeline::{IngressPipeline, PipelineStats};
pub use processor::SpectrumProcessor;
pub use scan::{ScanKind, ScanRequest};
pub use scheduler::{EnqueueOutcome, ScanScheduler, SchedulerStats};
pub use spectrum::Spectrum;

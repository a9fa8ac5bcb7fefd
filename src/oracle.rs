//! Result oracle interface.
//!
//! The oracle is the scoring/deconvolution engine. It is consumed as a black
//! box: given one spectrum it returns scored candidates and remembers what it
//! returned (its suppression list) until the caller releases a candidate.
//! Methods take `&self` because the transform stage scores while the dispatch
//! stage releases; implementations keep their own interior locking.

use crate::error::OracleError;
use crate::scan::{CandidateId, PrecursorTarget};
use crate::spectrum::Spectrum;

/// Scoring engine consulted for every condition-defining spectrum.
pub trait ResultOracle: Send + Sync {
    /// Score one spectrum. `cv` is `Some` only when scoring is condition-aware.
    fn score(&self, spectrum: &Spectrum, cv: Option<f64>)
        -> Result<Vec<PrecursorTarget>, OracleError>;

    /// Number of candidates found by the most recent `score` call, including
    /// any the oracle chose not to return.
    fn total_candidate_count(&self) -> usize;

    /// Drop a candidate from the suppression list so it may be picked again.
    fn release_candidate(&self, id: CandidateId);
}

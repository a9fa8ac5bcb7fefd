//! Peak-picking oracle used in simulation.
//!
//! Every centroid above an intensity floor becomes a candidate unless a
//! candidate at the same m/z is still on the suppression list. Candidates stay
//! suppressed until released or until newer candidates push them off the
//! list, which mirrors how a real engine avoids picking the same precursor
//! twice while a scan for it is pending. Accepted candidates are never
//! released by the scheduler, so the list is bounded and evicts oldest first.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::trace;

use crate::error::OracleError;
use crate::oracle::ResultOracle;
use crate::scan::{CandidateId, PrecursorTarget};
use crate::spectrum::Spectrum;

/// Half width of the isolation window assigned to each candidate.
const HALF_WINDOW: f64 = 0.8;

/// Default number of candidates held on the suppression list.
pub const DEFAULT_SUPPRESSION_LIMIT: usize = 64;

#[derive(Debug, Default)]
struct OracleState {
    next_id: u64,
    /// Oldest first.
    suppressed: VecDeque<(CandidateId, f64)>,
    last_total: usize,
    released: u64,
}

/// Simulated scoring engine.
#[derive(Debug)]
pub struct SimulatedOracle {
    min_intensity: f64,
    mz_tolerance: f64,
    suppression_limit: usize,
    state: Mutex<OracleState>,
}

impl SimulatedOracle {
    /// Create an oracle that ignores centroids below `min_intensity`.
    pub fn new(min_intensity: f64) -> Self {
        Self {
            min_intensity,
            mz_tolerance: 0.01,
            suppression_limit: DEFAULT_SUPPRESSION_LIMIT,
            state: Mutex::new(OracleState::default()),
        }
    }

    /// Keep at most `limit` candidates suppressed (at least one).
    pub fn with_suppression_limit(mut self, limit: usize) -> Self {
        self.suppression_limit = limit.max(1);
        self
    }

    /// Candidates currently on the suppression list.
    pub fn suppressed_len(&self) -> usize {
        self.state.lock().suppressed.len()
    }

    /// Total `release_candidate` calls that removed a candidate.
    pub fn released(&self) -> u64 {
        self.state.lock().released
    }
}

impl Default for SimulatedOracle {
    fn default() -> Self {
        Self::new(1_000.0)
    }
}

impl ResultOracle for SimulatedOracle {
    fn score(
        &self,
        spectrum: &Spectrum,
        cv: Option<f64>,
    ) -> Result<Vec<PrecursorTarget>, OracleError> {
        let mut state = self.state.lock();
        if !spectrum.is_condition_defining() {
            state.last_total = 0;
            return Ok(Vec::new());
        }

        let total_intensity: f64 = spectrum.centroids.iter().map(|c| c.intensity).sum();
        let max_intensity = spectrum
            .centroids
            .iter()
            .map(|c| c.intensity)
            .fold(0.0_f64, f64::max);
        if max_intensity <= 0.0 {
            state.last_total = 0;
            return Ok(Vec::new());
        }

        let mut targets = Vec::new();
        for (i, peak) in spectrum.centroids.iter().enumerate() {
            if peak.intensity < self.min_intensity {
                continue;
            }
            let tolerance = self.mz_tolerance;
            if state
                .suppressed
                .iter()
                .any(|(_, mz)| (mz - peak.mz).abs() < tolerance)
            {
                continue;
            }

            let id = CandidateId(state.next_id);
            state.next_id += 1;
            if state.suppressed.len() >= self.suppression_limit {
                if let Some((evicted, _)) = state.suppressed.pop_front() {
                    trace!(candidate = evicted.0, "Suppression list full, evicting oldest");
                }
            }
            state.suppressed.push_back((id, peak.mz));

            let charge = 2 + (i % 3) as u8;
            targets.push(PrecursorTarget {
                id,
                window_start: peak.mz - HALF_WINDOW,
                window_end: peak.mz + HALF_WINDOW,
                charge,
                charge_range: (charge.saturating_sub(1).max(1), charge + 1),
                monoisotopic_mass: (peak.mz - 1.007_276) * f64::from(charge),
                score: peak.intensity / max_intensity,
                peak_count: 1 + i % 4,
                intensity_fraction: peak.intensity / total_intensity,
            });
        }

        state.last_total = targets.len();
        trace!(
            scan = spectrum.scan_number(),
            cv = ?cv,
            candidates = targets.len(),
            "Simulated oracle scored spectrum"
        );
        Ok(targets)
    }

    fn total_candidate_count(&self) -> usize {
        self.state.lock().last_total
    }

    fn release_candidate(&self, id: CandidateId) {
        let mut state = self.state.lock();
        if let Some(pos) = state.suppressed.iter().position(|(held, _)| *held == id) {
            state.suppressed.remove(pos);
            state.released += 1;
        }
    }
}

//! Spectrum processors.
//!
//! A processor turns one incoming spectrum into planner feedback and a ranked
//! list of targeted scan requests. The variant is picked once from the method
//! and never changes during an acquisition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{AcquisitionConfig, ProcessorKind};
use crate::factory::ScanFactory;
use crate::oracle::ResultOracle;
use crate::scan::{CandidateId, PrecursorTarget, ScanRequest};
use crate::spectrum::Spectrum;

/// Planner feedback derived from one spectrum.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Feedback {
    /// Candidate count observed at `cv`.
    Count {
        /// CV of the spectrum
        cv: f64,
        /// Total candidates reported by the oracle
        count: usize,
    },
    /// No target could be produced at `cv`.
    Empty {
        /// CV of the spectrum
        cv: f64,
    },
}

/// Output of [`SpectrumProcessor::process`].
///
/// Iterating yields the candidates in ranking order. `None` items are
/// placeholders meaning "nothing to add" and are dropped by the consumer. The
/// iterator is consumed once.
#[derive(Debug)]
pub struct ProcessedSpectrum {
    /// Scan number of the source spectrum, when known
    pub scan_number: Option<u64>,
    /// Feedback to apply before any candidate is dispatched
    pub feedback: Vec<Feedback>,
    candidates: std::vec::IntoIter<Option<ScanRequest>>,
}

impl ProcessedSpectrum {
    fn new(
        scan_number: Option<u64>,
        feedback: Vec<Feedback>,
        candidates: Vec<Option<ScanRequest>>,
    ) -> Self {
        Self {
            scan_number,
            feedback,
            candidates: candidates.into_iter(),
        }
    }

    fn empty(scan_number: Option<u64>) -> Self {
        Self::new(scan_number, Vec::new(), Vec::new())
    }
}

impl Iterator for ProcessedSpectrum {
    type Item = Option<ScanRequest>;

    fn next(&mut self) -> Option<Self::Item> {
        self.candidates.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.candidates.size_hint()
    }
}

/// Processor variants.
pub enum SpectrumProcessor {
    /// Produces neither candidates nor feedback.
    Passthrough,
    /// Oracle-driven top-N selection.
    Scoring {
        /// Scoring engine
        oracle: Arc<dyn ResultOracle>,
        /// Builds the targeted requests
        factory: Arc<dyn ScanFactory>,
        /// Targets kept per survey
        top_n: usize,
        /// Pass the spectrum's CV to the oracle
        condition_aware: bool,
        /// Next grouping id
        next_group: AtomicU64,
    },
}

impl std::fmt::Debug for SpectrumProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpectrumProcessor::Passthrough => f.write_str("Passthrough"),
            SpectrumProcessor::Scoring {
                top_n,
                condition_aware,
                ..
            } => f
                .debug_struct("Scoring")
                .field("top_n", top_n)
                .field("condition_aware", condition_aware)
                .finish_non_exhaustive(),
        }
    }
}

impl SpectrumProcessor {
    /// Scoring processor.
    pub fn scoring(
        oracle: Arc<dyn ResultOracle>,
        factory: Arc<dyn ScanFactory>,
        top_n: usize,
        condition_aware: bool,
    ) -> Self {
        SpectrumProcessor::Scoring {
            oracle,
            factory,
            top_n,
            condition_aware,
            next_group: AtomicU64::new(0),
        }
    }

    /// Pick the variant named by `config.processor`.
    pub fn from_config(
        config: &AcquisitionConfig,
        oracle: Arc<dyn ResultOracle>,
        factory: Arc<dyn ScanFactory>,
    ) -> Self {
        match config.processor {
            ProcessorKind::Passthrough => SpectrumProcessor::Passthrough,
            ProcessorKind::Scoring => Self::scoring(
                oracle,
                factory,
                config.top_n,
                config.condition_aware_scoring,
            ),
        }
    }

    /// Short variant name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SpectrumProcessor::Passthrough => "passthrough",
            SpectrumProcessor::Scoring { .. } => "scoring",
        }
    }

    /// Return a candidate the scheduler refused to the oracle.
    pub fn release_candidate(&self, id: CandidateId) {
        if let SpectrumProcessor::Scoring { oracle, .. } = self {
            oracle.release_candidate(id);
        }
    }

    /// Process one spectrum.
    ///
    /// Only condition-defining spectra are scored. Scoring failures are logged
    /// and treated as zero candidates so acquisition continues.
    pub fn process(&self, spectrum: &Spectrum) -> ProcessedSpectrum {
        let scan_number = spectrum.scan_number();
        let SpectrumProcessor::Scoring {
            oracle,
            factory,
            top_n,
            condition_aware,
            next_group,
        } = self
        else {
            return ProcessedSpectrum::empty(scan_number);
        };

        if !spectrum.is_condition_defining() {
            return ProcessedSpectrum::empty(scan_number);
        }

        let cv = spectrum.cv();
        let oracle_cv = if *condition_aware { cv } else { None };
        let (mut targets, total) = match oracle.score(spectrum, oracle_cv) {
            Ok(targets) => {
                let total = oracle.total_candidate_count();
                (targets, total)
            }
            Err(err) => {
                warn!(scan = ?scan_number, cv = ?cv, error = %err, "Oracle failed to score spectrum");
                (Vec::new(), 0)
            }
        };

        targets.sort_by(|a, b| rank_score(b).total_cmp(&rank_score(a)));
        for dropped in targets.iter().skip(*top_n) {
            oracle.release_candidate(dropped.id);
        }
        targets.truncate(*top_n);

        let group_id = next_group.fetch_add(1, Ordering::Relaxed);
        let candidates: Vec<Option<ScanRequest>> = targets
            .iter()
            .filter_map(|target| build_targeted(factory.as_ref(), oracle.as_ref(), target, cv, group_id))
            .map(Some)
            .collect();

        let mut feedback = Vec::with_capacity(2);
        if let Some(cv) = cv {
            feedback.push(Feedback::Count { cv, count: total });
            if candidates.is_empty() {
                feedback.push(Feedback::Empty { cv });
            }
        }

        debug!(
            scan = ?scan_number,
            cv = ?cv,
            total,
            selected = candidates.len(),
            group_id,
            "Survey spectrum processed"
        );

        let candidates = if candidates.is_empty() {
            vec![None]
        } else {
            candidates
        };
        ProcessedSpectrum::new(scan_number, feedback, candidates)
    }
}

/// Sort key for ranking. Non-finite scores rank below every real score.
fn rank_score(target: &PrecursorTarget) -> f64 {
    if target.score.is_finite() {
        target.score
    } else {
        f64::NEG_INFINITY
    }
}

fn build_targeted(
    factory: &dyn ScanFactory,
    oracle: &dyn ResultOracle,
    target: &PrecursorTarget,
    cv: Option<f64>,
    group_id: u64,
) -> Option<ScanRequest> {
    match factory.create_targeted_scan(target, cv, group_id) {
        Ok(request) => Some(request),
        Err(err) => {
            warn!(candidate = target.id.0, error = %err, "Could not build targeted scan, releasing candidate");
            oracle.release_candidate(target.id);
            None
        }
    }
}

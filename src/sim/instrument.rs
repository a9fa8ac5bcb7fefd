//! Simulated instrument.
//!
//! Turns a [`ScanRequest`] into a plausible [`Spectrum`]. Survey spectra get a
//! number of peaks that depends on the CV, so the planner sees different
//! candidate densities per condition, which is the whole point of the
//! allocation phase.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::scan::{cv_matches, ScanKind, ScanRequest};
use crate::spectrum::{
    Centroid, Spectrum, HEADER_ANALYZER, HEADER_MS_ORDER, HEADER_START_TIME, TRAILER_ACCESS_ID,
    TRAILER_CV,
};

/// Seconds of instrument time each scan takes, used for the retention clock.
const SCAN_SECONDS: f64 = 0.05;

/// Deterministic spectrum generator.
#[derive(Debug)]
pub struct SimulatedInstrument {
    rng: StdRng,
    density: Vec<(f64, usize)>,
    default_density: usize,
    scan_number: u64,
}

impl SimulatedInstrument {
    /// New instrument seeded for reproducible runs.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            density: Vec::new(),
            default_density: 10,
            scan_number: 0,
        }
    }

    /// Mean number of survey peaks at `cv`.
    pub fn with_density(mut self, cv: f64, peaks: usize) -> Self {
        self.density.push((cv, peaks));
        self
    }

    /// Mean number of survey peaks for CVs without an explicit density.
    pub fn with_default_density(mut self, peaks: usize) -> Self {
        self.default_density = peaks;
        self
    }

    /// Number of spectra produced so far.
    pub fn scans_acquired(&self) -> u64 {
        self.scan_number
    }

    fn density_for(&self, cv: Option<f64>) -> usize {
        cv.and_then(|cv| {
            self.density
                .iter()
                .find(|(known, _)| cv_matches(*known, cv))
                .map(|(_, peaks)| *peaks)
        })
        .unwrap_or(self.default_density)
    }

    /// Acquire one spectrum for `request`.
    pub fn acquire(&mut self, request: &ScanRequest) -> Spectrum {
        self.scan_number += 1;

        let (ms_order, peaks) = match request.kind() {
            ScanKind::Survey => {
                let mean = self.density_for(request.cv());
                let spread = (mean / 4).max(1);
                let low = mean.saturating_sub(spread);
                (1, self.rng.gen_range(low..=mean + spread))
            }
            ScanKind::Agc => (1, self.rng.gen_range(0..=3)),
            ScanKind::Targeted => (2, self.rng.gen_range(5..=30)),
        };

        let centroids = (0..peaks)
            .map(|_| Centroid {
                mz: self.rng.gen_range(request.first_mass()..request.last_mass()),
                intensity: 10f64.powf(self.rng.gen_range(2.5..6.0)),
                resolution: Some(60_000.0),
            })
            .collect();

        let mut spectrum = Spectrum::new(self.scan_number)
            .with_header(HEADER_MS_ORDER, ms_order)
            .with_header(HEADER_ANALYZER, request.analyzer())
            .with_header(
                HEADER_START_TIME,
                self.scan_number as f64 * SCAN_SECONDS / 60.0,
            )
            .with_trailer(TRAILER_ACCESS_ID, request.kind().access_id())
            .with_centroids(centroids);
        if let Some(cv) = request.cv() {
            spectrum = spectrum.with_trailer(TRAILER_CV, cv);
        }
        spectrum
    }
}

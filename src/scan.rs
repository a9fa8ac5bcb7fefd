//! Scan descriptors and precursor targets.
//!
//! A [`ScanRequest`] is the opaque value handed to the host when it polls for
//! work. It is created by a [`ScanFactory`](crate::factory::ScanFactory), held by
//! exactly one queue at a time, and never modified after construction: the
//! `with_*` builders consume the value.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::CV_TOLERANCE;

/// Returns true if two CV values denote the same condition.
pub fn cv_matches(a: f64, b: f64) -> bool {
    (a - b).abs() < CV_TOLERANCE
}

/// Role of a scan in the acquisition cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanKind {
    /// Broad, non-targeted acquisition used to discover candidates
    Survey,
    /// Short calibration acquisition paired with a survey
    Agc,
    /// Acquisition aimed at one previously discovered candidate
    Targeted,
}

impl ScanKind {
    /// Access id written into the scan trailer so returning spectra can be
    /// matched back to their role.
    pub fn access_id(self) -> i32 {
        match self {
            ScanKind::Survey => 1,
            ScanKind::Agc => 2,
            ScanKind::Targeted => 3,
        }
    }

    /// Inverse of [`ScanKind::access_id`].
    pub fn from_access_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(ScanKind::Survey),
            2 => Some(ScanKind::Agc),
            3 => Some(ScanKind::Targeted),
            _ => None,
        }
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanKind::Survey => write!(f, "Survey"),
            ScanKind::Agc => write!(f, "AGC"),
            ScanKind::Targeted => write!(f, "Targeted"),
        }
    }
}

/// Mass analyzer used for an acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Analyzer {
    /// High-resolution orbitrap analyzer
    Orbitrap,
    /// Linear ion trap
    IonTrap,
}

impl fmt::Display for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Analyzer::Orbitrap => write!(f, "Orbitrap"),
            Analyzer::IonTrap => write!(f, "IonTrap"),
        }
    }
}

/// Identifier the oracle assigns to a candidate so it can later be removed
/// from the oracle's suppression list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateId(pub u64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Isolation window in m/z.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IsolationWindow {
    /// Window center
    pub center: f64,
    /// Full window width
    pub width: f64,
}

impl IsolationWindow {
    /// Window spanning `start..end`.
    pub fn from_bounds(start: f64, end: f64) -> Self {
        Self {
            center: (start + end) / 2.0,
            width: end - start,
        }
    }

    /// Lower bound of the window.
    pub fn start(&self) -> f64 {
        self.center - self.width / 2.0
    }

    /// Upper bound of the window.
    pub fn end(&self) -> f64 {
        self.center + self.width / 2.0
    }
}

/// One requested measurement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    kind: ScanKind,
    analyzer: Analyzer,
    first_mass: f64,
    last_mass: f64,
    isolation: Option<IsolationWindow>,
    charge: Option<u8>,
    cv: Option<f64>,
    delay_ms: u32,
    group_id: Option<u64>,
    candidate: Option<CandidateId>,
}

impl ScanRequest {
    /// Create a request with the mandatory fields.
    pub fn new(kind: ScanKind, analyzer: Analyzer, first_mass: f64, last_mass: f64) -> Self {
        Self {
            kind,
            analyzer,
            first_mass,
            last_mass,
            isolation: None,
            charge: None,
            cv: None,
            delay_ms: 0,
            group_id: None,
            candidate: None,
        }
    }

    /// Set the CV the scan is acquired at.
    pub fn with_cv(mut self, cv: Option<f64>) -> Self {
        self.cv = cv;
        self
    }

    /// Set the isolation window.
    pub fn with_isolation(mut self, window: IsolationWindow) -> Self {
        self.isolation = Some(window);
        self
    }

    /// Set the charge estimate.
    pub fn with_charge(mut self, charge: u8) -> Self {
        self.charge = Some(charge);
        self
    }

    /// Set the acquisition delay.
    pub fn with_delay_ms(mut self, delay_ms: u32) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Set the grouping id shared by requests from the same survey.
    pub fn with_group(mut self, group_id: u64) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Attach the oracle candidate this request was built from.
    pub fn with_candidate(mut self, candidate: CandidateId) -> Self {
        self.candidate = Some(candidate);
        self
    }

    /// Scan role.
    pub fn kind(&self) -> ScanKind {
        self.kind
    }

    /// Mass analyzer.
    pub fn analyzer(&self) -> Analyzer {
        self.analyzer
    }

    /// First mass of the scan range.
    pub fn first_mass(&self) -> f64 {
        self.first_mass
    }

    /// Last mass of the scan range.
    pub fn last_mass(&self) -> f64 {
        self.last_mass
    }

    /// Isolation window, for targeted scans.
    pub fn isolation(&self) -> Option<IsolationWindow> {
        self.isolation
    }

    /// Charge estimate, for targeted scans.
    pub fn charge(&self) -> Option<u8> {
        self.charge
    }

    /// CV value, if the scan is tied to a condition.
    pub fn cv(&self) -> Option<f64> {
        self.cv
    }

    /// Acquisition delay in milliseconds.
    pub fn delay_ms(&self) -> u32 {
        self.delay_ms
    }

    /// Grouping id.
    pub fn group_id(&self) -> Option<u64> {
        self.group_id
    }

    /// Oracle candidate backing this request.
    pub fn candidate(&self) -> Option<CandidateId> {
        self.candidate
    }
}

/// A candidate returned by the result oracle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrecursorTarget {
    /// Oracle-assigned id, used for suppression-list removal
    pub id: CandidateId,
    /// Isolation window start (m/z)
    pub window_start: f64,
    /// Isolation window end (m/z)
    pub window_end: f64,
    /// Most likely charge state
    pub charge: u8,
    /// Lowest and highest plausible charge
    pub charge_range: (u8, u8),
    /// Monoisotopic mass in Da
    pub monoisotopic_mass: f64,
    /// Quality score, higher is better
    pub score: f64,
    /// Number of peaks supporting the candidate
    pub peak_count: usize,
    /// Fraction of window intensity explained by the candidate
    pub intensity_fraction: f64,
}

impl PrecursorTarget {
    /// Isolation window derived from the start/end bounds.
    pub fn isolation_window(&self) -> IsolationWindow {
        IsolationWindow::from_bounds(self.window_start, self.window_end)
    }

    /// Window center.
    pub fn center(&self) -> f64 {
        (self.window_start + self.window_end) / 2.0
    }

    /// Window width.
    pub fn width(&self) -> f64 {
        self.window_end - self.window_start
    }
}

//! Observed spectra as delivered by the host.
//!
//! The host exposes each spectrum as two string maps (header and trailer) plus
//! a centroid list. Only a handful of keys matter to the scheduler; typed
//! accessors below parse them on demand and return `None` for anything missing
//! or malformed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::scan::ScanKind;

/// Header key holding the MS order (1 for surveys, 2 for fragment scans).
pub const HEADER_MS_ORDER: &str = "MSOrder";
/// Header key holding the analyzer name.
pub const HEADER_ANALYZER: &str = "Analyzer";
/// Header key holding the retention time in minutes.
pub const HEADER_START_TIME: &str = "StartTime";
/// Header key holding the scan number.
pub const HEADER_SCAN_NUMBER: &str = "ScanNumber";
/// Trailer key holding the CV the spectrum was acquired at.
pub const TRAILER_CV: &str = "FAIMS CV";
/// Trailer key holding the access id of the request that produced the spectrum.
pub const TRAILER_ACCESS_ID: &str = "Access Id";

/// A single centroided peak.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    /// Mass-to-charge ratio
    pub mz: f64,
    /// Peak intensity
    pub intensity: f64,
    /// Resolution at this peak, when the analyzer reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<f64>,
}

/// One observed spectrum.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Header values keyed by name
    pub header: HashMap<String, String>,
    /// Trailer values keyed by name
    pub trailer: HashMap<String, String>,
    /// Centroid list
    pub centroids: Vec<Centroid>,
    /// Time the spectrum was handed to the pipeline
    pub received_at: DateTime<Utc>,
}

impl Spectrum {
    /// Empty spectrum with the given scan number.
    pub fn new(scan_number: u64) -> Self {
        let mut header = HashMap::new();
        header.insert(HEADER_SCAN_NUMBER.to_string(), scan_number.to_string());
        Self {
            header,
            trailer: HashMap::new(),
            centroids: Vec::new(),
            received_at: Utc::now(),
        }
    }

    /// Add a header entry.
    pub fn with_header(mut self, key: &str, value: impl ToString) -> Self {
        self.header.insert(key.to_string(), value.to_string());
        self
    }

    /// Add a trailer entry.
    pub fn with_trailer(mut self, key: &str, value: impl ToString) -> Self {
        self.trailer.insert(key.to_string(), value.to_string());
        self
    }

    /// Replace the centroid list.
    pub fn with_centroids(mut self, centroids: Vec<Centroid>) -> Self {
        self.centroids = centroids;
        self
    }

    /// MS order from the header.
    pub fn ms_order(&self) -> Option<u8> {
        parse(self.header.get(HEADER_MS_ORDER))
    }

    /// Analyzer name from the header.
    pub fn analyzer(&self) -> Option<&str> {
        self.header.get(HEADER_ANALYZER).map(String::as_str)
    }

    /// Retention time in minutes.
    pub fn start_time(&self) -> Option<f64> {
        parse(self.header.get(HEADER_START_TIME))
    }

    /// Scan number.
    pub fn scan_number(&self) -> Option<u64> {
        parse(self.header.get(HEADER_SCAN_NUMBER))
    }

    /// CV value from the trailer.
    pub fn cv(&self) -> Option<f64> {
        parse(self.trailer.get(TRAILER_CV))
    }

    /// Access id from the trailer.
    pub fn access_id(&self) -> Option<i32> {
        parse(self.trailer.get(TRAILER_ACCESS_ID))
    }

    /// Role of the request that produced this spectrum.
    pub fn role(&self) -> Option<ScanKind> {
        self.access_id().and_then(ScanKind::from_access_id)
    }

    /// True for the scan type whose results drive CV planning.
    pub fn is_condition_defining(&self) -> bool {
        self.role() == Some(ScanKind::Survey) && self.ms_order().unwrap_or(1) == 1
    }
}

fn parse<T: std::str::FromStr>(value: Option<&String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_parse_maps() {
        let spectrum = Spectrum::new(42)
            .with_header(HEADER_MS_ORDER, 1)
            .with_header(HEADER_ANALYZER, "Orbitrap")
            .with_header(HEADER_START_TIME, "12.5")
            .with_trailer(TRAILER_CV, "-45.00")
            .with_trailer(TRAILER_ACCESS_ID, ScanKind::Survey.access_id());

        assert_eq!(spectrum.scan_number(), Some(42));
        assert_eq!(spectrum.ms_order(), Some(1));
        assert_eq!(spectrum.analyzer(), Some("Orbitrap"));
        assert_eq!(spectrum.start_time(), Some(12.5));
        assert_eq!(spectrum.cv(), Some(-45.0));
        assert_eq!(spectrum.role(), Some(ScanKind::Survey));
        assert!(spectrum.is_condition_defining());
    }

    #[test]
    fn test_agc_and_unknown_roles_are_not_condition_defining() {
        let agc = Spectrum::new(1).with_trailer(TRAILER_ACCESS_ID, ScanKind::Agc.access_id());
        assert!(!agc.is_condition_defining());

        let unknown = Spectrum::new(2).with_trailer(TRAILER_ACCESS_ID, "not a number");
        assert_eq!(unknown.role(), None);
        assert!(!unknown.is_condition_defining());
    }
}

//! Scan-descriptor factory.
//!
//! The scheduler never builds [`ScanRequest`] values itself; it asks a
//! [`ScanFactory`]. [`TemplateScanFactory`] is the implementation used by the
//! binary and tests: it fills requests from the `[scans]` section of the method.

use crate::config::ScanTemplates;
use crate::error::ScanFactoryError;
use crate::scan::{IsolationWindow, PrecursorTarget, ScanKind, ScanRequest};

/// Builds scan requests from named parameters.
pub trait ScanFactory: Send + Sync {
    /// Survey scan, optionally tied to a CV.
    fn create_survey_scan(&self, cv: Option<f64>) -> Result<ScanRequest, ScanFactoryError>;

    /// AGC scan, optionally tied to a CV.
    fn create_agc_scan(&self, cv: Option<f64>) -> Result<ScanRequest, ScanFactoryError>;

    /// Targeted scan for one oracle candidate.
    fn create_targeted_scan(
        &self,
        target: &PrecursorTarget,
        cv: Option<f64>,
        group_id: u64,
    ) -> Result<ScanRequest, ScanFactoryError>;

    /// Context-free AGC scan. Must not fail; this is what the host receives
    /// whenever scheduling itself fails.
    fn default_scan(&self) -> ScanRequest;
}

/// Factory backed by the method's scan templates.
#[derive(Debug, Clone)]
pub struct TemplateScanFactory {
    templates: ScanTemplates,
}

impl TemplateScanFactory {
    /// Create a factory from validated templates.
    pub fn new(templates: ScanTemplates) -> Self {
        Self { templates }
    }

    fn checked_range(first: f64, last: f64) -> Result<(f64, f64), ScanFactoryError> {
        if first.is_finite() && last.is_finite() && first < last {
            Ok((first, last))
        } else {
            Err(ScanFactoryError::InvalidMassRange { first, last })
        }
    }
}

impl Default for TemplateScanFactory {
    fn default() -> Self {
        Self::new(ScanTemplates::default())
    }
}

impl ScanFactory for TemplateScanFactory {
    fn create_survey_scan(&self, cv: Option<f64>) -> Result<ScanRequest, ScanFactoryError> {
        let t = &self.templates.survey;
        let (first, last) = Self::checked_range(t.first_mass, t.last_mass)?;
        Ok(ScanRequest::new(ScanKind::Survey, t.analyzer, first, last).with_cv(cv))
    }

    fn create_agc_scan(&self, cv: Option<f64>) -> Result<ScanRequest, ScanFactoryError> {
        let t = &self.templates.agc;
        let (first, last) = Self::checked_range(t.first_mass, t.last_mass)?;
        Ok(ScanRequest::new(ScanKind::Agc, t.analyzer, first, last).with_cv(cv))
    }

    fn create_targeted_scan(
        &self,
        target: &PrecursorTarget,
        cv: Option<f64>,
        group_id: u64,
    ) -> Result<ScanRequest, ScanFactoryError> {
        let t = &self.templates.targeted;
        let (first, last) = Self::checked_range(t.first_mass, t.last_mass)?;

        let window = match t.isolation_width {
            Some(width) => IsolationWindow {
                center: target.center(),
                width,
            },
            None => target.isolation_window(),
        };
        if window.width.is_nan() || window.width <= 0.0 {
            return Err(ScanFactoryError::InvalidIsolationWidth(window.width));
        }

        Ok(ScanRequest::new(ScanKind::Targeted, t.analyzer, first, last)
            .with_cv(cv)
            .with_isolation(window)
            .with_charge(target.charge)
            .with_delay_ms(t.delay_ms)
            .with_group(group_id)
            .with_candidate(target.id))
    }

    fn default_scan(&self) -> ScanRequest {
        let t = &self.templates.agc;
        ScanRequest::new(ScanKind::Agc, t.analyzer, t.first_mass, t.last_mass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{Analyzer, CandidateId};

    fn target(start: f64, end: f64) -> PrecursorTarget {
        PrecursorTarget {
            id: CandidateId(5),
            window_start: start,
            window_end: end,
            charge: 2,
            charge_range: (2, 3),
            monoisotopic_mass: 1000.0,
            score: 0.9,
            peak_count: 4,
            intensity_fraction: 0.8,
        }
    }

    #[test]
    fn test_survey_and_agc_carry_cv() {
        let factory = TemplateScanFactory::default();

        let survey = factory.create_survey_scan(Some(-60.0)).unwrap();
        assert_eq!(survey.kind(), ScanKind::Survey);
        assert_eq!(survey.cv(), Some(-60.0));
        assert_eq!(survey.analyzer(), Analyzer::Orbitrap);

        let agc = factory.create_agc_scan(None).unwrap();
        assert_eq!(agc.kind(), ScanKind::Agc);
        assert_eq!(agc.cv(), None);
    }

    #[test]
    fn test_targeted_uses_target_window() {
        let factory = TemplateScanFactory::default();
        let request = factory
            .create_targeted_scan(&target(500.0, 502.0), Some(-45.0), 3)
            .unwrap();

        let window = request.isolation().unwrap();
        assert!((window.center - 501.0).abs() < 1e-9);
        assert!((window.width - 2.0).abs() < 1e-9);
        assert_eq!(request.charge(), Some(2));
        assert_eq!(request.group_id(), Some(3));
        assert_eq!(request.candidate(), Some(CandidateId(5)));
    }

    #[test]
    fn test_targeted_width_override() {
        let mut templates = ScanTemplates::default();
        templates.targeted.isolation_width = Some(1.6);
        let factory = TemplateScanFactory::new(templates);

        let request = factory
            .create_targeted_scan(&target(500.0, 502.0), None, 0)
            .unwrap();
        assert!((request.isolation().unwrap().width - 1.6).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_window_is_an_error() {
        let factory = TemplateScanFactory::default();
        let result = factory.create_targeted_scan(&target(500.0, 500.0), None, 0);
        assert_eq!(result, Err(ScanFactoryError::InvalidIsolationWidth(0.0)));
    }

    #[test]
    fn test_inverted_template_range_is_an_error() {
        let mut templates = ScanTemplates::default();
        templates.survey.first_mass = 1600.0;
        templates.survey.last_mass = 350.0;
        let factory = TemplateScanFactory::new(templates);

        assert!(matches!(
            factory.create_survey_scan(None),
            Err(ScanFactoryError::InvalidMassRange { .. })
        ));
        // The fallback scan never fails.
        assert_eq!(factory.default_scan().kind(), ScanKind::Agc);
    }
}

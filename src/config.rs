//! Method configuration using Figment.
//!
//! The acquisition method is loaded once, validated, and then treated as a
//! frozen record: nothing in the scheduler re-reads it at runtime.
//!
//! Configuration is loaded from:
//! 1. A TOML method file (default: `config/method.toml`)
//! 2. Environment variables prefixed with `RUST_FAIMS_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated with a double underscore:
//!
//! ```text
//! RUST_FAIMS_APPLICATION__LOG_LEVEL=debug
//! RUST_FAIMS_ACQUISITION__CYCLE_BUDGET=40
//! RUST_FAIMS_ACQUISITION__CYCLING_ENABLED=false
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rust_faims::config::MethodConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = MethodConfig::load_from("config/method.toml")?;
//!     println!("CVs: {:?}", config.acquisition.cv_values);
//!     println!("Budget per cycle: {}", config.acquisition.cycle_budget);
//!     Ok(())
//! }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::scan::Analyzer;

/// Two CV values closer than this are considered the same condition.
pub const CV_TOLERANCE: f64 = 1e-6;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be parsed.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// The configuration parsed but is not usable.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    /// The effective configuration could not be written out as TOML.
    #[error("Configuration serialize error: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Top-level method configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Scheduling parameters
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Parameter templates handed to the scan factory
    #[serde(default)]
    pub scans: ScanTemplates,
    /// Ingress pipeline sizing
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub log_json: bool,
}

/// Which spectrum processor the pipeline runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    /// Oracle-driven scoring with top-N target selection
    #[default]
    Scoring,
    /// No-op processor that never produces targets or feedback
    Passthrough,
}

/// Scheduling parameters for one acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// CV values the instrument cycles through
    #[serde(default = "default_cv_values")]
    pub cv_values: Vec<f64>,
    /// Whether CV cycling (and therefore planning) is enabled
    #[serde(default = "default_true")]
    pub cycling_enabled: bool,
    /// Survey scans distributed across all CVs per cycle
    #[serde(default = "default_cycle_budget")]
    pub cycle_budget: u32,
    /// Best-scored candidates turned into targeted scans per survey
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Pending-queue ceiling; enqueues beyond this are rejected
    #[serde(default = "default_max_targeted")]
    pub max_targeted_per_survey: usize,
    /// Pass the active CV to the oracle when scoring
    #[serde(default = "default_true")]
    pub condition_aware_scoring: bool,
    /// Surveys per visit before rotating to another CV (0 = until exhausted)
    #[serde(default)]
    pub switch_interval: u32,
    /// Only ever move to the previous CV index when rotating
    #[serde(default = "default_true")]
    pub step_constrained: bool,
    /// Pair every survey with an AGC scan
    #[serde(default = "default_true")]
    pub agc_enabled: bool,
    /// Shelve stale targeted requests for their CV instead of rejecting them
    #[serde(default)]
    pub shelve_stale_targets: bool,
    /// Processor selected at construction
    #[serde(default)]
    pub processor: ProcessorKind,
}

/// Survey/AGC acquisition template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullScanTemplate {
    /// Mass analyzer
    pub analyzer: Analyzer,
    /// First mass of the scan range
    pub first_mass: f64,
    /// Last mass of the scan range
    pub last_mass: f64,
}

/// Targeted acquisition template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetedTemplate {
    /// Mass analyzer
    pub analyzer: Analyzer,
    /// First mass of the fragment scan range
    pub first_mass: f64,
    /// Upper bound for the fragment scan range
    pub last_mass: f64,
    /// Fixed isolation width; the target's own window is used when unset
    #[serde(default)]
    pub isolation_width: Option<f64>,
    /// Delay before the scan is acquired, in milliseconds
    #[serde(default)]
    pub delay_ms: u32,
}

/// Parameter templates consumed by the scan factory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTemplates {
    /// Survey scan parameters
    #[serde(default = "default_survey_template")]
    pub survey: FullScanTemplate,
    /// AGC scan parameters
    #[serde(default = "default_agc_template")]
    pub agc: FullScanTemplate,
    /// Targeted scan parameters
    #[serde(default = "default_targeted_template")]
    pub targeted: TargetedTemplate,
}

/// Ingress pipeline channel sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Spectra buffered between intake and transform
    #[serde(default = "default_intake_capacity")]
    pub intake_capacity: usize,
    /// Processed spectra buffered between transform and dispatch
    #[serde(default = "default_dispatch_capacity")]
    pub dispatch_capacity: usize,
}

// ============================================================================
// Defaults
// ============================================================================

fn default_name() -> String {
    "rust_faims".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cv_values() -> Vec<f64> {
    vec![-45.0, -60.0, -75.0]
}

fn default_cycle_budget() -> u32 {
    20
}

fn default_top_n() -> usize {
    5
}

fn default_max_targeted() -> usize {
    20
}

fn default_survey_template() -> FullScanTemplate {
    FullScanTemplate {
        analyzer: Analyzer::Orbitrap,
        first_mass: 350.0,
        last_mass: 1600.0,
    }
}

fn default_agc_template() -> FullScanTemplate {
    FullScanTemplate {
        analyzer: Analyzer::IonTrap,
        first_mass: 350.0,
        last_mass: 1600.0,
    }
}

fn default_targeted_template() -> TargetedTemplate {
    TargetedTemplate {
        analyzer: Analyzer::Orbitrap,
        first_mass: 120.0,
        last_mass: 2000.0,
        isolation_width: None,
        delay_ms: 0,
    }
}

fn default_intake_capacity() -> usize {
    256
}

fn default_dispatch_capacity() -> usize {
    64
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            cv_values: default_cv_values(),
            cycling_enabled: true,
            cycle_budget: default_cycle_budget(),
            top_n: default_top_n(),
            max_targeted_per_survey: default_max_targeted(),
            condition_aware_scoring: true,
            switch_interval: 0,
            step_constrained: true,
            agc_enabled: true,
            shelve_stale_targets: false,
            processor: ProcessorKind::Scoring,
        }
    }
}

impl Default for ScanTemplates {
    fn default() -> Self {
        Self {
            survey: default_survey_template(),
            agc: default_agc_template(),
            targeted: default_targeted_template(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            intake_capacity: default_intake_capacity(),
            dispatch_capacity: default_dispatch_capacity(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl MethodConfig {
    /// Load configuration from `config/method.toml` and environment variables.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be loaded or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/method.toml")
    }

    /// Load configuration from a specific file path.
    ///
    /// Environment variables take precedence over the file. A missing file is
    /// not an error: every section has defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RUST_FAIMS_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a method from a TOML string, without environment overrides.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::string(source))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Render the effective method, overrides applied, as a TOML document.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - CV list is non-empty, finite and free of duplicates when cycling
    /// - Budget, top-N and the queue ceiling are positive
    /// - Every scan template has an increasing mass range
    /// - Pipeline capacities are positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.validate_acquisition()?;

        let templates = [
            ("survey", self.scans.survey.first_mass, self.scans.survey.last_mass),
            ("agc", self.scans.agc.first_mass, self.scans.agc.last_mass),
            (
                "targeted",
                self.scans.targeted.first_mass,
                self.scans.targeted.last_mass,
            ),
        ];
        for (name, first, last) in templates {
            if !(first.is_finite() && last.is_finite()) || first <= 0.0 || first >= last {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid mass range for '{}' scans: {}-{}",
                    name, first, last
                )));
            }
        }
        if let Some(width) = self.scans.targeted.isolation_width {
            if width.is_nan() || width <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid targeted isolation_width {}. Must be > 0",
                    width
                )));
            }
        }

        if self.pipeline.intake_capacity == 0 || self.pipeline.dispatch_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "Pipeline capacities must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_acquisition(&self) -> Result<(), ConfigError> {
        let acq = &self.acquisition;

        if acq.cycling_enabled && acq.cv_values.is_empty() {
            return Err(ConfigError::ValidationError(
                "cv_values cannot be empty when cycling is enabled".to_string(),
            ));
        }
        for (i, cv) in acq.cv_values.iter().enumerate() {
            if !cv.is_finite() {
                return Err(ConfigError::ValidationError(format!(
                    "CV value at position {} is not finite",
                    i
                )));
            }
            if acq.cv_values[..i]
                .iter()
                .any(|other| (other - cv).abs() < CV_TOLERANCE)
            {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate CV value: {}",
                    cv
                )));
            }
        }

        if acq.cycle_budget == 0 {
            return Err(ConfigError::ValidationError(
                "cycle_budget must be > 0".to_string(),
            ));
        }
        if acq.top_n == 0 {
            return Err(ConfigError::ValidationError(
                "top_n must be > 0".to_string(),
            ));
        }
        if acq.max_targeted_per_survey == 0 {
            return Err(ConfigError::ValidationError(
                "max_targeted_per_survey must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

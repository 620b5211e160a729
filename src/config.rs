//! Configuration loading from TOML files
//!
//! Every section is optional; missing keys fall back to the defaults below, so
//! an empty file is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use serde::Deserialize;

use crate::error::TrackingError;
use crate::filter::MIN_MOVEMENT_METERS;
use crate::stops::StopConfig;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { listen: "0.0.0.0:8080".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: PathBuf::from("data/tracking"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Offset of the agents' local calendar from UTC, used to bucket sessions by day
    pub utc_offset_hours: i32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self { utc_offset_hours: -5 }
    }
}

impl TrackingConfig {
    pub fn utc_offset(&self) -> Result<FixedOffset, TrackingError> {
        self.utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                TrackingError::Config(format!("utc_offset_hours out of range: {}", self.utc_offset_hours))
            })
    }
}

/// Thresholds for the noise filter and stop detector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum movement from the last kept point for the rendered path (meters)
    pub min_movement_meters: f64,
    /// Stop cluster radius (meters)
    pub stop_radius_meters: f64,
    /// Minimum dwell for a stop (minutes)
    pub min_stop_minutes: f64,
    /// Minimum track length before stop detection runs
    pub min_points_for_stops: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let stops = StopConfig::default();
        Self {
            min_movement_meters: MIN_MOVEMENT_METERS,
            stop_radius_meters: stops.radius_meters,
            min_stop_minutes: stops.min_duration_minutes,
            min_points_for_stops: stops.min_points,
        }
    }
}

impl AnalysisConfig {
    pub fn stop_config(&self) -> StopConfig {
        StopConfig {
            radius_meters: self.stop_radius_meters,
            min_duration_minutes: self.min_stop_minutes,
            min_points: self.min_points_for_stops,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub tracking: TrackingConfig,
    pub analysis: AnalysisConfig,
}

impl Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, TrackingError> {
        let config: Config =
            toml::from_str(content).map_err(|e| TrackingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, TrackingError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| TrackingError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<(), TrackingError> {
        self.tracking.utc_offset()?;
        let a = &self.analysis;
        if !non_negative(a.min_movement_meters) {
            return Err(TrackingError::Config("analysis.min_movement_meters must be >= 0".to_string()));
        }
        if !non_negative(a.stop_radius_meters) || a.stop_radius_meters == 0.0 {
            return Err(TrackingError::Config("analysis.stop_radius_meters must be > 0".to_string()));
        }
        if !non_negative(a.min_stop_minutes) {
            return Err(TrackingError::Config("analysis.min_stop_minutes must be >= 0".to_string()));
        }
        Ok(())
    }
}

fn non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.tracking.utc_offset_hours, -5);
        assert_eq!(config.analysis, AnalysisConfig::default());
        assert_eq!(config.analysis.stop_config(), StopConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml_str(
            r#"
[storage]
backend = "memory"

[analysis]
stop_radius_meters = 50.0
"#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.data_dir, PathBuf::from("data/tracking"));
        assert_eq!(config.analysis.stop_radius_meters, 50.0);
        assert_eq!(config.analysis.min_stop_minutes, 5.0);
    }

    #[test]
    fn test_invalid_offset_rejected() {
        let err = Config::from_toml_str("[tracking]\nutc_offset_hours = 30\n").unwrap_err();
        assert!(matches!(err, TrackingError::Config(_)));
    }

    #[test]
    fn test_invalid_radius_rejected() {
        let err = Config::from_toml_str("[analysis]\nstop_radius_meters = 0.0\n").unwrap_err();
        assert!(matches!(err, TrackingError::Config(_)));
    }

    #[test]
    fn test_utc_offset() {
        let offset = TrackingConfig::default().utc_offset().unwrap();
        assert_eq!(offset.local_minus_utc(), -5 * 3600);
    }
}

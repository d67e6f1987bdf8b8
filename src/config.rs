//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the tide-watch.toml file.
//! It provides a centralized way to configure sampling cadence, anchorage matching,
//! and the inbound data paths the watcher listens to.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default configuration file name, looked up in the working directory
pub const CONFIG_FILE: &str = "tide-watch.toml";

/// Application configuration loaded from tide-watch.toml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Depth recording and anchorage settings
    #[serde(default)]
    pub recording: RecordingConfig,
    /// Inbound data path and timeout settings
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// Depth recording configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Minutes between each recorded (averaged) depth sample
    pub record_data_interval: u32,
    /// Number of raw depth readings in the moving average
    pub depth_samples_in_average: usize,
    /// Max meters between two points for them to be considered the same anchorage
    pub max_location_distance: f64,
    /// Directory holding locations.json and the per-anchorage depth logs
    pub data_dir: PathBuf,
}

/// Inbound data configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Path carrying depth below surface in meters
    pub depth_path: String,
    /// Depth source type filter (empty matches any)
    pub depth_source_type: String,
    /// Depth source talker filter (empty matches any)
    pub depth_source_talker: String,
    /// Seconds without depth data before reporting an error
    pub depth_data_timeout: u64,
    /// Path carrying the vessel position
    pub pos_path: String,
    /// Seconds without position data before reporting an error
    pub pos_data_timeout: u64,
    /// Path carrying main engine revolutions
    pub engine_rpm_path: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        RecordingConfig {
            record_data_interval: 5,
            depth_samples_in_average: 60,
            max_location_distance: 100.0,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        SourcesConfig {
            depth_path: "environment.depth.belowSurface".to_string(),
            depth_source_type: String::new(),
            depth_source_talker: String::new(),
            depth_data_timeout: 30,
            pos_path: "navigation.position".to_string(),
            pos_data_timeout: 30,
            engine_rpm_path: "propulsion.1.revolutions".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from tide-watch.toml file
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        interval = config.recording.record_data_interval,
                        "Loaded configuration"
                    );
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Invalid config file format, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save current configuration to the given path
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        info!(path = %path.as_ref().display(), "Configuration saved");
        Ok(())
    }

    /// Sample interval in minutes, never zero
    pub fn sample_interval(&self) -> u32 {
        self.recording.record_data_interval.max(1)
    }

    /// Records needed for a rolling 30 days at the configured cadence
    pub fn log_capacity(&self) -> u32 {
        crate::ring_log::capacity_for_interval(self.sample_interval())
    }

    /// Depth log file for an anchorage id, e.g. `data/00003.dat`
    pub fn log_path(&self, anchorage_id: u32) -> PathBuf {
        self.recording
            .data_dir
            .join(crate::ring_log::file_name(anchorage_id))
    }

    /// JSON anchorage registry inside the data directory
    pub fn locations_path(&self) -> PathBuf {
        self.recording.data_dir.join("locations.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.recording.record_data_interval, 5);
        assert_eq!(config.recording.depth_samples_in_average, 60);
        assert_eq!(config.recording.max_location_distance, 100.0);
        assert_eq!(config.sources.depth_path, "environment.depth.belowSurface");
        assert_eq!(config.sources.engine_rpm_path, "propulsion.1.revolutions");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [recording]
            record_data_interval = 10
            "#,
        )
        .unwrap();
        assert_eq!(parsed.recording.record_data_interval, 10);
        assert_eq!(parsed.recording.depth_samples_in_average, 60);
        assert_eq!(parsed.sources.pos_path, "navigation.position");
    }

    #[test]
    fn test_derived_values() {
        let config = Config::default();
        assert_eq!(config.log_capacity(), 8640);
        assert_eq!(config.log_path(3), PathBuf::from("data/00003.dat"));
        assert_eq!(
            config.locations_path(),
            PathBuf::from("data/locations.json")
        );
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let mut config = Config::default();
        config.recording.record_data_interval = 0;
        assert_eq!(config.sample_interval(), 1);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tide-watch.toml");
        let mut config = Config::default();
        config.recording.max_location_distance = 250.0;
        config.save(&path).unwrap();

        let loaded = Config::load_from_path(&path);
        assert_eq!(loaded.recording.max_location_distance, 250.0);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = Config::load_from_path("/nonexistent/path");
        // Should fallback to default
        assert_eq!(config.recording.record_data_interval, 5);
    }
}

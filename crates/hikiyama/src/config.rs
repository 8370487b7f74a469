//! Configuration management for hikiyama.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.
//! The resulting [`Config`] is loaded once per process and passed down to the
//! viewer, the tracker and the store.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::float::Position;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "hikiyama";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "floats.db";

/// Highest zoom level the tile providers serve.
const MAX_ZOOM: u8 = 19;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `HIKIYAMA_`)
/// 2. TOML config file at `~/.config/hikiyama/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Map display configuration.
    pub map: MapConfig,
    /// Tracker configuration.
    pub tracker: TrackerConfig,
    /// Document store configuration.
    pub store: StoreConfig,
}

/// Map display configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Latitude of the default view center.
    pub center_lat: f64,
    /// Longitude of the default view center.
    pub center_lng: f64,
    /// Zoom level used at start and on recenter.
    pub default_zoom: u8,
    /// Zoom level used when a marker is selected.
    pub focus_zoom: u8,
    /// Tile URL template for the street map.
    pub street_tiles: String,
    /// Tile URL template for satellite imagery.
    pub satellite_tiles: String,
    /// Seconds after which a float's last update counts as stale.
    /// Set to 0 to disable.
    pub stale_after_secs: u64,
}

/// Tracker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Shared passcode volunteers enter to start publishing.
    pub passcode: String,
    /// Ask the sensor for its most accurate fixes.
    pub high_accuracy: bool,
    /// Oldest cached fix accepted, in milliseconds.
    pub maximum_age_ms: u64,
    /// Time to wait for each fix, in milliseconds.
    pub timeout_ms: u64,
}

/// Document store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the local document database.
    /// Defaults to `~/.local/share/hikiyama/floats.db`
    pub database_path: Option<PathBuf>,
    /// Name of the collection holding float records.
    pub collection: String,
    /// Interval between listener polls in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            // Kakunodate
            center_lat: 39.5932,
            center_lng: 140.5639,
            default_zoom: 15,
            focus_zoom: 17,
            street_tiles: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            satellite_tiles:
                "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}"
                    .to_string(),
            stale_after_secs: 300,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            passcode: "kakunodate2025".to_string(),
            high_accuracy: true,
            maximum_age_ms: 2_000,
            timeout_ms: 20_000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            collection: "floats".to_string(),
            poll_interval_ms: 500,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed("HIKIYAMA_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        for (name, zoom) in [
            ("default_zoom", self.map.default_zoom),
            ("focus_zoom", self.map.focus_zoom),
        ] {
            if zoom > MAX_ZOOM {
                return Err(Error::ConfigValidation {
                    message: format!("{name} ({zoom}) must be at most {MAX_ZOOM}"),
                });
            }
        }

        for (name, template) in [
            ("street_tiles", &self.map.street_tiles),
            ("satellite_tiles", &self.map.satellite_tiles),
        ] {
            if !["{z}", "{x}", "{y}"].iter().all(|p| template.contains(p)) {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must contain {{z}}, {{x}} and {{y}}: {template}"),
                });
            }
        }

        if !self.default_center().is_valid() {
            return Err(Error::ConfigValidation {
                message: format!(
                    "default center ({}, {}) is not a valid coordinate",
                    self.map.center_lat, self.map.center_lng
                ),
            });
        }

        if self.tracker.passcode.is_empty() {
            return Err(Error::ConfigValidation {
                message: "tracker passcode must not be empty".to_string(),
            });
        }

        if self.tracker.timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "timeout_ms must be greater than 0".to_string(),
            });
        }

        if self.store.poll_interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "poll_interval_ms must be greater than 0".to_string(),
            });
        }

        if self.store.collection.is_empty() {
            return Err(Error::ConfigValidation {
                message: "store collection must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Get the default map center.
    #[must_use]
    pub fn default_center(&self) -> Position {
        Position::new(self.map.center_lat, self.map.center_lng)
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.store
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the stale threshold as a Duration.
    #[must_use]
    pub fn stale_after(&self) -> Option<Duration> {
        if self.map.stale_after_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.map.stale_after_secs))
        }
    }

    /// Get the listener poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.store.poll_interval_ms)
    }
}

impl TrackerConfig {
    /// Get the per-fix timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get the maximum fix age as a Duration.
    #[must_use]
    pub fn maximum_age(&self) -> Duration {
        Duration::from_millis(self.maximum_age_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.map.default_zoom, 15);
        assert_eq!(config.map.focus_zoom, 17);
        assert!(config.tracker.high_accuracy);
        assert_eq!(config.store.collection, "floats");
    }

    #[test]
    fn test_default_map_config() {
        let map = MapConfig::default();

        assert!((map.center_lat - 39.5932).abs() < f64::EPSILON);
        assert!((map.center_lng - 140.5639).abs() < f64::EPSILON);
        assert!(map.street_tiles.contains("openstreetmap"));
        assert!(map.satellite_tiles.contains("World_Imagery"));
        assert_eq!(map.stale_after_secs, 300);
    }

    #[test]
    fn test_default_tracker_config() {
        let tracker = TrackerConfig::default();

        assert!(!tracker.passcode.is_empty());
        assert_eq!(tracker.maximum_age(), Duration::from_secs(2));
        assert_eq!(tracker.timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_default_store_config() {
        let store = StoreConfig::default();

        assert!(store.database_path.is_none());
        assert_eq!(store.poll_interval_ms, 500);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zoom_out_of_range() {
        let mut config = Config::default();
        config.map.focus_zoom = 25;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("focus_zoom"));
    }

    #[test]
    fn test_validate_tile_template_missing_placeholder() {
        let mut config = Config::default();
        config.map.satellite_tiles = "https://tiles.example.com/{z}/{x}.png".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("satellite_tiles"));
    }

    #[test]
    fn test_validate_invalid_center() {
        let mut config = Config::default();
        config.map.center_lat = 120.0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("default center"));
    }

    #[test]
    fn test_validate_empty_passcode() {
        let mut config = Config::default();
        config.tracker.passcode = String::new();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("passcode"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.tracker.timeout_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("timeout_ms"));
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = Config::default();
        config.store.poll_interval_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("poll_interval_ms"));
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        assert!(config.database_path().to_string_lossy().contains("floats.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.store.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_stale_after() {
        let mut config = Config::default();
        assert_eq!(config.stale_after(), Some(Duration::from_secs(300)));

        config.map.stale_after_secs = 0;
        assert!(config.stale_after().is_none());
    }

    #[test]
    fn test_poll_interval() {
        let config = Config::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_default_center() {
        let center = Config::default().default_center();
        assert!((center.lat - 39.5932).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("hikiyama"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), Config::default());
    }

    #[test]
    fn test_tracker_config_deserialize() {
        let json = r#"{"passcode": "matsuri", "timeout_ms": 5000}"#;
        let tracker: TrackerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(tracker.passcode, "matsuri");
        assert_eq!(tracker.timeout_ms, 5000);
        assert_eq!(tracker.maximum_age_ms, 2_000);
    }

    #[test]
    fn test_map_config_serialize() {
        let json = serde_json::to_string(&MapConfig::default()).unwrap();
        assert!(json.contains("focus_zoom"));
    }
}

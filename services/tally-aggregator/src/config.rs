//! Service configuration
//!
//! Loaded from an optional JSON file, then overridden from the command
//! line or environment, then validated once before anything starts.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorConfig;
use crate::geo::DEFAULT_NAME_PROPERTY;
use crate::source::ChannelSourceConfig;

/// Bounds on the refresh period.
pub const MIN_REFRESH_INTERVAL_SECS: u64 = 5;
pub const MAX_REFRESH_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("invalid config file: {0}")]
    Parse(String),

    #[error("refresh interval {0}s outside 5..=60s")]
    RefreshInterval(u64),

    #[error("poll timeout {poll_timeout_ms}ms must be positive and shorter than the refresh interval")]
    PollTimeout { poll_timeout_ms: u64 },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub bind_addr: SocketAddr,
    pub refresh_interval_secs: u64,
    pub poll_timeout_ms: u64,
    pub max_batch_records: usize,
    pub channel_capacity: usize,
    pub geometry_path: PathBuf,
    /// GeoJSON feature property holding each region's name.
    pub geometry_name_property: String,
    /// Summary counters file; without one every snapshot is degraded.
    pub summary_path: Option<PathBuf>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            refresh_interval_secs: 10,
            poll_timeout_ms: 1000,
            max_batch_records: 10_000,
            channel_capacity: 100_000,
            geometry_path: PathBuf::from("data/regions.geojson"),
            geometry_name_property: DEFAULT_NAME_PROPERTY.to_string(),
            summary_path: None,
        }
    }
}

impl AggregatorConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_REFRESH_INTERVAL_SECS..=MAX_REFRESH_INTERVAL_SECS).contains(&self.refresh_interval_secs) {
            return Err(ConfigError::RefreshInterval(self.refresh_interval_secs));
        }
        if self.poll_timeout_ms == 0 || self.poll_timeout_ms >= self.refresh_interval_secs * 1000 {
            return Err(ConfigError::PollTimeout {
                poll_timeout_ms: self.poll_timeout_ms,
            });
        }
        if self.max_batch_records == 0 {
            return Err(ConfigError::Zero {
                field: "max_batch_records",
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "channel_capacity",
            });
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
        }
    }

    pub fn channel(&self) -> ChannelSourceConfig {
        ChannelSourceConfig {
            capacity: self.channel_capacity,
            max_batch_records: self.max_batch_records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AggregatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.refresh_interval(), Duration::from_secs(10));
        assert_eq!(config.coordinator().poll_timeout, Duration::from_millis(1000));
    }

    #[test]
    fn test_refresh_interval_bounds() {
        for secs in [4, 61, 0] {
            let config = AggregatorConfig {
                refresh_interval_secs: secs,
                ..AggregatorConfig::default()
            };
            assert_eq!(config.validate(), Err(ConfigError::RefreshInterval(secs)));
        }
        for secs in [5, 60] {
            let config = AggregatorConfig {
                refresh_interval_secs: secs,
                ..AggregatorConfig::default()
            };
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_poll_timeout_must_fit_interval() {
        let config = AggregatorConfig {
            refresh_interval_secs: 5,
            poll_timeout_ms: 5000,
            ..AggregatorConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::PollTimeout { .. })));

        let config = AggregatorConfig {
            poll_timeout_ms: 0,
            ..AggregatorConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::PollTimeout { .. })));
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let config = AggregatorConfig {
            channel_capacity: 0,
            ..AggregatorConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "channel_capacity"
            })
        );
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: AggregatorConfig =
            serde_json::from_str(r#"{"refresh_interval_secs": 30, "summary_path": "summary.json"}"#).unwrap();

        assert_eq!(config.refresh_interval_secs, 30);
        assert_eq!(config.summary_path, Some(PathBuf::from("summary.json")));
        assert_eq!(config.geometry_name_property, "NAME_1");
        assert_eq!(config.max_batch_records, 10_000);
    }

    #[test]
    fn test_missing_file() {
        let err = AggregatorConfig::from_file(Path::new("/nonexistent/aggregator.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

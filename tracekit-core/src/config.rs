//! Engine configuration
//!
//! The configuration is owned by the driver and handed to each
//! [`Traceset`](crate::Traceset) it builds. Every field has a serde default
//! so partial JSON documents are accepted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};
use crate::hooks::Priority;

/// Tuning knobs for replay and seeking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seed estimate of nanoseconds per event for the backward seek
    #[serde(default = "default_seek_back_ratio")]
    pub seek_back_ratio_ns: f64,

    /// Multiplier applied to the estimate after each undershoot
    #[serde(default = "default_seek_back_growth")]
    pub seek_back_growth: u32,

    /// Event budget per `middle()` call for chunked drivers
    #[serde(default = "default_chunk_events")]
    pub replay_chunk_events: usize,

    /// Priority given to hooks registered without an explicit one
    #[serde(default)]
    pub default_priority: Priority,
}

fn default_seek_back_ratio() -> f64 { 1000.0 }
fn default_seek_back_growth() -> u32 { 16 }
fn default_chunk_events() -> usize { 10_000 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seek_back_ratio_ns: default_seek_back_ratio(),
            seek_back_growth: default_seek_back_growth(),
            replay_chunk_events: default_chunk_events(),
            default_priority: Priority::DEFAULT,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| TraceError::IoError {
            message: format!("Failed to read config '{}': {}", path.display(), e),
        })?;
        Self::from_json(&content)
    }

    pub fn with_seek_back_ratio(mut self, ratio_ns: f64) -> Self {
        self.seek_back_ratio_ns = ratio_ns;
        self
    }

    pub fn with_chunk_events(mut self, events: usize) -> Self {
        self.replay_chunk_events = events;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.seek_back_ratio_ns.is_finite() && self.seek_back_ratio_ns > 0.0) {
            return Err(TraceError::InvalidConfig {
                reason: format!(
                    "seek_back_ratio_ns must be a positive number, got {}",
                    self.seek_back_ratio_ns
                ),
            });
        }
        if self.seek_back_growth < 2 {
            return Err(TraceError::InvalidConfig {
                reason: format!(
                    "seek_back_growth must be at least 2, got {}",
                    self.seek_back_growth
                ),
            });
        }
        if self.replay_chunk_events == 0 {
            return Err(TraceError::InvalidConfig {
                reason: "replay_chunk_events must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.seek_back_growth, 16);
        assert_eq!(config.default_priority, Priority::DEFAULT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"seek_back_ratio_ns": 250.0}"#).unwrap();
        assert_eq!(config.seek_back_ratio_ns, 250.0);
        assert_eq!(config.replay_chunk_events, 10_000);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(EngineConfig::from_json(r#"{"seek_back_ratio_ns": 0.0}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"seek_back_growth": 1}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"replay_chunk_events": 0}"#).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::from_file("/nonexistent/tracekit.json").unwrap_err();
        assert_eq!(err.error_code(), "IO_ERROR");
    }
}

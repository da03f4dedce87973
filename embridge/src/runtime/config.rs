use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::framework::error::{BridgeError, Result};
use crate::framework::logging::{DEFAULT_FILTER, init_logger_with_filter};

pub const DEFAULT_MIN_FRAME_RATE: f32 = 1.0;
pub const DEFAULT_MAX_FRAME_RATE: f32 = 1000.0;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct RunLoopConfig {
    /// Lower clamp for the view's reported frame rate. Also used when the
    /// view reports NaN or a non-positive rate.
    pub min_frame_rate: f32,
    pub max_frame_rate: f32,
    /// env_logger filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            min_frame_rate: DEFAULT_MIN_FRAME_RATE,
            max_frame_rate: DEFAULT_MAX_FRAME_RATE,
            log_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl RunLoopConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yml::from_str(yaml)
            .map_err(|err| BridgeError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        let min = self.min_frame_rate;
        let max = self.max_frame_rate;

        if !(min.is_finite() && min > 0.0) {
            return Err(BridgeError::Config(format!(
                "min_frame_rate must be a positive number, got {}",
                min
            )));
        }

        if !(max.is_finite() && max >= min) {
            return Err(BridgeError::Config(format!(
                "max_frame_rate must be at least min_frame_rate ({}), got {}",
                min, max
            )));
        }

        if self.log_filter.trim().is_empty() {
            return Err(BridgeError::Config(
                "log_filter must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Installs the logger with this config's `log_filter` as the default.
    pub fn init_logger(&self) {
        init_logger_with_filter(&self.log_filter);
    }

    /// Clamps a view-reported frame rate into the configured range.
    pub fn clamp_frame_rate(&self, frame_rate: f32) -> f32 {
        if frame_rate.is_nan() {
            return self.min_frame_rate;
        }
        frame_rate.max(self.min_frame_rate).min(self.max_frame_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config =
            RunLoopConfig::from_yaml_str("max_frame_rate: 240.0\n").unwrap();
        assert_eq!(config.min_frame_rate, DEFAULT_MIN_FRAME_RATE);
        assert_eq!(config.max_frame_rate, 240.0);
        assert_eq!(config.log_filter, DEFAULT_FILTER);
    }

    #[test]
    fn log_filter_is_read_from_yaml() {
        let config = RunLoopConfig::from_yaml_str(
            "log_filter: embridge::bridge=trace,embridge=warn\n",
        )
        .unwrap();
        assert_eq!(config.log_filter, "embridge::bridge=trace,embridge=warn");
    }

    #[test]
    fn rejects_blank_log_filter() {
        let err = RunLoopConfig::from_yaml_str("log_filter: \"  \"\n")
            .expect_err("blank filter must fail");
        assert!(err.to_string().contains("log_filter"));
    }

    #[test]
    fn rejects_inverted_range() {
        let err = RunLoopConfig::from_yaml_str(
            "min_frame_rate: 120.0\nmax_frame_rate: 60.0\n",
        )
        .expect_err("inverted range must fail");
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn rejects_non_positive_minimum() {
        let err = RunLoopConfig::from_yaml_str("min_frame_rate: 0.0\n")
            .expect_err("zero minimum must fail");
        assert!(err.to_string().contains("min_frame_rate"));
    }

    #[test]
    fn clamps_malformed_frame_rates() {
        let config = RunLoopConfig::default();
        assert_eq!(config.clamp_frame_rate(f32::NAN), 1.0);
        assert_eq!(config.clamp_frame_rate(-60.0), 1.0);
        assert_eq!(config.clamp_frame_rate(0.0), 1.0);
        assert_eq!(config.clamp_frame_rate(f32::INFINITY), 1000.0);
        assert_eq!(config.clamp_frame_rate(60.0), 60.0);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = RunLoopConfig::load("/nonexistent/embridge.yaml")
            .expect_err("missing file must fail");
        assert!(matches!(err, BridgeError::Io(_)));
    }
}

//! Session configuration.
//!
//! Every value the session writes to the device at startup lives here. The struct is
//! built once, optionally from a JSON file, and handed to the session by value.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed acquisition settings.
///
/// Applied by [`DeviceSession::initialize`](crate::DeviceSession::initialize).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Sensor pixel format identifier written to `PixelFormat`.
    pub pixel_format: String,
    /// Raw gain written after auto-gain is disabled.
    pub gain_raw: i64,
    /// Transport packet size in bytes.
    pub packet_size: i64,
    /// Sensor ROI width in pixels.
    pub width: i64,
    /// Sensor ROI height in pixels.
    pub height: i64,
    /// Raw black level applied to all channels.
    pub black_level: i64,
    /// Preferred auto-function profile.
    pub auto_function_profile: String,
    /// Target frame rate in frames per second.
    pub target_fps: f64,
    /// Upper bound on one grab wait, in milliseconds.
    pub grab_timeout_ms: u64,
    /// Delay between the one-shot white-balance trigger and the ratio read-back, in milliseconds.
    pub white_balance_settle_ms: u64,
    /// Preview product width.
    pub preview_width: u32,
    /// Preview product height.
    pub preview_height: u32,
    /// Driver-side buffers requested when streaming starts.
    pub stream_buffers: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            pixel_format: "BayerGB12".to_owned(),
            gain_raw: 300,
            packet_size: 9000,
            width: 2048,
            height: 1108,
            black_level: 32,
            auto_function_profile: "GainMinimum".to_owned(),
            target_fps: 24.0,
            grab_timeout_ms: 5000,
            white_balance_settle_ms: 200,
            preview_width: 1024,
            preview_height: 600,
            stream_buffers: 1,
        }
    }
}

/// Error loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid configuration JSON.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is outside its usable range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl CameraConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Io`] - The file cannot be read
    /// * [`ConfigError::Parse`] - The contents are not a JSON configuration object
    /// * [`ConfigError::Invalid`] - A loaded value fails [`CameraConfig::validate`]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the session cannot derive settings from.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first field that cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.target_fps.is_finite() && self.target_fps > 0.0) {
            return Err(ConfigError::Invalid {
                field: "target_fps",
                reason: format!("must be a positive number, got {}", self.target_fps),
            });
        }
        if self.preview_width == 0 || self.preview_height == 0 {
            return Err(ConfigError::Invalid {
                field: "preview_width/preview_height",
                reason: "preview size must be non-zero".to_owned(),
            });
        }
        if self.stream_buffers == 0 {
            return Err(ConfigError::Invalid {
                field: "stream_buffers",
                reason: "at least one buffer is required".to_owned(),
            });
        }
        Ok(())
    }

    /// Exposure time in microseconds: half the frame period (a 180 degree shutter).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn exposure_time_us(&self) -> i64 {
        (1_000_000.0 / (2.0 * self.target_fps)).round() as i64
    }

    /// Grab timeout as a [`Duration`].
    #[must_use]
    pub const fn grab_timeout(&self) -> Duration {
        Duration::from_millis(self.grab_timeout_ms)
    }

    /// White-balance settle delay as a [`Duration`].
    #[must_use]
    pub const fn white_balance_settle(&self) -> Duration {
        Duration::from_millis(self.white_balance_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_exposure_time() {
        let config = CameraConfig::default();
        // 1_000_000 / 48 = 20833.33
        assert_eq!(config.exposure_time_us(), 20833);
    }

    #[test]
    fn test_exposure_time_rounds() {
        let config = CameraConfig {
            target_fps: 30.0,
            ..CameraConfig::default()
        };
        // 16666.67
        assert_eq!(config.exposure_time_us(), 16667);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile failed");
        write!(file, r#"{{"pixel_format": "BayerRG8", "target_fps": 25.0}}"#)
            .expect("write failed");

        let config = CameraConfig::from_json_file(file.path()).expect("load failed");
        assert_eq!(config.pixel_format, "BayerRG8");
        assert_eq!(config.exposure_time_us(), 20000);
        assert_eq!(config.width, 2048);
        assert_eq!(config.grab_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_zero_fps() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile failed");
        write!(file, r#"{{"target_fps": 0.0}}"#).expect("write failed");

        let result = CameraConfig::from_json_file(file.path());
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "target_fps",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile failed");
        write!(file, "not json").expect("write failed");

        let result = CameraConfig::from_json_file(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}

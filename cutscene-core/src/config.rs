//! Playback settings, loadable from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest reference history accepted, in seconds.
pub const MAX_REFERENCE_HISTORY_SECS: f64 = 600.0;

/// Largest target surface edge.
pub const MAX_TARGET_DIMENSION: u32 = 8192;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Registry name of the container format to open
    pub input_format: String,
    pub target_width: u32,
    pub target_height: u32,
    /// Size of the playback buffer pool
    pub audio_buffer_count: usize,
    /// Rate of the mono reference resampler
    pub reference_sample_rate: u32,
    /// Bytes cut from the end of every submitted PCM block. 16 reproduces
    /// older players that uploaded short buffers.
    pub submit_trim_bytes: usize,
    pub capture_reference_audio: bool,
    pub reference_history_secs: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            input_format: "bink".to_string(),
            target_width: 800,
            target_height: 600,
            audio_buffer_count: 4,
            reference_sample_rate: 44100,
            submit_trim_bytes: 0,
            capture_reference_audio: false,
            reference_history_secs: 2.0,
        }
    }
}

impl PlaybackConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_format.is_empty() {
            return Err(ConfigError::Invalid("input_format is empty".to_string()));
        }
        if self.target_width == 0
            || self.target_height == 0
            || self.target_width > MAX_TARGET_DIMENSION
            || self.target_height > MAX_TARGET_DIMENSION
        {
            return Err(ConfigError::Invalid(format!(
                "target size {}x{}",
                self.target_width, self.target_height
            )));
        }
        if self.audio_buffer_count == 0 {
            return Err(ConfigError::Invalid("audio_buffer_count must be at least 1".to_string()));
        }
        if self.reference_sample_rate == 0 {
            return Err(ConfigError::Invalid("reference_sample_rate is 0".to_string()));
        }
        if !self.reference_history_secs.is_finite()
            || !(0.0..=MAX_REFERENCE_HISTORY_SECS).contains(&self.reference_history_secs)
        {
            return Err(ConfigError::Invalid(format!(
                "reference_history_secs {}",
                self.reference_history_secs
            )));
        }
        Ok(())
    }

    /// Reference samples kept when capture is enabled.
    pub fn reference_history_len(&self) -> usize {
        (self.reference_history_secs * self.reference_sample_rate as f64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PlaybackConfig::default();
        assert_eq!(config.input_format, "bink");
        assert_eq!((config.target_width, config.target_height), (800, 600));
        assert_eq!(config.audio_buffer_count, 4);
        assert_eq!(config.reference_sample_rate, 44100);
        assert_eq!(config.submit_trim_bytes, 0);
        assert_eq!(config.reference_history_len(), 88200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PlaybackConfig::from_json_str(r#"{ "submit_trim_bytes": 16 }"#).unwrap();
        assert_eq!(config.submit_trim_bytes, 16);
        assert_eq!(config.audio_buffer_count, 4);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            PlaybackConfig::from_json_str(r#"{ "audio_buffer_count": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PlaybackConfig::from_json_str(r#"{ "target_width": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PlaybackConfig::from_json_str(r#"{ "target_height": 100000 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PlaybackConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_rejects_unbounded_history() {
        for json in [
            r#"{ "reference_history_secs": 1e300 }"#,
            r#"{ "reference_history_secs": -1.0 }"#,
            r#"{ "reference_history_secs": 601.0 }"#,
        ] {
            assert!(
                matches!(PlaybackConfig::from_json_str(json), Err(ConfigError::Invalid(_))),
                "{}",
                json
            );
        }

        let config = PlaybackConfig {
            reference_history_secs: f64::INFINITY,
            ..PlaybackConfig::default()
        };
        assert!(config.validate().is_err());

        let config = PlaybackConfig {
            reference_history_secs: MAX_REFERENCE_HISTORY_SECS,
            ..PlaybackConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.reference_history_len(), 600 * 44100);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "capture_reference_audio": true }}"#).unwrap();
        let config = PlaybackConfig::from_file(file.path()).unwrap();
        assert!(config.capture_reference_audio);

        assert!(matches!(
            PlaybackConfig::from_file("/nonexistent/cutscene.json"),
            Err(ConfigError::Io(_))
        ));
    }
}

//! Transformer configuration types.
//!
//! The top-level [`TransformerConfig`] struct is deserialized from JSON and
//! carries the worker, negotiation, and estimation settings. Every section
//! defaults to the built-in constants so a completely empty `{}` file is
//! valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::options::GRANULARITY_DEFAULT;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root transformer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    pub worker: WorkerConfig,
    pub negotiation: NegotiationConfig,
    pub estimation: EstimationConfig,
    /// Granularity used by the high-level transform when the caller passes
    /// no options.
    pub default_granularity: u32,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            negotiation: NegotiationConfig::default(),
            estimation: EstimationConfig::default(),
            default_granularity: GRANULARITY_DEFAULT,
        }
    }
}

impl TransformerConfig {
    /// Deserialize a `TransformerConfig` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None`, the file does not exist, or it cannot be parsed.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.worker.thread_name.is_empty() {
            warnings.push("worker.thread_name is empty".into());
        }
        if self.negotiation.dimension_alignment == 0 {
            warnings.push("negotiation.dimension_alignment is 0; alignment disabled".into());
        }
        if self.negotiation.default_frame_rate == 0 {
            warnings.push("negotiation.default_frame_rate is 0".into());
        }
        if self.negotiation.default_key_frame_interval == 0 {
            warnings.push("negotiation.default_key_frame_interval is 0; every frame is a key frame".into());
        }
        if self.negotiation.default_audio_bitrate == 0 {
            warnings.push("negotiation.default_audio_bitrate is 0".into());
        }
        if self.estimation.bits_per_pixel <= 0.0 {
            warnings.push("estimation.bits_per_pixel must be positive".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Scheduler worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub thread_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            thread_name: "trackforge-worker".into(),
        }
    }
}

/// Defaults used while completing target formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Seconds between key frames when neither caller nor source says.
    pub default_key_frame_interval: u32,
    pub default_frame_rate: u32,
    /// Bits per second for synthesized audio targets.
    pub default_audio_bitrate: u32,
    /// Video dimensions are rounded up to a multiple of this.
    pub dimension_alignment: u32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            default_key_frame_interval: 5,
            default_frame_rate: 30,
            default_audio_bitrate: 256_000,
            dimension_alignment: 32,
        }
    }
}

/// Settings for bitrate and file size estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    /// Audio bitrate assumed when neither target nor source carries one.
    pub fallback_audio_bitrate: u32,
    /// Bits per pixel per frame used to derive a video bitrate from
    /// resolution and frame rate.
    pub bits_per_pixel: f32,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            fallback_audio_bitrate: 320_000,
            bits_per_pixel: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let cfg = TransformerConfig::default();
        assert_eq!(cfg.worker.thread_name, "trackforge-worker");
        assert_eq!(cfg.negotiation.default_key_frame_interval, 5);
        assert_eq!(cfg.negotiation.default_frame_rate, 30);
        assert_eq!(cfg.negotiation.default_audio_bitrate, 256_000);
        assert_eq!(cfg.negotiation.dimension_alignment, 32);
        assert_eq!(cfg.estimation.fallback_audio_bitrate, 320_000);
        assert_eq!(cfg.default_granularity, 100);
    }

    #[test]
    fn default_config_no_warnings() {
        let warnings = TransformerConfig::default().validate();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn zero_alignment_warns() {
        let mut cfg = TransformerConfig::default();
        cfg.negotiation.dimension_alignment = 0;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("dimension_alignment")));
    }

    #[test]
    fn parse_json_config() {
        let json = r#"{"negotiation": {"default_frame_rate": 25}}"#;
        let cfg = TransformerConfig::from_json(json).unwrap();
        assert_eq!(cfg.negotiation.default_frame_rate, 25);
        assert_eq!(cfg.negotiation.dimension_alignment, 32);
    }

    #[test]
    fn parse_empty_json_uses_defaults() {
        let cfg = TransformerConfig::from_json("{}").unwrap();
        assert_eq!(cfg.default_granularity, 100);
    }

    #[test]
    fn parse_invalid_json_is_validation_error() {
        let err = TransformerConfig::from_json("{not json").unwrap_err();
        assert!(err.to_string().contains("config parse error"));
    }

    #[test]
    fn load_or_default_with_none() {
        let cfg = TransformerConfig::load_or_default(None);
        assert_eq!(cfg.default_granularity, 100);
    }

    #[test]
    fn load_or_default_with_missing_file() {
        let cfg = TransformerConfig::load_or_default(Some(Path::new("/nonexistent/tf.json")));
        assert_eq!(cfg.worker.thread_name, "trackforge-worker");
    }

    #[test]
    fn load_or_default_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"worker": {{"thread_name": "encoder"}}, "default_granularity": 10}}"#)
            .unwrap();
        let cfg = TransformerConfig::load_or_default(Some(file.path()));
        assert_eq!(cfg.worker.thread_name, "encoder");
        assert_eq!(cfg.default_granularity, 10);
    }

    #[test]
    fn load_or_default_with_garbage_file_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "garbage").unwrap();
        let cfg = TransformerConfig::load_or_default(Some(file.path()));
        assert_eq!(cfg.default_granularity, 100);
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tokenizer::EspeakConfig;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Where the speed multiplier is applied. Exactly one stage ever applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedStage {
    /// Passed to the model's duration input; pitch is preserved.
    #[default]
    Model,
    /// Applied by resampling the output waveform; pitch shifts with speed.
    PostProcess,
}

/// Accepted speed multipliers, inclusive. Values outside are rejected, never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedRange {
    pub min: f32,
    pub max: f32,
}

impl Default for SpeedRange {
    fn default() -> Self {
        Self { min: 0.25, max: 4.0 }
    }
}

impl SpeedRange {
    pub fn contains(&self, speed: f32) -> bool {
        speed.is_finite() && speed >= self.min && speed <= self.max
    }
}

/// WAV layout of synthesized audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputFormat {
    /// Output sample rate in Hz. `None` keeps the model's native rate.
    pub sample_rate: Option<u32>,
    /// 1 (mono) or 2 (mono duplicated to both channels).
    pub channels: u16,
    /// 16 or 24 for integer PCM, 32 for IEEE float.
    pub bits_per_sample: u16,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            sample_rate: None,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

impl OutputFormat {
    pub const MIN_SAMPLE_RATE: u32 = 8_000;
    pub const MAX_SAMPLE_RATE: u32 = 192_000;

    pub fn validate(&self) -> Result<(), String> {
        if let Some(rate) = self.sample_rate {
            if !(Self::MIN_SAMPLE_RATE..=Self::MAX_SAMPLE_RATE).contains(&rate) {
                return Err(format!(
                    "sample rate {rate} Hz outside {}..={} Hz",
                    Self::MIN_SAMPLE_RATE,
                    Self::MAX_SAMPLE_RATE
                ));
            }
        }
        if !matches!(self.channels, 1 | 2) {
            return Err(format!("unsupported channel count {}", self.channels));
        }
        if !matches!(self.bits_per_sample, 16 | 24 | 32) {
            return Err(format!(
                "unsupported bits per sample {} (expected 16, 24 or 32)",
                self.bits_per_sample
            ));
        }
        Ok(())
    }
}

/// Runtime configuration for a [`Synthesizer`](crate::Synthesizer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    /// Directory holding the model, `config.json`, `tokenizer.json` and voices.
    pub assets_dir: PathBuf,
    /// Number of CPU threads per inference session.
    /// `None` uses the ORT default (typically all available cores).
    pub num_threads: Option<usize>,
    /// Path for caching the Level3-optimized ONNX graph.
    pub optimized_model_cache_path: Option<PathBuf>,
    /// Model instances in the inference pool; also the concurrency bound.
    pub max_concurrent_inferences: usize,
    /// How long a request waits for a free model instance before `Overload`.
    pub queue_timeout_ms: u64,
    /// Deadline covering tokenization through encoding.
    pub request_timeout_ms: u64,
    /// Longest accepted input text, in characters.
    pub max_text_chars: usize,
    pub speed_range: SpeedRange,
    pub speed_stage: SpeedStage,
    /// Voice used when a request names none. Defaults to the first catalog entry.
    pub default_voice: Option<String>,
    /// Language used when neither the request nor the voice name selects one.
    /// Defaults to the tokenizer's `default_language`.
    pub default_language: Option<String>,
    pub output: OutputFormat,
    pub espeak: EspeakConfig,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("assets"),
            num_threads: None,
            optimized_model_cache_path: None,
            max_concurrent_inferences: 2,
            queue_timeout_ms: 5_000,
            request_timeout_ms: 60_000,
            max_text_chars: 5_000,
            speed_range: SpeedRange::default(),
            speed_stage: SpeedStage::default(),
            default_voice: None,
            default_language: None,
            output: OutputFormat::default(),
            espeak: EspeakConfig::default(),
        }
    }
}

impl SynthesizerConfig {
    /// Create a configuration for the given asset directory with default settings.
    pub fn new(assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            assets_dir: assets_dir.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_inferences == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_inferences must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_text_chars == 0 {
            return Err(ConfigError::Invalid(
                "max_text_chars must be greater than 0".to_string(),
            ));
        }
        let range = self.speed_range;
        if !(range.min.is_finite() && range.max.is_finite() && range.min > 0.0 && range.min <= range.max)
        {
            return Err(ConfigError::Invalid(format!(
                "speed_range must satisfy 0 < min <= max, got {}..={}",
                range.min, range.max
            )));
        }
        if !range.contains(1.0) {
            return Err(ConfigError::Invalid(format!(
                "speed_range {}..={} must include the default speed 1.0",
                range.min, range.max
            )));
        }
        self.output.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SynthesizerConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_pool_and_inverted_speed_range() {
        let mut config = SynthesizerConfig {
            max_concurrent_inferences: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.max_concurrent_inferences = 1;
        config.speed_range = SpeedRange { min: 2.0, max: 1.0 };
        assert!(config.validate().is_err());

        config.speed_range = SpeedRange { min: 0.0, max: 2.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn output_format_limits() {
        let mut format = OutputFormat::default();
        format.validate().unwrap();

        format.bits_per_sample = 8;
        assert!(format.validate().is_err());

        format.bits_per_sample = 24;
        format.channels = 6;
        assert!(format.validate().is_err());

        format.channels = 2;
        format.sample_rate = Some(1_000);
        assert!(format.validate().is_err());
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config: SynthesizerConfig = serde_json::from_str(
            r#"{ "assets_dir": "/srv/kokoro", "speed_stage": "post_process", "output": { "bits_per_sample": 32 } }"#,
        )
        .unwrap();
        assert_eq!(config.assets_dir, PathBuf::from("/srv/kokoro"));
        assert_eq!(config.speed_stage, SpeedStage::PostProcess);
        assert_eq!(config.output.bits_per_sample, 32);
        assert_eq!(config.output.channels, 1);
        assert_eq!(config.max_concurrent_inferences, 2);
    }

    #[test]
    fn speed_range_is_inclusive_and_rejects_nan() {
        let range = SpeedRange::default();
        assert!(range.contains(0.25));
        assert!(range.contains(4.0));
        assert!(!range.contains(0.0));
        assert!(!range.contains(-1.0));
        assert!(!range.contains(4.01));
        assert!(!range.contains(f32::NAN));
    }
}

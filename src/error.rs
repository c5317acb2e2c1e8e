//! Error types for asset loading and per-request synthesis.
//!
//! [`AssetError`] is only produced while the process starts up; a store that
//! failed to load is never served. [`SynthesisError`] is returned by a single
//! request and never affects other requests or the loaded assets.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Pipeline stage a request was in when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Validating,
    Tokenizing,
    ResolvingVoice,
    Inferring,
    PostProcessing,
    Encoding,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validation",
            Stage::Tokenizing => "tokenization",
            Stage::ResolvingVoice => "voice resolution",
            Stage::Inferring => "inference",
            Stage::PostProcessing => "post-processing",
            Stage::Encoding => "encoding",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AssetError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No .onnx model file found in {0}")]
    MissingModel(PathBuf),
    #[error("Model file {path} could not be loaded: {reason}")]
    CorruptModel { path: PathBuf, reason: String },
    #[error("config.json not found at {0}")]
    MissingConfig(PathBuf),
    #[error("Invalid config.json at {path}: {reason}")]
    InvalidConfig { path: PathBuf, reason: String },
    #[error("tokenizer.json not found at {0}")]
    MissingTokenizer(PathBuf),
    #[error("Invalid tokenizer.json at {path}: {reason}")]
    InvalidTokenizer { path: PathBuf, reason: String },
    #[error("Voice data not found. Expected a voices/ directory or a voice archive in {0}")]
    MissingVoices(PathBuf),
    #[error("No voices found in {0}")]
    NoVoices(PathBuf),
    #[error("Failed to parse voice file {path}: {reason}")]
    InvalidVoice { path: PathBuf, reason: String },
    #[error("Invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AssetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AssetError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Coarse error classes a caller uses to pick a response or a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Tokenize,
    Inference,
    Overload,
    Timeout,
    Encoding,
}

impl ErrorKind {
    /// Whether the same request may succeed if sent again later.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Overload | ErrorKind::Timeout)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SynthesisError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Language '{lang}' is not supported")]
    UnsupportedLanguage { lang: String },
    #[error("Voice '{voice}' not found. Call list_voices() to see available voices.")]
    VoiceNotFound { voice: String },
    #[error("Tokenization failed: {reason}")]
    Tokenize { reason: String },
    #[error("Inference failed: {reason}")]
    Inference { reason: String },
    #[error("Inference capacity exhausted after waiting {waited:?}; retry later")]
    Overload { waited: Duration },
    #[error("Request deadline of {budget:?} exceeded during {stage}")]
    Timeout { stage: Stage, budget: Duration },
    #[error("Post-processing failed: {0}")]
    PostProcess(String),
    #[error("WAV encoding failed: {0}")]
    Encoding(String),
}

impl SynthesisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SynthesisError::Validation(_) | SynthesisError::UnsupportedLanguage { .. } => {
                ErrorKind::Validation
            }
            SynthesisError::VoiceNotFound { .. } => ErrorKind::NotFound,
            SynthesisError::Tokenize { .. } => ErrorKind::Tokenize,
            SynthesisError::Inference { .. } => ErrorKind::Inference,
            SynthesisError::Overload { .. } => ErrorKind::Overload,
            SynthesisError::Timeout { .. } => ErrorKind::Timeout,
            SynthesisError::PostProcess(_) | SynthesisError::Encoding(_) => ErrorKind::Encoding,
        }
    }

    /// Stage the request failed in.
    pub fn stage(&self) -> Stage {
        match self {
            SynthesisError::Validation(_) | SynthesisError::UnsupportedLanguage { .. } => {
                Stage::Validating
            }
            SynthesisError::VoiceNotFound { .. } => Stage::ResolvingVoice,
            SynthesisError::Tokenize { .. } => Stage::Tokenizing,
            SynthesisError::Inference { .. } | SynthesisError::Overload { .. } => Stage::Inferring,
            SynthesisError::Timeout { stage, .. } => *stage,
            SynthesisError::PostProcess(_) => Stage::PostProcessing,
            SynthesisError::Encoding(_) => Stage::Encoding,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_capacity_and_deadline_errors_are_retryable() {
        let retryable = SynthesisError::Overload {
            waited: Duration::from_millis(10),
        };
        assert!(retryable.is_retryable());

        let timeout = SynthesisError::Timeout {
            stage: Stage::PostProcessing,
            budget: Duration::from_secs(1),
        };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.stage(), Stage::PostProcessing);

        for permanent in [
            SynthesisError::Validation("empty".into()),
            SynthesisError::VoiceNotFound {
                voice: "nobody".into(),
            },
            SynthesisError::Tokenize {
                reason: "no tokens".into(),
            },
        ] {
            assert!(!permanent.is_retryable(), "{permanent}");
        }
    }

    #[test]
    fn unsupported_language_is_a_validation_error() {
        let err = SynthesisError::UnsupportedLanguage { lang: "tlh".into() };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.stage(), Stage::Validating);
    }

    #[test]
    fn post_processing_failures_report_their_stage() {
        let err = SynthesisError::PostProcess("resampler rejected ratio".into());
        assert_eq!(err.kind(), ErrorKind::Encoding);
        assert_eq!(err.stage(), Stage::PostProcessing);
        assert!(!err.is_retryable());
    }
}

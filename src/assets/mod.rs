//! Loading of the read-only model assets.
//!
//! # Asset Directory Layout
//!
//! ```text
//! assets/
//! ├── kokoro-quant-convinteger.onnx   # quantized model (any *.onnx is accepted)
//! ├── config.json                     # sample rate, style dim, vocabulary bound
//! ├── tokenizer.json                  # vocabulary and per-language phonemizer rules
//! └── voices/                         # one file per voice: *.bin (raw f32) or *.npy
//! ```
//!
//! Instead of `voices/`, a numpy zip archive (`voices-v1.0.bin` or `voices.npz`)
//! may sit in the asset root.
//!
//! Loading is all-or-nothing: any missing or corrupt file fails the whole load
//! with a distinct [`AssetError`].

pub mod vocab;
pub mod voices;

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AssetError, SynthesisError};
use crate::tokenizer::{EspeakConfig, Tokenizer};

pub use vocab::Vocab;
pub use voices::{VoiceCatalog, VoiceEmbedding};

/// Preferred model file name; any other `*.onnx` file is used as a fallback.
pub const PREFERRED_MODEL_FILE: &str = "kokoro-quant-convinteger.onnx";

/// Model hyperparameters from `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Output sample rate of the model.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Style vector dimension.
    #[serde(default = "default_style_dim")]
    pub style_dim: usize,
    /// Token ids must be below this bound.
    #[serde(default = "default_n_token")]
    pub n_token: usize,
    /// Maximum number of phoneme tokens per chunk (before padding).
    #[serde(default = "default_max_phoneme_len")]
    pub max_phoneme_len: usize,
    /// Vocabulary fallback when `tokenizer.json` carries none.
    #[serde(default)]
    vocab: Option<serde_json::Value>,
}

fn default_sample_rate() -> u32 {
    24_000
}

fn default_style_dim() -> usize {
    256
}

fn default_n_token() -> usize {
    178
}

fn default_max_phoneme_len() -> usize {
    510
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            style_dim: default_style_dim(),
            n_token: default_n_token(),
            max_phoneme_len: default_max_phoneme_len(),
            vocab: None,
        }
    }
}

impl ModelConfig {
    fn load(path: &Path) -> Result<Self, AssetError> {
        if !path.is_file() {
            return Err(AssetError::MissingConfig(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| AssetError::io(path, e))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| AssetError::InvalidConfig {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let problem = if config.sample_rate == 0 {
            Some("sample_rate must be greater than 0")
        } else if config.style_dim == 0 {
            Some("style_dim must be greater than 0")
        } else if config.n_token < 2 {
            Some("n_token must be at least 2")
        } else if config.max_phoneme_len == 0 {
            Some("max_phoneme_len must be greater than 0")
        } else {
            None
        };
        if let Some(reason) = problem {
            return Err(AssetError::InvalidConfig {
                path: path.to_path_buf(),
                reason: reason.to_string(),
            });
        }
        Ok(config)
    }

    pub(crate) fn fallback_vocab(&self) -> Option<&serde_json::Value> {
        self.vocab.as_ref()
    }
}

/// Location of the serialized model weights. Sessions are built from it by the
/// inference backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    path: PathBuf,
    size_bytes: u64,
}

impl ModelHandle {
    /// Find the ONNX model file in the given directory.
    ///
    /// Prefers [`PREFERRED_MODEL_FILE`], then falls back to the first `.onnx`
    /// file in name order.
    fn find(assets_dir: &Path) -> Result<Self, AssetError> {
        let preferred = assets_dir.join(PREFERRED_MODEL_FILE);
        let path = if preferred.is_file() {
            preferred
        } else {
            let entries =
                std::fs::read_dir(assets_dir).map_err(|e| AssetError::io(assets_dir, e))?;
            let mut candidates = Vec::new();
            for entry in entries {
                let path = entry.map_err(|e| AssetError::io(assets_dir, e))?.path();
                if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("onnx") {
                    candidates.push(path);
                }
            }
            candidates.sort();
            candidates
                .into_iter()
                .next()
                .ok_or_else(|| AssetError::MissingModel(assets_dir.to_path_buf()))?
        };

        let size_bytes = std::fs::metadata(&path)
            .map_err(|e| AssetError::io(&path, e))?
            .len();
        if size_bytes == 0 {
            return Err(AssetError::CorruptModel {
                path,
                reason: "file is empty".to_string(),
            });
        }

        log::info!("Using ONNX file: {}", path.display());
        Ok(Self { path, size_bytes })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// Everything loaded from the asset directory. Immutable after [`AssetStore::load`].
#[derive(Debug)]
pub struct AssetStore {
    root: PathBuf,
    config: ModelConfig,
    tokenizer: Tokenizer,
    voices: VoiceCatalog,
    model: ModelHandle,
}

impl AssetStore {
    /// Load assets using `espeak-ng` from PATH for espeak-backed languages.
    pub fn load(assets_dir: &Path) -> Result<Self, AssetError> {
        Self::load_with(assets_dir, &EspeakConfig::default())
    }

    /// Load assets with explicit espeak-ng binary and data paths.
    pub fn load_with(assets_dir: &Path, espeak: &EspeakConfig) -> Result<Self, AssetError> {
        if !assets_dir.is_dir() {
            return Err(AssetError::io(
                assets_dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "asset directory not found"),
            ));
        }
        log::info!("Loading assets from {}", assets_dir.display());

        let config = ModelConfig::load(&assets_dir.join("config.json"))?;
        let model = ModelHandle::find(assets_dir)?;
        let tokenizer = Tokenizer::load(&assets_dir.join("tokenizer.json"), &config, espeak)?;
        let voices = VoiceCatalog::load(assets_dir, config.style_dim)?;

        log::info!(
            "Assets ready: {} voices, {} languages, {} Hz",
            voices.len(),
            tokenizer.languages().len(),
            config.sample_rate
        );

        Ok(Self {
            root: assets_dir.to_path_buf(),
            config,
            tokenizer,
            voices,
            model,
        })
    }

    /// All voice names, sorted. Every name resolves through [`AssetStore::get_voice`].
    pub fn list_voices(&self) -> Vec<&str> {
        self.voices.names()
    }

    pub fn get_voice(&self, name: &str) -> Result<&VoiceEmbedding, SynthesisError> {
        self.voices.get(name)
    }

    pub fn model_handle(&self) -> &ModelHandle {
        &self.model
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn voices(&self) -> &VoiceCatalog {
        &self.voices
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

//! # kokoro-tts
//!
//! Text-to-speech synthesis with the Kokoro model: tokenization, pooled ONNX
//! inference, speed and sample-rate post-processing, and WAV output.
//!
//! ## Features
//!
//! - **Asset store**: model, vocabulary, phonemizer rules and voices loaded once from a directory
//! - **Bounded inference**: a fixed pool of model sessions shared by all requests
//! - **Typed errors**: validation, not-found, overload and timeout are distinguishable
//! - **Front ends**: an HTTP server (`server` feature) and a CLI (`cli` feature)
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! kokoro-tts = { version = "2026.2", features = ["onnx"] }
//! ```
//!
//! ```ignore
//! use kokoro_tts::{SynthesisRequestBuilder, Synthesizer, SynthesizerConfig};
//!
//! let synth = Synthesizer::load(SynthesizerConfig::new("models/kokoro"))?;
//! let request = SynthesisRequestBuilder::default()
//!     .text("Hello, world!")
//!     .voice("af_sarah")
//!     .build()?;
//! let output = synth.synthesize(&request)?;
//! std::fs::write("output.wav", output.wav.as_bytes())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod assets;
pub mod audio;
pub mod config;
pub mod error;
pub mod inference;
#[cfg(feature = "server")]
pub mod server;
pub mod synthesis;
pub mod tokenizer;

pub use assets::{AssetStore, ModelConfig, ModelHandle, VoiceCatalog, VoiceEmbedding};
pub use audio::{AudioSamples, WavBytes};
pub use config::{OutputFormat, SpeedRange, SpeedStage, SynthesizerConfig};
pub use error::{AssetError, ErrorKind, Stage, SynthesisError};
pub use inference::{AcousticModel, EngineStats, InferenceEngine, InferenceError};
pub use synthesis::{SynthesisOutput, SynthesisRequest, SynthesisRequestBuilder, Synthesizer};
pub use tokenizer::{TokenSequence, Tokenizer};

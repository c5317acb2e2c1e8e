//! Request-level orchestration: validation, tokenization, inference,
//! post-processing and WAV encoding.

use std::sync::Arc;
use std::time::{Duration, Instant};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::assets::{AssetStore, VoiceEmbedding};
use crate::audio::{self, WavBytes};
use crate::config::{ConfigError, SpeedStage, SynthesizerConfig};
use crate::error::{AssetError, Stage, SynthesisError};
use crate::inference::{AcousticModel, EngineStats, InferOptions, InferenceEngine, InferenceError};
use crate::tokenizer::TokenizeError;

/// Voice name that selects the configured default voice.
pub const DEFAULT_VOICE_ALIAS: &str = "default";

/// One synthesis request.
///
/// ```
/// use kokoro_tts::SynthesisRequestBuilder;
///
/// let request = SynthesisRequestBuilder::default()
///     .text("Hello world")
///     .voice("af_sarah")
///     .speed(1.25)
///     .build()
///     .unwrap();
/// assert_eq!(request.lang, None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into))]
pub struct SynthesisRequest {
    pub text: String,
    /// Voice name; `None` or `"default"` selects the default voice.
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub voice: Option<String>,
    /// Speed multiplier, 1.0 when absent.
    #[builder(setter(strip_option), default)]
    #[serde(default)]
    pub speed: Option<f32>,
    /// Language code; derived from the voice name when absent.
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub lang: Option<String>,
    /// Override the style vector index. `None` = auto (uses phoneme token count).
    #[builder(setter(strip_option), default)]
    #[serde(default)]
    pub style_index: Option<usize>,
}

impl SynthesisRequest {
    /// Request for `text` with every other field defaulted.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
            speed: None,
            lang: None,
            style_index: None,
        }
    }
}

/// Encoded result of a successful request.
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    pub wav: WavBytes,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Sample frames in the WAV payload.
    pub num_samples: usize,
    /// Voice actually used after default resolution.
    pub voice: String,
    /// Language actually used.
    pub lang: String,
}

impl SynthesisOutput {
    pub fn duration_secs(&self) -> f64 {
        self.num_samples as f64 / self.sample_rate as f64
    }
}

/// Time budget of one request, checked between pipeline stages.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    expires: Instant,
    budget: Duration,
}

impl Deadline {
    fn start(budget: Duration) -> Self {
        Self {
            expires: Instant::now() + budget,
            budget,
        }
    }

    fn check(&self, stage: Stage) -> Result<(), SynthesisError> {
        if Instant::now() >= self.expires {
            log::warn!("Request deadline of {:?} exceeded before {stage}", self.budget);
            return Err(self.exceeded(stage));
        }
        Ok(())
    }

    fn exceeded(&self, stage: Stage) -> SynthesisError {
        SynthesisError::Timeout {
            stage,
            budget: self.budget,
        }
    }
}

/// The synthesis pipeline over one loaded asset store and a bounded
/// inference pool.
///
/// Cheap to share: wrap it in an [`Arc`] and call
/// [`Synthesizer::synthesize`] from any number of threads.
///
/// # Quick Start
///
/// ```ignore
/// use kokoro_tts::{SynthesisRequest, Synthesizer, SynthesizerConfig};
///
/// let synth = Synthesizer::load(SynthesizerConfig::new("models/kokoro"))?;
/// let output = synth.synthesize(&SynthesisRequest::new("Hello, world!"))?;
/// std::fs::write("hello.wav", output.wav.as_bytes())?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Synthesizer {
    assets: Arc<AssetStore>,
    engine: InferenceEngine,
    config: SynthesizerConfig,
    default_voice: String,
    default_language: String,
}

impl Synthesizer {
    /// Load assets and build `max_concurrent_inferences` ONNX sessions.
    #[cfg(feature = "onnx")]
    pub fn load(config: SynthesizerConfig) -> Result<Self, AssetError> {
        config.validate()?;
        let assets = AssetStore::load_with(&config.assets_dir, &config.espeak)?;
        let models = crate::inference::onnx::load_pool(
            assets.model_handle(),
            config.max_concurrent_inferences,
            config.num_threads,
            config.optimized_model_cache_path.as_deref(),
        )?;
        Self::with_models(Arc::new(assets), models, config)
    }

    /// Build a synthesizer over already-loaded assets and model instances.
    ///
    /// The number of `models` is the concurrency bound; the
    /// `max_concurrent_inferences` setting only applies to [`Synthesizer::load`].
    pub fn with_models(
        assets: Arc<AssetStore>,
        models: Vec<Box<dyn AcousticModel>>,
        config: SynthesizerConfig,
    ) -> Result<Self, AssetError> {
        config.validate()?;
        if models.is_empty() {
            return Err(ConfigError::Invalid("at least one model instance is required".to_string()).into());
        }

        let default_voice = match &config.default_voice {
            Some(name) => {
                if assets.get_voice(name).is_err() {
                    return Err(ConfigError::Invalid(format!(
                        "default_voice '{name}' is not in the voice catalog"
                    ))
                    .into());
                }
                name.clone()
            }
            None => assets
                .voices()
                .first()
                .map(str::to_string)
                .ok_or_else(|| AssetError::NoVoices(assets.root().to_path_buf()))?,
        };

        let tokenizer = assets.tokenizer();
        let default_language = match &config.default_language {
            Some(lang) if !tokenizer.supports(lang) => {
                return Err(ConfigError::Invalid(format!(
                    "default_language '{lang}' has no phonemizer rules in tokenizer.json"
                ))
                .into());
            }
            Some(lang) => lang.clone(),
            None => tokenizer.default_language().to_string(),
        };

        let engine = InferenceEngine::new(models, assets.config(), config.queue_timeout())
            .with_boundary_ids(tokenizer.boundary_ids());
        if config.speed_stage == SpeedStage::Model && !engine.supports_fractional_speed() {
            log::warn!(
                "Model speed input is integer-valued; fractional speeds will be applied in post-processing"
            );
        }
        log::info!("Synthesizer ready: default voice '{default_voice}', default language '{default_language}'");

        Ok(Self {
            assets,
            engine,
            config,
            default_voice,
            default_language,
        })
    }

    /// Run one request through the whole pipeline.
    ///
    /// Empty text, out-of-range speed, unknown voices and unsupported
    /// languages are rejected before any tokenization or inference happens.
    /// Nothing partial is returned on failure.
    pub fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutput, SynthesisError> {
        let deadline = Deadline::start(self.config.request_timeout());

        // Validating
        let text = self.validate_text(&request.text)?;
        let speed = self.validate_speed(request.speed)?;
        let (voice_name, voice) = self.resolve_voice(request.voice.as_deref())?;
        let lang = self.resolve_language(request.lang.as_deref(), voice_name)?;
        log::debug!(
            "Synthesizing {} chars with voice '{voice_name}', lang '{lang}', speed {speed}",
            text.chars().count()
        );

        deadline.check(Stage::Tokenizing)?;
        let tokens = self
            .assets
            .tokenizer()
            .tokenize_within(text, lang, Some(deadline.expires))
            .map_err(|e| match e {
                TokenizeError::DeadlineExceeded => deadline.exceeded(Stage::Tokenizing),
                other => other.into(),
            })?;
        log::debug!("Tokenized into {} ids", tokens.len());

        deadline.check(Stage::Inferring)?;
        let (model_speed, post_speed) = self.split_speed(speed);
        let options = InferOptions {
            style_index: request.style_index,
            deadline: Some(deadline.expires),
        };
        let raw = self
            .engine
            .synthesize_with(&tokens, voice, model_speed, options)
            .map_err(|e| match e {
                InferenceError::Overloaded { waited } => SynthesisError::Overload { waited },
                InferenceError::DeadlineExceeded => deadline.exceeded(Stage::Inferring),
                other => SynthesisError::Inference {
                    reason: other.to_string(),
                },
            })?;
        log::debug!("Model produced {} samples at {} Hz", raw.len(), raw.sample_rate);

        deadline.check(Stage::PostProcessing)?;
        let target_rate = self.output_sample_rate();
        let processed = audio::process(raw, post_speed, target_rate)
            .map_err(|e| SynthesisError::PostProcess(e.to_string()))?;

        deadline.check(Stage::Encoding)?;
        let output = &self.config.output;
        let wav = audio::encode(
            &processed.samples,
            processed.sample_rate,
            output.channels,
            output.bits_per_sample,
        )
        .map_err(|e| SynthesisError::Encoding(e.to_string()))?;

        Ok(SynthesisOutput {
            wav,
            sample_rate: processed.sample_rate,
            channels: output.channels,
            bits_per_sample: output.bits_per_sample,
            num_samples: processed.len(),
            voice: voice_name.to_string(),
            lang: lang.to_string(),
        })
    }

    /// All voice names, sorted.
    pub fn list_voices(&self) -> Vec<&str> {
        self.assets.list_voices()
    }

    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Sample rate of the produced WAV files.
    pub fn output_sample_rate(&self) -> u32 {
        self.config
            .output
            .sample_rate
            .unwrap_or_else(|| self.engine.sample_rate())
    }

    pub fn engine_stats(&self) -> EngineStats {
        self.engine.stats()
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    pub fn config(&self) -> &SynthesizerConfig {
        &self.config
    }

    fn validate_text<'a>(&self, text: &'a str) -> Result<&'a str, SynthesisError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SynthesisError::Validation("text is empty".to_string()));
        }
        let chars = trimmed.chars().count();
        if chars > self.config.max_text_chars {
            return Err(SynthesisError::Validation(format!(
                "text has {chars} characters, the limit is {}",
                self.config.max_text_chars
            )));
        }
        Ok(trimmed)
    }

    fn validate_speed(&self, speed: Option<f32>) -> Result<f32, SynthesisError> {
        let speed = speed.unwrap_or(1.0);
        let range = self.config.speed_range;
        if !range.contains(speed) {
            return Err(SynthesisError::Validation(format!(
                "speed {speed} is outside the supported range {}..={}",
                range.min, range.max
            )));
        }
        Ok(speed)
    }

    fn resolve_voice<'a>(
        &'a self,
        requested: Option<&'a str>,
    ) -> Result<(&'a str, &'a VoiceEmbedding), SynthesisError> {
        let name = match requested.map(str::trim) {
            None | Some("") => self.default_voice.as_str(),
            Some(DEFAULT_VOICE_ALIAS) if self.assets.get_voice(DEFAULT_VOICE_ALIAS).is_err() => {
                self.default_voice.as_str()
            }
            Some(name) => name,
        };
        Ok((name, self.assets.get_voice(name)?))
    }

    fn resolve_language<'a>(
        &'a self,
        requested: Option<&'a str>,
        voice: &str,
    ) -> Result<&'a str, SynthesisError> {
        let tokenizer = self.assets.tokenizer();
        match requested.map(str::trim).filter(|lang| !lang.is_empty()) {
            Some(lang) if tokenizer.supports(lang) => Ok(lang),
            Some(lang) => Err(SynthesisError::UnsupportedLanguage {
                lang: lang.to_string(),
            }),
            None => Ok(tokenizer
                .language_for_voice(voice)
                .unwrap_or(self.default_language.as_str())),
        }
    }

    /// Returns `(model speed, post-processing speed)`; exactly one of them is
    /// the requested speed, the other is 1.0.
    fn split_speed(&self, speed: f32) -> (f32, f32) {
        match self.config.speed_stage {
            SpeedStage::PostProcess => (1.0, speed),
            SpeedStage::Model if self.engine.supports_fractional_speed() || speed.fract() == 0.0 => {
                (speed, 1.0)
            }
            SpeedStage::Model => {
                log::debug!("Applying fractional speed {speed} in post-processing");
                (1.0, speed)
            }
        }
    }
}

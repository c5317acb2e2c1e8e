//! Bounded, concurrency-safe invocation of the acoustic model.
//!
//! The engine owns a [`Pool`] of model instances. Every call checks one
//! instance out exclusively for the whole utterance, so per-call scratch state
//! is never shared and at most `capacity` forward passes run at once. Callers
//! beyond that wait up to the queue timeout and then get
//! [`InferenceError::Overloaded`], which callers surface as backpressure.
//!
//! Each call is atomic: it is not interrupted once a model instance is held.

#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pool;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::assets::{ModelConfig, VoiceEmbedding};
use crate::audio::AudioSamples;
use crate::tokenizer::TokenSequence;

pub use pool::{Checkout, Pool};

/// Id used to pad every chunk at both ends.
pub const PAD_ID: i64 = 0;

/// Crossfade used when concatenating chunk audio.
const CHUNK_CROSSFADE_MS: u32 = 10;

/// Kokoro punctuation ids (`;` `:` `,` `.` `!` `?`), preferred chunk boundaries.
const DEFAULT_BOUNDARY_IDS: &[i64] = &[1, 2, 3, 4, 5, 6];

#[derive(thiserror::Error, Debug)]
pub enum InferenceError {
    #[error("token id {id} at position {position} is outside the vocabulary 0..{bound}")]
    InvalidToken {
        id: i64,
        position: usize,
        bound: usize,
    },
    #[error("style vector has {got} values, model expects {expected}")]
    StyleDimension { got: usize, expected: usize },
    #[error("model produced a non-finite sample at index {index}")]
    NonFinite { index: usize },
    #[error("model produced no audio")]
    EmptyOutput,
    #[error("no model instance became free within {waited:?}")]
    Overloaded { waited: Duration },
    #[error("request deadline expired while waiting for a model instance")]
    DeadlineExceeded,
    #[error("{0}")]
    Backend(String),
    #[cfg(feature = "onnx")]
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[cfg(feature = "onnx")]
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// One loaded instance of the text-to-waveform network.
///
/// Implementations may keep mutable scratch state; the engine guarantees a
/// single caller per instance at a time.
pub trait AcousticModel: Send {
    /// Run one forward pass.
    ///
    /// `tokens` is already padded with [`PAD_ID`] at both ends and `style`
    /// holds exactly one style vector. Returns mono samples at the model's
    /// sample rate.
    fn infer(&mut self, tokens: &[i64], style: &[f32], speed: f32)
        -> Result<Vec<f32>, InferenceError>;

    /// Whether the speed input accepts fractional multipliers.
    fn supports_fractional_speed(&self) -> bool {
        true
    }
}

/// Point-in-time view of the engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Model instances in the pool.
    pub capacity: usize,
    /// Calls that obtained a model instance.
    pub calls: u64,
    /// Forward passes run (one per chunk).
    pub forward_passes: u64,
    /// Calls refused because no instance became free in time.
    pub rejected: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicU64,
    forward_passes: AtomicU64,
    rejected: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        counters.calls.fetch_add(1, Ordering::Relaxed);
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Per-call options for [`InferenceEngine::synthesize_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InferOptions {
    /// Style row to use instead of the token-count default.
    pub style_index: Option<usize>,
    /// Never wait for a model instance past this instant.
    pub deadline: Option<Instant>,
}

pub struct InferenceEngine {
    pool: Pool<Box<dyn AcousticModel>>,
    fractional_speed: bool,
    sample_rate: u32,
    n_token: usize,
    style_dim: usize,
    max_phoneme_len: usize,
    boundary_ids: Vec<i64>,
    crossfade_samples: usize,
    queue_timeout: Duration,
    counters: Counters,
}

impl InferenceEngine {
    /// Build an engine over `models`; the number of models is the concurrency bound.
    pub fn new(
        models: Vec<Box<dyn AcousticModel>>,
        config: &ModelConfig,
        queue_timeout: Duration,
    ) -> Self {
        let fractional_speed = models.iter().all(|m| m.supports_fractional_speed());
        log::info!(
            "Inference pool ready: {} model instance(s), queue timeout {:?}",
            models.len(),
            queue_timeout
        );
        Self {
            pool: Pool::new(models),
            fractional_speed,
            sample_rate: config.sample_rate,
            n_token: config.n_token,
            style_dim: config.style_dim,
            max_phoneme_len: config.max_phoneme_len,
            boundary_ids: DEFAULT_BOUNDARY_IDS.to_vec(),
            crossfade_samples: (config.sample_rate * CHUNK_CROSSFADE_MS / 1000) as usize,
            queue_timeout,
            counters: Counters::default(),
        }
    }

    /// Token ids preferred as split points when a sequence must be chunked.
    pub fn with_boundary_ids(mut self, ids: Vec<i64>) -> Self {
        self.boundary_ids = ids;
        self
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn supports_fractional_speed(&self) -> bool {
        self.fractional_speed
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            capacity: self.pool.capacity(),
            calls: self.counters.calls.load(Ordering::Relaxed),
            forward_passes: self.counters.forward_passes.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.counters.peak_in_flight.load(Ordering::SeqCst),
        }
    }

    /// Synthesize a waveform for `tokens` in the given voice.
    pub fn synthesize(
        &self,
        tokens: &TokenSequence,
        voice: &VoiceEmbedding,
        speed: f32,
    ) -> Result<AudioSamples, InferenceError> {
        self.synthesize_with(tokens, voice, speed, InferOptions::default())
    }

    pub fn synthesize_with(
        &self,
        tokens: &TokenSequence,
        voice: &VoiceEmbedding,
        speed: f32,
        options: InferOptions,
    ) -> Result<AudioSamples, InferenceError> {
        let ids = tokens.as_slice();
        if let Some((position, &id)) = ids
            .iter()
            .enumerate()
            .find(|(_, &id)| id < 0 || id as u64 >= self.n_token as u64)
        {
            return Err(InferenceError::InvalidToken {
                id,
                position,
                bound: self.n_token,
            });
        }
        if voice.dim() != self.style_dim {
            return Err(InferenceError::StyleDimension {
                got: voice.dim(),
                expected: self.style_dim,
            });
        }

        let (wait, deadline_bound) = match options.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(InferenceError::DeadlineExceeded);
                }
                (remaining.min(self.queue_timeout), remaining < self.queue_timeout)
            }
            None => (self.queue_timeout, false),
        };

        let Some(mut model) = self.pool.checkout(wait) else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            log::warn!("No model instance free after {wait:?}");
            return Err(if deadline_bound {
                InferenceError::DeadlineExceeded
            } else {
                InferenceError::Overloaded { waited: wait }
            });
        };
        let _in_flight = InFlight::enter(&self.counters);

        // Keep a stable style index so adjacent chunks don't change style/prosody
        // based on chunk length.
        let style = voice.style(options.style_index.unwrap_or(ids.len()));
        let chunks = if ids.len() > self.max_phoneme_len {
            log::debug!(
                "Phoneme sequence exceeded limit ({} > {}), chunking",
                ids.len(),
                self.max_phoneme_len
            );
            split_chunks(ids, self.max_phoneme_len, &self.boundary_ids)
        } else {
            vec![ids]
        };

        let mut combined = Vec::with_capacity(ids.len() * 300);
        for chunk in chunks {
            let mut padded = Vec::with_capacity(chunk.len() + 2);
            padded.push(PAD_ID);
            padded.extend_from_slice(chunk);
            padded.push(PAD_ID);

            let audio = model.infer(&padded, style, speed)?;
            self.counters.forward_passes.fetch_add(1, Ordering::Relaxed);

            if let Some(pos) = audio.iter().position(|s| !s.is_finite()) {
                return Err(InferenceError::NonFinite {
                    index: combined.len() + pos,
                });
            }
            if audio.is_empty() {
                continue;
            }

            if combined.is_empty() {
                combined.extend_from_slice(&audio);
            } else {
                append_with_crossfade(&mut combined, &audio, self.crossfade_samples);
            }
        }

        if combined.is_empty() {
            return Err(InferenceError::EmptyOutput);
        }
        Ok(AudioSamples::new(combined, self.sample_rate))
    }
}

/// Split phoneme ids into chunks of at most `max_len`, preferring to cut right
/// after a boundary id.
fn split_chunks<'a>(ids: &'a [i64], max_len: usize, boundary_ids: &[i64]) -> Vec<&'a [i64]> {
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < ids.len() {
        let end = (start + max_len).min(ids.len());
        if end == ids.len() {
            chunks.push(&ids[start..end]);
            break;
        }

        let split = ids[start..end]
            .iter()
            .rposition(|id| boundary_ids.contains(id))
            .map(|i| start + i + 1)
            .unwrap_or(end);

        chunks.push(&ids[start..split]);
        start = split;
    }

    chunks
}

fn append_with_crossfade(dst: &mut Vec<f32>, src: &[f32], crossfade_samples: usize) {
    let overlap = crossfade_samples.min(dst.len()).min(src.len());
    if overlap == 0 {
        dst.extend_from_slice(src);
        return;
    }

    let dst_start = dst.len() - overlap;
    for i in 0..overlap {
        let t = (i + 1) as f32 / (overlap as f32 + 1.0);
        dst[dst_start + i] = dst[dst_start + i] * (1.0 - t) + src[i] * t;
    }

    dst.extend_from_slice(&src[overlap..]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Emits `samples_per_token / speed` samples per unpadded token, all equal to style[0].
    struct Recorder {
        samples_per_token: usize,
        seen: Arc<Mutex<Vec<Vec<i64>>>>,
        output: Option<Vec<f32>>,
    }

    impl AcousticModel for Recorder {
        fn infer(
            &mut self,
            tokens: &[i64],
            style: &[f32],
            speed: f32,
        ) -> Result<Vec<f32>, InferenceError> {
            self.seen.lock().unwrap().push(tokens.to_vec());
            if let Some(output) = &self.output {
                return Ok(output.clone());
            }
            let n = ((tokens.len() - 2) * self.samples_per_token) as f32 / speed;
            Ok(vec![style[0]; n.round() as usize])
        }
    }

    fn config() -> ModelConfig {
        let mut config = ModelConfig::default();
        config.style_dim = 2;
        config.n_token = 10;
        config.max_phoneme_len = 4;
        config
    }

    fn engine_with(output: Option<Vec<f32>>) -> (InferenceEngine, Arc<Mutex<Vec<Vec<i64>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let model = Recorder {
            samples_per_token: 100,
            seen: seen.clone(),
            output,
        };
        let engine = InferenceEngine::new(vec![Box::new(model)], &config(), Duration::from_millis(50));
        (engine, seen)
    }

    fn voice() -> VoiceEmbedding {
        VoiceEmbedding::new(vec![0.1, 0.0, 0.2, 0.0, 0.3, 0.0], 2).unwrap()
    }

    #[test]
    fn pads_tokens_and_selects_style_by_length() {
        let (engine, seen) = engine_with(None);
        let tokens = TokenSequence::new(vec![7, 8]).unwrap();
        let audio = engine.synthesize(&tokens, &voice(), 1.0).unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), &[vec![0, 7, 8, 0]]);
        assert_eq!(audio.samples.len(), 200);
        assert_eq!(audio.sample_rate, 24_000);
        // Two tokens select style row 2.
        assert!(audio.samples.iter().all(|&s| s == 0.3));
    }

    #[test]
    fn style_index_override() {
        let (engine, _) = engine_with(None);
        let tokens = TokenSequence::new(vec![7, 8]).unwrap();
        let options = InferOptions {
            style_index: Some(0),
            ..Default::default()
        };
        let audio = engine.synthesize_with(&tokens, &voice(), 1.0, options).unwrap();
        assert!(audio.samples.iter().all(|&s| s == 0.1));
    }

    #[test]
    fn passes_speed_to_the_model() {
        let (engine, _) = engine_with(None);
        let tokens = TokenSequence::new(vec![1, 2, 3]).unwrap();
        let audio = engine.synthesize(&tokens, &voice(), 2.0).unwrap();
        assert_eq!(audio.samples.len(), 150);
    }

    #[test]
    fn chunks_long_sequences_at_boundaries() {
        let (engine, seen) = engine_with(None);
        let tokens = TokenSequence::new(vec![7, 3, 8, 9, 7, 8, 4, 9]).unwrap();
        let audio = engine.synthesize(&tokens, &voice(), 1.0).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[vec![0, 7, 3, 0], vec![0, 8, 9, 7, 8, 0], vec![0, 4, 9, 0]]
        );
        // Each join overlaps by the crossfade length.
        assert_eq!(engine.crossfade_samples, 240);
        assert_eq!(audio.samples.len(), 800 - 2 * 200);
        assert_eq!(engine.stats().forward_passes, 3);
        assert_eq!(engine.stats().calls, 1);
    }

    #[test]
    fn splits_after_configured_boundary_ids() {
        let (engine, seen) = engine_with(None);
        let engine = engine.with_boundary_ids(vec![8]);
        let tokens = TokenSequence::new(vec![7, 8, 9, 3, 9, 9]).unwrap();
        engine.synthesize(&tokens, &voice(), 1.0).unwrap();

        // 3 is no longer a boundary; the cut follows 8.
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[vec![0, 7, 8, 0], vec![0, 9, 3, 9, 9, 0]]
        );
    }

    #[test]
    fn crossfade_tracks_the_sample_rate() {
        let mut config = config();
        config.sample_rate = 16_000;
        let engine = InferenceEngine::new(Vec::new(), &config, Duration::ZERO);
        assert_eq!(engine.crossfade_samples, 160);
    }

    #[test]
    fn rejects_out_of_vocabulary_ids_before_inference() {
        let (engine, seen) = engine_with(None);
        let tokens = TokenSequence::new(vec![1, 10]).unwrap();
        let err = engine.synthesize(&tokens, &voice(), 1.0).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::InvalidToken { id: 10, position: 1, bound: 10 }
        ));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(engine.stats().calls, 0);
    }

    #[test]
    fn rejects_wrong_style_dimension() {
        let (engine, _) = engine_with(None);
        let tokens = TokenSequence::new(vec![1]).unwrap();
        let wide = VoiceEmbedding::new(vec![0.0; 3], 3).unwrap();
        assert!(matches!(
            engine.synthesize(&tokens, &wide, 1.0),
            Err(InferenceError::StyleDimension { got: 3, expected: 2 })
        ));
    }

    #[test]
    fn non_finite_output_is_an_error() {
        let (engine, _) = engine_with(Some(vec![0.0, f32::NAN, 0.0]));
        let tokens = TokenSequence::new(vec![1]).unwrap();
        assert!(matches!(
            engine.synthesize(&tokens, &voice(), 1.0),
            Err(InferenceError::NonFinite { index: 1 })
        ));
        // The instance went back to the pool.
        assert_eq!(engine.stats().in_flight, 0);
        assert!(engine.synthesize(&tokens, &voice(), 1.0).is_err());
    }

    #[test]
    fn empty_output_is_an_error() {
        let (engine, _) = engine_with(Some(Vec::new()));
        let tokens = TokenSequence::new(vec![1]).unwrap();
        assert!(matches!(
            engine.synthesize(&tokens, &voice(), 1.0),
            Err(InferenceError::EmptyOutput)
        ));
    }

    #[test]
    fn busy_pool_reports_overload_or_deadline() {
        let (engine, _) = engine_with(None);
        let tokens = TokenSequence::new(vec![1]).unwrap();
        let _held = engine.pool.checkout(Duration::ZERO).unwrap();

        assert!(matches!(
            engine.synthesize(&tokens, &voice(), 1.0),
            Err(InferenceError::Overloaded { .. })
        ));

        let options = InferOptions {
            deadline: Some(Instant::now() + Duration::from_millis(20)),
            ..Default::default()
        };
        assert!(matches!(
            engine.synthesize_with(&tokens, &voice(), 1.0, options),
            Err(InferenceError::DeadlineExceeded)
        ));
        assert_eq!(engine.stats().rejected, 2);
    }

    #[test]
    fn split_prefers_boundaries_and_respects_max_len() {
        let ids = [5, 5, 4, 5, 5, 5, 5, 5, 5];
        let chunks = split_chunks(&ids, 4, DEFAULT_BOUNDARY_IDS);
        assert_eq!(chunks, vec![&ids[0..3], &ids[3..7], &ids[7..9]]);
        assert!(chunks.iter().all(|c| c.len() <= 4));
        assert_eq!(chunks.concat(), ids.to_vec());
    }

    #[test]
    fn crossfade_blends_the_overlap() {
        let mut dst = vec![1.0; 4];
        append_with_crossfade(&mut dst, &[0.0; 4], 2);
        assert_eq!(dst.len(), 6);
        assert!((dst[2] - 2.0 / 3.0).abs() < 1e-6);
        assert!((dst[3] - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(&dst[4..], &[0.0, 0.0]);
    }
}

//! Shared fixtures: a temporary asset directory and a deterministic model.
#![allow(dead_code)]

use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kokoro_tts::{AcousticModel, AssetStore, InferenceError, Synthesizer, SynthesizerConfig};
use tempfile::TempDir;

pub const SAMPLE_RATE: u32 = 24_000;
pub const STYLE_DIM: usize = 4;
/// Samples the mock model emits per unpadded token at speed 1.0.
pub const SAMPLES_PER_TOKEN: usize = 300;

/// Voices written to the asset directory, with the first style value of each.
pub const VOICES: &[(&str, f32)] = &[("af_sarah", 0.1), ("am_adam", 0.5), ("bf_emma", 0.9)];

/// Observes what the mock models were asked to do.
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<AtomicUsize>,
    speeds: Arc<Mutex<Vec<f32>>>,
    tokens: Arc<Mutex<Vec<Vec<i64>>>>,
}

impl CallLog {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn speeds(&self) -> Vec<f32> {
        self.speeds.lock().unwrap().clone()
    }

    /// Token ids of every forward pass, without the padding.
    pub fn tokens(&self) -> Vec<Vec<i64>> {
        self.tokens.lock().unwrap().clone()
    }
}

/// Emits `round(tokens * SAMPLES_PER_TOKEN / speed)` samples of a sine whose
/// frequency depends on the voice, so outputs differ per voice and text.
pub struct MockModel {
    tally: CallLog,
    delay: Duration,
    emit_nan: bool,
    fractional_speed: bool,
}

impl MockModel {
    pub fn new(tally: &CallLog) -> Self {
        Self {
            tally: tally.clone(),
            delay: Duration::ZERO,
            emit_nan: false,
            fractional_speed: true,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn emitting_nan(mut self) -> Self {
        self.emit_nan = true;
        self
    }

    pub fn integer_speed(mut self) -> Self {
        self.fractional_speed = false;
        self
    }
}

impl AcousticModel for MockModel {
    fn infer(
        &mut self,
        tokens: &[i64],
        style: &[f32],
        speed: f32,
    ) -> Result<Vec<f32>, InferenceError> {
        self.tally.calls.fetch_add(1, Ordering::SeqCst);
        self.tally.speeds.lock().unwrap().push(speed);
        self.tally
            .tokens
            .lock()
            .unwrap()
            .push(tokens[1..tokens.len() - 1].to_vec());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let content = tokens.len() - 2;
        let len = ((content * SAMPLES_PER_TOKEN) as f32 / speed).round() as usize;
        let freq = 100.0 + 1000.0 * style[0].abs() + content as f32;
        let mut samples: Vec<f32> = (0..len)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / SAMPLE_RATE as f32).sin())
            .collect();
        if self.emit_nan && !samples.is_empty() {
            let mid = samples.len() / 2;
            samples[mid] = f32::NAN;
        }
        Ok(samples)
    }

    fn supports_fractional_speed(&self) -> bool {
        self.fractional_speed
    }
}

pub fn models(count: usize, tally: &CallLog) -> Vec<Box<dyn AcousticModel>> {
    (0..count)
        .map(|_| Box::new(MockModel::new(tally)) as Box<dyn AcousticModel>)
        .collect()
}

/// `config.json` of the fixture model.
pub fn model_config_json() -> serde_json::Value {
    serde_json::json!({ "sample_rate": SAMPLE_RATE, "style_dim": STYLE_DIM, "n_token": 178 })
}

/// Graphemes-only `tokenizer.json` for `en-us` and `en-gb`. Clause
/// punctuation sits on ids 1..=6, the space on 16 and `a..=z` on 43.. .
pub fn tokenizer_json() -> serde_json::Value {
    let mut vocab = serde_json::Map::new();
    for (id, ch) in [';', ':', ',', '.', '!', '?'].into_iter().enumerate() {
        vocab.insert(ch.to_string(), (id as i64 + 1).into());
    }
    vocab.insert(" ".to_string(), 16.into());
    for (offset, ch) in ('a'..='z').enumerate() {
        vocab.insert(ch.to_string(), (43 + offset as i64).into());
    }
    serde_json::json!({
        "vocab": vocab,
        "default_language": "en-us",
        "unknown": "skip",
        "languages": {
            "en-us": { "backend": "graphemes", "lowercase": true },
            "en-gb": { "backend": "graphemes", "lowercase": true, "rules": { "ou": "u" } }
        },
        "voice_prefixes": { "a": "en-us", "b": "en-gb" }
    })
}

pub fn write_json(path: &Path, value: &serde_json::Value) {
    std::fs::write(path, value.to_string()).unwrap();
}

/// Write a complete asset directory: the fixture config and tokenizer, a
/// placeholder model file and three voices.
pub fn write_assets(dir: &Path) {
    write_json(&dir.join("config.json"), &model_config_json());
    write_json(&dir.join("tokenizer.json"), &tokenizer_json());

    std::fs::write(dir.join("model.onnx"), b"not a real model").unwrap();

    let voices = dir.join("voices");
    std::fs::create_dir(&voices).unwrap();
    for &(name, base) in VOICES {
        // Three style rows per voice.
        let bytes: Vec<u8> = (0..3 * STYLE_DIM)
            .map(|i| base + (i / STYLE_DIM) as f32 * 0.01)
            .flat_map(f32::to_le_bytes)
            .collect();
        std::fs::write(voices.join(format!("{name}.bin")), bytes).unwrap();
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Load the fixture assets and build a synthesizer over `models`.
pub fn synthesizer(
    config: SynthesizerConfig,
    models: Vec<Box<dyn AcousticModel>>,
) -> (TempDir, Arc<Synthesizer>) {
    let dir = tempfile::tempdir().unwrap();
    write_assets(dir.path());
    let synth = load_synthesizer(dir.path(), config, models);
    (dir, synth)
}

/// Build a synthesizer over an asset directory that is already written.
pub fn load_synthesizer(
    dir: &Path,
    config: SynthesizerConfig,
    models: Vec<Box<dyn AcousticModel>>,
) -> Arc<Synthesizer> {
    init_logging();
    let assets = AssetStore::load_with(dir, &config.espeak).unwrap();
    Arc::new(Synthesizer::with_models(Arc::new(assets), models, config).unwrap())
}

/// Write an executable shell script that stands in for espeak-ng.
#[cfg(unix)]
pub fn fake_espeak(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-espeak-ng");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn default_synthesizer(tally: &CallLog) -> (TempDir, Arc<Synthesizer>) {
    synthesizer(SynthesizerConfig::default(), models(2, tally))
}

//! ONNX Runtime backend for the acoustic model.

use std::path::Path;

use ndarray::{Array2, ArrayView2};
use ort::execution_providers::CPUExecutionProvider;
use ort::inputs;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;

use super::{AcousticModel, InferenceError};
use crate::assets::ModelHandle;
use crate::error::AssetError;

/// One ONNX session of the Kokoro network.
pub struct OnnxModel {
    session: Session,
    inputs: InputLayout,
}

impl OnnxModel {
    pub fn load(
        onnx_path: &Path,
        num_threads: Option<usize>,
        optimized_cache_path: Option<&Path>,
    ) -> Result<Self, InferenceError> {
        let session = open_session(onnx_path, num_threads, optimized_cache_path)?;
        let inputs = InputLayout::of(&session);
        log::info!(
            "Session inputs: tokens as '{}', {} speed",
            inputs.tokens,
            if inputs.int_speed { "int32" } else { "float32" }
        );
        Ok(Self { session, inputs })
    }
}

impl AcousticModel for OnnxModel {
    fn infer(
        &mut self,
        tokens: &[i64],
        style: &[f32],
        speed: f32,
    ) -> Result<Vec<f32>, InferenceError> {
        let tokens_arr = Array2::from_shape_vec((1, tokens.len()), tokens.to_vec())?;
        let style_view = ArrayView2::from_shape((1, style.len()), style)?;

        let tokens_name = self.inputs.tokens.as_str();
        let output = if self.inputs.int_speed {
            let speed_arr = ndarray::arr1(&[speed.round() as i32]);
            let inputs = inputs![
                tokens_name => TensorRef::from_array_view(tokens_arr.view())?,
                "style" => TensorRef::from_array_view(style_view)?,
                "speed" => TensorRef::from_array_view(speed_arr.view())?,
            ];
            self.session.run(inputs)?
        } else {
            let speed_arr = ndarray::arr1(&[speed]);
            let inputs = inputs![
                tokens_name => TensorRef::from_array_view(tokens_arr.view())?,
                "style" => TensorRef::from_array_view(style_view)?,
                "speed" => TensorRef::from_array_view(speed_arr.view())?,
            ];
            self.session.run(inputs)?
        };

        let (_, waveform) = output
            .iter()
            .next()
            .ok_or_else(|| InferenceError::Backend("model returned no outputs".to_string()))?;
        let waveform = waveform.try_extract_array::<f32>()?;

        Ok(waveform.iter().copied().collect())
    }

    fn supports_fractional_speed(&self) -> bool {
        !self.inputs.int_speed
    }
}

/// Build `count` independent sessions from the model file.
///
/// Only the first session writes the optimized graph cache; the rest load it.
pub fn load_pool(
    handle: &ModelHandle,
    count: usize,
    num_threads: Option<usize>,
    optimized_cache_path: Option<&Path>,
) -> Result<Vec<Box<dyn AcousticModel>>, AssetError> {
    log::info!(
        "Loading {count} Kokoro session(s) from {} ({:.1} MB)",
        handle.path().display(),
        handle.size_bytes() as f64 / 1_048_576.0
    );

    (0..count)
        .map(|_| {
            OnnxModel::load(handle.path(), num_threads, optimized_cache_path)
                .map(|model| Box::new(model) as Box<dyn AcousticModel>)
                .map_err(|e| AssetError::CorruptModel {
                    path: handle.path().to_path_buf(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

/// Where a session's graph comes from.
enum GraphSource<'a> {
    /// A graph optimized by an earlier load; no further optimization.
    Cached(&'a Path),
    /// The original model, optimized now and optionally saved to a cache.
    Original { save_to: Option<&'a Path> },
}

impl<'a> GraphSource<'a> {
    fn choose(cache: Option<&'a Path>) -> Self {
        match cache {
            Some(path) if path.exists() => GraphSource::Cached(path),
            save_to => GraphSource::Original { save_to },
        }
    }
}

fn open_session(
    onnx_path: &Path,
    num_threads: Option<usize>,
    optimized_cache_path: Option<&Path>,
) -> Result<Session, InferenceError> {
    let mut builder = Session::builder()?
        .with_execution_providers([CPUExecutionProvider::default().build()])?
        .with_parallel_execution(true)?;
    if let Some(threads) = num_threads {
        builder = builder
            .with_intra_threads(threads)?
            .with_inter_threads(threads)?;
    }

    let load_path = match GraphSource::choose(optimized_cache_path) {
        GraphSource::Cached(path) => {
            log::info!("Using optimized graph cache {}", path.display());
            builder = builder.with_optimization_level(GraphOptimizationLevel::Disable)?;
            path
        }
        GraphSource::Original { save_to } => {
            builder = builder.with_optimization_level(GraphOptimizationLevel::Level3)?;
            if let Some(path) = save_to {
                log::info!("Optimizing graph, caching it at {}", path.display());
                builder = builder.with_optimized_model_path(path)?;
            }
            onnx_path
        }
    };

    Ok(builder.commit_from_file(load_path)?)
}

/// Input names and types that differ between Kokoro exports.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InputLayout {
    /// `input_ids` or `tokens`.
    tokens: String,
    int_speed: bool,
}

impl InputLayout {
    fn of(session: &Session) -> Self {
        // Missing inputs default to the current export: `input_ids`, int32 speed.
        let mut layout = InputLayout {
            tokens: "input_ids".to_string(),
            int_speed: true,
        };
        for input in session.inputs() {
            match input.name() {
                name @ ("input_ids" | "tokens") => layout.tokens = name.to_string(),
                "speed" => {
                    let dtype = format!("{:?}", input.dtype());
                    layout.int_speed = dtype.to_lowercase().contains("int32");
                }
                _ => {}
            }
        }
        layout
    }
}

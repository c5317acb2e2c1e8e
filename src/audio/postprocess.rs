use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

use super::AudioSamples;

/// Input frames fed to the resampler per call.
const CHUNK_SIZE: usize = 1024;

#[derive(thiserror::Error, Debug)]
pub enum PostProcessError {
    #[error("Failed to create resampler: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),
    #[error("Resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),
}

/// Apply a speed change and convert to `target_rate` in one pass.
///
/// The waveform goes through a band-limited sinc resampler with ratio
/// `target_rate / sample_rate / speed` and is trimmed to exactly
/// `round(len * ratio)` samples. This is plain resampling, so pitch shifts
/// together with speed. With `speed == 1.0` and a matching rate the input is
/// returned untouched.
///
/// `speed` must be finite and positive and `target_rate` non-zero; the
/// synthesizer validates both before calling.
pub fn process(
    audio: AudioSamples,
    speed: f32,
    target_rate: u32,
) -> Result<AudioSamples, PostProcessError> {
    debug_assert!(speed.is_finite() && speed > 0.0);
    debug_assert!(target_rate > 0);

    if speed == 1.0 && audio.sample_rate == target_rate {
        return Ok(audio);
    }
    if audio.samples.is_empty() {
        return Ok(AudioSamples::new(Vec::new(), target_rate));
    }

    let ratio = target_rate as f64 / audio.sample_rate as f64 / speed as f64;
    let out_len = ((audio.samples.len() as f64 * ratio).round() as usize).max(1);
    log::debug!(
        "Resampling {} samples at {} Hz to {out_len} at {target_rate} Hz (speed {speed})",
        audio.samples.len(),
        audio.sample_rate
    );

    let samples = resample_sinc(&audio.samples, ratio, out_len)?;
    Ok(AudioSamples::new(samples, target_rate))
}

/// Resample mono `samples` by `ratio`, compensating for the filter delay.
fn resample_sinc(samples: &[f32], ratio: f64, out_len: usize) -> Result<Vec<f32>, PostProcessError> {
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, 1)?;
    let delay = resampler.output_delay();
    let wanted = delay + out_len;

    let mut output = Vec::with_capacity(wanted + CHUNK_SIZE);
    let mut chunks = samples.chunks_exact(CHUNK_SIZE);
    for chunk in &mut chunks {
        let frames = resampler.process(&[chunk][..], None)?;
        output.extend_from_slice(&frames[0]);
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let frames = resampler.process_partial(Some(&[tail][..]), None)?;
        output.extend_from_slice(&frames[0]);
    }

    // Flush the filter until the delayed tail has come out.
    while output.len() < wanted {
        let frames = resampler.process_partial::<&[f32]>(None, None)?;
        if frames[0].is_empty() {
            break;
        }
        output.extend_from_slice(&frames[0]);
    }

    output.drain(..delay.min(output.len()));
    output.resize(out_len, 0.0);
    Ok(output)
}

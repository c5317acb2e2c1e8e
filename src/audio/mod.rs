//! Audio buffers, post-processing and WAV output.

pub mod postprocess;
pub mod wav;

pub use postprocess::{process, PostProcessError};
pub use wav::{encode, WavBytes};

/// Mono f32 waveform in `[-1.0, 1.0]` at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSamples {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioSamples {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::AudioSamples;

    #[test]
    fn duration_follows_sample_rate() {
        let audio = AudioSamples::new(vec![0.0; 12_000], 24_000);
        assert!((audio.duration_secs() - 0.5).abs() < f64::EPSILON);
        assert_eq!(audio.len(), 12_000);

        let empty = AudioSamples::new(Vec::new(), 16_000);
        assert!(empty.is_empty());
        assert_eq!(empty.duration_secs(), 0.0);
    }
}

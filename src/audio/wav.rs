use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

/// A complete RIFF/WAVE file in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavBytes(Vec<u8>);

impl WavBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for WavBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("unsupported WAV layout: {channels} channel(s), {bits_per_sample} bits per sample")]
    Unsupported { channels: u16, bits_per_sample: u16 },
    #[error("WAV writer error: {0}")]
    Writer(#[from] hound::Error),
}

/// Serialize mono samples into a WAV file.
///
/// 16 and 24 bits produce integer PCM; 32 bits produces IEEE float. With two
/// channels the mono signal is written to both. Samples are clamped to
/// `[-1.0, 1.0]` before integer quantization (`round(s * 2^(bits-1))`).
pub fn encode(
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
) -> Result<WavBytes, EncodeError> {
    let sample_format = match bits_per_sample {
        16 | 24 => SampleFormat::Int,
        32 => SampleFormat::Float,
        _ => {
            return Err(EncodeError::Unsupported {
                channels,
                bits_per_sample,
            })
        }
    };
    if !matches!(channels, 1 | 2) {
        return Err(EncodeError::Unsupported {
            channels,
            bits_per_sample,
        });
    }

    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample,
        sample_format,
    };
    let bytes_per_frame = channels as usize * bits_per_sample as usize / 8;
    let mut cursor = Cursor::new(Vec::with_capacity(64 + samples.len() * bytes_per_frame));

    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            for _ in 0..channels {
                match bits_per_sample {
                    16 => writer.write_sample(quantize(sample, 16) as i16)?,
                    24 => writer.write_sample(quantize(sample, 24))?,
                    _ => writer.write_sample(sample)?,
                }
            }
        }
        writer.finalize()?;
    }

    Ok(WavBytes(cursor.into_inner()))
}

fn quantize(sample: f32, bits: u32) -> i32 {
    let scale = (1i64 << (bits - 1)) as f64;
    let value = (sample.clamp(-1.0, 1.0) as f64 * scale).round();
    value.clamp(-scale, scale - 1.0) as i32
}

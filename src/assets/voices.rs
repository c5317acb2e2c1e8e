use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{AssetError, SynthesisError};

/// Archive names looked for in the asset root when there is no `voices/` directory.
const VOICE_ARCHIVES: &[&str] = &["voices-v1.0.bin", "voices.npz"];

/// Style vectors for one voice.
///
/// A voice holds one or more style vectors of the model's style dimension.
/// The row used for a request is picked by phoneme token count, enabling
/// prosody-consistent synthesis; single-row voices use the same vector for
/// every length.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceEmbedding {
    dim: usize,
    styles: Vec<f32>,
}

impl VoiceEmbedding {
    /// Build an embedding from `N × dim` floats.
    pub fn new(styles: Vec<f32>, dim: usize) -> Result<Self, String> {
        if dim == 0 {
            return Err("style dimension must be greater than 0".to_string());
        }
        if styles.is_empty() {
            return Err("voice contains no style vectors".to_string());
        }
        if styles.len() % dim != 0 {
            return Err(format!(
                "float count {} is not a multiple of {dim} (style vector dim)",
                styles.len()
            ));
        }
        if let Some(pos) = styles.iter().position(|v| !v.is_finite()) {
            return Err(format!("non-finite value at index {pos}"));
        }
        Ok(Self { dim, styles })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of style vectors stored for this voice.
    pub fn style_count(&self) -> usize {
        self.styles.len() / self.dim
    }

    /// Style vector at `idx`. The index is clamped to the valid range, so any index is safe.
    pub fn style(&self, idx: usize) -> &[f32] {
        let clamped = idx.min(self.style_count() - 1);
        &self.styles[clamped * self.dim..(clamped + 1) * self.dim]
    }
}

/// All voices available to the process. Read-only once loaded.
#[derive(Debug, Default)]
pub struct VoiceCatalog {
    voices: BTreeMap<String, VoiceEmbedding>,
}

impl VoiceCatalog {
    /// Load every voice below `assets_dir`.
    ///
    /// Reads `voices/*.bin` (raw little-endian f32) and `voices/*.npy`. When the
    /// directory is missing, falls back to a numpy zip archive in the asset root.
    /// Any voice that fails to parse fails the whole load.
    pub fn load(assets_dir: &Path, style_dim: usize) -> Result<Self, AssetError> {
        let voices_dir = assets_dir.join("voices");
        let catalog = if voices_dir.is_dir() {
            Self::load_dir(&voices_dir, style_dim)?
        } else if let Some(archive) = VOICE_ARCHIVES
            .iter()
            .map(|name| assets_dir.join(name))
            .find(|path| path.is_file())
        {
            Self::load_archive(&archive, style_dim)?
        } else {
            return Err(AssetError::MissingVoices(assets_dir.to_path_buf()));
        };

        if catalog.voices.is_empty() {
            let origin = if voices_dir.is_dir() {
                voices_dir
            } else {
                assets_dir.to_path_buf()
            };
            return Err(AssetError::NoVoices(origin));
        }

        log::info!("Loaded {} voices", catalog.voices.len());
        Ok(catalog)
    }

    fn load_dir(dir: &Path, style_dim: usize) -> Result<Self, AssetError> {
        let mut voices = BTreeMap::new();
        let entries = std::fs::read_dir(dir).map_err(|e| AssetError::io(dir, e))?;

        for entry in entries {
            let path = entry.map_err(|e| AssetError::io(dir, e))?.path();
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let floats = match path.extension().and_then(|e| e.to_str()) {
                Some("bin") => {
                    let data = std::fs::read(&path).map_err(|e| AssetError::io(&path, e))?;
                    floats_from_le_bytes(&data).map_err(|reason| invalid(&path, reason))?
                }
                Some("npy") => {
                    let data = std::fs::read(&path).map_err(|e| AssetError::io(&path, e))?;
                    parse_npy(&data).map_err(|reason| invalid(&path, reason))?
                }
                _ => {
                    log::debug!("Skipping non-voice file {}", path.display());
                    continue;
                }
            };

            let embedding =
                VoiceEmbedding::new(floats, style_dim).map_err(|reason| invalid(&path, reason))?;
            voices.insert(name.to_string(), embedding);
        }

        Ok(Self { voices })
    }

    /// Load all voices from a .npz (numpy zip) archive.
    ///
    /// Each entry is a .npy file named after the voice (e.g., `af_heart.npy`).
    fn load_archive(path: &Path, style_dim: usize) -> Result<Self, AssetError> {
        let file = File::open(path).map_err(|e| AssetError::io(path, e))?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| invalid(path, format!("failed to open zip archive: {e}")))?;

        let mut voices = BTreeMap::new();
        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| invalid(path, format!("failed to read zip entry {i}: {e}")))?;

            let raw_name = entry.name().to_string();
            let voice_name = raw_name.trim_end_matches(".npy").to_string();
            if voice_name.is_empty() || raw_name.ends_with('/') {
                continue;
            }

            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| invalid(path, format!("failed to read {raw_name}: {e}")))?;

            let embedding = parse_npy(&data)
                .and_then(|floats| VoiceEmbedding::new(floats, style_dim))
                .map_err(|reason| invalid(path, format!("{raw_name}: {reason}")))?;
            voices.insert(voice_name, embedding);
        }

        Ok(Self { voices })
    }

    /// Resolve a voice by its exact name.
    pub fn get(&self, name: &str) -> Result<&VoiceEmbedding, SynthesisError> {
        self.voices
            .get(name)
            .ok_or_else(|| SynthesisError::VoiceNotFound {
                voice: name.to_string(),
            })
    }

    /// All voice names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.voices.keys().map(String::as_str).collect()
    }

    pub fn first(&self) -> Option<&str> {
        self.voices.keys().next().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

fn invalid(path: &Path, reason: impl Into<String>) -> AssetError {
    AssetError::InvalidVoice {
        path: PathBuf::from(path),
        reason: reason.into(),
    }
}

fn floats_from_le_bytes(data: &[u8]) -> Result<Vec<f32>, String> {
    if data.len() % 4 != 0 {
        return Err(format!(
            "float data length {} is not a multiple of 4",
            data.len()
        ));
    }
    Ok(data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Parse a numpy .npy file holding little-endian float32 data.
fn parse_npy(data: &[u8]) -> Result<Vec<f32>, String> {
    if data.len() < 10 {
        return Err(format!("file too short ({} bytes)", data.len()));
    }

    if &data[0..6] != b"\x93NUMPY" {
        return Err("invalid numpy magic bytes".to_string());
    }

    // v1 stores the header length as u16 at [8..10]; v2 and v3 use u32 at [8..12].
    let (header_start, header_len) = match data[6] {
        1 => (10, u16::from_le_bytes([data[8], data[9]]) as usize),
        2 | 3 if data.len() >= 12 => (
            12,
            u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize,
        ),
        major => return Err(format!("unsupported numpy format version {major}")),
    };
    let data_offset = header_start + header_len;

    if data.len() < data_offset {
        return Err(format!(
            "header truncated (need {data_offset} bytes, got {})",
            data.len()
        ));
    }

    let header = String::from_utf8_lossy(&data[header_start..data_offset]);
    if !header.contains("'<f4'") {
        return Err(format!("expected little-endian float32 data, header: {}", header.trim()));
    }
    if header.contains("'fortran_order': True") {
        return Err("fortran-ordered arrays are not supported".to_string());
    }

    floats_from_le_bytes(&data[data_offset..])
}

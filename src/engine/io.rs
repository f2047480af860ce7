//! Audio file I/O
//!
//! Upload validation, decoding into a [`SampleBuffer`] and export naming.
//! WAV decoding is built in (via `hound`); compressed containers are handled
//! by a host-supplied [`Decoder`].

use std::io::{Cursor, Read};
use std::path::Path;

use hound::{SampleFormat, WavReader};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::UploadLimits;
use crate::engine::buffer::SampleBuffer;
use crate::error::{EngineError, Result};

const INVALID_TYPE: &str = "Invalid file type. Please upload a WAV, MP3, or MP4 file.";
const INVALID_FORMAT: &str = "Invalid audio format. Please upload a valid audio file.";
const TOO_LARGE: &str = "File size exceeds 100MB limit. Please upload a smaller file.";

// ============================================================================
// Upload Validation
// ============================================================================

/// Check an upload before any bytes reach the engine
///
/// Rules, in order: the lower-cased extension must be allowed; the MIME type
/// must contain the subtype of an allowed type (`wav`, `mpeg`, `mp4`,
/// `x-wav`); the size must not exceed the limit.
///
/// # Errors
/// * `InvalidUpload` - with the message for the first rule that fails
pub fn validate_upload(
    file_name: &str,
    mime_type: &str,
    size_bytes: u64,
    limits: &UploadLimits,
) -> Result<()> {
    let extension = file_name
        .rsplit('.')
        .next()
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default();
    if !file_name.contains('.') || !limits.allowed_extensions.contains(&extension) {
        return Err(reject(file_name, INVALID_TYPE));
    }

    let mime_ok = limits.allowed_mime_types.iter().any(|allowed| {
        let subtype = allowed.split('/').nth(1).unwrap_or(allowed);
        mime_type.contains(subtype)
    });
    if !mime_ok {
        return Err(reject(file_name, INVALID_FORMAT));
    }

    if size_bytes > limits.max_bytes {
        return Err(reject(file_name, TOO_LARGE));
    }

    debug!("[IO] Accepted upload {} ({} bytes)", file_name, size_bytes);
    Ok(())
}

fn reject(file_name: &str, reason: &str) -> EngineError {
    warn!("[IO] Rejected upload {}: {}", file_name, reason);
    EngineError::InvalidUpload {
        reason: reason.to_string(),
    }
}

/// Best-effort MIME type from a file extension
pub fn guess_mime_type(file_name: &str) -> &'static str {
    match file_name.rsplit('.').next().map(str::to_lowercase).as_deref() {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "audio/mp4",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Turns raw file bytes into PCM
pub trait Decoder: Send + Sync {
    /// Decode `bytes`; `file_name` is a hint for container detection
    fn decode(&self, file_name: &str, bytes: &[u8]) -> Result<SampleBuffer>;
}

/// Decoder for RIFF/WAVE files
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl Decoder for WavDecoder {
    fn decode(&self, file_name: &str, bytes: &[u8]) -> Result<SampleBuffer> {
        if !bytes.starts_with(b"RIFF") {
            return Err(EngineError::DecodeFailure {
                reason: format!("{} is not a WAV file; no decoder for this container", file_name),
                source: None,
            });
        }
        decode_wav(bytes)
    }
}

/// Decode WAV bytes (8/16/24/32-bit integer or 32-bit float, any channel count)
///
/// # Errors
/// * `DecodeFailure` - malformed header, unsupported format or truncated data
pub fn decode_wav(bytes: &[u8]) -> Result<SampleBuffer> {
    read_wav(Cursor::new(bytes))
}

/// Decode a WAV file from disk
pub fn decode_wav_file(path: &Path) -> Result<SampleBuffer> {
    let bytes = std::fs::read(path)?;
    decode_wav(&bytes)
}

fn read_wav<R: Read>(reader: R) -> Result<SampleBuffer> {
    let reader = WavReader::new(reader).map_err(decode_error("Failed to read WAV header"))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(decode_error("Failed to read float samples"))?,
        (SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
            let scale = 1.0 / (1_i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(decode_error("Failed to read integer samples"))?
        }
        (format, bits) => {
            return Err(EngineError::DecodeFailure {
                reason: format!("unsupported {:?} sample format at {} bits", format, bits),
                source: None,
            })
        }
    };

    // Drop a trailing partial frame
    let whole = interleaved.len() - interleaved.len() % channels.max(1);
    let buffer = SampleBuffer::from_interleaved(&interleaved[..whole], channels, spec.sample_rate)
        .map_err(|e| EngineError::DecodeFailure {
            reason: e.to_string(),
            source: None,
        })?;

    debug!(
        "[IO] Decoded {} frames, {} ch @ {} Hz",
        buffer.frame_count(),
        buffer.channel_count(),
        buffer.sample_rate()
    );
    Ok(buffer)
}

fn decode_error(context: &'static str) -> impl Fn(hound::Error) -> EngineError {
    move |e| EngineError::DecodeFailure {
        reason: format!("{}: {}", context, e),
        source: Some(Box::new(e)),
    }
}

// ============================================================================
// Export
// ============================================================================

/// File name for a full-mix export
pub fn mix_export_name(project: &str) -> String {
    format!("{}_mixed.wav", project)
}

/// File name for a single-stem export
pub fn stem_export_name(project: &str, stem: &str) -> String {
    format!("{}_{}.wav", project, stem)
}

/// An encoded file ready to hand to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportArtifact {
    pub file_name: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl ExportArtifact {
    /// Write into `dir` under the artifact's file name
    pub fn write_to_dir(&self, dir: &Path) -> Result<std::path::PathBuf> {
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

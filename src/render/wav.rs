//! PCM Encoder
//!
//! Writes RIFF/WAVE bytes with 16-bit signed little-endian interleaved
//! samples. Mono and stereo files get the canonical 44-byte header.

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::debug;

use crate::engine::buffer::SampleBuffer;
use crate::error::{EngineError, Result};

/// Bits per encoded sample
pub const BITS_PER_SAMPLE: u16 = 16;

/// Size of the RIFF + fmt + data chunk headers for mono and stereo files
pub const HEADER_LEN: usize = 44;

/// Quantize a float sample to 16-bit, clamping to [-1, 1]
#[inline]
pub fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

fn render_failure(reason: String) -> EngineError {
    EngineError::RenderFailure { reason }
}

fn hound_failure(e: hound::Error) -> EngineError {
    render_failure(format!("WAV writer: {}", e))
}

/// Uncompressed 16-bit PCM WAV encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct PcmEncoder;

impl PcmEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode `buffer` into WAV bytes
    ///
    /// # Errors
    /// * `RenderFailure` - the channel count, byte rate or data size does
    ///   not fit the 32-bit RIFF fields
    pub fn encode(&self, buffer: &SampleBuffer) -> Result<Vec<u8>> {
        let channels = u16::try_from(buffer.channel_count()).map_err(|_| {
            render_failure(format!("{} channels cannot be encoded", buffer.channel_count()))
        })?;
        let block_align = channels as u64 * (BITS_PER_SAMPLE / 8) as u64;

        let byte_rate = buffer.sample_rate() as u64 * block_align;
        if byte_rate > u32::MAX as u64 {
            return Err(render_failure(format!(
                "{} channels at {} Hz exceed the WAV byte rate limit",
                channels,
                buffer.sample_rate()
            )));
        }
        let data_len = buffer.frame_count() as u64 * block_align;
        if 36 + data_len > u32::MAX as u64 {
            return Err(render_failure(format!(
                "{} bytes of audio exceed the WAV size limit",
                data_len
            )));
        }

        let spec = WavSpec {
            channels,
            sample_rate: buffer.sample_rate(),
            bits_per_sample: BITS_PER_SAMPLE,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::with_capacity(HEADER_LEN + data_len as usize));
        let mut writer = WavWriter::new(&mut cursor, spec).map_err(hound_failure)?;
        for frame in 0..buffer.frame_count() {
            for channel in buffer.channels() {
                writer
                    .write_sample(quantize(channel[frame]))
                    .map_err(hound_failure)?;
            }
        }
        writer.finalize().map_err(hound_failure)?;

        let out = cursor.into_inner();
        debug!(
            "[WAV] Encoded {} frames x {} channels ({} bytes)",
            buffer.frame_count(),
            channels,
            out.len()
        );
        Ok(out)
    }
}

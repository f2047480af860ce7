//! Sample Buffer
//!
//! The immutable multi-channel PCM container every other component reads.
//! Derived buffers (stems, renders, generated parts) are always freshly
//! allocated; nothing hands out mutable access to a constructed buffer.

use crate::error::{EngineError, Result};

// ============================================================================
// Helper Functions
// ============================================================================

/// Root-mean-square of a slice of samples (linear)
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Peak absolute sample value of a slice (linear)
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max)
}

// ============================================================================
// Sample Buffer
// ============================================================================

/// Immutable, non-interleaved 32-bit float PCM audio
///
/// # Invariants
/// - At least one channel
/// - Every channel holds exactly `frame_count()` samples
/// - Samples are nominally in [-1.0, 1.0] but are never hard-clamped
///
/// # Example
/// ```
/// use stemdeck::engine::SampleBuffer;
///
/// let buffer = SampleBuffer::silent(2, 44100, 44100).unwrap();
/// assert_eq!(buffer.channel_count(), 2);
/// assert_eq!(buffer.frame_count(), 44100);
/// assert!((buffer.duration_secs() - 1.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Create a buffer from per-channel sample vectors
    ///
    /// # Errors
    /// * `InvalidParameter` - no channels, zero sample rate, or ragged channel lengths
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if channels.is_empty() {
            return Err(EngineError::invalid_parameter(
                "channels",
                0,
                "at least one channel",
            ));
        }
        if sample_rate == 0 {
            return Err(EngineError::invalid_parameter(
                "sample_rate",
                0,
                "a positive sample rate",
            ));
        }

        let frame_count = channels[0].len();
        if let Some((index, channel)) = channels
            .iter()
            .enumerate()
            .find(|(_, ch)| ch.len() != frame_count)
        {
            return Err(EngineError::invalid_parameter(
                format!("channels[{}]", index),
                channel.len(),
                format!("{} frames like channel 0", frame_count),
            ));
        }

        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Create a buffer filled with silence
    pub fn silent(channel_count: usize, frame_count: usize, sample_rate: u32) -> Result<Self> {
        Self::new(vec![vec![0.0; frame_count]; channel_count], sample_rate)
    }

    /// Create a buffer from interleaved sample data (L, R, L, R, ...)
    pub fn from_interleaved(
        interleaved: &[f32],
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if channel_count == 0 {
            return Err(EngineError::invalid_parameter(
                "channel_count",
                0,
                "at least one channel",
            ));
        }
        if interleaved.len() % channel_count != 0 {
            return Err(EngineError::invalid_parameter(
                "interleaved",
                interleaved.len(),
                format!("a multiple of {} samples", channel_count),
            ));
        }

        let frame_count = interleaved.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frame_count); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (ch, &sample) in frame.iter().enumerate() {
                channels[ch].push(sample);
            }
        }

        Self::new(channels, sample_rate)
    }

    /// Derive a new buffer of identical shape by mapping every sample
    ///
    /// The closure receives `(channel, frame, sample)`.
    pub fn map_samples<F>(&self, mut f: F) -> Self
    where
        F: FnMut(usize, usize, f32) -> f32,
    {
        let channels = self
            .channels
            .iter()
            .enumerate()
            .map(|(ch, data)| {
                data.iter()
                    .enumerate()
                    .map(|(frame, &s)| f(ch, frame, s))
                    .collect()
            })
            .collect();

        Self {
            channels,
            sample_rate: self.sample_rate,
        }
    }

    /// Number of channels
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames (samples per channel)
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.channels[0].len()
    }

    /// Sample rate in Hz
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// True when the buffer holds zero frames
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    /// Duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Read-only view of one channel
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Read-only view of all channels
    #[inline]
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Sample at the given channel and frame, or None if out of bounds
    #[inline]
    pub fn sample(&self, channel: usize, frame: usize) -> Option<f32> {
        self.channels
            .get(channel)
            .and_then(|ch| ch.get(frame).copied())
    }

    /// Same channel count, frame count and sample rate
    pub fn same_shape(&self, other: &SampleBuffer) -> bool {
        self.channel_count() == other.channel_count()
            && self.frame_count() == other.frame_count()
            && self.sample_rate == other.sample_rate
    }

    /// Check if all samples are finite (not NaN or Infinity)
    pub fn is_finite(&self) -> bool {
        self.channels
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|s| s.is_finite())
    }

    /// Peak absolute value across all channels (linear)
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .map(|ch| peak(ch))
            .fold(0.0_f32, f32::max)
    }

    /// Consume the buffer, returning its channel data
    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[1.0; 100]) - 1.0).abs() < 1e-6);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_new_rejects_ragged_channels() {
        let result = SampleBuffer::new(vec![vec![0.0; 10], vec![0.0; 9]], 44100);
        assert!(matches!(result, Err(EngineError::InvalidParameter { .. })));
    }

    #[test]
    fn test_new_rejects_no_channels_and_zero_rate() {
        assert!(SampleBuffer::new(vec![], 44100).is_err());
        assert!(SampleBuffer::new(vec![vec![0.0; 4]], 0).is_err());
    }

    #[test]
    fn test_empty_buffer_is_allowed() {
        let buffer = SampleBuffer::silent(1, 0, 44100).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.duration_secs(), 0.0);
    }

    #[test]
    fn test_from_interleaved_stereo() {
        let buffer =
            SampleBuffer::from_interleaved(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 2, 48000).unwrap();
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frame_count(), 3);
        assert_eq!(buffer.channel(0), &[0.1, 0.3, 0.5]);
        assert_eq!(buffer.channel(1), &[0.2, 0.4, 0.6]);
    }

    #[test]
    fn test_from_interleaved_invalid() {
        assert!(SampleBuffer::from_interleaved(&[0.1, 0.2, 0.3], 2, 48000).is_err());
        assert!(SampleBuffer::from_interleaved(&[0.1], 0, 48000).is_err());
    }

    #[test]
    fn test_map_samples_allocates_new_storage() {
        let source = SampleBuffer::new(vec![vec![0.5; 8], vec![-0.5; 8]], 44100).unwrap();
        let halved = source.map_samples(|_, _, s| s * 0.5);

        assert!(halved.same_shape(&source));
        assert_eq!(halved.sample(0, 3), Some(0.25));
        assert_eq!(halved.sample(1, 7), Some(-0.25));
        // Source untouched
        assert_eq!(source.sample(0, 3), Some(0.5));
    }

    #[test]
    fn test_sample_out_of_bounds() {
        let buffer = SampleBuffer::silent(1, 4, 44100).unwrap();
        assert_eq!(buffer.sample(0, 3), Some(0.0));
        assert_eq!(buffer.sample(1, 0), None);
        assert_eq!(buffer.sample(0, 4), None);
    }

    #[test]
    fn test_is_finite_and_peak() {
        let buffer = SampleBuffer::new(vec![vec![0.1, -0.9, 0.3]], 44100).unwrap();
        assert!(buffer.is_finite());
        assert!((buffer.peak() - 0.9).abs() < 1e-6);

        let nan = SampleBuffer::new(vec![vec![f32::NAN]], 44100).unwrap();
        assert!(!nan.is_finite());
    }
}

//! Tempo Estimation
//!
//! Energy-envelope peak picking on a decimated copy of channel 0:
//!
//! 1. Keep every 10th sample (working rate = sample rate / 10)
//! 2. RMS envelope over ~100 ms windows with 50% hop
//! 3. Interior local maxima above 0.1 are peaks
//! 4. The most frequent peak-to-peak interval is one beat
//!
//! The result is rounded and clamped to 60-180 BPM.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::buffer::SampleBuffer;
use crate::error::{EngineError, Result};

/// Decimation stride applied before envelope extraction
pub const DOWNSAMPLE_FACTOR: usize = 10;

/// Envelope values at or below this are never peaks
pub const PEAK_THRESHOLD: f32 = 0.1;

/// Lowest BPM the estimator reports
pub const MIN_BPM: u32 = 60;

/// Highest BPM the estimator reports
pub const MAX_BPM: u32 = 180;

/// A successful tempo estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoEstimate {
    pub bpm: u32,
}

/// Intermediate results, kept for diagnostics
#[derive(Debug, Clone, Default)]
pub struct EnvelopeAnalysis {
    /// Envelope window in working-rate samples
    pub window: usize,
    /// Envelope hop in working-rate samples
    pub hop: usize,
    /// Working sample rate after decimation
    pub working_rate: f64,
    pub envelope: Vec<f32>,
    /// Envelope indices of detected peaks
    pub peaks: Vec<usize>,
}

/// Energy-envelope tempo estimator
#[derive(Debug, Clone, Default)]
pub struct TempoEstimator;

impl TempoEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Estimate the tempo of `buffer`
    ///
    /// # Errors
    /// * `InsufficientPeaks` - fewer than two envelope peaks
    /// * `NoConsistentTempo` - no usable modal interval
    pub fn estimate(&self, buffer: &SampleBuffer) -> Result<TempoEstimate> {
        let analysis = self.analyze(buffer);

        if analysis.peaks.len() < 2 {
            debug!("[TEMPO] Only {} peaks found", analysis.peaks.len());
            return Err(EngineError::InsufficientPeaks {
                found: analysis.peaks.len(),
            });
        }

        let intervals: Vec<usize> = analysis.peaks.windows(2).map(|w| w[1] - w[0]).collect();
        let modal = modal_interval(&intervals).ok_or(EngineError::NoConsistentTempo)?;

        let beat_secs = modal as f64 * (analysis.hop as f64 / analysis.working_rate);
        let bpm = 60.0 / beat_secs;
        let clamped = (bpm.round() as u32).clamp(MIN_BPM, MAX_BPM);

        info!(
            "[TEMPO] {} peaks, modal interval {} hops -> {:.2} BPM (reported {})",
            analysis.peaks.len(),
            modal,
            bpm,
            clamped
        );
        Ok(TempoEstimate { bpm: clamped })
    }

    /// Decimate, build the envelope and pick peaks
    pub fn analyze(&self, buffer: &SampleBuffer) -> EnvelopeAnalysis {
        let sample_rate = buffer.sample_rate() as usize;
        let working_rate = buffer.sample_rate() as f64 / DOWNSAMPLE_FACTOR as f64;
        let window = sample_rate / DOWNSAMPLE_FACTOR / 10;
        let hop = window / 2;

        if hop == 0 {
            return EnvelopeAnalysis {
                window,
                hop,
                working_rate,
                ..Default::default()
            };
        }

        let decimated: Vec<f32> = buffer
            .channel(0)
            .iter()
            .step_by(DOWNSAMPLE_FACTOR)
            .take(buffer.frame_count() / DOWNSAMPLE_FACTOR)
            .copied()
            .collect();

        let envelope = energy_envelope(&decimated, window, hop);
        let peaks = pick_peaks(&envelope, PEAK_THRESHOLD);

        EnvelopeAnalysis {
            window,
            hop,
            working_rate,
            envelope,
            peaks,
        }
    }
}

/// RMS of each `window`-sample frame, advancing by `hop`
///
/// A frame is only taken while at least one sample lies beyond it.
fn energy_envelope(signal: &[f32], window: usize, hop: usize) -> Vec<f32> {
    let mut envelope = Vec::new();
    let mut start = 0;
    while start + window < signal.len() {
        envelope.push(crate::engine::buffer::rms(&signal[start..start + window]));
        start += hop;
    }
    envelope
}

/// Interior strict local maxima above `threshold`
fn pick_peaks(envelope: &[f32], threshold: f32) -> Vec<usize> {
    if envelope.len() < 3 {
        return Vec::new();
    }
    (1..envelope.len() - 1)
        .filter(|&i| {
            envelope[i] > envelope[i - 1] && envelope[i] > envelope[i + 1] && envelope[i] > threshold
        })
        .collect()
}

/// Most frequent interval; ties go to the value seen first
fn modal_interval(intervals: &[usize]) -> Option<usize> {
    let mut counts: Vec<(usize, usize)> = Vec::new();
    for &interval in intervals {
        match counts.iter_mut().find(|(value, _)| *value == interval) {
            Some((_, count)) => *count += 1,
            None => counts.push((interval, 1)),
        }
    }

    let mut best: Option<(usize, usize)> = None;
    for &(value, count) in &counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }

    best.map(|(value, _)| value).filter(|&value| value > 0)
}

// ============================================================================
// Tempo State
// ============================================================================

/// Estimated tempo, manual override and last failure for the loaded track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TempoState {
    pub estimate: Option<u32>,
    pub override_bpm: Option<u32>,
    pub last_error: Option<String>,
}

impl TempoState {
    /// Override wins over the estimate
    pub fn effective_bpm(&self) -> Option<u32> {
        self.override_bpm.or(self.estimate)
    }

    /// Set or clear the manual override
    ///
    /// # Errors
    /// * `InvalidParameter` - BPM outside 60-180
    pub fn set_override(&mut self, bpm: Option<u32>) -> Result<()> {
        if let Some(value) = bpm {
            if !(MIN_BPM..=MAX_BPM).contains(&value) {
                return Err(EngineError::invalid_parameter(
                    "bpm",
                    value,
                    format!("{}-{}", MIN_BPM, MAX_BPM),
                ));
            }
        }
        self.override_bpm = bpm;
        Ok(())
    }

    pub fn record(&mut self, result: &Result<TempoEstimate>) {
        match result {
            Ok(estimate) => {
                self.estimate = Some(estimate.bpm);
                self.last_error = None;
            }
            Err(err) => {
                self.estimate = None;
                self.last_error = Some(err.friendly_message());
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    /// Constant-level bursts of 60 ms starting 10 ms after each period
    fn pulse_train(period: f64, secs: f64, sample_rate: u32) -> SampleBuffer {
        let frames = (secs * sample_rate as f64) as usize;
        let data = (0..frames)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                let phase = t % period;
                if (0.01..0.07).contains(&phase) {
                    0.8
                } else {
                    0.0
                }
            })
            .collect();
        SampleBuffer::new(vec![data], sample_rate).unwrap()
    }

    #[test_case(0.5, 48000, 120)]
    #[test_case(0.75, 48000, 80)]
    #[test_case(0.4, 48000, 150)]
    #[test_case(0.5, 44100, 120)]
    #[test_case(0.75, 44100, 80)]
    #[test_case(0.4, 44100, 150)]
    fn test_periodic_pulses(period: f64, sample_rate: u32, expected: u32) {
        let buffer = pulse_train(period, 8.0, sample_rate);
        let estimate = TempoEstimator::new().estimate(&buffer).unwrap();
        assert_eq!(estimate.bpm, expected);
    }

    #[test]
    fn test_fast_pulses_clamp_to_max() {
        // 0.25 s period -> 240 BPM
        let buffer = pulse_train(0.25, 6.0, 48000);
        let estimate = TempoEstimator::new().estimate(&buffer).unwrap();
        assert_eq!(estimate.bpm, MAX_BPM);
    }

    #[test]
    fn test_silence_has_insufficient_peaks() {
        let buffer = SampleBuffer::silent(1, 48000 * 4, 48000).unwrap();
        let err = TempoEstimator::new().estimate(&buffer).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientPeaks { found: 0 }));
    }

    #[test]
    fn test_tiny_sample_rate_fails_cleanly() {
        let buffer = SampleBuffer::new(vec![vec![0.9; 400]], 100).unwrap();
        assert!(TempoEstimator::new().estimate(&buffer).is_err());
    }

    #[test]
    fn test_envelope_geometry() {
        let analysis = TempoEstimator::new().analyze(&pulse_train(0.5, 2.0, 44100));
        assert_eq!(analysis.window, 441);
        assert_eq!(analysis.hop, 220);
        assert!((analysis.working_rate - 4410.0).abs() < 1e-9);
    }

    #[test]
    fn test_modal_interval_ties_prefer_first() {
        assert_eq!(modal_interval(&[7, 3, 3, 7]), Some(7));
        assert_eq!(modal_interval(&[4, 5, 5]), Some(5));
        assert_eq!(modal_interval(&[]), None);
    }

    #[test]
    fn test_only_channel_zero_is_analyzed() {
        let pulses = pulse_train(0.5, 6.0, 48000).into_channels().remove(0);
        let silent = vec![0.0; pulses.len()];

        let left_silent = SampleBuffer::new(vec![silent.clone(), pulses.clone()], 48000).unwrap();
        assert!(TempoEstimator::new().estimate(&left_silent).is_err());

        let left_pulses = SampleBuffer::new(vec![pulses, silent], 48000).unwrap();
        assert_eq!(TempoEstimator::new().estimate(&left_pulses).unwrap().bpm, 120);
    }

    #[test]
    fn test_override_wins_and_is_validated() {
        let mut state = TempoState::default();
        state.record(&Ok(TempoEstimate { bpm: 96 }));
        assert_eq!(state.effective_bpm(), Some(96));

        state.set_override(Some(140)).unwrap();
        assert_eq!(state.effective_bpm(), Some(140));

        assert!(state.set_override(Some(200)).is_err());
        assert_eq!(state.override_bpm, Some(140));

        state.set_override(None).unwrap();
        assert_eq!(state.effective_bpm(), Some(96));
    }

    #[test]
    fn test_failure_recorded_with_message() {
        let mut state = TempoState::default();
        state.record(&Err(EngineError::NoConsistentTempo));
        assert_eq!(state.estimate, None);
        assert!(state.last_error.unwrap().starts_with("Tempo analysis failed"));
    }
}

//! Oscillators for procedural parts
//!
//! Naive (non-band-limited) phase-accumulator waveforms. Every shape starts
//! at 0 and rises, so a note begins without a click. Frequency may change per
//! sample; the phase is integrated rather than recomputed from time.

use std::f64::consts::PI;

/// Oscillator waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Sawtooth,
    Triangle,
}

/// Phase accumulator oscillator
#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    /// Phase in cycles, kept in [0, 1)
    phase: f64,
    sample_rate: f64,
}

impl Oscillator {
    pub fn new(waveform: Waveform, sample_rate: u32) -> Self {
        Self {
            waveform,
            phase: 0.0,
            sample_rate: sample_rate as f64,
        }
    }

    /// Produce the next sample at `frequency` Hz and advance the phase
    #[inline]
    pub fn next_sample(&mut self, frequency: f64) -> f64 {
        let value = shape(self.waveform, self.phase);
        self.phase = (self.phase + frequency / self.sample_rate).fract();
        value
    }
}

/// Waveform value at phase `p` in cycles
fn shape(waveform: Waveform, p: f64) -> f64 {
    match waveform {
        Waveform::Sine => (2.0 * PI * p).sin(),
        Waveform::Sawtooth => 2.0 * (p + 0.5).fract() - 1.0,
        Waveform::Triangle => {
            // 0 -> 1 -> -1 -> 0 over one cycle
            let q = (p + 0.25).fract();
            if q < 0.5 {
                4.0 * q - 1.0
            } else {
                3.0 - 4.0 * q
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_shapes_start_at_zero() {
        for waveform in [Waveform::Sine, Waveform::Sawtooth, Waveform::Triangle] {
            let mut osc = Oscillator::new(waveform, 44100);
            assert!(osc.next_sample(440.0).abs() < 1e-12, "{:?}", waveform);
        }
    }

    #[test]
    fn test_ranges() {
        for waveform in [Waveform::Sine, Waveform::Sawtooth, Waveform::Triangle] {
            let mut osc = Oscillator::new(waveform, 44100);
            for _ in 0..44100 {
                let s = osc.next_sample(330.0);
                assert!((-1.0..=1.0).contains(&s), "{:?} out of range: {}", waveform, s);
            }
        }
    }

    #[test]
    fn test_triangle_quarter_cycle_peaks() {
        // 1 Hz at 4 Hz sample rate: one sample per quarter cycle
        let mut osc = Oscillator::new(Waveform::Triangle, 4);
        let values: Vec<f64> = (0..4).map(|_| osc.next_sample(1.0)).collect();
        assert_eq!(values, vec![0.0, 1.0, 0.0, -1.0]);
    }

    #[test]
    fn test_sawtooth_rises_then_wraps() {
        let mut osc = Oscillator::new(Waveform::Sawtooth, 8);
        let values: Vec<f64> = (0..8).map(|_| osc.next_sample(1.0)).collect();
        assert!((values[0] - 0.0).abs() < 1e-12);
        assert!(values[1] > values[0] && values[3] > values[2]);
        // Wrap at half cycle
        assert!(values[4] < values[3]);
    }
}

//! Placeholder Stem Separation
//!
//! NOT source separation. Each of the four stems is the source scaled by a
//! fixed per-stem factor (0.3 + 0.15 * index) with independent uniform
//! jitter in [0.8, 1.2) on every sample. The result is four distinguishable
//! amplitude variants of the full mix and nothing more.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::stem::{Stem, StemKind};
use crate::engine::buffer::SampleBuffer;
use crate::error::{EngineError, Result};

/// Stem names in output order
pub const STEM_NAMES: [&str; 4] = ["drums", "bass", "guitar", "vocals"];

/// Placeholder separator
#[derive(Debug, Clone)]
pub struct StemSeparator {
    seed: Option<u64>,
    volume: f32,
}

impl Default for StemSeparator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl StemSeparator {
    /// Create a separator; `None` seeds the jitter from entropy
    pub fn new(seed: Option<u64>) -> Self {
        Self { seed, volume: 1.0 }
    }

    /// Initial volume given to every produced stem
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// Amplitude factor for the stem at `index`
    pub fn stem_factor(index: usize) -> f32 {
        0.3 + 0.15 * index as f32
    }

    /// Derive the four stems from `source`
    ///
    /// `progress` receives non-decreasing percentages and sees 100 only after
    /// every stem exists. `cancel` is checked between stems.
    ///
    /// # Errors
    /// * `EmptyBuffer` - source has zero frames
    /// * `Cancelled` - `cancel` was raised; nothing is returned
    pub fn separate(
        &self,
        source: &SampleBuffer,
        progress: &mut dyn FnMut(u8),
        cancel: &AtomicBool,
    ) -> Result<Vec<Stem>> {
        if source.is_empty() {
            return Err(EngineError::EmptyBuffer {
                operation: "separate",
            });
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        progress(0);
        progress(25);

        let mut stems = Vec::with_capacity(STEM_NAMES.len());
        for (index, name) in STEM_NAMES.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                debug!("[SEPARATE] Cancelled before {}", name);
                return Err(EngineError::Cancelled {
                    operation: "stem separation",
                });
            }

            let factor = Self::stem_factor(index);
            let buffer = source.map_samples(|_, _, s| s * factor * (rng.gen::<f32>() * 0.4 + 0.8));
            stems.push(Stem::new(*name, buffer, self.volume, StemKind::Separated));

            let done = (index + 1) as f64 / STEM_NAMES.len() as f64;
            progress((25.0 + done * 70.0).round() as u8);
        }

        progress(100);
        info!(
            "[SEPARATE] {} stems from {:.2}s of audio",
            stems.len(),
            source.duration_secs()
        );
        Ok(stems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> SampleBuffer {
        let data: Vec<f32> = (0..1000).map(|i| (i as f32 / 1000.0) - 0.5).collect();
        SampleBuffer::new(vec![data.clone(), data], 22050).unwrap()
    }

    fn run(separator: &StemSeparator, source: &SampleBuffer) -> (Result<Vec<Stem>>, Vec<u8>) {
        let mut seen = Vec::new();
        let cancel = AtomicBool::new(false);
        let result = separator.separate(source, &mut |p| seen.push(p), &cancel);
        (result, seen)
    }

    #[test]
    fn test_order_shape_and_progress() {
        let source = ramp();
        let (result, progress) = run(&StemSeparator::new(Some(1)), &source);
        let stems = result.unwrap();

        let names: Vec<&str> = stems.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, STEM_NAMES);
        for stem in &stems {
            assert!(stem.buffer.same_shape(&source));
            assert_eq!(stem.kind, StemKind::Separated);
            assert_eq!(stem.volume, 1.0);
        }

        assert_eq!(progress, vec![0, 25, 43, 60, 78, 95, 100]);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_samples_within_jitter_bounds() {
        let source = ramp();
        let stems = run(&StemSeparator::new(Some(7)), &source).0.unwrap();

        for (index, stem) in stems.iter().enumerate() {
            let factor = StemSeparator::stem_factor(index);
            for (out, input) in stem.buffer.channel(1).iter().zip(source.channel(1)) {
                let lo = (input * factor * 0.8).abs();
                let hi = (input * factor * 1.2).abs();
                assert!(out.abs() >= lo - 1e-6 && out.abs() <= hi + 1e-6);
                assert!(out * input >= 0.0);
            }
        }
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let source = ramp();
        let a = run(&StemSeparator::new(Some(42)), &source).0.unwrap();
        let b = run(&StemSeparator::new(Some(42)), &source).0.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_source_fails() {
        let source = SampleBuffer::silent(1, 0, 44100).unwrap();
        let (result, progress) = run(&StemSeparator::default(), &source);
        assert!(matches!(result, Err(EngineError::EmptyBuffer { .. })));
        assert!(progress.is_empty());
    }

    #[test]
    fn test_cancel_discards_everything() {
        let cancel = AtomicBool::new(true);
        let mut seen = Vec::new();
        let result = StemSeparator::default().separate(&ramp(), &mut |p| seen.push(p), &cancel);
        assert!(matches!(result, Err(EngineError::Cancelled { .. })));
        assert!(!seen.contains(&100));
    }
}

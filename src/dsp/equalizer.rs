//! Five-band equalizer
//!
//! A fixed cascade: low-shelf at 60 Hz, peaking (Q=1) at 250 Hz, 1 kHz and
//! 4 kHz, high-shelf at 12 kHz. The equalizer itself only holds settings and
//! describes its stages; [`FilterChain`] is the runtime that both the live
//! voice and the offline renderer run, so the two paths produce identical
//! samples for identical settings.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::biquad::{Biquad, BiquadCoeffs, FilterType};
use crate::engine::SampleBuffer;
use crate::error::{EngineError, Result};

/// Number of equalizer bands
pub const BAND_COUNT: usize = 5;

/// Fixed center/corner frequency per band
pub const BAND_FREQUENCIES: [f32; BAND_COUNT] = [60.0, 250.0, 1000.0, 4000.0, 12000.0];

/// Minimum band gain in dB
pub const MIN_GAIN_DB: f32 = -12.0;

/// Maximum band gain in dB
pub const MAX_GAIN_DB: f32 = 12.0;

/// Q of the peaking stages
pub const PEAKING_Q: f32 = 1.0;

/// Equalizer settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqualizerState {
    pub enabled: bool,
    /// Gain in dB per band, each within [-12, 12]
    pub bands: [f32; BAND_COUNT],
}

impl Default for EqualizerState {
    fn default() -> Self {
        Self {
            enabled: false,
            bands: [0.0; BAND_COUNT],
        }
    }
}

/// One stage of the filter cascade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub filter_type: FilterType,
    pub frequency: f32,
    pub gain_db: f32,
    pub q: f32,
}

impl StageDescriptor {
    fn coeffs(&self, sample_rate: u32) -> BiquadCoeffs {
        BiquadCoeffs::calculate(
            self.filter_type,
            sample_rate as f64,
            self.frequency as f64,
            self.gain_db as f64,
            self.q as f64,
        )
    }
}

/// Filter type of the stage at `index`
fn stage_type(index: usize) -> FilterType {
    match index {
        0 => FilterType::LowShelf,
        i if i == BAND_COUNT - 1 => FilterType::HighShelf,
        _ => FilterType::Peaking,
    }
}

/// Describe the full cascade for a set of band gains
pub fn describe_stages(bands: &[f32; BAND_COUNT]) -> Vec<StageDescriptor> {
    bands
        .iter()
        .enumerate()
        .map(|(index, &gain_db)| StageDescriptor {
            filter_type: stage_type(index),
            frequency: BAND_FREQUENCIES[index],
            gain_db,
            q: PEAKING_Q,
        })
        .collect()
}

/// Five-band equalizer settings with offline application
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Equalizer {
    state: EqualizerState,
}

impl Equalizer {
    /// Create a disabled, flat equalizer
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or bypass the whole cascade
    pub fn set_enabled(&mut self, enabled: bool) {
        self.state.enabled = enabled;
        debug!("[EQ] enabled = {}", enabled);
    }

    /// Set one band's gain, clamped to [-12, 12] dB
    ///
    /// Other bands are left exactly as they were.
    ///
    /// # Errors
    /// * `InvalidParameter` - index outside 0..5
    pub fn set_band(&mut self, index: usize, gain_db: f32) -> Result<()> {
        if index >= BAND_COUNT {
            return Err(EngineError::invalid_parameter(
                "band",
                index,
                format!("0-{}", BAND_COUNT - 1),
            ));
        }
        self.state.bands[index] = clamp_gain(gain_db);
        debug!("[EQ] band {} = {:.1} dB", index, self.state.bands[index]);
        Ok(())
    }

    /// Flatten all bands to 0 dB without touching `enabled`
    pub fn reset(&mut self) {
        self.state.bands = [0.0; BAND_COUNT];
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled
    }

    pub fn bands(&self) -> &[f32; BAND_COUNT] {
        &self.state.bands
    }

    pub fn state(&self) -> EqualizerState {
        self.state
    }

    /// Stage list to insert into a graph, or None when bypassed
    pub fn chain(&self) -> Option<Vec<StageDescriptor>> {
        self.state
            .enabled
            .then(|| describe_stages(&self.state.bands))
    }

    /// Filter a whole buffer, returning a new one
    ///
    /// When disabled this is the identity: the output equals the input.
    pub fn apply(&self, buffer: &SampleBuffer) -> SampleBuffer {
        match self.chain() {
            None => buffer.clone(),
            Some(stages) => {
                let mut chain =
                    FilterChain::new(&stages, buffer.sample_rate(), buffer.channel_count());
                buffer.map_samples(|ch, _, s| chain.process(ch, s))
            }
        }
    }
}

fn clamp_gain(gain_db: f32) -> f32 {
    if gain_db.is_finite() {
        gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB)
    } else {
        0.0
    }
}

// ============================================================================
// Filter Chain Runtime
// ============================================================================

/// Running cascade of biquads built from stage descriptors
#[derive(Debug, Clone)]
pub struct FilterChain {
    stages: Vec<StageDescriptor>,
    filters: Vec<Biquad>,
    sample_rate: u32,
}

impl FilterChain {
    pub fn new(stages: &[StageDescriptor], sample_rate: u32, channels: usize) -> Self {
        let filters = stages
            .iter()
            .map(|stage| Biquad::new(stage_coeffs(stage, sample_rate), channels))
            .collect();
        Self {
            stages: stages.to_vec(),
            filters,
            sample_rate,
        }
    }

    /// Update stage gains in place, keeping filter history
    pub fn set_gains(&mut self, gains: &[f32]) {
        for ((stage, filter), &gain) in self
            .stages
            .iter_mut()
            .zip(self.filters.iter_mut())
            .zip(gains.iter())
        {
            if stage.gain_db != gain {
                stage.gain_db = gain;
                filter.set_coeffs(stage_coeffs(stage, self.sample_rate));
            }
        }
    }

    /// Run one sample of one channel through every stage in order
    #[inline]
    pub fn process(&mut self, channel: usize, sample: f32) -> f32 {
        let mut value = sample as f64;
        for filter in &mut self.filters {
            value = filter.process(channel, value);
        }
        value as f32
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Gain-bearing stages at exactly 0 dB run as pass-through
fn stage_coeffs(stage: &StageDescriptor, sample_rate: u32) -> BiquadCoeffs {
    match stage.filter_type {
        FilterType::LowShelf | FilterType::Peaking | FilterType::HighShelf
            if stage.gain_db == 0.0 =>
        {
            BiquadCoeffs::UNITY
        }
        _ => stage.coeffs(sample_rate),
    }
}

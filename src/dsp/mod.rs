//! DSP Building Blocks
//!
//! Filters, the equalizer cascade, oscillators and parameter automation
//! shared by live playback, offline rendering and accompaniment synthesis.

pub mod automation;
pub mod biquad;
pub mod equalizer;
pub mod oscillator;

pub use automation::ParamTimeline;
pub use biquad::{Biquad, BiquadCoeffs, FilterType};
pub use equalizer::{
    describe_stages, Equalizer, EqualizerState, FilterChain, StageDescriptor, BAND_COUNT,
    BAND_FREQUENCIES,
};
pub use oscillator::{Oscillator, Waveform};

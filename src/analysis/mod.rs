//! Audio analysis

pub mod tempo;

pub use tempo::{TempoEstimate, TempoEstimator, TempoState, MAX_BPM, MIN_BPM};

//! Procedural synthesis

pub mod accompaniment;

pub use accompaniment::{
    beat_grid, drum_pattern, AccompanimentSynthesizer, DrumEvent, DrumHit, GeneratedAccompaniment,
};

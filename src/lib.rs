//! Stemdeck - Stem Mixing and Accompaniment Engine
//!
//! The audio core of a browser-style editor: load a track, play it with a
//! five-band equalizer, split it into stems, estimate its tempo, generate a
//! drum/bass/guitar accompaniment and export mixes as 16-bit WAV.
//!
//! # Architecture
//!
//! - `engine`: sample buffers, file I/O, transport, live playback and the
//!   session state every action goes through
//! - `dsp`: biquad filters, the equalizer, oscillators and parameter ramps
//! - `analysis`: tempo estimation
//! - `stems`: the stem set, mixer rules and separation
//! - `synth`: procedural accompaniment
//! - `render`: the signal graph shared by live and offline paths, plus WAV encoding
//! - `tasks`: background operations with progress and cancellation
//! - `store`: project and blob storage interfaces

pub mod analysis;
pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod render;
pub mod stems;
pub mod store;
pub mod synth;
pub mod tasks;

pub use config::EngineConfig;
pub use engine::{EngineEvent, EngineState, SampleBuffer};
pub use error::{EngineError, Result};

//! Audio Engine Module
//!
//! Session-level pieces of the editor:
//! - Sample buffers and file I/O
//! - Transport state machine
//! - Live playback through an audio host
//! - The engine state that ties them together

pub mod buffer;
pub mod io;
pub mod playback;
pub mod state;
pub mod transport;

pub use buffer::SampleBuffer;
pub use io::{decode_wav, validate_upload, Decoder, ExportArtifact, WavDecoder};
pub use playback::{AudioHost, CaptureHost, LiveControls, LiveVoice};
pub use state::{EngineEvent, EngineSnapshot, EngineState, Operation};
pub use transport::{Clock, ManualClock, PlayState, SystemClock, Transport, TransportState};

//! Stem definition

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::buffer::SampleBuffer;

/// Where a stem came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StemKind {
    /// Derived from the loaded track (separation, or the original itself)
    Separated,
    /// Synthesized accompaniment
    Generated,
}

impl fmt::Display for StemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StemKind::Separated => write!(f, "separated"),
            StemKind::Generated => write!(f, "generated"),
        }
    }
}

/// One named, independently controllable part of the mix
///
/// The buffer is shared read-only with the live voice; stems are only ever
/// mutated through their volume, mute and solo controls.
#[derive(Debug, Clone, PartialEq)]
pub struct Stem {
    pub name: String,
    pub buffer: Arc<SampleBuffer>,
    /// Linear gain in [0, 1]
    pub volume: f32,
    pub muted: bool,
    pub solo: bool,
    pub kind: StemKind,
}

impl Stem {
    pub fn new(
        name: impl Into<String>,
        buffer: impl Into<Arc<SampleBuffer>>,
        volume: f32,
        kind: StemKind,
    ) -> Self {
        Self {
            name: name.into(),
            buffer: buffer.into(),
            volume: clamp_volume(volume),
            muted: false,
            solo: false,
            kind,
        }
    }

    pub fn is_generated(&self) -> bool {
        self.kind == StemKind::Generated
    }
}

/// Serializable view of a stem without its samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemInfo {
    pub name: String,
    pub volume: f32,
    pub muted: bool,
    pub solo: bool,
    pub kind: StemKind,
    pub channels: usize,
    pub duration: f64,
}

impl From<&Stem> for StemInfo {
    fn from(stem: &Stem) -> Self {
        Self {
            name: stem.name.clone(),
            volume: stem.volume,
            muted: stem.muted,
            solo: stem.solo,
            kind: stem.kind,
            channels: stem.buffer.channel_count(),
            duration: stem.buffer.duration_secs(),
        }
    }
}

pub(crate) fn clamp_volume(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

//! Engine configuration
//!
//! Loaded from a JSON file; every field is optional and falls back to its
//! default, so `{}` is a valid configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// 100 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Frames pulled from the live voice per block
pub const DEFAULT_LIVE_BLOCK_FRAMES: usize = 512;

/// Upload acceptance rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    pub max_bytes: u64,
    /// Lower-case, dot-prefixed
    pub allowed_extensions: Vec<String>,
    pub allowed_mime_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: [".wav", ".mp3", ".mp4"].map(String::from).to_vec(),
            allowed_mime_types: ["audio/wav", "audio/mpeg", "audio/mp4", "audio/x-wav"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Initial volumes of newly created stems
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StemVolumes {
    pub separated: f32,
    pub original: f32,
    pub drums: f32,
    pub bass: f32,
    pub guitar: f32,
}

impl Default for StemVolumes {
    fn default() -> Self {
        Self {
            separated: 1.0,
            original: 0.8,
            drums: 0.7,
            bass: 0.6,
            guitar: 0.5,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub upload: UploadLimits,
    pub live_block_frames: usize,
    /// Seed for separation jitter and drum noise; entropy when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub volumes: StemVolumes,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            upload: UploadLimits::default(),
            live_block_frames: DEFAULT_LIVE_BLOCK_FRAMES,
            seed: None,
            volumes: StemVolumes::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.upload.max_bytes == 0 {
            return Err(EngineError::invalid_parameter(
                "upload.max_bytes",
                0,
                "a positive byte count",
            ));
        }
        if self.live_block_frames == 0 || self.live_block_frames > 1 << 16 {
            return Err(EngineError::invalid_parameter(
                "live_block_frames",
                self.live_block_frames,
                "1-65536",
            ));
        }

        let volumes = [
            ("volumes.separated", self.volumes.separated),
            ("volumes.original", self.volumes.original),
            ("volumes.drums", self.volumes.drums),
            ("volumes.bass", self.volumes.bass),
            ("volumes.guitar", self.volumes.guitar),
        ];
        for (name, volume) in volumes {
            if !(0.0..=1.0).contains(&volume) {
                return Err(EngineError::invalid_parameter(name, volume, "0.0-1.0"));
            }
        }
        Ok(())
    }
}

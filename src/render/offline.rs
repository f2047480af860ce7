//! Offline Rendering
//!
//! Renders a [`GraphPlan`] from time 0 to its full length, independent of any
//! live playback position or state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use super::graph::{GraphPlan, GraphRunner, OUTPUT_CHANNELS};
use crate::dsp::equalizer::Equalizer;
use crate::engine::buffer::SampleBuffer;
use crate::error::{EngineError, Result};
use crate::stems::{Mixer, Stem};

/// Frames per internal processing block
const RENDER_BLOCK: usize = 4096;

/// Non-real-time graph renderer
#[derive(Debug, Clone, Default)]
pub struct OfflineRenderer;

impl OfflineRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render the full mix for the given engine state
    pub fn render_mix(
        &self,
        original: &Arc<SampleBuffer>,
        mixer: &Mixer,
        master_volume: f32,
        equalizer: &Equalizer,
    ) -> Result<SampleBuffer> {
        let plan = GraphPlan::build(original, mixer, master_volume, equalizer)?;
        self.render(&plan, &AtomicBool::new(false))
    }

    /// Render `plan` into a new stereo buffer
    ///
    /// # Errors
    /// * `EmptyBuffer` - the plan has no frames
    /// * `RenderFailure` - output could not be allocated or is not finite
    /// * `Cancelled` - `cancel` was raised between blocks
    pub fn render(&self, plan: &GraphPlan, cancel: &AtomicBool) -> Result<SampleBuffer> {
        if plan.frames == 0 {
            return Err(EngineError::EmptyBuffer {
                operation: "render",
            });
        }
        debug!("[RENDER] Plan: {:?}", plan.summary());

        let mut channels: Vec<Vec<f32>> = Vec::with_capacity(OUTPUT_CHANNELS);
        for _ in 0..OUTPUT_CHANNELS {
            let mut channel = Vec::new();
            channel
                .try_reserve_exact(plan.frames)
                .map_err(|e| EngineError::RenderFailure {
                    reason: format!("cannot allocate {} frames: {}", plan.frames, e),
                })?;
            channels.push(channel);
        }

        let mut runner = GraphRunner::new(plan, 0);
        let mut block = vec![0.0_f32; RENDER_BLOCK * OUTPUT_CHANNELS];
        while !runner.is_finished() {
            if cancel.load(Ordering::Relaxed) {
                return Err(EngineError::Cancelled { operation: "render" });
            }
            let written = runner.process(&mut block);
            for frame in block[..written * OUTPUT_CHANNELS].chunks_exact(OUTPUT_CHANNELS) {
                for (channel, &sample) in channels.iter_mut().zip(frame) {
                    channel.push(sample);
                }
            }
        }

        let rendered = SampleBuffer::new(channels, plan.sample_rate)?;
        if !rendered.is_finite() {
            return Err(EngineError::RenderFailure {
                reason: "rendered output contains non-finite samples".to_string(),
            });
        }

        info!(
            "[RENDER] Rendered {:.2}s ({} sources, eq {})",
            rendered.duration_secs(),
            plan.sources.len(),
            if plan.filter.is_some() { "on" } else { "off" }
        );
        Ok(rendered)
    }

    /// Dry stem export: the stem's own buffer, untouched by mixer or EQ
    pub fn render_stem(&self, stem: &Stem) -> SampleBuffer {
        stem.buffer.as_ref().clone()
    }
}

//! Signal Graph
//!
//! A [`GraphPlan`] is the declarative description of what is heard: a list of
//! sources with per-source gain, an optional master gain stage and an optional
//! equalizer stage list. [`GraphRunner`] interprets a plan block by block.
//! Offline rendering and the live voice both drive a `GraphRunner`, so the
//! same plan produces the same samples on either path.
//!
//! Topology with stems:
//! ```text
//! stem_0 -> gain_0 --\
//! stem_1 -> gain_1 ---+-> master -> [EQ stage 0..4] -> out
//! stem_n -> gain_n --/
//! ```
//! Without stems the original buffer feeds the EQ (or the output) directly.

use std::sync::Arc;

use serde::Serialize;

use crate::dsp::equalizer::{describe_stages, Equalizer, FilterChain, StageDescriptor, BAND_COUNT};
use crate::engine::buffer::SampleBuffer;
use crate::error::{EngineError, Result};
use crate::stems::Mixer;

/// Output channel count of every rendered graph
pub const OUTPUT_CHANNELS: usize = 2;

/// One input of the graph
#[derive(Debug, Clone)]
pub struct PlanSource {
    pub name: String,
    pub buffer: Arc<SampleBuffer>,
    pub gain: f32,
}

/// Declarative graph description
#[derive(Debug, Clone)]
pub struct GraphPlan {
    pub sample_rate: u32,
    /// Length of the rendered output in frames
    pub frames: usize,
    pub sources: Vec<PlanSource>,
    /// Present only on the stem path
    pub master_gain: Option<f32>,
    /// Present only when the equalizer is enabled
    pub filter: Option<Vec<StageDescriptor>>,
}

/// Summary of a plan for logs and diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub sources: Vec<(String, f32)>,
    pub master_gain: Option<f32>,
    pub filter_stages: usize,
    pub frames: usize,
}

impl GraphPlan {
    /// Describe the graph for the current engine state
    ///
    /// With stems: every stem through its effective gain into a master stage
    /// at `master_volume`. Without stems: the original buffer alone. The
    /// equalizer is appended when enabled. Output length always equals the
    /// original buffer's.
    ///
    /// # Errors
    /// * `RenderFailure` - a stem's sample rate differs from the original's
    pub fn build(
        original: &Arc<SampleBuffer>,
        mixer: &Mixer,
        master_volume: f32,
        equalizer: &Equalizer,
    ) -> Result<Self> {
        let sample_rate = original.sample_rate();

        let (sources, master_gain) = if mixer.is_empty() {
            let source = PlanSource {
                name: "original".to_string(),
                buffer: Arc::clone(original),
                gain: 1.0,
            };
            (vec![source], None)
        } else {
            let gains = mixer.effective_gains();
            let mut sources = Vec::with_capacity(mixer.len());
            for (stem, gain) in mixer.stems().iter().zip(gains) {
                if stem.buffer.sample_rate() != sample_rate {
                    return Err(EngineError::RenderFailure {
                        reason: format!(
                            "stem '{}' is {} Hz but the track is {} Hz",
                            stem.name,
                            stem.buffer.sample_rate(),
                            sample_rate
                        ),
                    });
                }
                sources.push(PlanSource {
                    name: stem.name.clone(),
                    buffer: Arc::clone(&stem.buffer),
                    gain,
                });
            }
            (sources, Some(master_volume))
        };

        Ok(Self {
            sample_rate,
            frames: original.frame_count(),
            sources,
            master_gain,
            filter: equalizer.chain(),
        })
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            sources: self
                .sources
                .iter()
                .map(|s| (s.name.clone(), s.gain))
                .collect(),
            master_gain: self.master_gain,
            filter_stages: self.filter.as_ref().map_or(0, Vec::len),
            frames: self.frames,
        }
    }
}

// ============================================================================
// Graph Runner
// ============================================================================

/// Block processor for a [`GraphPlan`]
///
/// Gains and equalizer settings may change between blocks; filter history is
/// kept across such changes.
#[derive(Debug)]
pub struct GraphRunner {
    sources: Vec<Arc<SampleBuffer>>,
    gains: Vec<f32>,
    master_gain: Option<f32>,
    chain: Option<FilterChain>,
    sample_rate: u32,
    frames: usize,
    position: usize,
}

impl GraphRunner {
    /// Start interpreting `plan` at `start_frame`
    pub fn new(plan: &GraphPlan, start_frame: usize) -> Self {
        Self {
            sources: plan.sources.iter().map(|s| Arc::clone(&s.buffer)).collect(),
            gains: plan.sources.iter().map(|s| s.gain).collect(),
            master_gain: plan.master_gain,
            chain: plan
                .filter
                .as_ref()
                .map(|stages| FilterChain::new(stages, plan.sample_rate, OUTPUT_CHANNELS)),
            sample_rate: plan.sample_rate,
            frames: plan.frames,
            position: start_frame.min(plan.frames),
        }
    }

    /// Replace per-source gains, in source order
    pub fn set_gains(&mut self, gains: &[f32]) {
        for (current, &gain) in self.gains.iter_mut().zip(gains) {
            *current = gain;
        }
    }

    /// Change the master stage gain; ignored on the original-buffer path
    pub fn set_master_gain(&mut self, gain: f32) {
        if let Some(master) = self.master_gain.as_mut() {
            *master = gain;
        }
    }

    /// Enable, bypass or retune the equalizer stage
    pub fn set_equalizer(&mut self, enabled: bool, bands: &[f32; BAND_COUNT]) {
        match (&mut self.chain, enabled) {
            (Some(chain), true) => chain.set_gains(bands),
            (None, true) => {
                self.chain = Some(FilterChain::new(
                    &describe_stages(bands),
                    self.sample_rate,
                    OUTPUT_CHANNELS,
                ));
            }
            (_, false) => self.chain = None,
        }
    }

    /// Render up to `out.len() / 2` interleaved stereo frames into `out`
    ///
    /// Returns the number of frames written; frames past the end of the
    /// plan are left untouched.
    pub fn process(&mut self, out: &mut [f32]) -> usize {
        let wanted = out.len() / OUTPUT_CHANNELS;
        let count = wanted.min(self.frames - self.position);

        for (i, frame_out) in out.chunks_exact_mut(OUTPUT_CHANNELS).take(count).enumerate() {
            let frame = self.position + i;
            for (channel, slot) in frame_out.iter_mut().enumerate() {
                let mut value = self.mix_frame(channel, frame);
                if let Some(master) = self.master_gain {
                    value *= master;
                }
                if let Some(chain) = self.chain.as_mut() {
                    value = chain.process(channel, value);
                }
                *slot = value;
            }
        }

        self.position += count;
        count
    }

    /// Weighted sum of every source at one frame of one output channel
    #[inline]
    fn mix_frame(&self, channel: usize, frame: usize) -> f32 {
        self.sources
            .iter()
            .zip(&self.gains)
            .map(|(buffer, &gain)| {
                // Mono feeds both outputs
                let source_channel = channel.min(buffer.channel_count() - 1);
                buffer.sample(source_channel, frame).unwrap_or(0.0) * gain
            })
            .sum()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.frames
    }
}

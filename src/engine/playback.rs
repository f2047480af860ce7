//! Live Playback
//!
//! A [`LiveVoice`] is the running instance of a graph plan: it owns a
//! [`GraphRunner`] positioned at the playhead and reads [`LiveControls`]
//! before every pulled block, so gain and equalizer edits are heard on the
//! next block without rebuilding the graph. An [`AudioHost`] owns at most
//! one voice at a time and pulls blocks from it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::dsp::equalizer::{EqualizerState, BAND_COUNT};
use crate::error::{EngineError, Result};
use crate::render::graph::{GraphPlan, GraphRunner, OUTPUT_CHANNELS};

// ============================================================================
// Live Controls
// ============================================================================

/// Parameters shared between the engine and a running voice
///
/// Floats are stored as raw bits. Writers bump `version` after storing;
/// the voice re-reads everything when it sees a new version.
#[derive(Debug)]
pub struct LiveControls {
    gains: Vec<AtomicU32>,
    master: AtomicU32,
    eq_enabled: AtomicBool,
    bands: [AtomicU32; BAND_COUNT],
    version: AtomicU64,
}

impl LiveControls {
    pub fn new(gains: &[f32], master: f32, equalizer: &EqualizerState) -> Arc<Self> {
        Arc::new(Self {
            gains: gains.iter().map(|g| AtomicU32::new(g.to_bits())).collect(),
            master: AtomicU32::new(master.to_bits()),
            eq_enabled: AtomicBool::new(equalizer.enabled),
            bands: equalizer.bands.map(|b| AtomicU32::new(b.to_bits())),
            version: AtomicU64::new(0),
        })
    }

    /// Update per-source gains; extra or missing entries are ignored
    pub fn set_gains(&self, gains: &[f32]) {
        for (slot, gain) in self.gains.iter().zip(gains) {
            slot.store(gain.to_bits(), Ordering::Relaxed);
        }
        self.bump();
    }

    pub fn set_master(&self, master: f32) {
        self.master.store(master.to_bits(), Ordering::Relaxed);
        self.bump();
    }

    pub fn set_equalizer(&self, equalizer: &EqualizerState) {
        self.eq_enabled.store(equalizer.enabled, Ordering::Relaxed);
        for (slot, band) in self.bands.iter().zip(equalizer.bands) {
            slot.store(band.to_bits(), Ordering::Relaxed);
        }
        self.bump();
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::Release);
    }

    fn gains(&self) -> Vec<f32> {
        self.gains
            .iter()
            .map(|g| f32::from_bits(g.load(Ordering::Relaxed)))
            .collect()
    }

    fn master(&self) -> f32 {
        f32::from_bits(self.master.load(Ordering::Relaxed))
    }

    fn equalizer(&self) -> (bool, [f32; BAND_COUNT]) {
        let mut bands = [0.0; BAND_COUNT];
        for (band, slot) in bands.iter_mut().zip(&self.bands) {
            *band = f32::from_bits(slot.load(Ordering::Relaxed));
        }
        (self.eq_enabled.load(Ordering::Relaxed), bands)
    }
}

// ============================================================================
// Live Voice
// ============================================================================

/// A playing graph instance
pub struct LiveVoice {
    runner: GraphRunner,
    controls: Arc<LiveControls>,
    seen_version: u64,
    sample_rate: u32,
}

impl fmt::Debug for LiveVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveVoice")
            .field("position", &self.runner.position())
            .field("frames", &self.runner.frames())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl LiveVoice {
    pub fn new(plan: &GraphPlan, start_frame: usize, controls: Arc<LiveControls>) -> Self {
        Self {
            runner: GraphRunner::new(plan, start_frame),
            seen_version: controls.version(),
            controls,
            sample_rate: plan.sample_rate,
        }
    }

    /// Render the next block of interleaved stereo frames into `out`
    pub fn pull(&mut self, out: &mut [f32]) -> usize {
        let version = self.controls.version();
        if version != self.seen_version {
            self.seen_version = version;
            self.runner.set_gains(&self.controls.gains());
            self.runner.set_master_gain(self.controls.master());
            let (enabled, bands) = self.controls.equalizer();
            self.runner.set_equalizer(enabled, &bands);
        }
        self.runner.process(out)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn position(&self) -> usize {
        self.runner.position()
    }

    pub fn is_finished(&self) -> bool {
        self.runner.is_finished()
    }
}

// ============================================================================
// Audio Host
// ============================================================================

/// The process-wide output device or graph host
///
/// A host plays at most one voice. Starting a voice replaces (and releases)
/// any voice already playing.
pub trait AudioHost: Send {
    fn name(&self) -> &str;

    /// Sample rate of the active voice, if any
    fn sample_rate(&self) -> Option<u32>;

    /// Begin playing `voice`
    fn start(&mut self, voice: LiveVoice) -> Result<()>;

    /// Stop and release the active voice
    fn stop(&mut self);

    /// True while a voice is attached and has frames left
    fn is_active(&self) -> bool;

    /// Drive the active voice for `frames` frames; returns frames produced
    fn pull(&mut self, frames: usize) -> usize;

    /// Release the device; every later `start` fails
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

#[derive(Debug, Default)]
struct CaptureState {
    voice: Option<LiveVoice>,
    captured: Vec<f32>,
    starts: usize,
    closed: bool,
}

/// In-memory host that records everything it pulls
///
/// Clones share the same device, so a caller can keep a clone to inspect
/// output while the engine owns another.
#[derive(Debug, Clone)]
pub struct CaptureHost {
    state: Arc<Mutex<CaptureState>>,
    block_frames: usize,
}

impl CaptureHost {
    pub fn new(block_frames: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CaptureState::default())),
            block_frames: block_frames.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Interleaved stereo samples pulled so far
    pub fn captured(&self) -> Vec<f32> {
        self.lock().captured.clone()
    }

    pub fn clear_captured(&self) {
        self.lock().captured.clear();
    }

    /// Number of voices started since creation
    pub fn starts(&self) -> usize {
        self.lock().starts
    }

    /// Playhead of the active voice in frames
    pub fn position(&self) -> Option<usize> {
        self.lock().voice.as_ref().map(LiveVoice::position)
    }

    /// Pull until the active voice runs out
    pub fn drain(&mut self) -> usize {
        let mut total = 0;
        loop {
            let pulled = self.pull(self.block_frames);
            total += pulled;
            if pulled == 0 {
                return total;
            }
        }
    }
}

impl AudioHost for CaptureHost {
    fn name(&self) -> &str {
        "capture"
    }

    fn sample_rate(&self) -> Option<u32> {
        self.lock().voice.as_ref().map(LiveVoice::sample_rate)
    }

    fn start(&mut self, voice: LiveVoice) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(EngineError::Host {
                reason: "audio host is closed".to_string(),
            });
        }
        debug!("[HOST] Start voice at frame {}", voice.position());
        state.voice = Some(voice);
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        if self.lock().voice.take().is_some() {
            debug!("[HOST] Voice released");
        }
    }

    fn is_active(&self) -> bool {
        self.lock()
            .voice
            .as_ref()
            .map_or(false, |voice| !voice.is_finished())
    }

    fn pull(&mut self, frames: usize) -> usize {
        let mut state = self.lock();
        let CaptureState {
            voice, captured, ..
        } = &mut *state;
        let Some(voice) = voice.as_mut() else {
            return 0;
        };

        let mut block = vec![0.0; self.block_frames * OUTPUT_CHANNELS];
        let mut produced = 0;
        while produced < frames {
            let want = (frames - produced).min(self.block_frames);
            let got = voice.pull(&mut block[..want * OUTPUT_CHANNELS]);
            captured.extend_from_slice(&block[..got * OUTPUT_CHANNELS]);
            produced += got;
            if got < want {
                break;
            }
        }
        produced
    }

    fn close(&mut self) {
        let mut state = self.lock();
        if !state.closed {
            state.voice = None;
            state.closed = true;
            info!("[HOST] Capture host closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::equalizer::Equalizer;
    use crate::engine::buffer::SampleBuffer;
    use crate::stems::{Mixer, Stem, StemKind};

    fn plan_with_stem(value: f32, frames: usize) -> (GraphPlan, Mixer) {
        let original = Arc::new(SampleBuffer::silent(1, frames, 1000).unwrap());
        let mut mixer = Mixer::new();
        mixer
            .set_stems(vec![Stem::new(
                "a",
                SampleBuffer::new(vec![vec![value; frames]], 1000).unwrap(),
                1.0,
                StemKind::Separated,
            )])
            .unwrap();
        let plan = GraphPlan::build(&original, &mixer, 1.0, &Equalizer::new()).unwrap();
        (plan, mixer)
    }

    #[test]
    fn test_controls_apply_on_next_block() {
        let (plan, mixer) = plan_with_stem(0.5, 100);
        let controls = LiveControls::new(&mixer.effective_gains(), 1.0, &EqualizerState::default());
        let mut voice = LiveVoice::new(&plan, 0, Arc::clone(&controls));

        let mut out = vec![0.0; 8];
        voice.pull(&mut out);
        assert_eq!(out[0], 0.5);

        controls.set_gains(&[0.0]);
        voice.pull(&mut out);
        assert_eq!(out[0], 0.0);

        controls.set_gains(&[1.0]);
        controls.set_master(0.5);
        voice.pull(&mut out);
        assert_eq!(out[0], 0.25);
    }

    #[test]
    fn test_capture_host_records_and_stops() {
        let (plan, mixer) = plan_with_stem(0.1, 10);
        let controls = LiveControls::new(&mixer.effective_gains(), 1.0, &EqualizerState::default());
        let mut host = CaptureHost::new(4);
        let observer = host.clone();

        host.start(LiveVoice::new(&plan, 3, controls)).unwrap();
        assert!(host.is_active());
        assert_eq!(host.sample_rate(), Some(1000));
        assert_eq!(host.drain(), 7);
        assert!(!host.is_active());
        assert_eq!(observer.captured().len(), 14);

        host.stop();
        assert_eq!(host.pull(4), 0);
        assert_eq!(observer.starts(), 1);
    }

    #[test]
    fn test_closed_host_rejects_voices() {
        let (plan, mixer) = plan_with_stem(0.1, 10);
        let controls = LiveControls::new(&mixer.effective_gains(), 1.0, &EqualizerState::default());
        let mut host = CaptureHost::new(4);
        host.close();
        assert!(host.is_closed());
        assert!(matches!(
            host.start(LiveVoice::new(&plan, 0, controls)),
            Err(EngineError::Host { .. })
        ));
    }
}

//! Engine State
//!
//! [`EngineState`] owns everything the editor displays: the loaded track,
//! transport, equalizer, stem mixer, tempo, background task slots and the
//! live voice. Every user action is a method here. Background results are
//! committed only from [`EngineState::poll`], on the caller's thread, so the
//! state is never mutated concurrently.
//!
//! Each load bumps a generation counter. Task results carry the generation
//! they were started under and are discarded if the track changed meanwhile.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::buffer::SampleBuffer;
use super::io::{mix_export_name, stem_export_name, validate_upload, Decoder, ExportArtifact};
use super::playback::{AudioHost, LiveControls, LiveVoice};
use super::transport::{Clock, SystemClock, Transport, TransportState};
use crate::analysis::tempo::{TempoEstimate, TempoEstimator, TempoState};
use crate::config::EngineConfig;
use crate::dsp::equalizer::{Equalizer, EqualizerState};
use crate::error::{EngineError, Result};
use crate::render::graph::GraphPlan;
use crate::render::offline::OfflineRenderer;
use crate::render::wav::PcmEncoder;
use crate::stems::{Mixer, Stem, StemInfo, StemKind, StemSeparator};
use crate::synth::{AccompanimentSynthesizer, GeneratedAccompaniment};
use crate::tasks::TaskHandle;

/// Name of the stem that carries the untouched track next to generated parts
pub const ORIGINAL_STEM: &str = "Original";
pub const GENERATED_DRUMS: &str = "Drums (Generated)";
pub const GENERATED_BASS: &str = "Bass (Generated)";
pub const GENERATED_GUITAR: &str = "Guitar (Generated)";

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(2);

// ============================================================================
// Events
// ============================================================================

/// Background operations the engine runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Separation,
    TempoAnalysis,
    Accompaniment,
    Export,
    Playback,
}

impl Operation {
    pub fn label(self) -> &'static str {
        match self {
            Operation::Separation => "stem separation",
            Operation::TempoAnalysis => "tempo analysis",
            Operation::Accompaniment => "accompaniment",
            Operation::Export => "mix export",
            Operation::Playback => "playback",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Something that happened since the last [`EngineState::poll`]
#[derive(Debug)]
pub enum EngineEvent {
    SeparationProgress(u8),
    StemsReady { count: usize },
    TempoReady { bpm: u32 },
    AccompanimentReady { bpm: u32 },
    ExportReady(ExportArtifact),
    PlaybackEnded,
    Failed {
        operation: Operation,
        error: EngineError,
    },
    /// A result arrived for a track that is no longer loaded
    Discarded { operation: Operation },
}

/// Serializable view of the engine for the editor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub file_name: Option<String>,
    pub transport: TransportState,
    pub equalizer: EqualizerState,
    pub stems: Vec<StemInfo>,
    pub tempo: TempoState,
    pub separation_progress: Option<u8>,
    pub separation_error: Option<String>,
    pub busy: Vec<Operation>,
}

struct Pending<T> {
    handle: TaskHandle<T>,
    generation: u64,
}

impl<T: Send + 'static> Pending<T> {
    /// Poll the slot, emptying it when the task completed
    fn take_finished(slot: &mut Option<Self>, progress: &mut Vec<u8>) -> Option<(u64, Result<T>)> {
        let pending = slot.as_mut()?;
        let poll = pending.handle.poll();
        progress.extend(poll.progress);
        let outcome = poll.finished?;
        let generation = pending.generation;
        *slot = None;
        Some((generation, outcome))
    }
}

// ============================================================================
// Engine State
// ============================================================================

/// The editor session
pub struct EngineState {
    config: EngineConfig,
    source: Option<Arc<SampleBuffer>>,
    file_name: Option<String>,
    generation: u64,

    transport: Transport,
    equalizer: Equalizer,
    mixer: Mixer,
    tempo: TempoState,
    separation_progress: Option<u8>,
    separation_error: Option<String>,

    separation: Option<Pending<Vec<Stem>>>,
    tempo_task: Option<Pending<TempoEstimate>>,
    accompaniment: Option<Pending<(u32, GeneratedAccompaniment)>>,
    export: Option<Pending<ExportArtifact>>,

    controls: Option<Arc<LiveControls>>,
    host: Box<dyn AudioHost>,
    /// Playback ran out outside `poll` and still needs its event
    unreported_end: bool,
}

impl fmt::Debug for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineState")
            .field("file_name", &self.file_name)
            .field("generation", &self.generation)
            .field("transport", &self.transport)
            .field("stems", &self.mixer.len())
            .field("host", &self.host.name())
            .finish()
    }
}

impl EngineState {
    /// Create a session on `host` using the system clock
    ///
    /// # Errors
    /// * `InvalidParameter` - the configuration is out of range
    pub fn new(config: EngineConfig, host: Box<dyn AudioHost>) -> Result<Self> {
        Self::with_clock(config, host, Arc::new(SystemClock::new()))
    }

    /// Create a session whose transport follows `clock`
    pub fn with_clock(
        config: EngineConfig,
        host: Box<dyn AudioHost>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        info!("[ENGINE] Session started on {} host", host.name());
        Ok(Self {
            config,
            source: None,
            file_name: None,
            generation: 0,
            transport: Transport::new(clock),
            equalizer: Equalizer::new(),
            mixer: Mixer::new(),
            tempo: TempoState::default(),
            separation_progress: None,
            separation_error: None,
            separation: None,
            tempo_task: None,
            accompaniment: None,
            export: None,
            controls: None,
            host,
            unreported_end: false,
        })
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Validate, decode and load an uploaded file
    ///
    /// # Errors
    /// * `InvalidUpload` - extension, MIME type or size rejected
    /// * `DecodeFailure` - `decoder` could not read the bytes
    pub fn load_upload(
        &mut self,
        file_name: &str,
        mime_type: &str,
        bytes: &[u8],
        decoder: &dyn Decoder,
    ) -> Result<()> {
        validate_upload(file_name, mime_type, bytes.len() as u64, &self.config.upload)?;
        let buffer = decoder.decode(file_name, bytes)?;
        self.load(file_name, buffer)
    }

    /// Replace the session's track with `buffer`
    ///
    /// Everything derived from the previous track is cleared first.
    pub fn load(&mut self, file_name: &str, buffer: SampleBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Err(EngineError::EmptyBuffer { operation: "load" });
        }
        self.clear_audio();
        self.transport.set_duration(buffer.duration_secs());
        info!(
            "[ENGINE] Loaded {} ({:.2}s, {} ch @ {} Hz)",
            file_name,
            buffer.duration_secs(),
            buffer.channel_count(),
            buffer.sample_rate()
        );
        self.source = Some(Arc::new(buffer));
        self.file_name = Some(file_name.to_string());
        Ok(())
    }

    /// Unload the track, cancelling its background work
    ///
    /// Equalizer settings and master volume survive.
    pub fn clear_audio(&mut self) {
        self.cancel_tasks();
        self.stop_voice();
        self.source = None;
        self.file_name = None;
        self.generation += 1;
        self.transport.reset();
        self.mixer.reset();
        self.tempo.reset();
        self.separation_progress = None;
        self.separation_error = None;
        debug!("[ENGINE] Cleared (generation {})", self.generation);
    }

    fn cancel_tasks(&mut self) {
        if let Some(pending) = self.separation.take() {
            pending.handle.cancel();
        }
        if let Some(pending) = self.tempo_task.take() {
            pending.handle.cancel();
        }
        if let Some(pending) = self.accompaniment.take() {
            pending.handle.cancel();
        }
        if let Some(pending) = self.export.take() {
            pending.handle.cancel();
        }
    }

    fn require_source(&self) -> Result<Arc<SampleBuffer>> {
        self.source.clone().ok_or(EngineError::NoAudioLoaded)
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Start playback from the playhead; from the very start when at the end
    ///
    /// # Errors
    /// * `NoAudioLoaded` - nothing to play
    /// * `Host` - the audio host refused the voice
    pub fn play(&mut self) -> Result<()> {
        self.require_source()?;
        if self.transport.is_playing() {
            return Ok(());
        }
        if self.transport.at_end() {
            self.transport.seek(0.0);
        }
        self.start_voice()?;
        self.transport.play();
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.transport.is_playing() {
            self.transport.pause();
            self.stop_voice();
        }
    }

    pub fn toggle_play_pause(&mut self) -> Result<()> {
        if self.transport.is_playing() {
            self.pause();
            Ok(())
        } else {
            self.play()
        }
    }

    /// Move the playhead; a playing voice restarts at the new position
    pub fn seek(&mut self, time: f64) -> Result<()> {
        if self.transport.is_playing() {
            self.stop_voice();
            self.transport.seek(time);
            self.start_voice()
        } else {
            self.transport.seek(time);
            Ok(())
        }
    }

    /// Set master volume (clamped to [0, 1]); heard on the next block
    pub fn set_volume(&mut self, volume: f32) {
        self.transport.set_volume(volume);
        if let Some(controls) = &self.controls {
            controls.set_master(self.transport.volume());
        }
    }

    /// Advance the playhead; returns true when playback just reached the end
    pub fn tick(&mut self) -> bool {
        if !self.transport.update() {
            return false;
        }
        self.stop_voice();
        info!("[ENGINE] Playback ended");
        true
    }

    fn start_voice(&mut self) -> Result<()> {
        let source = self.require_source()?;
        let plan = GraphPlan::build(
            &source,
            &self.mixer,
            self.transport.volume(),
            &self.equalizer,
        )?;
        let controls = LiveControls::new(
            &self.mixer.effective_gains(),
            self.transport.volume(),
            &self.equalizer.state(),
        );
        let start_frame = (self.transport.current_time() * plan.sample_rate as f64).round() as usize;

        self.host
            .start(LiveVoice::new(&plan, start_frame, Arc::clone(&controls)))?;
        self.controls = Some(controls);
        debug!("[ENGINE] Voice started: {:?}", plan.summary());
        Ok(())
    }

    fn stop_voice(&mut self) {
        self.host.stop();
        self.controls = None;
    }

    /// Rebuild the voice after the stem set changed under it
    fn restart_voice(&mut self) -> Result<()> {
        if !self.transport.is_playing() {
            return Ok(());
        }
        if self.tick() {
            self.unreported_end = true;
            return Ok(());
        }
        self.stop_voice();
        self.start_voice()
    }

    // ========================================================================
    // Equalizer
    // ========================================================================

    pub fn set_eq_enabled(&mut self, enabled: bool) {
        self.equalizer.set_enabled(enabled);
        self.push_equalizer();
    }

    /// Set one band's gain in dB, clamped to ±12
    ///
    /// # Errors
    /// * `InvalidParameter` - band index out of range
    pub fn set_eq_band(&mut self, index: usize, gain_db: f32) -> Result<()> {
        self.equalizer.set_band(index, gain_db)?;
        self.push_equalizer();
        Ok(())
    }

    /// Flatten every band
    pub fn reset_equalizer(&mut self) {
        self.equalizer.reset();
        self.push_equalizer();
    }

    fn push_equalizer(&self) {
        if let Some(controls) = &self.controls {
            controls.set_equalizer(&self.equalizer.state());
        }
    }

    // ========================================================================
    // Mixer
    // ========================================================================

    pub fn set_stem_volume(&mut self, name: &str, volume: f32) -> Result<()> {
        self.mixer.set_volume(name, volume)?;
        self.push_gains();
        Ok(())
    }

    pub fn toggle_stem_mute(&mut self, name: &str) -> Result<()> {
        self.mixer.toggle_mute(name)?;
        self.push_gains();
        Ok(())
    }

    pub fn toggle_stem_solo(&mut self, name: &str) -> Result<()> {
        self.mixer.toggle_solo(name)?;
        self.push_gains();
        Ok(())
    }

    /// Remove generated stems, keeping separated ones
    pub fn clear_generated(&mut self) -> Result<()> {
        self.mixer.clear_generated();
        self.restart_voice()
    }

    fn push_gains(&self) {
        if let Some(controls) = &self.controls {
            controls.set_gains(&self.mixer.effective_gains());
        }
    }

    // ========================================================================
    // Tempo
    // ========================================================================

    /// Set or clear the manual BPM
    ///
    /// # Errors
    /// * `InvalidParameter` - BPM outside 60-180
    pub fn set_tempo_override(&mut self, bpm: Option<u32>) -> Result<()> {
        self.tempo.set_override(bpm)
    }

    /// Override if set, else the last estimate
    pub fn effective_bpm(&self) -> Option<u32> {
        self.tempo.effective_bpm()
    }

    // ========================================================================
    // Background Operations
    // ========================================================================

    /// Start separating the loaded track into stems
    ///
    /// # Errors
    /// * `OperationBusy` - a separation is already running
    /// * `NoAudioLoaded` - nothing to separate
    pub fn start_separation(&mut self) -> Result<()> {
        Self::ensure_idle(&self.separation, Operation::Separation)?;
        let source = self.require_source()?;
        let separator =
            StemSeparator::new(self.config.seed).with_volume(self.config.volumes.separated);

        let handle = TaskHandle::spawn(Operation::Separation.label(), move |ctx| {
            separator.separate(&source, &mut |percent| ctx.report(percent), ctx.cancel_flag())
        })?;
        self.separation = Some(Pending {
            handle,
            generation: self.generation,
        });
        self.separation_progress = Some(0);
        self.separation_error = None;
        Ok(())
    }

    /// Start estimating the loaded track's tempo
    pub fn start_tempo_analysis(&mut self) -> Result<()> {
        Self::ensure_idle(&self.tempo_task, Operation::TempoAnalysis)?;
        let source = self.require_source()?;

        let handle = TaskHandle::spawn(Operation::TempoAnalysis.label(), move |_| {
            TempoEstimator::new().estimate(&source)
        })?;
        self.tempo_task = Some(Pending {
            handle,
            generation: self.generation,
        });
        Ok(())
    }

    /// Start generating drums, bass and guitar at the effective tempo
    ///
    /// # Errors
    /// * `OperationBusy` - generation is already running
    /// * `NoAudioLoaded` - nothing to accompany
    /// * `MissingTempo` - no estimate and no override
    pub fn start_accompaniment(&mut self) -> Result<()> {
        Self::ensure_idle(&self.accompaniment, Operation::Accompaniment)?;
        let source = self.require_source()?;
        let bpm = self.effective_bpm().ok_or(EngineError::MissingTempo)?;
        let synthesizer = AccompanimentSynthesizer::new(self.config.seed);
        let duration = source.duration_secs();
        let sample_rate = source.sample_rate();

        let handle = TaskHandle::spawn(Operation::Accompaniment.label(), move |ctx| {
            synthesizer
                .generate_cancellable(bpm, duration, sample_rate, ctx.cancel_flag())
                .map(|parts| (bpm, parts))
        })?;
        self.accompaniment = Some(Pending {
            handle,
            generation: self.generation,
        });
        Ok(())
    }

    /// Render and encode the current mix in the background
    ///
    /// The mix is captured now; later edits do not affect this export.
    pub fn start_mix_export(&mut self, project: &str) -> Result<()> {
        Self::ensure_idle(&self.export, Operation::Export)?;
        let plan = self.mix_plan()?;
        let file_name = mix_export_name(project);

        let handle = TaskHandle::spawn(Operation::Export.label(), move |ctx| {
            encode_plan(file_name, &plan, ctx.cancel_flag())
        })?;
        self.export = Some(Pending {
            handle,
            generation: self.generation,
        });
        Ok(())
    }

    /// Render and encode the current mix on the calling thread
    pub fn export_mix(&self, project: &str) -> Result<ExportArtifact> {
        let plan = self.mix_plan()?;
        encode_plan(mix_export_name(project), &plan, &AtomicBool::new(false))
    }

    /// Encode one stem exactly as stored, ignoring mixer and equalizer
    ///
    /// # Errors
    /// * `StemNotFound` - no stem named `name`
    pub fn export_stem(&self, project: &str, name: &str) -> Result<ExportArtifact> {
        let stem = self.mixer.get(name).ok_or_else(|| EngineError::StemNotFound {
            name: name.to_string(),
        })?;
        let dry = OfflineRenderer::new().render_stem(stem);
        let bytes = PcmEncoder::new().encode(&dry)?;
        info!("[ENGINE] Exported stem {} ({} bytes)", name, bytes.len());
        Ok(ExportArtifact {
            file_name: stem_export_name(project, name),
            bytes,
        })
    }

    fn mix_plan(&self) -> Result<GraphPlan> {
        let source = self.require_source()?;
        GraphPlan::build(&source, &self.mixer, self.transport.volume(), &self.equalizer)
    }

    fn ensure_idle<T>(slot: &Option<Pending<T>>, operation: Operation) -> Result<()> {
        if slot.is_some() {
            return Err(EngineError::OperationBusy {
                operation: operation.label(),
            });
        }
        Ok(())
    }

    pub fn is_busy(&self, operation: Operation) -> bool {
        match operation {
            Operation::Separation => self.separation.is_some(),
            Operation::TempoAnalysis => self.tempo_task.is_some(),
            Operation::Accompaniment => self.accompaniment.is_some(),
            Operation::Export => self.export.is_some(),
            Operation::Playback => self.transport.is_playing(),
        }
    }

    fn busy_operations(&self) -> Vec<Operation> {
        [
            Operation::Separation,
            Operation::TempoAnalysis,
            Operation::Accompaniment,
            Operation::Export,
        ]
        .into_iter()
        .filter(|&op| self.is_busy(op))
        .collect()
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Advance the transport and commit finished background work
    pub fn poll(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        let ended = self.tick();
        self.poll_separation(&mut events);
        self.poll_tempo(&mut events);
        self.poll_accompaniment(&mut events);
        self.poll_export(&mut events);
        if ended | std::mem::take(&mut self.unreported_end) {
            events.push(EngineEvent::PlaybackEnded);
        }
        events
    }

    /// Poll until no background task is running or `timeout` elapses
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<EngineEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        loop {
            events.extend(self.poll());
            if self.busy_operations().is_empty() {
                return events;
            }
            if Instant::now() >= deadline {
                warn!("[ENGINE] Still busy after {:?}", timeout);
                return events;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    fn is_stale(&self, generation: u64, operation: Operation, events: &mut Vec<EngineEvent>) -> bool {
        if generation == self.generation {
            return false;
        }
        debug!("[ENGINE] Discarding stale {} result", operation);
        events.push(EngineEvent::Discarded { operation });
        true
    }

    fn poll_separation(&mut self, events: &mut Vec<EngineEvent>) {
        let mut progress = Vec::new();
        let finished = Pending::take_finished(&mut self.separation, &mut progress);
        for percent in progress {
            self.separation_progress = Some(percent);
            events.push(EngineEvent::SeparationProgress(percent));
        }

        let Some((generation, outcome)) = finished else {
            return;
        };
        if self.is_stale(generation, Operation::Separation, events) {
            return;
        }
        self.separation_progress = None;

        let committed = outcome.and_then(|stems| {
            let count = stems.len();
            self.mixer.set_stems(stems)?;
            Ok(count)
        });
        match committed {
            Ok(count) => {
                info!("[ENGINE] {} stems ready", count);
                events.push(EngineEvent::StemsReady { count });
                self.restart_after_commit(events);
            }
            Err(error) => {
                warn!(
                    "[ENGINE] Separation failed: {} (recoverable: {})",
                    error,
                    error.is_recoverable()
                );
                self.separation_error = Some(error.friendly_message());
                events.push(EngineEvent::Failed {
                    operation: Operation::Separation,
                    error,
                });
            }
        }
    }

    fn poll_tempo(&mut self, events: &mut Vec<EngineEvent>) {
        let mut progress = Vec::new();
        let Some((generation, outcome)) = Pending::take_finished(&mut self.tempo_task, &mut progress)
        else {
            return;
        };
        if self.is_stale(generation, Operation::TempoAnalysis, events) {
            return;
        }

        self.tempo.record(&outcome);
        match outcome {
            Ok(estimate) => {
                info!("[ENGINE] Tempo {} BPM", estimate.bpm);
                events.push(EngineEvent::TempoReady { bpm: estimate.bpm });
            }
            Err(error) => {
                warn!(
                    "[ENGINE] Tempo analysis failed: {} (recoverable: {})",
                    error,
                    error.is_recoverable()
                );
                events.push(EngineEvent::Failed {
                    operation: Operation::TempoAnalysis,
                    error,
                });
            }
        }
    }

    fn poll_accompaniment(&mut self, events: &mut Vec<EngineEvent>) {
        let mut progress = Vec::new();
        let Some((generation, outcome)) =
            Pending::take_finished(&mut self.accompaniment, &mut progress)
        else {
            return;
        };
        if self.is_stale(generation, Operation::Accompaniment, events) {
            return;
        }

        match outcome.and_then(|(bpm, parts)| self.commit_accompaniment(parts).map(|_| bpm)) {
            Ok(bpm) => {
                info!("[ENGINE] Accompaniment ready at {} BPM", bpm);
                events.push(EngineEvent::AccompanimentReady { bpm });
                self.restart_after_commit(events);
            }
            Err(error) => {
                warn!(
                    "[ENGINE] Accompaniment failed: {} (recoverable: {})",
                    error,
                    error.is_recoverable()
                );
                events.push(EngineEvent::Failed {
                    operation: Operation::Accompaniment,
                    error,
                });
            }
        }
    }

    fn poll_export(&mut self, events: &mut Vec<EngineEvent>) {
        let mut progress = Vec::new();
        let Some((generation, outcome)) = Pending::take_finished(&mut self.export, &mut progress)
        else {
            return;
        };
        if self.is_stale(generation, Operation::Export, events) {
            return;
        }

        match outcome {
            Ok(artifact) => events.push(EngineEvent::ExportReady(artifact)),
            Err(error) => {
                warn!(
                    "[ENGINE] Export failed: {} (recoverable: {})",
                    error,
                    error.is_recoverable()
                );
                events.push(EngineEvent::Failed {
                    operation: Operation::Export,
                    error,
                });
            }
        }
    }

    /// Generated parts replace earlier generated parts
    ///
    /// Separated stems keep their order and settings. With no stems at all
    /// the untouched track is added first so it stays audible.
    fn commit_accompaniment(&mut self, parts: GeneratedAccompaniment) -> Result<()> {
        let source = self.require_source()?;
        let volumes = self.config.volumes;

        let mut stems: Vec<Stem> = if self.mixer.is_empty() {
            vec![Stem::new(
                ORIGINAL_STEM,
                source,
                volumes.original,
                StemKind::Separated,
            )]
        } else {
            self.mixer
                .stems()
                .iter()
                .filter(|stem| !stem.is_generated())
                .cloned()
                .collect()
        };
        stems.push(Stem::new(GENERATED_DRUMS, parts.drums, volumes.drums, StemKind::Generated));
        stems.push(Stem::new(GENERATED_BASS, parts.bass, volumes.bass, StemKind::Generated));
        stems.push(Stem::new(
            GENERATED_GUITAR,
            parts.guitar,
            volumes.guitar,
            StemKind::Generated,
        ));
        self.mixer.set_stems(stems)
    }

    fn restart_after_commit(&mut self, events: &mut Vec<EngineEvent>) {
        if let Err(error) = self.restart_voice() {
            warn!(
                "[ENGINE] Could not restart playback: {} (recoverable: {})",
                error,
                error.is_recoverable()
            );
            self.transport.pause();
            events.push(EngineEvent::Failed {
                operation: Operation::Playback,
                error,
            });
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self) -> Option<&Arc<SampleBuffer>> {
        self.source.as_ref()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn equalizer(&self) -> &Equalizer {
        &self.equalizer
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    pub fn tempo(&self) -> &TempoState {
        &self.tempo
    }

    pub fn separation_progress(&self) -> Option<u8> {
        self.separation_progress
    }

    pub fn separation_error(&self) -> Option<&str> {
        self.separation_error.as_deref()
    }

    pub fn host(&self) -> &dyn AudioHost {
        self.host.as_ref()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            file_name: self.file_name.clone(),
            transport: self.transport.snapshot(),
            equalizer: self.equalizer.state(),
            stems: self.mixer.infos(),
            tempo: self.tempo.clone(),
            separation_progress: self.separation_progress,
            separation_error: self.separation_error.clone(),
            busy: self.busy_operations(),
        }
    }

    /// Cancel background work and release the audio host
    pub fn shutdown(&mut self) {
        if self.host.is_closed() {
            return;
        }
        self.cancel_tasks();
        self.stop_voice();
        self.transport.pause();
        self.host.close();
        info!("[ENGINE] Session closed");
    }
}

impl Drop for EngineState {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn encode_plan(file_name: String, plan: &GraphPlan, cancel: &AtomicBool) -> Result<ExportArtifact> {
    let rendered = OfflineRenderer::new().render(plan, cancel)?;
    let bytes = PcmEncoder::new().encode(&rendered)?;
    info!("[ENGINE] Exported {} ({} bytes)", file_name, bytes.len());
    Ok(ExportArtifact { file_name, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::playback::CaptureHost;
    use crate::engine::transport::ManualClock;
    use pretty_assertions::assert_eq;

    const RATE: u32 = 1000;

    fn session() -> (EngineState, CaptureHost, Arc<ManualClock>) {
        let host = CaptureHost::new(64);
        let clock = Arc::new(ManualClock::new());
        let mut config = EngineConfig::new();
        config.seed = Some(3);
        let engine = EngineState::with_clock(config, Box::new(host.clone()), clock.clone()).unwrap();
        (engine, host, clock)
    }

    fn constant(value: f32, secs: f64) -> SampleBuffer {
        let frames = (secs * RATE as f64) as usize;
        SampleBuffer::new(vec![vec![value; frames]], RATE).unwrap()
    }

    fn finish(engine: &mut EngineState) -> Vec<EngineEvent> {
        engine.wait_idle(Duration::from_secs(10))
    }

    #[test]
    fn test_actions_require_audio() {
        let (mut engine, _, _) = session();
        assert!(matches!(engine.play(), Err(EngineError::NoAudioLoaded)));
        assert!(matches!(engine.start_separation(), Err(EngineError::NoAudioLoaded)));
        assert!(matches!(engine.start_mix_export("x"), Err(EngineError::NoAudioLoaded)));
    }

    #[test]
    fn test_play_at_end_rewinds() {
        let (mut engine, host, clock) = session();
        engine.load("a.wav", constant(0.5, 5.0)).unwrap();

        engine.seek(7.0).unwrap();
        assert_eq!(engine.transport().current_time(), 5.0);

        engine.play().unwrap();
        assert_eq!(engine.transport().current_time(), 0.0);
        assert_eq!(host.starts(), 1);

        clock.advance(6.0);
        let events = engine.poll();
        assert!(events.iter().any(|e| matches!(e, EngineEvent::PlaybackEnded)));
        assert!(!engine.transport().is_playing());
        assert_eq!(engine.transport().current_time(), 5.0);
        assert!(!host.is_active());
    }

    #[test]
    fn test_end_reached_while_clearing_generated_is_reported() {
        let (mut engine, host, clock) = session();
        engine.load("a.wav", constant(0.5, 1.0)).unwrap();
        engine.play().unwrap();

        clock.advance(2.0);
        engine.clear_generated().unwrap();
        assert!(!engine.transport().is_playing());
        assert!(!host.is_active());

        let ended = |events: &[EngineEvent]| {
            events
                .iter()
                .filter(|e| matches!(e, EngineEvent::PlaybackEnded))
                .count()
        };
        assert_eq!(ended(&engine.poll()), 1);
        assert_eq!(ended(&engine.poll()), 0);
    }

    #[test]
    fn test_seek_while_playing_restarts_voice() {
        let (mut engine, host, _) = session();
        engine.load("a.wav", constant(0.5, 2.0)).unwrap();
        engine.play().unwrap();
        engine.seek(1.5).unwrap();

        assert!(engine.transport().is_playing());
        assert_eq!(host.starts(), 2);
        assert_eq!(host.position(), Some(1500));
    }

    #[test]
    fn test_separation_commits_stems() {
        let (mut engine, _, _) = session();
        engine.load("a.wav", constant(0.5, 1.0)).unwrap();
        engine.start_separation().unwrap();
        assert!(matches!(
            engine.start_separation(),
            Err(EngineError::OperationBusy { .. })
        ));

        let events = finish(&mut engine);
        let progress: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::SeparationProgress(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(progress.last(), Some(&100));
        assert!(events.iter().any(|e| matches!(e, EngineEvent::StemsReady { count: 4 })));
        assert_eq!(engine.mixer().len(), 4);
        assert_eq!(engine.separation_progress(), None);
    }

    #[test]
    fn test_accompaniment_needs_tempo_then_prepends_original() {
        let (mut engine, _, _) = session();
        engine.load("a.wav", constant(0.5, 2.0)).unwrap();
        assert!(matches!(
            engine.start_accompaniment(),
            Err(EngineError::MissingTempo)
        ));

        engine.set_tempo_override(Some(120)).unwrap();
        engine.start_accompaniment().unwrap();
        let events = finish(&mut engine);
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::AccompanimentReady { bpm: 120 })));

        let names: Vec<&str> = engine.mixer().stems().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![ORIGINAL_STEM, GENERATED_DRUMS, GENERATED_BASS, GENERATED_GUITAR]
        );
        assert_eq!(engine.mixer().get(ORIGINAL_STEM).unwrap().volume, 0.8);

        // Regenerating replaces only the generated parts
        engine.start_accompaniment().unwrap();
        finish(&mut engine);
        assert_eq!(engine.mixer().len(), 4);
    }

    #[test]
    fn test_clear_discards_running_work() {
        let (mut engine, _, _) = session();
        engine.load("a.wav", constant(0.5, 1.0)).unwrap();
        engine.start_separation().unwrap();
        engine.clear_audio();

        assert!(!engine.is_busy(Operation::Separation));
        assert!(finish(&mut engine).is_empty());
        assert!(engine.mixer().is_empty());
        assert!(engine.source().is_none());
    }

    #[test]
    fn test_live_gain_edits_reach_voice() {
        let (mut engine, mut host, _) = session();
        engine.load("a.wav", constant(0.5, 1.0)).unwrap();
        engine.play().unwrap();

        host.pull(4);
        assert_eq!(host.captured()[0], 0.5);

        engine.set_volume(0.5);
        host.clear_captured();
        host.pull(4);
        // Original path has no master stage
        assert_eq!(host.captured()[0], 0.5);

        engine.pause();
        engine.start_separation().unwrap();
        finish(&mut engine);
        engine.play().unwrap();
        engine.toggle_stem_solo("bass").unwrap();
        host.clear_captured();
        host.pull(4);
        let bass = engine.mixer().get("bass").unwrap().buffer.channel(0)[0];
        assert!((host.captured()[0] - bass * 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_export_stem_is_dry() {
        let (mut engine, _, _) = session();
        engine.load("a.wav", constant(0.5, 1.0)).unwrap();
        engine.start_separation().unwrap();
        finish(&mut engine);
        engine.set_eq_enabled(true);
        engine.set_eq_band(0, 12.0).unwrap();
        engine.set_stem_volume("drums", 0.1).unwrap();

        let artifact = engine.export_stem("demo", "drums").unwrap();
        assert_eq!(artifact.file_name, "demo_drums.wav");
        let reader = hound::WavReader::new(std::io::Cursor::new(artifact.bytes)).unwrap();
        assert_eq!(reader.spec().channels, 1);

        assert!(matches!(
            engine.export_stem("demo", "vocals (live)"),
            Err(EngineError::StemNotFound { .. })
        ));
    }

    #[test]
    fn test_background_export_matches_sync_export() {
        let (mut engine, _, _) = session();
        engine.load("a.wav", constant(0.25, 0.5)).unwrap();
        let sync = engine.export_mix("demo").unwrap();

        engine.start_mix_export("demo").unwrap();
        let events = finish(&mut engine);
        let artifact = events
            .into_iter()
            .find_map(|e| match e {
                EngineEvent::ExportReady(artifact) => Some(artifact),
                _ => None,
            })
            .unwrap();
        assert_eq!(artifact, sync);
        assert_eq!(artifact.file_name, "demo_mixed.wav");
    }

    #[test]
    fn test_snapshot_and_shutdown() {
        let (mut engine, host, _) = session();
        engine.load("a.wav", constant(0.5, 1.0)).unwrap();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.file_name.as_deref(), Some("a.wav"));
        assert!(snapshot.busy.is_empty());
        assert!(serde_json::to_string(&snapshot).is_ok());

        engine.shutdown();
        assert!(host.is_closed());
    }
}

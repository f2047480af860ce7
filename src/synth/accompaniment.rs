//! Procedural Accompaniment
//!
//! Drums, bass and guitar parts synthesized on a 4/4 beat grid derived from a
//! tempo. Every part is rendered offline into a stereo buffer of the source
//! track's length; nothing depends on the source audio beyond its timing.
//!
//! Per bar position (beat index mod 4):
//!
//! | position | drums            | bass        | guitar      |
//! |----------|------------------|-------------|-------------|
//! | 0        | kick + hi-hat    | root 110 Hz | chord strum |
//! | 1        | snare + hi-hat   | root 110 Hz |             |
//! | 2        | kick + hi-hat    | fifth 165 Hz| chord strum |
//! | 3        | snare + hi-hat   | fifth 165 Hz|             |

use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dsp::automation::ParamTimeline;
use crate::dsp::biquad::{Biquad, BiquadCoeffs, FilterType};
use crate::dsp::oscillator::{Oscillator, Waveform};
use crate::engine::buffer::SampleBuffer;
use crate::error::{EngineError, Result};

/// Channel count of every generated part
pub const OUTPUT_CHANNELS: usize = 2;

const BASS_ROOT_HZ: f64 = 110.0;
const BASS_FIFTH_HZ: f64 = 165.0;
const CHORD_A: [f64; 3] = [220.0, 277.0, 330.0];
const CHORD_D: [f64; 3] = [147.0, 185.0, 220.0];
const STRUM_OFFSET_SECS: f64 = 0.01;

/// Q used when a filter is created without one
const DEFAULT_FILTER_Q: f64 = 1.0;

/// The three synthesized parts
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAccompaniment {
    pub drums: SampleBuffer,
    pub bass: SampleBuffer,
    pub guitar: SampleBuffer,
}

/// Drum voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrumHit {
    Kick,
    Snare,
    HiHat,
}

/// One scheduled drum hit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrumEvent {
    pub time: f64,
    pub hit: DrumHit,
}

/// Beat length in seconds and number of whole beats in `duration`
pub fn beat_grid(bpm: u32, duration: f64) -> (f64, usize) {
    let beat = 60.0 / bpm as f64;
    (beat, (duration / beat).floor() as usize)
}

/// The drum schedule for a tempo and duration, in time order
pub fn drum_pattern(bpm: u32, duration: f64) -> Vec<DrumEvent> {
    let (beat, count) = beat_grid(bpm, duration);
    let mut events = Vec::with_capacity(count * 2);
    for index in 0..count {
        let time = index as f64 * beat;
        let accent = if index % 4 == 0 || index % 4 == 2 {
            DrumHit::Kick
        } else {
            DrumHit::Snare
        };
        events.push(DrumEvent { time, hit: accent });
        events.push(DrumEvent {
            time,
            hit: DrumHit::HiHat,
        });
    }
    events
}

/// Accompaniment generator
#[derive(Debug, Clone, Default)]
pub struct AccompanimentSynthesizer {
    seed: Option<u64>,
}

impl AccompanimentSynthesizer {
    /// Create a synthesizer; `None` seeds drum noise from entropy
    pub fn new(seed: Option<u64>) -> Self {
        Self { seed }
    }

    /// Generate all three parts
    ///
    /// # Errors
    /// * `InvalidParameter` - zero BPM, zero sample rate, or a negative/non-finite duration
    pub fn generate(
        &self,
        bpm: u32,
        duration: f64,
        sample_rate: u32,
    ) -> Result<GeneratedAccompaniment> {
        self.generate_cancellable(bpm, duration, sample_rate, &AtomicBool::new(false))
    }

    /// Generate all three parts, checking `cancel` between parts
    pub fn generate_cancellable(
        &self,
        bpm: u32,
        duration: f64,
        sample_rate: u32,
        cancel: &AtomicBool,
    ) -> Result<GeneratedAccompaniment> {
        if bpm == 0 {
            return Err(EngineError::invalid_parameter("bpm", bpm, "a positive tempo"));
        }
        if sample_rate == 0 {
            return Err(EngineError::invalid_parameter(
                "sample_rate",
                sample_rate,
                "a positive sample rate",
            ));
        }
        if !duration.is_finite() || duration < 0.0 {
            return Err(EngineError::invalid_parameter(
                "duration",
                duration,
                "a non-negative number of seconds",
            ));
        }

        let frames = (duration * sample_rate as f64).round() as usize;
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let check = || {
            if cancel.load(Ordering::Relaxed) {
                Err(EngineError::Cancelled {
                    operation: "accompaniment generation",
                })
            } else {
                Ok(())
            }
        };

        check()?;
        let drums = render_drums(bpm, duration, sample_rate, frames, &mut rng);
        check()?;
        let bass = render_bass(bpm, duration, sample_rate, frames);
        check()?;
        let guitar = render_guitar(bpm, duration, sample_rate, frames);

        info!(
            "[ACCOMPANY] Generated {:.2}s at {} BPM ({} beats)",
            duration,
            bpm,
            beat_grid(bpm, duration).1
        );

        Ok(GeneratedAccompaniment {
            drums: to_stereo(drums, sample_rate)?,
            bass: to_stereo(bass, sample_rate)?,
            guitar: to_stereo(guitar, sample_rate)?,
        })
    }
}

fn to_stereo(mono: Vec<f32>, sample_rate: u32) -> Result<SampleBuffer> {
    SampleBuffer::new(vec![mono; OUTPUT_CHANNELS], sample_rate)
}

// ============================================================================
// Voice Rendering
// ============================================================================

/// Add a voice sounding over `[start, stop)` seconds into `out`
///
/// The voice starts on the first frame at or after `start` and the closure
/// receives the absolute time of each frame it renders.
fn add_voice<F>(out: &mut [f32], sample_rate: u32, start: f64, stop: f64, mut voice: F)
where
    F: FnMut(f64) -> f64,
{
    let sr = sample_rate as f64;
    let first = (start * sr).ceil().max(0.0) as usize;
    let last = ((stop * sr).ceil().max(0.0) as usize).min(out.len());
    for frame in first..last {
        out[frame] += voice(frame as f64 / sr) as f32;
    }
}

/// Exponential decay from `from` to `to` over `[start, start + length]`
fn decay(start: f64, length: f64, from: f64, to: f64) -> ParamTimeline {
    let mut gain = ParamTimeline::new(1.0);
    gain.set_value_at_time(from, start)
        .exponential_ramp_to_value_at_time(to, start + length);
    gain
}

fn noise_burst(rng: &mut StdRng, sample_rate: u32, secs: f64) -> Vec<f64> {
    let length = (sample_rate as f64 * secs) as usize;
    (0..length).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect()
}

// ============================================================================
// Drums
// ============================================================================

fn render_drums(
    bpm: u32,
    duration: f64,
    sample_rate: u32,
    frames: usize,
    rng: &mut StdRng,
) -> Vec<f32> {
    let mut out = vec![0.0; frames];
    let events = drum_pattern(bpm, duration);
    debug!("[ACCOMPANY] {} drum hits", events.len());

    for event in events {
        match event.hit {
            DrumHit::Kick => add_kick(&mut out, sample_rate, event.time),
            DrumHit::Snare => add_noise_hit(&mut out, sample_rate, event.time, rng, 0.1, 1000.0, 0.5),
            DrumHit::HiHat => {
                add_noise_hit(&mut out, sample_rate, event.time, rng, 0.05, 5000.0, 0.2)
            }
        }
    }
    out
}

/// Sine swept 150 -> 50 Hz over 0.1 s, gain 0.8 -> 0.01 over 0.15 s
fn add_kick(out: &mut [f32], sample_rate: u32, time: f64) {
    let mut pitch = ParamTimeline::new(440.0);
    pitch
        .set_value_at_time(150.0, time)
        .exponential_ramp_to_value_at_time(50.0, time + 0.1);
    let gain = decay(time, 0.15, 0.8, 0.01);

    let mut osc = Oscillator::new(Waveform::Sine, sample_rate);
    add_voice(out, sample_rate, time, time + 0.15, |t| {
        osc.next_sample(pitch.value_at(t)) * gain.value_at(t)
    });
}

/// High-passed white noise with an exponential decay
fn add_noise_hit(
    out: &mut [f32],
    sample_rate: u32,
    time: f64,
    rng: &mut StdRng,
    length: f64,
    cutoff: f64,
    level: f64,
) {
    let noise = noise_burst(rng, sample_rate, length);
    let coeffs = BiquadCoeffs::calculate(
        FilterType::HighPass,
        sample_rate as f64,
        cutoff,
        0.0,
        DEFAULT_FILTER_Q,
    );
    let mut filter = Biquad::new(coeffs, 1);
    let gain = decay(time, length, level, 0.01);

    let mut samples = noise.into_iter();
    add_voice(out, sample_rate, time, time + length, |t| {
        // Source runs dry once the burst is exhausted
        let x = samples.next().unwrap_or(0.0);
        filter.process(0, x) * gain.value_at(t)
    });
}

// ============================================================================
// Bass
// ============================================================================

fn render_bass(bpm: u32, duration: f64, sample_rate: u32, frames: usize) -> Vec<f32> {
    let mut out = vec![0.0; frames];
    let (beat, count) = beat_grid(bpm, duration);
    let note_length = beat * 0.8;

    for index in 0..count {
        let time = index as f64 * beat;
        let frequency = if index % 4 < 2 {
            BASS_ROOT_HZ
        } else {
            BASS_FIFTH_HZ
        };

        let mut gain = ParamTimeline::new(1.0);
        gain.set_value_at_time(0.3, time)
            .exponential_ramp_to_value_at_time(0.15, time + note_length * 0.5)
            .exponential_ramp_to_value_at_time(0.01, time + note_length);

        let coeffs =
            BiquadCoeffs::calculate(FilterType::LowPass, sample_rate as f64, 800.0, 0.0, 2.0);
        let mut filter = Biquad::new(coeffs, 1);
        let mut osc = Oscillator::new(Waveform::Sawtooth, sample_rate);

        add_voice(&mut out, sample_rate, time, time + note_length, |t| {
            filter.process(0, osc.next_sample(frequency)) * gain.value_at(t)
        });
    }
    out
}

// ============================================================================
// Guitar
// ============================================================================

/// Chord for the bar containing beat `index`, alternating every 4 beats
fn chord_for_beat(index: usize) -> &'static [f64; 3] {
    if (index / 4) % 2 == 0 {
        &CHORD_A
    } else {
        &CHORD_D
    }
}

fn render_guitar(bpm: u32, duration: f64, sample_rate: u32, frames: usize) -> Vec<f32> {
    let mut out = vec![0.0; frames];
    let (beat, count) = beat_grid(bpm, duration);
    let note_length = beat * 0.6;

    for index in (0..count).filter(|i| i % 4 == 0 || i % 4 == 2) {
        let time = index as f64 * beat;
        for (string, &frequency) in chord_for_beat(index).iter().enumerate() {
            let start = time + string as f64 * STRUM_OFFSET_SECS;
            let gain = decay(start, note_length, 0.15, 0.01);
            let mut osc = Oscillator::new(Waveform::Triangle, sample_rate);
            add_voice(&mut out, sample_rate, start, start + note_length, |t| {
                osc.next_sample(frequency) * gain.value_at(t)
            });
        }
    }
    out
}

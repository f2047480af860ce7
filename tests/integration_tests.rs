//! Integration Tests
//!
//! End-to-end behavior of the engine: separation, accompaniment, mixing,
//! export and the live/offline rendering paths.

use std::io::Cursor;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use approx::assert_abs_diff_eq;
use pretty_assertions::assert_eq;

use stemdeck::analysis::TempoEstimator;
use stemdeck::config::EngineConfig;
use stemdeck::dsp::Equalizer;
use stemdeck::engine::{AudioHost, CaptureHost, EngineEvent, EngineState, ManualClock};
use stemdeck::render::{OfflineRenderer, PcmEncoder};
use stemdeck::stems::{Mixer, Stem, StemKind, StemSeparator, STEM_NAMES};
use stemdeck::store::{BlobStore, MemoryBlobStore, MemoryProjectStore, ProjectStore, ProjectUpdate};
use stemdeck::synth::{drum_pattern, AccompanimentSynthesizer, DrumHit};
use stemdeck::SampleBuffer;

/// Helper to create a test sine wave buffer
fn sine(frequency: f32, sample_rate: u32, secs: f32) -> SampleBuffer {
    let frames = (sample_rate as f32 * secs) as usize;
    let data = (0..frames)
        .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin() * 0.5)
        .collect();
    SampleBuffer::new(vec![data], sample_rate).unwrap()
}

fn seeded_session() -> (EngineState, CaptureHost) {
    let host = CaptureHost::new(128);
    let mut config = EngineConfig::new();
    config.seed = Some(42);
    let engine = EngineState::with_clock(
        config,
        Box::new(host.clone()),
        Arc::new(ManualClock::new()),
    )
    .unwrap();
    (engine, host)
}

fn settle(engine: &mut EngineState) -> Vec<EngineEvent> {
    let events = engine.wait_idle(Duration::from_secs(30));
    for event in &events {
        if let EngineEvent::Failed { operation, error } = event {
            panic!("{} failed: {}", operation, error);
        }
    }
    events
}

// === Separation ===

#[test]
fn test_separating_silence_yields_four_silent_stems() {
    let source = SampleBuffer::silent(1, 441_000, 44100).unwrap();
    let mut progress = Vec::new();
    let stems = StemSeparator::new(None)
        .separate(&source, &mut |p| progress.push(p), &AtomicBool::new(false))
        .unwrap();

    let names: Vec<&str> = stems.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, STEM_NAMES);
    for stem in &stems {
        assert_eq!(stem.buffer.frame_count(), 441_000);
        assert_eq!(stem.buffer.peak(), 0.0);
    }
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
}

// === Accompaniment ===

#[test]
fn test_accompaniment_grid_at_120_bpm() {
    let kicks_and_snares: Vec<(f64, DrumHit)> = drum_pattern(120, 2.0)
        .into_iter()
        .filter(|e| e.hit != DrumHit::HiHat)
        .map(|e| (e.time, e.hit))
        .collect();
    assert_eq!(
        kicks_and_snares,
        vec![
            (0.0, DrumHit::Kick),
            (0.5, DrumHit::Snare),
            (1.0, DrumHit::Kick),
            (1.5, DrumHit::Snare),
        ]
    );

    let parts = AccompanimentSynthesizer::new(Some(1))
        .generate(120, 2.0, 44100)
        .unwrap();
    for part in [&parts.drums, &parts.bass, &parts.guitar] {
        assert_eq!(part.frame_count(), 88200);
        assert_eq!(part.channel_count(), 2);
        assert!(part.is_finite());
        assert!(part.peak() > 0.0);
    }
}

// === Mixing ===

#[test]
fn test_disabled_eq_is_identity() {
    let original = Arc::new(sine(440.0, 44100, 0.5));
    let eq = Equalizer::new();
    let rendered = OfflineRenderer::new()
        .render_mix(&original, &Mixer::new(), 1.0, &eq)
        .unwrap();

    assert_eq!(rendered.channel_count(), 2);
    assert_eq!(rendered.channel(0), original.channel(0));
    assert_eq!(rendered.channel(1), original.channel(0));
    assert_eq!(eq.apply(&original).channel(0), original.channel(0));
}

#[test]
fn test_solo_renders_only_soloed_stem() {
    let original = Arc::new(SampleBuffer::silent(1, 1000, 1000).unwrap());
    let stem = |name: &str, value: f32| {
        Stem::new(
            name,
            SampleBuffer::new(vec![vec![value; 1000]], 1000).unwrap(),
            0.5,
            StemKind::Separated,
        )
    };
    let mut mixer = Mixer::new();
    mixer
        .set_stems(vec![stem("a", 0.2), stem("b", 0.4), stem("c", 0.8)])
        .unwrap();
    mixer.toggle_solo("b").unwrap();

    let rendered = OfflineRenderer::new()
        .render_mix(&original, &mixer, 0.5, &Equalizer::new())
        .unwrap();
    for &sample in rendered.channel(0) {
        assert_abs_diff_eq!(sample, 0.4 * 0.5 * 0.5, epsilon = 1e-6);
    }
}

#[test]
fn test_eq_reset_is_idempotent() {
    let mut eq = Equalizer::new();
    eq.set_enabled(true);
    eq.set_band(2, 6.0).unwrap();
    eq.reset();
    let once = eq.state();
    eq.reset();
    assert_eq!(eq.state(), once);
    assert!(once.enabled);
    assert_eq!(once.bands, [0.0; 5]);
}

// === Export ===

#[test]
fn test_wav_round_trip_within_one_lsb() {
    let buffer = sine(1000.0, 22050, 0.25);
    let bytes = PcmEncoder::new().encode(&buffer).unwrap();
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.spec().bits_per_sample, 16);

    let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(decoded.len(), buffer.frame_count());
    for (&expected, &actual) in buffer.channel(0).iter().zip(&decoded) {
        assert_abs_diff_eq!(expected, actual as f32 / 32767.0, epsilon = 1.0 / 32767.0);
    }
}

#[test]
fn test_tempo_is_deterministic() {
    // 60 ms bursts every half second, 10 ms into each period
    let frames = 48000 * 6;
    let data: Vec<f32> = (0..frames)
        .map(|i| if (480..3360).contains(&(i % 24000)) { 0.7 } else { 0.0 })
        .collect();
    let buffer = SampleBuffer::new(vec![data], 48000).unwrap();

    let first = TempoEstimator::new().estimate(&buffer).unwrap();
    let second = TempoEstimator::new().estimate(&buffer).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.bpm, 120);
}

// === Session ===

#[test]
fn test_seek_clamps_to_duration() {
    let (mut engine, _) = seeded_session();
    engine.load("five.wav", SampleBuffer::silent(2, 5 * 8000, 8000).unwrap()).unwrap();
    engine.seek(7.0).unwrap();
    assert_eq!(engine.transport().current_time(), 5.0);
    engine.seek(-1.0).unwrap();
    assert_eq!(engine.transport().current_time(), 0.0);
}

#[test]
fn test_live_playback_matches_offline_export() {
    let (mut engine, mut host) = seeded_session();
    engine.load("tone.wav", sine(220.0, 8000, 1.0)).unwrap();
    engine.set_tempo_override(Some(100)).unwrap();
    engine.start_separation().unwrap();
    settle(&mut engine);
    engine.start_accompaniment().unwrap();
    settle(&mut engine);

    engine.set_eq_enabled(true);
    engine.set_eq_band(0, 6.0).unwrap();
    engine.set_eq_band(4, -9.0).unwrap();
    engine.set_volume(0.8);
    engine.toggle_stem_mute("vocals").unwrap();

    let offline = engine.export_mix("parity").unwrap();
    let expected: Vec<i16> = hound::WavReader::new(Cursor::new(offline.bytes))
        .unwrap()
        .samples::<i16>()
        .map(|s| s.unwrap())
        .collect();

    engine.play().unwrap();
    host.drain();
    let live: Vec<i16> = host
        .captured()
        .iter()
        .map(|&s| stemdeck::render::wav::quantize(s))
        .collect();

    assert_eq!(live.len(), expected.len());
    assert_eq!(live, expected);
    assert!(!host.is_active());
}

#[test]
fn test_generated_stems_replace_previous_generation() {
    let (mut engine, _) = seeded_session();
    engine.load("tone.wav", sine(110.0, 8000, 2.0)).unwrap();
    engine.start_separation().unwrap();
    settle(&mut engine);

    engine.set_tempo_override(Some(90)).unwrap();
    engine.start_accompaniment().unwrap();
    settle(&mut engine);
    engine.set_tempo_override(Some(150)).unwrap();
    engine.start_accompaniment().unwrap();
    let events = settle(&mut engine);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::AccompanimentReady { bpm: 150 })));

    let names: Vec<&str> = engine.mixer().stems().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "drums",
            "bass",
            "guitar",
            "vocals",
            "Drums (Generated)",
            "Bass (Generated)",
            "Guitar (Generated)",
        ]
    );

    engine.clear_generated().unwrap();
    assert_eq!(engine.mixer().len(), 4);
}

#[test]
fn test_exports_can_be_filed_under_a_project() {
    let (mut engine, _) = seeded_session();
    engine.load("tone.wav", sine(330.0, 8000, 0.5)).unwrap();
    let artifact = engine.export_mix("demo").unwrap();

    let mut projects = MemoryProjectStore::new();
    let mut blobs = MemoryBlobStore::new();
    let id = projects.create("demo", "first bounce").unwrap();
    let blob = blobs.put(&artifact.bytes).unwrap();
    let project = projects.update(&id, ProjectUpdate::AddFile(blob.clone())).unwrap();

    assert_eq!(project.files, vec![blob.clone()]);
    assert_eq!(&*blobs.get(&blob).unwrap().unwrap(), artifact.bytes.as_slice());
}

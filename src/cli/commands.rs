//! CLI Command Implementations
//!
//! Each command opens a headless session, runs the requested operations to
//! completion and writes exports to disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use super::{MixOptions, OutputArgs};
use crate::analysis::TempoEstimator;
use crate::config::EngineConfig;
use crate::dsp::BAND_COUNT;
use crate::engine::io::{decode_wav_file, guess_mime_type, validate_upload};
use crate::engine::{CaptureHost, EngineEvent, EngineState};
use crate::error::{EngineError, Result};

/// Longest a single background operation may take before the CLI gives up
const OPERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Check a file against the upload rules and, for WAV, decode it.
pub fn validate(config: &EngineConfig, file: &Path, mime: Option<&str>) -> Result<()> {
    let name = file_name(file);
    let size = fs::metadata(file)?.len();
    let mime = mime.unwrap_or_else(|| guess_mime_type(&name));

    validate_upload(&name, mime, size, &config.upload)?;
    println!("{}: accepted ({} bytes, {})", name, size, mime);

    if mime.contains("wav") {
        let buffer = decode_wav_file(file)?;
        println!(
            "  {:.2}s, {} channel(s) @ {} Hz",
            buffer.duration_secs(),
            buffer.channel_count(),
            buffer.sample_rate()
        );
    }
    Ok(())
}

/// Print the estimated tempo of a WAV file.
pub fn tempo(input: &Path) -> Result<u32> {
    let buffer = decode_wav_file(input)?;
    let estimate = TempoEstimator::new().estimate(&buffer)?;
    println!("{} BPM", estimate.bpm);
    Ok(estimate.bpm)
}

/// Separate a WAV file and export every stem.
pub fn separate(config: &EngineConfig, input: &Path, output: &OutputArgs) -> Result<Vec<PathBuf>> {
    let mut engine = open_session(config, input)?;
    run_separation(&mut engine)?;
    export_all_stems(&engine, output)
}

/// Generate accompaniment for a WAV file and export the generated stems.
pub fn accompany(
    config: &EngineConfig,
    input: &Path,
    bpm: Option<u32>,
    output: &OutputArgs,
) -> Result<Vec<PathBuf>> {
    let mut engine = open_session(config, input)?;
    run_accompaniment(&mut engine, bpm)?;

    fs::create_dir_all(&output.out)?;
    let mut written = Vec::new();
    for stem in engine.mixer().stems().iter().filter(|s| s.is_generated()) {
        let artifact = engine.export_stem(&output.project, &stem.name)?;
        written.push(artifact.write_to_dir(&output.out)?);
    }
    report_written(&written);
    Ok(written)
}

/// Render the full mix with the requested processing.
pub fn mix(
    config: &EngineConfig,
    input: &Path,
    options: &MixOptions,
    output: &OutputArgs,
) -> Result<PathBuf> {
    let mut engine = open_session(config, input)?;

    if options.separate {
        run_separation(&mut engine)?;
    }
    if options.accompany {
        run_accompaniment(&mut engine, options.bpm)?;
    }

    if let Some(gains) = &options.eq {
        if gains.len() != BAND_COUNT {
            return Err(EngineError::invalid_parameter(
                "eq",
                format!("{} values", gains.len()),
                format!("{} comma-separated gains", BAND_COUNT),
            ));
        }
        engine.set_eq_enabled(true);
        for (index, &gain) in gains.iter().enumerate() {
            engine.set_eq_band(index, gain)?;
        }
    }
    if let Some(volume) = options.volume {
        engine.set_volume(volume);
    }
    for name in &options.mute {
        engine.toggle_stem_mute(name)?;
    }
    if let Some(name) = &options.solo {
        engine.toggle_stem_solo(name)?;
    }

    fs::create_dir_all(&output.out)?;
    let path = engine.export_mix(&output.project)?.write_to_dir(&output.out)?;
    report_written(std::slice::from_ref(&path));
    Ok(path)
}

// ============================================================================
// Helpers
// ============================================================================

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn open_session(config: &EngineConfig, input: &Path) -> Result<EngineState> {
    let host = CaptureHost::new(config.live_block_frames);
    let mut engine = EngineState::new(config.clone(), Box::new(host))?;
    let buffer = decode_wav_file(input)?;
    engine.load(&file_name(input), buffer)?;
    info!("Opened {}", input.display());
    Ok(engine)
}

/// Wait for background work, turning the first failure into an error
fn finish(engine: &mut EngineState) -> Result<()> {
    for event in engine.wait_idle(OPERATION_TIMEOUT) {
        match event {
            EngineEvent::SeparationProgress(percent) => info!("Separating: {}%", percent),
            EngineEvent::StemsReady { count } => println!("Separated {} stems", count),
            EngineEvent::TempoReady { bpm } => println!("Tempo: {} BPM", bpm),
            EngineEvent::AccompanimentReady { bpm } => {
                println!("Generated accompaniment at {} BPM", bpm)
            }
            EngineEvent::Failed { error, .. } => return Err(error),
            other => warn!("Unexpected event: {:?}", other),
        }
    }
    Ok(())
}

fn run_separation(engine: &mut EngineState) -> Result<()> {
    engine.start_separation()?;
    finish(engine)
}

fn run_accompaniment(engine: &mut EngineState, bpm: Option<u32>) -> Result<()> {
    match bpm {
        Some(bpm) => engine.set_tempo_override(Some(bpm))?,
        None => {
            engine.start_tempo_analysis()?;
            finish(engine)?;
        }
    }
    engine.start_accompaniment()?;
    finish(engine)
}

fn export_all_stems(engine: &EngineState, output: &OutputArgs) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(&output.out)?;
    let mut written = Vec::new();
    for stem in engine.mixer().stems() {
        let artifact = engine.export_stem(&output.project, &stem.name)?;
        written.push(artifact.write_to_dir(&output.out)?);
    }
    report_written(&written);
    Ok(written)
}

fn report_written(paths: &[PathBuf]) {
    for path in paths {
        println!("Wrote {}", path.display());
    }
}

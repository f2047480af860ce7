//! CLI Module
//!
//! Command-line front end that drives the engine headlessly: validate an
//! upload, estimate tempo, separate, generate accompaniment and export mixes.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::EngineError;

/// Stemdeck - stem mixing and accompaniment engine
#[derive(Parser, Debug)]
#[command(name = "stemdeck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON engine configuration
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Where exports go and how they are named
#[derive(clap::Args, Debug, Clone)]
pub struct OutputArgs {
    /// Directory for exported WAV files
    #[arg(short, long, default_value = ".")]
    pub out: PathBuf,

    /// Project name used as the export file prefix
    #[arg(short, long, default_value = "stemdeck")]
    pub project: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check a file against the upload rules
    #[command(name = "validate")]
    Validate {
        /// File to check
        file: PathBuf,

        /// MIME type to check instead of guessing from the extension
        #[arg(long)]
        mime: Option<String>,
    },

    /// Estimate the tempo of a WAV file
    #[command(name = "tempo")]
    Tempo {
        /// Input WAV file
        input: PathBuf,
    },

    /// Split a WAV file into stems and export each one
    #[command(name = "separate")]
    Separate {
        /// Input WAV file
        input: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Generate drums, bass and guitar for a WAV file
    #[command(name = "accompany")]
    Accompany {
        /// Input WAV file
        input: PathBuf,

        /// Tempo to use instead of estimating it
        #[arg(long)]
        bpm: Option<u32>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Render the full mix to a WAV file
    #[command(name = "mix")]
    Mix {
        /// Input WAV file
        input: PathBuf,

        /// Separate into stems before mixing
        #[arg(long)]
        separate: bool,

        /// Add generated accompaniment
        #[arg(long)]
        accompany: bool,

        /// Tempo for the accompaniment
        #[arg(long)]
        bpm: Option<u32>,

        /// Five equalizer gains in dB, low to high (enables the equalizer)
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        eq: Option<Vec<f32>>,

        /// Master volume, 0.0-1.0
        #[arg(long)]
        volume: Option<f32>,

        /// Stems to mute (repeatable)
        #[arg(long)]
        mute: Vec<String>,

        /// Stem to solo
        #[arg(long)]
        solo: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },
}

/// Mix settings collected from the command line
#[derive(Debug, Clone, Default)]
pub struct MixOptions {
    pub separate: bool,
    pub accompany: bool,
    pub bpm: Option<u32>,
    pub eq: Option<Vec<f32>>,
    pub volume: Option<f32>,
    pub mute: Vec<String>,
    pub solo: Option<String>,
}

/// The message printed when a command fails, followed by recovery hints
pub fn failure_report(error: &EngineError) -> String {
    let mut report = error.friendly_message();
    for hint in error.recovery_suggestions() {
        report.push_str("\n  hint: ");
        report.push_str(hint);
    }
    report
}

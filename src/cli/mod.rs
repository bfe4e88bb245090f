//! CLI Module
//!
//! Command-line front end for offline rendering and catalog inspection.

pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Acoustic Engine - offline spatial audio renderer
#[derive(Parser, Debug)]
#[command(name = "acoustic-engine")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Engine configuration sources shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// JSON engine configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory of scenario preset JSON files
    #[arg(long)]
    pub data_path: Option<PathBuf>,

    /// HRTF dataset JSON file
    #[arg(long)]
    pub hrtf_path: Option<PathBuf>,
}

/// Parameter overrides for a render
#[derive(Args, Debug, Clone, Default)]
pub struct RenderParams {
    /// Scenario preset to apply
    #[arg(short, long)]
    pub scenario: Option<String>,

    /// Scenario intensity 0-1
    #[arg(long, default_value_t = 1.0)]
    pub intensity: f32,

    /// Control expression, e.g. "distance:0.3, warmth:0.5"
    #[arg(short, long)]
    pub expression: Option<String>,

    #[arg(long)]
    pub distance: Option<f32>,

    #[arg(long)]
    pub room_size: Option<f32>,

    #[arg(long)]
    pub brightness: Option<f32>,

    #[arg(long)]
    pub width: Option<f32>,

    #[arg(long)]
    pub dry_wet: Option<f32>,

    /// Overall effect strength 0-1
    #[arg(long)]
    pub effect_intensity: Option<f32>,

    /// Source azimuth in degrees (positive = right)
    #[arg(long, allow_hyphen_values = true)]
    pub azimuth: Option<f32>,

    /// Source elevation in degrees
    #[arg(long, allow_hyphen_values = true, requires = "azimuth")]
    pub elevation: Option<f32>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a WAV file through the engine
    #[command(name = "render")]
    Render {
        /// Input WAV (mono or stereo)
        input: PathBuf,

        /// Output WAV
        output: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        params: RenderParams,

        /// Seconds of silence appended to let the reverb ring out
        #[arg(long, default_value_t = 0.0)]
        tail: f32,

        /// Output bit depth (16, 24 or 32 float)
        #[arg(long, default_value_t = 32)]
        bits: u16,
    },

    /// List the scenario catalog
    #[command(name = "scenarios")]
    Scenarios {
        #[command(flatten)]
        config: ConfigArgs,

        /// Print each preset as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective engine configuration as JSON
    #[command(name = "show-config")]
    ShowConfig {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

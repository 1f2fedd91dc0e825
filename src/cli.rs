use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::PolicyKind;

#[derive(Parser, Debug)]
#[command(name = "leafloops", about = "Spectral leaf loops: analysis, smoothing and state replication")]
pub struct Cli {
    /// Configuration file (defaults to ./leafloops.toml or the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyse a sound file and publish leaf loop state every animation tick
    Simulate {
        /// Analysis sound (overrides [files] analysis_sound)
        #[arg(long)]
        sound: Option<PathBuf>,

        /// Leaf curve files, one or two (overrides [files])
        #[arg(long, num_args = 1..=2)]
        curves: Vec<PathBuf>,

        /// Downbeat timestamps (overrides [files] downbeats)
        #[arg(long)]
        downbeats: Option<PathBuf>,

        /// Destination address, may be a broadcast address
        #[arg(long)]
        destination: Option<String>,

        /// Stop after this many seconds of audio
        #[arg(long)]
        seconds: Option<f32>,

        /// Blend weighting between the two leaf curves
        #[arg(long)]
        weighting: Option<f32>,
    },

    /// Receive replicated state and rebuild the loopers locally
    Render {
        /// UDP port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<f32>,
    },

    /// Resynthesise a sound file through a smoothing policy into a WAV file
    Stretch {
        /// Input audio file (WAV, MP3, FLAC, OGG)
        input: PathBuf,

        /// Output WAV file
        #[arg(short, long, default_value = "stretched.wav")]
        output: PathBuf,

        #[arg(long, value_enum)]
        policy: Option<PolicyKind>,

        /// Leak coefficients, one stretcher each (comma-separated)
        #[arg(long, value_delimiter = ',')]
        leak: Vec<f32>,

        /// Only process the first N seconds
        #[arg(long)]
        seconds: Option<f32>,
    },
}

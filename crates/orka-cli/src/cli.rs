use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "orka", version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Preferred output sample rate in Hz
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Engine config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for persisted volume preferences
    #[arg(long)]
    pub prefs_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a file once on a bus and wait for it to finish
    Play {
        /// Audio file path or http(s) URL
        path: String,

        #[arg(long, default_value = "sfx")]
        bus: String,

        /// Per-instance gain
        #[arg(long, default_value_t = 1.0)]
        volume: f32,

        /// Bus effect: normal, muffled or radio
        #[arg(long, default_value = "normal")]
        effect: String,

        /// Playback-rate multiplier for the bus
        #[arg(long, default_value_t = 1.0)]
        rate: f32,
    },

    /// Loop a file on the music bus
    Music {
        path: String,

        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        seconds: Option<f64>,
    },

    /// Play one track, then crossfade to another
    Crossfade {
        from: String,
        to: String,

        /// Seconds to play `from` before switching
        #[arg(long, default_value_t = 5.0)]
        after: f64,

        /// Crossfade length in seconds
        #[arg(long, default_value_t = 1.0)]
        duration: f64,

        /// Seconds to keep playing `to` after the crossfade
        #[arg(long, default_value_t = 5.0)]
        hold: f64,
    },

    /// Play a file and print the bus spectrum as text bars
    Spectrum {
        path: String,

        #[arg(long, default_value = "sfx")]
        bus: String,

        /// Number of bars per line
        #[arg(long, default_value_t = 32)]
        bars: usize,
    },

    /// Set a stored bus volume (persisted) and print the engine status
    Volume {
        bus: String,
        value: f32,
    },

    /// Print the engine status as JSON
    Status,
}

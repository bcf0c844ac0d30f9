//! `orka`: drive the audio engine against a real output device.
//!
//! Loads one or two assets, plays them through the bus graph and keeps ticking
//! the engine at display rate so fades, crossfades and finished sounds are
//! handled exactly as they are inside a game loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::Parser;
use orka_cli::{cli, runtime};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,orka_audio=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_signal = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        stop_for_signal.store(true, Ordering::Relaxed);
    }) {
        tracing::warn!("failed to install Ctrl-C handler: {e}");
    }

    runtime::run(&args, stop)
}

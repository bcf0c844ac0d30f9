//! Command runners for the `orka` binary.
//!
//! Every command builds an [`AudioEngine`] on the selected output device, then
//! pumps [`AudioEngine::tick`] at display rate until the command is done or
//! Ctrl-C is pressed.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use orka_audio::{
    AudioEngine, CpalBackend, EngineConfig, FileStore, Gesture, MusicOptions, PlayOptions,
    UnlockState, device,
};

use crate::cli::{Args, Command};

const FRAME: Duration = Duration::from_millis(16);
const SPECTRUM_INTERVAL: Duration = Duration::from_millis(100);
const BAR_GLYPHS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Engine config from `--config` with command-line overrides applied.
pub fn resolve_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if args.device.is_some() {
        config.device = args.device.clone();
    }
    if args.sample_rate.is_some() {
        config.sample_rate = args.sample_rate;
    }
    if args.prefs_dir.is_some() {
        config.preferences_dir = args.prefs_dir.clone();
    }
    Ok(config.sanitized())
}

/// Engine on the configured device with file-backed preferences, initialized.
pub fn build_engine(config: EngineConfig) -> Result<AudioEngine> {
    let prefs_dir = config
        .preferences_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(".orka"));
    let backend = CpalBackend::new(config.device.clone(), config.sample_rate);
    let mut engine = AudioEngine::new(config, Box::new(backend), Box::new(FileStore::new(prefs_dir)));
    engine.init()?;
    // Launching the command is the user's gesture.
    if engine.unlock_state() == UnlockState::Locked {
        engine.handle_gesture(Gesture::Key);
    }
    Ok(engine)
}

pub fn run(args: &Args, stop: Arc<AtomicBool>) -> Result<()> {
    let Some(cmd) = &args.cmd else {
        return Err(anyhow!("no command given (try --help)"));
    };
    let mut engine = build_engine(resolve_config(args)?)?;

    match cmd {
        Command::Play {
            path,
            bus,
            volume,
            effect,
            rate,
        } => {
            load(&mut engine, "clip", path)?;
            engine.create_bus(bus);
            engine.set_effect(effect.as_str(), bus);
            engine.set_playback_rate(bus, *rate);
            let id = engine
                .play("clip", bus, PlayOptions::default().with_volume(*volume))
                .ok_or_else(|| anyhow!("playback did not start"))?;
            tracing::info!(id = %id, bus = %bus, "playing");
            pump(&mut engine, &stop, None, |e| e.instance(id).is_none());
        }
        Command::Music { path, seconds } => {
            load(&mut engine, "music", path)?;
            engine
                .play_music("music", PlayOptions::default())
                .ok_or_else(|| anyhow!("music did not start"))?;
            let deadline = seconds.map(|s| Instant::now() + Duration::from_secs_f64(s.max(0.0)));
            pump(&mut engine, &stop, deadline, |_| false);
        }
        Command::Crossfade {
            from,
            to,
            after,
            duration,
            hold,
        } => {
            let results = engine.load_all([("from", from.as_str()), ("to", to.as_str())]);
            if results.values().any(|ok| !ok) {
                return Err(anyhow!("failed to load one of the tracks"));
            }
            engine.play_music("from", PlayOptions::default());
            pump(&mut engine, &stop, Some(after_secs(*after)), |_| false);
            if stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            engine.switch_music(
                "to",
                MusicOptions {
                    duration: Some(*duration),
                    volume: None,
                },
            );
            pump(&mut engine, &stop, Some(after_secs(duration + hold)), |_| false);
        }
        Command::Spectrum { path, bus, bars } => {
            load(&mut engine, "clip", path)?;
            let id = engine
                .play("clip", bus, PlayOptions::default())
                .ok_or_else(|| anyhow!("playback did not start"))?;
            let mut next_print = Instant::now();
            let bus = bus.clone();
            let bars = (*bars).max(1);
            pump(&mut engine, &stop, None, |e| {
                if Instant::now() >= next_print {
                    next_print += SPECTRUM_INTERVAL;
                    if let Some(data) = e.get_frequency_data(&bus) {
                        println!("{}", render_bars(&data, bars));
                    }
                }
                e.instance(id).is_none()
            });
        }
        Command::Volume { bus, value } => {
            engine.set_volume(bus, *value);
            print_status(&engine)?;
        }
        Command::Status => print_status(&engine)?,
    }
    engine.stop_all(None);
    Ok(())
}

fn load(engine: &mut AudioEngine, key: &str, path: &str) -> Result<()> {
    if engine.load(key, path) {
        Ok(())
    } else {
        Err(anyhow!("failed to load {path}"))
    }
}

fn after_secs(secs: f64) -> Instant {
    Instant::now() + Duration::from_secs_f64(secs.max(0.0))
}

fn print_status(engine: &AudioEngine) -> Result<()> {
    let json = serde_json::to_string_pretty(&engine.status()).context("encode status")?;
    println!("{json}");
    Ok(())
}

/// Tick the engine every frame until `done`, the deadline or Ctrl-C.
fn pump(
    engine: &mut AudioEngine,
    stop: &AtomicBool,
    deadline: Option<Instant>,
    mut done: impl FnMut(&mut AudioEngine) -> bool,
) {
    loop {
        engine.tick();
        if stop.load(Ordering::Relaxed)
            || deadline.is_some_and(|d| Instant::now() >= d)
            || done(engine)
        {
            break;
        }
        std::thread::sleep(FRAME);
    }
}

/// Fold spectrum bytes into `bars` columns of block glyphs.
pub fn render_bars(data: &[u8], bars: usize) -> String {
    if data.is_empty() || bars == 0 {
        return String::new();
    }
    let per_bar = data.len().div_ceil(bars);
    data.chunks(per_bar)
        .map(|chunk| {
            let peak = chunk.iter().copied().max().unwrap_or(0) as usize;
            BAR_GLYPHS[peak * (BAR_GLYPHS.len() - 1) / 255]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn render_bars_scales_peaks() {
        assert_eq!(render_bars(&[0, 0, 255, 255], 2), " █");
        assert_eq!(render_bars(&[], 4), "");
        assert_eq!(render_bars(&[128; 8], 8).chars().count(), 8);
    }

    #[test]
    fn args_override_config_defaults() {
        let args = Args::parse_from([
            "orka",
            "--device",
            "USB",
            "--sample-rate",
            "44100",
            "--prefs-dir",
            "/tmp/orka",
            "status",
        ]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.device.as_deref(), Some("USB"));
        assert_eq!(config.sample_rate, Some(44_100));
        assert_eq!(config.preferences_dir, Some(PathBuf::from("/tmp/orka")));
        assert_eq!(config.render_quantum, 128);
    }

    #[test]
    fn play_command_parses_options() {
        let args = Args::parse_from(["orka", "play", "beep.wav", "--effect", "radio", "--rate", "0.5"]);
        match args.cmd {
            Some(Command::Play {
                path, effect, rate, bus, ..
            }) => {
                assert_eq!(path, "beep.wav");
                assert_eq!(effect, "radio");
                assert_eq!(bus, "sfx");
                assert!((rate - 0.5).abs() < 1e-6);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

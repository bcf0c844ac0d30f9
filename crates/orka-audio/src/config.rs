//! Engine tuning parameters.
//!
//! Every field has a default so an empty TOML file (or no file at all) yields a
//! working engine.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Tunables shared by the mixer, transport and persistence layers.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output device substring (case-insensitive); `None` picks the host default.
    pub device: Option<String>,
    /// Preferred output sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Frames rendered per mixer block.
    pub render_quantum: usize,
    /// Write volume preferences on every change.
    pub persist_volumes: bool,
    /// Storage key holding the JSON volume map.
    pub storage_key: String,
    /// Directory used by the file-backed preference store.
    pub preferences_dir: Option<PathBuf>,
    /// Time constant (seconds) for volume changes.
    pub volume_time_constant: f64,
    /// Time constant (seconds) for effect and playback-rate changes.
    pub effect_time_constant: f64,
    /// Default crossfade duration (seconds).
    pub crossfade_secs: f64,
    /// Extra time (seconds) the outgoing music keeps running after its fade.
    pub crossfade_tail_secs: f64,
    /// Playback rate the outgoing music bends down to during a crossfade.
    pub pitch_bend_floor: f32,
    /// Analyser FFT size (power of two).
    pub analyser_fft_size: usize,
    /// Analyser temporal smoothing in `[0, 1)`.
    pub analyser_smoothing: f32,
    /// Default distance at which followed sounds become silent.
    pub follow_max_distance: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: None,
            render_quantum: 128,
            persist_volumes: true,
            storage_key: "orka_audio_volumes".to_string(),
            preferences_dir: None,
            volume_time_constant: 0.05,
            effect_time_constant: 0.1,
            crossfade_secs: 1.0,
            crossfade_tail_secs: 0.1,
            pitch_bend_floor: 0.1,
            analyser_fft_size: 256,
            analyser_smoothing: 0.8,
            follow_max_distance: 1000.0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    /// Parse configuration from TOML text.
    pub fn parse(raw: &str) -> Result<Self> {
        let cfg = toml::from_str::<EngineConfig>(raw)?;
        Ok(cfg.sanitized())
    }

    /// Clamp values that would break the mixer into usable ranges.
    pub fn sanitized(mut self) -> Self {
        self.render_quantum = self.render_quantum.clamp(16, 4096);
        self.analyser_fft_size = self.analyser_fft_size.clamp(32, 32_768).next_power_of_two();
        if !self.analyser_smoothing.is_finite() {
            self.analyser_smoothing = 0.8;
        }
        self.analyser_smoothing = self.analyser_smoothing.clamp(0.0, 0.99);
        if !(self.volume_time_constant > 0.0) {
            self.volume_time_constant = 0.05;
        }
        if !(self.effect_time_constant > 0.0) {
            self.effect_time_constant = 0.1;
        }
        if !(self.crossfade_secs >= 0.0) {
            self.crossfade_secs = 1.0;
        }
        if !(self.crossfade_tail_secs >= 0.0) {
            self.crossfade_tail_secs = 0.1;
        }
        self.device = self.device.and_then(|name| {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = EngineConfig::parse("").unwrap();
        assert_eq!(cfg.render_quantum, 128);
        assert_eq!(cfg.storage_key, "orka_audio_volumes");
        assert!(cfg.persist_volumes);
        assert!((cfg.crossfade_secs - 1.0).abs() < 1e-9);
    }

    #[test]
    fn parse_overrides_fields() {
        let cfg = EngineConfig::parse(
            r#"
            device = "USB"
            sample_rate = 44100
            persist_volumes = false
            crossfade_secs = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.device.as_deref(), Some("USB"));
        assert_eq!(cfg.sample_rate, Some(44_100));
        assert!(!cfg.persist_volumes);
        assert!((cfg.crossfade_secs - 2.5).abs() < 1e-9);
    }

    #[test]
    fn sanitized_clamps_bad_values() {
        let cfg = EngineConfig {
            render_quantum: 0,
            analyser_fft_size: 300,
            analyser_smoothing: 4.0,
            volume_time_constant: -1.0,
            device: Some("   ".to_string()),
            ..EngineConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.render_quantum, 16);
        assert_eq!(cfg.analyser_fft_size, 512);
        assert!(cfg.analyser_smoothing < 1.0);
        assert!((cfg.volume_time_constant - 0.05).abs() < 1e-9);
        assert!(cfg.device.is_none());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/orka.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("read config"));
    }
}

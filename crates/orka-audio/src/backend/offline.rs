//! Deterministic backend that renders only when asked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, bail};
use orka_audio_types::ContextState;

use super::{OutputBackend, OutputInfo};
use crate::mixer::{SharedMixer, lock_mixer};

#[derive(Debug)]
struct Shared {
    sample_rate: u32,
    channels: usize,
    mixer: Mutex<Option<SharedMixer>>,
    running: AtomicBool,
    closed: AtomicBool,
    activation_required: bool,
    activated: AtomicBool,
}

/// Backend with no device. Audio is pulled through the paired [`OfflineDriver`].
#[derive(Debug)]
pub struct OfflineBackend {
    shared: Arc<Shared>,
}

/// Test/headless handle that advances the clock of an [`OfflineBackend`].
#[derive(Clone, Debug)]
pub struct OfflineDriver {
    shared: Arc<Shared>,
}

impl OfflineBackend {
    /// Backend that resumes whenever asked.
    pub fn new(sample_rate: u32, channels: usize) -> (Self, OfflineDriver) {
        Self::build(sample_rate, channels, false)
    }

    /// Backend that refuses to resume until [`OfflineDriver::grant_activation`].
    pub fn with_autoplay_policy(sample_rate: u32, channels: usize) -> (Self, OfflineDriver) {
        Self::build(sample_rate, channels, true)
    }

    fn build(sample_rate: u32, channels: usize, activation_required: bool) -> (Self, OfflineDriver) {
        let shared = Arc::new(Shared {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            mixer: Mutex::new(None),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            activation_required,
            activated: AtomicBool::new(false),
        });
        (
            Self {
                shared: shared.clone(),
            },
            OfflineDriver { shared },
        )
    }
}

impl OutputBackend for OfflineBackend {
    fn open(&mut self) -> Result<OutputInfo> {
        if self.shared.closed.load(Ordering::Relaxed) {
            bail!("offline output closed");
        }
        Ok(OutputInfo {
            sample_rate: self.shared.sample_rate,
            channels: self.shared.channels,
            device: Some("offline".to_string()),
        })
    }

    fn connect(&mut self, mixer: SharedMixer) -> Result<()> {
        *self
            .shared
            .mixer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(mixer);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Relaxed) {
            bail!("offline output closed");
        }
        if shared.activation_required && !shared.activated.load(Ordering::Relaxed) {
            bail!("playback requires a user activation");
        }
        shared.running.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn state(&self) -> ContextState {
        if self.shared.closed.load(Ordering::Relaxed) {
            ContextState::Closed
        } else if self.shared.running.load(Ordering::Relaxed) {
            ContextState::Running
        } else {
            ContextState::Suspended
        }
    }
}

impl OfflineDriver {
    /// Mark that the user interacted; later resumes succeed.
    pub fn grant_activation(&self) {
        self.shared.activated.store(true, Ordering::Relaxed);
    }

    /// Permanently close the output; opening or resuming fails afterwards.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Relaxed);
        self.shared.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    /// Render `frames` interleaved frames. While suspended (or before a mixer is
    /// connected) the result is silence and the context clock does not move.
    pub fn render_frames(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * self.shared.channels];
        if !self.is_running() {
            return out;
        }
        let mixer = self
            .shared
            .mixer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(mixer) = mixer {
            lock_mixer(&mixer).render(&mut out);
        }
        out
    }

    pub fn render_secs(&self, secs: f64) -> Vec<f32> {
        let frames = (secs.max(0.0) * self.shared.sample_rate as f64).round() as usize;
        self.render_frames(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::{Mixer, MixerSpec};

    fn shared_mixer(rate: u32) -> SharedMixer {
        let (tx, _rx) = crossbeam_channel::unbounded();
        Arc::new(Mutex::new(Mixer::new(
            MixerSpec {
                sample_rate: rate,
                channels: 1,
                quantum: 64,
                fft_size: 64,
                smoothing: 0.0,
            },
            tx,
        )))
    }

    #[test]
    fn suspended_backend_does_not_advance_clock() {
        let (mut backend, driver) = OfflineBackend::new(8_000, 1);
        let mixer = shared_mixer(8_000);
        backend.open().unwrap();
        backend.connect(mixer.clone()).unwrap();
        assert_eq!(backend.state(), ContextState::Suspended);

        driver.render_secs(0.5);
        assert_eq!(lock_mixer(&mixer).current_time(), 0.0);

        backend.resume().unwrap();
        driver.render_secs(0.5);
        assert!((lock_mixer(&mixer).current_time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn autoplay_policy_blocks_until_activation() {
        let (mut backend, driver) = OfflineBackend::with_autoplay_policy(8_000, 2);
        assert!(backend.resume().is_err());
        assert_eq!(backend.state(), ContextState::Suspended);
        driver.grant_activation();
        backend.resume().unwrap();
        assert_eq!(backend.state(), ContextState::Running);
    }

    #[test]
    fn closed_backend_reports_closed() {
        let (mut backend, driver) = OfflineBackend::new(8_000, 1);
        driver.close();
        assert_eq!(backend.state(), ContextState::Closed);
        assert!(backend.open().is_err());
        assert!(backend.resume().is_err());
    }
}

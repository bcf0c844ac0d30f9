//! The engine service object.
//!
//! [`AudioEngine`] owns the buffer store, the bus graph (inside the shared
//! [`Mixer`]), the active-instance arena and the persisted volume preferences.
//! It is constructed once and passed by reference to every caller.
//!
//! All control happens on the caller's thread, apart from background loads
//! (see `load_async`); the output backend only pulls samples from the mixer. Parameter changes follow "cancel, anchor, ramp" so a
//! new directive always supersedes the previous one on the same control.

mod loading;
mod mixing;
mod transport;


use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use orka_audio_types::{
    BusStatus, ContextState, EndReason, EngineStatus, InstanceStatus, UnlockState,
};

use crate::backend::{OutputBackend, OutputInfo};
use crate::buffer::BufferStore;
use crate::config::EngineConfig;
use crate::frame::{FrameScheduler, TaskHandle};
use crate::mixer::{InstanceId, Mixer, MixerSpec, SharedMixer, lock_mixer};
use crate::prefs::{PreferenceStore, VolumePreferences};
use crate::unlock::{Gesture, Unlock};

use loading::FinishedLoad;

pub use loading::PendingLoad;
pub use transport::{FadeTarget, MusicOptions, PlayOptions};

pub const MASTER: &str = "master";
pub const SFX_BUS: &str = "sfx";
pub const MUSIC_BUS: &str = "music";

/// Bookkeeping for one sound in flight.
#[derive(Clone, Debug)]
pub struct PlaybackInstance {
    id: InstanceId,
    key: String,
    bus: String,
    looping: bool,
    follow: Option<TaskHandle>,
}

impl PlaybackInstance {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Buffer key this instance plays.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Bus the instance is routed to (after any fallback).
    pub fn bus(&self) -> &str {
        &self.bus
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn follow_task(&self) -> Option<TaskHandle> {
        self.follow
    }
}

/// Output side created by [`AudioEngine::init`].
struct OutputContext {
    mixer: SharedMixer,
    ended_rx: Receiver<InstanceId>,
    info: OutputInfo,
}

pub struct AudioEngine {
    config: EngineConfig,
    backend: Box<dyn OutputBackend>,
    store: Box<dyn PreferenceStore>,
    persist: bool,
    volumes: VolumePreferences,
    rates: HashMap<String, f32>,
    buffers: BufferStore,
    loaded_tx: Sender<FinishedLoad>,
    loaded_rx: Receiver<FinishedLoad>,
    ctx: Option<OutputContext>,
    instances: BTreeMap<InstanceId, PlaybackInstance>,
    current_music: Option<InstanceId>,
    next_id: u64,
    frames: FrameScheduler,
    unlock: Unlock,
}

impl AudioEngine {
    pub fn new(
        config: EngineConfig,
        backend: Box<dyn OutputBackend>,
        store: Box<dyn PreferenceStore>,
    ) -> Self {
        let config = config.sanitized();
        let (loaded_tx, loaded_rx) = crossbeam_channel::unbounded();
        Self {
            persist: config.persist_volumes,
            config,
            backend,
            store,
            volumes: VolumePreferences::default(),
            rates: HashMap::new(),
            buffers: BufferStore::new(),
            loaded_tx,
            loaded_rx,
            ctx: None,
            instances: BTreeMap::new(),
            current_music: None,
            next_id: 0,
            frames: FrameScheduler::new(),
            unlock: Unlock::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.ctx.is_some()
    }

    /// Open the output, restore volumes and build master + default buses.
    ///
    /// Calling it again after a successful init does nothing.
    pub fn init(&mut self) -> Result<()> {
        if self.ctx.is_some() {
            return Ok(());
        }

        self.restore_volumes();

        let info = self.backend.open().context("open audio output")?;
        let (ended_tx, ended_rx) = crossbeam_channel::unbounded();
        let mut mixer = Mixer::new(
            MixerSpec {
                sample_rate: info.sample_rate,
                channels: info.channels,
                quantum: self.config.render_quantum,
                fft_size: self.config.analyser_fft_size,
                smoothing: self.config.analyser_smoothing,
            },
            ended_tx,
        );
        mixer.master.set_value(self.get_volume(MASTER));
        let mixer: SharedMixer = std::sync::Arc::new(std::sync::Mutex::new(mixer));
        self.backend
            .connect(mixer.clone())
            .context("connect mixer to output")?;

        tracing::info!(
            device = info.device.as_deref().unwrap_or("<default>"),
            rate = info.sample_rate,
            channels = info.channels,
            "audio engine initialized"
        );
        self.ctx = Some(OutputContext {
            mixer,
            ended_rx,
            info,
        });

        self.create_bus(SFX_BUS);
        self.create_bus(MUSIC_BUS);

        let resumed = match self.backend.resume() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("output stays suspended until a user gesture: {e:#}");
                false
            }
        };
        self.unlock = Unlock::after_init(resumed);
        Ok(())
    }

    fn restore_volumes(&mut self) {
        match self.store.load(&self.config.storage_key) {
            Ok(Some(raw)) => {
                if let Err(e) = self.volumes.merge_saved(&raw) {
                    tracing::warn!("ignoring saved volumes: {e:#}");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("failed to read saved volumes: {e:#}"),
        }
    }

    /// Add a bus routed to master. No-op before init or if the name exists.
    pub fn create_bus(&mut self, name: &str) -> bool {
        let Some(mixer) = self.shared_mixer() else {
            tracing::debug!(bus = name, "create_bus before init ignored");
            return false;
        };
        if name == MASTER {
            return false;
        }
        let gain = self.volumes.get(name).unwrap_or(1.0);
        let created = lock_mixer(&mixer).add_bus(name, gain);
        if created {
            self.rates.entry(name.to_string()).or_insert(1.0);
            tracing::debug!(bus = name, gain, "bus created");
        }
        created
    }

    /// Call once per display frame: stores finished background loads, reaps
    /// finished sounds, then runs frame tasks.
    pub fn tick(&mut self) {
        self.poll_loads();
        self.poll_finished();
        let Some(mixer) = self.shared_mixer() else {
            return;
        };
        if self.frames.is_empty() {
            return;
        }
        let mut m = lock_mixer(&mixer);
        let now = m.current_time();
        self.frames.run(&mut m, now);
    }

    /// Tear down instances whose voices ended on their own.
    pub fn poll_finished(&mut self) -> Vec<InstanceId> {
        let Some(ctx) = &self.ctx else {
            return Vec::new();
        };
        let ended: Vec<InstanceId> = ctx.ended_rx.try_iter().collect();
        ended
            .into_iter()
            .filter(|id| self.teardown(*id, EndReason::Ended).is_some())
            .collect()
    }

    /// Remove an instance from the active set and cancel its follow task.
    ///
    /// Returns `None` if it was already gone, so each instance is torn down once.
    fn teardown(&mut self, id: InstanceId, reason: EndReason) -> Option<PlaybackInstance> {
        let instance = self.instances.remove(&id)?;
        if let Some(task) = instance.follow {
            self.frames.cancel(task);
        }
        if self.current_music == Some(id) {
            self.current_music = None;
        }
        tracing::debug!(id = %id, key = %instance.key, ?reason, "instance finished");
        Some(instance)
    }

    fn ensure_init(&mut self) {
        if let Err(e) = self.init() {
            tracing::warn!("audio init failed: {e:#}");
        }
    }

    /// Feed a user gesture to the unlock state machine.
    pub fn handle_gesture(&mut self, gesture: Gesture) -> bool {
        if self.ctx.is_none() {
            return false;
        }
        let backend = &mut self.backend;
        self.unlock.on_gesture(gesture, || backend.resume())
    }

    pub fn unlock_state(&self) -> UnlockState {
        self.unlock.state()
    }

    pub fn context_state(&self) -> ContextState {
        self.backend.state()
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.ctx.as_ref().map(|c| c.info.sample_rate)
    }

    /// Context clock in seconds (0 before init).
    pub fn current_time(&self) -> f64 {
        self.shared_mixer()
            .map(|m| lock_mixer(&m).current_time())
            .unwrap_or(0.0)
    }

    pub fn instance(&self, id: InstanceId) -> Option<&PlaybackInstance> {
        self.instances.get(&id)
    }

    pub fn active_instances(&self) -> Vec<InstanceId> {
        self.instances.keys().copied().collect()
    }

    pub fn current_music(&self) -> Option<InstanceId> {
        self.current_music
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.buffers.contains(key)
    }

    pub fn has_bus(&self, name: &str) -> bool {
        self.shared_mixer()
            .is_some_and(|m| lock_mixer(&m).bus_index(name).is_some())
    }

    pub fn bus_names(&self) -> Vec<String> {
        self.shared_mixer()
            .map(|m| {
                lock_mixer(&m)
                    .buses()
                    .iter()
                    .map(|b| b.name().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current gain of a bus (or `master`), including in-flight automation.
    pub fn bus_gain(&self, bus: &str) -> Option<f32> {
        let mixer = self.shared_mixer()?;
        let m = lock_mixer(&mixer);
        let now = m.current_time();
        if bus == MASTER {
            return Some(m.master.value_at(now));
        }
        m.bus(bus).map(|b| b.gain.value_at(now))
    }

    /// Audible gain of an instance: its fade gain times any follow attenuation.
    pub fn instance_gain(&self, id: InstanceId) -> Option<f32> {
        let mixer = self.shared_mixer()?;
        let m = lock_mixer(&mixer);
        let now = m.current_time();
        m.voice(id).map(|v| v.effective_gain(now))
    }

    pub fn instance_playback_rate(&self, id: InstanceId) -> Option<f32> {
        let mixer = self.shared_mixer()?;
        let m = lock_mixer(&mixer);
        let now = m.current_time();
        m.voice(id).map(|v| v.playback_rate.value_at(now))
    }

    /// Snapshot for status displays and logs.
    pub fn status(&self) -> EngineStatus {
        let mut status = EngineStatus {
            initialized: self.ctx.is_some(),
            context_state: self.context_state(),
            unlock_state: self.unlock_state(),
            sample_rate: self.sample_rate(),
            master_volume: self.get_volume(MASTER),
            current_music: self.current_music.map(|id| id.0),
            loaded: self.buffers.keys(),
            ..EngineStatus::default()
        };
        let Some(mixer) = self.shared_mixer() else {
            return status;
        };
        let m = lock_mixer(&mixer);
        let now = m.current_time();
        status.current_time = now;
        status.buses = m
            .buses()
            .iter()
            .map(|b| BusStatus {
                name: b.name().to_string(),
                volume: self.get_volume(b.name()),
                gain: b.gain.value_at(now),
                effect: b.effect(),
                playback_rate: self.rates.get(b.name()).copied().unwrap_or(1.0),
            })
            .collect();
        status.instances = self
            .instances
            .values()
            .map(|inst| {
                let voice = m.voice(inst.id);
                InstanceStatus {
                    id: inst.id.0,
                    key: inst.key.clone(),
                    bus: inst.bus.clone(),
                    looping: inst.looping,
                    gain: voice.map(|v| v.effective_gain(now)).unwrap_or(0.0),
                    playback_rate: voice.map(|v| v.playback_rate.value_at(now)).unwrap_or(0.0),
                    following: inst.follow.is_some(),
                }
            })
            .collect();
        status
    }

    fn shared_mixer(&self) -> Option<SharedMixer> {
        self.ctx.as_ref().map(|c| c.mixer.clone())
    }
}

//! Playback, stop, fades, the music crossfade and spatial follow.

use orka_audio_types::EndReason;

use super::{AudioEngine, MASTER, MUSIC_BUS, PlaybackInstance, SFX_BUS};
use crate::mixer::{InstanceId, lock_mixer};
use crate::param::AudioParam;
use crate::spatial::{PositionSource, follow_task};

/// Options for [`AudioEngine::play`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlayOptions {
    pub looping: bool,
    /// Initial per-instance gain; `None` means 1.0 (or the music volume when a
    /// music change turns into a crossfade).
    pub volume: Option<f32>,
}

impl PlayOptions {
    pub fn looped() -> Self {
        Self {
            looping: true,
            volume: None,
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }
}

/// Options for [`AudioEngine::switch_music`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MusicOptions {
    /// Crossfade length in seconds; defaults to the configured crossfade.
    pub duration: Option<f64>,
    /// Target gain of the incoming track; defaults to the stored music volume.
    pub volume: Option<f32>,
}

/// What a fade acts on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FadeTarget {
    /// `master` or a bus name.
    Bus(String),
    Instance(InstanceId),
}

impl From<&str> for FadeTarget {
    fn from(name: &str) -> Self {
        FadeTarget::Bus(name.to_string())
    }
}

impl From<String> for FadeTarget {
    fn from(name: String) -> Self {
        FadeTarget::Bus(name)
    }
}

impl From<InstanceId> for FadeTarget {
    fn from(id: InstanceId) -> Self {
        FadeTarget::Instance(id)
    }
}

/// Cancel pending automation, hold the current value at `now`, then ramp.
fn ramp_from_now(param: &mut AudioParam, value: f32, now: f64, duration: f64) {
    param.cancel_and_hold_at_time(now);
    param.linear_ramp_to_value_at_time(value, now + duration);
}

fn sanitize_gain(value: f32) -> f32 {
    if value.is_finite() { value.max(0.0) } else { 1.0 }
}

impl AudioEngine {
    /// Start `key` on `bus` (falling back to `sfx` for unknown buses).
    ///
    /// Returns `None` before init or when `key` has no buffer.
    pub fn play(&mut self, key: &str, bus: &str, options: PlayOptions) -> Option<InstanceId> {
        let Some(mixer) = self.shared_mixer() else {
            tracing::debug!(key, "play before init ignored");
            return None;
        };
        let Some(buffer) = self.buffers.get(key) else {
            tracing::debug!(key, "play of unloaded buffer ignored");
            return None;
        };

        let mut m = lock_mixer(&mixer);
        let (bus_idx, bus_name) = match m.bus_index(bus) {
            Some(idx) => (idx, bus),
            None => {
                tracing::debug!(bus, "unknown bus, routing to sfx");
                (m.bus_index(SFX_BUS)?, SFX_BUS)
            }
        };
        let rate = self.rates.get(bus_name).copied().unwrap_or(1.0);
        let gain = sanitize_gain(options.volume.unwrap_or(1.0));

        self.next_id += 1;
        let id = InstanceId(self.next_id);
        m.start_voice(id, bus_idx, buffer, options.looping, gain, rate);
        drop(m);

        self.instances.insert(
            id,
            PlaybackInstance {
                id,
                key: key.to_string(),
                bus: bus_name.to_string(),
                looping: options.looping,
                follow: None,
            },
        );
        tracing::debug!(id = %id, key, bus = bus_name, looping = options.looping, "instance started");
        Some(id)
    }

    /// One-shot on the `sfx` bus; looping is always off.
    pub fn play_sfx(&mut self, key: &str, options: PlayOptions) -> Option<InstanceId> {
        self.play(
            key,
            SFX_BUS,
            PlayOptions {
                looping: false,
                ..options
            },
        )
    }

    /// Looping track on the `music` bus.
    ///
    /// The same key as the current music is a no-op returning the existing
    /// handle; a different key crossfades via [`AudioEngine::switch_music`].
    pub fn play_music(&mut self, key: &str, options: PlayOptions) -> Option<InstanceId> {
        let current = self
            .current_music
            .and_then(|id| self.instances.get(&id))
            .map(|inst| (inst.id, inst.key == key));
        if let Some((current, same_key)) = current {
            if same_key {
                return Some(current);
            }
            return self.switch_music(
                key,
                MusicOptions {
                    duration: None,
                    volume: options.volume,
                },
            );
        }

        let id = self.play(
            key,
            MUSIC_BUS,
            PlayOptions {
                looping: true,
                ..options
            },
        )?;
        self.current_music = Some(id);
        Some(id)
    }

    /// Stop immediately. Returns `false` if the instance was already gone.
    pub fn stop(&mut self, id: InstanceId) -> bool {
        if self.teardown(id, EndReason::Stopped).is_none() {
            return false;
        }
        if let Some(mixer) = self.shared_mixer() {
            lock_mixer(&mixer).remove_voice(id);
        }
        true
    }

    /// Stop every active instance, or only those on `bus`.
    pub fn stop_all(&mut self, bus: Option<&str>) -> usize {
        let ids: Vec<InstanceId> = self
            .instances
            .values()
            .filter(|inst| bus.is_none_or(|b| inst.bus == b))
            .map(|inst| inst.id)
            .collect();
        ids.into_iter().filter(|id| self.stop(*id)).count()
    }

    /// Linear fade of a bus, `master` or an instance to `volume` over `duration`.
    ///
    /// Returns `false` when the target cannot be resolved.
    pub fn fade(&mut self, target: impl Into<FadeTarget>, volume: f32, duration: f64) -> bool {
        let Some(mixer) = self.shared_mixer() else {
            return false;
        };
        let volume = sanitize_gain(volume);
        let duration = duration.max(0.0);
        let mut m = lock_mixer(&mixer);
        let now = m.current_time();

        let target = target.into();
        let param = match &target {
            FadeTarget::Bus(name) if name == MASTER => Some(&mut m.master),
            FadeTarget::Bus(name) => m.bus_mut(name).map(|b| &mut b.gain),
            FadeTarget::Instance(id) if self.instances.contains_key(id) => {
                m.voice_mut(*id).map(|v| &mut v.gain)
            }
            FadeTarget::Instance(_) => None,
        };
        let Some(param) = param else {
            tracing::debug!(?target, "fade target not found");
            return false;
        };
        ramp_from_now(param, volume, now, duration);
        true
    }

    /// Bus-only alias of [`AudioEngine::fade`].
    pub fn fade_all(&mut self, bus: &str, volume: f32, duration: f64) -> bool {
        self.fade(FadeTarget::Bus(bus.to_string()), volume, duration)
    }

    /// Crossfade from the current music to `key`.
    ///
    /// The outgoing track slows down and fades out together, then stops after a
    /// short tail; the incoming track loops and fades in. The new instance
    /// becomes current music immediately.
    pub fn switch_music(&mut self, key: &str, options: MusicOptions) -> Option<InstanceId> {
        let mixer = self.shared_mixer()?;
        if !self.buffers.contains(key) {
            tracing::debug!(key, "switch_music to unloaded buffer ignored");
            return None;
        }
        let duration = options
            .duration
            .filter(|d| d.is_finite())
            .unwrap_or(self.config.crossfade_secs)
            .max(0.0);
        let target = sanitize_gain(options.volume.unwrap_or_else(|| self.get_volume(MUSIC_BUS)));

        if let Some(old) = self.current_music {
            let mut m = lock_mixer(&mixer);
            let now = m.current_time();
            if let Some(voice) = m.voice_mut(old) {
                ramp_from_now(&mut voice.playback_rate, self.config.pitch_bend_floor, now, duration);
                ramp_from_now(&mut voice.gain, 0.0, now, duration);
                voice.stop_at(now + duration + self.config.crossfade_tail_secs);
            }
        }

        let id = self.play(key, MUSIC_BUS, PlayOptions::looped().with_volume(0.0))?;
        {
            let mut m = lock_mixer(&mixer);
            let now = m.current_time();
            if let Some(voice) = m.voice_mut(id) {
                ramp_from_now(&mut voice.gain, target, now, duration);
            }
        }
        tracing::info!(key, id = %id, duration, "music crossfade");
        self.current_music = Some(id);
        Some(id)
    }

    /// Attenuate `id` by its distance between two positions, re-evaluated every
    /// [`AudioEngine::tick`]. Replaces an existing follow on the same instance.
    pub fn set_follow(
        &mut self,
        id: InstanceId,
        source: impl PositionSource + 'static,
        listener: impl PositionSource + 'static,
        max_distance: Option<f32>,
    ) -> bool {
        let Some(instance) = self.instances.get_mut(&id) else {
            return false;
        };
        if let Some(previous) = instance.follow.take() {
            self.frames.cancel(previous);
        }
        let task = follow_task(
            id,
            Box::new(source),
            Box::new(listener),
            max_distance.unwrap_or(self.config.follow_max_distance),
            self.config.volume_time_constant,
        );
        instance.follow = Some(self.frames.schedule(task));
        true
    }
}

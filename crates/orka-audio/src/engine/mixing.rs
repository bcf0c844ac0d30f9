//! Volumes, bus effects, playback rates and spectrum taps.

use orka_audio_types::Effect;

use super::{AudioEngine, MASTER};
use crate::mixer::lock_mixer;

impl AudioEngine {
    /// Store a bus (or `master`) volume and glide the live gain towards it.
    ///
    /// Unknown buses only update the preference, which seeds the bus if it is
    /// created later.
    pub fn set_volume(&mut self, bus: &str, value: f32) {
        let value = self.volumes.set(bus, value);
        if let Some(mixer) = self.shared_mixer() {
            let mut m = lock_mixer(&mixer);
            let now = m.current_time();
            let tc = self.config.volume_time_constant;
            let param = if bus == MASTER {
                Some(&mut m.master)
            } else {
                m.bus_mut(bus).map(|b| &mut b.gain)
            };
            match param {
                Some(param) => {
                    param.cancel_and_hold_at_time(now);
                    param.set_target_at_time(value, now, tc);
                }
                None => tracing::debug!(bus, "volume stored for bus that does not exist yet"),
            }
        }
        self.save_volumes();
    }

    /// Stored volume for `bus`; 1.0 when nothing was ever set.
    pub fn get_volume(&self, bus: &str) -> f32 {
        self.volumes.get(bus).unwrap_or(1.0)
    }

    /// Toggle writing volume preferences on change.
    pub fn enable_config_save(&mut self, enabled: bool) {
        self.persist = enabled;
    }

    fn save_volumes(&self) {
        if !self.persist {
            return;
        }
        let result = self
            .volumes
            .to_json()
            .and_then(|json| self.store.save(&self.config.storage_key, &json));
        if let Err(e) = result {
            tracing::warn!("failed to save volumes: {e:#}");
        }
    }

    /// Apply an effect preset to `bus`, or to every bus for `master`.
    ///
    /// Unrecognized names resolve to [`Effect::Normal`].
    pub fn set_effect(&mut self, effect: impl Into<Effect>, bus: &str) -> bool {
        let effect = effect.into();
        let Some(mixer) = self.shared_mixer() else {
            return false;
        };
        let mut m = lock_mixer(&mixer);
        let now = m.current_time();
        let tc = self.config.effect_time_constant;
        if bus == MASTER {
            for b in m.buses_mut() {
                b.filter.apply_effect(effect, now, tc);
            }
            tracing::debug!(effect = %effect, "effect applied to all buses");
            return true;
        }
        match m.bus_mut(bus) {
            Some(b) => {
                b.filter.apply_effect(effect, now, tc);
                tracing::debug!(bus, effect = %effect, "effect applied");
                true
            }
            None => {
                tracing::debug!(bus, "set_effect on unknown bus ignored");
                false
            }
        }
    }

    pub fn get_effect(&self, bus: &str) -> Effect {
        self.shared_mixer()
            .and_then(|mixer| lock_mixer(&mixer).bus(bus).map(|b| b.effect()))
            .unwrap_or_default()
    }

    pub fn set_muffled(&mut self, bus: &str, active: bool) -> bool {
        self.set_effect(if active { Effect::Muffled } else { Effect::Normal }, bus)
    }

    pub fn set_radio(&mut self, bus: &str, active: bool) -> bool {
        self.set_effect(if active { Effect::Radio } else { Effect::Normal }, bus)
    }

    /// Set the rate for new instances on `bus` and glide every active instance
    /// on it (all instances for `master`) to the new rate.
    pub fn set_playback_rate(&mut self, bus: &str, rate: f32) {
        let rate = if rate.is_finite() { rate.max(0.0) } else { 1.0 };
        self.rates.insert(bus.to_string(), rate);

        let Some(mixer) = self.shared_mixer() else {
            return;
        };
        let mut m = lock_mixer(&mixer);
        let now = m.current_time();
        let tc = self.config.effect_time_constant;
        let mut touched = 0usize;
        for inst in self.instances.values() {
            if bus != MASTER && inst.bus != bus {
                continue;
            }
            if let Some(voice) = m.voice_mut(inst.id) {
                voice.playback_rate.cancel_and_hold_at_time(now);
                voice.playback_rate.set_target_at_time(rate, now, tc);
                touched += 1;
            }
        }
        tracing::debug!(bus, rate, touched, "playback rate updated");
    }

    /// Spectrum of what leaves `bus`'s effect stage, `bin_count` bytes.
    pub fn get_frequency_data(&self, bus: &str) -> Option<Vec<u8>> {
        let mixer = self.shared_mixer()?;
        let mut m = lock_mixer(&mixer);
        m.bus_mut(bus).map(|b| b.analyser.frequency_data())
    }
}

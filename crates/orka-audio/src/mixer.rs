//! Render graph.
//!
//! ```text
//! voice ─ gain ─┐
//! voice ─ gain ─┼─ bus gain ─ filter ─ analyser ─┐
//!               │                               ├─ master gain ─ output
//! voice ─ gain ─┴─ bus gain ─ filter ─ analyser ─┘
//! ```
//!
//! The mixer is shared between the control side and the output callback as
//! `Arc<Mutex<Mixer>>`. The control side only schedules parameter events and
//! adds/removes voices; all sample work happens in [`Mixer::render`], which also
//! advances the context clock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use crossbeam_channel::Sender;
use orka_audio_types::Effect;

use crate::analyser::Analyser;
use crate::buffer::AudioBuffer;
use crate::filter::BusFilter;
use crate::param::AudioParam;

/// Mixer shared with the output callback.
pub type SharedMixer = Arc<Mutex<Mixer>>;

/// Lock the mixer, recovering the guard if a previous holder panicked.
pub fn lock_mixer(mixer: &SharedMixer) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lock the mixer without waiting. `None` only when another thread holds it;
/// a poisoned lock is recovered.
pub fn try_lock_mixer(mixer: &SharedMixer) -> Option<MutexGuard<'_, Mixer>> {
    match mixer.try_lock() {
        Ok(m) => Some(m),
        Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

/// Opaque handle of a playback instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Render-side state of one playing sound.
#[derive(Debug)]
pub struct Voice {
    id: InstanceId,
    bus: usize,
    buffer: Arc<AudioBuffer>,
    looping: bool,
    position: f64,
    step: f64,
    stop_at: Option<f64>,
    pub gain: AudioParam,
    /// Distance falloff, multiplied with `gain` so fades and follow combine.
    pub attenuation: AudioParam,
    pub playback_rate: AudioParam,
}

impl Voice {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Audible gain at `time`: fade gain times distance attenuation.
    pub fn effective_gain(&self, time: f64) -> f32 {
        self.gain.value_at(time) * self.attenuation.value_at(time)
    }

    /// Read position in source frames.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// End the voice once the context clock reaches `time`.
    pub fn stop_at(&mut self, time: f64) {
        self.stop_at = Some(match self.stop_at {
            Some(existing) => existing.min(time),
            None => time,
        });
    }
}

/// Mixing channel feeding the master gain.
#[derive(Debug)]
pub struct Bus {
    name: String,
    pub gain: AudioParam,
    pub filter: BusFilter,
    pub analyser: Analyser,
    scratch: Vec<f32>,
}

impl Bus {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn effect(&self) -> Effect {
        self.filter.effect()
    }
}

#[derive(Debug)]
pub struct Mixer {
    sample_rate: u32,
    channels: usize,
    quantum: usize,
    fft_size: usize,
    smoothing: f32,
    frames_rendered: u64,
    pub master: AudioParam,
    buses: Vec<Bus>,
    voices: Vec<Voice>,
    master_scratch: Vec<f32>,
    ended_tx: Sender<InstanceId>,
}

/// Construction parameters for [`Mixer`].
#[derive(Clone, Copy, Debug)]
pub struct MixerSpec {
    pub sample_rate: u32,
    pub channels: usize,
    pub quantum: usize,
    pub fft_size: usize,
    pub smoothing: f32,
}

impl Mixer {
    /// Empty graph with only the master gain. Ended voice ids go to `ended_tx`.
    pub fn new(spec: MixerSpec, ended_tx: Sender<InstanceId>) -> Self {
        let channels = spec.channels.max(1);
        let quantum = spec.quantum.max(1);
        Self {
            sample_rate: spec.sample_rate.max(1),
            channels,
            quantum,
            fft_size: spec.fft_size,
            smoothing: spec.smoothing,
            frames_rendered: 0,
            master: AudioParam::new(1.0),
            buses: Vec::new(),
            voices: Vec::new(),
            master_scratch: vec![0.0; quantum * channels],
            ended_tx,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Context clock in seconds.
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    /// Add a bus; returns `false` if the name already exists.
    pub fn add_bus(&mut self, name: &str, gain: f32) -> bool {
        if self.bus_index(name).is_some() {
            return false;
        }
        self.buses.push(Bus {
            name: name.to_string(),
            gain: AudioParam::new(gain),
            filter: BusFilter::new(self.sample_rate, self.channels),
            analyser: Analyser::new(self.fft_size, self.smoothing),
            scratch: vec![0.0; self.quantum * self.channels],
        });
        true
    }

    pub fn bus_index(&self, name: &str) -> Option<usize> {
        self.buses.iter().position(|b| b.name == name)
    }

    pub fn bus(&self, name: &str) -> Option<&Bus> {
        self.buses.iter().find(|b| b.name == name)
    }

    pub fn bus_mut(&mut self, name: &str) -> Option<&mut Bus> {
        self.buses.iter_mut().find(|b| b.name == name)
    }

    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }

    pub fn buses_mut(&mut self) -> &mut [Bus] {
        &mut self.buses
    }

    /// Start a voice immediately. `bus` must come from [`Mixer::bus_index`].
    pub fn start_voice(
        &mut self,
        id: InstanceId,
        bus: usize,
        buffer: Arc<AudioBuffer>,
        looping: bool,
        gain: f32,
        playback_rate: f32,
    ) {
        let step = buffer.sample_rate() as f64 / self.sample_rate as f64;
        self.voices.push(Voice {
            id,
            bus: bus.min(self.buses.len().saturating_sub(1)),
            buffer,
            looping,
            position: 0.0,
            step,
            stop_at: None,
            gain: AudioParam::new(gain),
            attenuation: AudioParam::new(1.0),
            playback_rate: AudioParam::new(playback_rate),
        });
    }

    pub fn voice(&self, id: InstanceId) -> Option<&Voice> {
        self.voices.iter().find(|v| v.id == id)
    }

    pub fn voice_mut(&mut self, id: InstanceId) -> Option<&mut Voice> {
        self.voices.iter_mut().find(|v| v.id == id)
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Remove a voice without reporting it as ended.
    pub fn remove_voice(&mut self, id: InstanceId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        self.voices.len() != before
    }

    /// Render interleaved output; `out.len()` should be a multiple of `channels`.
    pub fn render(&mut self, out: &mut [f32]) {
        let block = self.quantum * self.channels;
        for chunk in out.chunks_mut(block) {
            self.render_block(chunk);
        }
    }

    fn render_block(&mut self, out: &mut [f32]) {
        let channels = self.channels;
        let frames = out.len() / channels;
        let samples = frames * channels;
        let rate = self.sample_rate as f64;
        let t0 = self.current_time();

        for bus in &mut self.buses {
            bus.scratch[..samples].fill(0.0);
        }

        let mut ended: Vec<InstanceId> = Vec::new();
        for voice in &mut self.voices {
            let Some(bus) = self.buses.get_mut(voice.bus) else {
                continue;
            };
            if render_voice(voice, &mut bus.scratch[..samples], channels, t0, rate) {
                ended.push(voice.id);
            }
            voice.gain.prune(t0);
            voice.attenuation.prune(t0);
            voice.playback_rate.prune(t0);
        }
        if !ended.is_empty() {
            self.voices.retain(|v| !ended.contains(&v.id));
            for id in ended {
                let _ = self.ended_tx.send(id);
            }
        }

        let master = &mut self.master_scratch[..samples];
        master.fill(0.0);
        for bus in &mut self.buses {
            bus.filter.begin_block(t0);
            for frame in 0..frames {
                let t = t0 + frame as f64 / rate;
                let g = bus.gain.value_at(t);
                let slot = &mut bus.scratch[frame * channels..(frame + 1) * channels];
                for x in slot.iter_mut() {
                    *x *= g;
                }
                bus.filter.process_frame(slot);
                bus.analyser.push_frame(slot);
                for (m, x) in master[frame * channels..(frame + 1) * channels]
                    .iter_mut()
                    .zip(slot.iter())
                {
                    *m += *x;
                }
            }
            bus.gain.prune(t0);
        }

        for frame in 0..frames {
            let t = t0 + frame as f64 / rate;
            let g = self.master.value_at(t);
            for ch in 0..channels {
                let idx = frame * channels + ch;
                out[idx] = master[idx] * g;
            }
        }
        self.master.prune(t0);
        for x in out[samples..].iter_mut() {
            *x = 0.0;
        }

        self.frames_rendered += frames as u64;
    }
}

/// Mix one voice into `dst`; returns `true` when the voice has finished.
fn render_voice(voice: &mut Voice, dst: &mut [f32], channels: usize, t0: f64, rate: f64) -> bool {
    let frames = dst.len() / channels;
    let len = voice.buffer.frames();
    if len == 0 {
        return true;
    }
    let len_f = len as f64;

    for frame in 0..frames {
        let t = t0 + frame as f64 / rate;
        if voice.stop_at.is_some_and(|stop| t >= stop) {
            return true;
        }
        if voice.position >= len_f {
            if voice.looping {
                voice.position %= len_f;
            } else {
                return true;
            }
        }

        let g = voice.effective_gain(t);
        let speed = voice.playback_rate.value_at(t).max(0.0) as f64;

        let idx = voice.position.floor() as usize;
        let frac = (voice.position - idx as f64) as f32;
        let next = if idx + 1 < len {
            idx + 1
        } else if voice.looping {
            0
        } else {
            idx
        };
        for ch in 0..channels {
            let a = voice.buffer.sample_mapped(idx, channels, ch);
            let b = voice.buffer.sample_mapped(next, channels, ch);
            dst[frame * channels + ch] += (a + (b - a) * frac) * g;
        }

        voice.position += speed * voice.step;
        if voice.looping && voice.position >= len_f {
            voice.position %= len_f;
        }
    }

    !voice.looping && voice.position >= len_f
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn mixer(rate: u32) -> (Mixer, crossbeam_channel::Receiver<InstanceId>) {
        let (tx, rx) = unbounded();
        let spec = MixerSpec {
            sample_rate: rate,
            channels: 1,
            quantum: 64,
            fft_size: 64,
            smoothing: 0.0,
        };
        (Mixer::new(spec, tx), rx)
    }

    fn dc(frames: usize, rate: u32) -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::from_fn(rate, frames, |_| 0.5))
    }

    #[test]
    fn add_bus_is_idempotent() {
        let (mut m, _rx) = mixer(8_000);
        assert!(m.add_bus("sfx", 1.0));
        assert!(!m.add_bus("sfx", 0.3));
        assert_eq!(m.buses().len(), 1);
        assert_eq!(m.bus("sfx").unwrap().gain.value_at(0.0), 1.0);
    }

    #[test]
    fn try_lock_recovers_poison_but_not_contention() {
        let (m, _rx) = mixer(8_000);
        let shared: SharedMixer = Arc::new(Mutex::new(m));

        let held = lock_mixer(&shared);
        assert!(try_lock_mixer(&shared).is_none());
        drop(held);

        let poisoner = shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("control thread died holding the mixer");
        })
        .join();
        assert!(shared.is_poisoned());
        assert!(try_lock_mixer(&shared).is_some());
    }

    #[test]
    fn render_advances_clock() {
        let (mut m, _rx) = mixer(8_000);
        let mut out = vec![0.0; 800];
        m.render(&mut out);
        assert!((m.current_time() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn voice_sums_through_bus_and_master() {
        let (mut m, _rx) = mixer(8_000);
        m.add_bus("sfx", 0.5);
        let bus = m.bus_index("sfx").unwrap();
        m.start_voice(InstanceId(1), bus, dc(8_000, 8_000), false, 1.0, 1.0);
        let mut out = vec![0.0; 64];
        m.render(&mut out);
        // 0.5 (signal) * 1.0 (voice) * 0.5 (bus); normal filter passes DC.
        assert!((out[63] - 0.25).abs() < 0.02, "out = {}", out[63]);
    }

    #[test]
    fn finished_voice_is_reported_once() {
        let (mut m, rx) = mixer(8_000);
        m.add_bus("sfx", 1.0);
        m.start_voice(InstanceId(7), 0, dc(100, 8_000), false, 1.0, 1.0);
        let mut out = vec![0.0; 256];
        m.render(&mut out);
        m.render(&mut out);
        assert_eq!(m.voice_count(), 0);
        assert_eq!(rx.try_recv().ok(), Some(InstanceId(7)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn looping_voice_keeps_playing() {
        let (mut m, rx) = mixer(8_000);
        m.add_bus("music", 1.0);
        m.start_voice(InstanceId(2), 0, dc(100, 8_000), true, 1.0, 1.0);
        let mut out = vec![0.0; 1_000];
        m.render(&mut out);
        assert_eq!(m.voice_count(), 1);
        assert!(rx.try_recv().is_err());
        assert!(m.voice(InstanceId(2)).unwrap().position() < 100.0);
    }

    #[test]
    fn loop_wraps_on_the_last_frame_of_a_block() {
        let (mut m, rx) = mixer(8_000);
        m.add_bus("music", 1.0);
        m.start_voice(InstanceId(6), 0, dc(64, 8_000), true, 1.0, 1.0);
        let mut out = vec![0.0; 64];
        m.render(&mut out);
        assert_eq!(m.voice(InstanceId(6)).unwrap().position(), 0.0);
        m.render(&mut out);
        assert!(rx.try_recv().is_err());
        assert!((out[10] - 0.5).abs() < 0.02, "out = {}", out[10]);
    }

    #[test]
    fn attenuation_scales_on_top_of_gain() {
        let (mut m, _rx) = mixer(8_000);
        m.add_bus("sfx", 1.0);
        m.start_voice(InstanceId(8), 0, dc(8_000, 8_000), false, 0.5, 1.0);
        m.voice_mut(InstanceId(8)).unwrap().attenuation.set_value(0.5);
        let mut out = vec![0.0; 64];
        m.render(&mut out);
        assert!((out[63] - 0.125).abs() < 0.01, "out = {}", out[63]);
        assert!((m.voice(InstanceId(8)).unwrap().effective_gain(0.0) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn scheduled_stop_ends_voice() {
        let (mut m, rx) = mixer(8_000);
        m.add_bus("music", 1.0);
        m.start_voice(InstanceId(3), 0, dc(100, 8_000), true, 1.0, 1.0);
        m.voice_mut(InstanceId(3)).unwrap().stop_at(0.05);
        let mut out = vec![0.0; 800];
        m.render(&mut out);
        assert_eq!(rx.try_recv().ok(), Some(InstanceId(3)));
    }

    #[test]
    fn playback_rate_scales_read_speed() {
        let (mut m, _rx) = mixer(8_000);
        m.add_bus("sfx", 1.0);
        m.start_voice(InstanceId(4), 0, dc(10_000, 8_000), false, 1.0, 0.5);
        let mut out = vec![0.0; 1_000];
        m.render(&mut out);
        let pos = m.voice(InstanceId(4)).unwrap().position();
        assert!((pos - 500.0).abs() < 1.0, "pos = {pos}");
    }

    #[test]
    fn removed_voice_is_not_reported() {
        let (mut m, rx) = mixer(8_000);
        m.add_bus("sfx", 1.0);
        m.start_voice(InstanceId(5), 0, dc(10, 8_000), false, 1.0, 1.0);
        assert!(m.remove_voice(InstanceId(5)));
        assert!(!m.remove_voice(InstanceId(5)));
        let mut out = vec![0.0; 128];
        m.render(&mut out);
        assert!(rx.try_recv().is_err());
    }
}

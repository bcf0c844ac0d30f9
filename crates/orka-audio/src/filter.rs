//! Bus effect stage: one RBJ biquad per channel driven by an [`Effect`] preset.

use std::f32::consts::PI;

use orka_audio_types::Effect;

use crate::param::AudioParam;

/// Highest usable cutoff as a fraction of the sample rate.
const MAX_FREQ_RATIO: f32 = 0.49;

/// Frequency movement (Hz) below which coefficients are not recomputed.
const COEFF_EPSILON_HZ: f32 = 0.5;

/// Filter response type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    LowPass,
    BandPass,
}

/// Filter parameters for one effect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterPreset {
    pub kind: FilterKind,
    pub frequency: f32,
    pub q: f32,
}

/// Preset table. New effects get their parameters here.
pub fn preset_for(effect: Effect) -> FilterPreset {
    match effect {
        Effect::Normal => FilterPreset {
            kind: FilterKind::LowPass,
            frequency: 22_050.0,
            q: 0.707,
        },
        Effect::Muffled => FilterPreset {
            kind: FilterKind::LowPass,
            frequency: 600.0,
            q: 0.707,
        },
        Effect::Radio => FilterPreset {
            kind: FilterKind::BandPass,
            frequency: 2_000.0,
            q: 1.0,
        },
    }
}

#[derive(Clone, Copy, Debug)]
struct Coeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coeffs {
    fn design(kind: FilterKind, sample_rate: f32, freq: f32, q: f32) -> Self {
        let freq = freq.clamp(10.0, sample_rate * MAX_FREQ_RATIO);
        let w0 = 2.0 * PI * freq / sample_rate;
        let alpha = w0.sin() / (2.0 * q.max(0.1));
        let cosw0 = w0.cos();
        let (b0, b1, b2) = match kind {
            FilterKind::LowPass => {
                let b1 = 1.0 - cosw0;
                (b1 / 2.0, b1, b1 / 2.0)
            }
            // Constant 0 dB peak gain.
            FilterKind::BandPass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cosw0;
        let a2 = 1.0 - alpha;
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Transposed direct form II state for one channel.
#[derive(Clone, Copy, Debug, Default)]
struct Biquad {
    z1: f32,
    z2: f32,
}

impl Biquad {
    #[inline]
    fn process(&mut self, c: &Coeffs, x: f32) -> f32 {
        let y = c.b0 * x + self.z1;
        self.z1 = c.b1 * x - c.a1 * y + self.z2;
        self.z2 = c.b2 * x - c.a2 * y;
        y
    }
}

/// Effect filter owned by a bus.
#[derive(Clone, Debug)]
pub struct BusFilter {
    effect: Effect,
    kind: FilterKind,
    q: f32,
    frequency: AudioParam,
    sample_rate: f32,
    coeffs: Coeffs,
    designed_freq: f32,
    state: Vec<Biquad>,
}

impl BusFilter {
    /// A pass-through (Normal) filter for `channels` channels.
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let preset = preset_for(Effect::Normal);
        let sample_rate = sample_rate.max(1) as f32;
        Self {
            effect: Effect::Normal,
            kind: preset.kind,
            q: preset.q,
            frequency: AudioParam::new(preset.frequency),
            sample_rate,
            coeffs: Coeffs::design(preset.kind, sample_rate, preset.frequency, preset.q),
            designed_freq: preset.frequency,
            state: vec![Biquad::default(); channels.max(1)],
        }
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    /// Cutoff/centre frequency at `time`.
    pub fn frequency_at(&self, time: f64) -> f32 {
        self.frequency.value_at(time)
    }

    /// Switch to `effect`: the response type flips now, the frequency glides.
    pub fn apply_effect(&mut self, effect: Effect, now: f64, time_constant: f64) {
        let preset = preset_for(effect);
        self.effect = effect;
        self.kind = preset.kind;
        self.q = preset.q;
        self.frequency.cancel_and_hold_at_time(now);
        self.frequency
            .set_target_at_time(preset.frequency, now, time_constant);
        self.redesign(self.frequency.value_at(now));
    }

    /// Refresh coefficients for a block starting at `time`.
    pub fn begin_block(&mut self, time: f64) {
        let freq = self.frequency.value_at(time);
        if (freq - self.designed_freq).abs() > COEFF_EPSILON_HZ {
            self.redesign(freq);
        }
        self.frequency.prune(time);
    }

    /// Filter one interleaved frame in place.
    #[inline]
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        for (x, st) in frame.iter_mut().zip(self.state.iter_mut()) {
            *x = st.process(&self.coeffs, *x);
        }
    }

    fn redesign(&mut self, freq: f32) {
        self.coeffs = Coeffs::design(self.kind, self.sample_rate, freq, self.q);
        self.designed_freq = freq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_rms(filter: &mut BusFilter, freq: f32, sample_rate: f32) -> f32 {
        let n = 4_000;
        let mut acc = 0.0;
        for i in 0..n {
            let x = (i as f32 * freq * 2.0 * PI / sample_rate).sin();
            let mut frame = [x];
            filter.process_frame(&mut frame);
            if i >= n / 2 {
                acc += frame[0] * frame[0];
            }
        }
        (acc / (n / 2) as f32).sqrt()
    }

    #[test]
    fn presets_match_effects() {
        assert_eq!(preset_for(Effect::Muffled).kind, FilterKind::LowPass);
        assert_eq!(preset_for(Effect::Muffled).frequency, 600.0);
        assert_eq!(preset_for(Effect::Radio).kind, FilterKind::BandPass);
        assert_eq!(preset_for(Effect::Radio).frequency, 2_000.0);
        assert!(preset_for(Effect::Normal).frequency >= 22_000.0);
    }

    #[test]
    fn normal_filter_is_nearly_transparent() {
        let mut f = BusFilter::new(48_000, 1);
        let rms = tone_rms(&mut f, 1_000.0, 48_000.0);
        assert!((rms - 0.707).abs() < 0.02, "rms = {rms}");
    }

    #[test]
    fn muffled_attenuates_highs() {
        let mut f = BusFilter::new(48_000, 1);
        f.apply_effect(Effect::Muffled, 0.0, 0.0);
        f.begin_block(1.0);
        let rms = tone_rms(&mut f, 5_000.0, 48_000.0);
        assert!(rms < 0.05, "rms = {rms}");
    }

    #[test]
    fn radio_rejects_lows() {
        let mut f = BusFilter::new(48_000, 1);
        f.apply_effect(Effect::Radio, 0.0, 0.0);
        f.begin_block(1.0);
        let low = tone_rms(&mut f, 60.0, 48_000.0);
        let mut f2 = BusFilter::new(48_000, 1);
        f2.apply_effect(Effect::Radio, 0.0, 0.0);
        f2.begin_block(1.0);
        let mid = tone_rms(&mut f2, 2_000.0, 48_000.0);
        assert!(low < 0.1, "low = {low}");
        assert!(mid > 0.6, "mid = {mid}");
    }

    #[test]
    fn effect_frequency_glides() {
        let mut f = BusFilter::new(48_000, 2);
        f.apply_effect(Effect::Muffled, 0.0, 0.1);
        let early = f.frequency_at(0.01);
        assert!(early > 600.0 && early < 22_050.0);
        assert!((f.frequency_at(2.0) - 600.0).abs() < 1.0);
        assert_eq!(f.effect(), Effect::Muffled);
    }
}

//! Decoded audio assets and the keyed cache that owns them.

use std::collections::HashMap;
use std::sync::Arc;

/// Immutable decoded audio: interleaved `f32` frames at a fixed rate.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: usize,
    samples: Vec<f32>,
}

impl AudioBuffer {
    /// Build a buffer from interleaved samples.
    ///
    /// A trailing partial frame is dropped; `channels` and `sample_rate` are
    /// clamped to at least 1.
    pub fn from_interleaved(sample_rate: u32, channels: usize, mut samples: Vec<f32>) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels;
        samples.truncate(whole);
        Self {
            sample_rate: sample_rate.max(1),
            channels,
            samples,
        }
    }

    /// Mono buffer filled by `f(frame_index)`; handy for synthesized cues.
    pub fn from_fn(sample_rate: u32, frames: usize, mut f: impl FnMut(usize) -> f32) -> Self {
        let samples = (0..frames).map(&mut f).collect();
        Self::from_interleaved(sample_rate, 1, samples)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Sample at an integer frame for source channel `ch` (out of range → 0).
    #[inline]
    pub fn sample(&self, frame: usize, ch: usize) -> f32 {
        if ch >= self.channels {
            return 0.0;
        }
        self.samples
            .get(frame * self.channels + ch)
            .copied()
            .unwrap_or(0.0)
    }

    /// Sample for output channel `dst_ch` of `dst_channels`, mapping layouts.
    ///
    /// Mapping rules:
    /// - mono → any: duplicate channel 0
    /// - stereo → mono: average L/R
    /// - otherwise: clamp to the available source channels
    #[inline]
    pub fn sample_mapped(&self, frame: usize, dst_channels: usize, dst_ch: usize) -> f32 {
        match (self.channels, dst_channels) {
            (1, _) => self.sample(frame, 0),
            (2, 1) => 0.5 * (self.sample(frame, 0) + self.sample(frame, 1)),
            (src, _) => self.sample(frame, dst_ch.min(src - 1)),
        }
    }
}

/// Keyed cache of decoded buffers.
///
/// Re-inserting an existing key replaces the previous buffer immediately;
/// instances already playing keep their own reference to the old one.
#[derive(Debug, Default)]
pub struct BufferStore {
    buffers: HashMap<String, Arc<AudioBuffer>>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, buffer: AudioBuffer) -> Arc<AudioBuffer> {
        let buffer = Arc::new(buffer);
        self.buffers.insert(key.into(), buffer.clone());
        buffer
    }

    pub fn get(&self, key: &str) -> Option<Arc<AudioBuffer>> {
        self.buffers.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.buffers.contains_key(key)
    }

    /// Loaded keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.buffers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_interleaved_drops_partial_frame() {
        let buf = AudioBuffer::from_interleaved(48_000, 2, vec![0.1, 0.2, 0.3]);
        assert_eq!(buf.frames(), 1);
        assert_eq!(buf.samples(), &[0.1, 0.2]);
    }

    #[test]
    fn duration_uses_frames_and_rate() {
        let buf = AudioBuffer::from_fn(8_000, 4_000, |_| 0.0);
        assert!((buf.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn sample_mapped_handles_layouts() {
        let stereo = AudioBuffer::from_interleaved(48_000, 2, vec![1.0, 0.0]);
        assert!((stereo.sample_mapped(0, 1, 0) - 0.5).abs() < 1e-6);
        assert_eq!(stereo.sample_mapped(0, 2, 1), 0.0);

        let mono = AudioBuffer::from_interleaved(48_000, 1, vec![0.25]);
        assert_eq!(mono.sample_mapped(0, 2, 0), 0.25);
        assert_eq!(mono.sample_mapped(0, 2, 1), 0.25);
    }

    #[test]
    fn store_insert_overwrites_key() {
        let mut store = BufferStore::new();
        store.insert("beep", AudioBuffer::from_fn(8_000, 10, |_| 0.0));
        store.insert("beep", AudioBuffer::from_fn(8_000, 20, |_| 0.0));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("beep").unwrap().frames(), 20);
        assert!(store.get("missing").is_none());
    }
}

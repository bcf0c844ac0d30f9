//! Per-bus spectrum tap.
//!
//! The mixer feeds every post-effect frame into a ring buffer; callers pull a
//! byte-scaled magnitude spectrum on demand for visualizers.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

pub struct Analyser {
    fft_size: usize,
    smoothing: f32,
    ring: Vec<f32>,
    write: usize,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for Analyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyser")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

impl Analyser {
    /// `fft_size` must be a power of two; `smoothing` is clamped to `[0, 1)`.
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let fft_size = fft_size.max(2).next_power_of_two();
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        Self {
            fft_size,
            smoothing: smoothing.clamp(0.0, 0.99),
            ring: vec![0.0; fft_size],
            write: 0,
            window: blackman(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            fft,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of frequency bins returned by [`Analyser::frequency_data`].
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Record one interleaved frame (down-mixed to mono).
    #[inline]
    pub fn push_frame(&mut self, frame: &[f32]) {
        if frame.is_empty() {
            return;
        }
        let mono = frame.iter().sum::<f32>() / frame.len() as f32;
        self.ring[self.write] = mono;
        self.write = (self.write + 1) % self.fft_size;
    }

    /// Magnitude spectrum of the most recent `fft_size` samples, scaled to bytes.
    pub fn frequency_data(&mut self) -> Vec<u8> {
        let n = self.fft_size;
        for i in 0..n {
            let sample = self.ring[(self.write + i) % n];
            self.scratch[i] = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let tau = self.smoothing;
        let scale = 1.0 / n as f32;
        self.smoothed
            .iter_mut()
            .zip(self.scratch.iter())
            .map(|(prev, bin)| {
                let magnitude = bin.norm() * scale;
                *prev = tau * *prev + (1.0 - tau) * magnitude;
                to_byte(*prev)
            })
            .collect()
    }
}

fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}

fn blackman(n: usize) -> Vec<f32> {
    let a = 0.16f32;
    let a0 = 0.5 * (1.0 - a);
    let a1 = 0.5f32;
    let a2 = 0.5 * a;
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            a0 - a1 * (std::f32::consts::TAU * x).cos() + a2 * (2.0 * std::f32::consts::TAU * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_yields_zero_bytes() {
        let mut a = Analyser::new(256, 0.0);
        for _ in 0..512 {
            a.push_frame(&[0.0, 0.0]);
        }
        let data = a.frequency_data();
        assert_eq!(data.len(), 128);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn tone_peaks_in_matching_bin() {
        let rate = 8_000.0;
        let mut a = Analyser::new(256, 0.0);
        // Bin 32 of 256 at 8 kHz is 1 kHz.
        for i in 0..1_024 {
            let x = (i as f32 * 1_000.0 * std::f32::consts::TAU / rate).sin();
            a.push_frame(&[x]);
        }
        let data = a.frequency_data();
        let (peak, _) = data
            .iter()
            .enumerate()
            .max_by_key(|(_, b)| **b)
            .unwrap();
        assert!((31..=33).contains(&peak), "peak bin = {peak}");
        assert!(data[peak] > 200);
        assert!(data[100] < data[peak]);
    }

    #[test]
    fn smoothing_carries_previous_energy() {
        let mut a = Analyser::new(64, 0.9);
        for i in 0..64 {
            a.push_frame(&[(i as f32 * 0.8).sin()]);
        }
        let loud = a.frequency_data();
        for _ in 0..64 {
            a.push_frame(&[0.0]);
        }
        let after = a.frequency_data();
        assert!(after.iter().any(|&b| b > 0));
        assert!(after.iter().zip(loud.iter()).all(|(a, l)| a <= l));
    }

    #[test]
    fn fft_size_rounds_to_power_of_two() {
        let a = Analyser::new(300, 0.5);
        assert_eq!(a.fft_size(), 512);
        assert_eq!(a.bin_count(), 256);
    }
}

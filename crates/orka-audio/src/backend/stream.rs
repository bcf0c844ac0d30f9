//! CPAL output stream.
//!
//! The callback locks the shared mixer, renders one device buffer of `f32`
//! samples into a reusable scratch vector and converts it to the device sample
//! format. If the mixer lock is contended the callback writes silence rather
//! than waiting; a poisoned lock is recovered like everywhere else.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use orka_audio_types::ContextState;

use super::{OutputBackend, OutputInfo};
use crate::device::{pick_buffer_size, pick_device, pick_output_config};
use crate::mixer::{SharedMixer, try_lock_mixer};

/// Output backend on top of the default CPAL host.
pub struct CpalBackend {
    device_needle: Option<String>,
    preferred_rate: Option<u32>,
    device: Option<cpal::Device>,
    config: Option<(cpal::StreamConfig, cpal::SampleFormat)>,
    stream: Option<cpal::Stream>,
    state: ContextState,
}

impl CpalBackend {
    pub fn new(device_needle: Option<String>, preferred_rate: Option<u32>) -> Self {
        Self {
            device_needle,
            preferred_rate,
            device: None,
            config: None,
            stream: None,
            state: ContextState::Suspended,
        }
    }

    fn stream(&self) -> Result<&cpal::Stream> {
        self.stream
            .as_ref()
            .ok_or_else(|| anyhow!("output stream not connected"))
    }
}

impl OutputBackend for CpalBackend {
    fn open(&mut self) -> Result<OutputInfo> {
        let host = cpal::default_host();
        let device = pick_device(&host, self.device_needle.as_deref())?;
        let name = device.description().ok().map(|d| d.name().to_string());
        let supported = pick_output_config(&device, self.preferred_rate)?;
        let sample_format = supported.sample_format();
        let mut config: cpal::StreamConfig = supported.clone().into();
        if let Some(size) = pick_buffer_size(&supported) {
            config.buffer_size = size;
        }
        tracing::info!(
            device = name.as_deref().unwrap_or("<unknown>"),
            rate = config.sample_rate,
            channels = config.channels,
            format = ?sample_format,
            "output device opened"
        );

        let info = OutputInfo {
            sample_rate: config.sample_rate,
            channels: config.channels as usize,
            device: name,
        };
        self.device = Some(device);
        self.config = Some((config, sample_format));
        Ok(info)
    }

    fn connect(&mut self, mixer: SharedMixer) -> Result<()> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| anyhow!("output device not opened"))?;
        let (config, format) = self
            .config
            .as_ref()
            .ok_or_else(|| anyhow!("output config missing"))?;
        let stream = build_output_stream(device, config, *format, mixer)?;
        // Streams may auto-start on some hosts; stay suspended until `resume`.
        if let Err(e) = stream.pause() {
            tracing::debug!("initial pause not supported: {e}");
        }
        self.stream = Some(stream);
        self.state = ContextState::Suspended;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.stream()?.play().context("start output stream")?;
        self.state = ContextState::Running;
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        self.stream()?.pause().context("pause output stream")?;
        self.state = ContextState::Suspended;
        Ok(())
    }

    fn state(&self) -> ContextState {
        self.state
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    mixer: SharedMixer,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, mixer),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, mixer),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, mixer),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, mixer),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: SharedMixer,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let err_fn = |err| tracing::warn!("stream error: {err}");
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            fill_from_mixer(&mixer, &mut scratch, data);
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Render one device buffer, or silence if the control side holds the mixer.
fn fill_from_mixer<T>(mixer: &SharedMixer, scratch: &mut Vec<f32>, data: &mut [T])
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    let Some(mut m) = try_lock_mixer(mixer) else {
        data.fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
        return;
    };
    scratch.resize(data.len(), 0.0);
    m.render(scratch);
    drop(m);
    for (dst, src) in data.iter_mut().zip(scratch.iter()) {
        *dst = <T as cpal::Sample>::from_sample::<f32>(src.clamp(-1.0, 1.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::{Mixer, MixerSpec, lock_mixer};
    use std::sync::{Arc, Mutex};

    fn shared() -> SharedMixer {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let spec = MixerSpec {
            sample_rate: 8_000,
            channels: 1,
            quantum: 64,
            fft_size: 64,
            smoothing: 0.0,
        };
        Arc::new(Mutex::new(Mixer::new(spec, tx)))
    }

    #[test]
    fn contended_mixer_yields_silence_without_advancing() {
        let mixer = shared();
        let mut scratch = Vec::new();
        let mut data = [1i16; 32];
        let guard = lock_mixer(&mixer);
        fill_from_mixer(&mixer, &mut scratch, &mut data);
        assert_eq!(guard.current_time(), 0.0);
        drop(guard);
        assert!(data.iter().all(|&x| x == 0));
    }

    #[test]
    fn poisoned_mixer_keeps_rendering() {
        let mixer = shared();
        let poisoner = mixer.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("control thread died holding the mixer");
        })
        .join();

        let mut scratch = Vec::new();
        let mut data = [0.0f32; 80];
        fill_from_mixer(&mixer, &mut scratch, &mut data);
        fill_from_mixer(&mixer, &mut scratch, &mut data);
        assert!((lock_mixer(&mixer).current_time() - 0.02).abs() < 1e-9);
    }
}

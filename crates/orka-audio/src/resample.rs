//! Load-time sample-rate conversion.
//!
//! Buffers are converted once, when they enter the store, so the mixer only ever
//! steps through them at `playback_rate` frames per output frame. Uses Rubato's
//! sinc resampler with fixed input chunks; the resampler's output delay is
//! trimmed so the converted buffer stays aligned with the source.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::buffer::AudioBuffer;

/// Input chunk size in frames for the conversion loop.
const CHUNK_FRAMES: usize = 1024;

/// Convert `buffer` to `dst_rate`; buffers already at that rate are cloned.
pub fn resample_buffer(buffer: &AudioBuffer, dst_rate: u32) -> Result<AudioBuffer> {
    let src_rate = buffer.sample_rate();
    if src_rate == dst_rate || buffer.frames() == 0 {
        return Ok(AudioBuffer::from_interleaved(
            dst_rate,
            buffer.channels(),
            buffer.samples().to_vec(),
        ));
    }
    if dst_rate == 0 {
        return Err(anyhow!("invalid target rate 0"));
    }

    let channels = buffer.channels();
    let f_ratio = dst_rate as f64 / src_rate as f64;

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    let mut resampler =
        Async::<f32>::new_sinc(f_ratio, 1.1, &params, CHUNK_FRAMES, channels, FixedAsync::Input)
            .map_err(|e| anyhow!("resampler init error: {e}"))?;

    let delay = resampler.output_delay();
    let expected = (buffer.frames() as f64 * f_ratio).round() as usize;

    // Zero padding pushes the delayed tail out of the filter.
    let pad_frames = (delay as f64 / f_ratio).ceil() as usize + CHUNK_FRAMES;
    let mut input = buffer.samples().to_vec();
    input.resize(input.len() + pad_frames * channels, 0.0);
    let input_frames = input.len() / channels;

    let mut out_interleaved = vec![0.0f32; resampler.output_frames_max() * channels];
    let mut produced: Vec<f32> = Vec::with_capacity((expected + delay + CHUNK_FRAMES) * channels);

    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    let mut offset = 0usize;
    while offset < input_frames {
        let take = CHUNK_FRAMES.min(input_frames - offset);
        let chunk = &input[offset * channels..(offset + take) * channels];

        let input_adapter = InterleavedSlice::new(chunk, channels, take)
            .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;
        let out_capacity_frames = out_interleaved.len() / channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut out_interleaved, channels, out_capacity_frames)
                .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

        indexing.input_offset = 0;
        indexing.output_offset = 0;
        indexing.partial_len = if take < CHUNK_FRAMES { Some(take) } else { None };

        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resampler process error: {e}"))?;
        produced.extend_from_slice(&out_interleaved[..nbr_out * channels]);
        offset += take;
    }

    let start = (delay * channels).min(produced.len());
    let end = ((delay + expected) * channels).min(produced.len());
    let samples = produced[start..end].to_vec();

    tracing::debug!(
        from_hz = src_rate,
        to_hz = dst_rate,
        frames_in = buffer.frames(),
        frames_out = samples.len() / channels,
        "resampled buffer"
    );

    Ok(AudioBuffer::from_interleaved(dst_rate, channels, samples))
}

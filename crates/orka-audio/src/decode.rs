//! Asset fetch and full-buffer decode.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode every packet of the default track into interleaved `f32`
//! - hand back an immutable [`AudioBuffer`]
//!
//! Paths are opaque strings: `http://` and `https://` are fetched with ureq,
//! anything else is read from the local filesystem.

use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::buffer::AudioBuffer;

/// Read raw asset bytes from a local path or an HTTP(S) URL.
pub fn fetch_bytes(path: &str) -> Result<Vec<u8>> {
    if is_remote(path) {
        let mut resp = ureq::get(path)
            .call()
            .with_context(|| format!("fetch {path}"))?;
        let bytes = resp
            .body_mut()
            .read_to_vec()
            .with_context(|| format!("read body {path}"))?;
        return Ok(bytes);
    }
    std::fs::read(path).with_context(|| format!("open {path:?}"))
}

/// Fetch and decode `path` in one step.
pub fn load_buffer(path: &str) -> Result<AudioBuffer> {
    let bytes = fetch_bytes(path)?;
    decode_bytes(bytes, hint_for_path(path)).with_context(|| format!("decode {path}"))
}

/// Decode a complete in-memory asset.
pub fn decode_bytes(bytes: Vec<u8>, hint: Hint) -> Result<AudioBuffer> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("No default audio track"))?;
    let track_id = track.id;
    let codec_params: CodecParameters = track.codec_params.clone();

    let channels = codec_params
        .channels
        .ok_or_else(|| anyhow!("Unknown channels"))?
        .count();
    let rate = codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("Unknown sample rate"))?;

    let mut decoder =
        symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<f32> = Vec::new();
    if let Some(frames) = codec_params.n_frames {
        samples.reserve((frames as usize).saturating_mul(channels));
    }

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(_) => break, // EOF
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!("skipping undecodable packet: {e}");
                continue;
            }
        };

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() {
        return Err(anyhow!("decoded zero frames"));
    }

    tracing::debug!(
        codec = codec_name_from_params(&codec_params).unwrap_or("unknown"),
        rate_hz = rate,
        channels,
        frames = samples.len() / channels,
        "decoded buffer"
    );

    Ok(AudioBuffer::from_interleaved(rate, channels, samples))
}

/// Container hint from the path's extension (query strings ignored).
pub fn hint_for_path(path: &str) -> Hint {
    let mut hint = Hint::new();
    let trimmed = path.split(['?', '#']).next().unwrap_or(path);
    if let Some(ext) = Path::new(trimmed).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    hint
}

fn is_remote(path: &str) -> bool {
    let lower = path.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Best-effort codec label used in logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}

/// Encode mono 16-bit PCM as a WAV file image. Test fixture helper.
#[cfg(test)]
pub(crate) fn wav_bytes(sample_rate: u32, samples: &[f32]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::*;

    #[test]
    fn decode_bytes_reads_wav() {
        let pcm: Vec<f32> = (0..800).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let mut hint = Hint::new();
        hint.with_extension("wav");
        let buf = decode_bytes(wav_bytes(8_000, &pcm), hint).unwrap();
        assert_eq!(buf.sample_rate(), 8_000);
        assert_eq!(buf.channels(), 1);
        assert_eq!(buf.frames(), 800);
        assert!((buf.sample(0, 0) - 0.5).abs() < 1e-3);
    }

    #[test]
    fn decode_bytes_rejects_garbage() {
        assert!(decode_bytes(vec![0u8; 64], Hint::new()).is_err());
    }

    #[test]
    fn load_buffer_reports_missing_file() {
        let err = load_buffer("/nonexistent/beep.wav").unwrap_err();
        assert!(format!("{err:#}").contains("open"));
    }

    #[test]
    fn remote_paths_are_detected() {
        assert!(is_remote("https://cdn.example/beep.wav"));
        assert!(is_remote("HTTP://cdn.example/beep.wav"));
        assert!(!is_remote("sounds/beep.wav"));
    }

    #[test]
    fn codec_name_from_params_maps_known_codecs() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_FLAC;
        assert_eq!(codec_name_from_params(&params), Some("FLAC"));
        params.codec = CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16"));
    }

    #[test]
    fn codec_name_from_params_unknown_returns_none() {
        let params = CodecParameters::new();
        assert!(codec_name_from_params(&params).is_none());
    }
}

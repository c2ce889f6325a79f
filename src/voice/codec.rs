//! Frame Codec (C1): μ-law ↔ linear PCM16, RMS, base64 framing, and the
//! offline MP3 → μ-law-frame pipeline used for static prompts and
//! file-backed TTS replies.
//!
//! Pure and stateless — no component here holds state across calls.

use crate::error::VoiceError;
use base64::{engine::general_purpose::STANDARD, Engine};
use symphonia::core::audio::Signal;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

pub const FRAME_BYTES: usize = 160; // 20ms of 8kHz mono μ-law
pub const SAMPLE_RATE: u32 = 8000;
const ULAW_SILENCE: u8 = 0xFF;

// --- μ-law <-> linear PCM16 -------------------------------------------------

/// ITU-T G.711 μ-law decode table lookup built at compile time is overkill
/// here; the bit-twiddling form is small and fast enough for 8kHz audio.
pub fn ulaw_decode_sample(u: u8) -> i16 {
    let u = !u;
    let sign = u & 0x80;
    let exponent = (u >> 4) & 0x07;
    let mantissa = u & 0x0F;
    let mut sample = ((mantissa as i32) << 3) + 0x84;
    sample <<= exponent;
    sample -= 0x84;
    if sign != 0 {
        -(sample as i16).max(i16::MIN + 1)
    } else {
        sample as i16
    }
}

pub fn ulaw_encode_sample(pcm: i16) -> u8 {
    const BIAS: i32 = 0x84;
    const CLIP: i32 = 32635;
    let sign = if pcm < 0 { 0x80u8 } else { 0 };
    let mut sample = pcm as i32;
    if sign != 0 {
        sample = -sample;
    }
    sample = sample.min(CLIP) + BIAS;

    let mut exponent = 7i32;
    let mut mask = 0x4000i32;
    while exponent > 0 && (sample & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (sample >> (exponent + 3)) & 0x0F;
    !(sign | ((exponent as u8) << 4) | mantissa as u8)
}

pub fn ulaw_to_pcm(ulaw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ulaw.len() * 2);
    for &b in ulaw {
        out.extend_from_slice(&ulaw_decode_sample(b).to_le_bytes());
    }
    out
}

pub fn pcm_to_ulaw(pcm: &[u8]) -> Vec<u8> {
    pcm.chunks_exact(2)
        .map(|c| ulaw_encode_sample(i16::from_le_bytes([c[0], c[1]])))
        .collect()
}

/// Integer RMS of a little-endian PCM16 buffer, matching `audioop.rms`.
pub fn calculate_rms_pcm(pcm: &[u8]) -> f32 {
    if pcm.len() < 2 {
        return 0.0;
    }
    let samples: Vec<i64> = pcm
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as i64)
        .collect();
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: i64 = samples.iter().map(|s| s * s).sum();
    ((sum_sq as f64 / samples.len() as f64).sqrt()) as f32
}

/// RMS computed directly from a μ-law frame (decode, then measure).
pub fn calculate_rms_ulaw(ulaw: &[u8]) -> f32 {
    calculate_rms_pcm(&ulaw_to_pcm(ulaw))
}

// --- base64 framing ----------------------------------------------------------

pub fn base64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn base64_decode(s: &str) -> Result<Vec<u8>, VoiceError> {
    STANDARD
        .decode(s)
        .map_err(|e| VoiceError::Decoder(format!("bad base64 payload: {e}")))
}

/// Split a growing buffer of μ-law bytes into exact 160-byte frames,
/// returning the frames and leaving any remainder in `buf`.
pub fn drain_frames(buf: &mut Vec<u8>) -> Vec<[u8; FRAME_BYTES]> {
    let mut frames = Vec::new();
    let full = buf.len() / FRAME_BYTES;
    for i in 0..full {
        let start = i * FRAME_BYTES;
        let mut frame = [0u8; FRAME_BYTES];
        frame.copy_from_slice(&buf[start..start + FRAME_BYTES]);
        frames.push(frame);
    }
    buf.drain(0..full * FRAME_BYTES);
    frames
}

/// Pad the tail of a partial frame with μ-law silence (0xFF) and return it.
pub fn pad_tail_frame(buf: &[u8]) -> Option<[u8; FRAME_BYTES]> {
    if buf.is_empty() {
        return None;
    }
    let mut frame = [ULAW_SILENCE; FRAME_BYTES];
    frame[..buf.len()].copy_from_slice(buf);
    Some(frame)
}

// --- MP3 -> μ-law frame pipeline --------------------------------------------

/// Decode an MP3 file's samples into mono f32 @ its native sample rate.
fn decode_mp3_mono(bytes: &[u8]) -> Result<(Vec<f32>, u32), VoiceError> {
    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| VoiceError::Decoder(format!("mp3 probe failed: {e}")))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| VoiceError::Decoder("no decodable track".into()))?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| VoiceError::Decoder(format!("no mp3 decoder: {e}")))?;

    let mut mono = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(_)) => break,
            Err(e) => return Err(VoiceError::Decoder(format!("mp3 demux error: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(VoiceError::Decoder(format!("mp3 decode error: {e}"))),
        };
        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut sample_buf =
            symphonia::core::audio::SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let samples = sample_buf.samples();
        for frame in samples.chunks_exact(channels) {
            let sum: f32 = frame.iter().sum();
            mono.push(sum / channels as f32);
        }
    }
    Ok((mono, sample_rate))
}

fn linear_resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - idx as f64) as f32;
        let a = samples.get(idx).copied().unwrap_or(0.0);
        let b = samples.get(idx + 1).copied().unwrap_or(a);
        out.push(a + (b - a) * frac);
    }
    out
}

/// One-pole low-pass / high-pass filters, applied in the time domain. Cheap
/// and adequate for telephony-bandwidth shaping; not intended as a precision
/// DSP filter.
fn one_pole_lowpass(samples: &mut [f32], cutoff_hz: f32, sample_rate: f32) {
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    let dt = 1.0 / sample_rate;
    let alpha = dt / (rc + dt);
    let mut prev = 0.0f32;
    for s in samples.iter_mut() {
        prev += alpha * (*s - prev);
        *s = prev;
    }
}

fn one_pole_highpass(samples: &mut [f32], cutoff_hz: f32, sample_rate: f32) {
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    let dt = 1.0 / sample_rate;
    let alpha = rc / (rc + dt);
    let mut prev_in = 0.0f32;
    let mut prev_out = 0.0f32;
    for s in samples.iter_mut() {
        let out = alpha * (prev_out + *s - prev_in);
        prev_in = *s;
        prev_out = out;
        *s = out;
    }
}

fn peak_normalize(samples: &mut [f32], headroom_dbfs: f32) {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak <= 1e-9 {
        return;
    }
    let target = 10f32.powf(headroom_dbfs / 20.0);
    let gain = target / peak;
    for s in samples.iter_mut() {
        *s *= gain;
    }
}

/// Soft-knee-free downward compressor: gain reduction past the threshold at
/// a fixed ratio, with one-pole attack/release smoothing of the envelope.
fn compress(samples: &mut [f32], threshold_dbfs: f32, ratio: f32, attack_ms: f32, release_ms: f32, sample_rate: f32) {
    let threshold = 10f32.powf(threshold_dbfs / 20.0);
    let attack_coef = (-1.0 / (attack_ms / 1000.0 * sample_rate)).exp();
    let release_coef = (-1.0 / (release_ms / 1000.0 * sample_rate)).exp();
    let mut envelope = 0.0f32;
    for s in samples.iter_mut() {
        let rect = s.abs();
        let coef = if rect > envelope { attack_coef } else { release_coef };
        envelope = coef * envelope + (1.0 - coef) * rect;
        if envelope > threshold {
            let over_db = 20.0 * (envelope / threshold).log10();
            let reduced_db = over_db * (1.0 - 1.0 / ratio);
            let gain = 10f32.powf(-reduced_db / 20.0);
            *s *= gain;
        }
    }
}

fn apply_fades(samples: &mut [f32], fade_ms: f32, sample_rate: f32) {
    let n = ((fade_ms / 1000.0) * sample_rate) as usize;
    let n = n.min(samples.len() / 2);
    for i in 0..n {
        let g = i as f32 / n as f32;
        samples[i] *= g;
        let j = samples.len() - 1 - i;
        samples[j] *= g;
    }
}

fn silence_pad(samples: &[f32], pad_ms: f32, sample_rate: f32) -> Vec<f32> {
    let n = ((pad_ms / 1000.0) * sample_rate) as usize;
    let mut out = vec![0.0f32; n];
    out.extend_from_slice(samples);
    out.extend(std::iter::repeat(0.0f32).take(n));
    out
}

fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        let v = (clamped * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Full MP3 → 160-byte μ-law frame pipeline, per C1's design.
pub fn encode_mp3_to_ulaw_frames(mp3_bytes: &[u8]) -> Result<Vec<[u8; FRAME_BYTES]>, VoiceError> {
    let (mono, rate) = decode_mp3_mono(mp3_bytes)?;
    let mut samples = linear_resample(&mono, rate, SAMPLE_RATE);

    one_pole_lowpass(&mut samples, 3400.0, SAMPLE_RATE as f32);
    one_pole_highpass(&mut samples, 120.0, SAMPLE_RATE as f32);
    peak_normalize(&mut samples, -3.0);
    compress(&mut samples, -18.0, 2.0, 5.0, 50.0, SAMPLE_RATE as f32);
    apply_fades(&mut samples, 8.0, SAMPLE_RATE as f32);
    let padded = silence_pad(&samples, 20.0, SAMPLE_RATE as f32);

    let pcm16 = f32_to_pcm16(&padded);
    let mut ulaw = pcm_to_ulaw(&pcm16);

    let mut frames = Vec::new();
    frames.extend(drain_frames(&mut ulaw));
    if let Some(tail) = pad_tail_frame(&ulaw) {
        frames.push(tail);
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulaw_roundtrip_is_close() {
        for pcm in [-20000i16, -1000, 0, 1000, 20000] {
            let u = ulaw_encode_sample(pcm);
            let back = ulaw_decode_sample(u);
            assert!((back as i32 - pcm as i32).abs() < 600, "pcm={pcm} back={back}");
        }
    }

    #[test]
    fn rms_of_silence_is_zero() {
        let pcm = vec![0u8; 320];
        assert_eq!(calculate_rms_pcm(&pcm), 0.0);
    }

    #[test]
    fn rms_of_loud_tone_is_high() {
        let mut pcm = Vec::new();
        for i in 0..160 {
            let v = if i % 2 == 0 { 20000i16 } else { -20000i16 };
            pcm.extend_from_slice(&v.to_le_bytes());
        }
        assert!(calculate_rms_pcm(&pcm) > 15000.0);
    }

    #[test]
    fn drain_frames_leaves_remainder() {
        let mut buf = vec![1u8; FRAME_BYTES * 2 + 10];
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn pad_tail_frame_fills_with_ulaw_silence() {
        let buf = vec![5u8; 10];
        let frame = pad_tail_frame(&buf).unwrap();
        assert_eq!(&frame[..10], &buf[..]);
        assert!(frame[10..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn base64_roundtrip() {
        let data = vec![1, 2, 3, 255, 0];
        let encoded = base64_encode(&data);
        let decoded = base64_decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }
}

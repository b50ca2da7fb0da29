//! PCM16 wire codec: f32 samples <-> 16-bit little-endian PCM <-> base64.
//!
//! The remote endpoint speaks 16-bit signed little-endian PCM, mono, 24 kHz,
//! carried base64-encoded inside JSON envelopes. Scaling is asymmetric on
//! purpose: non-negative samples scale by 32767, negative by 32768, so the
//! full signed range is used without clipping the negative rail. The decoder
//! applies the exact inverse; round-trips stay within one quantization step.

use crate::error::{VoiceError, VoiceResult};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;

/// Maximum round-trip error for a sample in [-1, 1]: one quantization step.
pub const QUANTIZATION_STEP: f32 = 1.0 / 32767.0;

/// Encode f32 samples in [-1, 1] to little-endian PCM16 bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = sample.clamp(-1.0, 1.0);
        let v = if s < 0.0 {
            (s * 32768.0) as i16
        } else {
            (s * 32767.0) as i16
        };
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian PCM16 bytes back to f32 samples in [-1, 1].
pub fn decode_pcm16(bytes: &[u8]) -> VoiceResult<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::Codec(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        let v = i16::from_le_bytes([chunk[0], chunk[1]]);
        let s = if v < 0 {
            v as f32 / 32768.0
        } else {
            v as f32 / 32767.0
        };
        samples.push(s);
    }
    Ok(samples)
}

/// Encode samples straight to the base64 form used on the wire.
pub fn encode_base64(samples: &[f32]) -> String {
    B64.encode(encode_pcm16(samples))
}

/// Decode a base64 PCM16 chunk from the wire back to f32 samples.
pub fn decode_base64(payload: &str) -> VoiceResult<Vec<f32>> {
    let bytes = B64
        .decode(payload)
        .map_err(|e| VoiceError::Codec(format!("invalid base64 audio: {}", e)))?;
    decode_pcm16(&bytes)
}

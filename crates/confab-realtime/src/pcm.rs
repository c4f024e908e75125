//! PCM16 audio helpers for the binary frame path.
//!
//! Outbound audio travels as raw little-endian PCM16 binary frames; some
//! deployments fall back to base64 inside JSON, so both codecs live here.

use base64::Engine;
use bytes::Bytes;

/// Sample rate both directions of the audio stream use (mono PCM16).
pub const SESSION_PCM16_SAMPLE_RATE: u32 = 24_000;

/// Packs i16 samples into a little-endian binary frame.
pub fn samples_to_frame(pcm16: &[i16]) -> Bytes {
    let mut bytes = Vec::with_capacity(pcm16.len() * 2);
    for sample in pcm16 {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    Bytes::from(bytes)
}

/// Unpacks a little-endian binary frame into i16 samples. A trailing odd
/// byte is dropped.
pub fn frame_to_samples(frame: &[u8]) -> Vec<i16> {
    frame
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Encodes i16 samples as base64 for the JSON fallback path.
pub fn encode_i16(pcm16: &[i16]) -> String {
    let pcm16_bytes: Vec<u8> = pcm16
        .iter()
        .flat_map(|&sample| sample.to_le_bytes().to_vec())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&pcm16_bytes)
}

/// Decodes a base64 fragment into i16 samples. Invalid base64 decodes to an
/// empty buffer rather than failing the stream.
pub fn decode_i16(base64_fragment: &str) -> Vec<i16> {
    if let Ok(pcm16_bytes) = base64::engine::general_purpose::STANDARD.decode(base64_fragment) {
        frame_to_samples(&pcm16_bytes)
    } else {
        tracing::error!("Failed to decode base64 fragment to i16");
        Vec::new()
    }
}

//! # PCM Frame Codec
//!
//! Converts between floating-point audio frames and the transport-safe blob
//! format exchanged with the upstream conversational agent.
//!
//! ## Wire format:
//! Linear PCM, 16-bit signed, little-endian, mono, base64-encoded, tagged
//! with a MIME-like type carrying the sample rate: `audio/pcm;rate=16000`.
//! Capture runs at 16 kHz; agent responses arrive at 24 kHz.

use crate::error::AppError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Sample rate of microphone audio sent upstream.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of agent audio scheduled for playback.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// A fixed-duration slice of mono f32 PCM samples. Immutable once produced
/// by the capture pipeline.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of this frame in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Transport-safe encoding of a frame's raw bytes plus its format tag.
///
/// Serializes with camelCase field names to match the upstream wire format
/// (`{"data": "...", "mimeType": "audio/pcm;rate=16000"}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedBlob {
    pub data: String,
    pub mime_type: String,
}

impl EncodedBlob {
    /// Parse the sample rate out of the MIME-like tag, e.g.
    /// `audio/pcm;rate=24000` → 24000. Falls back to the playback rate when
    /// the tag carries no rate parameter.
    pub fn sample_rate(&self) -> u32 {
        self.mime_type
            .split(';')
            .filter_map(|part| part.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
            .unwrap_or(PLAYBACK_SAMPLE_RATE)
    }
}

/// Encode a captured frame for transmission.
///
/// Samples are scaled by 32768 into the 16-bit range. Rust float-to-int `as`
/// casts saturate, so out-of-range input clamps at the i16 bounds instead of
/// wrapping. Serialization is little-endian, then base64.
pub fn encode_frame(frame: &AudioFrame) -> EncodedBlob {
    let mut bytes = Vec::with_capacity(frame.samples.len() * 2);
    for &sample in &frame.samples {
        let quantized = (sample * 32768.0) as i16;
        // Writing to a Vec cannot fail
        bytes.write_i16::<LittleEndian>(quantized).unwrap();
    }

    EncodedBlob {
        data: BASE64.encode(&bytes),
        mime_type: format!("audio/pcm;rate={}", frame.sample_rate),
    }
}

/// Decode a received blob back into floating-point samples, de-interleaving
/// channels when more than one is declared.
///
/// ## Returns:
/// One `Vec<f32>` per channel, each sample reconstructed as `i16 / 32768.0`.
///
/// ## Errors:
/// `AppError::Decode` on invalid base64, odd byte counts, a zero channel
/// count, or a byte count that does not divide evenly into whole frames.
pub fn decode_blob(blob: &EncodedBlob, channels: usize) -> Result<Vec<Vec<f32>>, AppError> {
    if channels == 0 {
        return Err(AppError::Decode("channel count must be at least 1".to_string()));
    }

    let bytes = BASE64
        .decode(&blob.data)
        .map_err(|e| AppError::Decode(format!("invalid base64 payload: {}", e)))?;

    if bytes.is_empty() {
        return Err(AppError::Decode("empty audio payload".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(AppError::Decode(
            "audio payload length must be even for 16-bit samples".to_string(),
        ));
    }

    let total_samples = bytes.len() / 2;
    if total_samples % channels != 0 {
        return Err(AppError::Decode(format!(
            "{} samples do not divide into {} channels",
            total_samples, channels
        )));
    }

    let frame_count = total_samples / channels;
    let mut cursor = Cursor::new(bytes);
    let mut out = vec![Vec::with_capacity(frame_count); channels];

    for _ in 0..frame_count {
        for channel in out.iter_mut() {
            // Length was validated above, so every read succeeds
            let sample = cursor.read_i16::<LittleEndian>().unwrap();
            channel.push(sample as f32 / 32768.0);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_from_i16(samples: &[i16], rate: u32) -> EncodedBlob {
        let mut bytes = Vec::new();
        for &s in samples {
            bytes.write_i16::<LittleEndian>(s).unwrap();
        }
        EncodedBlob {
            data: BASE64.encode(&bytes),
            mime_type: format!("audio/pcm;rate={}", rate),
        }
    }

    #[test]
    fn test_round_trip_within_quantization_error() {
        let original = vec![0.0f32, 0.5, -0.5, 32767.0 / 32768.0];
        let frame = AudioFrame::new(original.clone(), CAPTURE_SAMPLE_RATE);

        let blob = encode_frame(&frame);
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");

        let decoded = decode_blob(&blob, 1).unwrap();
        assert_eq!(decoded.len(), 1);
        for (a, b) in original.iter().zip(decoded[0].iter()) {
            assert!(
                (a - b).abs() <= 1.0 / 32768.0,
                "round trip drifted: {} vs {}",
                a,
                b
            );
        }
    }

    #[test]
    fn test_known_i16_values_survive() {
        let blob = blob_from_i16(&[0, 16384, -16384, 32767], PLAYBACK_SAMPLE_RATE);
        let decoded = decode_blob(&blob, 1).unwrap();
        let expected = [0.0, 0.5, -0.5, 32767.0 / 32768.0];
        for (got, want) in decoded[0].iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_out_of_range_samples_saturate() {
        let frame = AudioFrame::new(vec![1.5, -1.5], CAPTURE_SAMPLE_RATE);
        let blob = encode_frame(&frame);
        let decoded = decode_blob(&blob, 1).unwrap();
        assert!((decoded[0][0] - 32767.0 / 32768.0).abs() < 1e-6);
        assert!((decoded[0][1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_deinterleave() {
        // Interleaved L/R pairs
        let blob = blob_from_i16(&[100, -100, 200, -200, 300, -300], PLAYBACK_SAMPLE_RATE);
        let decoded = decode_blob(&blob, 2).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].len(), 3);
        assert!(decoded[0].iter().all(|&s| s > 0.0));
        assert!(decoded[1].iter().all(|&s| s < 0.0));
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        let bad_base64 = EncodedBlob {
            data: "not base64!!!".to_string(),
            mime_type: "audio/pcm;rate=24000".to_string(),
        };
        assert!(matches!(
            decode_blob(&bad_base64, 1),
            Err(AppError::Decode(_))
        ));

        let odd_bytes = EncodedBlob {
            data: BASE64.encode([1u8, 2, 3]),
            mime_type: "audio/pcm;rate=24000".to_string(),
        };
        assert!(matches!(decode_blob(&odd_bytes, 1), Err(AppError::Decode(_))));

        let blob = blob_from_i16(&[1, 2, 3], PLAYBACK_SAMPLE_RATE);
        assert!(matches!(decode_blob(&blob, 2), Err(AppError::Decode(_))));
    }

    #[test]
    fn test_mime_rate_parsing() {
        let blob = blob_from_i16(&[0], 24_000);
        assert_eq!(blob.sample_rate(), 24_000);

        let untagged = EncodedBlob {
            data: String::new(),
            mime_type: "audio/pcm".to_string(),
        };
        assert_eq!(untagged.sample_rate(), PLAYBACK_SAMPLE_RATE);
    }
}

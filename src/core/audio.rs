//! PCM16 audio codec.
//!
//! Conversion between signed 16-bit sample buffers and the base64 text that
//! travels inside JSON envelopes. Samples are little-endian, 2 bytes each,
//! encoded with the standard base64 alphabet.
//!
//! # Example
//!
//! ```rust
//! use waav_relay::core::audio;
//!
//! let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN];
//! let text = audio::encode_samples(&samples);
//! assert_eq!(audio::decode_samples(&text).unwrap(), samples);
//! ```

use base64::prelude::*;
use thiserror::Error;

/// Bytes encoded per base64 pass. Must stay a multiple of 3 so that the
/// concatenated chunk encodings carry no intermediate padding.
const ENCODE_CHUNK_BYTES: usize = 0x8000 * 3;

/// Number of leading samples inspected by [`validate`].
pub const VALIDATION_PREFIX_SAMPLES: usize = 1024;

/// Errors produced by the audio codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioCodecError {
    /// The payload is not valid base64 or cannot form whole 16-bit samples
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// A sample fell outside the signed 16-bit range
    #[error("Sample {value} at index {index} is outside the 16-bit range")]
    InvalidSampleRange { index: usize, value: i64 },
}

// =============================================================================
// Byte-level primitives
// =============================================================================

/// Encode a raw byte buffer as base64 text.
pub fn encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(ENCODE_CHUNK_BYTES) {
        BASE64_STANDARD.encode_string(chunk, &mut out);
    }
    out
}

/// Decode base64 text into raw bytes.
pub fn decode_bytes(text: &str) -> Result<Vec<u8>, AudioCodecError> {
    BASE64_STANDARD
        .decode(text.trim())
        .map_err(|e| AudioCodecError::Decode(e.to_string()))
}

// =============================================================================
// Sample-level codec
// =============================================================================

/// Encode PCM16 samples as base64 text (little-endian, 2 bytes per sample).
pub fn encode_samples(samples: &[i16]) -> String {
    // ENCODE_CHUNK_BYTES is even, so sample boundaries line up with chunks
    let samples_per_chunk = ENCODE_CHUNK_BYTES / 2;
    let mut out = String::with_capacity((samples.len() * 2).div_ceil(3) * 4);
    let mut buf = Vec::with_capacity(ENCODE_CHUNK_BYTES);

    for chunk in samples.chunks(samples_per_chunk) {
        buf.clear();
        for sample in chunk {
            buf.extend_from_slice(&sample.to_le_bytes());
        }
        BASE64_STANDARD.encode_string(&buf, &mut out);
    }
    out
}

/// Decode base64 text back into PCM16 samples.
///
/// Fails if the text is not valid base64 or if the decoded byte length is
/// odd. The result is never truncated.
pub fn decode_samples(text: &str) -> Result<Vec<i16>, AudioCodecError> {
    let bytes = decode_bytes(text)?;
    samples_from_le_bytes(&bytes)
}

/// Reassemble PCM16 samples from little-endian bytes.
pub fn samples_from_le_bytes(bytes: &[u8]) -> Result<Vec<i16>, AudioCodecError> {
    if bytes.len() % 2 != 0 {
        return Err(AudioCodecError::Decode(format!(
            "byte length {} is not a multiple of 2",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

// =============================================================================
// Validation and buffer helpers
// =============================================================================

/// Range-check the leading samples of a widened buffer.
///
/// Only the first [`VALIDATION_PREFIX_SAMPLES`] values are inspected so the
/// check stays constant-time on large buffers.
pub fn validate_wide(samples: &[i64]) -> Result<(), AudioCodecError> {
    validate_prefix(samples.iter().copied())
}

/// Range-check an already narrowed PCM16 buffer.
///
/// An `i16` cannot hold an out-of-range value; this guards decode paths
/// that widen or reinterpret samples before handing them on.
pub fn validate(samples: &[i16]) -> Result<(), AudioCodecError> {
    validate_prefix(samples.iter().map(|&s| s as i64))
}

fn validate_prefix(samples: impl Iterator<Item = i64>) -> Result<(), AudioCodecError> {
    let min = i16::MIN as i64;
    let max = i16::MAX as i64;

    for (index, value) in samples.take(VALIDATION_PREFIX_SAMPLES).enumerate() {
        if value < min || value > max {
            return Err(AudioCodecError::InvalidSampleRange { index, value });
        }
    }
    Ok(())
}

/// Concatenate sample buffers preserving order.
pub fn combine<B: AsRef<[i16]>>(buffers: &[B]) -> Vec<i16> {
    let total = buffers.iter().map(|b| b.as_ref().len()).sum();
    let mut out = Vec::with_capacity(total);
    for buffer in buffers {
        out.extend_from_slice(buffer.as_ref());
    }
    out
}

/// Silent buffer of `len` samples.
pub fn zeros(len: usize) -> Vec<i16> {
    vec![0i16; len]
}

/// Build PCM16 samples from arbitrary numbers, clamping instead of wrapping.
pub fn samples_from_numeric(values: &[f64]) -> Vec<i16> {
    values.iter().map(|&v| clamp_sample(v)).collect()
}

/// Narrow integer samples to PCM16, clamping instead of wrapping.
pub fn samples_from_wide(values: &[i64]) -> Vec<i16> {
    values
        .iter()
        .map(|&v| v.clamp(i16::MIN as i64, i16::MAX as i64) as i16)
        .collect()
}

#[inline]
fn clamp_sample(value: f64) -> i16 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_extremes() {
        let samples = vec![0, 1, -1, 256, -256, i16::MAX, i16::MIN];
        let text = encode_samples(&samples);
        assert_eq!(decode_samples(&text).unwrap(), samples);
    }

    #[test]
    fn test_little_endian_layout() {
        // 0x0102 -> [0x02, 0x01]
        let text = encode_samples(&[0x0102]);
        assert_eq!(decode_bytes(&text).unwrap(), vec![0x02, 0x01]);
    }

    #[test]
    fn test_empty_buffers() {
        assert_eq!(encode_samples(&[]), "");
        assert!(decode_samples("").unwrap().is_empty());
    }

    #[test]
    fn test_chunked_encoding_matches_single_pass() {
        let len = ENCODE_CHUNK_BYTES * 2 + 7;
        let samples: Vec<i16> = (0..len).map(|i| (i % 65536) as u16 as i16).collect();

        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let single_pass = BASE64_STANDARD.encode(&bytes);

        assert_eq!(encode_samples(&samples), single_pass);
        assert_eq!(encode_bytes(&bytes), single_pass);
        assert_eq!(decode_samples(&single_pass).unwrap(), samples);
    }

    #[test]
    fn test_odd_length_rejected() {
        let text = BASE64_STANDARD.encode([1u8, 2, 3]);
        match decode_samples(&text) {
            Err(AudioCodecError::Decode(msg)) => assert!(msg.contains("multiple of 2")),
            other => panic!("Expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_alphabet_rejected() {
        assert!(matches!(
            decode_samples("not*base64!"),
            Err(AudioCodecError::Decode(_))
        ));
    }

    #[test]
    fn test_validate_wide_range() {
        assert!(validate_wide(&[0, 32767, -32768]).is_ok());
        assert_eq!(
            validate_wide(&[0, 40000]),
            Err(AudioCodecError::InvalidSampleRange {
                index: 1,
                value: 40000
            })
        );
    }

    #[test]
    fn test_validate_only_checks_prefix() {
        let mut wide = vec![0i64; VALIDATION_PREFIX_SAMPLES + 10];
        wide[VALIDATION_PREFIX_SAMPLES + 5] = 100_000;
        assert!(validate_wide(&wide).is_ok());

        wide[3] = -100_000;
        assert!(validate_wide(&wide).is_err());
    }

    #[test]
    fn test_validate_narrow_buffer() {
        assert!(validate(&zeros(4096)).is_ok());
    }

    #[test]
    fn test_combine_preserves_order() {
        let combined = combine(&[vec![1, 2], vec![], vec![3]]);
        assert_eq!(combined, vec![1, 2, 3]);
    }

    #[test]
    fn test_zeros() {
        let silent = zeros(100);
        assert_eq!(silent.len(), 100);
        assert!(silent.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_numeric_clamps_instead_of_wrapping() {
        let samples = samples_from_numeric(&[40000.0, -40000.0, 1.4, 1.6, -0.5, f64::NAN]);
        assert_eq!(samples, vec![i16::MAX, i16::MIN, 1, 2, -1, 0]);
    }
}

//! PCM16 codec: float samples to base64 little-endian 16-bit PCM and back.

use crate::audio::PlaybackItem;
use crate::error::{Result, VoiceError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Convert one float sample to a signed 16-bit value.
///
/// Clamps to [-1, 1]. Negative values scale by 32768, non-negative by 32767, so both
/// ends of the range map exactly onto `i16::MIN` and `i16::MAX`.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 { (s * 32768.0) as i16 } else { (s * 32767.0) as i16 }
}

/// Convert a signed 16-bit value back to a float sample.
#[inline]
pub fn i16_to_sample(value: i16) -> f32 {
    value as f32 / 32768.0
}

/// Encode float samples as base64 PCM16 (little-endian). Empty input yields "".
pub fn encode(samples: &[f32]) -> String {
    if samples.is_empty() {
        return String::new();
    }
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    STANDARD.encode(&bytes)
}

/// Decode base64 PCM16 into a playback item tagged with `sample_rate`.
pub fn decode(encoded: &str, sample_rate: u32) -> Result<PlaybackItem> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| VoiceError::decode(format!("invalid base64: {}", e)))?;

    if bytes.len() % 2 != 0 {
        return Err(VoiceError::decode(format!(
            "invalid data length for PCM16: {} (must be even)",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();

    Ok(PlaybackItem::new(samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_round_trip() {
        assert_eq!(encode(&[]), "");
        let item = decode("", 16000).unwrap();
        assert!(item.samples().is_empty());
        assert_eq!(item.sample_rate(), 16000);
    }

    #[test]
    fn test_scaling_is_asymmetric() {
        assert_eq!(sample_to_i16(1.0), i16::MAX);
        assert_eq!(sample_to_i16(-1.0), i16::MIN);
        assert_eq!(sample_to_i16(0.0), 0);
        assert_eq!(sample_to_i16(0.5), 16383);
        assert_eq!(sample_to_i16(-0.5), -16384);
    }

    #[test]
    fn test_out_of_range_clamps() {
        assert_eq!(sample_to_i16(3.5), i16::MAX);
        assert_eq!(sample_to_i16(-12.0), i16::MIN);
    }

    #[test]
    fn test_little_endian_layout() {
        // 1.0 -> 0x7FFF -> [0xFF, 0x7F]
        let encoded = encode(&[1.0]);
        assert_eq!(STANDARD.decode(encoded).unwrap(), vec![0xFF, 0x7F]);
    }

    #[test]
    fn test_decode_odd_length() {
        let encoded = STANDARD.encode([0x01, 0x02, 0x03]);
        let err = decode(&encoded, 16000).unwrap_err();
        assert!(matches!(err, VoiceError::DecodeError(_)));
    }

    #[test]
    fn test_decode_invalid_base64() {
        let err = decode("not base64!!", 16000).unwrap_err();
        assert!(matches!(err, VoiceError::DecodeError(_)));
    }

    #[test]
    fn test_decode_duration() {
        let encoded = encode(&vec![0.1; 1600]);
        let item = decode(&encoded, 16000).unwrap();
        assert!((item.duration_secs() - 0.1).abs() < 1e-9);
    }
}

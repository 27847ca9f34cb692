//! Peak level metering for PCM16 audio.

/// Largest positive PCM16 magnitude; a level of 1.0 corresponds to it.
const FULL_SCALE: f32 = i16::MAX as f32;

/// Normalized peak level of a little-endian PCM16 buffer, in `[0.0, 1.0]`.
///
/// Empty and odd-length (malformed) buffers meter as silence. `i16::MIN`
/// is one step louder than full scale and is clamped to 1.0.
pub fn peak_level(pcm16le: &[u8]) -> f32 {
    if pcm16le.is_empty() || pcm16le.len() % 2 != 0 {
        return 0.0;
    }
    let peak = pcm16le
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]).unsigned_abs())
        .max()
        .unwrap_or(0);
    (f32::from(peak) / FULL_SCALE).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn empty_buffer_is_silent() {
        assert_eq!(peak_level(&[]), 0.0);
    }

    #[test]
    fn odd_length_buffer_is_silent() {
        assert_eq!(peak_level(&[0xFF, 0x7F, 0x01]), 0.0);
    }

    #[test]
    fn zero_samples_are_silent() {
        assert_eq!(peak_level(&le_bytes(&[0; 480])), 0.0);
    }

    #[test]
    fn max_positive_sample_is_full_scale() {
        let level = peak_level(&le_bytes(&[0, 12, i16::MAX, -4]));
        assert!((level - 1.0).abs() < 1e-6);
    }

    #[test]
    fn min_negative_sample_is_clamped() {
        assert_eq!(peak_level(&le_bytes(&[i16::MIN])), 1.0);
    }

    #[test]
    fn negative_peak_counts_by_magnitude() {
        let level = peak_level(&le_bytes(&[100, -16384, 200]));
        assert!((level - 0.5).abs() < 1e-3);
    }

    #[test]
    fn decodes_little_endian() {
        // 0x0100 = 256 little-endian; read big-endian it would be 1.
        let level = peak_level(&[0x00, 0x01]);
        assert!((level - 256.0 / 32767.0).abs() < 1e-6);
    }

    #[test]
    fn level_is_always_bounded() {
        for step in (i16::MIN..=i16::MAX).step_by(257) {
            let level = peak_level(&le_bytes(&[step, step / 3, 7]));
            assert!((0.0..=1.0).contains(&level), "level {level} for {step}");
        }
    }
}

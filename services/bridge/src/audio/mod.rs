//! Audio pipeline: container parsing, framing and sample-rate conversion for
//! PCM16 mono.

pub mod chunker;
pub mod resample;
pub mod wav;

use base64::Engine;
use bytes::Bytes;

pub use chunker::Chunker;
pub use resample::{PcmResampler, ResampleError, ResamplerBank, ResamplerFactory, RubatoFactory};
pub use wav::{ParsedAudio, WavFormat};

/// Bytes per PCM16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// An immutable run of PCM16 mono samples at a known rate.
///
/// Frames are forwarded, queued or resampled whole; nothing consumes part of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub pcm: Bytes,
}

impl AudioFrame {
    pub fn new(sample_rate: u32, pcm: impl Into<Bytes>) -> Self {
        Self {
            sample_rate,
            pcm: pcm.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }
}

/// Decodes base64 into raw bytes.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(data)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Interprets little-endian bytes as i16 samples. A trailing odd byte is ignored.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Converts a slice of i16 samples to normalized f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Converts normalized f32 samples back to i16, clamping out-of-range values.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Averages interleaved channels down to mono.
pub fn downmix_to_mono(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_pcm16_bytes_conversion() {
        let samples = vec![256i16, -256, 0, i16::MAX, i16::MIN];
        let bytes = pcm16_to_le_bytes(&samples);
        assert_eq!(bytes.len(), samples.len() * BYTES_PER_SAMPLE);
        assert_eq!(&bytes[..2], &[0x00, 0x01]);
        assert_eq!(pcm16_from_le_bytes(&bytes), samples);

        // Odd trailing byte can't form a sample
        assert_eq!(pcm16_from_le_bytes(&[0x01, 0x00, 0x7f]), vec![1]);
        assert!(pcm16_from_le_bytes(&[]).is_empty());
    }

    #[test]
    fn test_convert_i16_to_f32() {
        let result = convert_i16_to_f32(&[i16::MIN, 0, 16384]);
        assert_abs_diff_eq!(result[0], -1.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[1], 0.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[2], 0.5, epsilon = 0.0001);
    }

    #[test]
    fn test_convert_f32_to_i16_clamps() {
        let result = convert_f32_to_i16(&[0.5, -1.0, 2.0, -2.0, f32::NAN]);
        assert_eq!(result[0], 16384);
        assert_eq!(result[1], i16::MIN);
        assert_eq!(result[2], i16::MAX);
        assert_eq!(result[3], i16::MIN);
        assert_eq!(result[4], 0);
    }

    #[test]
    fn test_downmix_to_mono() {
        let stereo = [100i16, 300, -200, -400, i16::MAX, i16::MAX];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![200, -300, i16::MAX]);
        assert_eq!(downmix_to_mono(&stereo, 1), stereo.to_vec());
    }

    #[test]
    fn test_base64_helpers() {
        let encoded = encode_base64(&[1, 2, 3]);
        assert_eq!(decode_base64(&encoded).unwrap(), vec![1, 2, 3]);
        assert!(decode_base64("not base64!").is_err());
    }
}

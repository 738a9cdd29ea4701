use bytes::Bytes;
use std::time::Duration;

/// Splits PCM buffers into fixed-duration frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    frame_bytes: usize,
}

impl Chunker {
    /// A chunker emitting frames of exactly `frame_bytes` (the last one may be shorter).
    pub fn with_frame_bytes(frame_bytes: usize) -> Self {
        Self {
            frame_bytes: frame_bytes.max(1),
        }
    }

    /// Frame size is `sample_rate × channels × bytes_per_sample × duration`,
    /// rounded down to whole sample blocks and never below one block.
    ///
    /// 48 kHz, mono, 16-bit, 100 ms gives 9600 bytes.
    pub fn for_format(
        sample_rate: u32,
        channels: usize,
        bytes_per_sample: usize,
        duration: Duration,
    ) -> Self {
        let block = (channels * bytes_per_sample).max(1);
        let samples = sample_rate as u128 * duration.as_micros() / 1_000_000;
        let frame_bytes = (samples as usize).saturating_mul(block);
        Self::with_frame_bytes(frame_bytes.max(block))
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Yields frames in offset order. Each frame shares `pcm`'s allocation; an
    /// empty buffer yields nothing.
    pub fn split(&self, pcm: Bytes) -> impl Iterator<Item = Bytes> + use<> {
        let frame_bytes = self.frame_bytes;
        let len = pcm.len();
        (0..len)
            .step_by(frame_bytes)
            .map(move |start| pcm.slice(start..(start + frame_bytes).min(len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
    }

    #[test]
    fn test_reference_frame_size() {
        let chunker = Chunker::for_format(48000, 1, 2, Duration::from_millis(100));
        assert_eq!(chunker.frame_bytes(), 9600);

        let chunker = Chunker::for_format(8000, 1, 2, Duration::from_millis(20));
        assert_eq!(chunker.frame_bytes(), 320);
    }

    #[test]
    fn test_frame_size_has_a_floor() {
        let chunker = Chunker::for_format(8000, 1, 2, Duration::from_micros(10));
        assert_eq!(chunker.frame_bytes(), 2);
        assert_eq!(Chunker::with_frame_bytes(0).frame_bytes(), 1);
    }

    #[test]
    fn test_small_buffer_is_one_frame() {
        let chunker = Chunker::with_frame_bytes(9600);
        let frames: Vec<_> = chunker.split(buffer(100)).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 100);
    }

    #[test]
    fn test_empty_buffer_yields_nothing() {
        let chunker = Chunker::with_frame_bytes(320);
        assert_eq!(chunker.split(Bytes::new()).count(), 0);
    }

    #[test]
    fn test_frames_reassemble_to_input() {
        for (len, size) in [(1usize, 1usize), (9600, 9600), (9601, 9600), (1000, 7), (19199, 9600)] {
            let input = buffer(len);
            let frames: Vec<_> = Chunker::with_frame_bytes(size).split(input.clone()).collect();

            assert_eq!(frames.len(), len.div_ceil(size), "len={len} size={size}");
            assert!(frames.iter().all(|f| !f.is_empty() && f.len() <= size));
            assert!(frames[..frames.len() - 1].iter().all(|f| f.len() == size));
            assert_eq!(frames.concat(), input.to_vec());
        }
    }
}

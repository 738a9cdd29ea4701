//! Lenient RIFF/WAVE parsing.
//!
//! Upstream audio normally arrives as a complete WAV file, but streaming
//! encoders often write placeholder sizes. The parser never fails: anything
//! it cannot make sense of is handed back untouched as raw PCM.

use bytes::Bytes;

const RIFF_MAGIC: &[u8; 4] = b"RIFF";
const WAVE_MAGIC: &[u8; 4] = b"WAVE";
const FMT_CHUNK: &[u8; 4] = b"fmt ";
const DATA_CHUNK: &[u8; 4] = b"data";

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const FMT_MIN_LEN: usize = 16;

/// Fields recovered from a `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

/// The outcome of [`parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAudio {
    /// `None` for raw input or a container without a usable `fmt ` chunk.
    pub format: Option<WavFormat>,
    /// The PCM payload; shares the input allocation.
    pub payload: Bytes,
}

impl ParsedAudio {
    fn raw(buffer: Bytes) -> Self {
        Self {
            format: None,
            payload: buffer,
        }
    }
}

/// Extracts format and payload from a WAV container, or passes `buffer`
/// through unchanged when it is not one.
///
/// Chunks whose declared size runs past the end of the buffer are clamped to
/// it. If no `data` chunk is found the original buffer is returned.
pub fn parse(buffer: Bytes) -> ParsedAudio {
    if buffer.len() < RIFF_HEADER_LEN
        || &buffer[0..4] != RIFF_MAGIC
        || &buffer[8..12] != WAVE_MAGIC
    {
        return ParsedAudio::raw(buffer);
    }

    let mut format = None;
    let mut payload = None;
    let mut offset = RIFF_HEADER_LEN;

    while offset + CHUNK_HEADER_LEN <= buffer.len() {
        let id = &buffer[offset..offset + 4];
        let declared = read_u32(&buffer, offset + 4) as usize;
        let body_start = offset + CHUNK_HEADER_LEN;
        let body_end = body_start.saturating_add(declared).min(buffer.len());

        if id == FMT_CHUNK && body_end - body_start >= FMT_MIN_LEN {
            format = Some(WavFormat {
                channels: read_u16(&buffer, body_start + 2),
                sample_rate: read_u32(&buffer, body_start + 4),
                bits_per_sample: read_u16(&buffer, body_start + 14),
            });
        } else if id == DATA_CHUNK && payload.is_none() {
            payload = Some(buffer.slice(body_start..body_end));
        }

        if format.is_some() && payload.is_some() {
            break;
        }
        // Chunk bodies are padded to an even length.
        offset = body_end.saturating_add(declared & 1);
    }

    match payload {
        Some(payload) => ParsedAudio { format, payload },
        None => ParsedAudio::raw(buffer),
    }
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

//! Sample-rate conversion for PCM16 mono.
//!
//! Resamplers keep history between calls and are not safe to share, so each
//! provider bridge owns a [`ResamplerBank`] holding one instance per active
//! rate pair.

use super::{AudioFrame, convert_f32_to_i16, convert_i16_to_f32, pcm16_from_le_bytes, pcm16_to_le_bytes};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::collections::{HashMap, hash_map::Entry};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ResampleError {
    #[error("Unsupported rate pair {from} Hz -> {to} Hz")]
    UnsupportedRates { from: u32, to: u32 },
    #[error("Failed to build resampler: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),
    #[error("Resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// A stateful converter between two fixed rates.
pub trait PcmResampler: Send {
    /// Converts the next run of samples. Output may lag input by up to one
    /// internal block; leftover input is kept for the next call.
    fn process(&mut self, samples: &[i16]) -> Result<Vec<i16>, ResampleError>;

    /// Converts whatever input is still held back, padding the last block.
    fn flush(&mut self) -> Result<Vec<i16>, ResampleError>;

    /// Drops held input and filter history.
    fn reset(&mut self);
}

/// Produces resamplers for a rate pair.
pub trait ResamplerFactory: Send + Sync {
    fn create(&self, from_rate: u32, to_rate: u32) -> Result<Box<dyn PcmResampler>, ResampleError>;
}

/// Builds cubic [`FastFixedIn`] resamplers working on 10 ms input blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct RubatoFactory;

impl ResamplerFactory for RubatoFactory {
    fn create(&self, from_rate: u32, to_rate: u32) -> Result<Box<dyn PcmResampler>, ResampleError> {
        Ok(Box::new(RubatoResampler::new(from_rate, to_rate)?))
    }
}

pub struct RubatoResampler {
    inner: FastFixedIn<f32>,
    ratio: f64,
    pending: Vec<f32>,
}

impl RubatoResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, ResampleError> {
        if from_rate == 0 || to_rate == 0 {
            return Err(ResampleError::UnsupportedRates {
                from: from_rate,
                to: to_rate,
            });
        }
        let block = (from_rate as usize / 100).max(1);
        let ratio = to_rate as f64 / from_rate as f64;
        let inner = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Cubic,
            block,
            1,
        )?;
        Ok(Self {
            inner,
            ratio,
            pending: Vec::with_capacity(block * 2),
        })
    }
}

impl PcmResampler for RubatoResampler {
    fn process(&mut self, samples: &[i16]) -> Result<Vec<i16>, ResampleError> {
        self.pending.extend(convert_i16_to_f32(samples));
        let mut resampled = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let block: Vec<f32> = self.pending.drain(..needed).collect();
            let out = self.inner.process(&[block], None)?;
            resampled.extend_from_slice(&out[0]);
        }
        Ok(convert_f32_to_i16(&resampled))
    }

    fn flush(&mut self) -> Result<Vec<i16>, ResampleError> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let remainder = [std::mem::take(&mut self.pending)];
        // The last block is zero-padded; keep only the output it owes.
        let owed = (remainder[0].len() as f64 * self.ratio).ceil() as usize + self.inner.output_delay();
        let mut out = self.inner.process_partial(Some(&remainder[..]), None)?;
        let tail = &mut out[0];
        tail.truncate(owed);
        Ok(convert_f32_to_i16(tail))
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.inner.reset();
    }
}

/// The resamplers owned by one provider bridge, created lazily per rate pair.
pub struct ResamplerBank {
    factory: Arc<dyn ResamplerFactory>,
    active: HashMap<(u32, u32), Box<dyn PcmResampler>>,
}

impl ResamplerBank {
    pub fn new(factory: Arc<dyn ResamplerFactory>) -> Self {
        Self {
            factory,
            active: HashMap::new(),
        }
    }

    /// Converts `frame` to `to_rate`. Frames already at `to_rate` are returned as is.
    pub fn convert(&mut self, frame: AudioFrame, to_rate: u32) -> Result<AudioFrame, ResampleError> {
        if frame.sample_rate == to_rate {
            return Ok(frame);
        }
        let resampler = match self.active.entry((frame.sample_rate, to_rate)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!(from = frame.sample_rate, to = to_rate, "Creating resampler");
                entry.insert(self.factory.create(frame.sample_rate, to_rate)?)
            }
        };
        let samples = resampler.process(&pcm16_from_le_bytes(&frame.pcm))?;
        Ok(AudioFrame::new(to_rate, pcm16_to_le_bytes(&samples)))
    }

    /// Converts a frame that ends a stretch of audio: nothing is held back,
    /// and the next frame starts from clean history.
    pub fn convert_complete(&mut self, frame: AudioFrame, to_rate: u32) -> Result<AudioFrame, ResampleError> {
        let from_rate = frame.sample_rate;
        let mut converted = self.convert(frame, to_rate)?;
        if let Some(resampler) = self.active.get_mut(&(from_rate, to_rate)) {
            let tail = resampler.flush()?;
            resampler.reset();
            if !tail.is_empty() {
                let mut pcm = converted.pcm.to_vec();
                pcm.extend(pcm16_to_le_bytes(&tail));
                converted = AudioFrame::new(to_rate, pcm);
            }
        }
        Ok(converted)
    }

    /// Discards held audio in every resampler producing `to_rate`.
    pub fn reset_into(&mut self, to_rate: u32) {
        for ((_, to), resampler) in self.active.iter_mut() {
            if *to == to_rate {
                resampler.reset();
            }
        }
    }

    #[cfg(test)]
    fn active_pairs(&self) -> usize {
        self.active.len()
    }
}

//! Streaming format conversion for the wire format (16-bit mono 16 kHz)
//!
//! The converter is stateful on purpose: rubato's FFT resampler carries
//! fractional-phase state across buffer boundaries. A per-buffer
//! nearest-sample ratio conversion restarts the phase on every callback and
//! produces audible seams at buffer edges.

use rubato::{FftFixedIn, Resampler};

/// Input chunk fed to the resampler in one pass.
const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Wire sample rate expected by both recognition backends.
pub const WIRE_SAMPLE_RATE: u32 = 16_000;

/// Samples per emitted wire frame (100 ms at 16 kHz).
pub const WIRE_FRAME_SAMPLES: usize = 1600;

/// Gain applied to the mean absolute amplitude before clamping to [0, 1].
const LEVEL_GAIN: f32 = 5.0;

/// Mean-absolute-amplitude level of one buffer, scaled and clamped to [0, 1].
/// Each reading fully replaces the previous one; no smoothing state is kept.
pub fn buffer_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s.abs()).sum();
    (sum / samples.len() as f32 * LEVEL_GAIN).clamp(0.0, 1.0)
}

/// Converts arbitrary-rate mono f32 input into fixed frames of 16 kHz i16.
pub struct FrameResampler {
    resampler: Option<FftFixedIn<f32>>,
    in_buf: Vec<f32>,
    pending: Vec<i16>,
}

impl FrameResampler {
    pub fn new(in_rate: u32) -> Result<Self, rubato::ResamplerConstructionError> {
        let resampler = if in_rate != WIRE_SAMPLE_RATE {
            Some(FftFixedIn::<f32>::new(
                in_rate as usize,
                WIRE_SAMPLE_RATE as usize,
                RESAMPLER_CHUNK_SIZE,
                1,
                1,
            )?)
        } else {
            None
        };

        Ok(Self {
            resampler,
            in_buf: Vec::with_capacity(RESAMPLER_CHUNK_SIZE),
            pending: Vec::with_capacity(WIRE_FRAME_SAMPLES),
        })
    }

    /// Feed mono samples; `emit` is called with each complete wire frame.
    pub fn push(&mut self, mut src: &[f32], emit: &mut impl FnMut(&[i16])) {
        if self.resampler.is_none() {
            let converted: Vec<i16> = src.iter().map(|&s| f32_to_i16(s)).collect();
            self.frame_out(&converted, emit);
            return;
        }

        while !src.is_empty() {
            let space = RESAMPLER_CHUNK_SIZE - self.in_buf.len();
            let take = space.min(src.len());
            self.in_buf.extend_from_slice(&src[..take]);
            src = &src[take..];

            if self.in_buf.len() == RESAMPLER_CHUNK_SIZE {
                self.process_chunk(emit);
            }
        }
    }

    /// Flush remaining input (zero-padded to a chunk) and the partial frame.
    pub fn finish(&mut self, emit: &mut impl FnMut(&[i16])) {
        if self.resampler.is_some() && !self.in_buf.is_empty() {
            self.in_buf.resize(RESAMPLER_CHUNK_SIZE, 0.0);
            self.process_chunk(emit);
        }

        if !self.pending.is_empty() {
            self.pending.resize(WIRE_FRAME_SAMPLES, 0);
            let frame = std::mem::take(&mut self.pending);
            emit(&frame);
        }
    }

    fn process_chunk(&mut self, emit: &mut impl FnMut(&[i16])) {
        let Some(resampler) = self.resampler.as_mut() else {
            return;
        };
        match resampler.process(&[&self.in_buf[..]], None) {
            Ok(out) => {
                let converted: Vec<i16> = out[0].iter().map(|&s| f32_to_i16(s)).collect();
                self.frame_out(&converted, emit);
            }
            Err(e) => {
                tracing::warn!("resampler chunk dropped: {}", e);
            }
        }
        self.in_buf.clear();
    }

    fn frame_out(&mut self, mut data: &[i16], emit: &mut impl FnMut(&[i16])) {
        while !data.is_empty() {
            let space = WIRE_FRAME_SAMPLES - self.pending.len();
            let take = space.min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() == WIRE_FRAME_SAMPLES {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }
}

fn f32_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Downmix an interleaved buffer to mono by channel averaging.
pub fn downmix_to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

//! Audio capture and wire-format conversion

mod capture;
pub mod resampler;

pub use capture::AudioCaptureEngine;
pub use resampler::{buffer_level, FrameResampler, WIRE_FRAME_SAMPLES, WIRE_SAMPLE_RATE};

use crate::error::SessionError;
use tokio::sync::mpsc;

/// One buffer of wire-format audio. Produced by the capture engine,
/// consumed once by the active backend, never retained.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFrame {
    pub fn wire(samples: Vec<i16>) -> Self {
        Self {
            samples,
            sample_rate: WIRE_SAMPLE_RATE,
            channels: 1,
        }
    }

    /// Little-endian PCM bytes as sent on the duplex socket.
    pub fn pcm_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Hand-off from the capture pipeline to the active backend.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Frame(AudioFrame),
    Level(f32),
}

/// Seam over the microphone tap so the session controller can be driven
/// without a physical device.
pub trait CaptureSource: Send + Sync {
    /// Acquire the single exclusive tap and return the event stream.
    fn start(&self) -> Result<mpsc::Receiver<CaptureEvent>, SessionError>;

    /// Release the tap. Idempotent.
    fn stop(&self);
}

//! Audio capture using cpal
//!
//! One exclusive input tap at the device's native format. The cpal callback
//! runs on a real-time context and must never block on I/O: it only downmixes,
//! computes a level reading, and hands the buffer to the worker thread through
//! an unbounded channel. The worker owns the stateful resampler and pushes
//! wire frames to the backend with `try_send`, dropping on backpressure.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex as StdMutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;

use super::resampler::{buffer_level, downmix_to_mono, FrameResampler};
use super::{AudioFrame, CaptureEvent, CaptureSource};
use crate::error::SessionError;

/// Backend channel depth; at 100 ms frames this is several seconds of slack.
const CHANNEL_CAPACITY: usize = 64;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(3);

pub struct AudioCaptureEngine {
    is_capturing: Arc<AtomicBool>,
    // Bumped on every start. A worker whose generation is superseded exits
    // even if the flag has already been re-armed by the next session.
    generation: Arc<AtomicU64>,
    worker: StdMutex<Option<thread::JoinHandle<()>>>,
}

impl AudioCaptureEngine {
    pub fn new() -> Self {
        Self {
            is_capturing: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            worker: StdMutex::new(None),
        }
    }
}

impl Default for AudioCaptureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for AudioCaptureEngine {
    fn start(&self) -> Result<tokio_mpsc::Receiver<CaptureEvent>, SessionError> {
        if self.is_capturing.swap(true, Ordering::SeqCst) {
            return Err(SessionError::Configuration(
                "audio tap already active".into(),
            ));
        }

        // Invalidate any previous tap and wait for its worker to let go of
        // the device before a new stream opens.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(handle) = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take() {
            let _ = handle.join();
        }

        let (event_tx, event_rx) = tokio_mpsc::channel::<CaptureEvent>(CHANNEL_CAPACITY);
        let (startup_tx, startup_rx) = std_mpsc::channel::<Result<(), SessionError>>();
        let is_capturing = self.is_capturing.clone();
        let current_generation = self.generation.clone();

        let spawned = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                if let Err(e) = run_capture(
                    generation,
                    current_generation.clone(),
                    event_tx,
                    is_capturing.clone(),
                    startup_tx,
                ) {
                    tracing::error!("audio capture ended with error: {}", e);
                }
                // A superseded worker must not clobber the next session's
                // flag.
                if current_generation.load(Ordering::SeqCst) == generation {
                    is_capturing.store(false, Ordering::SeqCst);
                }
            });

        let spawned = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.is_capturing.store(false, Ordering::SeqCst);
                return Err(SessionError::Configuration(format!(
                    "failed to spawn capture thread: {}",
                    e
                )));
            }
        };
        *self.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(spawned);

        match startup_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => {
                tracing::info!("audio capture started");
                Ok(event_rx)
            }
            Ok(Err(e)) => {
                self.is_capturing.store(false, Ordering::SeqCst);
                Err(e)
            }
            Err(_) => {
                self.is_capturing.store(false, Ordering::SeqCst);
                Err(SessionError::Configuration(
                    "audio engine did not start in time".into(),
                ))
            }
        }
    }

    fn stop(&self) {
        if self.is_capturing.swap(false, Ordering::SeqCst) {
            tracing::info!("audio capture stopped");
        }
    }
}

/// True while this start's tap is the one the engine considers live.
fn tap_active(is_capturing: &AtomicBool, current_generation: &AtomicU64, generation: u64) -> bool {
    is_capturing.load(Ordering::SeqCst)
        && current_generation.load(Ordering::SeqCst) == generation
}

fn run_capture(
    generation: u64,
    current_generation: Arc<AtomicU64>,
    event_tx: tokio_mpsc::Sender<CaptureEvent>,
    is_capturing: Arc<AtomicBool>,
    startup_tx: std_mpsc::Sender<Result<(), SessionError>>,
) -> Result<(), SessionError> {
    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(d) => d,
        None => {
            let err = SessionError::Configuration("no input device available".into());
            let _ = startup_tx.send(Err(err.clone()));
            return Err(err);
        }
    };

    let supported = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let err = classify_device_error(&e.to_string());
            let _ = startup_tx.send(Err(err.clone()));
            return Err(err);
        }
    };

    let native_rate = supported.sample_rate().0;
    let native_channels = supported.channels();
    let sample_format = supported.sample_format();
    let config = supported.config();

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        rate = native_rate,
        channels = native_channels,
        format = ?sample_format,
        "input tap acquired"
    );

    let mut resampler = match FrameResampler::new(native_rate) {
        Ok(r) => r,
        Err(e) => {
            let err = SessionError::Configuration(format!("resampler setup failed: {}", e));
            let _ = startup_tx.send(Err(err.clone()));
            return Err(err);
        }
    };

    // Callback -> worker hand-off. Unbounded std channel: sends never block
    // the real-time context.
    let (buf_tx, buf_rx) = std_mpsc::channel::<(Vec<f32>, f32)>();

    let err_fn = |err| tracing::warn!("input stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => {
            let capturing = is_capturing.clone();
            let current = current_generation.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !tap_active(&capturing, &current, generation) {
                        return;
                    }
                    let mono = downmix_to_mono(data, native_channels);
                    let level = buffer_level(&mono);
                    let _ = buf_tx.send((mono, level));
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let capturing = is_capturing.clone();
            let current = current_generation.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    if !tap_active(&capturing, &current, generation) {
                        return;
                    }
                    let as_f32: Vec<f32> =
                        data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                    let mono = downmix_to_mono(&as_f32, native_channels);
                    let level = buffer_level(&mono);
                    let _ = buf_tx.send((mono, level));
                },
                err_fn,
                None,
            )
        }
        other => {
            let err =
                SessionError::Configuration(format!("unsupported sample format: {:?}", other));
            let _ = startup_tx.send(Err(err.clone()));
            return Err(err);
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let err = classify_device_error(&e.to_string());
            let _ = startup_tx.send(Err(err.clone()));
            return Err(err);
        }
    };

    if let Err(e) = stream.play() {
        let err = classify_device_error(&e.to_string());
        let _ = startup_tx.send(Err(err.clone()));
        return Err(err);
    }

    let _ = startup_tx.send(Ok(()));

    // Worker loop: stateful resample to wire frames, non-blocking hand-off.
    while tap_active(&is_capturing, &current_generation, generation) {
        match buf_rx.recv_timeout(Duration::from_millis(100)) {
            Ok((mono, level)) => {
                if event_tx.try_send(CaptureEvent::Level(level)).is_err() {
                    tracing::trace!("level reading dropped, channel full");
                }
                let mut emit = |frame: &[i16]| {
                    let event = CaptureEvent::Frame(AudioFrame::wire(frame.to_vec()));
                    if event_tx.try_send(event).is_err() {
                        tracing::warn!("audio frame dropped, channel full");
                    }
                };
                resampler.push(&mono, &mut emit);
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    drop(stream);
    Ok(())
}

/// Host audio errors do not carry a dedicated permission variant; fold the
/// message into the session error kinds.
fn classify_device_error(message: &str) -> SessionError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not permitted") {
        SessionError::PermissionDenied(message.to_string())
    } else {
        SessionError::Configuration(message.to_string())
    }
}

//! Session lifecycle
//!
//! One controller, at most one active session. `start` wires the capture tap
//! to the selected backend and spawns two tasks: a dispatcher that folds the
//! backend's event stream into the live transcript, and the silence watchdog.
//! `stop` is the single teardown path shared by hotkey release, watchdog
//! expiry, and backend failure: stop capture first, ask the backend to
//! finalize, wait a bounded time for its event stream to complete, then hand
//! the final transcript to the sink.
//!
//! Both entry points are no-ops when called in the wrong state, so a stray
//! second press or a watchdog racing an explicit release cannot double-start
//! or double-deliver.

use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::asr::{BackendKind, RecognitionEvent};
use crate::audio::{CaptureEvent, CaptureSource};
use crate::business::transcript::TranscriptAggregator;
use crate::business::watchdog::SilenceWatchdog;
use crate::error::SessionError;
use crate::platform::TranscriptSink;

/// Session-scoped timings, injectable so tests can compress them.
#[derive(Debug, Clone)]
pub struct SessionTiming {
    /// Watchdog poll interval.
    pub watchdog_poll: Duration,
    /// Silence span after which the watchdog releases the session.
    pub silence_timeout: Duration,
    /// Bound on how long `stop` waits for the backend to acknowledge
    /// completion before force-releasing it.
    pub stop_grace: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            watchdog_poll: Duration::from_millis(500),
            silence_timeout: Duration::from_secs(3),
            stop_grace: Duration::from_secs(2),
        }
    }
}

/// UI-facing snapshot published on every observable change.
#[derive(Debug, Clone, Default)]
pub struct LiveStatus {
    pub recording: bool,
    pub transcript: String,
    pub level: f32,
    pub error: Option<String>,
}

/// Seam over the two recognition backends. `start` consumes the capture
/// event stream and yields the recognition event stream; `finish` requests
/// graceful finalization; `release` abandons the backend without waiting.
pub trait RecognitionBackend: Send + Sync {
    fn start(
        &self,
        audio: mpsc::Receiver<CaptureEvent>,
    ) -> BoxFuture<'_, Result<mpsc::Receiver<RecognitionEvent>, SessionError>>;
    fn finish(&self);
    fn release(&self);
}

struct ActiveSession {
    transcript: Arc<StdMutex<TranscriptAggregator>>,
    error: Arc<StdMutex<Option<SessionError>>>,
    dispatcher: JoinHandle<()>,
    watchdog: JoinHandle<()>,
    done_rx: oneshot::Receiver<()>,
}

pub struct SessionController {
    capture: Arc<dyn CaptureSource>,
    backend: Arc<dyn RecognitionBackend>,
    backend_kind: BackendKind,
    sink: Arc<dyn TranscriptSink>,
    timing: SessionTiming,
    status_tx: watch::Sender<LiveStatus>,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionController {
    pub fn new(
        capture: Arc<dyn CaptureSource>,
        backend: Arc<dyn RecognitionBackend>,
        backend_kind: BackendKind,
        sink: Arc<dyn TranscriptSink>,
        timing: SessionTiming,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(LiveStatus::default());
        Arc::new(Self {
            capture,
            backend,
            backend_kind,
            sink,
            timing,
            status_tx,
            active: Mutex::new(None),
        })
    }

    pub fn status(&self) -> watch::Receiver<LiveStatus> {
        self.status_tx.subscribe()
    }

    /// Begin a session. A second press while one is active is ignored.
    pub async fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            tracing::debug!("session already active, press ignored");
            return Ok(());
        }

        let audio_rx = match self.capture.start() {
            Ok(rx) => rx,
            Err(e) => {
                self.publish_error(&e);
                return Err(e);
            }
        };
        let events = match self.backend.start(audio_rx).await {
            Ok(events) => events,
            Err(e) => {
                self.capture.stop();
                self.publish_error(&e);
                return Err(e);
            }
        };

        tracing::info!(backend = ?self.backend_kind, "session started");
        let transcript = Arc::new(StdMutex::new(TranscriptAggregator::new(self.backend_kind)));
        let error = Arc::new(StdMutex::new(None));
        let last_event = Arc::new(StdMutex::new(Instant::now()));
        self.status_tx.send_replace(LiveStatus {
            recording: true,
            ..LiveStatus::default()
        });

        let (done_tx, done_rx) = oneshot::channel();
        let dispatcher = tokio::spawn(dispatch(
            events,
            transcript.clone(),
            error.clone(),
            last_event.clone(),
            self.status_tx.clone(),
            Arc::downgrade(self),
            done_tx,
        ));
        let watchdog = SilenceWatchdog {
            poll: self.timing.watchdog_poll,
            timeout: self.timing.silence_timeout,
            last_event,
            transcript: transcript.clone(),
            controller: Arc::downgrade(self),
        };
        let watchdog = tokio::spawn(watchdog.run());

        *active = Some(ActiveSession {
            transcript,
            error,
            dispatcher,
            watchdog,
            done_rx,
        });
        Ok(())
    }

    /// End the session and deliver the final transcript. The shared teardown
    /// path for release, watchdog, and backend failure; a no-op when nothing
    /// is active.
    pub async fn stop(&self) {
        let session = match self.active.lock().await.take() {
            Some(session) => session,
            None => return,
        };

        // Ordering matters: the tap goes quiet before the backend is asked
        // to finalize, so no frame arrives after finish.
        self.capture.stop();
        self.backend.finish();
        session.watchdog.abort();

        if timeout(self.timing.stop_grace, session.done_rx).await.is_err() {
            tracing::warn!("backend did not complete in time, releasing");
            self.backend.release();
            session.dispatcher.abort();
        }

        let transcript = session
            .transcript
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .current();
        let error = session
            .error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();

        if let Some(e) = &error {
            tracing::warn!(error = %e, "session ended with error");
        } else {
            tracing::info!(chars = transcript.len(), "session ended");
        }
        self.status_tx.send_replace(LiveStatus {
            recording: false,
            transcript: transcript.clone(),
            level: 0.0,
            error: error.as_ref().map(|e| e.to_string()),
        });
        if !transcript.is_empty() {
            self.sink.deliver(&transcript);
        }
    }

    fn publish_error(&self, error: &SessionError) {
        self.status_tx.send_replace(LiveStatus {
            recording: false,
            error: Some(error.to_string()),
            ..LiveStatus::default()
        });
    }
}

/// Fold the backend event stream into the shared session state. Signals
/// `done_tx` when the stream reaches a terminal event, then routes through
/// the regular stop path in case the terminal event was unsolicited.
async fn dispatch(
    mut events: mpsc::Receiver<RecognitionEvent>,
    transcript: Arc<StdMutex<TranscriptAggregator>>,
    error: Arc<StdMutex<Option<SessionError>>>,
    last_event: Arc<StdMutex<Instant>>,
    status_tx: watch::Sender<LiveStatus>,
    controller: Weak<SessionController>,
    done_tx: oneshot::Sender<()>,
) {
    while let Some(event) = events.recv().await {
        match event {
            RecognitionEvent::Started => {
                tracing::debug!("backend ready");
            }
            RecognitionEvent::Transcript { text, is_final } => {
                let current = {
                    let mut t = transcript.lock().unwrap_or_else(|p| p.into_inner());
                    t.apply(&text, is_final);
                    t.current()
                };
                *last_event.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
                status_tx.send_modify(|s| s.transcript = current);
            }
            RecognitionEvent::Level(level) => {
                status_tx.send_modify(|s| s.level = level);
            }
            RecognitionEvent::Finished => break,
            RecognitionEvent::Failed(e) => {
                *error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e);
                break;
            }
        }
    }
    let _ = done_tx.send(());
    if let Some(controller) = controller.upgrade() {
        controller.stop().await;
    }
}

//! Remote recognition client
//!
//! Duplex protocol state machine over one persistent WebSocket. JSON control
//! envelopes and raw binary PCM share the connection in both directions. The
//! socket's send and receive paths live in a single driver task: the receive
//! side re-arms for the whole session, sends are best-effort with transport
//! errors surfaced as session-fatal. The client never reconnects mid-session.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use super::protocol::{parse_server_event, Command, ServerEvent, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use super::RecognitionEvent;
use crate::audio::{CaptureEvent, WIRE_SAMPLE_RATE};
use crate::error::SessionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Depth of the recognition event channel handed to the dispatcher.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// Delay between socket establishment and `run-task`. A placeholder for a
    /// proper open acknowledgment; kept to preserve observable timing.
    pub settle_delay: Duration,
    /// How long the socket stays open after `finish-task` so the terminal
    /// response can arrive.
    pub finish_grace: Duration,
}

impl RemoteConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            settle_delay: Duration::from_millis(500),
            finish_grace: Duration::from_secs(1),
        }
    }
}

/// Protocol lifecycle. One (socket, task_id) pair per session, torn down only
/// after a terminal event or an explicit finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Disconnected,
    Connecting,
    AwaitingTaskStart,
    Streaming,
    Finishing,
    Closed,
}

pub struct RemoteRecognitionClient {
    config: RemoteConfig,
    task_id: StdMutex<String>,
    state: Arc<StdMutex<ProtocolState>>,
    // Replaced on every start so a finish aimed at a dead session cannot
    // leave a stale permit for the next one.
    finish: StdMutex<Arc<Notify>>,
    finish_requested: AtomicBool,
    driver: StdMutex<Option<JoinHandle<()>>>,
}

impl RemoteRecognitionClient {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            task_id: StdMutex::new(String::new()),
            state: Arc::new(StdMutex::new(ProtocolState::Disconnected)),
            finish: StdMutex::new(Arc::new(Notify::new())),
            finish_requested: AtomicBool::new(false),
            driver: StdMutex::new(None),
        }
    }

    pub fn state(&self) -> ProtocolState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn task_id(&self) -> String {
        self.task_id
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Connect and run the protocol. Returns the recognition event stream.
    pub async fn start(
        &self,
        audio_rx: mpsc::Receiver<CaptureEvent>,
    ) -> Result<mpsc::Receiver<RecognitionEvent>, SessionError> {
        // Fresh per-session identity and finish signal.
        let task_id = Uuid::new_v4().simple().to_string();
        *self.task_id.lock().unwrap_or_else(|p| p.into_inner()) = task_id.clone();
        let finish = Arc::new(Notify::new());
        *self.finish.lock().unwrap_or_else(|p| p.into_inner()) = finish.clone();
        self.finish_requested.store(false, Ordering::SeqCst);
        set_state(&self.state, ProtocolState::Connecting);

        let mut request = self
            .config
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::Transport(format!("bad endpoint: {}", e)))?;
        let auth = HeaderValue::from_str(&format!("bearer {}", self.config.api_key))
            .map_err(|e| SessionError::Transport(format!("bad credential: {}", e)))?;
        request.headers_mut().insert("Authorization", auth);

        let (ws, _) = connect_async(request).await.map_err(|e| {
            set_state(&self.state, ProtocolState::Disconnected);
            SessionError::Transport(e.to_string())
        })?;

        tracing::info!(task_id = %task_id, "recognition socket connected");

        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let driver = Driver {
            ws,
            task_id,
            config: self.config.clone(),
            state: self.state.clone(),
            finish,
            events: event_tx,
        };

        let handle = tokio::spawn(driver.run(audio_rx));
        *self.driver.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);

        Ok(event_rx)
    }

    /// Request `finish-task`. Idempotent; only the first call per session has
    /// any effect.
    pub fn finish(&self) {
        if !self.finish_requested.swap(true, Ordering::SeqCst) {
            self.finish
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .notify_one();
        }
    }

    /// Drop the driver task if it is still alive. Called after the bounded
    /// completion wait; the driver closes the socket on its own exit paths.
    pub fn release(&self) {
        if let Some(handle) = self.driver.lock().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
        }
    }
}

fn set_state(state: &Arc<StdMutex<ProtocolState>>, next: ProtocolState) {
    let mut guard = state.lock().unwrap_or_else(|p| p.into_inner());
    if *guard != next {
        tracing::debug!("protocol state: {:?} -> {:?}", *guard, next);
        *guard = next;
    }
}

struct Driver {
    ws: WsStream,
    task_id: String,
    config: RemoteConfig,
    state: Arc<StdMutex<ProtocolState>>,
    finish: Arc<Notify>,
    events: mpsc::Sender<RecognitionEvent>,
}

impl Driver {
    async fn run(mut self, mut audio_rx: mpsc::Receiver<CaptureEvent>) {
        // Settle before run-task; the service rejects commands sent in the
        // same instant the socket opens.
        sleep(self.config.settle_delay).await;

        let run_task = Command::run_task(&self.task_id, &self.config.model, WIRE_SAMPLE_RATE);
        let payload = match run_task.to_json() {
            Ok(p) => p,
            Err(e) => {
                self.fail(SessionError::Transport(format!("encode run-task: {}", e)))
                    .await;
                return;
            }
        };
        if let Err(e) = self.ws.send(Message::Text(payload)).await {
            self.fail(SessionError::Transport(e.to_string())).await;
            return;
        }
        set_state(&self.state, ProtocolState::AwaitingTaskStart);

        let mut streaming = false;
        let mut finish_sent = false;
        let mut audio_open = true;
        let mut grace: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                msg = self.ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !self.handle_control(&text, &mut streaming).await {
                                break;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            self.fail(SessionError::Transport(e.to_string())).await;
                            break;
                        }
                        None => {
                            if finish_sent {
                                // Peer closed without task-finished; the session
                                // is still complete from our side.
                                set_state(&self.state, ProtocolState::Closed);
                                let _ = self.events.send(RecognitionEvent::Finished).await;
                            } else {
                                self.fail(SessionError::Transport(
                                    "connection closed by peer".into(),
                                ))
                                .await;
                            }
                            break;
                        }
                    }
                }
                capture = audio_rx.recv(), if audio_open && !finish_sent => {
                    match capture {
                        Some(CaptureEvent::Frame(frame)) => {
                            if streaming {
                                if let Err(e) =
                                    self.ws.send(Message::Binary(frame.pcm_bytes())).await
                                {
                                    self.fail(SessionError::Transport(e.to_string())).await;
                                    break;
                                }
                            } else {
                                // Audio ahead of task-started is dropped,
                                // not buffered.
                                tracing::trace!("frame dropped before task-started");
                            }
                        }
                        Some(CaptureEvent::Level(level)) => {
                            let _ = self.events.try_send(RecognitionEvent::Level(level));
                        }
                        None => audio_open = false,
                    }
                }
                _ = self.finish.notified(), if !finish_sent => {
                    finish_sent = true;
                    set_state(&self.state, ProtocolState::Finishing);
                    match Command::finish_task(&self.task_id).to_json() {
                        Ok(payload) => {
                            if let Err(e) = self.ws.send(Message::Text(payload)).await {
                                self.fail(SessionError::Transport(e.to_string())).await;
                                break;
                            }
                        }
                        Err(e) => {
                            self.fail(SessionError::Protocol(e.to_string())).await;
                            break;
                        }
                    }
                    grace = Some(Box::pin(sleep(self.config.finish_grace)));
                }
                _ = async {
                    match grace.as_mut() {
                        Some(timer) => timer.await,
                        None => std::future::pending().await,
                    }
                } => {
                    tracing::warn!("teardown grace expired without task-finished");
                    set_state(&self.state, ProtocolState::Closed);
                    let _ = self.events.send(RecognitionEvent::Finished).await;
                    break;
                }
            }
        }

        let _ = self.ws.close(None).await;
        set_state(&self.state, ProtocolState::Closed);
    }

    /// Returns false when the protocol reached a terminal event.
    async fn handle_control(&mut self, raw: &str, streaming: &mut bool) -> bool {
        let event = match parse_server_event(raw) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("unparseable control message ignored: {}", e);
                return true;
            }
        };

        match event {
            ServerEvent::TaskStarted => {
                *streaming = true;
                set_state(&self.state, ProtocolState::Streaming);
                let _ = self.events.send(RecognitionEvent::Started).await;
                true
            }
            ServerEvent::ResultGenerated { text, is_final } => {
                let _ = self
                    .events
                    .send(RecognitionEvent::Transcript { text, is_final })
                    .await;
                true
            }
            ServerEvent::TaskFinished => {
                set_state(&self.state, ProtocolState::Closed);
                let _ = self.events.send(RecognitionEvent::Finished).await;
                false
            }
            ServerEvent::TaskFailed { message } => {
                set_state(&self.state, ProtocolState::Closed);
                let _ = self
                    .events
                    .send(RecognitionEvent::Failed(SessionError::Protocol(message)))
                    .await;
                false
            }
            ServerEvent::Other(name) => {
                tracing::trace!("ignoring event {}", name);
                true
            }
        }
    }

    async fn fail(&mut self, error: SessionError) {
        set_state(&self.state, ProtocolState::Closed);
        let _ = self.events.send(RecognitionEvent::Failed(error)).await;
    }
}

//! Recognition backends
//!
//! Two interchangeable backends feed the same transcript pipeline: the remote
//! duplex-protocol client and the on-device continuous engine. Both consume
//! the capture event stream and emit a typed recognition event stream.

pub mod local;
pub mod protocol;
pub mod remote;

pub use local::{LocalRecognitionEngine, RecognizerFactory, RecognizerTask, RestartPolicy, TaskEvent};
pub use remote::{RemoteConfig, RemoteRecognitionClient};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::audio::CaptureEvent;
use crate::business::RecognitionBackend;
use crate::error::SessionError;

/// Which engine a session was bound to. Chosen once at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Remote,
    Local,
}

/// Tagged event stream produced by a backend and consumed by the session
/// dispatcher.
#[derive(Debug, Clone)]
pub enum RecognitionEvent {
    /// The backend is ready and audio is flowing.
    Started,
    /// A recognition result; interim when `is_final` is false.
    Transcript { text: String, is_final: bool },
    /// Latest audio level from the shared tap, in [0, 1].
    Level(f32),
    /// The backend completed normally after finalize.
    Finished,
    /// Session-fatal backend failure.
    Failed(SessionError),
}

impl RecognitionBackend for RemoteRecognitionClient {
    fn start(
        &self,
        audio: mpsc::Receiver<CaptureEvent>,
    ) -> BoxFuture<'_, Result<mpsc::Receiver<RecognitionEvent>, SessionError>> {
        Box::pin(RemoteRecognitionClient::start(self, audio))
    }

    fn finish(&self) {
        RemoteRecognitionClient::finish(self);
    }

    fn release(&self) {
        RemoteRecognitionClient::release(self);
    }
}

impl RecognitionBackend for LocalRecognitionEngine {
    fn start(
        &self,
        audio: mpsc::Receiver<CaptureEvent>,
    ) -> BoxFuture<'_, Result<mpsc::Receiver<RecognitionEvent>, SessionError>> {
        let result = LocalRecognitionEngine::start(self, audio);
        Box::pin(async move { result })
    }

    fn finish(&self) {
        LocalRecognitionEngine::finish(self);
    }

    fn release(&self) {
        LocalRecognitionEngine::release(self);
    }
}

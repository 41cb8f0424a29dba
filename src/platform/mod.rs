//! Host integration seams
//!
//! The session engine is host-agnostic; everything that touches the desktop
//! environment enters through these traits. The real program binds them to
//! the platform's global input monitor and paste facility; tests and the
//! bundled CLI bind them to channels and stdout.

use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::business::InputEvent;
use crate::error::SessionError;

/// Global input monitoring: delivers raw press/release and modifier-flag
/// edges to the hotkey gate.
pub trait InputMonitor: Send + Sync {
    fn start(&self, events: mpsc::Sender<InputEvent>) -> Result<(), SessionError>;
    fn stop(&self);
}

/// Receives the final transcript of a completed session (paste, clipboard,
/// or anything else downstream).
pub trait TranscriptSink: Send + Sync {
    fn deliver(&self, transcript: &str);
}

/// Sink that prints the final transcript, used by the CLI front end.
#[derive(Default)]
pub struct StdoutSink;

impl TranscriptSink for StdoutSink {
    fn deliver(&self, transcript: &str) {
        println!("{transcript}");
    }
}

/// Channel-backed input monitor for front ends that synthesize their own
/// input edges.
#[derive(Default)]
pub struct ChannelInputMonitor {
    events: Mutex<Option<mpsc::Sender<InputEvent>>>,
}

impl ChannelInputMonitor {
    pub fn inject(&self, event: InputEvent) {
        if let Some(tx) = self.events.lock().unwrap_or_else(|p| p.into_inner()).as_ref() {
            let _ = tx.try_send(event);
        }
    }
}

impl InputMonitor for ChannelInputMonitor {
    fn start(&self, events: mpsc::Sender<InputEvent>) -> Result<(), SessionError> {
        *self.events.lock().unwrap_or_else(|p| p.into_inner()) = Some(events);
        Ok(())
    }

    fn stop(&self) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
    }
}

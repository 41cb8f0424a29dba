//! Session business logic: hotkey gating, lifecycle, transcript state, and
//! the silence watchdog.

pub mod hotkey_gate;
pub mod session_controller;
pub mod transcript;
pub mod watchdog;

pub use hotkey_gate::{GateAction, HotkeyCombo, HotkeyGate, InputEvent, ModifierSet};
pub use session_controller::{LiveStatus, RecognitionBackend, SessionController, SessionTiming};
pub use transcript::TranscriptAggregator;

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::platform::InputMonitor;

/// Called with the new combo when capture mode rebinds the hotkey; the
/// front end persists it.
pub type RebindHook = Arc<dyn Fn(HotkeyCombo) + Send + Sync>;

/// Consume input edges from the host monitor, run them through the gate, and
/// translate press/release into session start/stop. A captured combo is
/// handed to `on_rebind`. Runs until the monitor's event stream closes.
pub async fn drive_hotkey(
    monitor: Arc<dyn InputMonitor>,
    gate: Arc<StdMutex<HotkeyGate>>,
    controller: Arc<SessionController>,
    on_rebind: RebindHook,
) -> Result<(), SessionError> {
    let (event_tx, mut event_rx) = mpsc::channel(64);
    monitor.start(event_tx)?;

    while let Some(event) = event_rx.recv().await {
        let action = gate
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .handle(event);
        match action {
            GateAction::Press => {
                if let Err(e) = controller.start().await {
                    tracing::warn!(error = %e, "session failed to start");
                }
            }
            GateAction::Release => controller.stop().await,
            GateAction::Captured(combo) => {
                tracing::info!(combo = %combo.display_string(), "hotkey rebound");
                on_rebind(combo);
            }
            GateAction::Rejected | GateAction::None => {}
        }
    }
    monitor.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::future::BoxFuture;

    use crate::asr::{BackendKind, RecognitionEvent};
    use crate::audio::{CaptureEvent, CaptureSource};
    use crate::platform::{ChannelInputMonitor, TranscriptSink};

    struct NullCapture {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl CaptureSource for NullCapture {
        fn start(&self) -> Result<mpsc::Receiver<CaptureEvent>, SessionError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let (_tx, rx) = mpsc::channel(4);
            Ok(rx)
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NullBackend;

    impl RecognitionBackend for NullBackend {
        fn start(
            &self,
            _audio: mpsc::Receiver<CaptureEvent>,
        ) -> BoxFuture<'_, Result<mpsc::Receiver<RecognitionEvent>, SessionError>> {
            Box::pin(async {
                let (tx, rx) = mpsc::channel(4);
                // Keep the stream open until finish is requested.
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    drop(tx);
                });
                Ok(rx)
            })
        }

        fn finish(&self) {}

        fn release(&self) {}
    }

    struct NullSink;

    impl TranscriptSink for NullSink {
        fn deliver(&self, _transcript: &str) {}
    }

    #[tokio::test]
    async fn press_and_release_edges_drive_the_session() {
        let capture = Arc::new(NullCapture {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        let controller = SessionController::new(
            capture.clone(),
            Arc::new(NullBackend),
            BackendKind::Local,
            Arc::new(NullSink),
            SessionTiming {
                stop_grace: Duration::from_millis(50),
                ..SessionTiming::default()
            },
        );
        let combo = HotkeyCombo::fn_key();
        let gate = Arc::new(StdMutex::new(HotkeyGate::new(combo)));
        let monitor = Arc::new(ChannelInputMonitor::default());

        let loop_task = tokio::spawn(drive_hotkey(
            monitor.clone(),
            gate,
            controller.clone(),
            Arc::new(|_| {}),
        ));
        // Let the loop register its event channel first.
        tokio::time::sleep(Duration::from_millis(20)).await;

        monitor.inject(combo.press_edge());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(capture.starts.load(Ordering::SeqCst), 1);

        monitor.inject(combo.release_edge());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(capture.stops.load(Ordering::SeqCst), 1);

        monitor.stop();
        loop_task.abort();
    }

    #[tokio::test]
    async fn captured_combo_reaches_the_rebind_hook() {
        let capture = Arc::new(NullCapture {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        let controller = SessionController::new(
            capture,
            Arc::new(NullBackend),
            BackendKind::Local,
            Arc::new(NullSink),
            SessionTiming::default(),
        );
        let gate = Arc::new(StdMutex::new(HotkeyGate::new(HotkeyCombo::fn_key())));
        gate.lock().unwrap().begin_capture();
        let monitor = Arc::new(ChannelInputMonitor::default());

        let rebound: Arc<StdMutex<Option<HotkeyCombo>>> = Arc::new(StdMutex::new(None));
        let hook = {
            let rebound = rebound.clone();
            Arc::new(move |combo| {
                *rebound.lock().unwrap() = Some(combo);
            })
        };
        let loop_task = tokio::spawn(drive_hotkey(monitor.clone(), gate.clone(), controller, hook));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let combo = HotkeyCombo {
            keycode: 9,
            modifiers: ModifierSet {
                command: true,
                ..ModifierSet::EMPTY
            },
            is_fn: false,
        };
        monitor.inject(InputEvent::KeyDown {
            keycode: combo.keycode,
            modifiers: combo.modifiers,
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*rebound.lock().unwrap(), Some(combo));
        assert_eq!(gate.lock().unwrap().combo(), combo);

        monitor.stop();
        loop_task.abort();
    }
}

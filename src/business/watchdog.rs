//! Silence watchdog
//!
//! Fixed-interval poll over the session's last-result timestamp. When the
//! gap exceeds the threshold and the transcript is non-empty, it releases
//! the session through the exact stop path a hotkey release takes; it is an
//! automatic release, not a separate terminal state. An empty transcript
//! never trips it, so a held key with no speech stays live until released.

use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::business::session_controller::SessionController;
use crate::business::transcript::TranscriptAggregator;

pub struct SilenceWatchdog {
    pub poll: Duration,
    pub timeout: Duration,
    pub last_event: Arc<StdMutex<Instant>>,
    pub transcript: Arc<StdMutex<TranscriptAggregator>>,
    pub controller: Weak<SessionController>,
}

impl SilenceWatchdog {
    pub async fn run(self) {
        loop {
            sleep(self.poll).await;
            let Some(controller) = self.controller.upgrade() else {
                return;
            };
            let idle = self
                .last_event
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .elapsed();
            let has_text = !self
                .transcript
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .is_empty();
            if idle >= self.timeout && has_text {
                tracing::info!(idle_ms = idle.as_millis() as u64, "silence timeout, releasing session");
                // Stop aborts this task; run the teardown in its own task so
                // the abort cannot cancel it halfway.
                tokio::spawn(async move { controller.stop().await });
                return;
            }
        }
    }
}

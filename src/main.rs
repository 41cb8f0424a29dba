//! Push-to-talk dictation - Main Entry Point
//!
//! CLI front end for exercising the session engine: start/stop a dictation
//! session from the keyboard and watch the live transcript. Desktop front
//! ends bind the same controller to a global input monitor and a paste sink
//! instead.

use anyhow::Result;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ptt_dictation::asr::{
    local::{RecognizerFactory, RecognizerTask, RestartPolicy},
    remote::RemoteConfig,
    BackendKind, LocalRecognitionEngine, RemoteRecognitionClient,
};
use ptt_dictation::business::{drive_hotkey, RecognitionBackend};
use ptt_dictation::platform::{ChannelInputMonitor, StdoutSink};
use ptt_dictation::{
    AppConfig, AudioCaptureEngine, HotkeyGate, SessionController, SessionError, SessionTiming,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting ptt-dictation v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_or_default()?;
    info!("Configuration loaded");

    let backend_kind = if config.asr.use_remote() {
        BackendKind::Remote
    } else {
        BackendKind::Local
    };
    let backend: Arc<dyn RecognitionBackend> = match backend_kind {
        BackendKind::Remote => {
            let mut remote = RemoteConfig::new(config.asr.api_key.clone());
            remote.endpoint = config.asr.endpoint.clone();
            remote.model = config.asr.model.clone();
            Arc::new(RemoteRecognitionClient::new(remote))
        }
        BackendKind::Local => Arc::new(LocalRecognitionEngine::new(
            Arc::new(UnavailableRecognizer),
            RestartPolicy::default(),
        )),
    };
    info!(backend = ?backend_kind, "recognition backend selected");

    let capture = Arc::new(AudioCaptureEngine::new());
    let sink = Arc::new(StdoutSink);
    let controller = SessionController::new(
        capture,
        backend,
        backend_kind,
        sink,
        SessionTiming::default(),
    );

    // Mirror live status changes onto the terminal.
    let mut status = controller.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let s = status.borrow().clone();
            if s.recording && !s.transcript.is_empty() {
                print!("\r   {}", s.transcript);
                let _ = io::stdout().flush();
            }
            if let Some(e) = s.error {
                println!();
                error!("session error: {}", e);
            }
        }
    });

    // CLI commands enter the engine the same way a real front end does:
    // as input edges through the monitor and gate.
    let combo = config.hotkey.combo;
    let gate = Arc::new(std::sync::Mutex::new(HotkeyGate::new(combo)));
    let monitor = Arc::new(ChannelInputMonitor::default());
    let config = Arc::new(std::sync::Mutex::new(config));
    let on_rebind = {
        let config = config.clone();
        Arc::new(move |combo| {
            let mut config = config.lock().unwrap_or_else(|p| p.into_inner());
            config.hotkey.combo = combo;
            if let Err(e) = config.save() {
                tracing::warn!(error = %e, "failed to persist rebound hotkey");
            }
        })
    };
    tokio::spawn(drive_hotkey(
        monitor.clone(),
        gate,
        controller.clone(),
        on_rebind,
    ));

    println!("Commands:  [s] start  [e] end  [k] show hotkey  [q] quit");
    println!("Hotkey: {}", combo.display_string());
    println!();

    loop {
        print!(">>> ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let cmd = input.trim().to_lowercase();

        match cmd.as_str() {
            "s" | "start" => {
                info!("User command: press");
                monitor.inject(combo.press_edge());
                println!("recording - speak into the microphone");
            }
            "e" | "end" | "stop" => {
                info!("User command: release");
                monitor.inject(combo.release_edge());
                println!();
            }
            "k" | "hotkey" => {
                println!("Hotkey: {}", combo.display_string());
            }
            "q" | "quit" | "exit" => {
                info!("User requested exit");
                break;
            }
            "" => {}
            _ => {
                println!("unknown command: {} (s/e/k/q)", cmd);
            }
        }
    }

    controller.stop().await;
    Ok(())
}

/// Stand-in recognizer factory for hosts without an on-device speech
/// facility; selecting the local backend without one is a configuration
/// error surfaced at session start.
struct UnavailableRecognizer;

impl RecognizerFactory for UnavailableRecognizer {
    fn begin_task(&self) -> Result<RecognizerTask, SessionError> {
        Err(SessionError::Configuration(
            "no on-device recognizer on this host; set asr.api_key to use the remote service"
                .into(),
        ))
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ptt_dictation=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

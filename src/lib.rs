//! Push-to-talk dictation engine
//!
//! Converts held-hotkey speech into text through either a remote duplex
//! streaming service or a continuous on-device recognizer, and presents one
//! live transcript to the rest of the application.

pub mod asr;
pub mod audio;
pub mod business;
pub mod data;
pub mod error;
pub mod platform;

pub use asr::{BackendKind, LocalRecognitionEngine, RecognitionEvent, RemoteRecognitionClient};
pub use audio::{AudioCaptureEngine, CaptureSource};
pub use business::{HotkeyCombo, HotkeyGate, LiveStatus, SessionController, SessionTiming};
pub use data::AppConfig;
pub use error::SessionError;

//! Persisted application data.

pub mod config;

pub use config::{AppConfig, AsrConfig, GeneralConfig, HotkeyConfig};

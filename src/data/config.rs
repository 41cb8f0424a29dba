//! Application Configuration
//!
//! Handles loading and saving application configuration.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::asr::protocol::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::business::HotkeyCombo;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub hotkey: HotkeyConfig,
    #[serde(default)]
    pub asr: AsrConfig,
}

impl AppConfig {
    /// Get the config file path
    pub fn config_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Load configuration from file or create default
    pub fn load_or_default() -> Result<Self> {
        let path = Self::config_path();

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = AppConfig::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "zh-CN".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
        }
    }
}

/// Hotkey configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotkeyConfig {
    #[serde(default = "HotkeyCombo::fn_key")]
    pub combo: HotkeyCombo,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            combo: HotkeyCombo::fn_key(),
        }
    }
}

/// Recognition backend configuration. An empty `api_key` selects the
/// on-device engine; a non-empty one selects the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
        }
    }
}

impl AsrConfig {
    pub fn use_remote(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_selects_local_engine() {
        let asr = AsrConfig::default();
        assert!(!asr.use_remote());
        let asr = AsrConfig {
            api_key: "  ".into(),
            ..AsrConfig::default()
        };
        assert!(!asr.use_remote());
        let asr = AsrConfig {
            api_key: "sk-test".into(),
            ..AsrConfig::default()
        };
        assert!(asr.use_remote());
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = AppConfig {
            asr: AsrConfig {
                api_key: "sk-test".into(),
                ..AsrConfig::default()
            },
            ..AppConfig::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.asr.api_key, "sk-test");
        assert_eq!(parsed.asr.endpoint, DEFAULT_ENDPOINT);
        assert!(parsed.hotkey.combo.is_fn);
    }
}

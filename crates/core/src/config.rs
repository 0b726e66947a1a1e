use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::paths::Paths;
use crate::types::SessionRole;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    2000
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Seconds between screenshot captures for browser observe sessions.
    #[serde(default = "default_browser_shot_interval")]
    pub browser_screenshot_interval_secs: f64,
    /// Seconds between screenshot captures for desktop observe sessions.
    #[serde(default = "default_desktop_shot_interval")]
    pub desktop_screenshot_interval_secs: f64,
    /// Milliseconds between DOM event queue drains.
    #[serde(default = "default_poll_interval_ms")]
    pub event_poll_interval_ms: u64,
    /// Screenshot buffer capacity for desktop observe (trims to half on overflow).
    #[serde(default = "default_desktop_capacity")]
    pub desktop_buffer_capacity: usize,
    /// Screenshot buffer capacity for browser observe.
    #[serde(default = "default_browser_capacity")]
    pub browser_buffer_capacity: usize,
}

fn default_browser_shot_interval() -> f64 {
    1.5
}

fn default_desktop_shot_interval() -> f64 {
    3.0
}

fn default_poll_interval_ms() -> u64 {
    800
}

fn default_desktop_capacity() -> usize {
    100
}

fn default_browser_capacity() -> usize {
    60
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            browser_screenshot_interval_secs: default_browser_shot_interval(),
            desktop_screenshot_interval_secs: default_desktop_shot_interval(),
            event_poll_interval_ms: default_poll_interval_ms(),
            desktop_buffer_capacity: default_desktop_capacity(),
            browser_buffer_capacity: default_browser_capacity(),
        }
    }
}

impl CaptureConfig {
    /// Replay buffers are bounded by workflow step count, so no cap.
    pub fn buffer_capacity(&self, role: SessionRole) -> Option<usize> {
        match role {
            SessionRole::ObserveDesktop => Some(self.desktop_buffer_capacity),
            SessionRole::ObserveBrowser => Some(self.browser_buffer_capacity),
            SessionRole::ReplayBrowser => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayConfig {
    /// Settle delay after each executed action, seconds.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: f64,
    /// Pause between workflow steps, seconds.
    #[serde(default = "default_step_pause_secs")]
    pub step_pause_secs: f64,
    /// Timeout for click/fill operations, seconds.
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
    /// Timeout for navigation, seconds.
    #[serde(default = "default_nav_timeout_secs")]
    pub nav_timeout_secs: u64,
}

fn default_settle_secs() -> f64 {
    1.0
}

fn default_step_pause_secs() -> f64 {
    2.0
}

fn default_action_timeout_secs() -> u64 {
    5
}

fn default_nav_timeout_secs() -> u64 {
    15
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            settle_secs: default_settle_secs(),
            step_pause_secs: default_step_pause_secs(),
            action_timeout_secs: default_action_timeout_secs(),
            nav_timeout_secs: default_nav_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Launch with a visible window. Observe sessions are pointless headless.
    #[serde(default = "default_true")]
    pub headed: bool,
    #[serde(default = "default_start_url")]
    pub start_url: String,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
}

fn default_true() -> bool {
    true
}

fn default_start_url() -> String {
    "https://www.google.com".to_string()
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    900
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headed: true,
            start_url: default_start_url(),
            window_width: default_window_width(),
            window_height: default_window_height(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// WS fan-out tick interval, milliseconds.
    #[serde(default = "default_stream_tick_ms")]
    pub stream_tick_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8700
}

fn default_stream_tick_ms() -> u64 {
    1000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            stream_tick_ms: default_stream_tick_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: Config = serde_json::from_str(r#"{"reasoning": {"apiKey": "k"}}"#).unwrap();
        assert_eq!(cfg.reasoning.api_key, "k");
        assert_eq!(cfg.capture.browser_buffer_capacity, 60);
        assert_eq!(cfg.replay.nav_timeout_secs, 15);
        assert_eq!(cfg.gateway.port, 8700);
    }

    #[test]
    fn replay_buffer_is_uncapped() {
        let cfg = CaptureConfig::default();
        assert_eq!(cfg.buffer_capacity(SessionRole::ObserveDesktop), Some(100));
        assert_eq!(cfg.buffer_capacity(SessionRole::ObserveBrowser), Some(60));
        assert_eq!(cfg.buffer_capacity(SessionRole::ReplayBrowser), None);
    }
}

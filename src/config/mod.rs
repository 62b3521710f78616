//! Configuration management

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR_NAME: &str = "print-farm-dashboard";
const UI_PREFERENCES_FILE: &str = "ui-preferences.json";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_repoll_delay_ms")]
    pub repoll_delay_ms: u64,

    #[serde(default = "default_notification_ttl_secs")]
    pub notification_ttl_secs: u64,

    #[serde(default = "default_camera_refresh_ms")]
    pub camera_refresh_ms: u64,

    #[serde(default)]
    pub direct_control: DirectControlConfig,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn repoll_delay(&self) -> Duration {
        Duration::from_millis(self.repoll_delay_ms)
    }

    pub fn notification_ttl(&self) -> Duration {
        Duration::from_secs(self.notification_ttl_secs)
    }

    pub fn camera_refresh(&self) -> Duration {
        Duration::from_millis(self.camera_refresh_ms)
    }
}

fn default_port() -> u16 {
    8099
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_repoll_delay_ms() -> u64 {
    2000
}

fn default_notification_ttl_secs() -> u64 {
    5
}

fn default_camera_refresh_ms() -> u64 {
    3000
}

#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
pub struct DirectControlConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for DirectControlConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// Get config directory (PFD_CONFIG_DIR, XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PFD_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    // Fallback to current directory
    PathBuf::from(".")
}

pub fn get_config_file_path(filename: &str) -> PathBuf {
    get_config_dir().join(filename)
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .set_default("port", default_port() as i64)?
        // Load from config.{toml,json,yaml} if it exists
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // Override with environment variables (PFD_PORT, PFD_GATEWAY__BASE_URL, etc.)
        .add_source(
            ::config::Environment::with_prefix("PFD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    // Explicit precedence: PFD_PORT > PORT > config > default
    if let Ok(port) = std::env::var("PFD_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    } else if let Ok(port) = std::env::var("PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    }

    // Legacy GATEWAY_URL, used when the add-on launches the dashboard
    if std::env::var("PFD_GATEWAY__BASE_URL").is_err() {
        if let Ok(url) = std::env::var("GATEWAY_URL") {
            if !url.trim().is_empty() {
                builder = builder.set_override("gateway.base_url", url)?;
            }
        }
    }

    let config = builder.build()?;

    Ok(config.try_deserialize()?)
}

// =============================================================================
// UI preferences
// =============================================================================

/// Presentation choices that survive restarts. Filters are deliberately not
/// stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiPreferences {
    #[serde(default)]
    pub active_tab: Option<String>,
}

pub fn load_ui_preferences() -> UiPreferences {
    let path = get_config_file_path(UI_PREFERENCES_FILE);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return UiPreferences::default();
    };
    match serde_json::from_str(&content) {
        Ok(prefs) => prefs,
        Err(e) => {
            tracing::warn!("Ignoring unreadable {}: {}", path.display(), e);
            UiPreferences::default()
        }
    }
}

pub fn save_ui_preferences(prefs: &UiPreferences) -> Result<()> {
    let dir = get_config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(prefs)?;
    std::fs::write(dir.join(UI_PREFERENCES_FILE), json)?;
    Ok(())
}

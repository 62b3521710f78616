//! Gateway data model
//!
//! Typed schemas for the payloads returned by the Home Assistant gateway.
//! Payloads that do not match these shapes are rejected at the boundary
//! with a decode error instead of flowing half-parsed into rendering.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// =============================================================================
// Printer configuration
// =============================================================================

/// Backend flavour of a printer.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PrinterType {
    #[default]
    Klipper,
    Octoprint,
}

impl PrinterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrinterType::Klipper => "klipper",
            PrinterType::Octoprint => "octoprint",
        }
    }
}

impl fmt::Display for PrinterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static printer configuration, loaded once at startup.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PrinterConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub printer_type: PrinterType,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub camera_entity: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl PrinterConfig {
    /// Camera entity, treating blank strings as unset
    pub fn camera(&self) -> Option<&str> {
        self.camera_entity
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

// =============================================================================
// Printer status
// =============================================================================

/// Normalized printer state.
///
/// Matching is case-insensitive; unrecognised values are kept verbatim
/// (lowercased) in `Other` so they can still be displayed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PrinterState {
    Idle,
    Standby,
    Ready,
    Operational,
    Printing,
    Paused,
    Cancelled,
    Complete,
    Finished,
    Error,
    Other(String),
}

impl PrinterState {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "idle" => PrinterState::Idle,
            "standby" => PrinterState::Standby,
            "ready" => PrinterState::Ready,
            "operational" => PrinterState::Operational,
            "printing" => PrinterState::Printing,
            "paused" => PrinterState::Paused,
            "cancelled" => PrinterState::Cancelled,
            "complete" => PrinterState::Complete,
            "finished" => PrinterState::Finished,
            "error" => PrinterState::Error,
            _ => PrinterState::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PrinterState::Idle => "idle",
            PrinterState::Standby => "standby",
            PrinterState::Ready => "ready",
            PrinterState::Operational => "operational",
            PrinterState::Printing => "printing",
            PrinterState::Paused => "paused",
            PrinterState::Cancelled => "cancelled",
            PrinterState::Complete => "complete",
            PrinterState::Finished => "finished",
            PrinterState::Error => "error",
            PrinterState::Other(raw) => raw,
        }
    }

    pub fn is_printing(&self) -> bool {
        matches!(self, PrinterState::Printing)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, PrinterState::Paused)
    }
}

impl Default for PrinterState {
    fn default() -> Self {
        PrinterState::Other("unknown".to_string())
    }
}

impl From<String> for PrinterState {
    fn from(raw: String) -> Self {
        PrinterState::parse(&raw)
    }
}

impl From<PrinterState> for String {
    fn from(state: PrinterState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Temperature {
    #[serde(default)]
    pub actual: f64,
    #[serde(default)]
    pub target: Option<f64>,
}

/// Chamber sensor reading. Klipper reports the sensor id and kind so
/// the matching temperature command can be chosen when setting a target.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ChamberTemperature {
    pub name: String,
    #[serde(default)]
    pub sensor_id: Option<String>,
    #[serde(default)]
    pub sensor_type: Option<String>,
    #[serde(default)]
    pub actual: f64,
    #[serde(default)]
    pub target: Option<f64>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// Volatile printer status, replaced wholesale on every poll.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PrinterStatus {
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub state: PrinterState,
    /// Type as reported by the gateway (used by the type filter)
    #[serde(rename = "type", default)]
    pub printer_type: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    /// Upload timestamp of the current file (OctoPrint only)
    #[serde(default)]
    pub file_uploaded: Option<f64>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub extruder_temp: Option<Temperature>,
    #[serde(default)]
    pub bed_temp: Option<Temperature>,
    #[serde(default)]
    pub chamber_temps: Vec<ChamberTemperature>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub print_time: Option<String>,
    #[serde(default)]
    pub remaining_time: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PrinterStatus {
    /// Current file name, treating blank strings as no file
    pub fn active_file(&self) -> Option<&str> {
        self.file.as_deref().map(str::trim).filter(|f| !f.is_empty())
    }

    /// Whether the reported upload timestamp is usable
    pub fn has_valid_upload_timestamp(&self) -> bool {
        self.file_uploaded
            .map(|ts| ts.is_finite() && ts > 0.0)
            .unwrap_or(false)
    }
}

/// Aggregate status snapshot keyed by printer name.
pub type StatusSnapshot = HashMap<String, PrinterStatus>;

// =============================================================================
// Gateway envelopes
// =============================================================================

/// `{success, error?}` reply returned by every control endpoint
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of `api/camera/{printer}/snapshot`
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SnapshotReply {
    #[serde(default)]
    pub snapshot_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response of `api/ha-info`
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HaInfo {
    #[serde(default)]
    pub suggested_base_urls: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GcodeFile {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

/// Heater type → preset temperatures
pub type TemperaturePresets = HashMap<String, Vec<f64>>;

/// Response of `api/temperature-presets`
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PresetsReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub presets: TemperaturePresets,
}

/// Presets used when the gateway does not provide any
pub fn default_temperature_presets() -> TemperaturePresets {
    let mut presets = HashMap::new();
    presets.insert("extruder".to_string(), vec![0.0, 200.0, 220.0, 250.0]);
    presets.insert("bed".to_string(), vec![0.0, 60.0, 80.0, 100.0]);
    presets.insert("chamber".to_string(), vec![0.0, 40.0, 60.0, 80.0]);
    presets
}

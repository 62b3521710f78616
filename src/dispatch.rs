//! Action dispatcher
//!
//! Turns a user intent into exactly one gateway request. Where the request
//! goes is decided by [`route`], a pure function of the printer config, the
//! action and the direct-control switch:
//!
//! - pause / resume / cancel / reprint always use the routed print API
//! - home / jog / gcode go straight to Moonraker through the gateway's
//!   direct-control endpoint when the printer is Klipper with a parseable URL
//!   and direct control is enabled, otherwise through the routed control API
//! - temperature and send-file have dedicated endpoints
//!
//! Every outcome is reported as a notification. Successful actions schedule
//! one deferred status poll; failures leave the registry untouched.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::bus::{DashboardEvent, SharedBus};
use crate::gateway::{ControlRequest, Gateway, GatewayError};
use crate::model::{PrinterConfig, PrinterType};
use crate::notify::NotificationCenter;
use crate::poller::StatusPoller;
use crate::registry::PrinterRegistry;
use crate::render::format_number;

pub const DEFAULT_REPOLL_DELAY: Duration = Duration::from_secs(2);
pub const MOONRAKER_DEFAULT_PORT: u16 = 7125;

// =============================================================================
// Actions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaterType {
    Extruder,
    Bed,
    Chamber,
}

impl HeaterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaterType::Extruder => "extruder",
            HeaterType::Bed => "bed",
            HeaterType::Chamber => "chamber",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            HeaterType::Extruder => "Extruder",
            HeaterType::Bed => "Bed",
            HeaterType::Chamber => "Chamber",
        }
    }
}

fn default_start() -> bool {
    true
}

/// A control intent for one printer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlAction {
    Pause,
    Resume,
    Cancel,
    Reprint {
        #[serde(default)]
        filename: Option<String>,
    },
    /// `None` homes all axes
    Home {
        #[serde(default)]
        axis: Option<Axis>,
    },
    Jog {
        axis: Axis,
        distance: f64,
    },
    Gcode {
        command: String,
    },
    SetTemperature {
        heater: HeaterType,
        temperature: f64,
        #[serde(default)]
        heater_name: Option<String>,
    },
    SendFile {
        file: String,
        #[serde(default = "default_start")]
        start: bool,
    },
}

impl ControlAction {
    /// Action segment used in gateway paths
    pub fn name(&self) -> &'static str {
        match self {
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::Cancel => "cancel",
            ControlAction::Reprint { .. } => "reprint",
            ControlAction::Home { .. } => "home",
            ControlAction::Jog { .. } => "jog",
            ControlAction::Gcode { .. } => "gcode",
            ControlAction::SetTemperature { .. } => "temperature",
            ControlAction::SendFile { .. } => "send",
        }
    }

    pub fn is_movement(&self) -> bool {
        matches!(self, ControlAction::Home { .. } | ControlAction::Jog { .. })
    }

    fn is_print_control(&self) -> bool {
        matches!(
            self,
            ControlAction::Pause
                | ControlAction::Resume
                | ControlAction::Cancel
                | ControlAction::Reprint { .. }
        )
    }

    /// Reject intents that can never succeed, before any request is made
    pub fn validate(&self) -> Result<(), ActionError> {
        match self {
            ControlAction::Jog { distance, .. } if !distance.is_finite() || *distance == 0.0 => Err(
                ActionError::Invalid(format!("Invalid jog distance: {distance}")),
            ),
            ControlAction::Gcode { command } if command.trim().is_empty() => {
                Err(ActionError::Invalid("G-code command is empty".to_string()))
            }
            ControlAction::SetTemperature { temperature, .. }
                if !temperature.is_finite() || *temperature < 0.0 =>
            {
                Err(ActionError::Invalid(format!(
                    "Invalid temperature: {temperature}"
                )))
            }
            ControlAction::SetTemperature {
                heater: HeaterType::Chamber,
                heater_name,
                ..
            } if heater_name.as_deref().map_or(true, |n| n.trim().is_empty()) => Err(
                ActionError::Invalid("Chamber temperature needs a heater name".to_string()),
            ),
            ControlAction::SendFile { file, .. } if file.trim().is_empty() => {
                Err(ActionError::Invalid("No file selected".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn success_message(&self, printer: &str) -> String {
        match self {
            ControlAction::Home { axis } => format!("Homing {} successful", axes_label(*axis)),
            ControlAction::Jog { axis, distance } => format!("Jogged {}mm", jog_label(*axis, *distance)),
            ControlAction::Gcode { .. } => format!("G-code sent to {printer}"),
            ControlAction::SetTemperature {
                heater,
                temperature,
                ..
            } => format!(
                "{} temperature set to {}°C on {printer}",
                heater.label(),
                format_number(*temperature)
            ),
            ControlAction::SendFile { file, .. } => format!("Sent {file} to {printer}"),
            _ => format!("{} command sent to {printer}", self.name()),
        }
    }

    fn failure_message(&self, printer: &str, error: &str) -> String {
        match self {
            ControlAction::Home { .. } => format!("Homing failed: {error}"),
            ControlAction::Jog { .. } => format!("Jog failed: {error}"),
            ControlAction::Gcode { .. } => format!("G-code failed: {error}"),
            ControlAction::SetTemperature { .. } => {
                format!("Failed to set temperature on {printer}: {error}")
            }
            ControlAction::SendFile { file, .. } => {
                format!("Failed to send {file} to {printer}: {error}")
            }
            _ => format!("Failed to {} {printer}: {error}", self.name()),
        }
    }
}

fn axes_label(axis: Option<Axis>) -> String {
    axis.map(|a| a.to_string())
        .unwrap_or_else(|| "all axes".to_string())
}

fn jog_label(axis: Axis, distance: f64) -> String {
    let sign = if distance > 0.0 { "+" } else { "" };
    format!("{axis}{sign}{}", format_number(distance))
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActionError {
    #[error("Printer not found: {0}")]
    UnknownPrinter(String),

    #[error("{0}")]
    Invalid(String),

    #[error("Movement already in progress on {0}")]
    MovementBusy(String),

    /// Gateway answered `success: false`
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

// =============================================================================
// Routing
// =============================================================================

/// Moonraker endpoint reachable through the gateway's direct-control proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectTarget {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
}

/// Derive the direct-control target of a Klipper printer from its URL.
///
/// The port is the explicit URL port, else 7125 for `http` (Moonraker's
/// default), 443 for `https`, 80 otherwise.
pub fn direct_target(config: &PrinterConfig) -> Option<DirectTarget> {
    if config.printer_type != PrinterType::Klipper {
        return None;
    }
    let url = Url::parse(config.url.trim()).ok()?;
    let host = url.host_str().filter(|h| !h.is_empty())?.to_string();
    let port = url.port().unwrap_or(match url.scheme() {
        "http" => MOONRAKER_DEFAULT_PORT,
        "https" => 443,
        _ => 80,
    });
    Some(DirectTarget {
        host,
        port,
        api_key: config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty()),
    })
}

fn action_body(action: &ControlAction) -> Map<String, Value> {
    let body = match action {
        ControlAction::Pause | ControlAction::Resume | ControlAction::Cancel => json!({}),
        ControlAction::Reprint { filename } => match filename {
            Some(file) => json!({ "filename": file }),
            None => json!({}),
        },
        ControlAction::Home { axis } => match axis {
            Some(axis) => json!({ "axes": [axis] }),
            None => json!({}),
        },
        ControlAction::Jog { axis, distance } => json!({ "axis": axis, "distance": distance }),
        ControlAction::Gcode { command } => json!({ "gcode": command }),
        ControlAction::SetTemperature {
            heater,
            temperature,
            heater_name,
        } => json!({
            "heater_type": heater,
            "temperature": temperature,
            "heater_name": heater_name,
        }),
        ControlAction::SendFile { file, start } => json!({ "file": file, "start": start }),
    };
    match body {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Decide the gateway request for an action. Pure; no I/O.
pub fn route(config: &PrinterConfig, action: &ControlAction, direct_control: bool) -> ControlRequest {
    let name = urlencoding::encode(&config.name);
    let mut body = action_body(action);

    let path = match action {
        a if a.is_print_control() => format!("api/printer/{name}/print/{}", a.name()),
        ControlAction::Home { .. } | ControlAction::Jog { .. } | ControlAction::Gcode { .. } => {
            match direct_target(config).filter(|_| direct_control) {
                Some(target) => {
                    if let Some(key) = target.api_key {
                        body.insert("api_key".to_string(), Value::String(key));
                    }
                    format!(
                        "api/direct-control/{}/{}/{}",
                        urlencoding::encode(&target.host),
                        target.port,
                        action.name()
                    )
                }
                None => format!("api/control/{name}/{}", action.name()),
            }
        }
        ControlAction::SetTemperature { .. } => format!("api/printer/{name}/temperature"),
        ControlAction::SendFile { .. } => {
            body.insert("printer".to_string(), Value::String(config.name.clone()));
            "api/gcode/send".to_string()
        }
        _ => format!("api/control/{name}/{}", action.name()),
    };

    ControlRequest::new(path, Value::Object(body))
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Releases a printer's movement latch when the command settles
struct MovementLatch<'a> {
    held: &'a Mutex<HashSet<String>>,
    printer: String,
}

impl<'a> MovementLatch<'a> {
    fn acquire(held: &'a Mutex<HashSet<String>>, printer: &str) -> Option<Self> {
        let inserted = held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(printer.to_string());
        inserted.then(|| Self {
            held,
            printer: printer.to_string(),
        })
    }
}

impl Drop for MovementLatch<'_> {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.printer);
    }
}

pub struct Dispatcher {
    gateway: Arc<dyn Gateway>,
    registry: Arc<PrinterRegistry>,
    poller: Arc<StatusPoller>,
    notifications: Arc<NotificationCenter>,
    bus: SharedBus,
    direct_control: bool,
    repoll_delay: Duration,
    movement: Mutex<HashSet<String>>,
}

impl Dispatcher {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        registry: Arc<PrinterRegistry>,
        poller: Arc<StatusPoller>,
        notifications: Arc<NotificationCenter>,
        bus: SharedBus,
    ) -> Self {
        Self {
            gateway,
            registry,
            poller,
            notifications,
            bus,
            direct_control: true,
            repoll_delay: DEFAULT_REPOLL_DELAY,
            movement: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_direct_control(mut self, enabled: bool) -> Self {
        self.direct_control = enabled;
        self
    }

    pub fn with_repoll_delay(mut self, delay: Duration) -> Self {
        self.repoll_delay = delay;
        self
    }

    pub fn movement_in_progress(&self, printer: &str) -> bool {
        self.movement
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(printer)
    }

    /// Send one action. The outcome has already been reported as a
    /// notification when this returns.
    pub async fn dispatch(&self, printer: &str, action: ControlAction) -> Result<(), ActionError> {
        let Some(config) = self.registry.config(printer).await else {
            let err = ActionError::UnknownPrinter(printer.to_string());
            self.notifications.error(err.to_string());
            return Err(err);
        };

        if let Err(err) = action.validate() {
            self.notifications.error(err.to_string());
            return Err(err);
        }

        let _latch = if action.is_movement() {
            match MovementLatch::acquire(&self.movement, printer) {
                Some(latch) => Some(latch),
                None => {
                    let err = ActionError::MovementBusy(printer.to_string());
                    debug!(printer, "Movement latch held, rejecting command");
                    self.notifications.warning(err.to_string());
                    return Err(err);
                }
            }
        } else {
            None
        };

        let action = self.fill_reprint_file(&config, action).await;
        let request = route(&config, &action, self.direct_control);
        info!(printer, action = action.name(), path = %request.path, "Dispatching control action");

        let result = match self.gateway.send(&request).await {
            Ok(reply) if reply.success => Ok(()),
            Ok(reply) => Err(ActionError::Rejected(
                reply.error.unwrap_or_else(|| "Unknown error".to_string()),
            )),
            Err(e) => Err(ActionError::Gateway(e)),
        };

        match &result {
            Ok(()) => {
                self.notifications.success(action.success_message(printer));
                self.bus.publish(DashboardEvent::ActionSent {
                    printer: printer.to_string(),
                    action: action.name().to_string(),
                });
                self.poller.schedule_poll(self.repoll_delay);
            }
            Err(err) => {
                let error = err.to_string();
                warn!(printer, action = action.name(), %error, "Control action failed");
                self.notifications
                    .error(action.failure_message(printer, &error));
                self.bus.publish(DashboardEvent::ActionFailed {
                    printer: printer.to_string(),
                    action: action.name().to_string(),
                    error,
                });
            }
        }
        result
    }

    /// Klipper reprints carry the tracked last file when the caller did not name one
    async fn fill_reprint_file(&self, config: &PrinterConfig, action: ControlAction) -> ControlAction {
        match action {
            ControlAction::Reprint { filename: None } if config.printer_type == PrinterType::Klipper => {
                ControlAction::Reprint {
                    filename: self.registry.last_print_file(&config.name).await,
                }
            }
            other => other,
        }
    }
}

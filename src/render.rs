//! Card rendering
//!
//! Pure functions from registry entries to view state. Nothing here touches
//! the network, the clock (callers pass `now`), or shared state, so calling
//! [`render_card`] twice with the same inputs always yields the same view.
//! Turning a view into HTML is the job of `ui`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{PrinterState, PrinterStatus, PrinterType, Temperature};
use crate::registry::RegistryEntry;

pub const NO_ACTIVE_PRINT: &str = "No active print";
const UNKNOWN_TIME: &str = "--:--:--";
const ZERO_TIME: &str = "00:00:00";

// =============================================================================
// View types
// =============================================================================

/// Status badge shown on each card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Badge {
    Offline,
    Printing,
    Paused,
    Error,
    Online,
}

impl Badge {
    pub fn css_class(&self) -> &'static str {
        match self {
            Badge::Offline => "offline",
            Badge::Printing => "printing",
            Badge::Paused => "paused",
            Badge::Error => "error",
            Badge::Online => "online",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressView {
    /// Bar fill, 0-100
    pub percent: f64,
    pub label: String,
    pub file_label: String,
}

impl ProgressView {
    fn idle() -> Self {
        Self {
            percent: 0.0,
            label: "0%".to_string(),
            file_label: NO_ACTIVE_PRINT.to_string(),
        }
    }
}

/// Which of the five card action buttons are visible
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ButtonSet {
    pub pause: bool,
    pub resume: bool,
    pub cancel: bool,
    pub reprint: bool,
    pub movement: bool,
}

impl ButtonSet {
    /// Visible button names in card order
    pub fn visible(&self) -> Vec<&'static str> {
        [
            (self.pause, "pause"),
            (self.resume, "resume"),
            (self.cancel, "cancel"),
            (self.reprint, "reprint"),
            (self.movement, "movement"),
        ]
        .into_iter()
        .filter_map(|(shown, name)| shown.then_some(name))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureView {
    pub actual: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChamberView {
    pub name: String,
    pub sensor_id: Option<String>,
    pub actual: String,
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionView {
    pub x: String,
    pub y: String,
    pub z: String,
}

/// Everything a card displays, derived from one registry entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardView {
    pub name: String,
    pub printer_type: String,
    pub has_status: bool,
    pub status_text: String,
    pub badge: Badge,
    pub progress: ProgressView,
    pub extruder: Option<TemperatureView>,
    pub bed: Option<TemperatureView>,
    pub chambers: Vec<ChamberView>,
    pub print_time: String,
    pub remaining_time: String,
    pub position: Option<PositionView>,
    pub message: Option<String>,
    pub buttons: ButtonSet,
    pub camera_available: bool,
    /// File whose thumbnail the card shows, if any
    pub thumbnail_file: Option<String>,
    pub updated: Option<String>,
}

// =============================================================================
// Derivations
// =============================================================================

pub fn badge_for(status: &PrinterStatus) -> Badge {
    if !status.online {
        return Badge::Offline;
    }
    match status.state {
        PrinterState::Printing => Badge::Printing,
        PrinterState::Paused => Badge::Paused,
        PrinterState::Error => Badge::Error,
        _ => Badge::Online,
    }
}

pub fn progress_for(status: &PrinterStatus) -> ProgressView {
    if !status.online {
        return ProgressView::idle();
    }
    let Some(file) = status.active_file() else {
        return ProgressView::idle();
    };
    let percent = status
        .progress
        .filter(|p| p.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);
    ProgressView {
        percent,
        label: format!("{}%", format_number(percent)),
        file_label: file.to_string(),
    }
}

/// Whether the reprint action is available.
///
/// Klipper needs a locally tracked last file; OctoPrint keeps the last job
/// selected, so it needs a current file with a valid upload timestamp.
pub fn reprint_available(
    printer_type: PrinterType,
    status: &PrinterStatus,
    last_print_file: Option<&str>,
) -> bool {
    match printer_type {
        PrinterType::Klipper => last_print_file.is_some_and(|f| !f.trim().is_empty()),
        PrinterType::Octoprint => {
            status.active_file().is_some() && status.has_valid_upload_timestamp()
        }
    }
}

/// Button visibility for a normalized state
pub fn buttons_for(state: &PrinterState, online: bool, reprint_known: bool) -> ButtonSet {
    if !online {
        return ButtonSet::default();
    }
    match state {
        PrinterState::Idle | PrinterState::Standby => ButtonSet {
            movement: true,
            ..Default::default()
        },
        PrinterState::Operational
        | PrinterState::Ready
        | PrinterState::Cancelled
        | PrinterState::Complete
        | PrinterState::Finished => ButtonSet {
            movement: true,
            reprint: reprint_known,
            ..Default::default()
        },
        PrinterState::Printing => ButtonSet {
            pause: true,
            cancel: true,
            ..Default::default()
        },
        PrinterState::Paused => ButtonSet {
            resume: true,
            cancel: true,
            ..Default::default()
        },
        PrinterState::Error | PrinterState::Other(_) => ButtonSet::default(),
    }
}

pub fn render_card(
    entry: &RegistryEntry,
    last_print_file: Option<&str>,
    now: DateTime<Utc>,
) -> CardView {
    let config = &entry.config;
    let updated = entry.last_update.map(|t| format_relative_time(t, now));
    let camera_available = config.camera().is_some();

    let Some(status) = entry.status.as_ref() else {
        return CardView {
            name: config.name.clone(),
            printer_type: config.printer_type.to_string(),
            has_status: false,
            status_text: "Unknown".to_string(),
            badge: Badge::Offline,
            progress: ProgressView::idle(),
            extruder: None,
            bed: None,
            chambers: Vec::new(),
            print_time: UNKNOWN_TIME.to_string(),
            remaining_time: UNKNOWN_TIME.to_string(),
            position: None,
            message: None,
            buttons: ButtonSet::default(),
            camera_available,
            thumbnail_file: None,
            updated,
        };
    };

    let badge = badge_for(status);
    let progress = progress_for(status);
    let reprint = reprint_available(config.printer_type, status, last_print_file);
    let buttons = buttons_for(&status.state, status.online, reprint);

    if !status.online {
        return CardView {
            name: config.name.clone(),
            printer_type: config.printer_type.to_string(),
            has_status: true,
            status_text: "Offline".to_string(),
            badge,
            progress,
            extruder: None,
            bed: None,
            chambers: Vec::new(),
            print_time: UNKNOWN_TIME.to_string(),
            remaining_time: UNKNOWN_TIME.to_string(),
            position: None,
            message: status.error.clone(),
            buttons,
            camera_available,
            thumbnail_file: None,
            updated,
        };
    }

    CardView {
        name: config.name.clone(),
        printer_type: config.printer_type.to_string(),
        has_status: true,
        status_text: format_status_text(&status.state),
        badge,
        progress,
        extruder: status.extruder_temp.as_ref().map(temperature_view),
        bed: status.bed_temp.as_ref().map(temperature_view),
        chambers: status
            .chamber_temps
            .iter()
            .map(|c| ChamberView {
                name: c.name.clone(),
                sensor_id: c.sensor_id.clone(),
                actual: format!("{}°", format_number(c.actual)),
                target: c.target.map(|t| format!("{}°", format_number(t))),
            })
            .collect(),
        print_time: time_or_zero(status.print_time.as_deref()),
        remaining_time: time_or_zero(status.remaining_time.as_deref()),
        position: status.position.map(|p| PositionView {
            x: format!("{:.2}", p.x),
            y: format!("{:.2}", p.y),
            z: format!("{:.2}", p.z),
        }),
        message: status.message.clone().filter(|m| !m.trim().is_empty()),
        buttons,
        camera_available,
        thumbnail_file: status.active_file().map(str::to_string),
        updated,
    }
}

fn temperature_view(temp: &Temperature) -> TemperatureView {
    TemperatureView {
        actual: format!("{}°", format_number(temp.actual)),
        target: format!("{}°", format_number(temp.target.unwrap_or(0.0))),
    }
}

fn time_or_zero(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ZERO_TIME)
        .to_string()
}

// =============================================================================
// Summary and filters
// =============================================================================

/// Header counters, computed in one pass over the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub printing: usize,
    pub idle: usize,
    pub offline: usize,
}

pub fn summarize<'a>(entries: impl IntoIterator<Item = &'a RegistryEntry>) -> Summary {
    entries
        .into_iter()
        .fold(Summary::default(), |mut summary, entry| {
            summary.total += 1;
            match entry.status.as_ref() {
                None => summary.offline += 1,
                Some(s) if !s.online || s.state == PrinterState::Error => summary.offline += 1,
                Some(s) if s.state.is_printing() => summary.printing += 1,
                Some(_) => summary.idle += 1,
            }
            summary
        })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Offline,
    Printing,
    Paused,
    Idle,
}

pub const ALL_TYPES: &str = "all";

fn default_type_filter() -> String {
    ALL_TYPES.to_string()
}

/// Status and type filter selectors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiFilters {
    #[serde(default)]
    pub status: StatusFilter,
    #[serde(rename = "type", default = "default_type_filter")]
    pub printer_type: String,
}

impl Default for UiFilters {
    fn default() -> Self {
        Self {
            status: StatusFilter::All,
            printer_type: default_type_filter(),
        }
    }
}

/// Whether a card passes the active filters. Cards without a status are
/// always hidden.
pub fn is_visible(entry: &RegistryEntry, filters: &UiFilters) -> bool {
    let Some(status) = entry.status.as_ref() else {
        return false;
    };

    let status_match = match filters.status {
        StatusFilter::All => true,
        StatusFilter::Offline => !status.online,
        StatusFilter::Printing => status.online && status.state.is_printing(),
        StatusFilter::Paused => status.online && status.state.is_paused(),
        StatusFilter::Idle => {
            status.online && !status.state.is_printing() && !status.state.is_paused()
        }
    };

    let type_match = filters.printer_type == ALL_TYPES
        || status.printer_type.as_deref() == Some(filters.printer_type.as_str());

    status_match && type_match
}

// =============================================================================
// Formatting
// =============================================================================

pub fn format_status_text(state: &PrinterState) -> String {
    match state {
        PrinterState::Ready | PrinterState::Operational => "Ready".to_string(),
        PrinterState::Printing => "Printing".to_string(),
        PrinterState::Paused => "Paused".to_string(),
        PrinterState::Complete => "Complete".to_string(),
        PrinterState::Cancelled => "Cancelled".to_string(),
        PrinterState::Error => "Error".to_string(),
        PrinterState::Standby => "Standby".to_string(),
        PrinterState::Idle => "Idle".to_string(),
        PrinterState::Finished => "Finished".to_string(),
        PrinterState::Other(raw) => capitalize(raw),
    }
}

fn capitalize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn format_relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    let mins = secs / 60;
    let hours = mins / 60;
    let days = hours / 24;

    if secs < 60 {
        "Just now".to_string()
    } else if mins < 60 {
        format!("{mins}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else {
        format!("{days}d ago")
    }
}

/// Render a number without a trailing `.0`, with at most two decimals
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        let s = format!("{value:.2}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

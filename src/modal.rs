//! Modal manager
//!
//! One active modal per kind. Opening a modal resets its loading and error
//! sub-state. Closing it, whichever way the user does it, releases what the
//! modal owns: the camera refresh loop is cancelled and temporary blobs
//! (fetched thumbnails) are revoked. Escape closes every open modal.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus::{DashboardEvent, SharedBus};
use crate::dispatch::ControlAction;
use crate::gateway::Thumbnail;
use crate::model::TemperaturePresets;

/// Jog step choices in millimetres
pub const JOG_DISTANCES: [f64; 4] = [0.1, 1.0, 10.0, 100.0];
pub const DEFAULT_JOG_DISTANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModalKind {
    Confirm,
    Camera,
    Movement,
    Upload,
    Thumbnail,
    Temperature,
}

impl ModalKind {
    pub const ALL: [ModalKind; 6] = [
        ModalKind::Confirm,
        ModalKind::Camera,
        ModalKind::Movement,
        ModalKind::Upload,
        ModalKind::Thumbnail,
        ModalKind::Temperature,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModalKind::Confirm => "confirm",
            ModalKind::Camera => "camera",
            ModalKind::Movement => "movement",
            ModalKind::Upload => "upload",
            ModalKind::Thumbnail => "thumbnail",
            ModalKind::Temperature => "temperature",
        }
    }
}

/// How the user dismissed a modal. All reasons release the same resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    Button,
    Backdrop,
    Escape,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmPrompt {
    pub printer: String,
    pub action: ControlAction,
    pub title: String,
    pub message: String,
    pub confirm_label: String,
    pub danger: bool,
}

/// Confirmation texts for the print actions; other actions run unconfirmed
pub fn confirm_prompt(printer: &str, action: ControlAction) -> Option<ConfirmPrompt> {
    let (title, message, confirm_label, danger) = match &action {
        ControlAction::Pause => (
            "Pause Print".to_string(),
            format!("Are you sure you want to pause the print on \"{printer}\"?"),
            "Pause",
            false,
        ),
        ControlAction::Resume => (
            "Resume Print".to_string(),
            format!("Are you sure you want to resume the print on \"{printer}\"?"),
            "Resume",
            false,
        ),
        ControlAction::Cancel => (
            "Cancel Print".to_string(),
            format!(
                "Are you sure you want to cancel the print on \"{printer}\"? This action cannot be undone."
            ),
            "Cancel Print",
            true,
        ),
        ControlAction::Reprint { filename } => (
            "Reprint".to_string(),
            match filename {
                Some(file) => format!("Start \"{file}\" again on \"{printer}\"?"),
                None => format!("Start the last print again on \"{printer}\"?"),
            },
            "Reprint",
            false,
        ),
        _ => return None,
    };
    Some(ConfirmPrompt {
        printer: printer.to_string(),
        action,
        title,
        message,
        confirm_label: confirm_label.to_string(),
        danger,
    })
}

/// What a modal is showing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModalContent {
    Confirm(ConfirmPrompt),
    Camera {
        printer: String,
        snapshot_url: Option<String>,
    },
    Movement {
        printer: String,
        distance: f64,
    },
    Upload {
        filename: Option<String>,
    },
    Thumbnail {
        printer: String,
        file: String,
        blob: Option<u64>,
    },
    Temperature {
        printer: String,
        presets: TemperaturePresets,
    },
}

impl ModalContent {
    pub fn kind(&self) -> ModalKind {
        match self {
            ModalContent::Confirm(_) => ModalKind::Confirm,
            ModalContent::Camera { .. } => ModalKind::Camera,
            ModalContent::Movement { .. } => ModalKind::Movement,
            ModalContent::Upload { .. } => ModalKind::Upload,
            ModalContent::Thumbnail { .. } => ModalKind::Thumbnail,
            ModalContent::Temperature { .. } => ModalKind::Temperature,
        }
    }

    pub fn printer(&self) -> Option<&str> {
        match self {
            ModalContent::Confirm(prompt) => Some(&prompt.printer),
            ModalContent::Camera { printer, .. }
            | ModalContent::Movement { printer, .. }
            | ModalContent::Thumbnail { printer, .. }
            | ModalContent::Temperature { printer, .. } => Some(printer),
            ModalContent::Upload { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModalState {
    pub content: ModalContent,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Default)]
struct Resources {
    refresh: Option<CancellationToken>,
    blobs: Vec<u64>,
}

struct OpenModal {
    state: ModalState,
    resources: Resources,
}

#[derive(Default)]
struct Inner {
    open: HashMap<ModalKind, OpenModal>,
    blobs: HashMap<u64, Thumbnail>,
    next_blob: u64,
}

impl Inner {
    fn release(&mut self, kind: ModalKind, resources: Resources) {
        if let Some(token) = resources.refresh {
            token.cancel();
        }
        for id in resources.blobs {
            self.blobs.remove(&id);
        }
        debug!(modal = kind.as_str(), "Released modal resources");
    }
}

pub struct ModalManager {
    bus: SharedBus,
    inner: Mutex<Inner>,
}

impl ModalManager {
    pub fn new(bus: SharedBus) -> Self {
        Self {
            bus,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }

    /// Open a modal, replacing any modal of the same kind
    pub fn open(&self, content: ModalContent) {
        let kind = content.kind();
        let printer = content.printer().map(str::to_string);
        self.with_inner(|inner| {
            let fresh = OpenModal {
                state: ModalState {
                    content,
                    loading: false,
                    error: None,
                },
                resources: Resources::default(),
            };
            if let Some(previous) = inner.open.insert(kind, fresh) {
                inner.release(kind, previous.resources);
            }
        });
        debug!(modal = kind.as_str(), ?printer, "Modal opened");
        self.bus.publish(DashboardEvent::ModalOpened {
            kind: kind.as_str().to_string(),
            printer,
        });
    }

    /// Close a modal. Returns false if it was not open.
    pub fn close(&self, kind: ModalKind, reason: CloseReason) -> bool {
        let closed = self.with_inner(|inner| match inner.open.remove(&kind) {
            Some(modal) => {
                inner.release(kind, modal.resources);
                true
            }
            None => false,
        });
        if closed {
            debug!(modal = kind.as_str(), ?reason, "Modal closed");
            self.bus.publish(DashboardEvent::ModalClosed {
                kind: kind.as_str().to_string(),
            });
        }
        closed
    }

    /// Close every open modal
    pub fn escape(&self) -> Vec<ModalKind> {
        ModalKind::ALL
            .into_iter()
            .filter(|kind| self.close(*kind, CloseReason::Escape))
            .collect()
    }

    pub fn is_open(&self, kind: ModalKind) -> bool {
        self.with_inner(|inner| inner.open.contains_key(&kind))
    }

    pub fn get(&self, kind: ModalKind) -> Option<ModalState> {
        self.with_inner(|inner| inner.open.get(&kind).map(|m| m.state.clone()))
    }

    /// Open modals in a stable order
    pub fn open_modals(&self) -> Vec<ModalState> {
        self.with_inner(|inner| {
            ModalKind::ALL
                .iter()
                .filter_map(|kind| inner.open.get(kind).map(|m| m.state.clone()))
                .collect()
        })
    }

    /// Mutate an open modal's state. Returns false if it is not open.
    pub fn update(&self, kind: ModalKind, f: impl FnOnce(&mut ModalState)) -> bool {
        self.with_inner(|inner| match inner.open.get_mut(&kind) {
            Some(modal) => {
                f(&mut modal.state);
                true
            }
            None => false,
        })
    }

    pub fn set_loading(&self, kind: ModalKind, loading: bool) -> bool {
        self.update(kind, |state| state.loading = loading)
    }

    pub fn set_error(&self, kind: ModalKind, error: impl Into<String>) -> bool {
        let error = error.into();
        self.update(kind, |state| {
            state.loading = false;
            state.error = Some(error);
        })
    }

    /// Hand a refresh loop's token to the camera modal showing `printer`.
    /// If the modal is closed or now shows another printer the token is
    /// cancelled right away.
    pub fn attach_camera_refresh(&self, printer: &str, token: CancellationToken) -> bool {
        self.with_inner(|inner| match inner.open.get_mut(&ModalKind::Camera) {
            Some(modal) if modal.state.content.printer() == Some(printer) => {
                if let Some(old) = modal.resources.refresh.replace(token) {
                    old.cancel();
                }
                true
            }
            _ => {
                token.cancel();
                false
            }
        })
    }

    /// Cancel a modal's refresh loop, leaving the modal open
    pub fn cancel_refresh(&self, kind: ModalKind) -> bool {
        self.with_inner(|inner| {
            match inner
                .open
                .get_mut(&kind)
                .and_then(|modal| modal.resources.refresh.take())
            {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            }
        })
    }

    /// Printer shown by the open camera modal
    pub fn camera_printer(&self) -> Option<String> {
        self.with_inner(|inner| {
            inner
                .open
                .get(&ModalKind::Camera)
                .and_then(|modal| modal.state.content.printer())
                .map(str::to_string)
        })
    }

    /// Store a temporary blob owned by an open modal
    pub fn store_blob(&self, kind: ModalKind, blob: Thumbnail) -> Option<u64> {
        self.with_inner(|inner| {
            if !inner.open.contains_key(&kind) {
                return None;
            }
            inner.next_blob += 1;
            let id = inner.next_blob;
            inner.blobs.insert(id, blob);
            if let Some(modal) = inner.open.get_mut(&kind) {
                modal.resources.blobs.push(id);
            }
            Some(id)
        })
    }

    pub fn blob(&self, id: u64) -> Option<Thumbnail> {
        self.with_inner(|inner| inner.blobs.get(&id).cloned())
    }

    pub fn live_blob_count(&self) -> usize {
        self.with_inner(|inner| inner.blobs.len())
    }

    /// Select the jog step of the open movement modal
    pub fn select_jog_distance(&self, distance: f64) -> bool {
        if !JOG_DISTANCES.contains(&distance) {
            return false;
        }
        self.update(ModalKind::Movement, |state| {
            if let ModalContent::Movement { distance: d, .. } = &mut state.content {
                *d = distance;
            }
        })
    }

    /// Printer and jog step of the open movement modal
    pub fn movement_target(&self) -> Option<(String, f64)> {
        match self.get(ModalKind::Movement)?.content {
            ModalContent::Movement { printer, distance } => Some((printer, distance)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;

    fn camera(printer: &str) -> ModalContent {
        ModalContent::Camera {
            printer: printer.to_string(),
            snapshot_url: None,
        }
    }

    fn thumbnail() -> Thumbnail {
        Thumbnail {
            content_type: "image/png".to_string(),
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
        }
    }

    #[test]
    fn reopen_resets_error_and_loading() {
        let modals = ModalManager::new(create_bus());
        modals.open(camera("voron"));
        modals.set_loading(ModalKind::Camera, true);
        modals.set_error(ModalKind::Camera, "Camera not available");

        modals.open(camera("voron"));
        let state = modals.get(ModalKind::Camera).unwrap();
        assert!(!state.loading);
        assert!(state.error.is_none());
    }

    #[test]
    fn every_close_reason_releases_resources() {
        for reason in [CloseReason::Button, CloseReason::Backdrop, CloseReason::Escape] {
            let modals = ModalManager::new(create_bus());
            modals.open(camera("voron"));
            let token = CancellationToken::new();
            assert!(modals.attach_camera_refresh("voron", token.clone()));

            modals.open(ModalContent::Thumbnail {
                printer: "voron".into(),
                file: "cube.gcode".into(),
                blob: None,
            });
            let blob = modals.store_blob(ModalKind::Thumbnail, thumbnail()).unwrap();
            assert!(modals.blob(blob).is_some());

            assert!(modals.close(ModalKind::Camera, reason));
            assert!(modals.close(ModalKind::Thumbnail, reason));
            assert!(token.is_cancelled(), "{reason:?}");
            assert!(modals.blob(blob).is_none(), "{reason:?}");
            assert_eq!(modals.live_blob_count(), 0);
        }
    }

    #[test]
    fn escape_closes_all() {
        let modals = ModalManager::new(create_bus());
        modals.open(camera("voron"));
        modals.open(ModalContent::Upload { filename: None });
        let closed = modals.escape();
        assert_eq!(closed, vec![ModalKind::Camera, ModalKind::Upload]);
        assert!(modals.open_modals().is_empty());
        assert!(modals.escape().is_empty());
    }

    #[test]
    fn replacing_a_modal_cancels_its_refresh() {
        let modals = ModalManager::new(create_bus());
        modals.open(camera("voron"));
        let token = CancellationToken::new();
        modals.attach_camera_refresh("voron", token.clone());
        modals.open(camera("ender"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn refresh_for_closed_modal_is_cancelled() {
        let modals = ModalManager::new(create_bus());
        let token = CancellationToken::new();
        assert!(!modals.attach_camera_refresh("voron", token.clone()));
        assert!(token.is_cancelled());
        assert!(modals.store_blob(ModalKind::Thumbnail, thumbnail()).is_none());
    }

    #[test]
    fn refresh_for_another_printer_is_refused() {
        let modals = ModalManager::new(create_bus());
        modals.open(camera("ender"));
        let current = CancellationToken::new();
        assert!(modals.attach_camera_refresh("ender", current.clone()));

        let stale = CancellationToken::new();
        assert!(!modals.attach_camera_refresh("voron", stale.clone()));
        assert!(stale.is_cancelled());
        assert!(!current.is_cancelled());
    }

    #[test]
    fn cancel_refresh_keeps_modal_open() {
        let modals = ModalManager::new(create_bus());
        modals.open(camera("voron"));
        let token = CancellationToken::new();
        modals.attach_camera_refresh("voron", token.clone());

        assert!(modals.cancel_refresh(ModalKind::Camera));
        assert!(token.is_cancelled());
        assert!(modals.is_open(ModalKind::Camera));
        assert_eq!(modals.camera_printer().as_deref(), Some("voron"));
        assert!(!modals.cancel_refresh(ModalKind::Camera));
    }

    #[test]
    fn jog_distance_selection() {
        let modals = ModalManager::new(create_bus());
        modals.open(ModalContent::Movement {
            printer: "voron".into(),
            distance: DEFAULT_JOG_DISTANCE,
        });
        assert!(modals.select_jog_distance(10.0));
        assert!(!modals.select_jog_distance(5.0));
        assert_eq!(modals.movement_target(), Some(("voron".to_string(), 10.0)));
    }

    #[test]
    fn confirm_texts() {
        let cancel = confirm_prompt("voron", ControlAction::Cancel).unwrap();
        assert_eq!(cancel.title, "Cancel Print");
        assert!(cancel.message.contains("cannot be undone"));
        assert!(cancel.danger);

        let pause = confirm_prompt("voron", ControlAction::Pause).unwrap();
        assert_eq!(
            pause.message,
            "Are you sure you want to pause the print on \"voron\"?"
        );
        assert_eq!(pause.confirm_label, "Pause");
        assert!(!pause.danger);

        assert!(confirm_prompt("voron", ControlAction::Home { axis: None }).is_none());
    }
}

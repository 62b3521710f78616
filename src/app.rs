//! Dashboard application object
//!
//! Owns the registry, poller, dispatcher, modals and notifications, built once
//! from a gateway and a bus. The web surface only ever talks to this type.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::bus::{DashboardEvent, SharedBus};
use crate::camera::{CameraFeed, ClientContext, DEFAULT_CAMERA_REFRESH};
use crate::config::{save_ui_preferences, Config, UiPreferences};
use crate::dispatch::{ActionError, Axis, ControlAction, Dispatcher, HeaterType, DEFAULT_REPOLL_DELAY};
use crate::files::{FileError, GcodeLibrary};
use crate::gateway::{Gateway, GatewayError, Thumbnail};
use crate::modal::{
    confirm_prompt, CloseReason, ModalContent, ModalKind, ModalManager, ModalState,
    DEFAULT_JOG_DISTANCE,
};
use crate::model::{default_temperature_presets, GcodeFile, PrinterType, TemperaturePresets};
use crate::notify::{NotificationCenter, Toast, DEFAULT_TOAST_TTL};
use crate::poller::{PollOutcome, StatusPoller, DEFAULT_POLL_INTERVAL};
use crate::registry::PrinterRegistry;
use crate::render::{is_visible, render_card, summarize, CardView, Summary, UiFilters};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    #[error("Failed to load printers: {0}")]
    Printers(#[from] GatewayError),
    #[error("Failed to update printer status: {0}")]
    Status(String),
}

/// Which pane the dashboard shows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", content = "message", rename_all = "lowercase")]
pub enum Phase {
    Loading,
    Empty,
    Error(String),
    Ready,
}

#[derive(Debug, Clone)]
pub struct DashboardSettings {
    pub poll_interval: Duration,
    pub repoll_delay: Duration,
    pub notification_ttl: Duration,
    pub camera_refresh: Duration,
    pub direct_control: bool,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            repoll_delay: DEFAULT_REPOLL_DELAY,
            notification_ttl: DEFAULT_TOAST_TTL,
            camera_refresh: DEFAULT_CAMERA_REFRESH,
            direct_control: true,
        }
    }
}

impl From<&Config> for DashboardSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            repoll_delay: config.repoll_delay(),
            notification_ttl: config.notification_ttl(),
            camera_refresh: config.camera_refresh(),
            direct_control: config.direct_control.enabled,
        }
    }
}

/// Everything the page needs to draw itself
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    #[serde(flatten)]
    pub phase: Phase,
    pub summary: Summary,
    pub cards: Vec<CardView>,
    pub filters: UiFilters,
    /// Reported printer types, for the type filter
    pub printer_types: Vec<String>,
    pub poll_error: Option<String>,
    pub toasts: Vec<Toast>,
    pub modals: Vec<ModalState>,
    pub active_tab: Option<String>,
}

/// Result of a user asking for an action from a card
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionRequest {
    /// A confirmation modal was opened
    NeedsConfirmation,
    Dispatched,
}

pub struct Dashboard {
    bus: SharedBus,
    gateway: Arc<dyn Gateway>,
    registry: Arc<PrinterRegistry>,
    poller: Arc<StatusPoller>,
    dispatcher: Dispatcher,
    notifications: Arc<NotificationCenter>,
    modals: Arc<ModalManager>,
    camera: Arc<CameraFeed>,
    files: GcodeLibrary,
    phase: RwLock<Phase>,
    filters: RwLock<UiFilters>,
    prefs: RwLock<UiPreferences>,
    presets: RwLock<Option<TemperaturePresets>>,
}

impl Dashboard {
    pub fn new(gateway: Arc<dyn Gateway>, bus: SharedBus, settings: DashboardSettings) -> Self {
        let registry = Arc::new(PrinterRegistry::new());
        let notifications = Arc::new(NotificationCenter::new(
            bus.clone(),
            settings.notification_ttl,
        ));
        let poller = Arc::new(StatusPoller::new(
            gateway.clone(),
            registry.clone(),
            bus.clone(),
            settings.poll_interval,
        ));
        let dispatcher = Dispatcher::new(
            gateway.clone(),
            registry.clone(),
            poller.clone(),
            notifications.clone(),
            bus.clone(),
        )
        .with_direct_control(settings.direct_control)
        .with_repoll_delay(settings.repoll_delay);
        let modals = Arc::new(ModalManager::new(bus.clone()));
        let camera = Arc::new(CameraFeed::new(
            gateway.clone(),
            modals.clone(),
            bus.clone(),
            settings.camera_refresh,
        ));
        let files = GcodeLibrary::new(gateway.clone(), notifications.clone());

        Self {
            bus,
            gateway,
            registry,
            poller,
            dispatcher,
            notifications,
            modals,
            camera,
            files,
            phase: RwLock::new(Phase::Loading),
            filters: RwLock::new(UiFilters::default()),
            prefs: RwLock::new(UiPreferences::default()),
            presets: RwLock::new(None),
        }
    }

    pub fn with_preferences(mut self, prefs: UiPreferences) -> Self {
        self.prefs = RwLock::new(prefs);
        self
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn modals(&self) -> &ModalManager {
        &self.modals
    }

    pub fn registry(&self) -> &PrinterRegistry {
        &self.registry
    }

    pub async fn phase(&self) -> Phase {
        self.phase.read().await.clone()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Load the printer list. An empty list is a valid, explicit state.
    pub async fn load_printers(&self) -> Result<usize, LoadError> {
        *self.phase.write().await = Phase::Loading;

        match self.gateway.printers().await {
            Ok(configs) => {
                let count = self.registry.replace_configs(configs).await;
                *self.phase.write().await = if count == 0 {
                    Phase::Empty
                } else {
                    Phase::Ready
                };
                self.bus.publish(DashboardEvent::PrintersLoaded { count });
                Ok(count)
            }
            Err(e) => {
                let err = LoadError::from(e);
                warn!(error = %err, "Printer list unavailable");
                *self.phase.write().await = Phase::Error(err.to_string());
                self.bus.publish(DashboardEvent::PrintersLoadFailed {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Load printers and start polling if there is anything to poll
    pub async fn start(&self) -> Result<usize, LoadError> {
        let count = self.load_printers().await?;
        if count > 0 {
            self.poller.start();
        }
        Ok(count)
    }

    /// Manual refresh. Retries the printer list after a load failure,
    /// otherwise polls right away.
    pub async fn refresh(&self) -> Result<PollOutcome, LoadError> {
        let phase = self.phase().await;
        if matches!(phase, Phase::Error(_) | Phase::Empty | Phase::Loading) {
            let count = self.start().await?;
            if count == 0 {
                return Ok(PollOutcome::Updated(Vec::new()));
            }
        }
        Ok(self.poller.poll().await)
    }

    /// Hidden pages stop polling and camera refresh
    pub async fn set_visibility(&self, visible: bool) {
        if !visible {
            self.poller.set_visible(false);
            self.camera.pause();
            return;
        }
        self.camera.resume().await;
        if self.phase().await == Phase::Ready {
            self.poller.set_visible(true);
        }
    }

    pub fn shutdown(&self) {
        self.poller.shutdown();
        self.modals.escape();
        info!("Dashboard shut down");
    }

    // =========================================================================
    // View
    // =========================================================================

    /// Pane to show. A failed status poll replaces the cards with the
    /// error pane until a poll succeeds; statuses stay in the registry.
    pub async fn displayed_phase(&self) -> Phase {
        match self.phase().await {
            Phase::Ready => match self.poller.last_error().await {
                Some(error) => Phase::Error(LoadError::Status(error).to_string()),
                None => Phase::Ready,
            },
            phase => phase,
        }
    }

    pub async fn view(&self, now: DateTime<Utc>) -> DashboardView {
        let phase = self.displayed_phase().await;
        let filters = self.filters.read().await.clone();
        let active_tab = self.prefs.read().await.active_tab.clone();
        let poll_error = self.poller.last_error().await;
        let entries = self.registry.entries().await;
        let last_print = self.registry.last_print_files().await;

        let printer_types: BTreeSet<String> = entries
            .iter()
            .filter_map(|e| e.status.as_ref()?.printer_type.clone())
            .collect();

        let cards = entries
            .iter()
            .filter(|entry| is_visible(entry, &filters))
            .map(|entry| {
                render_card(
                    entry,
                    last_print.get(entry.name()).map(String::as_str),
                    now,
                )
            })
            .collect();

        DashboardView {
            phase,
            summary: summarize(&entries),
            cards,
            filters,
            printer_types: printer_types.into_iter().collect(),
            poll_error,
            toasts: self.notifications.active(),
            modals: self.modals.open_modals(),
            active_tab,
        }
    }

    pub async fn set_filters(&self, filters: UiFilters) {
        *self.filters.write().await = filters;
    }

    pub async fn set_active_tab(&self, tab: Option<String>) {
        let prefs = {
            let mut prefs = self.prefs.write().await;
            prefs.active_tab = tab;
            prefs.clone()
        };
        if let Err(e) = save_ui_preferences(&prefs) {
            warn!("Failed to save UI preferences: {}", e);
        }
    }

    pub fn dismiss_notification(&self, id: u64) -> bool {
        self.notifications.dismiss(id)
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Card button press. Print actions ask for confirmation first.
    pub async fn request_action(
        &self,
        printer: &str,
        action: ControlAction,
    ) -> Result<ActionRequest, ActionError> {
        let action = self.with_reprint_file(printer, action).await;
        match confirm_prompt(printer, action.clone()) {
            Some(prompt) => {
                if self.registry.config(printer).await.is_none() {
                    let err = ActionError::UnknownPrinter(printer.to_string());
                    self.notifications.error(err.to_string());
                    return Err(err);
                }
                self.modals.open(ModalContent::Confirm(prompt));
                Ok(ActionRequest::NeedsConfirmation)
            }
            None => {
                self.dispatcher.dispatch(printer, action).await?;
                Ok(ActionRequest::Dispatched)
            }
        }
    }

    /// Confirm the open confirmation modal: close it, then dispatch
    pub async fn confirm(&self) -> Result<(), ActionError> {
        let Some(state) = self.modals.get(ModalKind::Confirm) else {
            return Err(ActionError::Invalid("Nothing to confirm".to_string()));
        };
        self.modals.close(ModalKind::Confirm, CloseReason::Button);
        match state.content {
            ModalContent::Confirm(prompt) => {
                self.dispatcher.dispatch(&prompt.printer, prompt.action).await
            }
            _ => Err(ActionError::Invalid("Nothing to confirm".to_string())),
        }
    }

    pub async fn dispatch(&self, printer: &str, action: ControlAction) -> Result<(), ActionError> {
        self.dispatcher.dispatch(printer, action).await
    }

    /// Name the file a reprint will use so the prompt can show it
    async fn with_reprint_file(&self, printer: &str, action: ControlAction) -> ControlAction {
        let ControlAction::Reprint { filename: None } = action else {
            return action;
        };
        let Some(entry) = self.registry.get(printer).await else {
            return action;
        };
        let filename = match entry.config.printer_type {
            PrinterType::Klipper => self.registry.last_print_file(printer).await,
            PrinterType::Octoprint => entry
                .status
                .as_ref()
                .and_then(|s| s.active_file())
                .map(str::to_string),
        };
        ControlAction::Reprint { filename }
    }

    // =========================================================================
    // Movement
    // =========================================================================

    pub async fn open_movement(&self, printer: &str) -> Result<(), ActionError> {
        if self.registry.config(printer).await.is_none() {
            return Err(ActionError::UnknownPrinter(printer.to_string()));
        }
        self.modals.open(ModalContent::Movement {
            printer: printer.to_string(),
            distance: DEFAULT_JOG_DISTANCE,
        });
        Ok(())
    }

    pub fn select_jog_distance(&self, distance: f64) -> bool {
        self.modals.select_jog_distance(distance)
    }

    /// Jog the movement modal's printer by the selected step, `direction` is +1 or -1
    pub async fn jog(&self, axis: Axis, direction: f64) -> Result<(), ActionError> {
        let (printer, step) = self.movement_target()?;
        let distance = step * direction.signum();
        self.dispatcher
            .dispatch(&printer, ControlAction::Jog { axis, distance })
            .await
    }

    pub async fn home(&self, axis: Option<Axis>) -> Result<(), ActionError> {
        let (printer, _) = self.movement_target()?;
        self.dispatcher
            .dispatch(&printer, ControlAction::Home { axis })
            .await
    }

    fn movement_target(&self) -> Result<(String, f64), ActionError> {
        self.modals
            .movement_target()
            .ok_or_else(|| ActionError::Invalid("Movement controls are not open".to_string()))
    }

    // =========================================================================
    // Camera
    // =========================================================================

    pub async fn open_camera(&self, printer: &str, ctx: &ClientContext) -> Result<(), ActionError> {
        let Some(config) = self.registry.config(printer).await else {
            return Err(ActionError::UnknownPrinter(printer.to_string()));
        };
        if config.camera().is_none() {
            let err = ActionError::Invalid(format!("No camera configured for {printer}"));
            self.notifications.error(err.to_string());
            return Err(err);
        }
        self.camera.open(printer, ctx).await;
        Ok(())
    }

    pub fn close_modal(&self, kind: ModalKind, reason: CloseReason) -> bool {
        self.modals.close(kind, reason)
    }

    pub fn escape(&self) -> Vec<ModalKind> {
        self.modals.escape()
    }

    // =========================================================================
    // Temperature
    // =========================================================================

    /// Gateway presets with built-in defaults for missing heaters. Fetched once.
    pub async fn temperature_presets(&self) -> TemperaturePresets {
        if let Some(presets) = self.presets.read().await.clone() {
            return presets;
        }

        let mut presets = default_temperature_presets();
        match self.gateway.temperature_presets().await {
            Ok(remote) => presets.extend(remote.into_iter().filter(|(_, v)| !v.is_empty())),
            Err(e) => warn!(error = %e, "Using default temperature presets"),
        }
        *self.presets.write().await = Some(presets.clone());
        presets
    }

    pub async fn open_temperature(&self, printer: &str) -> Result<(), ActionError> {
        if self.registry.config(printer).await.is_none() {
            return Err(ActionError::UnknownPrinter(printer.to_string()));
        }
        let presets = self.temperature_presets().await;
        self.modals.open(ModalContent::Temperature {
            printer: printer.to_string(),
            presets,
        });
        Ok(())
    }

    pub async fn set_temperature(
        &self,
        printer: &str,
        heater: HeaterType,
        temperature: f64,
        heater_name: Option<String>,
    ) -> Result<(), ActionError> {
        self.dispatcher
            .dispatch(
                printer,
                ControlAction::SetTemperature {
                    heater,
                    temperature,
                    heater_name,
                },
            )
            .await
    }

    // =========================================================================
    // Files
    // =========================================================================

    pub async fn list_files(&self) -> Result<Vec<GcodeFile>, GatewayError> {
        self.files.list().await
    }

    pub fn open_upload(&self) {
        self.modals.open(ModalContent::Upload { filename: None });
    }

    pub async fn upload_file(&self, filename: &str, contents: Vec<u8>) -> Result<(), FileError> {
        self.modals.update(ModalKind::Upload, |state| {
            state.loading = true;
            state.error = None;
            if let ModalContent::Upload { filename: f } = &mut state.content {
                *f = Some(filename.to_string());
            }
        });
        let result = self.files.upload(filename, contents).await;
        match &result {
            Ok(()) => {
                self.modals.close(ModalKind::Upload, CloseReason::Button);
            }
            Err(err) => {
                self.modals.set_error(ModalKind::Upload, err.to_string());
            }
        }
        result
    }

    pub async fn delete_file(&self, filename: &str) -> Result<(), FileError> {
        self.files.delete(filename).await
    }

    pub async fn send_file(&self, printer: &str, file: &str, start: bool) -> Result<(), ActionError> {
        self.dispatcher
            .dispatch(
                printer,
                ControlAction::SendFile {
                    file: file.to_string(),
                    start,
                },
            )
            .await
    }

    /// Card thumbnail, never failing
    pub async fn thumbnail(&self, printer: &str, file: &str) -> Thumbnail {
        self.files.thumbnail(printer, file).await
    }

    /// Open the enlarged thumbnail modal; the image lives as a blob until close
    pub async fn open_thumbnail(&self, printer: &str, file: &str) -> Option<u64> {
        self.modals.open(ModalContent::Thumbnail {
            printer: printer.to_string(),
            file: file.to_string(),
            blob: None,
        });
        self.modals.set_loading(ModalKind::Thumbnail, true);

        let image = self.files.thumbnail(printer, file).await;
        let id = self.modals.store_blob(ModalKind::Thumbnail, image)?;
        self.modals.update(ModalKind::Thumbnail, |state| {
            state.loading = false;
            if let ModalContent::Thumbnail { blob, .. } = &mut state.content {
                *blob = Some(id);
            }
        });
        Some(id)
    }

    pub fn blob(&self, id: u64) -> Option<Thumbnail> {
        self.modals.blob(id)
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.notifications.active()
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.poller.shutdown();
    }
}

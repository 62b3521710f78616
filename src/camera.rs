//! Camera snapshots
//!
//! Home Assistant signs camera proxy URLs against the base URL the browser
//! used to reach it, so the dashboard has to work out which base URL the
//! viewer actually sees: the page origin normally, the external URL when
//! running behind ingress or inside the companion app.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::bus::{DashboardEvent, SharedBus};
use crate::gateway::Gateway;
use crate::modal::{ModalContent, ModalKind, ModalManager};
use crate::model::HaInfo;

pub const DEFAULT_CAMERA_REFRESH: Duration = Duration::from_millis(3000);
const NABU_CASA_SUFFIX: &str = ".ui.nabu.casa";

/// Where the viewer is looking at the dashboard from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub page_url: String,
    pub user_agent: String,
}

impl ClientContext {
    pub fn new(page_url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            page_url: page_url.into(),
            user_agent: user_agent.into(),
        }
    }

    pub fn is_ha_app(&self) -> bool {
        self.user_agent.contains("Home Assistant") || self.user_agent.contains("homeassistant")
    }

    pub fn is_ingress(&self) -> bool {
        self.page_url.contains("/api/hassio_ingress/") || self.page_url.contains("/hassio_ingress/")
    }

    pub fn is_nabu_casa(&self) -> bool {
        self.page_url.contains(NABU_CASA_SUFFIX)
    }

    /// Whether the gateway's suggested URLs should be consulted
    pub fn wants_suggestions(&self) -> bool {
        self.is_ingress() || self.is_ha_app()
    }

    fn origin(&self) -> String {
        match Url::parse(self.page_url.trim()) {
            Ok(url) => url.origin().ascii_serialization(),
            Err(_) => self.page_url.trim().trim_end_matches('/').to_string(),
        }
    }
}

fn force_https(url: &str) -> String {
    match url.strip_prefix("http://") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    }
}

/// Pick the base URL to send with snapshot requests.
///
/// Nabu Casa URLs are always upgraded to https. Inside ingress or the
/// companion app the first non-empty gateway suggestion that differs from
/// the page origin wins.
pub fn resolve_base_url(ctx: &ClientContext, ha_info: Option<&HaInfo>) -> String {
    let mut base = ctx.origin();
    if ctx.is_nabu_casa() || base.contains(NABU_CASA_SUFFIX) {
        base = force_https(&base);
    }

    if !ctx.wants_suggestions() {
        return base;
    }

    let suggestion = ha_info
        .into_iter()
        .flat_map(|info| info.suggested_base_urls.iter())
        .map(|url| url.trim())
        .find(|url| !url.is_empty() && *url != base);

    match suggestion {
        Some(url) if url.contains(NABU_CASA_SUFFIX) => force_https(url),
        Some(url) => url.to_string(),
        None => base,
    }
}

/// Loads snapshots into the camera modal and keeps them fresh
pub struct CameraFeed {
    gateway: Arc<dyn Gateway>,
    modals: Arc<ModalManager>,
    bus: SharedBus,
    refresh: Duration,
    /// Printer and base URL of the feed last opened
    current: Mutex<Option<(String, String)>>,
    paused: AtomicBool,
}

impl CameraFeed {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        modals: Arc<ModalManager>,
        bus: SharedBus,
        refresh: Duration,
    ) -> Self {
        let refresh = if refresh.is_zero() {
            DEFAULT_CAMERA_REFRESH
        } else {
            refresh
        };
        Self {
            gateway,
            modals,
            bus,
            refresh,
            current: Mutex::new(None),
            paused: AtomicBool::new(false),
        }
    }

    pub async fn base_url(&self, ctx: &ClientContext) -> String {
        if !ctx.wants_suggestions() {
            return resolve_base_url(ctx, None);
        }
        match self.gateway.ha_info().await {
            Ok(info) => resolve_base_url(ctx, Some(&info)),
            Err(e) => {
                warn!(error = %e, "Could not fetch HA info from gateway");
                resolve_base_url(ctx, None)
            }
        }
    }

    /// Open the camera modal for a printer and start refreshing on success
    pub async fn open(self: &Arc<Self>, printer: &str, ctx: &ClientContext) {
        self.modals.open(ModalContent::Camera {
            printer: printer.to_string(),
            snapshot_url: None,
        });
        self.modals.set_loading(ModalKind::Camera, true);

        let base_url = self.base_url(ctx).await;
        debug!(printer, %base_url, "Resolved camera base URL");
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((printer.to_string(), base_url.clone()));

        if self.load(printer, &base_url).await {
            self.start_refresh(printer.to_string(), base_url);
        }
    }

    /// Stop refreshing while the page is hidden. The modal stays open.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        if self.modals.cancel_refresh(ModalKind::Camera) {
            debug!("Camera refresh paused");
        }
    }

    /// Reload and restart refreshing the open camera modal, if any
    pub async fn resume(self: &Arc<Self>) {
        self.paused.store(false, Ordering::SeqCst);
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let Some((printer, base_url)) = current else {
            return;
        };
        if self.modals.camera_printer().as_deref() != Some(printer.as_str()) {
            return;
        }
        if self.load(&printer, &base_url).await {
            self.start_refresh(printer, base_url);
        }
    }

    /// Fetch one snapshot into the modal. Returns true only if the URL was
    /// shown in a modal that still belongs to `printer`.
    pub async fn load(&self, printer: &str, base_url: &str) -> bool {
        let result = self.gateway.camera_snapshot(printer, base_url).await;
        let showing_printer = |content: &ModalContent| {
            matches!(content, ModalContent::Camera { printer: p, .. } if p == printer)
        };

        match result {
            Ok(reply) => match reply.snapshot_url {
                Some(url) if !url.trim().is_empty() => {
                    let mut updated = false;
                    self.modals.update(ModalKind::Camera, |state| {
                        if showing_printer(&state.content) {
                            state.content = ModalContent::Camera {
                                printer: printer.to_string(),
                                snapshot_url: Some(url.clone()),
                            };
                            state.loading = false;
                            state.error = None;
                            updated = true;
                        }
                    });
                    if updated {
                        self.bus.publish(DashboardEvent::CameraSnapshot {
                            printer: printer.to_string(),
                            snapshot_url: url,
                        });
                    }
                    updated
                }
                _ => {
                    let error = reply
                        .error
                        .unwrap_or_else(|| "No snapshot_url in response".to_string());
                    self.fail(printer, &showing_printer, error);
                    false
                }
            },
            Err(e) => {
                self.fail(printer, &showing_printer, e.to_string());
                false
            }
        }
    }

    fn fail(&self, printer: &str, showing: &dyn Fn(&ModalContent) -> bool, error: String) {
        warn!(printer, %error, "Camera snapshot failed");
        self.modals.update(ModalKind::Camera, |state| {
            if showing(&state.content) {
                state.loading = false;
                state.error = Some(error);
            }
        });
    }

    fn start_refresh(self: &Arc<Self>, printer: String, base_url: String) {
        if self.paused.load(Ordering::SeqCst) {
            debug!(printer = %printer, "Page hidden, camera refresh not started");
            return;
        }
        let token = CancellationToken::new();
        if !self.modals.attach_camera_refresh(&printer, token.clone()) {
            return;
        }

        let feed = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(feed.refresh);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately and the snapshot is already loaded
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(printer = %printer, "Camera refresh stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        feed.load(&printer, &base_url).await;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;
    use crate::gateway::fake::FakeGateway;
    use crate::modal::CloseReason;
    use crate::model::SnapshotReply;

    fn info(urls: &[&str]) -> HaInfo {
        HaInfo {
            suggested_base_urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[test]
    fn plain_page_uses_origin() {
        let ctx = ClientContext::new("http://192.168.1.10:5001/dashboard", "Mozilla/5.0");
        assert_eq!(
            resolve_base_url(&ctx, Some(&info(&["http://other"]))),
            "http://192.168.1.10:5001"
        );
    }

    #[test]
    fn nabu_casa_forces_https() {
        let ctx = ClientContext::new("http://abc.ui.nabu.casa/lovelace", "Mozilla/5.0");
        assert_eq!(resolve_base_url(&ctx, None), "https://abc.ui.nabu.casa");
    }

    #[test]
    fn ingress_prefers_first_differing_suggestion() {
        let ctx = ClientContext::new(
            "https://abc.ui.nabu.casa/api/hassio_ingress/xyz/",
            "Mozilla/5.0",
        );
        let ha = info(&["", "https://abc.ui.nabu.casa", "http://def.ui.nabu.casa", "http://x"]);
        assert_eq!(resolve_base_url(&ctx, Some(&ha)), "https://def.ui.nabu.casa");
    }

    #[test]
    fn companion_app_without_suggestions_keeps_origin() {
        let ctx = ClientContext::new(
            "http://homeassistant.local:8123/hassio_ingress/xyz/",
            "Home Assistant/2024.1 (io.robbie.HomeAssistant)",
        );
        assert!(ctx.is_ha_app());
        assert_eq!(
            resolve_base_url(&ctx, Some(&info(&[]))),
            "http://homeassistant.local:8123"
        );
        assert_eq!(
            resolve_base_url(&ctx, Some(&info(&["http://192.168.1.2:8123"]))),
            "http://192.168.1.2:8123"
        );
    }

    fn feed(gateway: Arc<FakeGateway>) -> (Arc<ModalManager>, Arc<CameraFeed>) {
        let bus = create_bus();
        let modals = Arc::new(ModalManager::new(bus.clone()));
        let feed = Arc::new(CameraFeed::new(
            gateway,
            modals.clone(),
            bus,
            Duration::from_secs(3),
        ));
        (modals, feed)
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_runs_until_modal_closes() {
        let gateway = Arc::new(FakeGateway::new());
        let (modals, feed) = feed(gateway.clone());
        let ctx = ClientContext::new("http://ha.local:8123/", "Mozilla/5.0");

        feed.open("voron", &ctx).await;
        let state = modals.get(ModalKind::Camera).unwrap();
        assert!(!state.loading);
        assert!(matches!(
            state.content,
            ModalContent::Camera { snapshot_url: Some(_), .. }
        ));
        assert_eq!(gateway.snapshot_requests.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(6_100)).await;
        assert_eq!(gateway.snapshot_requests.lock().unwrap().len(), 3);

        modals.close(ModalKind::Camera, CloseReason::Backdrop);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(gateway.snapshot_requests.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_snapshot_does_not_hijack_another_printers_modal() {
        let gateway = Arc::new(FakeGateway::new());
        gateway
            .snapshot_delays
            .lock()
            .unwrap()
            .insert("voron".to_string(), Duration::from_secs(1));
        let (modals, feed) = feed(gateway.clone());
        let ctx = ClientContext::new("http://ha.local:8123/", "Mozilla/5.0");

        let slow = {
            let feed = feed.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { feed.open("voron", &ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        feed.open("ender", &ctx).await;
        slow.await.unwrap();

        let state = modals.get(ModalKind::Camera).unwrap();
        assert_eq!(state.content.printer(), Some("ender"));

        tokio::time::sleep(Duration::from_millis(9_100)).await;
        assert_eq!(gateway.snapshot_requests_for("voron"), 1);
        assert_eq!(gateway.snapshot_requests_for("ender"), 4);
        assert_eq!(modals.camera_printer().as_deref(), Some("ender"));
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_page_pauses_refresh_until_shown() {
        let gateway = Arc::new(FakeGateway::new());
        let (modals, feed) = feed(gateway.clone());
        let ctx = ClientContext::new("http://ha.local:8123/", "Mozilla/5.0");

        feed.open("voron", &ctx).await;
        feed.pause();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(gateway.snapshot_requests_for("voron"), 1);
        assert!(modals.is_open(ModalKind::Camera));

        feed.resume().await;
        assert_eq!(gateway.snapshot_requests_for("voron"), 2);
        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(gateway.snapshot_requests_for("voron"), 3);

        modals.close(ModalKind::Camera, CloseReason::Button);
        feed.resume().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(gateway.snapshot_requests_for("voron"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_snapshot_url_shows_error_without_refresh() {
        let gateway = Arc::new(FakeGateway::new());
        *gateway.snapshot_reply.lock().unwrap() = Ok(SnapshotReply {
            snapshot_url: None,
            error: Some("Camera entity not found".to_string()),
        });
        let (modals, feed) = feed(gateway.clone());

        feed.open("voron", &ClientContext::default()).await;
        let state = modals.get(ModalKind::Camera).unwrap();
        assert_eq!(state.error.as_deref(), Some("Camera entity not found"));
        assert!(!state.loading);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(gateway.snapshot_requests.lock().unwrap().len(), 1);
    }
}

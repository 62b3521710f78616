//! Status poller
//!
//! Fetches the aggregate status snapshot from the gateway and merges it into
//! the registry. At most one poll is in flight at a time; a poll requested
//! while another is running is dropped without issuing a request.
//!
//! The periodic loop runs while the dashboard is visible and is cancelled
//! when it is hidden or the poller shuts down. Deferred one-shot polls (used
//! after control actions) share the shutdown token.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{DashboardEvent, SharedBus};
use crate::gateway::Gateway;
use crate::registry::PrinterRegistry;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Result of a single poll attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Another poll was already in flight
    Skipped,
    /// Names of the printers whose status was replaced
    Updated(Vec<String>),
    Failed(String),
}

/// Clears the in-flight flag when the poll finishes, however it finishes
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct StatusPoller {
    gateway: Arc<dyn Gateway>,
    registry: Arc<PrinterRegistry>,
    bus: SharedBus,
    interval: Duration,
    in_flight: AtomicBool,
    last_error: RwLock<Option<String>>,
    /// Token of the running periodic loop, if any
    loop_token: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl StatusPoller {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        registry: Arc<PrinterRegistry>,
        bus: SharedBus,
        interval: Duration,
    ) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            interval
        };
        Self {
            gateway,
            registry,
            bus,
            interval,
            in_flight: AtomicBool::new(false),
            last_error: RwLock::new(None),
            loop_token: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_polling(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Error from the most recent failed poll, cleared by the next success
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Poll once now
    pub async fn poll(&self) -> PollOutcome {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            debug!("Status poll already in flight, skipping");
            return PollOutcome::Skipped;
        };

        match self.gateway.status().await {
            Ok(snapshot) => {
                let updated = self.registry.apply_snapshot(snapshot, Utc::now()).await;
                *self.last_error.write().await = None;
                debug!(count = updated.len(), "Status poll applied");
                self.bus.publish(DashboardEvent::StatusUpdated {
                    printers: updated.clone(),
                });
                PollOutcome::Updated(updated)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "Status poll failed");
                *self.last_error.write().await = Some(message.clone());
                self.bus.publish(DashboardEvent::StatusPollFailed {
                    message: message.clone(),
                });
                PollOutcome::Failed(message)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.loop_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Start the periodic loop. The first poll happens immediately.
    pub fn start(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            debug!("Poller shut down, not starting");
            return;
        }

        let token = {
            let mut slot = self.loop_token.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                return;
            }
            let token = self.shutdown.child_token();
            *slot = Some(token.clone());
            token
        };

        let poller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(poller.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Status poll loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        poller.poll().await;
                    }
                }
            }
        });

        info!(interval_secs = self.interval.as_secs_f64(), "Status polling started");
    }

    /// Stop the periodic loop. Deferred polls are left alone.
    pub fn stop(&self) {
        let token = self
            .loop_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(token) = token {
            token.cancel();
            info!("Status polling stopped");
        }
    }

    /// Hidden pages stop polling; becoming visible polls immediately.
    pub fn set_visible(self: &Arc<Self>, visible: bool) {
        if visible {
            self.start();
        } else {
            self.stop();
        }
    }

    /// Run one poll after `delay`, unless the poller shuts down first
    pub fn schedule_poll(self: &Arc<Self>, delay: Duration) {
        let token = self.shutdown.child_token();
        let poller = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Deferred poll cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    poller.poll().await;
                }
            }
        });
    }

    /// Cancel every timer owned by the poller
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;
    use crate::gateway::fake::FakeGateway;
    use crate::gateway::GatewayError;
    use crate::model::{PrinterConfig, PrinterState, PrinterStatus, PrinterType, StatusSnapshot};

    fn config(name: &str) -> PrinterConfig {
        PrinterConfig {
            name: name.to_string(),
            printer_type: PrinterType::Klipper,
            url: format!("http://{name}.local"),
            camera_entity: None,
            api_key: None,
        }
    }

    fn snapshot(name: &str, state: &str) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot::new();
        snapshot.insert(
            name.to_string(),
            PrinterStatus {
                online: true,
                state: PrinterState::parse(state),
                ..Default::default()
            },
        );
        snapshot
    }

    async fn setup() -> (Arc<FakeGateway>, Arc<PrinterRegistry>, Arc<StatusPoller>) {
        let gateway = Arc::new(FakeGateway::new());
        let registry = Arc::new(PrinterRegistry::new());
        registry.replace_configs(vec![config("voron")]).await;
        let poller = Arc::new(StatusPoller::new(
            gateway.clone(),
            registry.clone(),
            create_bus(),
            Duration::from_secs(10),
        ));
        (gateway, registry, poller)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_poll_is_a_noop() {
        let (gateway, _registry, poller) = setup().await;
        gateway.set_delay(Duration::from_millis(500));

        let (first, second) = tokio::join!(poller.poll(), poller.poll());

        assert!(matches!(first, PollOutcome::Updated(_)));
        assert_eq!(second, PollOutcome::Skipped);
        assert_eq!(gateway.status_calls(), 1);
        assert!(!poller.is_polling());
    }

    #[tokio::test]
    async fn failure_preserves_statuses_and_success_clears_error() {
        let (gateway, registry, poller) = setup().await;
        gateway.set_snapshot(Ok(snapshot("voron", "printing")));
        poller.poll().await;

        gateway.set_snapshot(Err(GatewayError::Http {
            status: 502,
            reason: "Bad Gateway".to_string(),
        }));
        let outcome = poller.poll().await;
        assert_eq!(outcome, PollOutcome::Failed("HTTP 502: Bad Gateway".to_string()));
        assert_eq!(
            poller.last_error().await.as_deref(),
            Some("HTTP 502: Bad Gateway")
        );
        let voron = registry.get("voron").await.unwrap();
        assert_eq!(voron.status.unwrap().state, PrinterState::Printing);

        gateway.set_snapshot(Ok(snapshot("voron", "paused")));
        poller.poll().await;
        assert!(poller.last_error().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_polls_immediately_then_on_interval() {
        let (gateway, _registry, poller) = setup().await;
        poller.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(gateway.status_calls(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(gateway.status_calls(), 2);

        poller.set_visible(false);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(gateway.status_calls(), 2);

        // becoming visible polls right away
        poller.set_visible(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(gateway.status_calls(), 3);
        poller.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_poll_fires_once_and_is_cancelled_on_shutdown() {
        let (gateway, _registry, poller) = setup().await;
        poller.schedule_poll(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert_eq!(gateway.status_calls(), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(gateway.status_calls(), 1);

        poller.schedule_poll(Duration::from_secs(2));
        poller.shutdown();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(gateway.status_calls(), 1);
        assert!(!poller.is_running());
    }
}

//! Transient notifications (toasts)
//!
//! Every toast auto-expires after the configured TTL (5 s by default) and
//! can be dismissed early. Toasts are mirrored onto the event bus so the
//! web surface can show them as they happen.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::bus::{DashboardEvent, SharedBus};

pub const DEFAULT_TOAST_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Toast {
    pub id: u64,
    pub kind: ToastKind,
    pub message: String,
    #[serde(skip)]
    created: Instant,
}

impl Toast {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.created) >= ttl
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    toasts: VecDeque<Toast>,
}

pub struct NotificationCenter {
    bus: SharedBus,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl NotificationCenter {
    pub fn new(bus: SharedBus, ttl: Duration) -> Self {
        Self {
            bus,
            ttl,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Queue a toast and return its id
    pub fn push(&self, kind: ToastKind, message: impl Into<String>) -> u64 {
        let message = message.into();
        let id = {
            let now = Instant::now();
            let ttl = self.ttl;
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.toasts.retain(|t| !t.is_expired(now, ttl));
            inner.next_id += 1;
            let id = inner.next_id;
            inner.toasts.push_back(Toast {
                id,
                kind,
                message: message.clone(),
                created: now,
            });
            id
        };

        match kind {
            ToastKind::Error | ToastKind::Warning => warn!(id, ?kind, "{}", message),
            _ => debug!(id, ?kind, "{}", message),
        }
        self.bus.publish(DashboardEvent::Notification { id, kind, message });
        id
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.push(ToastKind::Info, message)
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.push(ToastKind::Success, message)
    }

    pub fn warning(&self, message: impl Into<String>) -> u64 {
        self.push(ToastKind::Warning, message)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.push(ToastKind::Error, message)
    }

    /// Remove a toast before it expires. Returns false if it was already gone.
    pub fn dismiss(&self, id: u64) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let before = inner.toasts.len();
            inner.toasts.retain(|t| t.id != id);
            inner.toasts.len() != before
        };
        if removed {
            self.bus
                .publish(DashboardEvent::NotificationDismissed { id });
        }
        removed
    }

    /// Toasts that have not expired yet, oldest first
    pub fn active(&self) -> Vec<Toast> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let ttl = self.ttl;
        inner.toasts.retain(|t| !t.is_expired(now, ttl));
        inner.toasts.iter().cloned().collect()
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.inner.lock().unwrap().toasts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;

    #[tokio::test(start_paused = true)]
    async fn toasts_expire_after_ttl() {
        let center = NotificationCenter::new(create_bus(), DEFAULT_TOAST_TTL);
        center.error("Failed to pause voron: jammed");

        tokio::time::advance(Duration::from_millis(4_900)).await;
        assert_eq!(center.active().len(), 1);

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(center.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn push_drops_expired_toasts() {
        let center = NotificationCenter::new(create_bus(), DEFAULT_TOAST_TTL);
        for i in 0..50 {
            center.info(format!("poll {i}"));
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        // only the toasts from the last ttl window remain queued
        assert_eq!(center.queued(), 5);
    }

    #[tokio::test]
    async fn dismiss_removes_toast_and_publishes() {
        let bus = create_bus();
        let mut rx = bus.subscribe();
        let center = NotificationCenter::new(bus, DEFAULT_TOAST_TTL);

        let id = center.success("pause command sent to voron");
        assert!(center.dismiss(id));
        assert!(!center.dismiss(id));
        assert!(center.active().is_empty());

        assert!(matches!(
            rx.recv().await.unwrap(),
            DashboardEvent::Notification { kind: ToastKind::Success, .. }
        ));
        assert_eq!(
            rx.recv().await.unwrap(),
            DashboardEvent::NotificationDismissed { id }
        );
    }

    #[tokio::test]
    async fn ids_are_unique_and_increasing() {
        let center = NotificationCenter::new(create_bus(), DEFAULT_TOAST_TTL);
        let a = center.info("a");
        let b = center.warning("b");
        assert!(b > a);
    }
}

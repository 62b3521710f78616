//! In-memory gateway for unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{ControlRequest, Gateway, GatewayError, Thumbnail};
use crate::model::{
    ActionReply, GcodeFile, HaInfo, PrinterConfig, SnapshotReply, StatusSnapshot,
    TemperaturePresets,
};

pub struct FakeGateway {
    pub printers: Mutex<Result<Vec<PrinterConfig>, GatewayError>>,
    pub snapshot: Mutex<Result<StatusSnapshot, GatewayError>>,
    pub reply: Mutex<Result<ActionReply, GatewayError>>,
    pub snapshot_reply: Mutex<Result<SnapshotReply, GatewayError>>,
    pub ha_info: Mutex<Result<HaInfo, GatewayError>>,
    pub presets: Mutex<Result<TemperaturePresets, GatewayError>>,
    pub files: Mutex<Vec<GcodeFile>>,
    pub thumbnail: Mutex<Result<Thumbnail, GatewayError>>,
    /// Applied to status and control calls
    pub delay: Mutex<Duration>,
    /// Per-printer delay before a snapshot reply
    pub snapshot_delays: Mutex<HashMap<String, Duration>>,
    pub sent: Mutex<Vec<ControlRequest>>,
    pub snapshot_requests: Mutex<Vec<(String, String)>>,
    pub uploads: Mutex<Vec<(String, usize)>>,
    pub deletes: Mutex<Vec<String>>,
    pub status_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            printers: Mutex::new(Ok(Vec::new())),
            snapshot: Mutex::new(Ok(StatusSnapshot::new())),
            reply: Mutex::new(Ok(ActionReply {
                success: true,
                ..Default::default()
            })),
            snapshot_reply: Mutex::new(Ok(SnapshotReply {
                snapshot_url: Some("/api/camera_proxy/camera.voron?token=abc".to_string()),
                error: None,
            })),
            ha_info: Mutex::new(Ok(HaInfo::default())),
            presets: Mutex::new(Err(GatewayError::Http {
                status: 404,
                reason: "Not Found".to_string(),
            })),
            files: Mutex::new(Vec::new()),
            thumbnail: Mutex::new(Err(GatewayError::Http {
                status: 404,
                reason: "Not Found".to_string(),
            })),
            delay: Mutex::new(Duration::ZERO),
            snapshot_delays: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            snapshot_requests: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_printers(configs: Vec<PrinterConfig>) -> Self {
        let fake = Self::new();
        *fake.printers.lock().unwrap() = Ok(configs);
        fake
    }

    pub fn set_snapshot(&self, snapshot: Result<StatusSnapshot, GatewayError>) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    pub fn set_reply(&self, reply: Result<ActionReply, GatewayError>) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn sent(&self) -> Vec<ControlRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn snapshot_requests_for(&self, printer: &str) -> usize {
        self.snapshot_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == printer)
            .count()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn printers(&self) -> Result<Vec<PrinterConfig>, GatewayError> {
        self.printers.lock().unwrap().clone()
    }

    async fn status(&self) -> Result<StatusSnapshot, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.snapshot.lock().unwrap().clone()
    }

    async fn send(&self, request: &ControlRequest) -> Result<ActionReply, GatewayError> {
        self.sent.lock().unwrap().push(request.clone());
        self.pause().await;
        self.reply.lock().unwrap().clone()
    }

    async fn camera_snapshot(
        &self,
        printer: &str,
        base_url: &str,
    ) -> Result<SnapshotReply, GatewayError> {
        self.snapshot_requests
            .lock()
            .unwrap()
            .push((printer.to_string(), base_url.to_string()));
        let delay = self.snapshot_delays.lock().unwrap().get(printer).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.snapshot_reply.lock().unwrap().clone()
    }

    async fn ha_info(&self) -> Result<HaInfo, GatewayError> {
        self.ha_info.lock().unwrap().clone()
    }

    async fn temperature_presets(&self) -> Result<TemperaturePresets, GatewayError> {
        self.presets.lock().unwrap().clone()
    }

    async fn gcode_files(&self) -> Result<Vec<GcodeFile>, GatewayError> {
        Ok(self.files.lock().unwrap().clone())
    }

    async fn upload_gcode(
        &self,
        filename: &str,
        contents: Vec<u8>,
    ) -> Result<ActionReply, GatewayError> {
        self.uploads
            .lock()
            .unwrap()
            .push((filename.to_string(), contents.len()));
        self.reply.lock().unwrap().clone()
    }

    async fn delete_gcode(&self, filename: &str) -> Result<ActionReply, GatewayError> {
        self.deletes.lock().unwrap().push(filename.to_string());
        self.reply.lock().unwrap().clone()
    }

    async fn thumbnail(&self, _printer: &str, _file: &str) -> Result<Thumbnail, GatewayError> {
        self.thumbnail.lock().unwrap().clone()
    }
}

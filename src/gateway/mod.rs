//! Gateway client
//!
//! The gateway is the Home Assistant add-on backend that aggregates printer
//! state and proxies control commands. Everything the dashboard knows about
//! printers arrives through the [`Gateway`] trait so the engine can be
//! exercised against an in-memory fake.

pub mod http;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::model::{
    ActionReply, GcodeFile, HaInfo, PrinterConfig, SnapshotReply, StatusSnapshot,
    TemperaturePresets,
};

pub use http::HttpGateway;

/// Failure talking to the gateway
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("HTTP {status}: {reason}")]
    Http { status: u16, reason: String },

    #[error("{0}")]
    Network(String),

    #[error("malformed gateway response: {0}")]
    Decode(String),

    #[error("invalid gateway URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

/// A single outbound control request: a gateway-relative path plus JSON body.
///
/// Produced by the routing decision and sent verbatim by the gateway client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlRequest {
    pub path: String,
    pub body: Value,
}

impl ControlRequest {
    pub fn new(path: impl Into<String>, body: Value) -> Self {
        Self {
            path: path.into(),
            body,
        }
    }
}

/// Thumbnail image bytes as served by the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Gateway HTTP surface consumed by the dashboard
#[async_trait]
pub trait Gateway: Send + Sync {
    /// `GET api/printers`
    async fn printers(&self) -> Result<Vec<PrinterConfig>, GatewayError>;

    /// `GET api/status`
    async fn status(&self) -> Result<StatusSnapshot, GatewayError>;

    /// `POST` a control request and decode the `{success, error}` envelope
    async fn send(&self, request: &ControlRequest) -> Result<ActionReply, GatewayError>;

    /// `GET api/camera/{printer}/snapshot?base_url=&_=`
    async fn camera_snapshot(
        &self,
        printer: &str,
        base_url: &str,
    ) -> Result<SnapshotReply, GatewayError>;

    /// `GET api/ha-info`
    async fn ha_info(&self) -> Result<HaInfo, GatewayError>;

    /// `GET api/temperature-presets`
    async fn temperature_presets(&self) -> Result<TemperaturePresets, GatewayError>;

    /// `GET api/gcode/files`
    async fn gcode_files(&self) -> Result<Vec<GcodeFile>, GatewayError>;

    /// `POST api/gcode/upload` (multipart)
    async fn upload_gcode(
        &self,
        filename: &str,
        contents: Vec<u8>,
    ) -> Result<ActionReply, GatewayError>;

    /// `DELETE api/gcode/files/{name}`
    async fn delete_gcode(&self, filename: &str) -> Result<ActionReply, GatewayError>;

    /// `GET api/thumbnail/{printer}?file=`
    async fn thumbnail(&self, printer: &str, file: &str) -> Result<Thumbnail, GatewayError>;
}

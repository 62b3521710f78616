//! reqwest-backed gateway client

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ControlRequest, Gateway, GatewayError, Thumbnail};
use crate::model::{
    ActionReply, GcodeFile, HaInfo, PresetsReply, PrinterConfig, SnapshotReply, StatusSnapshot,
    TemperaturePresets,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Uploads can be large; give them more room than regular requests
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Gateway client over HTTP.
///
/// All paths are resolved relative to `base_url`, which may carry an
/// ingress prefix (e.g. `http://ha.local/api/hassio_ingress/abc/`).
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: Url,
}

impl HttpGateway {
    pub fn new(base_url: &str) -> Result<Self, GatewayError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url =
            Url::parse(&normalized).map_err(|e| GatewayError::InvalidUrl(format!("{base_url}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| GatewayError::InvalidUrl(format!("{path}: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, GatewayError> {
        debug!(%url, "Gateway GET");
        let response = self.client.get(url).send().await?;
        decode_success(response).await
    }
}

/// Decode a body that is only meaningful on a 2xx status
async fn decode_success<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        return Err(GatewayError::Http {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
        });
    }
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| GatewayError::Decode(e.to_string()))
}

/// Decode an envelope the gateway also returns alongside error statuses.
///
/// Control endpoints answer `500 {"success": false, "error": "..."}`; the
/// server-provided error must reach the user verbatim, so the body wins over
/// the status line whenever it parses.
async fn decode_envelope<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response.bytes().await?;
    match serde_json::from_slice(&body) {
        Ok(value) => Ok(value),
        Err(_) if !status.is_success() => Err(GatewayError::Http {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
        }),
        Err(e) => Err(GatewayError::Decode(e.to_string())),
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn printers(&self) -> Result<Vec<PrinterConfig>, GatewayError> {
        self.get_json(self.url("api/printers")?).await
    }

    async fn status(&self) -> Result<StatusSnapshot, GatewayError> {
        self.get_json(self.url("api/status")?).await
    }

    async fn send(&self, request: &ControlRequest) -> Result<ActionReply, GatewayError> {
        let url = self.url(&request.path)?;
        debug!(%url, body = %request.body, "Gateway POST");
        let response = self.client.post(url).json(&request.body).send().await?;
        decode_envelope(response).await
    }

    async fn camera_snapshot(
        &self,
        printer: &str,
        base_url: &str,
    ) -> Result<SnapshotReply, GatewayError> {
        let mut url = self.url(&format!(
            "api/camera/{}/snapshot",
            urlencoding::encode(printer)
        ))?;
        let cache_buster = chrono::Utc::now().timestamp_millis().to_string();
        url.query_pairs_mut()
            .append_pair("base_url", base_url)
            .append_pair("_", &cache_buster);
        debug!(%url, "Gateway camera snapshot");
        let response = self.client.get(url).send().await?;
        decode_envelope(response).await
    }

    async fn ha_info(&self) -> Result<HaInfo, GatewayError> {
        self.get_json(self.url("api/ha-info")?).await
    }

    async fn temperature_presets(&self) -> Result<TemperaturePresets, GatewayError> {
        let reply: PresetsReply = self.get_json(self.url("api/temperature-presets")?).await?;
        Ok(reply.presets)
    }

    async fn gcode_files(&self) -> Result<Vec<GcodeFile>, GatewayError> {
        self.get_json(self.url("api/gcode/files")?).await
    }

    async fn upload_gcode(
        &self,
        filename: &str,
        contents: Vec<u8>,
    ) -> Result<ActionReply, GatewayError> {
        let url = self.url("api/gcode/upload")?;
        debug!(%url, filename, size = contents.len(), "Gateway upload");
        let part = reqwest::multipart::Part::bytes(contents)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .client
            .post(url)
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        decode_envelope(response).await
    }

    async fn delete_gcode(&self, filename: &str) -> Result<ActionReply, GatewayError> {
        let url = self.url(&format!("api/gcode/files/{}", urlencoding::encode(filename)))?;
        debug!(%url, "Gateway DELETE");
        let response = self.client.delete(url).send().await?;
        decode_envelope(response).await
    }

    async fn thumbnail(&self, printer: &str, file: &str) -> Result<Thumbnail, GatewayError> {
        let mut url = self.url(&format!("api/thumbnail/{}", urlencoding::encode(printer)))?;
        url.query_pairs_mut().append_pair("file", file);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response.bytes().await?.to_vec();
        Ok(Thumbnail {
            content_type,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let gateway = HttpGateway::new("http://homeassistant.local:5001").unwrap();
        assert_eq!(gateway.base_url().as_str(), "http://homeassistant.local:5001/");
    }

    #[test]
    fn paths_resolve_under_ingress_prefix() {
        let gateway =
            HttpGateway::new("https://ha.example/api/hassio_ingress/abc123").unwrap();
        let url = gateway.url("api/status").unwrap();
        assert_eq!(
            url.as_str(),
            "https://ha.example/api/hassio_ingress/abc123/api/status"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            HttpGateway::new("not a url"),
            Err(GatewayError::InvalidUrl(_))
        ));
    }
}

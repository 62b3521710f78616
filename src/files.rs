//! G-code file library
//!
//! Listing, upload and deletion of files stored by the gateway, plus
//! best-effort thumbnails. Sending a file to a printer is a control action
//! and goes through the dispatcher.

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::gateway::{Gateway, GatewayError, Thumbnail};
use crate::model::GcodeFile;
use crate::notify::NotificationCenter;

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["gcode", "gco", "gc"];

const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="120" height="120" viewBox="0 0 120 120"><rect width="120" height="120" rx="8" fill="#2a2f3a"/><path d="M30 84h60M36 84l8-36h32l8 36M48 48V36h24v12" fill="none" stroke="#6b7485" stroke-width="4" stroke-linejoin="round"/></svg>"##;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FileError {
    #[error("File name is empty")]
    EmptyName,

    #[error("Only .gcode, .gco and .gc files are allowed")]
    NotGcode,

    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Whether a file name carries an accepted G-code extension
pub fn is_allowed_gcode(filename: &str) -> bool {
    Path::new(filename.trim())
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// Thumbnail shown when the gateway has none
pub fn placeholder_thumbnail() -> Thumbnail {
    Thumbnail {
        content_type: "image/svg+xml".to_string(),
        bytes: PLACEHOLDER_SVG.as_bytes().to_vec(),
    }
}

pub struct GcodeLibrary {
    gateway: Arc<dyn Gateway>,
    notifications: Arc<NotificationCenter>,
}

impl GcodeLibrary {
    pub fn new(gateway: Arc<dyn Gateway>, notifications: Arc<NotificationCenter>) -> Self {
        Self {
            gateway,
            notifications,
        }
    }

    pub async fn list(&self) -> Result<Vec<GcodeFile>, GatewayError> {
        match self.gateway.gcode_files().await {
            Ok(mut files) => {
                files.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
                Ok(files)
            }
            Err(e) => {
                self.notifications
                    .error(format!("Failed to load G-code files: {e}"));
                Err(e)
            }
        }
    }

    /// Validate locally, then upload
    pub async fn upload(&self, filename: &str, contents: Vec<u8>) -> Result<(), FileError> {
        let filename = filename.trim();
        let check = if filename.is_empty() {
            Err(FileError::EmptyName)
        } else if !is_allowed_gcode(filename) {
            Err(FileError::NotGcode)
        } else {
            Ok(())
        };
        if let Err(err) = check {
            self.notifications.error(err.to_string());
            return Err(err);
        }

        info!(filename, size = contents.len(), "Uploading G-code file");
        let result = match self.gateway.upload_gcode(filename, contents).await {
            Ok(reply) if reply.success => Ok(()),
            Ok(reply) => Err(FileError::Rejected(
                reply.error.unwrap_or_else(|| "Unknown error".to_string()),
            )),
            Err(e) => Err(FileError::Gateway(e)),
        };

        match &result {
            Ok(()) => {
                self.notifications.success(format!("Uploaded {filename}"));
            }
            Err(err) => {
                self.notifications
                    .error(format!("Upload failed: {err}"));
            }
        }
        result
    }

    pub async fn delete(&self, filename: &str) -> Result<(), FileError> {
        let result = match self.gateway.delete_gcode(filename).await {
            Ok(reply) if reply.success => Ok(()),
            Ok(reply) => Err(FileError::Rejected(
                reply.error.unwrap_or_else(|| "Unknown error".to_string()),
            )),
            Err(e) => Err(FileError::Gateway(e)),
        };

        match &result {
            Ok(()) => {
                self.notifications.success(format!("Deleted {filename}"));
            }
            Err(err) => {
                self.notifications
                    .error(format!("Failed to delete {filename}: {err}"));
            }
        }
        result
    }

    /// Thumbnail for a printer's file. Failures fall back to the placeholder
    /// without notifying.
    pub async fn thumbnail(&self, printer: &str, file: &str) -> Thumbnail {
        match self.gateway.thumbnail(printer, file).await {
            Ok(thumbnail) if !thumbnail.bytes.is_empty() => thumbnail,
            Ok(_) => placeholder_thumbnail(),
            Err(e) => {
                debug!(printer, file, error = %e, "Thumbnail unavailable, using placeholder");
                placeholder_thumbnail()
            }
        }
    }
}

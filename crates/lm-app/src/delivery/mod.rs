//! Turns artifacts into files on the user's side.
//!
//! Inline payloads are decoded and pushed through the ordered
//! [`DeliveryStep`] chain; references are handed to the host to open.
//! Every step transition is written to the structured log.

mod blob;
mod host;
mod steps;

pub use blob::{Blob, decode_payload, parse_data_uri};
pub use host::{DeliveryHost, DownloadDirHost, HostError};
pub use steps::{
    DeliveryStep, StepError, StepSuccess, try_clipboard, try_data_uri, try_new_window,
    try_object_url,
};

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use lm_core::{Artifact, BulkListing, InlinePayload};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::logger::{FileDescriptor, StructuredLogger};

/// Characters of content written to the log when every step failed
const FAILURE_PREVIEW_CHARS: usize = 512;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("could not decode {filename}: {reason}")]
    Decode { filename: String, reason: String },

    #[error("every download method failed for {filename}")]
    Exhausted {
        filename: String,
        attempts: Vec<(DeliveryStep, String)>,
    },

    #[error("could not open {location}: {reason}")]
    Open { location: String, reason: String },

    #[error("download of {count} files was not confirmed")]
    Declined { count: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered { filename: String, step: DeliveryStep },
    Opened { location: String },
}

/// Asks the user before a large bulk download.
pub trait Confirm: Send + Sync {
    fn confirm(&self, count: usize) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(usize) -> bool + Send + Sync,
{
    fn confirm(&self, count: usize) -> bool {
        self(count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliverySettings {
    /// How long an object URL stays valid after its download started
    pub revoke_delay: Duration,
    /// Bulk item `i` starts after `i * stagger`
    pub stagger: Duration,
    /// Bulk downloads above this many items need confirmation
    pub confirm_threshold: usize,
    /// Encoded payloads larger than this are decoded off the async workers
    pub blocking_decode_bytes: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            revoke_delay: Duration::from_millis(1500),
            stagger: Duration::from_millis(300),
            confirm_threshold: 10,
            blocking_decode_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Default)]
pub struct BulkReport {
    pub delivered: Vec<DeliveryOutcome>,
    pub failed: Vec<DeliveryError>,
}

impl BulkReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct FileDelivery {
    host: Arc<dyn DeliveryHost>,
    logger: Arc<StructuredLogger>,
    settings: DeliverySettings,
}

impl FileDelivery {
    pub fn new(host: Arc<dyn DeliveryHost>, logger: Arc<StructuredLogger>) -> Self {
        Self {
            host,
            logger,
            settings: DeliverySettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: DeliverySettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn deliver(&self, artifact: &Artifact) -> Result<DeliveryOutcome, DeliveryError> {
        match artifact {
            Artifact::Reference { location } => self.open_reference(location),
            Artifact::Inline(payload) => self.deliver_inline(payload).await,
        }
    }

    pub fn open_reference(&self, location: &str) -> Result<DeliveryOutcome, DeliveryError> {
        let files = [FileDescriptor::new(location)];
        let correlation_id = self.logger.log_file_operation("open_reference", &files, None);

        match self.host.open_location(location) {
            Ok(()) => Ok(DeliveryOutcome::Opened {
                location: location.to_string(),
            }),
            Err(e) => {
                let reason = e.to_string();
                self.logger
                    .log_file_failure("open_reference", &files, &reason, Some(&correlation_id));
                Err(DeliveryError::Open {
                    location: location.to_string(),
                    reason,
                })
            }
        }
    }

    pub async fn deliver_inline(
        &self,
        payload: &InlinePayload,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let descriptor = FileDescriptor::new(&payload.filename)
            .with_size(payload.byte_size)
            .with_content_type(payload.content_type());
        let correlation_id =
            self.logger
                .log_file_operation("decode", std::slice::from_ref(&descriptor), None);

        let decoded = if payload.encoded_content.len() > self.settings.blocking_decode_bytes {
            debug!(
                "Decoding {} ({} encoded bytes) on the blocking pool",
                payload.filename,
                payload.encoded_content.len()
            );
            let owned = payload.clone();
            match tokio::task::spawn_blocking(move || decode_payload(&owned)).await {
                Ok(result) => result,
                Err(e) => Err(DeliveryError::Decode {
                    filename: payload.filename.clone(),
                    reason: e.to_string(),
                }),
            }
        } else {
            decode_payload(payload)
        };

        let blob = match decoded {
            Ok(blob) => blob,
            Err(e) => {
                self.logger.log_file_failure(
                    "decode",
                    std::slice::from_ref(&descriptor),
                    &e.to_string(),
                    Some(&correlation_id),
                );
                return Err(e);
            }
        };

        self.deliver_blob(&blob, &payload.filename, &correlation_id)
    }

    /// Runs the chain until one step succeeds. Intermediate failures are
    /// logged, only the final outcome is returned.
    pub fn deliver_blob(
        &self,
        blob: &Blob,
        filename: &str,
        correlation_id: &str,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let files = [FileDescriptor::new(filename)
            .with_size(blob.len() as u64)
            .with_content_type(blob.content_type())];
        let mut attempts = Vec::new();

        for step in DeliveryStep::CHAIN {
            let operation = format!("deliver:{step}");
            self.logger
                .log_file_operation(&operation, &files, Some(correlation_id));

            match step.attempt(self.host.as_ref(), blob, filename) {
                Ok(success) => {
                    if let Some(url) = success.object_url {
                        self.schedule_revoke(url);
                    }
                    info!("Delivered {filename} via {step}");
                    return Ok(DeliveryOutcome::Delivered {
                        filename: filename.to_string(),
                        step,
                    });
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!("Delivery of {filename} via {step} failed: {reason}");
                    self.logger
                        .log_file_failure(&operation, &files, &reason, Some(correlation_id));
                    attempts.push((step, reason));
                }
            }
        }

        let err = DeliveryError::Exhausted {
            filename: filename.to_string(),
            attempts,
        };
        self.logger.log_error(
            correlation_id,
            "deliver",
            &err,
            Some(json!({
                "filename": filename,
                "content_type": blob.content_type(),
                "size": blob.len(),
                "preview": blob.preview(FAILURE_PREVIEW_CHARS),
            })),
        );
        self.host.notify(&format!(
            "{filename} could not be downloaded. Check the request log for its content."
        ));
        Err(err)
    }

    /// Delivers every item, starting item `i` after `i * stagger`. Listings
    /// above the threshold need confirmation before anything starts.
    pub async fn deliver_bulk(
        &self,
        listing: &BulkListing,
        confirm: &dyn Confirm,
    ) -> Result<BulkReport, DeliveryError> {
        let count = listing.items.len();
        let files: Vec<FileDescriptor> = listing
            .items
            .iter()
            .map(|item| FileDescriptor::new(&item.filename).with_size(item.size))
            .collect();
        let correlation_id = self.logger.log_file_operation("bulk_download", &files, None);

        if count > self.settings.confirm_threshold && !confirm.confirm(count) {
            self.logger.log_file_failure(
                "bulk_download",
                &files,
                "not confirmed",
                Some(&correlation_id),
            );
            return Err(DeliveryError::Declined { count });
        }

        let stagger = self.settings.stagger;
        let deliveries = listing.items.iter().enumerate().map(|(index, item)| async move {
            let delay = stagger * index as u32;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.deliver(&item.to_artifact()).await
        });

        let mut report = BulkReport::default();
        for result in join_all(deliveries).await {
            match result {
                Ok(outcome) => report.delivered.push(outcome),
                Err(e) => report.failed.push(e),
            }
        }

        info!(
            "Bulk download finished: {} delivered, {} failed",
            report.delivered.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Revokes after the delay so the host can start the download first.
    /// Outside a runtime the URL is revoked right away.
    fn schedule_revoke(&self, url: String) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let host = Arc::clone(&self.host);
                let delay = self.settings.revoke_delay;
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    host.revoke_object_url(&url);
                });
            }
            Err(_) => self.host.revoke_object_url(&url),
        }
    }
}

use lm_core::{
    Artifact, BulkArtifact, BulkListing, BulkSource, InlinePayload, JobStatus, ModelFile,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::ApiError;

/// Canonical `{success, data, message}` result shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T, message: Option<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub message: Option<String>,
    /// Which probe answered
    pub source: String,
    pub details: Value,
}

impl HealthReport {
    pub fn from_value(value: Value, source: &str) -> Self {
        let status = str_field(&value, &["status"]).unwrap_or("healthy").to_string();
        let message = str_field(&value, &["message"]).map(str::to_string);
        Self {
            status,
            message,
            source: source.to_string(),
            details: value,
        }
    }
}

/// State of a handle returned by the asynchronous submission route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionStatus {
    pub id: String,
    pub status: JobStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl SubmissionStatus {
    pub fn from_value(id: &str, value: &Value) -> Self {
        Self {
            id: str_field(value, &["id"]).unwrap_or(id).to_string(),
            status: str_field(value, &["status"])
                .map(JobStatus::parse_lenient)
                .unwrap_or(JobStatus::Unknown),
            output: value.get("output").filter(|v| !v.is_null()).cloned(),
            error: str_field(value, &["error"]).map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub process_id: Option<String>,
    pub training_folder: Option<String>,
    pub uploaded_files: usize,
    pub message: Option<String>,
}

impl UploadReceipt {
    pub fn from_value(value: &Value) -> Self {
        let uploaded_files = match value.get("uploaded_files") {
            Some(Value::Array(files)) => files.len(),
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as usize,
            _ => value
                .get("total_files")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize,
        };
        Self {
            process_id: str_field(value, &["process_id", "id"]).map(str::to_string),
            training_folder: str_field(value, &["training_folder"]).map(str::to_string),
            uploaded_files,
            message: str_field(value, &["message"]).map(str::to_string),
        }
    }
}

/// Unwraps a direct-backend body. Bodies without a `success` flag are
/// taken as the data itself.
pub fn unwrap_direct(value: Value) -> Result<Value, ApiError> {
    match value.get("success").and_then(Value::as_bool) {
        Some(false) => Err(ApiError::from_remote_message(
            str_field(&value, &["message", "error"]).unwrap_or_default(),
        )),
        Some(true) => Ok(value.get("data").cloned().unwrap_or(Value::Null)),
        None => Ok(value),
    }
}

/// Unwraps a queue-backend body: `{output: result}` or the result itself.
/// Errors reported by the provider or by the handler become rejections.
pub fn unwrap_queue(value: Value) -> Result<Value, ApiError> {
    if let Some(message) = reported_error(&value) {
        return Err(ApiError::from_remote_message(message));
    }

    let result = match value {
        Value::Object(mut map) if map.contains_key("output") => match map.remove("output") {
            Some(output) if !output.is_null() => output,
            _ => Value::Object(map),
        },
        other => other,
    };

    if let Some(message) = reported_error(&result) {
        return Err(ApiError::from_remote_message(message));
    }

    Ok(result)
}

/// A body reports an error when its status says so (`error` from the
/// handler, upper-case `FAILED`/`TIMED_OUT` from the provider) or when it
/// carries an `error` string without any status. A failed *process*
/// (`status: "failed"`) is data, not an error.
fn reported_error(value: &Value) -> Option<&str> {
    let message = str_field(value, &["error"]);
    match str_field(value, &["status"]) {
        None => message,
        Some(status) if status.eq_ignore_ascii_case("error") => {
            Some(message.or_else(|| str_field(value, &["message"])).unwrap_or_default())
        }
        Some("FAILED") | Some("TIMED_OUT") => Some(message.unwrap_or_default()),
        Some(_) => None,
    }
}

/// Distinguishes an inline payload from a locator.
pub fn artifact_from_value(value: &Value) -> Option<Artifact> {
    let is_file_data = str_field(value, &["type"]) == Some("file_data");
    let encoded = str_field(value, &["data", "content", "encoded_content"]);

    if is_file_data || encoded.is_some() {
        let encoded_content = encoded?.to_string();
        let filename = str_field(value, &["filename", "name"])
            .unwrap_or("artifact.bin")
            .to_string();
        let byte_size = u64_field(value, &["size", "size_bytes", "byte_size"])
            .unwrap_or_else(|| decoded_len(&encoded_content));
        return Some(Artifact::Inline(InlinePayload {
            filename,
            encoded_content,
            content_type: str_field(value, &["content_type", "contentType"]).map(str::to_string),
            byte_size,
        }));
    }

    str_field(value, &["url", "download_url", "location", "output_path", "path"]).map(|location| {
        Artifact::Reference {
            location: location.to_string(),
        }
    })
}

/// Parses a bulk listing. Entries with neither a locator nor content are
/// skipped; everything else, duplicates included, is passed through.
pub fn bulk_from_value(value: &Value) -> BulkListing {
    let files = value
        .get("files")
        .or_else(|| value.get("download_items"))
        .or_else(|| value.get("items"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let items: Vec<BulkArtifact> = files
        .iter()
        .filter_map(|file| {
            let filename = str_field(file, &["filename", "name"])?.to_string();
            let source = if let Some(content) = str_field(file, &["data", "content"]) {
                BulkSource::Encoded(content.to_string())
            } else if let Some(location) = str_field(file, &["url", "location", "path"]) {
                BulkSource::Location(location.to_string())
            } else {
                warn!("Bulk entry {filename} has no content or location, skipping");
                return None;
            };
            Some(BulkArtifact {
                size: u64_field(file, &["size", "size_bytes"]).unwrap_or(0),
                file_type: str_field(file, &["type", "file_type"]).unwrap_or("file").to_string(),
                filename,
                source,
            })
        })
        .collect();

    let mut listing = BulkListing::from_items(items);
    if let Some(count) = u64_field(value, &["total_files", "total_count"]) {
        listing.total_count = count as usize;
    }
    if let Some(bytes) = u64_field(value, &["total_size", "total_bytes"]) {
        listing.total_bytes = bytes;
    }
    listing
}

pub fn models_from_value(value: &Value) -> Vec<ModelFile> {
    let models = match value {
        Value::Array(items) => items.clone(),
        other => other
            .get("models")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    };

    models
        .into_iter()
        .filter_map(|model| match serde_json::from_value::<ModelFile>(model) {
            Ok(model) => Some(model),
            Err(e) => {
                warn!("Skipping malformed model entry: {e}");
                None
            }
        })
        .collect()
}

pub fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| value.get(*key).and_then(Value::as_str))
}

pub fn u64_field(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| {
        value
            .get(*key)
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)))
    })
}

fn decoded_len(encoded: &str) -> u64 {
    let trimmed = encoded.trim_end_matches('=');
    (trimmed.len() as u64 * 3) / 4
}

//! Queue-backend process records and their mapping onto [`Job`].
//!
//! The queue handler is free to omit any field, so every field here is
//! optional and the mapping fills neutral defaults instead of failing.

use chrono::{DateTime, NaiveDateTime, Utc};
use lm_core::{Job, JobKind, JobStatus};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueProcess {
    #[serde(default, alias = "process_id", alias = "job_id")]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, alias = "current_step")]
    pub step: Option<u64>,
    #[serde(default)]
    pub total_steps: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default, alias = "elapsed_seconds")]
    pub elapsed: Option<f64>,
    #[serde(default, alias = "eta_seconds")]
    pub eta: Option<f64>,
    #[serde(default, alias = "pod_id")]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub config: Option<Value>,
}

/// Pure mapping, `now` stands in for missing timestamps.
pub fn job_from_queue(process: QueueProcess, now: DateTime<Utc>) -> Job {
    let status = process
        .status
        .as_deref()
        .map(JobStatus::parse_lenient)
        .unwrap_or(JobStatus::Unknown);

    let created_at = process.created_at.as_deref().and_then(parse_timestamp).unwrap_or(now);
    let updated_at = process
        .updated_at
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(now);

    Job {
        id: process.id.unwrap_or_default(),
        kind: process
            .kind
            .as_deref()
            .and_then(JobKind::from_wire)
            .unwrap_or_default(),
        status,
        progress: process.progress.unwrap_or(0.0) as f32,
        current_step: process.step,
        total_steps: process.total_steps,
        created_at,
        updated_at,
        elapsed_seconds: process.elapsed,
        eta_seconds: process.eta,
        compute_unit_id: process.worker_id,
        output_reference: process.output_path,
        error_message: process.error,
        configuration: process.config.unwrap_or(Value::Null),
    }
    .normalized()
}

/// Maps one loosely typed record. Records whose shape cannot be read at
/// all fall back to an all-default process rather than failing.
pub fn job_from_value(value: Value, now: DateTime<Utc>) -> Job {
    let process = serde_json::from_value::<QueueProcess>(value.clone()).unwrap_or_else(|e| {
        warn!("Process record did not match the expected shape ({e}), using defaults");
        QueueProcess {
            id: value
                .get("id")
                .or_else(|| value.get("process_id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            ..QueueProcess::default()
        }
    });
    job_from_queue(process, now)
}

/// Extracts the process list from a `processes` result.
pub fn jobs_from_listing(result: &Value, now: DateTime<Utc>) -> Vec<Job> {
    let records = match result {
        Value::Array(items) => items.clone(),
        other => other
            .get("processes")
            .or_else(|| other.get("jobs"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    };

    records.into_iter().map(|record| job_from_value(record, now)).collect()
}

/// Accepts RFC 3339 and the zone-less ISO form Python's `isoformat()` emits.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

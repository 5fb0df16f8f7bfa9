use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use lm_core::{Artifact, BulkListing, BulkOptions, Job, JobHandle, JobKind, ModelFile};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::api::exchange::{Exchange, Exchanged};
use crate::api::protocol::{JobApi, ProtocolKind, TrainingUpload};
use crate::api::remap;
use crate::api::schemas::{self, ApiEnvelope, HealthReport, SubmissionStatus, UploadReceipt};
use crate::api::transport::{HttpRequest, Method};
use crate::error::ApiError;

/// Which provider route an operation is submitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// `/runsync`, blocks until the handler returns
    Sync,
    /// `/run`, returns a provider handle immediately
    Async,
}

impl Submission {
    fn path(&self) -> &'static str {
        match self {
            Self::Sync => "/runsync",
            Self::Async => "/run",
        }
    }
}

/// Builds the `{input: {type, ...args}}` envelope.
pub fn envelope(operation: &str, args: Value) -> Value {
    let mut input = Map::new();
    input.insert("type".to_string(), Value::String(operation.to_string()));
    if let Value::Object(args) = args {
        input.extend(args);
    }
    json!({ "input": Value::Object(input) })
}

/// Serverless job-queue backend reached through `/runsync` and `/run`.
pub struct QueueProtocol;

impl QueueProtocol {
    fn request(&self, ex: &Exchange, method: Method, path: &str) -> HttpRequest {
        let mut request = HttpRequest::new(method, ex.url(path));
        if let Some(token) = ex.session().provider_token() {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        request
    }

    /// Submits one operation, keeping the exchange so later shape errors
    /// are logged under the same correlation id.
    async fn submit_exchanged(
        &self,
        ex: &Exchange,
        route: Submission,
        operation: &str,
        args: Value,
    ) -> Result<(Exchanged, Value), ApiError> {
        debug!("Submitting {operation} to {}", route.path());
        let request = self
            .request(ex, Method::Post, route.path())
            .json(envelope(operation, args));
        let exchanged = ex.send(request).await?;
        let body = exchanged.json(ex)?;
        let result = schemas::unwrap_queue(body).map_err(|e| ex.fail(&exchanged, e))?;
        Ok((exchanged, result))
    }

    async fn submit(
        &self,
        ex: &Exchange,
        route: Submission,
        operation: &str,
        args: Value,
    ) -> Result<Value, ApiError> {
        self.submit_exchanged(ex, route, operation, args)
            .await
            .map(|(_, result)| result)
    }

    async fn native_health(&self, ex: &Exchange) -> Result<HealthReport, ApiError> {
        let exchanged = ex.send(self.request(ex, Method::Get, "/health")).await?;
        let body = exchanged.json(ex)?;
        Ok(HealthReport::from_value(body, "liveness"))
    }
}

#[async_trait]
impl JobApi for QueueProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Queue
    }

    async fn check_health(&self, ex: &Exchange) -> Result<HealthReport, ApiError> {
        let probe_error = match self.native_health(ex).await {
            Ok(report) => return Ok(report),
            Err(e) => e,
        };

        warn!("Liveness probe failed ({probe_error}), falling back to queued health check");
        match self.submit(ex, Submission::Sync, "health", json!({})).await {
            Ok(result) => Ok(HealthReport::from_value(result, "queue")),
            Err(fallback) => {
                Err(fallback.prefixed(&format!("liveness probe failed: {probe_error}; ")))
            }
        }
    }

    async fn list_jobs(&self, ex: &Exchange) -> Result<Vec<Job>, ApiError> {
        let result = self.submit(ex, Submission::Sync, "processes", json!({})).await?;
        Ok(remap::jobs_from_listing(&result, Utc::now()))
    }

    async fn get_job(&self, ex: &Exchange, id: &str) -> Result<Job, ApiError> {
        let result = self
            .submit(ex, Submission::Sync, "process_status", json!({ "process_id": id }))
            .await?;
        let record = match result {
            Value::Object(mut map) if map.contains_key("process") => {
                map.remove("process").unwrap_or(Value::Null)
            }
            other => other,
        };
        if record.is_null() {
            return Err(ApiError::NotFound(format!("Process {id} not found")));
        }
        let mut job = remap::job_from_value(record, Utc::now());
        if job.id.is_empty() {
            job.id = id.to_string();
        }
        Ok(job)
    }

    async fn start_job(
        &self,
        ex: &Exchange,
        kind: JobKind,
        configuration: &str,
    ) -> Result<ApiEnvelope<JobHandle>, ApiError> {
        let route = if kind.is_long_running() {
            Submission::Async
        } else {
            Submission::Sync
        };
        let (exchanged, result) = self
            .submit_exchanged(ex, route, kind.queue_operation(), json!({ "config": configuration }))
            .await?;

        let message = schemas::str_field(&result, &["message"]).map(str::to_string);
        // `/run` answers with the provider's own handle when the handler has not reported yet
        let process_id = schemas::str_field(&result, &["process_id", "job_id", "id"])
            .ok_or_else(|| {
                ex.fail(
                    &exchanged,
                    ApiError::rejected("The queue accepted the job but returned no process id"),
                )
            })?;

        Ok(ApiEnvelope::ok(
            JobHandle {
                process_id: process_id.to_string(),
            },
            message,
        ))
    }

    async fn cancel_job(&self, ex: &Exchange, id: &str) -> Result<(), ApiError> {
        let result = self
            .submit(ex, Submission::Sync, "cancel", json!({ "process_id": id }))
            .await?;
        match result.get("success").and_then(Value::as_bool) {
            Some(false) => Err(ApiError::from_remote_message(
                schemas::str_field(&result, &["message", "error"])
                    .unwrap_or("The process could not be cancelled"),
            )),
            _ => Ok(()),
        }
    }

    async fn get_artifact(&self, ex: &Exchange, job_id: &str) -> Result<Artifact, ApiError> {
        let (exchanged, result) = self
            .submit_exchanged(ex, Submission::Sync, "download", json!({ "process_id": job_id }))
            .await?;
        schemas::artifact_from_value(&result).ok_or_else(|| {
            ex.fail(
                &exchanged,
                ApiError::rejected(format!(
                    "The queue returned neither a location nor file data for process {job_id}"
                )),
            )
        })
    }

    async fn list_artifacts_bulk(
        &self,
        ex: &Exchange,
        job_ids: &[String],
        options: BulkOptions,
    ) -> Result<BulkListing, ApiError> {
        let result = self
            .submit(
                ex,
                Submission::Sync,
                "bulk_download",
                json!({
                    "process_ids": job_ids,
                    "include_images": options.include_images,
                    "include_loras": options.include_loras,
                }),
            )
            .await?;
        Ok(schemas::bulk_from_value(&result))
    }

    async fn list_models(&self, ex: &Exchange) -> Result<Vec<ModelFile>, ApiError> {
        let result = self.submit(ex, Submission::Sync, "list_models", json!({})).await?;
        Ok(schemas::models_from_value(&result))
    }

    async fn upload_training_data(
        &self,
        ex: &Exchange,
        upload: &TrainingUpload,
    ) -> Result<UploadReceipt, ApiError> {
        let files: Vec<Value> = upload
            .files
            .iter()
            .map(|file| {
                json!({
                    "filename": file.filename,
                    "content": BASE64.encode(&file.bytes),
                    "content_type": file.content_type,
                })
            })
            .collect();

        let result = self
            .submit(
                ex,
                Submission::Async,
                "upload_training_data",
                json!({
                    "training_name": upload.training_name,
                    "trigger_word": upload.trigger_word,
                    "cleanup_existing": upload.cleanup_existing,
                    "files": files,
                }),
            )
            .await?;
        Ok(UploadReceipt::from_value(&result))
    }

    async fn submission_status(
        &self,
        ex: &Exchange,
        handle: &str,
    ) -> Result<SubmissionStatus, ApiError> {
        let exchanged = ex
            .send(self.request(ex, Method::Get, &format!("/status/{handle}")))
            .await?;
        let body = exchanged.json(ex)?;
        Ok(SubmissionStatus::from_value(handle, &body))
    }

    async fn cancel_submission(&self, ex: &Exchange, handle: &str) -> Result<(), ApiError> {
        ex.send(self.request(ex, Method::Post, &format!("/cancel/{handle}")))
            .await
            .map(|_| ())
    }
}

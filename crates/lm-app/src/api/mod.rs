//! Uniform job API over the two backend protocols.
//!
//! The protocol is resolved once from the configured base URL and injected
//! as a [`JobApi`] strategy. Every call goes through the [`Exchange`], which
//! logs the request before it is sent and the response or error before the
//! result is returned.

mod direct;
mod exchange;
mod protocol;
mod queue;
mod remap;
mod schemas;
mod transport;

#[cfg(test)]
pub(crate) mod scripted;

pub use direct::{DirectProtocol, PROVIDER_TOKEN_HEADER};
pub use exchange::{Exchange, Exchanged};
pub use protocol::{JobApi, ProtocolKind, TrainingUpload};
pub use queue::{QueueProtocol, Submission, envelope};
pub use remap::{QueueProcess, job_from_queue, job_from_value, jobs_from_listing};
pub use schemas::{ApiEnvelope, HealthReport, SubmissionStatus, UploadReceipt};
pub use transport::{
    FilePart, HttpRequest, HttpResponse, HttpTransport, Method, RequestBody, ReqwestTransport,
    TransportError,
};

use std::sync::Arc;

use lm_core::{Artifact, BulkListing, BulkOptions, Job, JobHandle, JobKind, ModelFile};
use tracing::info;
use url::Url;

use crate::config::DashboardConfig;
use crate::error::ApiError;
use crate::logger::StructuredLogger;
use crate::session::CredentialSource;

pub struct ApiClient {
    exchange: Exchange,
    protocol: Box<dyn JobApi>,
}

impl ApiClient {
    pub fn new(
        base_url: &Url,
        kind: ProtocolKind,
        transport: Arc<dyn HttpTransport>,
        session: Arc<dyn CredentialSource>,
        logger: Arc<StructuredLogger>,
    ) -> Self {
        let protocol: Box<dyn JobApi> = match kind {
            ProtocolKind::Direct => Box::new(DirectProtocol),
            ProtocolKind::Queue => Box::new(QueueProtocol),
        };
        info!("Using the {kind} protocol for {base_url}");

        Self {
            exchange: Exchange::new(base_url.as_str(), transport, session, logger),
            protocol,
        }
    }

    pub fn from_config(
        config: &DashboardConfig,
        session: Arc<dyn CredentialSource>,
        logger: Arc<StructuredLogger>,
    ) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout)?;
        Ok(Self::new(
            &config.base_url,
            config.protocol,
            Arc::new(transport),
            session,
            logger,
        ))
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.protocol.kind()
    }

    pub fn logger(&self) -> &StructuredLogger {
        self.exchange.logger()
    }

    pub async fn check_health(&self) -> Result<HealthReport, ApiError> {
        self.protocol.check_health(&self.exchange).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>, ApiError> {
        self.protocol.list_jobs(&self.exchange).await
    }

    pub async fn get_job(&self, id: &str) -> Result<Job, ApiError> {
        self.protocol.get_job(&self.exchange, id).await
    }

    pub async fn start_job(
        &self,
        kind: JobKind,
        configuration: &str,
    ) -> Result<ApiEnvelope<JobHandle>, ApiError> {
        self.protocol.start_job(&self.exchange, kind, configuration).await
    }

    pub async fn cancel_job(&self, id: &str) -> Result<(), ApiError> {
        self.protocol.cancel_job(&self.exchange, id).await
    }

    /// Fails with `NotCompleted` without touching the network unless the
    /// job has completed.
    pub async fn get_artifact(&self, job: &Job) -> Result<Artifact, ApiError> {
        if !job.has_artifact() {
            return Err(ApiError::NotCompleted {
                job_id: job.id.clone(),
                status: job.status,
            });
        }
        self.protocol.get_artifact(&self.exchange, &job.id).await
    }

    /// Looks the job up first, then fetches its artifact.
    pub async fn get_artifact_by_id(&self, job_id: &str) -> Result<Artifact, ApiError> {
        let job = self.get_job(job_id).await?;
        self.get_artifact(&job).await
    }

    pub async fn list_artifacts_bulk(
        &self,
        job_ids: &[String],
        options: BulkOptions,
    ) -> Result<BulkListing, ApiError> {
        self.protocol
            .list_artifacts_bulk(&self.exchange, job_ids, options)
            .await
    }

    pub async fn list_models(&self) -> Result<Vec<ModelFile>, ApiError> {
        self.protocol.list_models(&self.exchange).await
    }

    pub async fn upload_training_data(
        &self,
        upload: &TrainingUpload,
    ) -> Result<UploadReceipt, ApiError> {
        if upload.files.is_empty() {
            return Err(ApiError::rejected("Select at least one file to upload"));
        }
        self.protocol.upload_training_data(&self.exchange, upload).await
    }

    pub async fn submission_status(&self, handle: &str) -> Result<SubmissionStatus, ApiError> {
        self.protocol.submission_status(&self.exchange, handle).await
    }

    pub async fn cancel_submission(&self, handle: &str) -> Result<(), ApiError> {
        self.protocol.cancel_submission(&self.exchange, handle).await
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::ScriptedTransport;
    use super::*;
    use crate::logger::LogType;
    use crate::session::Session;
    use lm_core::{BulkSource, InlinePayload, JobStatus, TrainingFile};
    use serde_json::json;

    const DIRECT_BASE: &str = "http://localhost:8000";
    const QUEUE_BASE: &str = "https://api.runpod.ai/v2/ep-1";

    struct Harness {
        client: ApiClient,
        transport: Arc<ScriptedTransport>,
        logger: Arc<StructuredLogger>,
    }

    fn harness(base: &str, session: Session, transport: ScriptedTransport) -> Harness {
        let url = Url::parse(base).unwrap();
        let transport = Arc::new(transport);
        let logger = Arc::new(StructuredLogger::in_memory());
        let client = ApiClient::new(
            &url,
            ProtocolKind::detect(&url),
            transport.clone(),
            Arc::new(session),
            logger.clone(),
        );
        Harness {
            client,
            transport,
            logger,
        }
    }

    fn tokens() -> Session {
        Session::new(Some("bearer-1".into()), Some("rp-secret".into()))
    }

    #[tokio::test]
    async fn test_queue_training_start_is_wrapped_and_unwrapped() {
        let h = harness(
            QUEUE_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Post,
                "/runsync",
                200,
                json!({
                    "id": "sync-1",
                    "status": "COMPLETED",
                    "output": { "process_id": "abc123" }
                }),
            ),
        );
        let configuration = "job: extension\nconfig:\n  name: demo";

        let result = h.client.start_job(JobKind::Training, configuration).await.unwrap();

        assert_eq!(
            result,
            ApiEnvelope::ok(JobHandle { process_id: "abc123".into() }, None)
        );
        assert_eq!(
            serde_json::to_value(&result).unwrap()["data"],
            json!({ "process_id": "abc123" })
        );

        let requests = h.transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, format!("{QUEUE_BASE}/runsync"));
        assert_eq!(
            requests[0].body,
            RequestBody::Json(json!({
                "input": { "type": "train_with_yaml", "config": configuration }
            }))
        );
    }

    #[tokio::test]
    async fn test_queue_generation_goes_through_async_route() {
        let h = harness(
            QUEUE_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Post,
                "/run",
                200,
                json!({ "id": "rp-handle-9", "status": "IN_QUEUE" }),
            ),
        );

        let result = h.client.start_job(JobKind::Generation, "prompt: a cat").await.unwrap();

        assert_eq!(result.data.unwrap().process_id, "rp-handle-9");
        assert!(h.transport.requests()[0].url.ends_with("/run"));
    }

    #[tokio::test]
    async fn test_direct_artifact_url_is_a_reference() {
        let h = harness(
            DIRECT_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Get,
                "/artifacts/job-1",
                200,
                json!({ "success": true, "data": { "url": "https://x/y.zip" } }),
            ),
        );
        let job = Job::new("job-1", JobKind::Training, JobStatus::Completed);

        let artifact = h.client.get_artifact(&job).await.unwrap();

        assert_eq!(
            artifact,
            Artifact::Reference {
                location: "https://x/y.zip".into()
            }
        );
    }

    #[tokio::test]
    async fn test_queue_artifact_inline_payload() {
        let h = harness(
            QUEUE_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Post,
                "/runsync",
                200,
                json!({ "output": {
                    "type": "file_data",
                    "filename": "m.safetensors",
                    "data": "AAECAw==",
                    "size": 4,
                    "content_type": "application/octet-stream"
                } }),
            ),
        );
        let job = Job::new("p1", JobKind::Training, JobStatus::Completed);

        let artifact = h.client.get_artifact(&job).await.unwrap();

        assert_eq!(
            artifact,
            Artifact::Inline(InlinePayload {
                filename: "m.safetensors".into(),
                encoded_content: "AAECAw==".into(),
                content_type: Some("application/octet-stream".into()),
                byte_size: 4,
            })
        );
        assert_eq!(
            h.transport.requests()[0].body,
            RequestBody::Json(json!({ "input": { "type": "download", "process_id": "p1" } }))
        );
    }

    #[tokio::test]
    async fn test_artifact_on_unfinished_job_never_calls_out() {
        let h = harness(DIRECT_BASE, tokens(), ScriptedTransport::new());

        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Unknown,
        ] {
            let job = Job::new("job-2", JobKind::Training, status);
            let err = h.client.get_artifact(&job).await.unwrap_err();
            assert_eq!(
                err,
                ApiError::NotCompleted {
                    job_id: "job-2".into(),
                    status
                }
            );
        }

        assert!(h.transport.requests().is_empty());
        assert!(h.logger.is_empty());
    }

    #[tokio::test]
    async fn test_queue_status_without_fields_defaults_to_unknown() {
        let h = harness(
            QUEUE_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Post,
                "/runsync",
                200,
                json!({ "output": { "process": { "id": "p7" } } }),
            ),
        );

        let job = h.client.get_job("p7").await.unwrap();

        assert_eq!(job.id, "p7");
        assert_eq!(job.status, JobStatus::Unknown);
        assert_eq!(
            h.transport.requests()[0].body,
            RequestBody::Json(json!({ "input": { "type": "process_status", "process_id": "p7" } }))
        );
    }

    #[tokio::test]
    async fn test_queue_listing_is_remapped() {
        let h = harness(
            QUEUE_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Post,
                "/runsync",
                200,
                json!({ "output": { "processes": [
                    { "id": "a", "type": "training", "status": "running", "progress": 12.0 },
                    { "id": "b", "status": "completed", "output_path": "/out/b.safetensors" }
                ] } }),
            ),
        );

        let jobs = h.client.list_jobs().await.unwrap();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].status, JobStatus::Running);
        assert_eq!(jobs[1].output_reference.as_deref(), Some("/out/b.safetensors"));
    }

    #[tokio::test]
    async fn test_queue_health_falls_back_to_envelope() {
        let h = harness(
            QUEUE_BASE,
            tokens(),
            ScriptedTransport::new()
                .fail(Method::Get, "/health", TransportError::Timeout)
                .reply(
                    Method::Post,
                    "/runsync",
                    200,
                    json!({ "output": { "status": "healthy", "message": "handler up" } }),
                ),
        );

        let report = h.client.check_health().await.unwrap();

        assert_eq!(report.source, "queue");
        assert_eq!(report.status, "healthy");
        let requests = h.transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(
            requests[1].body,
            RequestBody::Json(json!({ "input": { "type": "health" } }))
        );
    }

    #[tokio::test]
    async fn test_queue_health_reports_one_error_when_both_probes_fail() {
        let h = harness(
            QUEUE_BASE,
            tokens(),
            ScriptedTransport::new()
                .reply(Method::Get, "/health", 503, json!({ "message": "no workers" }))
                .fail(
                    Method::Post,
                    "/runsync",
                    TransportError::Connect("refused".into()),
                ),
        );

        let err = h.client.check_health().await.unwrap_err();

        assert!(err.is_retryable());
        let text = err.to_string();
        assert!(text.contains("liveness probe failed"), "{text}");
        assert!(text.contains("no workers"), "{text}");
        assert!(text.contains("refused"), "{text}");
    }

    #[tokio::test]
    async fn test_direct_health_does_not_fall_back() {
        let h = harness(
            DIRECT_BASE,
            tokens(),
            ScriptedTransport::new().fail(Method::Get, "/health", TransportError::Timeout),
        );

        assert!(matches!(
            h.client.check_health().await,
            Err(ApiError::NetworkFailure(_))
        ));
        assert_eq!(h.transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_direct_auth_headers_are_additive() {
        let h = harness(
            DIRECT_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Get,
                "/jobs",
                200,
                json!({ "success": true, "data": [] }),
            ),
        );

        h.client.list_jobs().await.unwrap();

        let request = &h.transport.requests()[0];
        assert_eq!(request.header_value("authorization"), Some("Bearer bearer-1"));
        assert_eq!(request.header_value(PROVIDER_TOKEN_HEADER), Some("rp-secret"));
    }

    #[tokio::test]
    async fn test_queue_auth_uses_provider_token() {
        let h = harness(
            QUEUE_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Post,
                "/runsync",
                200,
                json!({ "processes": [] }),
            ),
        );

        h.client.list_jobs().await.unwrap();

        let request = &h.transport.requests()[0];
        assert_eq!(request.header_value("Authorization"), Some("Bearer rp-secret"));
        assert_eq!(request.header_value(PROVIDER_TOKEN_HEADER), None);
    }

    #[tokio::test]
    async fn test_missing_tokens_omit_headers() {
        let h = harness(
            DIRECT_BASE,
            Session::new(Some(String::new()), None),
            ScriptedTransport::new().reply(Method::Get, "/jobs", 200, json!([])),
        );

        h.client.list_jobs().await.unwrap();

        assert!(h.transport.requests()[0].headers.is_empty());
    }

    #[tokio::test]
    async fn test_http_errors_map_to_taxonomy() {
        let h = harness(
            DIRECT_BASE,
            tokens(),
            ScriptedTransport::new()
                .reply(Method::Get, "/jobs/gone", 404, json!({ "message": "Job gone not found" }))
                .reply(Method::Delete, "/jobs/j1", 401, json!({ "detail": "bad token" }))
                .reply(Method::Post, "/train", 500, json!({ "message": "Invalid YAML" }))
                .fail(Method::Get, "/jobs", TransportError::Timeout),
        );

        assert_eq!(
            h.client.get_job("gone").await.unwrap_err(),
            ApiError::NotFound("Job gone not found".into())
        );
        assert_eq!(
            h.client.cancel_job("j1").await.unwrap_err(),
            ApiError::Unauthorized("bad token".into())
        );
        assert_eq!(
            h.client.start_job(JobKind::Training, "x").await.unwrap_err(),
            ApiError::RemoteRejected {
                status: Some(500),
                message: "Invalid YAML".into()
            }
        );
        let err = h.client.list_jobs().await.unwrap_err();
        assert!(matches!(err, ApiError::NetworkFailure(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_queue_reported_error_is_translated() {
        let h = harness(
            QUEUE_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Post,
                "/runsync",
                200,
                json!({ "output": { "status": "error", "error": "Process p9 not found" } }),
            ),
        );

        let err = h.client.get_job("p9").await.unwrap_err();

        assert_eq!(err, ApiError::NotFound("Process p9 not found".into()));
        let errors: Vec<_> = h
            .logger
            .entries()
            .into_iter()
            .filter(|e| e.entry_type == LogType::Error)
            .collect();
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn test_request_is_logged_before_response() {
        let h = harness(
            DIRECT_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Post,
                "/generate",
                200,
                json!({ "success": true, "data": { "process_id": "g1" }, "message": "queued" }),
            ),
        );

        let result = h.client.start_job(JobKind::Generation, "api_key: hunter2").await.unwrap();
        assert_eq!(result.message.as_deref(), Some("queued"));

        let entries = h.logger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_type, LogType::Request);
        assert_eq!(entries[0].method, "POST");
        assert_eq!(entries[1].entry_type, LogType::Response);
        assert_eq!(entries[1].status_code, Some(200));
        assert_eq!(entries[0].correlation_id, entries[1].correlation_id);
        assert_eq!(h.logger.by_correlation_id(&entries[0].correlation_id).len(), 2);
    }

    #[tokio::test]
    async fn test_bulk_listing_on_both_protocols() {
        let ids = vec!["a".to_string(), "b".to_string()];

        let direct = harness(
            DIRECT_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Post,
                "/artifacts/bulk",
                200,
                json!({ "success": true, "data": { "files": [
                    { "filename": "a.png", "size": 3, "type": "image", "url": "https://x/a.png" }
                ] } }),
            ),
        );
        let listing = direct
            .client
            .list_artifacts_bulk(&ids, BulkOptions::default())
            .await
            .unwrap();
        assert_eq!(listing.total_count, 1);
        assert_eq!(
            direct.transport.requests()[0].body,
            RequestBody::Json(json!({
                "job_ids": ["a", "b"],
                "include_images": true,
                "include_loras": true
            }))
        );

        let queue = harness(
            QUEUE_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Post,
                "/runsync",
                200,
                json!({ "output": { "download_items": [
                    { "filename": "a.png", "size": 3, "type": "image", "content": "AAAA" },
                    { "filename": "a.png", "size": 3, "type": "image", "content": "AAAA" }
                ] } }),
            ),
        );
        let listing = queue
            .client
            .list_artifacts_bulk(
                &ids,
                BulkOptions {
                    include_images: true,
                    include_loras: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(listing.items.len(), 2);
        assert_eq!(listing.items[0].source, BulkSource::Encoded("AAAA".into()));
        assert_eq!(
            queue.transport.requests()[0].body,
            RequestBody::Json(json!({ "input": {
                "type": "bulk_download",
                "process_ids": ["a", "b"],
                "include_images": true,
                "include_loras": false
            } }))
        );
    }

    #[tokio::test]
    async fn test_queue_upload_encodes_files() {
        let h = harness(
            QUEUE_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Post,
                "/run",
                200,
                json!({ "output": {
                    "training_folder": "/workspace/training_data/matt",
                    "uploaded_files": ["1.png"]
                } }),
            ),
        );
        let upload = TrainingUpload {
            training_name: "matt".into(),
            trigger_word: "mattstyle".into(),
            cleanup_existing: true,
            files: vec![TrainingFile {
                filename: "1.png".into(),
                content_type: "image/png".into(),
                bytes: b"hi".to_vec(),
            }],
        };

        let receipt = h.client.upload_training_data(&upload).await.unwrap();

        assert_eq!(receipt.uploaded_files, 1);
        match &h.transport.requests()[0].body {
            RequestBody::Json(body) => {
                assert_eq!(body["input"]["type"], "upload_training_data");
                assert_eq!(body["input"]["files"][0]["content"], "aGk=");
            }
            other => panic!("expected JSON body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_queue_upload_bytes_stay_out_of_the_log() {
        let h = harness(
            QUEUE_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Post,
                "/run",
                200,
                json!({ "output": { "uploaded_files": ["big.png"] } }),
            ),
        );
        let upload = TrainingUpload {
            training_name: "matt".into(),
            trigger_word: "mattstyle".into(),
            cleanup_existing: false,
            files: vec![TrainingFile {
                filename: "big.png".into(),
                content_type: "image/png".into(),
                bytes: vec![7u8; 3 * 1024 * 1024],
            }],
        };

        h.client.upload_training_data(&upload).await.unwrap();

        let request = h
            .logger
            .entries()
            .into_iter()
            .find(|e| e.entry_type == LogType::Request)
            .unwrap();
        let content = request.payload["input"]["files"][0]["content"].as_str().unwrap();
        assert!(content.ends_with("bytes elided>"), "{content}");
        assert_eq!(request.payload["input"]["files"][0]["filename"], "big.png");
        assert!(h.logger.to_text().len() < 64 * 1024);
    }

    #[tokio::test]
    async fn test_direct_upload_is_multipart() {
        let h = harness(
            DIRECT_BASE,
            tokens(),
            ScriptedTransport::new().reply(
                Method::Post,
                "/upload/training-data",
                200,
                json!({ "success": true, "data": { "uploaded_files": 1 }, "message": "ok" }),
            ),
        );
        let upload = TrainingUpload {
            training_name: "matt".into(),
            trigger_word: String::new(),
            cleanup_existing: false,
            files: vec![TrainingFile {
                filename: "1.txt".into(),
                content_type: "text/plain".into(),
                bytes: b"caption".to_vec(),
            }],
        };

        let receipt = h.client.upload_training_data(&upload).await.unwrap();

        assert_eq!(receipt.message.as_deref(), Some("ok"));
        assert!(matches!(
            h.transport.requests()[0].body,
            RequestBody::Multipart { ref files, .. } if files.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_submission_passthroughs() {
        let queue = harness(
            QUEUE_BASE,
            tokens(),
            ScriptedTransport::new()
                .reply(
                    Method::Get,
                    "/status/rp-1",
                    200,
                    json!({ "id": "rp-1", "status": "IN_PROGRESS" }),
                )
                .reply(
                    Method::Post,
                    "/cancel/rp-1",
                    200,
                    json!({ "id": "rp-1", "status": "CANCELLED" }),
                ),
        );
        let status = queue.client.submission_status("rp-1").await.unwrap();
        assert_eq!(status.status, JobStatus::Running);
        queue.client.cancel_submission("rp-1").await.unwrap();

        let direct = harness(DIRECT_BASE, tokens(), ScriptedTransport::new());
        assert!(matches!(
            direct.client.submission_status("rp-1").await,
            Err(ApiError::RemoteRejected { .. })
        ));
        assert!(direct.transport.requests().is_empty());
    }
}

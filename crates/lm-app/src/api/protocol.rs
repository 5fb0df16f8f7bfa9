use std::fmt;

use async_trait::async_trait;
use lm_core::{
    Artifact, BulkListing, BulkOptions, Job, JobHandle, JobKind, ModelFile, TrainingFile,
};
use url::Url;

use crate::api::exchange::Exchange;
use crate::api::schemas::{ApiEnvelope, HealthReport, SubmissionStatus, UploadReceipt};
use crate::error::ApiError;

/// Host suffixes of the serverless job-queue provider
const QUEUE_HOST_SUFFIXES: [&str; 2] = ["runpod.ai", "runpod.io"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    /// Verb-per-resource REST backend
    Direct,
    /// Serverless job queue; everything is an `{input: {type, ...}}` envelope
    Queue,
}

impl ProtocolKind {
    /// Decided once from configuration, never per call.
    pub fn detect(base: &Url) -> Self {
        let is_queue_host = base.host_str().is_some_and(|host| {
            let host = host.to_ascii_lowercase();
            QUEUE_HOST_SUFFIXES
                .iter()
                .any(|suffix| host == *suffix || host.ends_with(&format!(".{suffix}")))
        });

        if is_queue_host { Self::Queue } else { Self::Direct }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Direct => "direct",
            Self::Queue => "queue",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments for a training-data upload
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingUpload {
    pub training_name: String,
    pub trigger_word: String,
    pub cleanup_existing: bool,
    pub files: Vec<TrainingFile>,
}

/// One wire protocol. Implementations build the requests, run them through
/// the [`Exchange`] and normalize what comes back.
#[async_trait]
pub trait JobApi: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    async fn check_health(&self, ex: &Exchange) -> Result<HealthReport, ApiError>;

    async fn list_jobs(&self, ex: &Exchange) -> Result<Vec<Job>, ApiError>;

    async fn get_job(&self, ex: &Exchange, id: &str) -> Result<Job, ApiError>;

    async fn start_job(
        &self,
        ex: &Exchange,
        kind: JobKind,
        configuration: &str,
    ) -> Result<ApiEnvelope<JobHandle>, ApiError>;

    async fn cancel_job(&self, ex: &Exchange, id: &str) -> Result<(), ApiError>;

    /// Callers check the job has completed before this runs
    async fn get_artifact(&self, ex: &Exchange, job_id: &str) -> Result<Artifact, ApiError>;

    async fn list_artifacts_bulk(
        &self,
        ex: &Exchange,
        job_ids: &[String],
        options: BulkOptions,
    ) -> Result<BulkListing, ApiError>;

    async fn list_models(&self, ex: &Exchange) -> Result<Vec<ModelFile>, ApiError>;

    async fn upload_training_data(
        &self,
        ex: &Exchange,
        upload: &TrainingUpload,
    ) -> Result<UploadReceipt, ApiError>;

    async fn submission_status(
        &self,
        _ex: &Exchange,
        _handle: &str,
    ) -> Result<SubmissionStatus, ApiError> {
        Err(ApiError::rejected(
            "Submission handles are only issued by the job-queue backend",
        ))
    }

    async fn cancel_submission(&self, _ex: &Exchange, _handle: &str) -> Result<(), ApiError> {
        Err(ApiError::rejected(
            "Submission handles are only issued by the job-queue backend",
        ))
    }
}

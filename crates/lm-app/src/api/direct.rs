use async_trait::async_trait;
use chrono::Utc;
use lm_core::{Artifact, BulkListing, BulkOptions, Job, JobHandle, JobKind, ModelFile};
use serde_json::{Value, json};

use crate::api::exchange::Exchange;
use crate::api::protocol::{JobApi, ProtocolKind, TrainingUpload};
use crate::api::remap;
use crate::api::schemas::{self, ApiEnvelope, HealthReport, UploadReceipt};
use crate::api::transport::{FilePart, HttpRequest, Method, RequestBody};
use crate::error::ApiError;

/// Header carrying the provider token alongside the bearer credential
pub const PROVIDER_TOKEN_HEADER: &str = "X-Provider-Token";

/// Conventional REST backend answering with `{success, data, message}`.
pub struct DirectProtocol;

impl DirectProtocol {
    fn request(&self, ex: &Exchange, method: Method, path: &str) -> HttpRequest {
        let mut request = HttpRequest::new(method, ex.url(path));
        let session = ex.session();
        if let Some(token) = session.bearer_token() {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(token) = session.provider_token() {
            request = request.header(PROVIDER_TOKEN_HEADER, token);
        }
        request
    }

    /// Sends and unwraps the envelope, returning `data` and `message`.
    async fn call(
        &self,
        ex: &Exchange,
        request: HttpRequest,
    ) -> Result<(Value, Option<String>), ApiError> {
        let exchanged = ex.send(request).await?;
        let body = exchanged.json(ex)?;
        let message = schemas::str_field(&body, &["message"]).map(str::to_string);
        let data = schemas::unwrap_direct(body).map_err(|e| ex.fail(&exchanged, e))?;
        Ok((data, message))
    }
}

/// Direct bodies already carry the canonical job shape. Records that do not
/// (older backends report `type`/`status` loosely) go through the remap.
fn canonical_job(record: Value) -> Job {
    match serde_json::from_value::<Job>(record.clone()) {
        Ok(job) => job.normalized(),
        Err(_) => remap::job_from_value(record, Utc::now()),
    }
}

#[async_trait]
impl JobApi for DirectProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Direct
    }

    async fn check_health(&self, ex: &Exchange) -> Result<HealthReport, ApiError> {
        let (data, _) = self.call(ex, self.request(ex, Method::Get, "/health")).await?;
        Ok(HealthReport::from_value(data, "health"))
    }

    async fn list_jobs(&self, ex: &Exchange) -> Result<Vec<Job>, ApiError> {
        let (data, _) = self.call(ex, self.request(ex, Method::Get, "/jobs")).await?;
        let records = match data {
            Value::Array(items) => items,
            other => other
                .get("jobs")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        };
        Ok(records.into_iter().map(canonical_job).collect())
    }

    async fn get_job(&self, ex: &Exchange, id: &str) -> Result<Job, ApiError> {
        let (data, _) = self
            .call(ex, self.request(ex, Method::Get, &format!("/jobs/{id}")))
            .await?;
        if data.is_null() {
            return Err(ApiError::NotFound(format!("Job {id} was not found")));
        }
        let record = data.get("job").cloned().unwrap_or(data);
        Ok(canonical_job(record))
    }

    async fn start_job(
        &self,
        ex: &Exchange,
        kind: JobKind,
        configuration: &str,
    ) -> Result<ApiEnvelope<JobHandle>, ApiError> {
        let request = self
            .request(ex, Method::Post, kind.direct_path())
            .json(json!({ "config": configuration }));
        let exchanged = ex.send(request).await?;
        let body = exchanged.json(ex)?;
        let message = schemas::str_field(&body, &["message"]).map(str::to_string);
        let data = schemas::unwrap_direct(body).map_err(|e| ex.fail(&exchanged, e))?;

        match serde_json::from_value::<JobHandle>(data) {
            Ok(handle) => Ok(ApiEnvelope::ok(handle, message)),
            Err(_) => Err(ex.fail(
                &exchanged,
                ApiError::rejected("The backend accepted the job but returned no process id"),
            )),
        }
    }

    async fn cancel_job(&self, ex: &Exchange, id: &str) -> Result<(), ApiError> {
        self.call(ex, self.request(ex, Method::Delete, &format!("/jobs/{id}")))
            .await
            .map(|_| ())
    }

    async fn get_artifact(&self, ex: &Exchange, job_id: &str) -> Result<Artifact, ApiError> {
        let request = self.request(ex, Method::Get, &format!("/artifacts/{job_id}"));
        let exchanged = ex.send(request).await?;
        let body = exchanged.json(ex)?;
        let data = schemas::unwrap_direct(body).map_err(|e| ex.fail(&exchanged, e))?;

        schemas::artifact_from_value(&data).ok_or_else(|| {
            ex.fail(
                &exchanged,
                ApiError::rejected(format!(
                    "The backend returned neither a location nor file data for job {job_id}"
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
        let request = self.request(ex, Method::Post, "/artifacts/bulk").json(json!({
            "job_ids": job_ids,
            "include_images": options.include_images,
            "include_loras": options.include_loras,
        }));
        let (data, _) = self.call(ex, request).await?;
        Ok(schemas::bulk_from_value(&data))
    }

    async fn list_models(&self, ex: &Exchange) -> Result<Vec<ModelFile>, ApiError> {
        let (data, _) = self.call(ex, self.request(ex, Method::Get, "/models")).await?;
        Ok(schemas::models_from_value(&data))
    }

    async fn upload_training_data(
        &self,
        ex: &Exchange,
        upload: &TrainingUpload,
    ) -> Result<UploadReceipt, ApiError> {
        let mut request = self.request(ex, Method::Post, "/upload/training-data");
        request.body = RequestBody::Multipart {
            fields: vec![
                ("training_name".to_string(), upload.training_name.clone()),
                ("trigger_word".to_string(), upload.trigger_word.clone()),
                ("cleanup_existing".to_string(), upload.cleanup_existing.to_string()),
            ],
            files: upload
                .files
                .iter()
                .map(|file| FilePart {
                    field: "files".to_string(),
                    filename: file.filename.clone(),
                    content_type: file.content_type.clone(),
                    bytes: file.bytes.clone(),
                })
                .collect(),
        };

        let (data, message) = self.call(ex, request).await?;
        let mut receipt = UploadReceipt::from_value(&data);
        if receipt.message.is_none() {
            receipt.message = message;
        }
        Ok(receipt)
    }
}

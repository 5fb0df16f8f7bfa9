use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};

use crate::api::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::ApiError;
use crate::logger::StructuredLogger;
use crate::session::CredentialSource;

/// Longest string kept verbatim in a logged request or response body.
/// Inline artifacts and queued uploads can be hundreds of megabytes of base64.
const MAX_LOGGED_STRING: usize = 2048;

/// A response paired with the correlation id it was logged under
pub struct Exchanged {
    pub correlation_id: String,
    pub endpoint: String,
    pub response: HttpResponse,
}

impl Exchanged {
    /// Parses the body as JSON, logging the failure under the same id.
    pub fn json(&self, exchange: &Exchange) -> Result<Value, ApiError> {
        if self.response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.response.body).map_err(|e| {
            exchange.fail(
                self,
                ApiError::rejected(format!("The backend sent a malformed response: {e}")),
            )
        })
    }
}

/// Performs logged round-trips: REQUEST is recorded before the call goes
/// out and RESPONSE/ERROR before the result is handed back.
pub struct Exchange {
    base: String,
    transport: Arc<dyn HttpTransport>,
    session: Arc<dyn CredentialSource>,
    logger: Arc<StructuredLogger>,
}

impl Exchange {
    pub fn new(
        base: &str,
        transport: Arc<dyn HttpTransport>,
        session: Arc<dyn CredentialSource>,
        logger: Arc<StructuredLogger>,
    ) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            transport,
            session,
            logger,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    pub fn session(&self) -> &dyn CredentialSource {
        self.session.as_ref()
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub async fn send(&self, request: HttpRequest) -> Result<Exchanged, ApiError> {
        let endpoint = request.url.clone();
        let correlation_id = self.logger.log_request(
            &endpoint,
            request.method.as_str(),
            &compact(request.body.log_view()),
        );
        let started = Instant::now();

        let result = self.transport.send(request).await;
        let elapsed = started.elapsed().as_millis() as u64;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.logger
                    .log_error_timed(&correlation_id, &endpoint, &e, None, Some(elapsed));
                return Err(ApiError::NetworkFailure(e.to_string()));
            }
        };

        if !response.is_success() {
            let err = ApiError::from_status(response.status, &response.body);
            self.logger.log_error_timed(
                &correlation_id,
                &endpoint,
                &err,
                Some(json!({
                    "status_code": response.status,
                    "body": compact(body_value(&response.body)),
                })),
                Some(elapsed),
            );
            return Err(err);
        }

        self.logger.log_response(
            &correlation_id,
            &endpoint,
            &compact(body_value(&response.body)),
            Some(response.status),
            Some(elapsed),
        );

        Ok(Exchanged {
            correlation_id,
            endpoint,
            response,
        })
    }

    /// Logs a failure discovered after the transport succeeded and returns it.
    pub fn fail(&self, exchanged: &Exchanged, err: ApiError) -> ApiError {
        self.logger
            .log_error(&exchanged.correlation_id, &exchanged.endpoint, &err, None);
        err
    }
}

fn body_value(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

/// Shortens long strings so big payloads stay out of the log
fn compact(value: Value) -> Value {
    match value {
        Value::String(s) if s.len() > MAX_LOGGED_STRING => {
            Value::String(format!("<{} bytes elided>", s.len()))
        }
        Value::Array(items) => Value::Array(items.into_iter().map(compact).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, compact(v))).collect())
        }
        other => other,
    }
}

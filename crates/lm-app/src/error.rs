use lm_core::JobStatus;
use serde_json::Value;
use thiserror::Error;

const GENERIC_FAILURE: &str = "The backend could not complete the request.";
const MAX_REMOTE_MESSAGE: usize = 300;

/// Failures surfaced by the API client.
///
/// `NetworkFailure` is the only retryable variant. `NotCompleted` is a
/// precondition failure: the caller should keep the action disabled until
/// the job has completed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("rejected by backend: {message}")]
    RemoteRejected {
        status: Option<u16>,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("job {job_id} is {status}, artifacts are only available once it has completed")]
    NotCompleted { job_id: String, status: JobStatus },

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl ApiError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::RemoteRejected {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkFailure(_))
    }

    /// Text for a user-facing notification. Never includes correlation ids.
    pub fn user_message(&self) -> String {
        match self {
            Self::NetworkFailure(_) => {
                "Could not reach the backend. Check the connection and try again.".to_string()
            }
            Self::RemoteRejected { message, .. } if !message.trim().is_empty() => message.clone(),
            Self::RemoteRejected { .. } => GENERIC_FAILURE.to_string(),
            Self::NotFound(message) => message.clone(),
            Self::NotCompleted { .. } => {
                "Artifacts become available once the job has completed.".to_string()
            }
            Self::Unauthorized(message) => message.clone(),
        }
    }

    /// Prepends context to the message while keeping the variant.
    pub fn prefixed(self, prefix: &str) -> Self {
        match self {
            Self::NetworkFailure(msg) => Self::NetworkFailure(format!("{prefix}{msg}")),
            Self::RemoteRejected { status, message } => Self::RemoteRejected {
                status,
                message: format!("{prefix}{message}"),
            },
            Self::NotFound(msg) => Self::NotFound(format!("{prefix}{msg}")),
            Self::Unauthorized(msg) => Self::Unauthorized(format!("{prefix}{msg}")),
            not_completed @ Self::NotCompleted { .. } => not_completed,
        }
    }

    /// Translates a non-2xx HTTP response into the taxonomy.
    pub fn from_status(status: u16, body: &str) -> Self {
        let remote = remote_message(body);
        match status {
            401 | 403 => Self::Unauthorized(
                remote.unwrap_or_else(|| "The backend rejected the supplied credentials.".into()),
            ),
            404 => Self::NotFound(
                remote.unwrap_or_else(|| "The requested resource does not exist.".into()),
            ),
            _ => Self::RemoteRejected {
                status: Some(status),
                message: remote.unwrap_or_else(|| format!("{GENERIC_FAILURE} (HTTP {status})")),
            },
        }
    }

    /// Translates an `{error: ...}` reported inside a successful response.
    pub fn from_remote_message(message: &str) -> Self {
        let message = truncate(message.trim());
        if message.to_ascii_lowercase().contains("not found") {
            Self::NotFound(message)
        } else {
            Self::rejected(message)
        }
    }
}

/// Picks `message`, then `error`, then `detail` out of a JSON error body,
/// falling back to the raw text.
pub fn remote_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return ["message", "error", "detail"]
            .iter()
            .find_map(|key| value.get(key).and_then(Value::as_str))
            .filter(|msg| !msg.trim().is_empty())
            .map(|msg| truncate(msg.trim()));
    }

    Some(truncate(trimmed))
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_REMOTE_MESSAGE {
        return message.to_string();
    }
    let mut cut: String = message.chars().take(MAX_REMOTE_MESSAGE).collect();
    cut.push('…');
    cut
}

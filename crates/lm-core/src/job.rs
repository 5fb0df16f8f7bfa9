use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of remote work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Training,
    Generation,
}

impl JobKind {
    /// Name for display
    pub fn name(&self) -> &str {
        match self {
            Self::Training => "LoRA training",
            Self::Generation => "Image generation",
        }
    }

    /// Route on the direct backend that starts this kind of job
    pub fn direct_path(&self) -> &str {
        match self {
            Self::Training => "/train",
            Self::Generation => "/generate",
        }
    }

    /// Operation type inside a queue envelope
    pub fn queue_operation(&self) -> &str {
        match self {
            Self::Training => "train_with_yaml",
            Self::Generation => "generate",
        }
    }

    /// Whether the queue backend may take long enough that the
    /// asynchronous submission route is needed.
    pub fn is_long_running(&self) -> bool {
        matches!(self, Self::Generation)
    }

    /// Accepts the spellings both backends use for a process type.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "training" | "train" | "train_yaml" | "train_with_yaml" | "lora_training" => {
                Some(Self::Training)
            }
            "generation" | "generate" | "inference" => Some(Self::Generation),
            _ => None,
        }
    }

    pub fn all() -> [JobKind; 2] {
        [Self::Training, Self::Generation]
    }
}

impl Default for JobKind {
    fn default() -> Self {
        Self::Training
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    pub fn icon(&self) -> &str {
        match self {
            Self::Pending => "⏳",
            Self::Running => "⚡",
            Self::Completed => "✅",
            Self::Failed => "❌",
            Self::Cancelled => "🚫",
            Self::Unknown => "❔",
        }
    }

    /// Maps provider states (`IN_QUEUE`, `IN_PROGRESS`, ...) and backend
    /// states (`pending`, `training`, ...) onto the canonical lifecycle.
    /// Anything unrecognised becomes `Unknown`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" | "in_queue" | "starting" => Self::Pending,
            "running" | "in_progress" | "training" | "processing" | "generating" => Self::Running,
            "completed" | "complete" | "success" | "succeeded" | "done" => Self::Completed,
            "failed" | "error" | "timed_out" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A unit of remote work as the dashboard sees it.
///
/// Jobs are never persisted by the client; every listing replaces the
/// previous view. Use [`Job::normalized`] on anything built from wire data
/// so the lifecycle invariants hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(default, alias = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub current_step: Option<u64>,
    #[serde(default)]
    pub total_steps: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
    #[serde(default)]
    pub eta_seconds: Option<f64>,
    #[serde(default)]
    pub compute_unit_id: Option<String>,
    #[serde(default)]
    pub output_reference: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub configuration: Value,
}

impl Job {
    pub fn new(id: impl Into<String>, kind: JobKind, status: JobStatus) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            status,
            progress: 0.0,
            current_step: None,
            total_steps: None,
            created_at: now,
            updated_at: now,
            elapsed_seconds: None,
            eta_seconds: None,
            compute_unit_id: None,
            output_reference: None,
            error_message: None,
            configuration: Value::Null,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Artifacts can only be fetched from completed jobs
    pub fn has_artifact(&self) -> bool {
        self.status == JobStatus::Completed
    }

    /// Enforces the lifecycle invariants on a job built from remote data.
    pub fn normalized(mut self) -> Self {
        self.progress = if self.progress.is_finite() {
            self.progress.clamp(0.0, 100.0)
        } else {
            0.0
        };

        if let (Some(current), Some(total)) = (self.current_step, self.total_steps) {
            if current > total {
                self.current_step = Some(total);
            }
        }

        if self.updated_at < self.created_at {
            self.updated_at = self.created_at;
        }

        self.elapsed_seconds = self.elapsed_seconds.filter(|s| s.is_finite() && *s >= 0.0);
        self.eta_seconds = self
            .eta_seconds
            .filter(|s| s.is_finite() && *s >= 0.0 && self.status == JobStatus::Running);

        if self.status.is_terminal() {
            self.compute_unit_id = None;
        }
        if self.status != JobStatus::Completed {
            self.output_reference = None;
        }
        if self.status != JobStatus::Failed {
            self.error_message = None;
        }
        if self.status == JobStatus::Completed {
            self.progress = 100.0;
        }

        self
    }
}

/// Identifier returned when a job is started
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    #[serde(alias = "id", alias = "job_id")]
    pub process_id: String,
}

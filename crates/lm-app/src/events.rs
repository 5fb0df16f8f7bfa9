use lm_core::Job;

use crate::delivery::DeliveryOutcome;

/// What the dashboard tells its front end.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    /// The board was replaced by a fresh listing
    JobsRefreshed(Vec<Job>),
    /// One human-readable message per failure
    Notification(String),
    DeliveryFinished {
        job_id: String,
        result: Result<DeliveryOutcome, String>,
    },
}

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use lm_core::{BulkOptions, Job, JobStatus};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::delivery::{BulkReport, Confirm, DeliveryOutcome, FileDelivery};
use crate::error::ApiError;
use crate::events::DashboardEvent;

#[derive(Default)]
struct BoardState {
    jobs: Vec<Job>,
    generation: u64,
}

/// The displayed job list. Whichever listing completes last replaces it;
/// jobs are never patched in place.
#[derive(Default)]
pub struct JobBoard {
    state: RwLock<BoardState>,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new generation number.
    pub fn replace(&self, jobs: Vec<Job>) -> u64 {
        let mut state = self.state.write();
        state.jobs = jobs;
        state.generation += 1;
        state.generation
    }

    pub fn snapshot(&self) -> Vec<Job> {
        self.state.read().jobs.clone()
    }

    /// Number of replacements so far
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }
}

/// Ties the client, the board and file delivery together and reports
/// what happens through [`DashboardEvent`]s.
#[derive(Clone)]
pub struct Dashboard {
    client: Arc<ApiClient>,
    delivery: Arc<FileDelivery>,
    board: Arc<JobBoard>,
    events: mpsc::UnboundedSender<DashboardEvent>,
}

impl Dashboard {
    pub fn new(
        client: Arc<ApiClient>,
        delivery: Arc<FileDelivery>,
    ) -> (Self, mpsc::UnboundedReceiver<DashboardEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let dashboard = Self {
            client,
            delivery,
            board: Arc::new(JobBoard::new()),
            events,
        };
        (dashboard, receiver)
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn board(&self) -> &JobBoard {
        &self.board
    }

    /// Lists jobs and replaces the board once the call completes.
    pub async fn refresh(&self) -> Result<Vec<Job>, ApiError> {
        match self.client.list_jobs().await {
            Ok(jobs) => {
                let generation = self.board.replace(jobs.clone());
                debug!("Board generation {generation}: {} jobs", jobs.len());
                self.emit(DashboardEvent::JobsRefreshed(jobs.clone()));
                Ok(jobs)
            }
            Err(e) => {
                self.notify_failure(&e);
                Err(e)
            }
        }
    }

    pub fn start_polling(&self, interval: Duration) -> Poller {
        Poller::start(self.clone(), interval)
    }

    /// Fetches the artifact of a completed job and delivers it.
    pub async fn download(&self, job: &Job) -> Result<DeliveryOutcome, String> {
        let result = match self.client.get_artifact(job).await {
            Ok(artifact) => self.delivery.deliver(&artifact).await.map_err(|e| {
                let message = e.to_string();
                self.emit(DashboardEvent::Notification(message.clone()));
                message
            }),
            Err(e) => {
                self.notify_failure(&e);
                Err(e.user_message())
            }
        };

        self.emit(DashboardEvent::DeliveryFinished {
            job_id: job.id.clone(),
            result: result.clone(),
        });
        result
    }

    pub async fn download_bulk(
        &self,
        job_ids: &[String],
        options: BulkOptions,
        confirm: &dyn Confirm,
    ) -> anyhow::Result<BulkReport> {
        let listing = match self.client.list_artifacts_bulk(job_ids, options).await {
            Ok(listing) => listing,
            Err(e) => {
                self.notify_failure(&e);
                return Err(e.into());
            }
        };
        info!(
            "Bulk listing: {} files, {} bytes",
            listing.total_count, listing.total_bytes
        );

        let report = self.delivery.deliver_bulk(&listing, confirm).await?;
        for failure in &report.failed {
            self.emit(DashboardEvent::Notification(failure.to_string()));
        }
        Ok(report)
    }

    /// One notification per adapter failure, without internal details.
    pub fn notify_failure(&self, err: &ApiError) {
        warn!("{err}");
        self.emit(DashboardEvent::Notification(err.user_message()));
    }

    fn emit(&self, event: DashboardEvent) {
        if self.events.send(event).is_err() {
            debug!("No listener for dashboard events");
        }
    }
}

/// Periodic refresh. Every tick spawns its own listing; ticks never wait
/// for earlier ones to finish.
pub struct Poller {
    ticker: JoinHandle<()>,
}

impl Poller {
    pub fn start(dashboard: Dashboard, interval: Duration) -> Self {
        let ticker = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let dashboard = dashboard.clone();
                tokio::spawn(async move {
                    // failures are already reported as notifications
                    let _ = dashboard.refresh().await;
                });
            }
        });
        Self { ticker }
    }

    /// Stops future ticks. Listings already in flight still complete.
    pub fn stop(&self) {
        self.ticker.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.ticker.is_finished()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Jobs that are completed in `after` but were not completed in `before`.
pub fn newly_completed(before: &[Job], after: &[Job]) -> Vec<Job> {
    after
        .iter()
        .filter(|job| job.status == JobStatus::Completed)
        .filter(|job| {
            !before
                .iter()
                .any(|old| old.id == job.id && old.status == JobStatus::Completed)
        })
        .cloned()
        .collect()
}

/// Plain-text rendering of the board, one job per line.
pub fn render_board(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "No jobs yet.".to_string();
    }

    let mut out = String::new();
    for job in jobs {
        let _ = write!(
            out,
            "{} {:<12} {:<16} {:<9} {:>5.1}%",
            job.status.icon(),
            job.id,
            job.kind.name(),
            job.status,
            job.progress
        );
        if let (Some(step), Some(total)) = (job.current_step, job.total_steps) {
            let _ = write!(out, "  step {step}/{total}");
        }
        if let Some(eta) = job.eta_seconds {
            let _ = write!(out, "  eta {}s", eta.round() as u64);
        }
        if let Some(error) = &job.error_message {
            let _ = write!(out, "  {error}");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::scripted::ScriptedTransport;
    use crate::api::{Method, ProtocolKind};
    use crate::delivery::DeliveryStep;
    use crate::delivery::DownloadDirHost;
    use crate::logger::StructuredLogger;
    use crate::session::Session;
    use lm_core::JobKind;
    use serde_json::json;
    use tempfile::TempDir;
    use url::Url;

    struct Harness {
        dashboard: Dashboard,
        events: mpsc::UnboundedReceiver<DashboardEvent>,
        transport: Arc<ScriptedTransport>,
        _downloads: TempDir,
    }

    fn harness(transport: ScriptedTransport) -> Harness {
        let url = Url::parse("http://localhost:8000").unwrap();
        let transport = Arc::new(transport);
        let logger = Arc::new(StructuredLogger::in_memory());
        let client = ApiClient::new(
            &url,
            ProtocolKind::Direct,
            transport.clone(),
            Arc::new(Session::anonymous()),
            logger.clone(),
        );
        let downloads = TempDir::new().unwrap();
        let delivery = FileDelivery::new(Arc::new(DownloadDirHost::new(downloads.path())), logger);
        let (dashboard, events) = Dashboard::new(Arc::new(client), Arc::new(delivery));
        Harness {
            dashboard,
            events,
            transport,
            _downloads: downloads,
        }
    }

    fn listing(ids: &[&str]) -> serde_json::Value {
        json!({
            "success": true,
            "data": ids
                .iter()
                .map(|id| json!({ "id": id, "status": "running" }))
                .collect::<Vec<_>>()
        })
    }

    fn ids(jobs: &[Job]) -> Vec<String> {
        jobs.iter().map(|job| job.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_last_completed_listing_wins() {
        let h = harness(
            ScriptedTransport::new()
                .reply_after(Method::Get, "/jobs", Duration::from_millis(10), listing(&["first"]))
                .reply_after(Method::Get, "/jobs", Duration::from_millis(80), listing(&["second"])),
        );

        let (a, b) = tokio::join!(h.dashboard.refresh(), h.dashboard.refresh());
        assert!(a.is_ok() && b.is_ok());

        assert_eq!(ids(&h.dashboard.board().snapshot()), vec!["second"]);
        assert_eq!(h.dashboard.board().generation(), 2);
    }

    #[tokio::test]
    async fn test_slow_earlier_listing_still_replaces_the_board() {
        let h = harness(
            ScriptedTransport::new()
                .reply_after(Method::Get, "/jobs", Duration::from_millis(80), listing(&["first"]))
                .reply_after(Method::Get, "/jobs", Duration::from_millis(10), listing(&["second"])),
        );

        let _ = tokio::join!(h.dashboard.refresh(), h.dashboard.refresh());

        assert_eq!(ids(&h.dashboard.board().snapshot()), vec!["first"]);
    }

    #[tokio::test]
    async fn test_failed_refresh_notifies_once_and_keeps_board() {
        let mut h = harness(
            ScriptedTransport::new()
                .reply(Method::Get, "/jobs", 200, listing(&["a"]))
                .reply(Method::Get, "/jobs", 500, json!({ "message": "database locked" })),
        );

        h.dashboard.refresh().await.unwrap();
        assert!(h.dashboard.refresh().await.is_err());

        assert_eq!(ids(&h.dashboard.board().snapshot()), vec!["a"]);
        assert!(matches!(h.events.recv().await, Some(DashboardEvent::JobsRefreshed(_))));
        assert_eq!(
            h.events.recv().await,
            Some(DashboardEvent::Notification("database locked".into()))
        );
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stopped_poller_lets_in_flight_listings_finish() {
        let h = harness(ScriptedTransport::new().always_after(
            Method::Get,
            "/jobs",
            Duration::from_millis(200),
            listing(&["p"]),
        ));

        let poller = h.dashboard.start_polling(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(70)).await;
        poller.stop();
        let issued = h.transport.requests().len();
        assert!(issued >= 1);
        assert_eq!(h.dashboard.board().generation(), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(!poller.is_running());
        assert_eq!(h.transport.requests().len(), issued);
        assert_eq!(h.dashboard.board().generation(), issued as u64);
    }

    #[tokio::test]
    async fn test_download_of_running_job_is_refused_locally() {
        let mut h = harness(ScriptedTransport::new());
        let job = Job::new("j1", JobKind::Training, JobStatus::Running);

        let result = h.dashboard.download(&job).await;

        assert!(result.is_err());
        assert!(h.transport.requests().is_empty());
        assert!(matches!(h.events.recv().await, Some(DashboardEvent::Notification(_))));
    }

    #[tokio::test]
    async fn test_download_of_completed_job_saves_the_file() {
        let mut h = harness(ScriptedTransport::new().reply(
            Method::Get,
            "/artifacts/j2",
            200,
            json!({ "success": true, "data": {
                "type": "file_data",
                "filename": "out.txt",
                "data": "aGVsbG8=",
                "size": 5,
                "content_type": "text/plain"
            } }),
        ));
        let job = Job::new("j2", JobKind::Generation, JobStatus::Completed);

        let outcome = h.dashboard.download(&job).await.unwrap();

        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                filename: "out.txt".into(),
                step: DeliveryStep::ObjectUrl
            }
        );
        assert!(matches!(
            h.events.recv().await,
            Some(DashboardEvent::DeliveryFinished { ref job_id, result: Ok(_) }) if job_id == "j2"
        ));
    }

    #[test]
    fn test_newly_completed() {
        let before = vec![
            Job::new("a", JobKind::Training, JobStatus::Running),
            Job::new("b", JobKind::Training, JobStatus::Completed),
        ];
        let after = vec![
            Job::new("a", JobKind::Training, JobStatus::Completed),
            Job::new("b", JobKind::Training, JobStatus::Completed),
            Job::new("c", JobKind::Generation, JobStatus::Completed),
        ];
        assert_eq!(ids(&newly_completed(&before, &after)), vec!["a", "c"]);
    }

    #[test]
    fn test_render_board() {
        assert_eq!(render_board(&[]), "No jobs yet.");
        let mut job = Job::new("abc", JobKind::Training, JobStatus::Running);
        job.current_step = Some(5);
        job.total_steps = Some(10);
        let rendered = render_board(&[job]);
        assert!(rendered.starts_with("⚡ abc"));
        assert!(rendered.contains("step 5/10"));
    }
}

use std::sync::Arc;

use lm_app::dashboard::{newly_completed, render_board};
use lm_app::delivery::{DeliveryOutcome, DownloadDirHost};
use lm_app::events::DashboardEvent;
use lm_app::logger::JsonFileStore;
use lm_app::{
    ApiClient, CredentialSource, Dashboard, DashboardConfig, FileDelivery, StructuredLogger,
};
use lm_core::Job;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = DashboardConfig::load()?;
    info!(
        "Monitoring {} with the {} protocol",
        config.base_url, config.protocol
    );

    let store = Arc::new(JsonFileStore::new(&config.data_dir));
    let logger = Arc::new(StructuredLogger::new(config.logger_settings(), store));
    let session: Arc<dyn CredentialSource> = Arc::new(config.session());
    let client = Arc::new(ApiClient::from_config(&config, session, logger.clone())?);
    let host = Arc::new(DownloadDirHost::new(&config.download_dir));
    let delivery = Arc::new(FileDelivery::new(host, logger));
    let (dashboard, mut events) = Dashboard::new(client, delivery);

    match dashboard.client().check_health().await {
        Ok(report) => info!("Backend is {} (answered by {})", report.status, report.source),
        Err(e) => warn!("Health check failed: {}", e.user_message()),
    }

    let poller = dashboard.start_polling(config.poll_interval);
    // None until the first listing so jobs finished before start-up are not downloaded
    let mut previous: Option<Vec<Job>> = None;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(DashboardEvent::JobsRefreshed(jobs)) => {
                    println!("{}", render_board(&jobs));
                    if config.auto_download {
                        if let Some(before) = &previous {
                            for job in newly_completed(before, &jobs) {
                                let dashboard = dashboard.clone();
                                tokio::spawn(async move {
                                    let _ = dashboard.download(&job).await;
                                });
                            }
                        }
                    }
                    previous = Some(jobs);
                }
                Some(DashboardEvent::Notification(message)) => warn!("{message}"),
                Some(DashboardEvent::DeliveryFinished { job_id, result }) => match result {
                    Ok(DeliveryOutcome::Delivered { filename, step }) => {
                        info!("Job {job_id}: saved {filename} via {step}")
                    }
                    Ok(DeliveryOutcome::Opened { location }) => {
                        info!("Job {job_id}: artifact available at {location}")
                    }
                    Err(message) => warn!("Job {job_id}: {message}"),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    poller.stop();
    Ok(())
}

use tracing::{error, info, warn};

use esi_pipeline::PipelineEvent;
use esi_pipeline::config::AppSettings;
use esi_pipeline::logging;
use esi_pipeline::services::ServiceContainer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let settings = AppSettings::load()?;
    let logging = logging::init_logging(&settings.logging)?;
    info!(filter = %logging.get_filter(), "Logging initialized");

    let container = ServiceContainer::from_settings(&settings).await?;
    logging.start_retention_cleanup(container.cancellation_token());

    let mut events = container.subscribe();
    let token = container.cancellation_token();
    let event_logger = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event @ PipelineEvent::DataError { .. }) => {
                        warn!(event = event.name(), "{}", event.description());
                    }
                    Ok(PipelineEvent::Metric(_)) => {}
                    Ok(event) => info!(event = event.name(), "{}", event.description()),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event logger lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    let scheduled = container.start();
    info!(
        scheduled,
        sources = settings.sources.len(),
        "esi-pipeline running, press Ctrl-C to stop"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    if let Some(summary) = container.shutdown().await {
        info!(
            attempts = summary.count,
            records = summary.total_records,
            bytes = summary.total_bytes,
            mean_duration_ms = summary.mean_duration_ms,
            "Final metrics"
        );
    }
    let _ = event_logger.await;

    Ok(())
}

//! Service container wiring the pipeline to its real collaborators.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::config::AppSettings;
use crate::esi::EsiClient;
use crate::events::PipelineEvent;
use crate::forwarder::{HttpIndexer, Indexer, NullIndexer};
use crate::metrics::MetricsSummary;
use crate::pipeline::{PipelineController, PipelineServices};
use crate::store::{PayloadStore, SqliteStore};

/// Holds the controller and the resources it was built from.
pub struct ServiceContainer {
    pub controller: Arc<PipelineController>,
    store: Option<SqliteStore>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Build the ESI client, indexer and optional store from settings.
    pub async fn from_settings(settings: &AppSettings) -> Result<Self> {
        let fetcher = Arc::new(EsiClient::new(&settings.esi)?);

        let indexer: Arc<dyn Indexer> = match settings.indexer.url.as_deref() {
            Some(url) if !url.trim().is_empty() => {
                info!(url, "Forwarding to HTTP indexer");
                Arc::new(HttpIndexer::new(&settings.indexer)?)
            }
            _ => {
                info!("No indexer URL configured, forwarded documents are discarded");
                Arc::new(NullIndexer)
            }
        };

        let store = if settings.pipeline.enable_persistence {
            Some(
                SqliteStore::connect(
                    &settings.store.database_url,
                    settings.store.max_connections,
                )
                .await?,
            )
        } else {
            None
        };

        let services = PipelineServices {
            fetcher,
            indexer,
            store: store
                .clone()
                .map(|s| Arc::new(s) as Arc<dyn PayloadStore>),
        };

        let controller = PipelineController::new(
            settings.pipeline.clone(),
            settings.sources.clone(),
            services,
        )?;

        Ok(Self {
            controller: Arc::new(controller),
            store,
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn start(&self) -> usize {
        self.controller.start()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.controller.subscribe()
    }

    /// Cancellation token for background tasks tied to the container.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Stop the pipeline, signal background tasks and close the store.
    pub async fn shutdown(&self) -> Option<MetricsSummary> {
        info!("Shutting down services");
        let summary = self.controller.stop().await;
        self.cancellation_token.cancel();

        if let Some(store) = &self.store {
            store.pool().close().await;
        }
        info!("Services shut down");
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexerSettings;

    #[tokio::test]
    async fn test_builds_with_defaults() {
        let container = ServiceContainer::from_settings(&AppSettings::default())
            .await
            .unwrap();
        assert!(!container.controller.is_running());
        assert!(container.store.is_none());
        assert!(container.shutdown().await.is_none());
        assert!(container.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_persistence_opens_store() {
        let mut settings = AppSettings::default();
        settings.pipeline.enable_persistence = true;
        settings.store.database_url = "sqlite::memory:".into();
        settings.indexer = IndexerSettings {
            url: Some("http://localhost:9200/ingest".into()),
            ..Default::default()
        };

        let container = ServiceContainer::from_settings(&settings).await.unwrap();
        assert!(container.store.is_some());
    }
}

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, broadcast};

use esi_pipeline::config::PipelineConfig;
use esi_pipeline::domain::{DataSource, SourceCategory};
use esi_pipeline::esi::{EsiError, FetchRequest, FetchResponse, Fetcher};
use esi_pipeline::forwarder::{Document, Indexer};
use esi_pipeline::store::PayloadStore;
use esi_pipeline::{Error, PipelineController, PipelineEvent, PipelineServices, Result};

/// Fetcher returning scripted responses, then a default.
pub struct MockFetcher {
    calls: AtomicUsize,
    script: Mutex<VecDeque<std::result::Result<Value, EsiError>>>,
    default: Mutex<std::result::Result<Value, EsiError>>,
    gate: Option<Gate>,
}

/// Holds a fetch open until released.
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

impl MockFetcher {
    pub fn returning(payload: Value) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            default: Mutex::new(Ok(payload)),
            gate: None,
        }
    }

    pub fn failing(status: u16) -> Self {
        let fetcher = Self::returning(Value::Null);
        *fetcher.default.lock() = Err(status_error(status));
        fetcher
    }

    pub fn gated(payload: Value) -> Self {
        Self {
            gate: Some(Gate {
                entered: Notify::new(),
                release: Notify::new(),
            }),
            ..Self::returning(payload)
        }
    }

    pub fn then(self, response: std::result::Result<Value, EsiError>) -> Self {
        self.script.lock().push_back(response);
        self
    }

    pub fn gate(&self) -> &Gate {
        self.gate.as_ref().expect("fetcher is not gated")
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn status_error(status: u16) -> EsiError {
    EsiError::Status {
        status,
        url: "https://esi.example/latest/markets/prices/".into(),
        message: String::new(),
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, _request: &FetchRequest) -> std::result::Result<FetchResponse, EsiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let next = self.script.lock().pop_front();
        let response = next.unwrap_or_else(|| self.default.lock().clone());
        response.map(FetchResponse::from_payload)
    }
}

/// Indexer remembering batch sizes; optionally rejecting everything.
#[derive(Default)]
pub struct RecordingIndexer {
    pub batches: Mutex<Vec<Vec<String>>>,
    pub reject: bool,
}

impl RecordingIndexer {
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl Indexer for RecordingIndexer {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn index(&self, _source_id: &str, documents: &[Document]) -> Result<()> {
        if self.reject {
            return Err(Error::forward("indexer returned 503"));
        }
        self.batches
            .lock()
            .push(documents.iter().map(|d| d.id.clone()).collect());
        Ok(())
    }
}

pub fn config() -> PipelineConfig {
    PipelineConfig {
        max_startup_jitter_ms: 0,
        batch_delay_ms: 0,
        retry_base_delay_ms: 10,
        retry_max_delay_ms: 100,
        ..Default::default()
    }
}

pub fn prices_source() -> DataSource {
    DataSource::new(
        "prices",
        "Market prices",
        "/markets/prices/",
        SourceCategory::Market,
        1,
    )
}

pub fn prices(count: usize) -> Value {
    Value::Array(
        (0..count)
            .map(|i| {
                json!({
                    "type_id": 34 + i,
                    "average_price": 6.0,
                    "adjusted_price": 5.0
                })
            })
            .collect(),
    )
}

pub fn controller(
    config: PipelineConfig,
    sources: Vec<DataSource>,
    fetcher: Arc<MockFetcher>,
    indexer: Arc<RecordingIndexer>,
    store: Option<Arc<dyn PayloadStore>>,
) -> PipelineController {
    PipelineController::new(
        config,
        sources,
        PipelineServices {
            fetcher,
            indexer,
            store,
        },
    )
    .expect("valid pipeline configuration")
}

/// Everything currently buffered on a receiver.
pub fn drain(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

//! Background indexing.
//!
//! The worker owns a dedicated OS thread. Each request builds a fresh
//! engine, feeds it the dataset and answers with exactly one response: the
//! saved snapshot, or the reason it could not be built. Nothing is shared
//! with the requesting side except the two channels.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::{Duration, Instant},
};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    config::EngineConfig,
    dataset::{Dataset, DatasetShape},
    error::{Error, Result},
    snapshot::Snapshot,
};

const THREAD_NAME: &str = "docsift-index";

/// What to index: an already classified dataset or a raw wire payload.
#[derive(Debug, Clone)]
pub enum Payload {
    Dataset(Dataset),
    Raw(Value),
}

#[derive(Debug)]
pub struct IndexRequest {
    pub round: u64,
    pub payload: Payload,
}

#[derive(Debug)]
pub enum IndexResponse {
    Indexed {
        round: u64,
        snapshot: Snapshot,
        meta: IndexingMeta,
    },
    Failed {
        round: u64,
        error: Error,
    },
}

impl IndexResponse {
    pub fn round(&self) -> u64 {
        match self {
            Self::Indexed { round, .. } | Self::Failed { round, .. } => *round,
        }
    }
}

/// Diagnostics about a finished indexing round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingMeta {
    pub shape: DatasetShape,
    pub entity_count: usize,
    pub term_count: usize,
    pub snapshot_bytes: usize,
    #[serde(rename = "durationMs", serialize_with = "as_millis")]
    pub duration: Duration,
}

fn as_millis<S: serde::Serializer>(
    d: &Duration,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

/// Turns one payload into a snapshot. Swappable so tests can stall or
/// crash a round.
pub(crate) type BuildFn =
    fn(&EngineConfig, Payload) -> Result<(Snapshot, IndexingMeta)>;

/// Classify, index and save one payload.
pub fn build_snapshot(
    config: &EngineConfig,
    payload: Payload,
) -> Result<(Snapshot, IndexingMeta)> {
    let started = Instant::now();
    let dataset = match payload {
        Payload::Dataset(dataset) => dataset,
        Payload::Raw(value) => Dataset::classify(value)?,
    };

    let shape = dataset.shape();
    info!(%shape, records = dataset.len(), "indexing dataset");

    let mut engine = config.build_engine()?;
    let stats = dataset.index_into(&mut engine)?;
    let snapshot = engine.save()?;

    let meta = IndexingMeta {
        shape,
        entity_count: stats.entity_count,
        term_count: stats.term_count,
        snapshot_bytes: snapshot.len(),
        duration: started.elapsed(),
    };
    info!(
        %shape,
        entities = meta.entity_count,
        terms = meta.term_count,
        ms = meta.duration.as_millis() as u64,
        "finished indexing"
    );
    Ok((snapshot, meta))
}

/// Handle to a running index worker thread.
///
/// Dropping the handle closes the request channel; the thread exits once
/// its current round is done.
pub struct IndexWorker {
    requests: mpsc::UnboundedSender<IndexRequest>,
    responses: mpsc::UnboundedReceiver<IndexResponse>,
}

impl IndexWorker {
    pub fn spawn(config: Arc<EngineConfig>) -> Result<Self> {
        Self::spawn_with(config, build_snapshot)
    }

    pub(crate) fn spawn_with(
        config: Arc<EngineConfig>,
        build: BuildFn,
    ) -> Result<Self> {
        config.validate()?;
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (response_tx, responses) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run(&config, build, request_rx, response_tx))?;

        Ok(Self {
            requests,
            responses,
        })
    }

    pub fn send(&self, request: IndexRequest) -> Result<()> {
        self.requests.send(request).map_err(|_| Error::WorkerGone)
    }

    /// Next response, or `None` once the worker thread is gone.
    pub async fn recv(&mut self) -> Option<IndexResponse> {
        self.responses.recv().await
    }
}

impl std::fmt::Debug for IndexWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWorker").finish_non_exhaustive()
    }
}

fn run(
    config: &EngineConfig,
    build: BuildFn,
    mut requests: mpsc::UnboundedReceiver<IndexRequest>,
    responses: mpsc::UnboundedSender<IndexResponse>,
) {
    while let Some(IndexRequest { round, payload }) = requests.blocking_recv()
    {
        debug!(round, "worker picked up request");
        let outcome = catch_unwind(AssertUnwindSafe(|| build(config, payload)));

        let response = match outcome {
            Ok(Ok((snapshot, meta))) => IndexResponse::Indexed {
                round,
                snapshot,
                meta,
            },
            Ok(Err(error)) => {
                warn!(round, %error, "indexing failed");
                IndexResponse::Failed { round, error }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(round, %message, "indexing panicked");
                IndexResponse::Failed {
                    round,
                    error: Error::Indexing(format!(
                        "worker panicked: {message}"
                    )),
                }
            }
        };

        if responses.send(response).is_err() {
            break;
        }
    }
    debug!("index worker exiting");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Query-side facade over the index worker.
//!
//! [`IndexCoordinator`] is a cheap, cloneable handle to a task that owns all
//! coordination state: the readiness state machine, the queue of searches
//! waiting for an index, the rounds in flight, and the engine used to
//! answer queries. Requests are sent when a method is called, not when the
//! returned future is first polled, so call order is processing order.

use std::{collections::VecDeque, future::Future, sync::Arc};

use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    config::{CoordinatorConfig, EngineConfig, OverlapPolicy, Settings},
    dataset::Dataset,
    engine::MatchEngine,
    error::{Error, Result},
    search::{SearchQuery, SearchResult},
    snapshot::Snapshot,
    worker::{
        self,
        BuildFn,
        IndexRequest,
        IndexResponse,
        IndexWorker,
        IndexingMeta,
        Payload,
    },
};

/// Whether the coordinator can answer searches right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// No index has been loaded and none is being built.
    NotReady,
    /// A round is in flight and no usable index is loaded.
    Indexing,
    /// An index is loaded; searches are answered immediately.
    Ready,
}

enum Command {
    Index {
        payload: Payload,
        reply: oneshot::Sender<Result<IndexingMeta>>,
    },
    Search {
        query: SearchQuery,
        reply: oneshot::Sender<Result<SearchResult>>,
    },
}

#[derive(Clone)]
pub struct IndexCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ReadyState>,
    default_top_n: usize,
    default_min_quality: f64,
}

impl IndexCoordinator {
    /// Start the coordinator task on the current tokio runtime.
    ///
    /// The worker thread is started lazily by the first indexing round.
    /// Fails with [`Error::Config`] if either config is invalid.
    pub fn spawn(
        engine: EngineConfig,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        Self::spawn_with(engine, config, worker::build_snapshot)
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::spawn(settings.engine.clone(), settings.coordinator.clone())
    }

    pub(crate) fn spawn_with(
        engine: EngineConfig,
        config: CoordinatorConfig,
        build: BuildFn,
    ) -> Result<Self> {
        engine.validate()?;
        config.validate()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ReadyState::NotReady);

        let handle = Self {
            commands,
            state,
            default_top_n: config.default_top_n,
            default_min_quality: config.default_min_quality,
        };

        let actor = Actor {
            engine_config: Arc::new(engine),
            config,
            build,
            worker: None,
            engine: None,
            rounds: VecDeque::new(),
            pending: VecDeque::new(),
            next_round: 1,
            state: state_tx,
        };
        tokio::spawn(actor.run(command_rx));

        Ok(handle)
    }

    /// Index `dataset` in the background.
    ///
    /// From this call on, searches wait for the new index. Resolves once
    /// this round's snapshot is loaded, or with the reason it was not.
    pub fn index_data(
        &self,
        dataset: Dataset,
    ) -> impl Future<Output = Result<IndexingMeta>> + use<> {
        self.submit(Payload::Dataset(dataset))
    }

    /// Like [`index_data`](Self::index_data) for an unclassified payload
    /// such as `{"persons": [...]}`.
    pub fn index_value(
        &self,
        value: Value,
    ) -> impl Future<Output = Result<IndexingMeta>> + use<> {
        self.submit(Payload::Raw(value))
    }

    fn submit(
        &self,
        payload: Payload,
    ) -> impl Future<Output = Result<IndexingMeta>> + use<> {
        let (reply, rx) = oneshot::channel();
        let sent = self.commands.send(Command::Index { payload, reply });
        await_reply(sent.is_ok(), rx)
    }

    /// Run `query` now if an index is loaded, otherwise once one is.
    ///
    /// Queued searches are answered in the order they were issued. If the
    /// round they wait on fails, they fail with the same error.
    pub fn search(
        &self,
        query: SearchQuery,
    ) -> impl Future<Output = Result<SearchResult>> + use<> {
        let (reply, rx) = oneshot::channel();
        let sent = self.commands.send(Command::Search { query, reply });
        await_reply(sent.is_ok(), rx)
    }

    pub fn search_with(
        &self,
        text: &str,
        top_n: usize,
        min_quality: f64,
    ) -> impl Future<Output = Result<SearchResult>> + use<> {
        let search = SearchQuery::new(text, top_n, min_quality)
            .map(|query| self.search(query));
        async move { search?.await }
    }

    /// Search with the configured default `top_n` and `min_quality`.
    pub fn search_text(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<SearchResult>> + use<> {
        self.search_with(text, self.default_top_n, self.default_min_quality)
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    /// Readiness changes as they happen.
    pub fn subscribe(&self) -> watch::Receiver<ReadyState> {
        self.state.clone()
    }
}

impl std::fmt::Debug for IndexCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCoordinator")
            .field("state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

async fn await_reply<T>(
    sent: bool,
    rx: oneshot::Receiver<Result<T>>,
) -> Result<T> {
    if !sent {
        return Err(Error::CoordinatorClosed);
    }
    rx.await.map_err(|_| Error::CoordinatorClosed)?
}

struct Round {
    id: u64,
    reply: oneshot::Sender<Result<IndexingMeta>>,
    deadline: Option<Instant>,
}

struct PendingSearch {
    query: SearchQuery,
    reply: oneshot::Sender<Result<SearchResult>>,
}

enum Event {
    Command(Option<Command>),
    Response(Option<IndexResponse>),
    Timeout,
}

struct Actor {
    engine_config: Arc<EngineConfig>,
    config: CoordinatorConfig,
    build: BuildFn,
    worker: Option<IndexWorker>,
    /// Loaded index. `Some` exactly when the state is `Ready`.
    engine: Option<MatchEngine>,
    /// Rounds sent to the current worker, oldest first.
    rounds: VecDeque<Round>,
    pending: VecDeque<PendingSearch>,
    next_round: u64,
    state: watch::Sender<ReadyState>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let deadline = self.rounds.front().and_then(|r| r.deadline);
            let event = tokio::select! {
                command = commands.recv() => Event::Command(command),
                response = next_response(&mut self.worker) => {
                    Event::Response(response)
                }
                () = wait_until(deadline) => Event::Timeout,
            };

            match event {
                Event::Command(Some(Command::Index { payload, reply })) => {
                    self.start_round(payload, reply);
                }
                Event::Command(Some(Command::Search { query, reply })) => {
                    self.search(query, reply);
                }
                Event::Command(None) => break,
                Event::Response(Some(response)) => self.finish_round(response),
                Event::Response(None) => self.abandon_worker(Error::WorkerGone),
                Event::Timeout => {
                    let limit = self.config.index_timeout().unwrap_or_default();
                    self.abandon_worker(Error::Timeout(limit));
                }
            }
        }
        debug!("index coordinator shutting down");
    }

    fn ready_state(&self) -> ReadyState {
        if self.engine.is_some() {
            ReadyState::Ready
        } else if !self.rounds.is_empty() {
            ReadyState::Indexing
        } else {
            ReadyState::NotReady
        }
    }

    fn publish(&self) {
        let next = self.ready_state();
        self.state.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
    }

    fn worker(&mut self) -> Result<&IndexWorker> {
        if self.worker.is_none() {
            let worker = IndexWorker::spawn_with(
                Arc::clone(&self.engine_config),
                self.build,
            )?;
            debug!("index worker started");
            self.worker = Some(worker);
        }
        self.worker.as_ref().ok_or(Error::WorkerGone)
    }

    fn start_round(
        &mut self,
        payload: Payload,
        reply: oneshot::Sender<Result<IndexingMeta>>,
    ) {
        if self.config.overlap == OverlapPolicy::Reject
            && !self.rounds.is_empty()
        {
            debug!("refusing overlapping indexing round");
            let _ = reply.send(Err(Error::IndexingInProgress));
            return;
        }

        let id = self.next_round;
        self.next_round += 1;

        let request = IndexRequest { round: id, payload };
        if let Err(error) = self.worker().and_then(|w| w.send(request)) {
            warn!(round = id, %error, "could not dispatch indexing round");
            let _ = reply.send(Err(error));
            if self.worker.is_some() {
                self.abandon_worker(Error::WorkerGone);
            }
            return;
        }

        self.engine = None;
        self.rounds.push_back(Round {
            id,
            reply,
            deadline: self.config.index_timeout().map(|t| Instant::now() + t),
        });
        self.publish();
        info!(
            round = id,
            in_flight = self.rounds.len(),
            "indexing round dispatched"
        );
    }

    fn search(
        &mut self,
        query: SearchQuery,
        reply: oneshot::Sender<Result<SearchResult>>,
    ) {
        match &self.engine {
            Some(engine) => {
                let _ = reply.send(Ok(engine.get_matches(&query)));
            }
            None => {
                self.pending.push_back(PendingSearch { query, reply });
                debug!(queued = self.pending.len(), "search waiting for index");
            }
        }
    }

    fn finish_round(&mut self, response: IndexResponse) {
        let Some(round) = self.rounds.pop_front() else {
            warn!(round = response.round(), "response with no round in flight");
            return;
        };
        debug_assert_eq!(round.id, response.round());

        let outcome = match response {
            IndexResponse::Indexed { snapshot, meta, .. } => {
                self.load(&snapshot).map(|()| meta)
            }
            IndexResponse::Failed { error, .. } => Err(error),
        };
        self.publish();

        match outcome {
            Ok(meta) => {
                info!(
                    round = round.id,
                    shape = %meta.shape,
                    entities = meta.entity_count,
                    terms = meta.term_count,
                    snapshot_bytes = meta.snapshot_bytes,
                    ms = meta.duration.as_millis() as u64,
                    "index ready"
                );
                let _ = round.reply.send(Ok(meta));
                self.drain_pending();
            }
            Err(error) => {
                warn!(round = round.id, %error, "indexing round failed");
                let _ = round.reply.send(Err(error.clone()));
                self.reject_pending(&error);
            }
        }
    }

    /// Swap in a fresh engine holding `snapshot`. The current engine is
    /// kept if the snapshot cannot be loaded.
    fn load(&mut self, snapshot: &Snapshot) -> Result<()> {
        let mut engine = self.engine_config.build_engine()?;
        engine.load(snapshot)?;
        self.engine = Some(engine);
        Ok(())
    }

    fn drain_pending(&mut self) {
        let Some(engine) = &self.engine else {
            return;
        };
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), "answering queued searches");
        }
        for PendingSearch { query, reply } in self.pending.drain(..) {
            let _ = reply.send(Ok(engine.get_matches(&query)));
        }
    }

    fn reject_pending(&mut self, error: &Error) {
        for PendingSearch { reply, .. } in self.pending.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
    }

    /// Drop the worker and fail everything that was waiting on it. A fresh
    /// worker is started by the next round.
    fn abandon_worker(&mut self, error: Error) {
        self.worker = None;
        let rounds = std::mem::take(&mut self.rounds);
        if rounds.is_empty() {
            debug!(%error, "idle index worker went away");
            return;
        }

        warn!(
            %error,
            rounds = rounds.len(),
            queued = self.pending.len(),
            "abandoning index worker"
        );
        self.publish();
        for round in rounds {
            let _ = round.reply.send(Err(error.clone()));
        }
        self.reject_pending(&error);
    }
}

async fn next_response(
    worker: &mut Option<IndexWorker>,
) -> Option<IndexResponse> {
    match worker {
        Some(worker) => worker.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use serde_json::json;

    use super::*;
    use crate::dataset::DatasetShape;

    fn persons() -> Dataset {
        Dataset::Persons {
            records: vec![
                json!({"id": 1, "firstName": "Alice", "lastName": "King"}),
                json!({"id": 2, "firstName": "Bob", "lastName": "Bishop"}),
            ],
        }
    }

    fn stalled_persons(ms: u64) -> Value {
        json!({
            "stallMs": ms,
            "persons": [{"id": 1, "firstName": "Alice", "lastName": "King"}],
        })
    }

    /// Sleeps before indexing when the payload carries `stallMs`.
    fn stalling_build(
        config: &EngineConfig,
        payload: Payload,
    ) -> Result<(Snapshot, IndexingMeta)> {
        if let Payload::Raw(value) = &payload {
            if let Some(ms) = value.get("stallMs").and_then(Value::as_u64) {
                std::thread::sleep(Duration::from_millis(ms));
            }
        }
        worker::build_snapshot(config, payload)
    }

    fn coordinator() -> IndexCoordinator {
        IndexCoordinator::spawn(
            EngineConfig::default(),
            CoordinatorConfig::default(),
        )
        .unwrap()
    }

    fn stalling_coordinator(config: CoordinatorConfig) -> IndexCoordinator {
        IndexCoordinator::spawn_with(
            EngineConfig::default(),
            config,
            stalling_build,
        )
        .unwrap()
    }

    /// Indexes normally but hands back bytes no engine can load.
    fn junk_snapshot_build(
        config: &EngineConfig,
        payload: Payload,
    ) -> Result<(Snapshot, IndexingMeta)> {
        let (_, meta) = worker::build_snapshot(config, payload)?;
        Ok((Snapshot::from_bytes(b"junk".to_vec()), meta))
    }

    /// Panics while its panic payload is being discarded, which takes the
    /// worker thread down before it can answer.
    struct Fuse;

    impl Drop for Fuse {
        fn drop(&mut self) {
            panic!("worker thread torn down");
        }
    }

    /// Kills the worker thread when the payload carries `teardown`.
    fn teardown_build(
        config: &EngineConfig,
        payload: Payload,
    ) -> Result<(Snapshot, IndexingMeta)> {
        if let Payload::Raw(value) = &payload {
            if value.get("teardown").is_some() {
                std::panic::panic_any(Fuse);
            }
        }
        worker::build_snapshot(config, payload)
    }

    fn ids(result: &SearchResult) -> Vec<Value> {
        result.matches.iter().map(|m| m.entity["id"].clone()).collect()
    }

    #[tokio::test]
    async fn exact_name_is_top_match() {
        let coord = coordinator();
        assert_eq!(coord.ready_state(), ReadyState::NotReady);

        let meta = coord.index_data(persons()).await.unwrap();
        assert_eq!(meta.shape, DatasetShape::Persons);
        assert_eq!(meta.entity_count, 2);
        assert_eq!(coord.ready_state(), ReadyState::Ready);

        let result = coord.search_with("Alice King", 5, 0.3).await.unwrap();
        assert_eq!(result.matches[0].entity["id"], 1);
        assert!(result.matches[0].quality >= 0.9);
    }

    #[tokio::test]
    async fn gibberish_finds_nothing() {
        let coord = coordinator();
        coord.index_data(persons()).await.unwrap();
        let result = coord.search_with("Zyxqq", 5, 0.3).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn queued_searches_resolve_after_index_in_issue_order() {
        // The stall keeps the round open until every task is waiting.
        let coord = stalling_coordinator(CoordinatorConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = Vec::new();

        for (i, text) in ["alice", "bob", "king", "bishop"].iter().enumerate()
        {
            let search = coord.search_text(text);
            let log = Arc::clone(&log);
            tasks.push(tokio::spawn(async move {
                let result = search.await;
                log.lock().unwrap().push(format!("search {i}"));
                result.map(|_| ())
            }));
        }

        let index = coord.index_value(stalled_persons(100));
        let index_log = Arc::clone(&log);
        tasks.push(tokio::spawn(async move {
            let result = index.await;
            index_log.lock().unwrap().push("index".to_string());
            result.map(|_| ())
        }));

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(
            *log.lock().unwrap(),
            vec!["index", "search 0", "search 1", "search 2", "search 3"]
        );
    }

    #[tokio::test]
    async fn state_moves_through_indexing() {
        let coord = stalling_coordinator(CoordinatorConfig::default());
        let mut states = coord.subscribe();

        let index = coord.index_value(stalled_persons(100));
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), ReadyState::Indexing);

        index.await.unwrap();
        assert_eq!(coord.ready_state(), ReadyState::Ready);
    }

    #[tokio::test]
    async fn later_round_overwrites_earlier() {
        let coord = coordinator();
        let first = coord.index_data(persons());
        let second = coord.index_data(Dataset::Documents {
            records: vec![json!({"id": "doc-1", "title": "Quarterly Report"})],
        });
        // Queued behind both rounds, answered by the first to land.
        let early = coord.search_with("Alice King", 5, 0.3);

        first.await.unwrap();
        let meta = second.await.unwrap();
        assert_eq!(meta.shape, DatasetShape::Documents);
        assert_eq!(ids(&early.await.unwrap()), vec![json!(1)]);

        let stale = coord.search_with("Alice King", 5, 0.3).await.unwrap();
        assert!(stale.is_empty());
        let fresh =
            coord.search_with("quarterly report", 5, 0.3).await.unwrap();
        assert_eq!(ids(&fresh), vec![json!("doc-1")]);
    }

    #[tokio::test]
    async fn unrecognized_shape_rejects_pending_searches() {
        let coord = coordinator();
        let pending = coord.search_text("alice");
        let index = coord.index_value(json!({"foo": [1, 2, 3]}));

        assert!(matches!(index.await, Err(Error::UnrecognizedShape)));
        assert!(matches!(pending.await, Err(Error::UnrecognizedShape)));
        assert_eq!(coord.ready_state(), ReadyState::NotReady);

        coord.index_data(persons()).await.unwrap();
        let result = coord.search_text("alice").await.unwrap();
        assert_eq!(ids(&result), vec![json!(1)]);
    }

    #[tokio::test]
    async fn reindexing_same_data_gives_same_answers() {
        let coord = coordinator();
        let queries = ["alice", "bob bishop", "kign", "zzz"];

        coord.index_data(persons()).await.unwrap();
        let mut first = Vec::new();
        for q in queries {
            first.push(coord.search_text(q).await.unwrap().matches);
        }

        coord.index_data(persons()).await.unwrap();
        for (q, expected) in queries.iter().zip(first) {
            assert_eq!(coord.search_text(q).await.unwrap().matches, expected);
        }
    }

    #[tokio::test]
    async fn reject_policy_refuses_overlap() {
        let coord = stalling_coordinator(CoordinatorConfig {
            overlap: OverlapPolicy::Reject,
            ..CoordinatorConfig::default()
        });

        let first = coord.index_value(stalled_persons(200));
        let second = coord.index_data(persons());

        assert!(matches!(second.await, Err(Error::IndexingInProgress)));
        first.await.unwrap();
        assert_eq!(coord.ready_state(), ReadyState::Ready);
    }

    #[tokio::test]
    async fn stalled_worker_times_out_and_recovers() {
        let coord = stalling_coordinator(CoordinatorConfig {
            index_timeout_ms: Some(100),
            ..CoordinatorConfig::default()
        });

        let index = coord.index_value(stalled_persons(2_000));
        let pending = coord.search_text("alice");

        assert!(matches!(index.await, Err(Error::Timeout(_))));
        assert!(matches!(pending.await, Err(Error::Timeout(_))));
        assert_eq!(coord.ready_state(), ReadyState::NotReady);

        coord.index_data(persons()).await.unwrap();
        let result = coord.search_text("alice").await.unwrap();
        assert_eq!(ids(&result), vec![json!(1)]);
    }

    #[tokio::test]
    async fn invalid_engine_config_is_refused_at_spawn() {
        let engine = EngineConfig {
            ngram_size: 0,
            ..EngineConfig::default()
        };
        let result = IndexCoordinator::spawn(engine, CoordinatorConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));

        let config = CoordinatorConfig {
            default_top_n: 0,
            ..CoordinatorConfig::default()
        };
        let result = IndexCoordinator::spawn(EngineConfig::default(), config);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn unloadable_snapshot_rejects_round_and_queue() {
        let coord = IndexCoordinator::spawn_with(
            EngineConfig::default(),
            CoordinatorConfig::default(),
            junk_snapshot_build,
        )
        .unwrap();

        let pending = coord.search_text("alice");
        let index = coord.index_data(persons());

        assert!(matches!(index.await, Err(Error::Snapshot(_))));
        assert!(matches!(pending.await, Err(Error::Snapshot(_))));
        assert_eq!(coord.ready_state(), ReadyState::NotReady);
    }

    #[tokio::test]
    async fn dead_worker_rejects_work_and_is_replaced() {
        let coord = IndexCoordinator::spawn_with(
            EngineConfig::default(),
            CoordinatorConfig::default(),
            teardown_build,
        )
        .unwrap();

        let pending = coord.search_text("alice");
        let index = coord.index_value(json!({"teardown": true}));

        assert!(matches!(index.await, Err(Error::WorkerGone)));
        assert!(matches!(pending.await, Err(Error::WorkerGone)));
        assert_eq!(coord.ready_state(), ReadyState::NotReady);

        coord.index_data(persons()).await.unwrap();
        let result = coord.search_text("alice").await.unwrap();
        assert_eq!(ids(&result), vec![json!(1)]);
    }

    #[tokio::test]
    async fn invalid_query_fails_without_queuing() {
        let coord = coordinator();
        let result = coord.search_with("alice", 0, 0.3).await;
        assert!(matches!(result, Err(Error::InvalidQuery(_))));
    }
}

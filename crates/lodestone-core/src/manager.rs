//! Search request queue with per-caller supersession.
//!
//! Interactive callers (a search box, an editor command) fire a new query on
//! every keystroke. Only the latest request of each caller is worth running,
//! so the manager keeps one FIFO queue across all callers and, when caller X
//! submits, resolves every request X still has *pending* with
//! [`SearchOutcome::Superseded`]. A request that is already executing is
//! never cancelled.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  submit   ┌──────────────────┐  pop   ┌──────────────┐
//! │   Callers    │──────────▶│ Queue + caller   │───────▶│ Worker task  │
//! │ (any task)   │           │ generations      │        │ (one search  │
//! └──────────────┘           └──────────────────┘        │  at a time)  │
//!        ▲                                               └──────┬───────┘
//!        └─────────────── oneshot per request ──────────────────┘
//! ```

use crate::config::ConfigHandle;
use crate::search::{HybridSearchEngine, SearchError, SearchOptions, SearchResult};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// How a submitted request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// The search ran; results are best first
    Completed(Vec<SearchResult>),
    /// A newer request from the same caller replaced this one before it ran
    Superseded,
}

impl SearchOutcome {
    pub fn is_superseded(&self) -> bool {
        matches!(self, SearchOutcome::Superseded)
    }

    /// Results of a completed search, `None` if superseded.
    pub fn into_results(self) -> Option<Vec<SearchResult>> {
        match self {
            SearchOutcome::Completed(results) => Some(results),
            SearchOutcome::Superseded => None,
        }
    }
}

/// Errors returned to manager callers.
#[derive(Debug, Clone, Error)]
pub enum ManagerError {
    /// The search itself failed
    #[error(transparent)]
    Search(#[from] SearchError),
    /// The manager shut down before answering
    #[error("Search manager is shut down")]
    Shutdown,
}

/// Snapshot of queue activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Requests waiting to run
    pub pending: usize,
    /// Requests that ran (successfully or not)
    pub completed: u64,
    /// Requests resolved as superseded
    pub superseded: u64,
}

type Reply = oneshot::Sender<Result<SearchOutcome, SearchError>>;

struct Pending {
    caller: String,
    generation: u64,
    query: String,
    options: Option<SearchOptions>,
    reply: Reply,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Pending>,
    /// Latest generation handed out per caller with a queued request.
    /// Dropped when the caller's request is taken to run, so idle callers
    /// cost nothing and their next request starts again at 1.
    generations: HashMap<String, u64>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Notify,
    completed: AtomicU64,
    superseded: AtomicU64,
}

impl Shared {
    /// Queue state, recovering from a poisoned lock.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn supersede(&self, entry: Pending) {
        debug!(caller = %entry.caller, generation = entry.generation, "Superseded");
        self.superseded.fetch_add(1, Ordering::Relaxed);
        // Receiver may be gone already
        let _ = entry.reply.send(Ok(SearchOutcome::Superseded));
    }

    /// Refuses new requests and fails the queued ones. Their tickets resolve
    /// to [`ManagerError::Shutdown`] once the reply senders are dropped.
    fn stop(&self) {
        let dropped = {
            let mut state = self.lock();
            state.shutdown = true;
            state.generations.clear();
            std::mem::take(&mut state.pending)
        };
        if !dropped.is_empty() {
            info!("Dropping {} pending searches on shutdown", dropped.len());
        }
        drop(dropped);
        self.wake.notify_one();
    }

    /// Next request that is still the latest of its caller.
    fn next_request(&self) -> Next {
        let mut state = self.lock();
        while let Some(entry) = state.pending.pop_front() {
            let latest = state.generations.get(&entry.caller).copied().unwrap_or(0);
            if entry.generation == latest {
                // Submit keeps at most one queued request per caller
                state.generations.remove(&entry.caller);
                return Next::Run(entry);
            }
            self.supersede(entry);
        }
        if state.shutdown {
            Next::Stop
        } else {
            Next::Idle
        }
    }
}

enum Next {
    Run(Pending),
    Idle,
    Stop,
}

/// Handle to one submitted request.
#[derive(Debug)]
pub struct SearchTicket {
    generation: u64,
    reply: oneshot::Receiver<Result<SearchOutcome, SearchError>>,
}

impl SearchTicket {
    /// Generation the request was assigned within its caller.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Waits for the request to complete or be superseded.
    pub async fn wait(self) -> Result<SearchOutcome, ManagerError> {
        match self.reply.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ManagerError::Shutdown),
        }
    }
}

/// Serializes searches against one engine.
///
/// Must be created inside a tokio runtime; the worker task is spawned by
/// [`SearchManager::new`].
///
/// # Example
///
/// ```ignore
/// let manager = SearchManager::new(engine.clone(), ConfigHandle::default());
///
/// let stale = manager.submit("search-box", "autom", None)?;
/// let fresh = manager.submit("search-box", "automobile", None)?;
///
/// assert!(stale.wait().await?.is_superseded());
/// let results = fresh.wait().await?.into_results();
/// ```
pub struct SearchManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SearchManager {
    /// Spawns the worker task. Requests without options use the latest
    /// snapshot of `config` at the time they run.
    pub fn new(engine: Arc<HybridSearchEngine>, config: ConfigHandle) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            completed: AtomicU64::new(0),
            superseded: AtomicU64::new(0),
        });
        let worker = tokio::spawn(run_worker(shared.clone(), engine, config));
        info!("Search manager started");
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queues a search for `caller`, superseding that caller's pending ones.
    ///
    /// Never blocks on the engine. Explicit `options` are validated first:
    /// invalid ones are rejected here and leave the caller's pending request
    /// in place. Fails with [`ManagerError::Shutdown`] after shutdown.
    pub fn submit(
        &self,
        caller: &str,
        query: impl Into<String>,
        options: Option<SearchOptions>,
    ) -> Result<SearchTicket, ManagerError> {
        if let Some(options) = &options {
            options.validate()?;
        }

        let (reply, receiver) = oneshot::channel();
        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(ManagerError::Shutdown);
        }

        let generation = {
            let latest = state.generations.entry(caller.to_string()).or_insert(0);
            *latest += 1;
            *latest
        };

        let queued = std::mem::take(&mut state.pending);
        let (stale, keep): (VecDeque<Pending>, VecDeque<Pending>) =
            queued.into_iter().partition(|p| p.caller == caller);
        state.pending = keep;
        for entry in stale {
            self.shared.supersede(entry);
        }

        state.pending.push_back(Pending {
            caller: caller.to_string(),
            generation,
            query: query.into(),
            options,
            reply,
        });
        drop(state);
        self.shared.wake.notify_one();

        Ok(SearchTicket {
            generation,
            reply: receiver,
        })
    }

    /// Submits and waits.
    pub async fn search(
        &self,
        caller: &str,
        query: impl Into<String>,
        options: Option<SearchOptions>,
    ) -> Result<SearchOutcome, ManagerError> {
        self.submit(caller, query, options)?.wait().await
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            pending: self.shared.lock().pending.len(),
            completed: self.shared.completed.load(Ordering::Relaxed),
            superseded: self.shared.superseded.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting requests, fails the pending ones with
    /// [`ManagerError::Shutdown`], and waits for the running one to finish.
    pub async fn shutdown(&self) {
        self.shared.stop();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
        info!("Search manager stopped");
    }
}

impl Drop for SearchManager {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

async fn run_worker(shared: Arc<Shared>, engine: Arc<HybridSearchEngine>, config: ConfigHandle) {
    loop {
        match shared.next_request() {
            Next::Run(request) => execute(&shared, &engine, &config, request).await,
            Next::Idle => shared.wake.notified().await,
            Next::Stop => break,
        }
    }
    debug!("Search worker exiting");
}

#[instrument(skip_all, fields(caller = %request.caller, generation = request.generation))]
async fn execute(
    shared: &Shared,
    engine: &HybridSearchEngine,
    config: &ConfigHandle,
    request: Pending,
) {
    let options = request.options.unwrap_or_else(|| config.current());
    let result = engine
        .search(&request.query, &options)
        .await
        .map(SearchOutcome::Completed);
    shared.completed.fetch_add(1, Ordering::Relaxed);
    if request.reply.send(result).is_err() {
        debug!("Caller stopped waiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkerConfig;
    use crate::search::SourceDocument;
    use crate::storage::InMemoryDocumentStore;
    use crate::test_utils::MockProvider;
    use std::time::Duration;

    async fn engine_with(provider: MockProvider) -> Arc<HybridSearchEngine> {
        engine_sharing(Arc::new(provider)).await
    }

    async fn engine_sharing(provider: Arc<MockProvider>) -> Arc<HybridSearchEngine> {
        let engine = HybridSearchEngine::open(
            Arc::new(InMemoryDocumentStore::new()),
            provider,
            ChunkerConfig::default(),
        )
        .await
        .unwrap();
        for (path, text) in [
            ("cars.md", "Cars and trucks share the road"),
            ("bread.md", "Baking bread needs flour"),
            ("rain.md", "Rain and snow in the forecast"),
        ] {
            engine
                .index_file(&SourceDocument::new(path, text, 1))
                .await
                .unwrap();
        }
        Arc::new(engine)
    }

    #[tokio::test]
    async fn test_new_request_supersedes_pending_one() {
        let manager = SearchManager::new(
            engine_with(MockProvider::default()).await,
            ConfigHandle::default(),
        );

        let first = manager.submit("X", "bread", None).unwrap();
        let second = manager.submit("X", "cars", None).unwrap();
        assert_eq!(first.generation(), 1);
        assert_eq!(second.generation(), 2);

        assert_eq!(first.wait().await.unwrap(), SearchOutcome::Superseded);
        let results = second.wait().await.unwrap().into_results().unwrap();
        assert_eq!(results[0].file_path, "cars.md");

        let stats = manager.stats();
        assert_eq!(stats.superseded, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_other_callers_are_not_superseded() {
        let manager = SearchManager::new(
            engine_with(MockProvider::default()).await,
            ConfigHandle::default(),
        );

        let x = manager.submit("X", "bread", None).unwrap();
        let y = manager.submit("Y", "rain", None).unwrap();
        let x2 = manager.submit("X", "cars", None).unwrap();

        assert!(x.wait().await.unwrap().is_superseded());
        let y_results = y.wait().await.unwrap().into_results().unwrap();
        assert_eq!(y_results[0].file_path, "rain.md");
        assert!(!x2.wait().await.unwrap().is_superseded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_request_is_not_cancelled() {
        let provider = MockProvider::default().with_delay(Duration::from_millis(50));
        let manager = SearchManager::new(engine_with(provider).await, ConfigHandle::default());

        let first = manager.submit("X", "bread", None).unwrap();
        // Let the worker pick it up and block inside the provider
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(manager.stats().pending, 0);

        let second = manager.submit("X", "cars", None).unwrap();
        let first = first.wait().await.unwrap().into_results().unwrap();
        assert_eq!(first[0].file_path, "bread.md");
        assert!(!second.wait().await.unwrap().is_superseded());
        assert_eq!(manager.stats().superseded, 0);
        assert_eq!(manager.stats().completed, 2);
    }

    #[tokio::test]
    async fn test_default_options_come_from_config() {
        let config = ConfigHandle::default();
        let manager = SearchManager::new(engine_with(MockProvider::default()).await, config.clone());

        config.update(|opts| opts.top_k = 1).unwrap();
        let results = manager
            .search("X", "cars bread rain", None)
            .await
            .unwrap()
            .into_results()
            .unwrap();
        assert_eq!(results.len(), 1);

        // Explicit options win over the handle
        let explicit = SearchOptions {
            top_k: 3,
            ..Default::default()
        };
        let results = manager
            .search("X", "cars bread rain", Some(explicit))
            .await
            .unwrap()
            .into_results()
            .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_search_errors_are_reported() {
        let provider = Arc::new(MockProvider::default());
        let manager = SearchManager::new(engine_sharing(provider.clone()).await, ConfigHandle::default());

        provider.fail_all(true);
        let err = manager.search("X", "cars", None).await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::Search(SearchError::EmbeddingError(_))
        ));
        assert_eq!(manager.stats().completed, 1);

        // Invalid explicit options never reach the worker
        let bad = SearchOptions {
            top_k: 0,
            ..Default::default()
        };
        let err = manager.search("X", "cars", Some(bad)).await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::Search(SearchError::InvalidQuery(_))
        ));
        assert_eq!(manager.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_pending_and_new_requests() {
        let manager = SearchManager::new(
            engine_with(MockProvider::default()).await,
            ConfigHandle::default(),
        );

        let pending = manager.submit("X", "cars", None).unwrap();
        manager.shutdown().await;

        assert!(matches!(pending.wait().await, Err(ManagerError::Shutdown)));
        assert!(matches!(
            manager.submit("Y", "bread", None),
            Err(ManagerError::Shutdown)
        ));
        assert_eq!(manager.stats().completed, 0);
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_without_superseding() {
        let manager = SearchManager::new(
            engine_with(MockProvider::default()).await,
            ConfigHandle::default(),
        );

        let valid = manager.submit("X", "bread", None).unwrap();
        let mut zero_weights = SearchOptions::default();
        zero_weights.weights.embedding = 0.0;
        zero_weights.weights.bm25 = 0.0;
        let rejected = manager.submit("X", "cars", Some(zero_weights));
        assert!(matches!(
            rejected,
            Err(ManagerError::Search(SearchError::InvalidQuery(_)))
        ));

        let results = valid.wait().await.unwrap().into_results().unwrap();
        assert_eq!(results[0].file_path, "bread.md");
        let stats = manager.stats();
        assert_eq!(stats.superseded, 0);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_drop_fails_queued_requests_without_running_them() {
        let provider = Arc::new(MockProvider::default());
        let manager = SearchManager::new(engine_sharing(provider.clone()).await, ConfigHandle::default());
        let calls_before = provider.embed_calls.load(std::sync::atomic::Ordering::SeqCst);

        // The worker has not run yet: both requests are still queued
        let x = manager.submit("X", "bread", None).unwrap();
        let y = manager.submit("Y", "cars", None).unwrap();
        drop(manager);

        assert!(matches!(x.wait().await, Err(ManagerError::Shutdown)));
        assert!(matches!(y.wait().await, Err(ManagerError::Shutdown)));
        tokio::task::yield_now().await;
        assert_eq!(
            provider.embed_calls.load(std::sync::atomic::Ordering::SeqCst),
            calls_before
        );
    }

    #[tokio::test]
    async fn test_idle_callers_are_forgotten() {
        let manager = SearchManager::new(
            engine_with(MockProvider::default()).await,
            ConfigHandle::default(),
        );

        for caller in ["a", "b", "c"] {
            manager
                .search(caller, "bread", None)
                .await
                .unwrap()
                .into_results()
                .unwrap();
        }
        assert!(manager.shared.lock().generations.is_empty());

        // A queued request keeps its caller's counter
        let queued = manager.submit("a", "cars", None).unwrap();
        assert_eq!(queued.generation(), 1);
        assert_eq!(manager.shared.lock().generations.get("a"), Some(&1));
        queued.wait().await.unwrap();
        assert!(manager.shared.lock().generations.is_empty());
    }
}

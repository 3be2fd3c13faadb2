//! The query session: routes text through the heuristic parser or the remote
//! resolver, applies the result, and keeps history.
//!
//! Every submission takes a generation number. The only suspension points are
//! the debounce sleep and the remote call; after each, an attempt whose
//! generation is no longer current is discarded without touching history or
//! listeners. A stale remote attempt also stops retrying.

use crate::dataset::{Dataset, Row};
use crate::heuristic::HeuristicParser;
use crate::history::{HistoryEntry, QueryHistory, ResolutionSource};
use crate::interpreter;
use crate::query::ResolvedQuery;
use crate::remote::RemoteResolver;
use chrono::Utc;
use smartquery_common::{Config, EngineConfig, ResolutionError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub rows: Vec<Arc<Row>>,
    pub resolved: ResolvedQuery,
    pub analysis: Option<String>,
    pub source: ResolutionSource,
}

#[derive(Debug, Error)]
pub enum QueryFailure {
    #[error("superseded by a newer query")]
    Superseded,
    #[error("query session closed")]
    Cancelled,
    /// Resolution failed; `fallback` is the unfiltered dataset.
    #[error("{error}")]
    Resolution {
        error: ResolutionError,
        fallback: Vec<Arc<Row>>,
    },
}

type Listener = Arc<dyn Fn(&[Arc<Row>]) + Send + Sync>;

pub struct QueryEngine {
    dataset: Arc<Dataset>,
    heuristic: HeuristicParser,
    remote: Option<RemoteResolver>,
    history: Mutex<QueryHistory>,
    listeners: Mutex<Vec<Listener>>,
    generation: AtomicU64,
    closed: AtomicBool,
    debounce: Duration,
    sample_rows: usize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl QueryEngine {
    /// Heuristic-only session with default settings.
    pub fn new(dataset: Dataset) -> Self {
        let dataset = Arc::new(dataset);
        let heuristic = HeuristicParser::new(dataset.columns()).with_value_index(&dataset);
        let defaults = EngineConfig::default();
        Self {
            dataset,
            heuristic,
            remote: None,
            history: Mutex::new(QueryHistory::with_capacity(defaults.history_capacity)),
            listeners: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            debounce: Duration::from_millis(defaults.debounce_ms),
            sample_rows: defaults.sample_rows,
        }
    }

    pub fn with_remote(mut self, remote: RemoteResolver) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_settings(mut self, cfg: &EngineConfig) -> Self {
        self.history = Mutex::new(QueryHistory::with_capacity(cfg.history_capacity));
        self.debounce = Duration::from_millis(cfg.debounce_ms);
        self.sample_rows = cfg.sample_rows;
        self
    }

    /// Build from a loaded config. Without a credential, or with
    /// `heuristic_only`, no remote call is ever made.
    pub fn from_config(dataset: Dataset, config: &Config, heuristic_only: bool) -> Result<Self, ResolutionError> {
        let mut engine = Self::new(dataset).with_settings(&config.engine);
        if !heuristic_only {
            if let Some(remote) = RemoteResolver::from_config(config)? {
                info!(provider = remote.provider_name(), "remote resolver enabled");
                engine = engine.with_remote(remote);
            }
        }
        Ok(engine)
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn remote_available(&self) -> bool {
        self.remote.is_some()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        lock(&self.history).list()
    }

    /// Called with the resulting rows after every successful resolution.
    /// Listeners run outside the registry lock and may register others.
    pub fn on_data_change(&self, listener: impl Fn(&[Arc<Row>]) + Send + Sync + 'static) {
        lock(&self.listeners).push(Arc::new(listener));
    }

    /// Tear down the session. In-flight attempts resolve to `Cancelled`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn submit_query(&self, text: &str) -> Result<QueryOutcome, QueryFailure> {
        let generation = self.next_generation();
        self.run(generation, text).await
    }

    /// Wait out the debounce window; only the latest submission proceeds.
    pub async fn submit_debounced(&self, text: &str) -> Result<QueryOutcome, QueryFailure> {
        let generation = self.next_generation();
        tokio::time::sleep(self.debounce).await;
        self.ensure_current(generation)?;
        self.run(generation, text).await
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn ensure_current(&self, generation: u64) -> Result<(), QueryFailure> {
        if self.is_closed() {
            return Err(QueryFailure::Cancelled);
        }
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "discarding stale attempt");
            return Err(QueryFailure::Superseded);
        }
        Ok(())
    }

    async fn run(&self, generation: u64, text: &str) -> Result<QueryOutcome, QueryFailure> {
        self.ensure_current(generation)?;
        let query = text.trim();
        if query.is_empty() {
            return Ok(self.commit(query, ResolvedQuery::default(), ResolutionSource::Reset));
        }
        if let Some(resolved) = self.heuristic.resolve(query) {
            return Ok(self.commit(query, resolved, ResolutionSource::Heuristic));
        }
        let Some(remote) = &self.remote else {
            return Err(self.failure(query, ResolutionError::UnrecognizedQuery));
        };
        let sample = self.dataset.sample(self.sample_rows);
        let keep_going = || self.ensure_current(generation).is_ok();
        let result = remote
            .resolve_while(query, self.dataset.columns(), &sample, keep_going)
            .await;
        self.ensure_current(generation)?;
        match result {
            Ok(resolved) => Ok(self.commit(query, resolved, ResolutionSource::Remote)),
            Err(e) => Err(self.failure(query, e)),
        }
    }

    fn commit(&self, query: &str, resolved: ResolvedQuery, source: ResolutionSource) -> QueryOutcome {
        let rows = interpreter::apply(self.dataset.rows(), &resolved);
        info!(query, ?source, rows = rows.len(), "query resolved");
        lock(&self.history).record(HistoryEntry {
            query: query.to_string(),
            timestamp: Utc::now(),
            result_count: rows.len(),
            analysis: resolved.analysis.clone(),
            source,
        });
        let listeners: Vec<Listener> = lock(&self.listeners).clone();
        for listener in &listeners {
            listener(&rows);
        }
        QueryOutcome {
            analysis: resolved.analysis.clone(),
            rows,
            resolved,
            source,
        }
    }

    fn failure(&self, query: &str, error: ResolutionError) -> QueryFailure {
        warn!(query, error = %error, "query resolution failed");
        QueryFailure::Resolution {
            error,
            fallback: self.dataset.all_rows(),
        }
    }
}

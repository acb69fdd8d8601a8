//! Query engine: the shared coordinator every transport calls into.
//!
//! A request takes a repo snapshot, checks the cache, resolves identities, asks the
//! orchestrator for backend answers, ranks or analyzes them, and leaves with a
//! provenance envelope that is cached against the snapshot.

mod analysis;
mod lookup;

pub use analysis::{
    ArchitectureRequest, ArchitectureResult, CallGraphRequest, CallGraphResult, ImpactRequest,
    ImpactResult,
};
pub use lookup::{
    FindReferencesRequest, GetSymbolRequest, ReferencesResult, ResolvedTarget, SearchRequest,
    SearchResult, SymbolResult,
};

use crate::backend::{BackendAnswer, BackendHandle, CallBudget, IndexStaleness, SymbolBackend};
use crate::backends::{GitSignals, IndexBackend, SyntaxBackend};
use crate::cache::{CacheStats, QueryCache};
use crate::envelope::{Envelope, Provenance};
use crate::fusion::{FusionParams, FusionWeights};
use crate::graph::SymbolGraphExport;
use crate::identity::{
    IdentityResolver, IdentityStore, ReconcileReport, SqliteIdentityStore, mapping_from_symbol,
    reconcile,
};
use crate::jobs::{JobRunner, JobRunnerStats, JobStore};
use crate::orchestrator::{Orchestrator, Outcome};
use crate::repo_state::{ObservedState, RepoStateTracker};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sextant_core::config::Config;
use sextant_core::error::QueryError;
use sextant_core::ids::generate_project_id;
use sextant_core::time::now_iso8601;
use sextant_core::types::{
    BackendId, Capability, CompletenessInfo, CompletenessReason, MergeMode, RepoSnapshot,
    RepoStateMode,
};
use sextant_state::jobs::JobRecord;
use sextant_state::{db, schema};
use sextant_vcs::{ActivityProvider, Git2Repository, RepoStateProvider};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cache key prefix shared by derived views; refresh jobs drop everything under it.
pub(crate) const VIEW_PREFIX: &str = "view-";

pub(crate) struct EngineInner {
    pub(crate) config: Config,
    pub(crate) repo_root: PathBuf,
    pub(crate) tracker: RepoStateTracker,
    pub(crate) orchestrator: Orchestrator,
    pub(crate) resolver: IdentityResolver,
    pub(crate) signals: Option<GitSignals>,
    pub(crate) cache: QueryCache,
    pub(crate) jobs: JobRunner,
    pub(crate) weights: FusionWeights,
    pub(crate) params: FusionParams,
    /// Last staleness verdict, keyed by `indexed..head`.
    pub(crate) staleness: RwLock<Option<(String, IndexStaleness)>>,
}

/// Cheap to clone; every clone shares the same caches, stores and job runner.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    pub backend_id: BackendId,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub priority: u8,
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub repo_root: String,
    pub repo_state: RepoSnapshot,
    pub repo_state_mode: RepoStateMode,
    pub backends: Vec<BackendStatus>,
    pub index_stale: bool,
    pub cache: CacheStats,
    pub jobs: JobRunnerStats,
    pub fusion_policy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearCacheResult {
    pub entries_dropped: usize,
}

/// Wiring for an engine. `Engine::open` covers the usual case; tests plug fakes in here.
pub struct EngineBuilder {
    config: Config,
    repo_root: PathBuf,
    repo_state: Option<Arc<dyn RepoStateProvider>>,
    activity: Option<Arc<dyn ActivityProvider>>,
    backends: Vec<BackendHandle>,
    state_db: Option<PathBuf>,
}

impl EngineBuilder {
    pub fn new(repo_root: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            config,
            repo_root: repo_root.into(),
            repo_state: None,
            activity: None,
            backends: Vec::new(),
            state_db: None,
        }
    }

    pub fn repo_state(mut self, provider: Arc<dyn RepoStateProvider>) -> Self {
        self.repo_state = Some(provider);
        self
    }

    pub fn activity(mut self, provider: Arc<dyn ActivityProvider>) -> Self {
        self.activity = Some(provider);
        self
    }

    pub fn backend(mut self, handle: BackendHandle) -> Self {
        self.backends.push(handle);
        self
    }

    /// Persist identities and jobs in this SQLite file instead of memory.
    pub fn state_db(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_db = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Engine, QueryError> {
        let config = self.config;
        let identity_conn = open_state(self.state_db.as_deref(), &config)?;
        let jobs_conn = open_state(self.state_db.as_deref(), &config)?;

        let store: Arc<dyn IdentityStore> = Arc::new(SqliteIdentityStore::new(identity_conn));
        let job_store = Arc::new(JobStore::new(jobs_conn));
        let jobs = JobRunner::start(job_store, &config.jobs);

        let signals = match (&self.activity, config.signals.enabled) {
            (Some(provider), true) => Some(GitSignals::new(
                Arc::clone(provider),
                config.signals.recency_half_life_days,
                config.signals.max_commits,
            )),
            _ => None,
        };

        let inner = EngineInner {
            tracker: RepoStateTracker::new(
                self.repo_state,
                Duration::from_millis(config.repo_state.freshness_window_ms),
            ),
            orchestrator: Orchestrator::new(self.backends, &config.backends),
            resolver: IdentityResolver::new(store),
            signals,
            cache: QueryCache::new(config.cache.max_entries),
            jobs,
            weights: FusionWeights::from_config(&config.ranking),
            params: FusionParams::from_config(&config.ranking),
            staleness: RwLock::new(None),
            repo_root: self.repo_root,
            config,
        };
        Ok(Engine {
            inner: Arc::new(inner),
        })
    }
}

fn open_state(path: Option<&Path>, config: &Config) -> Result<Connection, QueryError> {
    let conn = match path {
        Some(path) => db::open_with_storage_config(path, &config.storage)?,
        None => db::open_in_memory()?,
    };
    schema::create_tables(&conn)?;
    Ok(conn)
}

impl Engine {
    /// Engine for `repo_root` with the stock collaborators: git2 for repo state and
    /// activity, the JSON index snapshot when present, and the syntax fallback.
    /// Identities are reconciled against the index before returning.
    pub fn open(repo_root: &Path, config: Config) -> Result<Self, QueryError> {
        let mut builder = EngineBuilder::new(repo_root, config.clone());

        match Git2Repository::open(repo_root) {
            Ok(repo) => {
                let repo = Arc::new(repo);
                builder = builder
                    .repo_state(Arc::clone(&repo) as Arc<dyn RepoStateProvider>)
                    .activity(repo as Arc<dyn ActivityProvider>);
            }
            Err(e) => warn!(error = %e, "No git repository; repo state will be unknown"),
        }

        let index_path = config.index_snapshot_path(repo_root);
        let index = if index_path.is_file() {
            match IndexBackend::load(&index_path) {
                Ok(backend) => BackendHandle::available(Arc::new(backend)),
                Err(e) => {
                    warn!(path = %index_path.display(), error = %e, "Index snapshot unusable");
                    BackendHandle::unavailable(BackendId::Index, e.to_string())
                }
            }
        } else {
            BackendHandle::unavailable(
                BackendId::Index,
                format!("no index snapshot at {}", index_path.display()),
            )
        };

        let project_id = generate_project_id(&repo_root.display().to_string());
        builder = builder
            .backend(index)
            .backend(BackendHandle::unavailable(
                BackendId::Lsp,
                "no language server supervisor configured",
            ))
            .backend(BackendHandle::available(Arc::new(SyntaxBackend::new(
                repo_root,
                config.syntax.extensions.clone(),
                config.syntax.max_file_size,
            ))))
            .state_db(config.state_db_path(&project_id));

        let engine = builder.build()?;
        match engine.sync_identities() {
            Ok(report) if report != ReconcileReport::default() => {
                info!(?report, "Reconciled symbol identities");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Identity reconciliation skipped"),
        }
        info!(root = %repo_root.display(), project_id = %project_id, "Query engine ready");
        Ok(engine)
    }

    pub fn builder(repo_root: impl Into<PathBuf>, config: Config) -> EngineBuilder {
        EngineBuilder::new(repo_root, config)
    }

    pub(crate) fn from_inner(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn repo_root(&self) -> &Path {
        &self.inner.repo_root
    }

    /// Record the symbols the graph backend currently exports as active identities,
    /// aliasing or tombstoning the ones that disappeared.
    pub fn sync_identities(&self) -> Result<ReconcileReport, QueryError> {
        let observed = self.observe(RepoStateMode::Head);
        let outcome = self.graph_export();
        let Some(export) = outcome.items.into_iter().next() else {
            debug!("No symbol graph backend answered; identities unchanged");
            return Ok(ReconcileReport::default());
        };
        let native = outcome
            .used
            .first()
            .and_then(|id| self.inner.orchestrator.backend(*id));

        let now = now_iso8601();
        let state_id = observed.snapshot.id.as_str();
        let mappings: Vec<_> = export
            .symbols
            .iter()
            .map(|symbol| {
                let backend_id = native
                    .as_ref()
                    .and_then(|backend| backend.native_id(&symbol.stable_id));
                mapping_from_symbol(symbol, backend_id.as_deref(), state_id, &now)
            })
            .collect();
        let report = reconcile(
            self.inner.resolver.store().as_ref(),
            &mappings,
            state_id,
            &now,
        )?;
        Ok(report)
    }

    pub fn get_status(&self) -> StatusReport {
        let observed = self.observe(RepoStateMode::Head);
        let backends = self
            .inner
            .orchestrator
            .handles()
            .iter()
            .map(|handle| {
                let resolved = handle.resolve();
                let (priority, indexed_commit) = match handle {
                    BackendHandle::Available(backend) => (
                        backend.priority(),
                        backend.freshness().and_then(|f| f.indexed_commit),
                    ),
                    BackendHandle::Unavailable { id, .. } => (id.default_priority(), None),
                };
                BackendStatus {
                    backend_id: handle.id(),
                    available: resolved.is_ok(),
                    reason: resolved.err(),
                    priority,
                    capabilities: handle.capabilities(),
                    indexed_commit,
                }
            })
            .collect();

        StatusReport {
            repo_root: self.inner.repo_root.display().to_string(),
            index_stale: self.index_staleness(&observed).is_some(),
            repo_state: observed.snapshot,
            repo_state_mode: observed.mode,
            backends,
            cache: self.inner.cache.stats(),
            jobs: self.inner.jobs.stats(),
            fusion_policy: self.inner.weights.policy_version.clone(),
        }
    }

    /// Drop every cached response and derived signal.
    pub fn clear_cache(&self) -> ClearCacheResult {
        let entries_dropped = self.inner.cache.invalidate_all();
        self.inner.tracker.invalidate();
        if let Some(signals) = &self.inner.signals {
            signals.invalidate();
        }
        info!(entries_dropped, "Query cache cleared");
        ClearCacheResult { entries_dropped }
    }

    pub fn get_job(&self, job_id: &str) -> Result<JobRecord, QueryError> {
        self.inner.jobs.get(job_id)
    }

    pub fn list_jobs(&self, limit: usize) -> Result<Vec<JobRecord>, QueryError> {
        self.inner.jobs.list(limit)
    }

    pub fn cancel_job(&self, job_id: &str) -> Result<JobRecord, QueryError> {
        self.inner.jobs.cancel(job_id)
    }

    /// Stop accepting jobs and wait for running ones.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.jobs.stop(timeout)
    }

    /// Snapshot for one request. The index is re-graded against its HEAD so every
    /// answer read from a lagging index reports `index-stale`.
    pub(crate) fn observe(&self, mode: RepoStateMode) -> ObservedState {
        let observed = self.inner.tracker.get_snapshot(mode);
        let ceiling = self
            .index_staleness(&observed)
            .map(|staleness| staleness.completeness());
        self.inner.orchestrator.set_ceiling(BackendId::Index, ceiling);
        observed
    }

    /// How far the index lags HEAD; `None` when it is current or either side is unknown.
    pub(crate) fn index_staleness(&self, observed: &ObservedState) -> Option<IndexStaleness> {
        let head = observed.snapshot.head_commit.as_str();
        if head.is_empty() || observed.snapshot.is_unknown() {
            return None;
        }
        let indexed = self
            .inner
            .orchestrator
            .backend(BackendId::Index)?
            .freshness()?
            .indexed_commit
            .filter(|commit| !commit.is_empty())?;
        if indexed == head {
            return None;
        }

        let key = format!("{indexed}..{head}");
        if let Ok(guard) = self.inner.staleness.read()
            && let Some((cached_key, staleness)) = guard.as_ref()
            && *cached_key == key
        {
            return Some(staleness.clone());
        }
        let staleness = IndexStaleness {
            commits_behind: self.inner.tracker.commits_between(&indexed, head),
            indexed_commit: indexed,
            head_commit: head.to_string(),
        };
        debug!(behind = ?staleness.commits_behind, "Index snapshot is stale");
        if let Ok(mut guard) = self.inner.staleness.write() {
            *guard = Some((key, staleness.clone()));
        }
        Some(staleness)
    }

    /// Symbol graph export from the most precise backend that has one.
    pub(crate) fn graph_export(&self) -> Outcome<SymbolGraphExport> {
        self.inner.orchestrator.execute(
            Capability::SymbolGraph,
            MergeMode::PreferFirst,
            |backend: &dyn SymbolBackend, budget: &CallBudget| {
                let export = backend.symbol_graph(budget)?;
                Ok(BackendAnswer::new(
                    export.into_iter().collect(),
                    CompletenessInfo::new(1.0, CompletenessReason::FullBackend),
                ))
            },
            |_| (),
        )
    }

    /// Cached envelope for `key`, re-stamped as a hit with fresh timing.
    pub(crate) fn cached<T: DeserializeOwned>(
        &self,
        key: &str,
        observed: &ObservedState,
        started: Instant,
    ) -> Option<Envelope<T>> {
        let hit = self.inner.cache.get(key, &observed.snapshot.id)?;
        match serde_json::from_value::<Envelope<T>>(hit.payload) {
            Ok(mut envelope) => {
                envelope.provenance.mark_cached(hit.cached_at);
                envelope.provenance.repo_state_mode = observed.mode;
                envelope.provenance = envelope.provenance.finish(started);
                debug!(key, "Cache hit");
                Some(envelope)
            }
            Err(e) => {
                warn!(key, error = %e, "Cached payload unreadable; recomputing");
                None
            }
        }
    }

    /// Remember `envelope` unless part of it timed out.
    pub(crate) fn store<T: Serialize>(&self, key: &str, envelope: &Envelope<T>, ttl: Duration) {
        if !envelope.provenance.timeouts.is_empty() {
            return;
        }
        match serde_json::to_value(envelope) {
            Ok(payload) => {
                self.inner
                    .cache
                    .set(key, payload, &envelope.provenance.repo_state_id, ttl)
            }
            Err(e) => warn!(key, error = %e, "Failed to serialize response for cache"),
        }
    }

    pub(crate) fn query_ttl(&self) -> Duration {
        Duration::from_secs(self.inner.config.cache.query_ttl_seconds)
    }

    pub(crate) fn view_ttl(&self) -> Duration {
        Duration::from_secs(self.inner.config.cache.view_ttl_seconds)
    }

    pub(crate) fn warn_if_stale(
        &self,
        observed: &ObservedState,
        provenance: &mut Provenance,
    ) -> bool {
        match self.index_staleness(observed) {
            Some(staleness) => {
                provenance.warn(staleness.warning());
                true
            }
            None => false,
        }
    }
}

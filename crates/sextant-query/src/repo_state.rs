use sextant_core::time::now_iso8601;
use sextant_core::types::{RepoSnapshot, RepoStateMode};
use sextant_vcs::RepoStateProvider;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Snapshot plus the mode the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedState {
    pub snapshot: RepoSnapshot,
    pub mode: RepoStateMode,
}

/// Caches the repository fingerprint for a short freshness window.
pub struct RepoStateTracker {
    provider: Option<Arc<dyn RepoStateProvider>>,
    window: Duration,
    cached: RwLock<Option<(Instant, RepoSnapshot)>>,
}

impl RepoStateTracker {
    pub fn new(provider: Option<Arc<dyn RepoStateProvider>>, window: Duration) -> Self {
        Self {
            provider,
            window,
            cached: RwLock::new(None),
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Current snapshot; the `unknown` sentinel when the VCS is absent or failing.
    pub fn get_snapshot(&self, mode: RepoStateMode) -> ObservedState {
        if let Ok(guard) = self.cached.read()
            && let Some((at, snapshot)) = guard.as_ref()
            && at.elapsed() < self.window
        {
            return ObservedState {
                snapshot: snapshot.clone(),
                mode,
            };
        }

        let Some(provider) = self.provider.as_ref() else {
            return ObservedState {
                snapshot: RepoSnapshot::unknown(now_iso8601()),
                mode,
            };
        };

        let snapshot = match provider.compute_repo_state() {
            Ok(snapshot) => {
                debug!(id = %snapshot.id, dirty = snapshot.dirty, "Computed repo snapshot");
                if let Ok(mut guard) = self.cached.write() {
                    *guard = Some((Instant::now(), snapshot.clone()));
                }
                snapshot
            }
            Err(e) => {
                warn!(error = %e, "Repo state unavailable; using unknown snapshot");
                RepoSnapshot::unknown(now_iso8601())
            }
        };
        ObservedState { snapshot, mode }
    }

    /// How far `to` is ahead of `from`, when the VCS can say.
    pub fn commits_between(&self, from: &str, to: &str) -> Option<usize> {
        let provider = self.provider.as_ref()?;
        match provider.commits_between(from, to) {
            Ok(count) => count,
            Err(e) => {
                debug!(from, to, error = %e, "Cannot count commits between revisions");
                None
            }
        }
    }

    /// Drop the cached snapshot so the next call recomputes.
    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.cached.write() {
            *guard = None;
        }
    }
}

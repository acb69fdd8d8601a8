use crate::graph::SymbolGraphExport;
use crate::scope::ScopeFilter;
use sextant_core::error::BackendError;
use sextant_core::types::{
    BackendId, Capability, CompletenessInfo, CompletenessReason, ReferenceInfo, SymbolInfo,
    SymbolKind,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Deadline plus a shared cancel flag handed to every backend call.
///
/// Backends poll `check()` between units of work; the orchestrator flips the
/// flag when it stops waiting.
#[derive(Debug, Clone)]
pub struct CallBudget {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl CallBudget {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn check(&self) -> Result<(), BackendError> {
        if self.is_cancelled() || self.is_expired() {
            Err(BackendError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub query: String,
    pub scope: Option<ScopeFilter>,
    pub kinds: Vec<SymbolKind>,
    pub max_results: usize,
}

impl SearchOptions {
    pub fn accepts(&self, symbol: &SymbolInfo) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&symbol.kind) {
            return false;
        }
        match (&self.scope, &symbol.location) {
            (Some(scope), Some(loc)) => scope.matches(&loc.path),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefOptions {
    pub scope: Option<ScopeFilter>,
    pub include_tests: bool,
    pub max_results: usize,
}

impl RefOptions {
    pub fn accepts(&self, reference: &ReferenceInfo) -> bool {
        if !self.include_tests && reference.is_test {
            return false;
        }
        self.scope
            .as_ref()
            .is_none_or(|scope| scope.matches(&reference.location.path))
    }
}

/// Items plus the completeness the backend claims for them.
#[derive(Debug, Clone)]
pub struct BackendAnswer<T> {
    pub items: Vec<T>,
    pub completeness: CompletenessInfo,
}

impl<T> BackendAnswer<T> {
    pub fn new(items: Vec<T>, completeness: CompletenessInfo) -> Self {
        Self {
            items,
            completeness,
        }
    }
}

/// Commit the backend's data was produced from, when it knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFreshness {
    pub indexed_commit: Option<String>,
    pub generated_at: Option<String>,
}

/// How far an index snapshot lags the checked-out HEAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStaleness {
    pub indexed_commit: String,
    pub head_commit: String,
    /// `None` when the indexed commit is not in local history.
    pub commits_behind: Option<usize>,
}

impl IndexStaleness {
    pub fn score(&self) -> f64 {
        match self.commits_behind {
            None | Some(0) => 0.95,
            Some(n) if n <= 5 => 0.9,
            Some(n) if n <= 20 => 0.7,
            Some(n) if n <= 50 => 0.5,
            Some(_) => 0.3,
        }
    }

    pub fn warning(&self) -> String {
        match self.commits_behind {
            Some(n) if n > 0 => format!(
                "index snapshot is {n} commit(s) behind HEAD {}; regenerate the index",
                self.head_commit
            ),
            _ => format!(
                "index snapshot was built from {}, not HEAD {}; regenerate the index",
                self.indexed_commit, self.head_commit
            ),
        }
    }

    /// Completeness for anything read from the lagging index.
    pub fn completeness(&self) -> CompletenessInfo {
        CompletenessInfo::new(self.score(), CompletenessReason::IndexStale)
            .with_details(self.warning())
    }
}

/// A capability-tagged analysis source.
pub trait SymbolBackend: Send + Sync {
    fn id(&self) -> BackendId;

    fn priority(&self) -> u8 {
        self.id().default_priority()
    }

    fn capabilities(&self) -> &[Capability];

    /// Checked at call time, never cached by the orchestrator.
    fn is_available(&self) -> bool;

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    fn get_symbol(
        &self,
        stable_id: &str,
        budget: &CallBudget,
    ) -> Result<BackendAnswer<SymbolInfo>, BackendError>;

    fn search_symbols(
        &self,
        options: &SearchOptions,
        budget: &CallBudget,
    ) -> Result<BackendAnswer<SymbolInfo>, BackendError>;

    fn find_references(
        &self,
        stable_id: &str,
        options: &RefOptions,
        budget: &CallBudget,
    ) -> Result<BackendAnswer<ReferenceInfo>, BackendError>;

    fn symbol_graph(
        &self,
        _budget: &CallBudget,
    ) -> Result<Option<SymbolGraphExport>, BackendError> {
        Ok(None)
    }

    fn freshness(&self) -> Option<IndexFreshness> {
        None
    }

    /// Backend-native id for a stable id, used to detect renames across refreshes.
    fn native_id(&self, _stable_id: &str) -> Option<String> {
        None
    }
}

/// Registry slot for an optional backend.
#[derive(Clone)]
pub enum BackendHandle {
    Available(Arc<dyn SymbolBackend>),
    Unavailable {
        id: BackendId,
        reason: String,
        capabilities: Vec<Capability>,
    },
}

impl BackendHandle {
    pub fn available(backend: Arc<dyn SymbolBackend>) -> Self {
        Self::Available(backend)
    }

    /// Absent backend that would have served its kind's default capabilities.
    pub fn unavailable(id: BackendId, reason: impl Into<String>) -> Self {
        Self::unavailable_for(id, reason, id.default_capabilities())
    }

    pub fn unavailable_for(
        id: BackendId,
        reason: impl Into<String>,
        capabilities: &[Capability],
    ) -> Self {
        Self::Unavailable {
            id,
            reason: reason.into(),
            capabilities: capabilities.to_vec(),
        }
    }

    pub fn id(&self) -> BackendId {
        match self {
            Self::Available(backend) => backend.id(),
            Self::Unavailable { id, .. } => *id,
        }
    }

    /// The backend, if it exists and reports itself available right now.
    pub fn resolve(&self) -> Result<&Arc<dyn SymbolBackend>, String> {
        match self {
            Self::Available(backend) if backend.is_available() => Ok(backend),
            Self::Available(backend) => Err(format!("{} backend is not ready", backend.id())),
            Self::Unavailable { reason, .. } => Err(reason.clone()),
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match self {
            Self::Available(backend) => backend.supports(capability),
            Self::Unavailable { capabilities, .. } => capabilities.contains(&capability),
        }
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        match self {
            Self::Available(backend) => backend.capabilities().to_vec(),
            Self::Unavailable { capabilities, .. } => capabilities.clone(),
        }
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available(backend) => f
                .debug_struct("Available")
                .field("id", &backend.id())
                .finish(),
            Self::Unavailable { id, reason, .. } => f
                .debug_struct("Unavailable")
                .field("id", id)
                .field("reason", reason)
                .finish(),
        }
    }
}

/// Member name encoded in a stable id: `src/a/Owner#run()` -> `run`.
pub fn name_from_stable_id(stable_id: &str) -> &str {
    let tail = stable_id
        .rsplit_once('#')
        .map(|(_, member)| member)
        .or_else(|| stable_id.rsplit_once('/').map(|(_, item)| item))
        .unwrap_or(stable_id);
    tail.trim_end_matches("()")
}

/// Structural owner prefix of a member id: `src/a/Owner#run()` -> `src/a/Owner`.
pub fn owner_of_stable_id(stable_id: &str) -> Option<&str> {
    stable_id.split_once('#').map(|(owner, _)| owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sextant_core::types::{Location, ReferenceKind, VisibilityInfo};

    #[test]
    fn budget_cancel_is_shared_between_clones() {
        let budget = CallBudget::new(Duration::from_secs(60));
        let clone = budget.clone();
        assert!(budget.check().is_ok());
        clone.cancel();
        assert!(budget.is_cancelled());
        assert_eq!(budget.check(), Err(BackendError::Cancelled));
    }

    #[test]
    fn zero_budget_expires_immediately() {
        let budget = CallBudget::new(Duration::ZERO);
        assert!(budget.is_expired());
        assert!(CallBudget::unbounded().remaining().is_none());
    }

    #[test]
    fn stable_id_helpers() {
        assert_eq!(name_from_stable_id("src/engine/Engine#search()"), "search");
        assert_eq!(name_from_stable_id("src/util/parse()"), "parse");
        assert_eq!(name_from_stable_id("Engine"), "Engine");
        assert_eq!(
            owner_of_stable_id("src/engine/Engine#search()"),
            Some("src/engine/Engine")
        );
        assert_eq!(owner_of_stable_id("src/util/parse()"), None);
    }

    #[test]
    fn search_options_filter_by_kind() {
        let symbol = SymbolInfo {
            stable_id: "a/A".into(),
            name: "A".into(),
            kind: SymbolKind::Struct,
            container: None,
            module_id: "a".into(),
            signature: None,
            documentation: None,
            location: Some(Location::new("a/a.rs", 1, 0)),
            visibility: VisibilityInfo::unknown(),
        };
        let opts = SearchOptions {
            kinds: vec![SymbolKind::Function],
            ..SearchOptions::default()
        };
        assert!(!opts.accepts(&symbol));
        assert!(SearchOptions::default().accepts(&symbol));
    }

    #[test]
    fn ref_options_drop_tests_unless_requested() {
        let reference = ReferenceInfo {
            location: Location::new("tests/a.rs", 3, 1),
            kind: ReferenceKind::Call,
            from_symbol: None,
            module_id: None,
            context: None,
            is_test: true,
        };
        assert!(!RefOptions::default().accepts(&reference));
        let with_tests = RefOptions {
            include_tests: true,
            ..RefOptions::default()
        };
        assert!(with_tests.accepts(&reference));
    }

    #[test]
    fn unavailable_handle_reports_reason() {
        let handle = BackendHandle::unavailable(BackendId::Lsp, "no language server");
        assert_eq!(handle.id(), BackendId::Lsp);
        assert_eq!(handle.resolve().err().as_deref(), Some("no language server"));
    }

    #[test]
    fn unavailable_handle_only_claims_its_kinds_capabilities() {
        let lsp = BackendHandle::unavailable(BackendId::Lsp, "no language server");
        assert!(lsp.supports(Capability::References));
        assert!(!lsp.supports(Capability::SymbolGraph));
        let index = BackendHandle::unavailable(BackendId::Index, "no snapshot");
        assert!(index.supports(Capability::SymbolGraph));
        let narrowed = BackendHandle::unavailable_for(
            BackendId::Index,
            "no snapshot",
            &[Capability::SymbolSearch],
        );
        assert_eq!(narrowed.capabilities(), vec![Capability::SymbolSearch]);
        assert!(!narrowed.supports(Capability::References));
    }

    #[test]
    fn staleness_score_drops_with_distance_from_head() {
        let at = |behind: Option<usize>| IndexStaleness {
            indexed_commit: "a".repeat(40),
            head_commit: "b".repeat(40),
            commits_behind: behind,
        };
        assert_eq!(at(None).score(), 0.95);
        assert_eq!(at(Some(3)).score(), 0.9);
        assert_eq!(at(Some(12)).score(), 0.7);
        assert_eq!(at(Some(40)).score(), 0.5);
        assert_eq!(at(Some(400)).score(), 0.3);

        let completeness = at(Some(3)).completeness();
        assert_eq!(completeness.reason, CompletenessReason::IndexStale);
        assert!(!completeness.is_full());
        assert!(completeness.details.unwrap().contains("3 commit(s) behind"));
    }
}

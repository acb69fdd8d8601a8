//! Language-server backend. Process management lives behind [`LspSupervisor`];
//! this adapter maps its lifecycle onto availability and completeness.

use crate::backend::{BackendAnswer, CallBudget, RefOptions, SearchOptions, SymbolBackend};
use sextant_core::error::BackendError;
use sextant_core::types::{
    BackendId, Capability, CompletenessInfo, CompletenessReason, ReferenceInfo, SymbolInfo,
};
use std::sync::Arc;

const READY_SCORE: f64 = 0.9;
const WARMING_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LspState {
    Stopped,
    Starting,
    Ready,
    Failed,
}

impl LspState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

/// Lifecycle and query surface of a running language server.
pub trait LspSupervisor: Send + Sync {
    fn state(&self) -> LspState;

    fn capabilities(&self) -> Vec<Capability>;

    fn workspace_symbols(
        &self,
        query: &str,
        budget: &CallBudget,
    ) -> Result<Vec<SymbolInfo>, BackendError>;

    fn definition(
        &self,
        stable_id: &str,
        budget: &CallBudget,
    ) -> Result<Option<SymbolInfo>, BackendError>;

    fn references(
        &self,
        stable_id: &str,
        include_declaration: bool,
        budget: &CallBudget,
    ) -> Result<Vec<ReferenceInfo>, BackendError>;
}

pub struct LspBackend {
    supervisor: Arc<dyn LspSupervisor>,
    capabilities: Vec<Capability>,
}

impl LspBackend {
    pub fn new(supervisor: Arc<dyn LspSupervisor>) -> Self {
        let capabilities = supervisor
            .capabilities()
            .into_iter()
            .filter(|c| *c != Capability::SymbolGraph)
            .collect();
        Self {
            supervisor,
            capabilities,
        }
    }

    pub fn state(&self) -> LspState {
        self.supervisor.state()
    }

    fn completeness(&self) -> Result<CompletenessInfo, BackendError> {
        match self.supervisor.state() {
            LspState::Ready => Ok(CompletenessInfo::new(
                READY_SCORE,
                CompletenessReason::FullBackend,
            )),
            LspState::Starting => Ok(CompletenessInfo::new(
                WARMING_SCORE,
                CompletenessReason::BestEffortLsp,
            )
            .with_details("language server warming up")),
            state => Err(BackendError::Unavailable {
                backend: BackendId::Lsp.to_string(),
                reason: format!("language server {}", state.as_str()),
            }),
        }
    }
}

impl SymbolBackend for LspBackend {
    fn id(&self) -> BackendId {
        BackendId::Lsp
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    fn is_available(&self) -> bool {
        matches!(
            self.supervisor.state(),
            LspState::Ready | LspState::Starting
        )
    }

    fn get_symbol(
        &self,
        stable_id: &str,
        budget: &CallBudget,
    ) -> Result<BackendAnswer<SymbolInfo>, BackendError> {
        let completeness = self.completeness()?;
        budget.check()?;
        let items = self
            .supervisor
            .definition(stable_id, budget)?
            .into_iter()
            .collect();
        Ok(BackendAnswer::new(items, completeness))
    }

    fn search_symbols(
        &self,
        options: &SearchOptions,
        budget: &CallBudget,
    ) -> Result<BackendAnswer<SymbolInfo>, BackendError> {
        let completeness = self.completeness()?;
        budget.check()?;
        let mut items: Vec<SymbolInfo> = self
            .supervisor
            .workspace_symbols(options.query.trim(), budget)?
            .into_iter()
            .filter(|s| options.accepts(s))
            .collect();
        items.sort_by(|a, b| a.stable_id.cmp(&b.stable_id));
        if options.max_results > 0 {
            items.truncate(options.max_results);
        }
        Ok(BackendAnswer::new(items, completeness))
    }

    fn find_references(
        &self,
        stable_id: &str,
        options: &RefOptions,
        budget: &CallBudget,
    ) -> Result<BackendAnswer<ReferenceInfo>, BackendError> {
        let completeness = self.completeness()?;
        budget.check()?;
        let mut items: Vec<ReferenceInfo> = self
            .supervisor
            .references(stable_id, false, budget)?
            .into_iter()
            .filter(|r| options.accepts(r))
            .collect();
        if options.max_results > 0 {
            items.truncate(options.max_results);
        }
        Ok(BackendAnswer::new(items, completeness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sextant_core::types::{Location, ReferenceKind, SymbolKind, VisibilityInfo};
    use std::sync::Mutex;

    struct FakeSupervisor {
        state: Mutex<LspState>,
    }

    impl FakeSupervisor {
        fn new(state: LspState) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(state),
            })
        }
    }

    impl LspSupervisor for FakeSupervisor {
        fn state(&self) -> LspState {
            *self.state.lock().unwrap()
        }

        fn capabilities(&self) -> Vec<Capability> {
            vec![
                Capability::SymbolSearch,
                Capability::References,
                Capability::SymbolGraph,
            ]
        }

        fn workspace_symbols(
            &self,
            query: &str,
            _: &CallBudget,
        ) -> Result<Vec<SymbolInfo>, BackendError> {
            Ok(vec![SymbolInfo {
                stable_id: format!("lsp/{query}"),
                name: query.to_string(),
                kind: SymbolKind::Function,
                container: None,
                module_id: "lsp".into(),
                signature: None,
                documentation: None,
                location: Some(Location::new("lsp/a.rs", 1, 0)),
                visibility: VisibilityInfo::unknown(),
            }])
        }

        fn definition(&self, _: &str, _: &CallBudget) -> Result<Option<SymbolInfo>, BackendError> {
            Ok(None)
        }

        fn references(
            &self,
            _: &str,
            _: bool,
            _: &CallBudget,
        ) -> Result<Vec<ReferenceInfo>, BackendError> {
            Ok(vec![ReferenceInfo {
                location: Location::new("lsp/b.rs", 4, 2),
                kind: ReferenceKind::Call,
                from_symbol: None,
                module_id: None,
                context: None,
                is_test: false,
            }])
        }
    }

    #[test]
    fn ready_server_is_full_backend() {
        let backend = LspBackend::new(FakeSupervisor::new(LspState::Ready));
        assert!(backend.is_available());
        assert!(!backend.supports(Capability::SymbolGraph));
        let answer = backend
            .search_symbols(
                &SearchOptions {
                    query: "run".into(),
                    ..SearchOptions::default()
                },
                &CallBudget::unbounded(),
            )
            .unwrap();
        assert_eq!(answer.items.len(), 1);
        assert_eq!(answer.completeness.reason, CompletenessReason::FullBackend);
        assert_eq!(answer.completeness.score, 0.9);
    }

    #[test]
    fn warming_server_is_best_effort() {
        let backend = LspBackend::new(FakeSupervisor::new(LspState::Starting));
        let answer = backend
            .find_references("x", &RefOptions::default(), &CallBudget::unbounded())
            .unwrap();
        assert_eq!(answer.completeness.reason, CompletenessReason::BestEffortLsp);
        assert_eq!(
            answer.completeness.details.as_deref(),
            Some("language server warming up")
        );
    }

    #[test]
    fn stopped_server_is_unavailable() {
        let supervisor = FakeSupervisor::new(LspState::Ready);
        let backend = LspBackend::new(supervisor.clone());
        *supervisor.state.lock().unwrap() = LspState::Failed;
        assert!(!backend.is_available());
        let err = backend
            .get_symbol("x", &CallBudget::unbounded())
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::Unavailable { .. }));
    }
}

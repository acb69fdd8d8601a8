//! Precise backend over an exported symbol/reference snapshot (`.sextant/index.json`).

use crate::backend::{
    BackendAnswer, CallBudget, IndexFreshness, RefOptions, SearchOptions, SymbolBackend,
};
use crate::backends::match_rank;
use crate::graph::{GraphEdgeRecord, SymbolGraphExport};
use serde::Deserialize;
use sextant_core::error::BackendError;
use sextant_core::types::{
    BackendId, Capability, CompletenessInfo, CompletenessReason, Location, ReferenceInfo,
    ReferenceKind, SymbolInfo, SymbolKind, Visibility, VisibilityInfo, is_test_path,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CAPABILITIES: &[Capability] = &[
    Capability::SymbolLookup,
    Capability::SymbolSearch,
    Capability::References,
    Capability::SymbolGraph,
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSnapshot {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub indexed_commit: Option<String>,
    #[serde(default)]
    pub generated_at: Option<String>,
    #[serde(default)]
    pub symbols: Vec<IndexedSymbol>,
    #[serde(default)]
    pub references: Vec<IndexedReference>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedSymbol {
    pub id: String,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub backend_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedReference {
    pub symbol_id: String,
    pub location: Location,
    #[serde(default = "default_reference_kind")]
    pub kind: ReferenceKind,
    #[serde(default)]
    pub from_symbol: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

fn default_reference_kind() -> ReferenceKind {
    ReferenceKind::Reference
}

pub struct IndexBackend {
    source: Option<PathBuf>,
    symbols: Vec<SymbolInfo>,
    by_id: HashMap<String, usize>,
    by_backend_id: HashMap<String, usize>,
    backend_ids: HashMap<String, String>,
    refs_by_target: HashMap<String, Vec<ReferenceInfo>>,
    edges: Vec<GraphEdgeRecord>,
    freshness: IndexFreshness,
}

impl IndexBackend {
    /// Read and index a snapshot file.
    pub fn load(path: &Path) -> Result<Self, BackendError> {
        let raw = std::fs::read_to_string(path).map_err(|e| BackendError::Unavailable {
            backend: BackendId::Index.to_string(),
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        let snapshot: IndexSnapshot = serde_json::from_str(&raw)
            .map_err(|e| BackendError::failed(BackendId::Index.as_str(), e))?;
        let mut backend = Self::from_snapshot(snapshot);
        backend.source = Some(path.to_path_buf());
        info!(
            path = %path.display(),
            symbols = backend.symbols.len(),
            references = backend.edges.len(),
            "Loaded index snapshot"
        );
        Ok(backend)
    }

    pub fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        let mut symbols = Vec::with_capacity(snapshot.symbols.len());
        let mut by_id = HashMap::new();
        let mut by_backend_id = HashMap::new();
        let mut backend_ids = HashMap::new();

        for raw in snapshot.symbols {
            if by_id.contains_key(&raw.id) {
                warn!(stable_id = %raw.id, "duplicate symbol in index snapshot; keeping first");
                continue;
            }
            let idx = symbols.len();
            if let Some(native) = &raw.backend_id {
                by_backend_id.insert(native.clone(), idx);
                backend_ids.insert(raw.id.clone(), native.clone());
            }
            by_id.insert(raw.id.clone(), idx);
            symbols.push(to_symbol_info(raw));
        }

        let mut refs_by_target: HashMap<String, Vec<ReferenceInfo>> = HashMap::new();
        let mut edges = Vec::new();
        for raw in snapshot.references {
            if let Some(from) = &raw.from_symbol {
                edges.push(GraphEdgeRecord {
                    from: from.clone(),
                    to: raw.symbol_id.clone(),
                    kind: raw.kind,
                });
            }
            let module_id = raw
                .from_symbol
                .as_ref()
                .and_then(|from| by_id.get(from))
                .map(|&idx: &usize| symbols[idx].module_id.clone())
                .unwrap_or_else(|| raw.location.directory().to_string());
            let is_test = is_test_path(&raw.location.path);
            refs_by_target
                .entry(raw.symbol_id)
                .or_default()
                .push(ReferenceInfo {
                    location: raw.location,
                    kind: raw.kind,
                    from_symbol: raw.from_symbol,
                    module_id: Some(module_id),
                    context: raw.context,
                    is_test,
                });
        }
        for refs in refs_by_target.values_mut() {
            refs.sort_by(|a, b| {
                a.location
                    .path
                    .cmp(&b.location.path)
                    .then(a.location.line.cmp(&b.location.line))
                    .then(a.location.column.cmp(&b.location.column))
            });
        }

        Self {
            source: None,
            symbols,
            by_id,
            by_backend_id,
            backend_ids,
            refs_by_target,
            edges,
            freshness: IndexFreshness {
                indexed_commit: snapshot.indexed_commit,
                generated_at: snapshot.generated_at,
            },
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbols(&self) -> &[SymbolInfo] {
        &self.symbols
    }

    /// Backend-native id recorded for a stable id, if the snapshot carries one.
    pub fn backend_id_of(&self, stable_id: &str) -> Option<&str> {
        self.backend_ids.get(stable_id).map(String::as_str)
    }

    fn lookup(&self, id: &str) -> Option<&SymbolInfo> {
        self.by_id
            .get(id)
            .or_else(|| self.by_backend_id.get(id))
            .map(|&idx| &self.symbols[idx])
    }

    fn full() -> CompletenessInfo {
        CompletenessInfo::new(1.0, CompletenessReason::FullBackend)
    }
}

impl SymbolBackend for IndexBackend {
    fn id(&self) -> BackendId {
        BackendId::Index
    }

    fn capabilities(&self) -> &[Capability] {
        CAPABILITIES
    }

    fn is_available(&self) -> bool {
        true
    }

    fn get_symbol(
        &self,
        stable_id: &str,
        budget: &CallBudget,
    ) -> Result<BackendAnswer<SymbolInfo>, BackendError> {
        budget.check()?;
        let items: Vec<SymbolInfo> = self.lookup(stable_id).cloned().into_iter().collect();
        Ok(BackendAnswer::new(items, Self::full()))
    }

    fn search_symbols(
        &self,
        options: &SearchOptions,
        budget: &CallBudget,
    ) -> Result<BackendAnswer<SymbolInfo>, BackendError> {
        let needle = options.query.trim().to_lowercase();
        let mut hits: Vec<(u8, &SymbolInfo)> = Vec::new();
        for (i, symbol) in self.symbols.iter().enumerate() {
            if i % 1024 == 0 {
                budget.check()?;
            }
            if !options.accepts(symbol) {
                continue;
            }
            if let Some(rank) = match_rank(&needle, &symbol.name) {
                hits.push((rank, symbol));
            }
        }
        hits.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.stable_id.cmp(&b.1.stable_id)));
        if options.max_results > 0 {
            hits.truncate(options.max_results);
        }
        let items = hits.into_iter().map(|(_, s)| s.clone()).collect();
        Ok(BackendAnswer::new(items, Self::full()))
    }

    fn find_references(
        &self,
        stable_id: &str,
        options: &RefOptions,
        budget: &CallBudget,
    ) -> Result<BackendAnswer<ReferenceInfo>, BackendError> {
        budget.check()?;
        let target = self
            .lookup(stable_id)
            .map(|s| s.stable_id.as_str())
            .unwrap_or(stable_id);
        let mut items: Vec<ReferenceInfo> = self
            .refs_by_target
            .get(target)
            .map(|refs| refs.iter().filter(|r| options.accepts(r)).cloned().collect())
            .unwrap_or_default();
        if options.max_results > 0 {
            items.truncate(options.max_results);
        }
        Ok(BackendAnswer::new(items, Self::full()))
    }

    fn symbol_graph(&self, budget: &CallBudget) -> Result<Option<SymbolGraphExport>, BackendError> {
        budget.check()?;
        Ok(Some(SymbolGraphExport {
            symbols: self.symbols.clone(),
            edges: self.edges.clone(),
        }))
    }

    fn freshness(&self) -> Option<IndexFreshness> {
        Some(self.freshness.clone())
    }

    fn native_id(&self, stable_id: &str) -> Option<String> {
        self.backend_id_of(stable_id).map(str::to_string)
    }
}

fn to_symbol_info(raw: IndexedSymbol) -> SymbolInfo {
    let kind = SymbolKind::parse_kind(&raw.kind).unwrap_or(SymbolKind::Unknown);
    let module_id = raw
        .module
        .clone()
        .or_else(|| raw.location.as_ref().map(|l| l.directory().to_string()))
        .or_else(|| {
            raw.id
                .split('#')
                .next()
                .and_then(|owner| owner.rsplit_once('/'))
                .map(|(module, _)| module.to_string())
        })
        .unwrap_or_else(|| ".".to_string());
    let visibility = match raw.visibility.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("public" | "pub" | "export" | "exported") => Some(Visibility::Public),
        Some("internal" | "crate" | "package" | "protected") => Some(Visibility::Internal),
        Some("private") => Some(Visibility::Private),
        _ => None,
    }
    .map(|visibility| VisibilityInfo {
        visibility,
        confidence: 1.0,
        source: "index".to_string(),
    })
    .unwrap_or_else(VisibilityInfo::unknown);

    SymbolInfo {
        stable_id: raw.id,
        name: raw.name,
        kind,
        container: raw.container,
        module_id,
        signature: raw.signature,
        documentation: raw.documentation,
        location: raw.location,
        visibility,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeFilter;

    const SNAPSHOT: &str = r#"{
        "version": 1,
        "indexedCommit": "abc123",
        "symbols": [
            {"id": "src/engine/Engine", "name": "Engine", "kind": "struct",
             "location": {"path": "src/engine.rs", "line": 3}, "visibility": "public"},
            {"id": "src/engine/Engine#search()", "name": "search", "kind": "method",
             "container": "Engine", "location": {"path": "src/engine.rs", "line": 10},
             "visibility": "pub", "backendId": "native-1"},
            {"id": "src/cli/EngineBuilder", "name": "EngineBuilder", "kind": "struct",
             "module": "src/cli", "location": {"path": "src/cli/builder.rs", "line": 1}},
            {"id": "src/cli/run()", "name": "run", "kind": "fn",
             "location": {"path": "src/cli/main.rs", "line": 5}}
        ],
        "references": [
            {"symbolId": "src/engine/Engine#search()", "kind": "call",
             "fromSymbol": "src/cli/run()",
             "location": {"path": "src/cli/main.rs", "line": 9, "column": 4}},
            {"symbolId": "src/engine/Engine#search()", "kind": "call",
             "location": {"path": "tests/engine_test.rs", "line": 2}}
        ]
    }"#;

    fn backend() -> IndexBackend {
        IndexBackend::from_snapshot(serde_json::from_str(SNAPSHOT).unwrap())
    }

    #[test]
    fn load_reads_file_and_reports_freshness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, SNAPSHOT).unwrap();
        let backend = IndexBackend::load(&path).unwrap();
        assert_eq!(backend.symbol_count(), 4);
        assert_eq!(
            backend.freshness().unwrap().indexed_commit.as_deref(),
            Some("abc123")
        );
        assert_eq!(backend.source(), Some(path.as_path()));
    }

    #[test]
    fn load_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = IndexBackend::load(&dir.path().join("nope.json")).err().unwrap();
        assert!(matches!(err, BackendError::Unavailable { .. }));
    }

    #[test]
    fn search_ranks_exact_before_prefix() {
        let options = SearchOptions {
            query: "engine".into(),
            ..SearchOptions::default()
        };
        let answer = backend()
            .search_symbols(&options, &CallBudget::unbounded())
            .unwrap();
        let ids: Vec<&str> = answer.items.iter().map(|s| s.stable_id.as_str()).collect();
        assert_eq!(ids, vec!["src/engine/Engine", "src/cli/EngineBuilder"]);
        assert_eq!(answer.completeness.reason, CompletenessReason::FullBackend);
    }

    #[test]
    fn search_honors_scope_and_kinds() {
        let options = SearchOptions {
            query: "e".into(),
            scope: ScopeFilter::parse("src/cli").unwrap(),
            kinds: vec![SymbolKind::Struct],
            max_results: 0,
        };
        let answer = backend()
            .search_symbols(&options, &CallBudget::unbounded())
            .unwrap();
        assert_eq!(answer.items.len(), 1);
        assert_eq!(answer.items[0].module_id, "src/cli");
    }

    #[test]
    fn get_symbol_accepts_backend_native_id() {
        let b = backend();
        let answer = b.get_symbol("native-1", &CallBudget::unbounded()).unwrap();
        assert_eq!(answer.items[0].stable_id, "src/engine/Engine#search()");
        assert_eq!(answer.items[0].visibility.visibility, Visibility::Public);
        assert_eq!(b.backend_id_of("src/engine/Engine#search()"), Some("native-1"));
    }

    #[test]
    fn references_filter_tests_and_carry_module() {
        let b = backend();
        let refs = b
            .find_references(
                "src/engine/Engine#search()",
                &RefOptions::default(),
                &CallBudget::unbounded(),
            )
            .unwrap();
        assert_eq!(refs.items.len(), 1);
        assert_eq!(refs.items[0].module_id.as_deref(), Some("src/cli"));

        let with_tests = RefOptions {
            include_tests: true,
            ..RefOptions::default()
        };
        let refs = b
            .find_references("src/engine/Engine#search()", &with_tests, &CallBudget::unbounded())
            .unwrap();
        assert_eq!(refs.items.len(), 2);
        assert!(refs.items[1].is_test);
    }

    #[test]
    fn graph_export_contains_call_edges() {
        let graph = backend()
            .symbol_graph(&CallBudget::unbounded())
            .unwrap()
            .unwrap();
        assert_eq!(graph.symbols.len(), 4);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].from, "src/cli/run()");
    }

    #[test]
    fn cancelled_budget_aborts_search() {
        let budget = CallBudget::unbounded();
        budget.cancel();
        let result = backend().search_symbols(&SearchOptions::default(), &budget);
        assert_eq!(result.err(), Some(BackendError::Cancelled));
    }
}

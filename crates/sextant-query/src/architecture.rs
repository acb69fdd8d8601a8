use crate::envelope::truncate;
use crate::graph::SymbolGraphExport;
use serde::{Deserialize, Serialize};
use sextant_core::types::{ReferenceKind, SymbolInfo, TruncationInfo, TruncationReason};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const EXTERNAL_PREFIX: &str = "external";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSummary {
    pub module_id: String,
    pub name: String,
    pub symbol_count: usize,
    pub file_count: usize,
    pub incoming_edges: usize,
    pub outgoing_edges: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDependency {
    pub from: String,
    pub to: String,
    pub strength: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchitectureSummary {
    pub modules: Vec<ModuleSummary>,
    pub dependencies: Vec<ModuleDependency>,
    pub total_modules: usize,
    pub total_symbols: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub include_external: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ArchitectureOptions {
    /// Keep only the first `depth` path segments of each module id.
    pub depth: Option<usize>,
    /// Restrict the view to one module and its submodules.
    pub module: Option<String>,
    pub include_external: bool,
    pub max_modules: usize,
    pub max_edges: usize,
}

#[derive(Default)]
struct ModuleAccumulator {
    symbols: usize,
    files: BTreeSet<String>,
    incoming: usize,
    outgoing: usize,
}

/// Collapse `module_id` to its first `depth` segments.
pub fn collapse_module(module_id: &str, depth: Option<usize>) -> String {
    match depth {
        Some(depth) if depth > 0 => module_id
            .split('/')
            .filter(|s| !s.is_empty())
            .take(depth)
            .collect::<Vec<_>>()
            .join("/"),
        _ => module_id.to_string(),
    }
}

fn module_of(symbol: &SymbolInfo) -> String {
    if !symbol.module_id.is_empty() {
        return symbol.module_id.clone();
    }
    symbol
        .location
        .as_ref()
        .map(|l| l.directory().to_string())
        .unwrap_or_else(|| ".".to_string())
}

/// Module an edge endpoint with no known symbol is attributed to.
fn external_module(stable_id: &str) -> String {
    let root = stable_id
        .split(['/', '#', ':', '.'])
        .find(|s| !s.is_empty())
        .unwrap_or("unknown");
    format!("{EXTERNAL_PREFIX}/{root}")
}

fn in_focus(module_id: &str, focus: Option<&str>) -> bool {
    match focus {
        None => true,
        Some(focus) => {
            module_id == focus
                || module_id
                    .strip_prefix(focus)
                    .is_some_and(|rest| rest.starts_with('/'))
        }
    }
}

fn display_name(module_id: &str) -> String {
    module_id
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(module_id)
        .to_string()
}

/// Summarize modules and the cross-module dependency edges between them.
pub fn summarize_architecture(
    export: &SymbolGraphExport,
    options: &ArchitectureOptions,
) -> (ArchitectureSummary, Vec<TruncationInfo>) {
    let mut modules: BTreeMap<String, ModuleAccumulator> = BTreeMap::new();
    let mut symbol_module: HashMap<&str, String> = HashMap::new();

    for symbol in &export.symbols {
        let module = collapse_module(&module_of(symbol), options.depth);
        let entry = modules.entry(module.clone()).or_default();
        entry.symbols += 1;
        if let Some(location) = &symbol.location {
            entry.files.insert(location.path.clone());
        }
        symbol_module.insert(symbol.stable_id.as_str(), module);
    }

    let endpoint = |id: &str| -> Option<String> {
        match symbol_module.get(id) {
            Some(module) => Some(module.clone()),
            None if options.include_external => Some(external_module(id)),
            None => None,
        }
    };

    let mut strengths: BTreeMap<(String, String), usize> = BTreeMap::new();
    for edge in &export.edges {
        if edge.kind == ReferenceKind::Definition {
            continue;
        }
        let (Some(from), Some(to)) = (endpoint(&edge.from), endpoint(&edge.to)) else {
            continue;
        };
        if from == to {
            continue;
        }
        *strengths.entry((from, to)).or_default() += 1;
    }

    for ((from, to), count) in &strengths {
        modules.entry(from.clone()).or_default().outgoing += count;
        modules.entry(to.clone()).or_default().incoming += count;
    }

    let focus = options
        .module
        .as_deref()
        .map(|m| m.trim_matches('/'))
        .filter(|m| !m.is_empty());
    let mut dependencies: Vec<ModuleDependency> = strengths
        .into_iter()
        .filter(|((from, to), _)| in_focus(from, focus) || in_focus(to, focus))
        .map(|((from, to), strength)| ModuleDependency { from, to, strength })
        .collect();
    dependencies.sort_by(|a, b| {
        b.strength
            .cmp(&a.strength)
            .then_with(|| a.from.cmp(&b.from))
            .then_with(|| a.to.cmp(&b.to))
    });

    let mut summaries: Vec<ModuleSummary> = modules
        .into_iter()
        .filter(|(module_id, _)| in_focus(module_id, focus))
        .map(|(module_id, acc)| ModuleSummary {
            name: display_name(&module_id),
            module_id,
            symbol_count: acc.symbols,
            file_count: acc.files.len(),
            incoming_edges: acc.incoming,
            outgoing_edges: acc.outgoing,
        })
        .collect();
    summaries.sort_by(|a, b| {
        b.symbol_count
            .cmp(&a.symbol_count)
            .then_with(|| a.module_id.cmp(&b.module_id))
    });

    let total_modules = summaries.len();
    let mut truncations = Vec::new();
    truncations.extend(truncate(
        &mut summaries,
        options.max_modules,
        TruncationReason::MaxModules,
    ));
    truncations.extend(truncate(
        &mut dependencies,
        options.max_edges,
        TruncationReason::MaxEdges,
    ));

    (
        ArchitectureSummary {
            modules: summaries,
            dependencies,
            total_modules,
            total_symbols: export.symbols.len(),
            depth: options.depth,
            module: focus.map(str::to_string),
            include_external: options.include_external,
        },
        truncations,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphEdgeRecord;
    use sextant_core::types::{Location, SymbolKind, VisibilityInfo};

    fn sym(id: &str, module: &str, path: &str) -> SymbolInfo {
        SymbolInfo {
            stable_id: id.into(),
            name: id.rsplit('/').next().unwrap_or(id).into(),
            kind: SymbolKind::Function,
            container: None,
            module_id: module.into(),
            signature: None,
            documentation: None,
            location: Some(Location::new(path, 1, 0)),
            visibility: VisibilityInfo::unknown(),
        }
    }

    fn edge(from: &str, to: &str, kind: ReferenceKind) -> GraphEdgeRecord {
        GraphEdgeRecord {
            from: from.into(),
            to: to.into(),
            kind,
        }
    }

    fn export() -> SymbolGraphExport {
        SymbolGraphExport {
            symbols: vec![
                sym("src/api/serve()", "src/api", "src/api/server.rs"),
                sym("src/api/route()", "src/api", "src/api/router.rs"),
                sym("src/core/run()", "src/core", "src/core/engine.rs"),
                sym("src/core/stop()", "src/core", "src/core/engine.rs"),
                sym("src/core/util/fmt()", "src/core/util", "src/core/util/fmt.rs"),
            ],
            edges: vec![
                edge("src/api/serve()", "src/core/run()", ReferenceKind::Call),
                edge("src/api/route()", "src/core/stop()", ReferenceKind::Call),
                edge("src/api/serve()", "src/api/route()", ReferenceKind::Call),
                edge("src/core/run()", "src/core/util/fmt()", ReferenceKind::Reference),
                edge("src/core/run()", "src/api/serve()", ReferenceKind::Definition),
                edge("src/core/run()", "serde::Serialize", ReferenceKind::Implements),
            ],
        }
    }

    fn options() -> ArchitectureOptions {
        ArchitectureOptions {
            max_modules: 50,
            max_edges: 200,
            ..ArchitectureOptions::default()
        }
    }

    #[test]
    fn cross_module_edges_aggregate_by_strength() {
        let (summary, truncations) = summarize_architecture(&export(), &options());
        assert!(truncations.is_empty());
        assert_eq!(
            summary.dependencies,
            vec![
                ModuleDependency {
                    from: "src/api".into(),
                    to: "src/core".into(),
                    strength: 2
                },
                ModuleDependency {
                    from: "src/core".into(),
                    to: "src/core/util".into(),
                    strength: 1
                },
            ]
        );
        let api = &summary.modules[0];
        assert_eq!(api.module_id, "src/api");
        assert_eq!((api.symbol_count, api.file_count), (2, 2));
        assert_eq!((api.incoming_edges, api.outgoing_edges), (0, 2));
        let core = &summary.modules[1];
        assert_eq!(core.name, "core");
        assert_eq!((core.symbol_count, core.file_count), (2, 1));
    }

    #[test]
    fn depth_collapses_nested_modules() {
        assert_eq!(collapse_module("src/core/util", Some(2)), "src/core");
        assert_eq!(collapse_module("src/core/util", None), "src/core/util");
        let mut opts = options();
        opts.depth = Some(2);
        let (summary, _) = summarize_architecture(&export(), &opts);
        assert_eq!(summary.total_modules, 2);
        assert_eq!(summary.dependencies.len(), 1);
        assert_eq!(summary.modules[0].module_id, "src/core");
        assert_eq!(summary.modules[0].symbol_count, 3);
    }

    #[test]
    fn external_endpoints_are_opt_in() {
        let mut opts = options();
        opts.include_external = true;
        let (summary, _) = summarize_architecture(&export(), &opts);
        assert!(
            summary
                .dependencies
                .iter()
                .any(|d| d.from == "src/core" && d.to == "external/serde")
        );
        assert!(summary.modules.iter().any(|m| m.module_id == "external/serde"));
    }

    #[test]
    fn module_focus_keeps_submodules_and_touching_edges() {
        let mut opts = options();
        opts.module = Some("src/core/".into());
        let (summary, _) = summarize_architecture(&export(), &opts);
        let ids: Vec<&str> = summary.modules.iter().map(|m| m.module_id.as_str()).collect();
        assert_eq!(ids, vec!["src/core", "src/core/util"]);
        assert_eq!(summary.dependencies.len(), 2);
        assert_eq!(summary.module.as_deref(), Some("src/core"));
        assert!(!in_focus("src/corelib", Some("src/core")));
    }

    #[test]
    fn limits_truncate_modules_and_edges() {
        let mut opts = options();
        opts.max_modules = 1;
        opts.max_edges = 1;
        let (summary, truncations) = summarize_architecture(&export(), &opts);
        assert_eq!(summary.modules.len(), 1);
        assert_eq!(summary.total_modules, 3);
        assert_eq!(truncations[0].reason, TruncationReason::MaxModules);
        assert_eq!(truncations[1].reason, TruncationReason::MaxEdges);
        assert_eq!(truncations[1].original_count, 2);
    }
}

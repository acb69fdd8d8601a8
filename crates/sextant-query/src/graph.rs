use serde::{Deserialize, Serialize};
use sextant_core::types::{ReferenceKind, SymbolInfo};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// Modules larger than this get no same-module edges.
const SAME_MODULE_MAX_SYMBOLS: usize = 50;
const EXPLANATION_MAX_DEPTH: usize = 5;

/// Symbol graph as exported by a backend: nodes plus typed, directed edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolGraphExport {
    pub symbols: Vec<SymbolInfo>,
    pub edges: Vec<GraphEdgeRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdgeRecord {
    pub from: String,
    pub to: String,
    pub kind: ReferenceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    Call,
    Reference,
    Definition,
    TypeOf,
    Implements,
    SameModule,
}

impl EdgeKind {
    pub fn weight(self) -> f64 {
        match self {
            Self::Call => 1.0,
            Self::Reference => 0.8,
            Self::Definition => 0.9,
            Self::TypeOf => 0.6,
            Self::Implements => 0.7,
            Self::SameModule => 0.3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Reference => "reference",
            Self::Definition => "definition",
            Self::TypeOf => "type-of",
            Self::Implements => "implements",
            Self::SameModule => "same-module",
        }
    }
}

impl From<ReferenceKind> for EdgeKind {
    fn from(kind: ReferenceKind) -> Self {
        match kind {
            ReferenceKind::Call => Self::Call,
            ReferenceKind::Reference | ReferenceKind::Import => Self::Reference,
            ReferenceKind::Definition => Self::Definition,
            ReferenceKind::TypeOf => Self::TypeOf,
            ReferenceKind::Implements => Self::Implements,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    target: usize,
    weight: f64,
    kind: EdgeKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub call_edges: usize,
    pub reference_edges: usize,
    pub module_edges: usize,
    pub avg_out_degree: f64,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("personalized pagerank needs at least one seed")]
    EmptySeeds,
    #[error("none of the {0} seeds exist in the graph")]
    NoValidSeeds(usize),
    #[error("symbol graph is empty")]
    EmptyGraph,
    #[error("graph walk exceeded its time budget after {iterations} iterations")]
    BudgetExceeded { iterations: usize },
}

/// Weighted, directed adjacency over symbol stable ids.
#[derive(Debug, Clone, Default)]
pub struct SymbolGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    symbols: Vec<Option<SymbolInfo>>,
    outgoing: Vec<Vec<Edge>>,
    incoming: Vec<Vec<Edge>>,
    stats: GraphStats,
}

impl SymbolGraph {
    pub fn build(export: &SymbolGraphExport) -> Self {
        let mut graph = Self::default();
        for symbol in &export.symbols {
            let idx = graph.intern(&symbol.stable_id);
            graph.symbols[idx] = Some(symbol.clone());
        }

        let mut seen = HashSet::new();
        for edge in &export.edges {
            if edge.from == edge.to {
                continue;
            }
            let from = graph.intern(&edge.from);
            let to = graph.intern(&edge.to);
            graph.add_edge(from, to, edge.kind.into(), &mut seen);
        }

        let mut modules: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for symbol in &export.symbols {
            if symbol.module_id.is_empty() {
                continue;
            }
            if let Some(&idx) = graph.index.get(&symbol.stable_id) {
                modules.entry(symbol.module_id.as_str()).or_default().push(idx);
            }
        }
        for members in modules.values() {
            if members.len() > SAME_MODULE_MAX_SYMBOLS {
                continue;
            }
            for &a in members {
                for &b in members {
                    if a != b {
                        graph.add_edge(a, b, EdgeKind::SameModule, &mut seen);
                    }
                }
            }
        }

        let nodes = graph.ids.len();
        graph.stats.nodes = nodes;
        graph.stats.avg_out_degree = if nodes == 0 {
            0.0
        } else {
            graph.stats.edges as f64 / nodes as f64
        };
        debug!(
            nodes,
            edges = graph.stats.edges,
            call_edges = graph.stats.call_edges,
            "Built symbol graph"
        );
        graph
    }

    fn intern(&mut self, id: &str) -> usize {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.ids.len();
        self.ids.push(id.to_string());
        self.index.insert(id.to_string(), idx);
        self.symbols.push(None);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        idx
    }

    fn add_edge(
        &mut self,
        from: usize,
        to: usize,
        kind: EdgeKind,
        seen: &mut HashSet<(usize, usize, EdgeKind)>,
    ) {
        if !seen.insert((from, to, kind)) {
            return;
        }
        let weight = kind.weight();
        self.outgoing[from].push(Edge {
            target: to,
            weight,
            kind,
        });
        self.incoming[to].push(Edge {
            target: from,
            weight,
            kind,
        });
        self.stats.edges += 1;
        match kind {
            EdgeKind::Call => self.stats.call_edges += 1,
            EdgeKind::SameModule => self.stats.module_edges += 1,
            _ => self.stats.reference_edges += 1,
        }
    }

    pub fn stats(&self) -> &GraphStats {
        &self.stats
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn symbol(&self, id: &str) -> Option<&SymbolInfo> {
        self.index
            .get(id)
            .and_then(|&idx| self.symbols[idx].as_ref())
    }

    /// Direct call targets of `id`, sorted by id.
    pub fn callees(&self, id: &str) -> Vec<&str> {
        self.call_neighbors(id, &self.outgoing)
    }

    /// Direct callers of `id`, sorted by id.
    pub fn callers(&self, id: &str) -> Vec<&str> {
        self.call_neighbors(id, &self.incoming)
    }

    fn call_neighbors<'a>(&'a self, id: &str, adjacency: &'a [Vec<Edge>]) -> Vec<&'a str> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = adjacency[idx]
            .iter()
            .filter(|edge| edge.kind == EdgeKind::Call)
            .map(|edge| self.ids[edge.target].as_str())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Typed outgoing edges of `id` as `(target, kind)`, excluding same-module links.
    pub fn outgoing_edges(&self, id: &str) -> Vec<(&str, EdgeKind)> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        self.outgoing[idx]
            .iter()
            .filter(|edge| edge.kind != EdgeKind::SameModule)
            .map(|edge| (self.ids[edge.target].as_str(), edge.kind))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PprParams {
    pub damping: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub top_k: usize,
    pub deadline: Option<Instant>,
}

impl Default for PprParams {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 20,
            tolerance: 1e-6,
            top_k: 200,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PprScore {
    pub stable_id: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PprResult {
    pub scores: Vec<PprScore>,
    pub iterations: usize,
    pub converged: bool,
    pub seed_nodes: usize,
    pub total_nodes: usize,
    pub total_edges: usize,
}

impl PprResult {
    pub fn score_map(&self) -> HashMap<&str, f64> {
        self.scores
            .iter()
            .map(|s| (s.stable_id.as_str(), s.score))
            .collect()
    }
}

/// Personalized PageRank from `seeds`, teleporting uniformly to the valid seeds.
pub fn personalized_pagerank(
    graph: &SymbolGraph,
    seeds: &[String],
    params: &PprParams,
) -> Result<PprResult, GraphError> {
    if seeds.is_empty() {
        return Err(GraphError::EmptySeeds);
    }
    if graph.is_empty() {
        return Err(GraphError::EmptyGraph);
    }
    let mut seed_idx: Vec<usize> = seeds
        .iter()
        .filter_map(|id| graph.index.get(id).copied())
        .collect();
    seed_idx.sort_unstable();
    seed_idx.dedup();
    if seed_idx.is_empty() {
        return Err(GraphError::NoValidSeeds(seeds.len()));
    }

    let n = graph.ids.len();
    let teleport_mass = 1.0 / seed_idx.len() as f64;
    let mut teleport = vec![0.0; n];
    for &s in &seed_idx {
        teleport[s] = teleport_mass;
    }
    let out_weight: Vec<f64> = graph
        .outgoing
        .iter()
        .map(|edges| edges.iter().map(|e| e.weight).sum())
        .collect();

    let d = params.damping.clamp(0.0, 1.0);
    let mut scores = teleport.clone();
    let mut iterations = 0;
    let mut converged = false;

    while iterations < params.max_iterations {
        if params.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(GraphError::BudgetExceeded { iterations });
        }
        iterations += 1;

        let mut propagated = vec![0.0; n];
        let mut dangling = 0.0;
        for (u, edges) in graph.outgoing.iter().enumerate() {
            let mass = scores[u];
            if mass == 0.0 {
                continue;
            }
            if out_weight[u] <= 0.0 {
                dangling += mass;
                continue;
            }
            for edge in edges {
                propagated[edge.target] += mass * edge.weight / out_weight[u];
            }
        }
        // Dangling mass returns to the seeds.
        if dangling > 0.0 {
            for &s in &seed_idx {
                propagated[s] += dangling * teleport_mass;
            }
        }

        let mut delta: f64 = 0.0;
        for v in 0..n {
            let next = d * propagated[v] + (1.0 - d) * teleport[v];
            delta = delta.max((next - scores[v]).abs());
            scores[v] = next;
        }
        if delta < params.tolerance {
            converged = true;
            break;
        }
    }

    let mut ranked: Vec<(usize, f64)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| *score > 0.0)
        .collect();
    ranked.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| graph.ids[a.0].cmp(&graph.ids[b.0]))
    });
    ranked.truncate(params.top_k.max(1));

    let seed_set: HashSet<usize> = seed_idx.iter().copied().collect();
    let scores_out = ranked
        .into_iter()
        .map(|(idx, score)| PprScore {
            stable_id: graph.ids[idx].clone(),
            score,
            path: explain_path(graph, &scores, &seed_set, idx),
        })
        .collect();

    debug!(iterations, converged, seeds = seed_idx.len(), "PPR finished");
    Ok(PprResult {
        scores: scores_out,
        iterations,
        converged,
        seed_nodes: seed_idx.len(),
        total_nodes: n,
        total_edges: graph.stats.edges,
    })
}

/// Walk best incoming edges back to a seed. Path runs seed first.
fn explain_path(
    graph: &SymbolGraph,
    scores: &[f64],
    seeds: &HashSet<usize>,
    node: usize,
) -> Option<Vec<String>> {
    let mut path = vec![node];
    let mut visited = HashSet::from([node]);
    let mut current = node;
    while !seeds.contains(&current) {
        if path.len() > EXPLANATION_MAX_DEPTH {
            return None;
        }
        let best = graph.incoming[current]
            .iter()
            .filter(|edge| !visited.contains(&edge.target))
            .max_by(|a, b| {
                (scores[a.target] * a.weight)
                    .total_cmp(&(scores[b.target] * b.weight))
                    .then_with(|| graph.ids[b.target].cmp(&graph.ids[a.target]))
            })?;
        current = best.target;
        visited.insert(current);
        path.push(current);
    }
    path.reverse();
    Some(path.into_iter().map(|idx| graph.ids[idx].clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sextant_core::types::{Location, SymbolKind, VisibilityInfo};

    fn sym(id: &str, module: &str) -> SymbolInfo {
        SymbolInfo {
            stable_id: id.into(),
            name: id.rsplit('/').next().unwrap_or(id).into(),
            kind: SymbolKind::Function,
            container: None,
            module_id: module.into(),
            signature: None,
            documentation: None,
            location: Some(Location::new(format!("{module}/lib.rs"), 1, 0)),
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

    fn chain() -> SymbolGraphExport {
        SymbolGraphExport {
            symbols: vec![
                sym("a/a()", "a"),
                sym("b/b()", "b"),
                sym("c/c()", "c"),
                sym("d/d()", "d"),
            ],
            edges: vec![
                edge("a/a()", "b/b()", ReferenceKind::Call),
                edge("b/b()", "c/c()", ReferenceKind::Call),
                edge("a/a()", "a/a()", ReferenceKind::Call),
            ],
        }
    }

    #[test]
    fn builder_skips_self_edges_and_counts_kinds() {
        let graph = SymbolGraph::build(&chain());
        let stats = graph.stats();
        assert_eq!(stats.nodes, 4);
        assert_eq!(stats.edges, 2);
        assert_eq!(stats.call_edges, 2);
        assert_eq!(stats.module_edges, 0);
        assert_eq!(graph.callees("a/a()"), vec!["b/b()"]);
        assert_eq!(graph.callers("c/c()"), vec!["b/b()"]);
    }

    #[test]
    fn same_module_edges_are_bidirectional_and_bounded() {
        let mut export = SymbolGraphExport {
            symbols: vec![sym("m/x()", "m"), sym("m/y()", "m")],
            edges: Vec::new(),
        };
        let graph = SymbolGraph::build(&export);
        assert_eq!(graph.stats().module_edges, 2);

        export.symbols = (0..=SAME_MODULE_MAX_SYMBOLS)
            .map(|i| sym(&format!("big/f{i}()"), "big"))
            .collect();
        let graph = SymbolGraph::build(&export);
        assert_eq!(graph.stats().module_edges, 0);
    }

    #[test]
    fn ppr_favors_nodes_near_seeds() {
        let graph = SymbolGraph::build(&chain());
        let result =
            personalized_pagerank(&graph, &["a/a()".to_string()], &PprParams::default()).unwrap();
        let map = result.score_map();
        assert!(map["a/a()"] > map["b/b()"]);
        assert!(map["b/b()"] > map["c/c()"]);
        assert!(!map.contains_key("d/d()"));
        assert_eq!(result.seed_nodes, 1);
        assert_eq!(result.total_nodes, 4);

        let c = result.scores.iter().find(|s| s.stable_id == "c/c()").unwrap();
        assert_eq!(
            c.path.as_deref(),
            Some(&["a/a()".to_string(), "b/b()".to_string(), "c/c()".to_string()][..])
        );
    }

    #[test]
    fn ppr_output_is_sorted_and_bounded() {
        let graph = SymbolGraph::build(&chain());
        let params = PprParams {
            top_k: 2,
            ..PprParams::default()
        };
        let result = personalized_pagerank(&graph, &["a/a()".to_string()], &params).unwrap();
        assert_eq!(result.scores.len(), 2);
        assert!(result.scores[0].score >= result.scores[1].score);
    }

    #[test]
    fn ppr_rejects_bad_seeds() {
        let graph = SymbolGraph::build(&chain());
        assert_eq!(
            personalized_pagerank(&graph, &[], &PprParams::default()),
            Err(GraphError::EmptySeeds)
        );
        assert_eq!(
            personalized_pagerank(&graph, &["zzz".to_string()], &PprParams::default()),
            Err(GraphError::NoValidSeeds(1))
        );
        let empty = SymbolGraph::build(&SymbolGraphExport::default());
        assert_eq!(
            personalized_pagerank(&empty, &["a".to_string()], &PprParams::default()),
            Err(GraphError::EmptyGraph)
        );
    }

    #[test]
    fn ppr_respects_expired_deadline() {
        let graph = SymbolGraph::build(&chain());
        let params = PprParams {
            deadline: Some(Instant::now()),
            ..PprParams::default()
        };
        let err = personalized_pagerank(&graph, &["a/a()".to_string()], &params).unwrap_err();
        assert_eq!(err, GraphError::BudgetExceeded { iterations: 0 });
    }
}

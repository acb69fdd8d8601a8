use crate::envelope::truncate;
use crate::graph::{EdgeKind, SymbolGraph};
use serde::{Deserialize, Serialize};
use sextant_core::constants::MAX_CALL_GRAPH_DEPTH;
use sextant_core::types::{TruncationInfo, TruncationReason};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallGraphDirection {
    Callers,
    Callees,
    #[default]
    Both,
}

impl CallGraphDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "callers" | "in" => Some(Self::Callers),
            "callees" | "out" => Some(Self::Callees),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    fn includes(self, mode: Traversal) -> bool {
        matches!(
            (self, mode),
            (Self::Both, _)
                | (Self::Callers, Traversal::Callers)
                | (Self::Callees, Traversal::Callees)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Traversal {
    Callers,
    Callees,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallGraphNode {
    pub stable_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub depth: u32,
    pub edge_kind: EdgeKind,
    pub direction: Traversal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallGraphWalk {
    pub root: String,
    pub direction: CallGraphDirection,
    pub depth_applied: u32,
    pub callers: Vec<CallGraphNode>,
    pub callees: Vec<CallGraphNode>,
    pub total_nodes: usize,
}

pub fn clamp_depth(depth: u32) -> u32 {
    depth.clamp(1, MAX_CALL_GRAPH_DEPTH)
}

/// Breadth-first walk over call edges around `root`, ordered by (depth, id) and cut to `limit`.
pub fn walk_call_graph(
    graph: &SymbolGraph,
    root: &str,
    direction: CallGraphDirection,
    depth: u32,
    limit: usize,
) -> (CallGraphWalk, Option<TruncationInfo>) {
    let depth_applied = clamp_depth(depth);
    let mut nodes: Vec<CallGraphNode> = Vec::new();
    for mode in [Traversal::Callers, Traversal::Callees] {
        if direction.includes(mode) {
            nodes.extend(traverse(graph, root, mode, depth_applied));
        }
    }
    nodes.sort_by(|a, b| {
        a.depth
            .cmp(&b.depth)
            .then_with(|| a.stable_id.cmp(&b.stable_id))
            .then_with(|| a.direction.cmp(&b.direction))
    });
    let truncation = truncate(&mut nodes, limit.max(1), TruncationReason::MaxEdges);

    let total_nodes = nodes.len();
    let (callers, callees): (Vec<_>, Vec<_>) = nodes
        .into_iter()
        .partition(|n| n.direction == Traversal::Callers);
    (
        CallGraphWalk {
            root: root.to_string(),
            direction,
            depth_applied,
            callers,
            callees,
            total_nodes,
        },
        truncation,
    )
}

fn traverse(
    graph: &SymbolGraph,
    root: &str,
    mode: Traversal,
    max_depth: u32,
) -> Vec<CallGraphNode> {
    let mut out = Vec::new();
    let mut visited: HashSet<&str> = HashSet::from([root]);
    let mut queue: VecDeque<(&str, u32)> = VecDeque::from([(root, 0)]);

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let next = match mode {
            Traversal::Callers => graph.callers(current),
            Traversal::Callees => graph.callees(current),
        };
        for neighbor in next {
            if !visited.insert(neighbor) {
                continue;
            }
            out.push(CallGraphNode {
                stable_id: neighbor.to_string(),
                name: graph.symbol(neighbor).map(|s| s.name.clone()),
                depth: depth + 1,
                edge_kind: EdgeKind::Call,
                direction: mode,
            });
            queue.push_back((neighbor, depth + 1));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphEdgeRecord, SymbolGraphExport};
    use sextant_core::types::ReferenceKind;

    fn chain() -> SymbolGraph {
        // a -> b -> c -> d -> e -> f, plus x -> b and b -> y (reference only)
        let mut edges: Vec<GraphEdgeRecord> = ["a", "b", "c", "d", "e", "f"]
            .windows(2)
            .map(|w| GraphEdgeRecord {
                from: w[0].into(),
                to: w[1].into(),
                kind: ReferenceKind::Call,
            })
            .collect();
        edges.push(GraphEdgeRecord {
            from: "x".into(),
            to: "b".into(),
            kind: ReferenceKind::Call,
        });
        edges.push(GraphEdgeRecord {
            from: "b".into(),
            to: "y".into(),
            kind: ReferenceKind::Reference,
        });
        SymbolGraph::build(&SymbolGraphExport {
            symbols: Vec::new(),
            edges,
        })
    }

    #[test]
    fn depth_is_clamped() {
        assert_eq!(clamp_depth(0), 1);
        assert_eq!(clamp_depth(3), 3);
        assert_eq!(clamp_depth(99), MAX_CALL_GRAPH_DEPTH);
    }

    #[test]
    fn walks_both_directions_by_depth() {
        let (walk, truncation) = walk_call_graph(&chain(), "c", CallGraphDirection::Both, 2, 50);
        assert!(truncation.is_none());
        let callers: Vec<(&str, u32)> = walk
            .callers
            .iter()
            .map(|n| (n.stable_id.as_str(), n.depth))
            .collect();
        assert_eq!(callers, vec![("b", 1), ("a", 2), ("x", 2)]);
        let callees: Vec<(&str, u32)> = walk
            .callees
            .iter()
            .map(|n| (n.stable_id.as_str(), n.depth))
            .collect();
        assert_eq!(callees, vec![("d", 1), ("e", 2)]);
    }

    #[test]
    fn reference_edges_are_not_calls() {
        let (walk, _) = walk_call_graph(&chain(), "b", CallGraphDirection::Callees, 4, 50);
        assert!(walk.callees.iter().all(|n| n.stable_id != "y"));
        assert_eq!(walk.depth_applied, 4);
        assert_eq!(walk.callees.len(), 4);
    }

    #[test]
    fn limit_truncates_with_max_edges() {
        let (walk, truncation) = walk_call_graph(&chain(), "a", CallGraphDirection::Callees, 9, 2);
        let truncation = truncation.unwrap();
        assert_eq!(truncation.reason, TruncationReason::MaxEdges);
        assert_eq!((truncation.original_count, truncation.returned_count), (4, 2));
        assert_eq!(walk.total_nodes, 2);
        assert_eq!(walk.callees[0].stable_id, "b");
    }
}

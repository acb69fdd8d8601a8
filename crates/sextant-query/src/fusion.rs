//! Multi-signal fusion ranking.
//!
//! Each candidate carries five raw signals: lexical score (`fts`), graph proximity from a
//! personalized PageRank walk (`ppr`), file churn (`hotspot`), file `recency` and an `exact`
//! name-match flag. Signals are min-max normalized independently and combined with a
//! versioned weight vector; the per-signal breakdown travels with every result for audit.

use crate::backend::owner_of_stable_id;
use crate::graph::{PprParams, SymbolGraph, personalized_pagerank};
use serde::{Deserialize, Serialize};
use sextant_core::config::RankingConfig;
use sextant_core::types::{CompletenessInfo, SymbolInfo, SymbolKind, Visibility};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionWeights {
    pub fts: f64,
    pub ppr: f64,
    pub hotspot: f64,
    pub recency: f64,
    pub exact: f64,
    pub policy_version: String,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self::from_config(&RankingConfig::default())
    }
}

impl FusionWeights {
    pub fn from_config(config: &RankingConfig) -> Self {
        Self {
            fts: config.weights.fts,
            ppr: config.weights.ppr,
            hotspot: config.weights.hotspot,
            recency: config.weights.recency,
            exact: config.weights.exact,
            policy_version: config.policy_version.clone(),
        }
    }

    fn apply(&self, s: &SignalBreakdown) -> f64 {
        self.fts * s.fts
            + self.ppr * s.ppr
            + self.hotspot * s.hotspot
            + self.recency * s.recency
            + self.exact * s.exact
    }
}

/// Normalized per-signal contributions, serialized as `{fts, ppr, hotspot, recency, exact}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalBreakdown {
    pub fts: f64,
    pub ppr: f64,
    pub hotspot: f64,
    pub recency: f64,
    pub exact: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Partial,
    Fuzzy,
}

/// A search hit before fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub symbol: SymbolInfo,
    pub lexical_score: f64,
    pub match_type: MatchType,
}

impl Candidate {
    /// Score `symbol` against `query` by name match, visibility and kind.
    pub fn score(query: &str, symbol: SymbolInfo) -> Self {
        let (base, match_type) = name_match(query, &symbol.name);
        let lexical_score =
            base + visibility_bonus(symbol.visibility.visibility) + kind_bonus(symbol.kind);
        Self {
            symbol,
            lexical_score,
            match_type,
        }
    }
}

fn name_match(query: &str, name: &str) -> (f64, MatchType) {
    let query = query.trim().to_lowercase();
    let name = name.to_lowercase();
    if query.is_empty() {
        return (10.0, MatchType::Fuzzy);
    }
    if name == query {
        (100.0, MatchType::Exact)
    } else if name.starts_with(&query) {
        (50.0, MatchType::Partial)
    } else if name.contains(&query) {
        (25.0, MatchType::Partial)
    } else {
        (10.0, MatchType::Fuzzy)
    }
}

fn visibility_bonus(visibility: Visibility) -> f64 {
    match visibility {
        Visibility::Public => 30.0,
        Visibility::Internal => 20.0,
        Visibility::Private => 10.0,
        Visibility::Unknown => 5.0,
    }
}

fn kind_bonus(kind: SymbolKind) -> f64 {
    match kind {
        SymbolKind::Class | SymbolKind::Struct | SymbolKind::Interface | SymbolKind::Trait => 25.0,
        SymbolKind::Function => 20.0,
        SymbolKind::Method => 15.0,
        SymbolKind::Property | SymbolKind::Field => 10.0,
        _ => 5.0,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
    #[serde(flatten)]
    pub symbol: SymbolInfo,
    pub match_type: MatchType,
    pub lexical_score: f64,
    pub fusion_score: f64,
    pub breakdown: SignalBreakdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionParams {
    pub seed_limit: usize,
    pub max_expanded_seeds: usize,
    pub ppr_top_k: usize,
    pub graph_budget: Duration,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self::from_config(&RankingConfig::default())
    }
}

impl FusionParams {
    pub fn from_config(config: &RankingConfig) -> Self {
        Self {
            seed_limit: config.seed_limit,
            max_expanded_seeds: config.max_expanded_seeds,
            ppr_top_k: config.ppr_top_k,
            graph_budget: Duration::from_millis(config.graph_budget_ms),
        }
    }
}

/// Optional signal sources. Any of them may be absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalInputs<'a> {
    pub hotspot: Option<&'a HashMap<String, f64>>,
    pub recency: Option<&'a HashMap<String, f64>>,
    pub graph: Option<&'a SymbolGraph>,
}

/// Summary of the graph walk that fed the `ppr` signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphWalkSummary {
    pub seed_nodes: usize,
    pub iterations: usize,
    pub converged: bool,
    pub scored_nodes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutput {
    pub results: Vec<RankedResult>,
    pub policy_version: String,
    pub warnings: Vec<String>,
    pub graph_walk: Option<GraphWalkSummary>,
    /// Weight of signals that failed while computing and were zeroed.
    pub dropped_weight: f64,
}

enum GraphSkip {
    Absent,
    Failed(String),
}

/// Lower `completeness` after ranking signals worth `dropped_weight` of the fused score
/// failed. Each unit of lost weight costs half its share of the score.
pub fn degrade_for_dropped_signals(completeness: &mut CompletenessInfo, dropped_weight: f64) {
    if dropped_weight <= 0.0 {
        return;
    }
    let factor = 1.0 - dropped_weight.min(1.0) / 2.0;
    completeness.score = (completeness.score * factor).clamp(0.0, 1.0);
    let note = format!("ranking signals worth {dropped_weight:.2} of the fused score failed");
    completeness.details = Some(match completeness.details.take() {
        Some(existing) => format!("{existing}; {note}"),
        None => note,
    });
}

pub fn fuse(
    candidates: Vec<Candidate>,
    inputs: &SignalInputs<'_>,
    weights: &FusionWeights,
    params: &FusionParams,
) -> FusionOutput {
    let mut warnings = Vec::new();
    if candidates.is_empty() {
        return FusionOutput {
            results: Vec::new(),
            policy_version: weights.policy_version.clone(),
            warnings,
            graph_walk: None,
            dropped_weight: 0.0,
        };
    }

    let fts = min_max_normalize(
        &candidates.iter().map(|c| c.lexical_score).collect::<Vec<_>>(),
    );
    let exact = min_max_normalize(
        &candidates
            .iter()
            .map(|c| if c.match_type == MatchType::Exact { 1.0 } else { 0.0 })
            .collect::<Vec<_>>(),
    );
    let hotspot = file_signal(&candidates, inputs.hotspot);
    let recency = file_signal(&candidates, inputs.recency);

    let mut dropped_weight = 0.0;
    let (ppr, graph_walk) = match graph_signal(&candidates, inputs.graph, params) {
        Ok((raw, summary)) => (min_max_normalize(&raw), Some(summary)),
        Err(GraphSkip::Absent) => {
            debug!("No symbol graph; ppr set to zero");
            warnings.push("ppr signal disabled: no symbol graph available".to_string());
            (vec![0.0; candidates.len()], None)
        }
        Err(GraphSkip::Failed(reason)) => {
            warn!(%reason, "Graph walk failed; ppr set to zero");
            warnings.push(format!("ppr signal disabled: {reason}"));
            dropped_weight += weights.ppr;
            (vec![0.0; candidates.len()], None)
        }
    };

    let mut results: Vec<RankedResult> = candidates
        .into_iter()
        .enumerate()
        .map(|(i, candidate)| {
            let breakdown = SignalBreakdown {
                fts: fts[i],
                ppr: ppr[i],
                hotspot: hotspot[i],
                recency: recency[i],
                exact: exact[i],
            };
            RankedResult {
                fusion_score: weights.apply(&breakdown),
                symbol: candidate.symbol,
                match_type: candidate.match_type,
                lexical_score: candidate.lexical_score,
                breakdown,
            }
        })
        .collect();
    sort_ranked(&mut results);

    debug!(
        results = results.len(),
        policy = %weights.policy_version,
        graph = graph_walk.is_some(),
        "Fused ranking"
    );
    FusionOutput {
        results,
        policy_version: weights.policy_version.clone(),
        warnings,
        graph_walk,
        dropped_weight,
    }
}

/// Descending fused score, ties by ascending stable id.
pub fn sort_ranked(results: &mut [RankedResult]) {
    results.sort_by(|a, b| {
        b.fusion_score
            .total_cmp(&a.fusion_score)
            .then_with(|| a.symbol.stable_id.cmp(&b.symbol.stable_id))
    });
}

/// Scale into [0, 1]; a constant (or single-value) slice maps to 0.5.
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() || !max.is_finite() || (max - min).abs() < f64::EPSILON {
        return vec![0.5; values.len()];
    }
    values
        .iter()
        .map(|v| {
            if v.is_finite() {
                ((v - min) / (max - min)).clamp(0.0, 1.0)
            } else {
                0.0
            }
        })
        .collect()
}

fn file_signal(candidates: &[Candidate], source: Option<&HashMap<String, f64>>) -> Vec<f64> {
    let Some(map) = source.filter(|m| !m.is_empty()) else {
        return vec![0.0; candidates.len()];
    };
    let raw: Vec<f64> = candidates
        .iter()
        .map(|c| {
            c.symbol
                .location
                .as_ref()
                .and_then(|loc| map.get(&loc.path))
                .copied()
                .unwrap_or(0.0)
        })
        .collect();
    min_max_normalize(&raw)
}

fn graph_signal(
    candidates: &[Candidate],
    graph: Option<&SymbolGraph>,
    params: &FusionParams,
) -> Result<(Vec<f64>, GraphWalkSummary), GraphSkip> {
    let graph = graph.ok_or(GraphSkip::Absent)?;
    let seeds = select_seeds(candidates, graph, params);
    let ppr_params = PprParams {
        top_k: params.ppr_top_k.max(candidates.len()),
        deadline: Some(Instant::now() + params.graph_budget),
        ..PprParams::default()
    };
    let walk = personalized_pagerank(graph, &seeds, &ppr_params)
        .map_err(|e| GraphSkip::Failed(e.to_string()))?;
    let scores = walk.score_map();
    let raw = candidates
        .iter()
        .map(|c| scores.get(c.symbol.stable_id.as_str()).copied().unwrap_or(0.0))
        .collect();
    Ok((
        raw,
        GraphWalkSummary {
            seed_nodes: walk.seed_nodes,
            iterations: walk.iterations,
            converged: walk.converged,
            scored_nodes: walk.scores.len(),
        },
    ))
}

/// Top lexical hits, expanded with callable members of the same structural owner.
pub fn select_seeds(
    candidates: &[Candidate],
    graph: &SymbolGraph,
    params: &FusionParams,
) -> Vec<String> {
    let mut by_lexical: Vec<&Candidate> = candidates.iter().collect();
    by_lexical.sort_by(|a, b| {
        b.lexical_score
            .total_cmp(&a.lexical_score)
            .then_with(|| a.symbol.stable_id.cmp(&b.symbol.stable_id))
    });

    let mut seeds: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for candidate in by_lexical.iter().take(params.seed_limit) {
        if seen.insert(candidate.symbol.stable_id.clone()) {
            seeds.push(candidate.symbol.stable_id.clone());
        }
    }

    let owners: Vec<String> = seeds
        .iter()
        .filter_map(|id| owner_of_stable_id(id).map(str::to_string))
        .collect();
    for owner in owners {
        if seeds.len() >= params.max_expanded_seeds {
            break;
        }
        let mut members: Vec<&str> = graph
            .node_ids()
            .filter(|id| id.ends_with("()") && owner_of_stable_id(id) == Some(owner.as_str()))
            .collect();
        members.sort_unstable();
        for member in members {
            if seeds.len() >= params.max_expanded_seeds {
                break;
            }
            if seen.insert(member.to_string()) {
                seeds.push(member.to_string());
            }
        }
    }
    seeds
}

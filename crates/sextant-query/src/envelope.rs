//! Uniform response envelope: provenance, completeness, truncation and drilldowns.

use crate::orchestrator::Outcome;
use crate::repo_state::ObservedState;
use serde::{Deserialize, Serialize};
use sextant_core::types::{
    BackendContribution, CompletenessInfo, CompletenessReason, Drilldown, RepoStateMode,
    SymbolKind, TruncationInfo, TruncationReason,
};
use std::collections::HashSet;
use std::time::Instant;

const LOW_COMPLETENESS: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub repo_state_id: String,
    pub repo_state_dirty: bool,
    pub repo_state_mode: RepoStateMode,
    pub backends: Vec<BackendContribution>,
    pub completeness: CompletenessInfo,
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<String>,
    pub query_duration_ms: u64,
    pub warnings: Vec<String>,
    pub timeouts: Vec<String>,
    pub truncations: Vec<TruncationInfo>,
}

impl Provenance {
    pub fn new(observed: &ObservedState, completeness: CompletenessInfo) -> Self {
        Self {
            repo_state_id: observed.snapshot.id.clone(),
            repo_state_dirty: observed.snapshot.dirty,
            repo_state_mode: observed.mode,
            backends: Vec::new(),
            completeness,
            cached: false,
            cached_at: None,
            query_duration_ms: 0,
            warnings: Vec::new(),
            timeouts: Vec::new(),
            truncations: Vec::new(),
        }
    }

    /// Fold an orchestrated call's audit trail in. Backends seen twice keep the first entry.
    pub fn absorb<T>(&mut self, outcome: &Outcome<T>) {
        for contribution in &outcome.contributions {
            if !self
                .backends
                .iter()
                .any(|b| b.backend_id == contribution.backend_id && b.used)
            {
                self.backends
                    .retain(|b| b.backend_id != contribution.backend_id);
                self.backends.push(contribution.clone());
            }
        }
        for warning in &outcome.warnings {
            self.warn(warning.clone());
        }
        for timeout in &outcome.timeouts {
            if !self.timeouts.contains(timeout) {
                self.timeouts.push(timeout.clone());
            }
        }
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    pub fn mark_cached(&mut self, cached_at: String) {
        self.cached = true;
        self.cached_at = Some(cached_at);
    }

    pub fn finish(mut self, started: Instant) -> Self {
        self.query_duration_ms = started.elapsed().as_millis() as u64;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    #[serde(flatten)]
    pub result: T,
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation_info: Option<TruncationInfo>,
    pub drilldowns: Vec<Drilldown>,
}

impl<T> Envelope<T> {
    /// Wrap `result`; the first recorded truncation becomes `truncationInfo`.
    pub fn new(result: T, provenance: Provenance, drilldowns: Vec<Drilldown>) -> Self {
        Self {
            truncation_info: provenance.truncations.first().cloned(),
            result,
            provenance,
            drilldowns,
        }
    }
}

/// Cut `items` (already sorted) to `limit`, reporting the cut when one happened.
pub fn truncate<T>(
    items: &mut Vec<T>,
    limit: usize,
    reason: TruncationReason,
) -> Option<TruncationInfo> {
    let original_count = items.len();
    if original_count <= limit {
        return None;
    }
    items.truncate(limit);
    Some(TruncationInfo {
        reason,
        original_count,
        returned_count: items.len(),
    })
}

/// Facts about a response that drive follow-up suggestions.
#[derive(Debug, Clone, Default)]
pub struct DrilldownContext<'a> {
    pub truncation: Option<&'a TruncationInfo>,
    pub completeness: Option<&'a CompletenessInfo>,
    pub index_stale: bool,
    pub symbol_id: Option<&'a str>,
    /// `(module id, display name)` of the highest-impact module.
    pub top_module: Option<(&'a str, &'a str)>,
    pub query: Option<&'a str>,
    pub top_result: Option<&'a str>,
    pub top_kind: Option<SymbolKind>,
}

pub fn build_drilldowns(ctx: &DrilldownContext<'_>, max: usize) -> Vec<Drilldown> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let reason = ctx.truncation.map(|t| t.reason);

    match (reason, ctx.top_module, ctx.symbol_id) {
        (Some(TruncationReason::MaxModules), Some((module_id, name)), _) => push_drilldown(
            &mut out,
            &mut seen,
            format!("Explore top module: {name}"),
            format!("getArchitecture --module={module_id}"),
            0.9,
        ),
        (Some(TruncationReason::MaxItems), Some((module_id, _)), Some(id)) => push_drilldown(
            &mut out,
            &mut seen,
            "Scope to specific module".to_string(),
            format!("findReferences {id} --scope={module_id}"),
            0.85,
        ),
        (Some(TruncationReason::MaxRefs), _, Some(id)) => push_drilldown(
            &mut out,
            &mut seen,
            "Get first page of references".to_string(),
            format!("findReferences {id} --limit=100"),
            0.8,
        ),
        (Some(TruncationReason::Timeout), _, Some(id)) => push_drilldown(
            &mut out,
            &mut seen,
            "Retry with faster backend".to_string(),
            format!("findReferences {id} --backend=index"),
            0.75,
        ),
        (Some(TruncationReason::MaxResults), _, _) => {
            if let (Some(query), Some(kind)) = (ctx.query, ctx.top_kind) {
                push_drilldown(
                    &mut out,
                    &mut seen,
                    "Narrow by kind".to_string(),
                    format!("searchSymbols {query} --kind={kind}"),
                    0.7,
                );
            }
        }
        _ => {}
    }

    if let Some(completeness) = ctx.completeness {
        match completeness.reason {
            CompletenessReason::BestEffortLsp => push_drilldown(
                &mut out,
                &mut seen,
                "Check workspace status".to_string(),
                "getStatus".to_string(),
                0.7,
            ),
            CompletenessReason::WorkspaceNotReady => {
                if let Some(id) = ctx.symbol_id {
                    push_drilldown(
                        &mut out,
                        &mut seen,
                        "Retry after warmup".to_string(),
                        format!("findReferences {id} --wait-for-ready"),
                        0.8,
                    );
                }
            }
            _ => {}
        }
        if completeness.score < LOW_COMPLETENESS
            && let Some(id) = ctx.symbol_id
        {
            push_drilldown(
                &mut out,
                &mut seen,
                "Get maximum results (slower)".to_string(),
                format!("findReferences {id} --merge=union"),
                0.65,
            );
        }
    }

    if ctx.index_stale {
        push_drilldown(
            &mut out,
            &mut seen,
            "Regenerate index".to_string(),
            "doctor --check=index".to_string(),
            0.6,
        );
    }

    if let Some(top) = ctx.top_result {
        push_drilldown(
            &mut out,
            &mut seen,
            "Get symbol details".to_string(),
            format!("getSymbol {top}"),
            0.55,
        );
        push_drilldown(
            &mut out,
            &mut seen,
            "Find references".to_string(),
            format!("findReferences {top}"),
            0.5,
        );
    }

    out.sort_by(|a, b| {
        b.relevance_score
            .total_cmp(&a.relevance_score)
            .then_with(|| a.label.cmp(&b.label))
    });
    out.truncate(max);
    out
}

fn push_drilldown(
    out: &mut Vec<Drilldown>,
    seen: &mut HashSet<String>,
    label: String,
    query: String,
    relevance_score: f64,
) {
    if seen.insert(query.clone()) {
        out.push(Drilldown {
            label,
            query,
            relevance_score,
        });
    }
}

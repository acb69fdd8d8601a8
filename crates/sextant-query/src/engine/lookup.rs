use super::Engine;
use crate::backend::{CallBudget, RefOptions, SearchOptions, SymbolBackend};
use crate::backends::FileSignals;
use crate::cache::{cache_key, normalize_list};
use crate::envelope::{DrilldownContext, Envelope, Provenance, build_drilldowns, truncate};
use crate::fusion::{
    Candidate, GraphWalkSummary, RankedResult, SignalInputs, degrade_for_dropped_signals, fuse,
};
use crate::graph::SymbolGraph;
use crate::identity::{Resolution, ResolvedSymbol, is_bare_name};
use crate::orchestrator::Outcome;
use crate::repo_state::ObservedState;
use crate::scope::ScopeFilter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sextant_core::constants::{DEFAULT_REFS_LIMIT, DEFAULT_SEARCH_LIMIT};
use sextant_core::error::{ErrorCode, QueryError};
use sextant_core::types::{
    AliasReason, Capability, CompletenessInfo, CompletenessReason, MergeMode, ReferenceInfo,
    RepoStateMode, SymbolInfo, SymbolKind, SymbolMapping, TruncationReason, VisibilityInfo,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchRequest {
    pub query: String,
    pub scope: Option<String>,
    pub kinds: Vec<String>,
    pub limit: usize,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            scope: None,
            kinds: Vec::new(),
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub query: String,
    pub results: Vec<RankedResult>,
    pub total_candidates: usize,
    pub policy_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_walk: Option<GraphWalkSummary>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSymbolRequest {
    pub symbol_id: String,
    #[serde(default)]
    pub repo_state_mode: RepoStateMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindReferencesRequest {
    pub symbol_id: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub include_tests: bool,
    #[serde(default = "default_refs_limit")]
    pub limit: usize,
    #[serde(default)]
    pub merge: Option<String>,
}

fn default_refs_limit() -> usize {
    DEFAULT_REFS_LIMIT
}

impl FindReferencesRequest {
    pub fn new(symbol_id: impl Into<String>) -> Self {
        Self {
            symbol_id: symbol_id.into(),
            scope: None,
            include_tests: false,
            limit: DEFAULT_REFS_LIMIT,
            merge: None,
        }
    }
}

/// How a caller-supplied reference mapped onto a canonical symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTarget {
    pub requested_id: String,
    pub stable_id: String,
    pub redirected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirected_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_reason: Option<AliasReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_confidence: Option<f64>,
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolResult {
    #[serde(flatten)]
    pub target: ResolvedTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<SymbolInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencesResult {
    #[serde(flatten)]
    pub target: ResolvedTarget,
    pub references: Vec<ReferenceInfo>,
    pub total_references: usize,
}

/// A resolved reference: the live symbol, or the tombstone of a deleted one.
pub(crate) enum Target {
    Live {
        resolved: ResolvedSymbol,
        requested: String,
    },
    Deleted(ResolvedTarget),
}

impl Target {
    pub(crate) fn describe(&self) -> ResolvedTarget {
        match self {
            Self::Live {
                resolved,
                requested,
            } => ResolvedTarget {
                requested_id: requested.clone(),
                stable_id: resolved.stable_id.clone(),
                redirected: resolved.redirected,
                redirected_from: resolved.redirected_from.clone(),
                redirect_reason: resolved.redirect_reason,
                redirect_confidence: resolved.redirect_confidence,
                deleted: false,
                deleted_at: None,
            },
            Self::Deleted(target) => target.clone(),
        }
    }

    /// The live symbol, or `symbol_deleted` for operations that need one.
    pub(crate) fn live(self) -> Result<(ResolvedSymbol, ResolvedTarget), QueryError> {
        let described = self.describe();
        match self {
            Self::Live { resolved, .. } => Ok((resolved, described)),
            Self::Deleted(target) => Err(QueryError::new(
                ErrorCode::SymbolDeleted,
                format!("symbol was deleted: {}", target.stable_id),
            )
            .with_details(json!({
                "stableId": target.stable_id,
                "deletedAt": target.deleted_at,
            }))),
        }
    }
}

fn parse_kinds(raw: &[String]) -> Result<Vec<SymbolKind>, QueryError> {
    let mut kinds = BTreeSet::new();
    for value in normalize_list(raw) {
        let kind = SymbolKind::parse_kind(&value).ok_or_else(|| {
            QueryError::invalid_parameter("kinds", &format!("unknown symbol kind `{value}`"))
        })?;
        kinds.insert(kind.as_str());
    }
    Ok(kinds.into_iter().filter_map(SymbolKind::parse_kind).collect())
}

pub(crate) fn parse_merge(raw: Option<&str>) -> Result<Option<MergeMode>, QueryError> {
    match raw.map(str::trim).filter(|m| !m.is_empty()) {
        None => Ok(None),
        Some(value) => MergeMode::parse(value).map(Some).ok_or_else(|| {
            QueryError::invalid_parameter("merge", "expected `prefer-first` or `union`")
        }),
    }
}

/// Identity-only view of a symbol no backend could describe.
fn symbol_from_mapping(mapping: &SymbolMapping) -> SymbolInfo {
    SymbolInfo {
        stable_id: mapping.stable_id.clone(),
        name: mapping.fingerprint.name.clone(),
        kind: mapping.fingerprint.kind,
        container: Some(mapping.fingerprint.qualified_container.clone())
            .filter(|c| !c.is_empty()),
        module_id: mapping
            .location
            .as_ref()
            .map(|l| l.directory().to_string())
            .unwrap_or_default(),
        signature: None,
        documentation: None,
        location: mapping.location.clone(),
        visibility: VisibilityInfo::unknown(),
    }
}

impl Engine {
    pub fn search_symbols(
        &self,
        request: &SearchRequest,
    ) -> Result<Envelope<SearchResult>, QueryError> {
        let started = Instant::now();
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(QueryError::invalid_parameter("query", "must not be empty"));
        }
        let scope = ScopeFilter::parse(request.scope.as_deref().unwrap_or_default())?;
        let kinds = parse_kinds(&request.kinds)?;
        let limit = request.limit.clamp(1, self.inner.config.budget.max_symbols.max(1));

        let observed = self.observe(RepoStateMode::Head);
        let key = cache_key(
            "search",
            &json!({
                "query": query,
                "scope": scope.as_ref().map(ScopeFilter::as_str),
                "kinds": kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                "limit": limit,
            }),
        );
        if let Some(hit) = self.cached(&key, &observed, started) {
            return Ok(hit);
        }

        let options = SearchOptions {
            query: query.clone(),
            scope,
            kinds,
            max_results: 0,
        };
        let outcome = self.inner.orchestrator.execute(
            Capability::SymbolSearch,
            self.inner.orchestrator.default_merge(),
            move |backend: &dyn SymbolBackend, budget: &CallBudget| {
                backend.search_symbols(&options, budget)
            },
            |symbol: &SymbolInfo| symbol.stable_id.clone(),
        );

        let mut provenance = Provenance::new(&observed, outcome.completeness.clone());
        provenance.absorb(&outcome);
        let index_stale = self.warn_if_stale(&observed, &mut provenance);

        let candidates: Vec<Candidate> = outcome
            .items
            .into_iter()
            .map(|symbol| Candidate::score(&query, symbol))
            .collect();

        let mut dropped_weight = 0.0;
        let signals = match self.file_signals(&observed) {
            Ok(signals) => signals,
            Err(e) => {
                warn!(error = %e, "Change-activity signals unavailable");
                provenance.warn(format!("hotspot and recency signals disabled: {e}"));
                dropped_weight += self.inner.weights.hotspot + self.inner.weights.recency;
                None
            }
        };
        let graph = if candidates.is_empty() {
            None
        } else {
            self.symbol_graph(&mut provenance)
        };
        let inputs = SignalInputs {
            hotspot: signals.as_ref().map(|s| &s.hotspot),
            recency: signals.as_ref().map(|s| &s.recency),
            graph: graph.as_ref(),
        };
        let fused = fuse(candidates, &inputs, &self.inner.weights, &self.inner.params);
        for warning in &fused.warnings {
            provenance.warn(warning.clone());
        }
        if !fused.results.is_empty() {
            degrade_for_dropped_signals(
                &mut provenance.completeness,
                dropped_weight + fused.dropped_weight,
            );
        }

        let mut results = fused.results;
        let total_candidates = results.len();
        if let Some(truncation) = truncate(&mut results, limit, TruncationReason::MaxResults) {
            provenance.truncations.push(truncation);
        }

        let top = results.first();
        let drilldowns = build_drilldowns(
            &DrilldownContext {
                truncation: provenance.truncations.first(),
                completeness: Some(&provenance.completeness),
                index_stale,
                query: Some(&query),
                top_result: top.map(|r| r.symbol.stable_id.as_str()),
                top_kind: top.map(|r| r.symbol.kind),
                ..DrilldownContext::default()
            },
            self.inner.config.budget.max_drilldowns,
        );
        debug!(
            query = %query,
            candidates = total_candidates,
            returned = results.len(),
            "Search finished"
        );

        let envelope = Envelope::new(
            SearchResult {
                query,
                results,
                total_candidates,
                policy_version: fused.policy_version,
                graph_walk: fused.graph_walk,
            },
            provenance.finish(started),
            drilldowns,
        );
        self.store(&key, &envelope, self.query_ttl());
        Ok(envelope)
    }

    pub fn get_symbol(
        &self,
        request: &GetSymbolRequest,
    ) -> Result<Envelope<SymbolResult>, QueryError> {
        let started = Instant::now();
        let observed = self.observe(request.repo_state_mode);
        let key = cache_key(
            "symbol",
            &json!({ "symbolId": request.symbol_id.trim() }),
        );
        if let Some(hit) = self.cached(&key, &observed, started) {
            return Ok(hit);
        }

        let mut provenance = Provenance::new(&observed, CompletenessInfo::unknown());
        let target = self.resolve_target(&request.symbol_id, &mut provenance)?;
        let index_stale = self.warn_if_stale(&observed, &mut provenance);

        let (symbol, completeness) = match &target {
            Target::Deleted(_) => (
                None,
                CompletenessInfo::new(1.0, CompletenessReason::SymbolDeleted),
            ),
            Target::Live { resolved, .. } => {
                let (symbol, completeness) = self.describe_symbol(resolved, &mut provenance)?;
                (Some(symbol), completeness)
            }
        };
        provenance.completeness = completeness;

        let described = target.describe();
        let drilldowns = build_drilldowns(
            &DrilldownContext {
                completeness: Some(&provenance.completeness),
                index_stale,
                symbol_id: (!described.deleted).then_some(described.stable_id.as_str()),
                ..DrilldownContext::default()
            },
            self.inner.config.budget.max_drilldowns,
        );
        let envelope = Envelope::new(
            SymbolResult {
                target: described,
                symbol,
            },
            provenance.finish(started),
            drilldowns,
        );
        self.store(&key, &envelope, self.query_ttl());
        Ok(envelope)
    }

    pub fn find_references(
        &self,
        request: &FindReferencesRequest,
    ) -> Result<Envelope<ReferencesResult>, QueryError> {
        let started = Instant::now();
        let scope = ScopeFilter::parse(request.scope.as_deref().unwrap_or_default())?;
        let merge = parse_merge(request.merge.as_deref())?
            .unwrap_or_else(|| self.inner.orchestrator.default_merge());
        let limit = request.limit.clamp(1, self.inner.config.budget.max_refs.max(1));

        let observed = self.observe(RepoStateMode::Head);
        let key = cache_key(
            "refs",
            &json!({
                "symbolId": request.symbol_id.trim(),
                "scope": scope.as_ref().map(ScopeFilter::as_str),
                "includeTests": request.include_tests,
                "limit": limit,
                "merge": merge.as_str(),
            }),
        );
        if let Some(hit) = self.cached(&key, &observed, started) {
            return Ok(hit);
        }

        let mut provenance = Provenance::new(&observed, CompletenessInfo::unknown());
        let (resolved, target) = self
            .resolve_target(&request.symbol_id, &mut provenance)?
            .live()?;
        let index_stale = self.warn_if_stale(&observed, &mut provenance);

        let mut references = self.references(
            &resolved.stable_id,
            RefOptions {
                scope,
                include_tests: request.include_tests,
                max_results: 0,
            },
            merge,
            &mut provenance,
        );
        let total_references = references.len();
        if let Some(truncation) = truncate(
            &mut references,
            limit,
            TruncationReason::MaxRefs,
        ) {
            provenance.truncations.push(truncation);
        }

        let drilldowns = build_drilldowns(
            &DrilldownContext {
                truncation: provenance.truncations.first(),
                completeness: Some(&provenance.completeness),
                index_stale,
                symbol_id: Some(&resolved.stable_id),
                ..DrilldownContext::default()
            },
            self.inner.config.budget.max_drilldowns,
        );
        let envelope = Envelope::new(
            ReferencesResult {
                target,
                references,
                total_references,
            },
            provenance.finish(started),
            drilldowns,
        );
        self.store(&key, &envelope, self.query_ttl());
        Ok(envelope)
    }

    /// References to `stable_id`, sorted by location. Sets the provenance completeness.
    pub(crate) fn references(
        &self,
        stable_id: &str,
        options: RefOptions,
        merge: MergeMode,
        provenance: &mut Provenance,
    ) -> Vec<ReferenceInfo> {
        let target = stable_id.to_string();
        let outcome = self.inner.orchestrator.execute(
            Capability::References,
            merge,
            move |backend: &dyn SymbolBackend, budget: &CallBudget| {
                backend.find_references(&target, &options, budget)
            },
            |r: &ReferenceInfo| {
                (
                    r.location.path.clone(),
                    r.location.line,
                    r.location.column,
                )
            },
        );
        provenance.absorb(&outcome);
        provenance.completeness = outcome.completeness;
        let mut references = outcome.items;
        references.sort_by(|a, b| {
            a.location
                .path
                .cmp(&b.location.path)
                .then_with(|| a.location.line.cmp(&b.location.line))
                .then_with(|| a.location.column.cmp(&b.location.column))
        });
        references
    }

    /// Backend description of a live symbol; identity-only when no backend knows it.
    pub(crate) fn describe_symbol(
        &self,
        resolved: &ResolvedSymbol,
        provenance: &mut Provenance,
    ) -> Result<(SymbolInfo, CompletenessInfo), QueryError> {
        let outcome = self.lookup(&resolved.stable_id);
        provenance.absorb(&outcome);
        let completeness = outcome.completeness.clone();
        let exact = outcome
            .items
            .iter()
            .find(|s| s.stable_id == resolved.stable_id)
            .cloned();
        if let Some(symbol) = exact.or_else(|| outcome.items.into_iter().next()) {
            return Ok((symbol, completeness));
        }
        match &resolved.mapping {
            Some(mapping) => {
                provenance.warn("no backend describes this symbol; using stored identity");
                Ok((
                    symbol_from_mapping(mapping),
                    CompletenessInfo::new(0.5, CompletenessReason::IdentityOnly)
                        .with_details("symbol known only from the identity store"),
                ))
            }
            None => Err(QueryError::symbol_not_found(&resolved.stable_id)),
        }
    }

    fn lookup(&self, stable_id: &str) -> Outcome<SymbolInfo> {
        let target = stable_id.to_string();
        self.inner.orchestrator.execute(
            Capability::SymbolLookup,
            MergeMode::PreferFirst,
            move |backend: &dyn SymbolBackend, budget: &CallBudget| {
                backend.get_symbol(&target, budget)
            },
            |s: &SymbolInfo| s.stable_id.clone(),
        )
    }

    /// Resolve through the identity store, falling back to direct backend lookups.
    pub(crate) fn resolve_target(
        &self,
        reference: &str,
        provenance: &mut Provenance,
    ) -> Result<Target, QueryError> {
        let requested = reference.trim().to_string();
        match self.inner.resolver.resolve(&requested)? {
            Resolution::Resolved(resolved) => Ok(Target::Live {
                resolved,
                requested,
            }),
            Resolution::Deleted {
                stable_id,
                deleted_at,
                ..
            } => Ok(Target::Deleted(ResolvedTarget {
                requested_id: requested,
                stable_id,
                redirected: false,
                redirected_from: None,
                redirect_reason: None,
                redirect_confidence: None,
                deleted: true,
                deleted_at,
            })),
            Resolution::Ambiguous { candidates } => {
                Err(QueryError::ambiguous(&requested, &candidates))
            }
            Resolution::NotFound => {
                let stable_id = self.resolve_via_backends(&requested, provenance)?;
                Ok(Target::Live {
                    resolved: ResolvedSymbol::direct(stable_id, None),
                    requested,
                })
            }
        }
    }

    fn resolve_via_backends(
        &self,
        reference: &str,
        provenance: &mut Provenance,
    ) -> Result<String, QueryError> {
        let outcome = self.lookup(reference);
        provenance.absorb(&outcome);
        let mut ids: Vec<String> = outcome.items.iter().map(|s| s.stable_id.clone()).collect();
        ids.sort();
        ids.dedup();
        match ids.len() {
            1 => return Ok(ids.remove(0)),
            0 => {}
            _ if ids.iter().any(|id| id == reference) => return Ok(reference.to_string()),
            _ => return Err(QueryError::ambiguous(reference, &ids)),
        }

        if !is_bare_name(reference) {
            return Err(QueryError::symbol_not_found(reference));
        }
        let options = SearchOptions {
            query: reference.to_string(),
            max_results: 0,
            ..SearchOptions::default()
        };
        let outcome = self.inner.orchestrator.execute(
            Capability::SymbolSearch,
            MergeMode::PreferFirst,
            move |backend: &dyn SymbolBackend, budget: &CallBudget| {
                backend.search_symbols(&options, budget)
            },
            |s: &SymbolInfo| s.stable_id.clone(),
        );
        provenance.absorb(&outcome);
        let mut exact: Vec<String> = outcome
            .items
            .iter()
            .filter(|s| s.name == reference)
            .map(|s| s.stable_id.clone())
            .collect();
        exact.sort();
        exact.dedup();
        match exact.len() {
            0 => Err(QueryError::symbol_not_found(reference)),
            1 => Ok(exact.remove(0)),
            _ => {
                warn!(reference, candidates = exact.len(), "Bare name matches several symbols");
                Err(QueryError::ambiguous(reference, &exact))
            }
        }
    }

    /// Built symbol graph, or `None` with a provenance note.
    pub(crate) fn symbol_graph(&self, provenance: &mut Provenance) -> Option<SymbolGraph> {
        let outcome = self.graph_export();
        provenance.absorb(&outcome);
        let export = outcome.items.into_iter().next();
        if export.is_none() {
            debug!("No backend exports a symbol graph");
        }
        export.map(|e| SymbolGraph::build(&e))
    }

    /// Hotspot and recency maps for the snapshot; `Ok(None)` when signals are off.
    fn file_signals(&self, observed: &ObservedState) -> Result<Option<Arc<FileSignals>>, String> {
        let Some(signals) = self.inner.signals.as_ref() else {
            return Ok(None);
        };
        if observed.snapshot.is_unknown() {
            return Ok(None);
        }
        signals
            .signals_for(&observed.snapshot.id)
            .map(Some)
            .map_err(|e| e.to_string())
    }
}

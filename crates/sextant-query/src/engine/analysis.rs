use super::lookup::ResolvedTarget;
use super::{Engine, VIEW_PREFIX};
use crate::architecture::{ArchitectureOptions, ArchitectureSummary, summarize_architecture};
use crate::backend::RefOptions;
use crate::cache::cache_key;
use crate::call_graph::{CallGraphDirection, CallGraphWalk, clamp_depth, walk_call_graph};
use crate::confidence::{MAX_WITH_AGREEMENT_BOOST, static_confidence};
use crate::envelope::{DrilldownContext, Envelope, Provenance, build_drilldowns, truncate};
use crate::graph::SymbolGraph;
use crate::impact::{ImpactInput, ImpactReport, analyze_impact};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sextant_core::constants::{IMPACT_REFERENCE_CAP, JOB_REFRESH_ARCHITECTURE};
use sextant_core::error::QueryError;
use sextant_core::types::{
    CompletenessInfo, CompletenessReason, RepoStateMode, SymbolInfo, TruncationReason,
};
use sextant_state::jobs::JobRecord;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const DEFAULT_ANALYSIS_DEPTH: u32 = 2;
const DEFAULT_CALL_GRAPH_LIMIT: usize = 50;

fn default_depth() -> u32 {
    DEFAULT_ANALYSIS_DEPTH
}

fn default_call_graph_limit() -> usize {
    DEFAULT_CALL_GRAPH_LIMIT
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactRequest {
    pub symbol_id: String,
    #[serde(default = "default_depth")]
    pub depth: u32,
    #[serde(default)]
    pub include_tests: bool,
}

impl ImpactRequest {
    pub fn new(symbol_id: impl Into<String>) -> Self {
        Self {
            symbol_id: symbol_id.into(),
            depth: DEFAULT_ANALYSIS_DEPTH,
            include_tests: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactResult {
    #[serde(flatten)]
    pub target: ResolvedTarget,
    pub symbol: SymbolInfo,
    #[serde(flatten)]
    pub report: ImpactReport,
    pub blended_confidence: f64,
    pub confidence_policy: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallGraphRequest {
    pub symbol_id: String,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default = "default_depth")]
    pub depth: u32,
    #[serde(default = "default_call_graph_limit")]
    pub limit: usize,
}

impl CallGraphRequest {
    pub fn new(symbol_id: impl Into<String>) -> Self {
        Self {
            symbol_id: symbol_id.into(),
            direction: None,
            depth: DEFAULT_ANALYSIS_DEPTH,
            limit: DEFAULT_CALL_GRAPH_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallGraphResult {
    #[serde(flatten)]
    pub target: ResolvedTarget,
    #[serde(flatten)]
    pub walk: CallGraphWalk,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArchitectureRequest {
    pub depth: Option<usize>,
    pub module: Option<String>,
    pub include_external: bool,
    /// Drop cached views and recompute.
    pub refresh: bool,
}

pub type ArchitectureResult = ArchitectureSummary;

fn top_module_name(module_id: &str) -> &str {
    module_id
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(module_id)
}

impl Engine {
    /// Blast radius of changing one symbol.
    pub fn analyze_impact(
        &self,
        request: &ImpactRequest,
    ) -> Result<Envelope<ImpactResult>, QueryError> {
        let started = Instant::now();
        let depth = clamp_depth(request.depth);
        let observed = self.observe(RepoStateMode::Head);
        let key = cache_key(
            "impact",
            &json!({
                "symbolId": request.symbol_id.trim(),
                "depth": depth,
                "includeTests": request.include_tests,
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
        let (symbol, symbol_completeness) = self.describe_symbol(&resolved, &mut provenance)?;

        let mut references = self.references(
            &resolved.stable_id,
            RefOptions {
                scope: None,
                include_tests: true,
                max_results: 0,
            },
            self.inner.orchestrator.default_merge(),
            &mut provenance,
        );
        if let Some(truncation) =
            truncate(&mut references, IMPACT_REFERENCE_CAP, TruncationReason::MaxRefs)
        {
            provenance.truncations.push(truncation);
        }
        if symbol_completeness.reason == CompletenessReason::IdentityOnly {
            provenance.completeness = symbol_completeness;
        }

        let graph = self.symbol_graph(&mut provenance);
        let budget = &self.inner.config.budget;
        let (report, truncations) = analyze_impact(&ImpactInput {
            target: &symbol,
            references: &references,
            graph: graph.as_ref(),
            depth,
            include_tests: request.include_tests,
            max_items: budget.max_impact_items,
            max_modules: budget.max_modules,
        });
        provenance.truncations.extend(truncations);

        let blended_confidence = static_confidence(&provenance.completeness);
        let top_module = report
            .modules
            .first()
            .map(|m| (m.module_id.as_str(), top_module_name(&m.module_id)));
        let drilldowns = build_drilldowns(
            &DrilldownContext {
                truncation: provenance.truncations.first(),
                completeness: Some(&provenance.completeness),
                index_stale,
                symbol_id: Some(&resolved.stable_id),
                top_module,
                ..DrilldownContext::default()
            },
            budget.max_drilldowns,
        );
        debug!(
            symbol = %resolved.stable_id,
            items = report.items.len(),
            risk = ?report.risk.level,
            "Impact analysis finished"
        );

        let envelope = Envelope::new(
            ImpactResult {
                target,
                symbol,
                report,
                blended_confidence,
                confidence_policy: MAX_WITH_AGREEMENT_BOOST.name.to_string(),
            },
            provenance.finish(started),
            drilldowns,
        );
        self.store(&key, &envelope, self.query_ttl());
        Ok(envelope)
    }

    pub fn get_call_graph(
        &self,
        request: &CallGraphRequest,
    ) -> Result<Envelope<CallGraphResult>, QueryError> {
        let started = Instant::now();
        let direction = match request.direction.as_deref().map(str::trim) {
            None | Some("") => CallGraphDirection::default(),
            Some(raw) => CallGraphDirection::parse(raw).ok_or_else(|| {
                QueryError::invalid_parameter("direction", "expected callers, callees or both")
            })?,
        };
        let depth = clamp_depth(request.depth);
        let limit = request.limit.clamp(1, self.inner.config.budget.max_edges.max(1));

        let observed = self.observe(RepoStateMode::Head);
        let key = cache_key(
            "callgraph",
            &json!({
                "symbolId": request.symbol_id.trim(),
                "direction": direction,
                "depth": depth,
                "limit": limit,
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

        let outcome = self.graph_export();
        provenance.absorb(&outcome);
        provenance.completeness = outcome.completeness.clone();
        let graph = outcome
            .items
            .into_iter()
            .next()
            .map(|export| SymbolGraph::build(&export))
            .unwrap_or_default();
        if graph.is_empty() {
            provenance.warn("no symbol graph available; call graph is empty");
        }

        let (walk, truncation) =
            walk_call_graph(&graph, &resolved.stable_id, direction, depth, limit);
        provenance.truncations.extend(truncation);

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
            CallGraphResult { target, walk },
            provenance.finish(started),
            drilldowns,
        );
        self.store(&key, &envelope, self.query_ttl());
        Ok(envelope)
    }

    /// Module map of the repository, cached as a view until HEAD moves.
    pub fn get_architecture(
        &self,
        request: &ArchitectureRequest,
    ) -> Result<Envelope<ArchitectureResult>, QueryError> {
        let started = Instant::now();
        if request.depth == Some(0) {
            return Err(QueryError::invalid_parameter("depth", "must be at least 1"));
        }
        let module = request
            .module
            .as_deref()
            .map(|m| m.trim().trim_matches('/').to_string())
            .filter(|m| !m.is_empty());

        if request.refresh {
            let dropped = self.inner.cache.invalidate_prefix(VIEW_PREFIX);
            self.inner.tracker.invalidate();
            debug!(dropped, "Architecture views invalidated");
        }
        let observed = self.observe(RepoStateMode::Head);
        let key = cache_key(
            &format!("{VIEW_PREFIX}architecture"),
            &json!({
                "depth": request.depth,
                "module": module,
                "includeExternal": request.include_external,
            }),
        );
        if let Some(hit) = self.cached(&key, &observed, started) {
            return Ok(hit);
        }

        let mut provenance = Provenance::new(&observed, CompletenessInfo::unknown());
        let index_stale = self.warn_if_stale(&observed, &mut provenance);
        let outcome = self.graph_export();
        provenance.absorb(&outcome);
        provenance.completeness = outcome.completeness.clone();
        let export = outcome.items.into_iter().next().unwrap_or_default();

        let budget = &self.inner.config.budget;
        let (summary, truncations) = summarize_architecture(
            &export,
            &ArchitectureOptions {
                depth: request.depth,
                module,
                include_external: request.include_external,
                max_modules: budget.max_modules,
                max_edges: budget.max_edges,
            },
        );
        provenance.truncations.extend(truncations);

        let top_module = summary
            .modules
            .first()
            .map(|m| (m.module_id.as_str(), m.name.as_str()));
        let drilldowns = build_drilldowns(
            &DrilldownContext {
                truncation: provenance.truncations.first(),
                completeness: Some(&provenance.completeness),
                index_stale,
                top_module,
                ..DrilldownContext::default()
            },
            budget.max_drilldowns,
        );
        let envelope = Envelope::new(summary, provenance.finish(started), drilldowns);
        self.store(&key, &envelope, self.view_ttl());
        Ok(envelope)
    }

    /// Queue an architecture recompute; the job result is the fresh summary.
    pub fn refresh_architecture_async(&self) -> Result<JobRecord, QueryError> {
        let inner = Arc::downgrade(&self.inner);
        let record = self.inner.jobs.submit(
            JOB_REFRESH_ARCHITECTURE,
            None,
            Box::new(move |ctx| {
                let inner = inner
                    .upgrade()
                    .ok_or_else(|| "query engine was shut down".to_string())?;
                ctx.report_progress(10);
                let engine = Engine::from_inner(inner);
                if ctx.is_cancelled() {
                    return Err("cancelled before recompute".to_string());
                }
                ctx.report_progress(50);
                let envelope = engine
                    .get_architecture(&ArchitectureRequest {
                        refresh: true,
                        ..ArchitectureRequest::default()
                    })
                    .map_err(|e| e.to_string())?;
                ctx.report_progress(100);
                serde_json::to_value(&envelope.result).map_err(|e| e.to_string())
            }),
        )?;
        info!(job_id = %record.job_id, "Architecture refresh queued");
        Ok(record)
    }
}

use anyhow::Result;
use serde_json::Value;
use sextant_query::{Engine, SearchRequest};

pub fn run(
    engine: &Engine,
    query: String,
    scope: Option<String>,
    kinds: Vec<String>,
    limit: usize,
) -> Result<Value> {
    let envelope = engine.search_symbols(&SearchRequest {
        query,
        scope,
        kinds,
        limit,
    })?;
    tracing::debug!(
        results = envelope.result.results.len(),
        cached = envelope.provenance.cached,
        "search complete"
    );
    Ok(serde_json::to_value(envelope)?)
}

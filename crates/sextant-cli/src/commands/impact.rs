use anyhow::Result;
use serde_json::Value;
use sextant_query::{Engine, ImpactRequest};

pub fn run(engine: &Engine, symbol_id: String, depth: u32, include_tests: bool) -> Result<Value> {
    let envelope = engine.analyze_impact(&ImpactRequest {
        symbol_id,
        depth,
        include_tests,
    })?;
    tracing::debug!(
        items = envelope.result.report.items.len(),
        risk = ?envelope.result.report.risk.level,
        "impact analysis complete"
    );
    Ok(serde_json::to_value(envelope)?)
}

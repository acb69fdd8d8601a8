use anyhow::Result;
use serde_json::Value;
use sextant_query::{Engine, FindReferencesRequest};

pub fn run(
    engine: &Engine,
    symbol_id: String,
    scope: Option<String>,
    include_tests: bool,
    limit: usize,
    merge: Option<String>,
) -> Result<Value> {
    let envelope = engine.find_references(&FindReferencesRequest {
        symbol_id,
        scope,
        include_tests,
        limit,
        merge,
    })?;
    Ok(serde_json::to_value(envelope)?)
}

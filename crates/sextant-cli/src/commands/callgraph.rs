use anyhow::Result;
use serde_json::Value;
use sextant_query::{CallGraphRequest, Engine};

pub fn run(
    engine: &Engine,
    symbol_id: String,
    direction: String,
    depth: u32,
    limit: usize,
) -> Result<Value> {
    let envelope = engine.get_call_graph(&CallGraphRequest {
        symbol_id,
        direction: Some(direction),
        depth,
        limit,
    })?;
    Ok(serde_json::to_value(envelope)?)
}

use anyhow::Result;
use serde_json::Value;
use sextant_core::error::QueryError;
use sextant_core::types::RepoStateMode;
use sextant_query::{Engine, GetSymbolRequest};

pub fn run(engine: &Engine, symbol_id: String, mode: &str) -> Result<Value> {
    let repo_state_mode = RepoStateMode::parse(mode)
        .ok_or_else(|| QueryError::invalid_parameter("repoStateMode", "expected head or full"))?;
    let envelope = engine.get_symbol(&GetSymbolRequest {
        symbol_id,
        repo_state_mode,
    })?;
    Ok(serde_json::to_value(envelope)?)
}

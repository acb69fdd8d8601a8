use anyhow::Result;
use serde_json::Value;
use sextant_query::Engine;

pub fn run(engine: &Engine) -> Result<Value> {
    let status = engine.get_status();
    if status.index_stale {
        tracing::warn!(
            head = %status.repo_state.head_commit,
            "Index snapshot is older than HEAD; regenerate .sextant/index.json"
        );
    }
    Ok(serde_json::to_value(status)?)
}

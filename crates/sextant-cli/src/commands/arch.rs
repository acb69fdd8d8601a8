use anyhow::Result;
use serde_json::Value;
use sextant_query::{ArchitectureRequest, Engine};

pub fn run(
    engine: &Engine,
    refresh: bool,
    include_external: bool,
    depth: Option<usize>,
    module: Option<String>,
) -> Result<Value> {
    let envelope = engine.get_architecture(&ArchitectureRequest {
        depth,
        module,
        include_external,
        refresh,
    })?;
    Ok(serde_json::to_value(envelope)?)
}

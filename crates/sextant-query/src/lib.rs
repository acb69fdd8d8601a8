pub mod architecture;
pub mod backend;
pub mod backends;
pub mod cache;
pub mod call_graph;
pub mod confidence;
pub mod engine;
pub mod envelope;
pub mod fusion;
pub mod graph;
pub mod identity;
pub mod impact;
pub mod jobs;
pub mod orchestrator;
pub mod repo_state;
pub mod scope;

pub use engine::{
    ArchitectureRequest, ArchitectureResult, CallGraphRequest, CallGraphResult, ClearCacheResult,
    Engine, EngineBuilder, FindReferencesRequest, GetSymbolRequest, ImpactRequest, ImpactResult,
    ReferencesResult, ResolvedTarget, SearchRequest, SearchResult, StatusReport, SymbolResult,
};
pub use envelope::Envelope;

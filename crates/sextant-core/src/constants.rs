/// Default data directory name under home.
pub const DEFAULT_DATA_DIR: &str = ".sextant";

/// Project config file name.
pub const PROJECT_CONFIG_FILE: &str = ".sextant/config.toml";

/// Default location of the exported symbol index, relative to the repo root.
pub const DEFAULT_INDEX_SNAPSHOT: &str = ".sextant/index.json";

/// SQLite database file name.
pub const STATE_DB_FILE: &str = "state.db";

/// Current schema version for SQLite tables.
pub const SCHEMA_VERSION: u32 = 1;

/// Reserved snapshot id used when repository state cannot be computed.
pub const UNKNOWN_REPO_STATE_ID: &str = "unknown";

/// Maximum number of alias hops followed during identity resolution.
pub const ALIAS_CHAIN_MAX_DEPTH: usize = 3;

/// Default result limit for symbol search.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Default result limit for reference lookups.
pub const DEFAULT_REFS_LIMIT: usize = 100;

/// Upper bound on references pulled for impact analysis.
pub const IMPACT_REFERENCE_CAP: usize = 500;

/// Hard ceiling for call graph traversal depth.
pub const MAX_CALL_GRAPH_DEPTH: u32 = 4;

/// Default fusion policy tag attached to every ranking.
pub const FUSION_POLICY_VERSION: &str = "fusion-1";

/// Completeness multiplier used when no observed signal is available.
pub const STATIC_CONFIDENCE_FACTOR: f64 = 0.79;

/// Maximum file size read by the syntax fallback extractor (1MB).
pub const MAX_FILE_SIZE: u64 = 1_048_576;

/// Job type for the asynchronous architecture refresh.
pub const JOB_REFRESH_ARCHITECTURE: &str = "refresh-architecture";

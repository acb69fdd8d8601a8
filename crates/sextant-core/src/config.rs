use crate::constants;
use crate::error::ConfigError;
use crate::types::{BackendId, MergeMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub repo_state: RepoStateConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub syntax: SyntaxConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub signals: SignalsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoStateConfig {
    #[serde(default = "default_freshness_window_ms")]
    pub freshness_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default = "default_backend_preference")]
    pub preference: Vec<String>,
    #[serde(default = "default_merge_mode")]
    pub merge: String,
    #[serde(default)]
    pub timeouts: BackendTimeoutsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendTimeoutsConfig {
    #[serde(default = "default_index_timeout_ms")]
    pub index_ms: u64,
    #[serde(default = "default_lsp_timeout_ms")]
    pub lsp_ms: u64,
    #[serde(default = "default_syntax_timeout_ms")]
    pub syntax_ms: u64,
    #[serde(default = "default_git_timeout_ms")]
    pub git_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntaxConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_syntax_extensions")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_policy_version")]
    pub policy_version: String,
    #[serde(default = "default_seed_limit")]
    pub seed_limit: usize,
    #[serde(default = "default_max_expanded_seeds")]
    pub max_expanded_seeds: usize,
    #[serde(default = "default_ppr_top_k")]
    pub ppr_top_k: usize,
    #[serde(default = "default_graph_budget_ms")]
    pub graph_budget_ms: u64,
    #[serde(default)]
    pub weights: RankingWeightsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingWeightsConfig {
    #[serde(default = "default_weight_fts")]
    pub fts: f64,
    #[serde(default = "default_weight_ppr")]
    pub ppr: f64,
    #[serde(default = "default_weight_hotspot")]
    pub hotspot: f64,
    #[serde(default = "default_weight_recency")]
    pub recency: f64,
    #[serde(default = "default_weight_exact")]
    pub exact: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsConfig {
    #[serde(default = "default_signals_enabled")]
    pub enabled: bool,
    #[serde(default = "default_recency_half_life_days")]
    pub recency_half_life_days: f64,
    #[serde(default = "default_max_commits")]
    pub max_commits: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_query_ttl_seconds")]
    pub query_ttl_seconds: u64,
    #[serde(default = "default_view_ttl_seconds")]
    pub view_ttl_seconds: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_max_symbols")]
    pub max_symbols: usize,
    #[serde(default = "default_max_refs")]
    pub max_refs: usize,
    #[serde(default = "default_max_impact_items")]
    pub max_impact_items: usize,
    #[serde(default = "default_max_modules")]
    pub max_modules: usize,
    #[serde(default = "default_max_edges")]
    pub max_edges: usize,
    #[serde(default = "default_max_drilldowns")]
    pub max_drilldowns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_job_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_job_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_data_dir() -> String {
    "~/.sextant".into()
}
fn default_busy_timeout() -> u32 {
    5000
}
fn default_cache_size() -> i32 {
    -64000
}
fn default_freshness_window_ms() -> u64 {
    5000
}
fn default_backend_preference() -> Vec<String> {
    vec!["index".into(), "lsp".into(), "syntax".into()]
}
fn default_merge_mode() -> String {
    "prefer-first".into()
}
fn default_index_timeout_ms() -> u64 {
    2000
}
fn default_lsp_timeout_ms() -> u64 {
    5000
}
fn default_syntax_timeout_ms() -> u64 {
    3000
}
fn default_git_timeout_ms() -> u64 {
    2000
}
fn default_snapshot_path() -> String {
    constants::DEFAULT_INDEX_SNAPSHOT.into()
}
fn default_max_file_size() -> u64 {
    constants::MAX_FILE_SIZE
}
fn default_syntax_extensions() -> Vec<String> {
    ["rs", "ts", "tsx", "js", "py", "go", "java", "kt"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}
fn default_policy_version() -> String {
    constants::FUSION_POLICY_VERSION.into()
}
fn default_seed_limit() -> usize {
    10
}
fn default_max_expanded_seeds() -> usize {
    30
}
fn default_ppr_top_k() -> usize {
    200
}
fn default_graph_budget_ms() -> u64 {
    150
}
fn default_weight_fts() -> f64 {
    0.40
}
fn default_weight_ppr() -> f64 {
    0.30
}
fn default_weight_hotspot() -> f64 {
    0.15
}
fn default_weight_recency() -> f64 {
    0.10
}
fn default_weight_exact() -> f64 {
    0.05
}
fn default_signals_enabled() -> bool {
    true
}
fn default_recency_half_life_days() -> f64 {
    30.0
}
fn default_max_commits() -> usize {
    500
}
fn default_query_ttl_seconds() -> u64 {
    300
}
fn default_view_ttl_seconds() -> u64 {
    3600
}
fn default_cache_max_entries() -> usize {
    1024
}
fn default_max_symbols() -> usize {
    100
}
fn default_max_refs() -> usize {
    constants::IMPACT_REFERENCE_CAP
}
fn default_max_impact_items() -> usize {
    100
}
fn default_max_modules() -> usize {
    50
}
fn default_max_edges() -> usize {
    200
}
fn default_max_drilldowns() -> usize {
    5
}
fn default_job_queue_size() -> usize {
    100
}
fn default_job_workers() -> usize {
    1
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            busy_timeout_ms: default_busy_timeout(),
            cache_size: default_cache_size(),
        }
    }
}

impl Default for RepoStateConfig {
    fn default() -> Self {
        Self {
            freshness_window_ms: default_freshness_window_ms(),
        }
    }
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            preference: default_backend_preference(),
            merge: default_merge_mode(),
            timeouts: BackendTimeoutsConfig::default(),
        }
    }
}

impl Default for BackendTimeoutsConfig {
    fn default() -> Self {
        Self {
            index_ms: default_index_timeout_ms(),
            lsp_ms: default_lsp_timeout_ms(),
            syntax_ms: default_syntax_timeout_ms(),
            git_ms: default_git_timeout_ms(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl Default for SyntaxConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            extensions: default_syntax_extensions(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            policy_version: default_policy_version(),
            seed_limit: default_seed_limit(),
            max_expanded_seeds: default_max_expanded_seeds(),
            ppr_top_k: default_ppr_top_k(),
            graph_budget_ms: default_graph_budget_ms(),
            weights: RankingWeightsConfig::default(),
        }
    }
}

impl Default for RankingWeightsConfig {
    fn default() -> Self {
        Self {
            fts: default_weight_fts(),
            ppr: default_weight_ppr(),
            hotspot: default_weight_hotspot(),
            recency: default_weight_recency(),
            exact: default_weight_exact(),
        }
    }
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            enabled: default_signals_enabled(),
            recency_half_life_days: default_recency_half_life_days(),
            max_commits: default_max_commits(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            query_ttl_seconds: default_query_ttl_seconds(),
            view_ttl_seconds: default_view_ttl_seconds(),
            max_entries: default_cache_max_entries(),
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_symbols: default_max_symbols(),
            max_refs: default_max_refs(),
            max_impact_items: default_max_impact_items(),
            max_modules: default_max_modules(),
            max_edges: default_max_edges(),
            max_drilldowns: default_max_drilldowns(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            queue_size: default_job_queue_size(),
            workers: default_job_workers(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl BackendsConfig {
    /// Preference list with unknown names dropped and duplicates removed.
    /// Falls back to the default order when nothing valid remains.
    pub fn preference_typed(&self) -> Vec<BackendId> {
        let mut out = Vec::new();
        for raw in &self.preference {
            match BackendId::parse(raw) {
                Some(id) if !out.contains(&id) => out.push(id),
                Some(_) => {}
                None => {
                    tracing::warn!(backend = %raw, "unknown backend in preference list; ignored")
                }
            }
        }
        if out.is_empty() {
            out = vec![BackendId::Index, BackendId::Lsp, BackendId::Syntax];
        }
        out
    }

    pub fn merge_mode(&self) -> MergeMode {
        MergeMode::parse(&self.merge).unwrap_or_default()
    }

    pub fn timeout_ms(&self, backend: BackendId) -> u64 {
        match backend {
            BackendId::Index => self.timeouts.index_ms,
            BackendId::Lsp => self.timeouts.lsp_ms,
            BackendId::Syntax => self.timeouts.syntax_ms,
            BackendId::Git => self.timeouts.git_ms,
        }
    }
}

impl Config {
    /// Load configuration with layered precedence (highest first):
    /// 1. `SEXTANT_<SECTION>_<KEY>` environment variables
    /// 2. Explicit config file (from `--config`)
    /// 3. Project config: `<repo_root>/.sextant/config.toml`
    /// 4. Global config: `~/.sextant/config.toml`
    /// 5. Built-in defaults
    ///
    /// Only fields explicitly set in a higher-priority file override lower layers.
    pub fn load(repo_root: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_file(repo_root, None)
    }

    pub fn load_with_file(
        repo_root: Option<&Path>,
        config_file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut merged = toml::Value::Table(toml::map::Map::new());

        if let Some(home) = dirs::home_dir() {
            let global_path = home.join(constants::DEFAULT_DATA_DIR).join("config.toml");
            if global_path.exists() {
                let raw = load_toml_value(&global_path)?;
                merge_toml_values(&mut merged, &raw);
            }
        }

        if let Some(root) = repo_root {
            let project_path = root.join(constants::PROJECT_CONFIG_FILE);
            if project_path.exists() {
                let raw = load_toml_value(&project_path)?;
                merge_toml_values(&mut merged, &raw);
            }
        }

        if let Some(cf) = config_file {
            if !cf.exists() {
                return Err(ConfigError::NotFound {
                    path: cf.display().to_string(),
                });
            }
            let raw = load_toml_value(cf)?;
            merge_toml_values(&mut merged, &raw);
        }

        let config_str =
            toml::to_string(&merged).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let mut config: Config =
            toml::from_str(&config_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        config.normalize();
        config.storage.data_dir = expand_tilde(&config.storage.data_dir);

        Ok(config)
    }

    /// Resolve the data directory for a project.
    pub fn project_data_dir(&self, project_id: &str) -> PathBuf {
        PathBuf::from(&self.storage.data_dir)
            .join("data")
            .join(project_id)
    }

    /// Path of the per-project SQLite database.
    pub fn state_db_path(&self, project_id: &str) -> PathBuf {
        self.project_data_dir(project_id)
            .join(constants::STATE_DB_FILE)
    }

    /// Resolve the index snapshot path against the repository root.
    pub fn index_snapshot_path(&self, repo_root: &Path) -> PathBuf {
        let path = PathBuf::from(expand_tilde(&self.index.snapshot_path));
        if path.is_absolute() {
            path
        } else {
            repo_root.join(path)
        }
    }

    fn normalize(&mut self) {
        let weights = &mut self.ranking.weights;
        weights.fts =
            clamp_unit_f64_with_warning(weights.fts, default_weight_fts(), "ranking.weights.fts");
        weights.ppr =
            clamp_unit_f64_with_warning(weights.ppr, default_weight_ppr(), "ranking.weights.ppr");
        weights.hotspot = clamp_unit_f64_with_warning(
            weights.hotspot,
            default_weight_hotspot(),
            "ranking.weights.hotspot",
        );
        weights.recency = clamp_unit_f64_with_warning(
            weights.recency,
            default_weight_recency(),
            "ranking.weights.recency",
        );
        weights.exact = clamp_unit_f64_with_warning(
            weights.exact,
            default_weight_exact(),
            "ranking.weights.exact",
        );

        if self.ranking.policy_version.trim().is_empty() {
            self.ranking.policy_version = default_policy_version();
        }
        self.ranking.seed_limit = clamp_min_usize_with_warning(
            self.ranking.seed_limit,
            1,
            default_seed_limit(),
            "ranking.seed_limit",
        );
        if self.ranking.max_expanded_seeds < self.ranking.seed_limit {
            tracing::warn!(
                max_expanded_seeds = self.ranking.max_expanded_seeds,
                seed_limit = self.ranking.seed_limit,
                "ranking.max_expanded_seeds below seed_limit; raised"
            );
            self.ranking.max_expanded_seeds = self.ranking.seed_limit;
        }

        if MergeMode::parse(&self.backends.merge).is_none() {
            tracing::warn!(merge = %self.backends.merge, "unknown merge mode; using prefer-first");
            self.backends.merge = default_merge_mode();
        }

        let half_life = self.signals.recency_half_life_days;
        if !half_life.is_finite() || half_life <= 0.0 {
            tracing::warn!(
                value = half_life,
                "signals.recency_half_life_days must be positive; falling back to default"
            );
            self.signals.recency_half_life_days = default_recency_half_life_days();
        }

        self.jobs.queue_size = clamp_min_usize_with_warning(
            self.jobs.queue_size,
            1,
            default_job_queue_size(),
            "jobs.queue_size",
        );
        self.jobs.workers = clamp_min_usize_with_warning(
            self.jobs.workers,
            1,
            default_job_workers(),
            "jobs.workers",
        );
        self.cache.max_entries = clamp_min_usize_with_warning(
            self.cache.max_entries,
            1,
            default_cache_max_entries(),
            "cache.max_entries",
        );
        self.budget.max_drilldowns = clamp_min_usize_with_warning(
            self.budget.max_drilldowns,
            1,
            default_max_drilldowns(),
            "budget.max_drilldowns",
        );
        self.syntax.extensions = self
            .syntax
            .extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
    }
}

/// Load a TOML file as a raw `toml::Value` (preserving only explicitly-set fields).
fn load_toml_value(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    content
        .parse::<toml::Value>()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Deep-merge `overlay` into `base`. Only keys present in `overlay` are written.
fn merge_toml_values(base: &mut toml::Value, overlay: &toml::Value) {
    if let (toml::Value::Table(base_map), toml::Value::Table(overlay_map)) = (base, overlay) {
        for (key, overlay_val) in overlay_map {
            if let Some(base_val) = base_map.get_mut(key) {
                if base_val.is_table() && overlay_val.is_table() {
                    merge_toml_values(base_val, overlay_val);
                } else {
                    *base_val = overlay_val.clone();
                }
            } else {
                base_map.insert(key.clone(), overlay_val.clone());
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

/// Apply environment variable overrides to config fields.
/// Convention: `SEXTANT_<SECTION>_<KEY>` in UPPER_SNAKE_CASE.
fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("SEXTANT_STORAGE_DATA_DIR") {
        config.storage.data_dir = v;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_STORAGE_BUSY_TIMEOUT_MS") {
        config.storage.busy_timeout_ms = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_STORAGE_CACHE_SIZE") {
        config.storage.cache_size = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_REPO_STATE_FRESHNESS_WINDOW_MS") {
        config.repo_state.freshness_window_ms = n;
    }
    if let Some(v) = var("SEXTANT_BACKENDS_PREFERENCE") {
        config.backends.preference = parse_csv_env_list(&v);
    }
    if let Some(v) = var("SEXTANT_BACKENDS_MERGE") {
        config.backends.merge = v;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_BACKENDS_TIMEOUTS_INDEX_MS") {
        config.backends.timeouts.index_ms = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_BACKENDS_TIMEOUTS_LSP_MS") {
        config.backends.timeouts.lsp_ms = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_BACKENDS_TIMEOUTS_SYNTAX_MS") {
        config.backends.timeouts.syntax_ms = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_BACKENDS_TIMEOUTS_GIT_MS") {
        config.backends.timeouts.git_ms = n;
    }
    if let Some(v) = var("SEXTANT_INDEX_SNAPSHOT_PATH") {
        config.index.snapshot_path = v;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_SYNTAX_MAX_FILE_SIZE") {
        config.syntax.max_file_size = n;
    }
    if let Some(v) = var("SEXTANT_SYNTAX_EXTENSIONS") {
        config.syntax.extensions = parse_csv_env_list(&v);
    }
    if let Some(v) = var("SEXTANT_RANKING_POLICY_VERSION") {
        config.ranking.policy_version = v;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_RANKING_SEED_LIMIT") {
        config.ranking.seed_limit = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_RANKING_MAX_EXPANDED_SEEDS") {
        config.ranking.max_expanded_seeds = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_RANKING_PPR_TOP_K") {
        config.ranking.ppr_top_k = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_RANKING_GRAPH_BUDGET_MS") {
        config.ranking.graph_budget_ms = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_RANKING_WEIGHTS_FTS") {
        config.ranking.weights.fts = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_RANKING_WEIGHTS_PPR") {
        config.ranking.weights.ppr = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_RANKING_WEIGHTS_HOTSPOT") {
        config.ranking.weights.hotspot = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_RANKING_WEIGHTS_RECENCY") {
        config.ranking.weights.recency = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_RANKING_WEIGHTS_EXACT") {
        config.ranking.weights.exact = n;
    }
    if let Some(v) = var("SEXTANT_SIGNALS_ENABLED")
        && let Some(b) = parse_env_bool(&v)
    {
        config.signals.enabled = b;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_SIGNALS_RECENCY_HALF_LIFE_DAYS") {
        config.signals.recency_half_life_days = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_SIGNALS_MAX_COMMITS") {
        config.signals.max_commits = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_CACHE_QUERY_TTL_SECONDS") {
        config.cache.query_ttl_seconds = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_CACHE_VIEW_TTL_SECONDS") {
        config.cache.view_ttl_seconds = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_CACHE_MAX_ENTRIES") {
        config.cache.max_entries = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_BUDGET_MAX_SYMBOLS") {
        config.budget.max_symbols = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_BUDGET_MAX_REFS") {
        config.budget.max_refs = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_BUDGET_MAX_IMPACT_ITEMS") {
        config.budget.max_impact_items = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_BUDGET_MAX_MODULES") {
        config.budget.max_modules = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_BUDGET_MAX_EDGES") {
        config.budget.max_edges = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_BUDGET_MAX_DRILLDOWNS") {
        config.budget.max_drilldowns = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_JOBS_QUEUE_SIZE") {
        config.jobs.queue_size = n;
    }
    if let Some(n) = parse_env(&var, "SEXTANT_JOBS_WORKERS") {
        config.jobs.workers = n;
    }
    if let Some(v) = var("SEXTANT_LOGGING_LEVEL") {
        config.logging.level = v;
    }
}

fn parse_csv_env_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_env_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn clamp_unit_f64_with_warning(value: f64, fallback: f64, field: &str) -> f64 {
    if !value.is_finite() {
        tracing::warn!(
            field,
            value,
            fallback,
            "invalid non-finite config value; falling back to default"
        );
        return fallback;
    }
    let clamped = value.clamp(0.0, 1.0);
    if (clamped - value).abs() > f64::EPSILON {
        tracing::warn!(
            field,
            value,
            clamped,
            "config value out of range; clamped to [0.0, 1.0]"
        );
    }
    clamped
}

fn clamp_min_usize_with_warning(value: usize, min: usize, fallback: usize, field: &str) -> usize {
    if value < min {
        tracing::warn!(
            field,
            value,
            min,
            fallback,
            "config value below minimum; falling back to default"
        );
        fallback
    } else {
        value
    }
}

fn expand_tilde(path: &str) -> String {
    if path.starts_with('~')
        && let Some(home) = dirs::home_dir()
    {
        return path.replacen('~', &home.to_string_lossy(), 1);
    }
    path.to_string()
}

use crate::constants::UNKNOWN_REPO_STATE_ID;
use serde::{Deserialize, Serialize};

/// Which view of the repository a caller asked for. Recorded in provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoStateMode {
    #[default]
    Head,
    Full,
}

impl RepoStateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Full => "full",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "head" => Some(Self::Head),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// Canonical fingerprint of repository content at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSnapshot {
    pub id: String,
    pub head_commit: String,
    pub staged_diff_hash: String,
    pub working_tree_diff_hash: String,
    pub untracked_list_hash: String,
    pub dirty: bool,
    pub computed_at: String,
}

impl RepoSnapshot {
    /// Sentinel returned when the VCS collaborator is absent or failing.
    pub fn unknown(computed_at: String) -> Self {
        Self {
            id: UNKNOWN_REPO_STATE_ID.to_string(),
            head_commit: String::new(),
            staged_diff_hash: String::new(),
            working_tree_diff_hash: String::new(),
            untracked_list_hash: String::new(),
            dirty: true,
            computed_at,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.id == UNKNOWN_REPO_STATE_ID
    }

    pub fn is_cacheable(&self) -> bool {
        !self.is_unknown()
    }
}

/// Analysis backend identity. Ordering of `default_priority` is precision order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    Index,
    Lsp,
    Syntax,
    Git,
}

impl BackendId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Lsp => "lsp",
            Self::Syntax => "syntax",
            Self::Git => "git",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "index" => Some(Self::Index),
            "lsp" => Some(Self::Lsp),
            "syntax" => Some(Self::Syntax),
            "git" => Some(Self::Git),
            _ => None,
        }
    }

    pub fn default_priority(&self) -> u8 {
        match self {
            Self::Index => 1,
            Self::Lsp => 2,
            Self::Syntax => 3,
            Self::Git => 4,
        }
    }

    /// What a backend of this kind can answer when fully wired.
    pub fn default_capabilities(&self) -> &'static [Capability] {
        match self {
            Self::Index => &[
                Capability::SymbolLookup,
                Capability::SymbolSearch,
                Capability::References,
                Capability::SymbolGraph,
            ],
            Self::Lsp | Self::Syntax => &[
                Capability::SymbolLookup,
                Capability::SymbolSearch,
                Capability::References,
            ],
            Self::Git => &[],
        }
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations a backend may be able to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SymbolLookup,
    SymbolSearch,
    References,
    SymbolGraph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletenessReason {
    FullBackend,
    BestEffortFallback,
    BestEffortLsp,
    WorkspaceNotReady,
    IndexStale,
    TimedOut,
    IdentityOnly,
    NoResults,
    SymbolDeleted,
    SymbolNotFound,
    Unknown,
}

impl CompletenessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullBackend => "full-backend",
            Self::BestEffortFallback => "best-effort-fallback",
            Self::BestEffortLsp => "best-effort-lsp",
            Self::WorkspaceNotReady => "workspace-not-ready",
            Self::IndexStale => "index-stale",
            Self::TimedOut => "timed-out",
            Self::IdentityOnly => "identity-only",
            Self::NoResults => "no-results",
            Self::SymbolDeleted => "symbol-deleted",
            Self::SymbolNotFound => "symbol-not-found",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for CompletenessReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the orchestrator combines answers from several backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeMode {
    #[default]
    PreferFirst,
    Union,
}

impl MergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreferFirst => "prefer-first",
            Self::Union => "union",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "prefer-first" | "first" => Some(Self::PreferFirst),
            "union" => Some(Self::Union),
            _ => None,
        }
    }
}

/// How trustworthy or partial an answer is. Every envelope carries exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessInfo {
    pub score: f64,
    pub reason: CompletenessReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CompletenessInfo {
    pub fn new(score: f64, reason: CompletenessReason) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            reason,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Nothing was degraded; an empty answer at this level is definitive.
    pub fn is_full(&self) -> bool {
        self.score >= 1.0
    }

    pub fn no_results() -> Self {
        Self::new(0.0, CompletenessReason::NoResults)
    }

    pub fn unknown() -> Self {
        Self::new(0.0, CompletenessReason::Unknown)
    }
}

/// One backend's part in answering a single call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendContribution {
    pub backend_id: BackendId,
    pub available: bool,
    pub used: bool,
    pub result_count: usize,
    pub duration_ms: u64,
    pub completeness: f64,
}

impl BackendContribution {
    pub fn unavailable(backend_id: BackendId) -> Self {
        Self {
            backend_id,
            available: false,
            used: false,
            result_count: 0,
            duration_ms: 0,
            completeness: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub path: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
}

impl Location {
    pub fn new(path: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            path: path.into(),
            line,
            column,
            end_line: None,
            end_column: None,
        }
    }

    /// Directory portion of the path, used as a module id when none is known.
    pub fn directory(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[..idx],
            None => ".",
        }
    }
}

/// Symbol kinds recognized across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Interface,
    Trait,
    Enum,
    Field,
    Property,
    Constant,
    Variable,
    TypeAlias,
    Module,
    Unknown,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Interface => "interface",
            Self::Trait => "trait",
            Self::Enum => "enum",
            Self::Field => "field",
            Self::Property => "property",
            Self::Constant => "constant",
            Self::Variable => "variable",
            Self::TypeAlias => "type_alias",
            Self::Module => "module",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "function" | "fn" | "func" | "def" => Some(Self::Function),
            "method" => Some(Self::Method),
            "class" => Some(Self::Class),
            "struct" => Some(Self::Struct),
            "interface" => Some(Self::Interface),
            "trait" => Some(Self::Trait),
            "enum" => Some(Self::Enum),
            "field" => Some(Self::Field),
            "property" => Some(Self::Property),
            "constant" | "const" => Some(Self::Constant),
            "variable" | "var" => Some(Self::Variable),
            "type_alias" | "type" => Some(Self::TypeAlias),
            "module" | "mod" => Some(Self::Module),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Members that live inside a structural owner.
    pub fn is_member(&self) -> bool {
        matches!(self, Self::Method | Self::Field | Self::Property)
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Internal,
    Private,
    #[default]
    Unknown,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Private => "private",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityInfo {
    pub visibility: Visibility,
    pub confidence: f64,
    pub source: String,
}

impl VisibilityInfo {
    pub fn unknown() -> Self {
        Self {
            visibility: Visibility::Unknown,
            confidence: 0.3,
            source: "default".to_string(),
        }
    }
}

/// Backend-neutral symbol description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub stable_id: String,
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default)]
    pub module_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub visibility: VisibilityInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceKind {
    Call,
    Reference,
    Definition,
    TypeOf,
    Implements,
    Import,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Reference => "reference",
            Self::Definition => "definition",
            Self::TypeOf => "type-of",
            Self::Implements => "implements",
            Self::Import => "import",
        }
    }
}

/// A location that refers to some symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceInfo {
    pub location: Location,
    pub kind: ReferenceKind,
    /// Enclosing symbol of the referencing location, when the backend knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub is_test: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TruncationReason {
    MaxResults,
    MaxRefs,
    MaxItems,
    MaxModules,
    MaxEdges,
    MaxDepth,
    Timeout,
}

impl TruncationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxResults => "max-results",
            Self::MaxRefs => "max-refs",
            Self::MaxItems => "max-items",
            Self::MaxModules => "max-modules",
            Self::MaxEdges => "max-edges",
            Self::MaxDepth => "max-depth",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruncationInfo {
    pub reason: TruncationReason,
    pub original_count: usize,
    pub returned_count: usize,
}

/// A suggested follow-up query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drilldown {
    pub label: String,
    pub query: String,
    pub relevance_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolState {
    Active,
    Deleted,
}

impl SymbolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolFingerprint {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default)]
    pub qualified_container: String,
}

/// Persistent identity record for one canonical symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolMapping {
    pub stable_id: String,
    pub state: SymbolState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_stable_id: Option<String>,
    pub fingerprint: SymbolFingerprint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub last_verified_at: String,
    pub last_verified_state_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_in_state_id: Option<String>,
}

impl SymbolMapping {
    pub fn is_active(&self) -> bool {
        self.state == SymbolState::Active
    }

    pub fn is_deleted(&self) -> bool {
        self.state == SymbolState::Deleted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AliasReason {
    Renamed,
    Moved,
    Merged,
    FuzzyMatch,
}

impl AliasReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Renamed => "renamed",
            Self::Moved => "moved",
            Self::Merged => "merged",
            Self::FuzzyMatch => "fuzzy-match",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "renamed" => Some(Self::Renamed),
            "moved" => Some(Self::Moved),
            "merged" => Some(Self::Merged),
            "fuzzy-match" => Some(Self::FuzzyMatch),
            _ => None,
        }
    }
}

/// Redirect from a retired stable id to its successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolAlias {
    pub old_stable_id: String,
    pub new_stable_id: String,
    pub reason: AliasReason,
    pub confidence: f64,
    pub created_at: String,
    pub created_state_id: String,
}

/// Heuristic test-file detection shared by reference filtering and impact analysis.
pub fn is_test_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    let file_name = normalized.rsplit('/').next().unwrap_or(&normalized);
    normalized.starts_with("tests/")
        || normalized.starts_with("test/")
        || normalized.contains("/tests/")
        || normalized.contains("/test/")
        || normalized.contains("/__tests__/")
        || file_name.starts_with("test_")
        || file_name.contains("_test.")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
}

use crate::types::Drilldown;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Machine-readable error codes shared by every operation and transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BackendUnavailable,
    IndexMissing,
    IndexStale,
    WorkspaceNotReady,
    Timeout,
    RateLimited,
    SymbolNotFound,
    SymbolDeleted,
    ScopeInvalid,
    AliasCycle,
    AliasChainTooDeep,
    BudgetExceeded,
    InternalError,
    AmbiguousQuery,
    PartialResult,
    InvalidParameter,
    ResourceNotFound,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BackendUnavailable => "backend_unavailable",
            Self::IndexMissing => "index_missing",
            Self::IndexStale => "index_stale",
            Self::WorkspaceNotReady => "workspace_not_ready",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::SymbolNotFound => "symbol_not_found",
            Self::SymbolDeleted => "symbol_deleted",
            Self::ScopeInvalid => "scope_invalid",
            Self::AliasCycle => "alias_cycle",
            Self::AliasChainTooDeep => "alias_chain_too_deep",
            Self::BudgetExceeded => "budget_exceeded",
            Self::InternalError => "internal_error",
            Self::AmbiguousQuery => "ambiguous_query",
            Self::PartialResult => "partial_result",
            Self::InvalidParameter => "invalid_parameter",
            Self::ResourceNotFound => "resource_not_found",
        }
    }

    /// Conditions that lower completeness instead of failing a request.
    pub const fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable
                | Self::IndexMissing
                | Self::IndexStale
                | Self::WorkspaceNotReady
                | Self::Timeout
                | Self::PartialResult
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixKind {
    RunCommand,
    OpenDocs,
    InstallTool,
}

/// Remediation hint attached to an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixAction {
    #[serde(rename = "type")]
    pub kind: FixKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub safe: bool,
    pub description: String,
}

impl FixAction {
    pub fn run_command(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: FixKind::RunCommand,
            command: Some(command.into()),
            safe: true,
            description: description.into(),
        }
    }

    pub fn install_tool(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: FixKind::InstallTool,
            command: Some(command.into()),
            safe: false,
            description: description.into(),
        }
    }
}

/// Uniform error carrier returned by every query operation.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct QueryError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_fixes: Vec<FixAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drilldowns: Vec<Drilldown>,
}

impl QueryError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            suggested_fixes: Vec::new(),
            drilldowns: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_fix(mut self, fix: FixAction) -> Self {
        self.suggested_fixes.push(fix);
        self
    }

    pub fn with_drilldowns(mut self, drilldowns: Vec<Drilldown>) -> Self {
        self.drilldowns = drilldowns;
        self
    }

    pub fn symbol_not_found(reference: &str) -> Self {
        Self::new(
            ErrorCode::SymbolNotFound,
            format!("symbol not found: {reference}"),
        )
    }

    pub fn scope_invalid(scope: &str, reason: &str) -> Self {
        Self::new(
            ErrorCode::ScopeInvalid,
            format!("invalid scope `{scope}`: {reason}"),
        )
        .with_details(json!({ "scope": scope }))
    }

    pub fn invalid_parameter(field: &str, reason: &str) -> Self {
        Self::new(
            ErrorCode::InvalidParameter,
            format!("invalid parameter `{field}`: {reason}"),
        )
        .with_details(json!({ "field": field }))
    }

    pub fn ambiguous(reference: &str, candidates: &[String]) -> Self {
        Self::new(
            ErrorCode::AmbiguousQuery,
            format!(
                "reference `{reference}` matches {} symbols; pass a stable id",
                candidates.len()
            ),
        )
        .with_details(json!({
            "candidateCount": candidates.len(),
            "candidates": candidates,
        }))
    }

    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::new(ErrorCode::InternalError, e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: String },

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("invalid config value: {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("sqlite error: {0}")]
    Sqlite(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StateError {
    /// Convenience constructor for SQLite errors; use with `.map_err(StateError::sqlite)`.
    pub fn sqlite<E: std::fmt::Display>(e: E) -> Self {
        Self::Sqlite(e.to_string())
    }

    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[derive(Error, Debug, Clone)]
pub enum VcsError {
    #[error("not a git repository: {path}")]
    NotGitRepo { path: String },

    #[error("git error: {0}")]
    GitError(String),
}

impl VcsError {
    pub fn git<E: std::fmt::Display>(context: &str, e: E) -> Self {
        Self::GitError(format!("{context}: {e}"))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("backend {backend} is unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("backend {backend} timed out after {budget_ms}ms")]
    Timeout { backend: String, budget_ms: u64 },

    #[error("backend call cancelled")]
    Cancelled,

    #[error("not found in backend: {id}")]
    NotFound { id: String },

    #[error("backend {backend} failed: {reason}")]
    Failed { backend: String, reason: String },
}

impl BackendError {
    pub fn failed<E: std::fmt::Display>(backend: &str, e: E) -> Self {
        Self::Failed {
            backend: backend.to_string(),
            reason: e.to_string(),
        }
    }
}

impl From<BackendError> for QueryError {
    fn from(err: BackendError) -> Self {
        let code = match &err {
            BackendError::Unavailable { .. } | BackendError::Failed { .. } => {
                ErrorCode::BackendUnavailable
            }
            BackendError::Timeout { .. } | BackendError::Cancelled => ErrorCode::Timeout,
            BackendError::NotFound { .. } => ErrorCode::ResourceNotFound,
        };
        QueryError::new(code, err.to_string())
    }
}

impl From<StateError> for QueryError {
    fn from(err: StateError) -> Self {
        QueryError::internal(err)
    }
}

impl From<VcsError> for QueryError {
    fn from(err: VcsError) -> Self {
        QueryError::internal(err)
    }
}

impl From<ConfigError> for QueryError {
    fn from(err: ConfigError) -> Self {
        QueryError::new(ErrorCode::InvalidParameter, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_use_snake_case_wire_form() {
        assert_eq!(ErrorCode::AliasChainTooDeep.as_str(), "alias_chain_too_deep");
        let value = serde_json::to_value(ErrorCode::ScopeInvalid).unwrap();
        assert_eq!(value, "scope_invalid");
        assert_eq!(ErrorCode::BackendUnavailable.to_string(), "backend_unavailable");
    }

    #[test]
    fn recoverable_codes_do_not_include_input_errors() {
        assert!(ErrorCode::BackendUnavailable.is_recoverable());
        assert!(ErrorCode::Timeout.is_recoverable());
        assert!(!ErrorCode::ScopeInvalid.is_recoverable());
        assert!(!ErrorCode::InternalError.is_recoverable());
    }

    #[test]
    fn ambiguous_error_carries_candidate_count() {
        let err = QueryError::ambiguous("Engine", &["a".into(), "b".into(), "c".into()]);
        assert_eq!(err.code, ErrorCode::AmbiguousQuery);
        let details = err.details.unwrap();
        assert_eq!(details["candidateCount"], 3);
    }

    #[test]
    fn query_error_serializes_fix_actions() {
        let err = QueryError::new(ErrorCode::IndexMissing, "no index")
            .with_fix(FixAction::run_command("sextant status", "Inspect backends"));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], "index_missing");
        assert_eq!(value["suggestedFixes"][0]["type"], "run-command");
        assert_eq!(value["suggestedFixes"][0]["safe"], true);
        assert!(value.get("drilldowns").is_none());
    }

    #[test]
    fn backend_errors_map_to_codes() {
        let timeout: QueryError = BackendError::Timeout {
            backend: "index".into(),
            budget_ms: 10,
        }
        .into();
        assert_eq!(timeout.code, ErrorCode::Timeout);
        let down: QueryError = BackendError::Unavailable {
            backend: "lsp".into(),
            reason: "not started".into(),
        }
        .into();
        assert_eq!(down.code, ErrorCode::BackendUnavailable);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = QueryError::symbol_not_found("x#y()");
        assert_eq!(err.to_string(), "symbol_not_found: symbol not found: x#y()");
    }
}

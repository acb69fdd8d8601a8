use globset::{Glob, GlobMatcher};
use sextant_core::error::QueryError;

/// Repository-relative path restriction: a directory prefix or a glob.
#[derive(Debug, Clone)]
pub struct ScopeFilter {
    raw: String,
    matcher: ScopeMatcher,
}

#[derive(Debug, Clone)]
enum ScopeMatcher {
    Prefix(String),
    Glob(GlobMatcher),
}

impl ScopeFilter {
    /// Validate and compile a caller-supplied scope. Blank input means no scope.
    pub fn parse(raw: &str) -> Result<Option<Self>, QueryError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let normalized = trimmed.replace('\\', "/");

        if normalized.starts_with('/') || has_drive_prefix(&normalized) {
            return Err(QueryError::scope_invalid(
                trimmed,
                "scope must be relative to the repository root",
            ));
        }
        if normalized.split('/').any(|segment| segment == "..") {
            return Err(QueryError::scope_invalid(
                trimmed,
                "scope must not contain '..' segments",
            ));
        }

        let matcher = if normalized.contains(['*', '?', '[', '{']) {
            let glob = Glob::new(&normalized)
                .map_err(|e| QueryError::scope_invalid(trimmed, &format!("malformed glob: {e}")))?;
            ScopeMatcher::Glob(glob.compile_matcher())
        } else {
            let prefix = normalized
                .trim_start_matches("./")
                .trim_end_matches('/')
                .to_string();
            ScopeMatcher::Prefix(prefix)
        };

        Ok(Some(Self {
            raw: trimmed.to_string(),
            matcher,
        }))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = path.trim_start_matches("./");
        match &self.matcher {
            ScopeMatcher::Glob(glob) => glob.is_match(path),
            ScopeMatcher::Prefix(prefix) if prefix.is_empty() || prefix == "." => true,
            ScopeMatcher::Prefix(prefix) => {
                path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

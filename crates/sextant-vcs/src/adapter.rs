use crate::activity::ActivityReport;
use sextant_core::error::VcsError;
use sextant_core::types::RepoSnapshot;

/// Source-control collaborator that fingerprints the current repository content.
pub trait RepoStateProvider: Send + Sync {
    fn compute_repo_state(&self) -> Result<RepoSnapshot, VcsError>;

    /// Commits reachable from `to` but not from `from`; `None` when history cannot tell.
    fn commits_between(&self, _from: &str, _to: &str) -> Result<Option<usize>, VcsError> {
        Ok(None)
    }
}

/// Per-file commit history used for hotspot and recency signals.
pub trait ActivityProvider: Send + Sync {
    fn file_activity(&self, max_commits: usize) -> Result<ActivityReport, VcsError>;
}

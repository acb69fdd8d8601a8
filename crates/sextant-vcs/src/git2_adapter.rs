use crate::activity::ActivityReport;
use crate::adapter::{ActivityProvider, RepoStateProvider};
use git2::{Diff, DiffFormat, DiffOptions, Oid, Repository, StatusOptions, Tree};
use sextant_core::error::VcsError;
use sextant_core::time::now_iso8601;
use sextant_core::types::RepoSnapshot;
use std::path::{Path, PathBuf};
use tracing::debug;

/// blake3 digest of the empty input; the hash of every clean component.
pub const EMPTY_HASH: &str = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262";

/// git2-backed collaborator for one repository root.
#[derive(Debug, Clone)]
pub struct Git2Repository {
    root: PathBuf,
}

impl Git2Repository {
    /// Validate that `root` is a git repository and remember it.
    pub fn open(root: &Path) -> Result<Self, VcsError> {
        Self::open_repo(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn open_repo(root: &Path) -> Result<Repository, VcsError> {
        Repository::open(root).map_err(|_| VcsError::NotGitRepo {
            path: root.display().to_string(),
        })
    }

    /// HEAD commit and its tree; `None` for a repository without commits.
    fn head_tree(repo: &Repository) -> Result<Option<(String, Tree<'_>)>, VcsError> {
        let head = match repo.head() {
            Ok(head) => head,
            Err(e)
                if matches!(
                    e.code(),
                    git2::ErrorCode::UnbornBranch | git2::ErrorCode::NotFound
                ) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(VcsError::git("failed to read HEAD", e)),
        };
        let commit = head
            .peel_to_commit()
            .map_err(|e| VcsError::git("failed to resolve HEAD commit", e))?;
        let tree = commit
            .tree()
            .map_err(|e| VcsError::git("failed to load HEAD tree", e))?;
        Ok(Some((commit.id().to_string(), tree)))
    }

    fn untracked_paths(repo: &Repository) -> Result<Vec<String>, VcsError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo
            .statuses(Some(&mut opts))
            .map_err(|e| VcsError::git("failed to read status", e))?;
        let mut paths: Vec<String> = statuses
            .iter()
            .filter(|entry| entry.status().is_wt_new())
            .filter_map(|entry| entry.path().map(ToString::to_string))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

fn hash_diff(diff: &Diff<'_>) -> Result<String, VcsError> {
    let mut hasher = blake3::Hasher::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        let origin = line.origin();
        if matches!(origin, '+' | '-' | ' ') {
            let mut buf = [0u8; 4];
            hasher.update(origin.encode_utf8(&mut buf).as_bytes());
        }
        hasher.update(line.content());
        true
    })
    .map_err(|e| VcsError::git("failed to render diff", e))?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn hash_path_list(paths: &[String]) -> String {
    blake3::hash(paths.join("\n").as_bytes()).to_hex().to_string()
}

/// Combine component hashes into the snapshot id.
pub fn snapshot_id(head: &str, staged: &str, working: &str, untracked: &str) -> String {
    let key = format!("{head}:{staged}:{working}:{untracked}");
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

impl RepoStateProvider for Git2Repository {
    fn compute_repo_state(&self) -> Result<RepoSnapshot, VcsError> {
        let repo = Self::open_repo(&self.root)?;
        let head = Self::head_tree(&repo)?;
        let (head_commit, tree) = match head {
            Some((id, tree)) => (id, Some(tree)),
            None => (String::new(), None),
        };

        let mut staged_opts = DiffOptions::new();
        staged_opts.include_typechange(true);
        let staged = repo
            .diff_tree_to_index(tree.as_ref(), None, Some(&mut staged_opts))
            .map_err(|e| VcsError::git("failed to diff index", e))?;
        let staged_diff_hash = hash_diff(&staged)?;

        let mut working_opts = DiffOptions::new();
        working_opts.include_typechange(true).include_untracked(false);
        let working = repo
            .diff_tree_to_workdir_with_index(tree.as_ref(), Some(&mut working_opts))
            .map_err(|e| VcsError::git("failed to diff working tree", e))?;
        let working_tree_diff_hash = hash_diff(&working)?;

        let untracked_list_hash = hash_path_list(&Self::untracked_paths(&repo)?);

        let dirty = staged_diff_hash != EMPTY_HASH
            || working_tree_diff_hash != EMPTY_HASH
            || untracked_list_hash != EMPTY_HASH;
        let id = snapshot_id(
            &head_commit,
            &staged_diff_hash,
            &working_tree_diff_hash,
            &untracked_list_hash,
        );
        debug!(repo = %self.root.display(), snapshot = %id, dirty, "computed repo state");

        Ok(RepoSnapshot {
            id,
            head_commit,
            staged_diff_hash,
            working_tree_diff_hash,
            untracked_list_hash,
            dirty,
            computed_at: now_iso8601(),
        })
    }

    fn commits_between(&self, from: &str, to: &str) -> Result<Option<usize>, VcsError> {
        let repo = Self::open_repo(&self.root)?;
        let (Ok(from), Ok(to)) = (Oid::from_str(from), Oid::from_str(to)) else {
            return Ok(None);
        };
        // An indexed commit that was never fetched or has been gc'd says nothing.
        if repo.find_commit(from).is_err() || repo.find_commit(to).is_err() {
            return Ok(None);
        }
        let mut walk = repo
            .revwalk()
            .map_err(|e| VcsError::git("failed to start revwalk", e))?;
        walk.push(to)
            .map_err(|e| VcsError::git("failed to push commit", e))?;
        walk.hide(from)
            .map_err(|e| VcsError::git("failed to hide commit", e))?;
        let mut count = 0;
        for oid in walk {
            oid.map_err(|e| VcsError::git("failed to walk history", e))?;
            count += 1;
        }
        Ok(Some(count))
    }
}

impl ActivityProvider for Git2Repository {
    fn file_activity(&self, max_commits: usize) -> Result<ActivityReport, VcsError> {
        let repo = Self::open_repo(&self.root)?;
        let mut report = ActivityReport::default();
        if Self::head_tree(&repo)?.is_none() {
            return Ok(report);
        }

        let mut walk = repo
            .revwalk()
            .map_err(|e| VcsError::git("failed to start revwalk", e))?;
        walk.push_head()
            .map_err(|e| VcsError::git("failed to push HEAD", e))?;
        walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)
            .map_err(|e| VcsError::git("failed to sort revwalk", e))?;

        for oid in walk.take(max_commits) {
            let oid = oid.map_err(|e| VcsError::git("failed to walk history", e))?;
            let commit = repo
                .find_commit(oid)
                .map_err(|e| VcsError::git("failed to load commit", e))?;
            let when = commit.time().seconds();
            if report.head_commit_unix.is_none() {
                report.head_commit_unix = Some(when);
            }
            let tree = commit
                .tree()
                .map_err(|e| VcsError::git("failed to load commit tree", e))?;
            let parent_tree = match commit.parent(0) {
                Ok(parent) => Some(
                    parent
                        .tree()
                        .map_err(|e| VcsError::git("failed to load parent tree", e))?,
                ),
                Err(_) => None,
            };
            let diff = repo
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
                .map_err(|e| VcsError::git("failed to diff commit", e))?;
            for delta in diff.deltas() {
                if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                    report.record(&path.to_string_lossy(), when);
                }
            }
            report.commits_walked += 1;
        }

        debug!(
            repo = %self.root.display(),
            commits = report.commits_walked,
            files = report.files.len(),
            "collected file activity"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_git_repo(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        std::fs::write(dir.join("src.rs"), "fn main() {}\n").unwrap();
        commit_all(&repo, &["src.rs"], "initial");
        repo
    }

    fn commit_all(repo: &Repository, paths: &[&str], message: &str) {
        let mut index = repo.index().unwrap();
        for path in paths {
            index.add_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap();
    }

    #[test]
    fn empty_hash_matches_blake3_of_empty_input() {
        assert_eq!(blake3::hash(b"").to_hex().to_string(), EMPTY_HASH);
        assert_eq!(hash_path_list(&[]), EMPTY_HASH);
    }

    #[test]
    fn open_rejects_non_repo() {
        let dir = tempfile::tempdir().unwrap();
        let err = Git2Repository::open(dir.path()).unwrap_err();
        assert!(matches!(err, VcsError::NotGitRepo { .. }));
    }

    #[test]
    fn clean_repo_is_not_dirty_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_git_repo(dir.path());
        let provider = Git2Repository::open(dir.path()).unwrap();

        let first = provider.compute_repo_state().unwrap();
        let second = provider.compute_repo_state().unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap().id().to_string();

        assert!(!first.dirty);
        assert_eq!(first.head_commit, head);
        assert_eq!(first.id, second.id);
        assert_eq!(first.staged_diff_hash, EMPTY_HASH);
    }

    #[test]
    fn working_tree_edit_changes_id_and_marks_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let _repo = init_git_repo(dir.path());
        let provider = Git2Repository::open(dir.path()).unwrap();
        let clean = provider.compute_repo_state().unwrap();

        std::fs::write(dir.path().join("src.rs"), "fn main() { println!(); }\n").unwrap();
        let edited = provider.compute_repo_state().unwrap();

        assert!(edited.dirty);
        assert_ne!(edited.working_tree_diff_hash, EMPTY_HASH);
        assert_eq!(edited.staged_diff_hash, EMPTY_HASH);
        assert_ne!(clean.id, edited.id);
        assert_eq!(clean.head_commit, edited.head_commit);
    }

    #[test]
    fn staged_and_untracked_changes_are_tracked_separately() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_git_repo(dir.path());
        let provider = Git2Repository::open(dir.path()).unwrap();

        std::fs::write(dir.path().join("notes.txt"), "scratch\n").unwrap();
        let untracked = provider.compute_repo_state().unwrap();
        assert!(untracked.dirty);
        assert_ne!(untracked.untracked_list_hash, EMPTY_HASH);
        assert_eq!(untracked.working_tree_diff_hash, EMPTY_HASH);

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("notes.txt")).unwrap();
        index.write().unwrap();
        let staged = provider.compute_repo_state().unwrap();
        assert_ne!(staged.staged_diff_hash, EMPTY_HASH);
        assert_eq!(staged.untracked_list_hash, EMPTY_HASH);
        assert_ne!(staged.id, untracked.id);
    }

    #[test]
    fn new_commit_changes_snapshot_id() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_git_repo(dir.path());
        let provider = Git2Repository::open(dir.path()).unwrap();
        let before = provider.compute_repo_state().unwrap();

        std::fs::write(dir.path().join("lib.rs"), "pub fn lib() {}\n").unwrap();
        commit_all(&repo, &["lib.rs"], "add lib");
        let after = provider.compute_repo_state().unwrap();

        assert!(!after.dirty);
        assert_ne!(before.head_commit, after.head_commit);
        assert_ne!(before.id, after.id);
    }

    #[test]
    fn commits_between_counts_history_since_an_older_commit() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_git_repo(dir.path());
        let provider = Git2Repository::open(dir.path()).unwrap();
        let base = provider.compute_repo_state().unwrap().head_commit;

        for (i, name) in ["a.rs", "b.rs"].into_iter().enumerate() {
            std::fs::write(dir.path().join(name), format!("pub fn f{i}() {{}}\n")).unwrap();
            commit_all(&repo, &[name], "more");
        }
        let head = provider.compute_repo_state().unwrap().head_commit;

        assert_eq!(provider.commits_between(&base, &head).unwrap(), Some(2));
        assert_eq!(provider.commits_between(&head, &head).unwrap(), Some(0));
        let unknown = "deadbeef".repeat(5);
        assert_eq!(provider.commits_between(&unknown, &head).unwrap(), None);
        assert_eq!(provider.commits_between("not-a-sha", &head).unwrap(), None);
    }

    #[test]
    fn unborn_repo_uses_empty_head() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        let provider = Git2Repository::open(dir.path()).unwrap();
        let state = provider.compute_repo_state().unwrap();
        assert_eq!(state.head_commit, "");
        assert!(!state.dirty);

        let activity = provider.file_activity(10).unwrap();
        assert!(activity.is_empty());
        assert_eq!(activity.head_commit_unix, None);
    }

    #[test]
    fn file_activity_counts_commits_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_git_repo(dir.path());
        std::fs::write(dir.path().join("src.rs"), "fn main() { run(); }\n").unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn run() {}\n").unwrap();
        commit_all(&repo, &["src.rs", "lib.rs"], "second");
        std::fs::write(dir.path().join("src.rs"), "fn main() { run(); run(); }\n").unwrap();
        commit_all(&repo, &["src.rs"], "third");

        let provider = Git2Repository::open(dir.path()).unwrap();
        let report = provider.file_activity(100).unwrap();
        assert_eq!(report.commits_walked, 3);
        assert_eq!(report.get("src.rs").unwrap().commit_count, 3);
        assert_eq!(report.get("lib.rs").unwrap().commit_count, 1);
        assert!(report.head_commit_unix.is_some());

        let limited = provider.file_activity(1).unwrap();
        assert_eq!(limited.commits_walked, 1);
        assert!(limited.get("lib.rs").is_none());
    }
}

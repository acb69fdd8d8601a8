use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Commit history summary for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileActivity {
    pub path: String,
    pub commit_count: u32,
    /// Commit time (unix seconds) of the newest commit touching the path.
    pub last_commit_unix: i64,
}

impl FileActivity {
    pub fn new(path: impl Into<String>, last_commit_unix: i64) -> Self {
        Self {
            path: path.into(),
            commit_count: 0,
            last_commit_unix,
        }
    }

    /// Count another commit; keeps the newest timestamp.
    pub fn record(&mut self, commit_unix: i64) {
        self.commit_count += 1;
        if commit_unix > self.last_commit_unix {
            self.last_commit_unix = commit_unix;
        }
    }
}

/// Activity for every path touched in the walked commit window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityReport {
    pub files: HashMap<String, FileActivity>,
    pub commits_walked: usize,
    /// Commit time of HEAD, the reference point for recency decay.
    pub head_commit_unix: Option<i64>,
}

impl ActivityReport {
    pub fn record(&mut self, path: &str, commit_unix: i64) {
        self.files
            .entry(path.to_string())
            .or_insert_with(|| FileActivity::new(path, commit_unix))
            .record(commit_unix);
    }

    pub fn get(&self, path: &str) -> Option<&FileActivity> {
        self.files.get(path)
    }

    pub fn max_commit_count(&self) -> u32 {
        self.files
            .values()
            .map(|f| f.commit_count)
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_counts_commits_and_keeps_newest_time() {
        let mut report = ActivityReport::default();
        report.record("src/a.rs", 200);
        report.record("src/a.rs", 100);
        report.record("src/b.rs", 50);

        let a = report.get("src/a.rs").unwrap();
        assert_eq!(a.commit_count, 2);
        assert_eq!(a.last_commit_unix, 200);
        assert_eq!(report.max_commit_count(), 2);
        assert!(report.get("src/c.rs").is_none());
    }
}

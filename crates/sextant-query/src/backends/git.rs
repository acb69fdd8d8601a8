//! Change-activity signals: per-file hotspot (churn) and recency scores.

use sextant_core::error::VcsError;
use sextant_vcs::{ActivityProvider, ActivityReport};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Signal maps keyed by repository-relative file path, values in [0, 1].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSignals {
    pub hotspot: HashMap<String, f64>,
    pub recency: HashMap<String, f64>,
}

impl FileSignals {
    pub fn from_report(report: &ActivityReport, half_life_days: f64) -> Self {
        let max = report.max_commit_count().max(1) as f64;
        let reference = report
            .head_commit_unix
            .or_else(|| report.files.values().map(|f| f.last_commit_unix).max())
            .unwrap_or(0);
        let half_life = if half_life_days > 0.0 { half_life_days } else { 30.0 };

        let mut signals = Self::default();
        for (path, activity) in &report.files {
            signals
                .hotspot
                .insert(path.clone(), activity.commit_count as f64 / max);
            let age_days = (reference - activity.last_commit_unix).max(0) as f64 / SECONDS_PER_DAY;
            signals
                .recency
                .insert(path.clone(), 0.5f64.powf(age_days / half_life));
        }
        signals
    }

    pub fn is_empty(&self) -> bool {
        self.hotspot.is_empty() && self.recency.is_empty()
    }
}

/// Caches one activity walk per repository snapshot.
pub struct GitSignals {
    provider: Arc<dyn ActivityProvider>,
    half_life_days: f64,
    max_commits: usize,
    cached: RwLock<Option<(String, Arc<FileSignals>)>>,
}

impl GitSignals {
    pub fn new(
        provider: Arc<dyn ActivityProvider>,
        half_life_days: f64,
        max_commits: usize,
    ) -> Self {
        Self {
            provider,
            half_life_days,
            max_commits,
            cached: RwLock::new(None),
        }
    }

    /// Signals for `snapshot_id`, recomputed when the snapshot changes.
    pub fn signals_for(&self, snapshot_id: &str) -> Result<Arc<FileSignals>, VcsError> {
        if let Ok(guard) = self.cached.read()
            && let Some((id, signals)) = guard.as_ref()
            && id == snapshot_id
        {
            return Ok(Arc::clone(signals));
        }

        let report = self.provider.file_activity(self.max_commits)?;
        let signals = Arc::new(FileSignals::from_report(&report, self.half_life_days));
        debug!(
            files = report.files.len(),
            commits = report.commits_walked,
            "Computed change-activity signals"
        );
        if let Ok(mut guard) = self.cached.write() {
            *guard = Some((snapshot_id.to_string(), Arc::clone(&signals)));
        }
        Ok(signals)
    }

    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.cached.write() {
            *guard = None;
        }
    }
}

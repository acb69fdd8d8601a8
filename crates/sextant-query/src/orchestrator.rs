use crate::backend::{BackendAnswer, BackendHandle, CallBudget, SymbolBackend};
use sextant_core::config::BackendsConfig;
use sextant_core::error::BackendError;
use sextant_core::types::{
    BackendContribution, BackendId, Capability, CompletenessInfo, CompletenessReason, MergeMode,
};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of one orchestrated call, with the audit trail for provenance.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub items: Vec<T>,
    pub completeness: CompletenessInfo,
    pub contributions: Vec<BackendContribution>,
    pub warnings: Vec<String>,
    pub timeouts: Vec<String>,
    pub used: Vec<BackendId>,
}

impl<T> Outcome<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keep the audit trail, replace the payload.
    pub fn map_items<U>(self, f: impl FnOnce(Vec<T>) -> Vec<U>) -> Outcome<U> {
        Outcome {
            items: f(self.items),
            completeness: self.completeness,
            contributions: self.contributions,
            warnings: self.warnings,
            timeouts: self.timeouts,
            used: self.used,
        }
    }
}

enum Attempt<T> {
    Skipped(String),
    Answered(BackendAnswer<T>, u64),
    TimedOut(u64),
    Failed(String, u64),
}

/// Registry of capability-tagged backends, queried in preference order.
pub struct Orchestrator {
    handles: Vec<BackendHandle>,
    preference: Vec<BackendId>,
    merge: MergeMode,
    timeouts: HashMap<BackendId, Duration>,
    ceilings: RwLock<HashMap<BackendId, CompletenessInfo>>,
}

impl Orchestrator {
    pub fn new(handles: Vec<BackendHandle>, config: &BackendsConfig) -> Self {
        let timeouts = handles
            .iter()
            .map(|h| (h.id(), Duration::from_millis(config.timeout_ms(h.id()).max(1))))
            .collect();
        Self {
            handles,
            preference: config.preference_typed(),
            merge: config.merge_mode(),
            timeouts,
            ceilings: RwLock::new(HashMap::new()),
        }
    }

    /// Cap the completeness `id` may claim; `None` lifts the cap.
    pub fn set_ceiling(&self, id: BackendId, ceiling: Option<CompletenessInfo>) {
        if let Ok(mut ceilings) = self.ceilings.write() {
            match ceiling {
                Some(ceiling) => ceilings.insert(id, ceiling),
                None => ceilings.remove(&id),
            };
        }
    }

    fn capped(&self, id: BackendId, claimed: CompletenessInfo) -> CompletenessInfo {
        let ceiling = self
            .ceilings
            .read()
            .ok()
            .and_then(|ceilings| ceilings.get(&id).cloned());
        match ceiling {
            Some(ceiling) if ceiling.score < claimed.score => ceiling,
            _ => claimed,
        }
    }

    pub fn handles(&self) -> &[BackendHandle] {
        &self.handles
    }

    pub fn default_merge(&self) -> MergeMode {
        self.merge
    }

    /// An available backend by id, checked now.
    pub fn backend(&self, id: BackendId) -> Option<Arc<dyn SymbolBackend>> {
        self.handles
            .iter()
            .find(|h| h.id() == id)
            .and_then(|h| h.resolve().ok())
            .cloned()
    }

    /// Handles able to answer `capability`: configured preference first, the rest by priority.
    pub fn candidates(&self, capability: Capability) -> Vec<&BackendHandle> {
        let mut out: Vec<&BackendHandle> = Vec::new();
        for id in &self.preference {
            if let Some(handle) = self.handles.iter().find(|h| h.id() == *id)
                && handle.supports(capability)
            {
                out.push(handle);
            }
        }
        let mut rest: Vec<&BackendHandle> = self
            .handles
            .iter()
            .filter(|h| !self.preference.contains(&h.id()) && h.supports(capability))
            .collect();
        rest.sort_by_key(|h| match h {
            BackendHandle::Available(b) => b.priority(),
            BackendHandle::Unavailable { id, .. } => id.default_priority(),
        });
        out.extend(rest);
        out
    }

    /// Run `call` against the candidates for `capability` and merge per `merge`.
    /// `key` identifies duplicates across backends in union mode.
    pub fn execute<T, F, K, KF>(
        &self,
        capability: Capability,
        merge: MergeMode,
        call: F,
        key: KF,
    ) -> Outcome<T>
    where
        T: Send + 'static,
        F: Fn(&dyn SymbolBackend, &CallBudget) -> Result<BackendAnswer<T>, BackendError>
            + Send
            + Sync
            + 'static,
        K: Eq + Hash,
        KF: Fn(&T) -> K,
    {
        let call = Arc::new(call);
        let candidates = self.candidates(capability);
        let mut outcome = Outcome {
            items: Vec::new(),
            completeness: CompletenessInfo::unknown(),
            contributions: Vec::with_capacity(candidates.len()),
            warnings: Vec::new(),
            timeouts: Vec::new(),
            used: Vec::new(),
        };
        let mut skipped: Vec<String> = Vec::new();
        let mut answered_empty: Vec<BackendId> = Vec::new();
        let mut best: Option<CompletenessInfo> = None;
        let mut seen: HashSet<K> = HashSet::new();
        let mut done = false;

        for handle in candidates {
            let id = handle.id();
            if done {
                let mut contribution = BackendContribution::unavailable(id);
                contribution.available = handle.resolve().is_ok();
                outcome.contributions.push(contribution);
                continue;
            }

            match self.attempt(handle, &call) {
                Attempt::Skipped(reason) => {
                    debug!(backend = %id, %reason, "Backend skipped");
                    skipped.push(format!("{id} unavailable ({reason})"));
                    outcome.contributions.push(BackendContribution::unavailable(id));
                }
                Attempt::TimedOut(duration_ms) => {
                    let budget = self.timeout_for(id).as_millis();
                    warn!(backend = %id, budget_ms = budget as u64, "Backend call timed out");
                    outcome.timeouts.push(id.to_string());
                    outcome
                        .warnings
                        .push(format!("{id} backend timed out after {budget}ms"));
                    skipped.push(format!("{id} timed out"));
                    outcome.contributions.push(BackendContribution {
                        duration_ms,
                        ..BackendContribution::unavailable(id)
                    });
                }
                Attempt::Failed(reason, duration_ms) => {
                    warn!(backend = %id, %reason, "Backend call failed");
                    outcome.warnings.push(format!("{id} backend failed: {reason}"));
                    skipped.push(format!("{id} failed"));
                    outcome.contributions.push(BackendContribution {
                        duration_ms,
                        ..BackendContribution::unavailable(id)
                    });
                }
                Attempt::Answered(answer, duration_ms) => {
                    let completeness = self.capped(id, answer.completeness);
                    let count = answer.items.len();
                    let used = count > 0;
                    outcome.contributions.push(BackendContribution {
                        backend_id: id,
                        available: true,
                        used,
                        result_count: count,
                        duration_ms,
                        completeness: completeness.score,
                    });
                    if !used {
                        answered_empty.push(id);
                        // A complete backend that found nothing has answered.
                        if merge == MergeMode::PreferFirst && completeness.is_full() {
                            done = true;
                        }
                        continue;
                    }
                    outcome.used.push(id);
                    if best.as_ref().is_none_or(|b| completeness.score > b.score) {
                        best = Some(completeness);
                    }
                    match merge {
                        MergeMode::PreferFirst => {
                            outcome.items = answer.items;
                            done = true;
                        }
                        MergeMode::Union => {
                            for item in answer.items {
                                if seen.insert(key(&item)) {
                                    outcome.items.push(item);
                                }
                            }
                        }
                    }
                }
            }
        }

        outcome.completeness = match best {
            Some(mut completeness) => {
                if !skipped.is_empty() {
                    let note = format!("fell back past: {}", skipped.join(", "));
                    completeness.details = Some(match completeness.details.take() {
                        Some(existing) => format!("{existing}; {note}"),
                        None => note,
                    });
                }
                completeness
            }
            None if !answered_empty.is_empty() => {
                let queried: Vec<&str> = answered_empty.iter().map(BackendId::as_str).collect();
                CompletenessInfo::no_results()
                    .with_details(format!("no matches from {}", queried.join(", ")))
            }
            None if !outcome.timeouts.is_empty() => {
                CompletenessInfo::new(0.0, CompletenessReason::TimedOut)
                    .with_details(skipped.join(", "))
            }
            None => CompletenessInfo::unknown().with_details(if skipped.is_empty() {
                format!("no backend supports {capability:?}")
            } else {
                format!("no backend answered: {}", skipped.join(", "))
            }),
        };
        debug!(
            ?capability,
            used = ?outcome.used,
            results = outcome.items.len(),
            score = outcome.completeness.score,
            "Orchestrated call finished"
        );
        outcome
    }

    fn timeout_for(&self, id: BackendId) -> Duration {
        self.timeouts
            .get(&id)
            .copied()
            .unwrap_or(Duration::from_secs(5))
    }

    fn attempt<T, F>(&self, handle: &BackendHandle, call: &Arc<F>) -> Attempt<T>
    where
        T: Send + 'static,
        F: Fn(&dyn SymbolBackend, &CallBudget) -> Result<BackendAnswer<T>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        let backend = match handle.resolve() {
            Ok(backend) => Arc::clone(backend),
            Err(reason) => return Attempt::Skipped(reason),
        };
        let id = backend.id();
        let timeout = self.timeout_for(id);
        let budget = CallBudget::new(timeout);
        let worker_budget = budget.clone();
        let worker_call = Arc::clone(call);
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();

        let spawned = thread::Builder::new()
            .name(format!("sextant-{id}"))
            .spawn(move || {
                let result = worker_call(backend.as_ref(), &worker_budget);
                // Receiver is gone once the caller stopped waiting.
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            return Attempt::Failed(format!("cannot spawn worker: {e}"), 0);
        }

        let result = rx.recv_timeout(timeout);
        let elapsed = started.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(answer)) => Attempt::Answered(answer, elapsed),
            Ok(Err(BackendError::Cancelled)) | Ok(Err(BackendError::Timeout { .. })) => {
                Attempt::TimedOut(elapsed)
            }
            Ok(Err(BackendError::Unavailable { reason, .. })) => Attempt::Skipped(reason),
            Ok(Err(e)) => Attempt::Failed(e.to_string(), elapsed),
            Err(RecvTimeoutError::Timeout) => {
                budget.cancel();
                Attempt::TimedOut(elapsed)
            }
            Err(RecvTimeoutError::Disconnected) => {
                Attempt::Failed("backend worker exited without an answer".to_string(), elapsed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RefOptions, SearchOptions};
    use sextant_core::types::{ReferenceInfo, SymbolInfo, SymbolKind, VisibilityInfo};

    struct StubBackend {
        id: BackendId,
        names: Vec<&'static str>,
        score: f64,
        delay: Duration,
        available: bool,
        fail: bool,
    }

    impl StubBackend {
        fn new(id: BackendId, names: Vec<&'static str>, score: f64) -> Self {
            Self {
                id,
                names,
                score,
                delay: Duration::ZERO,
                available: true,
                fail: false,
            }
        }
    }

    impl SymbolBackend for StubBackend {
        fn id(&self) -> BackendId {
            self.id
        }

        fn capabilities(&self) -> &[Capability] {
            &[Capability::SymbolSearch]
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn get_symbol(
            &self,
            _: &str,
            _: &CallBudget,
        ) -> Result<BackendAnswer<SymbolInfo>, BackendError> {
            Ok(BackendAnswer::new(Vec::new(), CompletenessInfo::unknown()))
        }

        fn search_symbols(
            &self,
            _: &SearchOptions,
            budget: &CallBudget,
        ) -> Result<BackendAnswer<SymbolInfo>, BackendError> {
            if self.fail {
                return Err(BackendError::failed(self.id.as_str(), "boom"));
            }
            let started = Instant::now();
            while started.elapsed() < self.delay {
                budget.check()?;
                thread::sleep(Duration::from_millis(5));
            }
            let items = self
                .names
                .iter()
                .map(|name| SymbolInfo {
                    stable_id: format!("{}/{name}", self.id),
                    name: name.to_string(),
                    kind: SymbolKind::Function,
                    container: None,
                    module_id: self.id.to_string(),
                    signature: None,
                    documentation: None,
                    location: None,
                    visibility: VisibilityInfo::unknown(),
                })
                .collect();
            let reason = if self.score >= 1.0 {
                CompletenessReason::FullBackend
            } else {
                CompletenessReason::BestEffortFallback
            };
            Ok(BackendAnswer::new(items, CompletenessInfo::new(self.score, reason)))
        }

        fn find_references(
            &self,
            _: &str,
            _: &RefOptions,
            _: &CallBudget,
        ) -> Result<BackendAnswer<ReferenceInfo>, BackendError> {
            Ok(BackendAnswer::new(Vec::new(), CompletenessInfo::unknown()))
        }
    }

    fn stub(id: BackendId, names: Vec<&'static str>, score: f64) -> BackendHandle {
        BackendHandle::available(Arc::new(StubBackend::new(id, names, score)))
    }

    fn config(timeout_ms: u64) -> BackendsConfig {
        let mut config = BackendsConfig::default();
        config.timeouts.index_ms = timeout_ms;
        config.timeouts.lsp_ms = timeout_ms;
        config.timeouts.syntax_ms = timeout_ms;
        config
    }

    fn search(orch: &Orchestrator, merge: MergeMode) -> Outcome<SymbolInfo> {
        let options = SearchOptions::default();
        orch.execute(
            Capability::SymbolSearch,
            merge,
            move |backend, budget| backend.search_symbols(&options, budget),
            |s: &SymbolInfo| s.name.clone(),
        )
    }

    #[test]
    fn prefer_first_uses_highest_precision_backend() {
        let orch = Orchestrator::new(
            vec![
                stub(BackendId::Syntax, vec!["a"], 0.7),
                stub(BackendId::Index, vec!["a", "b"], 1.0),
            ],
            &config(1_000),
        );
        let outcome = search(&orch, MergeMode::PreferFirst);
        assert_eq!(outcome.used, vec![BackendId::Index]);
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.completeness.reason, CompletenessReason::FullBackend);
        assert_eq!(outcome.contributions.len(), 2);
        assert!(outcome.contributions[0].used);
        assert!(!outcome.contributions[1].used);
        assert!(outcome.contributions[1].available);
    }

    #[test]
    fn unavailable_index_falls_back_to_syntax() {
        let orch = Orchestrator::new(
            vec![
                BackendHandle::unavailable(BackendId::Index, "index snapshot missing"),
                stub(BackendId::Syntax, vec!["a"], 0.7),
            ],
            &config(1_000),
        );
        let outcome = search(&orch, MergeMode::PreferFirst);
        assert_eq!(outcome.used, vec![BackendId::Syntax]);
        assert_eq!(outcome.completeness.score, 0.7);
        assert_eq!(outcome.completeness.reason, CompletenessReason::BestEffortFallback);
        let details = outcome.completeness.details.unwrap();
        assert!(details.contains("index unavailable (index snapshot missing)"), "{details}");
        assert!(!outcome.contributions[0].available);
    }

    #[test]
    fn unavailable_backend_is_listed_only_for_its_capabilities() {
        let orch = Orchestrator::new(
            vec![
                BackendHandle::unavailable(BackendId::Lsp, "no language server"),
                stub(BackendId::Index, vec!["a"], 1.0),
            ],
            &config(1_000),
        );
        assert_eq!(orch.candidates(Capability::SymbolSearch).len(), 2);
        let graph: Vec<BackendId> = orch
            .candidates(Capability::SymbolGraph)
            .iter()
            .map(|h| h.id())
            .collect();
        assert!(graph.is_empty(), "{graph:?}");
    }

    #[test]
    fn complete_empty_answer_ends_prefer_first() {
        let orch = Orchestrator::new(
            vec![
                stub(BackendId::Index, vec![], 1.0),
                stub(BackendId::Syntax, vec!["a"], 0.7),
            ],
            &config(1_000),
        );
        let outcome = search(&orch, MergeMode::PreferFirst);
        assert!(outcome.is_empty());
        assert!(outcome.used.is_empty());
        assert_eq!(outcome.completeness.reason, CompletenessReason::NoResults);
        assert!(outcome.contributions[0].available);
        assert!(!outcome.contributions[1].used);
        assert_eq!(outcome.contributions[1].result_count, 0);

        let union = search(&orch, MergeMode::Union);
        assert_eq!(union.used, vec![BackendId::Syntax]);
    }

    #[test]
    fn degraded_empty_answer_falls_through() {
        let orch = Orchestrator::new(
            vec![
                stub(BackendId::Index, vec![], 0.9),
                stub(BackendId::Syntax, vec!["a"], 0.7),
            ],
            &config(1_000),
        );
        let outcome = search(&orch, MergeMode::PreferFirst);
        assert_eq!(outcome.used, vec![BackendId::Syntax]);
        assert_eq!(outcome.items.len(), 1);
    }

    #[test]
    fn ceiling_caps_claimed_completeness_until_lifted() {
        let orch = Orchestrator::new(
            vec![
                stub(BackendId::Index, vec!["a"], 1.0),
                stub(BackendId::Syntax, vec!["b"], 0.7),
            ],
            &config(1_000),
        );
        let stale = CompletenessInfo::new(0.9, CompletenessReason::IndexStale)
            .with_details("index snapshot is 3 commit(s) behind HEAD");
        orch.set_ceiling(BackendId::Index, Some(stale.clone()));

        let outcome = search(&orch, MergeMode::PreferFirst);
        assert_eq!(outcome.used, vec![BackendId::Index]);
        assert_eq!(outcome.completeness, stale);
        assert_eq!(outcome.contributions[0].completeness, 0.9);

        orch.set_ceiling(BackendId::Index, None);
        let outcome = search(&orch, MergeMode::PreferFirst);
        assert_eq!(outcome.completeness.reason, CompletenessReason::FullBackend);
        assert_eq!(outcome.completeness.score, 1.0);
    }

    #[test]
    fn slow_backend_times_out_and_is_cancelled() {
        let mut slow = StubBackend::new(BackendId::Index, vec!["a"], 1.0);
        slow.delay = Duration::from_secs(5);
        let orch = Orchestrator::new(
            vec![
                BackendHandle::available(Arc::new(slow)),
                stub(BackendId::Syntax, vec!["b"], 0.7),
            ],
            &config(50),
        );
        let outcome = search(&orch, MergeMode::PreferFirst);
        assert_eq!(outcome.timeouts, vec!["index".to_string()]);
        assert_eq!(outcome.used, vec![BackendId::Syntax]);
        assert!(outcome.warnings.iter().any(|w| w.contains("timed out")));
        assert!(!outcome.contributions[0].available);
    }

    #[test]
    fn failures_become_warnings() {
        let mut broken = StubBackend::new(BackendId::Index, vec!["a"], 1.0);
        broken.fail = true;
        let orch = Orchestrator::new(
            vec![BackendHandle::available(Arc::new(broken))],
            &config(1_000),
        );
        let outcome = search(&orch, MergeMode::PreferFirst);
        assert!(outcome.is_empty());
        assert_eq!(outcome.completeness.reason, CompletenessReason::Unknown);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn union_dedupes_and_takes_max_completeness() {
        let orch = Orchestrator::new(
            vec![
                stub(BackendId::Index, vec!["a", "b"], 1.0),
                stub(BackendId::Syntax, vec!["b", "c"], 0.7),
            ],
            &config(1_000),
        );
        let outcome = search(&orch, MergeMode::Union);
        let names: Vec<&str> = outcome.items.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(outcome.used, vec![BackendId::Index, BackendId::Syntax]);
        assert_eq!(outcome.completeness.score, 1.0);
    }

    #[test]
    fn empty_answers_are_no_results() {
        let orch = Orchestrator::new(vec![stub(BackendId::Index, vec![], 1.0)], &config(1_000));
        let outcome = search(&orch, MergeMode::PreferFirst);
        assert!(outcome.is_empty());
        assert_eq!(outcome.completeness.reason, CompletenessReason::NoResults);
        assert_eq!(outcome.completeness.score, 0.0);
        assert_eq!(outcome.contributions[0].result_count, 0);
    }

    #[test]
    fn unavailable_check_is_evaluated_per_call() {
        let mut down = StubBackend::new(BackendId::Index, vec!["a"], 1.0);
        down.available = false;
        let orch = Orchestrator::new(
            vec![BackendHandle::available(Arc::new(down))],
            &config(1_000),
        );
        assert!(orch.backend(BackendId::Index).is_none());
        let outcome = search(&orch, MergeMode::PreferFirst);
        assert_eq!(outcome.completeness.reason, CompletenessReason::Unknown);
    }
}

use super::store::IdentityStore;
use serde::Serialize;
use sextant_core::error::StateError;
use sextant_core::types::{AliasReason, SymbolAlias, SymbolMapping};
use std::collections::HashSet;
use tracing::info;

const RENAME_CONFIDENCE: f64 = 0.95;
const FUZZY_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub upserted: usize,
    pub renamed: usize,
    pub fuzzy_matched: usize,
    pub tombstoned: usize,
}

/// Bring stored identities in line with a freshly observed symbol set.
///
/// Active mappings absent from `observed` are soft-deleted; each gets an alias to its
/// successor when one can be found by backend-native id or fingerprint similarity.
pub fn reconcile(
    store: &dyn IdentityStore,
    observed: &[SymbolMapping],
    state_id: &str,
    now: &str,
) -> Result<ReconcileReport, StateError> {
    let previous = store.list_active()?;
    let previous_ids: HashSet<&str> = previous.iter().map(|m| m.stable_id.as_str()).collect();
    let observed_ids: HashSet<&str> = observed.iter().map(|m| m.stable_id.as_str()).collect();
    let added: Vec<&SymbolMapping> = observed
        .iter()
        .filter(|m| !previous_ids.contains(m.stable_id.as_str()))
        .collect();

    store.upsert_many(observed)?;
    let mut report = ReconcileReport {
        upserted: observed.len(),
        ..ReconcileReport::default()
    };

    for old in previous
        .iter()
        .filter(|m| !observed_ids.contains(m.stable_id.as_str()))
    {
        let successor = old
            .backend_stable_id
            .as_deref()
            .and_then(|native| {
                observed
                    .iter()
                    .find(|m| m.backend_stable_id.as_deref() == Some(native))
            })
            .map(|m| (m, AliasReason::Renamed, RENAME_CONFIDENCE))
            .or_else(|| {
                best_fuzzy_match(old, &added)
                    .map(|(m, score)| (m, AliasReason::FuzzyMatch, score))
            });

        if let Some((target, reason, confidence)) = successor {
            store.insert_alias(&SymbolAlias {
                old_stable_id: old.stable_id.clone(),
                new_stable_id: target.stable_id.clone(),
                reason,
                confidence,
                created_at: now.to_string(),
                created_state_id: state_id.to_string(),
            })?;
            match reason {
                AliasReason::Renamed => report.renamed += 1,
                _ => report.fuzzy_matched += 1,
            }
        } else {
            report.tombstoned += 1;
        }
        store.mark_deleted(&old.stable_id, now, state_id)?;
    }

    info!(
        upserted = report.upserted,
        renamed = report.renamed,
        fuzzy = report.fuzzy_matched,
        tombstoned = report.tombstoned,
        "Reconciled symbol identities"
    );
    Ok(report)
}

fn best_fuzzy_match<'a>(
    old: &SymbolMapping,
    candidates: &[&'a SymbolMapping],
) -> Option<(&'a SymbolMapping, f64)> {
    candidates
        .iter()
        .map(|m| (*m, similarity(old, m)))
        .filter(|(_, score)| *score >= FUZZY_THRESHOLD)
        .max_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then_with(|| b.0.stable_id.cmp(&a.0.stable_id))
        })
}

/// Weighted fingerprint agreement in [0, 1].
pub fn similarity(a: &SymbolMapping, b: &SymbolMapping) -> f64 {
    let mut score = 0.0;
    if a.fingerprint.kind == b.fingerprint.kind {
        score += 0.3;
    }

    if a.fingerprint.name == b.fingerprint.name {
        score += 0.4;
    } else if normalize_name(&a.fingerprint.name) == normalize_name(&b.fingerprint.name) {
        score += 0.2;
    }

    let (ca, cb) = (
        a.fingerprint.qualified_container.as_str(),
        b.fingerprint.qualified_container.as_str(),
    );
    if ca == cb {
        score += 0.2;
    } else if root_namespace(ca).is_some_and(|root| Some(root) == root_namespace(cb)) {
        score += 0.1;
    }

    let pa = a.location.as_ref().map(|l| (l.path.as_str(), l.directory()));
    let pb = b.location.as_ref().map(|l| (l.path.as_str(), l.directory()));
    if let (Some((path_a, dir_a)), Some((path_b, dir_b))) = (pa, pb) {
        if path_a == path_b {
            score += 0.1;
        } else if dir_a == dir_b {
            score += 0.05;
        }
    }
    score
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn root_namespace(container: &str) -> Option<&str> {
    container
        .split(['/', '.', ':'])
        .find(|segment| !segment.is_empty())
}

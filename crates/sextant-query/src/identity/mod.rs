//! Canonical, alias-aware symbol identity.

pub mod reconcile;
pub mod store;

pub use reconcile::{ReconcileReport, reconcile, similarity};
pub use store::{IdentityStore, SqliteIdentityStore};

use crate::backend::owner_of_stable_id;
use serde_json::json;
use sextant_core::constants::ALIAS_CHAIN_MAX_DEPTH;
use sextant_core::error::{ErrorCode, QueryError};
use sextant_core::types::{
    AliasReason, SymbolFingerprint, SymbolInfo, SymbolMapping, SymbolState,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

const CONFIDENCE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSymbol {
    pub stable_id: String,
    pub mapping: Option<SymbolMapping>,
    pub redirected: bool,
    pub redirected_from: Option<String>,
    pub redirect_reason: Option<AliasReason>,
    pub redirect_confidence: Option<f64>,
}

impl ResolvedSymbol {
    pub fn direct(stable_id: impl Into<String>, mapping: Option<SymbolMapping>) -> Self {
        Self {
            stable_id: stable_id.into(),
            mapping,
            redirected: false,
            redirected_from: None,
            redirect_reason: None,
            redirect_confidence: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(ResolvedSymbol),
    Deleted {
        stable_id: String,
        deleted_at: Option<String>,
        deleted_in_state_id: Option<String>,
    },
    NotFound,
    Ambiguous {
        candidates: Vec<String>,
    },
}

/// First redirect taken while walking an alias chain.
struct FirstHop {
    from: String,
    reason: AliasReason,
    confidence: f64,
}

pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    /// Map a caller-supplied reference (stable id, backend id or bare name) to a canonical id.
    pub fn resolve(&self, reference: &str) -> Result<Resolution, QueryError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(QueryError::invalid_parameter(
                "symbolId",
                "must not be empty",
            ));
        }

        let mut current = reference.to_string();
        let mut visited = HashSet::from([current.clone()]);
        let mut first_hop: Option<FirstHop> = None;
        let mut hops = 0usize;

        loop {
            let mut mapping = self.store.get_mapping(&current)?;
            if mapping.is_none() && hops == 0 {
                mapping = self.store.get_by_backend_id(&current)?;
                if let Some(found) = &mapping {
                    current = found.stable_id.clone();
                    visited.insert(current.clone());
                }
            }

            if let Some(found) = &mapping
                && found.is_active()
            {
                return Ok(Resolution::Resolved(finish(current, mapping, first_hop)));
            }

            let aliases = self.store.aliases_from(&current)?;
            let Some(top) = aliases.first() else {
                return Ok(match mapping {
                    Some(deleted) => Resolution::Deleted {
                        stable_id: deleted.stable_id,
                        deleted_at: deleted.deleted_at,
                        deleted_in_state_id: deleted.deleted_in_state_id,
                    },
                    None if hops > 0 => Resolution::Resolved(finish(current, None, first_hop)),
                    None => self.resolve_bare_name(reference)?,
                });
            };

            let tied: Vec<String> = aliases
                .iter()
                .filter(|a| (a.confidence - top.confidence).abs() < CONFIDENCE_EPSILON)
                .map(|a| a.new_stable_id.clone())
                .collect();
            if tied.len() > 1 {
                debug!(reference, candidates = tied.len(), "Alias fan-out is ambiguous");
                return Ok(Resolution::Ambiguous { candidates: tied });
            }

            if hops >= ALIAS_CHAIN_MAX_DEPTH {
                return Err(QueryError::new(
                    ErrorCode::AliasChainTooDeep,
                    format!(
                        "alias chain from `{reference}` exceeds {ALIAS_CHAIN_MAX_DEPTH} hops"
                    ),
                )
                .with_details(json!({ "reference": reference, "lastId": current })));
            }
            if !visited.insert(top.new_stable_id.clone()) {
                return Err(QueryError::new(
                    ErrorCode::AliasCycle,
                    format!("alias cycle detected at `{}`", top.new_stable_id),
                )
                .with_details(json!({ "reference": reference, "cycleAt": top.new_stable_id })));
            }

            if first_hop.is_none() {
                first_hop = Some(FirstHop {
                    from: current.clone(),
                    reason: top.reason,
                    confidence: top.confidence,
                });
            }
            debug!(
                from = %current,
                to = %top.new_stable_id,
                reason = top.reason.as_str(),
                "Following alias"
            );
            current = top.new_stable_id.clone();
            hops += 1;
        }
    }

    fn resolve_bare_name(&self, reference: &str) -> Result<Resolution, QueryError> {
        if !is_bare_name(reference) {
            return Ok(Resolution::NotFound);
        }
        let mut matches = self.store.find_active_by_name(reference)?;
        Ok(match matches.len() {
            0 => Resolution::NotFound,
            1 => {
                let mapping = matches.remove(0);
                let stable_id = mapping.stable_id.clone();
                Resolution::Resolved(ResolvedSymbol::direct(stable_id, Some(mapping)))
            }
            _ => Resolution::Ambiguous {
                candidates: matches.into_iter().map(|m| m.stable_id).collect(),
            },
        })
    }
}

fn finish(
    stable_id: String,
    mapping: Option<SymbolMapping>,
    hop: Option<FirstHop>,
) -> ResolvedSymbol {
    match hop {
        Some(hop) => ResolvedSymbol {
            stable_id,
            mapping,
            redirected: true,
            redirected_from: Some(hop.from),
            redirect_reason: Some(hop.reason),
            redirect_confidence: Some(hop.confidence),
        },
        None => ResolvedSymbol::direct(stable_id, mapping),
    }
}

/// A plain identifier rather than a structured or generated id.
pub fn is_bare_name(reference: &str) -> bool {
    !reference.is_empty()
        && !reference.starts_with("syn-")
        && reference
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Identity record for a symbol observed in a backend at `state_id`.
pub fn mapping_from_symbol(
    symbol: &SymbolInfo,
    backend_stable_id: Option<&str>,
    state_id: &str,
    now: &str,
) -> SymbolMapping {
    let qualified_container = owner_of_stable_id(&symbol.stable_id)
        .map(str::to_string)
        .or_else(|| symbol.container.clone())
        .unwrap_or_else(|| symbol.module_id.clone());
    SymbolMapping {
        stable_id: symbol.stable_id.clone(),
        state: SymbolState::Active,
        backend_stable_id: backend_stable_id.map(str::to_string),
        fingerprint: SymbolFingerprint {
            name: symbol.name.clone(),
            kind: symbol.kind,
            qualified_container,
        },
        location: symbol.location.clone(),
        last_verified_at: now.to_string(),
        last_verified_state_id: state_id.to_string(),
        deleted_at: None,
        deleted_in_state_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sextant_core::types::{Location, SymbolAlias, SymbolKind};
    use sextant_state::{db, schema};

    fn store() -> Arc<SqliteIdentityStore> {
        let conn = db::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        Arc::new(SqliteIdentityStore::new(conn))
    }

    fn mapping(id: &str, name: &str) -> SymbolMapping {
        SymbolMapping {
            stable_id: id.into(),
            state: SymbolState::Active,
            backend_stable_id: None,
            fingerprint: SymbolFingerprint {
                name: name.into(),
                kind: SymbolKind::Method,
                qualified_container: "src/engine/Engine".into(),
            },
            location: Some(Location::new("src/engine.rs", 1, 0)),
            last_verified_at: "2026-01-01T00:00:00Z".into(),
            last_verified_state_id: "s1".into(),
            deleted_at: None,
            deleted_in_state_id: None,
        }
    }

    fn alias(old: &str, new: &str, reason: AliasReason, confidence: f64) -> SymbolAlias {
        SymbolAlias {
            old_stable_id: old.into(),
            new_stable_id: new.into(),
            reason,
            confidence,
            created_at: "2026-01-02T00:00:00Z".into(),
            created_state_id: "s2".into(),
        }
    }

    fn resolved(resolution: Resolution) -> ResolvedSymbol {
        match resolution {
            Resolution::Resolved(r) => r,
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn canonical_id_resolves_without_redirect() {
        let s = store();
        s.upsert_many(&[mapping("e#search()", "search")]).unwrap();
        let resolver = IdentityResolver::new(s);
        let first = resolved(resolver.resolve("e#search()").unwrap());
        assert!(!first.redirected);
        let second = resolved(resolver.resolve(&first.stable_id).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn renamed_symbol_follows_alias() {
        let s = store();
        s.upsert_many(&[mapping("e#find()", "find"), mapping("e#search()", "search")])
            .unwrap();
        s.mark_deleted("e#find()", "2026-01-02T00:00:00Z", "s2").unwrap();
        s.insert_alias(&alias("e#find()", "e#search()", AliasReason::Renamed, 0.95))
            .unwrap();
        let r = resolved(IdentityResolver::new(s).resolve("e#find()").unwrap());
        assert_eq!(r.stable_id, "e#search()");
        assert!(r.redirected);
        assert_eq!(r.redirected_from.as_deref(), Some("e#find()"));
        assert_eq!(r.redirect_reason, Some(AliasReason::Renamed));
        assert_eq!(r.redirect_confidence, Some(0.95));
    }

    #[test]
    fn deleted_without_alias_reports_timestamp() {
        let s = store();
        s.upsert_many(&[mapping("e#gone()", "gone")]).unwrap();
        s.mark_deleted("e#gone()", "2026-02-01T00:00:00Z", "s9").unwrap();
        match IdentityResolver::new(s).resolve("e#gone()").unwrap() {
            Resolution::Deleted { deleted_at, .. } => {
                assert_eq!(deleted_at.as_deref(), Some("2026-02-01T00:00:00Z"))
            }
            other => panic!("expected deleted, got {other:?}"),
        }
    }

    #[test]
    fn unknown_structured_id_is_not_found() {
        let resolver = IdentityResolver::new(store());
        assert_eq!(resolver.resolve("src/x/Y#z()").unwrap(), Resolution::NotFound);
        assert_eq!(
            resolver.resolve("  ").unwrap_err().code,
            ErrorCode::InvalidParameter
        );
    }

    #[test]
    fn bare_name_resolves_or_is_ambiguous() {
        let s = store();
        s.upsert_many(&[
            mapping("a#run()", "run"),
            mapping("b#run()", "run"),
            mapping("c#stop()", "stop"),
        ])
        .unwrap();
        let resolver = IdentityResolver::new(s);
        assert_eq!(resolved(resolver.resolve("stop").unwrap()).stable_id, "c#stop()");
        assert_eq!(
            resolver.resolve("run").unwrap(),
            Resolution::Ambiguous {
                candidates: vec!["a#run()".into(), "b#run()".into()]
            }
        );
    }

    #[test]
    fn tied_aliases_are_ambiguous() {
        let s = store();
        s.insert_alias(&alias("old", "x", AliasReason::FuzzyMatch, 0.7)).unwrap();
        s.insert_alias(&alias("old", "y", AliasReason::FuzzyMatch, 0.7)).unwrap();
        assert!(matches!(
            IdentityResolver::new(s).resolve("old").unwrap(),
            Resolution::Ambiguous { .. }
        ));
    }

    #[test]
    fn alias_cycle_and_depth_are_errors() {
        let s = store();
        s.insert_alias(&alias("p", "q", AliasReason::Renamed, 0.95)).unwrap();
        s.insert_alias(&alias("q", "p", AliasReason::Renamed, 0.95)).unwrap();
        let resolver = IdentityResolver::new(s);
        assert_eq!(resolver.resolve("p").unwrap_err().code, ErrorCode::AliasCycle);

        let s = store();
        for (old, new) in [("h0", "h1"), ("h1", "h2"), ("h2", "h3"), ("h3", "h4")] {
            s.insert_alias(&alias(old, new, AliasReason::Moved, 0.9)).unwrap();
        }
        let resolver = IdentityResolver::new(s.clone());
        assert_eq!(
            resolver.resolve("h0").unwrap_err().code,
            ErrorCode::AliasChainTooDeep
        );
        // Three hops is within the limit.
        let r = resolved(resolver.resolve("h1").unwrap());
        assert_eq!(r.stable_id, "h4");
        assert_eq!(r.redirected_from.as_deref(), Some("h1"));
    }

    #[test]
    fn backend_native_id_maps_to_stable_id() {
        let s = store();
        let mut m = mapping("e#search()", "search");
        m.backend_stable_id = Some("native-7".into());
        s.upsert_many(&[m]).unwrap();
        let r = resolved(IdentityResolver::new(s).resolve("native-7").unwrap());
        assert_eq!(r.stable_id, "e#search()");
        assert!(!r.redirected);
    }

    #[test]
    fn mapping_uses_owner_prefix_as_container() {
        let symbol = SymbolInfo {
            stable_id: "src/engine/Engine#search()".into(),
            name: "search".into(),
            kind: SymbolKind::Method,
            container: Some("Engine".into()),
            module_id: "src/engine".into(),
            signature: None,
            documentation: None,
            location: None,
            visibility: sextant_core::types::VisibilityInfo::unknown(),
        };
        let m = mapping_from_symbol(&symbol, Some("n1"), "s1", "t");
        assert_eq!(m.fingerprint.qualified_container, "src/engine/Engine");
        assert_eq!(m.backend_stable_id.as_deref(), Some("n1"));
        assert!(m.is_active());
    }
}

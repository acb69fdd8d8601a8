//! Change-impact analysis: who depends on a symbol, how far the change spreads, how risky it is.

use crate::envelope::truncate;
use crate::graph::SymbolGraph;
use serde::{Deserialize, Serialize};
use sextant_core::types::{
    Location, ReferenceInfo, ReferenceKind, SymbolInfo, TruncationInfo, TruncationReason,
    Visibility, is_test_path,
};
use std::collections::{BTreeMap, HashSet, VecDeque};

const TRANSITIVE_DECAY: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImpactKind {
    DirectCaller,
    ImplementsInterface,
    TypeDependency,
    TransitiveCaller,
    Reference,
    TestDependency,
}

impl ImpactKind {
    fn priority(self) -> u8 {
        match self {
            Self::DirectCaller => 0,
            Self::ImplementsInterface => 1,
            Self::TypeDependency => 2,
            Self::TransitiveCaller => 3,
            Self::Reference => 4,
            Self::TestDependency => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub module_id: String,
    pub kind: ImpactKind,
    pub confidence: f64,
    pub distance: u32,
}

impl ImpactItem {
    fn sort_key(&self) -> &str {
        self.stable_id
            .as_deref()
            .or_else(|| self.location.as_ref().map(|l| l.path.as_str()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleImpact {
    pub module_id: String,
    pub impact_count: usize,
    pub direct_callers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFactors {
    pub visibility: f64,
    pub direct_callers: f64,
    pub module_spread: f64,
    pub impact_kind: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub score: f64,
    pub level: RiskLevel,
    pub factors: RiskFactors,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlastRadius {
    pub module_count: usize,
    pub file_count: usize,
    pub unique_caller_count: usize,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactReport {
    pub items: Vec<ImpactItem>,
    pub modules: Vec<ModuleImpact>,
    pub risk: RiskAssessment,
    pub blast_radius: BlastRadius,
    pub depth: u32,
}

/// Everything the analysis reads. The graph is optional; without it no transitive callers appear.
pub struct ImpactInput<'a> {
    pub target: &'a SymbolInfo,
    pub references: &'a [ReferenceInfo],
    pub graph: Option<&'a SymbolGraph>,
    pub depth: u32,
    pub include_tests: bool,
    pub max_items: usize,
    pub max_modules: usize,
}

/// Impact kind and confidence for one referencing location.
pub fn classify_reference(reference: &ReferenceInfo) -> (ImpactKind, f64) {
    match reference.kind {
        ReferenceKind::Call => (ImpactKind::DirectCaller, 0.9),
        ReferenceKind::TypeOf => (ImpactKind::TypeDependency, 0.8),
        ReferenceKind::Implements => (ImpactKind::ImplementsInterface, 0.9),
        _ if reference.is_test || is_test_path(&reference.location.path) => {
            (ImpactKind::TestDependency, 0.7)
        }
        _ => (ImpactKind::Reference, 0.6),
    }
}

pub fn analyze_impact(input: &ImpactInput<'_>) -> (ImpactReport, Vec<TruncationInfo>) {
    let mut items: Vec<ImpactItem> = input
        .references
        .iter()
        .filter(|r| input.include_tests || !r.is_test)
        .map(|r| {
            let (kind, confidence) = classify_reference(r);
            ImpactItem {
                stable_id: r.from_symbol.clone(),
                location: Some(r.location.clone()),
                module_id: r
                    .module_id
                    .clone()
                    .unwrap_or_else(|| r.location.directory().to_string()),
                kind,
                confidence,
                distance: 1,
            }
        })
        .collect();

    if let Some(graph) = input.graph {
        let direct: HashSet<&str> = input
            .references
            .iter()
            .filter(|r| r.kind == ReferenceKind::Call)
            .filter_map(|r| r.from_symbol.as_deref())
            .collect();
        items.extend(transitive_callers(
            graph,
            &input.target.stable_id,
            &direct,
            input.depth,
            input.include_tests,
        ));
    }

    let direct_caller_count = items
        .iter()
        .filter(|i| i.kind == ImpactKind::DirectCaller)
        .map(|i| i.stable_id.as_deref().unwrap_or(i.sort_key()))
        .collect::<HashSet<_>>()
        .len();
    let unique_callers: HashSet<&str> = items
        .iter()
        .filter(|i| matches!(i.kind, ImpactKind::DirectCaller | ImpactKind::TransitiveCaller))
        .filter_map(|i| i.stable_id.as_deref())
        .collect();
    let files: HashSet<&str> = items
        .iter()
        .filter_map(|i| i.location.as_ref().map(|l| l.path.as_str()))
        .collect();

    let mut by_module: BTreeMap<&str, ModuleImpact> = BTreeMap::new();
    for item in &items {
        let entry = by_module
            .entry(item.module_id.as_str())
            .or_insert_with(|| ModuleImpact {
                module_id: item.module_id.clone(),
                impact_count: 0,
                direct_callers: 0,
            });
        entry.impact_count += 1;
        if item.kind == ImpactKind::DirectCaller {
            entry.direct_callers += 1;
        }
    }
    let mut modules: Vec<ModuleImpact> = by_module.into_values().collect();
    modules.sort_by(|a, b| {
        b.impact_count
            .cmp(&a.impact_count)
            .then_with(|| a.module_id.cmp(&b.module_id))
    });

    let has_implements = items
        .iter()
        .any(|i| i.kind == ImpactKind::ImplementsInterface);
    let risk = assess_risk(
        input.target.visibility.visibility,
        direct_caller_count,
        modules.len(),
        has_implements,
    );
    let blast_radius = BlastRadius {
        module_count: modules.len(),
        file_count: files.len(),
        unique_caller_count: unique_callers.len(),
        risk_level: risk.level,
    };

    items.sort_by(|a, b| {
        a.kind
            .priority()
            .cmp(&b.kind.priority())
            .then_with(|| b.confidence.total_cmp(&a.confidence))
            .then_with(|| a.sort_key().cmp(b.sort_key()))
            .then_with(|| {
                let line = |i: &ImpactItem| i.location.as_ref().map(|l| (l.line, l.column));
                line(a).cmp(&line(b))
            })
    });

    let mut truncations = Vec::new();
    truncations.extend(truncate(&mut items, input.max_items, TruncationReason::MaxItems));
    truncations.extend(truncate(&mut modules, input.max_modules, TruncationReason::MaxModules));

    (
        ImpactReport {
            items,
            modules,
            risk,
            blast_radius,
            depth: input.depth,
        },
        truncations,
    )
}

/// Callers two or more hops away, confidence decaying with distance.
fn transitive_callers(
    graph: &SymbolGraph,
    root: &str,
    direct: &HashSet<&str>,
    depth: u32,
    include_tests: bool,
) -> Vec<ImpactItem> {
    let mut visited: HashSet<String> = HashSet::from([root.to_string()]);
    let mut queue: VecDeque<(String, u32)> = VecDeque::new();
    let mut first_ring: Vec<String> = graph.callers(root).into_iter().map(str::to_string).collect();
    first_ring.extend(direct.iter().map(|id| id.to_string()));
    first_ring.sort();
    first_ring.dedup();
    for id in first_ring {
        if visited.insert(id.clone()) {
            queue.push_back((id, 1));
        }
    }

    let mut out = Vec::new();
    while let Some((current, distance)) = queue.pop_front() {
        if distance >= depth {
            continue;
        }
        for caller in graph.callers(&current) {
            if !visited.insert(caller.to_string()) {
                continue;
            }
            let next = distance + 1;
            let location = graph.symbol(caller).and_then(|s| s.location.clone());
            if !include_tests && location.as_ref().is_some_and(|l| is_test_path(&l.path)) {
                continue;
            }
            let module_id = graph
                .symbol(caller)
                .map(|s| s.module_id.clone())
                .filter(|m| !m.is_empty())
                .or_else(|| location.as_ref().map(|l| l.directory().to_string()))
                .unwrap_or_else(|| ".".to_string());
            out.push(ImpactItem {
                stable_id: Some(caller.to_string()),
                location,
                module_id,
                kind: ImpactKind::TransitiveCaller,
                confidence: TRANSITIVE_DECAY.powi(next as i32),
                distance: next,
            });
            queue.push_back((caller.to_string(), next));
        }
    }
    out
}

/// Weighted risk from visibility, caller count, module spread and the strongest impact kind.
pub fn assess_risk(
    visibility: Visibility,
    direct_callers: usize,
    module_count: usize,
    has_implements: bool,
) -> RiskAssessment {
    let visibility_factor = match visibility {
        Visibility::Public => 0.9,
        Visibility::Internal | Visibility::Unknown => 0.5,
        Visibility::Private => 0.2,
    };
    let callers_factor = ((direct_callers as f64 + 1.0).log10() / 21f64.log10()).min(1.0);
    let spread_factor = match module_count {
        0 => 0.0,
        1 => 0.2,
        m => (m as f64).log10().min(1.0),
    };
    let kind_factor = if has_implements {
        0.9
    } else if direct_callers > 0 {
        0.7
    } else {
        0.4
    };

    let score = (0.3 * visibility_factor
        + 0.35 * callers_factor
        + 0.25 * spread_factor
        + 0.1 * kind_factor)
        .clamp(0.0, 1.0);
    let level = if score >= 0.7 {
        RiskLevel::High
    } else if score >= 0.4 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    let explanation = format!(
        "{} symbol with {} direct caller{} across {} module{}{}",
        visibility.as_str(),
        direct_callers,
        if direct_callers == 1 { "" } else { "s" },
        module_count,
        if module_count == 1 { "" } else { "s" },
        if has_implements {
            "; implemented by other types"
        } else {
            ""
        }
    );

    RiskAssessment {
        score,
        level,
        factors: RiskFactors {
            visibility: visibility_factor,
            direct_callers: callers_factor,
            module_spread: spread_factor,
            impact_kind: kind_factor,
        },
        explanation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphEdgeRecord, SymbolGraphExport};
    use sextant_core::types::{SymbolKind, VisibilityInfo};

    fn target(visibility: Visibility) -> SymbolInfo {
        SymbolInfo {
            stable_id: "core/Engine#run()".into(),
            name: "run".into(),
            kind: SymbolKind::Method,
            container: Some("Engine".into()),
            module_id: "core".into(),
            signature: None,
            documentation: None,
            location: Some(Location::new("core/engine.rs", 10, 4)),
            visibility: VisibilityInfo {
                visibility,
                confidence: 1.0,
                source: "index".into(),
            },
        }
    }

    fn reference(path: &str, kind: ReferenceKind, from: &str, module: &str) -> ReferenceInfo {
        ReferenceInfo {
            location: Location::new(path, 3, 1),
            kind,
            from_symbol: Some(from.into()),
            module_id: Some(module.into()),
            context: None,
            is_test: is_test_path(path),
        }
    }

    fn input<'a>(
        target: &'a SymbolInfo,
        refs: &'a [ReferenceInfo],
        graph: Option<&'a SymbolGraph>,
    ) -> ImpactInput<'a> {
        ImpactInput {
            target,
            references: refs,
            graph,
            depth: 2,
            include_tests: false,
            max_items: 100,
            max_modules: 50,
        }
    }

    #[test]
    fn classification_table() {
        let call = reference("a.rs", ReferenceKind::Call, "a", "m");
        assert_eq!(classify_reference(&call), (ImpactKind::DirectCaller, 0.9));
        let ty = reference("a.rs", ReferenceKind::TypeOf, "a", "m");
        assert_eq!(classify_reference(&ty), (ImpactKind::TypeDependency, 0.8));
        let imp = reference("a.rs", ReferenceKind::Implements, "a", "m");
        assert_eq!(classify_reference(&imp), (ImpactKind::ImplementsInterface, 0.9));
        let test = reference("tests/a.rs", ReferenceKind::Reference, "t", "tests");
        assert_eq!(classify_reference(&test), (ImpactKind::TestDependency, 0.7));
        let other = reference("a.rs", ReferenceKind::Import, "a", "m");
        assert_eq!(classify_reference(&other), (ImpactKind::Reference, 0.6));
    }

    #[test]
    fn risk_factors_and_levels() {
        let none = assess_risk(Visibility::Private, 0, 0, false);
        assert!((none.score - (0.3 * 0.2 + 0.1 * 0.4)).abs() < 1e-9);
        assert_eq!(none.level, RiskLevel::Low);

        let wide = assess_risk(Visibility::Public, 20, 10, true);
        assert!((wide.factors.direct_callers - 1.0).abs() < 1e-9);
        assert!((wide.factors.module_spread - 1.0).abs() < 1e-9);
        assert!((wide.score - (0.27 + 0.35 + 0.25 + 0.09)).abs() < 1e-9);
        assert_eq!(wide.level, RiskLevel::High);
        assert!(wide.explanation.starts_with("public symbol with 20 direct callers"));

        let one_module = assess_risk(Visibility::Internal, 1, 1, false);
        assert_eq!(one_module.factors.module_spread, 0.2);
        assert_eq!(one_module.factors.impact_kind, 0.7);
    }

    #[test]
    fn items_sorted_grouped_and_tests_excluded() {
        let t = target(Visibility::Public);
        let refs = vec![
            reference("api/handler.rs", ReferenceKind::Reference, "api/load()", "api"),
            reference("api/server.rs", ReferenceKind::Call, "api/serve()", "api"),
            reference("cli/main.rs", ReferenceKind::Call, "cli/main()", "cli"),
            reference("tests/engine.rs", ReferenceKind::Call, "tests/it()", "tests"),
        ];
        let (report, truncations) = analyze_impact(&input(&t, &refs, None));
        assert!(truncations.is_empty());
        let kinds: Vec<ImpactKind> = report.items.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![ImpactKind::DirectCaller, ImpactKind::DirectCaller, ImpactKind::Reference]
        );
        assert_eq!(report.items[0].stable_id.as_deref(), Some("api/serve()"));
        assert_eq!(report.modules[0].module_id, "api");
        assert_eq!(report.modules[0].impact_count, 2);
        assert_eq!(report.blast_radius.module_count, 2);
        assert_eq!(report.blast_radius.file_count, 3);
        assert_eq!(report.blast_radius.unique_caller_count, 2);
    }

    #[test]
    fn transitive_callers_decay_with_distance() {
        let t = target(Visibility::Internal);
        let graph = SymbolGraph::build(&SymbolGraphExport {
            symbols: Vec::new(),
            edges: vec![
                GraphEdgeRecord {
                    from: "api/serve()".into(),
                    to: t.stable_id.clone(),
                    kind: ReferenceKind::Call,
                },
                GraphEdgeRecord {
                    from: "bin/main()".into(),
                    to: "api/serve()".into(),
                    kind: ReferenceKind::Call,
                },
                GraphEdgeRecord {
                    from: "bin/start()".into(),
                    to: "bin/main()".into(),
                    kind: ReferenceKind::Call,
                },
            ],
        });
        let refs = vec![reference("api/server.rs", ReferenceKind::Call, "api/serve()", "api")];
        let (report, _) = analyze_impact(&input(&t, &refs, Some(&graph)));
        let transitive: Vec<&ImpactItem> = report
            .items
            .iter()
            .filter(|i| i.kind == ImpactKind::TransitiveCaller)
            .collect();
        assert_eq!(transitive.len(), 1);
        assert_eq!(transitive[0].stable_id.as_deref(), Some("bin/main()"));
        assert!((transitive[0].confidence - 0.81).abs() < 1e-9);
        assert_eq!(report.blast_radius.unique_caller_count, 2);
    }

    #[test]
    fn item_and_module_limits_truncate() {
        let t = target(Visibility::Public);
        let refs: Vec<ReferenceInfo> = (0..6)
            .map(|i| {
                reference(
                    &format!("m{i}/x.rs"),
                    ReferenceKind::Call,
                    &format!("m{i}/f()"),
                    &format!("m{i}"),
                )
            })
            .collect();
        let mut limited = input(&t, &refs, None);
        limited.max_items = 4;
        limited.max_modules = 3;
        let (report, truncations) = analyze_impact(&limited);
        assert_eq!(report.items.len(), 4);
        assert_eq!(report.modules.len(), 3);
        assert_eq!(truncations[0].reason, TruncationReason::MaxItems);
        assert_eq!(truncations[0].original_count, 6);
        assert_eq!(truncations[1].reason, TruncationReason::MaxModules);
        assert_eq!(report.blast_radius.module_count, 6);
    }
}

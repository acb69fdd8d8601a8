//! Syntax-only fallback: declarations extracted line by line with regular expressions.

use crate::backend::{
    BackendAnswer, CallBudget, RefOptions, SearchOptions, SymbolBackend, name_from_stable_id,
    owner_of_stable_id,
};
use crate::backends::match_rank;
use ignore::WalkBuilder;
use rayon::prelude::*;
use regex::{Captures, Regex};
use sextant_core::error::BackendError;
use sextant_core::ids::syntax_symbol_id;
use sextant_core::types::{
    BackendId, Capability, CompletenessInfo, CompletenessReason, Location, ReferenceInfo,
    ReferenceKind, SymbolInfo, SymbolKind, Visibility, VisibilityInfo, is_test_path,
};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

const CAPABILITIES: &[Capability] = &[
    Capability::SymbolLookup,
    Capability::SymbolSearch,
    Capability::References,
];

const FALLBACK_SCORE: f64 = 0.7;

static RUST_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?P<indent>\s*)(?P<vis>pub(?:\([^)]*\))?\s+)?(?:(?:const|async|unsafe)\s+)*(?:extern\s+"[^"]*"\s+)?fn\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)"#,
    )
    .expect("rust fn regex must compile")
});
static RUST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<indent>\s*)(?P<vis>pub(?:\([^)]*\))?\s+)?(?P<kind>struct|enum|trait|type|const|static|mod)\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)",
    )
    .expect("rust item regex must compile")
});
static RUST_IMPL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^impl(?:<[^>]*>)?\s+(?:[A-Za-z_][\w:]*(?:<[^>]*>)?\s+for\s+)?(?P<name>[A-Za-z_]\w*)")
        .expect("rust impl regex must compile")
});
static GO_FUNC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^func\s+(?:\((?P<recv>[^)]*)\)\s*)?(?P<name>[A-Za-z_]\w*)")
        .expect("go func regex must compile")
});
static GO_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^type\s+(?P<name>[A-Za-z_]\w*)\s+(?P<kind>struct|interface)?")
        .expect("go type regex must compile")
});
static PY_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<indent>\s*)(?:async\s+)?def\s+(?P<name>[A-Za-z_]\w*)")
        .expect("python def regex must compile")
});
static PY_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<indent>\s*)class\s+(?P<name>[A-Za-z_]\w*)")
        .expect("python class regex must compile")
});
static SCRIPT_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<indent>\s*)(?P<vis>export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>[A-Za-z_$][\w$]*)",
    )
    .expect("script function regex must compile")
});
static SCRIPT_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<indent>\s*)(?P<vis>export\s+)?(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?(?P<kind>class|interface|enum|type)\s+(?P<name>[A-Za-z_$][\w$]*)",
    )
    .expect("script type regex must compile")
});
static JVM_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<indent>\s*)(?P<vis>(?:public|private|protected|internal)\s+)?(?:(?:static|final|abstract|open|data|sealed|enum|annotation)\s+)*(?P<kind>class|interface|enum|object|record)\s+(?P<name>[A-Za-z_]\w*)",
    )
    .expect("jvm type regex must compile")
});
static KOTLIN_FUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<indent>\s*)(?P<vis>(?:public|private|protected|internal)\s+)?(?:(?:override|suspend|inline|open|abstract|operator|infix)\s+)*fun\s+(?:<[^>]*>\s*)?(?:[A-Za-z_][\w.]*\.)?(?P<name>[A-Za-z_]\w*)",
    )
    .expect("kotlin fun regex must compile")
});
static JAVA_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<indent>\s+)(?P<vis>(?:public|private|protected)\s+)?(?:(?:static|final|abstract|synchronized|native|default)\s+)*[\w<>\[\],.?]+\s+(?P<name>[a-z_]\w*)\s*\([^;]*$",
    )
    .expect("java method regex must compile")
});

const JAVA_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "new", "else", "throw", "synchronized",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Rust,
    Go,
    Python,
    Script,
    Java,
    Kotlin,
}

impl Language {
    fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "rs" => Some(Self::Rust),
            "go" => Some(Self::Go),
            "py" => Some(Self::Python),
            "ts" | "tsx" | "js" | "jsx" | "mjs" | "cjs" => Some(Self::Script),
            "java" => Some(Self::Java),
            "kt" | "kts" => Some(Self::Kotlin),
            _ => None,
        }
    }
}

/// One declaration recognized on a single line.
#[derive(Debug, Clone, PartialEq)]
struct Declaration {
    name: String,
    kind: SymbolKind,
    indented: bool,
    visibility: Visibility,
    /// Opens a scope later members attach to.
    opens_container: bool,
    /// Explicit owner, e.g. a Go method receiver.
    owner: Option<String>,
}

/// Extract declarations from one file's text.
pub fn extract_symbols(relative_path: &str, content: &str) -> Vec<SymbolInfo> {
    let Some(language) = Language::from_path(relative_path) else {
        return Vec::new();
    };
    let module_id = Location::new(relative_path, 1, 0).directory().to_string();
    let mut container: Option<String> = None;
    let mut out = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx as u32 + 1;
        if language == Language::Rust
            && let Some(caps) = RUST_IMPL.captures(line)
        {
            container = Some(caps["name"].to_string());
            continue;
        }
        let Some(decl) = parse_line(language, line) else {
            continue;
        };

        let kind = if decl.kind == SymbolKind::Function && decl.indented && container.is_some() {
            SymbolKind::Method
        } else {
            decl.kind
        };
        let owner = decl
            .owner
            .clone()
            .or_else(|| (decl.indented || kind.is_member()).then(|| container.clone()).flatten());
        if !decl.indented {
            container = decl.opens_container.then(|| decl.name.clone());
        }

        let column = line.len() - line.trim_start().len();
        out.push(SymbolInfo {
            stable_id: syntax_symbol_id(relative_path, &decl.name, kind.as_str(), line_no),
            name: decl.name,
            kind,
            container: owner,
            module_id: module_id.clone(),
            signature: Some(line.trim().trim_end_matches('{').trim_end().to_string()),
            documentation: None,
            location: Some(Location::new(relative_path, line_no, column as u32)),
            visibility: VisibilityInfo {
                visibility: decl.visibility,
                confidence: 0.6,
                source: "syntax".to_string(),
            },
        });
    }
    out
}

fn parse_line(language: Language, line: &str) -> Option<Declaration> {
    match language {
        Language::Rust => {
            if let Some(caps) = RUST_FN.captures(line) {
                return Some(decl(&caps, SymbolKind::Function, false, rust_visibility(&caps)));
            }
            let caps = RUST_ITEM.captures(line)?;
            let kind = match &caps["kind"] {
                "struct" => SymbolKind::Struct,
                "enum" => SymbolKind::Enum,
                "trait" => SymbolKind::Trait,
                "type" => SymbolKind::TypeAlias,
                "const" => SymbolKind::Constant,
                "static" => SymbolKind::Variable,
                _ => SymbolKind::Module,
            };
            let opens = matches!(kind, SymbolKind::Trait);
            Some(decl(&caps, kind, opens, rust_visibility(&caps)))
        }
        Language::Go => {
            if let Some(caps) = GO_FUNC.captures(line) {
                let name = caps["name"].to_string();
                let owner = caps.name("recv").and_then(|recv| {
                    recv.as_str()
                        .split_whitespace()
                        .last()
                        .map(|ty| ty.trim_start_matches('*').to_string())
                });
                let kind = if owner.is_some() {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                };
                return Some(Declaration {
                    visibility: go_visibility(&name),
                    name,
                    kind,
                    indented: false,
                    opens_container: false,
                    owner,
                });
            }
            let caps = GO_TYPE.captures(line)?;
            let kind = match caps.name("kind").map(|m| m.as_str()) {
                Some("struct") => SymbolKind::Struct,
                Some("interface") => SymbolKind::Interface,
                _ => SymbolKind::TypeAlias,
            };
            let name = caps["name"].to_string();
            Some(Declaration {
                visibility: go_visibility(&name),
                name,
                kind,
                indented: false,
                opens_container: false,
                owner: None,
            })
        }
        Language::Python => {
            if let Some(caps) = PY_CLASS.captures(line) {
                let vis = python_visibility(&caps["name"]);
                return Some(decl(&caps, SymbolKind::Class, true, vis));
            }
            let caps = PY_DEF.captures(line)?;
            let vis = python_visibility(&caps["name"]);
            Some(decl(&caps, SymbolKind::Function, false, vis))
        }
        Language::Script => {
            if let Some(caps) = SCRIPT_TYPE.captures(line) {
                let kind = match &caps["kind"] {
                    "class" => SymbolKind::Class,
                    "interface" => SymbolKind::Interface,
                    "enum" => SymbolKind::Enum,
                    _ => SymbolKind::TypeAlias,
                };
                let opens = matches!(kind, SymbolKind::Class | SymbolKind::Interface);
                return Some(decl(&caps, kind, opens, export_visibility(&caps)));
            }
            let caps = SCRIPT_FN.captures(line)?;
            Some(decl(&caps, SymbolKind::Function, false, export_visibility(&caps)))
        }
        Language::Java | Language::Kotlin => {
            if let Some(caps) = JVM_TYPE.captures(line) {
                let kind = match &caps["kind"] {
                    "interface" => SymbolKind::Interface,
                    "enum" => SymbolKind::Enum,
                    _ => SymbolKind::Class,
                };
                return Some(decl(&caps, kind, true, jvm_visibility(&caps)));
            }
            let caps = if language == Language::Kotlin {
                KOTLIN_FUN.captures(line)?
            } else {
                let caps = JAVA_METHOD.captures(line)?;
                if JAVA_KEYWORDS.contains(&&caps["name"]) {
                    return None;
                }
                caps
            };
            Some(decl(&caps, SymbolKind::Function, false, jvm_visibility(&caps)))
        }
    }
}

fn decl(
    caps: &Captures<'_>,
    kind: SymbolKind,
    opens_container: bool,
    visibility: Visibility,
) -> Declaration {
    Declaration {
        name: caps["name"].to_string(),
        kind,
        indented: caps.name("indent").is_some_and(|m| !m.as_str().is_empty()),
        visibility,
        opens_container,
        owner: None,
    }
}

fn rust_visibility(caps: &Captures<'_>) -> Visibility {
    match caps.name("vis").map(|m| m.as_str().trim()) {
        Some("pub") => Visibility::Public,
        Some(_) => Visibility::Internal,
        None => Visibility::Private,
    }
}

fn go_visibility(name: &str) -> Visibility {
    if name.chars().next().is_some_and(char::is_uppercase) {
        Visibility::Public
    } else {
        Visibility::Internal
    }
}

fn python_visibility(name: &str) -> Visibility {
    if name.starts_with('_') {
        Visibility::Private
    } else {
        Visibility::Public
    }
}

fn export_visibility(caps: &Captures<'_>) -> Visibility {
    if caps.name("vis").is_some() {
        Visibility::Public
    } else {
        Visibility::Private
    }
}

fn jvm_visibility(caps: &Captures<'_>) -> Visibility {
    match caps.name("vis").map(|m| m.as_str().trim()) {
        Some("public") => Visibility::Public,
        Some("private") => Visibility::Private,
        Some(_) => Visibility::Internal,
        None => Visibility::Unknown,
    }
}

/// A source file picked up by the walker.
#[derive(Debug, Clone)]
struct SourceFile {
    path: PathBuf,
    relative_path: String,
}

pub struct SyntaxBackend {
    root: PathBuf,
    extensions: Vec<String>,
    max_file_size: u64,
}

impl SyntaxBackend {
    pub fn new(root: impl Into<PathBuf>, extensions: Vec<String>, max_file_size: u64) -> Self {
        Self {
            root: root.into(),
            extensions,
            max_file_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scan_files(&self) -> Vec<SourceFile> {
        let mut walker = WalkBuilder::new(&self.root);
        walker
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .git_global(false)
            .git_exclude(false);

        let mut files = Vec::new();
        for entry in walker.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Walk error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            let relative = path
                .strip_prefix(&self.root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            let matches_ext = relative.rsplit_once('.').is_some_and(|(_, ext)| {
                self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
            });
            if !matches_ext || Language::from_path(&relative).is_none() {
                continue;
            }
            if let Ok(metadata) = entry.metadata()
                && metadata.len() > self.max_file_size
            {
                debug!(?path, size = metadata.len(), "Skipped: file too large");
                continue;
            }
            files.push(SourceFile {
                path: path.to_path_buf(),
                relative_path: relative,
            });
        }
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        files
    }

    /// Extract every declaration under the root, in path then line order.
    pub fn extract_all(&self, budget: &CallBudget) -> Result<Vec<SymbolInfo>, BackendError> {
        let files = self.scan_files();
        budget.check()?;
        let per_file: Vec<Vec<SymbolInfo>> = files
            .par_iter()
            .map(|file| {
                if budget.is_cancelled() {
                    return Vec::new();
                }
                match std::fs::read_to_string(&file.path) {
                    Ok(content) => extract_symbols(&file.relative_path, &content),
                    Err(e) => {
                        debug!(path = %file.relative_path, error = %e, "Skipped unreadable file");
                        Vec::new()
                    }
                }
            })
            .collect();
        budget.check()?;
        let symbols: Vec<SymbolInfo> = per_file.into_iter().flatten().collect();
        debug!(files = files.len(), symbols = symbols.len(), "Syntax extraction finished");
        Ok(symbols)
    }

    fn completeness(details: &str) -> CompletenessInfo {
        CompletenessInfo::new(FALLBACK_SCORE, CompletenessReason::BestEffortFallback)
            .with_details(details)
    }

    /// Declarations a stable id may denote: exact syntax id, else by name and owner.
    fn candidates_for(
        &self,
        stable_id: &str,
        budget: &CallBudget,
    ) -> Result<Vec<SymbolInfo>, BackendError> {
        let all = self.extract_all(budget)?;
        if stable_id.starts_with("syn-") {
            return Ok(all.into_iter().filter(|s| s.stable_id == stable_id).collect());
        }
        let name = name_from_stable_id(stable_id);
        let owner = owner_of_stable_id(stable_id).map(name_from_stable_id);
        Ok(all
            .into_iter()
            .filter(|s| s.name == name)
            .filter(|s| owner.is_none_or(|o| s.container.as_deref() == Some(o)))
            .collect())
    }
}

impl SymbolBackend for SyntaxBackend {
    fn id(&self) -> BackendId {
        BackendId::Syntax
    }

    fn capabilities(&self) -> &[Capability] {
        CAPABILITIES
    }

    fn is_available(&self) -> bool {
        self.root.is_dir()
    }

    fn get_symbol(
        &self,
        stable_id: &str,
        budget: &CallBudget,
    ) -> Result<BackendAnswer<SymbolInfo>, BackendError> {
        let items = self.candidates_for(stable_id, budget)?;
        Ok(BackendAnswer::new(
            items,
            Self::completeness("syntax fallback: declaration matched by name"),
        ))
    }

    fn search_symbols(
        &self,
        options: &SearchOptions,
        budget: &CallBudget,
    ) -> Result<BackendAnswer<SymbolInfo>, BackendError> {
        let needle = options.query.trim().to_lowercase();
        let mut hits: Vec<(u8, SymbolInfo)> = self
            .extract_all(budget)?
            .into_iter()
            .filter(|s| options.accepts(s))
            .filter_map(|s| match_rank(&needle, &s.name).map(|rank| (rank, s)))
            .collect();
        hits.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.stable_id.cmp(&b.1.stable_id)));
        if options.max_results > 0 {
            hits.truncate(options.max_results);
        }
        Ok(BackendAnswer::new(
            hits.into_iter().map(|(_, s)| s).collect(),
            Self::completeness("syntax fallback: regex-extracted declarations"),
        ))
    }

    fn find_references(
        &self,
        stable_id: &str,
        options: &RefOptions,
        budget: &CallBudget,
    ) -> Result<BackendAnswer<ReferenceInfo>, BackendError> {
        let definitions = self.candidates_for(stable_id, budget)?;
        let name = match definitions.first() {
            Some(def) => def.name.clone(),
            None if stable_id.starts_with("syn-") => {
                return Ok(BackendAnswer::new(Vec::new(), CompletenessInfo::no_results()));
            }
            None => name_from_stable_id(stable_id).to_string(),
        };
        let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(&name)))
            .map_err(|e| BackendError::failed(BackendId::Syntax.as_str(), e))?;
        let def_sites: Vec<&Location> =
            definitions.iter().filter_map(|d| d.location.as_ref()).collect();

        let files = self.scan_files();
        let per_file: Vec<Vec<ReferenceInfo>> = files
            .par_iter()
            .map(|file| {
                if budget.is_cancelled() {
                    return Vec::new();
                }
                let Ok(content) = std::fs::read_to_string(&file.path) else {
                    return Vec::new();
                };
                scan_references(&file.relative_path, &content, &pattern, &def_sites)
            })
            .collect();
        budget.check()?;

        let mut items: Vec<ReferenceInfo> = per_file
            .into_iter()
            .flatten()
            .filter(|r| options.accepts(r))
            .collect();
        if options.max_results > 0 {
            items.truncate(options.max_results);
        }
        Ok(BackendAnswer::new(
            items,
            Self::completeness("syntax fallback: text matches may include false positives"),
        ))
    }
}

fn scan_references(
    relative_path: &str,
    content: &str,
    pattern: &Regex,
    def_sites: &[&Location],
) -> Vec<ReferenceInfo> {
    let declarations = extract_symbols(relative_path, content);
    let module_id = Location::new(relative_path, 1, 0).directory().to_string();
    let is_test = is_test_path(relative_path);
    let mut out = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx as u32 + 1;
        if def_sites
            .iter()
            .any(|loc| loc.path == relative_path && loc.line == line_no)
        {
            continue;
        }
        for found in pattern.find_iter(line) {
            let rest = line[found.end()..].trim_start();
            let kind = if rest.starts_with('(') {
                ReferenceKind::Call
            } else {
                ReferenceKind::Reference
            };
            let from_symbol = declarations
                .iter()
                .filter(|d| d.location.as_ref().is_some_and(|l| l.line <= line_no))
                .next_back()
                .map(|d| d.stable_id.clone());
            out.push(ReferenceInfo {
                location: Location::new(relative_path, line_no, found.start() as u32),
                kind,
                from_symbol,
                module_id: Some(module_id.clone()),
                context: Some(line.trim().to_string()),
                is_test,
            });
        }
    }
    out
}

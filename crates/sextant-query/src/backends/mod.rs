pub mod git;
pub mod index;
pub mod lsp;
pub mod syntax;

pub use git::{FileSignals, GitSignals};
pub use index::{IndexBackend, IndexSnapshot};
pub use lsp::{LspBackend, LspState, LspSupervisor};
pub use syntax::SyntaxBackend;

/// Lower is better: exact, prefix, substring, then in-order subsequence.
pub(crate) fn match_rank(needle: &str, name: &str) -> Option<u8> {
    if needle.is_empty() {
        return Some(3);
    }
    let hay = name.to_lowercase();
    if hay == needle {
        Some(0)
    } else if hay.starts_with(needle) {
        Some(1)
    } else if hay.contains(needle) {
        Some(2)
    } else if is_subsequence(needle, &hay) {
        Some(3)
    } else {
        None
    }
}

fn is_subsequence(needle: &str, hay: &str) -> bool {
    let mut chars = hay.chars();
    needle.chars().all(|c| chars.any(|h| h == c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_rank_orders_match_quality() {
        assert_eq!(match_rank("engine", "Engine"), Some(0));
        assert_eq!(match_rank("eng", "Engine"), Some(1));
        assert_eq!(match_rank("gin", "Engine"), Some(2));
        assert_eq!(match_rank("egn", "Engine"), Some(3));
        assert_eq!(match_rank("xyz", "Engine"), None);
    }
}

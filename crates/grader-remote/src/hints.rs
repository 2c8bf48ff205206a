//! Role/identifier heuristics that map free-form text to a repository key.
//!
//! The rules are substring and suffix checks kept in a table so they can be
//! tightened without touching the selection algorithm. They are broad: any
//! value ending in `v` counts as a sales hint and any value ending in `o` as
//! an operations hint.

use crate::selection::RepositorySet;

/// Repository key used for the sales repository.
pub const SALES_KEY: &str = "ventas";
/// Repository key used for the operations repository.
pub const OPERATIONS_KEY: &str = "operaciones";

/// Maps a hint value (role, slug, mission role) to a repository key.
pub trait RoleMatcher: Send + Sync {
    /// Whether `value` hints at repository `key`.
    fn matches(&self, key: &str, value: &str) -> bool;

    /// First key in priority order that `value` hints at and that is available.
    fn match_repository(&self, value: &str, available: &RepositorySet) -> Option<String>;

    /// Every key `value` hints at, regardless of availability.
    fn hinted_keys(&self, value: &str) -> Vec<String>;
}

/// One row of the heuristics table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryHint {
    pub key: String,
    /// Matches when the value contains any of these.
    pub tokens: Vec<String>,
    /// Matches when the value ends with any of these.
    pub suffixes: Vec<String>,
}

impl RepositoryHint {
    pub fn new(key: &str, tokens: &[&str], suffixes: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            suffixes: suffixes.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn matches(&self, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        self.tokens.iter().any(|t| value.contains(t.as_str()))
            || self.suffixes.iter().any(|s| value.ends_with(s.as_str()))
    }
}

/// Ordered heuristics table; earlier rows win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintTable {
    hints: Vec<RepositoryHint>,
}

impl HintTable {
    pub fn new(hints: Vec<RepositoryHint>) -> Self {
        Self { hints }
    }

    /// Sales before operations.
    pub fn standard() -> Self {
        Self::new(vec![
            RepositoryHint::new(SALES_KEY, &["ventas", "venta", "sales"], &["-v", "_v", "v"]),
            RepositoryHint::new(
                OPERATIONS_KEY,
                &["oper", "ops", "operaciones"],
                &["-o", "_o", "o"],
            ),
        ])
    }

    pub fn hints(&self) -> &[RepositoryHint] {
        &self.hints
    }
}

impl Default for HintTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

impl RoleMatcher for HintTable {
    fn matches(&self, key: &str, value: &str) -> bool {
        let value = normalize(value);
        self.hints
            .iter()
            .any(|h| h.key == key && h.matches(&value))
    }

    fn match_repository(&self, value: &str, available: &RepositorySet) -> Option<String> {
        let value = normalize(value);
        self.hints
            .iter()
            .find(|h| available.contains(&h.key) && h.matches(&value))
            .map(|h| h.key.clone())
    }

    fn hinted_keys(&self, value: &str) -> Vec<String> {
        let value = normalize(value);
        self.hints
            .iter()
            .filter(|h| h.matches(&value))
            .map(|h| h.key.clone())
            .collect()
    }
}

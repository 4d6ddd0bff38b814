//! Runtime configuration.

use std::collections::BTreeMap;

use crate::name;

/// Default bound on alias hops followed by `origin`.
pub const DEFAULT_MAX_ALIAS_HOPS: usize = 64;

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Start with namespace-aware resolution (otherwise flat).
    pub namespaces_enabled: bool,
    /// Absolute namespace name -> absolute replacement, applied by lookups.
    pub mappings: BTreeMap<String, String>,
    /// How many alias hops `origin` follows before giving up.
    pub max_alias_hops: usize,
    /// Case-insensitive pattern matching by default.
    pub no_case: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            namespaces_enabled: true,
            mappings: BTreeMap::new(),
            max_alias_hops: DEFAULT_MAX_ALIAS_HOPS,
            no_case: false,
        }
    }
}

impl RuntimeConfig {
    /// A runtime that starts with namespaces disabled.
    pub fn flat() -> Self {
        Self {
            namespaces_enabled: false,
            ..Self::default()
        }
    }

    /// Redirect lookups of namespace `from` (and anything below it) to `to`.
    ///
    /// Both names are canonicalized to absolute form.
    pub fn with_mapping(mut self, from: &str, to: &str) -> Self {
        self.mappings
            .insert(name::normalize_absolute(from), name::normalize_absolute(to));
        self
    }

    pub fn with_max_alias_hops(mut self, hops: usize) -> Self {
        self.max_alias_hops = hops;
        self
    }

    pub fn with_no_case(mut self, no_case: bool) -> Self {
        self.no_case = no_case;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert!(config.namespaces_enabled);
        assert_eq!(config.max_alias_hops, DEFAULT_MAX_ALIAS_HOPS);
        assert!(config.mappings.is_empty());
    }

    #[test]
    fn flat_disables_namespaces() {
        assert!(!RuntimeConfig::flat().namespaces_enabled);
    }

    #[test]
    fn mappings_are_canonical() {
        let config = RuntimeConfig::default().with_mapping("Legacy::", "::");
        assert_eq!(config.mappings.get("::Legacy").map(String::as_str), Some("::"));
    }
}

//! Name grammar: splitting, classifying and rebuilding qualified names.
//!
//! Names use `::` as a two-character separator. A name may be:
//!
//! - **simple**: `foo`
//! - **qualified**: `a::b::foo` (relative to the current namespace)
//! - **absolute**: `::a::b::foo` (anchored at the global namespace)
//!
//! Runs of extra colons are tolerated everywhere (`a::::b` is `a::b`), so the
//! separator is never treated as a single-character delimiter.
//!
//! All functions here are pure.

use nsres_glob::has_glob_chars;

use crate::error::{NamespaceError, Result};

/// The namespace separator.
pub const SEPARATOR: &str = "::";

/// The name of the global namespace.
pub const GLOBAL_NAME: &str = "::";

const COLON: char = ':';

/// Classification produced by [`split`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NameFlags {
    /// A separator was found and the qualifier part is non-empty.
    pub qualified: bool,
    /// The name starts with the separator.
    pub absolute: bool,
    /// Absolute, and nothing but separators precede the tail.
    pub global: bool,
    /// The tail contains glob metacharacters.
    pub wildcard: bool,
}

/// A name broken into its qualifier and tail parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitName<'a> {
    pub qualifiers: &'a str,
    pub tail: &'a str,
    pub flags: NameFlags,
}

/// Split `name` at its last separator.
///
/// Redundant colons in front of the last separator belong to neither part:
/// `a::::b` splits into `("a", "b")`, and `::b` into `("", "b")`.
pub fn split(name: &str) -> SplitName<'_> {
    let mut flags = NameFlags::default();

    let Some(index) = name.rfind(SEPARATOR) else {
        flags.wildcard = has_glob_chars(name);
        return SplitName {
            qualifiers: "",
            tail: name,
            flags,
        };
    };

    let tail = &name[index + SEPARATOR.len()..];
    let qualifiers = name[..index].trim_end_matches(COLON);

    flags.qualified = !qualifiers.is_empty();
    if is_absolute(name) {
        flags.absolute = true;
        flags.global = qualifiers.is_empty();
    }
    flags.wildcard = has_glob_chars(tail);

    SplitName {
        qualifiers,
        tail,
        flags,
    }
}

/// Like [`split`] for inputs that may be absent.
pub fn try_split(name: Option<&str>) -> Result<SplitName<'_>> {
    name.map(split)
        .ok_or_else(|| NamespaceError::invalid_argument("invalid name"))
}

/// Strip leading colons from an absolute name.
///
/// Returns the trimmed name and whether it was absolute. Relative names are
/// returned unchanged.
pub fn trim_leading(name: &str) -> (&str, bool) {
    if is_absolute(name) {
        (name.trim_start_matches(COLON), true)
    } else {
        (name, false)
    }
}

/// Strip colons from both ends.
pub fn trim_all(name: &str) -> &str {
    name.trim_matches(COLON)
}

/// Prefix the separator unless the name is already absolute.
///
/// The empty string maps to the global namespace name.
pub fn make_absolute(name: &str) -> String {
    if name.is_empty() {
        GLOBAL_NAME.to_string()
    } else if is_absolute(name) {
        name.to_string()
    } else {
        format!("{SEPARATOR}{name}")
    }
}

/// Join qualifiers and tail with exactly one separator.
///
/// Redundant separators inside `qualifiers` are kept; see [`normalize`].
pub fn make_qualified(qualifiers: &str, tail: &str) -> String {
    format!("{qualifiers}{SEPARATOR}{tail}")
}

/// Split on the separator, dropping empty segments.
///
/// Each segment also loses any stray colons left over from odd-length runs,
/// so `a:::b` yields `["a", "b"]`.
pub fn segments(name: &str) -> Vec<&str> {
    name.split(SEPARATOR)
        .map(trim_all)
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Canonicalize both parts by collapsing redundant separators.
pub fn normalize(qualifiers: &str, tail: &str) -> (String, String) {
    (
        segments(qualifiers).join(SEPARATOR),
        segments(tail).join(SEPARATOR),
    )
}

/// Canonical absolute form of an already-absolute name.
pub fn normalize_absolute(name: &str) -> String {
    make_absolute(&segments(name).join(SEPARATOR))
}

/// Does the name start with the separator?
pub fn is_absolute(name: &str) -> bool {
    name.starts_with(SEPARATOR)
}

/// Does the name denote the global namespace (empty, or only colons)?
pub fn is_global(name: &str) -> bool {
    trim_all(name).is_empty()
}

/// Does the name contain a separator anywhere?
pub fn is_qualified(name: &str) -> bool {
    name.contains(SEPARATOR)
}

/// The last component of a name.
pub fn tail_only(name: &str) -> &str {
    split(name).tail
}

/// Count separators, treating each run of colons as one.
///
/// Used to compare nesting depth: `a::b` and `::a::b` both have depth 1 once
/// leading colons are trimmed.
pub fn count_qualifiers(name: &str) -> usize {
    let mut count = 0;
    let mut rest = name;

    while let Some(index) = rest.find(SEPARATOR) {
        count += 1;
        rest = rest[index..].trim_start_matches(COLON);
        if rest.is_empty() {
            break;
        }
    }

    count
}

/// Make `name` relative to the namespace called `namespace_name`.
///
/// When `name` lies under the namespace, the shared prefix is removed;
/// otherwise the name comes back with its leading colons stripped.
pub fn make_relative(namespace_name: &str, name: &str) -> String {
    let base = segments(namespace_name);
    let parts = segments(name);

    if base.len() >= parts.len() || base.iter().zip(&parts).any(|(a, b)| a != b) {
        return trim_leading(name).0.to_string();
    }

    parts[base.len()..].join(SEPARATOR)
}

/// Rebuild a name from parts, optionally qualifying and anchoring it.
pub fn make_name(qualifiers: &str, tail: &str, qualified: bool, absolute: bool) -> String {
    if tail.is_empty() {
        return String::new();
    }

    let mut name = if qualified {
        make_qualified(qualifiers, tail)
    } else {
        tail.to_string()
    };

    if absolute {
        name = make_absolute(&name);
    }

    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_simple_name() {
        let parts = split("foo");
        assert_eq!(parts.qualifiers, "");
        assert_eq!(parts.tail, "foo");
        assert_eq!(parts.flags, NameFlags::default());
    }

    #[test]
    fn split_relative_qualified() {
        let parts = split("a::b::foo");
        assert_eq!(parts.qualifiers, "a::b");
        assert_eq!(parts.tail, "foo");
        assert!(parts.flags.qualified);
        assert!(!parts.flags.absolute);
        assert!(!parts.flags.global);
    }

    #[test]
    fn split_absolute_qualified() {
        let parts = split("::a::foo");
        assert_eq!(parts.qualifiers, "::a");
        assert_eq!(parts.tail, "foo");
        assert!(parts.flags.qualified);
        assert!(parts.flags.absolute);
        assert!(!parts.flags.global);
    }

    #[test]
    fn split_global_name() {
        let parts = split("::foo");
        assert_eq!(parts.qualifiers, "");
        assert_eq!(parts.tail, "foo");
        assert!(!parts.flags.qualified);
        assert!(parts.flags.absolute);
        assert!(parts.flags.global);
    }

    #[test]
    fn split_skips_redundant_colons() {
        let parts = split("a::::b");
        assert_eq!(parts.qualifiers, "a");
        assert_eq!(parts.tail, "b");

        let parts = split(":::b");
        assert_eq!(parts.qualifiers, "");
        assert_eq!(parts.tail, "b");
        assert!(parts.flags.global);
    }

    #[test]
    fn split_empty_is_valid() {
        let parts = split("");
        assert_eq!(parts.qualifiers, "");
        assert_eq!(parts.tail, "");
    }

    #[test]
    fn split_flags_wildcard_in_tail_only() {
        assert!(split("a::f*").flags.wildcard);
        assert!(!split("a*::f").flags.wildcard);
    }

    #[test]
    fn try_split_rejects_absent() {
        assert!(try_split(None).is_err());
        assert!(try_split(Some("")).is_ok());
    }

    #[test]
    fn trim_leading_reports_absolute() {
        assert_eq!(trim_leading("::a::b"), ("a::b", true));
        assert_eq!(trim_leading("a::b"), ("a::b", false));
        assert_eq!(trim_leading(":::x"), ("x", true));
    }

    #[test]
    fn make_absolute_forms() {
        assert_eq!(make_absolute(""), "::");
        assert_eq!(make_absolute("a"), "::a");
        assert_eq!(make_absolute("::a"), "::a");
    }

    #[test]
    fn make_qualified_keeps_qualifiers() {
        assert_eq!(make_qualified("a::::b", "c"), "a::::b::c");
        assert_eq!(make_qualified("", "c"), "::c");
    }

    #[test]
    fn normalize_collapses_separators() {
        assert_eq!(
            normalize("a::::b::", "::c"),
            ("a::b".to_string(), "c".to_string())
        );
        assert_eq!(normalize("a:::b", "c"), ("a::b".to_string(), "c".to_string()));
    }

    #[test]
    fn normalize_absolute_forms() {
        assert_eq!(normalize_absolute("::a::::b"), "::a::b");
        assert_eq!(normalize_absolute("::"), "::");
    }

    #[test]
    fn predicates() {
        assert!(is_absolute("::x"));
        assert!(!is_absolute("x"));
        assert!(is_global(""));
        assert!(is_global("::"));
        assert!(is_global("::::"));
        assert!(!is_global("::a"));
        assert!(is_qualified("a::b"));
        assert!(!is_qualified("ab"));
    }

    #[test]
    fn counts_qualifiers_by_runs() {
        assert_eq!(count_qualifiers("foo"), 0);
        assert_eq!(count_qualifiers("a::foo"), 1);
        assert_eq!(count_qualifiers("a::::foo"), 1);
        assert_eq!(count_qualifiers("a::b::foo"), 2);
        assert_eq!(count_qualifiers("a::"), 1);
    }

    #[test]
    fn relative_names() {
        assert_eq!(make_relative("::a", "::a::b::c"), "b::c");
        assert_eq!(make_relative("::x", "::a::b"), "a::b");
        assert_eq!(make_relative("::a::b", "::a::b"), "a::b");
    }

    #[test]
    fn make_name_variants() {
        assert_eq!(make_name("a", "b", true, true), "::a::b");
        assert_eq!(make_name("a", "b", false, true), "::b");
        assert_eq!(make_name("a", "b", false, false), "b");
        assert_eq!(make_name("a", "", true, true), "");
    }
}

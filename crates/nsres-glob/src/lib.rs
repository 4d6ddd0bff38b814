//! nsres-glob: shell-style glob matching for namespace names.
//!
//! Namespace, export and import patterns use the classic shell glob
//! vocabulary:
//!
//! - `*` matches any run of characters (including the `::` separator)
//! - `?` matches exactly one character
//! - `[abc]` / `[a-z]` match one character from a class
//! - `\x` matches `x` literally
//!
//! Braces are literal here. Unlike file globs there is no path separator,
//! so `*` happily crosses `::` boundaries; callers that care about nesting
//! depth have to check it themselves.

use globset::GlobBuilder;
use thiserror::Error;

/// Characters that make a name a pattern rather than a literal.
const MATCH_CHARS: &[char] = &['*', '?', '[', ']', '\\'];

/// Errors from compiling a pattern.
#[derive(Debug, Error)]
pub enum GlobError {
    #[error("invalid glob pattern {pattern:?}: {reason}")]
    Invalid { pattern: String, reason: String },
}

/// The matching primitive the resolver is parameterized over.
///
/// Implementations decide the glob dialect. An invalid pattern must simply
/// fail to match rather than panic.
pub trait GlobMatcher: Send + Sync {
    /// Does `candidate` match `pattern`?
    fn matches(&self, candidate: &str, pattern: &str, no_case: bool) -> bool;
}

/// Returns true if `name` contains any glob metacharacter.
pub fn has_glob_chars(name: &str) -> bool {
    name.contains(MATCH_CHARS)
}

/// A compiled pattern, reusable across many candidates.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    matcher: globset::GlobMatcher,
}

impl Pattern {
    /// Compile a shell glob.
    pub fn new(pattern: &str, no_case: bool) -> Result<Self, GlobError> {
        let prepared = prepare(pattern);
        let glob = GlobBuilder::new(&prepared)
            .case_insensitive(no_case)
            .literal_separator(false)
            .backslash_escape(true)
            .build()
            .map_err(|e| GlobError::Invalid {
                pattern: pattern.to_string(),
                reason: e.kind().to_string(),
            })?;

        Ok(Self {
            source: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    /// The pattern as written by the caller.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Test a candidate against this pattern.
    pub fn is_match(&self, candidate: &str) -> bool {
        self.matcher.is_match(candidate)
    }
}

/// Default matcher backed by `globset`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellGlob;

impl ShellGlob {
    pub fn new() -> Self {
        Self
    }
}

impl GlobMatcher for ShellGlob {
    fn matches(&self, candidate: &str, pattern: &str, no_case: bool) -> bool {
        match Pattern::new(pattern, no_case) {
            Ok(compiled) => compiled.is_match(candidate),
            Err(_) => false,
        }
    }
}

/// Rewrite a shell glob into globset syntax.
///
/// Runs of `*` collapse to one (globset rejects `**` outside a path
/// component) and braces are escaped so they stay literal.
fn prepare(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut escaped = false;
    let mut last_star = false;

    for ch in pattern.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
            last_star = false;
            continue;
        }
        match ch {
            '\\' => {
                out.push(ch);
                escaped = true;
                last_star = false;
            }
            '*' => {
                if !last_star {
                    out.push('*');
                }
                last_star = true;
            }
            '{' | '}' => {
                out.push('\\');
                out.push(ch);
                last_star = false;
            }
            _ => {
                out.push(ch);
                last_star = false;
            }
        }
    }

    // A dangling escape would be rejected; treat it as a literal backslash.
    if escaped {
        out.push('\\');
    }

    out
}

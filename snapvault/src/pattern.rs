//! Include/exclude glob rules evaluated against snapshot-relative paths.
//!
//! Rules are compiled once at construction; matching is a pure function and
//! never fails. An exclude match rejects a path regardless of any include
//! match. An empty include list means "include everything".

use std::path::Path;

use glob::{MatchOptions, Pattern};

use crate::utils::errors::{Result, VaultError};

/// A compiled set of include and exclude glob rules.
///
/// Matching semantics:
/// - Paths are slash-normalized and relative to the snapshot root.
/// - `*` and `?` do not cross path separators, so `src/*.rs` matches
///   `src/lib.rs` but not `src/fs/walker.rs`.
/// - A rule also matches when it matches any single path segment, which is
///   how `__pycache__` or `*.pyc` apply at any depth.
#[derive(Debug, Clone)]
pub struct PatternSet {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

fn compile(rules: &[String]) -> Result<Vec<Pattern>> {
    rules
        .iter()
        .map(|rule| {
            Pattern::new(rule).map_err(|e| {
                VaultError::InvalidConfiguration(format!("invalid glob pattern '{}': {}", rule, e))
            })
        })
        .collect()
}

/// Slash-normalized segments of a relative path.
fn segments(path: &Path) -> Vec<String> {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect()
}

impl PatternSet {
    /// Compile include and exclude rules. Invalid globs are rejected here,
    /// so matching itself is total.
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self> {
        Ok(Self {
            includes: compile(includes)?,
            excludes: compile(excludes)?,
        })
    }

    /// A set with no rules: includes every path.
    pub fn match_any() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
        }
    }

    /// Whether `rel_path` survives the rule set. Exclude wins over include.
    pub fn matches(&self, rel_path: &Path) -> bool {
        let segs = segments(rel_path);
        if self.excluded(&segs) {
            return false;
        }
        self.includes.is_empty() || hits_any(&self.includes, &segs)
    }

    /// Whether `rel_path` or one of its ancestors hits an exclude rule, in
    /// which case nothing below it can survive. Lets the walker skip
    /// excluded directories without descending.
    pub fn is_excluded(&self, rel_path: &Path) -> bool {
        self.excluded(&segments(rel_path))
    }

    /// An exclude rule matching any ancestor prefix (or any single segment)
    /// rejects the whole subtree, so skipping a matched directory yields
    /// the same final set as descending and filtering per file.
    fn excluded(&self, segs: &[String]) -> bool {
        let opts = match_options();
        let mut prefix = String::new();
        for (i, seg) in segs.iter().enumerate() {
            if i > 0 {
                prefix.push('/');
            }
            prefix.push_str(seg);
            if self
                .excludes
                .iter()
                .any(|pattern| pattern.matches_with(&prefix, opts) || pattern.matches(seg))
            {
                return true;
            }
        }
        false
    }
}

fn hits_any(rules: &[Pattern], segs: &[String]) -> bool {
    let joined = segs.join("/");
    let opts = match_options();
    rules.iter().any(|pattern| {
        pattern.matches_with(&joined, opts) || segs.iter().any(|s| pattern.matches(s))
    })
}

//! Pattern-filtered directory traversal.
//!
//! Walks a source tree and yields the entries a snapshot should contain.
//! Excluded directories are pruned without descending into them, which
//! produces the same matched set as walking everything and filtering per
//! entry, just without touching the skipped subtrees.

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::pattern::PatternSet;

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Maximum depth (None = unlimited)
    pub max_depth: Option<usize>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            max_depth: None,
        }
    }
}

/// What a source entry is, as far as staging is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File { size: u64 },
    Dir,
}

/// One entry selected for a snapshot.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// Absolute path in the source tree.
    pub abs: PathBuf,

    /// Path relative to the snapshot root.
    pub rel: PathBuf,

    pub kind: EntryKind,
}

/// Walk `root` and collect every entry that survives `patterns`.
/// Directories are included so matching empty directories can be preserved
/// in the snapshot.
pub fn collect_entries(
    root: &Path,
    patterns: &PatternSet,
    options: &WalkOptions,
) -> std::io::Result<Vec<SourceEntry>> {
    let mut walker = WalkDir::new(root).follow_links(options.follow_links);
    if let Some(max_depth) = options.max_depth {
        walker = walker.max_depth(max_depth);
    }

    let root_owned = root.to_path_buf();
    let iter = walker.into_iter().filter_entry(move |entry| {
        match entry.path().strip_prefix(&root_owned) {
            // Pruning an excluded entry here is what skips whole subtrees.
            Ok(rel) if !rel.as_os_str().is_empty() => !patterns.is_excluded(rel),
            // The root itself is never pruned.
            _ => true,
        }
    });

    let mut entries = Vec::new();
    for entry in iter {
        let entry = entry?;
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => continue,
        };
        if !patterns.matches(&rel) {
            continue;
        }
        if let Some(kind) = classify(&entry)? {
            entries.push(SourceEntry {
                abs: entry.path().to_path_buf(),
                rel,
                kind,
            });
        }
    }

    Ok(entries)
}

/// Classify an entry. Symlinks to regular files are backed up as the file
/// they point at; broken symlinks and symlinks to directories are skipped.
fn classify(entry: &DirEntry) -> std::io::Result<Option<EntryKind>> {
    let metadata = entry.metadata()?;

    if metadata.is_symlink() {
        return Ok(match std::fs::metadata(entry.path()) {
            Ok(resolved) if resolved.is_file() => Some(EntryKind::File {
                size: resolved.len(),
            }),
            _ => None,
        });
    }

    if metadata.is_dir() {
        Ok(Some(EntryKind::Dir))
    } else if metadata.is_file() {
        Ok(Some(EntryKind::File {
            size: metadata.len(),
        }))
    } else {
        Ok(None)
    }
}

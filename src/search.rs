//! Pattern search
//!
//! Directory-tree walk over a store root filtered by a single ant-style
//! relative include pattern: `*` matches within one path segment, `**`
//! crosses segment boundaries, `?` matches one character. Invoked only by
//! the store, which layers its own exclusions on top of the raw matches.

use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use walkdir::WalkDir;

/// Compiled single include pattern.
pub(crate) struct IncludePattern {
    matcher: GlobMatcher,
}

impl IncludePattern {
    /// Compiles an ant-style include pattern. A trailing separator is
    /// shorthand for "the directory and everything below it".
    pub(crate) fn compile(pattern: &str) -> Result<Self, globset::Error> {
        let mut normalized = pattern.replace('\\', "/");
        while let Some(rest) = normalized.strip_prefix("./") {
            normalized = rest.to_string();
        }
        if normalized.ends_with('/') {
            normalized.push_str("**");
        }
        let matcher = GlobBuilder::new(&normalized)
            .literal_separator(true)
            .build()?
            .compile_matcher();
        Ok(Self { matcher })
    }

    fn is_match(&self, relative: &Path) -> bool {
        self.matcher.is_match(relative)
    }
}

/// Walks `root` and invokes `visit` with the root-relative path and `/`-
/// separated key of every matching file. Unreadable entries are skipped.
pub(crate) fn visit_files<F>(root: &Path, pattern: &IncludePattern, mut visit: F)
where
    F: FnMut(&Path, &str),
{
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        if !pattern.is_match(relative) {
            continue;
        }
        match relative_key(relative) {
            Some(key) => visit(entry.path(), &key),
            None => {
                // Keys are UTF-8 by the marker format, so this file can
                // never be a store entry.
                tracing::trace!(path = %entry.path().display(), "skipping non-UTF-8 path");
            }
        }
    }
}

/// Joins the components of a relative path with `/`, the store's key
/// separator on every platform.
pub(crate) fn relative_key(relative: &Path) -> Option<String> {
    let mut key = String::new();
    for component in relative.components() {
        let part = component.as_os_str().to_str()?;
        if !key.is_empty() {
            key.push('/');
        }
        key.push_str(part);
    }
    Some(key)
}

//! Path carriers and normalization helpers

use std::path::{Component, Path, PathBuf};

/// A resolved file: where it lives on disk and what the program called it.
///
/// Neither form carries a trailing separator; the virtual form always
/// uses forward slashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathInfo {
    /// Absolute OS path of the file
    pub physical: String,
    /// Normalized logical path the program saw
    pub virtual_path: String,
}

impl PathInfo {
    pub fn new(physical: impl Into<String>, virtual_path: impl Into<String>) -> Self {
        Self {
            physical: physical.into(),
            virtual_path: virtual_path.into(),
        }
    }
}

/// Switch backslashes to forward slashes and trim surrounding whitespace.
pub(crate) fn cleanse(path: &str) -> String {
    path.trim().replace('\\', "/")
}

/// Collapse `.` and `..` components lexically, without touching the disk.
///
/// `..` at the front (nothing left to pop) is preserved so relative
/// inputs stay relative.
pub(crate) fn lexically_normal(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if can_pop {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

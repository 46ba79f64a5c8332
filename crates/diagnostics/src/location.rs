//! Source location carrier
//!
//! A `(file, line, column)` triple threaded through tokens, instructions
//! and diagnostics. Lines and columns are 1-based; a line of 0 marks a
//! location that has no meaningful source position (host-injected code).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Origin of a token, instruction or diagnostic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Virtual path of the originating file; empty when unknown
    pub path: String,
    /// 1-based line number
    pub line: usize,
    /// 1-based column number
    pub col: usize,
}

impl Location {
    pub fn new(path: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            path: path.into(),
            line,
            col,
        }
    }

    /// Location with a path but no position (whole-file diagnostics).
    pub fn file_only(path: impl Into<String>) -> Self {
        Self::new(path, 0, 0)
    }

    /// Render the log-line prefix.
    ///
    /// The format is `[L<line>[C<col>|<path>]` followed by a tab, with
    /// the `|<path>` part omitted when no path is known. Tooling parses
    /// this prefix verbatim; do not restyle it.
    pub fn prefix(&self) -> String {
        let mut out = String::with_capacity(self.path.len() + 16);
        out.push_str("[L");
        out.push_str(&self.line.to_string());
        out.push_str("[C");
        out.push_str(&self.col.to_string());
        if !self.path.is_empty() {
            out.push('|');
            out.push_str(&self.path);
        }
        out.push_str("]\t");
        out
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path, self.line, self.col)
    }
}

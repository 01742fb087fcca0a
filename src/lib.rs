//! Batch linter for cross-file change coupling. Given a unified diff and the
//! worktree it describes, verifies that every `LINT.IfChange` region that was
//! touched saw its declared `LINT.ThenChange` targets change in the same diff.

mod diff;
mod engine;
mod extract;
mod pool;

use std::collections::BTreeSet;
use std::path::PathBuf;

pub use diff::{parse as parse_diff, DiffError};
pub use engine::{lint_diff, run_scan, LintError, Options, Report};
pub use extract::{parse_file, validate_unique, ExtractError};
pub use pool::{JobHandle, PoolError, WorkerPool};

/// Inclusive 1-based line range.
pub type LineRange = (u32, u32);

/// A `LINT.*` token found inside a source-file comment, with the 1-based line
/// it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(serde::Serialize))]
pub enum Directive {
    /// Start of a conditional region, optionally named.
    IfChange { line: u32, label: Option<String> },
    /// Requires changes in `target`, one of `"path"`, `"path#label"`, or
    /// `"#label"`.
    ThenChange { line: u32, target: String },
    /// Opens a named region.
    Label { line: u32, name: String },
    /// Closes the innermost open label.
    EndLabel { line: u32 },
}

impl Directive {
    pub fn line(&self) -> u32 {
        match self {
            Directive::IfChange { line, .. }
            | Directive::ThenChange { line, .. }
            | Directive::Label { line, .. }
            | Directive::EndLabel { line } => *line,
        }
    }
}

/// Per-file change sets extracted from a unified diff. `added` holds new-file
/// line numbers, `removed` old-file line numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(test, derive(serde::Serialize))]
pub struct FileChanges {
    pub path: PathBuf,
    pub added: BTreeSet<u32>,
    pub removed: BTreeSet<u32>,
}

impl FileChanges {
    pub fn new(path: PathBuf) -> FileChanges {
        FileChanges {
            path,
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    /// True if the diff touched `line` on either side of this file.
    pub fn touches(&self, line: u32) -> bool {
        self.added.contains(&line) || self.removed.contains(&line)
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod testing;

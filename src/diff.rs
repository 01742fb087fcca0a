//! Unified-diff ingestion: turns patch text into per-file added/removed line
//! sets, tolerating version-control header noise and quoted/escaped paths.

use std::collections::HashMap;
use std::path::PathBuf;

use bstr::ByteVec as _;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::FileChanges;

static HUNK_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@")
        .expect("hunk header pattern is valid")
});

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("diff line {line}: hunk header outside of a file entry")]
    HunkWithoutHeader { line: usize },
    #[error("diff line {line}: expected '+++' header after '---'")]
    TruncatedHeader { line: usize },
    #[error("diff line {line}: malformed hunk header {header:?}")]
    BadHunkHeader { line: usize, header: String },
}

/// Parse a unified diff into per-file change sets, preserving first-seen file
/// order. Structural problems are fatal; path-decoding anomalies are not.
pub fn parse(text: &str) -> Result<Vec<FileChanges>, DiffError> {
    let lines = text
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line))
        .filter(|(_, line)| keep_line(line))
        .collect::<Vec<_>>();

    let mut files: Vec<FileChanges> = Vec::new();
    let mut index: HashMap<PathBuf, usize> = HashMap::new();

    let mut cursor = 0;
    while cursor < lines.len() {
        let (number, line) = lines[cursor];
        if !line.starts_with("--- ") {
            if line.starts_with("@@") {
                return Err(DiffError::HunkWithoutHeader { line: number });
            }
            // Metadata between entries ("index ..", "new file mode ..", etc.).
            cursor += 1;
            continue;
        }
        let Some(&(_, next)) = lines.get(cursor + 1) else {
            return Err(DiffError::TruncatedHeader { line: number });
        };
        let Some(to_raw) = next.strip_prefix("+++ ") else {
            return Err(DiffError::TruncatedHeader { line: number });
        };
        cursor += 2;

        if to_raw.trim_end() == "/dev/null" {
            // Pure deletion: walk the hunks without recording anything.
            cursor = walk_hunks(&lines, cursor, None)?;
            continue;
        }

        let path = decode_path(to_raw);
        let slot = match index.get(&path) {
            Some(&slot) => slot,
            None => {
                files.push(FileChanges::new(path.clone()));
                index.insert(path, files.len() - 1);
                files.len() - 1
            }
        };
        cursor = walk_hunks(&lines, cursor, Some(&mut files[slot]))?;
    }
    Ok(files)
}

/// Pre-filter: drop `diff ` headers outright, and drop `--- `/`+++ ` lines
/// whose remainder is neither `/dev/null` nor a one-character prefix followed
/// by `/`. Body lines that happen to begin with `---` (horizontal rules and
/// the like) would otherwise be misread as file headers.
fn keep_line(line: &str) -> bool {
    if line.starts_with("diff ") {
        return false;
    }
    for prefix in ["--- ", "+++ "] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return looks_like_header_path(rest);
        }
    }
    true
}

fn looks_like_header_path(rest: &str) -> bool {
    let rest = rest.strip_prefix(['"', '\'']).unwrap_or(rest);
    rest.starts_with("/dev/null") || rest.as_bytes().get(1) == Some(&b'/')
}

fn walk_hunks(
    lines: &[(usize, &str)],
    mut cursor: usize,
    mut sink: Option<&mut FileChanges>,
) -> Result<usize, DiffError> {
    while cursor < lines.len() {
        let (number, line) = lines[cursor];
        if !line.starts_with("@@") {
            break;
        }
        let caps = HUNK_HEADER
            .captures(line)
            .ok_or_else(|| DiffError::BadHunkHeader {
                line: number,
                header: line.to_string(),
            })?;
        let mut old_line = parse_count(caps.get(1), 1, number, line)?;
        let mut new_line = parse_count(caps.get(3), 1, number, line)?;
        let mut old_left = parse_count(caps.get(2), 1, number, line)?;
        let mut new_left = parse_count(caps.get(4), 1, number, line)?;
        cursor += 1;

        while (old_left > 0 || new_left > 0) && cursor < lines.len() {
            let (_, body) = lines[cursor];
            if body.starts_with("--- ") || body.starts_with("+++ ") || body.starts_with("@@") {
                break;
            }
            if body.starts_with('+') {
                if let Some(changes) = sink.as_deref_mut() {
                    changes.added.insert(new_line);
                }
                new_line += 1;
                new_left = new_left.saturating_sub(1);
            } else if body.starts_with('-') {
                if let Some(changes) = sink.as_deref_mut() {
                    changes.removed.insert(old_line);
                }
                old_line += 1;
                old_left = old_left.saturating_sub(1);
            } else if body.starts_with(' ') || body.is_empty() {
                old_line += 1;
                new_line += 1;
                old_left = old_left.saturating_sub(1);
                new_left = new_left.saturating_sub(1);
            } else if body.starts_with('\\') {
                // "\ No newline at end of file": consumes no counter.
            } else {
                break;
            }
            cursor += 1;
        }
    }
    Ok(cursor)
}

fn parse_count(
    capture: Option<regex::Match<'_>>,
    default: u32,
    line: usize,
    header: &str,
) -> Result<u32, DiffError> {
    capture.map_or(Ok(default), |value| {
        value
            .as_str()
            .parse::<u32>()
            .map_err(|_| DiffError::BadHunkHeader {
                line,
                header: header.to_string(),
            })
    })
}

/// Normalize a raw header path: trim a tab-separated timestamp, strip
/// surrounding quotes, decode C-style escapes into bytes reinterpreted as
/// UTF-8, and strip a one-character `X/` prefix.
fn decode_path(raw: &str) -> PathBuf {
    let mut candidate = raw.trim_end();
    if let Some((path, _timestamp)) = candidate.split_once('\t') {
        candidate = path;
    }
    for quote in ['"', '\''] {
        if candidate.len() >= 2 && candidate.starts_with(quote) && candidate.ends_with(quote) {
            candidate = &candidate[1..candidate.len() - 1];
            break;
        }
    }
    let decoded = unescape(candidate).into_string_lossy();
    let mut path = decoded.as_str();
    if path.as_bytes().get(1) == Some(&b'/') && !path.starts_with('/') {
        path = &path[2..];
    }
    PathBuf::from(path)
}

/// Decode `\ddd` octal escapes (1-3 digits) into raw bytes; other escaped
/// characters fall back to their C meaning or to the character itself.
fn unescape(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 == bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let mut j = i + 1;
        let mut value: u32 = 0;
        let mut digits = 0;
        while digits < 3 && j < bytes.len() && (b'0'..=b'7').contains(&bytes[j]) {
            value = value * 8 + u32::from(bytes[j] - b'0');
            j += 1;
            digits += 1;
        }
        if digits > 0 {
            out.push(value as u8);
            i = j;
            continue;
        }
        out.push(match bytes[i + 1] {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            other => other,
        });
        i += 2;
    }
    out
}

//! Directive extraction: per-extension comment lexing and the `LINT.*`
//! grammar scan over comment lines.

use std::collections::HashSet;
use std::path::Path;
use std::{fs, io};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::Directive;

static IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^LINT\.([A-Za-z_][A-Za-z0-9_]*)").expect("ident pattern is valid"));
static LABELED_IF_CHANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^LINT\.IfChange\s*\(\s*['"]([^'"]+)['"]\s*\)"#).expect("pattern is valid")
});
static SINGLE_THEN_CHANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^LINT\.ThenChange\s*\(\s*['"]([^'"]+)['"]\s*\)"#).expect("pattern is valid")
});
static ARRAY_THEN_CHANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^LINT\.ThenChange\s*\(\s*\[([^\]]*)\]\s*,?\s*\)").expect("pattern is valid")
});
static LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^LINT\.Label\s*\(\s*['"]([^'"]+)['"]\s*\)"#).expect("pattern is valid")
});
static QUOTED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^['"]([^'"]+)['"]$"#).expect("pattern is valid"));

/// Errors from one file's extraction. Cloneable so a memoized result can be
/// handed to every pair that references the same file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("{path}: file not found")]
    NotFound { path: String },
    #[error("{path}: {message}")]
    Io { path: String, message: String },
    #[error("{path}:{line} -> malformed directive: {message}")]
    Malformed {
        path: String,
        line: u32,
        message: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CommentSyntax {
    /// `// ...` line comments and `/* ... */` blocks.
    Slash,
    /// `# ...` to end of line.
    Hash,
}

fn syntax_for(path: &Path) -> CommentSyntax {
    match path.extension().and_then(|extension| extension.to_str()) {
        Some("py" | "rb" | "sh" | "bash" | "zsh" | "bzl") => CommentSyntax::Hash,
        // ts, js, java, c, cc, cpp, h, hpp, cs, go, rs, swift, kt, kts,
        // scala, php, and anything unrecognized.
        _ => CommentSyntax::Slash,
    }
}

/// Read one file and return its directives in textual order. A directory
/// yields an empty list; a missing file and any other I/O problem are
/// classified for the engine to triage.
pub fn parse_file(path: &Path) -> Result<Vec<Directive>, ExtractError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return Err(ExtractError::NotFound {
                path: path.display().to_string(),
            })
        }
        Err(_) if path.is_dir() => return Ok(Vec::new()),
        Err(error) => {
            return Err(ExtractError::Io {
                path: path.display().to_string(),
                message: error.to_string(),
            })
        }
    };
    scan_directives(path, &comment_lines(&text, syntax_for(path)))
}

/// Flatten a file into comment lines: `(1-based line, interior text)`. Block
/// comments contribute one entry per interior line, numbered from the line of
/// the opening marker. Only lexical comment syntax is considered.
fn comment_lines(text: &str, syntax: CommentSyntax) -> Vec<(u32, String)> {
    let mut out = Vec::new();
    match syntax {
        CommentSyntax::Hash => {
            for (index, line) in text.lines().enumerate() {
                if let Some(position) = line.find('#') {
                    out.push((index as u32 + 1, line[position + 1..].to_string()));
                }
            }
        }
        CommentSyntax::Slash => {
            let mut in_block = false;
            for (index, line) in text.lines().enumerate() {
                let number = index as u32 + 1;
                let mut rest = line;
                loop {
                    if in_block {
                        match rest.find("*/") {
                            Some(end) => {
                                out.push((number, rest[..end].to_string()));
                                rest = &rest[end + 2..];
                                in_block = false;
                            }
                            None => {
                                out.push((number, rest.to_string()));
                                break;
                            }
                        }
                    } else {
                        let line_start = rest.find("//");
                        let block_start = rest.find("/*");
                        match (line_start, block_start) {
                            (Some(line_start), block_start)
                                if block_start.map_or(true, |block| line_start < block) =>
                            {
                                out.push((number, rest[line_start + 2..].to_string()));
                                break;
                            }
                            (_, Some(block_start)) => {
                                rest = &rest[block_start + 2..];
                                in_block = true;
                            }
                            (None, None) => break,
                            (Some(_), None) => unreachable!(),
                        }
                    }
                }
            }
        }
    }
    out
}

/// Trimmed comment body with doc-block decoration (`*` gutters) removed.
fn strip_decoration(text: &str) -> &str {
    text.trim().trim_start_matches('*').trim_start()
}

fn malformed(path: &Path, line: u32, message: impl Into<String>) -> ExtractError {
    ExtractError::Malformed {
        path: path.display().to_string(),
        line,
        message: message.into(),
    }
}

/// Scan comment lines for directives. Lines that do not open with `LINT.` are
/// skipped; lines that do must parse as one of the four known kinds or the
/// whole extraction fails.
fn scan_directives(
    path: &Path,
    lines: &[(u32, String)],
) -> Result<Vec<Directive>, ExtractError> {
    let mut directives = Vec::new();
    let mut cursor = 0;
    while cursor < lines.len() {
        let (line, raw) = &lines[cursor];
        let body = strip_decoration(raw);
        if !body.starts_with("LINT.") {
            cursor += 1;
            continue;
        }
        let Some(ident) = IDENT.captures(body) else {
            return Err(malformed(path, *line, "missing directive name after 'LINT.'"));
        };
        match &ident[1] {
            "IfChange" => {
                let rest = body["LINT.IfChange".len()..].trim_start();
                let label = if rest.starts_with('(') {
                    let caps = LABELED_IF_CHANGE.captures(body).ok_or_else(|| {
                        malformed(path, *line, "could not parse IfChange label")
                    })?;
                    Some(caps[1].to_string())
                } else {
                    None
                };
                directives.push(Directive::IfChange { line: *line, label });
                cursor += 1;
            }
            "ThenChange" => {
                cursor += scan_then_change(path, lines, cursor, &mut directives)?;
            }
            "Label" => {
                let caps = LABEL
                    .captures(body)
                    .ok_or_else(|| malformed(path, *line, "could not parse Label name"))?;
                directives.push(Directive::Label {
                    line: *line,
                    name: caps[1].to_string(),
                });
                cursor += 1;
            }
            "EndLabel" => {
                directives.push(Directive::EndLabel { line: *line });
                cursor += 1;
            }
            other => {
                return Err(malformed(
                    path,
                    *line,
                    format!("unknown directive 'LINT.{other}'"),
                ));
            }
        }
    }
    Ok(directives)
}

/// Parse one `LINT.ThenChange` at `lines[cursor]`, joining subsequent comment
/// lines until a `)` shows up when the form does not fit on one line. Returns
/// the number of comment lines consumed.
fn scan_then_change(
    path: &Path,
    lines: &[(u32, String)],
    cursor: usize,
    directives: &mut Vec<Directive>,
) -> Result<usize, ExtractError> {
    let (line, raw) = &lines[cursor];
    let mut body = strip_decoration(raw).to_string();
    let mut consumed = 1;
    loop {
        if let Some(caps) = SINGLE_THEN_CHANGE.captures(&body) {
            directives.push(Directive::ThenChange {
                line: *line,
                target: caps[1].to_string(),
            });
            return Ok(consumed);
        }
        if let Some(caps) = ARRAY_THEN_CHANGE.captures(&body) {
            for item in caps[1].split(',') {
                let item = item.trim();
                if item.is_empty() {
                    continue;
                }
                let caps = QUOTED_ITEM.captures(item).ok_or_else(|| {
                    malformed(path, *line, format!("unquoted ThenChange entry {item:?}"))
                })?;
                directives.push(Directive::ThenChange {
                    line: *line,
                    target: caps[1].to_string(),
                });
            }
            return Ok(consumed);
        }
        if body.contains(')') {
            return Err(malformed(path, *line, "could not parse ThenChange target"));
        }
        let Some((_, next)) = lines.get(cursor + consumed) else {
            return Err(malformed(path, *line, "could not find ')' for ThenChange"));
        };
        body.push(' ');
        body.push_str(strip_decoration(next));
        consumed += 1;
    }
}

/// Duplicate-label validation: names introduced by `IfChange(label)` and
/// `Label(name)` must be unique within one file. Returns one line-tagged
/// diagnostic per duplicate so callers can merge it with other per-file
/// passes in textual order; never fatal.
pub fn validate_unique(path: &Path, directives: &[Directive]) -> Vec<(u32, String)> {
    let mut seen = HashSet::new();
    let mut diagnostics = Vec::new();
    for directive in directives {
        let (line, name) = match directive {
            Directive::IfChange {
                line,
                label: Some(label),
            } => (*line, label),
            Directive::Label { line, name } => (*line, name),
            _ => continue,
        };
        if !seen.insert(name.clone()) {
            diagnostics.push((
                line,
                format!(
                    "[ifttt] {}:{} -> duplicate directive label '{}'",
                    path.display(),
                    line,
                    name
                ),
            ));
        }
    }
    diagnostics
}

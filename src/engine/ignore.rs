//! Ignore patterns: `<glob>` or `<glob>#<label>`, where the glob honors only
//! `*` (any run) and `?` (single character) and is anchored at both ends. A
//! glob matches either the basename of a candidate path or the full string.

use std::path::Path;

use regex::Regex;

use tracing::debug;

#[derive(Debug)]
struct IgnorePattern {
    raw: String,
    glob: Regex,
    label: Option<String>,
}

impl IgnorePattern {
    fn parse(entry: &str) -> IgnorePattern {
        let (glob, label) = match entry.split_once('#') {
            Some((glob, label)) => (glob, Some(label.to_string())),
            None => (entry, None),
        };
        IgnorePattern {
            raw: entry.to_string(),
            glob: glob_to_regex(glob),
            label,
        }
    }

    fn matches_path_part(&self, path: &str) -> bool {
        if self.glob.is_match(path) {
            return true;
        }
        Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|basename| self.glob.is_match(basename))
    }
}

/// Compiled ignore list, parsed once per invocation.
#[derive(Debug, Default)]
pub struct IgnoreSet {
    patterns: Vec<IgnorePattern>,
}

impl IgnoreSet {
    pub fn parse(entries: &[String]) -> IgnoreSet {
        IgnoreSet {
            patterns: entries
                .iter()
                .map(|entry| IgnorePattern::parse(entry))
                .collect(),
        }
    }

    /// Whether a changed path is suppressed outright. Only label-less
    /// patterns participate; a labeled pattern suppresses scenarios, not
    /// whole files.
    pub fn matches_path(&self, path: &Path) -> bool {
        let candidate = path.to_string_lossy();
        self.patterns
            .iter()
            .filter(|pattern| pattern.label.is_none())
            .any(|pattern| {
                let matched = pattern.matches_path_part(&candidate);
                if matched {
                    debug!(path = %candidate, pattern = %pattern.raw, "path suppressed by ignore pattern");
                }
                matched
            })
    }

    /// Whether a target string (`path`, `path#label`, or `#label`, as written
    /// in a `ThenChange` or synthesized as `basename#label`) is suppressed. A
    /// label-less pattern matches any candidate whose path part matches; a
    /// labeled pattern additionally requires label equality.
    pub fn matches_target(&self, target: &str) -> bool {
        let (path_part, label) = match target.split_once('#') {
            Some((path, label)) => (path, Some(label)),
            None => (target, None),
        };
        self.patterns.iter().any(|pattern| {
            if let Some(pattern_label) = &pattern.label {
                if label != Some(pattern_label.as_str()) {
                    return false;
                }
            }
            let matched = pattern.matches_path_part(path_part);
            if matched {
                debug!(candidate = target, pattern = %pattern.raw, "target suppressed by ignore pattern");
            }
            matched
        })
    }
}

fn glob_to_regex(glob: &str) -> Regex {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for character in glob.chars() {
        match character {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            _ => pattern.push_str(&regex::escape(character.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).expect("escaped glob is a valid regex")
}

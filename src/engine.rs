mod ignore;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tracing::debug;

use crate::diff::{self, DiffError};
use crate::extract::{parse_file, validate_unique, ExtractError};
use crate::pool::{JobHandle, PoolError, WorkerPool};
use crate::{Directive, FileChanges, LineRange};

use ignore::IgnoreSet;

/// Engine options, owned by the CLI collaborator.
#[derive(Debug, Clone)]
pub struct Options {
    /// Worker threads for per-file directive extraction.
    pub parallelism: usize,
    /// Enables debug-level traces; the CLI maps this onto the stderr
    /// subscriber level.
    pub verbose: bool,
    /// Raw ignore entries, `<glob>` or `<glob>#<label>`.
    pub ignore: Vec<String>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            parallelism: 1,
            verbose: false,
            ignore: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LintError {
    #[error(transparent)]
    Diff(#[from] DiffError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("searching for directive files: {0}")]
    Search(String),
}

/// Outcome of one engine invocation: every counted diagnostic, in discovery
/// order. The caller prints the lines and maps the exit code.
#[derive(Debug)]
pub struct Report {
    diagnostics: Vec<String>,
}

impl Report {
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn exit_code(&self) -> u8 {
        u8::from(!self.is_clean())
    }
}

/// One `IfChange` bound to one `ThenChange` in the same file. A single
/// `IfChange` may own several pairs when multiple `ThenChange`s follow it.
#[derive(Debug, Clone)]
struct Pair {
    file: PathBuf,
    if_line: u32,
    if_label: Option<String>,
    then_target: String,
    then_line: u32,
}

impl Pair {
    fn if_context(&self) -> String {
        match &self.if_label {
            Some(label) => format!("{}#{}:{}", self.file.display(), label, self.if_line),
            None => format!("{}:{}", self.file.display(), self.if_line),
        }
    }
}

type ParseOutcome = Result<Arc<Vec<Directive>>, ExtractError>;

enum CacheEntry {
    InFlight(JobHandle<Result<Vec<Directive>, ExtractError>>),
    Ready(ParseOutcome),
}

/// Keyed memoization of per-file extraction: the source-side and target-side
/// passes share one in-flight result per filesystem path.
struct ParseCache<'pool> {
    pool: &'pool WorkerPool,
    entries: HashMap<PathBuf, CacheEntry>,
}

impl<'pool> ParseCache<'pool> {
    fn new(pool: &'pool WorkerPool) -> ParseCache<'pool> {
        ParseCache {
            pool,
            entries: HashMap::new(),
        }
    }

    fn schedule(&mut self, path: &Path) {
        if self.entries.contains_key(path) {
            return;
        }
        debug!(path = %path.display(), "scheduling directive extraction");
        let job_path = path.to_owned();
        let handle = self.pool.submit(move || parse_file(&job_path));
        self.entries
            .insert(path.to_owned(), CacheEntry::InFlight(handle));
    }

    fn wait(&mut self, path: &Path) -> Result<ParseOutcome, PoolError> {
        self.schedule(path);
        let entry = self
            .entries
            .remove(path)
            .unwrap_or_else(|| unreachable!("entry scheduled above"));
        let outcome = match entry {
            CacheEntry::Ready(outcome) => outcome,
            CacheEntry::InFlight(handle) => handle.join()?.map(Arc::new),
        };
        self.entries
            .insert(path.to_owned(), CacheEntry::Ready(outcome.clone()));
        Ok(outcome)
    }
}

/// Lint one unified diff against the worktree rooted at `root`. Diagnostics
/// are collected into the report; non-recoverable problems propagate.
pub fn lint_diff(diff_text: &str, root: &Path, options: &Options) -> Result<Report, LintError> {
    let ignore = IgnoreSet::parse(&options.ignore);
    let files = diff::parse(diff_text)?;
    debug!(files = files.len(), "diff ingested");

    let pool = WorkerPool::new(options.parallelism);
    let mut cache = ParseCache::new(&pool);
    let result = check_files(&files, root, &ignore, &mut cache);
    drop(cache);
    // The pool must be gone before the exit decision leaves this frame.
    pool.shutdown();
    result.map(|diagnostics| Report { diagnostics })
}

fn check_files(
    files: &[FileChanges],
    root: &Path,
    ignore: &IgnoreSet,
    cache: &mut ParseCache,
) -> Result<Vec<String>, LintError> {
    let changes: HashMap<&Path, &FileChanges> = files
        .iter()
        .map(|file| (file.path.as_path(), file))
        .collect();

    // Phase A: keep code files that no label-less ignore pattern suppresses.
    let sources = files
        .iter()
        .filter(|file| {
            if !is_code_file(&file.path) {
                debug!(path = %file.path.display(), "skipping non-code file");
                return false;
            }
            !ignore.matches_path(&file.path)
        })
        .collect::<Vec<_>>();

    let mut diagnostics = Vec::new();

    // Phase B: parse every retained source, validate label uniqueness, and
    // pair directives under the single-IfChange latch.
    for file in &sources {
        cache.schedule(&root.join(&file.path));
    }
    let mut pairs: Vec<Pair> = Vec::new();
    let mut validated: HashSet<PathBuf> = HashSet::new();
    for file in &sources {
        let directives = match cache.wait(&root.join(&file.path))? {
            Ok(directives) => directives,
            Err(error) => return Err(error.into()),
        };
        let mut file_diagnostics = validate_unique(&file.path, &directives);
        validated.insert(file.path.clone());
        collect_pairs(file, &directives, ignore, &mut pairs, &mut file_diagnostics);
        append_in_line_order(&mut diagnostics, file_diagnostics);
    }
    debug!(pairs = pairs.len(), "source-side parse finished");

    // Phase C: parse each distinct target through the same cache and compute
    // its label ranges. A missing target converts every pair that references
    // it into one diagnostic here.
    let mut target_order: Vec<PathBuf> = Vec::new();
    let mut seen_targets: HashSet<PathBuf> = HashSet::new();
    for pair in &pairs {
        let (path_part, _) = split_target(&pair.then_target);
        let resolved = resolve_target(&pair.file, path_part);
        if !is_code_file(&resolved) {
            continue;
        }
        if seen_targets.insert(resolved.clone()) {
            target_order.push(resolved);
        }
    }
    for target in &target_order {
        cache.schedule(&root.join(target));
    }

    let mut label_maps: HashMap<PathBuf, BTreeMap<String, LineRange>> = HashMap::new();
    let mut missing: HashSet<PathBuf> = HashSet::new();
    for target in &target_order {
        match cache.wait(&root.join(target))? {
            Ok(directives) => {
                let mut file_diagnostics = if validated.insert(target.clone()) {
                    validate_unique(target, &directives)
                } else {
                    Vec::new()
                };
                let ranges = collect_label_ranges(target, &directives, &mut file_diagnostics);
                append_in_line_order(&mut diagnostics, file_diagnostics);
                label_maps.insert(target.clone(), ranges);
            }
            Err(ExtractError::NotFound { .. }) => {
                missing.insert(target.clone());
                for pair in pairs.iter().filter(|pair| {
                    let (path_part, _) = split_target(&pair.then_target);
                    resolve_target(&pair.file, path_part) == *target
                }) {
                    if pair_ignored(pair, ignore) {
                        continue;
                    }
                    diagnostics.push(format!(
                        "[ifttt] {} -> ThenChange '{}' (line {}): target file '{}' not found.",
                        pair.if_context(),
                        pair.then_target,
                        pair.then_line,
                        target.display()
                    ));
                }
            }
            Err(error) => return Err(error.into()),
        }
    }

    // Phase D: cross-reference each triggered pair against the target's
    // change set.
    for pair in &pairs {
        if pair_ignored(pair, ignore) {
            continue;
        }
        let Some(file_changes) = changes.get(pair.file.as_path()) else {
            continue;
        };
        if !file_changes.touches(pair.if_line) {
            continue;
        }
        let (path_part, label) = split_target(&pair.then_target);
        let target_file = resolve_target(&pair.file, path_part);

        let Some(target_changes) = changes.get(target_file.as_path()) else {
            // Already reported in Phase C (or never on disk at all).
            if missing.contains(&target_file) || !root.join(&target_file).exists() {
                continue;
            }
            diagnostics.push(format!(
                "[ifttt] {} -> ThenChange '{}' (line {}): target file '{}' not changed.",
                pair.if_context(),
                pair.then_target,
                pair.then_line,
                target_file.display()
            ));
            continue;
        };

        match label {
            None => {
                if target_changes.is_empty() {
                    diagnostics.push(format!(
                        "[ifttt] {} -> ThenChange '{}' (line {}): expected changes in '{}', but none found.",
                        pair.if_context(),
                        pair.then_target,
                        pair.then_line,
                        target_file.display()
                    ));
                }
            }
            Some(label) => {
                let ranges = label_maps.get(&target_file);
                match ranges.and_then(|map| map.get(label)) {
                    None => {
                        let available = ranges
                            .filter(|map| !map.is_empty())
                            .map(|map| {
                                map.keys().cloned().collect::<Vec<_>>().join(", ")
                            })
                            .unwrap_or_else(|| "none".to_string());
                        diagnostics.push(format!(
                            "[ifttt] {} -> ThenChange '{}' (line {}): label '{}' not found in '{}'. Available labels: {}",
                            pair.if_context(),
                            pair.then_target,
                            pair.then_line,
                            label,
                            target_file.display(),
                            available
                        ));
                    }
                    Some(&(start, end)) => {
                        let touched = target_changes
                            .added
                            .iter()
                            .chain(target_changes.removed.iter())
                            .any(|&line| line >= start && line <= end);
                        if !touched {
                            let actual = target_changes
                                .added
                                .union(&target_changes.removed)
                                .map(u32::to_string)
                                .collect::<Vec<_>>()
                                .join(", ");
                            diagnostics.push(format!(
                                "[ifttt] {} -> ThenChange '{}' (line {}): expected changes in '{}#{}' ({}-{}), but none found. Actual changes in file: [{}]",
                                pair.if_context(),
                                pair.then_target,
                                pair.then_line,
                                target_file.display(),
                                label,
                                start,
                                end,
                                actual
                            ));
                        }
                    }
                }
            }
        }
    }

    Ok(diagnostics)
}

/// Merge one file's line-tagged diagnostics into the report in textual
/// order. The sort is stable, so same-line diagnostics keep the order their
/// passes produced them in.
fn append_in_line_order(diagnostics: &mut Vec<String>, mut file_diagnostics: Vec<(u32, String)>) {
    file_diagnostics.sort_by_key(|&(line, _)| line);
    diagnostics.extend(
        file_diagnostics
            .into_iter()
            .map(|(_, message)| message),
    );
}

/// Single pass over one file's directives: the first `ThenChange` after an
/// `IfChange` clears the orphan latch, and every further `ThenChange` keeps
/// forming pairs with the same `IfChange` until the next one.
fn collect_pairs(
    file: &FileChanges,
    directives: &[Directive],
    ignore: &IgnoreSet,
    pairs: &mut Vec<Pair>,
    diagnostics: &mut Vec<(u32, String)>,
) {
    let mut current_if: Option<(u32, Option<String>)> = None;
    let mut saw_then = false;
    for directive in directives {
        match directive {
            Directive::IfChange { line, label } => {
                current_if = Some((*line, label.clone()));
                saw_then = false;
            }
            Directive::ThenChange { line, target } => match &current_if {
                None => {
                    if !ignore.matches_target(target) {
                        diagnostics.push((
                            *line,
                            format!(
                                "[ifttt] {}:{} -> unexpected ThenChange '{}' without preceding IfChange",
                                file.path.display(),
                                line,
                                target
                            ),
                        ));
                    }
                }
                Some((if_line, if_label)) => {
                    pairs.push(Pair {
                        file: file.path.clone(),
                        if_line: *if_line,
                        if_label: if_label.clone(),
                        then_target: target.clone(),
                        then_line: *line,
                    });
                    saw_then = true;
                }
            },
            _ => {}
        }
    }
    if let Some((line, label)) = current_if {
        if !saw_then {
            let suppressed = label.as_ref().is_some_and(|label| {
                ignore.matches_target(&format!("{}#{}", basename(&file.path), label))
            });
            if !suppressed {
                let rendered = match &label {
                    Some(label) => format!("IfChange({label})"),
                    None => "IfChange".to_string(),
                };
                diagnostics.push((
                    line,
                    format!(
                        "[ifttt] {}:{} -> missing ThenChange after {}",
                        file.path.display(),
                        line,
                        rendered
                    ),
                ));
            }
        }
    }
}

/// Walk directives with a label stack: `Label` opens a region on the next
/// line, `EndLabel` closes the innermost one on the previous line. Unbalanced
/// directives degrade into counted diagnostics.
fn collect_label_ranges(
    path: &Path,
    directives: &[Directive],
    diagnostics: &mut Vec<(u32, String)>,
) -> BTreeMap<String, LineRange> {
    let mut stack: Vec<(String, u32)> = Vec::new();
    let mut ranges = BTreeMap::new();
    for directive in directives {
        match directive {
            Directive::Label { line, name } => stack.push((name.clone(), *line)),
            Directive::EndLabel { line } => match stack.pop() {
                Some((name, opened)) => {
                    ranges.insert(name, (opened + 1, line.saturating_sub(1)));
                }
                None => diagnostics.push((
                    *line,
                    format!(
                        "[ifttt] {}:{} -> EndLabel without matching Label",
                        path.display(),
                        line
                    ),
                )),
            },
            _ => {}
        }
    }
    for (name, opened) in stack {
        diagnostics.push((
            opened,
            format!(
                "[ifttt] {}:{} -> Label '{}' is never closed",
                path.display(),
                opened,
                name
            ),
        ));
    }
    ranges
}

fn pair_ignored(pair: &Pair, ignore: &IgnoreSet) -> bool {
    if let Some(label) = &pair.if_label {
        if ignore.matches_target(&format!("{}#{}", basename(&pair.file), label)) {
            return true;
        }
    }
    ignore.matches_target(&pair.then_target)
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('#') {
        Some((path, label)) => (path, Some(label)),
        None => (target, None),
    }
}

/// Resolve a `ThenChange` path part against the pair's file. Pure: absolute
/// paths pass through, an empty part names the pair's own file, everything
/// else is relative to the pair file's directory.
fn resolve_target(source: &Path, path_part: &str) -> PathBuf {
    if path_part.is_empty() {
        return source.to_owned();
    }
    let target = Path::new(path_part);
    if target.is_absolute() {
        return normalize(target);
    }
    let parent = source.parent().unwrap_or_else(|| Path::new(""));
    normalize(&parent.join(target))
}

/// Lexical cleanup of `.` and `..` components so resolved targets compare
/// equal to the paths the diff names.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    normalized.pop();
                } else {
                    normalized.push("..");
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

fn is_code_file(path: &Path) -> bool {
    !matches!(
        path.extension().and_then(|extension| extension.to_str()),
        Some("md" | "markdown")
    )
}

/// Discover files containing the literal `LINT.` under `dir` via ripgrep and
/// validate label uniqueness in each. Exit 1 from the search tool means no
/// hits; anything other than 0/1 is fatal.
pub fn run_scan(dir: &Path, options: &Options) -> Result<Report, LintError> {
    let output = Command::new("rg")
        .arg("--files-with-matches")
        .arg("--fixed-strings")
        .arg("LINT.")
        .arg(dir)
        .output()
        .map_err(|error| LintError::Search(format!("failed to run 'rg': {error}")))?;
    let paths = match output.status.code() {
        Some(0) => String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect::<Vec<_>>(),
        Some(1) => Vec::new(),
        _ => {
            return Err(LintError::Search(format!(
                "'rg' failed with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    };
    debug!(hits = paths.len(), "directive file scan finished");

    let pool = WorkerPool::new(options.parallelism);
    let mut cache = ParseCache::new(&pool);
    let result = scan_files(&paths, &mut cache);
    drop(cache);
    pool.shutdown();
    result.map(|diagnostics| Report { diagnostics })
}

fn scan_files(paths: &[PathBuf], cache: &mut ParseCache) -> Result<Vec<String>, LintError> {
    for path in paths {
        cache.schedule(path);
    }
    let mut diagnostics = Vec::new();
    for path in paths {
        match cache.wait(path)? {
            Ok(directives) => {
                append_in_line_order(&mut diagnostics, validate_unique(path, &directives));
            }
            Err(error) => return Err(error.into()),
        }
    }
    Ok(diagnostics)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::process::Command;

    use indoc::indoc;

    use super::{lint_diff, normalize, resolve_target, run_scan, LintError, Options, Report};
    use crate::testing::worktree;
    use crate::ExtractError;

    fn run(tempdir: &tempfile::TempDir, diff: &str, ignore: &[&str]) -> Report {
        lint_diff(
            diff,
            tempdir.path(),
            &Options {
                parallelism: 2,
                verbose: false,
                ignore: ignore.iter().map(|entry| entry.to_string()).collect(),
            },
        )
        .unwrap()
    }

    #[test]
    fn it_accepts_coupled_changes() {
        let tempdir = worktree! {
            "file1.ts" => "// LINT.IfChange\n// LINT.ThenChange(\"file2.ts\")\n",
            "file2.ts" => "// LINT.Label(\"dummy\")\n// LINT.EndLabel\n"
        };
        let report = run(
            &tempdir,
            indoc! {r#"
                --- a/file1.ts
                +++ b/file1.ts
                @@ -1,2 +1,2 @@
                -// LINT.IfChange
                +// LINT.IfChange
                 // LINT.ThenChange("file2.ts")
                --- a/file2.ts
                +++ b/file2.ts
                @@ -1,2 +1,2 @@
                -// LINT.Label("dummy")
                +// LINT.Label("dummy")
                 // LINT.EndLabel
            "#},
            &[],
        );
        assert_eq!(report.diagnostics(), &[] as &[String]);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn it_flags_unchanged_targets() {
        let tempdir = worktree! {
            "file1.ts" => "// LINT.IfChange\n// LINT.ThenChange(\"file2.ts\")\n",
            "file2.ts" => "// LINT.Label(\"dummy\")\n// LINT.EndLabel\n"
        };
        let report = run(
            &tempdir,
            indoc! {r#"
                --- a/file1.ts
                +++ b/file1.ts
                @@ -1,2 +1,2 @@
                -// LINT.IfChange
                +// LINT.IfChange
                 // LINT.ThenChange("file2.ts")
            "#},
            &[],
        );
        assert_eq!(
            report.diagnostics(),
            ["[ifttt] file1.ts:1 -> ThenChange 'file2.ts' (line 2): target file 'file2.ts' not changed."]
        );
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn it_reports_labeled_if_context() {
        let tempdir = worktree! {
            "file1.ts" => "// LINT.IfChange('g')\n// LINT.ThenChange(\"file2.ts\")\n",
            "file2.ts" => "// LINT.Label(\"dummy\")\n// LINT.EndLabel\n"
        };
        let report = run(
            &tempdir,
            indoc! {r#"
                --- a/file1.ts
                +++ b/file1.ts
                @@ -1,2 +1,2 @@
                -// LINT.IfChange('g')
                +// LINT.IfChange('g')
                 // LINT.ThenChange("file2.ts")
            "#},
            &[],
        );
        assert_eq!(
            report.diagnostics(),
            ["[ifttt] file1.ts#g:1 -> ThenChange 'file2.ts' (line 2): target file 'file2.ts' not changed."]
        );
    }

    fn label_range_worktree() -> tempfile::TempDir {
        worktree! {
            "file1.ts" => "// LINT.IfChange\n// LINT.ThenChange(\"file2.ts#label1\")\n",
            "file2.ts" => indoc! {r#"
                // sync guard
                // LINT.Label("label1")
                export const N = 1;
                // LINT.EndLabel

                export const TAIL = 2;
            "#}
        }
    }

    #[test]
    fn it_accepts_changes_inside_a_label_range() {
        let tempdir = label_range_worktree();
        let report = run(
            &tempdir,
            indoc! {r#"
                --- a/file1.ts
                +++ b/file1.ts
                @@ -1,2 +1,2 @@
                -// LINT.IfChange
                +// LINT.IfChange
                 // LINT.ThenChange("file2.ts#label1")
                --- a/file2.ts
                +++ b/file2.ts
                @@ -3 +3 @@
                -export const N = 0;
                +export const N = 1;
            "#},
            &[],
        );
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn it_flags_changes_outside_a_label_range() {
        let tempdir = label_range_worktree();
        let report = run(
            &tempdir,
            indoc! {r#"
                --- a/file1.ts
                +++ b/file1.ts
                @@ -1,2 +1,2 @@
                -// LINT.IfChange
                +// LINT.IfChange
                 // LINT.ThenChange("file2.ts#label1")
                --- a/file2.ts
                +++ b/file2.ts
                @@ -6 +6 @@
                -export const TAIL = 1;
                +export const TAIL = 2;
            "#},
            &[],
        );
        assert_eq!(
            report.diagnostics(),
            ["[ifttt] file1.ts:1 -> ThenChange 'file2.ts#label1' (line 2): expected changes in 'file2.ts#label1' (3-3), but none found. Actual changes in file: [6]"]
        );
    }

    #[test]
    fn it_flags_missing_labels_with_the_available_set() {
        let tempdir = worktree! {
            "file1.ts" => "// LINT.IfChange\n// LINT.ThenChange(\"file2.ts#nope\")\n",
            "file2.ts" => indoc! {r#"
                // LINT.Label("label1")
                export const N = 1;
                // LINT.EndLabel
            "#}
        };
        let report = run(
            &tempdir,
            indoc! {r#"
                --- a/file1.ts
                +++ b/file1.ts
                @@ -1,2 +1,2 @@
                -// LINT.IfChange
                +// LINT.IfChange
                 // LINT.ThenChange("file2.ts#nope")
                --- a/file2.ts
                +++ b/file2.ts
                @@ -2 +2 @@
                -export const N = 0;
                +export const N = 1;
            "#},
            &[],
        );
        assert_eq!(
            report.diagnostics(),
            ["[ifttt] file1.ts:1 -> ThenChange 'file2.ts#nope' (line 2): label 'nope' not found in 'file2.ts'. Available labels: label1"]
        );
    }

    #[test]
    fn it_reports_orphan_then_change() {
        let tempdir = worktree! {
            "file1.ts" => "// LINT.ThenChange(\"foo.ts\")\n"
        };
        let diff = indoc! {r#"
            --- a/file1.ts
            +++ b/file1.ts
            @@ -1 +1 @@
            -// LINT.ThenChange("foo.ts")
            +// LINT.ThenChange("foo.ts")
        "#};
        let report = run(&tempdir, diff, &[]);
        assert_eq!(
            report.diagnostics(),
            ["[ifttt] file1.ts:1 -> unexpected ThenChange 'foo.ts' without preceding IfChange"]
        );

        // S6: the same orphan is suppressed by an ignore entry for its target.
        let report = run(&tempdir, diff, &["foo.ts"]);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn it_reports_orphan_if_change() {
        let tempdir = worktree! {
            "file1.ts" => "// LINT.IfChange\n"
        };
        let report = run(
            &tempdir,
            indoc! {"
                --- a/file1.ts
                +++ b/file1.ts
                @@ -1 +1 @@
                -// LINT.IfChange
                +// LINT.IfChange
            "},
            &[],
        );
        assert_eq!(
            report.diagnostics(),
            ["[ifttt] file1.ts:1 -> missing ThenChange after IfChange"]
        );
    }

    #[test]
    fn it_suppresses_labeled_orphan_if_change_via_ignore() {
        let tempdir = worktree! {
            "file1.ts" => "// LINT.IfChange('lblonly')\n"
        };
        let diff = indoc! {"
            --- a/file1.ts
            +++ b/file1.ts
            @@ -1 +1 @@
            -// LINT.IfChange('lblonly')
            +// LINT.IfChange('lblonly')
        "};
        let report = run(&tempdir, diff, &[]);
        assert_eq!(
            report.diagnostics(),
            ["[ifttt] file1.ts:1 -> missing ThenChange after IfChange(lblonly)"]
        );

        let report = run(&tempdir, diff, &["file1.ts#lblonly"]);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn it_reports_missing_target_files_once() {
        let tempdir = worktree! {
            "file1.ts" => "// LINT.IfChange\n// LINT.ThenChange(\"gone.ts\")\n"
        };
        let report = run(
            &tempdir,
            indoc! {r#"
                --- a/file1.ts
                +++ b/file1.ts
                @@ -1,2 +1,2 @@
                -// LINT.IfChange
                +// LINT.IfChange
                 // LINT.ThenChange("gone.ts")
            "#},
            &[],
        );
        assert_eq!(
            report.diagnostics(),
            ["[ifttt] file1.ts:1 -> ThenChange 'gone.ts' (line 2): target file 'gone.ts' not found."]
        );
    }

    #[test]
    fn it_resolves_local_label_references() {
        let tempdir = worktree! {
            "file1.ts" => indoc! {r##"
                // LINT.IfChange
                // LINT.ThenChange("#local")
                // LINT.Label("local")
                const a = 1;
                // LINT.EndLabel
            "##}
        };
        let triggered_only = indoc! {r#"
            --- a/file1.ts
            +++ b/file1.ts
            @@ -1 +1 @@
            -// LINT.IfChange
            +// LINT.IfChange
        "#};
        let report = run(&tempdir, triggered_only, &[]);
        assert_eq!(
            report.diagnostics(),
            ["[ifttt] file1.ts:1 -> ThenChange '#local' (line 2): expected changes in 'file1.ts#local' (4-4), but none found. Actual changes in file: [1]"]
        );

        let both = indoc! {r#"
            --- a/file1.ts
            +++ b/file1.ts
            @@ -1 +1 @@
            -// LINT.IfChange
            +// LINT.IfChange
            --- a/file1.ts
            +++ b/file1.ts
            @@ -4 +4 @@
            -const a = 0;
            +const a = 1;
        "#};
        let report = run(&tempdir, both, &[]);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn it_forms_one_pair_per_then_change() {
        let tempdir = worktree! {
            "file1.ts" => "// LINT.IfChange\n// LINT.ThenChange(\"b.ts\")\n// LINT.ThenChange(\"c.ts\")\n",
            "b.ts" => "",
            "c.ts" => ""
        };
        let report = run(
            &tempdir,
            indoc! {r#"
                --- a/file1.ts
                +++ b/file1.ts
                @@ -1,3 +1,3 @@
                -// LINT.IfChange
                +// LINT.IfChange
                 // LINT.ThenChange("b.ts")
                 // LINT.ThenChange("c.ts")
            "#},
            &[],
        );
        assert_eq!(
            report.diagnostics(),
            [
                "[ifttt] file1.ts:1 -> ThenChange 'b.ts' (line 2): target file 'b.ts' not changed.",
                "[ifttt] file1.ts:1 -> ThenChange 'c.ts' (line 3): target file 'c.ts' not changed.",
            ]
        );
    }

    #[test]
    fn it_counts_duplicate_labels() {
        let tempdir = worktree! {
            "file1.ts" => indoc! {r#"
                // LINT.IfChange('x')
                // LINT.ThenChange("b.ts")
                // LINT.Label("x")
                // LINT.EndLabel
            "#},
            "b.ts" => ""
        };
        let report = run(
            &tempdir,
            indoc! {"
                --- a/file1.ts
                +++ b/file1.ts
                @@ -4 +4 @@
                -// LINT.EndLabel
                +// LINT.EndLabel
            "},
            &[],
        );
        assert_eq!(
            report.diagnostics(),
            ["[ifttt] file1.ts:3 -> duplicate directive label 'x'"]
        );
    }

    #[test]
    fn it_skips_markdown_files_entirely() {
        // The malformed directive inside the markdown file must never be
        // parsed.
        let tempdir = worktree! {
            "README.md" => "// LINT.ThenChange(\n"
        };
        let report = run(
            &tempdir,
            indoc! {"
                --- a/README.md
                +++ b/README.md
                @@ -1 +1 @@
                -old
                +new
            "},
            &[],
        );
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn it_skips_ignored_source_files() {
        let tempdir = worktree! {
            "vendor/lib.ts" => "// LINT.ThenChange(\"foo.ts\")\n"
        };
        let report = run(
            &tempdir,
            indoc! {r#"
                --- a/vendor/lib.ts
                +++ b/vendor/lib.ts
                @@ -1 +1 @@
                -x
                +// LINT.ThenChange("foo.ts")
            "#},
            &["vendor/*"],
        );
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn it_reports_unbalanced_labels_in_targets() {
        let tempdir = worktree! {
            "file1.ts" => "// LINT.IfChange\n// LINT.ThenChange(\"file2.ts\")\n",
            "file2.ts" => "// LINT.EndLabel\n// LINT.Label(\"open\")\n"
        };
        let report = run(
            &tempdir,
            indoc! {r#"
                --- a/file1.ts
                +++ b/file1.ts
                @@ -2 +2 @@
                -// LINT.ThenChange("file2.ts")
                +// LINT.ThenChange("file2.ts")
            "#},
            &[],
        );
        assert_eq!(
            report.diagnostics(),
            [
                "[ifttt] file2.ts:1 -> EndLabel without matching Label",
                "[ifttt] file2.ts:2 -> Label 'open' is never closed",
            ]
        );
    }

    #[test]
    fn it_is_deterministic_across_runs() {
        let tempdir = worktree! {
            "file1.ts" => "// LINT.IfChange\n// LINT.ThenChange(\"file2.ts\")\n",
            "file2.ts" => "// LINT.Label(\"dummy\")\n// LINT.EndLabel\n"
        };
        let diff = indoc! {r#"
            --- a/file1.ts
            +++ b/file1.ts
            @@ -1,2 +1,2 @@
            -// LINT.IfChange
            +// LINT.IfChange
             // LINT.ThenChange("file2.ts")
        "#};
        let first = run(&tempdir, diff, &[]);
        let second = run(&tempdir, diff, &[]);
        assert_eq!(first.diagnostics(), second.diagnostics());
        assert_eq!(first.exit_code(), second.exit_code());
    }

    #[test]
    fn it_resolves_targets_relative_to_the_pair_file() {
        assert_eq!(
            resolve_target(Path::new("src/a/mod.ts"), "../b/impl.ts"),
            PathBuf::from("src/b/impl.ts")
        );
        assert_eq!(
            resolve_target(Path::new("src/a/mod.ts"), ""),
            PathBuf::from("src/a/mod.ts")
        );
        assert_eq!(
            resolve_target(Path::new("a.ts"), "b.ts"),
            PathBuf::from("b.ts")
        );
        assert_eq!(
            resolve_target(Path::new("a.ts"), "/abs/b.ts"),
            PathBuf::from("/abs/b.ts")
        );
        assert_eq!(normalize(Path::new("../../x.ts")), PathBuf::from("../../x.ts"));
    }

    #[test]
    fn it_propagates_malformed_directives() {
        let tempdir = worktree! {
            "file1.ts" => "// LINT.ThenChange(broken\n"
        };
        let result = lint_diff(
            indoc! {"
                --- a/file1.ts
                +++ b/file1.ts
                @@ -1 +1 @@
                -old
                +new
            "},
            tempdir.path(),
            &Options::default(),
        );
        assert!(matches!(
            result,
            Err(LintError::Extract(ExtractError::Malformed { line: 1, .. }))
        ));
    }

    #[test]
    fn it_propagates_unreadable_source_files() {
        let tempdir = worktree! {
            "present.ts" => "export const A = 1;\n"
        };
        let result = lint_diff(
            indoc! {"
                --- a/absent.ts
                +++ b/absent.ts
                @@ -1 +1 @@
                -old
                +new
            "},
            tempdir.path(),
            &Options::default(),
        );
        assert!(matches!(
            result,
            Err(LintError::Extract(ExtractError::NotFound { .. }))
        ));
    }

    #[test]
    fn it_scans_directories_for_duplicate_labels() {
        if Command::new("rg").arg("--version").output().is_err() {
            // Environment without ripgrep; lint mode does not need it.
            return;
        }
        let tempdir = worktree! {
            "a.ts" => "// LINT.Label(\"x\")\n// LINT.EndLabel\n// LINT.Label(\"x\")\n// LINT.EndLabel\n",
            "b.ts" => "// LINT.Label(\"y\")\n// LINT.EndLabel\n"
        };
        let report = run_scan(tempdir.path(), &Options::default()).unwrap();
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.diagnostics().len(), 1);
        assert!(report.diagnostics()[0].contains("duplicate directive label 'x'"));

        let empty = worktree! {
            "clean.ts" => "export const A = 1;\n"
        };
        let report = run_scan(empty.path(), &Options::default()).unwrap();
        assert_eq!(report.exit_code(), 0);
    }
}

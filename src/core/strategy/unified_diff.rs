//! Unified diff hunks applied against the current file contents.
//!
//! Hunks are located against the original line array, keyed by their
//! `old_start`, so the order they appear in the reply does not matter. A hunk
//! whose old side is not found at the stated line moves to the nearest exact
//! match; with no exact match it is skipped.

use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, instrument, warn};

use super::{
    EditStrategy, FileMap, StrategyInfo, StrategyResult, detect_nl, fence_open, is_fence_close,
    resolve_path, split_lines,
};
use crate::core::error::{StrategyError, StrategyErrorKind};

pub const NAME: &str = "unified-diff";

static HUNK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap());

/// A single hunk in a unified diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize, // 1-based line number in old file
    pub old_count: usize, // Number of lines in old version
    pub new_start: usize, // 1-based line number in new file
    pub new_count: usize, // Number of lines in new version
    pub lines: Vec<HunkLine>,
}

/// A line in a hunk with its change type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String), // Unchanged line (starts with ' ')
    Remove(String),  // Removed line (starts with '-')
    Add(String),     // Added line (starts with '+')
}

impl Hunk {
    fn old_side(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    fn new_side(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Add(s) => Some(s.as_str()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }
}

/// Hunks for one `---`/`+++` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub old_path: String,
    pub new_path: String,
    pub hunks: Vec<Hunk>,
}

const DEV_NULL: &str = "/dev/null";

// ---------------------------------------------------------------------------
// Locating diff text in the reply
// ---------------------------------------------------------------------------

type DiffExtractor = fn(&str) -> Vec<String>;

/// Where diff text may live in a reply, tried in order until one yields.
const DIFF_EXTRACTORS: &[(&str, DiffExtractor)] = &[
    ("fenced-diff", extract_fenced_diff),
    ("bare-fence", extract_bare_fence),
    ("raw", extract_raw),
];

/// Bodies of fenced blocks whose info string satisfies `keep`.
fn fenced_bodies(text: &str, keep: impl Fn(&str, &[&str]) -> bool) -> Vec<String> {
    let lines = split_lines(text);
    let mut out = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let Some(fence) = fence_open(lines[i]) else {
            i += 1;
            continue;
        };
        let mut j = i + 1;
        while j < lines.len() && !is_fence_close(lines[j], fence.ticks) {
            j += 1;
        }
        let body = &lines[i + 1..j];
        if keep(fence.lang, body) {
            out.push(body.join("\n"));
        }
        i = j + 1;
    }
    out
}

fn extract_fenced_diff(text: &str) -> Vec<String> {
    fenced_bodies(text, |lang, _| {
        lang.eq_ignore_ascii_case("diff") || lang.eq_ignore_ascii_case("patch")
    })
}

fn extract_bare_fence(text: &str) -> Vec<String> {
    fenced_bodies(text, |lang, body| {
        lang.is_empty()
            && body
                .iter()
                .find(|l| !l.trim().is_empty())
                .is_some_and(|l| l.starts_with("---") || l.starts_with("diff --git"))
    })
}

fn extract_raw(text: &str) -> Vec<String> {
    if text.contains("---") && text.contains("+++") && text.contains("@@") {
        vec![text.to_string()]
    } else {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Path from a `---`/`+++` header: timestamp and `a/`/`b/` prefix removed.
pub(crate) fn header_path(raw: &str) -> String {
    let p = raw.split('\t').next().unwrap_or("").trim();
    if p == DEV_NULL {
        return p.to_string();
    }
    p.strip_prefix("a/")
        .or_else(|| p.strip_prefix("b/"))
        .unwrap_or(p)
        .to_string()
}

/// Parse `@@ -a[,b] +c[,d] @@`. Omitted counts are 1.
pub(crate) fn parse_hunk_header(line: &str) -> Option<(usize, usize, usize, usize)> {
    let caps = HUNK_HEADER.captures(line)?;
    let num = |i: usize| -> Option<usize> {
        match caps.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(1),
        }
    };
    Some((num(1)?, num(2)?, num(3)?, num(4)?))
}

fn is_file_header(lines: &[&str], i: usize) -> bool {
    lines[i].starts_with("--- ") && lines.get(i + 1).is_some_and(|n| n.starts_with("+++ "))
}

/// Old/new side line counts of raw hunk body lines.
fn side_counts(body: &[&str]) -> (usize, usize) {
    body.iter().fold((0, 0), |(o, n), l| match l.chars().next() {
        Some('-') => (o + 1, n),
        Some('+') => (o, n + 1),
        _ => (o + 1, n + 1),
    })
}

/// Everything parsed out of one diff text.
#[derive(Debug, Default)]
pub(crate) struct DiffParse {
    pub patches: Vec<FilePatch>,
    pub malformed: Vec<String>,
    pub orphan_hunks: usize,
}

pub(crate) fn parse_diff(text: &str) -> DiffParse {
    let lines = split_lines(text);
    let mut out = DiffParse::default();
    let mut current: Option<FilePatch> = None;
    let mut i = 0;

    while i < lines.len() {
        if is_file_header(&lines, i) {
            out.patches.extend(current.take());
            current = Some(FilePatch {
                old_path: header_path(&lines[i][4..]),
                new_path: header_path(&lines[i + 1][4..]),
                hunks: Vec::new(),
            });
            i += 2;
            continue;
        }
        if !lines[i].starts_with("@@") {
            i += 1;
            continue;
        }

        let header = lines[i];
        i += 1;
        let body_start = i;
        while i < lines.len()
            && !lines[i].starts_with("@@")
            && !lines[i].starts_with("diff --git")
            && !is_file_header(&lines, i)
            && matches!(lines[i].chars().next(), None | Some(' ' | '-' | '+' | '\\'))
        {
            i += 1;
        }
        let mut body: Vec<&str> = lines[body_start..i]
            .iter()
            .copied()
            .filter(|l| !l.starts_with('\\'))
            .collect();

        let Some((old_start, old_count, new_start, new_count)) = parse_hunk_header(header) else {
            out.malformed.push(header.to_string());
            continue;
        };

        // Empty lines stand for blank context; drop the ones past the counts
        while body.last() == Some(&"") {
            let (o, n) = side_counts(&body);
            if o > old_count || n > new_count {
                body.pop();
            } else {
                break;
            }
        }

        let hunk = Hunk {
            old_start,
            old_count,
            new_start,
            new_count,
            lines: body
                .iter()
                .map(|l| match l.chars().next() {
                    Some('-') => HunkLine::Remove(l[1..].to_string()),
                    Some('+') => HunkLine::Add(l[1..].to_string()),
                    Some(' ') => HunkLine::Context(l[1..].to_string()),
                    _ => HunkLine::Context(String::new()),
                })
                .collect(),
        };
        match current.as_mut() {
            Some(fp) => fp.hunks.push(hunk),
            None => out.orphan_hunks += 1,
        }
    }
    out.patches.extend(current);
    out
}

// ---------------------------------------------------------------------------
// Applying
// ---------------------------------------------------------------------------

/// Where a hunk's old side sits in `lines`, preferring its stated position.
pub(crate) fn locate_hunk(lines: &[&str], hunk: &Hunk) -> Option<usize> {
    let old = hunk.old_side();
    if old.is_empty() {
        // Pure insertion: `-N,0` means after line N
        return Some(hunk.old_start.min(lines.len()));
    }
    let hint = hunk.old_start.saturating_sub(1);
    let matches_at = |p: usize| lines.get(p..p + old.len()) == Some(&old[..]);
    if matches_at(hint) {
        return Some(hint);
    }
    (0..=lines.len().saturating_sub(old.len()))
        .filter(|&p| matches_at(p))
        .min_by_key(|&p| p.abs_diff(hint))
}

/// Outcome of applying one file's hunks.
#[derive(Debug, Default)]
pub(crate) struct HunkApply {
    pub content: String,
    pub applied: usize,
    pub skipped: Vec<String>,
}

/// Split `text` into (line, terminator) pairs; the last may have none.
fn split_terminated(text: &str) -> Vec<(&str, &'static str)> {
    text.split_inclusive('\n')
        .map(|raw| {
            if let Some(l) = raw.strip_suffix("\r\n") {
                (l, "\r\n")
            } else if let Some(l) = raw.strip_suffix('\n') {
                (l, "\n")
            } else {
                (raw, "")
            }
        })
        .collect()
}

/// Apply `hunks` to `original` in descending position order.
///
/// Untouched lines keep their own terminator. Replacement lines take the
/// terminator of the line they replace, or of their neighbour.
pub(crate) fn apply_hunks(original: &str, hunks: &[Hunk]) -> HunkApply {
    let preferred = detect_nl(original);
    let final_nl = original.is_empty() || original.ends_with('\n');
    let mut lines = split_terminated(original);
    let texts: Vec<&str> = lines.iter().map(|&(l, _)| l).collect();

    let mut out = HunkApply::default();
    let mut located: Vec<(usize, usize, usize)> = Vec::new(); // (pos, old_len, hunk idx)
    for (idx, h) in hunks.iter().enumerate() {
        match locate_hunk(&texts, h) {
            Some(pos) => {
                if pos + 1 != h.old_start && !h.old_side().is_empty() {
                    debug!(stated = h.old_start, found = pos + 1, "hunk relocated");
                }
                located.push((pos, h.old_side().len(), idx));
            }
            None => out
                .skipped
                .push(format!("hunk @@ -{},{} context not found", h.old_start, h.old_count)),
        }
    }

    located.sort_unstable();
    let mut kept: Vec<(usize, usize, usize)> = Vec::with_capacity(located.len());
    for (pos, len, idx) in located {
        if let Some(&(ppos, plen, _)) = kept.last() {
            if pos < ppos + plen {
                let h = &hunks[idx];
                out.skipped.push(format!(
                    "hunk @@ -{},{} overlaps an earlier hunk",
                    h.old_start, h.old_count
                ));
                continue;
            }
        }
        kept.push((pos, len, idx));
    }

    for &(pos, len, idx) in kept.iter().rev() {
        let replaced: Vec<&'static str> = lines[pos..pos + len].iter().map(|&(_, t)| t).collect();
        let neighbour = [pos.checked_sub(1), Some(pos + len)]
            .into_iter()
            .flatten()
            .filter_map(|i| lines.get(i))
            .map(|&(_, t)| t)
            .find(|t| !t.is_empty())
            .unwrap_or(preferred);
        let new_lines: Vec<(&str, &'static str)> = hunks[idx]
            .new_side()
            .into_iter()
            .enumerate()
            .map(|(k, l)| {
                let t = replaced.get(k).copied().filter(|t| !t.is_empty());
                (l, t.unwrap_or(neighbour))
            })
            .collect();
        lines.splice(pos..pos + len, new_lines);
    }
    out.applied = kept.len();

    // only the last line may go unterminated, and only if it was before
    let last = lines.len().saturating_sub(1);
    for (i, (_, t)) in lines.iter_mut().enumerate() {
        if i == last && !final_nl {
            *t = "";
        } else if t.is_empty() {
            *t = preferred;
        }
    }
    out.content = lines.iter().flat_map(|&(l, t)| [l, t]).collect();
    out
}

pub struct UnifiedDiffStrategy;

impl UnifiedDiffStrategy {
    pub fn new() -> Self {
        Self
    }

    fn err(&self, kind: StrategyErrorKind, message: impl Into<String>) -> StrategyError {
        StrategyError::new(kind, NAME, message)
    }
}

impl Default for UnifiedDiffStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl EditStrategy for UnifiedDiffStrategy {
    fn info(&self) -> StrategyInfo {
        StrategyInfo {
            name: NAME,
            description: "Apply standard unified diff hunks to existing files",
            supports_partial_edit: true,
            supports_multiple_files: true,
            best_for: &[
                "precise line-level changes",
                "changes at several places in one file",
                "replies already in patch format",
            ],
        }
    }

    #[instrument(level = "debug", skip_all, fields(strategy = NAME))]
    fn parse(&self, model_text: &str, current_files: &FileMap) -> StrategyResult {
        let Some((source, texts)) = DIFF_EXTRACTORS
            .iter()
            .map(|(name, extract)| (*name, extract(model_text)))
            .find(|(_, texts)| !texts.is_empty())
        else {
            return StrategyResult::failed(self.err(
                StrategyErrorKind::EmptyResult,
                "no unified diff found in the reply",
            ));
        };
        debug!(source, blocks = texts.len(), "diff text located");

        let mut result = StrategyResult::default();
        let mut malformed = Vec::new();
        let mut by_file: IndexMap<String, Vec<Hunk>> = IndexMap::new();

        for text in &texts {
            let parsed = parse_diff(text);
            malformed.extend(parsed.malformed);
            if parsed.orphan_hunks > 0 {
                result.note(format!(
                    "{} hunk(s) appear before any ---/+++ header and were ignored",
                    parsed.orphan_hunks
                ));
            }

            for fp in parsed.patches {
                result.stats.hunks_found += fp.hunks.len();
                if fp.new_path == DEV_NULL {
                    result.note(format!("{}: deletion is not supported, skipped", fp.old_path));
                    continue;
                }
                match resolve_path(&fp.new_path, current_files, NAME) {
                    Ok(Some(key)) => by_file.entry(key).or_default().extend(fp.hunks),
                    Ok(None) => {
                        result.note(format!("{}: not among the current files", fp.new_path));
                        result.rejections.push(self.err(
                            StrategyErrorKind::NoMatchFound,
                            format!("diff target {} is not among the current files", fp.new_path),
                        ));
                    }
                    Err(e) => result.rejections.push(e),
                }
            }
        }

        for header in &malformed {
            result.rejections.push(self.err(
                StrategyErrorKind::MalformedHeader,
                format!("cannot parse hunk header '{header}'"),
            ));
        }

        if result.stats.hunks_found == 0 {
            let error = match malformed.first() {
                Some(h) => self.err(
                    StrategyErrorKind::MalformedHeader,
                    format!("cannot parse hunk header '{h}'"),
                ),
                None => self.err(StrategyErrorKind::EmptyResult, "diff contains no hunks"),
            };
            return StrategyResult::failed(error);
        }

        for (path, hunks) in by_file {
            let original = &current_files[&path];
            let applied = apply_hunks(original, &hunks);
            result.stats.hunks_applied += applied.applied;
            for reason in applied.skipped {
                warn!(path = %path, %reason, "hunk skipped");
                result.rejections.push(
                    self.err(StrategyErrorKind::NoMatchFound, format!("{path}: {reason}")),
                );
            }
            if applied.content != *original {
                result.files.insert(path, applied.content);
            }
        }

        debug!(
            found = result.stats.hunks_found,
            applied = result.stats.hunks_applied,
            files = result.files.len(),
            "unified diff parsed"
        );
        result
    }

    fn validate(&self, result: &StrategyResult) -> Result<(), StrategyError> {
        if let Some(e) = &result.error {
            return Err(e.clone());
        }
        if result.stats.hunks_applied == 0 {
            return Err(result.rejections.first().cloned().unwrap_or_else(|| {
                self.err(StrategyErrorKind::NoMatchFound, "no hunk was applied")
            }));
        }
        if result.files.is_empty() {
            return Err(self.err(
                StrategyErrorKind::EmptyResult,
                "hunks applied but no file changed",
            ));
        }
        Ok(())
    }
}

//! Edit strategies: the conventions a model reply may use to describe changes.
//!
//! Every strategy is a pure `parse` + `validate` pair over in-memory text.
//! Nothing here touches the disk; the coordinator owns all side effects.

pub mod registry;
pub mod search_replace;
pub mod unified_diff;
pub mod whole_file;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::error::{StrategyError, StrategyErrorKind};

pub use registry::StrategyRegistry;
pub use search_replace::SearchReplaceStrategy;
pub use unified_diff::UnifiedDiffStrategy;
pub use whole_file::WholeFileStrategy;

/// Path to decoded text, in caller order.
pub type FileMap = IndexMap<String, String>;

/// Tunables shared by strategies and the preview renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Shortest whole-file body accepted, in bytes
    pub min_content_len: usize,
    pub context_lines: usize,
    pub new_file_preview_lines: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_content_len: 10,
            context_lines: 3,
            new_file_preview_lines: 10,
        }
    }
}

/// Static description of a strategy, for listings and prompt selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub supports_partial_edit: bool,
    pub supports_multiple_files: bool,
    pub best_for: &'static [&'static str],
}

/// What a parse pass found, independent of what it produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub blocks_found: usize,
    pub blocks_applied: usize,
    pub hunks_found: usize,
    pub hunks_applied: usize,
}

/// Transient output of one parse call. Never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyResult {
    /// Proposed content per path, only for files that would change
    pub files: FileMap,
    pub stats: ParseStats,
    /// Human-readable notes (misses, closest-line hints, skipped targets)
    pub diagnostics: Vec<String>,
    /// Pieces of the reply that were recognized but refused
    pub rejections: Vec<StrategyError>,
    /// Set when another convention produced `files`
    pub fallback: Option<&'static str>,
    /// Parse-level failure; when set `files` is meaningless
    pub error: Option<StrategyError>,
}

impl StrategyResult {
    pub fn failed(error: StrategyError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub(crate) fn note(&mut self, msg: impl Into<String>) {
        self.diagnostics.push(msg.into());
    }
}

/// One convention for turning a reply into proposed file contents.
pub trait EditStrategy {
    fn info(&self) -> StrategyInfo;

    fn name(&self) -> &'static str {
        self.info().name
    }

    /// Extract proposed contents. `current_files` is never modified.
    fn parse(&self, model_text: &str, current_files: &FileMap) -> StrategyResult;

    /// Acceptance rules applied right after `parse`.
    fn validate(&self, result: &StrategyResult) -> Result<(), StrategyError>;
}

// ---------------------------------------------------------------------------
// Shared scanning helpers
// ---------------------------------------------------------------------------

/// An opening code fence: backtick run length and info string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fence<'a> {
    pub ticks: usize,
    pub lang: &'a str,
}

pub(crate) fn fence_open(line: &str) -> Option<Fence<'_>> {
    let t = line.trim();
    let ticks = t.chars().take_while(|&c| c == '`').count();
    if ticks < 3 {
        return None;
    }
    let lang = t[ticks..].trim();
    if lang.contains('`') {
        return None;
    }
    Some(Fence { ticks, lang })
}

/// A closing fence matching an opener of `ticks` backticks.
pub(crate) fn is_fence_close(line: &str, ticks: usize) -> bool {
    let t = line.trim();
    t.len() >= ticks && t.chars().all(|c| c == '`')
}

/// Lines of `text` without terminators; a trailing `\r` is dropped.
pub(crate) fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect()
}

/// Strip markdown decoration models put around a path line.
pub(crate) fn strip_path_decoration(line: &str) -> &str {
    let mut s = line.trim();
    s = s.trim_start_matches('#').trim_start();
    for prefix in ["File:", "file:", "Path:", "path:", "Filename:", "filename:"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim_start();
            break;
        }
    }
    s = s.strip_suffix(':').unwrap_or(s).trim_end();
    loop {
        let before = s;
        for pair in ["**", "`", "*"] {
            if s.len() > 2 * pair.len() && s.starts_with(pair) && s.ends_with(pair) {
                s = &s[pair.len()..s.len() - pair.len()];
            }
        }
        if s == before {
            break;
        }
    }
    s
}

/// Canonical spelling used to compare paths: forward slashes, no `./`.
pub(crate) fn normalize_path(p: &str) -> String {
    let mut s = p.trim().replace('\\', "/");
    while let Some(rest) = s.strip_prefix("./") {
        s = rest.to_string();
    }
    s
}

/// Map a path as written by the model onto a key of `files`.
///
/// Exact (normalized) match wins; otherwise a unique suffix match on a
/// path-component boundary. Several suffix matches are ambiguous.
pub(crate) fn resolve_path(
    candidate: &str,
    files: &FileMap,
    strategy: &str,
) -> Result<Option<String>, StrategyError> {
    let want = normalize_path(candidate);
    if want.is_empty() {
        return Ok(None);
    }
    if files.contains_key(&want) {
        return Ok(Some(want));
    }
    if let Some(k) = files.keys().find(|k| normalize_path(k) == want) {
        return Ok(Some(k.clone()));
    }

    let hits: Vec<&String> = files
        .keys()
        .filter(|k| {
            let k = normalize_path(k);
            k.ends_with(&format!("/{want}")) || want.ends_with(&format!("/{k}"))
        })
        .collect();
    match hits.as_slice() {
        [] => Ok(None),
        [one] => Ok(Some((*one).clone())),
        many => Err(StrategyError::new(
            StrategyErrorKind::AmbiguousPath,
            strategy,
            format!(
                "'{candidate}' matches {} files: {}",
                many.len(),
                many.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ),
        )),
    }
}

/// Preferred line terminator of `content`.
pub(crate) fn detect_nl(content: &str) -> &'static str {
    if content.contains("\r\n") { "\r\n" } else { "\n" }
}

/// Terminators worth trying when joining lines to search `content`.
pub(crate) fn line_endings(content: &str) -> &'static [&'static str] {
    if content.contains("\r\n") {
        &["\r\n", "\n"]
    } else {
        &["\n"]
    }
}

/// Terminator of the line holding byte `at`; an unterminated last line
/// takes the file's preferred one.
pub(crate) fn terminator_at(content: &str, at: usize) -> &'static str {
    match content[at..].find('\n') {
        Some(i) if content[..at + i].ends_with('\r') => "\r\n",
        Some(_) => "\n",
        None => detect_nl(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(keys: &[&str]) -> FileMap {
        keys.iter().map(|k| (k.to_string(), String::new())).collect()
    }

    #[test]
    fn fences_open_and_close() {
        assert_eq!(fence_open("```rust"), Some(Fence { ticks: 3, lang: "rust" }));
        assert_eq!(fence_open("  ````"), Some(Fence { ticks: 4, lang: "" }));
        assert!(fence_open("``not").is_none());
        assert!(is_fence_close("```", 3));
        assert!(is_fence_close("````  ", 3));
        assert!(!is_fence_close("```", 4));
        assert!(!is_fence_close("```rust", 3));
    }

    #[test]
    fn decoration_is_stripped() {
        assert_eq!(strip_path_decoration("**src/main.rs**"), "src/main.rs");
        assert_eq!(strip_path_decoration("`a/b.py`:"), "a/b.py");
        assert_eq!(strip_path_decoration("### File: lib.rs"), "lib.rs");
        assert_eq!(strip_path_decoration("plain.txt"), "plain.txt");
    }

    #[test]
    fn resolve_prefers_exact_then_unique_suffix() {
        let f = files(&["src/app/main.py", "src/util.py", "tests/util.py"]);
        assert_eq!(
            resolve_path("./src/app/main.py", &f, "t").unwrap().as_deref(),
            Some("src/app/main.py")
        );
        assert_eq!(
            resolve_path("app/main.py", &f, "t").unwrap().as_deref(),
            Some("src/app/main.py")
        );
        assert_eq!(resolve_path("nope.py", &f, "t").unwrap(), None);

        let err = resolve_path("util.py", &f, "t").unwrap_err();
        assert_eq!(err.kind, StrategyErrorKind::AmbiguousPath);
    }

    #[test]
    fn suffix_match_respects_component_boundary() {
        let f = files(&["src/mymain.py"]);
        assert_eq!(resolve_path("main.py", &f, "t").unwrap(), None);
    }

    #[test]
    fn crlf_is_detected() {
        assert_eq!(detect_nl("a\r\nb\r\n"), "\r\n");
        assert_eq!(detect_nl("a\nb"), "\n");
        assert_eq!(split_lines("a\r\nb"), vec!["a", "b"]);
    }

    #[test]
    fn terminator_follows_the_line() {
        let mixed = "one\ntwo\r\nthree";
        assert_eq!(line_endings(mixed), ["\r\n", "\n"]);
        assert_eq!(line_endings("a\nb\n"), ["\n"]);
        assert_eq!(terminator_at(mixed, 0), "\n");
        assert_eq!(terminator_at(mixed, 5), "\r\n");
        assert_eq!(terminator_at(mixed, 10), "\r\n");
    }
}

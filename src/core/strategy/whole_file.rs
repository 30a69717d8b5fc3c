//! Whole-file replacement: `path` line, fenced block, complete new content.

use regex::Regex;
use std::path::{Component, Path};
use std::sync::LazyLock;
use tracing::{debug, instrument};

use super::{
    EditStrategy, EngineSettings, FileMap, StrategyInfo, StrategyResult, fence_open,
    is_fence_close, normalize_path, strip_path_decoration,
};
use crate::core::error::{StrategyError, StrategyErrorKind};

pub const NAME: &str = "whole-file";

static EXTENSION_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s`]+\.[A-Za-z0-9]+$").unwrap());
static DOTTED_RELATIVE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\./[^\s`]+$").unwrap());
static BARE_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\.[A-Za-z0-9_.-]+|[A-Z][A-Za-z]*file)$").unwrap());

// Phrases only count inside comments so identifiers like `unchanged` are safe
static PLACEHOLDER_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(rest of (the )?(code|file|implementation|function|class|module)|(existing|remaining|previous) code|unchanged|same as (before|above))\b",
    )
    .unwrap()
});

type PathMatcher = fn(&str) -> Option<String>;

/// Path-line shapes in priority order.
const PATH_MATCHERS: &[(&str, PathMatcher)] = &[
    ("extension", match_extension_path),
    ("dotted-relative", match_dotted_relative),
    ("bare-filename", match_bare_filename),
];

fn match_extension_path(line: &str) -> Option<String> {
    EXTENSION_PATH.is_match(line).then(|| line.to_string())
}

fn match_dotted_relative(line: &str) -> Option<String> {
    DOTTED_RELATIVE.is_match(line).then(|| line.to_string())
}

fn match_bare_filename(line: &str) -> Option<String> {
    BARE_FILENAME.is_match(line).then(|| line.to_string())
}

/// A path line followed by a complete fenced block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileBlock {
    pub path: String,
    pub content: String,
}

/// Outcome of scanning a reply for whole-file blocks.
#[derive(Debug, Default)]
pub(crate) struct Scan {
    pub blocks: Vec<FileBlock>,
    /// Path of a block whose closing fence never arrived
    pub unclosed: Option<String>,
}

/// Find every `path` + fenced block unit.
///
/// Content is the exact text between the opening and closing fence lines.
pub(crate) fn scan_blocks(text: &str) -> Scan {
    let raw: Vec<&str> = text.split_inclusive('\n').collect();
    let mut scan = Scan::default();
    let mut i = 0;

    while i + 1 < raw.len() {
        let Some(fence) = fence_open(raw[i + 1]) else {
            i += 1;
            continue;
        };
        let header = strip_path_decoration(raw[i]);
        let Some(path) = PATH_MATCHERS.iter().find_map(|(_, m)| m(header)) else {
            i += 1;
            continue;
        };

        let mut j = i + 2;
        let mut content = String::new();
        let mut closed = false;
        while j < raw.len() {
            if is_fence_close(raw[j], fence.ticks) {
                closed = true;
                break;
            }
            content.push_str(raw[j]);
            j += 1;
        }

        let path = normalize_path(&path);
        if !closed {
            scan.unclosed = Some(path);
            break;
        }
        scan.blocks.push(FileBlock { path, content });
        i = j + 1;
    }
    scan
}

/// True when a line stands in for code that was left out.
pub(crate) fn placeholder_line(line: &str) -> bool {
    let t = line.trim();
    let mut body = t;
    let mut comment = false;
    for leader in ["<!--", "//", "/*", "#", "--", ";", "*"] {
        if let Some(rest) = body.strip_prefix(leader) {
            body = rest;
            comment = true;
            break;
        }
    }
    let body = body
        .trim()
        .trim_end_matches("-->")
        .trim_end_matches("*/")
        .trim();

    if body == "..." || body == "…" {
        return true;
    }
    if comment && PLACEHOLDER_PHRASE.is_match(body) {
        return true;
    }
    comment_segments(t).into_iter().any(|seg| {
        let seg = seg.trim();
        seg == "..." || seg == "…" || PLACEHOLDER_PHRASE.is_match(seg)
    })
}

/// Comment text anywhere in a line: every block comment body, plus the
/// tail after a line-comment leader that starts a word.
fn comment_segments(line: &str) -> Vec<&str> {
    let mut segs = Vec::new();
    for (open, close) in [("/*", "*/"), ("<!--", "-->")] {
        let mut rest = line;
        while let Some(start) = rest.find(open) {
            let after = &rest[start + open.len()..];
            match after.find(close) {
                Some(end) => {
                    segs.push(&after[..end]);
                    rest = &after[end + close.len()..];
                }
                None => {
                    segs.push(after);
                    break;
                }
            }
        }
    }
    for leader in ["//", "#", "--"] {
        let hit = line
            .match_indices(leader)
            .map(|(i, _)| i)
            .find(|&i| i == 0 || line[..i].ends_with(char::is_whitespace));
        if let Some(i) = hit {
            segs.push(&line[i + leader.len()..]);
        }
    }
    segs
}

/// Why a path cannot be written as-is, if anything.
pub(crate) fn path_problem(path: &str) -> Option<&'static str> {
    if path.is_empty() {
        return Some("empty path");
    }
    if path.contains('`') {
        return Some("path contains a fence marker");
    }
    if path.chars().any(char::is_whitespace) {
        return Some("path contains whitespace");
    }
    let p = Path::new(path);
    if p.is_absolute() || path.starts_with('/') {
        return Some("absolute paths are not allowed");
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Some("path escapes the workspace");
    }
    None
}

pub struct WholeFileStrategy {
    min_content_len: usize,
}

impl WholeFileStrategy {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            min_content_len: settings.min_content_len,
        }
    }

    fn err(&self, kind: StrategyErrorKind, message: impl Into<String>) -> StrategyError {
        StrategyError::new(kind, NAME, message)
    }
}

impl Default for WholeFileStrategy {
    fn default() -> Self {
        Self::new(&EngineSettings::default())
    }
}

impl EditStrategy for WholeFileStrategy {
    fn info(&self) -> StrategyInfo {
        StrategyInfo {
            name: NAME,
            description: "Replace each file with the complete content given in a fenced block",
            supports_partial_edit: false,
            supports_multiple_files: true,
            best_for: &[
                "large changes to small files",
                "creating new files",
                "restructuring a whole file",
                "editing several files at once",
            ],
        }
    }

    #[instrument(level = "debug", skip_all, fields(strategy = NAME))]
    fn parse(&self, model_text: &str, current_files: &FileMap) -> StrategyResult {
        let scan = scan_blocks(model_text);
        let mut result = StrategyResult::default();
        result.stats.blocks_found = scan.blocks.len() + usize::from(scan.unclosed.is_some());

        let mut unchanged = 0;
        for block in scan.blocks {
            if current_files.get(&block.path) == Some(&block.content) {
                result.note(format!("{} already has this content; skipped", block.path));
                unchanged += 1;
                continue;
            }
            if let Some(prev) = result.files.get(&block.path) {
                if *prev != block.content {
                    return StrategyResult::failed(self.err(
                        StrategyErrorKind::AmbiguousPath,
                        format!("{} is given twice with different content", block.path),
                    ));
                }
                continue;
            }
            if !current_files.contains_key(&block.path) {
                result.note(format!("{} is a new file", block.path));
            }
            result.files.insert(block.path, block.content);
        }

        if let Some(path) = scan.unclosed {
            result.rejections.push(self.err(
                StrategyErrorKind::TruncatedContent,
                format!("{path}: closing fence missing, output looks cut off"),
            ));
        }

        if result.files.is_empty() && result.rejections.is_empty() && unchanged > 0 {
            return StrategyResult::failed(self.err(
                StrategyErrorKind::EmptyResult,
                "every file in the reply matches its current content",
            ));
        }
        if result.files.is_empty() && result.rejections.is_empty() {
            return StrategyResult::failed(self.err(
                StrategyErrorKind::EmptyResult,
                "no `path` + fenced block found; reply with complete files",
            ));
        }

        result.stats.blocks_applied = result.files.len();
        debug!(files = result.files.len(), "whole-file blocks parsed");
        result
    }

    fn validate(&self, result: &StrategyResult) -> Result<(), StrategyError> {
        if let Some(e) = &result.error {
            return Err(e.clone());
        }
        if let Some(e) = result.rejections.first() {
            return Err(e.clone());
        }
        if result.files.is_empty() {
            return Err(self.err(StrategyErrorKind::EmptyResult, "no files parsed"));
        }

        for (path, content) in &result.files {
            if let Some(problem) = path_problem(path) {
                return Err(self.err(
                    StrategyErrorKind::MalformedHeader,
                    format!("invalid path '{path}': {problem}"),
                ));
            }
            if content.len() < self.min_content_len {
                return Err(self.err(
                    StrategyErrorKind::TruncatedContent,
                    format!(
                        "{path}: content is {} bytes, minimum is {}; supply the complete file",
                        content.len(),
                        self.min_content_len
                    ),
                ));
            }
            if let Some((n, line)) = content
                .lines()
                .enumerate()
                .find(|(_, l)| placeholder_line(l))
            {
                return Err(self.err(
                    StrategyErrorKind::TruncatedContent,
                    format!(
                        "{path}: line {} looks like a placeholder ({}); supply the complete file",
                        n + 1,
                        line.trim()
                    ),
                ));
            }
        }
        Ok(())
    }
}

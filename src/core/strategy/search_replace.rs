//! Localized edits: `path` followed by SEARCH/REPLACE blocks.
//!
//! ```text
//! src/lib.rs
//! <<<<<<< SEARCH
//! old lines
//! =======
//! new lines
//! >>>>>>> REPLACE
//! ```
//!
//! SEARCH text must occur byte-exact in the running content of the file and
//! only its first occurrence is replaced. A miss leaves that block out and
//! records the closest-looking line as a hint; it never applies the hint.

use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, instrument, warn};

use super::whole_file::{self, WholeFileStrategy};
use super::{
    EditStrategy, EngineSettings, FileMap, StrategyInfo, StrategyResult, fence_open, line_endings,
    resolve_path, split_lines, strip_path_decoration, terminator_at,
};
use crate::core::error::{StrategyError, StrategyErrorKind};

pub const NAME: &str = "search-replace";

static SEARCH_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<{5,9} ?SEARCH\s*$").unwrap());
static DIVIDER_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^={5,9}\s*$").unwrap());
static REPLACE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^>{5,9} ?REPLACE\s*$").unwrap());

static PATH_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.\-/\\]*[\w\-/\\]\.[A-Za-z0-9]+$|^\.?/?[\w\-]+/[\w.\-/]+$").unwrap());
static PATH_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w.\-/\\]*[\w\-]\.[A-Za-z0-9]+").unwrap());

/// One SEARCH/REPLACE block, as line slices of the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Block<'a> {
    /// Line index of the SEARCH marker
    pub start: usize,
    /// Line index of the REPLACE marker
    pub end: usize,
    pub search: Vec<&'a str>,
    pub replace: Vec<&'a str>,
}

impl Block<'_> {
    fn search_text(&self, nl: &str) -> String {
        self.search.join(nl)
    }

    fn replace_text(&self, nl: &str) -> String {
        self.replace.join(nl)
    }
}

#[derive(Debug, Default)]
pub(crate) struct BlockScan<'a> {
    pub blocks: Vec<Block<'a>>,
    /// Line index of a SEARCH marker never closed by REPLACE
    pub unterminated: Option<usize>,
}

pub(crate) fn scan_blocks<'a>(lines: &[&'a str]) -> BlockScan<'a> {
    let mut scan = BlockScan::default();
    let mut i = 0;

    while i < lines.len() {
        if !SEARCH_MARKER.is_match(lines[i].trim()) {
            i += 1;
            continue;
        }
        let start = i;
        let mut search = Vec::new();
        let mut replace = Vec::new();
        let mut in_replace = false;
        let mut end = None;

        i += 1;
        while i < lines.len() {
            let t = lines[i].trim();
            if !in_replace && DIVIDER_MARKER.is_match(t) {
                in_replace = true;
            } else if in_replace && REPLACE_MARKER.is_match(t) {
                end = Some(i);
                break;
            } else if in_replace {
                replace.push(lines[i]);
            } else {
                search.push(lines[i]);
            }
            i += 1;
        }

        match end {
            Some(end) => {
                scan.blocks.push(Block {
                    start,
                    end,
                    search,
                    replace,
                });
                i = end + 1;
            }
            None => {
                scan.unterminated = Some(start);
                break;
            }
        }
    }
    scan
}

/// Split blocks into runs separated only by blank or fence lines.
pub(crate) fn group_blocks<'b, 'a>(lines: &[&str], blocks: &'b [Block<'a>]) -> Vec<&'b [Block<'a>]> {
    let mut groups = Vec::new();
    let mut from = 0;
    for k in 1..blocks.len() {
        let gap = &lines[blocks[k - 1].end + 1..blocks[k].start];
        let contiguous = gap
            .iter()
            .all(|l| l.trim().is_empty() || fence_open(l).is_some());
        if !contiguous {
            groups.push(&blocks[from..k]);
            from = k;
        }
    }
    if from < blocks.len() {
        groups.push(&blocks[from..]);
    }
    groups
}

type PathLocator = fn(&[&str], usize, &FileMap) -> Option<String>;

/// Ways a path may precede a block group, tried in order.
const PATH_LOCATORS: &[(&str, PathLocator)] = &[
    ("adjacent", locate_adjacent),
    ("blank-separated", locate_blank_separated),
    ("prose-preceded", locate_prose_preceded),
];

fn is_path_line(line: &str) -> bool {
    PATH_LINE.is_match(line)
}

/// Path on the line right above the group, or above its opening fence.
fn locate_adjacent(lines: &[&str], start: usize, _files: &FileMap) -> Option<String> {
    let mut k = start.checked_sub(1)?;
    if fence_open(lines[k]).is_some() {
        k = k.checked_sub(1)?;
    }
    let cand = strip_path_decoration(lines[k]);
    is_path_line(cand).then(|| cand.to_string())
}

/// Path line separated from the group by blank lines.
fn locate_blank_separated(lines: &[&str], start: usize, _files: &FileMap) -> Option<String> {
    let k = previous_content_line(lines, start)?;
    let cand = strip_path_decoration(lines[k]);
    is_path_line(cand).then(|| cand.to_string())
}

/// Last path-looking token in the sentence above the group.
fn locate_prose_preceded(lines: &[&str], start: usize, files: &FileMap) -> Option<String> {
    let k = previous_content_line(lines, start)?;
    let tokens: Vec<&str> = PATH_TOKEN
        .find_iter(lines[k])
        .map(|m| m.as_str().trim_end_matches('.'))
        .collect();
    tokens
        .iter()
        .rev()
        .find(|t| matches!(resolve_path(t, files, NAME), Ok(Some(_))))
        .or_else(|| tokens.last())
        .map(|t| t.to_string())
}

fn previous_content_line(lines: &[&str], start: usize) -> Option<usize> {
    (0..start)
        .rev()
        .find(|&k| !lines[k].trim().is_empty() && fence_open(lines[k]).is_none())
}

/// Result of applying one block to running content.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum BlockOutcome {
    Applied,
    EmptySearch,
    Missed { closest: Option<(usize, String)> },
}

pub(crate) fn apply_block(content: &mut String, block: &Block<'_>) -> BlockOutcome {
    if block.search_text("\n").trim().is_empty() {
        return BlockOutcome::EmptySearch;
    }
    for &nl in line_endings(content) {
        let search = block.search_text(nl);
        let Some(at) = content.find(&search) else {
            continue;
        };
        // A one-line match carries no terminator of its own
        let nl = if block.search.len() > 1 {
            nl
        } else {
            terminator_at(content, at)
        };
        content.replace_range(at..at + search.len(), &block.replace_text(nl));
        return BlockOutcome::Applied;
    }
    BlockOutcome::Missed {
        closest: closest_line(content, &block.search),
    }
}

/// First line whose whitespace-normalized form contains the first
/// non-blank SEARCH line. Diagnostic only.
pub(crate) fn closest_line(content: &str, search: &[&str]) -> Option<(usize, String)> {
    let needle = search
        .iter()
        .map(|l| normalize_ws(l))
        .find(|l| !l.is_empty())?;
    content
        .lines()
        .enumerate()
        .find(|(_, l)| normalize_ws(l).contains(&needle))
        .map(|(n, l)| (n + 1, l.to_string()))
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct SearchReplaceStrategy {
    whole_file: WholeFileStrategy,
}

impl SearchReplaceStrategy {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            whole_file: WholeFileStrategy::new(settings),
        }
    }

    fn err(&self, kind: StrategyErrorKind, message: impl Into<String>) -> StrategyError {
        StrategyError::new(kind, NAME, message)
    }

    /// Find the file a group targets, trying each locator in turn.
    fn locate_group(
        &self,
        lines: &[&str],
        group: &[Block<'_>],
        files: &FileMap,
        result: &mut StrategyResult,
    ) -> Option<String> {
        let start = group[0].start;
        let mut unresolved = None;

        for (name, locate) in PATH_LOCATORS {
            let Some(cand) = locate(lines, start, files) else {
                continue;
            };
            match resolve_path(&cand, files, NAME) {
                Ok(Some(key)) => {
                    debug!(locator = name, path = %key, "block group attributed");
                    return Some(key);
                }
                Ok(None) => unresolved = Some(cand),
                Err(e) => {
                    result.rejections.push(e);
                    return None;
                }
            }
        }

        if let Some(cand) = unresolved {
            result.rejections.push(self.err(
                StrategyErrorKind::NoMatchFound,
                format!("{cand} is not among the current files"),
            ));
        }
        None
    }

    /// Apply `blocks` in order to the working copy of `path`.
    fn apply_group(
        &self,
        path: &str,
        blocks: &[Block<'_>],
        working: &mut IndexMap<String, String>,
        files: &FileMap,
        result: &mut StrategyResult,
    ) {
        let content = working
            .entry(path.to_string())
            .or_insert_with(|| files.get(path).cloned().unwrap_or_default());

        for block in blocks {
            match apply_block(content, block) {
                BlockOutcome::Applied => result.stats.blocks_applied += 1,
                BlockOutcome::EmptySearch => {
                    result.rejections.push(self.err(
                        StrategyErrorKind::EmptyResult,
                        format!("{path}: SEARCH section at line {} is empty", block.start + 1),
                    ));
                }
                BlockOutcome::Missed { closest } => {
                    let hint = match &closest {
                        Some((n, text)) => format!("; closest line {n}: {}", text.trim()),
                        None => String::new(),
                    };
                    warn!(path, line = block.start + 1, hint = %hint, "SEARCH text not found");
                    result.note(format!(
                        "{path}: block at line {} did not match{hint}",
                        block.start + 1
                    ));
                    result.rejections.push(self.err(
                        StrategyErrorKind::NoMatchFound,
                        format!("{path}: SEARCH text at line {} not found", block.start + 1),
                    ));
                }
            }
        }
    }

    /// No path anywhere: find the single file that contains the first block.
    fn permissive_scan(
        &self,
        blocks: &[Block<'_>],
        files: &FileMap,
        result: &mut StrategyResult,
    ) -> Option<String> {
        let first = blocks.first()?;
        let owners: Vec<&String> = files
            .iter()
            .filter(|(_, content)| {
                line_endings(content).iter().any(|&nl| {
                    let search = first.search_text(nl);
                    !search.trim().is_empty() && content.contains(&search)
                })
            })
            .map(|(k, _)| k)
            .collect();

        match owners.as_slice() {
            [one] => {
                result.note(format!("no path given; blocks attributed to {one}"));
                Some((*one).clone())
            }
            [] => {
                result.rejections.push(self.err(
                    StrategyErrorKind::NoMatchFound,
                    "no path given and no current file contains the first SEARCH text",
                ));
                None
            }
            many => {
                result.rejections.push(self.err(
                    StrategyErrorKind::AmbiguousPath,
                    format!(
                        "no path given and {} files contain the first SEARCH text",
                        many.len()
                    ),
                ));
                None
            }
        }
    }
}

impl Default for SearchReplaceStrategy {
    fn default() -> Self {
        Self::new(&EngineSettings::default())
    }
}

impl EditStrategy for SearchReplaceStrategy {
    fn info(&self) -> StrategyInfo {
        StrategyInfo {
            name: NAME,
            description: "Replace exact SEARCH text with REPLACE text in existing files",
            supports_partial_edit: true,
            supports_multiple_files: true,
            best_for: &[
                "small changes in large files",
                "editing single functions or methods",
                "targeted changes that must keep surrounding code intact",
            ],
        }
    }

    #[instrument(level = "debug", skip_all, fields(strategy = NAME))]
    fn parse(&self, model_text: &str, current_files: &FileMap) -> StrategyResult {
        let lines = split_lines(model_text);
        let scan = scan_blocks(&lines);

        if scan.blocks.is_empty() {
            if let Some(start) = scan.unterminated {
                let mut r = StrategyResult::default();
                r.rejections.push(self.err(
                    StrategyErrorKind::TruncatedContent,
                    format!("block at line {} has no REPLACE marker", start + 1),
                ));
                return r;
            }
            debug!("no SEARCH/REPLACE blocks, trying whole-file convention");
            let mut r = self.whole_file.parse(model_text, current_files);
            r.fallback = Some(whole_file::NAME);
            return r;
        }

        let mut result = StrategyResult::default();
        result.stats.blocks_found = scan.blocks.len();
        if let Some(start) = scan.unterminated {
            result.note(format!(
                "block at line {} has no REPLACE marker and was ignored",
                start + 1
            ));
        }

        let groups = group_blocks(&lines, &scan.blocks);
        let mut working: IndexMap<String, String> = IndexMap::new();
        let mut attributed = false;

        for group in &groups {
            if let Some(path) = self.locate_group(&lines, group, current_files, &mut result) {
                attributed = true;
                self.apply_group(&path, group, &mut working, current_files, &mut result);
            }
        }

        if !attributed {
            if let Some(path) = self.permissive_scan(&scan.blocks, current_files, &mut result) {
                self.apply_group(&path, &scan.blocks, &mut working, current_files, &mut result);
            }
        }

        for (path, content) in working {
            if current_files.get(&path) != Some(&content) {
                result.files.insert(path, content);
            }
        }

        debug!(
            found = result.stats.blocks_found,
            applied = result.stats.blocks_applied,
            files = result.files.len(),
            "search/replace blocks parsed"
        );
        result
    }

    fn validate(&self, result: &StrategyResult) -> Result<(), StrategyError> {
        if let Some(e) = &result.error {
            return Err(e.clone());
        }
        if result.fallback == Some(whole_file::NAME) {
            return self.whole_file.validate(result);
        }
        if result.stats.blocks_applied == 0 {
            return Err(result.rejections.first().cloned().unwrap_or_else(|| {
                self.err(StrategyErrorKind::NoMatchFound, "no block was applied")
            }));
        }
        if result.files.is_empty() {
            return Err(self.err(
                StrategyErrorKind::EmptyResult,
                "blocks applied but no file changed",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(pairs: &[(&str, &str)]) -> FileMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn run(text: &str, current: &FileMap) -> (StrategyResult, Result<(), StrategyError>) {
        let s = SearchReplaceStrategy::default();
        let r = s.parse(text, current);
        let v = s.validate(&r);
        (r, v)
    }

    const ADD: &str = "foo.py\n<<<<<<< SEARCH\ndef add(a,b):\n    return a+b\n=======\ndef add(a,b):\n    return a + b\n>>>>>>> REPLACE\n";

    #[test]
    fn adjacent_path_and_exact_replace() {
        let cur = files(&[("foo.py", "def add(a,b):\n    return a+b\n")]);
        let (r, v) = run(ADD, &cur);
        v.unwrap();
        assert_eq!(r.files["foo.py"], "def add(a,b):\n    return a + b\n");
        assert_eq!(r.stats.blocks_applied, 1);
    }

    #[test]
    fn mixed_line_endings_match_and_stay_per_line() {
        let cur = files(&[("m.txt", "one\ntwo\nthree\r\nfour\n")]);
        let text = "m.txt\n<<<<<<< SEARCH\none\ntwo\n=======\nONE\nTWO\n>>>>>>> REPLACE\n<<<<<<< SEARCH\nthree\n=======\n3a\n3b\n>>>>>>> REPLACE\n";
        let (r, v) = run(text, &cur);
        v.unwrap();
        assert_eq!(r.files["m.txt"], "ONE\nTWO\n3a\r\n3b\r\nfour\n");
    }

    #[test]
    fn second_application_reports_no_match() {
        let cur = files(&[("foo.py", "def add(a,b):\n    return a + b\n")]);
        let (r, v) = run(ADD, &cur);
        assert!(r.files.is_empty());
        assert_eq!(v.unwrap_err().kind, StrategyErrorKind::NoMatchFound);
    }

    #[test]
    fn path_locators_in_order() {
        let body = "<<<<<<< SEARCH\nx = 1\n=======\nx = 2\n>>>>>>> REPLACE\n";
        let cur = files(&[("pkg/mod.py", "x = 1\n")]);

        for prefix in [
            "pkg/mod.py\n",
            "pkg/mod.py\n```python\n",
            "`pkg/mod.py`\n\n\n",
            "Now update the value in pkg/mod.py as follows.\n\n",
        ] {
            let (r, v) = run(&format!("{prefix}{body}"), &cur);
            v.unwrap();
            assert_eq!(r.files["pkg/mod.py"], "x = 2\n", "prefix {prefix:?}");
        }
    }

    #[test]
    fn prose_prefers_known_file() {
        let lines = vec!["Edit main.rs (not old.rs) like so:", "<<<<<<< SEARCH"];
        let cur = files(&[("src/main.rs", "")]);
        assert_eq!(
            locate_prose_preceded(&lines, 1, &cur).as_deref(),
            Some("main.rs")
        );
    }

    #[test]
    fn blocks_apply_in_order_against_running_content() {
        let text = "a.txt\n<<<<<<< SEARCH\none\n=======\ntwo\n>>>>>>> REPLACE\n<<<<<<< SEARCH\ntwo\n=======\nthree\n>>>>>>> REPLACE\n";
        let cur = files(&[("a.txt", "one\n")]);
        let (r, v) = run(text, &cur);
        v.unwrap();
        assert_eq!(r.files["a.txt"], "three\n");
        assert_eq!(r.stats.blocks_applied, 2);
    }

    #[test]
    fn only_first_occurrence_is_replaced() {
        let text = "a.txt\n<<<<<<< SEARCH\ndup\n=======\nonce\n>>>>>>> REPLACE\n";
        let cur = files(&[("a.txt", "dup\ndup\n")]);
        let (r, _) = run(text, &cur);
        assert_eq!(r.files["a.txt"], "once\ndup\n");
    }

    #[test]
    fn whole_file_search_succeeds_and_empty_search_is_rejected() {
        let cur = files(&[("w.txt", "alpha\nbeta")]);
        let whole = "w.txt\n<<<<<<< SEARCH\nalpha\nbeta\n=======\ngamma\n>>>>>>> REPLACE\n";
        let (r, v) = run(whole, &cur);
        v.unwrap();
        assert_eq!(r.files["w.txt"], "gamma");

        let empty = "w.txt\n<<<<<<< SEARCH\n=======\ngamma\n>>>>>>> REPLACE\n";
        let (r, v) = run(empty, &cur);
        assert!(r.files.is_empty());
        assert_eq!(v.unwrap_err().kind, StrategyErrorKind::EmptyResult);
    }

    #[test]
    fn miss_is_a_noop_for_that_block_only() {
        let text = "m.rs\n<<<<<<< SEARCH\nfn  missing( )\n=======\nfn x()\n>>>>>>> REPLACE\n<<<<<<< SEARCH\nlet a = 1;\n=======\nlet a = 2;\n>>>>>>> REPLACE\n";
        let cur = files(&[("m.rs", "fn missing() {}\nlet a = 1;\n")]);
        let (r, v) = run(text, &cur);
        v.unwrap();
        assert_eq!(r.files["m.rs"], "fn missing() {}\nlet a = 2;\n");
        assert_eq!(r.stats.blocks_applied, 1);
        assert_eq!(r.rejections.len(), 1);
    }

    #[test]
    fn closest_line_is_reported_not_applied() {
        let hint = closest_line("fn main() {\n    let  x =  1;\n}\n", &["let x = 1;"]);
        assert_eq!(hint, Some((2, "    let  x =  1;".to_string())));
    }

    #[test]
    fn ambiguous_suffix_is_rejected() {
        let text = "util.py\n<<<<<<< SEARCH\nx\n=======\ny\n>>>>>>> REPLACE\n";
        let cur = files(&[("a/util.py", "x\n"), ("b/util.py", "x\n")]);
        let (_, v) = run(text, &cur);
        assert_eq!(v.unwrap_err().kind, StrategyErrorKind::AmbiguousPath);
    }

    #[test]
    fn permissive_scan_finds_single_owner() {
        let text = "<<<<<<< SEARCH\nneedle()\n=======\nthread()\n>>>>>>> REPLACE\n";
        let cur = files(&[("a.js", "hay()\n"), ("b.js", "needle()\n")]);
        let (r, v) = run(text, &cur);
        v.unwrap();
        assert_eq!(r.files.keys().collect::<Vec<_>>(), vec!["b.js"]);

        let both = files(&[("a.js", "needle()\n"), ("b.js", "needle()\n")]);
        let (_, v) = run(text, &both);
        assert_eq!(v.unwrap_err().kind, StrategyErrorKind::AmbiguousPath);
    }

    #[test]
    fn unknown_path_is_not_created() {
        let text = "ghost.py\n<<<<<<< SEARCH\nx\n=======\ny\n>>>>>>> REPLACE\n";
        let cur = files(&[("real.py", "z\n")]);
        let (r, v) = run(text, &cur);
        assert!(r.files.is_empty());
        assert_eq!(v.unwrap_err().kind, StrategyErrorKind::NoMatchFound);
    }

    #[test]
    fn falls_back_to_whole_file_without_blocks() {
        let s = SearchReplaceStrategy::default();
        let r = s.parse("new.py\n```\nprint('complete')\n```\n", &FileMap::new());
        assert_eq!(r.fallback, Some(whole_file::NAME));
        s.validate(&r).unwrap();
        assert_eq!(r.files["new.py"], "print('complete')\n");
    }

    #[test]
    fn crlf_files_keep_crlf() {
        let text = "w.txt\n<<<<<<< SEARCH\na\nb\n=======\nA\nB\n>>>>>>> REPLACE\n";
        let cur = files(&[("w.txt", "a\r\nb\r\nc\r\n")]);
        let (r, v) = run(text, &cur);
        v.unwrap();
        assert_eq!(r.files["w.txt"], "A\r\nB\r\nc\r\n");
    }

    #[test]
    fn blocks_split_by_prose_form_separate_groups() {
        let text = "a.txt\n<<<<<<< SEARCH\n1\n=======\n2\n>>>>>>> REPLACE\n\nAnd in b.txt:\n<<<<<<< SEARCH\n3\n=======\n4\n>>>>>>> REPLACE\n";
        let lines = split_lines(text);
        let scan = scan_blocks(&lines);
        assert_eq!(group_blocks(&lines, &scan.blocks).len(), 2);

        let cur = files(&[("a.txt", "1\n"), ("b.txt", "3\n")]);
        let (r, v) = run(text, &cur);
        v.unwrap();
        assert_eq!(r.files["a.txt"], "2\n");
        assert_eq!(r.files["b.txt"], "4\n");
    }
}

//! Preview rendering: unified-diff text and a typed line sequence built from
//! the same diff, so presentation never re-parses text.

use serde::Serialize;
use similar::{ChangeTag, TextDiff};

/// One display line of a preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum DiffLine {
    Header(String),
    HunkMarker(String),
    Added(String),
    Removed(String),
    Context(String),
    Neutral(String),
}

impl DiffLine {
    pub fn text(&self) -> &str {
        match self {
            DiffLine::Header(t)
            | DiffLine::HunkMarker(t)
            | DiffLine::Added(t)
            | DiffLine::Removed(t)
            | DiffLine::Context(t)
            | DiffLine::Neutral(t) => t,
        }
    }
}

/// Added/removed line counts for a single file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
}

/// Renders previews with a fixed context window.
#[derive(Debug, Clone, Copy)]
pub struct DiffRenderer {
    context_lines: usize,
    new_file_preview_lines: usize,
}

impl Default for DiffRenderer {
    fn default() -> Self {
        Self {
            context_lines: 3,
            new_file_preview_lines: 10,
        }
    }
}

impl DiffRenderer {
    pub fn new(context_lines: usize, new_file_preview_lines: usize) -> Self {
        Self {
            context_lines,
            new_file_preview_lines,
        }
    }

    /// Standard `---`/`+++`/`@@` text. Empty when nothing changed.
    pub fn unified_diff(&self, path: &str, original: &str, new: &str) -> String {
        let diff = TextDiff::from_lines(original, new);
        let (old_header, new_header) = headers(path);
        diff.unified_diff()
            .context_radius(self.context_lines)
            .header(&old_header, &new_header)
            .to_string()
    }

    /// Typed line sequence for display.
    ///
    /// A file with no pre-image is shown as a creation notice with its first
    /// few lines instead of a diff against nothing.
    pub fn visualize(&self, path: &str, original: &str, new: &str) -> Vec<DiffLine> {
        if original.is_empty() {
            return self.visualize_new_file(path, new);
        }

        let diff = TextDiff::from_lines(original, new);
        let mut unified = diff.unified_diff();
        unified.context_radius(self.context_lines);

        let mut out = Vec::new();
        let mut hunks = unified.iter_hunks().peekable();
        if hunks.peek().is_none() {
            return out;
        }

        let (old_header, new_header) = headers(path);
        out.push(DiffLine::Header(format!("--- {old_header}")));
        out.push(DiffLine::Header(format!("+++ {new_header}")));

        for hunk in hunks {
            out.push(DiffLine::HunkMarker(hunk.header().to_string()));
            for change in hunk.iter_changes() {
                let body = change.value().trim_end_matches(['\n', '\r']);
                out.push(match change.tag() {
                    ChangeTag::Insert => DiffLine::Added(format!("+{body}")),
                    ChangeTag::Delete => DiffLine::Removed(format!("-{body}")),
                    ChangeTag::Equal => DiffLine::Context(format!(" {body}")),
                });
                if change.missing_newline() {
                    out.push(DiffLine::Neutral("\\ No newline at end of file".into()));
                }
            }
        }
        out
    }

    fn visualize_new_file(&self, path: &str, new: &str) -> Vec<DiffLine> {
        let total = new.lines().count();
        let mut out = vec![DiffLine::Neutral(format!("file created: {path} ({total} lines)"))];
        out.extend(
            new.lines()
                .take(self.new_file_preview_lines)
                .map(|l| DiffLine::Added(format!("+{l}"))),
        );
        if total > self.new_file_preview_lines {
            out.push(DiffLine::Neutral(format!(
                "... ({} more lines)",
                total - self.new_file_preview_lines
            )));
        }
        out
    }
}

/// Line-level change counts.
pub fn diff_stats(original: &str, new: &str) -> DiffStats {
    let diff = TextDiff::from_lines(original, new);
    let mut stats = DiffStats::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => stats.added += 1,
            ChangeTag::Delete => stats.removed += 1,
            ChangeTag::Equal => {}
        }
    }
    stats
}

fn headers(path: &str) -> (String, String) {
    (format!("{path} (original)"), format!("{path} (modified)"))
}

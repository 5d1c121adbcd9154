// SPDX-License-Identifier: MIT
//! Shared data model: completions, requests, responses, cursor targets.
//!
//! Line numbers are 1-indexed buffer coordinates unless a field says
//! otherwise; column offsets are 0-indexed byte offsets within a line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Completions ──────────────────────────────────────────────────────────────

/// A line-range replacement proposed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// 1-based first buffer line the completion replaces.
    #[serde(rename = "startLine")]
    pub start_line: usize,
    /// 1-based last buffer line the completion replaces (inclusive).
    #[serde(rename = "endLineInc")]
    pub end_line_inc: usize,
    /// Replacement content, one entry per line, no trailing newlines.
    pub lines: Vec<String>,
}

/// Where the editor should jump next, and whether arriving there should
/// immediately request another completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorTarget {
    #[serde(rename = "relativePath")]
    pub path: String,
    #[serde(rename = "lineNumber")]
    pub line: usize,
    #[serde(rename = "shouldRetrigger")]
    pub should_retrigger: bool,
}

// ─── Requests ─────────────────────────────────────────────────────────────────

/// What prompted a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSource {
    /// The user stopped typing (debounce elapsed).
    Typing,
    /// The idle timer fired in normal mode.
    Idle,
}

/// One committed edit: the text before and after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub original: String,
    pub updated: String,
}

/// Accumulated edit history for one file, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiffHistory {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "diffHistory")]
    pub entries: Vec<DiffEntry>,
}

/// A recently-seen buffer from another file, sent as cross-file context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentBufferSnapshot {
    #[serde(rename = "filePath")]
    pub file_path: String,
    pub lines: Vec<String>,
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinterRange {
    #[serde(rename = "startLine")]
    pub start_line: usize,
    #[serde(rename = "endLine")]
    pub end_line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinterError {
    pub message: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub range: Option<LinterRange>,
}

/// A diagnostics snapshot pulled from the editor at request time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinterErrors {
    pub errors: Vec<LinterError>,
}

/// Opaque context blobs the core passes through without interpreting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtraContext {
    /// Treesitter scope/sibling/import summary, editor-produced.
    #[serde(default)]
    pub treesitter: Option<Value>,
    /// Staged git diff, editor-produced.
    #[serde(rename = "gitDiff", default)]
    pub git_diff: Option<Value>,
}

/// Everything a provider needs to produce a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub source: CompletionSource,
    #[serde(rename = "workspacePath")]
    pub workspace_path: String,
    #[serde(rename = "workspaceId")]
    pub workspace_id: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    /// Current buffer content.
    pub lines: Vec<String>,
    /// Buffer content before the in-progress edit.
    #[serde(rename = "previousLines")]
    pub previous_lines: Vec<String>,
    /// Monotonic buffer version at snapshot time.
    pub version: u64,
    /// 1-based cursor row.
    #[serde(rename = "cursorRow")]
    pub cursor_row: usize,
    /// 0-based cursor byte column.
    #[serde(rename = "cursorCol")]
    pub cursor_col: usize,
    /// 1-based first visible line, 0 when unknown.
    #[serde(rename = "viewportTop")]
    pub viewport_top: usize,
    /// 1-based last visible line, 0 when unknown.
    #[serde(rename = "viewportBottom")]
    pub viewport_bottom: usize,
    /// Recent edit histories, current file first, token-bounded.
    #[serde(rename = "fileDiffHistories", default)]
    pub file_diff_histories: Vec<FileDiffHistory>,
    /// Recently-seen buffers from other files.
    #[serde(rename = "recentBufferSnapshots", default)]
    pub recent_buffer_snapshots: Vec<RecentBufferSnapshot>,
    #[serde(rename = "linterErrors", default)]
    pub linter_errors: Option<LinterErrors>,
    #[serde(rename = "extraContext", default)]
    pub extra_context: ExtraContext,
}

// ─── Responses ────────────────────────────────────────────────────────────────

/// Provider-reported metadata used for metrics correlation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsInfo {
    pub id: String,
    pub additions: usize,
    pub deletions: usize,
}

/// A batch completion response.
///
/// A provider may instead answer with a stream of lines; see
/// [`crate::provider::PreparedStream`]. The two forms are distinct variants
/// at the provider seam and must not be conflated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub completions: Vec<Completion>,
    #[serde(rename = "cursorTarget", default)]
    pub cursor_target: Option<CursorTarget>,
    #[serde(rename = "metricsInfo", default)]
    pub metrics_info: Option<MetricsInfo>,
}

impl CompletionResponse {
    pub fn is_empty(&self) -> bool {
        self.completions.is_empty()
    }
}

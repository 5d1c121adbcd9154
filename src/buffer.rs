// SPDX-License-Identifier: MIT
//! Buffer model and the editor surface contract.
//!
//! [`Buffer`] is the engine-owned snapshot of editor state: lines, cursor,
//! viewport, per-file edit history and the pending edit awaiting commit.
//! [`EditorSurface`] is the contract the editor integration implements; the
//! engine and buffer never talk to the editor any other way.

use anyhow::Result;

use crate::model::{DiffEntry, ExtraContext, LinterErrors};

// ─── Editor contract ──────────────────────────────────────────────────────────

/// A prepared line-range replacement the editor applies atomically.
pub trait ReplaceBatch: Send {
    fn execute(&self) -> Result<()>;
}

/// Point-in-time editor state.
#[derive(Debug, Clone, Default)]
pub struct EditorSnapshot {
    pub path: String,
    pub lines: Vec<String>,
    /// 1-based cursor row.
    pub row: usize,
    /// 0-based cursor byte column.
    pub col: usize,
    /// 1-based viewport bounds; (0, 0) when unknown.
    pub viewport_top: usize,
    pub viewport_bottom: usize,
    pub version: u64,
}

/// Everything the engine needs from the editor integration.
///
/// Read operations snapshot state; write operations render or mutate.
/// Implementations must be callable from the engine task.
pub trait EditorSurface: Send + Sync {
    fn snapshot(&self) -> EditorSnapshot;

    /// Remove ghost text, overlays, and jump indicators.
    fn clear_ui(&self);

    /// Prepare (but do not apply) a replacement of `start..=end_inc` with
    /// `lines`. When `is_insertion` is set the lines are inserted at `start`
    /// instead of replacing the range.
    fn prepare_replace(
        &self,
        start: usize,
        end_inc: usize,
        lines: &[String],
        is_insertion: bool,
    ) -> Box<dyn ReplaceBatch>;

    /// Render a jump indicator pointing at `line`.
    fn show_cursor_target(&self, line: usize);

    fn move_cursor_to_start_of_line(&self, line: usize, scroll: bool, center: bool) -> Result<()>;

    /// Insert text at the cursor position.
    fn insert_text(&self, text: &str);

    /// Replace the content of one buffer line.
    fn replace_line(&self, line: usize, content: &str);

    fn linter_errors(&self) -> Option<LinterErrors>;

    /// Opaque context blobs passed through to the provider.
    fn context_blobs(&self) -> ExtraContext {
        ExtraContext::default()
    }
}

// ─── Buffer model ─────────────────────────────────────────────────────────────

/// Result of pulling fresh state from the editor.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub buffer_changed: bool,
    pub old_path: String,
    pub new_path: String,
}

/// Engine-owned snapshot of the current file plus its change tracking.
#[derive(Debug, Default)]
pub struct Buffer {
    path: String,
    version: u64,
    lines: Vec<String>,
    /// Content at the last commit (the "pre-edit" baseline sent upstream).
    previous_lines: Vec<String>,
    /// Baseline for the current session on this file.
    original_lines: Vec<String>,
    row: usize,
    col: usize,
    viewport_top: usize,
    viewport_bottom: usize,
    /// Committed `{original, updated}` fragments, oldest first.
    diff_histories: Vec<DiffEntry>,
    pending_edit: Option<DiffEntry>,
}

impl Buffer {
    pub fn path(&self) -> &str {
        &self.path
    }
    pub fn version(&self) -> u64 {
        self.version
    }
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
    pub fn previous_lines(&self) -> &[String] {
        &self.previous_lines
    }
    pub fn original_lines(&self) -> &[String] {
        &self.original_lines
    }
    pub fn row(&self) -> usize {
        self.row
    }
    pub fn col(&self) -> usize {
        self.col
    }
    pub fn viewport_top(&self) -> usize {
        self.viewport_top
    }
    pub fn viewport_bottom(&self) -> usize {
        self.viewport_bottom
    }
    pub fn diff_histories(&self) -> &[DiffEntry] {
        &self.diff_histories
    }

    /// Pull fresh state from the editor. Reports a file switch so the engine
    /// can save and restore per-file context; the caller is responsible for
    /// calling [`Buffer::set_file_context`] afterwards.
    pub fn sync(&mut self, editor: &dyn EditorSurface) -> SyncOutcome {
        self.apply_snapshot(editor.snapshot())
    }

    /// Apply an already-taken snapshot; see [`Buffer::sync`]. On a file
    /// switch the tracking context resets to the new file's content.
    pub fn apply_snapshot(&mut self, snap: EditorSnapshot) -> SyncOutcome {
        let outcome = SyncOutcome {
            buffer_changed: snap.path != self.path,
            old_path: self.path.clone(),
            new_path: snap.path.clone(),
        };

        self.path = snap.path;
        self.lines = snap.lines;
        self.row = snap.row;
        self.col = snap.col;
        self.viewport_top = snap.viewport_top;
        self.viewport_bottom = snap.viewport_bottom;
        self.version = snap.version;

        if outcome.buffer_changed {
            self.previous_lines = self.lines.clone();
            self.original_lines = self.lines.clone();
            self.diff_histories.clear();
            self.pending_edit = None;
        }
        outcome
    }

    /// Restore saved per-file context after a file switch.
    pub fn set_file_context(
        &mut self,
        previous: Vec<String>,
        original: Vec<String>,
        diffs: Vec<DiffEntry>,
    ) {
        self.previous_lines = previous;
        self.original_lines = original;
        self.diff_histories = diffs;
    }

    /// True iff the buffer differs from `new_lines` over `start..=end_inc`.
    pub fn has_changes(&self, start: usize, end_inc: usize, new_lines: &[String]) -> bool {
        if start == 0 || end_inc < start {
            return !new_lines.is_empty();
        }
        let range_len = end_inc - start + 1;
        if new_lines.len() != range_len {
            return true;
        }
        for (i, new_line) in new_lines.iter().enumerate() {
            match self.lines.get(start - 1 + i) {
                Some(existing) if existing == new_line => {}
                _ => return true,
            }
        }
        false
    }

    /// Record the pending edit for `start..=end_inc` and prepare the
    /// editor-side replace batch. Nothing is applied yet.
    pub fn on_completion_ready(
        &mut self,
        editor: &dyn EditorSurface,
        start: usize,
        end_inc: usize,
        new_lines: &[String],
        is_insertion: bool,
    ) -> Box<dyn ReplaceBatch> {
        let original = if is_insertion {
            String::new()
        } else {
            let lo = start.saturating_sub(1).min(self.lines.len());
            let hi = end_inc.min(self.lines.len());
            self.lines[lo..hi].join("\n")
        };
        self.pending_edit = Some(DiffEntry {
            original,
            updated: new_lines.join("\n"),
        });
        editor.prepare_replace(start, end_inc, new_lines, is_insertion)
    }

    /// Append the pending edit to the file's diff history and advance the
    /// pre-edit baseline. Call only after the batch applied successfully.
    pub fn commit_pending_edit(&mut self) {
        if let Some(entry) = self.pending_edit.take() {
            self.diff_histories.push(entry);
        }
        self.previous_lines = self.lines.clone();
    }

    pub fn discard_pending_edit(&mut self) {
        self.pending_edit = None;
    }

    pub fn linter_errors(&self, editor: &dyn EditorSurface) -> Option<LinterErrors> {
        editor.linter_errors()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

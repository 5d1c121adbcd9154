// SPDX-License-Identifier: MIT
//! Incremental diff/stage builder for streamed completions.
//!
//! The provider can stream the completion line by line. Waiting for the last
//! line before showing anything adds latency, so stages are finalized as
//! soon as a buffer-line gap (or viewport flip, or size cap) is detected and
//! the user can begin accepting before the stream ends.

use std::collections::BTreeMap;

use crate::model::CursorTarget;

use super::diff::{
    categorize_line_change, line_similarity, ChangeKind, LineChange, LineMapping,
    SIMILARITY_THRESHOLD,
};
use super::grouping::{finalize_stage_groups, StageContext};
use super::staging::{stage_needs_navigation, Stage, StagingResult};

/// Similarity required to accept a match at the expected old position.
pub const EXPECTED_POSITION_SIMILARITY: f64 = 0.7;

/// How far behind the expected position the match window reaches.
const WINDOW_BACK: usize = 2;
/// How far ahead of the expected position the match window reaches.
const WINDOW_AHEAD: usize = 10;

// ─── Incremental diff ─────────────────────────────────────────────────────────

/// Builds a diff line-by-line as streamed output arrives, matching each new
/// line against a window of old lines.
#[derive(Debug)]
pub struct IncrementalDiffBuilder {
    old_lines: Vec<String>,
    new_lines: Vec<String>,
    changes: BTreeMap<usize, LineChange>,
    mapping: LineMapping,
    /// Doubles as the 0-based next expected old index and the 1-based line
    /// number of the last match.
    old_line_idx: usize,
    used_old_lines: Vec<bool>,
}

impl IncrementalDiffBuilder {
    pub fn new(old_lines: Vec<String>) -> Self {
        let mapping = LineMapping::with_old_count(old_lines.len());
        let used = vec![false; old_lines.len()];
        Self {
            old_lines,
            new_lines: Vec::new(),
            changes: BTreeMap::new(),
            mapping,
            old_line_idx: 0,
            used_old_lines: used,
        }
    }

    pub fn old_lines(&self) -> &[String] {
        &self.old_lines
    }

    pub fn new_lines(&self) -> &[String] {
        &self.new_lines
    }

    pub fn mapping(&self) -> &LineMapping {
        &self.mapping
    }

    /// Process one streamed line. Returns the change it introduces, or
    /// `None` when the line matches the old text exactly.
    pub fn add_line(&mut self, line: &str) -> Option<LineChange> {
        let new_line_num = self.new_lines.len() + 1;
        self.new_lines.push(line.to_string());

        let matched = self.find_matching_old_line(line);
        self.mapping
            .new_to_old
            .push(matched.unwrap_or(0));

        let Some(old_line) = matched else {
            // Pure addition, anchored at the last matched position when one
            // exists.
            let anchor = (self.old_line_idx >= 1 && self.old_line_idx <= self.old_lines.len())
                .then_some(self.old_line_idx);
            let change = LineChange {
                kind: ChangeKind::Addition,
                old_line: anchor,
                new_line: new_line_num,
                content: line.to_string(),
                old_content: String::new(),
                col_start: 0,
                col_end: 0,
            };
            self.changes.insert(new_line_num, change.clone());
            return Some(change);
        };

        self.used_old_lines[old_line - 1] = true;
        if old_line <= self.mapping.old_to_new.len() {
            self.mapping.old_to_new[old_line - 1] = new_line_num;
        }

        let old_content = self.old_lines[old_line - 1].clone();
        if old_content == line {
            self.old_line_idx = self.old_line_idx.max(old_line);
            return None;
        }

        let (kind, col_start, col_end) = categorize_line_change(&old_content, line);
        let change = LineChange {
            kind,
            old_line: Some(old_line),
            new_line: new_line_num,
            content: line.to_string(),
            old_content,
            col_start,
            col_end,
        };
        self.changes.insert(new_line_num, change.clone());
        self.old_line_idx = self.old_line_idx.max(old_line);
        Some(change)
    }

    /// Probe old lines for the best match, in priority order. Returns a
    /// 1-based old line number.
    fn find_matching_old_line(&self, new_line: &str) -> Option<usize> {
        if self.old_lines.is_empty() {
            return None;
        }

        let expected = self.old_line_idx;
        let start = expected.saturating_sub(WINDOW_BACK);
        let end = (expected + WINDOW_AHEAD).min(self.old_lines.len());
        let free = |i: usize| !self.used_old_lines[i];

        // 1. Exact match at the expected position.
        if expected < self.old_lines.len()
            && free(expected)
            && self.old_lines[expected] == new_line
        {
            return Some(expected + 1);
        }

        // 2. Blank old line at the expected position, non-empty new line.
        if expected < self.old_lines.len()
            && free(expected)
            && self.old_lines[expected].trim().is_empty()
            && !new_line.trim().is_empty()
        {
            return Some(expected + 1);
        }

        // 3. Exact match anywhere in the window.
        for i in start..end {
            if free(i) && self.old_lines[i] == new_line {
                return Some(i + 1);
            }
        }

        // 4. Prefix match at the expected position.
        if expected < self.old_lines.len() && free(expected) {
            let trimmed = self.old_lines[expected].trim_end_matches([' ', '\t']);
            if !trimmed.is_empty() && new_line.starts_with(trimmed) {
                return Some(expected + 1);
            }
        }

        // 5. High similarity at the expected position.
        if expected < self.old_lines.len()
            && free(expected)
            && line_similarity(new_line, &self.old_lines[expected]) > EXPECTED_POSITION_SIMILARITY
        {
            return Some(expected + 1);
        }

        // 6. Prefix match elsewhere in the window.
        for i in start..end {
            if !free(i) || i == expected {
                continue;
            }
            let trimmed = self.old_lines[i].trim_end_matches([' ', '\t']);
            if !trimmed.is_empty() && new_line.starts_with(trimmed) {
                return Some(i + 1);
            }
        }

        // 7. Best similarity elsewhere in the window.
        let mut best_idx = None;
        let mut best_sim = SIMILARITY_THRESHOLD;
        for i in start..end {
            if !free(i) || i == expected {
                continue;
            }
            let sim = line_similarity(new_line, &self.old_lines[i]);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }
        best_idx.map(|i| i + 1)
    }
}

// ─── Incremental staging ──────────────────────────────────────────────────────

#[derive(Debug)]
struct OpenStage {
    /// New-line coordinates, 1-based inclusive.
    start_line: usize,
    end_line: usize,
    raw_changes: BTreeMap<usize, LineChange>,
}

/// Builds stages as lines stream in, finalizing each stage when a gap or
/// boundary is detected.
#[derive(Debug)]
pub struct IncrementalStageBuilder {
    base_offset: usize,
    proximity_threshold: usize,
    /// 0 disables the per-stage size cap.
    max_visible_lines: usize,
    viewport_top: usize,
    viewport_bottom: usize,
    cursor_row: usize,
    cursor_col: usize,
    file_path: String,

    diff: IncrementalDiffBuilder,
    current: Option<OpenStage>,
    current_in_viewport: bool,
    /// Finalized stages with their internal new-line start (for the final
    /// distance sort's tie-break).
    finalized: Vec<(Stage, usize)>,
    /// Last buffer line that carried a change; 0 = none yet.
    last_change_buffer_line: usize,
}

impl IncrementalStageBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        old_lines: Vec<String>,
        base_offset: usize,
        proximity_threshold: usize,
        max_visible_lines: usize,
        viewport_top: usize,
        viewport_bottom: usize,
        cursor_row: usize,
        cursor_col: usize,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            base_offset,
            proximity_threshold,
            max_visible_lines,
            viewport_top,
            viewport_bottom,
            cursor_row,
            cursor_col,
            file_path: file_path.into(),
            diff: IncrementalDiffBuilder::new(old_lines),
            current: None,
            current_in_viewport: false,
            finalized: Vec::new(),
            last_change_buffer_line: 0,
        }
    }

    pub fn streamed_lines(&self) -> &[String] {
        self.diff.new_lines()
    }

    /// Process one streamed line; returns a stage the moment it finalizes.
    pub fn add_line(&mut self, line: &str) -> Option<Stage> {
        let change = self.diff.add_line(line);
        let line_num = self.diff.new_lines().len();

        let Some(change) = change else {
            // Unchanged line: a long equal run can still split stages when
            // it maps far past the last change in the buffer.
            if self.current.is_some() && self.last_change_buffer_line > 0 {
                let current_buffer_line = self.current_buffer_line(line_num);
                if current_buffer_line > self.last_change_buffer_line
                    && current_buffer_line - self.last_change_buffer_line
                        > self.proximity_threshold
                {
                    return self.finalize_current();
                }
            }
            return None;
        };

        let buffer_line = self
            .diff
            .mapping()
            .buffer_line(&change, line_num, self.base_offset);
        let no_viewport = self.viewport_top == 0 && self.viewport_bottom == 0;
        let in_viewport =
            no_viewport || (buffer_line >= self.viewport_top && buffer_line <= self.viewport_bottom);

        if self.should_start_new_stage(buffer_line, in_viewport) {
            let done = self.finalize_current();
            self.start_stage(line_num, buffer_line, change, in_viewport);
            return done;
        }

        if self.current.is_none() {
            self.start_stage(line_num, buffer_line, change, in_viewport);
        } else {
            self.extend_stage(line_num, buffer_line, change);
        }
        None
    }

    /// Complete the build: finalize the open stage, order everything by
    /// cursor distance, and assign cursor targets. Returns `None` when the
    /// stream produced no changes.
    pub fn finalize(mut self) -> Option<StagingResult> {
        if self.current.is_some() {
            self.finalize_current();
        }
        if self.finalized.is_empty() {
            return None;
        }

        let cursor_row = self.cursor_row;
        let mut entries = std::mem::take(&mut self.finalized);
        entries.sort_by_key(|(stage, start)| (stage.distance_from_cursor(cursor_row), *start));

        let mut stages: Vec<Stage> = entries.into_iter().map(|(s, _)| s).collect();
        let count = stages.len();
        for i in 0..count {
            let target = if i + 1 == count {
                // Point past the new content: additions may extend beyond
                // the original buffer end.
                let stage = &stages[i];
                CursorTarget {
                    path: self.file_path.clone(),
                    line: stage.buffer_start + stage.lines.len().max(1) - 1,
                    should_retrigger: true,
                }
            } else {
                CursorTarget {
                    path: self.file_path.clone(),
                    line: stages[i + 1].buffer_start,
                    should_retrigger: false,
                }
            };
            stages[i].cursor_target = Some(target);
            stages[i].is_last_stage = i + 1 == count;
        }

        let first_needs_navigation = stage_needs_navigation(
            &stages[0],
            self.cursor_row,
            self.viewport_top,
            self.viewport_bottom,
            self.proximity_threshold,
        );

        Some(StagingResult {
            stages,
            first_needs_navigation,
        })
    }

    fn should_start_new_stage(&self, buffer_line: usize, in_viewport: bool) -> bool {
        let Some(current) = &self.current else {
            return false;
        };

        if self.max_visible_lines > 0
            && current.end_line - current.start_line + 1 >= self.max_visible_lines
        {
            return true;
        }

        if self.last_change_buffer_line > 0 {
            let gap = buffer_line.abs_diff(self.last_change_buffer_line);
            if gap > self.proximity_threshold {
                return true;
            }
        }

        self.current_in_viewport != in_viewport
    }

    fn start_stage(&mut self, line_num: usize, buffer_line: usize, change: LineChange, in_viewport: bool) {
        let mut raw_changes = BTreeMap::new();
        raw_changes.insert(line_num, change);
        self.current = Some(OpenStage {
            start_line: line_num,
            end_line: line_num,
            raw_changes,
        });
        self.current_in_viewport = in_viewport;
        self.last_change_buffer_line = buffer_line;
    }

    fn extend_stage(&mut self, line_num: usize, buffer_line: usize, change: LineChange) {
        if let Some(current) = self.current.as_mut() {
            current.raw_changes.insert(line_num, change);
            current.end_line = current.end_line.max(line_num);
        }
        self.last_change_buffer_line = buffer_line;
    }

    fn current_buffer_line(&self, line_num: usize) -> usize {
        if let Some(old) = self.diff.mapping().old_for_new(line_num) {
            return old + self.base_offset - 1;
        }
        line_num + self.base_offset - 1
    }

    fn finalize_current(&mut self) -> Option<Stage> {
        let open = self.current.take()?;
        if open.raw_changes.is_empty() {
            return None;
        }

        let old_len = self.diff.old_lines().len();
        let new_start = open.start_line;
        let new_end = open.end_line;

        let mut stage_new_lines: Vec<String> = Vec::new();
        for j in new_start..=new_end {
            if j >= 1 && j <= self.diff.new_lines().len() {
                stage_new_lines.push(self.diff.new_lines()[j - 1].clone());
            }
        }

        // Old-line range from explicit anchors; additions past the end of
        // the old text anchor at the last old line.
        let mut min_old: Option<usize> = None;
        let mut max_old: Option<usize> = None;
        fn note(min_old: &mut Option<usize>, max_old: &mut Option<usize>, old: usize) {
            *min_old = Some(min_old.map_or(old, |m: usize| m.min(old)));
            *max_old = Some(max_old.map_or(old, |m: usize| m.max(old)));
        }
        for change in open.raw_changes.values() {
            match change.old_line {
                Some(old) if old >= 1 && old <= old_len => note(&mut min_old, &mut max_old, old),
                None if change.kind == ChangeKind::Addition && old_len > 0 => {
                    note(&mut min_old, &mut max_old, old_len)
                }
                _ => {}
            }
        }

        // Fall back to the line mapping when no anchors were recorded.
        if min_old.is_none() {
            for j in new_start..=new_end {
                let old = self.diff.mapping().old_for_new(j).unwrap_or(j);
                if old >= 1 && old <= old_len {
                    note(&mut min_old, &mut max_old, old);
                }
            }
        }

        let mut stage_old_lines: Vec<String> = Vec::new();
        if let (Some(lo), Some(hi)) = (min_old, max_old) {
            stage_old_lines.extend(self.diff.old_lines()[lo - 1..hi].iter().cloned());
        }

        let mut buffer_start = match min_old {
            Some(lo) => lo + self.base_offset - 1,
            None => self.base_offset,
        };

        let changes = self.remap_changes(&stage_new_lines, new_start, new_end, min_old);

        // Streaming sometimes classifies a low-similarity modification as an
        // addition; the fallback matching above corrects it. Only a stage
        // that is additions all the way down is an insertion point.
        let mut is_insertion = false;
        let pure_additions =
            !changes.is_empty() && changes.values().all(|c| c.kind == ChangeKind::Addition);
        if pure_additions && min_old.is_some() {
            buffer_start += 1;
            is_insertion = true;
        }

        let buffer_end = (buffer_start + stage_old_lines.len().max(1) - 1).max(buffer_start);
        let buffer_end = if is_insertion { buffer_start } else { buffer_end };

        let mut line_to_buffer: BTreeMap<usize, usize> = BTreeMap::new();
        for (&rel, change) in &changes {
            if change.kind == ChangeKind::Modification || change.kind.is_character_level() {
                if let Some(old_rel) = change.old_line {
                    line_to_buffer.insert(rel, buffer_start + old_rel - 1);
                }
            }
        }

        let ctx = StageContext {
            buffer_start,
            cursor_row: self.cursor_row,
            cursor_col: self.cursor_col,
            line_to_buffer,
        };
        let (groups, cursor) = finalize_stage_groups(&changes, &stage_new_lines, &ctx);

        let stage = Stage {
            buffer_start,
            buffer_end,
            lines: stage_new_lines,
            changes,
            groups,
            cursor,
            cursor_target: None,
            is_last_stage: false,
            is_insertion,
        };
        self.finalized.push((stage.clone(), new_start));
        Some(stage)
    }

    /// Rebuild changes for a finalized stage in stage-relative coordinates,
    /// re-categorizing each line against its mapped old line. Old line
    /// numbers come out relative to the stage's old range.
    fn remap_changes(
        &self,
        stage_new_lines: &[String],
        new_start: usize,
        new_end: usize,
        min_old: Option<usize>,
    ) -> BTreeMap<usize, LineChange> {
        let old_len = self.diff.old_lines().len();
        let min_old_val = min_old.unwrap_or(1);

        let mut used_old = vec![false; old_len + 1];
        for j in new_start..=new_end {
            if let Some(old) = self.diff.mapping().old_for_new(j) {
                if old <= old_len {
                    used_old[old] = true;
                }
            }
        }

        let mut remapped = BTreeMap::new();
        for (i, new_line) in stage_new_lines.iter().enumerate() {
            let rel = i + 1;
            let abs_new = new_start + i;

            let mut old_line = self.diff.mapping().old_for_new(abs_new).unwrap_or(0);
            if old_line == 0 {
                let fallback = abs_new;
                if fallback >= 1 && fallback <= old_len && !used_old[fallback] {
                    old_line = fallback;
                }
            }

            if old_line == 0 {
                remapped.insert(
                    rel,
                    LineChange {
                        kind: ChangeKind::Addition,
                        old_line: None,
                        new_line: rel,
                        content: new_line.clone(),
                        old_content: String::new(),
                        col_start: 0,
                        col_end: 0,
                    },
                );
                continue;
            }

            let old_content = &self.diff.old_lines()[old_line - 1];
            if old_content == new_line {
                continue;
            }

            let (kind, col_start, col_end) = categorize_line_change(old_content, new_line);
            // Out-of-order window matches can map a line before the stage's
            // old range; clamp into it.
            let old_rel = (old_line + 1).saturating_sub(min_old_val).max(1);
            remapped.insert(
                rel,
                LineChange {
                    kind,
                    old_line: Some(old_rel),
                    new_line: rel,
                    content: new_line.clone(),
                    old_content: old_content.clone(),
                    col_start,
                    col_end,
                },
            );
        }
        remapped
    }
}

// ─── Truncated-stream recovery ────────────────────────────────────────────────

/// Recover from a stream that stopped at the provider's length limit.
///
/// The last line is likely mid-token and is dropped; the surviving tail is
/// re-anchored by similarity search around the expected old position so the
/// effective replacement range ends on matched text. Returns the surviving
/// lines and the 1-based effective old end line, or `None` when dropping the
/// tail empties the output.
pub fn recover_truncated_lines(
    old_lines: &[String],
    streamed: &[String],
) -> Option<(Vec<String>, usize)> {
    if streamed.len() <= 1 {
        return None;
    }
    let surviving = streamed[..streamed.len() - 1].to_vec();
    let last = surviving.last()?;

    let expected = surviving.len().min(old_lines.len().saturating_sub(1));
    let start = expected.saturating_sub(WINDOW_BACK);
    let end = (expected + WINDOW_AHEAD).min(old_lines.len());

    let mut anchor = expected.min(old_lines.len());
    let mut best = SIMILARITY_THRESHOLD;
    for i in start..end {
        let sim = line_similarity(last, &old_lines[i]);
        if sim > best {
            best = sim;
            anchor = i + 1;
        }
    }
    Some((surviving, anchor.max(1)))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::diff::{analyze_diff, GroupKind};
    use crate::text::staging::{create_stages, StagingParams};

    fn numbered(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("line {i}")).collect()
    }

    fn builder(old: Vec<String>) -> IncrementalStageBuilder {
        IncrementalStageBuilder::new(old, 1, 3, 0, 0, 0, 1, 0, "src/lib.rs")
    }

    #[test]
    fn exact_matches_produce_no_changes() {
        let mut b = IncrementalDiffBuilder::new(numbered(5));
        for i in 1..=5 {
            assert!(b.add_line(&format!("line {i}")).is_none());
        }
        assert!(b.changes.is_empty());
        assert_eq!(b.mapping().old_for_new(3), Some(3));
    }

    #[test]
    fn modified_line_categorized() {
        let mut b = IncrementalDiffBuilder::new(vec!["let x = 1;".into(), "done".into()]);
        let change = b.add_line("let x = 2;").unwrap();
        assert_eq!(change.old_line, Some(1));
        assert!(change.kind.is_character_level() || change.kind == ChangeKind::Modification);
        assert!(b.add_line("done").is_none());
    }

    #[test]
    fn unmatched_line_is_addition_with_anchor() {
        let mut b = IncrementalDiffBuilder::new(numbered(3));
        assert!(b.add_line("line 1").is_none());
        let change = b.add_line("zzz completely novel qqq").unwrap();
        assert_eq!(change.kind, ChangeKind::Addition);
        assert_eq!(change.old_line, Some(1));
    }

    #[test]
    fn blank_old_line_matches_content_line() {
        let mut b = IncrementalDiffBuilder::new(vec!["    ".into(), "tail".into()]);
        let change = b.add_line("    let y = 0;").unwrap();
        assert_eq!(change.old_line, Some(1));
        assert_eq!(change.kind, ChangeKind::AppendChars);
    }

    #[test]
    fn prefix_match_at_expected_position() {
        let mut b = IncrementalDiffBuilder::new(vec!["let total".into(), "tail".into()]);
        let change = b.add_line("let total = subtotal + tax;").unwrap();
        assert_eq!(change.old_line, Some(1));
        assert_eq!(change.kind, ChangeKind::AppendChars);
    }

    #[test]
    fn exact_match_ahead_in_window_skips_lines() {
        let mut b = IncrementalDiffBuilder::new(numbered(10));
        assert!(b.add_line("line 1").is_none());
        // Jumps to old line 5 within the look-ahead window.
        assert!(b.add_line("line 5").is_none());
        assert_eq!(b.mapping().old_for_new(2), Some(5));
        assert_eq!(b.old_line_idx, 5);
    }

    #[test]
    fn stage_splits_on_buffer_gap() {
        // Old buffer 20 lines. Stream: two matches, one change at line 3,
        // four equal lines (gap 4 > threshold 3), one change at line 8.
        let old = numbered(20);
        let mut b = builder(old.clone());

        assert!(b.add_line("line 1").is_none());
        assert!(b.add_line("line 2").is_none());
        // The first change opens a stage; nothing closes yet.
        assert!(b.add_line("line 3 changed").is_none());
        let mut finalized = Vec::new();
        // Feed the remaining lines, collecting any stage that closes.
        for line in ["line 4", "line 5", "line 6", "line 7"] {
            if let Some(stage) = b.add_line(line) {
                finalized.push(stage);
            }
        }
        if let Some(stage) = b.add_line("line 8 changed") {
            finalized.push(stage);
        }
        let result = b.finalize().unwrap();

        assert_eq!(finalized.len(), 1, "first stage closes on the gap");
        assert_eq!(finalized[0].buffer_start, 3);
        assert_eq!(result.stages.len(), 2);
        let starts: Vec<usize> = result.stages.iter().map(|s| s.buffer_start).collect();
        assert!(starts.contains(&3));
        assert!(starts.contains(&8));
    }

    #[test]
    fn stage_splits_on_max_visible_lines() {
        let old = numbered(10);
        let mut b = IncrementalStageBuilder::new(old, 1, 3, 2, 0, 0, 1, 0, "f.rs");
        let mut closed = 0;
        for i in 1..=6 {
            if b.add_line(&format!("line {i} changed")).is_some() {
                closed += 1;
            }
        }
        let result = b.finalize().unwrap();
        assert!(closed >= 2, "size cap must close stages mid-stream");
        assert!(result.stages.len() >= 3);
        for stage in &result.stages {
            assert!(stage.lines.len() <= 2);
        }
    }

    #[test]
    fn stage_splits_on_viewport_flip() {
        let old = numbered(30);
        // Viewport covers lines 1..=5 only.
        let mut b = IncrementalStageBuilder::new(old, 1, 10, 0, 1, 5, 1, 0, "f.rs");
        assert!(b.add_line("line 1 changed").is_none());
        for i in 2..=5 {
            assert!(b.add_line(&format!("line {i}")).is_none());
        }
        // Line 6 is outside the viewport; the in-view stage closes even
        // though the gap is within the (large) threshold.
        let stage = b.add_line("line 6 changed");
        assert!(stage.is_some());
        assert_eq!(stage.unwrap().buffer_start, 1);
    }

    #[test]
    fn trailing_additions_form_insertion_stage() {
        let old = numbered(3);
        let mut b = builder(old);
        for i in 1..=3 {
            assert!(b.add_line(&format!("line {i}")).is_none());
        }
        b.add_line("entirely new trailing content");
        let result = b.finalize().unwrap();
        assert_eq!(result.stages.len(), 1);
        let stage = &result.stages[0];
        assert!(stage.is_insertion);
        assert_eq!(stage.buffer_start, 4);
        assert_eq!(stage.buffer_end, 4);
        assert_eq!(stage.groups.len(), 1);
        assert_eq!(stage.groups[0].kind, GroupKind::Addition);
    }

    #[test]
    fn finalize_sorts_by_cursor_distance_and_sets_targets() {
        let old = numbered(30);
        let mut b = IncrementalStageBuilder::new(old, 1, 3, 0, 0, 0, 21, 0, "f.rs");
        for i in 1..=30 {
            let line = if i == 5 || i == 20 {
                format!("line {i} changed")
            } else {
                format!("line {i}")
            };
            b.add_line(&line);
        }
        let result = b.finalize().unwrap();
        assert_eq!(result.stages.len(), 2);
        // Cursor at 21: the line-20 stage is closer and comes first.
        assert_eq!(result.stages[0].buffer_start, 20);
        assert_eq!(result.stages[1].buffer_start, 5);

        let t0 = result.stages[0].cursor_target.as_ref().unwrap();
        assert_eq!(t0.line, 5);
        assert!(!t0.should_retrigger);
        assert!(!result.stages[0].is_last_stage);

        let t1 = result.stages[1].cursor_target.as_ref().unwrap();
        assert!(t1.should_retrigger);
        assert!(result.stages[1].is_last_stage);
    }

    #[test]
    fn no_changes_finalizes_to_none() {
        let mut b = builder(numbered(4));
        for i in 1..=4 {
            b.add_line(&format!("line {i}"));
        }
        assert!(b.finalize().is_none());
    }

    #[test]
    fn stream_matches_batch_for_identical_change_sets() {
        // Same inputs through the streaming and batch paths produce the same
        // stage set (ranges and content), modulo ordering.
        let old = numbered(30);
        let mut new = old.clone();
        new[4] = "line 5 changed".into();
        new[5] = "line 6 changed".into();
        new[19] = "line 20 changed".into();

        let mut b = IncrementalStageBuilder::new(old.clone(), 1, 3, 0, 0, 0, 1, 0, "f.rs");
        for line in &new {
            b.add_line(line);
        }
        let streamed = b.finalize().unwrap();

        let diff = analyze_diff(&old.join("\n"), &new.join("\n"));
        let batch = create_stages(
            &diff,
            &old,
            &new,
            &StagingParams {
                cursor_row: 1,
                cursor_col: 0,
                viewport_top: 0,
                viewport_bottom: 0,
                base_offset: 1,
                proximity_threshold: 3,
                file_path: "f.rs",
            },
        )
        .unwrap();

        let mut streamed_ranges: Vec<(usize, usize, Vec<String>)> = streamed
            .stages
            .iter()
            .map(|s| (s.buffer_start, s.buffer_end, s.lines.clone()))
            .collect();
        let mut batch_ranges: Vec<(usize, usize, Vec<String>)> = batch
            .stages
            .iter()
            .map(|s| (s.buffer_start, s.buffer_end, s.lines.clone()))
            .collect();
        streamed_ranges.sort();
        batch_ranges.sort();
        assert_eq!(streamed_ranges, batch_ranges);
    }

    #[test]
    fn truncation_recovery_drops_last_line() {
        let old = numbered(10);
        let streamed: Vec<String> = vec![
            "line 1".into(),
            "line 2 changed".into(),
            "line 3".into(),
            "line 4 mid-tok".into(),
        ];
        let (surviving, effective_end) = recover_truncated_lines(&old, &streamed).unwrap();
        assert_eq!(surviving.len(), 3);
        assert_eq!(surviving.last().unwrap(), "line 3");
        assert_eq!(effective_end, 3);
    }

    #[test]
    fn truncation_recovery_rejects_empty_output() {
        let old = numbered(3);
        assert!(recover_truncated_lines(&old, &["only".to_string()]).is_none());
        assert!(recover_truncated_lines(&old, &[]).is_none());
    }
}

// SPDX-License-Identifier: MIT
//! Batch stager: partitions a fully-computed diff into ordered stages.
//!
//! Changes are split by viewport visibility, clustered by line proximity
//! within each partition, and the resulting clusters are ordered by distance
//! from the cursor so the user accepts the nearest edit first.

use std::collections::BTreeMap;

use crate::model::{Completion, CursorTarget};

use super::diff::{ChangeKind, DiffResult, LineChange};
use super::grouping::{finalize_stage_groups, Group, StageContext};

/// An editor-atomic sub-completion, accepted in one keystroke.
#[derive(Debug, Clone, Default)]
pub struct Stage {
    /// 1-based inclusive buffer range the stage replaces.
    pub buffer_start: usize,
    pub buffer_end: usize,
    /// Replacement content.
    pub lines: Vec<String>,
    /// Changes remapped to stage-relative lines (1 = `buffer_start`).
    pub changes: BTreeMap<usize, LineChange>,
    /// Render-ready groups with buffer lines populated.
    pub groups: Vec<Group>,
    /// Where the cursor lands after applying the stage (1-based line within
    /// the stage's new lines, 0-based byte column).
    pub cursor: Option<(usize, usize)>,
    /// Suggested jump target for the next stage.
    pub cursor_target: Option<CursorTarget>,
    pub is_last_stage: bool,
    /// The stage inserts its lines at `buffer_start` instead of replacing
    /// the range (pure-addition cluster anchored after existing text).
    pub is_insertion: bool,
}

impl Stage {
    /// The stage as a plain line-range replacement.
    pub fn completion(&self) -> Completion {
        Completion {
            start_line: self.buffer_start,
            end_line_inc: self.buffer_end,
            lines: self.lines.clone(),
        }
    }

    /// Minimum line distance from the cursor row to the stage's range.
    pub fn distance_from_cursor(&self, cursor_row: usize) -> usize {
        if cursor_row >= self.buffer_start && cursor_row <= self.buffer_end {
            0
        } else if cursor_row < self.buffer_start {
            self.buffer_start - cursor_row
        } else {
            cursor_row - self.buffer_end
        }
    }
}

/// An ordered list of stages plus the index of the stage presently shown.
#[derive(Debug, Clone, Default)]
pub struct StagedCompletion {
    pub stages: Vec<Stage>,
    pub current_idx: usize,
    /// The first stage is off-screen or far from the cursor and must be
    /// introduced with a jump indicator.
    pub first_needs_navigation: bool,
}

impl StagedCompletion {
    pub fn current(&self) -> Option<&Stage> {
        self.stages.get(self.current_idx)
    }

    pub fn remaining_after_current(&self) -> usize {
        self.stages.len().saturating_sub(self.current_idx + 1)
    }

    /// After applying a stage that changed the buffer's line count, shift
    /// every remaining stage (and its anchors) that sits past the applied
    /// range, so staged accepts land where a one-shot apply would have.
    pub fn shift_after(&mut self, applied_end: usize, delta: isize) {
        if delta == 0 {
            return;
        }
        let shift = |line: &mut usize| {
            if *line > applied_end {
                *line = (*line as isize + delta).max(1) as usize;
            }
        };
        for stage in self.stages.iter_mut().skip(self.current_idx) {
            shift(&mut stage.buffer_start);
            shift(&mut stage.buffer_end);
            for group in &mut stage.groups {
                shift(&mut group.buffer_line);
            }
            if let Some(target) = stage.cursor_target.as_mut() {
                shift(&mut target.line);
            }
        }
    }
}

/// Output of staging: ordered stages plus navigation flag.
#[derive(Debug, Clone, Default)]
pub struct StagingResult {
    pub stages: Vec<Stage>,
    pub first_needs_navigation: bool,
}

impl StagingResult {
    pub fn into_staged(self) -> StagedCompletion {
        StagedCompletion {
            stages: self.stages,
            current_idx: 0,
            first_needs_navigation: self.first_needs_navigation,
        }
    }
}

/// Inputs shared by the batch stager.
#[derive(Debug, Clone)]
pub struct StagingParams<'a> {
    /// 1-based cursor row, buffer coordinates.
    pub cursor_row: usize,
    /// 0-based cursor byte column.
    pub cursor_col: usize,
    /// 1-based viewport bounds; (0, 0) means "no viewport info".
    pub viewport_top: usize,
    pub viewport_bottom: usize,
    /// 1-based buffer line where the diff's line 1 sits.
    pub base_offset: usize,
    /// Max line gap between changes sharing a stage.
    pub proximity_threshold: usize,
    pub file_path: &'a str,
}

struct Cluster {
    start_line: usize,
    end_line: usize,
    changes: BTreeMap<usize, LineChange>,
}

impl Cluster {
    fn buffer_distance(&self, cursor_row: usize, base_offset: usize) -> usize {
        let start = self.start_line + base_offset - 1;
        let end = self.end_line + base_offset - 1;
        if cursor_row >= start && cursor_row <= end {
            0
        } else if cursor_row < start {
            start - cursor_row
        } else {
            cursor_row - end
        }
    }
}

/// Partition a diff into ordered stages. Returns `None` for an empty diff.
pub fn create_stages(
    diff: &DiffResult,
    old_lines: &[String],
    new_lines: &[String],
    params: &StagingParams<'_>,
) -> Option<StagingResult> {
    if diff.changes.is_empty() {
        return None;
    }

    // Partition by viewport visibility, preserving ascending line order.
    let no_viewport = params.viewport_top == 0 && params.viewport_bottom == 0;
    let mut in_view: Vec<usize> = Vec::new();
    let mut out_view: Vec<usize> = Vec::new();
    for (&line_num, change) in &diff.changes {
        let buffer_line = diff.mapping.buffer_line(change, line_num, params.base_offset);
        let visible = no_viewport
            || (buffer_line >= params.viewport_top && buffer_line <= params.viewport_bottom);
        if visible {
            in_view.push(line_num);
        } else {
            out_view.push(line_num);
        }
    }

    let mut clusters = cluster_by_proximity(diff, &in_view, params.proximity_threshold);
    clusters.extend(cluster_by_proximity(diff, &out_view, params.proximity_threshold));
    if clusters.is_empty() {
        return None;
    }

    clusters.sort_by_key(|c| {
        (
            c.buffer_distance(params.cursor_row, params.base_offset),
            c.start_line,
        )
    });

    let mut stages: Vec<Stage> = clusters
        .into_iter()
        .map(|cluster| build_stage(cluster, diff, old_lines, new_lines, params))
        .collect();

    // Cursor targets are ordering-dependent: each stage points at the next;
    // the last points past its own new content and retriggers.
    let count = stages.len();
    for i in 0..count {
        let target = if i + 1 == count {
            let stage = &stages[i];
            CursorTarget {
                path: params.file_path.to_string(),
                line: stage.buffer_start + stage.lines.len().max(1) - 1,
                should_retrigger: true,
            }
        } else {
            CursorTarget {
                path: params.file_path.to_string(),
                line: stages[i + 1].buffer_start,
                should_retrigger: false,
            }
        };
        stages[i].cursor_target = Some(target);
        stages[i].is_last_stage = i + 1 == count;
    }

    let first_needs_navigation = stage_needs_navigation(
        &stages[0],
        params.cursor_row,
        params.viewport_top,
        params.viewport_bottom,
        params.proximity_threshold,
    );

    Some(StagingResult {
        stages,
        first_needs_navigation,
    })
}

fn cluster_by_proximity(diff: &DiffResult, line_nums: &[usize], threshold: usize) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut current: Option<Cluster> = None;

    for &line_num in line_nums {
        let change = diff.changes[&line_num].clone();
        match current.as_mut() {
            Some(c) if line_num.saturating_sub(c.end_line) <= threshold => {
                c.changes.insert(line_num, change);
                c.end_line = c.end_line.max(line_num);
            }
            _ => {
                if let Some(done) = current.take() {
                    clusters.push(done);
                }
                let mut changes = BTreeMap::new();
                changes.insert(line_num, change);
                current = Some(Cluster {
                    start_line: line_num,
                    end_line: line_num,
                    changes,
                });
            }
        }
    }
    if let Some(done) = current {
        clusters.push(done);
    }
    clusters
}

fn build_stage(
    cluster: Cluster,
    diff: &DiffResult,
    old_lines: &[String],
    new_lines: &[String],
    params: &StagingParams<'_>,
) -> Stage {
    // Derive the old-line bounds the stage replaces. Additions contribute
    // their anchors separately so a mixed cluster anchors on existing text.
    let mut min_old: Option<usize> = None;
    let mut max_old: Option<usize> = None;
    let mut addition_anchor: Option<usize> = None;
    let mut has_addition = false;
    let mut has_non_addition = false;

    for (&line_num, change) in &cluster.changes {
        if change.kind == ChangeKind::Addition {
            has_addition = true;
            if let Some(anchor) = change.old_line.filter(|&a| a >= 1 && a <= old_lines.len()) {
                addition_anchor = Some(addition_anchor.map_or(anchor, |m: usize| m.min(anchor)));
            }
            continue;
        }
        has_non_addition = true;
        let old = change
            .old_line
            .or_else(|| diff.mapping.old_for_new(line_num))
            .unwrap_or(line_num);
        min_old = Some(min_old.map_or(old, |m: usize| m.min(old)));
        max_old = Some(max_old.map_or(old, |m: usize| m.max(old)));
    }

    let mut is_insertion = false;
    let (buffer_start, buffer_end) = match (has_non_addition, addition_anchor) {
        (true, _) => {
            let lo = min_old.unwrap_or(cluster.start_line);
            let hi = max_old.unwrap_or(cluster.end_line).max(lo);
            (lo + params.base_offset - 1, hi + params.base_offset - 1)
        }
        (false, Some(anchor)) if has_addition => {
            // Pure additions with a valid anchor: insert after the anchor.
            is_insertion = true;
            let start = anchor + params.base_offset;
            (start, start)
        }
        _ => {
            let lo = cluster.start_line + params.base_offset - 1;
            let hi = cluster.end_line + params.base_offset - 1;
            (lo, hi)
        }
    };

    // Stage content: the new-line range the cluster's changes span.
    // Deletions contribute no content; a deletion-only cluster becomes an
    // empty replacement.
    let mut min_new: Option<usize> = None;
    let mut max_new: Option<usize> = None;
    for change in cluster.changes.values() {
        if change.kind == ChangeKind::Deletion || change.new_line == 0 {
            continue;
        }
        min_new = Some(min_new.map_or(change.new_line, |m: usize| m.min(change.new_line)));
        max_new = Some(max_new.map_or(change.new_line, |m: usize| m.max(change.new_line)));
    }
    let mut lines: Vec<String> = Vec::new();
    if let (Some(lo), Some(hi)) = (min_new, max_new) {
        for i in lo..=hi {
            if i <= new_lines.len() {
                lines.push(new_lines[i - 1].clone());
            }
        }
        while lines.len() < hi - lo + 1 {
            lines.push(String::new());
        }
    }

    // Remap changes to stage-relative coordinates and record buffer anchors
    // for modification-family lines.
    let mut changes: BTreeMap<usize, LineChange> = BTreeMap::new();
    let mut line_to_buffer: BTreeMap<usize, usize> = BTreeMap::new();
    for (&line_num, change) in &cluster.changes {
        let rel = line_num - cluster.start_line + 1;
        let mut remapped = change.clone();
        remapped.new_line = rel;
        changes.insert(rel, remapped);
        if change.kind == ChangeKind::Modification || change.kind.is_character_level() {
            let buf = diff.mapping.buffer_line(change, line_num, params.base_offset);
            line_to_buffer.insert(rel, buf);
        }
    }

    let ctx = StageContext {
        buffer_start,
        cursor_row: params.cursor_row,
        cursor_col: params.cursor_col,
        line_to_buffer,
    };
    let (groups, cursor) = finalize_stage_groups(&changes, &lines, &ctx);

    Stage {
        buffer_start,
        buffer_end,
        lines,
        changes,
        groups,
        cursor,
        cursor_target: None,
        is_last_stage: false,
        is_insertion,
    }
}

/// Whether a stage is far enough from the cursor (or outside the viewport)
/// that it must be introduced with a jump indicator.
pub fn stage_needs_navigation(
    stage: &Stage,
    cursor_row: usize,
    viewport_top: usize,
    viewport_bottom: usize,
    proximity_threshold: usize,
) -> bool {
    let has_viewport = !(viewport_top == 0 && viewport_bottom == 0);
    if has_viewport && (stage.buffer_end < viewport_top || stage.buffer_start > viewport_bottom) {
        return true;
    }
    stage.distance_from_cursor(cursor_row) > proximity_threshold
}

/// First buffer line where `new_lines` actually differs from `old_lines`.
/// `base_offset` is the 0-based buffer offset of `old_lines[0]`.
pub fn find_first_changed_line(
    old_lines: &[String],
    new_lines: &[String],
    base_offset: usize,
) -> Option<usize> {
    let common = old_lines.len().min(new_lines.len());
    for i in 0..common {
        if old_lines[i] != new_lines[i] {
            return Some(base_offset + i + 1);
        }
    }
    if old_lines.len() != new_lines.len() {
        return Some(base_offset + common + 1);
    }
    None
}

// ─── Tests ────────────────────────────────────────────────────────────────────

// SPDX-License-Identifier: MIT
//! Change grouping for rendering, render-hint validation, and cursor
//! positioning within a stage.

use std::collections::BTreeMap;

use super::diff::{ChangeKind, GroupKind, LineChange, RenderHint};

/// A run of consecutive same-kind changes collapsed for rendering.
///
/// Hinted groups are always single-line: the hint describes one partial-line
/// overlay and cannot span lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub kind: GroupKind,
    /// 1-based, relative to the stage content.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    /// New content, one entry per line.
    pub lines: Vec<String>,
    /// Old content, modifications only.
    pub old_lines: Vec<String>,
    /// Widest old line in the group, for side-by-side alignment.
    pub max_offset: usize,
    /// 1-based absolute buffer line the editor anchors the group to.
    pub buffer_line: usize,
    pub render_hint: Option<RenderHint>,
    pub col_start: usize,
    pub col_end: usize,
}

impl Group {
    fn from_change(line_num: usize, change: &LineChange) -> Self {
        let kind = change.kind.group_kind();
        let old_lines = if kind == GroupKind::Modification {
            vec![change.old_content.clone()]
        } else {
            Vec::new()
        };
        let max_offset = old_lines.iter().map(|l| l.len()).max().unwrap_or(0);
        let render_hint = change.kind.render_hint();
        let (col_start, col_end) = if render_hint.is_some() {
            (change.col_start, change.col_end)
        } else {
            (0, 0)
        };
        Self {
            kind,
            start_line: line_num,
            end_line: line_num,
            lines: vec![change.content.clone()],
            old_lines,
            max_offset,
            buffer_line: 0,
            render_hint,
            col_start,
            col_end,
        }
    }

    fn extend(&mut self, line_num: usize, change: &LineChange) {
        self.end_line = line_num;
        self.lines.push(change.content.clone());
        if self.kind == GroupKind::Modification {
            self.old_lines.push(change.old_content.clone());
            self.max_offset = self.max_offset.max(change.old_content.len());
        }
    }
}

/// Collapse consecutive same-kind changes into render groups.
///
/// Deletions are skipped entirely: they carry no positional content to
/// render. Returned groups are ordered by `start_line`.
pub fn group_changes(changes: &BTreeMap<usize, LineChange>) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut current: Option<Group> = None;

    for (&line_num, change) in changes {
        if change.kind == ChangeKind::Deletion {
            continue;
        }
        let kind = change.kind.group_kind();
        let has_hint = change.kind.render_hint().is_some();

        let start_new = match &current {
            None => true,
            Some(g) => {
                g.kind != kind
                    || line_num != g.end_line + 1
                    || g.render_hint.is_some()
                    || has_hint
            }
        };

        if start_new {
            if let Some(g) = current.take() {
                groups.push(g);
            }
            current = Some(Group::from_change(line_num, change));
        } else if let Some(g) = current.as_mut() {
            g.extend(line_num, change);
        }
    }

    if let Some(g) = current {
        groups.push(g);
    }
    groups
}

/// Downgrade character-level hints that would hide the cursor.
///
/// When a hinted group sits on the cursor row and the cursor column is past
/// the hint's start column, the inline overlay would cover the cursor;
/// dropping the hint forces side-by-side rendering instead.
pub fn downgrade_hints_for_cursor(groups: &mut [Group], cursor_row: usize, cursor_col: usize) {
    for g in groups {
        if g.buffer_line != cursor_row {
            continue;
        }
        match g.render_hint {
            Some(RenderHint::AppendChars) | Some(RenderHint::ReplaceChars)
                if g.col_start < cursor_col =>
            {
                g.render_hint = None;
            }
            _ => {}
        }
    }
}

/// Context for finalizing the groups of one stage.
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    /// Stage's 1-based buffer start line.
    pub buffer_start: usize,
    /// 1-based cursor row.
    pub cursor_row: usize,
    /// 0-based cursor column.
    pub cursor_col: usize,
    /// Pre-computed relative line → buffer line, for modification anchors.
    pub line_to_buffer: BTreeMap<usize, usize>,
}

/// Build groups for a stage, populate each group's buffer line, validate
/// render hints against the cursor, and compute the stage cursor position.
pub fn finalize_stage_groups(
    changes: &BTreeMap<usize, LineChange>,
    new_lines: &[String],
    ctx: &StageContext,
) -> (Vec<Group>, Option<(usize, usize)>) {
    let mut groups = group_changes(changes);

    // Modification positions used to anchor addition groups: the last
    // modification (additions after it render below) and a modification on
    // the cursor row (additions preceding it anchor at the cursor).
    let mut last_mod_rel = 0usize;
    let mut last_mod_buf = ctx.buffer_start;
    let mut cursor_mod_rel = 0usize;
    let mut cursor_mod_buf = 0usize;

    for (&rel_line, change) in changes {
        if change.kind == ChangeKind::Modification || change.kind.is_character_level() {
            let buf_line = ctx
                .line_to_buffer
                .get(&rel_line)
                .copied()
                .filter(|&b| b > 0)
                .unwrap_or(ctx.buffer_start + rel_line - 1);
            if rel_line > last_mod_rel {
                last_mod_rel = rel_line;
                last_mod_buf = buf_line;
            }
            if buf_line == ctx.cursor_row {
                cursor_mod_rel = rel_line;
                cursor_mod_buf = buf_line;
            }
        }
    }

    for g in &mut groups {
        if g.kind == GroupKind::Addition && last_mod_rel > 0 && g.start_line > last_mod_rel {
            // Addition after the last modification: render below it.
            g.buffer_line = last_mod_buf + 1;
        } else if g.kind == GroupKind::Addition
            && cursor_mod_rel > 0
            && g.start_line < cursor_mod_rel
        {
            // Addition before the cursor row's modification: anchor there.
            g.buffer_line = cursor_mod_buf;
        } else if let Some(&buf) = ctx.line_to_buffer.get(&g.start_line).filter(|&&b| b > 0) {
            g.buffer_line = buf;
        } else {
            g.buffer_line = ctx.buffer_start + g.start_line - 1;
        }
    }

    downgrade_hints_for_cursor(&mut groups, ctx.cursor_row, ctx.cursor_col);
    let cursor = cursor_position(changes, new_lines);
    (groups, cursor)
}

/// Optimal cursor placement for a set of changes.
///
/// Priority: modification > addition > append_chars > replace_chars >
/// delete_chars; pure deletions never place the cursor. Within the chosen
/// kind the largest relative line wins. Returns `None` when nothing applies.
pub fn cursor_position(
    changes: &BTreeMap<usize, LineChange>,
    new_lines: &[String],
) -> Option<(usize, usize)> {
    if changes.is_empty() {
        return None;
    }

    const PRIORITY: [ChangeKind; 5] = [
        ChangeKind::Modification,
        ChangeKind::Addition,
        ChangeKind::AppendChars,
        ChangeKind::ReplaceChars,
        ChangeKind::DeleteChars,
    ];

    let mut target_line = 0usize;
    for kind in PRIORITY {
        for (&line_num, change) in changes {
            if change.kind == kind && line_num > target_line {
                target_line = line_num;
            }
        }
        if target_line > 0 {
            break;
        }
    }

    if target_line == 0 {
        return None;
    }
    let target_line = target_line.min(new_lines.len());
    if target_line == 0 {
        return None;
    }

    if let Some(change) = changes.get(&target_line) {
        if change.kind.is_character_level() {
            // delete_chars ends in old coordinates; place at the deletion
            // point instead.
            let col = if change.kind == ChangeKind::DeleteChars {
                change.col_start
            } else {
                change.col_end
            };
            return Some((target_line, col));
        }
    }

    Some((target_line, new_lines[target_line - 1].len()))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

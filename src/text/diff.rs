// SPDX-License-Identifier: MIT
//! Line-diff analyzer.
//!
//! Computes typed line-level changes between two texts. Line hunks come from
//! a histogram diff over interned lines; adjacent delete+insert hunks are
//! paired into modifications (positionally when the counts match, by
//! character similarity otherwise). Each paired line is then classified with
//! a byte-level Myers diff into append / delete / replace chars or a plain
//! modification.

use std::collections::BTreeMap;

use imara_diff::{Algorithm, Diff, InternedInput};

/// Minimum similarity for a deleted line to pair with an inserted line.
pub const SIMILARITY_THRESHOLD: f64 = 0.3;

// ─── Change model ─────────────────────────────────────────────────────────────

/// What happened to one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Deletion,
    Addition,
    Modification,
    AppendChars,
    DeleteChars,
    ReplaceChars,
}

/// Rendering family a change belongs to when grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Addition,
    Modification,
    Deletion,
}

/// Single-line decoration letting the editor overlay a partial-line edit
/// instead of a full-line replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderHint {
    AppendChars,
    ReplaceChars,
    DeleteChars,
}

impl ChangeKind {
    /// The grouping family: character-level ops render like modifications.
    pub fn group_kind(self) -> GroupKind {
        match self {
            ChangeKind::Addition => GroupKind::Addition,
            ChangeKind::Deletion => GroupKind::Deletion,
            _ => GroupKind::Modification,
        }
    }

    pub fn render_hint(self) -> Option<RenderHint> {
        match self {
            ChangeKind::AppendChars => Some(RenderHint::AppendChars),
            ChangeKind::ReplaceChars => Some(RenderHint::ReplaceChars),
            ChangeKind::DeleteChars => Some(RenderHint::DeleteChars),
            _ => None,
        }
    }

    pub fn is_character_level(self) -> bool {
        matches!(
            self,
            ChangeKind::AppendChars | ChangeKind::DeleteChars | ChangeKind::ReplaceChars
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Deletion => "deletion",
            ChangeKind::Addition => "addition",
            ChangeKind::Modification => "modification",
            ChangeKind::AppendChars => "append_chars",
            ChangeKind::DeleteChars => "delete_chars",
            ChangeKind::ReplaceChars => "replace_chars",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed single-line edit record.
///
/// `col_start`/`col_end` are 0-based byte offsets and only meaningful for
/// character-level kinds: for `append_chars` and `replace_chars` they bound
/// the new text span within `content`; for `delete_chars` they bound the
/// removed range within `old_content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineChange {
    pub kind: ChangeKind,
    /// 1-based old line: the matched line for modifications and deletions,
    /// the anchor line ("insert after") for additions. `None` when there is
    /// no old counterpart.
    pub old_line: Option<usize>,
    /// 1-based position of this line in the new text.
    pub new_line: usize,
    /// New line text (for deletions: the removed text).
    pub content: String,
    /// Prior line text, for modification-family changes.
    pub old_content: String,
    pub col_start: usize,
    pub col_end: usize,
}

impl LineChange {
    fn full_line(kind: ChangeKind, old_line: Option<usize>, new_line: usize, content: &str) -> Self {
        Self {
            kind,
            old_line,
            new_line,
            content: content.to_string(),
            old_content: String::new(),
            col_start: 0,
            col_end: 0,
        }
    }

    fn paired(old_line: usize, new_line: usize, old: &str, new: &str) -> Self {
        let (kind, col_start, col_end) = categorize_line_change(old, new);
        Self {
            kind,
            old_line: Some(old_line),
            new_line,
            content: new.to_string(),
            old_content: old.to_string(),
            col_start,
            col_end,
        }
    }
}

// ─── Line mapping ─────────────────────────────────────────────────────────────

/// Coordinate correspondence between old and new line numbers (1-based,
/// 0 = no counterpart).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMapping {
    pub new_to_old: Vec<usize>,
    pub old_to_new: Vec<usize>,
}

impl LineMapping {
    pub fn with_old_count(old_count: usize) -> Self {
        Self {
            new_to_old: Vec::new(),
            old_to_new: vec![0; old_count],
        }
    }

    /// Old line for a new line, if it has a counterpart.
    pub fn old_for_new(&self, new_line: usize) -> Option<usize> {
        match self.new_to_old.get(new_line.checked_sub(1)?) {
            Some(&old) if old > 0 => Some(old),
            _ => None,
        }
    }

    fn record(&mut self, new_line: usize, old_line: usize) {
        if self.new_to_old.len() < new_line {
            self.new_to_old.resize(new_line, 0);
        }
        self.new_to_old[new_line - 1] = old_line;
        if old_line >= 1 && old_line <= self.old_to_new.len() {
            self.old_to_new[old_line - 1] = new_line;
        }
    }

    /// Absolute buffer line a change renders at, given where the diffed
    /// range starts in the buffer (`base_offset`, 1-based).
    pub fn buffer_line(&self, change: &LineChange, new_line: usize, base_offset: usize) -> usize {
        if let Some(old) = change.old_line {
            return old + base_offset - 1;
        }
        if let Some(old) = self.old_for_new(new_line) {
            return old + base_offset - 1;
        }
        new_line + base_offset - 1
    }
}

// ─── Diff result ──────────────────────────────────────────────────────────────

/// All categorized changes for one (old, new) pair.
///
/// Keys follow the original-overlay convention: modifications and deletions
/// are keyed by old coordinates so they overlay the text they replace;
/// additions are keyed by new coordinates. Deletions displaced by a
/// similarity pairing are re-keyed into free new-coordinate slots.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub changes: BTreeMap<usize, LineChange>,
    pub mapping: LineMapping,
    pub old_line_count: usize,
    pub new_line_count: usize,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn is_only_deletions(&self) -> bool {
        !self.changes.is_empty()
            && self
                .changes
                .values()
                .all(|c| c.kind == ChangeKind::Deletion)
    }
}

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        Vec::new()
    } else {
        text.split('\n').collect()
    }
}

/// Compute and categorize line-level changes between two texts.
pub fn analyze_diff(old_text: &str, new_text: &str) -> DiffResult {
    let old_lines = split_lines(old_text);
    let new_lines = split_lines(new_text);

    let mut result = DiffResult {
        changes: BTreeMap::new(),
        mapping: LineMapping::with_old_count(old_lines.len()),
        old_line_count: old_lines.len(),
        new_line_count: new_lines.len(),
    };

    if old_lines.is_empty() && new_lines.is_empty() {
        return result;
    }

    let mut input = InternedInput::default();
    input.update_before(old_lines.iter().copied());
    input.update_after(new_lines.iter().copied());
    let diff = Diff::compute(Algorithm::Histogram, &input);

    let mut prev_old_end = 0usize;
    let mut prev_new_end = 0usize;

    for hunk in diff.hunks() {
        let (ob, oe) = (hunk.before.start as usize, hunk.before.end as usize);
        let (nb, ne) = (hunk.after.start as usize, hunk.after.end as usize);

        // Equal run preceding this hunk.
        for k in 0..(ob - prev_old_end) {
            result.mapping.record(prev_new_end + k + 1, prev_old_end + k + 1);
        }

        let deleted = &old_lines[ob..oe];
        let inserted = &new_lines[nb..ne];
        match (deleted.is_empty(), inserted.is_empty()) {
            (false, false) => handle_modifications(deleted, inserted, ob, nb, &mut result),
            (false, true) => {
                for (j, line) in deleted.iter().enumerate() {
                    let line_num = ob + j + 1;
                    result.changes.insert(
                        line_num,
                        LineChange::full_line(ChangeKind::Deletion, Some(line_num), nb, line),
                    );
                }
            }
            (true, false) => {
                for (j, line) in inserted.iter().enumerate() {
                    let line_num = nb + j + 1;
                    let anchor = if ob > 0 { Some(ob) } else { None };
                    result.changes.insert(
                        line_num,
                        LineChange::full_line(ChangeKind::Addition, anchor, line_num, line),
                    );
                }
            }
            (true, true) => {}
        }

        prev_old_end = oe;
        prev_new_end = ne;
    }

    // Trailing equal run.
    for k in 0..(old_lines.len() - prev_old_end) {
        result.mapping.record(prev_new_end + k + 1, prev_old_end + k + 1);
    }

    result
}

// ─── Delete+insert pairing ────────────────────────────────────────────────────

fn handle_modifications(
    deleted: &[&str],
    inserted: &[&str],
    old_start: usize,
    new_start: usize,
    result: &mut DiffResult,
) {
    if deleted.len() == inserted.len() {
        // Equal counts: pair positionally.
        for j in 0..deleted.len() {
            let old_num = old_start + j + 1;
            let new_num = new_start + j + 1;
            match (deleted[j].is_empty(), inserted[j].is_empty()) {
                (false, false) => {
                    result
                        .changes
                        .insert(old_num, LineChange::paired(old_num, new_num, deleted[j], inserted[j]));
                    result.mapping.record(new_num, old_num);
                }
                (false, true) => {
                    result.changes.insert(
                        old_num,
                        LineChange::full_line(ChangeKind::Deletion, Some(old_num), new_num, deleted[j]),
                    );
                }
                (true, false) => {
                    result.changes.insert(
                        new_num,
                        LineChange::full_line(ChangeKind::Addition, Some(old_num), new_num, inserted[j]),
                    );
                }
                (true, true) => {
                    result.changes.insert(
                        old_num,
                        LineChange::full_line(ChangeKind::Modification, Some(old_num), new_num, ""),
                    );
                    result.mapping.record(new_num, old_num);
                }
            }
        }
        return;
    }

    // Unequal counts: pair by best character similarity.
    let mut used_inserts = vec![false; inserted.len()];
    let mut used_deletes = vec![false; deleted.len()];
    let mut matches: Vec<(usize, usize)> = Vec::new();

    for (i, del) in deleted.iter().enumerate() {
        if del.is_empty() {
            continue;
        }
        let mut best_idx = None;
        let mut best_sim = 0.0f64;
        for (j, ins) in inserted.iter().enumerate() {
            if used_inserts[j] {
                continue;
            }
            let sim = line_similarity(del, ins);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(j);
            }
        }
        if let Some(j) = best_idx {
            if best_sim >= SIMILARITY_THRESHOLD {
                matches.push((i, j));
                used_inserts[j] = true;
                used_deletes[i] = true;
            }
        }
    }

    // Matched pairs overlay the original content (old coordinates).
    for &(del_idx, ins_idx) in &matches {
        let old_num = old_start + del_idx + 1;
        let new_num = new_start + ins_idx + 1;
        result
            .changes
            .insert(old_num, LineChange::paired(old_num, new_num, deleted[del_idx], inserted[ins_idx]));
        result.mapping.record(new_num, old_num);
    }

    // Leftover deletions land in new coordinates, skipping occupied slots.
    for (i, del) in deleted.iter().enumerate() {
        if used_deletes[i] {
            continue;
        }
        let mut line_num = new_start + i + 1;
        while result.changes.contains_key(&line_num) {
            line_num += 1;
        }
        result.changes.insert(
            line_num,
            LineChange::full_line(ChangeKind::Deletion, Some(old_start + i + 1), line_num, del),
        );
    }

    // Leftover inserts are plain additions.
    for (i, ins) in inserted.iter().enumerate() {
        if used_inserts[i] {
            continue;
        }
        let line_num = new_start + i + 1;
        let anchor = if old_start > 0 { Some(old_start) } else { None };
        result.changes.insert(
            line_num,
            LineChange::full_line(ChangeKind::Addition, anchor, line_num, ins),
        );
    }
}

// ─── Per-line classification ──────────────────────────────────────────────────

/// Classify how `new_line` differs from `old_line`.
///
/// Returns the kind plus (col_start, col_end): the new text span for
/// `append_chars`/`replace_chars`, the removed range for `delete_chars`,
/// and (0, 0) for plain modifications.
pub fn categorize_line_change(old_line: &str, new_line: &str) -> (ChangeKind, usize, usize) {
    let mut input: InternedInput<u8> = InternedInput::default();
    input.update_before(old_line.bytes());
    input.update_after(new_line.bytes());
    let diff = Diff::compute(Algorithm::Myers, &input);

    let hunks: Vec<imara_diff::Hunk> = diff.hunks().collect();
    let deleted_bytes: usize = hunks.iter().map(|h| h.before.len()).sum();
    let insertions = hunks.iter().filter(|h| !h.after.is_empty()).count();
    let deletions = hunks.iter().filter(|h| !h.before.is_empty()).count();
    let has_equal = old_line.len() > deleted_bytes;

    // Only insertions, with equal parts.
    if deletions == 0 && insertions > 0 && has_equal {
        if new_line.as_bytes().starts_with(old_line.as_bytes()) {
            return (ChangeKind::AppendChars, old_line.len(), new_line.len());
        }
        if insertions == 1 {
            let h = hunks.iter().find(|h| !h.after.is_empty()).unwrap();
            return (
                ChangeKind::ReplaceChars,
                h.after.start as usize,
                h.after.end as usize,
            );
        }
        return (ChangeKind::Modification, 0, 0);
    }

    // Only deletions, with equal parts. A single contiguous removed range
    // qualifies as delete_chars; anything else is a modification.
    if insertions == 0 && deletions > 0 && has_equal {
        if deletions == 1 {
            let h = hunks.iter().find(|h| !h.before.is_empty()).unwrap();
            return (
                ChangeKind::DeleteChars,
                h.before.start as usize,
                h.before.end as usize,
            );
        }
        return (ChangeKind::Modification, 0, 0);
    }

    // One insert and one delete with equal parts: a replacement, unless the
    // changed spans look too different to overlay inline.
    if insertions == 1 && deletions == 1 && has_equal {
        let del_hunk = hunks.iter().find(|h| !h.before.is_empty()).unwrap();
        let ins_hunk = hunks.iter().find(|h| !h.after.is_empty()).unwrap();
        let deleted_text = &old_line[del_hunk.before.start as usize..del_hunk.before.end as usize];
        let inserted_text = &new_line[ins_hunk.after.start as usize..ins_hunk.after.end as usize];

        let del_words = deleted_text.split_whitespace().count();
        let ins_words = inserted_text.split_whitespace().count();
        if del_words > 2 || ins_words > 2 || del_words.abs_diff(ins_words) > 1 {
            return (ChangeKind::Modification, 0, 0);
        }

        let ratio = inserted_text.len() as f64 / deleted_text.len() as f64;
        let out_of_range = if del_words == 1 && ins_words == 1 {
            // Single-word swaps tolerate a wider length spread.
            !(1.0 / 3.0..=3.0).contains(&ratio)
        } else {
            !(0.5..=2.0).contains(&ratio)
        };
        if out_of_range {
            return (ChangeKind::Modification, 0, 0);
        }

        return (
            ChangeKind::ReplaceChars,
            ins_hunk.after.start as usize,
            ins_hunk.after.end as usize,
        );
    }

    (ChangeKind::Modification, 0, 0)
}

/// Character-level similarity between two lines, 0.0..=1.0: equal bytes over
/// total diff bytes. Empty lines only match each other.
pub fn line_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut input: InternedInput<u8> = InternedInput::default();
    input.update_before(a.bytes());
    input.update_after(b.bytes());
    let diff = Diff::compute(Algorithm::Myers, &input);

    let mut deleted = 0usize;
    let mut inserted = 0usize;
    for h in diff.hunks() {
        deleted += h.before.len();
        inserted += h.after.len();
    }
    let equal = a.len() - deleted;
    let total = equal + deleted + inserted;
    if total == 0 {
        return 0.0;
    }
    equal as f64 / total as f64
}

// ─── Tests ────────────────────────────────────────────────────────────────────

// SPDX-License-Identifier: MIT
//! Request-context trimming.
//!
//! Providers impose line and byte ceilings on input. Trimming always
//! preserves the cursor neighbourhood: first a line window is centered on
//! the cursor, then the window is shrunk symmetrically by bytes, spending
//! half the remaining budget on each side and handing leftovers to the
//! other side.

use crate::model::{DiffEntry, FileDiffHistory};

use super::ContextLimits;

/// Rough estimation: one token ≈ 4 characters.
pub const AVG_CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of a set of lines (newlines included).
pub fn estimate_token_count(lines: &[String]) -> usize {
    if lines.is_empty() {
        return 0;
    }
    let total_chars: usize = lines.iter().map(|l| l.len() + 1).sum();
    total_chars.div_ceil(AVG_CHARS_PER_TOKEN)
}

pub fn chars_from_tokens(tokens: usize) -> usize {
    tokens * AVG_CHARS_PER_TOKEN
}

/// Result of trimming: surviving lines, adjusted cursor, and how many lines
/// were removed from the start (for mapping results back).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimmedContext {
    pub lines: Vec<String>,
    pub cursor_row: usize,
    pub cursor_col: usize,
    pub trim_offset: usize,
}

/// Trim `lines` to the provider's limits, keeping the cursor neighbourhood.
pub fn trim_content_around_cursor(
    lines: &[String],
    cursor_row: usize,
    cursor_col: usize,
    limits: ContextLimits,
) -> TrimmedContext {
    let limits = limits.or_defaults();
    let untrimmed = |cursor_row| TrimmedContext {
        lines: lines.to_vec(),
        cursor_row,
        cursor_col,
        trim_offset: 0,
    };

    if lines.is_empty() {
        return untrimmed(cursor_row);
    }

    let total_bytes: usize = lines.iter().map(|l| l.len() + 1).sum();
    if lines.len() <= limits.max_input_lines && total_bytes <= limits.max_input_bytes {
        return untrimmed(cursor_row);
    }

    let cursor_row = cursor_row.clamp(1, lines.len());
    let cursor_idx = cursor_row - 1;

    // Line window centered on the cursor.
    let effective_max = limits.max_input_lines.min(lines.len());
    let half_window = effective_max / 2;
    let mut start = cursor_idx.saturating_sub(half_window);
    let mut end = (start + effective_max).min(lines.len());
    if end == lines.len() {
        start = end.saturating_sub(effective_max);
    }

    let window_bytes: usize = lines[start..end].iter().map(|l| l.len() + 1).sum();
    if window_bytes > limits.max_input_bytes {
        let (s, e) = shrink_by_bytes(&lines[start..end], cursor_idx - start, limits.max_input_bytes);
        end = start + e;
        start += s;
    }

    TrimmedContext {
        lines: lines[start..end].to_vec(),
        cursor_row: cursor_row - start,
        cursor_col,
        trim_offset: start,
    }
}

/// Shrink a window around the cursor by bytes: half the remaining budget on
/// each side, then spend leftovers on the other side. Returns the surviving
/// subrange as (start, end] indices into the window.
fn shrink_by_bytes(window: &[String], cursor_idx: usize, max_bytes: usize) -> (usize, usize) {
    if window.is_empty() {
        return (0, 0);
    }
    let cursor_idx = cursor_idx.min(window.len() - 1);

    let cursor_bytes = window[cursor_idx].len() + 1;
    let remaining = max_bytes.saturating_sub(cursor_bytes);
    let half = remaining / 2;

    let mut start = cursor_idx;
    let mut bytes_before = 0usize;
    while start > 0 {
        let add = window[start - 1].len() + 1;
        if bytes_before + add > half {
            break;
        }
        start -= 1;
        bytes_before += add;
    }

    let budget_after = half + (half - bytes_before);
    let mut end = cursor_idx;
    let mut bytes_after = 0usize;
    while end + 1 < window.len() {
        let add = window[end + 1].len() + 1;
        if bytes_after + add > budget_after {
            break;
        }
        end += 1;
        bytes_after += add;
    }

    // Unused after-budget flows back to the front.
    let unused_after = budget_after - bytes_after;
    if unused_after > 0 {
        while start > 0 {
            let add = window[start - 1].len() + 1;
            if bytes_before + add > half + unused_after {
                break;
            }
            start -= 1;
            bytes_before += add;
        }
    }

    (start, end + 1)
}

/// Trim committed diff entries to a token budget, keeping the most recent.
pub fn trim_diff_entries(entries: &[DiffEntry], max_tokens: usize) -> Vec<DiffEntry> {
    if entries.is_empty() || max_tokens == 0 {
        return entries.to_vec();
    }
    let max_chars = chars_from_tokens(max_tokens);

    let mut total = 0usize;
    let mut cutoff = 0usize;
    for (i, entry) in entries.iter().enumerate().rev() {
        let entry_chars = entry.original.len() + entry.updated.len();
        if total + entry_chars > max_chars && i < entries.len() - 1 {
            cutoff = i + 1;
            break;
        }
        total += entry_chars;
    }
    entries[cutoff..].to_vec()
}

/// Trim multi-file diff histories under byte and line ceilings, keeping the
/// newest entries of the newest files.
pub fn trim_diff_histories(
    histories: &[FileDiffHistory],
    limits: ContextLimits,
) -> Vec<FileDiffHistory> {
    let limits = limits.or_defaults();
    if histories.is_empty() {
        return Vec::new();
    }

    let entry_cost = |e: &DiffEntry| {
        let bytes = e.original.len() + e.updated.len();
        let lines =
            e.original.matches('\n').count() + e.updated.matches('\n').count() + 2;
        (bytes, lines)
    };

    let mut total_bytes = 0usize;
    let mut total_lines = 0usize;
    for h in histories {
        for e in &h.entries {
            let (b, l) = entry_cost(e);
            total_bytes += b;
            total_lines += l;
        }
    }
    if total_bytes <= limits.max_input_bytes && total_lines <= limits.max_input_lines {
        return histories.to_vec();
    }

    let mut result: Vec<FileDiffHistory> = Vec::new();
    let mut remaining_bytes = limits.max_input_bytes;
    let mut remaining_lines = limits.max_input_lines;

    for h in histories.iter().rev() {
        if remaining_bytes == 0 || remaining_lines == 0 {
            break;
        }
        let mut kept: Vec<DiffEntry> = Vec::new();
        for e in h.entries.iter().rev() {
            let (b, l) = entry_cost(e);
            if b <= remaining_bytes && l <= remaining_lines {
                kept.insert(0, e.clone());
                remaining_bytes -= b;
                remaining_lines -= l;
            }
        }
        if !kept.is_empty() {
            result.insert(
                0,
                FileDiffHistory {
                    file_name: h.file_name.clone(),
                    entries: kept,
                },
            );
        }
    }
    result
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_of(n: usize, width: usize) -> Vec<String> {
        (0..n).map(|i| format!("{i:width$}")).collect()
    }

    fn limits(lines: usize, bytes: usize) -> ContextLimits {
        ContextLimits {
            max_input_lines: lines,
            max_input_bytes: bytes,
        }
    }

    #[test]
    fn token_estimation_rounds_up() {
        assert_eq!(estimate_token_count(&[]), 0);
        assert_eq!(estimate_token_count(&["abc".to_string()]), 1);
        assert_eq!(estimate_token_count(&["abcdefg".to_string()]), 2);
    }

    #[test]
    fn within_limits_is_untouched() {
        let lines = lines_of(10, 8);
        let out = trim_content_around_cursor(&lines, 5, 2, limits(100, 10_000));
        assert_eq!(out.lines, lines);
        assert_eq!(out.cursor_row, 5);
        assert_eq!(out.trim_offset, 0);
    }

    #[test]
    fn line_window_centers_on_cursor() {
        let lines = lines_of(100, 8);
        let out = trim_content_around_cursor(&lines, 50, 0, limits(20, 1_000_000));
        assert_eq!(out.lines.len(), 20);
        // Cursor stays inside the window, roughly central.
        assert!(out.cursor_row >= 1 && out.cursor_row <= 20);
        assert_eq!(out.lines[out.cursor_row - 1], lines[49]);
        assert_eq!(out.trim_offset + out.cursor_row, 50);
    }

    #[test]
    fn window_clamps_at_file_end() {
        let lines = lines_of(100, 8);
        let out = trim_content_around_cursor(&lines, 99, 0, limits(20, 1_000_000));
        assert_eq!(out.lines.len(), 20);
        assert_eq!(out.trim_offset, 80);
        assert_eq!(out.lines[out.cursor_row - 1], lines[98]);
    }

    #[test]
    fn byte_budget_shrinks_around_cursor() {
        // 9-byte lines (8 + newline); budget of 100 bytes keeps ~11 lines.
        let lines = lines_of(50, 8);
        let out = trim_content_around_cursor(&lines, 25, 0, limits(1_000, 100));
        let bytes: usize = out.lines.iter().map(|l| l.len() + 1).sum();
        assert!(bytes <= 100);
        assert!(!out.lines.is_empty());
        assert_eq!(out.lines[out.cursor_row - 1], lines[24]);
    }

    #[test]
    fn leftover_budget_flows_to_other_side() {
        // Cursor on the last line: nothing after it, so the entire after
        // budget returns to the front.
        let lines = lines_of(50, 8);
        let out = trim_content_around_cursor(&lines, 50, 0, limits(1_000, 100));
        let bytes: usize = out.lines.iter().map(|l| l.len() + 1).sum();
        assert!(bytes <= 100);
        assert!(out.lines.len() > 5, "front should absorb the after budget");
        assert_eq!(out.lines.last().unwrap(), &lines[49]);
    }

    #[test]
    fn diff_entries_keep_newest_within_budget() {
        let entries: Vec<DiffEntry> = (0..10)
            .map(|i| DiffEntry {
                original: format!("original number {i} with some length"),
                updated: format!("updated number {i} with some length"),
            })
            .collect();
        // ~68 chars per entry, 17 tokens; budget of 40 tokens keeps 2.
        let kept = trim_diff_entries(&entries, 40);
        assert!(kept.len() < entries.len());
        assert_eq!(kept.last(), entries.last());
    }

    #[test]
    fn diff_entries_zero_budget_means_no_limit() {
        let entries = vec![DiffEntry {
            original: "a".repeat(10_000),
            updated: "b".repeat(10_000),
        }];
        assert_eq!(trim_diff_entries(&entries, 0).len(), 1);
    }

    #[test]
    fn histories_trim_oldest_files_first() {
        let big_entry = DiffEntry {
            original: "x".repeat(300),
            updated: "y".repeat(300),
        };
        let histories = vec![
            FileDiffHistory {
                file_name: "old.rs".into(),
                entries: vec![big_entry.clone()],
            },
            FileDiffHistory {
                file_name: "new.rs".into(),
                entries: vec![big_entry],
            },
        ];
        let out = trim_diff_histories(&histories, limits(1_000, 700));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].file_name, "new.rs");
    }
}

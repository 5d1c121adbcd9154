// SPDX-License-Identifier: MIT
//! Diff → group → stage scenarios driven end-to-end through the text
//! pipeline, covering the canonical flows: single-character appends,
//! grouped modifications, proximity staging, and streamed stage splits.

use tabd::text::{
    analyze_diff, create_stages, cursor_position, group_changes, ChangeKind, GroupKind,
    IncrementalStageBuilder, StagingParams,
};

fn lines(texts: &[&str]) -> Vec<String> {
    texts.iter().map(|s| s.to_string()).collect()
}

fn numbered(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("line {i}")).collect()
}

#[test]
fn single_append_chars_positions_cursor_at_end() {
    let diff = analyze_diff("Hello world", "Hello world!");

    assert_eq!(diff.changes.len(), 1);
    let change = &diff.changes[&1];
    assert_eq!(change.kind, ChangeKind::AppendChars);
    assert_eq!(change.col_start, 11);
    assert_eq!(change.col_end, 12);

    let cursor = cursor_position(&diff.changes, &lines(&["Hello world!"]));
    assert_eq!(cursor, Some((1, 12)));
}

#[test]
fn consecutive_modifications_form_one_group() {
    let old = "function test() {\n    start middle end\n    start middle end\n    start middle end\n}";
    let new = "function test() {\n    beginning middle finish extra\n    beginning middle finish extra\n    beginning middle finish extra\n}";
    let diff = analyze_diff(old, new);

    let groups = group_changes(&diff.changes);
    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.kind, GroupKind::Modification);
    assert_eq!((group.start_line, group.end_line), (2, 4));
    assert_eq!(group.lines.len(), 3);
    assert_eq!(group.old_lines.len(), 3);
    // Widest replaced line: "    start middle end".
    assert_eq!(group.max_offset, 20);
}

#[test]
fn proximity_staging_orders_clusters_by_cursor_distance() {
    // Changes at lines 5-7 and 20-21; cursor at 22; threshold 3.
    let old = numbered(25);
    let mut new = old.clone();
    for i in [5usize, 6, 7, 20, 21] {
        new[i - 1] = format!("rewritten {i}");
    }
    let diff = analyze_diff(&old.join("\n"), &new.join("\n"));

    let result = create_stages(
        &diff,
        &old,
        &new,
        &StagingParams {
            cursor_row: 22,
            cursor_col: 0,
            viewport_top: 1,
            viewport_bottom: 50,
            base_offset: 1,
            proximity_threshold: 3,
            file_path: "src/lib.rs",
        },
    )
    .expect("stages");

    assert_eq!(result.stages.len(), 2);
    assert_eq!(result.stages[0].buffer_start, 20);
    assert_eq!(result.stages[1].buffer_start, 5);
    assert!(!result.stages[0].is_last_stage);
    assert!(result.stages[1].is_last_stage);

    let first_target = result.stages[0].cursor_target.as_ref().unwrap();
    assert_eq!(first_target.line, 5);
    assert!(!first_target.should_retrigger);

    let last_target = result.stages[1].cursor_target.as_ref().unwrap();
    assert_eq!(last_target.line, 7);
    assert!(last_target.should_retrigger);
}

#[test]
fn streamed_stages_split_on_buffer_gap() {
    // Old buffer of 20 lines; the stream matches, changes line 3, runs
    // through four equal lines (gap 4 > threshold 3), then changes line 8.
    let old = numbered(20);
    let mut builder = IncrementalStageBuilder::new(old, 1, 3, 0, 0, 0, 1, 0, "src/lib.rs");

    let mut closed = Vec::new();
    for i in 1..=8 {
        let line = if i == 3 || i == 8 {
            format!("line {i} changed")
        } else {
            format!("line {i}")
        };
        if let Some(stage) = builder.add_line(&line) {
            closed.push(stage);
        }
    }
    assert_eq!(closed.len(), 1, "first stage closes at the gap");
    assert_eq!(closed[0].buffer_start, 3);

    let result = builder.finalize().expect("stages");
    assert_eq!(result.stages.len(), 2);
    let starts: Vec<usize> = result.stages.iter().map(|s| s.buffer_start).collect();
    assert!(starts.contains(&3));
    assert!(starts.contains(&8));
}

#[test]
fn only_deletions_yield_no_cursor() {
    let diff = analyze_diff("keep\ndrop me\nkeep too", "keep\nkeep too");
    assert!(diff.is_only_deletions());
    assert_eq!(cursor_position(&diff.changes, &lines(&["keep", "keep too"])), None);
}

#[test]
fn empty_diff_produces_no_stages() {
    let old = numbered(5);
    let diff = analyze_diff(&old.join("\n"), &old.join("\n"));
    assert!(create_stages(
        &diff,
        &old,
        &old,
        &StagingParams {
            cursor_row: 1,
            cursor_col: 0,
            viewport_top: 0,
            viewport_bottom: 0,
            base_offset: 1,
            proximity_threshold: 3,
            file_path: "src/lib.rs",
        },
    )
    .is_none());
}

#[test]
fn stream_and_batch_agree_on_mixed_edits() {
    // A modification, a nearby insertion, and a far-away rewrite: both
    // paths must carve the same stage ranges out of the same inputs.
    let old = numbered(30);
    let mut new = old.clone();
    new[9] = "line 10 adjusted".into();
    new.insert(10, "zzz qqq vvv".into());
    new[25] = "line 25 adjusted".into();

    let mut builder =
        IncrementalStageBuilder::new(old.clone(), 1, 3, 0, 0, 0, 1, 0, "src/lib.rs");
    for line in &new {
        builder.add_line(line);
    }
    let streamed = builder.finalize().expect("streamed stages");

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
            file_path: "src/lib.rs",
        },
    )
    .expect("batch stages");

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

    // Applying every stage in staged order — shifting later stages the way
    // an accept does when a stage changes the line count — reproduces the
    // new text exactly.
    let mut buffer = old.clone();
    let mut shifts: Vec<(usize, isize)> = Vec::new();
    for stage in &batch.stages {
        let offset: isize = shifts
            .iter()
            .filter(|(end, _)| *end < stage.buffer_start)
            .map(|(_, d)| d)
            .sum();
        let start = (stage.buffer_start as isize + offset) as usize;
        let end = (stage.buffer_end as isize + offset) as usize;
        if stage.is_insertion {
            for (k, line) in stage.lines.iter().enumerate() {
                buffer.insert(start - 1 + k, line.clone());
            }
            shifts.push((stage.buffer_start - 1, stage.lines.len() as isize));
        } else {
            buffer.splice(start - 1..end, stage.lines.iter().cloned());
            let replaced = stage.buffer_end - stage.buffer_start + 1;
            shifts.push((stage.buffer_end, stage.lines.len() as isize - replaced as isize));
        }
    }
    assert_eq!(buffer, new);
}

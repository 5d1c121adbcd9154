// SPDX-License-Identifier: MIT
//! Text analysis: line diffing, render grouping, and stage construction.
//!
//! The pipeline turns an (old text, new text) pair — or a stream of new
//! lines — into ordered [`Stage`]s the editor shows one at a time.

mod diff;
mod grouping;
mod incremental;
mod staging;

pub use diff::{
    analyze_diff, categorize_line_change, line_similarity, ChangeKind, DiffResult, GroupKind,
    LineChange, LineMapping, RenderHint, SIMILARITY_THRESHOLD,
};
pub use grouping::{
    cursor_position, downgrade_hints_for_cursor, finalize_stage_groups, group_changes, Group,
    StageContext,
};
pub use incremental::{
    recover_truncated_lines, IncrementalDiffBuilder, IncrementalStageBuilder,
    EXPECTED_POSITION_SIMILARITY,
};
pub use staging::{
    create_stages, find_first_changed_line, stage_needs_navigation, Stage, StagedCompletion,
    StagingParams, StagingResult,
};

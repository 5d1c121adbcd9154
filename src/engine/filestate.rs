// SPDX-License-Identifier: MIT
//! Per-file state: saving and restoring edit context across file switches.
//!
//! At most two files are remembered, evicted by last access. Restoring is
//! guarded by a cheap validity check so stale context never poisons a file
//! that changed on disk while it was out of view.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{DiffEntry, RecentBufferSnapshot};

use super::Engine;

/// How many files keep saved state.
const MAX_FILE_STATES: usize = 2;

/// Saved edit context for one file.
#[derive(Debug, Clone)]
pub struct FileState {
    pub previous_lines: Vec<String>,
    pub original_lines: Vec<String>,
    pub diff_histories: Vec<DiffEntry>,
    pub last_access: DateTime<Utc>,
    pub version: u64,
}

impl Engine {
    /// Pull fresh editor state, saving and restoring per-file context when
    /// the active file changed.
    pub(super) fn sync_buffer(&mut self) {
        let snap = self.editor.snapshot();
        let switching = snap.path != self.buffer.path();
        if switching && !self.buffer.path().is_empty() {
            self.save_current_file_state();
        }

        let outcome = self.buffer.apply_snapshot(snap);
        if outcome.buffer_changed {
            debug!(old = %outcome.old_path, new = %outcome.new_path, "file switch");
            self.restore_file_state(&outcome.new_path);
        }
    }

    fn save_current_file_state(&mut self) {
        let state = FileState {
            previous_lines: self.buffer.previous_lines().to_vec(),
            original_lines: self.buffer.original_lines().to_vec(),
            diff_histories: self.buffer.diff_histories().to_vec(),
            last_access: self.clock.now(),
            version: self.buffer.version(),
        };
        self.file_states
            .insert(self.buffer.path().to_string(), state);
        self.trim_file_states();
    }

    fn restore_file_state(&mut self, path: &str) {
        let now = self.clock.now();
        let restorable = match self.file_states.get_mut(path) {
            Some(state) if file_state_valid(state, self.buffer.lines()) => {
                state.last_access = now;
                Some((
                    state.previous_lines.clone(),
                    state.original_lines.clone(),
                    state.diff_histories.clone(),
                ))
            }
            Some(_) => {
                debug!(path, "saved file state no longer valid, dropping");
                self.file_states.remove(path);
                None
            }
            None => None,
        };
        if let Some((previous, original, diffs)) = restorable {
            self.buffer.set_file_context(previous, original, diffs);
        }
    }

    fn trim_file_states(&mut self) {
        if self.file_states.len() <= MAX_FILE_STATES {
            return;
        }
        let mut entries: Vec<(String, DateTime<Utc>)> = self
            .file_states
            .iter()
            .map(|(path, state)| (path.clone(), state.last_access))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        for (path, _) in entries.into_iter().skip(MAX_FILE_STATES) {
            self.file_states.remove(&path);
        }
    }

    /// Buffers recently seen in other files, sent as cross-file context.
    pub(super) fn recent_buffer_snapshots(&self) -> Vec<RecentBufferSnapshot> {
        let mut snapshots: Vec<RecentBufferSnapshot> = self
            .file_states
            .iter()
            .filter(|(path, state)| {
                path.as_str() != self.buffer.path() && !state.previous_lines.is_empty()
            })
            .map(|(path, state)| RecentBufferSnapshot {
                file_path: path.clone(),
                lines: state.previous_lines.clone(),
                timestamp_ms: state.last_access.timestamp_millis(),
            })
            .collect();
        snapshots.sort_by_key(|s| std::cmp::Reverse(s.timestamp_ms));
        snapshots
    }
}

/// A saved state is restorable when the file has not drifted too far: line
/// count within max(10%, 10) of the saved original, and at least half of a
/// three-point sample {first, middle, last} still matching.
fn file_state_valid(state: &FileState, current_lines: &[String]) -> bool {
    if state.original_lines.is_empty() {
        return false;
    }

    let orig_len = state.original_lines.len();
    let curr_len = current_lines.len();
    let drift = orig_len.abs_diff(curr_len);
    if drift > (orig_len / 10).max(10) {
        return false;
    }

    let mut check_indices = vec![0usize];
    if curr_len > 2 {
        check_indices.push(curr_len / 2);
        check_indices.push(curr_len - 1);
    }

    let mut mismatches = 0;
    for &i in &check_indices {
        if let (Some(orig), Some(curr)) = (state.original_lines.get(i), current_lines.get(i)) {
            if orig != curr {
                mismatches += 1;
            }
        }
    }
    mismatches <= check_indices.len() / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_of(lines: &[&str]) -> FileState {
        FileState {
            previous_lines: lines.iter().map(|s| s.to_string()).collect(),
            original_lines: lines.iter().map(|s| s.to_string()).collect(),
            diff_histories: Vec::new(),
            last_access: Utc::now(),
            version: 1,
        }
    }

    fn lines(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identical_content_is_valid() {
        let state = state_of(&["a", "b", "c", "d"]);
        assert!(file_state_valid(&state, &lines(&["a", "b", "c", "d"])));
    }

    #[test]
    fn empty_original_is_invalid() {
        let state = state_of(&[]);
        assert!(!file_state_valid(&state, &lines(&["a"])));
    }

    #[test]
    fn large_line_drift_is_invalid() {
        let state = state_of(&["x"; 20]);
        let grown: Vec<String> = (0..40).map(|i| format!("l{i}")).collect();
        assert!(!file_state_valid(&state, &grown));
    }

    #[test]
    fn small_drift_with_matching_sample_is_valid() {
        let mut original: Vec<&str> = vec!["same"; 30];
        original[10] = "edited elsewhere";
        let state = state_of(&original);
        // Two extra lines appended: drift 2 <= 10, sample points 0, mid,
        // last — mid/last shifted but content identical everywhere.
        let mut current = lines(&original);
        current.push("extra 1".into());
        current.push("extra 2".into());
        assert!(file_state_valid(&state, &current));
    }

    #[test]
    fn majority_sample_mismatch_is_invalid() {
        let state = state_of(&["a", "b", "c", "d", "e"]);
        let current = lines(&["x", "b", "y", "d", "z"]);
        // Sample {0, 2, 4} all mismatch.
        assert!(!file_state_valid(&state, &current));
    }
}

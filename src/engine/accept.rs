// SPDX-License-Identifier: MIT
//! Accept paths: full stage accept, partial accept, cursor-target jumps,
//! and the prefetch interplay after an accept.

use tracing::{debug, error};

use crate::config::WordCharPredicate;
use crate::metrics::MetricEventKind;
use crate::model::{CompletionResponse, CompletionSource, CursorTarget};
use crate::text::{GroupKind, RenderHint};

use super::{Engine, EngineState, PrefetchState};

/// What became of a ready prefetch when the engine tried to use it.
enum PrefetchResolution {
    /// The prefetched completion is on screen.
    Shown,
    /// Too far from the cursor; a jump indicator points at its first change
    /// and the prefetch stays ready.
    TargetShown,
    /// No changes beyond what was just applied; discarded.
    Stale,
    /// There was nothing to resolve.
    NoData,
}

impl Engine {
    // ─── Full accept ──────────────────────────────────────────────────────

    pub(super) fn do_accept_completion(&mut self) {
        let applied = self
            .completions
            .first()
            .map(|c| (c.start_line, c.end_line_inc));

        if let Some(batch) = self.apply_batch.take() {
            if let Err(err) = batch.execute() {
                error!(%err, "error applying completion");
            }
        }
        self.buffer.commit_pending_edit();
        self.clear_shown_completion();
        let shift_info = self.shown_stage_applied.take();

        // Staged completion with stages left: advance and navigate.
        let mut advanced = false;
        if let Some(staged) = self.staged.as_mut() {
            staged.current_idx += 1;
            if let Some((applied_end, delta)) = shift_info {
                staged.shift_after(applied_end, delta);
            }
            advanced = staged.current_idx < staged.stages.len();
        }
        if let Some((applied_end, delta)) = shift_info {
            if let Some(target) = self.cursor_target.as_mut() {
                if target.line > applied_end {
                    target.line = (target.line as isize + delta).max(1) as usize;
                }
            }
        }
        if advanced {
            self.sync_buffer();
            self.maybe_prefetch_for_last_stage();
            self.handle_cursor_target();
            return;
        }

        // Final stage (or unstaged completion) consumed.
        self.staged = None;
        self.stream_provisional = false;
        self.report_metric(MetricEventKind::Accepted);

        if self.prefetch_state == PrefetchState::Ready {
            match self.resolve_ready_prefetch(applied) {
                PrefetchResolution::Shown | PrefetchResolution::TargetShown => return,
                PrefetchResolution::Stale | PrefetchResolution::NoData => {}
            }
        }

        if self.prefetch_state.in_flight() {
            // Let the in-flight prefetch finish the job; a Tab on the jump
            // indicator completes smoothly when it lands.
            self.prefetch_state = PrefetchState::WaitingForTab;
            self.state = EngineState::Idle;
            return;
        }

        if let Some(target) = self.cursor_target.clone() {
            if target.should_retrigger {
                self.sync_buffer();
                self.request_prefetch(
                    target.line.max(1),
                    0,
                    PrefetchState::WaitingForCursorPrediction,
                );
            }
        }
        self.handle_cursor_target();
    }

    /// When an accept advances into the last stage and that stage asks for a
    /// retrigger, issue the prefetch one step early so the paint after the
    /// final accept is latency-hidden.
    fn maybe_prefetch_for_last_stage(&mut self) {
        if self.prefetch_state != PrefetchState::None {
            return;
        }
        let Some(staged) = self.staged.as_ref() else {
            return;
        };
        if staged.remaining_after_current() != 0 {
            return;
        }
        let Some(target) = staged
            .current()
            .and_then(|s| s.cursor_target.clone())
            .filter(|t| t.should_retrigger)
        else {
            return;
        };
        self.request_prefetch(
            target.line.max(1),
            0,
            PrefetchState::WaitingForCursorPrediction,
        );
    }

    // ─── Cursor-target accept ─────────────────────────────────────────────

    pub(super) fn do_accept_cursor_target(&mut self) {
        let Some(target) = self.cursor_target.clone() else {
            return;
        };

        if let Err(err) = self
            .editor
            .move_cursor_to_start_of_line(target.line, true, true)
        {
            error!(%err, line = target.line, "error moving cursor");
        }
        self.editor.clear_ui();

        // A staged completion introduced by navigation: show its stage now.
        if self
            .staged
            .as_ref()
            .and_then(|s| s.current())
            .is_some()
        {
            self.sync_buffer();
            self.show_current_stage();
            return;
        }

        if self.prefetch_state == PrefetchState::Ready {
            if let Some(response) = self.prefetched.take() {
                self.prefetch_state = PrefetchState::None;
                self.sync_buffer();
                if self.show_completion_response(&response) {
                    return;
                }
                debug!("prefetched completion carries no changes");
                self.handle_cursor_target();
                return;
            }
            self.prefetch_state = PrefetchState::None;
        }

        if self.prefetch_state.in_flight() {
            self.prefetch_state = PrefetchState::WaitingForTab;
            return;
        }

        self.cursor_target = None;
        if target.should_retrigger {
            self.request_completion(CompletionSource::Typing);
            return;
        }
        self.state = EngineState::Idle;
    }

    /// Continue a Tab that was deferred while the prefetch was in flight.
    pub(super) fn handle_deferred_cursor_target(&mut self) {
        let Some(target) = self.cursor_target.clone() else {
            return;
        };

        if let Some(response) = self.prefetched.take() {
            self.prefetch_state = PrefetchState::None;
            if !response.completions.is_empty() {
                self.sync_buffer();
                if self.show_completion_response(&response) {
                    return;
                }
                debug!("deferred prefetched completion carries no changes");
            }
        }

        self.cursor_target = None;
        if target.should_retrigger {
            self.request_completion(CompletionSource::Typing);
            return;
        }
        self.state = EngineState::Idle;
    }

    // ─── Prefetch arrival ─────────────────────────────────────────────────

    pub(super) fn handle_prefetch_ready(&mut self, seq: u64, response: CompletionResponse) {
        if !self.is_current_prefetch(seq) {
            debug!(seq, "stale prefetch result dropped");
            return;
        }
        self.prefetch_request = None;
        self.prefetched = Some(response);

        match self.prefetch_state {
            PrefetchState::WaitingForTab => {
                self.prefetch_state = PrefetchState::Ready;
                self.handle_deferred_cursor_target();
            }
            PrefetchState::WaitingForCursorPrediction => {
                if self.state == EngineState::HasCompletion {
                    // The user produced a new completion first; keep the
                    // prefetch ready without interrupting.
                    self.prefetch_state = PrefetchState::Ready;
                    return;
                }
                self.prefetch_state = PrefetchState::Ready;
                self.resolve_ready_prefetch(None);
            }
            _ => {
                self.prefetch_state = PrefetchState::Ready;
                if self.state == EngineState::HasCursorTarget {
                    self.resolve_ready_prefetch(None);
                }
            }
        }
    }

    /// Decide what a ready prefetch means right now: show it when its first
    /// real change is close to the cursor, point a jump indicator at it
    /// when far, or discard it when the just-applied range already covers
    /// everything it would do.
    fn resolve_ready_prefetch(&mut self, applied: Option<(usize, usize)>) -> PrefetchResolution {
        let Some(response) = self.prefetched.clone() else {
            self.prefetch_state = PrefetchState::None;
            return PrefetchResolution::NoData;
        };
        let Some(comp) = response.completions.first() else {
            self.prefetched = None;
            self.prefetch_state = PrefetchState::None;
            return PrefetchResolution::Stale;
        };

        let within_applied = |line: usize| {
            applied.is_some_and(|(start, end)| line >= start && line <= end)
        };

        let span = comp
            .lines
            .len()
            .max(comp.end_line_inc.saturating_sub(comp.start_line) + 1);
        let mut first_changed = None;
        for i in 0..span {
            let buffer_line = comp.start_line + i;
            let existing = self.buffer.lines().get(buffer_line - 1);
            let proposed = comp.lines.get(i);
            let differs = match (existing, proposed) {
                (Some(a), Some(b)) => a != b,
                (None, None) => false,
                _ => true,
            };
            if differs && !within_applied(buffer_line) {
                first_changed = Some(buffer_line);
                break;
            }
        }

        let Some(first_changed) = first_changed else {
            // Nothing beyond the applied stage: stale, discard.
            debug!("prefetch overlaps applied stage, discarding");
            self.prefetched = None;
            self.prefetch_state = PrefetchState::None;
            return PrefetchResolution::Stale;
        };

        let distance = self.buffer.row().abs_diff(first_changed);
        if distance <= self.config.cursor_prediction.proximity_threshold {
            self.sync_buffer();
            self.prefetched = None;
            self.prefetch_state = PrefetchState::None;
            if self.show_completion_response(&response) {
                return PrefetchResolution::Shown;
            }
            return PrefetchResolution::Stale;
        }

        self.cursor_target = Some(CursorTarget {
            path: self.buffer.path().to_string(),
            line: first_changed,
            should_retrigger: false,
        });
        self.state = EngineState::HasCursorTarget;
        self.editor.show_cursor_target(first_changed);
        self.prefetch_state = PrefetchState::Ready;
        PrefetchResolution::TargetShown
    }

    // ─── Partial accept ───────────────────────────────────────────────────

    /// Accept one group of the shown stage without consuming the whole
    /// stage. Cursor targets are never touched here: a full accept after
    /// any number of partials lands on the same target.
    pub(super) fn do_partial_accept(&mut self) {
        if self.state != EngineState::HasCompletion {
            return;
        }
        if self.completions.is_empty() || self.current_groups.is_empty() {
            return;
        }
        if self.current_is_insertion {
            // An insertion point has no per-line footing in the buffer;
            // consume it whole.
            self.do_accept_completion();
            return;
        }
        self.sync_buffer();

        let group = self.current_groups[0].clone();
        if group.render_hint == Some(RenderHint::AppendChars) {
            let target_text = group.lines.first().cloned().unwrap_or_default();
            let col = self.buffer.col();
            let insert = partial_accept_slice(&target_text, col, &self.config.word_chars);
            if !insert.is_empty() {
                self.editor.insert_text(&insert);
            }
            if col + insert.len() < target_text.len() {
                // Ghost text remains past the inserted word.
                return;
            }
            self.current_groups.remove(0);
        } else {
            self.consume_leading_line(&group.kind);
        }

        if self.current_groups.is_empty() {
            self.finish_partial_accept();
        }
    }

    /// Replace one buffer line with the completion's first line and shift
    /// all bookkeeping by one consumed line.
    fn consume_leading_line(&mut self, group_kind: &GroupKind) {
        let Some(comp) = self.completions.first_mut() else {
            return;
        };
        if comp.lines.is_empty() {
            self.current_groups.clear();
            return;
        }

        let content = comp.lines.remove(0);
        let line = comp.start_line;
        comp.start_line += 1;
        if *group_kind == GroupKind::Addition {
            // An addition grows the buffer under the remaining range.
            comp.end_line_inc += 1;
        }
        self.editor.replace_line(line, &content);

        if !self.completion_original_lines.is_empty() {
            self.completion_original_lines.remove(0);
        }

        let mut pop_leading = false;
        for (idx, g) in self.current_groups.iter_mut().enumerate() {
            if g.start_line > 1 {
                g.start_line -= 1;
                g.end_line -= 1;
            } else if idx == 0 {
                // The consumed line was the leading group's first line.
                if !g.lines.is_empty() {
                    g.lines.remove(0);
                }
                if !g.old_lines.is_empty() {
                    g.old_lines.remove(0);
                }
                g.buffer_line += 1;
                g.end_line = g.end_line.saturating_sub(1).max(1);
                pop_leading = g.lines.is_empty();
            }
        }
        if pop_leading {
            self.current_groups.remove(0);
        }
    }

    /// The shown stage has no groups left: the stage is fully applied.
    fn finish_partial_accept(&mut self) {
        self.buffer.commit_pending_edit();
        self.sync_buffer();
        self.editor.clear_ui();
        self.completions.clear();
        self.apply_batch = None;
        self.completion_original_lines.clear();
        let shift_info = self.shown_stage_applied.take();

        let mut advanced = false;
        if let Some(staged) = self.staged.as_mut() {
            staged.current_idx += 1;
            if let Some((applied_end, delta)) = shift_info {
                staged.shift_after(applied_end, delta);
            }
            advanced = staged.current_idx < staged.stages.len();
        }
        if let Some((applied_end, delta)) = shift_info {
            if let Some(target) = self.cursor_target.as_mut() {
                if target.line > applied_end {
                    target.line = (target.line as isize + delta).max(1) as usize;
                }
            }
        }
        if advanced {
            // Partial accepts flow straight into the next stage.
            self.show_current_stage();
            self.maybe_prefetch_for_last_stage();
            return;
        }

        self.staged = None;
        self.stream_provisional = false;
        self.report_metric(MetricEventKind::Accepted);

        if let Some(target) = self.cursor_target.clone() {
            if target.should_retrigger && !self.prefetch_state.in_flight() {
                self.request_prefetch(
                    target.line.max(1),
                    0,
                    PrefetchState::WaitingForCursorPrediction,
                );
            }
        }
        self.handle_cursor_target();
    }

    // ─── Typing matches prediction ────────────────────────────────────────

    /// Whether the buffer content is a valid prefix of the shown completion.
    /// Returns (matches, has_remaining).
    pub(super) fn check_typing_matches_prediction(&self) -> (bool, bool) {
        let Some(comp) = self.completions.first() else {
            return (false, false);
        };
        if self.completion_original_lines.is_empty()
            || comp.lines.len() != self.completion_original_lines.len()
        {
            // Line-count changes (deletions, insertions) are not typable.
            return (false, false);
        }

        let mut has_remaining = false;
        for (i, target) in comp.lines.iter().enumerate() {
            let Some(buffer_line) = self.buffer.lines().get(comp.start_line - 1 + i) else {
                return (false, false);
            };
            let original = &self.completion_original_lines[i];
            if buffer_line.len() < original.len() || !target.starts_with(buffer_line.as_str()) {
                return (false, false);
            }
            if buffer_line != target {
                has_remaining = true;
            }
        }
        (true, has_remaining)
    }

    /// The user typed part of the prediction: move the ghost text forward
    /// instead of issuing a new request.
    pub(super) fn refresh_ghost_text(&mut self) {
        self.sync_buffer();
        let Some(comp) = self.completions.first().cloned() else {
            return;
        };

        // Advance the hint past what is now typed.
        if let Some(group) = self.current_groups.first_mut() {
            if group.render_hint == Some(RenderHint::AppendChars) {
                let typed = self
                    .buffer
                    .lines()
                    .get(comp.start_line - 1)
                    .map(|l| l.len())
                    .unwrap_or(group.col_start);
                group.col_start = typed.min(group.col_end);
            }
        }

        self.apply_batch = Some(self.buffer.on_completion_ready(
            self.editor.as_ref(),
            comp.start_line,
            comp.end_line_inc,
            &comp.lines,
            self.current_is_insertion,
        ));
    }
}

/// The slice of `target` a single partial accept inserts when the cursor
/// sits at byte `col`: an identifier run plus its trailing whitespace, a
/// whitespace run, or exactly one other byte.
pub(super) fn partial_accept_slice(target: &str, col: usize, word_chars: &WordCharPredicate) -> String {
    if col >= target.len() {
        return String::new();
    }
    let is_word = word_chars.as_ref();
    let rest = &target[col..];
    let Some(first) = rest.chars().next() else {
        return String::new();
    };

    let mut end = 0;
    if is_word(first) {
        for c in rest.chars() {
            if is_word(c) {
                end += c.len_utf8();
            } else {
                break;
            }
        }
        for c in rest[end..].chars() {
            if c.is_whitespace() {
                end += c.len_utf8();
            } else {
                break;
            }
        }
    } else if first.is_whitespace() {
        for c in rest.chars() {
            if c.is_whitespace() {
                end += c.len_utf8();
            } else {
                break;
            }
        }
    } else {
        end = first.len_utf8();
    }
    rest[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn default_words() -> WordCharPredicate {
        Arc::new(|c: char| c.is_ascii_alphanumeric() || c == '_')
    }

    #[test]
    fn append_slice_takes_word_and_trailing_space() {
        let words = default_words();
        assert_eq!(partial_accept_slice("function foo()", 4, &words), "tion ");
        assert_eq!(partial_accept_slice("function foo()", 6, &words), "on ");
    }

    #[test]
    fn append_slice_takes_single_punctuation() {
        let words = default_words();
        assert_eq!(partial_accept_slice("foo.bar.baz", 3, &words), ".");
        assert_eq!(partial_accept_slice("hello!", 5, &words), "!");
    }

    #[test]
    fn append_slice_takes_whitespace_run() {
        let words = default_words();
        assert_eq!(partial_accept_slice("a   bcd", 1, &words), "   ");
    }

    #[test]
    fn append_slice_empty_past_end() {
        let words = default_words();
        assert_eq!(partial_accept_slice("abc", 3, &words), "");
        assert_eq!(partial_accept_slice("abc", 9, &words), "");
    }

    #[test]
    fn custom_predicate_changes_boundaries() {
        let words: WordCharPredicate = Arc::new(|c: char| c.is_ascii_alphanumeric() || c == '-');
        assert_eq!(partial_accept_slice("kebab-case-name", 5, &words), "-case-name");
    }
}

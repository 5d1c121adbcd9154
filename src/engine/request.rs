// SPDX-License-Identifier: MIT
//! Request, prefetch, and stream workers.
//!
//! Workers run as spawned tasks under the completion timeout. They own the
//! provider call (and, for streams, the incremental stage builder) and post
//! sequence-tagged events back to the engine; they never touch engine state.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::model::{CompletionRequest, CompletionSource, FileDiffHistory};
use crate::provider::{
    FinishReason, LineEvent, PreparedStream, Provider, ProviderError,
};
use crate::text::{
    recover_truncated_lines, stage_needs_navigation, IncrementalStageBuilder, Stage,
    StagedCompletion, StagingResult,
};

use super::{
    CompletionOutcome, Engine, EngineState, Event, PrefetchState, RequestHandle,
};

/// Staging inputs a stream worker needs, snapshotted under the engine lock
/// before the worker spawns.
#[derive(Debug, Clone)]
struct StreamParams {
    proximity_threshold: usize,
    max_visible_lines: usize,
    viewport_top: usize,
    viewport_bottom: usize,
    cursor_row: usize,
    cursor_col: usize,
    file_path: String,
}

impl Engine {
    pub(super) fn request_completion(&mut self, source: CompletionSource) {
        if self.stopped {
            return;
        }
        if let Some(req) = self.current_request.take() {
            req.cancel();
        }

        self.state = EngineState::PendingCompletion;
        self.stream_provisional = false;
        self.sync_buffer();

        let request = self.build_request(source, None);
        let stream_params = StreamParams {
            proximity_threshold: self.config.cursor_prediction.proximity_threshold,
            max_visible_lines: self.config.max_visible_lines,
            viewport_top: request.viewport_top,
            viewport_bottom: request.viewport_bottom,
            cursor_row: request.cursor_row,
            cursor_col: request.cursor_col,
            file_path: request.file_path.clone(),
        };

        self.request_seq += 1;
        let seq = self.request_seq;
        let tx = self.events_tx.clone();
        let provider = Arc::clone(&self.provider);
        let timeout = self.config.completion_timeout;

        let task = tokio::spawn(async move {
            let work = run_completion_worker(provider, request, seq, tx.clone(), stream_params);
            if tokio::time::timeout(timeout, work).await.is_err() {
                let _ = tx.send(Event::CompletionError {
                    seq,
                    error: ProviderError::Transient("completion timed out".into()),
                });
            }
        });
        self.current_request = Some(RequestHandle { seq, task });
    }

    /// Speculative request for a predicted cursor position; does not change
    /// the main state. `target_state` is the prefetch sub-state to enter.
    pub(super) fn request_prefetch(
        &mut self,
        override_row: usize,
        override_col: usize,
        target_state: PrefetchState,
    ) {
        if self.stopped {
            return;
        }
        if let Some(req) = self.prefetch_request.take() {
            req.cancel();
        }
        self.sync_buffer();
        self.prefetched = None;
        self.prefetch_state = target_state;

        let request = self.build_request(
            CompletionSource::Typing,
            Some((override_row.max(1), override_col)),
        );

        self.request_seq += 1;
        let seq = self.request_seq;
        let tx = self.events_tx.clone();
        let provider = Arc::clone(&self.provider);
        let timeout = self.config.completion_timeout;

        let task = tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, provider.get_completion(&request)).await;
            let event = match result {
                Ok(Ok(response)) => Event::PrefetchReady {
                    seq,
                    response: Box::new(response),
                },
                Ok(Err(error)) => Event::PrefetchError { seq, error },
                Err(_) => Event::PrefetchError {
                    seq,
                    error: ProviderError::Transient("prefetch timed out".into()),
                },
            };
            let _ = tx.send(event);
        });
        self.prefetch_request = Some(RequestHandle { seq, task });
    }

    pub(super) fn build_request(
        &self,
        source: CompletionSource,
        override_cursor: Option<(usize, usize)>,
    ) -> CompletionRequest {
        let (cursor_row, cursor_col) =
            override_cursor.unwrap_or((self.buffer.row(), self.buffer.col()));
        CompletionRequest {
            source,
            workspace_path: self.workspace_path.clone(),
            workspace_id: self.workspace_id.clone(),
            file_path: self.buffer.path().to_string(),
            lines: self.buffer.lines().to_vec(),
            previous_lines: self.buffer.previous_lines().to_vec(),
            version: self.buffer.version(),
            cursor_row,
            cursor_col,
            viewport_top: self.buffer.viewport_top(),
            viewport_bottom: self.buffer.viewport_bottom(),
            file_diff_histories: self.diff_histories_for_request(),
            recent_buffer_snapshots: self.recent_buffer_snapshots(),
            linter_errors: self.buffer.linter_errors(self.editor.as_ref()),
            extra_context: self.editor.context_blobs(),
        }
    }

    fn diff_histories_for_request(&self) -> Vec<FileDiffHistory> {
        if self.buffer.path().is_empty() || self.buffer.diff_histories().is_empty() {
            return Vec::new();
        }
        let mut entries = self.buffer.diff_histories().to_vec();
        if self.config.max_diff_tokens > 0 {
            entries = crate::provider::trim::trim_diff_entries(&entries, self.config.max_diff_tokens);
        }
        if entries.is_empty() {
            return Vec::new();
        }
        vec![FileDiffHistory {
            file_name: self.buffer.path().to_string(),
            entries,
        }]
    }

    // ─── Result handling ──────────────────────────────────────────────────

    pub(super) fn handle_completion_ready(&mut self, seq: u64, outcome: CompletionOutcome) {
        if !self.is_current_request(seq) {
            debug!(seq, "stale completion result dropped");
            return;
        }
        self.current_request = None;

        match outcome {
            CompletionOutcome::Batch(response) => {
                if self.show_completion_response(&response) {
                    return;
                }
                // No completions or nothing differs from the buffer: fall
                // back to the response's cursor target; with auto-advance
                // on, a no-op completion jumps to its last line and
                // retriggers there.
                let auto_advance = self.config.cursor_prediction.enabled
                    && self.config.cursor_prediction.auto_advance;
                self.cursor_target = response.cursor_target.clone().or_else(|| {
                    response
                        .completions
                        .first()
                        .filter(|_| auto_advance)
                        .map(|c| crate::model::CursorTarget {
                            path: self.buffer.path().to_string(),
                            line: c.end_line_inc,
                            should_retrigger: true,
                        })
                });
                self.handle_cursor_target();
            }
            CompletionOutcome::Staged { result, metrics } => {
                self.record_metrics_info(metrics);
                self.adopt_final_staging(result);
            }
            CompletionOutcome::Empty => {
                if self.state == EngineState::PendingCompletion {
                    self.clear_to_idle();
                }
            }
        }
    }

    /// A stage finalized mid-stream: paint it right away so the user can
    /// start accepting before the stream ends.
    pub(super) fn handle_stream_stage(&mut self, seq: u64, stage: Stage) {
        if !self.is_current_request(seq) {
            return;
        }

        match self.state {
            EngineState::PendingCompletion => {
                let needs_navigation = stage_needs_navigation(
                    &stage,
                    self.buffer.row(),
                    self.buffer.viewport_top(),
                    self.buffer.viewport_bottom(),
                    self.config.cursor_prediction.proximity_threshold,
                );
                self.stream_provisional = true;
                self.show_staging_result(StagingResult {
                    stages: vec![stage],
                    first_needs_navigation: needs_navigation,
                });
            }
            EngineState::HasCompletion | EngineState::HasCursorTarget
                if self.stream_provisional =>
            {
                if let Some(staged) = self.staged.as_mut() {
                    staged.stages.push(stage);
                }
            }
            // The user moved on mid-stream; the final result may still be
            // adopted if the engine returns to pending, otherwise dropped.
            _ => {}
        }
    }

    /// Adopt the stream's final, sorted staging result, reconciling with
    /// whatever provisional stages were already shown or accepted.
    pub(super) fn adopt_final_staging(&mut self, result: StagingResult) {
        if result.stages.is_empty() {
            if !self.stream_provisional {
                self.clear_to_idle();
            }
            return;
        }

        if !self.stream_provisional || self.staged.is_none() {
            if matches!(
                self.state,
                EngineState::PendingCompletion | EngineState::Idle
            ) {
                self.show_staging_result(result);
            }
            return;
        }

        let stage_key =
            |s: &Stage| (s.buffer_start, s.buffer_end, s.lines.clone());

        let provisional = self.staged.take().unwrap_or_default();
        let applied: Vec<_> = provisional.stages[..provisional.current_idx.min(provisional.stages.len())]
            .iter()
            .map(stage_key)
            .collect();
        let shown = provisional.current().map(stage_key);

        let stages: Vec<Stage> = result
            .stages
            .into_iter()
            .filter(|s| !applied.contains(&stage_key(s)))
            .collect();
        if stages.is_empty() {
            self.stream_provisional = false;
            self.clear_to_idle();
            return;
        }

        let current_idx = shown
            .and_then(|key| stages.iter().position(|s| stage_key(s) == key))
            .unwrap_or(0);

        let staged = StagedCompletion {
            stages,
            current_idx,
            first_needs_navigation: result.first_needs_navigation,
        };
        // The shown stage keeps its paint; only the target data is new.
        if self.state == EngineState::HasCompletion {
            self.cursor_target = staged
                .current()
                .and_then(|s| s.cursor_target.clone());
        }
        self.staged = Some(staged);
        self.stream_provisional = false;
    }
}

// ─── Workers ──────────────────────────────────────────────────────────────────

async fn run_completion_worker(
    provider: Arc<dyn Provider>,
    request: CompletionRequest,
    seq: u64,
    tx: UnboundedSender<Event>,
    params: StreamParams,
) {
    match provider.prepare_line_stream(&request).await {
        Ok(Some(stream)) => {
            run_stream_worker(provider, stream, seq, tx, params).await;
        }
        Ok(None) => {
            let event = match provider.get_completion(&request).await {
                Ok(response) => Event::CompletionReady {
                    seq,
                    outcome: CompletionOutcome::Batch(response),
                },
                Err(error) => Event::CompletionError { seq, error },
            };
            let _ = tx.send(event);
        }
        Err(error) => {
            let _ = tx.send(Event::CompletionError { seq, error });
        }
    }
}

async fn run_stream_worker(
    provider: Arc<dyn Provider>,
    mut stream: PreparedStream,
    seq: u64,
    tx: UnboundedSender<Event>,
    params: StreamParams,
) {
    let old_lines = stream.old_lines.clone();
    let base_offset = stream.window_start + 1;
    let mut builder = IncrementalStageBuilder::new(
        old_lines.clone(),
        base_offset,
        params.proximity_threshold,
        params.max_visible_lines,
        params.viewport_top,
        params.viewport_bottom,
        params.cursor_row,
        params.cursor_col,
        params.file_path.clone(),
    );

    let mut first_line = true;
    let mut finish_reason = FinishReason::Stop;
    let mut stopped_early = false;

    while let Some(event) = stream.lines.recv().await {
        match event {
            LineEvent::Line(line) => {
                if first_line {
                    if let Err(error) = provider.validate_first_line(stream.id, &line).await {
                        let _ = tx.send(Event::CompletionError { seq, error });
                        return;
                    }
                    first_line = false;
                }
                if let Some(stage) = builder.add_line(&line) {
                    let _ = tx.send(Event::StreamStage {
                        seq,
                        stage: Box::new(stage),
                    });
                }
            }
            LineEvent::End {
                finish_reason: reason,
                stopped_early: early,
            } => {
                finish_reason = reason;
                stopped_early = early;
                break;
            }
        }
    }

    let final_text = builder.streamed_lines().join("\n");
    let metrics = provider
        .finish_line_stream(stream.id, &final_text, &finish_reason, stopped_early)
        .await
        .ok()
        .and_then(|r| r.metrics_info);

    let outcome = if finish_reason == FinishReason::Length {
        // The stream hit the length limit: the last line is suspect. Drop
        // it, re-anchor, and rebuild over the surviving prefix.
        match recover_truncated_lines(&old_lines, builder.streamed_lines()) {
            None => CompletionOutcome::Empty,
            Some((surviving, effective_end)) => {
                let mut rebuilt = IncrementalStageBuilder::new(
                    old_lines[..effective_end.min(old_lines.len())].to_vec(),
                    base_offset,
                    params.proximity_threshold,
                    params.max_visible_lines,
                    params.viewport_top,
                    params.viewport_bottom,
                    params.cursor_row,
                    params.cursor_col,
                    params.file_path.clone(),
                );
                for line in &surviving {
                    rebuilt.add_line(line);
                }
                match rebuilt.finalize() {
                    Some(result) => CompletionOutcome::Staged { result, metrics },
                    None => CompletionOutcome::Empty,
                }
            }
        }
    } else {
        match builder.finalize() {
            Some(result) => CompletionOutcome::Staged { result, metrics },
            None => CompletionOutcome::Empty,
        }
    };

    let _ = tx.send(Event::CompletionReady { seq, outcome });
}

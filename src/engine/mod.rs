// SPDX-License-Identifier: MIT
//! The completion engine: an event-driven state machine coordinating
//! requests, prefetch, staged display, and accept interactions.
//!
//! # Scheduling model
//!
//! One task owns the [`Engine`] and drains an unbounded event queue;
//! handlers run one at a time, so exclusive ownership gives the same
//! serialization a mutex would. Timers and request workers never touch
//! engine state — they hold an [`EngineHandle`] and post events tagged with
//! a request sequence number, and stale-sequence events are dropped.
//!
//! # States
//!
//! ```text
//! Idle ──idle timeout/debounce──► PendingCompletion ──ready──► HasCompletion
//!   ▲                                                             │ Tab
//!   └──────── Esc / cursor move / error ◄── HasCursorTarget ◄─────┘
//! ```
//!
//! A prefetch sub-state machine (none → in-flight → ready, plus the two
//! waiting variants) runs independently of the main state and decides which
//! response paints the UI after an accept.

mod accept;
mod event;
mod filestate;
mod request;
mod timer;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::buffer::{Buffer, EditorSurface, ReplaceBatch};
use crate::config::EngineConfig;
use crate::metrics::{CompletionInfo, MetricEvent, MetricEventKind, MetricsSender};
use crate::model::{Completion, CompletionResponse, CursorTarget, MetricsInfo};
use crate::provider::Provider;
use crate::text::{create_stages, Group, StagedCompletion, StagingParams, StagingResult};

pub use event::{CompletionOutcome, Event};
pub use filestate::FileState;

// ─── Clock ────────────────────────────────────────────────────────────────────

/// Injected time source; tests drive it manually.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ─── States ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    PendingCompletion,
    HasCompletion,
    HasCursorTarget,
}

/// Prefetch sub-state, independent of the main state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchState {
    None,
    InFlight,
    Ready,
    /// Tab was pressed while the prefetch was in flight; the deferred
    /// accept path continues when it lands.
    WaitingForTab,
    /// The last stage was accepted and the cursor already sits on the
    /// target; the prefetch decides between ghost text and a jump.
    WaitingForCursorPrediction,
}

impl PrefetchState {
    fn in_flight(self) -> bool {
        matches!(
            self,
            PrefetchState::InFlight
                | PrefetchState::WaitingForTab
                | PrefetchState::WaitingForCursorPrediction
        )
    }
}

struct RequestHandle {
    seq: u64,
    task: tokio::task::JoinHandle<()>,
}

impl RequestHandle {
    fn cancel(self) {
        self.task.abort();
    }
}

// ─── Handle ───────────────────────────────────────────────────────────────────

/// Cheap cloneable sender the editor integration, timers, and workers use to
/// post events into the engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl EngineHandle {
    pub fn post(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Post an editor event by its wire name; returns false for unknown
    /// names.
    pub fn post_editor_event(&self, name: &str) -> bool {
        match Event::from_editor_name(name) {
            Some(event) => {
                let _ = self.tx.send(event);
                true
            }
            None => false,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Event::Shutdown);
    }
}

// ─── Engine ───────────────────────────────────────────────────────────────────

pub struct Engine {
    workspace_path: String,
    workspace_id: String,
    editor: Arc<dyn EditorSurface>,
    provider: Arc<dyn Provider>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,

    buffer: Buffer,
    state: EngineState,

    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,

    // Currently shown completion.
    completions: Vec<Completion>,
    current_groups: Vec<Group>,
    current_is_insertion: bool,
    apply_batch: Option<Box<dyn ReplaceBatch>>,
    cursor_target: Option<CursorTarget>,
    staged: Option<StagedCompletion>,
    /// Buffer lines at display time, for the typing-matches-prediction path.
    completion_original_lines: Vec<String>,
    /// (applied_end, line-count delta) of the shown stage, for shifting the
    /// remaining stages once it is applied.
    shown_stage_applied: Option<(usize, isize)>,
    shown_info: Option<CompletionInfo>,
    shown_reported: bool,

    /// Stages shown from a still-running stream; reconciled against the
    /// final sorted result when the stream completes.
    stream_provisional: bool,

    // Prefetch.
    prefetch_state: PrefetchState,
    prefetched: Option<CompletionResponse>,

    // Requests.
    request_seq: u64,
    current_request: Option<RequestHandle>,
    prefetch_request: Option<RequestHandle>,

    // Timers.
    idle_timer: Option<tokio::task::JoinHandle<()>>,
    text_change_timer: Option<tokio::task::JoinHandle<()>>,

    file_states: HashMap<String, FileState>,
    stopped: bool,
}

impl Engine {
    pub fn new(
        editor: Arc<dyn EditorSurface>,
        provider: Arc<dyn Provider>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        workspace_path: impl Into<String>,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let workspace_path = workspace_path.into();
        let workspace_id = format!("{}-{}", workspace_path, std::process::id());
        let engine = Self {
            workspace_path,
            workspace_id,
            editor,
            provider,
            clock,
            config,
            buffer: Buffer::default(),
            state: EngineState::Idle,
            events_tx: tx.clone(),
            events_rx: rx,
            completions: Vec::new(),
            current_groups: Vec::new(),
            current_is_insertion: false,
            apply_batch: None,
            cursor_target: None,
            staged: None,
            completion_original_lines: Vec::new(),
            shown_stage_applied: None,
            shown_info: None,
            shown_reported: false,
            stream_provisional: false,
            prefetch_state: PrefetchState::None,
            prefetched: None,
            request_seq: 0,
            current_request: None,
            prefetch_request: None,
            idle_timer: None,
            text_change_timer: None,
            file_states: HashMap::new(),
            stopped: false,
        };
        (engine, EngineHandle { tx })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn prefetch_state(&self) -> PrefetchState {
        self.prefetch_state
    }

    pub fn current_completions(&self) -> &[Completion] {
        &self.completions
    }

    pub fn cursor_target(&self) -> Option<&CursorTarget> {
        self.cursor_target.as_ref()
    }

    pub fn staged_completion(&self) -> Option<&StagedCompletion> {
        self.staged.as_ref()
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.events_tx.clone(),
        }
    }

    /// Drain the event queue until shutdown. Panics inside a handler are
    /// caught and logged; the loop continues with the next event.
    pub async fn run(mut self) {
        info!(workspace = %self.workspace_path, "engine started");
        while self.step().await {}
        info!("engine stopped");
    }

    /// Receive and dispatch one event; returns false once the engine is
    /// stopped. Embedders that drive the loop themselves (and tests) pump
    /// this directly.
    pub async fn step(&mut self) -> bool {
        let Some(event) = self.events_rx.recv().await else {
            return false;
        };
        if matches!(event, Event::Shutdown) {
            self.shutdown();
            return false;
        }
        let label = event.label();
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.dispatch(event))) {
            error!(event = label, ?panic, "event handler panicked; event discarded");
        }
        !self.stopped
    }

    /// Process a single event synchronously. Exposed for tests that drive
    /// the engine without spawning the run loop.
    pub fn dispatch(&mut self, event: Event) {
        if self.stopped {
            return;
        }
        debug!(event = event.label(), state = ?self.state, "handle event");

        match event {
            Event::Esc => self.handle_esc(),
            Event::TextChanged => self.handle_text_changed(),
            Event::TextChangeTimeout => self.handle_text_change_timeout(),
            Event::CursorMovedNormal => self.handle_cursor_moved_normal(),
            Event::InsertEnter => self.handle_insert_enter(),
            Event::InsertLeave => self.handle_insert_leave(),
            Event::Accept => self.handle_accept(),
            Event::PartialAccept => self.do_partial_accept(),
            Event::IdleTimeout => self.handle_idle_timeout(),
            Event::CompletionReady { seq, outcome } => self.handle_completion_ready(seq, outcome),
            Event::CompletionError { seq, error } => self.handle_completion_error(seq, error),
            Event::StreamStage { seq, stage } => self.handle_stream_stage(seq, *stage),
            Event::PrefetchReady { seq, response } => self.handle_prefetch_ready(seq, *response),
            Event::PrefetchError { seq, error } => self.handle_prefetch_error(seq, error),
            Event::Shutdown => self.shutdown(),
        }
    }

    fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(req) = self.current_request.take() {
            req.cancel();
        }
        if let Some(req) = self.prefetch_request.take() {
            req.cancel();
        }
        self.stop_idle_timer();
        self.stop_text_change_timer();
        self.editor.clear_ui();
    }

    // ─── Clearing ─────────────────────────────────────────────────────────

    /// Reject the current completion: cancel the in-flight main request,
    /// clear the UI and go idle. The prefetch keeps running.
    fn reject(&mut self, metric: MetricEventKind) {
        if let Some(req) = self.current_request.take() {
            req.cancel();
        }
        self.editor.clear_ui();
        self.buffer.discard_pending_edit();
        self.report_metric(metric);
        self.completions.clear();
        self.current_groups.clear();
        self.current_is_insertion = false;
        self.apply_batch = None;
        self.staged = None;
        self.stream_provisional = false;
        self.cursor_target = None;
        self.completion_original_lines.clear();
        self.state = EngineState::Idle;
    }

    /// Clear only what is painted, keeping staged progress, cursor target
    /// and prefetch intact. Used mid-accept.
    fn clear_shown_completion(&mut self) {
        if let Some(req) = self.current_request.take() {
            req.cancel();
        }
        self.editor.clear_ui();
        self.completions.clear();
        self.current_groups.clear();
        self.current_is_insertion = false;
        self.apply_batch = None;
        self.completion_original_lines.clear();
    }

    /// Clear everything shown and go idle, preserving the prefetch.
    fn clear_to_idle(&mut self) {
        self.clear_shown_completion();
        self.staged = None;
        self.stream_provisional = false;
        self.cursor_target = None;
        self.state = EngineState::Idle;
    }

    // ─── Showing completions ──────────────────────────────────────────────

    /// Build a staged completion from a batch response against the current
    /// buffer and show it. Returns false when the response carries no actual
    /// change.
    fn show_completion_response(&mut self, response: &CompletionResponse) -> bool {
        let Some(comp) = response.completions.first() else {
            return false;
        };

        let old_lines = self.buffer_slice(comp.start_line, comp.end_line_inc);
        if !self
            .buffer
            .has_changes(comp.start_line, comp.end_line_inc, &comp.lines)
        {
            debug!("completion matches buffer, nothing to show");
            return false;
        }

        let diff = crate::text::analyze_diff(&old_lines.join("\n"), &comp.lines.join("\n"));
        let params = StagingParams {
            cursor_row: self.buffer.row(),
            cursor_col: self.buffer.col(),
            viewport_top: self.buffer.viewport_top(),
            viewport_bottom: self.buffer.viewport_bottom(),
            base_offset: comp.start_line,
            proximity_threshold: self.config.cursor_prediction.proximity_threshold,
            file_path: self.buffer.path(),
        };
        let Some(result) = create_stages(&diff, &old_lines, &comp.lines, &params) else {
            return false;
        };

        self.record_metrics_info(response.metrics_info.clone());
        self.show_staging_result(result);
        true
    }

    fn show_staging_result(&mut self, result: StagingResult) {
        let needs_navigation = result.first_needs_navigation;
        let staged = result.into_staged();
        let Some(first) = staged.current() else {
            return;
        };
        if !self.stage_maps_to_buffer(first) {
            warn!(
                start = first.buffer_start,
                end = first.buffer_end,
                lines = self.buffer.lines().len(),
                "staged completion no longer maps to buffer, rejecting"
            );
            self.cancel_prefetch();
            self.reject(MetricEventKind::Ignored);
            return;
        }
        let first_start = first.buffer_start;
        self.staged = Some(staged);

        if needs_navigation && self.config.cursor_prediction.enabled {
            // Off-screen or far first stage: introduce it with a jump.
            self.cursor_target = Some(CursorTarget {
                path: self.buffer.path().to_string(),
                line: first_start,
                should_retrigger: false,
            });
            self.state = EngineState::HasCursorTarget;
            self.editor.show_cursor_target(first_start);
            return;
        }
        self.show_current_stage();
    }

    /// Paint the staged completion's current stage.
    fn show_current_stage(&mut self) {
        let Some(stage) = self.staged.as_ref().and_then(|s| s.current()).cloned() else {
            return;
        };

        if !self.stage_maps_to_buffer(&stage) {
            // Buffer moved out from under the stage: reject silently and
            // drop the prefetch with it.
            warn!(
                start = stage.buffer_start,
                end = stage.buffer_end,
                lines = self.buffer.lines().len(),
                "stage no longer maps to buffer, rejecting"
            );
            self.cancel_prefetch();
            self.reject(MetricEventKind::Ignored);
            return;
        }

        let completion = stage.completion();
        self.shown_stage_applied = Some(if stage.is_insertion {
            (stage.buffer_start.saturating_sub(1), stage.lines.len() as isize)
        } else {
            let replaced = stage.buffer_end - stage.buffer_start + 1;
            (
                stage.buffer_end,
                stage.lines.len() as isize - replaced as isize,
            )
        });
        self.completion_original_lines =
            self.buffer_slice(stage.buffer_start, stage.buffer_end);
        self.apply_batch = Some(self.buffer.on_completion_ready(
            self.editor.as_ref(),
            completion.start_line,
            completion.end_line_inc,
            &completion.lines,
            stage.is_insertion,
        ));
        self.completions = vec![completion];
        self.current_groups = stage.groups.clone();
        self.current_is_insertion = stage.is_insertion;
        self.cursor_target = stage.cursor_target.clone();
        self.state = EngineState::HasCompletion;
        self.report_shown();
    }

    fn stage_maps_to_buffer(&self, stage: &crate::text::Stage) -> bool {
        let len = self.buffer.lines().len();
        if stage.is_insertion {
            return stage.buffer_start >= 1 && stage.buffer_start <= len + 1;
        }
        stage.buffer_start >= 1 && stage.buffer_start <= stage.buffer_end && stage.buffer_end <= len
    }

    fn buffer_slice(&self, start: usize, end_inc: usize) -> Vec<String> {
        let lines = self.buffer.lines();
        if start == 0 || start > lines.len() || end_inc < start {
            return Vec::new();
        }
        lines[start - 1..end_inc.min(lines.len())].to_vec()
    }

    // ─── Cursor target ────────────────────────────────────────────────────

    /// Decide what to do with the current cursor target: show the next
    /// stage directly when it is close, render a jump indicator when far,
    /// or clear out.
    fn handle_cursor_target(&mut self) {
        if !self.config.cursor_prediction.enabled {
            self.clear_to_idle();
            return;
        }
        let Some(target) = self.cursor_target.clone().filter(|t| t.line >= 1) else {
            self.clear_to_idle();
            return;
        };

        let distance = self.buffer.row().abs_diff(target.line);
        let has_remaining_stage = self
            .staged
            .as_ref()
            .and_then(|s| s.current())
            .is_some();

        if has_remaining_stage {
            if distance <= self.config.cursor_prediction.proximity_threshold {
                // Close enough: skip the indicator and paint the stage.
                self.show_current_stage();
            } else {
                self.state = EngineState::HasCursorTarget;
                self.editor.show_cursor_target(target.line);
            }
            return;
        }

        if self.buffer.row() == target.line {
            if self.prefetch_state == PrefetchState::InFlight {
                // Cursor already sits on the target; let the prefetch pick
                // between ghost text and a jump when it lands.
                self.prefetch_state = PrefetchState::WaitingForCursorPrediction;
            }
            self.clear_to_idle();
            return;
        }

        if distance <= self.config.cursor_prediction.proximity_threshold {
            self.clear_to_idle();
            return;
        }

        self.state = EngineState::HasCursorTarget;
        self.cursor_target = Some(target.clone());
        self.editor.show_cursor_target(target.line);
    }

    fn cancel_prefetch(&mut self) {
        if let Some(req) = self.prefetch_request.take() {
            req.cancel();
        }
        self.prefetch_state = PrefetchState::None;
        self.prefetched = None;
    }

    // ─── Metrics ──────────────────────────────────────────────────────────

    fn record_metrics_info(&mut self, info: Option<MetricsInfo>) {
        self.shown_info = info.filter(|i| !i.id.is_empty()).map(|i| CompletionInfo {
            id: i.id,
            additions: i.additions,
            deletions: i.deletions,
            shown_at: self.clock.now(),
        });
        self.shown_reported = false;
    }

    fn report_shown(&mut self) {
        if self.shown_reported {
            return;
        }
        if let Some(info) = self.shown_info.clone() {
            self.shown_reported = true;
            self.spawn_metric(MetricEvent {
                kind: MetricEventKind::Shown,
                info,
            });
        }
    }

    /// Report the disposal of the shown completion, if any, and forget it.
    fn report_metric(&mut self, kind: MetricEventKind) {
        if let Some(info) = self.shown_info.take() {
            self.spawn_metric(MetricEvent { kind, info });
        }
    }

    fn spawn_metric(&self, event: MetricEvent) {
        let provider = Arc::clone(&self.provider);
        tokio::spawn(async move {
            provider.send_metric(event).await;
        });
    }
}

// SPDX-License-Identifier: MIT
//! Engine events and the simple editor-event handlers.
//!
//! The editor integration reports events by wire name; request and stream
//! workers post the tagged result events. Sequence numbers on result events
//! let the engine drop anything that outlived its request.

use tracing::debug;

use crate::metrics::MetricEventKind;
use crate::model::{CompletionResponse, CompletionSource, MetricsInfo};
use crate::provider::ProviderError;
use crate::text::{Stage, StagingResult};

use super::{Engine, EngineState};

/// How a completion request resolved.
#[derive(Debug)]
pub enum CompletionOutcome {
    /// Batch response from the provider.
    Batch(CompletionResponse),
    /// Fully-assembled staging result from the streaming path.
    Staged {
        result: StagingResult,
        metrics: Option<MetricsInfo>,
    },
    /// The stream produced no usable output.
    Empty,
}

#[derive(Debug)]
pub enum Event {
    Esc,
    TextChanged,
    TextChangeTimeout,
    CursorMovedNormal,
    InsertEnter,
    InsertLeave,
    /// Tab: accept the current stage or jump to the cursor target.
    Accept,
    PartialAccept,
    IdleTimeout,
    CompletionReady {
        seq: u64,
        outcome: CompletionOutcome,
    },
    CompletionError {
        seq: u64,
        error: ProviderError,
    },
    /// A stage finalized mid-stream; lets the first stage paint before the
    /// stream ends.
    StreamStage {
        seq: u64,
        stage: Box<Stage>,
    },
    PrefetchReady {
        seq: u64,
        response: Box<CompletionResponse>,
    },
    PrefetchError {
        seq: u64,
        error: ProviderError,
    },
    Shutdown,
}

impl Event {
    /// Parse an editor-reported event name.
    pub fn from_editor_name(name: &str) -> Option<Event> {
        match name {
            "esc" => Some(Event::Esc),
            "text_changed" => Some(Event::TextChanged),
            "trigger_completion" => Some(Event::TextChangeTimeout),
            "cursor_moved_normal" => Some(Event::CursorMovedNormal),
            "insert_enter" => Some(Event::InsertEnter),
            "insert_leave" => Some(Event::InsertLeave),
            "tab" => Some(Event::Accept),
            "partial_accept" => Some(Event::PartialAccept),
            "idle_timeout" => Some(Event::IdleTimeout),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Event::Esc => "esc",
            Event::TextChanged => "text_changed",
            Event::TextChangeTimeout => "text_change_timeout",
            Event::CursorMovedNormal => "cursor_moved_normal",
            Event::InsertEnter => "insert_enter",
            Event::InsertLeave => "insert_leave",
            Event::Accept => "accept",
            Event::PartialAccept => "partial_accept",
            Event::IdleTimeout => "idle_timeout",
            Event::CompletionReady { .. } => "completion_ready",
            Event::CompletionError { .. } => "completion_error",
            Event::StreamStage { .. } => "stream_stage",
            Event::PrefetchReady { .. } => "prefetch_ready",
            Event::PrefetchError { .. } => "prefetch_error",
            Event::Shutdown => "shutdown",
        }
    }
}

impl Engine {
    pub(super) fn handle_esc(&mut self) {
        self.reject(MetricEventKind::Rejected);
        self.stop_idle_timer();
    }

    pub(super) fn handle_text_changed(&mut self) {
        // Typing that matches the shown prediction must not tear the ghost
        // text down; the debounce handler updates it in place.
        if self.state == EngineState::HasCompletion {
            self.sync_buffer();
        }
        let keep_ui = self.state == EngineState::HasCompletion
            && self.check_typing_matches_prediction().0;
        if !keep_ui {
            self.reject(MetricEventKind::Rejected);
        }
        self.start_text_change_timer();
    }

    pub(super) fn handle_text_change_timeout(&mut self) {
        if self.state == EngineState::HasCompletion {
            self.sync_buffer();
            let (matches, has_remaining) = self.check_typing_matches_prediction();
            if matches && has_remaining {
                self.refresh_ghost_text();
                return;
            }
            if matches && !has_remaining {
                // The user typed the entire prediction.
                self.reject(MetricEventKind::Accepted);
                return;
            }
        }
        self.request_completion(CompletionSource::Typing);
    }

    pub(super) fn handle_cursor_moved_normal(&mut self) {
        self.reject(MetricEventKind::Ignored);
        self.reset_idle_timer();
    }

    pub(super) fn handle_insert_enter(&mut self) {
        self.stop_idle_timer();
    }

    pub(super) fn handle_insert_leave(&mut self) {
        self.reject(MetricEventKind::Ignored);
        self.start_idle_timer();
    }

    pub(super) fn handle_accept(&mut self) {
        match self.state {
            EngineState::HasCompletion => self.do_accept_completion(),
            EngineState::HasCursorTarget => self.do_accept_cursor_target(),
            _ => {}
        }
    }

    pub(super) fn handle_idle_timeout(&mut self) {
        if self.state == EngineState::Idle {
            self.request_completion(CompletionSource::Idle);
        }
    }

    pub(super) fn handle_completion_error(&mut self, seq: u64, error: ProviderError) {
        if !self.is_current_request(seq) {
            debug!(seq, "stale completion error dropped");
            return;
        }
        self.current_request = None;
        if error.is_cancelled() {
            debug!(seq, "completion cancelled");
        } else {
            tracing::error!(seq, %error, "completion failed");
        }
        if self.state == EngineState::PendingCompletion {
            self.state = EngineState::Idle;
        }
    }

    pub(super) fn handle_prefetch_error(&mut self, seq: u64, error: ProviderError) {
        if !self.is_current_prefetch(seq) {
            debug!(seq, "stale prefetch error dropped");
            return;
        }
        self.prefetch_request = None;
        if error.is_cancelled() {
            debug!(seq, "prefetch cancelled");
        } else {
            tracing::error!(seq, %error, "prefetch failed");
        }
        let was_waiting_tab = self.prefetch_state == super::PrefetchState::WaitingForTab;
        self.prefetch_state = super::PrefetchState::None;
        self.prefetched = None;
        if was_waiting_tab {
            // The deferred accept continues without prefetched data.
            self.handle_deferred_cursor_target();
        }
    }

    pub(super) fn is_current_request(&self, seq: u64) -> bool {
        self.current_request.as_ref().is_some_and(|r| r.seq == seq)
    }

    pub(super) fn is_current_prefetch(&self, seq: u64) -> bool {
        self.prefetch_request.as_ref().is_some_and(|r| r.seq == seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editor_names_round_trip() {
        for name in [
            "esc",
            "text_changed",
            "trigger_completion",
            "cursor_moved_normal",
            "insert_enter",
            "insert_leave",
            "tab",
            "partial_accept",
            "idle_timeout",
        ] {
            assert!(Event::from_editor_name(name).is_some(), "{name}");
        }
        assert!(Event::from_editor_name("unknown").is_none());
    }
}

// SPDX-License-Identifier: MIT
//! The model-provider contract.
//!
//! A provider answers completion requests either in batch form or as a
//! stream of lines. The two forms are distinct: a batch reply is a
//! [`CompletionResponse`]; a streamed reply is a [`PreparedStream`] whose
//! channel the engine's worker drains, followed by
//! [`Provider::finish_line_stream`] for the provider's bookkeeping.

pub mod trim;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::metrics::MetricsSender;
use crate::model::{CompletionRequest, CompletionResponse};

/// Provider failure taxonomy. Everything here is recoverable: the engine
/// logs, clears, and returns to idle.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network failure, 5xx, or timeout.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// The request was cancelled; expected, logged at debug.
    #[error("request cancelled")]
    Cancelled,
    /// Unparseable or incomplete response payload.
    #[error("malformed provider response: {0}")]
    Malformed(String),
    /// Protocol-level 4xx with body; treated as transient.
    #[error("provider returned {status}: {body}")]
    Http { status: u16, body: String },
}

impl ProviderError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }
}

/// Input-size ceilings a provider imposes on request context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub max_input_lines: usize,
    pub max_input_bytes: usize,
}

impl ContextLimits {
    /// Substitute generous ceilings for unset (zero) limits.
    pub fn or_defaults(self) -> Self {
        Self {
            max_input_lines: if self.max_input_lines == 0 {
                50_000
            } else {
                self.max_input_lines
            },
            max_input_bytes: if self.max_input_bytes == 0 {
                10_000_000
            } else {
                self.max_input_bytes
            },
        }
    }
}

/// Why a stream stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    /// Output hit the provider's length limit; the tail is suspect.
    Length,
    Other(String),
}

/// One message on a line stream.
#[derive(Debug, Clone)]
pub enum LineEvent {
    Line(String),
    End {
        finish_reason: FinishReason,
        stopped_early: bool,
    },
}

/// A streaming reply: the provider feeds `lines` from its own task; `id`
/// correlates the follow-up [`Provider::finish_line_stream`] call.
///
/// The provider trims request context before sending it upstream;
/// `old_lines` is the trimmed window the streamed lines rewrite and
/// `window_start` is its 0-based offset into the untrimmed buffer, so the
/// engine can map results back to buffer coordinates.
pub struct PreparedStream {
    pub id: u64,
    pub lines: mpsc::Receiver<LineEvent>,
    pub old_lines: Vec<String>,
    pub window_start: usize,
}

/// A provider also carries the metrics transport ([`MetricsSender`]); the
/// engine reports shown/accepted/rejected/ignored through it.
#[async_trait]
pub trait Provider: MetricsSender {
    /// Batch completion for the given request.
    async fn get_completion(
        &self,
        req: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;

    fn context_limits(&self) -> ContextLimits;

    /// Begin a streamed completion; `Ok(None)` means this provider does not
    /// stream and the engine should fall back to [`Provider::get_completion`].
    async fn prepare_line_stream(
        &self,
        _req: &CompletionRequest,
    ) -> Result<Option<PreparedStream>, ProviderError> {
        Ok(None)
    }

    /// Early sanity check on the first streamed line; an error aborts the
    /// stream before anything is shown.
    async fn validate_first_line(&self, _stream_id: u64, _line: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Provider bookkeeping once a stream ends; returns metrics correlation
    /// data for the completed stream.
    async fn finish_line_stream(
        &self,
        _stream_id: u64,
        _final_text: &str,
        _finish_reason: &FinishReason,
        _stopped_early: bool,
    ) -> Result<CompletionResponse, ProviderError> {
        Ok(CompletionResponse::default())
    }
}

// SPDX-License-Identifier: MIT
//! Completion metrics events.
//!
//! The engine reports what happened to each completion it showed; the
//! provider adapter owns the transport. Implementations should handle event
//! kinds their backend does not support by returning early. The engine
//! guarantees `info.id` is non-empty when [`MetricsSender::send_metric`] is
//! called.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricEventKind {
    /// Completion was displayed to the user.
    Shown,
    /// User accepted the completion.
    Accepted,
    /// User explicitly rejected it (pressed escape, typed over it).
    Rejected,
    /// Completion was dismissed without action (cursor moved, etc.).
    Ignored,
}

/// Metadata about one completion, carried from show to disposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionInfo {
    /// Provider-assigned completion id.
    pub id: String,
    /// Lines added by the completion.
    pub additions: usize,
    /// Lines deleted by the completion.
    pub deletions: usize,
    /// When the completion was shown, for lifespan tracking.
    #[serde(rename = "shownAt")]
    pub shown_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub kind: MetricEventKind,
    pub info: CompletionInfo,
}

/// Transport contract implemented by provider adapters.
#[async_trait]
pub trait MetricsSender: Send + Sync {
    async fn send_metric(&self, event: MetricEvent);
}

// SPDX-License-Identifier: MIT
//! Test doubles shared by the engine flow tests: a scriptable editor
//! surface, a scriptable provider, and a manual clock.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;

use tabd::buffer::{EditorSnapshot, EditorSurface, ReplaceBatch};
use tabd::engine::Clock;
use tabd::metrics::{MetricEvent, MetricsSender};
use tabd::model::{CompletionRequest, CompletionResponse, LinterErrors};
use tabd::provider::{ContextLimits, LineEvent, PreparedStream, Provider, ProviderError};

// ─── Editor ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct EditorState {
    pub path: String,
    pub lines: Vec<String>,
    pub row: usize,
    pub col: usize,
    pub viewport_top: usize,
    pub viewport_bottom: usize,
    pub version: u64,

    pub clear_ui_calls: usize,
    pub cursor_target_lines: Vec<usize>,
    pub moved_to_lines: Vec<usize>,
    pub inserted_texts: Vec<String>,
    pub replaced_lines: Vec<(usize, String)>,
    pub executed_batches: usize,
}

#[derive(Clone)]
pub struct MockEditor {
    pub state: Arc<Mutex<EditorState>>,
}

impl MockEditor {
    pub fn new(path: &str, lines: &[&str], row: usize, col: usize) -> Self {
        let state = EditorState {
            path: path.to_string(),
            lines: lines.iter().map(|s| s.to_string()).collect(),
            row,
            col,
            viewport_top: 1,
            viewport_bottom: 100,
            version: 1,
            ..EditorState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut EditorState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn lines(&self) -> Vec<String> {
        self.state.lock().unwrap().lines.clone()
    }

    /// Simulate the user typing at the cursor position.
    pub fn type_text(&self, text: &str) {
        let mut s = self.state.lock().unwrap();
        let row = s.row;
        let col = s.col;
        if let Some(line) = s.lines.get_mut(row - 1) {
            line.insert_str(col.min(line.len()), text);
        }
        s.col += text.len();
        s.version += 1;
    }
}

struct MockBatch {
    state: Arc<Mutex<EditorState>>,
    start: usize,
    end_inc: usize,
    lines: Vec<String>,
    is_insertion: bool,
}

impl ReplaceBatch for MockBatch {
    fn execute(&self) -> anyhow::Result<()> {
        let mut s = self.state.lock().unwrap();
        if self.is_insertion {
            for (k, line) in self.lines.iter().enumerate() {
                let at = (self.start - 1 + k).min(s.lines.len());
                s.lines.insert(at, line.clone());
            }
        } else {
            let end = self.end_inc.min(s.lines.len());
            s.lines
                .splice(self.start - 1..end, self.lines.iter().cloned());
        }
        s.executed_batches += 1;
        s.version += 1;
        Ok(())
    }
}

impl EditorSurface for MockEditor {
    fn snapshot(&self) -> EditorSnapshot {
        let s = self.state.lock().unwrap();
        EditorSnapshot {
            path: s.path.clone(),
            lines: s.lines.clone(),
            row: s.row,
            col: s.col,
            viewport_top: s.viewport_top,
            viewport_bottom: s.viewport_bottom,
            version: s.version,
        }
    }

    fn clear_ui(&self) {
        self.state.lock().unwrap().clear_ui_calls += 1;
    }

    fn prepare_replace(
        &self,
        start: usize,
        end_inc: usize,
        lines: &[String],
        is_insertion: bool,
    ) -> Box<dyn ReplaceBatch> {
        Box::new(MockBatch {
            state: Arc::clone(&self.state),
            start,
            end_inc,
            lines: lines.to_vec(),
            is_insertion,
        })
    }

    fn show_cursor_target(&self, line: usize) {
        self.state.lock().unwrap().cursor_target_lines.push(line);
    }

    fn move_cursor_to_start_of_line(
        &self,
        line: usize,
        _scroll: bool,
        _center: bool,
    ) -> anyhow::Result<()> {
        let mut s = self.state.lock().unwrap();
        s.row = line;
        s.col = 0;
        s.moved_to_lines.push(line);
        Ok(())
    }

    fn insert_text(&self, text: &str) {
        let mut s = self.state.lock().unwrap();
        let row = s.row;
        let col = s.col;
        if let Some(line) = s.lines.get_mut(row - 1) {
            line.insert_str(col.min(line.len()), text);
        }
        s.col += text.len();
        s.version += 1;
        s.inserted_texts.push(text.to_string());
    }

    fn replace_line(&self, line: usize, content: &str) {
        let mut s = self.state.lock().unwrap();
        if line >= 1 {
            if line <= s.lines.len() {
                s.lines[line - 1] = content.to_string();
            } else {
                s.lines.push(content.to_string());
            }
        }
        s.version += 1;
        s.replaced_lines.push((line, content.to_string()));
    }

    fn linter_errors(&self) -> Option<LinterErrors> {
        None
    }
}

// ─── Provider ─────────────────────────────────────────────────────────────────

pub struct StreamScript {
    pub old_lines: Vec<String>,
    pub window_start: usize,
    pub events: Vec<LineEvent>,
}

#[derive(Default)]
pub struct MockProvider {
    pub responses: Mutex<VecDeque<CompletionResponse>>,
    pub stream: Mutex<Option<StreamScript>>,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<CompletionRequest>>,
    pub metrics: Mutex<Vec<MetricEvent>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: CompletionResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn set_stream(&self, script: StreamScript) {
        *self.stream.lock().unwrap() = Some(script);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSender for MockProvider {
    async fn send_metric(&self, event: MetricEvent) {
        self.metrics.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn get_completion(
        &self,
        req: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(req.clone());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    fn context_limits(&self) -> ContextLimits {
        ContextLimits {
            max_input_lines: 0,
            max_input_bytes: 0,
        }
    }

    async fn prepare_line_stream(
        &self,
        req: &CompletionRequest,
    ) -> Result<Option<PreparedStream>, ProviderError> {
        let Some(script) = self.stream.lock().unwrap().take() else {
            return Ok(None);
        };
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(req.clone());

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for event in script.events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(Some(PreparedStream {
            id: 1,
            lines: rx,
            old_lines: script.old_lines,
            window_start: script.window_start,
        }))
    }
}

// ─── Clock ────────────────────────────────────────────────────────────────────

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::seconds(secs);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

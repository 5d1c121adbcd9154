// SPDX-License-Identifier: MIT
//! Engine and provider configuration.
//!
//! All timing values are supplied by the embedding integration; the core
//! ships no defaults for them.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Predicate deciding which characters belong to a "word" for the purposes
/// of partial accept. Shared so timers and workers can clone the config.
pub type WordCharPredicate = Arc<dyn Fn(char) -> bool + Send + Sync>;

static DEFAULT_WORD_CHARS: Lazy<WordCharPredicate> =
    Lazy::new(|| Arc::new(|c: char| c.is_ascii_alphanumeric() || c == '_'));

/// Jump-indicator behaviour.
#[derive(Debug, Clone)]
pub struct CursorPredictionConfig {
    /// Show jump indicators at all.
    pub enabled: bool,
    /// On a no-op completion, jump to the last line and retrigger.
    pub auto_advance: bool,
    /// Max buffer-line gap between consecutive changes that still belong in
    /// the same stage; also the "close enough to skip the indicator"
    /// distance.
    pub proximity_threshold: usize,
}

/// Engine configuration, caller-supplied in full.
#[derive(Clone)]
pub struct EngineConfig {
    /// Ceiling on any single provider request.
    pub completion_timeout: Duration,
    /// Normal-mode idle delay before an unprompted request.
    pub idle_completion_delay: Duration,
    /// Debounce after the last text change before a typing-sourced request.
    pub text_change_debounce: Duration,
    pub cursor_prediction: CursorPredictionConfig,
    /// Token budget for diff history sent in requests. 0 = no limit.
    pub max_diff_tokens: usize,
    /// Max visible lines per stage. 0 = no cap.
    pub max_visible_lines: usize,
    /// Word-character predicate for partial accept of `append_chars` groups.
    pub word_chars: WordCharPredicate,
}

impl EngineConfig {
    /// Build a config with the default word-character predicate
    /// (`[A-Za-z0-9_]`). Timing values still have to be supplied.
    pub fn new(
        completion_timeout: Duration,
        idle_completion_delay: Duration,
        text_change_debounce: Duration,
        cursor_prediction: CursorPredictionConfig,
    ) -> Self {
        Self {
            completion_timeout,
            idle_completion_delay,
            text_change_debounce,
            cursor_prediction,
            max_diff_tokens: 0,
            max_visible_lines: 0,
            word_chars: DEFAULT_WORD_CHARS.clone(),
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("completion_timeout", &self.completion_timeout)
            .field("idle_completion_delay", &self.idle_completion_delay)
            .field("text_change_debounce", &self.text_change_debounce)
            .field("cursor_prediction", &self.cursor_prediction)
            .field("max_diff_tokens", &self.max_diff_tokens)
            .field("max_visible_lines", &self.max_visible_lines)
            .finish_non_exhaustive()
    }
}

/// Provider connection settings, passed through to the provider adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Provider type tag understood by the integration ("sweep", "mercury", …).
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    /// Name of the environment variable holding the API key. The key itself
    /// never enters the core.
    #[serde(rename = "apiKeyEnv")]
    pub api_key_env: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(rename = "maxTokens", default)]
    pub max_tokens: Option<u32>,
    #[serde(rename = "topK", default)]
    pub top_k: Option<u32>,
    #[serde(rename = "privacyMode", default)]
    pub privacy_mode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_word_chars_match_identifiers() {
        let cfg = EngineConfig::new(
            Duration::from_secs(5),
            Duration::from_millis(750),
            Duration::from_millis(150),
            CursorPredictionConfig {
                enabled: true,
                auto_advance: true,
                proximity_threshold: 3,
            },
        );
        let is_word = cfg.word_chars.as_ref();
        assert!(is_word('a'));
        assert!(is_word('_'));
        assert!(is_word('9'));
        assert!(!is_word('.'));
        assert!(!is_word(' '));
    }

    #[test]
    fn provider_settings_deserialize() {
        let json = r#"{
            "type": "sweep",
            "url": "https://api.example.com/autocomplete",
            "apiKeyEnv": "TABD_API_KEY",
            "maxTokens": 512,
            "privacyMode": true
        }"#;
        let s: ProviderSettings = serde_json::from_str(json).unwrap();
        assert_eq!(s.kind, "sweep");
        assert_eq!(s.max_tokens, Some(512));
        assert!(s.privacy_mode);
        assert!(s.model.is_empty());
    }
}

//! Paragraph buffer (C6): accumulates streamed partials into paragraph
//! candidates and asks a small model whether to commit.
//!
//! Grounded on `audio/intelligent_chunking.rs::ContextBuffer::append_with_overlap`
//! for the "accumulate, preferring the longer overlapping span" shape,
//! adapted from sample buffers to string merging (spec §4.6).

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::ProviderError;
use crate::events::AudioSource;

pub const DEFAULT_DECISION_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct PendingParagraph {
    pub transcript: String,
    pub detected_lang_hint: Option<String>,
    pub audio_source: AudioSource,
    pub captured_at: i64,
    pub last_updated_at: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct ParagraphDecision {
    pub should_commit: bool,
    pub is_partial: bool,
}

/// A small model call; prompt text is an opaque template the caller
/// supplies (spec §1 "prompt text treated as opaque").
#[async_trait]
pub trait ParagraphDecisionModel: Send + Sync {
    async fn decide(&self, transcript: &str) -> Result<ParagraphDecision, ProviderError>;
}

/// Optional dictation-artifact cleanup pass; skipped entirely for the
/// local provider (spec §4.6, and Open Question #1 in DESIGN.md).
#[async_trait]
pub trait PolishModel: Send + Sync {
    async fn polish(&self, transcript: &str) -> Result<String, ProviderError>;
}

/// Merges `incoming` into `existing`: if one is a prefix/suffix of the
/// other, keep the longer; otherwise concatenate with a single space. Never
/// drops content (spec §4.6, and invariant 11 "paragraph merge no-loss").
pub fn merge_fragment(existing: &str, incoming: &str) -> String {
    if existing.is_empty() {
        return incoming.to_string();
    }
    if incoming.is_empty() {
        return existing.to_string();
    }
    if existing.ends_with(incoming) || incoming.starts_with(existing) {
        return if incoming.len() >= existing.len() { incoming.to_string() } else { existing.to_string() };
    }
    if incoming.ends_with(existing) || existing.starts_with(incoming) {
        return if existing.len() >= incoming.len() { existing.to_string() } else { incoming.to_string() };
    }
    format!("{existing} {incoming}")
}

/// Heuristic fallback used when the decision model call fails: commit iff
/// the transcript ends with sentence-terminal punctuation (spec §4.6).
pub fn heuristic_should_commit(transcript: &str) -> bool {
    matches!(transcript.trim_end().chars().last(), Some('.') | Some('!') | Some('?'))
}

pub struct ParagraphBuffer {
    source: AudioSource,
    pending: Option<PendingParagraph>,
    decision_interval: Duration,
    last_decision_at: Option<Instant>,
}

impl ParagraphBuffer {
    pub fn new(source: AudioSource, decision_interval: Duration) -> Self {
        Self { source, pending: None, last_decision_at: None, decision_interval }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn transcript(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.transcript.as_str())
    }

    /// Merges an incoming fragment, creating the pending paragraph on first
    /// fragment for this source (spec §4.6). Returns the merged transcript
    /// so the caller can emit a `partial` event.
    pub fn merge(&mut self, fragment: &str, lang_hint: Option<String>, now_ms: i64) -> String {
        match &mut self.pending {
            Some(pending) => {
                pending.transcript = merge_fragment(&pending.transcript, fragment);
                pending.last_updated_at = now_ms;
                if lang_hint.is_some() {
                    pending.detected_lang_hint = lang_hint;
                }
                pending.transcript.clone()
            }
            None => {
                let transcript = fragment.to_string();
                self.pending = Some(PendingParagraph {
                    transcript: transcript.clone(),
                    detected_lang_hint: lang_hint,
                    audio_source: self.source,
                    captured_at: now_ms,
                    last_updated_at: now_ms,
                });
                transcript
            }
        }
    }

    /// Whether enough time has passed since the last decision attempt to
    /// try again (spec §4.6 "at most every `paragraphDecisionIntervalMs`").
    pub fn due_for_decision(&self, now: Instant) -> bool {
        if self.pending.is_none() {
            return false;
        }
        match self.last_decision_at {
            Some(last) => now.duration_since(last) >= self.decision_interval,
            None => true,
        }
    }

    pub fn mark_decision_attempted(&mut self, now: Instant) {
        self.last_decision_at = Some(now);
    }

    /// Takes the pending paragraph for commit, clearing it. Any fragments
    /// merged during an in-flight polish call are not lost because the
    /// caller re-merges them via `restore_partial` if the polish result
    /// arrives after new fragments came in (spec §4.6).
    pub fn take_for_commit(&mut self) -> Option<PendingParagraph> {
        self.pending.take()
    }

    /// Re-seeds the pending buffer with fragments that arrived during a
    /// polish call, preserving anything merged since `take_for_commit`.
    pub fn restore_partial(&mut self, carried_over: Option<PendingParagraph>) {
        match (carried_over, &mut self.pending) {
            (Some(carried), None) => self.pending = Some(carried),
            (Some(carried), Some(current)) => {
                current.transcript = merge_fragment(&carried.transcript, &current.transcript);
            }
            (None, _) => {}
        }
    }

    /// Force-flush at stop/shutdown: `shouldCommit=true` unconditionally
    /// (spec §4.6).
    pub fn force_flush(&mut self) -> Option<PendingParagraph> {
        self.pending.take()
    }
}

//! Transcription providers (C5): one contract, four variants.
//!
//! Grounded on the REDESIGN FLAGS guidance (spec §9): a polymorphic
//! contract over `{chunk-mode, stream-mode}` capabilities, each concrete
//! provider implementing one; tagged variants distinguish
//! translation-on/off results at compile time rather than optional fields.

pub mod batch_structured;
pub mod batch_stt_post;
pub mod local;
pub mod realtime_stream;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::events::AudioSource;

/// Every provider call that consumes tokens reports them here so the
/// orchestrator can feed `CostAccumulator::add_cost` (spec §4.5 "Common").
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Tagged so translation-disabled results are distinguishable at compile
/// time (spec §9), rather than an optional `translation: Option<String>`
/// field a caller could forget to check.
#[derive(Debug, Clone)]
pub enum TranscriptionOutcome {
    Translated {
        transcript: String,
        translation: String,
        detected_lang: String,
        is_partial: bool,
        is_new_topic: bool,
        usage: TokenUsage,
    },
    SourceOnly {
        transcript: String,
        detected_lang: String,
        is_partial: bool,
        is_new_topic: bool,
        usage: TokenUsage,
    },
}

impl TranscriptionOutcome {
    pub fn transcript(&self) -> &str {
        match self {
            TranscriptionOutcome::Translated { transcript, .. } => transcript,
            TranscriptionOutcome::SourceOnly { transcript, .. } => transcript,
        }
    }

    pub fn is_new_topic(&self) -> bool {
        match self {
            TranscriptionOutcome::Translated { is_new_topic, .. } => *is_new_topic,
            TranscriptionOutcome::SourceOnly { is_new_topic, .. } => *is_new_topic,
        }
    }

    pub fn usage(&self) -> TokenUsage {
        match self {
            TranscriptionOutcome::Translated { usage, .. } => *usage,
            TranscriptionOutcome::SourceOnly { usage, .. } => *usage,
        }
    }
}

/// A chunk-mode provider consumes one PCM chunk at a time and returns a
/// complete result (spec §4.5 "Chunk-mode").
#[async_trait]
pub trait ChunkModeProvider: Send + Sync {
    async fn transcribe_chunk(
        &self,
        pcm_chunk: &[u8],
        source_lang: &str,
        target_lang: &str,
        translation_enabled: bool,
        prompt_context: &[String],
    ) -> Result<TranscriptionOutcome, ProviderError>;
}

/// Events emitted by an open stream (spec §4.5 "Stream-mode"). A
/// `Partial("")` signals no pending text (spec §5).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Partial { text: String },
    Committed { text: String, language_hint: Option<String> },
}

/// A live stream-mode session: callers push raw PCM in, and drain events
/// out. Reconnection/backoff happens internally (spec §4.5.2); the caller
/// is responsible for calling `close` before capture shutdown.
pub struct TranscriptionStream {
    pub pcm_writer: mpsc::Sender<Vec<u8>>,
    pub events: mpsc::Receiver<StreamEvent>,
    close: mpsc::Sender<()>,
}

impl TranscriptionStream {
    pub fn new(pcm_writer: mpsc::Sender<Vec<u8>>, events: mpsc::Receiver<StreamEvent>, close: mpsc::Sender<()>) -> Self {
        Self { pcm_writer, events, close }
    }

    pub async fn close(&self) {
        let _ = self.close.send(()).await;
    }
}

/// A stream-mode provider opens one long-lived connection per active
/// source (spec §4.5 "Stream-mode"); it bypasses C1/C7 entirely.
#[async_trait]
pub trait StreamModeProvider: Send + Sync {
    async fn open_stream(&self, source: AudioSource, language: &str) -> Result<TranscriptionStream, ProviderError>;
}

/// Detects the repetition/symbol-only degenerate-transcript pattern the
/// local provider must recognize (spec §4.5.3): long runs of an identical
/// token, or output dominated by angle brackets.
pub fn is_degenerate_transcript(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    let angle_bracket_count = trimmed.chars().filter(|c| *c == '<' || *c == '>').count();
    if angle_bracket_count * 3 >= trimmed.chars().count() {
        return true;
    }
    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    if tokens.len() >= 6 {
        let first = tokens[0];
        if tokens.iter().all(|t| *t == first) {
            return true;
        }
    }
    false
}

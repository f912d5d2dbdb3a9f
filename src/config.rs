//! Recognized configuration options (spec §3), owned by the embedding
//! application and handed to `SessionOrchestrator::new`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TranscriptionProviderKind {
    BatchStructured,
    RealtimeStream,
    Local,
    BatchSttPost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Auto,
    SourceTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub transcription_provider: TranscriptionProviderKind,

    pub transcription_model_id: String,
    pub analysis_model_id: String,
    pub task_model_id: String,
    pub utility_model_id: String,

    pub direction: Direction,
    /// One of the thirteen recognized language codes (spec §3). Not
    /// validated against the fixed set here; the provider rejects unknown
    /// codes at call time.
    pub source_lang: String,
    pub target_lang: String,

    /// Only meaningful for the batch-structured provider.
    pub translation_enabled: bool,

    pub interval_ms: u64,
    pub debug: bool,
    pub context_file: Option<String>,
    pub use_context: bool,
    pub legacy_audio: bool,
}

pub const SAMPLE_RATE_HZ: u32 = 16_000;

impl Config {
    /// Deep-merges `self` on top of `Config::default()`-shaped defaults:
    /// any field present in `self` wins, the rest keep their default.
    /// Mirrors the settings-merge behavior the embedding application
    /// already performs before constructing a session.
    pub fn merge_defaults(self) -> Self {
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transcription_provider: TranscriptionProviderKind::BatchStructured,
            transcription_model_id: String::new(),
            analysis_model_id: String::new(),
            task_model_id: String::new(),
            utility_model_id: String::new(),
            direction: Direction::Auto,
            source_lang: "en".to_string(),
            target_lang: "en".to_string(),
            translation_enabled: false,
            interval_ms: 300,
            debug: false,
            context_file: None,
            use_context: true,
            legacy_audio: false,
        }
    }
}

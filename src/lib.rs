//! Streaming speech capture, transcription, translation, and
//! live-analysis engine.
//!
//! The embedding application owns audio capture and UI; this crate owns
//! everything from raw PCM bytes to transcript blocks, summaries, and
//! task suggestions. See `SessionOrchestrator` for the entry point.

pub mod analysis;
pub mod config;
pub mod context;
pub mod cost;
pub mod dedup;
pub mod duck;
pub mod error;
pub mod events;
pub mod paragraph;
pub mod pcm;
pub mod persistence;
pub mod providers;
pub mod queue;
pub mod recovery;
pub mod session;
pub mod util;
pub mod vad;

pub use analysis::{AnalysisScheduler, PipelineMode, SummaryAnalysisModel, TaskExtractionModel};
pub use config::{Config, Direction, TranscriptionProviderKind};
pub use context::{ContextState, Insight, InsightKind, Summary, TranscriptBlock};
pub use cost::{CostAccumulator, CostSnapshot, PricingTable, ProviderPricing};
pub use error::{AnalysisError, PersistenceError, ProviderError, QueueError, SessionError};
pub use events::{AudioSource, EventSink, SessionEvent, SessionState};
pub use persistence::SessionStore;
pub use providers::{ChunkModeProvider, StreamModeProvider, TranscriptionOutcome};
pub use session::{ActiveProvider, SessionCollaborators, SessionOrchestrator};

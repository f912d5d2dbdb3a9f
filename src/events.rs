//! Typed event sink, replacing the source's stringly-named channels with a
//! sum type dispatched over a broadcast channel (spec §9).

use serde::Serialize;
use tokio::sync::broadcast;

use crate::context::{Insight, Summary, TranscriptBlock};
use crate::cost::CostSnapshot;
use crate::dedup::TaskSuggestion;

/// An audio source the orchestrator is aware of (spec §3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AudioSource {
    System,
    Microphone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Idle,
    Recording,
    Paused,
    Stopped,
}

/// The eleven observable events fanned out by the session orchestrator
/// (spec §4.11).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    StateChange { state: SessionState },
    BlockAdded { block: TranscriptBlock },
    BlockUpdated { block: TranscriptBlock },
    BlocksCleared,
    Partial { source: AudioSource, text: String },
    SummaryUpdated { summary: Summary },
    InsightAdded { insight: Insight },
    TaskSuggested { task: TaskSuggestion },
    CostUpdated { cost: CostSnapshot },
    Status { message: String },
    Error { message: String, fatal: bool },
}

/// Single-writer fan-out: the orchestrator is the only publisher, any
/// number of external consumers can subscribe.
pub struct EventSink {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Emits the event; a send with no subscribers is not an error.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

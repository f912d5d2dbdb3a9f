//! Context window (C3): ordered block log, rolling text context, key-point
//! and insight history.
//!
//! Grounded on `audio/context_manager.rs`'s rolling-buffer pattern,
//! simplified from multi-reader `RwLock`-guarded state to orchestrator-owned
//! state with a snapshot seam for the analysis scheduler.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::events::AudioSource;

pub type BlockId = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptBlock {
    pub id: BlockId,
    pub session_id: String,
    pub audio_source: AudioSource,
    pub source_label: String,
    pub source_text: String,
    pub target_label: String,
    pub translation: Option<String>,
    pub partial: bool,
    pub new_topic: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InsightKind {
    Definition,
    Context,
    Fact,
    Tip,
    KeyPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub kind: InsightKind,
    pub text: String,
    pub session_id: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub key_points: Vec<String>,
    pub updated_at: i64,
}

/// Rolling context window kept at a small fixed size (spec §3: `W`, e.g. 10).
const CONTEXT_WINDOW_SIZE: usize = 10;

pub struct ContextState {
    session_id: String,
    blocks: BTreeMap<BlockId, TranscriptBlock>,
    context_buffer: VecDeque<String>,
    all_key_points: Vec<String>,
    all_educational_insights: Vec<Insight>,
    next_block_id: BlockId,
}

impl ContextState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            blocks: BTreeMap::new(),
            context_buffer: VecDeque::with_capacity(CONTEXT_WINDOW_SIZE),
            all_key_points: Vec::new(),
            all_educational_insights: Vec::new(),
            next_block_id: 1,
        }
    }

    /// Assigns the next monotonic id, inserts, and returns the new block
    /// (spec §4.3 `createBlock`).
    #[allow(clippy::too_many_arguments)]
    pub fn create_block(
        &mut self,
        audio_source: AudioSource,
        source_label: impl Into<String>,
        source_text: impl Into<String>,
        target_label: impl Into<String>,
        translation: Option<String>,
        partial: bool,
        new_topic: bool,
        created_at: i64,
    ) -> TranscriptBlock {
        let id = self.next_block_id;
        self.next_block_id += 1;
        let block = TranscriptBlock {
            id,
            session_id: self.session_id.clone(),
            audio_source,
            source_label: source_label.into(),
            source_text: source_text.into(),
            target_label: target_label.into(),
            translation,
            partial,
            new_topic,
            created_at,
        };
        self.blocks.insert(id, block.clone());
        block
    }

    pub fn block(&self, id: BlockId) -> Option<&TranscriptBlock> {
        self.blocks.get(&id)
    }

    pub fn blocks_in_order(&self) -> impl Iterator<Item = &TranscriptBlock> {
        self.blocks.values()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Appends to the rolling context, trimming to `W` (spec §4.3
    /// `recordContext`).
    pub fn record_context(&mut self, text: impl Into<String>) {
        self.context_buffer.push_back(text.into());
        while self.context_buffer.len() > CONTEXT_WINDOW_SIZE {
            self.context_buffer.pop_front();
        }
    }

    /// Returns a snapshot of the rolling context (spec §4.3
    /// `getContextWindow`).
    pub fn context_window(&self) -> Vec<String> {
        self.context_buffer.iter().cloned().collect()
    }

    pub fn record_key_points(&mut self, points: impl IntoIterator<Item = String>) {
        self.all_key_points.extend(points);
    }

    pub fn record_insight(&mut self, insight: Insight) {
        self.all_educational_insights.push(insight);
    }

    pub fn all_key_points(&self) -> &[String] {
        &self.all_key_points
    }

    pub fn all_insights(&self) -> &[Insight] {
        &self.all_educational_insights
    }

    /// Clears blocks and the rolling context, but keeps cumulative history
    /// (spec §4.3 `reset` — "callers decide when to reset history").
    pub fn reset(&mut self) {
        self.blocks.clear();
        self.context_buffer.clear();
        self.next_block_id = 1;
    }

    pub fn clear_history(&mut self) {
        self.all_key_points.clear();
        self.all_educational_insights.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_ids_are_monotonic() {
        let mut ctx = ContextState::new("s1");
        let b1 = ctx.create_block(AudioSource::System, "EN", "hi", "EN", None, false, false, 0);
        let b2 = ctx.create_block(AudioSource::System, "EN", "there", "EN", None, false, false, 1);
        assert_eq!(b1.id, 1);
        assert_eq!(b2.id, 2);
    }

    #[test]
    fn context_window_trims_to_capacity() {
        let mut ctx = ContextState::new("s1");
        for i in 0..20 {
            ctx.record_context(format!("sentence {i}"));
        }
        assert_eq!(ctx.context_window().len(), CONTEXT_WINDOW_SIZE);
        assert_eq!(ctx.context_window().last().unwrap(), "sentence 19");
    }

    #[test]
    fn reset_preserves_cumulative_history() {
        let mut ctx = ContextState::new("s1");
        ctx.create_block(AudioSource::System, "EN", "hi", "EN", None, false, false, 0);
        ctx.record_key_points(vec!["point".to_string()]);
        ctx.reset();
        assert_eq!(ctx.block_count(), 0);
        assert_eq!(ctx.all_key_points().len(), 1);
    }
}

//! Persistence collaborator contract (spec §6). The core depends on this
//! trait; it does not implement a concrete store. On-disk persistence is
//! explicitly out of scope (spec §1) and the teacher's `sqlx`-backed
//! `database/` module is not carried — see DESIGN.md's dropped-dependency
//! notes.

use async_trait::async_trait;

use crate::context::{Insight, TranscriptBlock};
use crate::dedup::TaskSuggestion;
use crate::error::PersistenceError;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_insight(&self, insight: &Insight) -> Result<(), PersistenceError>;
    async fn insert_block(&self, session_id: &str, block: &TranscriptBlock) -> Result<(), PersistenceError>;
    async fn get_insights_for_session(&self, session_id: &str) -> Result<Vec<Insight>, PersistenceError>;
    async fn get_blocks_for_session(&self, session_id: &str) -> Result<Vec<TranscriptBlock>, PersistenceError>;
    async fn get_tasks_for_session(&self, session_id: &str) -> Result<Vec<TaskSuggestion>, PersistenceError>;
    async fn search_blocks(&self, query: &str, limit: usize) -> Result<Vec<TranscriptBlock>, PersistenceError>;
    async fn search_agents(&self, query: &str, limit: usize) -> Result<Vec<String>, PersistenceError>;
}

/// In-memory test double, used by integration tests and by callers that
/// have not wired a real store yet.
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryStore {
        insights: Mutex<HashMap<String, Vec<Insight>>>,
        blocks: Mutex<HashMap<String, Vec<TranscriptBlock>>>,
        tasks: Mutex<HashMap<String, Vec<TaskSuggestion>>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn record_task(&self, session_id: &str, task: TaskSuggestion) {
            self.tasks.lock().expect("poisoned").entry(session_id.to_string()).or_default().push(task);
        }
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn insert_insight(&self, insight: &Insight) -> Result<(), PersistenceError> {
            self.insights
                .lock()
                .expect("poisoned")
                .entry(insight.session_id.clone())
                .or_default()
                .push(insight.clone());
            Ok(())
        }

        async fn insert_block(&self, session_id: &str, block: &TranscriptBlock) -> Result<(), PersistenceError> {
            self.blocks.lock().expect("poisoned").entry(session_id.to_string()).or_default().push(block.clone());
            Ok(())
        }

        async fn get_insights_for_session(&self, session_id: &str) -> Result<Vec<Insight>, PersistenceError> {
            Ok(self.insights.lock().expect("poisoned").get(session_id).cloned().unwrap_or_default())
        }

        async fn get_blocks_for_session(&self, session_id: &str) -> Result<Vec<TranscriptBlock>, PersistenceError> {
            Ok(self.blocks.lock().expect("poisoned").get(session_id).cloned().unwrap_or_default())
        }

        async fn get_tasks_for_session(&self, session_id: &str) -> Result<Vec<TaskSuggestion>, PersistenceError> {
            Ok(self.tasks.lock().expect("poisoned").get(session_id).cloned().unwrap_or_default())
        }

        async fn search_blocks(&self, query: &str, limit: usize) -> Result<Vec<TranscriptBlock>, PersistenceError> {
            let blocks = self.blocks.lock().expect("poisoned");
            Ok(blocks
                .values()
                .flatten()
                .filter(|b| b.source_text.to_lowercase().contains(&query.to_lowercase()))
                .take(limit)
                .cloned()
                .collect())
        }

        async fn search_agents(&self, _query: &str, _limit: usize) -> Result<Vec<String>, PersistenceError> {
            Ok(Vec::new())
        }
    }
}

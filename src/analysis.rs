//! Analysis scheduler (C9): debounced/heartbeat/retry loop that runs two
//! LLM analyses over the block log as new content accumulates.
//!
//! Grounded on `audio/context_manager.rs`'s task-owning-state-plus-event-
//! broadcaster shape. Single-flight coalescing (spec §4.9, §5, §8 property
//! 10) has no teacher analogue; built from an in-flight flag plus a
//! requested flag checked on completion, the idiomatic translation of the
//! "queued request booleans replaced by a coalescing channel" guidance in
//! spec §9.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::warn;

use crate::context::{ContextState, Insight, InsightKind, TranscriptBlock};
use crate::cost::{CostAccumulator, ProviderPricing, TokenKind};
use crate::dedup::{DedupRing, TaskSuggestion};
use crate::error::ProviderError;
use crate::events::{EventSink, SessionEvent};
use crate::persistence::SessionStore;
use crate::util::now_ms;

pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(300);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const RETRY_DELAY: Duration = Duration::from_secs(2);
pub const TASK_ANALYSIS_INTERVAL: Duration = Duration::from_secs(10);
pub const TASK_ANALYSIS_MAX_BLOCKS: usize = 60;
const SUMMARY_OVERLAP_BLOCKS: usize = 10;
const SUMMARY_WINDOW_BLOCKS: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct SummaryAnalysisOutcome {
    pub key_points: Vec<String>,
    pub insights: Vec<InsightDraft>,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

#[derive(Debug, Clone)]
pub struct InsightDraft {
    pub kind: InsightKind,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub text: String,
    pub details: Option<String>,
    pub transcript_excerpt: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskExtractionOutcome {
    pub tasks: Vec<TaskDraft>,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Prompt templates are opaque to the core (spec §1); these traits are the
/// seam an embedding application fills with a real model client.
#[async_trait]
pub trait SummaryAnalysisModel: Send + Sync {
    async fn analyze(&self, blocks: &[TranscriptBlock], context_window: &[String]) -> Result<SummaryAnalysisOutcome, ProviderError>;
}

#[async_trait]
pub trait TaskExtractionModel: Send + Sync {
    async fn extract(&self, blocks: &[TranscriptBlock]) -> Result<TaskExtractionOutcome, ProviderError>;
}

/// Whether the active transcription pipeline shape is paragraph-buffering
/// or streaming, used by `shouldRunTask`'s widened trigger (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    ChunkBatch,
    Buffering,
    Streaming,
}

pub struct AnalysisScheduler {
    context: Arc<RwLock<ContextState>>,
    store: Arc<dyn SessionStore>,
    summary_model: Arc<dyn SummaryAnalysisModel>,
    task_model: Arc<dyn TaskExtractionModel>,
    events: Arc<EventSink>,
    cost: Arc<CostAccumulator>,
    pricing: ProviderPricing,
    dedup: Mutex<DedupRing>,
    mode: PipelineMode,

    in_flight: AtomicBool,
    requested: AtomicBool,
    task_scan_requested: AtomicBool,
    recording: AtomicBool,
    last_analysis_block_count: AtomicU64,
    last_task_analysis_block_count: AtomicU64,
    last_task_analysis_at_ms: AtomicI64,
    idle: Notify,
}

impl AnalysisScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: Arc<RwLock<ContextState>>,
        store: Arc<dyn SessionStore>,
        summary_model: Arc<dyn SummaryAnalysisModel>,
        task_model: Arc<dyn TaskExtractionModel>,
        events: Arc<EventSink>,
        cost: Arc<CostAccumulator>,
        pricing: ProviderPricing,
        mode: PipelineMode,
    ) -> Arc<Self> {
        Arc::new(Self {
            context,
            store,
            summary_model,
            task_model,
            events,
            cost,
            pricing,
            dedup: Mutex::new(DedupRing::new()),
            mode,
            in_flight: AtomicBool::new(false),
            requested: AtomicBool::new(false),
            task_scan_requested: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            last_analysis_block_count: AtomicU64::new(0),
            last_task_analysis_block_count: AtomicU64::new(0),
            last_task_analysis_at_ms: AtomicI64::new(0),
            idle: Notify::new(),
        })
    }

    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::SeqCst);
    }

    /// Spawns the 5 s heartbeat; runs until `set_recording(false)` (spec
    /// §4.9 point 2).
    pub fn spawn_heartbeat(self: &Arc<Self>) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                if !scheduler.recording.load(Ordering::SeqCst) {
                    break;
                }
                scheduler.schedule_analysis(Duration::ZERO);
            }
        });
    }

    /// Arms a one-shot delayed call to `generate_analysis`, or coalesces
    /// into the in-flight cycle's follow-up (spec §4.9 point 1).
    pub fn schedule_analysis(self: &Arc<Self>, delay: Duration) {
        if self.in_flight.load(Ordering::SeqCst) {
            self.requested.store(true, Ordering::SeqCst);
            return;
        }
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            scheduler.generate_analysis().await;
        });
    }

    pub fn request_task_scan(self: &Arc<Self>) {
        self.task_scan_requested.store(true, Ordering::SeqCst);
        self.events.emit(SessionEvent::Status { message: "Task scan running…".to_string() });
        self.schedule_analysis(Duration::ZERO);
    }

    /// Blocks until the scheduler is not in-flight (spec §4.11 `shutdown`
    /// "awaits ... analysis-idle").
    pub async fn await_idle(&self) {
        loop {
            // The `Notified` future captures `notify_waiters`'s call count at
            // construction time, not at first poll, so it must be built
            // before the `in_flight` check below: otherwise a cycle that
            // finishes (and calls `notify_waiters`) between the check and
            // the `.await` would be missed, hanging shutdown.
            let notified = self.idle.notified();
            if !self.in_flight.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    async fn generate_analysis(self: Arc<Self>) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.requested.store(true, Ordering::SeqCst);
            return;
        }

        let outcome = self.run_one_cycle().await;

        self.in_flight.store(false, Ordering::SeqCst);
        self.idle.notify_waiters();

        let requested = self.requested.swap(false, Ordering::SeqCst);
        let recording = self.recording.load(Ordering::SeqCst);
        let unanalyzed = self.has_unanalyzed_blocks().await;

        if recording && (requested || unanalyzed) {
            let delay = if outcome.is_ok() { Duration::ZERO } else { RETRY_DELAY };
            self.schedule_analysis(delay);
        } else if !recording && requested {
            // One more pass so a task-scan-after-stop completes (spec §4.9
            // point 4).
            self.schedule_analysis(Duration::ZERO);
        }
    }

    async fn has_unanalyzed_blocks(&self) -> bool {
        let context = self.context.read().await;
        context.block_count() as u64 > self.last_analysis_block_count.load(Ordering::SeqCst)
    }

    async fn run_one_cycle(&self) -> Result<(), ()> {
        let task_scan_forced = self.task_scan_requested.swap(false, Ordering::SeqCst);
        let recording = self.recording.load(Ordering::SeqCst);

        let (blocks, context_window, block_count) = {
            let context = self.context.read().await;
            (context.blocks_in_order().cloned().collect::<Vec<_>>(), context.context_window(), context.block_count() as u64)
        };

        let new_since_summary = block_count.saturating_sub(self.last_analysis_block_count.load(Ordering::SeqCst));
        let should_run_summary = new_since_summary > 0 && !(task_scan_forced && !recording);

        let new_since_task = block_count.saturating_sub(self.last_task_analysis_block_count.load(Ordering::SeqCst));
        let now_ms = now_ms();
        let elapsed_since_task =
            now_ms.saturating_sub(self.last_task_analysis_at_ms.load(Ordering::SeqCst)) as u64 >= TASK_ANALYSIS_INTERVAL.as_millis() as u64;
        let should_run_task = task_scan_forced
            || (new_since_task > 0
                && (matches!(self.mode, PipelineMode::Buffering | PipelineMode::Streaming) || elapsed_since_task));

        if !should_run_summary && !should_run_task {
            return Ok(());
        }

        let mut ok = true;
        let mut emitted_task_count = 0usize;

        if should_run_summary {
            if let Err(err) = self.run_summary(&blocks, &context_window, block_count).await {
                warn!(error = %err, "summary analysis cycle failed");
                ok = false;
            }
        }

        if should_run_task {
            let window: Vec<TranscriptBlock> = if task_scan_forced {
                blocks.clone()
            } else {
                blocks.iter().rev().take(TASK_ANALYSIS_MAX_BLOCKS).rev().cloned().collect()
            };
            match self.run_task_extraction(&window, block_count).await {
                Ok(count) => emitted_task_count = count,
                Err(err) => {
                    warn!(error = %err, "task extraction cycle failed");
                    ok = false;
                }
            }
        }

        // A user-forced scan reports its outcome regardless of success, so
        // the caller always sees a terminal status (spec §4.11, §8 S5).
        if task_scan_forced {
            let message = if ok {
                format!("Task scan complete: {emitted_task_count} suggestion(s).")
            } else {
                "Task scan failed.".to_string()
            };
            self.events.emit(SessionEvent::Status { message });
        }

        if ok {
            Ok(())
        } else {
            Err(())
        }
    }

    async fn run_summary(&self, blocks: &[TranscriptBlock], context_window: &[String], block_count: u64) -> Result<(), ProviderError> {
        let window: Vec<TranscriptBlock> = {
            let tail_start = blocks.len().saturating_sub(SUMMARY_WINDOW_BLOCKS + SUMMARY_OVERLAP_BLOCKS);
            blocks[tail_start..].to_vec()
        };

        let result = tokio::time::timeout(Duration::from_secs(30), self.summary_model.analyze(&window, context_window))
            .await
            .map_err(|_| ProviderError::Timeout(Duration::from_secs(30)))??;

        let cost = self.cost.add_cost(result.tokens_in, result.tokens_out, TokenKind::Text, self.pricing);
        self.events.emit(SessionEvent::CostUpdated { cost });

        let mut context = self.context.write().await;
        let existing_points: std::collections::HashSet<String> =
            context.all_key_points().iter().map(|p| crate::dedup::normalize(p)).collect();
        let new_points: Vec<String> =
            result.key_points.into_iter().filter(|p| !existing_points.contains(&crate::dedup::normalize(p))).collect();
        context.record_key_points(new_points);

        let session_id = blocks.first().map(|b| b.session_id.clone()).unwrap_or_default();
        let now = now_ms();
        for draft in result.insights {
            let insight = Insight { id: uuid::Uuid::new_v4().to_string(), kind: draft.kind, text: draft.text, session_id: session_id.clone(), created_at: now };
            context.record_insight(insight.clone());
            let _ = self.store.insert_insight(&insight).await;
            self.events.emit(SessionEvent::InsightAdded { insight });
        }
        drop(context);

        self.events.emit(SessionEvent::SummaryUpdated {
            summary: crate::context::Summary { key_points: self.context.read().await.all_key_points().to_vec(), updated_at: now },
        });

        self.last_analysis_block_count.store(block_count, Ordering::SeqCst);
        Ok(())
    }

    /// Returns the number of suggestions actually emitted after dedup, so a
    /// forced scan can report a terminal count (spec §8 S5).
    async fn run_task_extraction(&self, window: &[TranscriptBlock], block_count: u64) -> Result<usize, ProviderError> {
        let result = tokio::time::timeout(Duration::from_secs(15), self.task_model.extract(window))
            .await
            .map_err(|_| ProviderError::Timeout(Duration::from_secs(15)))??;

        let cost = self.cost.add_cost(result.tokens_in, result.tokens_out, TokenKind::Text, self.pricing);
        self.events.emit(SessionEvent::CostUpdated { cost });

        let session_id = window.first().map(|b| b.session_id.clone()).unwrap_or_default();
        let persisted: Vec<String> = self
            .store
            .get_tasks_for_session(&session_id)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.text)
            .collect();

        let mut dedup = self.dedup.lock().await;
        let mut batch_so_far: Vec<String> = Vec::new();
        let mut emitted = 0usize;
        for draft in result.tasks {
            if dedup.try_emit(&draft.text, &persisted, &batch_so_far) {
                batch_so_far.push(draft.text.clone());
                let task = TaskSuggestion {
                    id: uuid::Uuid::new_v4().to_string(),
                    text: draft.text,
                    details: draft.details,
                    transcript_excerpt: draft.transcript_excerpt,
                    session_id: session_id.clone(),
                    created_at: now_ms(),
                };
                self.events.emit(SessionEvent::TaskSuggested { task });
                emitted += 1;
            }
        }
        drop(dedup);

        self.last_task_analysis_block_count.store(block_count, Ordering::SeqCst);
        self.last_task_analysis_at_ms.store(now_ms(), Ordering::SeqCst);
        Ok(emitted)
    }
}

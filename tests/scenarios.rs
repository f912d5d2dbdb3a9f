//! End-to-end scenarios S1-S6 (spec §8), exercising `SessionOrchestrator`
//! against fake providers and an in-memory `SessionStore`. Placement
//! grounded on the teacher's `audio/tests/{integration_tests,e2e_tests}.rs`
//! convention of a top-level `tests/` directory for cross-component
//! scenarios (unit-level properties live inline in `#[cfg(test)]` modules).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use convo_engine::analysis::{SummaryAnalysisModel, SummaryAnalysisOutcome, TaskDraft, TaskExtractionModel, TaskExtractionOutcome};
use convo_engine::cost::ProviderPricing;
use convo_engine::error::ProviderError;
use convo_engine::paragraph::{ParagraphDecision, ParagraphDecisionModel, PolishModel};
use convo_engine::persistence::memory::MemoryStore;
use convo_engine::providers::{StreamEvent, TokenUsage, TranscriptionStream};
use convo_engine::queue::MAX_QUEUE_SIZE;
use convo_engine::{
    ActiveProvider, AudioSource, ChunkModeProvider, Config, SessionCollaborators, SessionEvent, SessionOrchestrator, SessionState,
    StreamModeProvider, TranscriptionOutcome, TranscriptionProviderKind,
};

fn silent_window(bytes: usize) -> Vec<u8> {
    vec![0u8; bytes]
}

fn loud_window(bytes: usize) -> Vec<u8> {
    let mut v = Vec::with_capacity(bytes);
    for _ in 0..bytes / 2 {
        v.extend_from_slice(&5000i16.to_le_bytes());
    }
    v
}

/// One VAD window at the default 16kHz/16-bit/mono config (spec §4.1).
const WINDOW_BYTES: usize = 3200;

fn zero_pricing() -> ProviderPricing {
    ProviderPricing { audio_input_per_token: 0.0, text_input_per_token: 0.0, output_per_token: 0.0 }
}

struct AlwaysCommit;

#[async_trait]
impl ParagraphDecisionModel for AlwaysCommit {
    async fn decide(&self, _transcript: &str) -> Result<ParagraphDecision, ProviderError> {
        Ok(ParagraphDecision { should_commit: true, is_partial: false })
    }
}

struct Identity;

#[async_trait]
impl PolishModel for Identity {
    async fn polish(&self, transcript: &str) -> Result<String, ProviderError> {
        Ok(transcript.to_string())
    }
}

struct EmptySummary;

#[async_trait]
impl SummaryAnalysisModel for EmptySummary {
    async fn analyze(&self, _blocks: &[convo_engine::TranscriptBlock], _ctx: &[String]) -> Result<SummaryAnalysisOutcome, ProviderError> {
        Ok(SummaryAnalysisOutcome::default())
    }
}

struct EmptyTasks;

#[async_trait]
impl TaskExtractionModel for EmptyTasks {
    async fn extract(&self, _blocks: &[convo_engine::TranscriptBlock]) -> Result<TaskExtractionOutcome, ProviderError> {
        Ok(TaskExtractionOutcome::default())
    }
}

struct FixedSummary;

#[async_trait]
impl SummaryAnalysisModel for FixedSummary {
    async fn analyze(&self, _blocks: &[convo_engine::TranscriptBlock], _ctx: &[String]) -> Result<SummaryAnalysisOutcome, ProviderError> {
        Ok(SummaryAnalysisOutcome { key_points: vec!["discussed the roadmap".to_string()], insights: vec![], tokens_in: 5, tokens_out: 2 })
    }
}

/// Echoes a fixed transcript (and, if constructed with translation on, a
/// fixed translation) for every chunk, reporting nonzero token usage so
/// `cost-updated` assertions have something to check (spec §4.5.1).
struct EchoProvider {
    translation_enabled: bool,
}

#[async_trait]
impl ChunkModeProvider for EchoProvider {
    async fn transcribe_chunk(
        &self,
        _pcm_chunk: &[u8],
        _source_lang: &str,
        _target_lang: &str,
        _translation_enabled: bool,
        _prompt_context: &[String],
    ) -> Result<TranscriptionOutcome, ProviderError> {
        let usage = TokenUsage { tokens_in: 20, tokens_out: 8 };
        Ok(if self.translation_enabled {
            TranscriptionOutcome::Translated {
                transcript: "hello world.".to_string(),
                translation: "hola mundo.".to_string(),
                detected_lang: "en".to_string(),
                is_partial: false,
                is_new_topic: false,
                usage,
            }
        } else {
            TranscriptionOutcome::SourceOnly {
                transcript: "hello world.".to_string(),
                detected_lang: "en".to_string(),
                is_partial: false,
                is_new_topic: false,
                usage,
            }
        })
    }
}

fn make_collaborators(
    summary: Arc<dyn SummaryAnalysisModel>,
    task: Arc<dyn TaskExtractionModel>,
) -> SessionCollaborators {
    SessionCollaborators {
        store: Arc::new(MemoryStore::new()),
        decision_model: Arc::new(AlwaysCommit),
        polish_model: Arc::new(Identity),
        summary_model: summary,
        task_model: task,
        pricing: zero_pricing(),
    }
}

fn chunk_orchestrator(translation_enabled: bool, summary: Arc<dyn SummaryAnalysisModel>, task: Arc<dyn TaskExtractionModel>) -> Arc<SessionOrchestrator> {
    let config = Config { transcription_provider: TranscriptionProviderKind::BatchStructured, translation_enabled, ..Config::default() };
    SessionOrchestrator::new(
        "s1",
        config,
        ActiveProvider::Chunk(Arc::new(EchoProvider { translation_enabled })),
        make_collaborators(summary, task),
    )
}

async fn drain_until<F>(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>, deadline: Duration, mut matches: F) -> bool
where
    F: FnMut(&SessionEvent) -> bool,
{
    let start = tokio::time::Instant::now();
    loop {
        let remaining = deadline.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return false;
        }
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) if matches(&event) => return true,
            Ok(Ok(_)) => continue,
            _ => return false,
        }
    }
}

// S1: Silent input produces no blocks (spec §8).
#[tokio::test]
async fn s1_silent_input_produces_no_blocks() {
    let orchestrator = chunk_orchestrator(false, Arc::new(EmptySummary), Arc::new(EmptyTasks));
    let mut events = orchestrator.subscribe();

    orchestrator.start_recording(false).await.unwrap();
    assert!(drain_until(&mut events, Duration::from_secs(1), |e| matches!(e, SessionEvent::Status { message } if message == "Listening...")).await);

    orchestrator.feed_system_audio(silent_window(WINDOW_BYTES * 50)).await;

    let saw_block = drain_until(&mut events, Duration::from_millis(300), |e| matches!(e, SessionEvent::BlockAdded { .. })).await;
    assert!(!saw_block, "silent input must never produce a block");

    orchestrator.stop_recording(false, false, false).await;
}

// S2: single utterance, translation on, expects a translated block plus a
// cost update and an eventual summary (spec §8). batch-structured commits
// straight into C3 (spec §2, §4.6), so no paragraph-buffer partial events
// are expected here.
#[tokio::test]
async fn s2_single_utterance_batch_structured_translation_on() {
    let orchestrator = chunk_orchestrator(true, Arc::new(FixedSummary), Arc::new(EmptyTasks));
    let mut events = orchestrator.subscribe();
    orchestrator.start_recording(false).await.unwrap();

    // ~1.2s speech (12 windows) then ~0.6s silence (6 windows, past the
    // 450ms flush threshold).
    let mut pcm = Vec::new();
    for _ in 0..12 {
        pcm.extend(loud_window(WINDOW_BYTES));
    }
    for _ in 0..6 {
        pcm.extend(silent_window(WINDOW_BYTES));
    }
    orchestrator.feed_system_audio(pcm).await;

    let mut saw_block = false;
    let mut saw_cost = false;
    let start = tokio::time::Instant::now();
    while start.elapsed() < Duration::from_secs(2) {
        match tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
            Ok(Ok(SessionEvent::BlockAdded { block })) => {
                assert!(!block.source_text.is_empty());
                assert_eq!(block.translation.as_deref(), Some("hola mundo."));
                assert!(!block.partial);
                saw_block = true;
            }
            Ok(Ok(SessionEvent::CostUpdated { cost })) => {
                if cost.total_input_tokens > 0 {
                    saw_cost = true;
                }
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
        if saw_block && saw_cost {
            break;
        }
    }

    assert!(saw_block, "expected one translated block");
    assert!(saw_cost, "expected a cost-updated event with nonzero tokens");

    let saw_summary = drain_until(&mut events, Duration::from_secs(2), |e| matches!(e, SessionEvent::SummaryUpdated { .. })).await;
    assert!(saw_summary, "expected a summary-updated event within the analysis debounce window");

    orchestrator.stop_recording(false, false, false).await;
}

// S3: queue saturation drops all but the most recent maxQueueSize chunks
// (spec §8).
#[tokio::test]
async fn s3_queue_saturation_keeps_only_the_most_recent_chunks() {
    let orchestrator = chunk_orchestrator(false, Arc::new(EmptySummary), Arc::new(EmptyTasks));
    let mut events = orchestrator.subscribe();
    orchestrator.start_recording(false).await.unwrap();

    // 30 bursts, each 6 speech windows (600ms, clears min_chunk_ms) plus 5
    // silence windows (500ms, clears the 450ms flush threshold), all fed as
    // a single write so every chunk is emitted by the VAD before the worker
    // gets a chance to drain any of them (spec §4.7, §8 S3).
    let mut pcm = Vec::new();
    for _ in 0..30 {
        for _ in 0..6 {
            pcm.extend(loud_window(WINDOW_BYTES));
        }
        for _ in 0..5 {
            pcm.extend(silent_window(WINDOW_BYTES));
        }
    }
    orchestrator.feed_system_audio(pcm).await;

    let mut block_count = 0usize;
    let start = tokio::time::Instant::now();
    while start.elapsed() < Duration::from_secs(3) {
        match tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
            Ok(Ok(SessionEvent::BlockAdded { .. })) => block_count += 1,
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }

    assert_eq!(block_count, MAX_QUEUE_SIZE, "expected exactly maxQueueSize blocks after drop-oldest saturation");

    orchestrator.stop_recording(false, false, false).await;
}

/// Sends three partials then a committed paragraph, matching the S4
/// scenario's literal fragment sequence (spec §8).
struct ScriptedStreamProvider;

#[async_trait]
impl StreamModeProvider for ScriptedStreamProvider {
    async fn open_stream(&self, _source: AudioSource, _language: &str) -> Result<TranscriptionStream, ProviderError> {
        let (pcm_tx, mut pcm_rx) = mpsc::channel::<Vec<u8>>(8);
        let (event_tx, event_rx) = mpsc::channel::<StreamEvent>(8);
        let (close_tx, mut close_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move { while pcm_rx.recv().await.is_some() {} });

        tokio::spawn(async move {
            for text in ["hello", "hello world", "hello world."] {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if event_tx.send(StreamEvent::Partial { text: text.to_string() }).await.is_err() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = event_tx.send(StreamEvent::Committed { text: "hello world.".to_string(), language_hint: Some("en".to_string()) }).await;
            let _ = close_rx.recv().await;
        });

        Ok(TranscriptionStream::new(pcm_tx, event_rx, close_tx))
    }
}

// S4: streaming paragraph commit — three partials then one committed block,
// followed by the empty-string partial (spec §8).
#[tokio::test]
async fn s4_paragraph_commit_streaming() {
    let config = Config { transcription_provider: TranscriptionProviderKind::RealtimeStream, ..Config::default() };
    let orchestrator = SessionOrchestrator::new(
        "s1",
        config,
        ActiveProvider::Stream(Arc::new(ScriptedStreamProvider)),
        make_collaborators(Arc::new(EmptySummary), Arc::new(EmptyTasks)),
    );
    let mut events = orchestrator.subscribe();
    orchestrator.start_recording(false).await.unwrap();

    let mut partials = Vec::new();
    let mut block_text = None;
    let mut saw_empty_partial = false;
    let start = tokio::time::Instant::now();
    while start.elapsed() < Duration::from_secs(2) {
        match tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
            Ok(Ok(SessionEvent::Partial { text, .. })) if text.is_empty() => saw_empty_partial = true,
            Ok(Ok(SessionEvent::Partial { text, .. })) => partials.push(text),
            Ok(Ok(SessionEvent::BlockAdded { block })) => block_text = Some(block.source_text),
            Ok(Ok(_)) => continue,
            _ => break,
        }
        if block_text.is_some() && saw_empty_partial {
            break;
        }
    }

    assert_eq!(partials, vec!["hello", "hello world", "hello world."]);
    assert_eq!(block_text.as_deref(), Some("hello world."));
    assert!(saw_empty_partial, "expected the empty-string partial after commit");

    orchestrator.stop_recording(false, false, false).await;
}

/// Returns two tasks, one of which duplicates an already-persisted task
/// (spec §8 S5, §4.10).
struct TaskModelWithDuplicate {
    calls: AtomicUsize,
}

#[async_trait]
impl TaskExtractionModel for TaskModelWithDuplicate {
    async fn extract(&self, _blocks: &[convo_engine::TranscriptBlock]) -> Result<TaskExtractionOutcome, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TaskExtractionOutcome {
            tasks: vec![
                TaskDraft { text: "email the client".to_string(), details: None, transcript_excerpt: None },
                TaskDraft { text: "book the conference room".to_string(), details: None, transcript_excerpt: None },
            ],
            tokens_in: 10,
            tokens_out: 4,
        })
    }
}

// S5: forced task scan emits status events describing the outcome and the
// deduped task suggestions (spec §8).
#[tokio::test]
async fn s5_forced_task_scan_reports_status_and_suggestions() {
    let task_model = Arc::new(TaskModelWithDuplicate { calls: AtomicUsize::new(0) });
    let orchestrator = chunk_orchestrator(false, Arc::new(EmptySummary), task_model);
    let mut events = orchestrator.subscribe();
    orchestrator.start_recording(false).await.unwrap();

    // Produce five blocks so the scan has content to work from (spec §8
    // S5's "5 existing blocks").
    for _ in 0..5 {
        let mut pcm = Vec::new();
        for _ in 0..6 {
            pcm.extend(loud_window(WINDOW_BYTES));
        }
        for _ in 0..5 {
            pcm.extend(silent_window(WINDOW_BYTES));
        }
        orchestrator.feed_system_audio(pcm).await;
    }
    assert!(drain_until(&mut events, Duration::from_secs(2), |e| matches!(e, SessionEvent::BlockAdded { .. })).await);

    orchestrator.request_task_scan();

    let mut saw_running = false;
    let mut suggestions = Vec::new();
    let mut saw_complete = false;
    let start = tokio::time::Instant::now();
    while start.elapsed() < Duration::from_secs(2) {
        match tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
            Ok(Ok(SessionEvent::Status { message })) if message == "Task scan running…" => saw_running = true,
            Ok(Ok(SessionEvent::TaskSuggested { task })) => suggestions.push(task.text),
            Ok(Ok(SessionEvent::Status { message })) if message.starts_with("Task scan complete") => {
                saw_complete = true;
                break;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }

    assert!(saw_running, "expected the 'Task scan running…' status");
    assert!(saw_complete, "expected a 'Task scan complete' status");
    assert_eq!(suggestions.len(), 2, "both distinct task drafts should be emitted on the first scan");

    orchestrator.stop_recording(false, false, false).await;
}

// S6: system audio overlapping the mic grace window is dropped; mic audio
// itself always produces a block (spec §8).
#[tokio::test]
async fn s6_mic_priority_ducks_overlapping_system_audio() {
    let orchestrator = chunk_orchestrator(false, Arc::new(EmptySummary), Arc::new(EmptyTasks));
    let mut events = orchestrator.subscribe();
    orchestrator.start_recording(false).await.unwrap();
    orchestrator.start_mic().await.unwrap();

    let mut burst = Vec::new();
    for _ in 0..6 {
        burst.extend(loud_window(WINDOW_BYTES));
    }
    for _ in 0..5 {
        burst.extend(silent_window(WINDOW_BYTES));
    }

    orchestrator.feed_mic_audio(burst.clone()).await;
    // Well inside the 300ms mic-priority grace window.
    tokio::time::sleep(Duration::from_millis(50)).await;
    orchestrator.feed_system_audio(burst.clone()).await;

    // Drain whatever arrives for a window that would have been long enough
    // for the ducked system burst to produce a block, were it not ducked.
    let mut system_blocked = false;
    let mut mic_blocked = false;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(900);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Ok(SessionEvent::BlockAdded { block })) => match block.audio_source {
                AudioSource::System => system_blocked = true,
                AudioSource::Microphone => mic_blocked = true,
            },
            Ok(Ok(_)) => continue,
            _ => continue,
        }
    }
    assert!(mic_blocked, "microphone speech must always be transcribed");
    assert!(!system_blocked, "system audio overlapping the mic grace window must be ducked");

    // Past the grace window, system audio is no longer ducked.
    tokio::time::sleep(Duration::from_millis(350)).await;
    orchestrator.feed_system_audio(burst).await;
    let saw_system_block = drain_until(&mut events, Duration::from_secs(1), |e| {
        matches!(e, SessionEvent::BlockAdded { block } if block.audio_source == AudioSource::System)
    })
    .await;
    assert!(saw_system_block, "system audio after the grace window should be transcribed");

    orchestrator.stop_recording(false, false, false).await;
}

// Orchestrator-level guard: starting twice is rejected (spec §4.11
// "Idempotent when already recording").
#[tokio::test]
async fn start_recording_twice_is_rejected() {
    let orchestrator = chunk_orchestrator(false, Arc::new(EmptySummary), Arc::new(EmptyTasks));
    orchestrator.start_recording(false).await.unwrap();
    assert!(orchestrator.start_recording(false).await.is_err());
    orchestrator.stop_recording(false, false, false).await;
}

// state-change events transition Idle-less (no explicit Idle emission
// pre-start) straight to Recording then Stopped (spec §4.11 event fan-out).
#[tokio::test]
async fn state_changes_follow_recording_lifecycle() {
    let orchestrator = chunk_orchestrator(false, Arc::new(EmptySummary), Arc::new(EmptyTasks));
    let mut events = orchestrator.subscribe();
    orchestrator.start_recording(false).await.unwrap();
    assert!(drain_until(&mut events, Duration::from_secs(1), |e| matches!(e, SessionEvent::StateChange { state } if *state == SessionState::Recording)).await);
    orchestrator.stop_recording(false, false, false).await;
    assert!(drain_until(&mut events, Duration::from_secs(1), |e| matches!(e, SessionEvent::StateChange { state } if *state == SessionState::Stopped)).await);
}

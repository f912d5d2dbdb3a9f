//! Session orchestrator (C11): wires every collaborator together behind a
//! small lifecycle API.
//!
//! Grounded end-to-end on `audio/context_manager.rs::StreamingTranscriptionContextManager`
//! (lifecycle methods, `Vec<JoinHandle<()>>` task bookkeeping, `Arc<AtomicBool>`
//! active flag, `Drop` impl), generalized from two hardcoded sources and one
//! engine to the system/microphone sources and four-provider abstraction
//! spec §3/§4 name.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::analysis::AnalysisScheduler;
use crate::config::{Config, TranscriptionProviderKind};
use crate::context::ContextState;
use crate::cost::{CostAccumulator, ProviderPricing, TokenKind};
use crate::duck::MicDuck;
use crate::error::SessionError;
use crate::events::{AudioSource, EventSink, SessionEvent, SessionState};
use crate::paragraph::{ParagraphBuffer, ParagraphDecisionModel, PolishModel};
use crate::persistence::SessionStore;
use crate::providers::{ChunkModeProvider, StreamEvent, StreamModeProvider, TranscriptionOutcome};
use crate::queue::SourceQueue;
use crate::recovery::{RecoveryAction, RecoveryStrategy, RecoveryTracker};
use crate::util::now_ms;
use crate::vad::{VadConfig, VadSegmenter};

/// Either shape a concrete provider can take (spec §4.5). The session picks
/// a code path once at construction, based on `Config::transcription_provider`.
pub enum ActiveProvider {
    Chunk(Arc<dyn ChunkModeProvider>),
    Stream(Arc<dyn StreamModeProvider>),
}

const MIC_DUCK_GRACE: Duration = Duration::from_millis(300);
const FEED_CHANNEL_CAPACITY: usize = 64;

struct SourceHandle {
    feed: mpsc::Sender<Vec<u8>>,
}

/// Flags a worker reads once its feed channel closes, set by `stop_recording`
/// just before the channels are dropped (spec §4.11 `stopRecording` params).
#[derive(Default)]
struct ShutdownFlags {
    flush_remaining: AtomicBool,
    commit_pending_paragraphs: AtomicBool,
    clear_queue: AtomicBool,
}

/// Everything the orchestrator needs beyond the provider itself (spec §4.9's
/// two model seams plus the persistence collaborator, spec §6).
pub struct SessionCollaborators {
    pub store: Arc<dyn SessionStore>,
    pub decision_model: Arc<dyn ParagraphDecisionModel>,
    pub polish_model: Arc<dyn PolishModel>,
    pub summary_model: Arc<dyn crate::analysis::SummaryAnalysisModel>,
    pub task_model: Arc<dyn crate::analysis::TaskExtractionModel>,
    pub pricing: ProviderPricing,
}

pub struct SessionOrchestrator {
    session_id: String,
    config: RwLock<Config>,
    provider: ActiveProvider,
    collaborators: SessionCollaborators,

    context: Arc<RwLock<ContextState>>,
    events: Arc<EventSink>,
    cost: Arc<CostAccumulator>,
    duck: Arc<MicDuck>,
    recovery: Arc<RecoveryTracker>,
    analysis: Arc<AnalysisScheduler>,

    active: Arc<AtomicBool>,
    mic_active: Arc<AtomicBool>,
    sources: DashMap<AudioSource, SourceHandle>,
    tasks: RwLock<Vec<JoinHandle<()>>>,
    shutdown_flags: Arc<ShutdownFlags>,
}

impl SessionOrchestrator {
    pub fn new(session_id: impl Into<String>, config: Config, provider: ActiveProvider, collaborators: SessionCollaborators) -> Arc<Self> {
        let session_id = session_id.into();
        let context = Arc::new(RwLock::new(ContextState::new(session_id.clone())));
        let events = Arc::new(EventSink::default());
        let cost = Arc::new(CostAccumulator::new());
        let recovery = RecoveryTracker::new();
        let mode = match config.transcription_provider {
            TranscriptionProviderKind::RealtimeStream => crate::analysis::PipelineMode::Streaming,
            TranscriptionProviderKind::Local => crate::analysis::PipelineMode::Buffering,
            _ => crate::analysis::PipelineMode::ChunkBatch,
        };

        let analysis = AnalysisScheduler::new(
            context.clone(),
            collaborators.store.clone(),
            collaborators.summary_model.clone(),
            collaborators.task_model.clone(),
            events.clone(),
            cost.clone(),
            collaborators.pricing,
            mode,
        );

        Arc::new(Self {
            session_id,
            config: RwLock::new(config),
            provider,
            collaborators,
            context,
            events,
            cost,
            duck: Arc::new(MicDuck::new(MIC_DUCK_GRACE)),
            recovery,
            analysis,
            active: Arc::new(AtomicBool::new(false)),
            mic_active: Arc::new(AtomicBool::new(false)),
            sources: DashMap::new(),
            tasks: RwLock::new(Vec::new()),
            shutdown_flags: Arc::new(ShutdownFlags::default()),
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn initialize(&self) {
        self.recovery.set_strategy("queue-worker", RecoveryStrategy::Continue).await;
        self.recovery.set_strategy("realtime-stream", RecoveryStrategy::Retry { max_attempts: 6, base_delay: Duration::from_millis(500) }).await;
        self.events.emit(SessionEvent::Status { message: "initialized".to_string() });
        self.events.emit(SessionEvent::StateChange { state: SessionState::Idle });
    }

    /// Starts system-source capture (spec §4.11 `startRecording`). `resume`
    /// preserves the block log and cumulative cost instead of resetting it.
    pub async fn start_recording(self: &Arc<Self>, resume: bool) -> Result<(), SessionError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyRecording);
        }
        if !resume {
            self.context.write().await.reset();
            self.cost.reset();
        }

        self.analysis.set_recording(true);
        self.analysis.spawn_heartbeat();
        self.spawn_source(AudioSource::System).await?;
        self.events.emit(SessionEvent::StateChange { state: SessionState::Recording });
        self.events.emit(SessionEvent::Status { message: "Listening...".to_string() });
        Ok(())
    }

    pub async fn start_mic(self: &Arc<Self>) -> Result<(), SessionError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(SessionError::NotRecording);
        }
        if self.mic_active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.spawn_source(AudioSource::Microphone).await
    }

    pub fn stop_mic(&self) {
        self.mic_active.store(false, Ordering::SeqCst);
        self.sources.remove(&AudioSource::Microphone);
    }

    pub async fn feed_system_audio(&self, pcm: Vec<u8>) {
        self.feed(AudioSource::System, pcm).await;
    }

    pub async fn feed_mic_audio(&self, pcm: Vec<u8>) {
        self.feed(AudioSource::Microphone, pcm).await;
    }

    async fn feed(&self, source: AudioSource, pcm: Vec<u8>) {
        let sender = self.sources.get(&source).map(|handle| handle.feed.clone());
        if let Some(sender) = sender {
            if sender.send(pcm).await.is_err() {
                warn!(?source, "source worker is gone, dropping audio");
            }
        }
    }

    pub async fn toggle_translation(&self) {
        let mut config = self.config.write().await;
        config.translation_enabled = !config.translation_enabled;
    }

    pub fn request_task_scan(self: &Arc<Self>) {
        self.analysis.request_task_scan();
    }

    /// Stops capture (spec §4.11 `stopRecording`). `flush_remaining` forces
    /// a VAD flush per source before the worker exits; `commit_pending_paragraphs`
    /// force-commits any buffered fragment; `clear_queue` drops unprocessed
    /// chunks instead of draining them.
    pub async fn stop_recording(self: &Arc<Self>, flush_remaining: bool, commit_pending_paragraphs: bool, clear_queue: bool) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.analysis.set_recording(false);
        self.mic_active.store(false, Ordering::SeqCst);

        self.shutdown_flags.flush_remaining.store(flush_remaining, Ordering::SeqCst);
        self.shutdown_flags.commit_pending_paragraphs.store(commit_pending_paragraphs, Ordering::SeqCst);
        self.shutdown_flags.clear_queue.store(clear_queue, Ordering::SeqCst);

        // Dropping the feed senders closes each worker's channel, letting it
        // run its own graceful wind-down (spec §4.11); abort is only a
        // backstop for a worker that is stuck mid-provider-call.
        self.sources.clear();

        let mut tasks = self.tasks.write().await;
        for task in tasks.drain(..) {
            let abort_handle = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(3), task).await.is_err() {
                warn!("source worker did not wind down in time, aborting");
                abort_handle.abort();
            }
        }
        drop(tasks);

        self.events.emit(SessionEvent::StateChange { state: SessionState::Stopped });
    }

    /// Drains in-flight analysis before returning, per spec §4.11 shutdown
    /// semantics.
    pub async fn shutdown(self: &Arc<Self>) {
        self.stop_recording(true, true, true).await;
        self.analysis.await_idle().await;
    }

    async fn spawn_source(self: &Arc<Self>, source: AudioSource) -> Result<(), SessionError> {
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        self.sources.insert(source, SourceHandle { feed: tx });

        let orchestrator = Arc::clone(self);
        let handle = match &self.provider {
            ActiveProvider::Chunk(provider) => {
                let provider = Arc::clone(provider);
                tokio::spawn(async move { orchestrator.run_chunk_worker(source, rx, provider).await })
            }
            ActiveProvider::Stream(provider) => {
                let provider = Arc::clone(provider);
                let language = self.config.read().await.source_lang.clone();
                tokio::spawn(async move { orchestrator.run_stream_worker(source, rx, provider, language).await })
            }
        };
        self.tasks.write().await.push(handle);
        Ok(())
    }

    fn vad_config_for(&self, source: AudioSource, provider_kind: TranscriptionProviderKind) -> VadConfig {
        if provider_kind == TranscriptionProviderKind::Local {
            return VadConfig::local_provider_default();
        }
        match source {
            AudioSource::System => VadConfig::system_default(),
            AudioSource::Microphone => VadConfig::microphone_default(),
        }
    }

    /// Chunk-mode per-source worker: VAD -> queue (with overlap splice) ->
    /// serialized provider calls -> paragraph buffer -> block commit (spec
    /// §4.1, §4.5, §4.6, §4.7).
    async fn run_chunk_worker(self: Arc<Self>, source: AudioSource, mut rx: mpsc::Receiver<Vec<u8>>, provider: Arc<dyn ChunkModeProvider>) {
        let provider_kind = self.config.read().await.transcription_provider;
        let mut vad = VadSegmenter::new(self.vad_config_for(source, provider_kind));
        let mut queue = SourceQueue::new();
        let mut paragraph = ParagraphBuffer::new(source, crate::paragraph::DEFAULT_DECISION_INTERVAL);
        let is_local = provider_kind == TranscriptionProviderKind::Local;

        loop {
            let bytes = match rx.recv().await {
                Some(bytes) => bytes,
                None => break,
            };

            let now = now_ms();
            if source == AudioSource::Microphone {
                // A coarse non-silent-write check (spec §4.8); per-window
                // precision isn't needed since the duck gate only has to be
                // roughly right (spec §4.8 "a stale timestamp can at worst
                // pass one system window through").
                if !crate::pcm::is_silent(&bytes, crate::vad::MIC_SILENCE_THRESHOLD_RMS) {
                    self.duck.record_mic_speech(now as u64);
                }
            } else if self.duck.should_duck_system(now as u64) {
                continue;
            }

            for chunk in vad.push(&bytes) {
                queue.push(chunk, now);
            }

            while let Some(item) = queue.pop() {
                match self
                    .process_chunk(source, &provider, &item.chunk, &mut paragraph, is_local)
                    .await
                {
                    Ok(()) => {
                        self.recovery.reset("queue-worker").await;
                    }
                    Err(err) if err.is_shutdown_race() => {
                        // Cancellation during shutdown; exit quietly (spec §7).
                        return;
                    }
                    Err(err) if err.is_transient() => {
                        // Timeout/transport errors drop the chunk and continue
                        // (spec §4.7); only the retry/stop decision is
                        // delegated to the recovery tracker's escalation.
                        let action = self.recovery.record_failure("queue-worker", &err.to_string()).await;
                        if matches!(action, RecoveryAction::Stop) {
                            warn!(?source, "transient error budget exhausted, stopping recording");
                            self.events.emit(SessionEvent::Error { message: err.to_string(), fatal: true });
                            let orchestrator = Arc::clone(&self);
                            tokio::spawn(async move { orchestrator.stop_recording(false, false, true).await });
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(?source, error = %err, "fatal provider error, stopping recording");
                        queue.clear();
                        self.events.emit(SessionEvent::Error { message: err.to_string(), fatal: true });
                        let orchestrator = Arc::clone(&self);
                        tokio::spawn(async move { orchestrator.stop_recording(false, false, true).await });
                        return;
                    }
                }
            }
        }

        if self.shutdown_flags.flush_remaining.load(Ordering::SeqCst) {
            if let Some(flushed) = vad.flush() {
                queue.push(flushed, now_ms());
            }
            if self.shutdown_flags.clear_queue.load(Ordering::SeqCst) {
                queue.clear();
            } else {
                while let Some(item) = queue.pop() {
                    let _ = self.process_chunk(source, &provider, &item.chunk, &mut paragraph, is_local).await;
                }
            }
        }
        if self.shutdown_flags.commit_pending_paragraphs.load(Ordering::SeqCst) {
            if let Some(pending) = paragraph.force_flush() {
                self.commit_paragraph(source, pending, is_local).await;
            }
        }
    }

    async fn process_chunk(
        &self,
        source: AudioSource,
        provider: &Arc<dyn ChunkModeProvider>,
        chunk: &[u8],
        paragraph: &mut ParagraphBuffer,
        is_local: bool,
    ) -> Result<(), crate::error::ProviderError> {
        let config = self.config.read().await;
        let source_lang = config.source_lang.clone();
        let target_lang = config.target_lang.clone();
        let translation_enabled = config.translation_enabled;
        drop(config);

        let context_snapshot = self.context.read().await.context_window();
        let outcome = provider.transcribe_chunk(chunk, &source_lang, &target_lang, translation_enabled, &context_snapshot).await?;

        if outcome.transcript().trim().is_empty() {
            return Ok(());
        }

        let cost = self.cost.add_cost(outcome.usage().tokens_in, outcome.usage().tokens_out, TokenKind::Audio, self.collaborators.pricing);
        self.events.emit(SessionEvent::CostUpdated { cost });

        // Only providers that stream sub-paragraph fragments need C6 (spec
        // §4.6: "local provider"; realtime-stream is handled in
        // `run_stream_worker`). batch-structured/batch-stt-post already
        // return a complete chunk result, so it commits straight into C3
        // using the provider's own `is_partial`/`is_new_topic` flags (spec
        // §2 data flow, §4.5).
        if !is_local {
            self.commit_chunk_direct(source, outcome).await;
            return Ok(());
        }

        let merged = paragraph.merge(outcome.transcript(), None, now_ms());
        self.events.emit(SessionEvent::Partial { source, text: merged });

        let should_commit = match tokio::time::timeout(Duration::from_secs(2), self.collaborators.decision_model.decide(paragraph.transcript().unwrap_or(""))).await {
            Ok(Ok(decision)) => decision.should_commit,
            _ => crate::paragraph::heuristic_should_commit(paragraph.transcript().unwrap_or("")),
        } || outcome.is_new_topic();

        if should_commit {
            if let Some(pending) = paragraph.take_for_commit() {
                self.commit_paragraph_with_outcome(source, pending, outcome, is_local).await;
                // The empty-string partial signals no pending text (spec §5,
                // §8 S4).
                self.events.emit(SessionEvent::Partial { source, text: String::new() });
            }
        }
        Ok(())
    }

    /// Commits a batch-structured/batch-stt-post chunk result straight into
    /// C3, bypassing the paragraph buffer entirely (spec §2, §4.6).
    async fn commit_chunk_direct(&self, source: AudioSource, outcome: TranscriptionOutcome) {
        let (transcript, translation, detected_lang, is_partial, new_topic) = match outcome {
            TranscriptionOutcome::Translated { transcript, translation, detected_lang, is_partial, is_new_topic, .. } => {
                (transcript, Some(translation), detected_lang, is_partial, is_new_topic)
            }
            TranscriptionOutcome::SourceOnly { transcript, detected_lang, is_partial, is_new_topic, .. } => {
                (transcript, None, detected_lang, is_partial, is_new_topic)
            }
        };

        let target_lang = self.config.read().await.target_lang.clone();
        let mut context = self.context.write().await;
        let block = context.create_block(source, detected_lang, transcript.clone(), target_lang, translation, is_partial, new_topic, now_ms());
        context.record_context(transcript);
        drop(context);

        let _ = self.collaborators.store.insert_block(&self.session_id, &block).await;
        self.events.emit(SessionEvent::BlockAdded { block });
        self.analysis.schedule_analysis(Duration::from_millis(300));
    }

    async fn commit_paragraph(&self, source: AudioSource, pending: crate::paragraph::PendingParagraph, is_local: bool) {
        let text = if is_local {
            pending.transcript.clone()
        } else {
            match tokio::time::timeout(Duration::from_secs(5), self.collaborators.polish_model.polish(&pending.transcript)).await {
                Ok(Ok(polished)) => polished,
                _ => pending.transcript.clone(),
            }
        };
        let config = self.config.read().await;
        let source_lang = config.source_lang.clone();
        let target_lang = config.target_lang.clone();
        drop(config);

        let mut context = self.context.write().await;
        let block = context.create_block(source, source_lang, text.clone(), target_lang, None, false, false, pending.last_updated_at);
        context.record_context(text);
        drop(context);

        let _ = self.collaborators.store.insert_block(&self.session_id, &block).await;
        self.events.emit(SessionEvent::BlockAdded { block });
    }

    async fn commit_paragraph_with_outcome(
        &self,
        source: AudioSource,
        pending: crate::paragraph::PendingParagraph,
        outcome: TranscriptionOutcome,
        is_local: bool,
    ) {
        let text = if is_local {
            pending.transcript.clone()
        } else {
            match tokio::time::timeout(Duration::from_secs(5), self.collaborators.polish_model.polish(&pending.transcript)).await {
                Ok(Ok(polished)) => polished,
                _ => pending.transcript.clone(),
            }
        };

        let (translation, detected_lang, is_partial, new_topic) = match &outcome {
            TranscriptionOutcome::Translated { translation, detected_lang, is_partial, is_new_topic, .. } => {
                (Some(translation.clone()), detected_lang.clone(), *is_partial, *is_new_topic)
            }
            TranscriptionOutcome::SourceOnly { detected_lang, is_partial, is_new_topic, .. } => {
                (None, detected_lang.clone(), *is_partial, *is_new_topic)
            }
        };

        let target_lang = self.config.read().await.target_lang.clone();
        let mut context = self.context.write().await;
        let block = context.create_block(source, detected_lang, text.clone(), target_lang, translation, is_partial, new_topic, pending.last_updated_at);
        context.record_context(text);
        drop(context);

        let _ = self.collaborators.store.insert_block(&self.session_id, &block).await;
        self.events.emit(SessionEvent::BlockAdded { block });
        self.analysis.schedule_analysis(Duration::from_millis(300));
    }

    /// Stream-mode per-source worker: opens one long-lived connection and
    /// bypasses VAD/queue entirely (spec §4.5 "Stream-mode").
    async fn run_stream_worker(self: Arc<Self>, source: AudioSource, mut rx: mpsc::Receiver<Vec<u8>>, provider: Arc<dyn StreamModeProvider>, language: String) {
        let mut stream = match provider.open_stream(source, &language).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(?source, error = %err, "failed to open realtime stream");
                self.events.emit(SessionEvent::Error { message: err.to_string(), fatal: true });
                return;
            }
        };

        let mut paragraph = ParagraphBuffer::new(source, crate::paragraph::DEFAULT_DECISION_INTERVAL);

        loop {
            tokio::select! {
                audio = rx.recv() => {
                    match audio {
                        Some(bytes) => {
                            let now = now_ms();
                            if source == AudioSource::Microphone {
                                if !crate::pcm::is_silent(&bytes, crate::vad::MIC_SILENCE_THRESHOLD_RMS) {
                                    self.duck.record_mic_speech(now as u64);
                                }
                            } else if self.duck.should_duck_system(now as u64) {
                                continue;
                            }
                            if stream.pcm_writer.send(bytes).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            stream.close().await;
                            break;
                        }
                    }
                }
                event = stream.events.recv() => {
                    match event {
                        Some(StreamEvent::Partial { text }) => {
                            if text.is_empty() {
                                continue;
                            }
                            let merged = paragraph.merge(&text, None, now_ms());
                            self.events.emit(SessionEvent::Partial { source, text: merged });
                        }
                        Some(StreamEvent::Committed { text, language_hint }) => {
                            paragraph.merge(&text, language_hint, now_ms());
                            if let Some(pending) = paragraph.take_for_commit() {
                                self.commit_paragraph(source, pending, false).await;
                                self.analysis.schedule_analysis(Duration::from_millis(300));
                                // Empty-string partial signals no pending
                                // text (spec §5, §8 S4).
                                self.events.emit(SessionEvent::Partial { source, text: String::new() });
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        if self.shutdown_flags.commit_pending_paragraphs.load(Ordering::SeqCst) {
            if let Some(pending) = paragraph.force_flush() {
                self.commit_paragraph(source, pending, false).await;
            }
        }
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Ok(mut tasks) = self.tasks.try_write() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{SummaryAnalysisOutcome, TaskExtractionOutcome};
    use crate::error::ProviderError;
    use crate::paragraph::ParagraphDecision;
    use crate::persistence::memory::MemoryStore;
    use crate::providers::TokenUsage;
    use async_trait::async_trait;

    struct EchoProvider;

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
            Ok(TranscriptionOutcome::SourceOnly {
                transcript: "hello world.".to_string(),
                detected_lang: "en".to_string(),
                is_partial: false,
                is_new_topic: false,
                usage: TokenUsage { tokens_in: 1, tokens_out: 1 },
            })
        }
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
    impl crate::analysis::SummaryAnalysisModel for EmptySummary {
        async fn analyze(&self, _blocks: &[crate::context::TranscriptBlock], _ctx: &[String]) -> Result<SummaryAnalysisOutcome, ProviderError> {
            Ok(SummaryAnalysisOutcome::default())
        }
    }

    struct EmptyTasks;

    #[async_trait]
    impl crate::analysis::TaskExtractionModel for EmptyTasks {
        async fn extract(&self, _blocks: &[crate::context::TranscriptBlock]) -> Result<TaskExtractionOutcome, ProviderError> {
            Ok(TaskExtractionOutcome::default())
        }
    }

    fn make_orchestrator() -> Arc<SessionOrchestrator> {
        let config = Config { transcription_provider: TranscriptionProviderKind::BatchStructured, ..Config::default() };
        let collaborators = SessionCollaborators {
            store: Arc::new(MemoryStore::new()),
            decision_model: Arc::new(AlwaysCommit),
            polish_model: Arc::new(Identity),
            summary_model: Arc::new(EmptySummary),
            task_model: Arc::new(EmptyTasks),
            pricing: ProviderPricing { audio_input_per_token: 0.0, text_input_per_token: 0.0, output_per_token: 0.0 },
        };
        SessionOrchestrator::new("s1", config, ActiveProvider::Chunk(Arc::new(EchoProvider)), collaborators)
    }

    #[tokio::test]
    async fn start_recording_rejects_double_start() {
        let orchestrator = make_orchestrator();
        orchestrator.start_recording(false).await.unwrap();
        assert!(matches!(orchestrator.start_recording(false).await, Err(SessionError::AlreadyRecording)));
        orchestrator.stop_recording(false, false, false).await;
    }

    #[tokio::test]
    async fn fed_audio_eventually_produces_a_block() {
        let orchestrator = make_orchestrator();
        let mut events = orchestrator.subscribe();
        orchestrator.start_recording(false).await.unwrap();

        let loud_window = {
            let mut v = Vec::new();
            for _ in 0..1600 {
                v.extend_from_slice(&5000i16.to_le_bytes());
            }
            v
        };
        for _ in 0..8 {
            orchestrator.feed_system_audio(loud_window.clone()).await;
        }
        orchestrator.feed_system_audio(vec![0u8; 3200 * 5]).await;

        let mut saw_block = false;
        for _ in 0..20 {
            match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
                Ok(Ok(SessionEvent::BlockAdded { .. })) => {
                    saw_block = true;
                    break;
                }
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_block, "expected a block to be committed from fed audio");
        orchestrator.stop_recording(false, false, false).await;
    }
}

//! local provider (spec §4.5.3): on-device model in a forked worker
//! process, speaking a `{load, transcribe, dispose}` request/response
//! protocol correlated by monotonic id over newline-delimited JSON on
//! stdio.
//!
//! Grounded on the teacher's `whisper-rs` dependency, moved out of process
//! into `src/bin/local_worker.rs` per SPEC_FULL.md §4.5. The
//! "pending id -> resolver" mapping (spec §9) is a
//! `HashMap<u64, oneshot::Sender<..>>`, guarded by a mutex and drained by a
//! dedicated reader task.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex};
use tracing::{error, warn};

use crate::error::ProviderError;
use crate::pcm::pcm_to_float32;
use crate::providers::{is_degenerate_transcript, ChunkModeProvider, TokenUsage, TranscriptionOutcome};

const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Request {
    Load { id: u64, model_id: String },
    Transcribe { id: u64, model_id: String, audio: Vec<f32>, language_hints: Vec<String> },
    Dispose { id: u64 },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Response {
    Loaded { id: u64 },
    Result { id: u64, text: String },
    Error { id: u64, message: String },
    Disposed { id: u64 },
}

fn response_id(response: &Response) -> u64 {
    match response {
        Response::Loaded { id } => *id,
        Response::Result { id, .. } => *id,
        Response::Error { id, .. } => *id,
        Response::Disposed { id } => *id,
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

pub struct LocalProvider {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
    disposed: std::sync::atomic::AtomicBool,
}

impl LocalProvider {
    /// Spawns `worker_binary` and performs the initial `load` handshake.
    pub async fn spawn(worker_binary: &str, model_id: &str) -> Result<Self, ProviderError> {
        let mut child = tokio::process::Command::new(worker_binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let stdin = child.stdin.take().ok_or_else(|| ProviderError::Transport("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| ProviderError::Transport("no stdout".into()))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        spawn_reader(stdout, pending.clone());

        let provider = Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            disposed: std::sync::atomic::AtomicBool::new(false),
        };

        let load_response = provider.call(Request::Load { id: 0, model_id: model_id.to_string() }).await?;
        match load_response {
            Response::Loaded { .. } => Ok(provider),
            Response::Error { message, .. } => Err(ProviderError::Configuration(message)),
            _ => Err(ProviderError::Response("unexpected response to load".into())),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn call(&self, mut request: Request) -> Result<Response, ProviderError> {
        if self.disposed.load(Ordering::Relaxed) {
            return Err(ProviderError::Disposed);
        }
        let id = self.next_id();
        set_request_id(&mut request, id);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let line = serde_json::to_string(&request).map_err(|e| ProviderError::Transport(e.to_string()))?;
        {
            let mut stdin = self.stdin.lock().await;
            if stdin.write_all(line.as_bytes()).await.is_err() || stdin.write_all(b"\n").await.is_err() {
                self.pending.lock().await.remove(&id);
                return Err(ProviderError::Disposed);
            }
        }

        match tokio::time::timeout(TRANSCRIBE_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ProviderError::Disposed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ProviderError::Timeout(TRANSCRIBE_TIMEOUT))
            }
        }
    }

    /// Kills the worker cleanly; pending requests are rejected with a
    /// stable error (spec §4.5.3).
    pub async fn dispose(&self) -> Result<(), ProviderError> {
        self.disposed.store(true, Ordering::Relaxed);
        let _ = self.call(Request::Dispose { id: 0 }).await;
        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Response::Error { id: 0, message: "process disposed".into() });
        }
        drop(pending);
        let mut child = self.child.lock().await;
        child.start_kill().map_err(|e| ProviderError::Transport(e.to_string()))
    }
}

fn set_request_id(request: &mut Request, id: u64) {
    match request {
        Request::Load { id: field, .. } => *field = id,
        Request::Transcribe { id: field, .. } => *field = id,
        Request::Dispose { id: field } => *field = id,
    }
}

fn spawn_reader(stdout: tokio::process::ChildStdout, pending: Pending) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match serde_json::from_str::<Response>(&line) {
                    Ok(response) => {
                        let id = response_id(&response);
                        if let Some(sender) = pending.lock().await.remove(&id) {
                            let _ = sender.send(response);
                        }
                    }
                    Err(err) => warn!(%err, "local worker sent an unparsable line"),
                },
                Ok(None) => {
                    error!("local worker stdout closed");
                    break;
                }
                Err(err) => {
                    error!(%err, "error reading local worker stdout");
                    break;
                }
            }
        }
    });
}

#[async_trait]
impl ChunkModeProvider for LocalProvider {
    async fn transcribe_chunk(
        &self,
        pcm_chunk: &[u8],
        source_lang: &str,
        target_lang: &str,
        _translation_enabled: bool,
        _prompt_context: &[String],
    ) -> Result<TranscriptionOutcome, ProviderError> {
        let audio = pcm_to_float32(pcm_chunk);
        let response = self
            .call(Request::Transcribe {
                id: 0,
                model_id: String::new(),
                audio,
                language_hints: vec![source_lang.to_string(), target_lang.to_string()],
            })
            .await?;

        match response {
            Response::Result { text, .. } => {
                if is_degenerate_transcript(&text) {
                    return Err(ProviderError::Degenerate);
                }
                Ok(TranscriptionOutcome::SourceOnly {
                    transcript: text,
                    detected_lang: source_lang.to_string(),
                    is_partial: false,
                    is_new_topic: false,
                    usage: TokenUsage::default(),
                })
            }
            Response::Error { message, .. } => Err(ProviderError::Response(message)),
            _ => Err(ProviderError::Response("unexpected response to transcribe".into())),
        }
    }
}

//! Forked worker process for the local transcription provider (spec §6).
//!
//! Reads newline-delimited JSON requests from stdin, runs on-device
//! inference via `whisper-rs`, and writes newline-delimited JSON responses
//! to stdout. Grounded on the teacher's `whisper-rs` usage
//! (`audio/streaming_whisper.rs`), restructured as a standalone process per
//! SPEC_FULL.md §4.5.

use std::io::{self, BufRead, Write};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Request {
    Load { id: u64, model_id: String },
    Transcribe { id: u64, model_id: String, audio: Vec<f32>, language_hints: Vec<String> },
    Dispose { id: u64 },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Response {
    Loaded { id: u64 },
    Result { id: u64, text: String },
    Error { id: u64, message: String },
    Disposed { id: u64 },
}

struct WorkerState {
    context: Option<WhisperContext>,
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let state = Mutex::new(WorkerState { context: None });
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle_request(&state, request),
            Err(err) => Response::Error { id: 0, message: format!("malformed request: {err}") },
        };

        let should_exit = matches!(response, Response::Disposed { .. });
        if let Ok(encoded) = serde_json::to_string(&response) {
            let _ = writeln!(stdout, "{encoded}");
            let _ = stdout.flush();
        }
        if should_exit {
            break;
        }
    }
}

fn handle_request(state: &Mutex<WorkerState>, request: Request) -> Response {
    match request {
        Request::Load { id, model_id } => match WhisperContext::new_with_params(&model_id, WhisperContextParameters::default()) {
            Ok(context) => {
                state.lock().expect("worker state poisoned").context = Some(context);
                Response::Loaded { id }
            }
            Err(err) => Response::Error { id, message: format!("failed to load model: {err}") },
        },
        Request::Transcribe { id, audio, language_hints, .. } => {
            let guard = state.lock().expect("worker state poisoned");
            let Some(context) = guard.context.as_ref() else {
                return Response::Error { id, message: "model not loaded".into() };
            };
            match run_transcription(context, &audio, language_hints.first().map(String::as_str)) {
                Ok(text) => Response::Result { id, text },
                Err(message) => Response::Error { id, message },
            }
        }
        Request::Dispose { id } => Response::Disposed { id },
    }
}

fn run_transcription(context: &WhisperContext, audio: &[f32], language: Option<&str>) -> Result<String, String> {
    let mut state = context.create_state().map_err(|e| e.to_string())?;
    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_print_progress(false);
    params.set_print_special(false);
    params.set_print_realtime(false);
    if let Some(lang) = language {
        params.set_language(Some(lang));
    }

    state.full(params, audio).map_err(|e| e.to_string())?;
    let num_segments = state.full_n_segments().map_err(|e| e.to_string())?;
    let mut text = String::new();
    for i in 0..num_segments {
        if let Ok(segment) = state.full_get_segment_text(i) {
            text.push_str(&segment);
        }
    }
    Ok(text)
}

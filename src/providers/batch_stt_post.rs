//! batch-stt-post provider (spec §4.5.4): a one-shot REST STT call returns
//! transcript and language hint; when translation is enabled, a small LLM
//! post-processing call follows up against
//! `{transcript, detectedLangHint, contextWindow, keyPoints, translationRule}`
//! with an 8 s budget.
//!
//! Shares `reqwest` plumbing with `batch_structured` (spec groups it with
//! realtime-stream's wire shape but used in chunk mode).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::providers::{ChunkModeProvider, TokenUsage, TranscriptionOutcome};
use crate::util::base64_encode;

const STT_TIMEOUT: Duration = Duration::from_secs(30);
const POST_PROCESS_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Deserialize)]
struct SttResponse {
    transcript: String,
    detected_lang_hint: String,
    tokens_in: u64,
    tokens_out: u64,
}

#[derive(Debug, Serialize)]
struct PostProcessRequest<'a> {
    transcript: &'a str,
    detected_lang_hint: &'a str,
    context_window: &'a [String],
    key_points: &'a [String],
    translation_rule: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostProcessResponse {
    source_language: String,
    translation: String,
    is_partial: bool,
    is_new_topic: bool,
    tokens_in: u64,
    tokens_out: u64,
}

pub struct BatchSttPostProvider {
    client: reqwest::Client,
    stt_endpoint: String,
    post_process_endpoint: String,
    api_key: String,
}

impl BatchSttPostProvider {
    pub fn new(stt_endpoint: impl Into<String>, post_process_endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            stt_endpoint: stt_endpoint.into(),
            post_process_endpoint: post_process_endpoint.into(),
            api_key: api_key.into(),
        }
    }

    async fn call_stt(&self, pcm_chunk: &[u8]) -> Result<SttResponse, ProviderError> {
        let response = tokio::time::timeout(
            STT_TIMEOUT,
            self.client
                .post(&self.stt_endpoint)
                .bearer_auth(&self.api_key)
                .body(base64_encode(pcm_chunk))
                .send(),
        )
        .await
        .map_err(|_| ProviderError::Timeout(STT_TIMEOUT))?
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Response(response.status().to_string()));
        }
        response.json().await.map_err(|e| ProviderError::Response(e.to_string()))
    }

    async fn call_post_process(&self, request: &PostProcessRequest<'_>) -> Result<PostProcessResponse, ProviderError> {
        let response = tokio::time::timeout(
            POST_PROCESS_TIMEOUT,
            self.client.post(&self.post_process_endpoint).bearer_auth(&self.api_key).json(request).send(),
        )
        .await
        .map_err(|_| ProviderError::Timeout(POST_PROCESS_TIMEOUT))?
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Response(response.status().to_string()));
        }
        response.json().await.map_err(|e| ProviderError::Response(e.to_string()))
    }
}

#[async_trait]
impl ChunkModeProvider for BatchSttPostProvider {
    async fn transcribe_chunk(
        &self,
        pcm_chunk: &[u8],
        _source_lang: &str,
        _target_lang: &str,
        translation_enabled: bool,
        prompt_context: &[String],
    ) -> Result<TranscriptionOutcome, ProviderError> {
        let stt = self.call_stt(pcm_chunk).await?;

        if !translation_enabled {
            return Ok(TranscriptionOutcome::SourceOnly {
                transcript: stt.transcript,
                detected_lang: stt.detected_lang_hint,
                is_partial: false,
                is_new_topic: false,
                usage: TokenUsage { tokens_in: stt.tokens_in, tokens_out: stt.tokens_out },
            });
        }

        let post_request = PostProcessRequest {
            transcript: &stt.transcript,
            detected_lang_hint: &stt.detected_lang_hint,
            context_window: prompt_context,
            key_points: &[],
            translation_rule: "translate to the configured target language",
        };
        let post = self.call_post_process(&post_request).await?;

        Ok(TranscriptionOutcome::Translated {
            transcript: stt.transcript,
            translation: post.translation,
            detected_lang: post.source_language,
            is_partial: post.is_partial,
            is_new_topic: post.is_new_topic,
            usage: TokenUsage {
                tokens_in: stt.tokens_in + post.tokens_in,
                tokens_out: stt.tokens_out + post.tokens_out,
            },
        })
    }
}

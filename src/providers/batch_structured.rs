//! batch-structured provider (spec §4.5.1): wraps a chunk in WAV and sends
//! a structured-output request constrained by a schema whose language enum
//! is `{sourceLang, targetLang, en}` minus duplicates.
//!
//! Grounded on the teacher's `reqwest` dependency (already used for JSON
//! calls elsewhere in the app).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::pcm::pcm_to_wav;
use crate::providers::{ChunkModeProvider, TokenUsage, TranscriptionOutcome};
use crate::util::base64_encode;

const TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 2;

#[derive(Debug, Serialize)]
struct StructuredRequest<'a> {
    model: &'a str,
    temperature: f32,
    language_enum: Vec<&'a str>,
    prompt_context: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_wav_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StructuredResponse {
    transcript: String,
    translation: Option<String>,
    detected_lang: String,
    is_partial: bool,
    is_new_topic: bool,
    tokens_in: u64,
    tokens_out: u64,
}

pub struct BatchStructuredProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model_id: String,
}

impl BatchStructuredProvider {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder().timeout(TIMEOUT).build().expect("client builds"),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model_id: model_id.into(),
        }
    }

    fn language_enum<'a>(&self, source_lang: &'a str, target_lang: &'a str) -> Vec<&'a str> {
        let mut langs = vec![source_lang, target_lang, "en"];
        langs.dedup();
        langs
    }

    async fn call_once(&self, body: &StructuredRequest<'_>) -> Result<StructuredResponse, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(500).collect();
            return Err(ProviderError::Response(format!("{status}: {truncated}")));
        }

        response.json::<StructuredResponse>().await.map_err(|e| ProviderError::Response(e.to_string()))
    }
}

#[async_trait]
impl ChunkModeProvider for BatchStructuredProvider {
    async fn transcribe_chunk(
        &self,
        pcm_chunk: &[u8],
        source_lang: &str,
        target_lang: &str,
        translation_enabled: bool,
        prompt_context: &[String],
    ) -> Result<TranscriptionOutcome, ProviderError> {
        let wav = pcm_to_wav(pcm_chunk, crate::config::SAMPLE_RATE_HZ);
        let language_enum = self.language_enum(source_lang, target_lang);
        let request = StructuredRequest {
            model: &self.model_id,
            temperature: 0.0,
            language_enum,
            prompt_context,
            audio_wav_base64: Some(base64_encode(&wav)),
        };

        let mut attempt = 0;
        loop {
            match tokio::time::timeout(TIMEOUT, self.call_once(&request)).await {
                Ok(Ok(resp)) => {
                    let usage = TokenUsage { tokens_in: resp.tokens_in, tokens_out: resp.tokens_out };
                    return Ok(if translation_enabled {
                        TranscriptionOutcome::Translated {
                            translation: resp.translation.unwrap_or_default(),
                            transcript: resp.transcript,
                            detected_lang: resp.detected_lang,
                            is_partial: resp.is_partial,
                            is_new_topic: resp.is_new_topic,
                            usage,
                        }
                    } else {
                        TranscriptionOutcome::SourceOnly {
                            transcript: resp.transcript,
                            detected_lang: resp.detected_lang,
                            is_partial: resp.is_partial,
                            is_new_topic: resp.is_new_topic,
                            usage,
                        }
                    });
                }
                Ok(Err(err)) if err.is_transient() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    continue;
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    if attempt < MAX_RETRIES {
                        attempt += 1;
                        continue;
                    }
                    return Err(ProviderError::Timeout(TIMEOUT));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_enum_deduplicates() {
        let provider = BatchStructuredProvider::new("http://localhost", "key", "model");
        let langs = provider.language_enum("en", "en");
        assert_eq!(langs, vec!["en"]);
    }
}

//! Voice-activity segmenter (C1): turns a raw PCM byte stream into speech
//! chunks with hysteresis and a max-length flush.
//!
//! Grounded on the teacher's `audio/streaming_vad.rs::StreamingVadProcessor`
//! state machine (Idle/Speaking transitions, pre/post padding), simplified
//! to the single energy-threshold + hysteresis rule spec §4.1 specifies —
//! the teacher's pitch/ZCR/adaptive-noise-floor layers are not carried,
//! since the spec's fixed, simple parameters do not call for them.

use crate::config::SAMPLE_RATE_HZ;
use crate::pcm::compute_rms;

const BYTES_PER_MS: u64 = (SAMPLE_RATE_HZ as u64 * 2) / 1000;

/// Microphone silence threshold (spec §4.1 "mic uses a higher threshold
/// than system"), also the threshold the mic-priority duck gate (C8) uses
/// to tell a non-silent raw write from silence (spec §4.8).
pub const MIC_SILENCE_THRESHOLD_RMS: f64 = 400.0;

#[derive(Debug, Clone)]
pub struct VadConfig {
    pub window_bytes: usize,
    pub silence_threshold_rms: f64,
    pub flush_after_silence_ms: u64,
    pub min_chunk_ms: u64,
    /// `None` disables the max-length flush (used by the local provider,
    /// which prefers natural-break chunks — spec §4.1).
    pub max_chunk_ms: Option<u64>,
}

impl VadConfig {
    /// Default window (100 ms @ 16 kHz/16-bit mono = 3200 bytes) and the
    /// system-source silence threshold (spec §4.1 default 200).
    pub fn system_default() -> Self {
        Self {
            window_bytes: 3200,
            silence_threshold_rms: 200.0,
            flush_after_silence_ms: 450,
            min_chunk_ms: 500,
            max_chunk_ms: Some(4000),
        }
    }

    /// Microphone uses a higher silence threshold than system audio
    /// (spec §4.1).
    pub fn microphone_default() -> Self {
        Self { silence_threshold_rms: MIC_SILENCE_THRESHOLD_RMS, ..Self::system_default() }
    }

    pub fn local_provider_default() -> Self {
        Self { max_chunk_ms: None, ..Self::system_default() }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct VadStatistics {
    pub peak_rms: f64,
    pub window_count: u64,
}

/// One per audio source (spec §3's `VadState`).
pub struct VadSegmenter {
    config: VadConfig,
    analysis_buffer: Vec<u8>,
    speech_buffer: Vec<u8>,
    silence_ms: u64,
    speech_started: bool,
    stats: VadStatistics,
}

impl VadSegmenter {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            analysis_buffer: Vec::new(),
            speech_buffer: Vec::new(),
            silence_ms: 0,
            speech_started: false,
            stats: VadStatistics::default(),
        }
    }

    pub fn statistics(&self) -> &VadStatistics {
        &self.stats
    }

    /// Appends arbitrary-size writes and drains complete windows,
    /// returning any chunks emitted as a result. `analysis_buffer` always
    /// ends shorter than `window_bytes` (spec §3 invariant).
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.analysis_buffer.extend_from_slice(bytes);
        let mut emitted = Vec::new();
        while self.analysis_buffer.len() >= self.config.window_bytes {
            let window: Vec<u8> = self.analysis_buffer.drain(..self.config.window_bytes).collect();
            if let Some(chunk) = self.process_window(&window) {
                emitted.push(chunk);
            }
        }
        emitted
    }

    fn process_window(&mut self, window: &[u8]) -> Option<Vec<u8>> {
        let rms = compute_rms(window);
        self.stats.window_count += 1;
        self.stats.peak_rms = self.stats.peak_rms.max(rms);
        let silent = rms < self.config.silence_threshold_rms;
        let window_ms = window.len() as u64 / BYTES_PER_MS;

        if !self.speech_started {
            if silent {
                return None;
            }
            self.speech_started = true;
            self.silence_ms = 0;
            self.speech_buffer.clear();
            self.speech_buffer.extend_from_slice(window);
            return None;
        }

        // Speaking: always append, even silent windows, so trailing breath
        // is kept (spec §4.1).
        self.speech_buffer.extend_from_slice(window);
        if silent {
            self.silence_ms += window_ms;
        } else {
            self.silence_ms = 0;
        }

        let speech_ms = self.speech_buffer.len() as u64 / BYTES_PER_MS;
        let silence_flush = self.silence_ms >= self.config.flush_after_silence_ms;
        let max_len_flush = self.config.max_chunk_ms.is_some_and(|max| speech_ms >= max);

        if silence_flush || max_len_flush {
            return self.emit_and_reset();
        }
        None
    }

    fn emit_and_reset(&mut self) -> Option<Vec<u8>> {
        let speech_ms = self.speech_buffer.len() as u64 / BYTES_PER_MS;
        let chunk = if speech_ms >= self.config.min_chunk_ms {
            Some(std::mem::take(&mut self.speech_buffer))
        } else {
            None
        };
        self.speech_buffer.clear();
        self.silence_ms = 0;
        self.speech_started = false;
        chunk
    }

    /// Forces emission of whatever is buffered if it meets the minimum
    /// chunk length (spec §4.1 `flushVad`).
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if !self.speech_started {
            return None;
        }
        self.emit_and_reset()
    }

    /// Clears all state (spec §4.1 `resetVadState`).
    pub fn reset(&mut self) {
        self.analysis_buffer.clear();
        self.speech_buffer.clear();
        self.silence_ms = 0;
        self.speech_started = false;
        self.stats = VadStatistics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn silence_never_starts_speech() {
        let mut vad = VadSegmenter::new(VadConfig::system_default());
        let emitted = vad.push(&silent_window(3200 * 20));
        assert!(emitted.is_empty());
        assert!(vad.flush().is_none());
    }

    #[test]
    fn bounded_chunk_duration_property() {
        // property 2: minChunkMs <= durationMs <= maxChunkMs + windowMs
        let cfg = VadConfig::system_default();
        let mut vad = VadSegmenter::new(cfg.clone());
        // Keep talking past max_chunk_ms so the max-length flush fires.
        for _ in 0..45 {
            vad.push(&loud_window(3200));
        }
        let emitted = vad.push(&loud_window(3200));
        let chunk = emitted.into_iter().next().expect("a chunk should have been emitted");
        let duration_ms = chunk.len() as u64 / BYTES_PER_MS;
        assert!(duration_ms >= cfg.min_chunk_ms);
        assert!(duration_ms <= cfg.max_chunk_ms.unwrap() + 100);
    }

    #[test]
    fn silence_flush_emits_only_when_minimum_met() {
        let mut vad = VadSegmenter::new(VadConfig::system_default());
        vad.push(&loud_window(3200)); // 100ms speech, below min_chunk_ms
        let mut emitted = Vec::new();
        for _ in 0..5 {
            emitted.extend(vad.push(&silent_window(3200)));
        }
        assert!(emitted.is_empty(), "short speech below min_chunk_ms must not be emitted");
    }

    #[test]
    fn flush_forces_emission_of_buffered_speech() {
        let mut vad = VadSegmenter::new(VadConfig::system_default());
        for _ in 0..6 {
            vad.push(&loud_window(3200));
        }
        let chunk = vad.flush();
        assert!(chunk.is_some());
    }

    #[test]
    fn reset_clears_all_fields() {
        let mut vad = VadSegmenter::new(VadConfig::system_default());
        vad.push(&loud_window(3200));
        vad.reset();
        assert!(vad.flush().is_none());
        assert_eq!(vad.statistics().window_count, 0);
    }
}

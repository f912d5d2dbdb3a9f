//! Mic-priority duck (C8): suppress system audio while the microphone is
//! actively speaking.
//!
//! Grounded on the teacher's lock-free atomic timestamp pattern
//! (`audio/channel.rs::HealthMonitor::last_activity: AtomicU64`). This is a
//! cooperative rule with zero locking (spec §4.8): a stale read can at
//! worst let one system window through, which is acceptable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub struct MicDuck {
    mic_speech_last_detected_at_ms: AtomicU64,
    grace: Duration,
}

impl MicDuck {
    pub fn new(grace: Duration) -> Self {
        Self { mic_speech_last_detected_at_ms: AtomicU64::new(0), grace }
    }

    pub fn default_grace() -> Self {
        Self::new(Duration::from_millis(300))
    }

    /// Records mic speech activity at `now_ms` (spec §4.8: any VAD window
    /// with `rms > micSilenceThreshold`, or any non-silent raw write on the
    /// realtime path).
    pub fn record_mic_speech(&self, now_ms: u64) {
        self.mic_speech_last_detected_at_ms.store(now_ms, Ordering::Relaxed);
    }

    /// Returns `true` if a system-source write at `now_ms` should be
    /// suppressed. `0` means "no mic speech ever detected" and never ducks.
    pub fn should_duck_system(&self, now_ms: u64) -> bool {
        let last = self.mic_speech_last_detected_at_ms.load(Ordering::Relaxed);
        last != 0 && now_ms.saturating_sub(last) < self.grace.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_writes_inside_grace_window_are_ducked() {
        let duck = MicDuck::new(Duration::from_millis(300));
        duck.record_mic_speech(1_000);
        assert!(duck.should_duck_system(1_100));
        assert!(duck.should_duck_system(1_299));
    }

    #[test]
    fn system_writes_at_or_after_grace_are_not_ducked() {
        let duck = MicDuck::new(Duration::from_millis(300));
        duck.record_mic_speech(1_000);
        assert!(!duck.should_duck_system(1_300));
        assert!(!duck.should_duck_system(2_000));
    }

    #[test]
    fn no_prior_mic_speech_never_ducks() {
        let duck = MicDuck::new(Duration::from_millis(300));
        assert!(!duck.should_duck_system(50));
    }
}

//! Per-source queue & worker (C7): bounded queue per audio source with
//! overlap splice, drop-oldest policy, and a serialized worker.
//!
//! Grounded directly on `audio/buffer.rs::AdaptiveBuffer<T>`
//! (`OverflowStrategy::DropOldest`) for the drop policy and
//! `audio/intelligent_chunking.rs::ContextBuffer::append_with_overlap` for
//! the overlap splice. The per-source worker loop that drains this queue
//! against a provider lives in `src/session.rs` (`run_chunk_worker`),
//! grounded on `audio/context_manager.rs::process_audio_stream`'s
//! task-per-source shape. Not used by the realtime-stream provider, which
//! has no chunk queue (spec §4.7).

use std::collections::VecDeque;
use std::time::Duration;

use tracing::warn;

use crate::config::SAMPLE_RATE_HZ;

pub const MAX_QUEUE_SIZE: usize = 20;

/// Decided per DESIGN.md Open Question #3: 0.75s, the midpoint of the
/// spec-allowed [0.25s, 1.5s] range, stable for the life of a session.
pub const OVERLAP_DURATION: Duration = Duration::from_millis(750);

/// Decided per DESIGN.md Open Question #2: strict per-source ordering.
/// Spec §4.7/§5 permit either 1 or 10, with serialized commits mandatory
/// either way; choosing 1 makes serialization structural.
pub const MAX_CONCURRENCY: usize = 1;

fn overlap_bytes() -> usize {
    // 2 bytes/sample, mono, 16-bit.
    (SAMPLE_RATE_HZ as u64 * 2 * OVERLAP_DURATION.as_millis() as u64 / 1000) as usize
}

#[derive(Debug, Clone)]
pub struct PendingQueueItem {
    /// PCM with the previous chunk's overlap slice prepended (spec §3).
    pub chunk: Vec<u8>,
    pub captured_at: i64,
}

/// FIFO per source with `maxQueueSize = 20` (spec §4.7).
pub struct SourceQueue {
    items: VecDeque<PendingQueueItem>,
    prev_overlap: Vec<u8>,
}

impl SourceQueue {
    pub fn new() -> Self {
        Self { items: VecDeque::new(), prev_overlap: Vec::new() }
    }

    /// Prepends the previous chunk's overlap, pushes, and on overflow drops
    /// the oldest item, logging a warning (spec §4.7, §8 property 4/5).
    pub fn push(&mut self, chunk: Vec<u8>, captured_at: i64) {
        let mut combined = self.prev_overlap.clone();
        combined.extend_from_slice(&chunk);

        let overlap_len = overlap_bytes().min(chunk.len());
        self.prev_overlap = chunk[chunk.len() - overlap_len..].to_vec();

        self.items.push_back(PendingQueueItem { chunk: combined, captured_at });
        if self.items.len() > MAX_QUEUE_SIZE {
            self.items.pop_front();
            warn!(max_size = MAX_QUEUE_SIZE, "dropped oldest chunk: queue saturated");
        }
    }

    pub fn pop(&mut self) -> Option<PendingQueueItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drops all queued items without touching `prev_overlap` (used on
    /// provider-fatal errors, spec §4.7).
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingQueueItem> {
        self.items.iter()
    }
}

impl Default for SourceQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_oldest_keeps_the_most_recent_max_size_items() {
        let mut queue = SourceQueue::new();
        for i in 0..(MAX_QUEUE_SIZE as i64 + 10) {
            queue.push(vec![0u8; 4], i);
        }
        assert_eq!(queue.len(), MAX_QUEUE_SIZE);
        let captured: Vec<i64> = queue.iter().map(|item| item.captured_at).collect();
        let expected: Vec<i64> = (10..(MAX_QUEUE_SIZE as i64 + 10)).collect();
        assert_eq!(captured, expected);
    }

    #[test]
    fn overlap_splice_prefixes_the_next_chunk_with_prior_tail() {
        let mut queue = SourceQueue::new();
        let chunk_a = vec![1u8; overlap_bytes() * 2];
        let chunk_b = vec![2u8; overlap_bytes() * 2];

        queue.push(chunk_a.clone(), 0);
        queue.push(chunk_b.clone(), 1);

        let first = queue.pop().unwrap();
        assert_eq!(first.chunk, chunk_a);

        let second = queue.pop().unwrap();
        let expected_overlap = &chunk_a[chunk_a.len() - overlap_bytes()..];
        assert_eq!(&second.chunk[..overlap_bytes()], expected_overlap);
        assert_eq!(&second.chunk[overlap_bytes()..], chunk_b.as_slice());
    }

    #[test]
    fn first_chunk_has_no_overlap_prefix() {
        let mut queue = SourceQueue::new();
        let chunk = vec![7u8; 64];
        queue.push(chunk.clone(), 0);
        assert_eq!(queue.pop().unwrap().chunk, chunk);
    }
}

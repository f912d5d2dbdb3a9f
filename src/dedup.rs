//! Task dedup (C10): normalize, token-compare, and reject duplicate task
//! suggestions across history and the current batch.
//!
//! No teacher analogue; built per the REDESIGN FLAGS note (spec §9): a
//! bounded FIFO ring backed by a hash set for O(1) membership.

use std::collections::{HashSet, VecDeque};

use regex::Regex;
use serde::{Deserialize, Serialize};

const RING_CAPACITY: usize = 500;
const CONTAINMENT_LONG_THRESHOLD: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSuggestion {
    pub id: String,
    pub text: String,
    pub details: Option<String>,
    pub transcript_excerpt: Option<String>,
    pub session_id: String,
    pub created_at: i64,
}

static STOP_WORDS: &[&str] = &[
    "a", "an", "the", "to", "of", "in", "on", "for", "and", "or", "is", "are", "be", "it", "this",
    "that", "with", "as", "at", "by", "from",
];

/// Lowercase, collapse whitespace, strip trailing punctuation, remove
/// apostrophes, strip all non-alphanumeric except spaces (spec §4.10).
pub fn normalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let no_apostrophes = lower.replace(['\'', '\u{2019}'], "");
    let stripped: String = no_apostrophes
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let collapsed: Vec<&str> = stripped.split_whitespace().collect();
    collapsed.join(" ")
}

fn tokenize(normalized: &str) -> HashSet<String> {
    normalized
        .split_whitespace()
        .filter(|t| t.len() > 1 && !STOP_WORDS.contains(t))
        .map(singularize)
        .collect()
}

/// Crude singularization: strips a trailing `es` or `s` (spec §4.10).
fn singularize(token: &str) -> String {
    if let Some(stem) = token.strip_suffix("es") {
        if stem.len() >= 2 {
            return stem.to_string();
        }
    }
    if let Some(stem) = token.strip_suffix('s') {
        if stem.len() >= 2 {
            return stem.to_string();
        }
    }
    token.to_string()
}

fn is_token_duplicate(a: &HashSet<String>, b: &HashSet<String>) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let overlap = a.intersection(b).count();
    if overlap == 0 {
        return false;
    }
    let smaller = a.len().min(b.len());
    let union = a.union(b).count();
    let containment = overlap as f64 / smaller as f64;
    let jaccard = overlap as f64 / union as f64;

    (containment >= 1.0 && overlap >= 2) || (containment >= 0.8 && overlap >= 3) || (jaccard >= 0.6 && overlap >= 3)
}

fn is_duplicate_pair(normalized_a: &str, normalized_b: &str) -> bool {
    if normalized_a == normalized_b {
        return true;
    }
    let (shorter, longer) =
        if normalized_a.len() <= normalized_b.len() { (normalized_a, normalized_b) } else { (normalized_b, normalized_a) };
    if longer.len() >= CONTAINMENT_LONG_THRESHOLD && longer.contains(shorter) {
        return true;
    }
    is_token_duplicate(&tokenize(normalized_a), &tokenize(normalized_b))
}

/// Bounded ring of recently-suggested normalized texts (spec §3, §4.10),
/// checked alongside persisted tasks and the in-flight batch.
pub struct DedupRing {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl DedupRing {
    pub fn new() -> Self {
        Self { order: VecDeque::new(), members: HashSet::new() }
    }

    /// Returns `true` and records `candidate` iff it is not a duplicate of
    /// anything already in the ring, `persisted`, or `batch_so_far`.
    pub fn try_emit(&mut self, candidate: &str, persisted: &[String], batch_so_far: &[String]) -> bool {
        let normalized = normalize(candidate);
        if normalized.is_empty() {
            return false;
        }
        if self.members.contains(&normalized) {
            return false;
        }
        for existing in persisted.iter().chain(batch_so_far) {
            if is_duplicate_pair(&normalized, &normalize(existing)) {
                return false;
            }
        }
        for existing in &self.order {
            if is_duplicate_pair(&normalized, existing) {
                return false;
            }
        }
        self.push(normalized);
        true
    }

    fn push(&mut self, normalized: String) {
        self.order.push_back(normalized.clone());
        self.members.insert(normalized);
        while self.order.len() > RING_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for DedupRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Strips leading/trailing non-word punctuation left over from upstream
/// text cleanup; used by callers before running a candidate through
/// `normalize`. Kept as a separate helper since it is occasionally useful
/// on raw model output before the ring sees it.
pub fn strip_wrapping_punctuation(text: &str) -> String {
    let re = Regex::new(r"^[^\w]+|[^\w]+$").expect("static regex is valid");
    re.replace_all(text.trim(), "").to_string()
}

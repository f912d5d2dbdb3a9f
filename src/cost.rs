//! Cost accumulator (C4): per-provider token -> cost aggregation.
//!
//! Grounded on the atomic-counter style of
//! `audio/channel.rs::ChannelHealthMetrics`; the float total uses a
//! `Mutex<f64>` the way the teacher guards `average_utilization`, since
//! there is no stable atomic float primitive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub enum TokenKind {
    Audio,
    Text,
    Output,
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderPricing {
    pub audio_input_per_token: f64,
    pub text_input_per_token: f64,
    pub output_per_token: f64,
}

/// Fixed `provider -> pricing` mapping (spec §4.4).
pub struct PricingTable {
    entries: HashMap<String, ProviderPricing>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn set(&mut self, provider: impl Into<String>, pricing: ProviderPricing) {
        self.entries.insert(provider.into(), pricing);
    }

    pub fn get(&self, provider: &str) -> Option<ProviderPricing> {
        self.entries.get(provider).copied()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CostSnapshot {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: f64,
}

/// Monotonically non-decreasing within a session (spec §3); reset on a
/// fresh (non-resumed) start.
pub struct CostAccumulator {
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
    total_cost: Mutex<f64>,
}

impl CostAccumulator {
    pub fn new() -> Self {
        Self {
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
            total_cost: Mutex::new(0.0),
        }
    }

    /// Adds `input`/`output` tokens of `kind` billed by `provider`,
    /// returning the running snapshot (spec §4.4 `addCost`).
    pub fn add_cost(&self, input: u64, output: u64, kind: TokenKind, pricing: ProviderPricing) -> CostSnapshot {
        let input_rate = match kind {
            TokenKind::Audio => pricing.audio_input_per_token,
            TokenKind::Text => pricing.text_input_per_token,
            TokenKind::Output => 0.0,
        };
        let cost_delta = input as f64 * input_rate + output as f64 * pricing.output_per_token;

        self.total_input_tokens.fetch_add(input, Ordering::Relaxed);
        self.total_output_tokens.fetch_add(output, Ordering::Relaxed);
        let mut total_cost = self.total_cost.lock().expect("cost mutex poisoned");
        *total_cost += cost_delta;

        CostSnapshot {
            total_input_tokens: self.total_input_tokens.load(Ordering::Relaxed),
            total_output_tokens: self.total_output_tokens.load(Ordering::Relaxed),
            total_cost: *total_cost,
        }
    }

    pub fn snapshot(&self) -> CostSnapshot {
        CostSnapshot {
            total_input_tokens: self.total_input_tokens.load(Ordering::Relaxed),
            total_output_tokens: self.total_output_tokens.load(Ordering::Relaxed),
            total_cost: *self.total_cost.lock().expect("cost mutex poisoned"),
        }
    }

    pub fn reset(&self) {
        self.total_input_tokens.store(0, Ordering::Relaxed);
        self.total_output_tokens.store(0, Ordering::Relaxed);
        *self.total_cost.lock().expect("cost mutex poisoned") = 0.0;
    }
}

impl Default for CostAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_accumulates_monotonically() {
        let acc = CostAccumulator::new();
        let pricing = ProviderPricing { audio_input_per_token: 0.001, text_input_per_token: 0.0005, output_per_token: 0.002 };
        let s1 = acc.add_cost(100, 10, TokenKind::Audio, pricing);
        let s2 = acc.add_cost(50, 5, TokenKind::Text, pricing);
        assert!(s2.total_cost > s1.total_cost);
        assert_eq!(s2.total_input_tokens, 150);
        assert_eq!(s2.total_output_tokens, 15);
    }

    #[test]
    fn reset_zeroes_the_accumulator() {
        let acc = CostAccumulator::new();
        let pricing = ProviderPricing { audio_input_per_token: 1.0, text_input_per_token: 1.0, output_per_token: 1.0 };
        acc.add_cost(10, 10, TokenKind::Audio, pricing);
        acc.reset();
        let snap = acc.snapshot();
        assert_eq!(snap.total_input_tokens, 0);
        assert_eq!(snap.total_cost, 0.0);
    }
}

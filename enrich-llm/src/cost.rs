//! Token accounting.

use std::sync::atomic::{AtomicI64, Ordering};

/// Tracks token usage for model calls.
/// Thread-safe via atomic operations.
pub struct CostTracker {
    completion_input: AtomicI64,
    completion_output: AtomicI64,
    requests: AtomicI64,
}

impl CostTracker {
    /// Create a new cost tracker with zero counts.
    pub fn new() -> Self {
        Self {
            completion_input: AtomicI64::new(0),
            completion_output: AtomicI64::new(0),
            requests: AtomicI64::new(0),
        }
    }

    /// Record completion token usage.
    ///
    /// # Arguments
    /// * `input_tokens` - Number of input tokens
    /// * `output_tokens` - Number of output tokens
    pub fn record_completion(&self, input_tokens: i64, output_tokens: i64) {
        self.completion_input
            .fetch_add(input_tokens, Ordering::Relaxed);
        self.completion_output
            .fetch_add(output_tokens, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completion_input(&self) -> i64 {
        self.completion_input.load(Ordering::Relaxed)
    }

    pub fn completion_output(&self) -> i64 {
        self.completion_output.load(Ordering::Relaxed)
    }

    pub fn total_tokens(&self) -> i64 {
        self.completion_input() + self.completion_output()
    }

    /// Number of completions recorded, cached replies included.
    pub fn requests(&self) -> i64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.completion_input.store(0, Ordering::Relaxed);
        self.completion_output.store(0, Ordering::Relaxed);
        self.requests.store(0, Ordering::Relaxed);
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CostTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostTracker")
            .field("completion_input", &self.completion_input())
            .field("completion_output", &self.completion_output())
            .field("requests", &self.requests())
            .finish()
    }
}

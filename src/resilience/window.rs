//! Fixed-size ring buffer of recent call outcomes.
//!
//! The error rate is computed over the last `capacity` outcomes and only once
//! `minimum_calls` of them have been seen, so short bursts are governed by the
//! consecutive-failure threshold alone.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct OutcomeWindow {
    outcomes: VecDeque<bool>,
    capacity: usize,
    failures: usize,
}

impl OutcomeWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            capacity,
            failures: 0,
        }
    }

    /// Record an outcome (`true` for success), evicting the oldest when full.
    pub fn push(&mut self, success: bool) {
        if self.outcomes.len() == self.capacity {
            if let Some(false) = self.outcomes.pop_front() {
                self.failures -= 1;
            }
        }
        self.outcomes.push_back(success);
        if !success {
            self.failures += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn error_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            self.failures as f64 / self.outcomes.len() as f64
        }
    }

    /// True once enough outcomes are tracked and the rate reaches `threshold`.
    pub fn exceeds(&self, threshold: f64, minimum_calls: usize) -> bool {
        self.outcomes.len() >= minimum_calls.max(1) && self.error_rate() >= threshold
    }

    pub fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }
}

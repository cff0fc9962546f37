//! Rolling consultation history.
//!
//! A [`TokenBudgetBuffer`] keeps past directive/outcome pairs under a token
//! budget. Each entry is charged once, when added, through the bound
//! [`TokenEstimator`]. Once the running total passes the rollover threshold
//! the oldest entries are evicted until it is back at or below it, so the
//! buffer never holds more than the threshold plus the newest entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::token::{HeuristicEstimator, TokenEstimator, estimate_tokens};

/// Header placed before rendered history.
pub const HISTORY_HEADER: &str = "[Previous Consultations]";

/// Separator between rendered history entries.
pub const HISTORY_SEPARATOR: &str = "\n---\n";

/// One past consultation: what was asked and what the story did next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultationEntry {
    /// Directive and observed outcome, as shown to the model
    pub content: String,

    /// The raw directive text
    pub directive: String,

    pub recorded_at: DateTime<Utc>,
}

impl ConsultationEntry {
    /// Pair a directive with the story text that followed it.
    pub fn new(directive: impl Into<String>, outcome: &str) -> Self {
        let directive = directive.into();
        Self {
            content: format!("Directive: \"{directive}\"\nOutcome: \"{outcome}\""),
            directive,
            recorded_at: Utc::now(),
        }
    }
}

struct Charged {
    entry: ConsultationEntry,
    tokens: usize,
}

/// A bounded, oldest-first-evicting log of consultations.
pub struct TokenBudgetBuffer {
    entries: VecDeque<Charged>,
    total_tokens: usize,
    max_tokens: usize,
    rollover_tokens: usize,
    estimator: Arc<dyn TokenEstimator>,
}

impl TokenBudgetBuffer {
    /// Create a buffer. A rollover threshold above the maximum is clamped
    /// down to it.
    pub fn new(max_tokens: usize, rollover_tokens: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            total_tokens: 0,
            max_tokens,
            rollover_tokens: rollover_tokens.min(max_tokens),
            estimator: Arc::new(HeuristicEstimator),
        }
    }

    /// Bind a tokenizer. Entries already held keep their charged cost.
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Append an entry, then evict from the head while over the threshold.
    pub fn add(&mut self, entry: ConsultationEntry) {
        let tokens = self.charge(&entry.content);
        self.entries.push_back(Charged { entry, tokens });
        self.total_tokens += tokens;

        let mut evicted = 0;
        while self.total_tokens > self.rollover_tokens && self.entries.len() > 1 {
            if let Some(oldest) = self.entries.pop_front() {
                self.total_tokens -= oldest.tokens;
                evicted += 1;
            }
        }

        // A lone entry may sit above the threshold, never above the maximum
        if self.total_tokens > self.max_tokens {
            warn!(
                tokens = self.total_tokens,
                max_tokens = self.max_tokens,
                "Consultation entry exceeds history budget, dropping it"
            );
            self.entries.clear();
            self.total_tokens = 0;
        }

        debug!(
            entries = self.entries.len(),
            total_tokens = self.total_tokens,
            evicted,
            "History entry added"
        );
    }

    /// Entries oldest to newest.
    pub fn read(&self) -> Vec<ConsultationEntry> {
        self.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConsultationEntry> {
        self.entries.iter().map(|c| &c.entry)
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_tokens = 0;
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn rollover_tokens(&self) -> usize {
        self.rollover_tokens
    }

    /// The history block appended after the assembled context.
    ///
    /// Empty when there is no history; otherwise starts with a blank line so
    /// it can be appended directly.
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let body = self
            .iter()
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join(HISTORY_SEPARATOR);
        format!("\n\n{HISTORY_HEADER}\n{body}")
    }

    fn charge(&self, text: &str) -> usize {
        match self.estimator.estimate(text) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(
                    estimator = self.estimator.name(),
                    error = %e,
                    "Token estimation failed, using length heuristic"
                );
                estimate_tokens(text)
            }
        }
    }
}

impl Default for TokenBudgetBuffer {
    fn default() -> Self {
        Self::new(2000, 500)
    }
}

impl std::fmt::Debug for TokenBudgetBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBudgetBuffer")
            .field("entries", &self.entries.len())
            .field("total_tokens", &self.total_tokens)
            .field("max_tokens", &self.max_tokens)
            .field("rollover_tokens", &self.rollover_tokens)
            .field("estimator", &self.estimator.name())
            .finish()
    }
}

//! Domain events: the host's generation notifications and the steering
//! loop's own lifecycle events.
//!
//! The host fires [`GenerationEnded`] after every completed generation. The
//! orchestrator publishes [`DomainEvent`]s so hosts can observe what it
//! decided without coupling to its internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Fired by the host when a generation completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationEnded {
    /// Identifier of the model that produced the generation
    pub model: String,
}

impl GenerationEnded {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

/// All domain events published by the steering loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A consultation claimed the single-flight slot
    ConsultationStarted {
        consultation_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A directive was inserted into the document
    DirectiveIssued {
        consultation_id: String,
        directive: String,
        timestamp: DateTime<Utc>,
    },

    /// A consultation ended without producing a directive
    ConsultationSkipped {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The in-flight model call was cancelled
    ConsultationCancelled {
        consultation_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A consultation failed
    ConsultationFailed {
        consultation_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A directive/outcome pair entered the history
    OutcomeRecorded {
        directive: String,
        history_len: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

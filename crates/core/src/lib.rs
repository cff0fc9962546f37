//! # storyhelm Core
//!
//! Domain types, collaborator traits, and error definitions for the storyhelm
//! narrative steering loop. This crate has **no framework dependencies**: it
//! defines the narrow interfaces the steering core consumes from its host.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (document, lorebook, memory text, key/value
//! storage, model provider, error sink) is a trait here. Implementations live
//! in their respective crates. This enables:
//! - Running the steering loop against a real editor or a JSON story file
//! - Easy testing with scripted stand-ins
//! - Clean dependency graph (all crates depend inward on core)

pub mod document;
pub mod error;
pub mod event;
pub mod knowledge;
pub mod message;
pub mod provider;
pub mod sink;

// Re-export key types at crate root for ergonomics
pub use document::{
    Anchor, DocumentStore, ScannedSection, Section, SectionId, SectionSource, story_text,
};
pub use error::{Error, ProviderError, Result, StoreError};
pub use event::{DomainEvent, EventBus, GenerationEnded};
pub use knowledge::{KvStore, LorebookEntry, LorebookStore, TextStore};
pub use message::{Message, Role};
pub use provider::{Choice, Provider, ProviderRequest, ProviderResponse, Usage};
pub use sink::{ErrorSink, TracingErrorSink};
pub use tokio_util::sync::CancellationToken;

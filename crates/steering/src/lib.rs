//! The storyhelm steering loop.
//!
//! Every few generations the orchestrator:
//!
//! 1. **Records** what the story did with the previous directive
//! 2. **Assembles** memory, active lore, author's note, and story text
//! 3. **Consults** the steering model with that context plus past outcomes
//! 4. **Replaces** the document's single instruction block with the new
//!    directive
//!
//! Consultations are single-flight and cancellable. Failures are reported
//! to an [`ErrorSink`](storyhelm_core::ErrorSink) and never reach the host.

pub mod context;
pub mod history;
pub mod instruction;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{
    AssembledContext, AssemblyMetadata, ContextAssembler, HeuristicEstimator, TiktokenEstimator,
    TokenEstimator,
};
pub use history::{ConsultationEntry, TokenBudgetBuffer};
pub use instruction::{InstructionSlot, Placement};
pub use orchestrator::{
    ConsultOutcome, ConsultationOrchestrator, ConsultationSettings, DIRECTIVE_REQUEST, SkipReason,
};

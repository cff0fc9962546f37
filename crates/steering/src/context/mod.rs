//! Consultation context: what the model sees and what it costs.
//!
//! | Block | Source | Included when |
//! |-------|--------|---------------|
//! | `[Memory/Setting]` | memory text | non-blank |
//! | `[Lorebook — Active Entries]` | lorebook | any entry active |
//! | `[Author's Note]` | author's note | non-blank |
//! | `[Story]` | document, instructions excluded | non-blank, tail-truncated |

pub mod assembler;
pub mod token;

pub use assembler::{
    AssembledContext, AssemblyMetadata, ContextAssembler, is_active, story_text, tail_chars,
};
pub use token::{
    EstimatorError, HeuristicEstimator, TiktokenEstimator, TokenEstimator, estimate_tokens,
    estimator_for,
};

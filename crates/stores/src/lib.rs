//! Store implementations for storyhelm.
//!
//! Every collaborator trait from `storyhelm_core` has an in-memory backend
//! here. A [`StoryFile`] loads a JSON story into those backends and writes
//! them back out after a run.

pub mod in_memory;
pub mod story_file;

pub use in_memory::{InMemoryDocument, InMemoryKv, InMemoryLorebook, InMemoryText};
pub use story_file::{StoryFile, StorySession};

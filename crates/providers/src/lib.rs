//! LLM Provider implementations for storyhelm.
//!
//! All providers implement the `storyhelm_core::Provider` trait.
//! The router maps the steering and writer models onto configured endpoints.

pub mod openai_compat;
pub mod router;

pub use openai_compat::{OpenAiCompatProvider, strip_reasoning};
pub use router::{ProviderRouter, Route, build_from_config};

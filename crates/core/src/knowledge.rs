//! Read-only knowledge sources and per-document key/value storage.
//!
//! - [`TextStore`] serves a single block of text (memory, author's note)
//! - [`LorebookStore`] lists world-knowledge entries with activation rules
//! - [`KvStore`] holds per-document settings such as the consultation interval

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single lorebook entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LorebookEntry {
    /// Optional label used in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// The text injected into context when active
    #[serde(default)]
    pub text: String,

    /// Disabled entries never activate
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Always active regardless of story content
    #[serde(default)]
    pub force_activation: bool,

    /// Case-insensitive substrings that activate the entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl LorebookEntry {
    /// An always-on entry.
    pub fn always_on(text: impl Into<String>) -> Self {
        Self {
            display_name: None,
            text: text.into(),
            enabled: true,
            force_activation: true,
            keys: Vec::new(),
        }
    }

    /// An entry triggered by any of `keys`.
    pub fn keyed(text: impl Into<String>, keys: &[&str]) -> Self {
        Self {
            display_name: None,
            text: text.into(),
            enabled: true,
            force_activation: false,
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// A single block of text (memory or author's note).
#[async_trait]
pub trait TextStore: Send + Sync {
    async fn get(&self) -> std::result::Result<String, StoreError>;
}

/// The lorebook.
#[async_trait]
pub trait LorebookStore: Send + Sync {
    /// All entries in listing order.
    async fn entries(&self) -> std::result::Result<Vec<LorebookEntry>, StoreError>;
}

/// Per-document key/value storage.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store `value` under `key` unless the key already has a value.
    async fn set_if_absent(
        &self,
        key: &str,
        value: serde_json::Value,
    ) -> std::result::Result<(), StoreError>;

    async fn get(&self, key: &str) -> std::result::Result<Option<serde_json::Value>, StoreError>;
}

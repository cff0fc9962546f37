//! JSON story files.
//!
//! A story file carries everything one steering session reads: memory,
//! author's note, lorebook, the document's sections, and per-document
//! storage. [`StoryFile::into_session`] loads it into the in-memory
//! backends; [`StorySession::snapshot`] captures them again for saving.
//!
//! ```json
//! {
//!   "memory": "A small kingdom on the edge of a desert.",
//!   "authors_note": "Keep the tone grim.",
//!   "lorebook": [{ "text": "Dragons hoard gold.", "keys": ["dragon"] }],
//!   "sections": [{ "text": "Once upon a time.", "source": "prompt" }],
//!   "storage": { "interval": 4 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use storyhelm_core::document::{Section, SectionSource};
use storyhelm_core::error::StoreError;
use storyhelm_core::knowledge::LorebookEntry;
use tracing::debug;

use crate::in_memory::{InMemoryDocument, InMemoryKv, InMemoryLorebook, InMemoryText};

/// On-disk representation of a story.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoryFile {
    #[serde(default)]
    pub memory: String,

    #[serde(default)]
    pub authors_note: String,

    #[serde(default)]
    pub lorebook: Vec<LorebookEntry>,

    #[serde(default)]
    pub sections: Vec<Section>,

    #[serde(default)]
    pub storage: serde_json::Map<String, serde_json::Value>,
}

impl StoryFile {
    /// Read a story file from disk.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Io(format!("Failed to read {}: {e}", path.display())))?;

        let story: Self = serde_json::from_str(&content)
            .map_err(|e| StoreError::Io(format!("Failed to parse {}: {e}", path.display())))?;

        debug!(
            path = %path.display(),
            sections = story.sections.len(),
            lorebook = story.lorebook.len(),
            "Story file loaded"
        );
        Ok(story)
    }

    /// Write the story to disk as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Io(format!("Failed to create story directory: {e}"))
                })?;
            }
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| StoreError::Io(format!("Failed to serialize story: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| StoreError::Io(format!("Failed to write {}: {e}", path.display())))?;

        debug!(path = %path.display(), sections = self.sections.len(), "Story file saved");
        Ok(())
    }

    /// Load this story into fresh in-memory backends.
    pub fn into_session(self) -> StorySession {
        StorySession {
            document: Arc::new(InMemoryDocument::from_sections(self.sections)),
            memory: Arc::new(InMemoryText::new(self.memory)),
            authors_note: Arc::new(InMemoryText::new(self.authors_note)),
            lorebook: Arc::new(InMemoryLorebook::new(self.lorebook)),
            storage: Arc::new(InMemoryKv::from_map(self.storage)),
        }
    }

    /// Story text as a reader would see it, instructions excluded.
    pub fn story_text(&self) -> String {
        storyhelm_core::document::story_text(&self.sections)
    }

    /// Number of steering instruction sections.
    pub fn instruction_count(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| s.source == SectionSource::Instruction)
            .count()
    }
}

/// A story loaded into live stores.
#[derive(Clone)]
pub struct StorySession {
    pub document: Arc<InMemoryDocument>,
    pub memory: Arc<InMemoryText>,
    pub authors_note: Arc<InMemoryText>,
    pub lorebook: Arc<InMemoryLorebook>,
    pub storage: Arc<InMemoryKv>,
}

impl StorySession {
    /// Capture the current state of every store.
    pub async fn snapshot(&self) -> StoryFile {
        use storyhelm_core::knowledge::{LorebookStore, TextStore};

        // In-memory stores never fail
        StoryFile {
            memory: self.memory.get().await.unwrap_or_default(),
            authors_note: self.authors_note.get().await.unwrap_or_default(),
            lorebook: self.lorebook.entries().await.unwrap_or_default(),
            sections: self.document.sections().await,
            storage: self.storage.snapshot().await,
        }
    }
}

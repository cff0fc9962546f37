//! In-memory backends: used by story files and tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use storyhelm_core::document::{Anchor, DocumentStore, ScannedSection, Section, SectionId};
use storyhelm_core::error::StoreError;
use storyhelm_core::knowledge::{KvStore, LorebookEntry, LorebookStore, TextStore};
use tokio::sync::RwLock;

/// A document held as an ordered Vec of sections.
///
/// Section ids are allocated from a counter and never reused, so a removed
/// id stays absent for the lifetime of the document.
pub struct InMemoryDocument {
    sections: Arc<RwLock<Vec<ScannedSection>>>,
    next_id: AtomicU64,
}

impl InMemoryDocument {
    pub fn new() -> Self {
        Self {
            sections: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Build a document from sections in order.
    pub fn from_sections(sections: impl IntoIterator<Item = Section>) -> Self {
        let scanned: Vec<ScannedSection> = sections
            .into_iter()
            .zip(1..)
            .map(|(section, id)| ScannedSection {
                id: SectionId(id),
                section,
            })
            .collect();
        let next_id = scanned.len() as u64 + 1;
        Self {
            sections: Arc::new(RwLock::new(scanned)),
            next_id: AtomicU64::new(next_id),
        }
    }

    fn allocate_id(&self) -> SectionId {
        SectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Append a section at the end, as a writer would.
    pub async fn push(&self, section: Section) -> SectionId {
        let id = self.allocate_id();
        self.sections.write().await.push(ScannedSection { id, section });
        id
    }

    /// Current sections without their ids.
    pub async fn sections(&self) -> Vec<Section> {
        self.sections
            .read()
            .await
            .iter()
            .map(|s| s.section.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sections.read().await.is_empty()
    }
}

impl Default for InMemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocument {
    async fn scan(&self) -> Result<Vec<ScannedSection>, StoreError> {
        Ok(self.sections.read().await.clone())
    }

    async fn section_ids(&self) -> Result<Vec<SectionId>, StoreError> {
        Ok(self.sections.read().await.iter().map(|s| s.id).collect())
    }

    async fn insert_paragraph_after(
        &self,
        anchor: Anchor,
        section: Section,
    ) -> Result<(), StoreError> {
        let mut sections = self.sections.write().await;
        let index = match anchor {
            Anchor::Start => 0,
            Anchor::After(id) => {
                sections
                    .iter()
                    .position(|s| s.id == id)
                    .ok_or(StoreError::SectionNotFound(id.0))?
                    + 1
            }
        };
        let id = self.allocate_id();
        sections.insert(index, ScannedSection { id, section });
        Ok(())
    }

    async fn remove_paragraph(&self, id: SectionId) -> Result<(), StoreError> {
        let mut sections = self.sections.write().await;
        let index = sections
            .iter()
            .position(|s| s.id == id)
            .ok_or(StoreError::SectionNotFound(id.0))?;
        sections.remove(index);
        Ok(())
    }
}

/// A single mutable text block (memory, author's note).
#[derive(Default)]
pub struct InMemoryText {
    text: RwLock<String>,
}

impl InMemoryText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: RwLock::new(text.into()),
        }
    }

    pub async fn set(&self, text: impl Into<String>) {
        *self.text.write().await = text.into();
    }
}

#[async_trait]
impl TextStore for InMemoryText {
    async fn get(&self) -> Result<String, StoreError> {
        Ok(self.text.read().await.clone())
    }
}

/// A lorebook held as a Vec of entries in listing order.
#[derive(Default)]
pub struct InMemoryLorebook {
    entries: RwLock<Vec<LorebookEntry>>,
}

impl InMemoryLorebook {
    pub fn new(entries: Vec<LorebookEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub async fn push(&self, entry: LorebookEntry) {
        self.entries.write().await.push(entry);
    }
}

#[async_trait]
impl LorebookStore for InMemoryLorebook {
    async fn entries(&self) -> Result<Vec<LorebookEntry>, StoreError> {
        Ok(self.entries.read().await.clone())
    }
}

/// Key/value storage scoped to one document.
#[derive(Default)]
pub struct InMemoryKv {
    values: RwLock<serde_json::Map<String, serde_json::Value>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    /// Overwrite a value unconditionally.
    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.values.write().await.insert(key.into(), value);
    }

    /// A copy of every stored value.
    pub async fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        self.values.read().await.clone()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn set_if_absent(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        self.values
            .write()
            .await
            .entry(key.to_string())
            .or_insert(value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.values.read().await.get(key).cloned())
    }
}

//! Document trait: the in-progress story as an ordered list of sections.
//!
//! The steering loop reads the document to build context and writes exactly
//! one kind of section into it: the transient `instruction` block. The store
//! is the source of truth for which sections exist.

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opaque identifier of a document section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionId(pub u64);

impl std::fmt::Display for SectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a section's text came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionSource {
    /// Story text with no more specific provenance
    #[default]
    Story,
    /// Typed by the author
    User,
    /// Generated by the writing model
    Ai,
    /// Edited after generation
    Edit,
    /// Part of the opening prompt
    Prompt,
    /// A steering directive; excluded from story text
    Instruction,
}

impl SectionSource {
    /// Whether this section belongs to the story proper.
    pub fn is_story(self) -> bool {
        self != SectionSource::Instruction
    }
}

/// A paragraph of the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// The paragraph text
    pub text: String,

    /// Provenance tag
    #[serde(default)]
    pub source: SectionSource,
}

impl Section {
    pub fn new(text: impl Into<String>, source: SectionSource) -> Self {
        Self {
            text: text.into(),
            source,
        }
    }

    /// A steering directive block.
    pub fn instruction(text: impl Into<String>) -> Self {
        Self::new(text, SectionSource::Instruction)
    }
}

/// Story text: the texts of non-instruction sections joined by newlines,
/// in document order.
pub fn story_text<'a>(sections: impl IntoIterator<Item = &'a Section>) -> String {
    sections
        .into_iter()
        .filter(|s| s.source.is_story())
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A section together with its identifier, as returned by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedSection {
    pub id: SectionId,
    pub section: Section,
}

/// Insertion point for a new paragraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Before every existing section
    Start,
    /// Immediately after the given section
    After(SectionId),
}

/// The core DocumentStore trait.
///
/// Implementations: in-memory (for tests and story files), editor bridges.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All sections in document order.
    async fn scan(&self) -> std::result::Result<Vec<ScannedSection>, StoreError>;

    /// All section identifiers in document order.
    async fn section_ids(&self) -> std::result::Result<Vec<SectionId>, StoreError>;

    /// Insert a paragraph at `anchor`.
    async fn insert_paragraph_after(
        &self,
        anchor: Anchor,
        section: Section,
    ) -> std::result::Result<(), StoreError>;

    /// Remove a paragraph. Absent ids yield `StoreError::SectionNotFound`.
    async fn remove_paragraph(&self, id: SectionId) -> std::result::Result<(), StoreError>;
}

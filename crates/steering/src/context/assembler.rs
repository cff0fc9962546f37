//! Context assembly: the prompt a consultation reasons over.
//!
//! Blocks are emitted from most stable to most volatile so repeated
//! consultations share the longest possible prompt prefix:
//!
//! 1. **Memory/Setting**: long-lived world context
//! 2. **Lorebook**: entries that are always on or keyed to the story
//! 3. **Author's Note**: the writer's current guidance
//! 4. **Story**: the document itself, newest text last, tail-truncated
//!
//! Empty blocks are omitted. A source that fails to load contributes
//! nothing; assembly itself never fails.

use std::sync::Arc;
use storyhelm_core::document::{self, DocumentStore, ScannedSection};
use storyhelm_core::knowledge::{LorebookEntry, LorebookStore, TextStore};
use tracing::{debug, warn};

pub const MEMORY_LABEL: &str = "[Memory/Setting]";
pub const LOREBOOK_LABEL: &str = "[Lorebook — Active Entries]";
pub const AUTHORS_NOTE_LABEL: &str = "[Author's Note]";
pub const STORY_LABEL: &str = "[Story]";

/// Marker placed before a story that was cut from the front.
pub const TRUNCATION_MARKER: &str = "...\n";

/// Default story ceiling in characters.
pub const DEFAULT_MAX_STORY_CHARS: usize = 60_000;

/// The assembled prompt plus what went into it.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub text: String,
    pub metadata: AssemblyMetadata,
}

/// What each source contributed to an assembly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyMetadata {
    pub memory_included: bool,
    pub active_lore_entries: usize,
    pub authors_note_included: bool,
    /// Story length in characters before truncation
    pub story_chars: usize,
    pub story_truncated: bool,
}

/// Builds consultation context from the document and its knowledge sources.
pub struct ContextAssembler {
    document: Arc<dyn DocumentStore>,
    memory: Arc<dyn TextStore>,
    authors_note: Arc<dyn TextStore>,
    lorebook: Arc<dyn LorebookStore>,
    max_story_chars: usize,
}

impl ContextAssembler {
    pub fn new(
        document: Arc<dyn DocumentStore>,
        memory: Arc<dyn TextStore>,
        authors_note: Arc<dyn TextStore>,
        lorebook: Arc<dyn LorebookStore>,
    ) -> Self {
        Self {
            document,
            memory,
            authors_note,
            lorebook,
            max_story_chars: DEFAULT_MAX_STORY_CHARS,
        }
    }

    /// Set the story ceiling in characters.
    pub fn with_max_story_chars(mut self, max: usize) -> Self {
        self.max_story_chars = max;
        self
    }

    pub fn document(&self) -> &Arc<dyn DocumentStore> {
        &self.document
    }

    /// Assemble the context string.
    pub async fn assemble(&self) -> String {
        self.assemble_detailed().await.text
    }

    /// Assemble the context and report what each source contributed.
    pub async fn assemble_detailed(&self) -> AssembledContext {
        let (memory, lorebook, authors_note, sections) = futures::join!(
            self.memory.get(),
            self.lorebook.entries(),
            self.authors_note.get(),
            self.document.scan(),
        );

        let memory = memory.unwrap_or_else(|e| {
            warn!(error = %e, "Memory unavailable, omitting it from context");
            String::new()
        });
        let lorebook = lorebook.unwrap_or_else(|e| {
            warn!(error = %e, "Lorebook unavailable, omitting it from context");
            Vec::new()
        });
        let authors_note = authors_note.unwrap_or_else(|e| {
            warn!(error = %e, "Author's note unavailable, omitting it from context");
            String::new()
        });
        let sections = sections.unwrap_or_else(|e| {
            warn!(error = %e, "Document scan failed, omitting story from context");
            Vec::new()
        });

        let story = story_text(&sections);
        let story_lower = story.to_lowercase();
        let mut metadata = AssemblyMetadata::default();
        let mut parts: Vec<String> = Vec::with_capacity(4);

        if !memory.trim().is_empty() {
            parts.push(format!("{MEMORY_LABEL}\n{memory}"));
            metadata.memory_included = true;
        }

        let active: Vec<&str> = lorebook
            .iter()
            .filter(|entry| is_active(entry, &story_lower))
            .map(|entry| entry.text.as_str())
            .collect();
        if !active.is_empty() {
            parts.push(format!("{LOREBOOK_LABEL}\n{}", active.join("\n\n")));
            metadata.active_lore_entries = active.len();
        }

        if !authors_note.trim().is_empty() {
            parts.push(format!("{AUTHORS_NOTE_LABEL}\n{authors_note}"));
            metadata.authors_note_included = true;
        }

        if !story.trim().is_empty() {
            metadata.story_chars = story.chars().count();
            let body = if metadata.story_chars > self.max_story_chars {
                metadata.story_truncated = true;
                format!("{TRUNCATION_MARKER}{}", tail_chars(&story, self.max_story_chars))
            } else {
                story
            };
            parts.push(format!("{STORY_LABEL}\n{body}"));
        }

        let text = parts.join("\n\n");
        debug!(
            chars = text.len(),
            memory = metadata.memory_included,
            lore = metadata.active_lore_entries,
            authors_note = metadata.authors_note_included,
            story_chars = metadata.story_chars,
            truncated = metadata.story_truncated,
            "Context assembled"
        );

        AssembledContext { text, metadata }
    }
}

/// Story text of a scanned document.
pub fn story_text(sections: &[ScannedSection]) -> String {
    document::story_text(sections.iter().map(|s| &s.section))
}

/// Whether a lorebook entry belongs in context for this story.
///
/// `story_lower` must already be lowercased.
pub fn is_active(entry: &LorebookEntry, story_lower: &str) -> bool {
    if !entry.enabled || entry.text.trim().is_empty() {
        return false;
    }
    if entry.force_activation {
        return true;
    }
    entry
        .keys
        .iter()
        .filter(|key| !key.is_empty())
        .any(|key| story_lower.contains(&key.to_lowercase()))
}

/// The trailing `n` characters of `text`.
pub fn tail_chars(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match text.char_indices().rev().nth(n - 1) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use storyhelm_core::document::{Section, SectionSource};
    use storyhelm_core::error::StoreError;
    use storyhelm_stores::{InMemoryDocument, InMemoryLorebook, InMemoryText};

    struct FailingText;

    #[async_trait]
    impl TextStore for FailingText {
        async fn get(&self) -> Result<String, StoreError> {
            Err(StoreError::Unavailable("memory service down".into()))
        }
    }

    struct FailingLorebook;

    #[async_trait]
    impl LorebookStore for FailingLorebook {
        async fn entries(&self) -> Result<Vec<LorebookEntry>, StoreError> {
            Err(StoreError::Unavailable("lorebook locked".into()))
        }
    }

    fn story(text: &str) -> Section {
        Section::new(text, SectionSource::Story)
    }

    fn assembler(
        sections: Vec<Section>,
        memory: &str,
        note: &str,
        lore: Vec<LorebookEntry>,
    ) -> ContextAssembler {
        ContextAssembler::new(
            Arc::new(InMemoryDocument::from_sections(sections)),
            Arc::new(InMemoryText::new(memory)),
            Arc::new(InMemoryText::new(note)),
            Arc::new(InMemoryLorebook::new(lore)),
        )
    }

    #[tokio::test]
    async fn always_on_lore_and_story() {
        let ctx = assembler(
            vec![story("Once upon a time."), story("A dragon appeared.")],
            "",
            "",
            vec![LorebookEntry::always_on("The kingdom is at war.")],
        )
        .assemble()
        .await;

        assert_eq!(
            ctx,
            "[Lorebook — Active Entries]\nThe kingdom is at war.\n\n[Story]\nOnce upon a time.\nA dragon appeared."
        );
    }

    #[tokio::test]
    async fn block_order_is_fixed() {
        let ctx = assembler(
            vec![story("The knight rode on.")],
            "A desert kingdom.",
            "Keep it grim.",
            vec![LorebookEntry::keyed("Knights swear oaths.", &["KNIGHT"])],
        )
        .assemble()
        .await;

        let memory = ctx.find(MEMORY_LABEL).unwrap();
        let lore = ctx.find(LOREBOOK_LABEL).unwrap();
        let note = ctx.find(AUTHORS_NOTE_LABEL).unwrap();
        let story_pos = ctx.find(STORY_LABEL).unwrap();
        assert!(memory < lore && lore < note && note < story_pos);
        assert!(!ctx.contains("\n\n\n"));
    }

    #[tokio::test]
    async fn whitespace_sources_are_omitted() {
        let ctx = assembler(vec![story("Text.")], "   \n", "\t", vec![]).assemble().await;
        assert_eq!(ctx, "[Story]\nText.");
    }

    #[tokio::test]
    async fn empty_everything_is_empty() {
        let ctx = assembler(vec![], "", "", vec![]).assemble().await;
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn instructions_are_not_story() {
        let ctx = assembler(
            vec![
                story("She waited."),
                Section::instruction("Add a dragon."),
                story("Nothing came."),
            ],
            "",
            "",
            vec![LorebookEntry::keyed("Dragons hoard gold.", &["dragon"])],
        )
        .assemble()
        .await;

        assert_eq!(ctx, "[Story]\nShe waited.\nNothing came.");
    }

    #[tokio::test]
    async fn long_story_keeps_the_tail() {
        let long = format!("{}END", "a".repeat(100));
        let detailed = assembler(vec![story(&long)], "", "", vec![])
            .with_max_story_chars(10)
            .assemble_detailed()
            .await;

        assert_eq!(detailed.text, "[Story]\n...\naaaaaaaEND");
        assert!(detailed.metadata.story_truncated);
        assert_eq!(detailed.metadata.story_chars, 103);
    }

    #[tokio::test]
    async fn failing_sources_contribute_nothing() {
        let asm = ContextAssembler::new(
            Arc::new(InMemoryDocument::from_sections([story("Still here.")])),
            Arc::new(FailingText),
            Arc::new(InMemoryText::new("Note.")),
            Arc::new(FailingLorebook),
        );
        assert_eq!(asm.assemble().await, "[Author's Note]\nNote.\n\n[Story]\nStill here.");
    }

    #[test]
    fn lorebook_activation_rules() {
        let story = "the dragon sleeps";

        assert!(is_active(&LorebookEntry::always_on("War."), "unrelated"));
        assert!(is_active(&LorebookEntry::keyed("Gold.", &["Dragon"]), story));
        assert!(!is_active(&LorebookEntry::keyed("Gold.", &["griffin"]), story));
        // Empty keys never match
        assert!(!is_active(&LorebookEntry::keyed("Gold.", &[""]), story));
        // No keys and not forced
        assert!(!is_active(&LorebookEntry::keyed("Gold.", &[]), story));

        let mut disabled = LorebookEntry::always_on("War.");
        disabled.enabled = false;
        assert!(!is_active(&disabled, story));

        assert!(!is_active(&LorebookEntry::always_on("  "), story));
    }

    #[test]
    fn tail_chars_is_utf8_safe() {
        assert_eq!(tail_chars("héllo wörld", 5), "wörld");
        assert_eq!(tail_chars("short", 50), "short");
        assert_eq!(tail_chars("abc", 0), "");
    }
}

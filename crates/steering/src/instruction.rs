//! The document's single live instruction block.
//!
//! A directive is placed just before the newest paragraph, so the writer
//! reads it right before continuing. Replacing a directive removes the old
//! block first; the document store decides whether a block still exists,
//! so removal treats "already gone" as success.

use std::sync::Arc;
use storyhelm_core::document::{Anchor, DocumentStore, Section, SectionId};
use storyhelm_core::error::StoreError;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where an insert left the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The block is in the document under this id
    Placed(SectionId),
    /// The document has no sections to anchor against
    NoAnchor,
    /// The consultation was cancelled before the slot was taken
    Cancelled,
}

/// Owns the id of the instruction block currently in the document.
pub struct InstructionSlot {
    document: Arc<dyn DocumentStore>,
    current: Mutex<Option<SectionId>>,
}

impl InstructionSlot {
    pub fn new(document: Arc<dyn DocumentStore>) -> Self {
        Self {
            document,
            current: Mutex::new(None),
        }
    }

    /// Id of the live instruction block, if one was inserted.
    pub async fn current(&self) -> Option<SectionId> {
        *self.current.lock().await
    }

    /// Take ownership of an instruction block left by an earlier session.
    pub async fn adopt(&self, id: SectionId) {
        *self.current.lock().await = Some(id);
    }

    /// Replace the live instruction with `text`.
    ///
    /// Returns the new block's id, or `None` when the document has no
    /// sections to anchor against.
    pub async fn insert(&self, text: &str) -> Result<Option<SectionId>, StoreError> {
        let mut current = self.current.lock().await;
        match self.place(&mut current, text).await? {
            Placement::Placed(id) => Ok(Some(id)),
            Placement::NoAnchor | Placement::Cancelled => Ok(None),
        }
    }

    /// Like [`insert`](Self::insert), but leaves the document alone when
    /// `cancel` has fired by the time the slot is held.
    pub async fn insert_unless_cancelled(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Placement, StoreError> {
        let mut current = self.current.lock().await;
        if cancel.is_cancelled() {
            debug!("Consultation cancelled, instruction not placed");
            return Ok(Placement::Cancelled);
        }
        self.place(&mut current, text).await
    }

    async fn place(
        &self,
        current: &mut Option<SectionId>,
        text: &str,
    ) -> Result<Placement, StoreError> {
        self.remove_locked(current).await;

        let ids = self.document.section_ids().await?;
        let anchor = match ids.len() {
            0 => {
                debug!("Document is empty, no place for an instruction");
                return Ok(Placement::NoAnchor);
            }
            1 => Anchor::Start,
            n => Anchor::After(ids[n - 2]),
        };

        self.document
            .insert_paragraph_after(anchor, Section::instruction(text))
            .await?;

        let ids = self.document.section_ids().await?;
        let id = match ids.len() {
            0 => {
                return Err(StoreError::Unavailable(
                    "instruction vanished after insert".into(),
                ));
            }
            1 => ids[0],
            n => ids[n - 2],
        };

        debug!(section = %id, "Instruction inserted");
        *current = Some(id);
        Ok(Placement::Placed(id))
    }

    /// Remove the live instruction. Safe to call any number of times.
    pub async fn remove(&self) {
        let mut current = self.current.lock().await;
        self.remove_locked(&mut current).await;
    }

    async fn remove_locked(&self, current: &mut Option<SectionId>) {
        let Some(id) = current.take() else {
            return;
        };
        match self.document.remove_paragraph(id).await {
            Ok(()) => debug!(section = %id, "Instruction removed"),
            Err(e) => debug!(section = %id, error = %e, "Instruction already gone"),
        }
    }
}

//! Shared stand-ins for orchestrator tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use storyhelm_core::document::{Anchor, DocumentStore, ScannedSection, Section, SectionId};
use storyhelm_core::error::{Error, ProviderError, StoreError};
use storyhelm_core::knowledge::TextStore;
use storyhelm_core::provider::{Choice, Provider, ProviderRequest, ProviderResponse, Usage};
use storyhelm_core::sink::ErrorSink;
use storyhelm_stores::InMemoryDocument;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// A response with a single plain choice.
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        choices: vec![Choice::text(text)],
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "glm-4-6".into(),
    }
}

/// Returns scripted replies in order and records every request.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(text_response(t))).collect())
    }

    pub fn failing(error: ProviderError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
        _cancel: Option<CancellationToken>,
    ) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::ApiError {
                    status_code: 500,
                    message: "script exhausted".into(),
                })
            })
    }
}

/// Blocks each call until released or cancelled.
pub struct GatedProvider {
    reply: String,
    entered: Notify,
    release: Notify,
    calls: AtomicUsize,
}

impl GatedProvider {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.into(),
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Wait until a call is in flight.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let the in-flight call return its reply.
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    async fn complete(
        &self,
        _request: ProviderRequest,
        cancel: Option<CancellationToken>,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        let cancel = cancel.unwrap_or_default();
        tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            _ = self.release.notified() => Ok(text_response(&self.reply)),
        }
    }
}

/// A text source whose reads block until released.
pub struct GatedText {
    text: String,
    entered: Notify,
    release: Notify,
}

impl GatedText {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.into(),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Wait until a read is in progress.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl TextStore for GatedText {
    async fn get(&self) -> Result<String, StoreError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.text.clone())
    }
}

/// Collects reported failures.
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, label: &str, error: &Error) {
        self.reports
            .lock()
            .unwrap()
            .push((label.to_string(), error.to_string()));
    }
}

/// A readable document that refuses edits.
pub struct ReadOnlyDocument {
    inner: InMemoryDocument,
}

impl ReadOnlyDocument {
    pub fn new(sections: impl IntoIterator<Item = Section>) -> Self {
        Self {
            inner: InMemoryDocument::from_sections(sections),
        }
    }
}

#[async_trait]
impl DocumentStore for ReadOnlyDocument {
    async fn scan(&self) -> Result<Vec<ScannedSection>, StoreError> {
        self.inner.scan().await
    }

    async fn section_ids(&self) -> Result<Vec<SectionId>, StoreError> {
        self.inner.section_ids().await
    }

    async fn insert_paragraph_after(
        &self,
        _anchor: Anchor,
        _section: Section,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("document is read-only".into()))
    }

    async fn remove_paragraph(&self, id: SectionId) -> Result<(), StoreError> {
        Err(StoreError::SectionNotFound(id.0))
    }
}

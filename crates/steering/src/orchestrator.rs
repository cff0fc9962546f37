//! The consultation orchestrator: drives the steering loop.
//!
//! One orchestrator serves one document. The host shares it behind an `Arc`
//! and calls [`on_generation_end`](ConsultationOrchestrator::on_generation_end)
//! after every generation; a UI "nudge" calls
//! [`consult`](ConsultationOrchestrator::consult) directly. Both paths meet
//! at the same single-flight guard, so at most one model call is ever
//! outstanding and extra requests are dropped rather than queued.
//!
//! No entry point returns an error. Cancellation is silent, other failures
//! go to the [`ErrorSink`], and the guard is released on every exit path.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use storyhelm_config::{INTERVAL_KEY, SteeringConfig};
use storyhelm_core::document::SectionId;
use storyhelm_core::error::{Error, ProviderError, StoreError};
use storyhelm_core::event::{DomainEvent, EventBus, GenerationEnded};
use storyhelm_core::knowledge::KvStore;
use storyhelm_core::message::Message;
use storyhelm_core::provider::{Provider, ProviderRequest};
use storyhelm_core::sink::{ErrorSink, TracingErrorSink};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::assembler::{ContextAssembler, story_text, tail_chars};
use crate::context::token::estimator_for;
use crate::history::{ConsultationEntry, TokenBudgetBuffer};
use crate::instruction::{InstructionSlot, Placement};

/// The closing user message of every consultation.
pub const DIRECTIVE_REQUEST: &str = "Write your directive for the next few paragraphs.";

/// Label used when reporting a failed consultation.
const FAILURE_LABEL: &str = "consultation failed";

/// Why a consultation produced no directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another consultation held the single-flight guard
    AlreadyRunning,
    /// Steering is switched off
    Disabled,
    /// Nothing to reason about
    EmptyContext,
    /// The model answered with blank text
    EmptyDirective,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "already running"),
            Self::Disabled => write!(f, "disabled"),
            Self::EmptyContext => write!(f, "empty context"),
            Self::EmptyDirective => write!(f, "empty directive"),
        }
    }
}

/// What a call to `consult` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsultOutcome {
    /// A directive was produced and placed in the document
    Issued(String),
    Skipped(SkipReason),
    /// The model call was cancelled
    Cancelled,
    /// The failure was reported to the error sink
    Failed(String),
}

/// Model parameters and loop tuning for consultations.
#[derive(Debug, Clone)]
pub struct ConsultationSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub enable_thinking: bool,
    pub system_prompt: String,
    pub default_interval: u32,
    pub outcome_snippet_chars: usize,
}

impl Default for ConsultationSettings {
    fn default() -> Self {
        Self::from(&SteeringConfig::default())
    }
}

impl From<&SteeringConfig> for ConsultationSettings {
    fn from(config: &SteeringConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            enable_thinking: config.enable_thinking,
            system_prompt: config.system_prompt.clone(),
            default_interval: config.default_interval.max(1),
            outcome_snippet_chars: config.outcome_snippet_chars,
        }
    }
}

/// Drives consultations for one document.
pub struct ConsultationOrchestrator {
    provider: Arc<dyn Provider>,
    assembler: ContextAssembler,
    storage: Arc<dyn KvStore>,
    instruction: InstructionSlot,
    settings: ConsultationSettings,
    history: Mutex<TokenBudgetBuffer>,
    last_directive: Mutex<Option<String>>,
    cancel: Mutex<Option<CancellationToken>>,
    consulting: AtomicBool,
    enabled: AtomicBool,
    generations: AtomicU32,
    sink: Arc<dyn ErrorSink>,
    event_bus: Arc<EventBus>,
}

impl ConsultationOrchestrator {
    /// Create an orchestrator with default settings.
    ///
    /// The instruction block is written into the assembler's document.
    pub fn new(
        provider: Arc<dyn Provider>,
        assembler: ContextAssembler,
        storage: Arc<dyn KvStore>,
    ) -> Self {
        let instruction = InstructionSlot::new(assembler.document().clone());
        Self {
            provider,
            assembler,
            storage,
            instruction,
            settings: ConsultationSettings::default(),
            history: Mutex::new(TokenBudgetBuffer::default()),
            last_directive: Mutex::new(None),
            cancel: Mutex::new(None),
            consulting: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            generations: AtomicU32::new(0),
            sink: Arc::new(TracingErrorSink),
            event_bus: Arc::new(EventBus::default()),
        }
    }

    /// Apply a `[steering]` config table: model parameters, history
    /// budget, and tokenizer.
    pub fn with_config(self, config: &SteeringConfig) -> Self {
        let history =
            TokenBudgetBuffer::new(config.history_max_tokens, config.history_rollover_tokens)
                .with_estimator(estimator_for(config.tokenizer));
        self.with_settings(ConsultationSettings::from(config))
            .with_history(history)
    }

    pub fn with_settings(mut self, settings: ConsultationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the history buffer.
    pub fn with_history(mut self, history: TokenBudgetBuffer) -> Self {
        self.history = Mutex::new(history);
        self
    }

    /// Set the steering model. Generations from this model are ignored.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.settings.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.settings.system_prompt = prompt.into();
        self
    }

    /// Generations between consultations when storage holds no interval.
    pub fn with_default_interval(mut self, interval: u32) -> Self {
        self.settings.default_interval = interval.max(1);
        self
    }

    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn settings(&self) -> &ConsultationSettings {
        &self.settings
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Seed per-document storage with the default interval.
    pub async fn initialize(&self) {
        let default = serde_json::json!(self.settings.default_interval);
        if let Err(e) = self.storage.set_if_absent(INTERVAL_KEY, default).await {
            warn!(error = %e, "Could not seed consultation interval");
        }
    }

    /// Handle a finished generation from the host.
    ///
    /// Returns the consultation outcome when this generation triggered one.
    pub async fn on_generation_end(&self, event: &GenerationEnded) -> Option<ConsultOutcome> {
        if !self.is_enabled() {
            return None;
        }
        if event.model == self.settings.model {
            debug!(model = %event.model, "Ignoring our own generation");
            return None;
        }

        self.record_outcome().await;

        let interval = self.interval().await;
        let count = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(count, interval, "Generation counted");
        if count < interval {
            return None;
        }

        self.generations.store(0, Ordering::SeqCst);
        Some(self.consult().await)
    }

    /// Pair the last directive with the story text that followed it.
    ///
    /// Returns whether a history entry was added.
    pub async fn record_outcome(&self) -> bool {
        let Some(directive) = lock(&self.last_directive).clone() else {
            return false;
        };

        let sections = match self.assembler.document().scan().await {
            Ok(sections) => sections,
            Err(e) => {
                warn!(error = %e, "Document scan failed, outcome not recorded");
                return false;
            }
        };
        let story = story_text(&sections);
        let outcome = tail_chars(&story, self.settings.outcome_snippet_chars).trim();
        if outcome.is_empty() {
            return false;
        }

        let history_len = {
            let mut history = lock(&self.history);
            history.add(ConsultationEntry::new(directive.clone(), outcome));
            history.len()
        };
        {
            // A newer directive may have landed while the document was scanned
            let mut last = lock(&self.last_directive);
            if last.as_deref() == Some(directive.as_str()) {
                *last = None;
            }
        }

        debug!(history_len, "Outcome recorded");
        self.event_bus.publish(DomainEvent::OutcomeRecorded {
            directive,
            history_len,
            timestamp: Utc::now(),
        });
        true
    }

    /// Run one consultation unless one is already in flight.
    pub async fn consult(&self) -> ConsultOutcome {
        if !self.is_enabled() {
            return self.skipped(SkipReason::Disabled);
        }
        if self
            .consulting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Consultation already running, dropping request");
            return self.skipped(SkipReason::AlreadyRunning);
        }
        let _guard = FlightGuard { orchestrator: self };

        // Armed before any await so a disable during assembly reaches us
        let token = CancellationToken::new();
        *lock(&self.cancel) = Some(token.clone());

        let consultation_id = Uuid::new_v4().to_string();
        self.event_bus.publish(DomainEvent::ConsultationStarted {
            consultation_id: consultation_id.clone(),
            timestamp: Utc::now(),
        });

        let outcome = self.run(&consultation_id, &token).await;
        match &outcome {
            ConsultOutcome::Issued(directive) => {
                info!(
                    consultation_id = %consultation_id,
                    directive = %directive,
                    "Directive issued"
                );
                self.event_bus.publish(DomainEvent::DirectiveIssued {
                    consultation_id,
                    directive: directive.clone(),
                    timestamp: Utc::now(),
                });
            }
            ConsultOutcome::Skipped(reason) => {
                debug!(
                    consultation_id = %consultation_id,
                    reason = %reason,
                    "Consultation skipped"
                );
                self.event_bus.publish(DomainEvent::ConsultationSkipped {
                    reason: reason.to_string(),
                    timestamp: Utc::now(),
                });
            }
            ConsultOutcome::Cancelled => {
                debug!(consultation_id = %consultation_id, "Consultation cancelled");
                self.event_bus.publish(DomainEvent::ConsultationCancelled {
                    consultation_id,
                    timestamp: Utc::now(),
                });
            }
            ConsultOutcome::Failed(message) => {
                self.event_bus.publish(DomainEvent::ConsultationFailed {
                    consultation_id,
                    error_message: message.clone(),
                    timestamp: Utc::now(),
                });
            }
        }
        outcome
    }

    async fn run(&self, consultation_id: &str, token: &CancellationToken) -> ConsultOutcome {
        let context = self.assembler.assemble().await;
        if token.is_cancelled() {
            return ConsultOutcome::Cancelled;
        }
        if context.trim().is_empty() {
            return ConsultOutcome::Skipped(SkipReason::EmptyContext);
        }

        let history = lock(&self.history).render();
        let messages = vec![
            Message::system(self.settings.system_prompt.clone()),
            Message::user(format!("{context}{history}")),
            Message::user(DIRECTIVE_REQUEST),
        ];
        let request = ProviderRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: Some(self.settings.max_tokens),
            enable_thinking: self.settings.enable_thinking,
        };

        debug!(
            consultation_id,
            provider = self.provider.name(),
            model = %request.model,
            context_chars = context.len(),
            "Consulting steering model"
        );
        let result = self.provider.complete(request, Some(token.clone())).await;

        let response = match result {
            Ok(_) if token.is_cancelled() => return ConsultOutcome::Cancelled,
            Ok(response) => response,
            Err(ProviderError::Cancelled) => return ConsultOutcome::Cancelled,
            Err(_) if token.is_cancelled() => return ConsultOutcome::Cancelled,
            Err(e) => return self.fail(Error::from(e)),
        };

        let directive = response.first_output().map(str::trim).unwrap_or_default();
        if directive.is_empty() {
            return ConsultOutcome::Skipped(SkipReason::EmptyDirective);
        }

        let placed = match self.instruction.insert_unless_cancelled(directive, token).await {
            Ok(placed) => placed,
            Err(e) => return self.fail(Error::from(e)),
        };

        // Disabling takes this lock after removing the block, so a directive
        // remembered here is always seen and cleared by it
        let mut last = lock(&self.last_directive);
        if placed == Placement::Cancelled || !self.is_enabled() {
            return ConsultOutcome::Cancelled;
        }
        *last = Some(directive.to_string());
        ConsultOutcome::Issued(directive.to_string())
    }

    fn fail(&self, error: Error) -> ConsultOutcome {
        self.sink.report(FAILURE_LABEL, &error);
        ConsultOutcome::Failed(error.to_string())
    }

    fn skipped(&self, reason: SkipReason) -> ConsultOutcome {
        self.event_bus.publish(DomainEvent::ConsultationSkipped {
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        ConsultOutcome::Skipped(reason)
    }

    /// Abort the in-flight model call, if any.
    ///
    /// Returns whether there was a call to cancel.
    pub fn cancel(&self) -> bool {
        match lock(&self.cancel).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Switch steering on or off.
    ///
    /// Switching off cancels any in-flight call, removes the live
    /// instruction, and forgets the pending directive.
    pub async fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if enabled || !was {
            return;
        }
        self.cancel();
        self.instruction.remove().await;
        lock(&self.last_directive).take();
        self.generations.store(0, Ordering::SeqCst);
        info!("Steering disabled");
    }

    /// Place `text` as the document's instruction, replacing any previous one.
    pub async fn insert_instruction(&self, text: &str) -> Result<Option<SectionId>, StoreError> {
        self.instruction.insert(text).await
    }

    /// Remove the live instruction. Idempotent.
    pub async fn remove_instruction(&self) {
        self.instruction.remove().await;
    }

    /// Treat an existing section as the live instruction.
    pub async fn adopt_instruction(&self, id: SectionId) {
        self.instruction.adopt(id).await;
    }

    pub async fn instruction_id(&self) -> Option<SectionId> {
        self.instruction.current().await
    }

    /// History entries, oldest first.
    pub fn history(&self) -> Vec<ConsultationEntry> {
        lock(&self.history).read()
    }

    pub fn last_directive(&self) -> Option<String> {
        lock(&self.last_directive).clone()
    }

    pub fn is_consulting(&self) -> bool {
        self.consulting.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Generations counted since the last consultation.
    pub fn generation_count(&self) -> u32 {
        self.generations.load(Ordering::SeqCst)
    }

    /// The interval from storage, or the default when it is missing or
    /// not a positive whole number.
    async fn interval(&self) -> u32 {
        let value = match self.storage.get(INTERVAL_KEY).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Could not read consultation interval");
                None
            }
        };
        value
            .as_ref()
            .and_then(interval_from_json)
            .unwrap_or(self.settings.default_interval)
    }
}

fn interval_from_json(value: &serde_json::Value) -> Option<u32> {
    let n = match value.as_u64() {
        Some(n) => n,
        None => {
            let f = value.as_f64()?;
            if f.fract() != 0.0 || f < 1.0 {
                return None;
            }
            f as u64
        }
    };
    u32::try_from(n).ok().filter(|n| *n > 0)
}

/// Releases the single-flight guard and the cancel handle on drop.
struct FlightGuard<'a> {
    orchestrator: &'a ConsultationOrchestrator,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        lock(&self.orchestrator.cancel).take();
        self.orchestrator.consulting.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use storyhelm_core::document::{DocumentStore, Section, SectionSource};
    use storyhelm_core::knowledge::LorebookEntry;
    use storyhelm_core::message::Role;
    use storyhelm_core::provider::{Choice, ProviderResponse};
    use storyhelm_stores::{InMemoryDocument, InMemoryKv, InMemoryLorebook, InMemoryText};

    struct Fixture {
        document: Arc<InMemoryDocument>,
        storage: Arc<InMemoryKv>,
        sink: Arc<RecordingSink>,
    }

    fn story(text: &str) -> Section {
        Section::new(text, SectionSource::Story)
    }

    fn fixture(sections: Vec<Section>) -> Fixture {
        Fixture {
            document: Arc::new(InMemoryDocument::from_sections(sections)),
            storage: Arc::new(InMemoryKv::new()),
            sink: Arc::new(RecordingSink::default()),
        }
    }

    impl Fixture {
        fn orchestrator(&self, provider: Arc<dyn Provider>) -> ConsultationOrchestrator {
            let assembler = ContextAssembler::new(
                self.document.clone(),
                Arc::new(InMemoryText::new("")),
                Arc::new(InMemoryText::new("")),
                Arc::new(InMemoryLorebook::new(vec![LorebookEntry::always_on(
                    "The kingdom is at war.",
                )])),
            );
            ConsultationOrchestrator::new(provider, assembler, self.storage.clone())
                .with_system_prompt("You steer stories.")
                .with_error_sink(self.sink.clone())
        }

        async fn instructions(&self) -> Vec<String> {
            self.document
                .sections()
                .await
                .into_iter()
                .filter(|s| s.source == SectionSource::Instruction)
                .map(|s| s.text)
                .collect()
        }
    }

    fn two_paragraphs() -> Vec<Section> {
        vec![story("Once upon a time."), story("A dragon appeared.")]
    }

    #[tokio::test]
    async fn consult_builds_three_messages() {
        let fx = fixture(two_paragraphs());
        let provider = Arc::new(ScriptedProvider::texts(&["Add tension."]));
        let orch = fx.orchestrator(provider.clone());

        assert_eq!(orch.consult().await, ConsultOutcome::Issued("Add tension.".into()));

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.model, "glm-4-6");
        assert_eq!(req.max_tokens, Some(300));
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(req.enable_thinking);

        assert_eq!(req.messages.len(), 3);
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[0].content, "You steer stories.");
        assert_eq!(req.messages[1].role, Role::User);
        assert!(req.messages[1].content.starts_with("[Lorebook — Active Entries]"));
        assert!(!req.messages[1].content.contains("[Previous Consultations]"));
        assert_eq!(req.messages[2].content, DIRECTIVE_REQUEST);
    }

    #[tokio::test]
    async fn issued_directive_sits_before_newest_paragraph() {
        let fx = fixture(two_paragraphs());
        let orch = fx.orchestrator(Arc::new(ScriptedProvider::texts(&["  Add tension.\n"])));

        orch.consult().await;

        let texts: Vec<String> = fx
            .document
            .sections()
            .await
            .into_iter()
            .map(|s| s.text)
            .collect();
        assert_eq!(texts, vec!["Once upon a time.", "Add tension.", "A dragon appeared."]);
        assert_eq!(orch.last_directive().as_deref(), Some("Add tension."));
        assert!(!orch.is_consulting());
    }

    #[tokio::test]
    async fn parsed_content_wins_over_text() {
        let fx = fixture(two_paragraphs());
        let response = ProviderResponse {
            choices: vec![Choice {
                text: "<think>maybe rain</think>Bring the storm.".into(),
                parsed_content: Some("Bring the storm.".into()),
            }],
            usage: None,
            model: "glm-4-6".into(),
        };
        let orch = fx.orchestrator(Arc::new(ScriptedProvider::new(vec![Ok(response)])));

        assert_eq!(orch.consult().await, ConsultOutcome::Issued("Bring the storm.".into()));
    }

    #[tokio::test]
    async fn empty_context_skips_model_call() {
        let fx = fixture(vec![]);
        let provider = Arc::new(ScriptedProvider::texts(&["unused"]));
        let assembler = ContextAssembler::new(
            fx.document.clone(),
            Arc::new(InMemoryText::new(" ")),
            Arc::new(InMemoryText::new("")),
            Arc::new(InMemoryLorebook::default()),
        );
        let orch = ConsultationOrchestrator::new(provider.clone(), assembler, fx.storage.clone());

        assert_eq!(orch.consult().await, ConsultOutcome::Skipped(SkipReason::EmptyContext));
        assert_eq!(provider.call_count(), 0);
        assert!(!orch.is_consulting());
    }

    #[tokio::test]
    async fn blank_directive_changes_nothing() {
        let fx = fixture(two_paragraphs());
        let orch = fx.orchestrator(Arc::new(ScriptedProvider::texts(&["   "])));

        assert_eq!(orch.consult().await, ConsultOutcome::Skipped(SkipReason::EmptyDirective));
        assert!(fx.instructions().await.is_empty());
        assert!(orch.last_directive().is_none());
    }

    #[tokio::test]
    async fn concurrent_consult_is_dropped() {
        let fx = fixture(two_paragraphs());
        let provider = Arc::new(GatedProvider::new("Add tension."));
        let orch = Arc::new(fx.orchestrator(provider.clone()));

        let first = tokio::spawn({
            let orch = orch.clone();
            async move { orch.consult().await }
        });
        provider.wait_entered().await;
        assert!(orch.is_consulting());

        assert_eq!(orch.consult().await, ConsultOutcome::Skipped(SkipReason::AlreadyRunning));
        assert_eq!(orch.consult().await, ConsultOutcome::Skipped(SkipReason::AlreadyRunning));
        assert_eq!(provider.call_count(), 1);
        assert!(fx.instructions().await.is_empty());

        provider.release();
        assert_eq!(first.await.unwrap(), ConsultOutcome::Issued("Add tension.".into()));
        assert_eq!(fx.instructions().await, vec!["Add tension."]);
        assert!(!orch.is_consulting());
    }

    #[tokio::test]
    async fn cancelled_call_is_silent() {
        let fx = fixture(two_paragraphs());
        let provider = Arc::new(GatedProvider::new("never delivered"));
        let orch = Arc::new(fx.orchestrator(provider.clone()));

        let task = tokio::spawn({
            let orch = orch.clone();
            async move { orch.consult().await }
        });
        provider.wait_entered().await;
        assert!(orch.cancel());

        assert_eq!(task.await.unwrap(), ConsultOutcome::Cancelled);
        assert!(fx.instructions().await.is_empty());
        assert!(fx.sink.reports().is_empty());
        assert!(!orch.is_consulting());
        // Handle was cleared with the flight
        assert!(!orch.cancel());
    }

    #[tokio::test]
    async fn provider_failure_is_reported_and_keeps_old_instruction() {
        let fx = fixture(two_paragraphs());
        let orch = fx.orchestrator(Arc::new(ScriptedProvider::texts(&["Add tension."])));
        orch.consult().await;

        // Same document, a provider that is now down
        let down = ScriptedProvider::failing(ProviderError::Network("connection reset".into()));
        let orch = fx.orchestrator(Arc::new(down));
        let live = fx.document.section_ids().await.unwrap()[1];
        orch.adopt_instruction(live).await;
        let outcome = orch.consult().await;

        assert!(matches!(outcome, ConsultOutcome::Failed(ref m) if m.contains("connection reset")));
        let reports = fx.sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "consultation failed");
        assert_eq!(fx.instructions().await, vec!["Add tension."]);
        assert!(!orch.is_consulting());
    }

    #[tokio::test]
    async fn insert_failure_is_reported() {
        let document = Arc::new(ReadOnlyDocument::new(two_paragraphs()));
        let sink = Arc::new(RecordingSink::default());
        let assembler = ContextAssembler::new(
            document,
            Arc::new(InMemoryText::new("")),
            Arc::new(InMemoryText::new("")),
            Arc::new(InMemoryLorebook::default()),
        );
        let orch = ConsultationOrchestrator::new(
            Arc::new(ScriptedProvider::texts(&["Add tension."])),
            assembler,
            Arc::new(InMemoryKv::new()),
        )
        .with_error_sink(sink.clone());

        assert!(matches!(orch.consult().await, ConsultOutcome::Failed(_)));
        assert_eq!(sink.reports().len(), 1);
        assert!(orch.last_directive().is_none());
    }

    #[tokio::test]
    async fn outcome_pairs_directive_with_new_text() {
        let fx = fixture(two_paragraphs());
        let orch = fx.orchestrator(Arc::new(ScriptedProvider::texts(&["Add tension."])));
        orch.consult().await;

        fx.document.push(story("The door creaked open.")).await;

        assert!(orch.record_outcome().await);
        let history = orch.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].directive, "Add tension.");
        assert!(history[0].content.starts_with("Directive: \"Add tension.\"\nOutcome: \""));
        assert!(history[0].content.ends_with("The door creaked open.\""));
        // The instruction block is not part of the outcome
        assert!(!history[0].content.contains("Outcome: \"Add tension."));
        assert!(orch.last_directive().is_none());

        assert!(!orch.record_outcome().await);
        assert_eq!(orch.history().len(), 1);
    }

    #[tokio::test]
    async fn outcome_snippet_is_the_trailing_text() {
        let fx = fixture(vec![story(&"x".repeat(500))]);
        let orch = fx.orchestrator(Arc::new(ScriptedProvider::texts(&["Go on."])));
        orch.consult().await;
        fx.document.push(story("  final words  ")).await;

        orch.record_outcome().await;
        let entry = &orch.history()[0];
        let outcome = entry
            .content
            .split("Outcome: \"")
            .nth(1)
            .unwrap()
            .trim_end_matches('"');
        assert!(outcome.chars().count() <= 200);
        assert!(outcome.ends_with("final words"));
    }

    #[tokio::test]
    async fn history_is_sent_with_next_consultation() {
        let fx = fixture(two_paragraphs());
        let provider = Arc::new(ScriptedProvider::texts(&["Add tension.", "Resolve it."]));
        let orch = fx.orchestrator(provider.clone());

        orch.consult().await;
        fx.document.push(story("Swords were drawn.")).await;
        orch.record_outcome().await;
        orch.consult().await;

        let second = &provider.requests()[1].messages[1].content;
        assert!(second.contains("\n\n[Previous Consultations]\nDirective: \"Add tension.\""));
        assert_eq!(fx.instructions().await, vec!["Resolve it."]);
    }

    #[tokio::test]
    async fn interval_triggers_consultation() {
        let fx = fixture(two_paragraphs());
        let provider = Arc::new(ScriptedProvider::texts(&["One.", "Two."]));
        let orch = fx.orchestrator(provider.clone());
        fx.storage.set(INTERVAL_KEY, serde_json::json!(2)).await;

        let writer = GenerationEnded::new("writer-model");
        assert!(orch.on_generation_end(&writer).await.is_none());
        assert_eq!(orch.generation_count(), 1);
        assert_eq!(
            orch.on_generation_end(&writer).await,
            Some(ConsultOutcome::Issued("One.".into()))
        );
        assert_eq!(orch.generation_count(), 0);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn own_generations_are_ignored() {
        let fx = fixture(two_paragraphs());
        let provider = Arc::new(ScriptedProvider::texts(&["One."]));
        let orch = fx.orchestrator(provider.clone()).with_default_interval(1);

        assert!(orch.on_generation_end(&GenerationEnded::new("glm-4-6")).await.is_none());
        assert_eq!(orch.generation_count(), 0);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn initialize_seeds_interval_once() {
        let fx = fixture(two_paragraphs());
        let orch = fx.orchestrator(Arc::new(ScriptedProvider::texts(&[])));

        orch.initialize().await;
        assert_eq!(fx.storage.get(INTERVAL_KEY).await.unwrap(), Some(serde_json::json!(4)));

        fx.storage.set(INTERVAL_KEY, serde_json::json!(7)).await;
        orch.initialize().await;
        assert_eq!(fx.storage.get(INTERVAL_KEY).await.unwrap(), Some(serde_json::json!(7)));
    }

    #[tokio::test]
    async fn invalid_interval_falls_back_to_default() {
        let fx = fixture(two_paragraphs());
        let provider = Arc::new(ScriptedProvider::texts(&["One."]));
        let orch = fx.orchestrator(provider.clone()).with_default_interval(3);
        fx.storage.set(INTERVAL_KEY, serde_json::json!(0)).await;

        let writer = GenerationEnded::new("writer-model");
        orch.on_generation_end(&writer).await;
        orch.on_generation_end(&writer).await;
        assert_eq!(provider.call_count(), 0);
        orch.on_generation_end(&writer).await;
        assert_eq!(provider.call_count(), 1);
    }

    #[test]
    fn interval_parsing() {
        assert_eq!(interval_from_json(&serde_json::json!(4)), Some(4));
        assert_eq!(interval_from_json(&serde_json::json!(2.0)), Some(2));
        assert_eq!(interval_from_json(&serde_json::json!(0)), None);
        assert_eq!(interval_from_json(&serde_json::json!(2.5)), None);
        assert_eq!(interval_from_json(&serde_json::json!(-1)), None);
        assert_eq!(interval_from_json(&serde_json::json!("4")), None);
    }

    #[tokio::test]
    async fn disabling_removes_instruction_and_ignores_events() {
        let fx = fixture(two_paragraphs());
        let provider = Arc::new(ScriptedProvider::texts(&["Add tension."]));
        let orch = fx.orchestrator(provider.clone()).with_default_interval(1);

        orch.consult().await;
        assert_eq!(fx.instructions().await.len(), 1);

        orch.set_enabled(false).await;
        assert!(fx.instructions().await.is_empty());
        assert!(orch.last_directive().is_none());
        assert!(orch.on_generation_end(&GenerationEnded::new("writer")).await.is_none());
        assert_eq!(orch.consult().await, ConsultOutcome::Skipped(SkipReason::Disabled));
        assert_eq!(provider.call_count(), 1);

        orch.set_enabled(true).await;
        assert!(orch.is_enabled());
    }

    #[tokio::test]
    async fn disabling_cancels_in_flight_call() {
        let fx = fixture(two_paragraphs());
        let provider = Arc::new(GatedProvider::new("late"));
        let orch = Arc::new(fx.orchestrator(provider.clone()));

        let task = tokio::spawn({
            let orch = orch.clone();
            async move { orch.consult().await }
        });
        provider.wait_entered().await;
        orch.set_enabled(false).await;

        assert_eq!(task.await.unwrap(), ConsultOutcome::Cancelled);
        assert!(fx.instructions().await.is_empty());
        assert!(fx.sink.reports().is_empty());
    }

    #[tokio::test]
    async fn disabling_during_assembly_places_nothing() {
        let document = Arc::new(InMemoryDocument::from_sections(two_paragraphs()));
        let memory = Arc::new(GatedText::new("A desert kingdom."));
        let provider = Arc::new(ScriptedProvider::texts(&["Add tension."]));
        let assembler = ContextAssembler::new(
            document.clone(),
            memory.clone(),
            Arc::new(InMemoryText::new("")),
            Arc::new(InMemoryLorebook::default()),
        );
        let orch = Arc::new(ConsultationOrchestrator::new(
            provider.clone(),
            assembler,
            Arc::new(InMemoryKv::new()),
        ));

        let task = tokio::spawn({
            let orch = orch.clone();
            async move { orch.consult().await }
        });
        memory.wait_entered().await;
        orch.set_enabled(false).await;
        memory.release();

        assert_eq!(task.await.unwrap(), ConsultOutcome::Cancelled);
        assert_eq!(provider.call_count(), 0);
        assert!(
            document
                .sections()
                .await
                .iter()
                .all(|s| s.source != SectionSource::Instruction)
        );
        assert!(orch.last_directive().is_none());
        assert!(!orch.is_consulting());
    }

    #[tokio::test]
    async fn events_are_published() {
        let fx = fixture(two_paragraphs());
        let orch = fx.orchestrator(Arc::new(ScriptedProvider::texts(&["Add tension."])));
        let mut rx = orch.event_bus().subscribe();

        orch.consult().await;

        assert!(matches!(
            rx.recv().await.unwrap().as_ref(),
            DomainEvent::ConsultationStarted { .. }
        ));
        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::DirectiveIssued { directive, .. } => assert_eq!(directive, "Add tension."),
            other => panic!("Expected DirectiveIssued, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_document_with_memory_still_remembers_directive() {
        let document = Arc::new(InMemoryDocument::new());
        let assembler = ContextAssembler::new(
            document.clone(),
            Arc::new(InMemoryText::new("A desert kingdom.")),
            Arc::new(InMemoryText::new("")),
            Arc::new(InMemoryLorebook::default()),
        );
        let orch = ConsultationOrchestrator::new(
            Arc::new(ScriptedProvider::texts(&["Open on the dunes."])),
            assembler,
            Arc::new(InMemoryKv::new()),
        );

        assert_eq!(orch.consult().await, ConsultOutcome::Issued("Open on the dunes.".into()));
        assert!(document.is_empty().await);
        assert_eq!(orch.instruction_id().await, None);
        assert_eq!(orch.last_directive().as_deref(), Some("Open on the dunes."));
    }

    #[tokio::test]
    async fn remove_instruction_twice_is_harmless() {
        let fx = fixture(two_paragraphs());
        let orch = fx.orchestrator(Arc::new(ScriptedProvider::texts(&[])));

        orch.remove_instruction().await;
        orch.insert_instruction("x").await.unwrap();
        orch.remove_instruction().await;
        orch.remove_instruction().await;

        assert_eq!(fx.document.section_ids().await.unwrap().len(), 2);
    }
}

//! CLI subcommands and the wiring they share.

pub mod consult;
pub mod context;
pub mod onboard;
pub mod write;

use std::path::Path;
use std::sync::Arc;
use storyhelm_config::AppConfig;
use storyhelm_core::document::{DocumentStore, SectionSource};
use storyhelm_steering::{ConsultationOrchestrator, ContextAssembler};
use storyhelm_stores::{StoryFile, StorySession};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Load config, failing with a readable message.
pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Load a story file into live stores.
pub fn load_story(path: &Path) -> Result<StorySession, Box<dyn std::error::Error>> {
    let story = StoryFile::load(path).map_err(|e| format!("Failed to load story: {e}"))?;
    Ok(story.into_session())
}

/// Write the session's stores back to the story file.
pub async fn save_story(session: &StorySession, path: &Path) -> CliResult {
    session
        .snapshot()
        .await
        .save(path)
        .map_err(|e| format!("Failed to save story: {e}"))?;
    Ok(())
}

/// An assembler over a loaded story.
pub fn assembler_for(session: &StorySession, config: &AppConfig) -> ContextAssembler {
    ContextAssembler::new(
        session.document.clone(),
        session.memory.clone(),
        session.authors_note.clone(),
        session.lorebook.clone(),
    )
    .with_max_story_chars(config.steering.max_story_chars)
}

/// Refuse to call a model without credentials.
pub fn require_api_key(config: &AppConfig) -> CliResult {
    if config.has_api_key() || !config.providers.is_empty() {
        return Ok(());
    }
    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    STORYHELM_API_KEY   = '...'   (generic)");
    eprintln!("    OPENROUTER_API_KEY  = 'sk-or-v1-...'");
    eprintln!("    OPENAI_API_KEY      = 'sk-...'");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    Err("No API key found. See above for setup instructions.".into())
}

/// Build a ready orchestrator for a story session.
///
/// Seeds the interval and adopts an instruction block left by an earlier
/// run so it is replaced rather than duplicated.
pub async fn orchestrator_for(
    config: &AppConfig,
    session: &StorySession,
) -> Result<Arc<ConsultationOrchestrator>, Box<dyn std::error::Error>> {
    let route = storyhelm_providers::build_from_config(config)
        .steering(config)
        .ok_or("No default provider configured")?;

    let orchestrator = ConsultationOrchestrator::new(
        route.provider,
        assembler_for(session, config),
        session.storage.clone(),
    )
    .with_config(&config.steering)
    .with_model(route.model);

    orchestrator.initialize().await;

    let sections = session.document.scan().await?;
    if let Some(existing) = sections
        .iter()
        .rev()
        .find(|s| s.section.source == SectionSource::Instruction)
    {
        tracing::debug!(section = %existing.id, "Adopting existing instruction");
        orchestrator.adopt_instruction(existing.id).await;
    }

    Ok(Arc::new(orchestrator))
}

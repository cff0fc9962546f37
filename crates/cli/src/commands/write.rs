//! `storyhelm write`: A writer model continues the story while the
//! steering loop nudges it every few paragraphs.

use std::path::Path;
use storyhelm_core::document::{DocumentStore, ScannedSection, Section, SectionSource};
use storyhelm_core::event::GenerationEnded;
use storyhelm_core::knowledge::TextStore;
use storyhelm_core::message::Message;
use storyhelm_core::provider::{Provider, ProviderRequest};
use storyhelm_providers::Route;
use storyhelm_steering::ConsultOutcome;
use storyhelm_stores::StorySession;
use tracing::{info, warn};

pub async fn run(story: &Path, generations: u32) -> super::CliResult {
    let config = super::load_config()?;
    super::require_api_key(&config)?;

    let session = super::load_story(story)?;
    let orchestrator = super::orchestrator_for(&config, &session).await?;

    let Route {
        provider: writer,
        model: writer_model,
    } = storyhelm_providers::build_from_config(&config)
        .writer(&config)
        .ok_or("No default provider configured")?;

    info!(
        writer = %writer_model,
        steering = %orchestrator.settings().model,
        generations,
        "Writing"
    );

    for generation in 1..=generations {
        let request = ProviderRequest {
            model: writer_model.clone(),
            messages: writer_messages(&session, &config.writer.system_prompt).await,
            temperature: config.writer.temperature,
            max_tokens: Some(config.writer.max_tokens),
            enable_thinking: false,
        };

        let response = tokio::select! {
            response = writer.complete(request, None) => response?,
            _ = tokio::signal::ctrl_c() => {
                orchestrator.cancel();
                println!("\nInterrupted.");
                break;
            }
        };

        let text = response
            .first_output()
            .unwrap_or_default()
            .trim()
            .to_string();
        if text.is_empty() {
            warn!(generation, "Writer returned nothing");
            continue;
        }

        session
            .document
            .push(Section::new(text.clone(), SectionSource::Ai))
            .await;
        println!("\n{text}");

        let event = GenerationEnded::new(writer_model.clone());
        match orchestrator.on_generation_end(&event).await {
            Some(ConsultOutcome::Issued(directive)) => println!("\n  📌 {directive}"),
            Some(ConsultOutcome::Failed(message)) => {
                eprintln!("\n  ⚠️  steering failed: {message}")
            }
            _ => {}
        }

        super::save_story(&session, story).await?;
    }

    Ok(())
}

/// Memory, author's note, and the story with editor instructions marked.
async fn writer_messages(session: &StorySession, system_prompt: &str) -> Vec<Message> {
    let memory = session.memory.get().await.unwrap_or_default();
    let note = session.authors_note.get().await.unwrap_or_default();
    let sections = session.document.scan().await.unwrap_or_default();

    let mut prompt = String::new();
    if !memory.trim().is_empty() {
        prompt.push_str(&format!("[Memory]\n{memory}\n\n"));
    }
    if !note.trim().is_empty() {
        prompt.push_str(&format!("[Author's Note]\n{note}\n\n"));
    }
    prompt.push_str(&render_story(&sections));

    vec![Message::system(system_prompt), Message::user(prompt)]
}

fn render_story(sections: &[ScannedSection]) -> String {
    sections
        .iter()
        .map(|s| match s.section.source {
            SectionSource::Instruction => format!("[ Editor: {} ]", s.section.text),
            _ => s.section.text.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

//! `storyhelm consult`: One consultation, saved into the story file.

use std::path::Path;
use storyhelm_steering::ConsultOutcome;

pub async fn run(story: &Path) -> super::CliResult {
    let config = super::load_config()?;
    super::require_api_key(&config)?;

    let session = super::load_story(story)?;
    let orchestrator = super::orchestrator_for(&config, &session).await?;

    let outcome = tokio::select! {
        outcome = orchestrator.consult() => outcome,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.cancel();
            ConsultOutcome::Cancelled
        }
    };

    match outcome {
        ConsultOutcome::Issued(directive) => {
            super::save_story(&session, story).await?;
            println!("📌 {directive}");
        }
        ConsultOutcome::Skipped(reason) => println!("Skipped: {reason}"),
        ConsultOutcome::Cancelled => println!("Cancelled."),
        ConsultOutcome::Failed(message) => return Err(message.into()),
    }

    Ok(())
}

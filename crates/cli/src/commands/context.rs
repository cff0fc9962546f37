//! `storyhelm context`: Show what the steering model would see.

use std::path::Path;

pub async fn run(story: &Path) -> super::CliResult {
    let config = super::load_config()?;
    let session = super::load_story(story)?;

    let assembled = super::assembler_for(&session, &config)
        .assemble_detailed()
        .await;

    if assembled.text.trim().is_empty() {
        eprintln!("(empty context: a consultation would be skipped)");
        return Ok(());
    }

    println!("{}", assembled.text);

    let meta = &assembled.metadata;
    eprintln!();
    eprintln!("  memory:        {}", if meta.memory_included { "yes" } else { "no" });
    eprintln!("  lore entries:  {}", meta.active_lore_entries);
    eprintln!("  author's note: {}", if meta.authors_note_included { "yes" } else { "no" });
    eprintln!(
        "  story:         {} chars{}",
        meta.story_chars,
        if meta.story_truncated { " (truncated)" } else { "" }
    );

    Ok(())
}

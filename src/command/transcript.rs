use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::conversation::{segment, ConversationMessage, ResolutionLedger};

pub async fn run_transcript(file: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mut messages: Vec<ConversationMessage> =
        serde_json::from_str(&raw).context("Transcript is not valid JSON")?;

    let segments = segment(&mut messages);
    let ledger = ResolutionLedger::new();

    println!(
        "{} topic segment(s) over {} message(s)",
        segments.len(),
        messages.len()
    );
    for seg in &segments {
        let features = if seg.features.is_empty() {
            "-".to_string()
        } else {
            seg.features.join(", ")
        };
        println!(
            "   [{:>3}..{:<3}] {:<10} {}{}",
            seg.start,
            seg.end,
            seg.domain.as_str(),
            features,
            if seg.is_resolved(&messages, &ledger) {
                " (resolved)"
            } else {
                ""
            }
        );
    }

    Ok(())
}

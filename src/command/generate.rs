use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{debug, error, info};

use crate::api::ChatExchange;
use crate::context::ContextStore;
use crate::conversation::{filter_relevant, ConversationMessage, ResolutionLedger, Role};
use crate::generation::{
    BillingStatus, CancelHandle, GenerationProcessor, LedgerBilling, ProcessorEvent,
    SubmitOptions,
};
use crate::impact::analyze;
use crate::progress::{ConsoleBroadcaster, PhaseTracker};

/// Prior turns scoring below this are dropped from the request context.
const MIN_RELEVANCE: f32 = 0.3;

pub async fn run_generate(
    instruction: String,
    transcript: Option<PathBuf>,
    project: Option<String>,
    model: Option<String>,
    previous_dir: Option<PathBuf>,
) -> Result<()> {
    let store = Arc::new(ContextStore::new(None)?);
    let Some(ctx) = store.get_context()? else {
        bail!("No AppForge context configured. Run 'appforge status' for details.");
    };

    let history = build_history(&instruction, transcript)?;

    let billing = Arc::new(LedgerBilling::new(
        ctx.api_url.clone(),
        ctx.access_token.clone(),
    ));
    let mut processor = GenerationProcessor::new(
        ctx.api_url.clone(),
        ctx.access_token.clone(),
        billing,
        store.clone(),
    );

    let broadcaster = Arc::new(ConsoleBroadcaster::new());
    let mut tracker = PhaseTracker::new(broadcaster, "appforge-cli");
    if let Some(name) = &project {
        tracker.set_app_name(name.clone());
    }

    let cancel = CancelHandle::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let opts = SubmitOptions {
        model,
        project_id: project.or_else(|| ctx.project_id.clone()),
    };

    let result = processor
        .submit(&instruction, history, opts, cancel, |event| match event {
            ProcessorEvent::Connected => info!("Stream connected"),
            ProcessorEvent::Delta(chunk) => {
                print!("{chunk}");
                let _ = std::io::stdout().flush();
            }
            ProcessorEvent::FileStates(states) => {
                tracker.update(&states);
            }
            ProcessorEvent::Progress { percent, message } => {
                debug!(?percent, ?message, "Progress event");
            }
            ProcessorEvent::ToolActivity(tool) => debug!(%tool, "Tool activity"),
            ProcessorEvent::Completed => println!(),
            ProcessorEvent::Failed(reason) => error!(%reason, "Generation failed"),
            ProcessorEvent::CancelledByUser => eprintln!("\nCancelled."),
        })
        .await;

    let result = match result {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => {
            eprintln!("Generation cancelled; partial output discarded.");
            return Ok(());
        }
        Err(err) => return Err(err).context("Generation stream failed"),
    };

    println!("\nModel: {}", result.model);
    println!("Files generated: {}", result.files.len());
    match &result.billing {
        BillingStatus::Deducted {
            units,
            remaining_balance,
        } => {
            println!(
                "Billing: {} unit(s) deducted{}",
                units.unwrap_or(0),
                remaining_balance
                    .map(|b| format!(", {:.2} remaining", b))
                    .unwrap_or_default()
            );
        }
        BillingStatus::Skipped(reason) => {
            info!(%reason, "Billing skipped");
        }
        BillingStatus::Failed(reason) => {
            eprintln!("⚠️  Billing failed (generation result kept): {}", reason);
        }
    }

    if let Some(previous) = previous_dir {
        let old_files = super::load_files(&previous)?;
        let analysis = analyze(&old_files, &result.files);
        println!("Deployment strategy: {}", analysis.strategy.as_str());
    }

    Ok(())
}

/// Load the prior transcript, keep the turns relevant to this instruction,
/// and convert them to the wire exchange shape.
fn build_history(
    instruction: &str,
    transcript: Option<PathBuf>,
) -> Result<Vec<ChatExchange>> {
    let Some(path) = transcript else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut messages: Vec<ConversationMessage> =
        serde_json::from_str(&raw).context("Transcript is not valid JSON")?;

    let current = ConversationMessage::new(Role::User, instruction);
    let ledger = ResolutionLedger::new();
    let kept = filter_relevant(&mut messages, &current, MIN_RELEVANCE, &ledger, Utc::now());
    info!(
        total = messages.len(),
        kept = kept.len(),
        "Filtered prior transcript"
    );

    Ok(kept
        .into_iter()
        .map(|m| ChatExchange {
            role: Some(
                match m.role {
                    Role::User => "user",
                    Role::System => "system",
                }
                .to_string(),
            ),
            content: Some(m.content),
        })
        .collect())
}

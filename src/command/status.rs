use anyhow::Result;

use crate::context::ContextStore;

pub async fn run_status() -> Result<()> {
    let store = ContextStore::new(None)?;

    match store.get_context()? {
        Some(ctx) => {
            println!("✅ AppForge context configured");
            println!("   API URL: {}", ctx.api_url);
            println!(
                "   Billing: {}",
                if ctx.account_id.is_some() && ctx.identity.is_some() && ctx.project_id.is_some() {
                    "ready (usage will be deducted)"
                } else {
                    "not configured (deduction will be skipped)"
                }
            );
            if let Some(project) = &ctx.project_id {
                println!("   Project: {}", project);
            }
        }
        None => {
            println!("❌ No AppForge context found");
            println!("   Set APPFORGE_API_URL and APPFORGE_API_TOKEN,");
            println!(
                "   or write {}",
                store.context_path().display()
            );
        }
    }

    Ok(())
}

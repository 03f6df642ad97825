use anyhow::Result;

use crate::context::{ContextData, ContextStore};

pub async fn run_configure(
    api_url: String,
    access_token: String,
    account: Option<String>,
    identity: Option<String>,
    project: Option<String>,
) -> Result<()> {
    let store = ContextStore::new(None)?;

    let billable = account.is_some() && identity.is_some() && project.is_some();
    store.save_context(&ContextData {
        api_url,
        access_token,
        account_id: account,
        identity,
        project_id: project,
    })?;

    println!("✅ Context saved to {}", store.context_path().display());
    if !billable {
        println!("   Billing fields incomplete; usage deduction will be skipped.");
    }

    Ok(())
}

//! Credential and billing-context storage.
//!
//! The streaming processor needs two things from its environment: API
//! credentials (backend URL + access token) to open a generation stream,
//! and a billing context (account, identity, project) to deduct usage.
//! Deduction is skipped, not failed, when the billing context is
//! incomplete.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Identity of the paying account for one project.
///
/// All three fields must be present for a deduction to be attempted;
/// a missing field means "not billable in this environment".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingContext {
    pub account_id: String,
    pub identity: String,
    pub project_id: String,
}

/// Source of billing context, narrow so the processor can be tested with
/// a fixed context instead of reading the environment.
pub trait ContextPort: Send + Sync {
    /// Current billing context, or `None` when any field is absent.
    fn billing_context(&self) -> Option<BillingContext>;
}

/// Context data structure stored in context.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextData {
    pub api_url: String,
    pub access_token: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Context store backed by environment variables and ~/.appforge/context.json.
///
/// Priority:
/// 1. `APPFORGE_CONTEXT` environment variable (JSON format)
/// 2. Individual environment variables (`APPFORGE_API_URL`,
///    `APPFORGE_API_TOKEN`, plus optional `APPFORGE_ACCOUNT_ID`,
///    `APPFORGE_IDENTITY`, `APPFORGE_PROJECT_ID`)
/// 3. context.json file
pub struct ContextStore {
    context_path: PathBuf,
}

impl ContextStore {
    /// Create a new context store.
    ///
    /// # Arguments
    /// * `cache_dir` - Optional custom cache directory. Defaults to ~/.appforge
    pub fn new(cache_dir: Option<String>) -> Result<Self> {
        let base_dir = match cache_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".appforge"),
        };

        std::fs::create_dir_all(&base_dir)
            .with_context(|| format!("Failed to create cache directory: {:?}", base_dir))?;

        Ok(Self {
            context_path: base_dir.join("context.json"),
        })
    }

    /// Get the context file path
    pub fn context_path(&self) -> &PathBuf {
        &self.context_path
    }

    fn parse_context_from_string(&self, raw: &str) -> Option<ContextData> {
        match serde_json::from_str::<ContextData>(raw) {
            Ok(ctx) => {
                if ctx.api_url.is_empty() || ctx.access_token.is_empty() {
                    warn!("Context validation failed: missing apiUrl or accessToken");
                    return None;
                }
                Some(ctx)
            }
            Err(e) => {
                warn!("Failed to parse context JSON: {}", e);
                None
            }
        }
    }

    /// Get the current context, checking env vars first, then the file.
    pub fn get_context(&self) -> Result<Option<ContextData>> {
        if let Ok(env_ctx) = std::env::var("APPFORGE_CONTEXT") {
            if let Some(ctx) = self.parse_context_from_string(&env_ctx) {
                info!("Using context from APPFORGE_CONTEXT environment variable");
                return Ok(Some(ctx));
            }
        }

        if let (Ok(url), Ok(token)) = (
            std::env::var("APPFORGE_API_URL"),
            std::env::var("APPFORGE_API_TOKEN"),
        ) {
            if !url.is_empty() && !token.is_empty() {
                return Ok(Some(ContextData {
                    api_url: url,
                    access_token: token,
                    account_id: std::env::var("APPFORGE_ACCOUNT_ID").ok(),
                    identity: std::env::var("APPFORGE_IDENTITY").ok(),
                    project_id: std::env::var("APPFORGE_PROJECT_ID").ok(),
                }));
            }
        }

        if !self.context_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.context_path)
            .with_context(|| format!("Failed to read context file: {:?}", self.context_path))?;

        if let Some(ctx) = self.parse_context_from_string(&content) {
            return Ok(Some(ctx));
        }

        warn!("Invalid context data found in {:?}", self.context_path);
        Ok(None)
    }

    /// Save context data to the context file.
    pub fn save_context(&self, ctx: &ContextData) -> Result<()> {
        let content =
            serde_json::to_string_pretty(ctx).context("Failed to serialize context data")?;

        std::fs::write(&self.context_path, content)
            .with_context(|| format!("Failed to write context file: {:?}", self.context_path))?;

        debug!("Context saved to {:?}", self.context_path);
        Ok(())
    }
}

impl ContextPort for ContextStore {
    fn billing_context(&self) -> Option<BillingContext> {
        let ctx = self.get_context().ok().flatten()?;
        match (ctx.account_id, ctx.identity, ctx.project_id) {
            (Some(account_id), Some(identity), Some(project_id))
                if !account_id.is_empty() && !identity.is_empty() && !project_id.is_empty() =>
            {
                Some(BillingContext {
                    account_id,
                    identity,
                    project_id,
                })
            }
            _ => {
                debug!("Billing context incomplete; deduction will be skipped");
                None
            }
        }
    }
}

/// Fixed billing context, for wiring tests and non-interactive callers.
pub struct StaticContext(pub Option<BillingContext>);

impl ContextPort for StaticContext {
    fn billing_context(&self) -> Option<BillingContext> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Helper to temporarily clear context environment variables for testing
    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    const CONTEXT_VARS: &[&str] = &[
        "APPFORGE_CONTEXT",
        "APPFORGE_API_URL",
        "APPFORGE_API_TOKEN",
        "APPFORGE_ACCOUNT_ID",
        "APPFORGE_IDENTITY",
        "APPFORGE_PROJECT_ID",
    ];

    impl EnvGuard {
        fn new() -> Self {
            let saved = CONTEXT_VARS
                .iter()
                .map(|name| (*name, std::env::var(name).ok()))
                .collect();
            for name in CONTEXT_VARS {
                std::env::remove_var(name);
            }
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => std::env::set_var(name, v),
                    None => std::env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_context_save_and_load() {
        let _guard = EnvGuard::new();
        let tmp = tempdir().unwrap();
        let store = ContextStore::new(Some(tmp.path().to_string_lossy().to_string())).unwrap();

        assert!(store.get_context().unwrap().is_none());

        store
            .save_context(&ContextData {
                api_url: "https://backend.example.com".into(),
                access_token: "tok".into(),
                account_id: Some("acct-1".into()),
                identity: Some("ident-1".into()),
                project_id: Some("proj-1".into()),
            })
            .unwrap();

        let ctx = store.get_context().unwrap().unwrap();
        assert_eq!(ctx.api_url, "https://backend.example.com");
        assert_eq!(ctx.project_id.as_deref(), Some("proj-1"));
    }

    #[test]
    fn test_billing_context_requires_all_fields() {
        let _guard = EnvGuard::new();
        let tmp = tempdir().unwrap();
        let store = ContextStore::new(Some(tmp.path().to_string_lossy().to_string())).unwrap();

        store
            .save_context(&ContextData {
                api_url: "https://backend.example.com".into(),
                access_token: "tok".into(),
                account_id: Some("acct-1".into()),
                identity: None,
                project_id: Some("proj-1".into()),
            })
            .unwrap();

        assert!(store.billing_context().is_none());
    }

    #[test]
    fn test_static_context() {
        let ctx = StaticContext(Some(BillingContext {
            account_id: "a".into(),
            identity: "i".into(),
            project_id: "p".into(),
        }));
        assert_eq!(ctx.billing_context().unwrap().account_id, "a");
        assert!(StaticContext(None).billing_context().is_none());
    }
}

//! Billing collaborator and the idempotent deduction guard.
//!
//! Usage deduction may be attempted at up to three points per session
//! (the `complete` event, the terminal sentinel, and natural stream end)
//! but must execute its side effect at most once. The guard keys each
//! attempt by a hash of (account, project, total tokens, model,
//! timestamp bucket): a key is inserted before the deduction call and
//! released if the call fails, so a later attempt within the same session
//! may retry without ever double-billing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::debug;

use crate::api::types::DeductRequest;
use crate::api::{ApiClient, DeductResponse, TokenUsage};
use crate::context::BillingContext;

/// Outcome of one deduction attempt. Billing failure is never fatal:
/// the generation result is delivered to the caller regardless.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingStatus {
    /// No attempt was made (missing usage or billing context).
    Skipped(String),
    /// The billing collaborator confirmed the deduction.
    Deducted {
        units: Option<u64>,
        remaining_balance: Option<f64>,
    },
    /// The attempt failed; the guard key was released for a later retry.
    Failed(String),
}

impl BillingStatus {
    pub fn is_deducted(&self) -> bool {
        matches!(self, BillingStatus::Deducted { .. })
    }
}

/// Narrow interface to the billing collaborator.
#[async_trait]
pub trait BillingPort: Send + Sync {
    async fn deduct(
        &self,
        ctx: &BillingContext,
        usage: TokenUsage,
        model: &str,
        operation: &str,
    ) -> DeductResponse;
}

/// HTTP-backed billing collaborator (ledger/deduct endpoint).
pub struct LedgerBilling {
    api: ApiClient,
    base_url: String,
    access_token: String,
}

impl LedgerBilling {
    pub fn new(base_url: String, access_token: String) -> Self {
        Self {
            api: ApiClient::new(None),
            base_url,
            access_token,
        }
    }
}

#[async_trait]
impl BillingPort for LedgerBilling {
    async fn deduct(
        &self,
        ctx: &BillingContext,
        usage: TokenUsage,
        model: &str,
        operation: &str,
    ) -> DeductResponse {
        let body = DeductRequest {
            account_id: ctx.account_id.clone(),
            identity: ctx.identity.clone(),
            project_id: ctx.project_id.clone(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            model: model.to_string(),
            operation: operation.to_string(),
        };

        match self
            .api
            .call_api::<_, DeductResponse>(
                "ledger/deduct",
                &self.base_url,
                Some(&self.access_token),
                &body,
            )
            .await
        {
            Ok(response) => response,
            // Transport failures become a failed (retryable) outcome.
            Err(e) => DeductResponse {
                success: false,
                units_deducted: None,
                dollar_cost: None,
                remaining_balance: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Processed-set preventing duplicate deductions within a session.
#[derive(Debug, Default)]
pub struct DeductionGuard {
    processed: HashSet<String>,
}

impl DeductionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the deduction key for one attempt. Timestamps are bucketed
    /// to the minute so the three attempt points of a single session
    /// produce the same key.
    pub fn key(
        ctx: &BillingContext,
        total_tokens: u64,
        model: &str,
        at: DateTime<Utc>,
    ) -> String {
        let bucket = at.timestamp() / 60;
        let mut hasher = Sha256::new();
        hasher.update(ctx.account_id.as_bytes());
        hasher.update(b"|");
        hasher.update(ctx.project_id.as_bytes());
        hasher.update(b"|");
        hasher.update(total_tokens.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(model.as_bytes());
        hasher.update(b"|");
        hasher.update(bucket.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Mark a key as in flight. Returns false if the key was already
    /// processed, in which case the caller must not deduct again.
    pub fn begin(&mut self, key: &str) -> bool {
        let inserted = self.processed.insert(key.to_string());
        if !inserted {
            debug!("Deduction key already processed, skipping");
        }
        inserted
    }

    /// Release a key after a failed deduction so a later attempt in the
    /// same session may retry.
    pub fn release(&mut self, key: &str) {
        self.processed.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> BillingContext {
        BillingContext {
            account_id: "acct-1".into(),
            identity: "ident-1".into(),
            project_id: "proj-1".into(),
        }
    }

    #[test]
    fn test_key_is_stable_within_a_minute_bucket() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 5).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 55).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 1, 5).unwrap();

        let a = DeductionGuard::key(&ctx(), 1000, "forge-1", t0);
        let b = DeductionGuard::key(&ctx(), 1000, "forge-1", t1);
        let c = DeductionGuard::key(&ctx(), 1000, "forge-1", t2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_varies_by_tuple() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let base = DeductionGuard::key(&ctx(), 1000, "forge-1", t);
        assert_ne!(base, DeductionGuard::key(&ctx(), 1001, "forge-1", t));
        assert_ne!(base, DeductionGuard::key(&ctx(), 1000, "forge-2", t));

        let other = BillingContext {
            project_id: "proj-2".into(),
            ..ctx()
        };
        assert_ne!(base, DeductionGuard::key(&other, 1000, "forge-1", t));
    }

    #[test]
    fn test_begin_then_release_allows_retry() {
        let mut guard = DeductionGuard::new();
        assert!(guard.begin("k1"));
        assert!(!guard.begin("k1"));
        guard.release("k1");
        assert!(guard.begin("k1"));
    }
}

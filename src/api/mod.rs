//! HTTP client for the generation backend.
//!
//! This module provides the transport the streaming session processor and
//! the billing collaborator run on: a shared reqwest client with per-run
//! session id, request ids, and retrying POST helpers.

mod http;
pub mod types;

pub use types::{ChatExchange, DeductResponse, SessionMeta, StreamEvent, TokenUsage};

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

use http::send_with_retry;

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Timeout for generation streams (10 minutes; covers the whole body)
const STREAM_TIMEOUT_SECS: u64 = 600;

/// Default CLI version (from Cargo.toml)
const DEFAULT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build the User-Agent string
fn build_user_agent() -> String {
    let version = std::env::var("APPFORGE_VERSION").unwrap_or_else(|_| DEFAULT_VERSION.to_string());
    std::env::var("APPFORGE_USER_AGENT").unwrap_or_else(|_| format!("appforge.cli/{}", version))
}

/// API client for the generation backend
pub struct ApiClient {
    client: Client,
    user_agent: String,
    session_id: String,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(user_agent: Option<String>) -> Self {
        let user_agent = user_agent.unwrap_or_else(build_user_agent);
        let session_id = Uuid::new_v4().to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            user_agent,
            session_id,
        }
    }

    /// Session id shared by every request from this client
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn build_url(base_url: &str, endpoint: &str) -> Result<Url> {
        let base =
            Url::parse(base_url).with_context(|| format!("Invalid base URL: {}", base_url))?;
        base.join(endpoint)
            .with_context(|| format!("Failed to build URL for endpoint: {}", endpoint))
    }

    /// Open the long-lived generation stream.
    ///
    /// Returns the raw response; the caller owns the read loop. The body
    /// is newline-delimited records (see [`types::StreamEvent`]).
    pub(crate) async fn open_stream<T>(
        &self,
        base_url: &str,
        access_token: &str,
        body: &T,
    ) -> Result<reqwest::Response>
    where
        T: Serialize,
    {
        let url = Self::build_url(base_url, "generate-stream")?;
        let request_id = Uuid::new_v4().to_string();

        debug!("=== Generation Stream Request ===");
        debug!("URL: {}", url);
        debug!("Timeout: {}s", STREAM_TIMEOUT_SECS);

        let client = Client::builder()
            .timeout(Duration::from_secs(STREAM_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        let response = send_with_retry(|| {
            client
                .post(url.clone())
                .header("Content-Type", "application/json")
                .header("User-Agent", &self.user_agent)
                .header("x-request-id", &request_id)
                .header("x-request-session-id", &self.session_id)
                .header("Authorization", format!("Bearer {}", access_token))
                .json(body)
        })
        .await
        .with_context(|| format!("Failed to send request to {}", url))?;

        Ok(response)
    }

    /// Make an authenticated API request with the default timeout
    pub(crate) async fn call_api<T, R>(
        &self,
        endpoint: &str,
        base_url: &str,
        access_token: Option<&str>,
        body: &T,
    ) -> Result<R>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let url = Self::build_url(base_url, endpoint)?;
        let request_id = Uuid::new_v4().to_string();

        debug!("=== API Request ===");
        debug!("URL: {}", url);

        let response = send_with_retry(|| {
            let mut request = self
                .client
                .post(url.clone())
                .header("Content-Type", "application/json")
                .header("User-Agent", &self.user_agent)
                .header("x-request-id", &request_id)
                .header("x-request-session-id", &self.session_id);

            if let Some(token) = access_token {
                request = request.header("Authorization", format!("Bearer {}", token));
            }

            request.json(body)
        })
        .await
        .with_context(|| format!("Failed to send request to {}", url))?;

        let status = response.status();
        debug!("=== API Response ===");
        debug!("Status: {}", status);

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("API request failed with status {}: {}", status, error_text);
            anyhow::bail!("API request failed with status {}: {}", status, error_text);
        }

        let response_text = response
            .text()
            .await
            .context("Failed to read response body")?;
        serde_json::from_str(&response_text).context("Failed to parse API response")
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new(None)
    }
}

//! Conversation domain classification and transcript filtering.
//!
//! Chat transcripts grow without bound; only the turns topically related to
//! the current instruction should ride along on the next generation request.
//! This module scores messages by domain and feature, filters out resolved
//! or stale turns, and splits transcripts into topic segments.
//!
//! A message's classification is immutable once computed. Resolution state
//! changes later (the deploy coordinator marks auto-retry turns resolved),
//! so it lives in a separate [`ResolutionLedger`] keyed by message id and is
//! re-read on every query instead of being snapshotted into the context.

mod classifier;
mod segment;

pub use classifier::{classify, filter_relevant, relevance, should_exclude, AUTO_RETRY_MARKER};
pub use segment::{segment, ConversationSegment};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    System,
}

/// Topical domain of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Domain {
    Frontend,
    Backend,
    Deployment,
    General,
    AutoRetry,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Frontend => "frontend",
            Domain::Backend => "backend",
            Domain::Deployment => "deployment",
            Domain::General => "general",
            Domain::AutoRetry => "auto-retry",
        }
    }
}

/// Failure sub-classification for auto-retry announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Compilation,
    Bundling,
    Deployment,
    Network,
    Unknown,
}

/// Immutable classification of one message, computed once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainContext {
    pub domain: Domain,
    pub confidence: f32,
    /// Vocabulary words that matched during scoring.
    pub keywords: Vec<String>,
    /// Feature nouns plus component names inferred from file references.
    pub features: Vec<String>,
    pub error_category: Option<ErrorCategory>,
}

/// One transcript turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Cached classification; filled on first use and never recomputed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_context: Option<DomainContext>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            domain_context: None,
        }
    }
}

/// Resolution state of one message, toggled by the deploy coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Resolution {
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Mutable resolution state, kept apart from the immutable classifications
/// so a toggle never invalidates cached contexts.
#[derive(Debug, Default)]
pub struct ResolutionLedger {
    statuses: HashMap<String, Resolution>,
}

impl ResolutionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_resolved(&mut self, message_id: &str, at: DateTime<Utc>) {
        self.statuses.insert(
            message_id.to_string(),
            Resolution {
                resolved: true,
                resolved_at: Some(at),
            },
        );
    }

    /// Unknown ids are unresolved.
    pub fn status(&self, message_id: &str) -> Resolution {
        self.statuses.get(message_id).copied().unwrap_or_default()
    }
}

//! Message classification and relevance scoring.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use super::{
    ConversationMessage, Domain, DomainContext, ErrorCategory, Resolution, ResolutionLedger,
};

/// Prefix the auto-retry coordinator puts on its announcements.
pub const AUTO_RETRY_MARKER: &str = "Automatically fixing";

/// Below this length one keyword match is enough; longer messages need two.
const SHORT_MESSAGE_CHARS: usize = 50;

/// Resolved auto-retry turns decay to near-zero relevance after this long.
const AUTO_RETRY_DECAY: Duration = Duration::from_secs(2 * 60);
/// Resolved auto-retry turns drop out of context entirely after this long.
const AUTO_RETRY_EXPIRY: Duration = Duration::from_secs(10 * 60);

const BACKEND_KEYWORDS: &[&str] = &[
    "backend", "api", "endpoint", "database", "storage", "canister", "motoko", "auth", "server",
];

const FRONTEND_KEYWORDS: &[&str] = &[
    "frontend", "ui", "button", "page", "layout", "component", "screen", "style", "color", "font",
];

const DEPLOYMENT_KEYWORDS: &[&str] = &["deploy", "build", "publish", "preview", "redeploy"];

const FEATURE_NOUNS: &[&str] = &[
    "calendar", "chart", "form", "table", "list", "login", "profile", "dashboard", "settings",
    "search", "cart", "checkout", "chat", "map", "gallery", "todo", "task",
];

/// Generic suffixes stripped when inferring a feature from a component name.
const COMPONENT_SUFFIXES: &[&str] = &["view", "component", "page", "screen"];

fn backend_file_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\w./-]+\.mo\b").unwrap())
}

fn frontend_file_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\w./-]+\.(?:tsx|jsx|ts|js|css|html|vue|svelte)\b").unwrap())
}

/// Classify one message. A cached context is returned as-is.
pub fn classify(message: &ConversationMessage) -> DomainContext {
    if let Some(ctx) = &message.domain_context {
        return ctx.clone();
    }
    classify_content(&message.content)
}

fn classify_content(content: &str) -> DomainContext {
    if content.contains(AUTO_RETRY_MARKER) {
        return classify_auto_retry(content);
    }

    let features = extract_features(content);

    // File references beat keyword evidence, backend references beat
    // frontend ones.
    if backend_file_pattern().is_match(content) {
        return DomainContext {
            domain: Domain::Backend,
            confidence: 0.9,
            keywords: Vec::new(),
            features,
            error_category: None,
        };
    }
    if frontend_file_pattern().is_match(content) {
        return DomainContext {
            domain: Domain::Frontend,
            confidence: 0.9,
            keywords: Vec::new(),
            features,
            error_category: None,
        };
    }

    let lower = content.to_lowercase();
    let required = if content.chars().count() < SHORT_MESSAGE_CHARS {
        1
    } else {
        2
    };

    for (domain, vocabulary) in [
        (Domain::Backend, BACKEND_KEYWORDS),
        (Domain::Frontend, FRONTEND_KEYWORDS),
        (Domain::Deployment, DEPLOYMENT_KEYWORDS),
    ] {
        let matched: Vec<String> = vocabulary
            .iter()
            .filter(|kw| contains_word(&lower, kw))
            .map(|kw| kw.to_string())
            .collect();
        if matched.len() >= required {
            let confidence = (0.7 + 0.1 * matched.len() as f32).min(0.95);
            debug!(domain = domain.as_str(), matches = matched.len(), "Keyword classification");
            return DomainContext {
                domain,
                confidence,
                keywords: matched,
                features,
                error_category: None,
            };
        }
    }

    DomainContext {
        domain: Domain::General,
        confidence: 0.3,
        keywords: Vec::new(),
        features,
        error_category: None,
    }
}

fn classify_auto_retry(content: &str) -> DomainContext {
    let lower = content.to_lowercase();
    let error_category = if ["compile", "type error", "syntax"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        ErrorCategory::Compilation
    } else if ["bundle", "vite", "import"].iter().any(|kw| lower.contains(kw)) {
        ErrorCategory::Bundling
    } else if ["deploy", "canister", "install"].iter().any(|kw| lower.contains(kw)) {
        ErrorCategory::Deployment
    } else if ["network", "fetch", "timeout"].iter().any(|kw| lower.contains(kw)) {
        ErrorCategory::Network
    } else {
        ErrorCategory::Unknown
    };

    DomainContext {
        domain: Domain::AutoRetry,
        confidence: 0.95,
        keywords: Vec::new(),
        features: Vec::new(),
        error_category: Some(error_category),
    }
}

/// Whole-word containment; substrings like "apply" must not match "api".
fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| token == word)
}

/// Feature nouns from the vocabulary plus component names inferred from
/// referenced file basenames.
fn extract_features(content: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    let mut features: Vec<String> = FEATURE_NOUNS
        .iter()
        .filter(|noun| contains_word(&lower, noun))
        .map(|noun| noun.to_string())
        .collect();

    for pattern in [backend_file_pattern(), frontend_file_pattern()] {
        for m in pattern.find_iter(content) {
            if let Some(name) = component_feature(m.as_str()) {
                if !features.contains(&name) {
                    features.push(name);
                }
            }
        }
    }

    features
}

/// "src/BillsView.tsx" -> "bills".
fn component_feature(path: &str) -> Option<String> {
    let basename = path.rsplit('/').next()?;
    let stem = basename.split('.').next()?;
    let mut name = stem.to_lowercase();
    for suffix in COMPONENT_SUFFIXES {
        if let Some(trimmed) = name.strip_suffix(suffix) {
            name = trimmed.to_string();
            break;
        }
    }
    let name = name.trim_matches(|c: char| !c.is_alphanumeric()).to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Score how relevant a prior turn is to the current instruction.
pub fn relevance(
    candidate: &DomainContext,
    candidate_resolution: Resolution,
    current: &DomainContext,
    now: DateTime<Utc>,
) -> f32 {
    if candidate.domain == Domain::AutoRetry && candidate_resolution.resolved {
        if let Some(at) = candidate_resolution.resolved_at {
            if now.signed_duration_since(at).to_std().unwrap_or_default() > AUTO_RETRY_DECAY {
                return 0.05;
            }
        }
    }

    if candidate.domain == current.domain && candidate.domain != Domain::General {
        return (0.85 + keyword_jaccard(candidate, current) * 0.1).min(0.95);
    }

    match (candidate.domain, current.domain) {
        (Domain::Frontend, Domain::Backend) | (Domain::Backend, Domain::Frontend) => 0.15,
        (Domain::Deployment, Domain::Frontend | Domain::Backend)
        | (Domain::Frontend | Domain::Backend, Domain::Deployment) => 0.4,
        _ => {
            if candidate.keywords.is_empty() && candidate.features.is_empty()
                || current.keywords.is_empty() && current.features.is_empty()
            {
                0.2
            } else {
                0.3 + term_jaccard(candidate, current) * 0.5
            }
        }
    }
}

fn keyword_jaccard(a: &DomainContext, b: &DomainContext) -> f32 {
    jaccard(
        a.keywords.iter().map(String::as_str),
        b.keywords.iter().map(String::as_str),
    )
}

/// Keywords and features together, for the cross-domain overlap score.
fn term_jaccard(a: &DomainContext, b: &DomainContext) -> f32 {
    jaccard(
        a.keywords.iter().chain(a.features.iter()).map(String::as_str),
        b.keywords.iter().chain(b.features.iter()).map(String::as_str),
    )
}

fn jaccard<'a>(
    a: impl Iterator<Item = &'a str>,
    b: impl Iterator<Item = &'a str>,
) -> f32 {
    let a: HashSet<&str> = a.collect();
    let b: HashSet<&str> = b.collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f32 / union as f32
}

/// Whether a prior turn should be dropped from future context entirely.
///
/// Resolved turns are dropped immediately, except auto-retry turns, which
/// stay visible (at decayed relevance) until ten minutes past resolution so
/// the retry loop can still see what it already tried.
pub fn should_exclude(
    context: &DomainContext,
    resolution: Resolution,
    now: DateTime<Utc>,
) -> bool {
    if !resolution.resolved {
        return false;
    }
    if context.domain == Domain::AutoRetry {
        return match resolution.resolved_at {
            Some(at) => {
                now.signed_duration_since(at).to_std().unwrap_or_default() > AUTO_RETRY_EXPIRY
            }
            None => false,
        };
    }
    true
}

/// Select the prior turns worth sending with the current instruction,
/// preserving transcript order. Classifications are computed on demand and
/// cached onto the messages.
pub fn filter_relevant(
    messages: &mut [ConversationMessage],
    current: &ConversationMessage,
    min_relevance: f32,
    ledger: &ResolutionLedger,
    now: DateTime<Utc>,
) -> Vec<ConversationMessage> {
    let current_ctx = classify(current);

    let mut kept = Vec::new();
    for message in messages.iter_mut() {
        if message.domain_context.is_none() {
            message.domain_context = Some(classify_content(&message.content));
        }
        let ctx = message
            .domain_context
            .as_ref()
            .cloned()
            .unwrap_or_else(|| classify_content(&message.content));

        let resolution = ledger.status(&message.id);
        if should_exclude(&ctx, resolution, now) {
            continue;
        }
        if relevance(&ctx, resolution, &current_ctx, now) >= min_relevance {
            kept.push(message.clone());
        }
    }
    kept
}

//! Transcript segmentation by topic.

use tracing::debug;

use super::{classify, ConversationMessage, Domain, ResolutionLedger, Role};

/// Phrases that always close the current topic.
const CLOSURE_PHRASES: &[&str] = &[
    "moving on",
    "different issue",
    "new topic",
    "something else",
    "next thing",
    "let's switch",
    "forget that",
];

/// Markers that close the topic only without a back-reference to it.
const WEAK_MARKERS: &[&str] = &["also ", "now ", "okay "];

const GENERIC_PRONOUNS: &[&str] = &["it", "this", "that", "they", "them"];

/// A contiguous run of messages about one topic. Indexes are into the
/// message slice the segment was derived from; `end` is exclusive.
#[derive(Debug, Clone)]
pub struct ConversationSegment {
    pub start: usize,
    pub end: usize,
    pub domain: Domain,
    /// Union of member features, in first-seen order.
    pub features: Vec<String>,
}

impl ConversationSegment {
    pub fn primary_feature(&self) -> Option<&str> {
        self.features.first().map(String::as_str)
    }

    /// Resolution is queried live from the ledger, never cached, so a
    /// toggle after segmentation is visible without re-segmenting.
    pub fn is_resolved(
        &self,
        messages: &[ConversationMessage],
        ledger: &ResolutionLedger,
    ) -> bool {
        let members = &messages[self.start..self.end];
        !members.is_empty() && members.iter().all(|m| ledger.status(&m.id).resolved)
    }
}

/// Whether a user message explicitly or implicitly closes the current topic.
fn closes_topic(content: &str, previous_feature: Option<&str>) -> bool {
    let lower = content.to_lowercase();

    if CLOSURE_PHRASES.iter().any(|p| lower.contains(p)) {
        return true;
    }

    if !WEAK_MARKERS.iter().any(|m| lower.starts_with(m)) {
        return false;
    }

    // A weak marker with a back-reference continues the topic. Naming the
    // previous feature ("the calendar") counts as a back-reference too, but
    // is not a generic pronoun.
    if let Some(feature) = previous_feature {
        if lower.contains(feature) {
            return false;
        }
    }
    let has_pronoun = lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| GENERIC_PRONOUNS.contains(&token));
    !has_pronoun
}

/// Split a transcript into topic segments.
///
/// A new segment starts when the dominant domain changes (general messages
/// inherit the current segment's domain), the primary feature changes
/// (including gaining or losing one), or a user message closes the topic.
pub fn segment(messages: &mut [ConversationMessage]) -> Vec<ConversationSegment> {
    let mut segments: Vec<ConversationSegment> = Vec::new();

    for index in 0..messages.len() {
        if messages[index].domain_context.is_none() {
            let ctx = classify(&messages[index]);
            messages[index].domain_context = Some(ctx);
        }
        let ctx = messages[index]
            .domain_context
            .clone()
            .unwrap_or_else(|| classify(&messages[index]));

        let message_feature = ctx.features.first().cloned();

        let starts_new = match segments.last() {
            None => true,
            Some(current) => {
                let domain_changed =
                    ctx.domain != Domain::General && ctx.domain != current.domain;
                let feature_changed = match (&message_feature, current.primary_feature()) {
                    (Some(new), Some(old)) => new != old,
                    (Some(_), None) | (None, Some(_)) => true,
                    (None, None) => false,
                };
                let closed = messages[index].role == Role::User
                    && closes_topic(&messages[index].content, current.primary_feature());
                domain_changed || feature_changed || closed
            }
        };

        if starts_new {
            debug!(index, domain = ctx.domain.as_str(), "New conversation segment");
            segments.push(ConversationSegment {
                start: index,
                end: index + 1,
                domain: if ctx.domain == Domain::General {
                    segments
                        .last()
                        .map(|s| s.domain)
                        .unwrap_or(Domain::General)
                } else {
                    ctx.domain
                },
                features: ctx.features.clone(),
            });
        } else if let Some(current) = segments.last_mut() {
            current.end = index + 1;
            if current.domain == Domain::General && ctx.domain != Domain::General {
                current.domain = ctx.domain;
            }
            for feature in &ctx.features {
                if !current.features.contains(feature) {
                    current.features.push(feature.clone());
                }
            }
        }
    }

    segments
}

//! Error taxonomy for the generation pipeline.
//!
//! Streaming failures are typed so callers can tell a user-initiated
//! cancel apart from a genuine transport failure. Billing failures are
//! deliberately NOT part of this taxonomy: they are reported as a
//! non-fatal outcome value and never hide a successful generation.

use thiserror::Error;

/// Failures surfaced by the streaming session processor.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Non-2xx response or transport failure. The session is aborted and
    /// no further deduction is attempted beyond what was already captured.
    #[error("network error: {0}")]
    Network(String),

    /// The caller triggered the cancellation handle. Surfaced distinctly
    /// from `Network` so callers can suppress user-facing alarm.
    #[error("generation cancelled")]
    Cancelled,

    /// The stream produced a record that could not be interpreted at all
    /// (individual malformed records are logged and skipped; this variant
    /// covers unrecoverable protocol breakage such as a missing body).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl StreamError {
    /// Whether this failure came from an explicit cancel.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(StreamError::Cancelled.is_cancelled());
        assert!(!StreamError::Network("boom".into()).is_cancelled());
        assert!(!StreamError::Protocol("bad record".into()).is_cancelled());
    }

    #[test]
    fn test_display_messages_are_plain_text() {
        let err = StreamError::Network("connection reset".into());
        assert_eq!(err.to_string(), "network error: connection reset");
        assert_eq!(StreamError::Cancelled.to_string(), "generation cancelled");
    }
}

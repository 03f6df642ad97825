//! Wire types for the generation backend.
//!
//! The generation stream is a newline-delimited sequence of records: each
//! non-empty record is either a terminal sentinel (`[DONE]`, `DONE`) or a
//! JSON object tagged by `type`. Unknown or malformed records are skipped
//! by the processor, so every payload field here is optional.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Token usage reported by the backend on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Synthesize a usage estimate from the total returned character
    /// length when the backend omits a usage record. Assumes roughly four
    /// characters per token, split 30% input / 70% output. A fallback,
    /// not a correctness guarantee.
    pub fn estimate_from_chars(total_chars: usize) -> Self {
        let total_tokens = ((total_chars as u64) + 3) / 4;
        let total_tokens = total_tokens.max(1);
        let input_tokens = total_tokens * 30 / 100;
        Self {
            input_tokens,
            output_tokens: total_tokens - input_tokens,
            total_tokens,
        }
    }
}

/// Session metadata attached to the `complete` event.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionMeta {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// One typed record from the generation stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Connected {
        #[serde(default)]
        message: Option<String>,
    },
    Progress {
        #[serde(default)]
        progress: Option<u8>,
        #[serde(default)]
        message: Option<String>,
        /// Per-file detection states (path -> detected|writing|complete).
        #[serde(default)]
        files: Option<HashMap<String, String>>,
    },
    ContentDelta {
        #[serde(default)]
        content: Option<String>,
    },
    Complete {
        /// Final generated files (path -> content).
        #[serde(default)]
        files: Option<HashMap<String, String>>,
        #[serde(default)]
        usage: Option<TokenUsage>,
        #[serde(default, rename = "sessionData")]
        session_data: Option<SessionMeta>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    ToolUseStart {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        files: Option<HashMap<String, String>>,
    },
    ToolExecuting {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        files: Option<HashMap<String, String>>,
    },
    ToolResult {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        files: Option<HashMap<String, String>>,
    },
}

/// Check whether a raw record is a terminal sentinel rather than JSON.
pub fn is_terminal_sentinel(record: &str) -> bool {
    matches!(record.trim(), "[DONE]" | "DONE" | "")
}

/// Chat history exchange sent back to the backend as prior context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatExchange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Request body for the generate-stream endpoint.
#[derive(Debug, Serialize)]
pub(crate) struct GenerateRequest {
    pub message: String,
    pub chat_history: Vec<ChatExchange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub session_id: String,
}

/// Request body for the ledger deduct endpoint.
#[derive(Debug, Serialize)]
pub(crate) struct DeductRequest {
    pub account_id: String,
    pub identity: String,
    pub project_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: String,
    pub operation: String,
}

/// Response from the ledger deduct endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DeductResponse {
    pub success: bool,
    #[serde(default)]
    pub units_deducted: Option<u64>,
    #[serde(default)]
    pub dollar_cost: Option<f64>,
    #[serde(default)]
    pub remaining_balance: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_delta() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"content_delta","content":"hello"}"#).unwrap();
        match event {
            StreamEvent::ContentDelta { content } => assert_eq!(content.as_deref(), Some("hello")),
            other => panic!("Expected ContentDelta, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_complete_with_usage() {
        let raw = r#"{
            "type": "complete",
            "files": {"src/main.mo": "actor {}"},
            "usage": {"input_tokens": 10, "output_tokens": 90, "total_tokens": 100},
            "sessionData": {"id": "s-1", "model": "forge-1"}
        }"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        match event {
            StreamEvent::Complete {
                files,
                usage,
                session_data,
            } => {
                assert_eq!(files.unwrap().len(), 1);
                assert_eq!(usage.unwrap().total_tokens, 100);
                assert_eq!(session_data.unwrap().model.as_deref(), Some("forge-1"));
            }
            other => panic!("Expected Complete, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_progress_with_file_states() {
        let raw = r#"{"type":"progress","progress":40,"files":{"src/App.tsx":"writing"}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        match event {
            StreamEvent::Progress {
                progress, files, ..
            } => {
                assert_eq!(progress, Some(40));
                assert_eq!(files.unwrap()["src/App.tsx"], "writing");
            }
            other => panic!("Expected Progress, got {:?}", other),
        }
    }

    #[test]
    fn test_sentinel_detection() {
        assert!(is_terminal_sentinel("[DONE]"));
        assert!(is_terminal_sentinel("DONE"));
        assert!(is_terminal_sentinel("  "));
        assert!(!is_terminal_sentinel(r#"{"type":"connected"}"#));
    }

    #[test]
    fn test_usage_estimate_split() {
        let usage = TokenUsage::estimate_from_chars(4000);
        assert_eq!(usage.total_tokens, 1000);
        assert_eq!(usage.input_tokens, 300);
        assert_eq!(usage.output_tokens, 700);
        assert_eq!(usage.input_tokens + usage.output_tokens, usage.total_tokens);

        // Never estimates zero tokens for a non-empty response
        assert_eq!(TokenUsage::estimate_from_chars(1).total_tokens, 1);
    }

    #[test]
    fn test_malformed_record_is_an_error() {
        assert!(serde_json::from_str::<StreamEvent>(r#"{"type":"mystery"}"#).is_err());
        assert!(serde_json::from_str::<StreamEvent>("not json").is_err());
    }
}

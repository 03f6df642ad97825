//! Structured compiler diagnostics.
//!
//! Parses raw compiler text output into categorized diagnostics, extracts
//! surrounding source context, and renders a machine-actionable repair
//! request for the automatic retry loop.

mod parser;
mod repair;

pub use parser::{parse, ParseReport};
pub use repair::{are_errors_fixable, extract_code_contexts, format_fix_request, CodeContext};

use serde::Serialize;

/// Whether a diagnostic blocks compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Error,
    Warning,
}

/// Derived urgency of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

/// Derived category of a diagnostic, used to decide auto-fixability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Type,
    Field,
    Deprecated,
    Trap,
    Syntax,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Type => "type",
            Category::Field => "field",
            Category::Deprecated => "deprecated",
            Category::Trap => "trap",
            Category::Syntax => "syntax",
            Category::Other => "other",
        }
    }
}

/// One structured compiler diagnostic.
#[derive(Debug, Clone, Serialize)]
pub struct CompilerDiagnostic {
    pub file_path: String,
    /// 1-based line number.
    pub line_number: u32,
    pub column_start: u32,
    pub column_end: Option<u32>,
    pub kind: DiagnosticKind,
    /// Vendor error code, e.g. "M0057".
    pub error_code: Option<String>,
    pub message: String,
    pub severity: Severity,
    pub category: Category,
}

//! Grammar cascade over raw compiler output.
//!
//! The compiler's per-line grammar is
//! `<path>.mo:<line>.<col>[-<line>.<col>]: <severity>[ [<code>]], <message>`,
//! but output reaches us pre-wrapped in outer failure text and sometimes
//! degraded in transit. Parsing tries progressively looser grammar rules
//! until one yields matches; no rule matching returns an empty report so
//! downstream retry logic can treat "nothing extracted" as "cannot
//! auto-fix".

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use super::{Category, CompilerDiagnostic, DiagnosticKind, Severity};

/// Wrapper prefixes the deploy pipeline wraps compiler output in.
const WRAPPER_PREFIXES: &[&str] = &[
    "Deploy failed:",
    "Build failed:",
    "Compilation failed:",
    "Error:",
];

/// Parse result over one raw compiler output blob.
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub errors: Vec<CompilerDiagnostic>,
    pub warnings: Vec<CompilerDiagnostic>,
    pub total_issues: usize,
    pub has_blocking_errors: bool,
    pub affected_files: Vec<String>,
}

struct GrammarRule {
    name: &'static str,
    pattern: &'static Regex,
}

fn rules() -> &'static [GrammarRule] {
    static RULES: OnceLock<Vec<GrammarRule>> = OnceLock::new();
    static FULL: OnceLock<Regex> = OnceLock::new();
    static NO_RANGE: OnceLock<Regex> = OnceLock::new();
    static NO_CODE: OnceLock<Regex> = OnceLock::new();
    static LOOSE: OnceLock<Regex> = OnceLock::new();

    RULES.get_or_init(|| {
        vec![
            GrammarRule {
                name: "full",
                pattern: FULL.get_or_init(|| {
                    Regex::new(
                        r"^(?P<path>\S+?\.mo):(?P<line>\d+)\.(?P<col>\d+)-(?P<eline>\d+)\.(?P<ecol>\d+):\s*(?P<sev>warning|type error|syntax error|error)\s*\[(?P<code>M\d+)\],\s*(?P<msg>.+)$",
                    )
                    .unwrap()
                }),
            },
            GrammarRule {
                name: "no-range",
                pattern: NO_RANGE.get_or_init(|| {
                    Regex::new(
                        r"^(?P<path>\S+?\.mo):(?P<line>\d+)\.(?P<col>\d+):\s*(?P<sev>warning|type error|syntax error|error)\s*\[(?P<code>M\d+)\],\s*(?P<msg>.+)$",
                    )
                    .unwrap()
                }),
            },
            GrammarRule {
                name: "no-code",
                pattern: NO_CODE.get_or_init(|| {
                    Regex::new(
                        r"^(?P<path>\S+?\.mo):(?P<line>\d+)\.(?P<col>\d+)(?:-(?P<eline>\d+)\.(?P<ecol>\d+))?:\s*(?P<sev>warning|type error|syntax error|error),\s*(?P<msg>.+)$",
                    )
                    .unwrap()
                }),
            },
            GrammarRule {
                name: "loose",
                pattern: LOOSE.get_or_init(|| {
                    Regex::new(
                        r"^(?P<path>\S+?):(?P<line>\d+)(?:[.:](?P<col>\d+))?:\s*(?P<sev>error|warning)[:,]?\s*(?P<msg>.+)$",
                    )
                    .unwrap()
                }),
            },
        ]
    })
}

/// Normalize wrapper text: unescape embedded newlines and drop known
/// failure prefixes from line starts.
fn preprocess(raw: &str) -> Vec<String> {
    let unescaped = raw.replace("\\n", "\n");
    unescaped
        .lines()
        .map(|line| {
            let mut line = line.trim();
            loop {
                let mut stripped = false;
                for prefix in WRAPPER_PREFIXES {
                    if let Some(rest) = line.strip_prefix(prefix) {
                        line = rest.trim_start();
                        stripped = true;
                    }
                }
                if !stripped {
                    break;
                }
            }
            line.to_string()
        })
        .collect()
}

/// Parse raw compiler output into a structured report.
pub fn parse(raw: &str) -> ParseReport {
    let lines = preprocess(raw);

    let mut diagnostics = Vec::new();
    for rule in rules() {
        for line in &lines {
            if let Some(caps) = rule.pattern.captures(line) {
                if let Some(diag) = diagnostic_from_captures(&caps) {
                    diagnostics.push(diag);
                }
            }
        }
        if !diagnostics.is_empty() {
            debug!(rule = rule.name, count = diagnostics.len(), "Grammar rule matched");
            break;
        }
    }

    build_report(diagnostics)
}

fn diagnostic_from_captures(caps: &regex::Captures<'_>) -> Option<CompilerDiagnostic> {
    let file_path = caps.name("path")?.as_str().to_string();
    let line_number: u32 = caps.name("line")?.as_str().parse().ok()?;
    let column_start: u32 = caps
        .name("col")
        .and_then(|c| c.as_str().parse().ok())
        .unwrap_or(1);
    let column_end: Option<u32> = caps.name("ecol").and_then(|c| c.as_str().parse().ok());
    let sev_word = caps.name("sev")?.as_str();
    let error_code = caps.name("code").map(|c| c.as_str().to_string());
    let message = caps.name("msg")?.as_str().trim().to_string();

    let kind = if sev_word == "warning" {
        DiagnosticKind::Warning
    } else {
        DiagnosticKind::Error
    };
    let category = derive_category(error_code.as_deref(), sev_word, &message);
    let severity = derive_severity(category);

    Some(CompilerDiagnostic {
        file_path,
        line_number,
        column_start,
        column_end,
        kind,
        error_code,
        message,
        severity,
        category,
    })
}

/// Category derivation: field-access and deprecation markers in the
/// message win (the broad type band would swallow them), then the vendor
/// code's numeric band, then the severity word, then message substrings.
fn derive_category(code: Option<&str>, sev_word: &str, message: &str) -> Category {
    let msg = message.to_lowercase();

    if msg.contains("deprecated") {
        return Category::Deprecated;
    }
    if msg.contains("does not exist in") {
        return Category::Field;
    }

    if let Some(code) = code {
        if let Ok(n) = code.trim_start_matches('M').parse::<u32>() {
            match n {
                1..=9 => return Category::Syntax,
                10..=99 => return Category::Type,
                100..=149 => return Category::Trap,
                _ => {}
            }
        }
    }

    match sev_word {
        "syntax error" => return Category::Syntax,
        "type error" => return Category::Type,
        _ => {}
    }

    if msg.contains("type mismatch") || msg.contains("unbound") || msg.contains("expected type") {
        Category::Type
    } else if msg.contains("may trap") || msg.contains("trap") {
        Category::Trap
    } else if msg.contains("syntax") {
        Category::Syntax
    } else {
        Category::Other
    }
}

fn derive_severity(category: Category) -> Severity {
    match category {
        Category::Type | Category::Syntax => Severity::High,
        Category::Field | Category::Deprecated => Severity::Medium,
        Category::Trap | Category::Other => Severity::Low,
    }
}

fn build_report(diagnostics: Vec<CompilerDiagnostic>) -> ParseReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut affected_files = Vec::new();

    for diag in diagnostics {
        if !affected_files.contains(&diag.file_path) {
            affected_files.push(diag.file_path.clone());
        }
        match diag.kind {
            DiagnosticKind::Error => errors.push(diag),
            DiagnosticKind::Warning => warnings.push(diag),
        }
    }
    affected_files.sort();

    ParseReport {
        total_issues: errors.len() + warnings.len(),
        has_blocking_errors: !errors.is_empty(),
        affected_files,
        errors,
        warnings,
    }
}

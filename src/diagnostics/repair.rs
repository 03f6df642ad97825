//! Repair-request rendering for the automatic retry loop.
//!
//! Takes structured diagnostics plus the generated sources and produces a
//! single natural-language fix prompt the streaming processor can submit
//! as the next instruction.

use std::collections::BTreeMap;
use std::collections::HashMap;

use super::{Category, CompilerDiagnostic, DiagnosticKind};

/// Lines of context shown either side of the offending line.
const CONTEXT_WINDOW: usize = 3;

/// Source window around one diagnostic.
#[derive(Debug, Clone)]
pub struct CodeContext {
    /// The diagnostic's path (not the matched map key, which may differ
    /// after suffix matching).
    pub file_path: String,
    pub target_line: u32,
    /// 1-based number of the first line in `lines`.
    pub start_line: u32,
    pub lines: Vec<String>,
}

/// Locate the source window for each diagnostic.
///
/// Paths in compiler output and the file map rarely agree on prefixes, so
/// an exact lookup falls back to filename-suffix matching.
pub fn extract_code_contexts(
    diagnostics: &[CompilerDiagnostic],
    files: &HashMap<String, String>,
) -> Vec<CodeContext> {
    let mut contexts = Vec::new();

    for diag in diagnostics {
        let Some(content) = lookup_file(&diag.file_path, files) else {
            continue;
        };

        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() || diag.line_number == 0 {
            continue;
        }
        let target = diag.line_number as usize;
        if target > lines.len() {
            continue;
        }

        let start = if target > CONTEXT_WINDOW {
            target - CONTEXT_WINDOW
        } else {
            1
        };
        let end = (target + CONTEXT_WINDOW).min(lines.len());

        contexts.push(CodeContext {
            file_path: diag.file_path.clone(),
            target_line: diag.line_number,
            start_line: start as u32,
            lines: lines[start - 1..end].iter().map(|s| s.to_string()).collect(),
        });
    }

    contexts
}

fn lookup_file<'a>(path: &str, files: &'a HashMap<String, String>) -> Option<&'a String> {
    if let Some(content) = files.get(path) {
        return Some(content);
    }
    // Anchor at a path separator so "Foo.mo" never matches "XFoo.mo".
    let filename = path.rsplit('/').next().unwrap_or(path);
    files
        .iter()
        .find(|(key, _)| {
            key.as_str() == filename
                || key.ends_with(&format!("/{filename}"))
                || path.ends_with(&format!("/{key}"))
        })
        .map(|(_, content)| content)
}

/// Render a single repair prompt from errors (warnings excluded) and their
/// source windows. The result is submitted as the next generation
/// instruction by the auto-retry coordinator.
pub fn format_fix_request(
    diagnostics: &[CompilerDiagnostic],
    contexts: &[CodeContext],
) -> String {
    let errors: Vec<&CompilerDiagnostic> = diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::Error)
        .collect();

    if errors.is_empty() {
        return String::new();
    }

    let mut out = format!(
        "The generated code failed to compile. Fix the following {} error{}:\n",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" }
    );

    let mut tally: BTreeMap<&'static str, usize> = BTreeMap::new();
    for (i, diag) in errors.iter().enumerate() {
        *tally.entry(diag.category.as_str()).or_default() += 1;

        out.push('\n');
        out.push_str(&format!(
            "Error {} [{}]{}: {}\n  at {}:{}.{}\n",
            i + 1,
            diag.category.as_str(),
            diag.error_code
                .as_deref()
                .map(|c| format!(" {}", c))
                .unwrap_or_default(),
            diag.message,
            diag.file_path,
            diag.line_number,
            diag.column_start,
        ));

        let context = contexts
            .iter()
            .find(|c| c.file_path == diag.file_path && c.target_line == diag.line_number);
        if let Some(context) = context {
            out.push_str("```\n");
            for (offset, line) in context.lines.iter().enumerate() {
                let line_number = context.start_line + offset as u32;
                if line_number == context.target_line {
                    out.push_str(&format!(">>> {:>4} | {}\n", line_number, line));
                } else {
                    out.push_str(&format!("    {:>4} | {}\n", line_number, line));
                }
            }
            out.push_str("```\n");
        }
    }

    let summary: Vec<String> = tally
        .iter()
        .map(|(category, count)| format!("{} {}", count, category))
        .collect();
    out.push_str(&format!("\nError summary: {}.\n", summary.join(", ")));
    out.push_str("Fix all errors while preserving the existing application behavior and file structure.\n");

    out
}

/// Gate for the auto-retry coordinator: a fix attempt is worthwhile only
/// when at least half of all diagnostics are errors in a category the
/// model reliably repairs.
pub fn are_errors_fixable(diagnostics: &[CompilerDiagnostic]) -> bool {
    if diagnostics.is_empty() {
        return false;
    }
    let fixable = diagnostics
        .iter()
        .filter(|d| {
            d.kind == DiagnosticKind::Error
                && matches!(
                    d.category,
                    Category::Type | Category::Field | Category::Deprecated | Category::Syntax
                )
        })
        .count();
    fixable * 2 >= diagnostics.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::parse;

    fn sample_files() -> HashMap<String, String> {
        let mut files = HashMap::new();
        files.insert(
            "src/backend/Foo.mo".to_string(),
            (1..=20)
                .map(|i| format!("line {} of Foo", i))
                .collect::<Vec<_>>()
                .join("\n"),
        );
        files
    }

    #[test]
    fn test_context_window_is_three_lines_each_side() {
        let report = parse("Foo.mo:10.2-10.5: error [M0057], unbound variable x");
        let contexts = extract_code_contexts(&report.errors, &sample_files());

        assert_eq!(contexts.len(), 1);
        let ctx = &contexts[0];
        assert_eq!(ctx.start_line, 7);
        assert_eq!(ctx.lines.len(), 7);
        assert_eq!(ctx.lines[3], "line 10 of Foo");
    }

    #[test]
    fn test_suffix_matching_tolerates_path_mismatch() {
        // Diagnostic says "Foo.mo"; the map key is "src/backend/Foo.mo".
        let report = parse("Foo.mo:2.1-2.3: error [M0057], unbound variable y");
        let contexts = extract_code_contexts(&report.errors, &sample_files());
        assert_eq!(contexts.len(), 1);
        // Window clamps at the top of the file.
        assert_eq!(contexts[0].start_line, 1);
    }

    #[test]
    fn test_filename_match_anchors_at_path_separator() {
        // "Foo.mo" must not match the unrelated file "XFoo.mo".
        let mut files = HashMap::new();
        files.insert(
            "src/XFoo.mo".to_string(),
            "line 1\nline 2\nline 3".to_string(),
        );
        let report = parse("Foo.mo:2.1-2.3: error [M0057], unbound variable y");
        assert!(extract_code_contexts(&report.errors, &files).is_empty());

        // A real basename match at a separator boundary still resolves.
        files.insert(
            "src/backend/Foo.mo".to_string(),
            "line 1\nline 2\nline 3".to_string(),
        );
        let contexts = extract_code_contexts(&report.errors, &files);
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].lines[1], "line 2");
    }

    #[test]
    fn test_out_of_range_line_is_skipped() {
        let report = parse("Foo.mo:99.1-99.2: error [M0057], unbound variable z");
        let contexts = extract_code_contexts(&report.errors, &sample_files());
        assert!(contexts.is_empty());
    }

    #[test]
    fn test_fix_request_marks_offending_line_and_tallies() {
        let raw = "Foo.mo:10.2-10.5: error [M0057], unbound variable x\nFoo.mo:12.1-12.3: error [M0001], unexpected token\nFoo.mo:5.1-5.2: warning [M0154], field xs is deprecated";
        let report = parse(raw);
        let all: Vec<_> = report
            .errors
            .iter()
            .chain(report.warnings.iter())
            .cloned()
            .collect();
        let contexts = extract_code_contexts(&all, &sample_files());
        let request = format_fix_request(&all, &contexts);

        assert!(request.starts_with("The generated code failed to compile. Fix the following 2 errors:"));
        assert!(request.contains("Error 1 [type] M0057: unbound variable x"));
        assert!(request.contains(">>>   10 | line 10 of Foo"));
        assert!(request.contains("Error summary: 1 syntax, 1 type."));
        // Warnings are excluded from the request body.
        assert!(!request.contains("deprecated"));
    }

    #[test]
    fn test_fix_request_empty_without_errors() {
        let report = parse("Foo.mo:5.1-5.2: warning [M0154], field xs is deprecated");
        let request = format_fix_request(&report.warnings, &[]);
        assert!(request.is_empty());
    }

    #[test]
    fn test_fixability_requires_half_fixable_errors() {
        let fixable = parse("Foo.mo:1.1-1.2: error [M0057], unbound variable x");
        assert!(are_errors_fixable(&fixable.errors));

        // One fixable error among one error and two warnings: 1 of 3.
        let raw = "Foo.mo:1.1-1.2: error [M0057], unbound variable x\nFoo.mo:2.1-2.2: warning [M0194], unused identifier a\nFoo.mo:3.1-3.2: warning [M0194], unused identifier b";
        let report = parse(raw);
        let all: Vec<_> = report
            .errors
            .iter()
            .chain(report.warnings.iter())
            .cloned()
            .collect();
        assert!(!are_errors_fixable(&all));

        assert!(!are_errors_fixable(&[]));
    }
}

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::diagnostics::{
    are_errors_fixable, extract_code_contexts, format_fix_request, parse, CompilerDiagnostic,
};

pub async fn run_diagnose(input: Option<PathBuf>, sources: Option<PathBuf>) -> Result<()> {
    let raw = match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read compiler output from stdin")?;
            buffer
        }
    };

    let report = parse(&raw);

    if report.total_issues == 0 {
        println!("No diagnostics recognized in the input.");
        println!("Auto-fix: not applicable");
        return Ok(());
    }

    println!(
        "{} error(s), {} warning(s) across {} file(s)",
        report.errors.len(),
        report.warnings.len(),
        report.affected_files.len()
    );
    for diag in report.errors.iter().chain(report.warnings.iter()) {
        print_diagnostic(diag);
    }

    let all: Vec<CompilerDiagnostic> = report
        .errors
        .iter()
        .chain(report.warnings.iter())
        .cloned()
        .collect();

    if report.has_blocking_errors {
        if let Some(sources) = sources {
            let files = super::load_files(&sources)?;
            let contexts = extract_code_contexts(&all, &files);
            println!("\n--- fix request ---");
            print!("{}", format_fix_request(&all, &contexts));
        }
    }

    println!(
        "\nAuto-fix: {}",
        if are_errors_fixable(&all) {
            "worth attempting"
        } else {
            "unlikely to succeed"
        }
    );

    Ok(())
}

fn print_diagnostic(diag: &CompilerDiagnostic) {
    println!(
        "   {}:{}.{} [{}{}] {}",
        diag.file_path,
        diag.line_number,
        diag.column_start,
        diag.category.as_str(),
        diag.error_code
            .as_deref()
            .map(|c| format!(" {}", c))
            .unwrap_or_default(),
        diag.message
    );
}

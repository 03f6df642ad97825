mod analyze;
mod configure;
mod diagnose;
mod generate;
mod status;
mod transcript;

pub use analyze::run_analyze;
pub use configure::run_configure;
pub use diagnose::run_diagnose;
pub use generate::run_generate;
pub use status::run_status;
pub use transcript::run_transcript;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Load a directory tree into a path -> content map. Paths are relative
/// to the root with forward slashes; non-UTF-8 files are skipped.
pub(crate) fn load_files(root: &Path) -> Result<HashMap<String, String>> {
    let mut files = HashMap::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        match std::fs::read_to_string(entry.path()) {
            Ok(content) => {
                files.insert(relative, content);
            }
            Err(_) => {
                tracing::debug!(path = %entry.path().display(), "Skipping non-text file");
            }
        }
    }

    Ok(files)
}

use std::path::PathBuf;

use anyhow::Result;

use crate::impact::analyze;

pub async fn run_analyze(old_dir: PathBuf, new_dir: PathBuf) -> Result<()> {
    let old_files = super::load_files(&old_dir)?;
    let new_files = super::load_files(&new_dir)?;

    let analysis = analyze(&old_files, &new_files);

    if analysis.changes.is_empty() {
        println!("No changes detected.");
    } else {
        println!("{} changed file(s):", analysis.changes.len());
        for change in &analysis.changes {
            let effect = if change.requires_deployment {
                "redeploy"
            } else if change.can_hot_reload {
                "hot-reload"
            } else {
                "preview"
            };
            println!(
                "   {:<10} {:<10} {}",
                change.change_type.as_str(),
                effect,
                change.path
            );
        }
    }
    println!("Strategy: {}", analysis.strategy.as_str());

    Ok(())
}

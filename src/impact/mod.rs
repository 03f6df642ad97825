//! Change impact analysis.
//!
//! Diffs an old and new generated-file set and classifies the deployment
//! strategy the caller should use: in-place hot patch, dev-server preview
//! refresh, or full redeploy. Pure functions over the two file maps; the
//! deploy mechanism itself is an external collaborator this module merely
//! advises.

use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;
use tracing::debug;

const BACKEND_EXTENSIONS: &[&str] = &["mo"];
const STYLESHEET_EXTENSIONS: &[&str] = &["css", "scss", "sass", "less"];
const UI_EXTENSIONS: &[&str] = &["tsx", "jsx", "ts", "js", "html", "vue", "svelte"];
const MANIFEST_NAMES: &[&str] = &["package.json", "mops.toml"];

/// Kind of change detected in one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Css,
    Style,
    Content,
    Structure,
    Backend,
    Dependency,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Css => "css",
            ChangeType::Style => "style",
            ChangeType::Content => "content",
            ChangeType::Structure => "structure",
            ChangeType::Backend => "backend",
            ChangeType::Dependency => "dependency",
        }
    }
}

/// Chosen deployment strategy for a whole change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStrategy {
    HotReload,
    PreviewUpdate,
    FullDeploy,
}

impl DeployStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStrategy::HotReload => "hot-reload",
            DeployStrategy::PreviewUpdate => "preview-update",
            DeployStrategy::FullDeploy => "full-deploy",
        }
    }
}

/// One changed file with its classification.
///
/// Invariant: `requires_deployment` implies `!can_hot_reload`.
#[derive(Debug, Clone)]
pub struct FileChangeRecord {
    pub path: String,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    pub change_type: ChangeType,
    pub can_hot_reload: bool,
    pub requires_deployment: bool,
}

/// Ordered change records plus the derived strategy.
#[derive(Debug, Clone)]
pub struct ChangeAnalysis {
    pub changes: Vec<FileChangeRecord>,
    pub strategy: DeployStrategy,
}

fn extension(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or("")
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_manifest(path: &str) -> bool {
    MANIFEST_NAMES.contains(&basename(path))
}

/// Diff two file maps and derive the deployment strategy.
pub fn analyze(old_files: &HashMap<String, String>, new_files: &HashMap<String, String>) -> ChangeAnalysis {
    let mut changes = Vec::new();

    let mut new_paths: Vec<&String> = new_files.keys().collect();
    new_paths.sort();

    for path in new_paths {
        let new_content = &new_files[path];
        match old_files.get(path) {
            Some(old_content) if old_content == new_content => continue,
            old_content => {
                let change_type = classify_change(
                    path,
                    old_content.map(String::as_str).unwrap_or(""),
                    new_content,
                );
                changes.push(make_record(
                    path.clone(),
                    old_content.cloned(),
                    Some(new_content.clone()),
                    change_type,
                ));
            }
        }
    }

    // Deleted files are always a structural change requiring deployment.
    let mut deleted: Vec<&String> = old_files
        .keys()
        .filter(|path| !new_files.contains_key(*path))
        .collect();
    deleted.sort();
    for path in deleted {
        changes.push(make_record(
            path.clone(),
            Some(old_files[path].clone()),
            None,
            ChangeType::Structure,
        ));
    }

    let strategy = derive_strategy(&changes);
    debug!(
        change_count = changes.len(),
        strategy = strategy.as_str(),
        "Change impact analyzed"
    );

    ChangeAnalysis { changes, strategy }
}

fn make_record(
    path: String,
    old_content: Option<String>,
    new_content: Option<String>,
    change_type: ChangeType,
) -> FileChangeRecord {
    let (can_hot_reload, requires_deployment) = match change_type {
        ChangeType::Css | ChangeType::Style => (true, false),
        ChangeType::Backend | ChangeType::Structure => (false, true),
        ChangeType::Content => (false, false),
        ChangeType::Dependency => {
            let unchanged = dependency_set_unchanged(
                &path,
                old_content.as_deref().unwrap_or(""),
                new_content.as_deref().unwrap_or(""),
            );
            // A manifest edit that does not alter the dependency set is
            // hot-reloadable; anything else needs a redeploy.
            (unchanged, !unchanged)
        }
    };

    FileChangeRecord {
        path,
        old_content,
        new_content,
        change_type,
        can_hot_reload,
        requires_deployment,
    }
}

fn classify_change(path: &str, old_content: &str, new_content: &str) -> ChangeType {
    let ext = extension(path);

    if BACKEND_EXTENSIONS.contains(&ext) {
        return ChangeType::Backend;
    }
    if is_manifest(path) {
        return ChangeType::Dependency;
    }
    if STYLESHEET_EXTENSIONS.contains(&ext) {
        return ChangeType::Css;
    }
    if UI_EXTENSIONS.contains(&ext) {
        if strip_style_substrings(old_content) == strip_style_substrings(new_content) {
            return ChangeType::Style;
        }
        if blank_tag_text(old_content) == blank_tag_text(new_content) {
            return ChangeType::Content;
        }
        return ChangeType::Structure;
    }

    // Unknown extensions (docs, data files) only need a preview refresh.
    ChangeType::Content
}

fn style_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // Inline style attributes
            Regex::new(r#"style=\{[^}]*\}"#).unwrap(),
            Regex::new(r#"style="[^"]*""#).unwrap(),
            // Class name strings
            Regex::new(r#"className=\{[^}]*\}"#).unwrap(),
            Regex::new(r#"className="[^"]*""#).unwrap(),
            Regex::new(r#"class="[^"]*""#).unwrap(),
            // Style template blocks
            Regex::new(r"(?s)(css|styled\.[A-Za-z0-9_]+)`[^`]*`").unwrap(),
            // Stylesheet import lines
            Regex::new(r#"(?m)^\s*import\s+['"][^'"]+\.(css|scss|sass|less)['"];?\s*$"#).unwrap(),
        ]
    })
}

/// Remove every style-bearing substring so that two versions differing
/// only in styling compare byte-identical.
fn strip_style_substrings(content: &str) -> String {
    let mut stripped = content.to_string();
    for pattern in style_patterns() {
        stripped = pattern.replace_all(&stripped, "").into_owned();
    }
    stripped
}

/// Blank out text runs between markup tags, keeping the tag structure.
fn blank_tag_text(content: &str) -> String {
    static TAG_TEXT: OnceLock<Regex> = OnceLock::new();
    let re = TAG_TEXT.get_or_init(|| Regex::new(r">[^<>]+<").unwrap());
    re.replace_all(content, "><").into_owned()
}

/// Extract the declared dependency set (name@version) from a manifest.
/// Returns `None` when the manifest cannot be parsed.
fn dependency_set(path: &str, content: &str) -> Option<BTreeSet<String>> {
    if basename(path) == "package.json" {
        let value: serde_json::Value = serde_json::from_str(content).ok()?;
        let mut set = BTreeSet::new();
        for table in ["dependencies", "devDependencies"] {
            if let Some(deps) = value.get(table).and_then(|v| v.as_object()) {
                for (name, version) in deps {
                    set.insert(format!("{}@{}", name, version.as_str().unwrap_or("")));
                }
            }
        }
        return Some(set);
    }

    // mops.toml: flat `name = "version"` lines under [dependencies]
    let mut set = BTreeSet::new();
    let mut in_dependencies = false;
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_dependencies = line == "[dependencies]";
            continue;
        }
        if in_dependencies {
            if let Some((name, version)) = line.split_once('=') {
                set.insert(format!(
                    "{}@{}",
                    name.trim(),
                    version.trim().trim_matches('"')
                ));
            }
        }
    }
    Some(set)
}

fn dependency_set_unchanged(path: &str, old_content: &str, new_content: &str) -> bool {
    match (
        dependency_set(path, old_content),
        dependency_set(path, new_content),
    ) {
        (Some(old_set), Some(new_set)) => old_set == new_set,
        // Unparseable manifest: assume the dependency set changed.
        _ => false,
    }
}

fn derive_strategy(changes: &[FileChangeRecord]) -> DeployStrategy {
    if changes.iter().any(|c| c.requires_deployment) {
        return DeployStrategy::FullDeploy;
    }
    if !changes.is_empty() && changes.iter().all(|c| c.can_hot_reload) {
        return DeployStrategy::HotReload;
    }
    if !changes.is_empty() {
        return DeployStrategy::PreviewUpdate;
    }
    // No changes at all: conservatively treated as deploy-safe rather
    // than silently doing nothing.
    DeployStrategy::FullDeploy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(path, content)| (path.to_string(), content.to_string()))
            .collect()
    }

    #[test]
    fn test_identical_sets_yield_full_deploy_and_no_records() {
        let set = files(&[("src/App.tsx", "<div>hello</div>")]);
        let analysis = analyze(&set, &set);
        assert!(analysis.changes.is_empty());
        assert_eq!(analysis.strategy, DeployStrategy::FullDeploy);
    }

    #[test]
    fn test_css_change_is_hot_reload() {
        let old = files(&[("a.css", "x")]);
        let new = files(&[("a.css", "y")]);
        let analysis = analyze(&old, &new);
        assert_eq!(analysis.strategy, DeployStrategy::HotReload);
        assert_eq!(analysis.changes[0].change_type, ChangeType::Css);
        assert!(analysis.changes[0].can_hot_reload);
        assert!(!analysis.changes[0].requires_deployment);
    }

    #[test]
    fn test_backend_change_is_full_deploy() {
        let old = files(&[("main.mo", "actor { public func f() {} }")]);
        let new = files(&[("main.mo", "actor { public func g() {} }")]);
        let analysis = analyze(&old, &new);
        assert_eq!(analysis.strategy, DeployStrategy::FullDeploy);
        assert_eq!(analysis.changes[0].change_type, ChangeType::Backend);
    }

    #[test]
    fn test_class_name_only_change_is_style() {
        let old = files(&[("App.tsx", r#"<div className="red">Hi</div>"#)]);
        let new = files(&[("App.tsx", r#"<div className="blue">Hi</div>"#)]);
        let analysis = analyze(&old, &new);
        assert_eq!(analysis.changes[0].change_type, ChangeType::Style);
        assert_eq!(analysis.strategy, DeployStrategy::HotReload);
    }

    #[test]
    fn test_text_only_change_is_content() {
        let old = files(&[("App.tsx", "<h1>Welcome</h1>")]);
        let new = files(&[("App.tsx", "<h1>Hello there</h1>")]);
        let analysis = analyze(&old, &new);
        assert_eq!(analysis.changes[0].change_type, ChangeType::Content);
        assert_eq!(analysis.strategy, DeployStrategy::PreviewUpdate);
    }

    #[test]
    fn test_markup_change_is_structure() {
        let old = files(&[("App.tsx", "<div><h1>Hi</h1></div>")]);
        let new = files(&[("App.tsx", "<div><h1>Hi</h1><p>More</p></div>")]);
        let analysis = analyze(&old, &new);
        assert_eq!(analysis.changes[0].change_type, ChangeType::Structure);
        assert_eq!(analysis.strategy, DeployStrategy::FullDeploy);
    }

    #[test]
    fn test_deleted_file_is_structure_requiring_deployment() {
        let old = files(&[("a.css", "x"), ("gone.tsx", "<div/>")]);
        let new = files(&[("a.css", "x")]);
        let analysis = analyze(&old, &new);
        assert_eq!(analysis.changes.len(), 1);
        let record = &analysis.changes[0];
        assert_eq!(record.path, "gone.tsx");
        assert_eq!(record.change_type, ChangeType::Structure);
        assert!(record.requires_deployment);
        assert!(record.new_content.is_none());
        assert_eq!(analysis.strategy, DeployStrategy::FullDeploy);
    }

    #[test]
    fn test_manifest_edit_without_dependency_change_hot_reloads() {
        let old = files(&[(
            "package.json",
            r#"{"name":"app","dependencies":{"react":"18.2.0"}}"#,
        )]);
        let new = files(&[(
            "package.json",
            r#"{"name":"renamed-app","dependencies":{"react":"18.2.0"}}"#,
        )]);
        let analysis = analyze(&old, &new);
        assert_eq!(analysis.changes[0].change_type, ChangeType::Dependency);
        assert!(analysis.changes[0].can_hot_reload);
        assert_eq!(analysis.strategy, DeployStrategy::HotReload);
    }

    #[test]
    fn test_new_package_forces_full_deploy() {
        let old = files(&[(
            "package.json",
            r#"{"dependencies":{"react":"18.2.0"}}"#,
        )]);
        let new = files(&[(
            "package.json",
            r#"{"dependencies":{"react":"18.2.0","zustand":"4.4.0"}}"#,
        )]);
        let analysis = analyze(&old, &new);
        assert!(analysis.changes[0].requires_deployment);
        assert_eq!(analysis.strategy, DeployStrategy::FullDeploy);
    }

    #[test]
    fn test_mops_manifest_dependency_change() {
        let old = files(&[("mops.toml", "[dependencies]\nbase = \"0.11.0\"\n")]);
        let new = files(&[("mops.toml", "[dependencies]\nbase = \"0.12.0\"\n")]);
        let analysis = analyze(&old, &new);
        assert_eq!(analysis.changes[0].change_type, ChangeType::Dependency);
        assert!(analysis.changes[0].requires_deployment);
    }

    #[test]
    fn test_mixed_hot_and_content_changes_are_preview_update() {
        let old = files(&[("a.css", "x"), ("App.tsx", "<h1>Hi</h1>")]);
        let new = files(&[("a.css", "y"), ("App.tsx", "<h1>Hello</h1>")]);
        let analysis = analyze(&old, &new);
        assert_eq!(analysis.strategy, DeployStrategy::PreviewUpdate);
    }

    #[test]
    fn test_deployment_implies_no_hot_reload() {
        let old = files(&[
            ("main.mo", "actor {}"),
            ("package.json", r#"{"dependencies":{}}"#),
            ("App.tsx", "<div><span/></div>"),
        ]);
        let new = files(&[
            ("main.mo", "actor { stable var n = 0 }"),
            ("package.json", r#"{"dependencies":{"zod":"3.0.0"}}"#),
            ("App.tsx", "<div><p/></div>"),
        ]);
        let analysis = analyze(&old, &new);
        for record in &analysis.changes {
            if record.requires_deployment {
                assert!(!record.can_hot_reload, "invariant broken for {}", record.path);
            }
        }
    }

    #[test]
    fn test_styled_template_block_change_is_style() {
        let old = files(&[("Button.tsx", "const S = styled.div`color: red;`;\n<S>Go</S>")]);
        let new = files(&[("Button.tsx", "const S = styled.div`color: blue;`;\n<S>Go</S>")]);
        let analysis = analyze(&old, &new);
        assert_eq!(analysis.changes[0].change_type, ChangeType::Style);
    }
}

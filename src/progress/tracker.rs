//! File generation phase tracker.
//!
//! Converts the flat per-file detection-state map into a monotonic
//! phase/progress/message triple for display. File counts are never
//! surfaced to the user: the displayed phase would otherwise imply total
//! project completion.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::broadcast::StatusBroadcaster;
use super::FileState;

/// Weight of a file still being written, relative to a completed one.
const WRITING_WEIGHT: f64 = 0.3;

/// Maximum re-entrant update depth before returning the last stable state.
const MAX_UPDATE_DEPTH: u8 = 3;

/// Display phase of the generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Thinking,
    Detecting,
    Generating,
    Completing,
    Complete,
}

/// Snapshot handed to the presentation layer on every update.
#[derive(Debug, Clone)]
pub struct FilePhaseInfo {
    pub phase: Phase,
    /// 0–100; never decreases within one session.
    pub progress: u8,
    pub message: String,
    pub detected_files: Vec<String>,
    pub writing_files: Vec<String>,
    pub complete_files: Vec<String>,
    pub total_files: usize,
}

impl Default for FilePhaseInfo {
    fn default() -> Self {
        Self {
            phase: Phase::Thinking,
            progress: 0,
            message: "Analyzing your request...".to_string(),
            detected_files: Vec::new(),
            writing_files: Vec::new(),
            complete_files: Vec::new(),
            total_files: 0,
        }
    }
}

/// Rough class of a file, for choosing the status message while it is
/// being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileClass {
    BackendEntry,
    UiEntry,
    Stylesheet,
    Manifest,
    Other,
}

fn classify_file(path: &str) -> FileClass {
    let basename = path.rsplit('/').next().unwrap_or(path);
    let lower = basename.to_lowercase();

    if lower.ends_with(".mo") {
        return FileClass::BackendEntry;
    }
    if matches!(lower.as_str(), "app.tsx" | "index.tsx" | "main.tsx" | "app.jsx") {
        return FileClass::UiEntry;
    }
    if lower.ends_with(".css") || lower.ends_with(".scss") {
        return FileClass::Stylesheet;
    }
    if matches!(lower.as_str(), "package.json" | "mops.toml") {
        return FileClass::Manifest;
    }
    FileClass::Other
}

/// Tracks generation phases and posts status text through the ownership
/// broadcaster. One tracker instance per orchestrating caller; no global
/// lookup.
pub struct PhaseTracker {
    broadcaster: Arc<dyn StatusBroadcaster>,
    requester_id: String,
    app_name: Option<String>,
    last_info: FilePhaseInfo,
    last_posted: Option<String>,
    best_progress: u8,
    depth: u8,
    active: bool,
}

impl PhaseTracker {
    pub fn new(broadcaster: Arc<dyn StatusBroadcaster>, requester_id: impl Into<String>) -> Self {
        Self {
            broadcaster,
            requester_id: requester_id.into(),
            app_name: None,
            last_info: FilePhaseInfo::default(),
            last_posted: None,
            best_progress: 0,
            depth: 0,
            active: false,
        }
    }

    /// Cache the app name for friendlier status text. Cleared whenever
    /// ownership is lost.
    pub fn set_app_name(&mut self, name: impl Into<String>) {
        self.app_name = Some(name.into());
    }

    /// Notification hook for ownership changes; callers wire this to
    /// `StatusBroadcaster::subscribe_to_ownership_changes`. Losing
    /// ownership fully releases activation state so a later
    /// re-activation starts clean.
    pub fn on_ownership_changed(&mut self, new_owner: &str) {
        if new_owner != self.requester_id && self.active {
            debug!(new_owner, "Phase tracker lost status ownership; deactivating");
            self.deactivate();
        }
    }

    fn deactivate(&mut self) {
        self.active = false;
        self.app_name = None;
        self.last_info = FilePhaseInfo::default();
        self.last_posted = None;
        self.best_progress = 0;
        self.depth = 0;
    }

    /// Fold a fresh file-state map into a phase/progress/message triple.
    pub fn update(&mut self, file_states: &HashMap<String, FileState>) -> FilePhaseInfo {
        self.depth += 1;
        if self.depth > MAX_UPDATE_DEPTH {
            // Re-entrancy bound reached: return the last stable state.
            self.depth = 0;
            return self.last_info.clone();
        }
        self.active = true;

        let mut detected_files = Vec::new();
        let mut writing_files = Vec::new();
        let mut complete_files = Vec::new();
        for (path, state) in file_states {
            match state {
                FileState::Detected => detected_files.push(path.clone()),
                FileState::Writing => writing_files.push(path.clone()),
                FileState::Complete => complete_files.push(path.clone()),
            }
        }
        detected_files.sort();
        writing_files.sort();
        complete_files.sort();

        let total_files = file_states.len();
        let phase = Self::derive_phase(
            total_files,
            writing_files.len(),
            complete_files.len(),
        );
        let progress = self.derive_progress(total_files, writing_files.len(), complete_files.len());
        let message = self.message_for(phase, &writing_files);

        let info = FilePhaseInfo {
            phase,
            progress,
            message,
            detected_files,
            writing_files,
            complete_files,
            total_files,
        };

        self.post(&info.message);
        self.best_progress = info.progress;
        self.last_info = info.clone();
        self.depth = self.depth.saturating_sub(1);
        info
    }

    /// Phase rules, evaluated in order.
    fn derive_phase(total: usize, writing: usize, complete: usize) -> Phase {
        if total == 0 {
            return Phase::Thinking;
        }
        if writing == 0 && complete == 0 {
            return Phase::Detecting;
        }
        if writing > 0 {
            return Phase::Generating;
        }
        if complete == total {
            return Phase::Complete;
        }
        if complete > writing {
            return Phase::Completing;
        }
        Phase::Generating
    }

    fn derive_progress(&self, total: usize, writing: usize, complete: usize) -> u8 {
        if total == 0 {
            return self.best_progress;
        }
        let weighted = complete as f64 + WRITING_WEIGHT * writing as f64;
        let pct = (weighted / total as f64 * 100.0).round().min(100.0) as u8;
        pct.max(self.best_progress)
    }

    fn message_for(&self, phase: Phase, writing: &[String]) -> String {
        match phase {
            Phase::Thinking => match &self.app_name {
                Some(name) => format!("Planning {}...", name),
                None => "Analyzing your request...".to_string(),
            },
            Phase::Detecting => "Planning the file structure...".to_string(),
            Phase::Generating => {
                let class = writing
                    .first()
                    .map(|p| classify_file(p))
                    .unwrap_or(FileClass::Other);
                match class {
                    FileClass::BackendEntry => "Building the backend logic...".to_string(),
                    FileClass::UiEntry => "Building the main interface...".to_string(),
                    FileClass::Stylesheet => "Styling the interface...".to_string(),
                    FileClass::Manifest => "Wiring up dependencies...".to_string(),
                    FileClass::Other => "Writing application code...".to_string(),
                }
            }
            Phase::Completing => "Finishing up the remaining files...".to_string(),
            Phase::Complete => match &self.app_name {
                Some(name) => format!("{} is ready.", name),
                None => "All files generated.".to_string(),
            },
        }
    }

    /// Post through the broadcaster, forcing a hand-off request when
    /// ownership is not currently held.
    fn post(&mut self, message: &str) {
        if self.last_posted.as_deref() == Some(message) {
            return;
        }

        if self.broadcaster.can_post(&self.requester_id) {
            self.broadcaster.post_message(message, &self.requester_id);
        } else if !self
            .broadcaster
            .request_ownership(&self.requester_id, message)
        {
            debug!("Status ownership denied; update not posted");
            return;
        }
        self.last_posted = Some(message.to_string());
    }

    #[cfg(test)]
    fn force_depth(&mut self, depth: u8) {
        self.depth = depth;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeBroadcaster {
        grant: bool,
        owner_granted: Mutex<bool>,
        posts: Mutex<Vec<String>>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeBroadcaster {
        fn new(grant: bool) -> Arc<Self> {
            Arc::new(Self {
                grant,
                owner_granted: Mutex::new(false),
                posts: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn posts(&self) -> Vec<String> {
            self.posts.lock().unwrap().clone()
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl StatusBroadcaster for FakeBroadcaster {
        fn request_ownership(&self, _requester_id: &str, initial_message: &str) -> bool {
            self.requests.lock().unwrap().push(initial_message.to_string());
            if self.grant {
                *self.owner_granted.lock().unwrap() = true;
                self.posts.lock().unwrap().push(initial_message.to_string());
            }
            self.grant
        }

        fn can_post(&self, _requester_id: &str) -> bool {
            *self.owner_granted.lock().unwrap()
        }

        fn post_message(&self, text: &str, _requester_id: &str) {
            self.posts.lock().unwrap().push(text.to_string());
        }

        fn subscribe_to_ownership_changes(&self, _callback: super::super::broadcast::OwnershipCallback) {}
    }

    fn states(entries: &[(&str, FileState)]) -> HashMap<String, FileState> {
        entries
            .iter()
            .map(|(path, state)| (path.to_string(), *state))
            .collect()
    }

    #[test]
    fn test_phase_rules_in_order() {
        let broadcaster = FakeBroadcaster::new(true);
        let mut tracker = PhaseTracker::new(broadcaster, "tracker");

        assert_eq!(tracker.update(&states(&[])).phase, Phase::Thinking);

        let info = tracker.update(&states(&[("src/main.mo", FileState::Detected)]));
        assert_eq!(info.phase, Phase::Detecting);

        let info = tracker.update(&states(&[
            ("src/main.mo", FileState::Writing),
            ("src/App.tsx", FileState::Detected),
        ]));
        assert_eq!(info.phase, Phase::Generating);

        let info = tracker.update(&states(&[
            ("src/main.mo", FileState::Complete),
            ("src/App.tsx", FileState::Detected),
        ]));
        assert_eq!(info.phase, Phase::Completing);

        let info = tracker.update(&states(&[
            ("src/main.mo", FileState::Complete),
            ("src/App.tsx", FileState::Complete),
        ]));
        assert_eq!(info.phase, Phase::Complete);
        assert_eq!(info.progress, 100);
    }

    #[test]
    fn test_progress_weighting() {
        let broadcaster = FakeBroadcaster::new(true);
        let mut tracker = PhaseTracker::new(broadcaster, "tracker");

        // 1 complete + 0.3 writing over 2 files = 65%
        let info = tracker.update(&states(&[
            ("a.mo", FileState::Complete),
            ("b.tsx", FileState::Writing),
        ]));
        assert_eq!(info.progress, 65);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let broadcaster = FakeBroadcaster::new(true);
        let mut tracker = PhaseTracker::new(broadcaster, "tracker");

        let sequences: &[&[(&str, FileState)]] = &[
            &[("a.mo", FileState::Writing), ("b.tsx", FileState::Detected)],
            &[("a.mo", FileState::Complete), ("b.tsx", FileState::Detected)],
            &[("a.mo", FileState::Complete), ("b.tsx", FileState::Writing)],
            &[("a.mo", FileState::Complete), ("b.tsx", FileState::Complete)],
        ];

        let mut last = 0;
        for seq in sequences {
            let info = tracker.update(&states(seq));
            assert!(
                info.progress >= last,
                "progress went backwards: {} -> {}",
                last,
                info.progress
            );
            last = info.progress;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_messages_follow_current_file_and_hide_counts() {
        let broadcaster = FakeBroadcaster::new(true);
        let mut tracker = PhaseTracker::new(broadcaster, "tracker");

        let info = tracker.update(&states(&[("src/main.mo", FileState::Writing)]));
        assert_eq!(info.message, "Building the backend logic...");

        let info = tracker.update(&states(&[
            ("src/main.mo", FileState::Complete),
            ("src/App.tsx", FileState::Writing),
        ]));
        assert_eq!(info.message, "Building the main interface...");

        let info = tracker.update(&states(&[
            ("src/main.mo", FileState::Complete),
            ("src/index.css", FileState::Writing),
        ]));
        assert_eq!(info.message, "Styling the interface...");
        // File counts are never part of the display message.
        assert!(!info.message.contains('2'));
    }

    #[test]
    fn test_unowned_update_forces_handoff_request() {
        let broadcaster = FakeBroadcaster::new(false);
        let mut tracker = PhaseTracker::new(broadcaster.clone(), "tracker");

        tracker.update(&states(&[("a.mo", FileState::Writing)]));
        assert_eq!(broadcaster.requests().len(), 1);
        assert!(broadcaster.posts().is_empty());
    }

    #[test]
    fn test_ownership_loss_clears_activation_state() {
        let broadcaster = FakeBroadcaster::new(true);
        let mut tracker = PhaseTracker::new(broadcaster, "tracker");
        tracker.set_app_name("Tasks");

        let info = tracker.update(&states(&[("a.mo", FileState::Complete)]));
        assert_eq!(info.message, "Tasks is ready.");
        assert_eq!(info.progress, 100);

        tracker.on_ownership_changed("someone-else");

        // Re-activation starts clean: app name gone, progress floor reset.
        let info = tracker.update(&states(&[("a.mo", FileState::Writing)]));
        assert_eq!(info.progress, 30);
        assert_eq!(info.message, "Building the backend logic...");
    }

    #[test]
    fn test_reentrancy_guard_returns_stable_state() {
        let broadcaster = FakeBroadcaster::new(true);
        let mut tracker = PhaseTracker::new(broadcaster, "tracker");

        let stable = tracker.update(&states(&[("a.mo", FileState::Writing)]));

        tracker.force_depth(MAX_UPDATE_DEPTH);
        let info = tracker.update(&states(&[("a.mo", FileState::Complete)]));
        assert_eq!(info.phase, stable.phase);
        assert_eq!(info.progress, stable.progress);

        // Depth counter was reset; the next update proceeds normally.
        let info = tracker.update(&states(&[("a.mo", FileState::Complete)]));
        assert_eq!(info.phase, Phase::Complete);
    }
}

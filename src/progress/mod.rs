//! File-generation progress: phase tracking and status broadcasting.

mod broadcast;
mod tracker;

pub use broadcast::{ConsoleBroadcaster, StatusBroadcaster};
pub use tracker::{FilePhaseInfo, Phase, PhaseTracker};

/// Detection state of one generated file, as reported by the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Detected,
    Writing,
    Complete,
}

impl FileState {
    /// Parse the wire representation. Unknown values yield `None` and are
    /// ignored by the processor.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "detected" => Some(FileState::Detected),
            "writing" => Some(FileState::Writing),
            "complete" => Some(FileState::Complete),
            _ => None,
        }
    }
}

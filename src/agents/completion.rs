//! Completion Detection - detects the semantic "task complete" marker
//!
//! The marker is a content-level contract: an agent may exit 0 without being
//! done, or print the marker and then crash. The supervisor reports both
//! signals and the engine combines them.

use crate::config::CompletionConfig;

/// Completion detector for agent output
#[derive(Debug, Clone)]
pub struct CompletionDetector {
    /// The marker string to look for
    marker: String,
    /// Maximum lines from end to check (prevents matching the marker when it
    /// is merely quoted early in the output, e.g. echoed from the prompt)
    max_lines_from_end: usize,
}

impl CompletionDetector {
    /// Create a new completion detector
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
            max_lines_from_end: 50,
        }
    }

    pub fn from_config(config: &CompletionConfig) -> Self {
        Self::new(&config.marker).with_max_lines(config.max_lines_from_end)
    }

    /// Set custom max lines to check
    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines_from_end = max_lines;
        self
    }

    /// Check if the output contains the completion marker in its last N lines
    pub fn check(&self, output: &str) -> bool {
        if self.marker.is_empty() {
            return false;
        }
        let lines: Vec<&str> = output.lines().collect();
        let start_line = lines.len().saturating_sub(self.max_lines_from_end);
        lines[start_line..]
            .iter()
            .any(|line| line.contains(&self.marker))
    }

    /// Get the marker string
    pub fn marker(&self) -> &str {
        &self.marker
    }
}

// Capacity error detection for agent processes
//
// A capacity error means the provider has no room for the request right now
// (quota exhausted, model overloaded, HTTP 429). It is retryable and, once
// retries run out, a reason to switch to a fallback model.

use crate::config::RetryConfig;
use regex::{Regex, RegexBuilder};

/// Capacity detector built from the configured substring patterns
#[derive(Debug, Clone)]
pub struct CapacityDetector {
    patterns: Vec<(String, Regex)>,
}

impl CapacityDetector {
    /// Compile each pattern as a case-insensitive literal.
    /// Patterns that fail to compile are skipped with a warning.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let patterns = patterns
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .filter_map(|p| {
                match RegexBuilder::new(&regex::escape(p))
                    .case_insensitive(true)
                    .build()
                {
                    Ok(regex) => Some((p.to_string(), regex)),
                    Err(e) => {
                        log::warn!("[CapacityDetector] Skipping pattern {:?}: {}", p, e);
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(&config.capacity_patterns)
    }

    /// Return the first configured pattern found in `text`
    pub fn detect(&self, text: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, regex)| regex.is_match(text))
            .map(|(pattern, _)| pattern.as_str())
    }

    pub fn is_capacity_error(&self, text: &str) -> bool {
        self.detect(text).is_some()
    }

    /// Check every text a failed invocation produced
    pub fn detect_any<'a, I>(&self, texts: I) -> Option<&str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        texts.into_iter().find_map(|text| self.detect(text))
    }
}

impl Default for CapacityDetector {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

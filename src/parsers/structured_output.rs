// Structured output parser - recovers a review verdict from agent responses
//
// Agent output is not guaranteed to be pure JSON even when asked for it, so
// candidates are tried in order and the first one carrying a verdict wins:
// 1. the whole trimmed text
// 2. the first ```json (or unlabeled) fenced block
// 3. every top-level balanced `{...}` span, left to right

use crate::models::{ReviewFeedback, Verdict};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Issue recorded when no candidate parsed but the text signals failure
pub const PARSE_FAILED_ISSUE: &str =
    "parse failed: the review output did not contain a valid JSON verdict";

/// Sub-fields concatenated, in this order, when a list item is an object
const ITEM_FIELDS: &[(&str, &str)] = &[
    ("id", ""),
    ("requirement", ""),
    ("issue", ""),
    ("reason", "reason: "),
    ("action", "action: "),
    ("section", "section: "),
    ("sectionRef", "section: "),
    ("section_ref", "section: "),
];

static FENCE_REGEX: OnceLock<Regex> = OnceLock::new();

fn fence_regex() -> &'static Regex {
    FENCE_REGEX.get_or_init(|| {
        Regex::new(r"```([A-Za-z0-9_-]*)[ \t]*\r?\n([\s\S]*?)```").expect("fence regex is valid")
    })
}

/// Extract review feedback from free-form agent output.
///
/// Returns `None` when nothing parses and the text carries no failure signal;
/// the caller reports that as an extraction error.
pub fn extract_review_feedback(text: &str) -> Option<ReviewFeedback> {
    if let Some(feedback) = candidates(text).find_map(parse_candidate) {
        return Some(feedback);
    }

    if text.to_lowercase().contains("fail") {
        log::warn!("[StructuredOutput] No JSON verdict found, synthesizing FAIL");
        return Some(ReviewFeedback {
            verdict: Verdict::Fail,
            missing_requirements: vec![PARSE_FAILED_ISSUE.to_string()],
            ..Default::default()
        });
    }

    log::debug!("[StructuredOutput] No verdict and no failure signal in output");
    None
}

/// Lazily yields candidate JSON texts in strategy order
fn candidates(text: &str) -> impl Iterator<Item = &str> {
    let trimmed = text.trim();
    std::iter::once(trimmed)
        .filter(|t| !t.is_empty())
        .chain(first_json_fence(text))
        .chain(BalancedObjects::new(text))
}

/// First fenced block labeled `json` or unlabeled
fn first_json_fence(text: &str) -> Option<&str> {
    fence_regex()
        .captures_iter(text)
        .find(|cap| {
            let label = cap.get(1).map(|m| m.as_str()).unwrap_or("");
            label.is_empty() || label.eq_ignore_ascii_case("json")
        })
        .and_then(|cap| cap.get(2))
        .map(|m| m.as_str().trim())
}

/// Iterator over top-level balanced `{...}` spans, string-literal aware
struct BalancedObjects<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> BalancedObjects<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }
}

impl<'a> Iterator for BalancedObjects<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        loop {
            match self.scan() {
                Scan::Closed(span) => return Some(span),
                // An unclosed `{` must not hide objects opened after it
                Scan::Unclosed(start) => self.pos = start + 1,
                Scan::Exhausted => return None,
            }
        }
    }
}

enum Scan<'a> {
    Closed(&'a str),
    Unclosed(usize),
    Exhausted,
}

impl<'a> BalancedObjects<'a> {
    /// Scan forward from `pos` to the end of the next top-level span
    fn scan(&mut self) -> Scan<'a> {
        let bytes = self.text.as_bytes();
        let mut depth = 0usize;
        let mut start = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        while self.pos < bytes.len() {
            let i = self.pos;
            let b = bytes[i];
            self.pos += 1;

            if depth > 0 && in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }

            match b {
                b'"' if depth > 0 => in_string = true,
                b'{' => {
                    if depth == 0 {
                        start = i;
                    }
                    depth += 1;
                }
                b'}' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        return Scan::Closed(&self.text[start..=i]);
                    }
                }
                _ => {}
            }
        }
        if depth > 0 {
            Scan::Unclosed(start)
        } else {
            Scan::Exhausted
        }
    }
}

fn parse_candidate(candidate: &str) -> Option<ReviewFeedback> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let obj = value.as_object()?;

    let verdict = obj.get("verdict")?.as_str()?.trim();
    if verdict.is_empty() {
        return None;
    }

    Some(ReviewFeedback {
        verdict: if verdict.eq_ignore_ascii_case("PASS") {
            Verdict::Pass
        } else {
            Verdict::Fail
        },
        missing_requirements: string_list(obj, &["missingRequirements", "missing_requirements"]),
        contradictions: string_list(obj, &["contradictions"]),
        dependency_errors: string_list(obj, &["dependencyErrors", "dependency_errors"]),
        duplicates: string_list(obj, &["duplicates"]),
        suggestions: string_list(obj, &["suggestions"]),
        task_groupings: field(obj, &["taskGroupings", "task_groupings"])
            .and_then(|v| v.as_array())
            .cloned(),
        standalone_tasks: field(obj, &["standaloneTasks", "standalone_tasks"])
            .map(coerce_list),
    })
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| obj.get(*key))
}

fn string_list(obj: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    field(obj, keys).map(coerce_list).unwrap_or_default()
}

/// Coerce a list field to strings; a scalar becomes a one-item list
fn coerce_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(item_to_string).collect(),
        other => item_to_string(other).into_iter().collect(),
    }
}

fn item_to_string(item: &Value) -> Option<String> {
    match item {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => {
            let known = ITEM_FIELDS.iter().filter_map(|(key, label)| {
                let text = field_text(obj.get(*key)?)?;
                Some(format!("{}{}", label, text))
            });
            // Fields outside the known set follow as `key: value`
            let extra = obj
                .iter()
                .filter(|(key, _)| !ITEM_FIELDS.iter().any(|(known, _)| *known == key.as_str()))
                .filter_map(|(key, value)| Some(format!("{}: {}", key, field_text(value)?)));
            let parts: Vec<String> = known.chain(extra).collect();
            if parts.is_empty() {
                Some(item.to_string())
            } else {
                Some(parts.join(" - "))
            }
        }
        other => Some(other.to_string()),
    }
}

/// Text of one sub-field; `None` for null or blank values
fn field_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => return None,
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

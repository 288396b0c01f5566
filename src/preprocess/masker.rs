//! Placeholder masking and restoration.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::{Captures, Regex};

use super::extractor::LockedSpan;

/// Flexible pattern for matching type-specific placeholders in LLM output.
/// Handles variations: `{{DATE_1}}`, `{{ DATE_1 }}`, `{{DATE-1}}`, etc.
fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*([A-Z]+)[-_](\d+)\s*\}\}").unwrap())
}

/// Result of restoring placeholders in raw model output.
#[derive(Debug, Clone)]
pub struct UnmaskResult {
    pub text: String,
    pub missing_spans: Vec<LockedSpan>,
}

/// Replace locked spans in the original text with their placeholders.
///
/// Spans must be sorted by start position ascending.
pub fn mask(text: &str, spans: &[LockedSpan]) -> String {
    if spans.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut last_end = 0usize;

    for span in spans {
        out.push_str(&text[last_end..span.start]);
        out.push_str(&span.placeholder);
        last_end = span.end;
    }
    out.push_str(&text[last_end..]);
    out
}

/// Restore placeholders in the LLM output with their original text.
///
/// Uses flexible matching to handle minor LLM variations in placeholder
/// format. Spans whose placeholder never appears (and whose original text is
/// absent) are reported as missing for the validator.
pub fn unmask(output: &str, spans: &[LockedSpan]) -> UnmaskResult {
    if spans.is_empty() {
        return UnmaskResult {
            text: output.to_string(),
            missing_spans: Vec::new(),
        };
    }

    let span_map: HashMap<&str, &LockedSpan> =
        spans.iter().map(|s| (s.placeholder.as_str(), s)).collect();

    let mut restored: HashSet<String> = HashSet::new();

    let result = placeholder_pattern()
        .replace_all(output, |caps: &Captures| {
            let canonical = format!("{{{{{}_{}}}}}", &caps[1], &caps[2]);
            match span_map.get(canonical.as_str()) {
                Some(span) => {
                    restored.insert(canonical);
                    span.original_text.clone()
                }
                None => {
                    tracing::warn!("LockedSpan placeholder {} not found in span map", canonical);
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    let mut missing_spans = Vec::new();
    for span in spans {
        if !restored.contains(&span.placeholder) {
            tracing::warn!(
                "LockedSpan missing in output: placeholder={}, kind={:?}, text='{}'",
                span.placeholder,
                span.kind,
                span.original_text
            );
            if !result.contains(&span.original_text) {
                missing_spans.push(span.clone());
            } else {
                tracing::info!(
                    "LockedSpan {} found as verbatim text in output (LLM preserved without placeholder)",
                    span.placeholder
                );
            }
        }
    }

    UnmaskResult {
        text: result,
        missing_spans,
    }
}

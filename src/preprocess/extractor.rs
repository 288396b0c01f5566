//! Locked-span extraction.
//!
//! Applies a fixed, priority-ordered regex set over the normalized text and
//! resolves overlaps by keeping the longest-at-leftmost match. Every surviving
//! span receives a type-scoped placeholder `{{PREFIX_k}}`.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// What kind of surface form a locked span captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockedSpanKind {
    Email,
    Url,
    Phone,
    Account,
    Date,
    Time,
    TimeHhMm,
    Money,
    UnitNumber,
    LargeNumber,
    Uuid,
    FilePath,
    IssueTicket,
    Version,
    QuotedText,
    Identifier,
    HashCommit,
    Semantic,
}

impl LockedSpanKind {
    /// Placeholder prefix. Several kinds share one prefix (and therefore one
    /// counter): both time shapes are `TIME`, both number shapes are `NUMBER`.
    pub fn placeholder_prefix(&self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Url => "URL",
            Self::Phone => "PHONE",
            Self::Account => "ACCOUNT",
            Self::Date => "DATE",
            Self::Time | Self::TimeHhMm => "TIME",
            Self::Money => "MONEY",
            Self::UnitNumber | Self::LargeNumber => "NUMBER",
            Self::Uuid => "UUID",
            Self::FilePath => "FILE",
            Self::IssueTicket => "TICKET",
            Self::Version => "VERSION",
            Self::QuotedText => "QUOTE",
            Self::Identifier => "ID",
            Self::HashCommit => "HASH",
            Self::Semantic => "NAME",
        }
    }

    /// Stable wire name, used by the `spans` stream event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Url => "URL",
            Self::Phone => "PHONE",
            Self::Account => "ACCOUNT",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::TimeHhMm => "TIME_HH_MM",
            Self::Money => "MONEY",
            Self::UnitNumber => "UNIT_NUMBER",
            Self::LargeNumber => "LARGE_NUMBER",
            Self::Uuid => "UUID",
            Self::FilePath => "FILE_PATH",
            Self::IssueTicket => "ISSUE_TICKET",
            Self::Version => "VERSION",
            Self::QuotedText => "QUOTED_TEXT",
            Self::Identifier => "IDENTIFIER",
            Self::HashCommit => "HASH_COMMIT",
            Self::Semantic => "SEMANTIC",
        }
    }
}

/// A substring that must survive the pipeline verbatim.
///
/// `start`/`end` are byte offsets into the normalized text. Spans are
/// non-overlapping and sorted by start; placeholders are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedSpan {
    pub index: usize,
    pub original_text: String,
    pub placeholder: String,
    pub kind: LockedSpanKind,
    pub start: usize,
    pub end: usize,
}

struct RawMatch {
    start: usize,
    end: usize,
    kind: LockedSpanKind,
}

fn pattern_set() -> &'static Vec<(Regex, LockedSpanKind)> {
    static PATTERNS: OnceLock<Vec<(Regex, LockedSpanKind)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // 1. Email
            (
                Regex::new(r"[\w]+(?:[.+\-][\w]+)*@[\w]+(?:[\-][\w]+)*(?:\.[a-zA-Z]{2,})+")
                    .unwrap(),
                LockedSpanKind::Email,
            ),
            // 2. URL
            (
                Regex::new(r"(?:https?://|www\.)[\w\-.~:/?#\[\]@!$&'()*+,;=%]+[\w/=]").unwrap(),
                LockedSpanKind::Url,
            ),
            // 3. Phone number
            (
                Regex::new(r"0\d{1,2}[\-.]\d{3,4}[\-.]\d{4}").unwrap(),
                LockedSpanKind::Phone,
            ),
            // 4. Account number
            (
                Regex::new(r"\d{2,6}-\d{2,6}-\d{4,12}").unwrap(),
                LockedSpanKind::Account,
            ),
            // 5. Korean date
            (
                Regex::new(
                    r"(?:\d{2,4}년\s*)?\d{1,2}월\s*\d{1,2}일|\d{2,4}년\s*\d{1,2}월|\d{4}[./\-]\d{1,2}[./\-]\d{1,2}",
                )
                .unwrap(),
                LockedSpanKind::Date,
            ),
            // 6. Korean time
            (
                Regex::new(
                    r"(?:오전|오후|새벽|저녁|밤)?\s*\d{1,2}(?:시\s*\d{1,2}분?)?(?:\s*~\s*\d{1,2}(?:시(?:\s*\d{1,2}분?)?)?)?(?:시|분)",
                )
                .unwrap(),
                LockedSpanKind::Time,
            ),
            // 7. HH:MM
            (
                Regex::new(r"(?:[01]?\d|2[0-3]):\d{2}").unwrap(),
                LockedSpanKind::TimeHhMm,
            ),
            // 8. Money
            (
                Regex::new(r"\d[\d,]*(?:\.\d+)?\s*(?:만\s*)?원").unwrap(),
                LockedSpanKind::Money,
            ),
            // 9. Numbers with units
            (
                Regex::new(
                    r"\d[\d,]*(?:\.\d+)?\s*(?:자리|개|건|명|장|통|호|층|평|kg|cm|mm|km|%|주|일|개월|년|시간|분|초)",
                )
                .unwrap(),
                LockedSpanKind::UnitNumber,
            ),
            // 10. Large standalone numbers
            (
                Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d{5,}").unwrap(),
                LockedSpanKind::LargeNumber,
            ),
            // 11. UUID
            (
                Regex::new(
                    r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
                )
                .unwrap(),
                LockedSpanKind::Uuid,
            ),
            // 12. File path / filename with extension whitelist
            (
                Regex::new(
                    r"(?i)(?:[\w./\\\-]+/)?[\w.\-]+\.(?:pdf|doc|docx|xls|xlsx|ppt|pptx|csv|txt|md|json|xml|yaml|yml|html|css|js|ts|tsx|jsx|java|py|rb|go|rs|cpp|c|h|hpp|sh|bat|sql|log|zip|tar|gz|rar|7z|png|jpg|jpeg|gif|svg|mp4|mp3|wav|avi|exe|app|msi|dmg|apk|ipa|iso|img|bak|cfg|ini|env|toml|lock|pid)\b",
                )
                .unwrap(),
                LockedSpanKind::FilePath,
            ),
            // 13. Issue/ticket references
            (
                Regex::new(r"#\d{1,6}|[A-Z]{2,10}-\d{1,6}").unwrap(),
                LockedSpanKind::IssueTicket,
            ),
            // 14. Version numbers
            (
                Regex::new(r"v?\d{1,4}\.\d{1,4}(?:\.\d{1,4})?").unwrap(),
                LockedSpanKind::Version,
            ),
            // 15. Quoted text (2-60 chars inside matched quotes)
            (
                Regex::new(
                    "\"[^\"]{2,60}\"|'[^']{2,60}'|\u{201C}[^\u{201C}\u{201D}]{2,60}\u{201D}|\u{2018}[^\u{2018}\u{2019}]{2,60}\u{2019}",
                )
                .unwrap(),
                LockedSpanKind::QuotedText,
            ),
            // 16. Identifiers: camelCase (>=5 chars), snake_case (2+ segments),
            //     PascalCase, optional trailing ()
            (
                Regex::new(
                    r"\b(?:[a-z][a-zA-Z0-9]*[A-Z][a-zA-Z0-9]{2,}|[a-z]+(?:_[a-z]+)+|[A-Z][a-z]+(?:[A-Z][a-z]+)+)(?:\(\))?\b",
                )
                .unwrap(),
                LockedSpanKind::Identifier,
            ),
            // 17. Git commit hashes (7-40 hex chars)
            (
                Regex::new(r"\b[0-9a-f]{7,40}\b").unwrap(),
                LockedSpanKind::HashCommit,
            ),
        ]
    })
}

/// Extract all locked spans from the given text.
///
/// Overlapping matches are resolved by keeping the longer match. Returns
/// non-overlapping locked spans sorted by start position.
pub fn extract(text: &str) -> Vec<LockedSpan> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut raw: Vec<RawMatch> = Vec::new();
    for (pattern, kind) in pattern_set() {
        for m in pattern.find_iter(text) {
            raw.push(RawMatch {
                start: m.start(),
                end: m.end(),
                kind: *kind,
            });
        }
    }

    // Sort by start ascending, then length descending (longer first)
    raw.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then((b.end - b.start).cmp(&(a.end - a.start)))
    });

    let resolved = resolve_overlaps(raw);

    let mut spans = Vec::with_capacity(resolved.len());
    let mut prefix_counters: HashMap<&'static str, usize> = HashMap::new();
    for m in resolved {
        let prefix = m.kind.placeholder_prefix();
        let counter = prefix_counters.entry(prefix).or_insert(0);
        *counter += 1;
        spans.push(LockedSpan {
            index: *counter,
            original_text: text[m.start..m.end].to_string(),
            placeholder: format!("{{{{{}_{}}}}}", prefix, counter),
            kind: m.kind,
            start: m.start,
            end: m.end,
        });
    }

    spans
}

fn resolve_overlaps(sorted: Vec<RawMatch>) -> Vec<RawMatch> {
    let mut result: Vec<RawMatch> = Vec::new();
    let mut last_end = 0usize;
    let mut first = true;

    for m in sorted {
        if first || m.start >= last_end {
            last_end = m.end;
            first = false;
            result.push(m);
        }
        // overlapping or fully contained: skip
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_email_extraction() {
        let spans = extract("내일까지 user@example.com 으로 보고서 보내주세요");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, LockedSpanKind::Email);
        assert_eq!(spans[0].original_text, "user@example.com");
        assert_eq!(spans[0].placeholder, "{{EMAIL_1}}");
    }

    #[test]
    fn test_type_scoped_counters() {
        let spans = extract("a@b.com 그리고 c@d.org 로 3월 15일 까지요");
        let emails: Vec<_> = spans
            .iter()
            .filter(|s| s.kind == LockedSpanKind::Email)
            .collect();
        assert_eq!(emails[0].placeholder, "{{EMAIL_1}}");
        assert_eq!(emails[1].placeholder, "{{EMAIL_2}}");
        assert!(spans.iter().any(|s| s.placeholder == "{{DATE_1}}"));
    }

    #[test]
    fn test_spans_disjoint_and_sorted() {
        let text = "2024-03-15 10:30 에 report_final.xlsx 를 user@example.com 으로 PROJ-123 건으로 보내세요. 총 50,000원 입니다.";
        let spans = extract(text);
        assert!(!spans.is_empty());
        for w in spans.windows(2) {
            assert!(w[0].end <= w[1].start, "{:?} overlaps {:?}", w[0], w[1]);
        }
    }

    #[test]
    fn test_overlap_keeps_longer() {
        // The Korean date pattern should win over the bare version-like numbers
        let spans = extract("2024년 3월 15일 회의");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, LockedSpanKind::Date);
        assert_eq!(spans[0].original_text, "2024년 3월 15일");
    }

    #[test]
    fn test_file_and_ticket() {
        let spans = extract("report_final.xlsx 파일과 #1234 이슈 확인 부탁드립니다");
        assert!(spans
            .iter()
            .any(|s| s.kind == LockedSpanKind::FilePath && s.original_text == "report_final.xlsx"));
        assert!(spans
            .iter()
            .any(|s| s.kind == LockedSpanKind::IssueTicket && s.original_text == "#1234"));
    }

    #[test]
    fn test_placeholders_unique() {
        let text = "10:30 회의, 14:00 회의, 50000개, 1,234,567원";
        let spans = extract(text);
        let mut seen = std::collections::HashSet::new();
        for s in &spans {
            assert!(seen.insert(s.placeholder.clone()), "dup {}", s.placeholder);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(extract("").is_empty());
    }
}

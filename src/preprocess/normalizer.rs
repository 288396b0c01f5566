//! Text normalization - the canonical coordinate space for the pipeline.
//!
//! Offsets everywhere downstream refer to the string this module produces.

use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

struct NormalizerPatterns {
    invisible: Regex,
    control: Regex,
    multi_space: Regex,
    excessive_newlines: Regex,
}

fn patterns() -> &'static NormalizerPatterns {
    static PATTERNS: OnceLock<NormalizerPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| NormalizerPatterns {
        // Zero-width and invisible code points (ZWSP, ZWNJ, ZWJ, BOM, soft
        // hyphen, word joiner, Mongolian vowel separator)
        invisible: Regex::new("[\u{200B}\u{200C}\u{200D}\u{FEFF}\u{00AD}\u{2060}\u{180E}]")
            .unwrap(),
        // Control characters except \n, \r, \t
        control: Regex::new("[\u{0000}-\u{0008}\u{000B}\u{000C}\u{000E}-\u{001F}\u{007F}]")
            .unwrap(),
        multi_space: Regex::new(r"[ \t]{2,}").unwrap(),
        excessive_newlines: Regex::new(r"\n{3,}").unwrap(),
    })
}

/// 7-step text normalization.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let p = patterns();

    // 1. Unicode NFC
    let result: String = text.nfc().collect();

    // 2. Remove invisible characters
    let result = p.invisible.replace_all(&result, "");

    // 3. Remove control characters (except \n, \r, \t)
    let result = p.control.replace_all(&result, "");

    // 4. Canonicalize line endings
    let result = result.replace("\r\n", "\n").replace('\r', "\n");

    // 5. Collapse runs of spaces/tabs to one space
    let result = p.multi_space.replace_all(&result, " ");

    // 6. Collapse 3+ newlines to 2
    let result = p.excessive_newlines.replace_all(&result, "\n\n");

    // 7. Trim
    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_collapses_spaces_preserves_newlines() {
        assert_eq!(normalize("안녕   하세요\n반갑습니다"), "안녕 하세요\n반갑습니다");
    }

    #[test]
    fn test_crlf_and_excessive_newlines() {
        assert_eq!(normalize("a\r\nb\n\n\n\nc"), "a\nb\n\nc");
    }

    #[test]
    fn test_strips_invisible_and_control() {
        assert_eq!(normalize("가\u{200B}나\u{0007}다"), "가나다");
    }

    #[test]
    fn test_nfc_composition() {
        // Decomposed Hangul (U+1112 U+1161 U+11AB) composes to 한
        let decomposed = "\u{1112}\u{1161}\u{11AB}";
        assert_eq!(normalize(decomposed), "한");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "내일까지  보고서   제출해주세요\r\n\r\n\r\n감사합니다",
            "탭\t\t문자",
            "  트림  ",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_empty() {
        assert_eq!(normalize(""), "");
    }
}

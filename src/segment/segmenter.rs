//! Precision-first 7-stage hierarchical text segmenter. No LLM calls.
//!
//! Pipeline:
//!   1. Strong structural boundaries (confidence: 1.0)
//!      - blank lines, explicit separators (---/===/___), bullets, numbered lists
//!   2. Korean sentence endings (confidence: 0.95)
//!      - formal/polite/casual/narrative alternations + connective suppression
//!   3. Weak punctuation boundaries (confidence: 0.9)
//!   4. Length-based safety split (confidence: 0.85)
//!      - split at nearest weak boundary near the midpoint, postposition avoidance
//!   5. Enumeration detection (confidence: 0.9)
//!      - comma lists, delimiter lists, parallel ~go structure (long units only)
//!   6. Discourse marker split (confidence: 0.88)
//!      - sentence-start only, length-restricted, compound exclusion
//!   7. Over-segmentation merge
//!      - 3+ consecutive <5 char units merged, placeholder boundary protection
//!
//! The regex crate has no lookbehind, so boundary patterns capture their
//! anchor group and the split point is derived from the group span instead.
//! Positions are byte offsets; length thresholds count chars.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::settings;
use crate::types::Segment;

/// Segmenter length knobs.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub max_segment_length: usize,
    pub discourse_marker_min_length: usize,
    pub enumeration_min_length: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            max_segment_length: 250,
            discourse_marker_min_length: 150,
            enumeration_min_length: 120,
        }
    }
}

impl SegmenterConfig {
    fn from_settings() -> Self {
        let s = settings();
        Self {
            max_segment_length: s.segmenter_max_segment_length,
            discourse_marker_min_length: s.segmenter_discourse_marker_min_length,
            enumeration_min_length: s.segmenter_enumeration_min_length,
        }
    }
}

// ── Internal types ──

#[derive(Debug, Clone)]
struct SplitUnit {
    text: String,
    start: usize,
    end: usize,
    confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtectedKind {
    Placeholder,
    Parenthetical,
    Quoted,
}

#[derive(Debug, Clone, Copy)]
struct ProtectedRange {
    start: usize,
    end: usize,
    kind: ProtectedKind,
}

/// How a pattern's match maps to the removed boundary region.
#[derive(Debug, Clone, Copy)]
enum BoundaryMode {
    /// The whole match is the boundary.
    WholeMatch,
    /// The first participating capture group is the boundary.
    Capture,
    /// Boundary runs from the first participating group's end to match end
    /// (the group is the sentence ending that stays in the left part).
    AfterCapture,
    /// Zero-width boundary right before the first participating group.
    BeforeCapture,
}

const MIN_SEGMENT_LENGTH: usize = 5;
const MIN_SHORT_CONSECUTIVE: usize = 3;

// ── Patterns ──

struct Patterns {
    placeholder: Regex,
    blank_line: Regex,
    explicit_separator: Regex,
    bullet: Regex,
    numbered_list: Regex,
    ending_formal: Regex,
    ending_polite: Regex,
    ending_casual: Regex,
    ending_narrative: Regex,
    weak_boundary: Regex,
    comma_list: Regex,
    delimiter_list: Regex,
    parallel_go: Regex,
    discourse_marker_split: Regex,
    paren: Regex,
    quote: Regex,
}

const DISCOURSE_MARKER_ALTERNATIVES: &str = "그리고|또한|게다가|더구나|심지어|\
그런데|근데|하지만|그러나|그래도|반면|한편|오히려|그렇지만|\
그래서|그러므로|결국|그러니까|그러니|결과적으로|\
그러면|그럼|그렇다면|만약|만일|아니면|\
아무튼|어쨌든|어쨌거나|그나저나|암튼|\
마지막으로|끝으로|첫째|둘째|셋째|\
결론적으로|왜냐하면|왜냐면";

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        placeholder: Regex::new(r"\{\{[A-Z]+_\d+\}\}").unwrap(),
        blank_line: Regex::new(r"\n\n+").unwrap(),
        explicit_separator: Regex::new(r"(?m)(?:^|\n)[-=_]{3,}[ \t]*(?:\n|$)").unwrap(),
        bullet: Regex::new("\n([-*\u{2022}]\\s)").unwrap(),
        numbered_list: Regex::new("\n(\\d{1,3}[.)]\\s|[\u{2460}-\u{2473}]\\s?)").unwrap(),
        ending_formal: Regex::new(
            "(겠습니다|하십시오|겠습니까|\
             습니다|입니다|됩니다|합니다|답니다|랍니다|십니다|\
             습니까|입니까|됩니까|합니까|십니까|십시오\
             )(?:\\s+|[.!?\u{2026}~;]\\s*)",
        )
        .unwrap(),
        ending_polite: Regex::new(
            "(는데요|거든요|잖아요|니까요|라서요|던가요|텐데요|다고요|라고요|냐고요|자고요|은데요|던데요|\
             세요|에요|해요|예요|네요|군요|지요|어요|아요|게요|래요|나요|가요|고요|서요|걸요|대요|까요|셔요|구요\
             )(?:\\s+|[.!?\u{2026}~;]\\s*)",
        )
        .unwrap(),
        ending_casual: Regex::new(
            "([았었했됐갔왔봤줬났겠셨]어|같어|않아|없어|있어|못해|\
             [았었했됐겠셨]지|\
             거든|잖아|는데|인데|한데|은데|던데|텐데|더라|니까|\
             할래|할게|갈게|볼게|줄게|을래|을게|을걸|\
             하자|해라|해봐|구나|구먼|이야|거야|건데|\
             다며|다더라|그치|시죠|던가\
             )(?:\\s+|[.!?\u{2026}~;]\\s*)",
        )
        .unwrap(),
        ending_narrative: Regex::new(
            "(하게|하네|하세|\
             [했됐봤왔갔줬났]음|같음|있음|없음|아님|맞음|모름|드림|올림|알림|바람|나름|받음|보냄|\
             [했됐봤왔갔줬났겠]다|있다|없다|같다|한다|된다|간다|온다|는다|\
             됨|임|함|\
             죠|ㅋㅋ|ㅎㅎ|ㅠㅠ|ㅜㅜ\
             )(?:\\s+|[.!?\u{2026}~;]\\s*)",
        )
        .unwrap(),
        weak_boundary: Regex::new("(?m)(?:([.!?;])(?:\\s+|$)|(\u{2026}|\\.{3}|[\u{2014}\u{2013}])\\s*)")
            .unwrap(),
        comma_list: Regex::new(r",\s*").unwrap(),
        delimiter_list: Regex::new("[/\u{00B7}|]\\s*").unwrap(),
        parallel_go: Regex::new("[가-힣](고\\s+)[가-힣]").unwrap(),
        discourse_marker_split: Regex::new(&format!(
            "(?:[.!?;\u{2026}]\\s|\n)((?:{}))\\s",
            DISCOURSE_MARKER_ALTERNATIVES
        ))
        .unwrap(),
        paren: Regex::new(r"\([^)]*\)").unwrap(),
        quote: Regex::new(
            "\"[^\"]*\"|'[^']*'|\u{201C}[^\u{201D}]*\u{201D}|\u{2018}[^\u{2019}]*\u{2019}",
        )
        .unwrap(),
    })
}

/// Endings that can be connective rather than sentence-final.
const AMBIGUOUS_ENDINGS: [&str; 10] = [
    "는데", "인데", "한데", "은데", "던데", "텐데", "니까", "거든", "고", "건데",
];

const DISCOURSE_MARKERS: [&str; 39] = [
    "그리고", "또한", "게다가", "더구나", "심지어",
    "그런데", "근데", "하지만", "그러나", "그래도", "반면", "한편", "오히려", "그렇지만",
    "그래서", "그러므로", "결국", "그러니까", "그러니", "결과적으로",
    "그러면", "그럼", "그렇다면", "만약", "만일", "아니면",
    "아무튼", "어쨌든", "어쨌거나", "그나저나", "암튼",
    "마지막으로", "끝으로", "첫째", "둘째", "셋째",
    "결론적으로", "왜냐하면", "왜냐면",
];

const POSTPOSITIONS: [&str; 26] = [
    "은", "는", "이", "가", "을", "를", "에", "의", "와", "과",
    "로", "도", "만", "까지", "부터", "에서", "처럼", "보다",
    "마다", "밖에", "조차", "든지", "이나", "에게", "한테", "께",
];

/// Compound suffixes that must not be split at a discourse marker.
const COMPOUND_SUFFIXES: [&str; 5] = ["그런데도", "그래서인지", "그러나마나", "하지만서도", "그래도역시"];

// ── Public API ──

/// Segment the masked text into meaning units using configured knobs.
pub fn segment(masked_text: &str) -> Vec<Segment> {
    segment_with(masked_text, &SegmenterConfig::from_settings())
}

/// Segment the masked text into meaning units.
pub fn segment_with(masked_text: &str, config: &SegmenterConfig) -> Vec<Segment> {
    if masked_text.trim().is_empty() {
        return Vec::new();
    }
    let p = patterns();

    let protected = collect_protected_ranges(masked_text);

    let mut units = vec![SplitUnit {
        text: masked_text.to_string(),
        start: 0,
        end: masked_text.len(),
        confidence: 1.0,
    }];

    // Stage 1: strong structural boundaries
    for (pattern, mode) in [
        (&p.blank_line, BoundaryMode::WholeMatch),
        (&p.explicit_separator, BoundaryMode::WholeMatch),
        (&p.bullet, BoundaryMode::Capture),
        (&p.numbered_list, BoundaryMode::Capture),
    ] {
        units = apply_split_pattern(units, pattern, mode, &protected, 1.0, true);
    }

    // Stage 2: Korean sentence endings (with connective suppression)
    for pattern in [
        &p.ending_formal,
        &p.ending_polite,
        &p.ending_casual,
        &p.ending_narrative,
    ] {
        units = split_korean_endings(units, pattern, &protected);
    }

    // Stage 3: weak punctuation boundaries
    units = apply_split_pattern(
        units,
        &p.weak_boundary,
        BoundaryMode::AfterCapture,
        &protected,
        0.9,
        false,
    );

    // Stage 4: length-based safety split
    units = force_split_long(units, &protected, config.max_segment_length);

    // Stage 5: enumeration detection
    units = split_enumerations(units, &protected, config.enumeration_min_length);

    // Stage 6: discourse markers (length-restricted)
    units = split_discourse_markers(units, &protected, config.discourse_marker_min_length);

    // Stage 7: merge over-segmented runs
    units = merge_short_units(units);

    let segments: Vec<Segment> = units
        .iter()
        .enumerate()
        .map(|(i, u)| Segment::new(i + 1, u.text.clone(), u.start, u.end))
        .collect();

    if !units.is_empty() {
        let avg: f64 = units.iter().map(|u| u.confidence).sum::<f64>() / units.len() as f64;
        let min = units.iter().map(|u| u.confidence).fold(1.0f64, f64::min);
        tracing::info!(
            "[Segmenter] {} segments from {} chars - avg confidence={:.2}, min={:.2}",
            segments.len(),
            masked_text.chars().count(),
            avg,
            min
        );
    }

    segments
}

// ── Protected range collection ──

fn collect_protected_ranges(text: &str) -> Vec<ProtectedRange> {
    let p = patterns();
    let mut ranges: Vec<ProtectedRange> = Vec::new();

    for m in p.placeholder.find_iter(text) {
        ranges.push(ProtectedRange {
            start: m.start(),
            end: m.end(),
            kind: ProtectedKind::Placeholder,
        });
    }

    for m in p.paren.find_iter(text) {
        if !overlaps_placeholder(m.start(), m.end(), &ranges) {
            ranges.push(ProtectedRange {
                start: m.start(),
                end: m.end(),
                kind: ProtectedKind::Parenthetical,
            });
        }
    }

    for m in p.quote.find_iter(text) {
        if !overlaps_placeholder(m.start(), m.end(), &ranges) {
            ranges.push(ProtectedRange {
                start: m.start(),
                end: m.end(),
                kind: ProtectedKind::Quoted,
            });
        }
    }

    ranges
}

fn overlaps_placeholder(start: usize, end: usize, ranges: &[ProtectedRange]) -> bool {
    ranges
        .iter()
        .any(|r| r.kind == ProtectedKind::Placeholder && start < r.end && end > r.start)
}

fn is_in_protected(global_pos: usize, ranges: &[ProtectedRange], strong_boundary: bool) -> bool {
    for r in ranges {
        if r.start <= global_pos && global_pos < r.end {
            if r.kind == ProtectedKind::Placeholder {
                return true;
            }
            if !strong_boundary {
                return true;
            }
        }
    }
    false
}

// ── Boundary resolution ──

fn boundary_of(caps: &regex::Captures, mode: BoundaryMode) -> (usize, usize) {
    let whole = caps.get(0).unwrap();
    match mode {
        BoundaryMode::WholeMatch => (whole.start(), whole.end()),
        BoundaryMode::Capture => first_group(caps)
            .map(|g| (g.start(), g.end()))
            .unwrap_or((whole.start(), whole.end())),
        BoundaryMode::AfterCapture => first_group(caps)
            .map(|g| (g.end(), whole.end()))
            .unwrap_or((whole.start(), whole.end())),
        BoundaryMode::BeforeCapture => first_group(caps)
            .map(|g| (g.start(), g.start()))
            .unwrap_or((whole.start(), whole.start())),
    }
}

fn first_group<'t>(caps: &regex::Captures<'t>) -> Option<regex::Match<'t>> {
    (1..caps.len()).find_map(|i| caps.get(i))
}

// ── Generic split utility ──

fn apply_split_pattern(
    units: Vec<SplitUnit>,
    pattern: &Regex,
    mode: BoundaryMode,
    protected: &[ProtectedRange],
    stage_confidence: f64,
    is_strong_boundary: bool,
) -> Vec<SplitUnit> {
    let mut result = Vec::with_capacity(units.len());

    for unit in units {
        if unit.text.chars().count() < 3 {
            result.push(unit);
            continue;
        }

        let mut last_end = 0usize;
        let mut split = false;
        let mut pieces: Vec<SplitUnit> = Vec::new();

        for caps in pattern.captures_iter(&unit.text) {
            let (b_start, b_end) = boundary_of(&caps, mode);
            if b_start < last_end {
                continue;
            }
            if is_in_protected(unit.start + b_start, protected, is_strong_boundary) {
                continue;
            }

            let sub = unit.text[last_end..b_start].trim();
            if !sub.is_empty() {
                let sub_start = unit.start + find_substring_start(&unit.text, last_end, sub);
                pieces.push(SplitUnit {
                    text: sub.to_string(),
                    start: sub_start,
                    end: sub_start + sub.len(),
                    confidence: unit.confidence.min(stage_confidence),
                });
                split = true;
            }
            last_end = b_end;
        }

        if split {
            let tail = unit.text[last_end..].trim();
            if !tail.is_empty() {
                let tail_start = unit.start + find_substring_start(&unit.text, last_end, tail);
                pieces.push(SplitUnit {
                    text: tail.to_string(),
                    start: tail_start,
                    end: tail_start + tail.len(),
                    confidence: unit.confidence.min(stage_confidence),
                });
            }
            result.extend(pieces);
        } else {
            result.push(unit);
        }
    }

    result
}

// ── Stage 2: Korean sentence endings ──

fn split_korean_endings(
    units: Vec<SplitUnit>,
    pattern: &Regex,
    protected: &[ProtectedRange],
) -> Vec<SplitUnit> {
    let mut result = Vec::with_capacity(units.len());

    for unit in units {
        if unit.text.chars().count() < 3 {
            result.push(unit);
            continue;
        }

        let mut split_points: Vec<(usize, usize)> = Vec::new();
        let mut last_end = 0usize;

        for caps in pattern.captures_iter(&unit.text) {
            let whole = caps.get(0).unwrap();
            let ending = caps.get(1).unwrap();
            // The boundary is the whitespace/punct run after the ending.
            let (b_start, b_end) = (ending.end(), whole.end());
            if b_start < last_end {
                continue;
            }
            if is_in_protected(unit.start + b_start, protected, false) {
                continue;
            }

            if let Some(ambiguous) = ambiguous_ending_before(&unit.text, b_start) {
                let len_before = unit.text[last_end..b_start].chars().count();
                if !should_split_ambiguous_ending(&unit.text, b_end, len_before) {
                    tracing::debug!("[Segmenter] Suppressed connective split at '{}'", ambiguous);
                    continue;
                }
            }

            split_points.push((b_start, b_end));
            last_end = b_end;
        }

        if split_points.is_empty() {
            result.push(unit);
            continue;
        }

        let mut prev_end = 0usize;
        for (sp_start, sp_end) in split_points {
            let sub = unit.text[prev_end..sp_start].trim();
            if !sub.is_empty() {
                let sub_start = unit.start + find_substring_start(&unit.text, prev_end, sub);
                result.push(SplitUnit {
                    text: sub.to_string(),
                    start: sub_start,
                    end: sub_start + sub.len(),
                    confidence: unit.confidence.min(0.95),
                });
            }
            prev_end = sp_end;
        }
        let tail = unit.text[prev_end..].trim();
        if !tail.is_empty() {
            let tail_start = unit.start + find_substring_start(&unit.text, prev_end, tail);
            result.push(SplitUnit {
                text: tail.to_string(),
                start: tail_start,
                end: tail_start + tail.len(),
                confidence: unit.confidence.min(0.95),
            });
        }
    }

    result
}

/// If the 1–3 chars before `pos` form an ambiguous (possibly connective)
/// ending, return it.
fn ambiguous_ending_before(text: &str, pos: usize) -> Option<&'static str> {
    let head = &text[..pos];
    let tail_chars: Vec<char> = head.chars().rev().take(3).collect();
    for len in (1..=3).rev() {
        if tail_chars.len() < len {
            continue;
        }
        let candidate: String = tail_chars[..len].iter().rev().collect();
        if let Some(found) = AMBIGUOUS_ENDINGS.iter().find(|&&e| e == candidate) {
            return Some(found);
        }
    }
    None
}

fn should_split_ambiguous_ending(chunk: &str, after_end: usize, len_before: usize) -> bool {
    if len_before > 250 {
        return true;
    }

    let remaining = chunk[after_end..].trim_start();
    if remaining.is_empty() {
        return true;
    }

    DISCOURSE_MARKERS.iter().any(|marker| {
        remaining == *marker
            || remaining.starts_with(&format!("{} ", marker))
            || remaining.starts_with(&format!("{}\n", marker))
    })
}

// ── Stage 4: length-based safety split ──

fn force_split_long(
    units: Vec<SplitUnit>,
    protected: &[ProtectedRange],
    max_segment_length: usize,
) -> Vec<SplitUnit> {
    let mut current = units;

    for _ in 0..5 {
        let mut result = Vec::with_capacity(current.len());
        let mut did_split = false;

        for unit in current {
            let char_positions: Vec<usize> = unit.text.char_indices().map(|(i, _)| i).collect();
            let char_len = char_positions.len();
            if char_len <= max_segment_length {
                result.push(unit);
                continue;
            }

            let chars: Vec<char> = unit.text.chars().collect();
            let mid = char_len / 2;
            let search_start = mid.saturating_sub(60).max(10);
            let search_end = (mid + 60).min(char_len.saturating_sub(5));

            let mut best_split: Option<usize> = None;
            let mut best_dist = usize::MAX;

            for i in search_start..search_end {
                let c = chars[i];
                if (c == ' ' || c == ',' || c == '\n')
                    && !is_in_protected(unit.start + char_positions[i], protected, false)
                    && !is_after_postposition(&chars, i)
                {
                    let dist = i.abs_diff(mid);
                    if dist < best_dist {
                        best_dist = dist;
                        best_split = Some(i + 1);
                    }
                }
            }

            // Retry without postposition avoidance
            if best_split.is_none() {
                for i in search_start..search_end {
                    let c = chars[i];
                    if (c == ' ' || c == ',' || c == '\n')
                        && !is_in_protected(unit.start + char_positions[i], protected, false)
                    {
                        let dist = i.abs_diff(mid);
                        if dist < best_dist {
                            best_dist = dist;
                            best_split = Some(i + 1);
                        }
                    }
                }
            }

            match best_split {
                Some(split_char) => {
                    let split_byte = if split_char < char_positions.len() {
                        char_positions[split_char]
                    } else {
                        unit.text.len()
                    };
                    for (offset, part) in
                        [(0usize, &unit.text[..split_byte]), (split_byte, &unit.text[split_byte..])]
                    {
                        let trimmed = part.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        let part_start =
                            unit.start + find_substring_start(&unit.text, offset, trimmed);
                        result.push(SplitUnit {
                            text: trimmed.to_string(),
                            start: part_start,
                            end: part_start + trimmed.len(),
                            confidence: unit.confidence.min(0.85),
                        });
                    }
                    did_split = true;
                }
                None => result.push(unit),
            }
        }

        current = result;
        if !did_split {
            break;
        }
    }

    current
}

fn is_after_postposition(chars: &[char], split_pos: usize) -> bool {
    for len in (1..=3).rev() {
        if split_pos < len {
            continue;
        }
        let candidate: String = chars[split_pos - len..split_pos].iter().collect();
        if POSTPOSITIONS.contains(&candidate.as_str()) {
            return true;
        }
    }
    false
}

// ── Stage 5: enumeration detection ──

fn split_enumerations(
    units: Vec<SplitUnit>,
    protected: &[ProtectedRange],
    enumeration_min_length: usize,
) -> Vec<SplitUnit> {
    let p = patterns();
    let mut result = Vec::with_capacity(units.len());

    for unit in units {
        if unit.text.chars().count() <= enumeration_min_length {
            result.push(unit);
            continue;
        }

        let delimiters = [
            (&p.comma_list, BoundaryMode::WholeMatch),
            (&p.delimiter_list, BoundaryMode::WholeMatch),
            (&p.parallel_go, BoundaryMode::Capture),
        ];

        let mut taken = false;
        for (delimiter, mode) in delimiters {
            if let Some(parts) = try_split_by_delimiter(&unit, delimiter, mode, protected, 3, 15) {
                result.extend(parts);
                taken = true;
                break;
            }
        }
        if !taken {
            result.push(unit);
        }
    }

    result
}

fn try_split_by_delimiter(
    unit: &SplitUnit,
    delimiter: &Regex,
    mode: BoundaryMode,
    protected: &[ProtectedRange],
    min_parts: usize,
    min_part_length: usize,
) -> Option<Vec<SplitUnit>> {
    let mut boundaries: Vec<(usize, usize)> = Vec::new();
    let mut last_end = 0usize;
    for caps in delimiter.captures_iter(&unit.text) {
        let (b_start, b_end) = boundary_of(&caps, mode);
        if b_start < last_end {
            continue;
        }
        if !is_in_protected(unit.start + b_start, protected, false) {
            boundaries.push((b_start, b_end));
            last_end = b_end;
        }
    }

    if boundaries.len() < min_parts - 1 {
        return None;
    }

    let mut parts: Vec<SplitUnit> = Vec::new();
    let mut prev_end = 0usize;
    for (b_start, b_end) in boundaries {
        let part = unit.text[prev_end..b_start].trim();
        if !part.is_empty() {
            let part_start = unit.start + find_substring_start(&unit.text, prev_end, part);
            parts.push(SplitUnit {
                text: part.to_string(),
                start: part_start,
                end: part_start + part.len(),
                confidence: unit.confidence.min(0.9),
            });
        }
        prev_end = b_end;
    }
    let tail = unit.text[prev_end..].trim();
    if !tail.is_empty() {
        let tail_start = unit.start + find_substring_start(&unit.text, prev_end, tail);
        parts.push(SplitUnit {
            text: tail.to_string(),
            start: tail_start,
            end: tail_start + tail.len(),
            confidence: unit.confidence.min(0.9),
        });
    }

    if parts.len() < min_parts {
        return None;
    }
    if parts
        .iter()
        .any(|p| p.text.chars().count() < min_part_length)
    {
        return None;
    }

    Some(parts)
}

// ── Stage 6: discourse markers ──

fn split_discourse_markers(
    units: Vec<SplitUnit>,
    protected: &[ProtectedRange],
    discourse_marker_min_length: usize,
) -> Vec<SplitUnit> {
    let p = patterns();
    let mut result = Vec::with_capacity(units.len());

    for unit in units {
        if unit.text.chars().count() <= discourse_marker_min_length {
            result.push(unit);
            continue;
        }

        let mut split_points: Vec<usize> = Vec::new();
        for caps in p.discourse_marker_split.captures_iter(&unit.text) {
            let marker = caps.get(1).unwrap();
            let sp = marker.start();
            if is_in_protected(unit.start + sp, protected, false) {
                continue;
            }

            let remaining = &unit.text[sp..];
            if is_compound_marker(remaining) {
                continue;
            }
            if remaining.trim().chars().count() <= 4 {
                continue;
            }

            split_points.push(sp);
        }

        if split_points.is_empty() {
            result.push(unit);
            continue;
        }

        let mut prev_end = 0usize;
        for sp in split_points {
            let sub = unit.text[prev_end..sp].trim();
            if !sub.is_empty() {
                let sub_start = unit.start + find_substring_start(&unit.text, prev_end, sub);
                result.push(SplitUnit {
                    text: sub.to_string(),
                    start: sub_start,
                    end: sub_start + sub.len(),
                    confidence: unit.confidence.min(0.88),
                });
            }
            prev_end = sp;
        }
        let tail = unit.text[prev_end..].trim();
        if !tail.is_empty() {
            let tail_start = unit.start + find_substring_start(&unit.text, prev_end, tail);
            result.push(SplitUnit {
                text: tail.to_string(),
                start: tail_start,
                end: tail_start + tail.len(),
                confidence: unit.confidence.min(0.88),
            });
        }
    }

    result
}

fn is_compound_marker(remaining: &str) -> bool {
    let trimmed = remaining.trim_start();
    if COMPOUND_SUFFIXES.iter().any(|c| trimmed.starts_with(c)) {
        return true;
    }
    for marker in DISCOURSE_MARKERS {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            if let Some(next) = rest.chars().next() {
                if next != ' ' && next != '\n' && is_hangul(next) {
                    return true;
                }
            }
        }
    }
    false
}

fn is_hangul(c: char) -> bool {
    matches!(c, '\u{AC00}'..='\u{D7A3}' | '\u{3131}'..='\u{318E}')
}

// ── Stage 7: merge short segments ──

fn merge_short_units(units: Vec<SplitUnit>) -> Vec<SplitUnit> {
    if units.len() <= 1 {
        return units;
    }

    let mut result: Vec<SplitUnit> = Vec::with_capacity(units.len());
    let mut i = 0;
    while i < units.len() {
        let short_start = i;
        while i < units.len() && units[i].text.chars().count() < MIN_SEGMENT_LENGTH {
            i += 1;
        }
        let short_count = i - short_start;

        if short_count >= MIN_SHORT_CONSECUTIVE {
            for group in group_by_placeholder_boundary(&units[short_start..i]) {
                if group.len() >= MIN_SHORT_CONSECUTIVE {
                    result.push(merge_group(group));
                } else {
                    result.extend(group.iter().map(|&u| u.clone()));
                }
            }
        } else {
            result.extend(units[short_start..i].iter().cloned());
        }

        if i < units.len() {
            result.push(units[i].clone());
            i += 1;
        }
    }

    result
}

fn group_by_placeholder_boundary(units: &[SplitUnit]) -> Vec<Vec<&SplitUnit>> {
    let p = patterns();
    let mut groups: Vec<Vec<&SplitUnit>> = Vec::new();
    let mut current: Vec<&SplitUnit> = Vec::new();

    for unit in units {
        let contains_placeholder = p.placeholder.is_match(&unit.text);

        if contains_placeholder && !current.is_empty() {
            groups.push(std::mem::take(&mut current));
        }

        current.push(unit);

        if contains_placeholder {
            groups.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        groups.push(current);
    }

    groups
}

fn merge_group(group: Vec<&SplitUnit>) -> SplitUnit {
    let start = group[0].start;
    let end = group[group.len() - 1].end;
    let text = group
        .iter()
        .map(|u| u.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let min_conf = group.iter().map(|u| u.confidence).fold(1.0f64, f64::min);
    SplitUnit {
        text,
        start,
        end,
        confidence: min_conf,
    }
}

// ── Position helpers ──

fn find_substring_start(parent: &str, search_from: usize, trimmed: &str) -> usize {
    parent[search_from..]
        .find(trimmed)
        .map(|p| search_from + p)
        .unwrap_or(search_from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cfg() -> SegmenterConfig {
        SegmenterConfig::default()
    }

    fn texts(segments: &[Segment]) -> Vec<&str> {
        segments.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(segment_with("", &cfg()).is_empty());
        assert!(segment_with("   \n  ", &cfg()).is_empty());
    }

    #[test]
    fn test_blank_line_split() {
        let segs = segment_with("첫 번째 문단입니다\n\n두 번째 문단입니다", &cfg());
        assert_eq!(
            texts(&segs),
            vec!["첫 번째 문단입니다", "두 번째 문단입니다"]
        );
    }

    #[test]
    fn test_formal_ending_split() {
        let segs = segment_with(
            "보고서 제출이 늦어졌습니다. 내일까지 제출하겠습니다. 죄송합니다",
            &cfg(),
        );
        assert_eq!(segs.len(), 3);
        // Sentence-final punctuation belongs to the boundary and is dropped
        assert_eq!(segs[0].text, "보고서 제출이 늦어졌습니다");
        assert_eq!(segs[1].text, "내일까지 제출하겠습니다");
        assert_eq!(segs[2].text, "죄송합니다");
    }

    #[test]
    fn test_polite_ending_split() {
        let segs = segment_with("어제 말씀드렸잖아요 오늘도 확인 부탁드려요", &cfg());
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].text, "어제 말씀드렸잖아요");
    }

    #[test]
    fn test_ambiguous_ending_not_split_mid_sentence() {
        // "는데" as a connective must not split a short sentence
        let segs = segment_with("확인해 봤는데 아직 답이 없습니다", &cfg());
        assert_eq!(segs.len(), 1);
    }

    #[test]
    fn test_ambiguous_ending_split_before_discourse_marker() {
        let segs = segment_with("확인해 봤는데 그런데 아직 답이 없습니다", &cfg());
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].text, "확인해 봤는데");
        assert!(segs[1].text.starts_with("그런데"));
    }

    #[test]
    fn test_placeholder_never_split() {
        let text = "기한은 {{DATE_1}} 까지입니다. 꼭 지켜주세요.";
        let segs = segment_with(text, &cfg());
        let with_ph: Vec<_> = segs.iter().filter(|s| s.text.contains("{{DATE_1}}")).collect();
        assert_eq!(with_ph.len(), 1);
        assert!(with_ph[0].text.contains("{{DATE_1}}"));
    }

    #[test]
    fn test_starts_strictly_increasing() {
        let text = "첫 문장입니다. 둘째 문장입니다. 셋째 문장입니다.\n\n넷째 문단입니다.";
        let segs = segment_with(text, &cfg());
        for w in segs.windows(2) {
            assert!(w[0].start < w[1].start);
        }
    }

    #[test]
    fn test_segment_texts_found_in_masked_text_in_order() {
        let text = "보고서가 늦었습니다. 사유는 자료 지연입니다. 내일 제출하겠습니다.";
        let segs = segment_with(text, &cfg());
        let mut cursor = 0;
        for seg in &segs {
            let pos = text[cursor..]
                .find(&seg.text)
                .expect("segment text must appear in order");
            cursor += pos + seg.text.len();
        }
    }

    #[test]
    fn test_length_safety_split() {
        // One long run without sentence endings must still split under MAX
        let long = "가나다라 마바사아 ".repeat(40);
        let segs = segment_with(long.trim(), &cfg());
        assert!(segs.len() >= 2);
        for seg in &segs {
            assert!(seg.text.chars().count() <= 250 + 60);
        }
    }

    #[test]
    fn test_enumeration_split_needs_long_unit() {
        // Below ENUM_MIN stays whole despite commas
        let short = "사과, 바나나, 포도를 샀습니다";
        assert_eq!(segment_with(short, &cfg()).len(), 1);
    }

    #[test]
    fn test_numbered_list_split() {
        let text = "안내드립니다\n1. 첫 번째 항목입니다\n2. 두 번째 항목입니다";
        let segs = segment_with(text, &cfg());
        assert!(segs.len() >= 3);
    }

    #[test]
    fn test_merge_short_runs() {
        let text = "네. 넵. 넹. 알겠습니다 바로 확인해보겠습니다";
        let segs = segment_with(text, &cfg());
        // The three short acknowledgements merge instead of standing alone
        assert!(segs.len() <= 3);
    }

    #[test]
    fn test_segment_ids_are_sequential() {
        let segs = segment_with("하나입니다. 둘입니다. 셋입니다.", &cfg());
        for (i, seg) in segs.iter().enumerate() {
            assert_eq!(seg.id, format!("T{}", i + 1));
        }
    }
}

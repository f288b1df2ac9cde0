//! Signature field detection over extracted text geometry.
//!
//! Each text run is tested against an ordered table of keyword rules. A run
//! that matches becomes a label; the field it labels is the first underscore
//! line found in a short window of following runs, or the space right after
//! the label when there is none. Candidates are then deduplicated, ranked by
//! confidence, and padded with two defaults when nothing was found.

use crate::flatten::FieldKind;
use crate::geometry::{point_to_percent, PageSize};
use serde::{Deserialize, Serialize};

/// How many runs after a label are searched for its underscore line
pub const LOOKAHEAD_RUNS: usize = 10;
/// Maximum vertical distance between a label and its underscore line
pub const VERTICAL_TOLERANCE: f32 = 20.0;
/// How far left of the label's right edge an underscore line may start
pub const LEFT_TOLERANCE: f32 = 10.0;
/// How far right of the label's right edge an underscore line may start
pub const RIGHT_REACH: f32 = 100.0;
/// Gap between a label and the fallback field position
pub const LABEL_GAP: f32 = 10.0;
/// Locations closer than this (in percent, on both axes) are duplicates
pub const DEDUP_DISTANCE: f32 = 2.0;

/// Confidence given to a bare underscore line with no label
pub const UNDERSCORE_CONFIDENCE: f32 = 0.70;
/// Confidence of synthesized default locations
pub const DEFAULT_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_KEYWORD: &str = "default";

const SIGNATURE_KEYWORDS: &[&str] = &[
    "signature",
    "sign here",
    "signed by",
    "signatory",
    "authorized by",
];
const DATE_KEYWORDS: &[&str] = &["date", "dated", "day of"];
const NAME_KEYWORDS: &[&str] = &["name"];
const INITIAL_KEYWORDS: &[&str] = &["initial", "initials"];

/// One unit of extracted text. The origin is the top-left of the page and
/// `y` is the flipped baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// All text runs of one page, in content order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageText {
    pub width: f32,
    pub height: f32,
    pub runs: Vec<TextRun>,
}

impl PageText {
    fn size(&self) -> PageSize {
        PageSize {
            width: self.width,
            height: self.height,
        }
    }
}

/// A suggested field position, in percent of the page (top-left origin)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedLocation {
    /// 1-based page number
    pub page: u32,
    pub x: f32,
    pub y: f32,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub keyword: Option<String>,
    pub confidence: f32,
}

/// Keyword families, in the order they are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordFamily {
    Signature,
    Date,
    Name,
    Initial,
}

/// One row of the classification policy
pub struct KeywordRule {
    pub family: KeywordFamily,
    /// Returns the keyword that matched, if any
    pub matches: fn(&LabelText) -> Option<&'static str>,
    pub kind: FieldKind,
    pub confidence: f32,
}

/// The classification policy, highest priority first
pub const KEYWORD_RULES: &[KeywordRule] = &[
    KeywordRule {
        family: KeywordFamily::Signature,
        matches: match_signature,
        kind: FieldKind::Signature,
        confidence: 0.95,
    },
    KeywordRule {
        family: KeywordFamily::Date,
        matches: match_date,
        kind: FieldKind::Date,
        confidence: 0.90,
    },
    KeywordRule {
        family: KeywordFamily::Name,
        matches: match_name,
        kind: FieldKind::Text,
        confidence: 0.85,
    },
    KeywordRule {
        family: KeywordFamily::Initial,
        matches: match_initial,
        kind: FieldKind::Initial,
        confidence: 0.80,
    },
];

/// A keyword hit for one family
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeywordMatch {
    pub family: KeywordFamily,
    pub keyword: &'static str,
    pub kind: FieldKind,
    pub confidence: f32,
}

/// Text of a run in the two forms the rules look at
pub struct LabelText {
    /// Lowercased original text
    pub raw: String,
    /// Lowercased, punctuation stripped, whitespace collapsed
    pub normalized: String,
}

impl LabelText {
    pub fn new(text: &str) -> Self {
        let raw = text.to_lowercase();
        let normalized = raw
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        LabelText { raw, normalized }
    }
}

fn find_keyword(text: &LabelText, keywords: &[&'static str]) -> Option<&'static str> {
    keywords
        .iter()
        .copied()
        .find(|keyword| text.normalized.contains(keyword))
}

fn match_signature(text: &LabelText) -> Option<&'static str> {
    find_keyword(text, SIGNATURE_KEYWORDS).or_else(|| {
        let raw = text.raw.trim_start();
        let rest = raw.strip_prefix('x')?;
        rest.trim_start().starts_with("___").then_some("x___")
    })
}

fn match_date(text: &LabelText) -> Option<&'static str> {
    find_keyword(text, DATE_KEYWORDS)
}

fn match_name(text: &LabelText) -> Option<&'static str> {
    find_keyword(text, NAME_KEYWORDS)
}

fn match_initial(text: &LabelText) -> Option<&'static str> {
    find_keyword(text, INITIAL_KEYWORDS)
}

/// Every rule that matches `text`, in priority order. The first entry, if
/// any, is the classification.
pub fn match_keywords(text: &str) -> Vec<KeywordMatch> {
    let label = LabelText::new(text);
    KEYWORD_RULES
        .iter()
        .filter_map(|rule| {
            (rule.matches)(&label).map(|keyword| KeywordMatch {
                family: rule.family,
                keyword,
                kind: rule.kind,
                confidence: rule.confidence,
            })
        })
        .collect()
}

/// True if `text` contains three or more consecutive underscores
pub fn has_underscore_line(text: &str) -> bool {
    text.contains("___")
}

fn is_bare_underscore_line(text: &str) -> bool {
    has_underscore_line(text) && !text.chars().any(char::is_alphanumeric)
}

/// Tunable thresholds for [`detect_field_locations_with`]
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub lookahead_runs: usize,
    pub vertical_tolerance: f32,
    pub left_tolerance: f32,
    pub right_reach: f32,
    pub label_gap: f32,
    pub dedup_distance: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            lookahead_runs: LOOKAHEAD_RUNS,
            vertical_tolerance: VERTICAL_TOLERANCE,
            left_tolerance: LEFT_TOLERANCE,
            right_reach: RIGHT_REACH,
            label_gap: LABEL_GAP,
            dedup_distance: DEDUP_DISTANCE,
        }
    }
}

/// Detect field locations with the default thresholds
pub fn detect_field_locations(pages: &[PageText]) -> Vec<DetectedLocation> {
    detect_field_locations_with(pages, &DetectorConfig::default())
}

/// Detect field locations across all pages.
///
/// Never returns an empty list: when nothing is found, a signature and a date
/// location are synthesized near the bottom of the last page.
pub fn detect_field_locations_with(
    pages: &[PageText],
    config: &DetectorConfig,
) -> Vec<DetectedLocation> {
    let mut found = Vec::new();
    for (index, page) in pages.iter().enumerate() {
        let page_number = index as u32 + 1;
        let before = found.len();
        scan_page(page, page_number, config, &mut found);
        tracing::debug!(
            page = page_number,
            runs = page.runs.len(),
            candidates = found.len() - before,
            "scanned page for field labels"
        );
    }

    let mut locations = dedup_locations(found, config.dedup_distance);
    locations.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    if locations.is_empty() {
        let last_page = pages.len().max(1) as u32;
        tracing::debug!(page = last_page, "no fields detected, using defaults");
        locations = default_locations(last_page);
    }
    locations
}

fn scan_page(
    page: &PageText,
    page_number: u32,
    config: &DetectorConfig,
    out: &mut Vec<DetectedLocation>,
) {
    let size = page.size();
    for (index, run) in page.runs.iter().enumerate() {
        let matches = match_keywords(&run.text);

        let (position, kind, keyword, confidence) = match matches.first() {
            Some(hit) => {
                let position = find_answer_line(page, index, config)
                    .map(|line| (line.x, line.y))
                    .unwrap_or((run.x + run.width + config.label_gap, run.y));
                (position, hit.kind, Some(hit.keyword.to_string()), hit.confidence)
            }
            None if is_bare_underscore_line(&run.text) => (
                (run.x, run.y),
                FieldKind::Signature,
                None,
                UNDERSCORE_CONFIDENCE,
            ),
            None => continue,
        };

        let (x, y) = point_to_percent(position.0, position.1, size);
        out.push(DetectedLocation {
            page: page_number,
            x,
            y,
            kind,
            keyword,
            confidence,
        });
    }
}

/// The first underscore run after `label_index` that lines up with the label
fn find_answer_line<'a>(
    page: &'a PageText,
    label_index: usize,
    config: &DetectorConfig,
) -> Option<&'a TextRun> {
    let label = &page.runs[label_index];
    let label_right = label.x + label.width;

    page.runs
        .iter()
        .skip(label_index + 1)
        .take(config.lookahead_runs)
        .find(|run| {
            has_underscore_line(&run.text)
                && (run.y - label.y).abs() <= config.vertical_tolerance
                && run.x >= label_right - config.left_tolerance
                && run.x <= label_right + config.right_reach
        })
}

/// Drop locations that sit within `distance` percent (on both axes) of an
/// earlier kept location on the same page. The first one seen wins.
pub fn dedup_locations(locations: Vec<DetectedLocation>, distance: f32) -> Vec<DetectedLocation> {
    let mut kept: Vec<DetectedLocation> = Vec::with_capacity(locations.len());
    for location in locations {
        let duplicate = kept.iter().any(|k| {
            k.page == location.page
                && (k.x - location.x).abs() < distance
                && (k.y - location.y).abs() < distance
        });
        if !duplicate {
            kept.push(location);
        }
    }
    kept
}

fn default_locations(page: u32) -> Vec<DetectedLocation> {
    vec![
        DetectedLocation {
            page,
            x: 10.0,
            y: 85.0,
            kind: FieldKind::Signature,
            keyword: Some(DEFAULT_KEYWORD.to_string()),
            confidence: DEFAULT_CONFIDENCE,
        },
        DetectedLocation {
            page,
            x: 60.0,
            y: 85.0,
            kind: FieldKind::Date,
            keyword: Some(DEFAULT_KEYWORD.to_string()),
            confidence: DEFAULT_CONFIDENCE,
        },
    ]
}

/// Locations bucketed by the field type their keyword implies
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizedLocations {
    pub signatures: Vec<DetectedLocation>,
    pub dates: Vec<DetectedLocation>,
    pub initials: Vec<DetectedLocation>,
    pub text_fields: Vec<DetectedLocation>,
}

/// Bucket locations by re-testing their keyword.
///
/// Bucket priority is date, initial, name (text), signature; anything else
/// lands in signatures. When the list is exactly the two synthesized
/// defaults, the first is a signature and the second a date.
pub fn categorize_locations(locations: &[DetectedLocation]) -> CategorizedLocations {
    let mut buckets = CategorizedLocations::default();
    let mut defaults = Vec::new();
    let mut real_matches = 0;

    for location in locations {
        let keyword = location.keyword.as_deref().unwrap_or("");
        if keyword == DEFAULT_KEYWORD {
            defaults.push(location.clone());
            continue;
        }

        let label = LabelText::new(keyword);
        let bucket = if match_date(&label).is_some() {
            &mut buckets.dates
        } else if match_initial(&label).is_some() {
            &mut buckets.initials
        } else if match_name(&label).is_some() {
            &mut buckets.text_fields
        } else {
            // signature keywords and unknowns share a bucket
            &mut buckets.signatures
        };
        if !keyword.is_empty() && match_keywords(keyword).first().is_some() {
            real_matches += 1;
        }
        bucket.push(location.clone());
    }

    if defaults.len() == 2 && real_matches == 0 {
        let mut defaults = defaults.into_iter();
        buckets.signatures.extend(defaults.next());
        buckets.dates.extend(defaults.next());
    } else {
        buckets.signatures.extend(defaults);
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, x: f32, y: f32, width: f32) -> TextRun {
        TextRun {
            text: text.to_string(),
            x,
            y,
            width,
            height: 12.0,
        }
    }

    fn letter_page(runs: Vec<TextRun>) -> PageText {
        PageText {
            width: 612.0,
            height: 792.0,
            runs,
        }
    }

    fn location(
        page: u32,
        x: f32,
        y: f32,
        keyword: Option<&str>,
        confidence: f32,
    ) -> DetectedLocation {
        DetectedLocation {
            page,
            x,
            y,
            kind: FieldKind::Signature,
            keyword: keyword.map(str::to_string),
            confidence,
        }
    }

    #[test]
    fn test_signature_label_with_underscore_line() {
        let page = letter_page(vec![
            run("Signature:", 50.0, 700.0, 55.0),
            run("______________", 110.0, 702.0, 90.0),
        ]);
        let locations = detect_field_locations(&[page]);

        assert_eq!(locations.len(), 1);
        let loc = &locations[0];
        assert_eq!(loc.keyword.as_deref(), Some("signature"));
        assert_eq!(loc.kind, FieldKind::Signature);
        assert_eq!(loc.confidence, 0.95);
        assert_eq!(loc.page, 1);
        assert!((loc.x - 110.0 / 612.0 * 100.0).abs() < 1e-3);
        assert!((loc.y - 702.0 / 792.0 * 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_label_without_line_falls_back_after_label() {
        let page = letter_page(vec![run("Date", 300.0, 396.0, 24.0)]);
        let locations = detect_field_locations(&[page]);

        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].kind, FieldKind::Date);
        assert_eq!(locations[0].confidence, 0.90);
        assert!((locations[0].x - 334.0 / 612.0 * 100.0).abs() < 1e-3);
        assert!((locations[0].y - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_lookahead_is_bounded_to_ten_runs() {
        let mut runs = vec![run("Signature", 50.0, 500.0, 50.0)];
        for i in 0..10 {
            runs.push(run("filler", 400.0, 100.0 + i as f32, 20.0));
        }
        // 11th run after the label is out of reach
        runs.push(run("_____", 120.0, 500.0, 60.0));
        let page = letter_page(runs);

        let locations = detect_field_locations(&[page]);
        let sig = locations
            .iter()
            .find(|l| l.keyword.as_deref() == Some("signature"))
            .unwrap();
        assert!((sig.x - 110.0 / 612.0 * 100.0).abs() < 1e-3, "falls back to label edge + gap");
    }

    #[test]
    fn test_lookahead_respects_proximity() {
        let page = letter_page(vec![
            run("Signature", 50.0, 500.0, 50.0),
            run("_____", 110.0, 530.0, 60.0), // too far below
            run("_____", 300.0, 500.0, 60.0), // too far right
            run("_____", 95.0, 505.0, 60.0),  // within reach
        ]);
        let locations = detect_field_locations(&[page]);
        let sig = locations
            .iter()
            .find(|l| l.keyword.as_deref() == Some("signature"))
            .unwrap();
        assert!((sig.x - 95.0 / 612.0 * 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_priority_signature_over_date() {
        let matches = match_keywords("Signature Date");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].family, KeywordFamily::Signature);
        assert_eq!(matches[1].family, KeywordFamily::Date);
    }

    #[test]
    fn test_name_beats_initial() {
        let matches = match_keywords("Name / Initials");
        assert_eq!(matches[0].family, KeywordFamily::Name);
        assert_eq!(matches[0].kind, FieldKind::Text);
        assert_eq!(matches[1].family, KeywordFamily::Initial);
    }

    #[test]
    fn test_x_line_counts_as_signature() {
        let matches = match_keywords("X________");
        assert_eq!(matches[0].family, KeywordFamily::Signature);
        assert_eq!(matches[0].keyword, "x___");
        assert_eq!(match_keywords("x  ______")[0].keyword, "x___");
        assert!(match_keywords("Xylophone").is_empty());
        // the line has to follow the x directly
        assert!(match_keywords("x-ray ____").is_empty());
        assert!(match_keywords("xyz: ____").is_empty());
    }

    #[test]
    fn test_bare_underscore_line_gets_low_confidence() {
        let page = letter_page(vec![run("__________", 200.0, 600.0, 100.0)]);
        let locations = detect_field_locations(&[page]);
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].confidence, UNDERSCORE_CONFIDENCE);
        assert_eq!(locations[0].kind, FieldKind::Signature);
        assert_eq!(locations[0].keyword, None);
    }

    #[test]
    fn test_defaults_on_last_page_when_nothing_found() {
        let pages = vec![
            letter_page(vec![run("Hello", 10.0, 10.0, 30.0)]),
            letter_page(vec![]),
            letter_page(vec![run("world", 10.0, 10.0, 30.0)]),
        ];
        let locations = detect_field_locations(&pages);

        assert_eq!(locations.len(), 2);
        assert!(locations.iter().all(|l| l.page == 3));
        assert!(locations.iter().all(|l| l.keyword.as_deref() == Some(DEFAULT_KEYWORD)));
        assert_eq!((locations[0].x, locations[0].y), (10.0, 85.0));
        assert_eq!(locations[0].kind, FieldKind::Signature);
        assert_eq!((locations[1].x, locations[1].y), (60.0, 85.0));
        assert_eq!(locations[1].kind, FieldKind::Date);
    }

    #[test]
    fn test_defaults_without_pages() {
        let locations = detect_field_locations(&[]);
        assert_eq!(locations.len(), 2);
        assert!(locations.iter().all(|l| l.page == 1));
    }

    #[test]
    fn test_dedup_keeps_first_seen() {
        let locations = vec![
            location(1, 10.0, 10.0, Some("initial"), 0.80),
            location(1, 11.0, 11.5, Some("signature"), 0.95),
            location(2, 10.5, 10.5, Some("signature"), 0.95),
            location(1, 12.0, 10.0, Some("date"), 0.90),
        ];
        let kept = dedup_locations(locations, DEDUP_DISTANCE);

        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].keyword.as_deref(), Some("initial"));
        assert_eq!(kept[1].page, 2);
        assert_eq!(kept[2].keyword.as_deref(), Some("date"));
    }

    #[test]
    fn test_output_is_deduplicated_and_ranked() {
        let page = letter_page(vec![
            run("Initials", 50.0, 100.0, 40.0),
            run("Name", 50.0, 200.0, 30.0),
            run("Date", 50.0, 300.0, 25.0),
            run("Signature", 50.0, 400.0, 50.0),
            run("Initial here", 50.0, 500.0, 60.0),
            run("Signed by", 50.0, 600.0, 45.0),
        ]);
        let locations = detect_field_locations(&[page]);

        for pair in locations.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        // ties keep document order
        let signatures: Vec<f32> = locations
            .iter()
            .filter(|l| l.confidence == 0.95)
            .map(|l| l.y)
            .collect();
        assert!(signatures[0] < signatures[1]);

        for (i, a) in locations.iter().enumerate() {
            for b in &locations[i + 1..] {
                if a.page == b.page {
                    assert!(
                        (a.x - b.x).abs() >= DEDUP_DISTANCE
                            || (a.y - b.y).abs() >= DEDUP_DISTANCE
                    );
                }
            }
        }
    }

    #[test]
    fn test_custom_config_widens_lookahead() {
        let mut runs = vec![run("Signature", 50.0, 500.0, 50.0)];
        for _ in 0..12 {
            runs.push(run("filler", 400.0, 100.0, 20.0));
        }
        runs.push(run("_____", 120.0, 500.0, 60.0));
        let config = DetectorConfig {
            lookahead_runs: 20,
            ..DetectorConfig::default()
        };

        let locations = detect_field_locations_with(&[letter_page(runs)], &config);
        assert!((locations[0].x - 120.0 / 612.0 * 100.0).abs() < 1e-3);
        assert_eq!(locations[0].confidence, 0.95);
    }

    #[test]
    fn test_categorize_by_keyword() {
        let locations = vec![
            location(1, 1.0, 1.0, Some("signature"), 0.95),
            location(1, 5.0, 5.0, Some("date"), 0.90),
            location(1, 9.0, 9.0, Some("name"), 0.85),
            location(1, 13.0, 13.0, Some("initials"), 0.80),
            location(1, 17.0, 17.0, None, 0.70),
        ];
        let buckets = categorize_locations(&locations);

        assert_eq!(buckets.signatures.len(), 2);
        assert_eq!(buckets.dates.len(), 1);
        assert_eq!(buckets.text_fields.len(), 1);
        assert_eq!(buckets.initials.len(), 1);
    }

    #[test]
    fn test_categorize_two_defaults_positionally() {
        let locations = detect_field_locations(&[letter_page(vec![])]);
        let buckets = categorize_locations(&locations);

        assert_eq!(buckets.signatures.len(), 1);
        assert_eq!(buckets.dates.len(), 1);
        assert_eq!(buckets.signatures[0].x, 10.0);
        assert_eq!(buckets.dates[0].x, 60.0);
    }

    #[test]
    fn test_categorize_defaults_alongside_real_matches() {
        let mut locations = detect_field_locations(&[letter_page(vec![])]);
        locations.push(location(1, 40.0, 40.0, Some("date"), 0.90));
        let buckets = categorize_locations(&locations);

        assert_eq!(buckets.signatures.len(), 2);
        assert_eq!(buckets.dates.len(), 1);
    }

    #[test]
    fn test_categorize_is_idempotent() {
        let page = letter_page(vec![
            run("Signature", 50.0, 100.0, 50.0),
            run("Date", 50.0, 300.0, 25.0),
            run("Printed name", 50.0, 500.0, 60.0),
            run("_______", 300.0, 700.0, 60.0),
        ]);
        let locations = detect_field_locations(&[page]);
        assert_eq!(categorize_locations(&locations), categorize_locations(&locations));

        let defaults = detect_field_locations(&[]);
        assert_eq!(categorize_locations(&defaults), categorize_locations(&defaults));
    }

    #[test]
    fn test_normalization_strips_punctuation() {
        let label = LabelText::new("  SIGN-HERE:   Please ");
        assert_eq!(label.normalized, "signhere please");
        let label = LabelText::new("Sign   here!");
        assert_eq!(label.normalized, "sign here");
    }
}

//! Title and caption attribution
//!
//! Picks the span that names a table out of the text around it. Explicit
//! captions ("Table 1: ...") always win; otherwise the most prominent nearby
//! heading above the table is used, as long as it is not letterhead, contact
//! details or page furniture. Resolution is fully deterministic.

use crate::candidate::{SpanPlacement, TextSpan};
use crate::config::TitleConfig;
use crate::validator::ValidatedTable;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Title used when nothing qualifies
pub const UNTITLED: &str = "untitled";

/// Caption numerals: "1", "2.3", "A-2", "IV", "B"
pub(crate) const CAPTION_NUMERAL: &str = r"[0-9]+(?:[.\-][0-9]+)*|[a-z]-?[0-9]+|[ivxlc]+|[a-z]";

static TABLE_CAPTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)^\s*table\s+({CAPTION_NUMERAL})\s*[:.\-–—]")).unwrap()
});

static NUMBERED_CAPTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^\s*(?:exhibit|schedule|appendix)\s+({CAPTION_NUMERAL})\s*[:.\-–—]"
    ))
    .unwrap()
});

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+\d[\d\s().\-]{7,}\d|\(?\b\d{3}\)?[\s.\-]\d{3}[\s.\-]\d{4}\b)").unwrap()
});

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w.+\-]+@[\w\-]+\.[\w.\-]+").unwrap());

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").unwrap());

static PAGE_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*[-–]?\s*(?:page\s+)?\d{1,4}(?:\s*(?:of|/)\s*\d{1,4})?\s*[-–]?\s*$").unwrap()
});

/// Where a resolved title came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleSource {
    ExplicitCaption,
    InferredFromContext,
    None,
}

/// Outcome of title resolution for one set of spans
#[derive(Debug, Clone, PartialEq)]
pub struct TitleResolution {
    pub title: String,
    pub confidence: f32,
    pub source: TitleSource,
    /// Caption numeral ("1", "A-2", ...) when an explicit caption matched
    pub label: Option<String>,
}

impl TitleResolution {
    fn untitled() -> Self {
        Self {
            title: UNTITLED.to_string(),
            confidence: 0.0,
            source: TitleSource::None,
            label: None,
        }
    }
}

/// A validated table with its title attached
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTable {
    pub validated: ValidatedTable,
    /// Session-sequential identifier
    pub table_id: u32,
    pub title: String,
    pub title_confidence: f32,
    pub title_source: TitleSource,
    pub label: Option<String>,
}

/// Attach a title to a validated table
pub fn resolve(
    validated: ValidatedTable,
    table_id: u32,
    config: &TitleConfig,
    exclude_headers: bool,
) -> ResolvedTable {
    let resolution = resolve_title(&validated.candidate.nearby_text_spans, config, exclude_headers);
    log::debug!(
        "table {} ({}): {:?} title {:?} ({:.2})",
        table_id,
        validated.candidate.id,
        resolution.source,
        resolution.title,
        resolution.confidence
    );
    ResolvedTable {
        validated,
        table_id,
        title: resolution.title,
        title_confidence: resolution.confidence,
        title_source: resolution.source,
        label: resolution.label,
    }
}

/// Rank the spans and pick a title
pub fn resolve_title(
    spans: &[TextSpan],
    config: &TitleConfig,
    exclude_headers: bool,
) -> TitleResolution {
    let considered: Vec<(usize, &TextSpan)> = spans
        .iter()
        .enumerate()
        .filter(|(_, span)| !span.text.trim().is_empty())
        .filter(|(_, span)| !exclude_headers || !is_page_furniture(span, config))
        .collect();

    if let Some(caption) = best_caption(&considered) {
        return caption;
    }

    best_context_title(&considered, config).unwrap_or_else(TitleResolution::untitled)
}

/// Anything in the running header/footer, plus letterhead, contact lines and
/// page numbers that do not read as a caption
fn is_page_furniture(span: &TextSpan, config: &TitleConfig) -> bool {
    matches!(
        span.placement,
        SpanPlacement::PageHeader | SpanPlacement::PageFooter
    ) || (caption_match(&span.text).is_none() && is_noise(&span.text, config))
}

/// Text that can never be a table title
pub fn is_noise(text: &str, config: &TitleConfig) -> bool {
    PHONE_RE.is_match(text)
        || EMAIL_RE.is_match(text)
        || URL_RE.is_match(text)
        || PAGE_NUMBER_RE.is_match(text)
        || has_letterhead_keyword(text, &config.letterhead_keywords)
}

fn has_letterhead_keyword(text: &str, keywords: &[String]) -> bool {
    let lower = text.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '.')
        .map(|t| t.trim_end_matches('.'))
        .filter(|t| !t.is_empty())
        .collect();

    keywords.iter().any(|keyword| {
        let keyword = keyword.to_lowercase();
        if keyword.chars().all(|c| c.is_alphanumeric()) {
            tokens.iter().any(|t| *t == keyword)
        } else {
            lower.contains(&keyword)
        }
    })
}

/// Match a span against the caption patterns, returning the numeral and
/// whether it is a `Table` caption (as opposed to generic numbering)
fn caption_match(text: &str) -> Option<(String, bool)> {
    if let Some(caps) = TABLE_CAPTION_RE.captures(text) {
        return Some((caps[1].to_uppercase(), true));
    }
    NUMBERED_CAPTION_RE
        .captures(text)
        .map(|caps| (caps[1].to_uppercase(), false))
}

fn best_caption(spans: &[(usize, &TextSpan)]) -> Option<TitleResolution> {
    let mut matches: Vec<(usize, &TextSpan, String, bool)> = spans
        .iter()
        .filter_map(|(idx, span)| {
            caption_match(&span.text).map(|(label, is_table)| (*idx, *span, label, is_table))
        })
        .collect();

    if matches.len() > 1 {
        log::debug!(
            "{} caption candidates, breaking tie by distance then wording",
            matches.len()
        );
    }

    // Closest first, then "Table" captions, then document order
    matches.sort_by(|a, b| {
        a.1.distance
            .partial_cmp(&b.1.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.3.cmp(&a.3))
            .then_with(|| a.0.cmp(&b.0))
    });

    matches.into_iter().next().map(|(_, span, label, _)| TitleResolution {
        title: clean_title(&span.text),
        confidence: 1.0,
        source: TitleSource::ExplicitCaption,
        label: Some(label),
    })
}

fn best_context_title(
    spans: &[(usize, &TextSpan)],
    config: &TitleConfig,
) -> Option<TitleResolution> {
    let max_distance = config.max_title_distance;
    let mut eligible: Vec<(usize, &TextSpan)> = spans
        .iter()
        .filter(|(_, span)| span.placement == SpanPlacement::Above)
        .filter(|(_, span)| span.distance >= 0.0 && span.distance <= max_distance)
        .filter(|(_, span)| !is_noise(&span.text, config))
        .copied()
        .collect();

    // Largest font first, then closest, then document order
    eligible.sort_by(|a, b| {
        b.1.font_size_rank
            .cmp(&a.1.font_size_rank)
            .then_with(|| {
                a.1.distance
                    .partial_cmp(&b.1.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.0.cmp(&b.0))
    });

    let (_, best) = *eligible.first()?;

    let proximity = (1.0 - best.distance / max_distance).clamp(0.0, 1.0);
    let distinctiveness = match eligible.get(1) {
        None => 1.0,
        Some((_, runner_up)) => {
            let top = best.font_size_rank.max(1) as f32;
            ((best.font_size_rank as f32 - runner_up.font_size_rank as f32) / top).clamp(0.0, 1.0)
        }
    };

    Some(TitleResolution {
        title: clean_title(&best.text),
        confidence: 0.5 + 0.2 * proximity + 0.2 * distinctiveness,
        source: TitleSource::InferredFromContext,
        label: None,
    })
}

/// Collapse internal whitespace runs
fn clean_title(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

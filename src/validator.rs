//! Structural validation of raw detections
//!
//! Infers the authoritative column count, lifts footnote and total rows out of
//! the body, repairs ragged rows when few enough are off, and assigns a verdict.
//! Rejection is a normal outcome here, never an error.

use crate::candidate::{CellValue, TableCandidate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// The validator's decision for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Reject,
    AcceptWithRepair,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Verdict::Reject)
    }
}

/// An issue found in a candidate (or introduced while merging)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// Candidate has no data rows after footnotes and totals are lifted out
    NoDataRows,
    /// Detector confidence under the configured threshold
    LowConfidence { confidence: f32, threshold: f32 },
    /// Row length differs from the inferred column count
    RaggedRow { row: usize, expected: usize, found: usize },
    /// Trailing empty cells appended to a short row
    PaddedRow { row: usize, added: usize },
    /// Trailing cells dropped from a long row
    TruncatedRow { row: usize, removed: Vec<String> },
    /// Header count differs from the inferred column count
    HeaderWidthMismatch { expected: usize, found: usize },
    /// No row has content in this column
    AllEmptyColumn { column: usize },
    /// Same header text appears more than once
    DuplicateHeader { column: usize, text: String },
    /// Mostly numeric column that also holds text
    MixedColumnTypes { column: usize },
    /// Two merged detections disagreed on a total
    TotalsConflict {
        key: String,
        kept: String,
        discarded: String,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::NoDataRows => write!(f, "no data rows"),
            Anomaly::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "detector confidence {confidence:.2} below {threshold:.2}"),
            Anomaly::RaggedRow {
                row,
                expected,
                found,
            } => write!(f, "row {row} has {found} cells, expected {expected}"),
            Anomaly::PaddedRow { row, added } => {
                write!(f, "row {row} padded with {added} empty cell(s)")
            }
            Anomaly::TruncatedRow { row, removed } => {
                write!(f, "row {row} truncated, dropped {:?}", removed)
            }
            Anomaly::HeaderWidthMismatch { expected, found } => {
                write!(f, "{found} headers for {expected} columns")
            }
            Anomaly::AllEmptyColumn { column } => write!(f, "column {column} is empty"),
            Anomaly::DuplicateHeader { column, text } => {
                write!(f, "header {text:?} repeated at column {column}")
            }
            Anomaly::MixedColumnTypes { column } => {
                write!(f, "column {column} mixes numbers and text")
            }
            Anomaly::TotalsConflict {
                key,
                kept,
                discarded,
            } => write!(f, "total {key:?}: kept {kept:?}, discarded {discarded:?}"),
        }
    }
}

/// A candidate annotated with its verdict
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTable {
    pub candidate: TableCandidate,
    /// Inferred authoritative column count
    pub column_count: usize,
    /// Header cells, sized to `column_count` when there are any
    pub headers: Vec<String>,
    /// Data rows; repaired to `column_count` unless rejected
    pub rows: Vec<Vec<CellValue>>,
    /// Footnote rows lifted out of the body
    pub notes: Vec<String>,
    /// Total rows lifted out of the body
    pub totals: BTreeMap<String, String>,
    pub anomalies: Vec<Anomaly>,
    pub verdict: Verdict,
}

/// Validate one candidate against a confidence threshold
pub fn validate(candidate: TableCandidate, confidence_threshold: f32) -> ValidatedTable {
    let mut anomalies = Vec::new();

    let (mut rows, notes, totals) = split_body(&candidate.raw_rows);
    let headers_raw: Vec<String> = candidate
        .raw_headers
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let column_count = infer_column_count(&rows, headers_raw.len());

    let ragged: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| row.len() != column_count)
        .map(|(idx, _)| idx)
        .collect();

    let low_confidence = candidate.detector_confidence < confidence_threshold;
    if low_confidence {
        anomalies.push(Anomaly::LowConfidence {
            confidence: candidate.detector_confidence,
            threshold: confidence_threshold,
        });
    }
    if rows.is_empty() {
        anomalies.push(Anomaly::NoDataRows);
    }
    for &idx in &ragged {
        anomalies.push(Anomaly::RaggedRow {
            row: idx,
            expected: column_count,
            found: rows[idx].len(),
        });
    }

    // More than half ragged is too broken to repair
    let too_ragged = ragged.len() * 2 > rows.len();

    let verdict = if rows.is_empty() || low_confidence || too_ragged {
        Verdict::Reject
    } else if ragged.is_empty() {
        Verdict::Accept
    } else {
        Verdict::AcceptWithRepair
    };

    let mut headers = headers_raw;
    if verdict.is_accepted() {
        for &idx in &ragged {
            anomalies.push(repair_row(&mut rows[idx], idx, column_count));
        }

        if !headers.is_empty() && headers.len() != column_count {
            anomalies.push(Anomaly::HeaderWidthMismatch {
                expected: column_count,
                found: headers.len(),
            });
            headers.resize(column_count, String::new());
        }

        anomalies.extend(check_columns(&headers, &rows, column_count));
    }

    log::debug!(
        "candidate {}: verdict {:?}, {} columns, {} rows, {} anomalies",
        candidate.id,
        verdict,
        column_count,
        rows.len(),
        anomalies.len()
    );

    ValidatedTable {
        candidate,
        column_count,
        headers,
        rows,
        notes,
        totals,
        anomalies,
        verdict,
    }
}

/// Pad or truncate a row to `column_count`, describing what was done
fn repair_row(row: &mut Vec<CellValue>, idx: usize, column_count: usize) -> Anomaly {
    if row.len() < column_count {
        let added = column_count - row.len();
        row.resize(column_count, CellValue::Empty);
        Anomaly::PaddedRow { row: idx, added }
    } else {
        let removed = row.split_off(column_count);
        Anomaly::TruncatedRow {
            row: idx,
            removed: removed.iter().map(CellValue::as_text).collect(),
        }
    }
}

/// Separate data rows from footnote rows and total rows, dropping blank rows
fn split_body(
    raw_rows: &[Vec<CellValue>],
) -> (Vec<Vec<CellValue>>, Vec<String>, BTreeMap<String, String>) {
    let mut rows = Vec::new();
    let mut notes = Vec::new();
    let mut totals = BTreeMap::new();

    for row in raw_rows {
        if row.iter().all(CellValue::is_empty) {
            continue;
        }

        let first_cell = row.first().map(CellValue::as_text).unwrap_or_default();
        if is_footnote_row(&first_cell) {
            let footnote = row
                .iter()
                .map(CellValue::as_text)
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            notes.push(footnote);
            continue;
        }

        if let Some((label, value)) = total_row(row) {
            totals.insert(label, value);
            continue;
        }

        rows.push(row.clone());
    }

    (rows, notes, totals)
}

/// Mode of row lengths; ties prefer the header width, then the smallest length
fn infer_column_count(rows: &[Vec<CellValue>], header_len: usize) -> usize {
    if rows.is_empty() {
        return header_len;
    }

    let mut freq: HashMap<usize, usize> = HashMap::new();
    for row in rows {
        *freq.entry(row.len()).or_insert(0) += 1;
    }

    let best = freq.values().copied().max().unwrap_or(0);
    let mut modes: Vec<usize> = freq
        .iter()
        .filter(|(_, count)| **count == best)
        .map(|(&len, _)| len)
        .collect();
    modes.sort_unstable();

    if header_len > 0 && modes.contains(&header_len) {
        header_len
    } else {
        modes[0]
    }
}

/// Column-level checks that never change the verdict
fn check_columns(headers: &[String], rows: &[Vec<CellValue>], column_count: usize) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    let mut seen = HashSet::new();
    for (column, header) in headers.iter().enumerate() {
        let key = header.trim().to_lowercase();
        if !key.is_empty() && !seen.insert(key) {
            anomalies.push(Anomaly::DuplicateHeader {
                column,
                text: header.clone(),
            });
        }
    }

    for column in 0..column_count {
        let cells: Vec<&CellValue> = rows.iter().filter_map(|row| row.get(column)).collect();
        let filled: Vec<&&CellValue> = cells.iter().filter(|c| !c.is_empty()).collect();
        if filled.is_empty() {
            anomalies.push(Anomaly::AllEmptyColumn { column });
            continue;
        }

        let numeric = filled.iter().filter(|c| c.is_numeric()).count();
        let textual = filled.len() - numeric;
        if numeric * 2 >= filled.len() && textual > 0 && filled.len() >= 2 {
            anomalies.push(Anomaly::MixedColumnTypes { column });
        }
    }

    anomalies
}

/// Check if a cell value indicates a footnote row
pub(crate) fn is_footnote_row(text: &str) -> bool {
    let trimmed = text.trim();

    // (1), (2), etc.
    if let Some(inside) = trimmed.strip_prefix('(') {
        if let Some(close_idx) = inside.find(')') {
            let num_part = &inside[..close_idx];
            if !num_part.is_empty() && num_part.chars().all(|c| c.is_ascii_digit()) {
                return true;
            }
        }
    }

    // 1), 2), etc.
    if let Some(paren_idx) = trimmed.find(')') {
        let num_part = &trimmed[..paren_idx];
        if !num_part.is_empty() && num_part.chars().all(|c| c.is_ascii_digit()) {
            return true;
        }
    }

    let lower = trimmed.to_lowercase();
    lower.starts_with("note:") || lower.starts_with("notes:")
}

/// A row whose first filled cell starts with "total" and carries a value
fn total_row(row: &[CellValue]) -> Option<(String, String)> {
    let filled: Vec<String> = row
        .iter()
        .map(CellValue::as_text)
        .filter(|c| !c.is_empty())
        .collect();
    if filled.len() < 2 || !filled[0].to_lowercase().starts_with("total") {
        return None;
    }
    let value = filled.last()?.clone();
    Some((filled[0].clone(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Region;

    fn make_candidate(headers: &[&str], rows: Vec<Vec<CellValue>>, confidence: f32) -> TableCandidate {
        TableCandidate {
            id: "c1".into(),
            region: Region::new(1, 0),
            raw_headers: headers.iter().map(|h| h.to_string()).collect(),
            raw_rows: rows,
            detector_confidence: confidence,
            nearby_text_spans: vec![],
        }
    }

    fn row(cells: &[&str]) -> Vec<CellValue> {
        cells.iter().map(|c| CellValue::text(*c)).collect()
    }

    #[test]
    fn test_well_formed_table_accepted() {
        let rows = (1..=5)
            .map(|i| row(&[&i.to_string(), "Field work", "$10,000"]))
            .collect();
        let validated = validate(make_candidate(&["Task No.", "Description", "Totals (CAD$)"], rows, 1.0), 0.95);
        assert_eq!(validated.verdict, Verdict::Accept);
        assert_eq!(validated.column_count, 3);
        assert!(validated.anomalies.is_empty());
    }

    #[test]
    fn test_short_rows_repaired() {
        let mut rows: Vec<Vec<CellValue>> = (0..7).map(|_| row(&["a", "b", "3"])).collect();
        for _ in 0..3 {
            rows.push(row(&["a", "b"]));
        }
        let validated = validate(make_candidate(&["A", "B", "C"], rows, 1.0), 0.95);
        assert_eq!(validated.verdict, Verdict::AcceptWithRepair);
        assert!(validated.rows.iter().all(|r| r.len() == 3));
        let padded = validated
            .anomalies
            .iter()
            .filter(|a| matches!(a, Anomaly::PaddedRow { added: 1, .. }))
            .count();
        assert_eq!(padded, 3);
        assert_eq!(validated.rows[9][2], CellValue::Empty);
    }

    #[test]
    fn test_long_rows_truncated_with_record() {
        let rows = vec![
            row(&["a", "1"]),
            row(&["b", "2"]),
            row(&["c", "3", "stray"]),
        ];
        let validated = validate(make_candidate(&[], rows, 1.0), 0.95);
        assert_eq!(validated.verdict, Verdict::AcceptWithRepair);
        assert!(validated.anomalies.contains(&Anomaly::TruncatedRow {
            row: 2,
            removed: vec!["stray".into()],
        }));
    }

    #[test]
    fn test_mostly_ragged_rejected() {
        let rows = vec![row(&["a"]), row(&["a", "b", "c"]), row(&["a", "b"]), row(&["x", "y", "z", "w"])];
        let validated = validate(make_candidate(&[], rows, 1.0), 0.95);
        assert_eq!(validated.verdict, Verdict::Reject);
    }

    #[test]
    fn test_low_confidence_rejected() {
        let rows = vec![row(&["a", "1"]), row(&["b", "2"])];
        let validated = validate(make_candidate(&["K", "V"], rows, 0.80), 0.95);
        assert_eq!(validated.verdict, Verdict::Reject);
        assert!(matches!(validated.anomalies[0], Anomaly::LowConfidence { .. }));
    }

    #[test]
    fn test_empty_rows_rejected() {
        let validated = validate(make_candidate(&["A", "B"], vec![], 1.0), 0.95);
        assert_eq!(validated.verdict, Verdict::Reject);
        assert!(validated.anomalies.contains(&Anomaly::NoDataRows));
        assert_eq!(validated.column_count, 2);
    }

    #[test]
    fn test_mode_tie_prefers_header_then_smallest() {
        let rows = vec![row(&["a", "b"]), row(&["a", "b", "c"])];
        assert_eq!(infer_column_count(&rows, 3), 3);
        assert_eq!(infer_column_count(&rows, 4), 2);
        assert_eq!(infer_column_count(&rows, 0), 2);
    }

    #[test]
    fn test_notes_and_totals_lifted() {
        let rows = vec![
            row(&["1", "Design", "$100"]),
            row(&["2", "Build", "$200"]),
            row(&["", "Total Cost", "$300"]),
            row(&["Note: All costs in Canadian dollars"]),
            row(&["", "", ""]),
        ];
        let validated = validate(make_candidate(&["No.", "Task", "Cost"], rows, 1.0), 0.95);
        assert_eq!(validated.verdict, Verdict::Accept);
        assert_eq!(validated.rows.len(), 2);
        assert_eq!(validated.notes, vec!["Note: All costs in Canadian dollars".to_string()]);
        assert_eq!(validated.totals.get("Total Cost").map(String::as_str), Some("$300"));
    }

    #[test]
    fn test_column_checks() {
        let rows = vec![
            row(&["1", "", "x"]),
            row(&["2", "", "y"]),
            row(&["n/a", "", "z"]),
        ];
        let validated = validate(make_candidate(&["Qty", "Qty", "Item"], rows, 1.0), 0.95);
        assert!(validated.anomalies.contains(&Anomaly::AllEmptyColumn { column: 1 }));
        assert!(validated.anomalies.contains(&Anomaly::MixedColumnTypes { column: 0 }));
        assert!(validated
            .anomalies
            .iter()
            .any(|a| matches!(a, Anomaly::DuplicateHeader { column: 1, .. })));
    }

    #[test]
    fn test_header_width_repaired() {
        let rows = vec![row(&["a", "1"]), row(&["b", "2"])];
        let validated = validate(make_candidate(&["Name"], rows, 1.0), 0.95);
        assert_eq!(validated.headers, vec!["Name".to_string(), String::new()]);
        assert!(validated.anomalies.contains(&Anomaly::HeaderWidthMismatch {
            expected: 2,
            found: 1
        }));
    }

    #[test]
    fn test_footnote_patterns() {
        assert!(is_footnote_row("(1) Excludes tax"));
        assert!(is_footnote_row("2) Estimated"));
        assert!(is_footnote_row("Notes: see appendix"));
        assert!(!is_footnote_row("Task 1"));
        assert!(!is_footnote_row("(a) option"));
    }
}

//! Deduplication and merging of table detections
//!
//! Analyzers routinely report one logical table several times: split across a
//! page break, or detected twice on the same page with overlapping boxes. The
//! merger folds those into a single canonical record and leaves everything
//! else as a one-to-one passthrough.

use crate::candidate::{BoundingBox, CellValue};
use crate::caption::{ResolvedTable, TitleSource};
use crate::config::MergeConfig;
use crate::linker::Relationship;
use crate::validator::Anomaly;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Final output unit for one logical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTable {
    pub table_id: u32,
    pub title: String,
    pub title_confidence: f32,
    pub title_source: TitleSource,
    /// Caption numeral, when the title came from an explicit caption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub first_page: u32,
    pub last_page: u32,
    /// Reading-order position of the first piece on `first_page`
    #[serde(default)]
    pub ordinal: u32,
    /// Bounding box of the first piece
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    /// Bounding box of the piece on `last_page`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_bbox: Option<BoundingBox>,
    /// Document section the title maps to
    #[serde(default)]
    pub section: String,
    pub column_count: usize,
    pub headers: Vec<String>,
    pub data: Vec<Vec<CellValue>>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub totals: BTreeMap<String, String>,
    /// Source candidate ids in merge order
    pub merged_from: Vec<String>,
    #[serde(default)]
    pub relationships: BTreeSet<Relationship>,
    #[serde(default)]
    pub anomalies: Vec<Anomaly>,
}

impl CanonicalTable {
    /// Wrap a single resolved table
    pub fn from_resolved(resolved: ResolvedTable) -> Self {
        let ResolvedTable {
            validated,
            table_id,
            title,
            title_confidence,
            title_source,
            label,
        } = resolved;
        let region = validated.candidate.region;

        Self {
            table_id,
            title,
            title_confidence,
            title_source,
            label,
            first_page: region.page,
            last_page: region.page,
            ordinal: region.ordinal,
            bbox: region.bbox,
            last_bbox: region.bbox,
            section: String::new(),
            column_count: validated.column_count,
            headers: validated.headers,
            data: validated.rows,
            notes: validated.notes,
            totals: validated.totals,
            merged_from: vec![validated.candidate.id],
            relationships: BTreeSet::new(),
            anomalies: validated.anomalies,
        }
    }

    pub fn page_count(&self) -> u32 {
        self.last_page - self.first_page + 1
    }
}

/// How two tables relate for merging purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// Separate tables
    None,
    /// Later table continues the earlier one (rows appended)
    Continuation,
    /// Same table detected twice on one page (rows unioned)
    Duplicate,
}

/// Decide whether `later` belongs to `earlier`
pub fn merge_kind(earlier: &CanonicalTable, later: &CanonicalTable, config: &MergeConfig) -> MergeKind {
    if earlier.column_count != later.column_count {
        return MergeKind::None;
    }

    // Page spans must touch or overlap
    if later.first_page > earlier.last_page + 1 || earlier.first_page > later.last_page + 1 {
        return MergeKind::None;
    }

    // Two different caption numerals are two different tables
    if let (Some(a), Some(b)) = (&earlier.label, &later.label) {
        if a != b {
            return MergeKind::None;
        }
    }

    let same_page = earlier.last_page == later.first_page;
    let duplicate_boxes = same_page
        && match (&earlier.last_bbox, &later.bbox) {
            (Some(a), Some(b)) => a.overlap_ratio(b) >= config.duplicate_overlap_ratio,
            _ => false,
        };

    let compatible_headers = if later.headers_blank() {
        // Headerless continuation on the next page, or a headerless duplicate
        (later.first_page == earlier.last_page + 1) || duplicate_boxes
    } else if earlier.headers_blank() {
        false
    } else {
        same_headers(&earlier.headers, &later.headers)
            || header_similarity(&earlier.headers, &later.headers)
                >= config.header_similarity_threshold
    };

    if !compatible_headers {
        MergeKind::None
    } else if duplicate_boxes {
        MergeKind::Duplicate
    } else {
        MergeKind::Continuation
    }
}

impl CanonicalTable {
    fn headers_blank(&self) -> bool {
        self.headers.iter().all(|h| h.trim().is_empty())
    }

    /// Fold `later` into `self`
    fn absorb(&mut self, later: CanonicalTable, kind: MergeKind) {
        log::debug!(
            "merging table {} (pages {}-{}) into table {} as {:?}",
            later.table_id,
            later.first_page,
            later.last_page,
            self.table_id,
            kind
        );

        let later_wins_title = later.title_confidence > self.title_confidence;

        let mut rows = later.data.into_iter().peekable();
        if let Some(first) = rows.peek() {
            if row_repeats_headers(first, &self.headers) {
                rows.next();
            }
        }
        match kind {
            MergeKind::Duplicate => {
                for row in rows {
                    if !self.data.contains(&row) {
                        self.data.push(row);
                    }
                }
            }
            _ => self.data.extend(rows),
        }

        for note in later.notes {
            if !self.notes.contains(&note) {
                self.notes.push(note);
            }
        }

        for (key, value) in later.totals {
            match self.totals.get(&key) {
                None => {
                    self.totals.insert(key, value);
                }
                Some(existing) if *existing == value => {}
                Some(existing) => {
                    let (kept, discarded) = if later_wins_title {
                        (value, existing.clone())
                    } else {
                        (existing.clone(), value)
                    };
                    log::warn!(
                        "table {}: conflicting total {:?}, keeping {:?} over {:?}",
                        self.table_id,
                        key,
                        kept,
                        discarded
                    );
                    self.totals.insert(key.clone(), kept.clone());
                    self.anomalies.push(Anomaly::TotalsConflict {
                        key,
                        kept,
                        discarded,
                    });
                }
            }
        }

        if later_wins_title {
            self.title = later.title;
            self.title_confidence = later.title_confidence;
            self.title_source = later.title_source;
            self.label = later.label;
        }

        if later.last_page > self.last_page
            || (later.last_page == self.last_page && self.last_bbox.is_none())
        {
            self.last_bbox = later.last_bbox;
        }
        self.last_page = self.last_page.max(later.last_page);
        self.merged_from.extend(later.merged_from);
        self.anomalies.extend(later.anomalies);
    }
}

/// Incremental merger; each `push` is one merge decision
#[derive(Debug)]
pub struct Merger<'a> {
    config: &'a MergeConfig,
    groups: Vec<CanonicalTable>,
}

impl<'a> Merger<'a> {
    pub fn new(config: &'a MergeConfig) -> Self {
        Self {
            config,
            groups: Vec::new(),
        }
    }

    /// Add the next table in page order, folding it into the most recent
    /// compatible group when there is one
    pub fn push(&mut self, table: CanonicalTable) {
        let target = self
            .groups
            .iter()
            .enumerate()
            .rev()
            .map(|(idx, group)| (idx, merge_kind(group, &table, self.config)))
            .find(|(_, kind)| *kind != MergeKind::None);

        match target {
            Some((idx, kind)) => self.groups[idx].absorb(table, kind),
            None => self.groups.push(table),
        }
    }

    pub fn finish(self) -> Vec<CanonicalTable> {
        self.groups
    }
}

/// Sort tables into page order
pub fn page_order(tables: &mut [CanonicalTable]) {
    tables.sort_by_key(|t| (t.first_page, t.ordinal, t.table_id));
}

/// Merge canonical tables; running this on its own output is a no-op
pub fn merge_tables(mut tables: Vec<CanonicalTable>, config: &MergeConfig) -> Vec<CanonicalTable> {
    page_order(&mut tables);
    let mut merger = Merger::new(config);
    for table in tables {
        merger.push(table);
    }
    merger.finish()
}

/// Deduplicate resolved tables into canonical tables
pub fn deduplicate(tables: Vec<ResolvedTable>, config: &MergeConfig) -> Vec<CanonicalTable> {
    merge_tables(
        tables.into_iter().map(CanonicalTable::from_resolved).collect(),
        config,
    )
}

fn normalize_header(h: &str) -> String {
    h.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn same_headers(a: &[String], b: &[String]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| normalize_header(x) == normalize_header(y))
}

fn header_tokens(headers: &[String]) -> HashSet<String> {
    headers
        .iter()
        .flat_map(|h| {
            h.split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
                .map(|t| t.to_lowercase())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Token-set overlap (Jaccard) between two header rows
pub fn header_similarity(a: &[String], b: &[String]) -> f32 {
    let set_a = header_tokens(a);
    let set_b = header_tokens(b);
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f32 / union as f32
}

fn row_repeats_headers(row: &[CellValue], headers: &[String]) -> bool {
    !headers.is_empty()
        && row.len() == headers.len()
        && row
            .iter()
            .zip(headers)
            .all(|(cell, h)| normalize_header(&cell.as_text()) == normalize_header(h))
}

//! Cross-references between tables of one document
//!
//! Edges are symmetric and recorded once per kind on each side. The pairwise
//! scan is quadratic, which is fine for the handful of tables a document holds.

use crate::caption::{CAPTION_NUMERAL, UNTITLED};
use crate::config::LinkConfig;
use crate::merge::CanonicalTable;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

static TABLE_REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\btable\s+({CAPTION_NUMERAL})\b")).unwrap()
});

/// Why two tables are linked
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    SharedSection,
    ExplicitReference,
    LexicalOverlap,
}

/// An edge to another table of the same document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub table_id: u32,
    pub kind: RelationKind,
}

/// Map a title to its document section; first matching rule wins
pub fn classify_section(title: &str, config: &LinkConfig) -> String {
    let tokens = title_tokens(title, &[]);
    config
        .sections
        .iter()
        .find(|rule| {
            rule.keywords.iter().any(|keyword| {
                let keyword = keyword.to_lowercase();
                tokens.iter().any(|t| t.starts_with(&keyword))
            })
        })
        .map(|rule| rule.section.clone())
        .unwrap_or_else(|| config.default_section.clone())
}

/// Label every table with its section
pub fn assign_sections(tables: &mut [CanonicalTable], config: &LinkConfig) {
    for table in tables.iter_mut() {
        table.section = classify_section(&table.title, config);
    }
}

/// Discover and record edges between all pairs of tables
pub fn link_tables(tables: &mut [CanonicalTable], config: &LinkConfig) {
    let token_sets: Vec<HashSet<String>> = tables
        .iter()
        .map(|t| {
            if t.title == UNTITLED {
                HashSet::new()
            } else {
                title_tokens(&t.title, &config.stopwords)
            }
        })
        .collect();
    let references: Vec<HashSet<String>> = tables.iter().map(referenced_labels).collect();
    let keys: Vec<String> = tables.iter().map(reference_key).collect();

    let mut edges: Vec<(usize, usize, RelationKind)> = Vec::new();
    for i in 0..tables.len() {
        for j in (i + 1)..tables.len() {
            if tables[i].table_id == tables[j].table_id {
                continue;
            }

            if references[i].contains(&keys[j]) || references[j].contains(&keys[i]) {
                edges.push((i, j, RelationKind::ExplicitReference));
            }

            let shared = token_sets[i].intersection(&token_sets[j]).count();
            if shared >= config.min_shared_title_terms {
                edges.push((i, j, RelationKind::LexicalOverlap));
            }

            if tables[i].section == tables[j].section {
                edges.push((i, j, RelationKind::SharedSection));
            }
        }
    }

    for (i, j, kind) in edges {
        let (id_i, id_j) = (tables[i].table_id, tables[j].table_id);
        tables[i].relationships.insert(Relationship {
            table_id: id_j,
            kind,
        });
        tables[j].relationships.insert(Relationship {
            table_id: id_i,
            kind,
        });
    }

    log::debug!(
        "linked {} tables, {} edges",
        tables.len(),
        tables.iter().map(|t| t.relationships.len()).sum::<usize>() / 2
    );
}

/// What other tables use to refer to this one
fn reference_key(table: &CanonicalTable) -> String {
    table
        .label
        .clone()
        .unwrap_or_else(|| table.table_id.to_string())
        .to_uppercase()
}

/// Table numerals mentioned in a table's notes and totals
fn referenced_labels(table: &CanonicalTable) -> HashSet<String> {
    let own = reference_key(table);
    table
        .notes
        .iter()
        .chain(table.totals.keys())
        .chain(table.totals.values())
        .flat_map(|text| {
            TABLE_REFERENCE_RE
                .captures_iter(text)
                .map(|caps| caps[1].to_uppercase())
                .collect::<Vec<_>>()
        })
        .filter(|label| *label != own)
        .collect()
}

/// Lower-cased title words, minus stopwords and bare numbers
fn title_tokens(title: &str, stopwords: &[String]) -> HashSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !stopwords.iter().any(|s| s == t))
        .collect()
}

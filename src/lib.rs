//! Consolidation of raw table detections into canonical tables
//!
//! This crate provides:
//! - Structural validation and repair of analyzer candidates
//! - Title attribution from nearby text, ignoring letterhead and page furniture
//! - Merging of tables split across pages or detected twice
//! - Section labelling and cross-references between tables
//! - A shared memory of recurring table layouts across documents

pub mod batch;
pub mod candidate;
pub mod caption;
pub mod config;
pub mod linker;
pub mod merge;
pub mod patterns;
pub mod render;
pub mod session;
pub mod source;
pub mod validator;

pub use batch::{
    BatchReport, DocumentInput, DocumentStatus, DocumentSummary, ExtractionStats, Extractor,
};
pub use candidate::{BoundingBox, CellValue, Region, SpanPlacement, TableCandidate, TextSpan};
pub use config::{ConfigError, ExtractionConfig};
pub use merge::CanonicalTable;
pub use patterns::{PatternMemory, PatternMemoryError};
pub use render::{document_to_markdown, table_to_markdown};
pub use session::{
    CancellationToken, DocumentOutcome, DocumentResult, ExtractionSession, QualityMetrics,
    SessionState,
};
pub use source::{CandidateSource, JsonFeed, SourceError, TimeoutSource};

use std::path::Path;

/// Extract a single document from an in-memory candidate list with default settings
///
/// No pattern memory is involved; use [`Extractor`] to learn across documents.
pub fn consolidate(filename: &str, candidates: Vec<TableCandidate>) -> DocumentResult {
    let config = ExtractionConfig::default();
    ExtractionSession::new(filename, &config).run(&candidates)
}

/// Extract every feed file with the given configuration, sharing one memory
pub fn consolidate_feeds<P: AsRef<Path>>(
    feeds: &[P],
    config: ExtractionConfig,
    memory: Option<PatternMemory>,
) -> Result<(BatchReport, Extractor), ConsolidationError> {
    config.validate()?;
    let mut extractor = match memory {
        Some(memory) => Extractor::with_memory(config, std::sync::Arc::new(memory)),
        None => Extractor::new(config),
    };
    let inputs: Vec<DocumentInput> = feeds
        .iter()
        .map(|path| {
            let feed = JsonFeed::new(path);
            DocumentInput::new(feed.document_name(), feed)
        })
        .collect();
    let report = extractor.extract_batch(&inputs);
    Ok((report, extractor))
}

#[derive(Debug, thiserror::Error)]
pub enum ConsolidationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("pattern memory error: {0}")]
    Patterns(#[from] PatternMemoryError),
}

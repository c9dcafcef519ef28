//! Multi-document extraction
//!
//! Documents are independent, so a batch runs one session per document on a
//! bounded rayon pool. The only state shared between sessions is the pattern
//! memory. A panic inside one session is caught and reported as an internal
//! failure for that document; the rest of the batch is unaffected.

use crate::config::ExtractionConfig;
use crate::patterns::PatternMemory;
use crate::session::{
    document_id, CancellationToken, DocumentOutcome, DocumentResult, ExtractionSession,
    FailureKind,
};
use crate::source::CandidateSource;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// One document to extract
pub struct DocumentInput {
    pub filename: String,
    pub source: Box<dyn CandidateSource>,
    pub cancel: CancellationToken,
}

impl DocumentInput {
    pub fn new(filename: impl Into<String>, source: impl CandidateSource + 'static) -> Self {
        Self {
            filename: filename.into(),
            source: Box::new(source),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

impl std::fmt::Debug for DocumentInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentInput")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// How a document's extraction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Complete,
    Failed,
    Cancelled,
}

/// Compact record of one processed document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document: String,
    pub document_id: String,
    pub status: DocumentStatus,
    pub tables: usize,
    pub average_title_confidence: f32,
    pub processed_at: chrono::DateTime<chrono::Utc>,
}

impl DocumentSummary {
    fn of(result: &DocumentResult) -> Self {
        let (status, tables, average_title_confidence) = match &result.outcome {
            DocumentOutcome::Complete { tables, metrics } => {
                (DocumentStatus::Complete, tables.len(), metrics.average_title_confidence)
            }
            DocumentOutcome::Failed { .. } => (DocumentStatus::Failed, 0, 0.0),
            DocumentOutcome::Cancelled { .. } => (DocumentStatus::Cancelled, 0, 0.0),
        };
        Self {
            document: result.document.clone(),
            document_id: result.document_id.clone(),
            status,
            tables,
            average_title_confidence,
            processed_at: chrono::Utc::now(),
        }
    }
}

/// Running totals over everything an extractor has processed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub documents_processed: usize,
    pub documents_failed: usize,
    pub documents_cancelled: usize,
    pub total_tables: usize,
    /// Mean of the per-document averages over completed documents
    pub average_title_confidence: f32,
    pub patterns_learned: usize,
}

/// Results of one batch, in input order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub documents: Vec<DocumentResult>,
}

impl BatchReport {
    pub fn completed(&self) -> impl Iterator<Item = &DocumentResult> {
        self.documents.iter().filter(|d| d.is_complete())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DocumentResult> {
        self.documents
            .iter()
            .filter(|d| matches!(d.outcome, DocumentOutcome::Failed { .. }))
    }

    pub fn total_tables(&self) -> usize {
        self.documents.iter().map(|d| d.tables().len()).sum()
    }
}

/// Entry point for extracting one or many documents with shared learning
#[derive(Debug)]
pub struct Extractor {
    config: ExtractionConfig,
    memory: Option<Arc<PatternMemory>>,
    history: Vec<DocumentSummary>,
}

impl Extractor {
    /// Build an extractor; a fresh pattern memory is created when learning is on
    pub fn new(config: ExtractionConfig) -> Self {
        let memory = config
            .enable_learning
            .then(|| Arc::new(PatternMemory::new()));
        Self {
            config,
            memory,
            history: Vec::new(),
        }
    }

    /// Build an extractor around an existing memory (ignored when learning is off)
    pub fn with_memory(config: ExtractionConfig, memory: Arc<PatternMemory>) -> Self {
        let memory = config.enable_learning.then_some(memory);
        Self {
            config,
            memory,
            history: Vec::new(),
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn memory(&self) -> Option<&Arc<PatternMemory>> {
        self.memory.as_ref()
    }

    /// Every document processed so far, oldest first
    pub fn history(&self) -> &[DocumentSummary] {
        &self.history
    }

    /// Extract a single document
    pub fn extract(&mut self, input: &DocumentInput) -> DocumentResult {
        let result = run_isolated(&self.config, self.memory.as_ref(), input);
        self.history.push(DocumentSummary::of(&result));
        result
    }

    /// Extract many documents concurrently, `parallel_agents` at a time
    pub fn extract_batch(&mut self, inputs: &[DocumentInput]) -> BatchReport {
        let config = &self.config;
        let memory = self.memory.as_ref();
        let workers = config.parallel_agents.max(1);

        let documents: Vec<DocumentResult> = match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
        {
            Ok(pool) => pool.install(|| {
                inputs
                    .par_iter()
                    .map(|input| run_isolated(config, memory, input))
                    .collect()
            }),
            Err(e) => {
                log::warn!("worker pool unavailable ({}), extracting sequentially", e);
                inputs
                    .iter()
                    .map(|input| run_isolated(config, memory, input))
                    .collect()
            }
        };

        self.history.extend(documents.iter().map(DocumentSummary::of));
        log::info!(
            "batch of {} documents done with {} workers",
            documents.len(),
            workers
        );
        BatchReport { documents }
    }

    pub fn stats(&self) -> ExtractionStats {
        let count = |status: DocumentStatus| {
            self.history.iter().filter(|s| s.status == status).count()
        };
        let completed: Vec<&DocumentSummary> = self
            .history
            .iter()
            .filter(|s| s.status == DocumentStatus::Complete)
            .collect();
        let average_title_confidence = if completed.is_empty() {
            0.0
        } else {
            completed
                .iter()
                .map(|s| s.average_title_confidence)
                .sum::<f32>()
                / completed.len() as f32
        };

        ExtractionStats {
            documents_processed: self.history.len(),
            documents_failed: count(DocumentStatus::Failed),
            documents_cancelled: count(DocumentStatus::Cancelled),
            total_tables: self.history.iter().map(|s| s.tables).sum(),
            average_title_confidence,
            patterns_learned: self.memory.as_ref().map(|m| m.len()).unwrap_or(0),
        }
    }
}

/// Run one session, turning a panic into an internal failure
fn run_isolated(
    config: &ExtractionConfig,
    memory: Option<&Arc<PatternMemory>>,
    input: &DocumentInput,
) -> DocumentResult {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut session = ExtractionSession::new(input.filename.clone(), config)
            .with_cancellation(input.cancel.clone());
        if let Some(memory) = memory {
            session = session.with_memory(Arc::clone(memory));
        }
        session.run(input.source.as_ref())
    }));

    outcome.unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "session panicked".to_string());
        log::error!(
            "{} ({}): session panicked: {}",
            input.filename,
            document_id(&input.filename),
            message
        );
        DocumentResult::failed(&input.filename, FailureKind::Internal, message)
    })
}

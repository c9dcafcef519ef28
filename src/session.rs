//! Per-document extraction session
//!
//! A session walks one document through
//! `ReceivingCandidates -> Validating -> ResolvingTitles -> Merging -> Linking -> Complete`.
//! Each stage needs the complete output of the one before it, so nothing
//! inside a session runs concurrently. Cancellation is honored at every
//! transition and between units of work (one table, one merge decision); a
//! cancelled or failed session never publishes tables.

use crate::caption::{self, ResolvedTable};
use crate::candidate::TableCandidate;
use crate::config::ExtractionConfig;
use crate::linker;
use crate::merge::{self, CanonicalTable, Merger};
use crate::patterns::PatternMemory;
use crate::source::{CandidateSource, SourceError};
use crate::validator::{self, ValidatedTable, Verdict};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stages of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    ReceivingCandidates,
    Validating,
    ResolvingTitles,
    Merging,
    Linking,
    Complete,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("candidate feed unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),
    #[error("session cancelled during {0:?}")]
    Cancelled(SessionState),
    #[error("cannot enter {to:?} from {from:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

/// Shared flag used to stop a session between units of work
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Document-level failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The candidate feed could not produce candidates
    SourceUnavailable,
    /// The session itself broke (panic or misuse)
    Internal,
}

/// Aggregate quality figures for one document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub candidates: usize,
    /// Accepted candidates, repaired ones included
    pub accepted: usize,
    pub repaired: usize,
    pub rejected: usize,
    pub acceptance_rate: f32,
    pub average_title_confidence: f32,
    pub tables: usize,
    /// Only present when pattern learning is on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub novel_patterns: Option<usize>,
}

/// How a document's session ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Complete {
        tables: Vec<CanonicalTable>,
        metrics: QualityMetrics,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
    Cancelled {
        stage: SessionState,
    },
}

/// Everything a session reports for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub document: String,
    pub document_id: String,
    pub outcome: DocumentOutcome,
}

impl DocumentResult {
    pub fn failed(document: &str, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            document: document.to_string(),
            document_id: document_id(document),
            outcome: DocumentOutcome::Failed {
                kind,
                message: message.into(),
            },
        }
    }

    fn from_error(document: &str, error: SessionError) -> Self {
        match error {
            SessionError::Cancelled(stage) => {
                log::info!("{}: cancelled during {:?}", document, stage);
                Self {
                    document: document.to_string(),
                    document_id: document_id(document),
                    outcome: DocumentOutcome::Cancelled { stage },
                }
            }
            SessionError::SourceUnavailable(e) => {
                log::warn!("{}: candidate feed failed: {}", document, e);
                Self::failed(document, FailureKind::SourceUnavailable, e.to_string())
            }
            e @ SessionError::InvalidTransition { .. } => {
                Self::failed(document, FailureKind::Internal, e.to_string())
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, DocumentOutcome::Complete { .. })
    }

    /// Tables of a completed document (empty otherwise)
    pub fn tables(&self) -> &[CanonicalTable] {
        match &self.outcome {
            DocumentOutcome::Complete { tables, .. } => tables,
            _ => &[],
        }
    }

    pub fn metrics(&self) -> Option<&QualityMetrics> {
        match &self.outcome {
            DocumentOutcome::Complete { metrics, .. } => Some(metrics),
            _ => None,
        }
    }
}

/// Stable id for a document: blake3 of its base file name, 12 hex chars
pub fn document_id(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    blake3::hash(base.as_bytes()).to_hex().as_str()[..12].to_string()
}

/// Pipeline state for a single document
#[derive(Debug)]
pub struct ExtractionSession<'a> {
    document: String,
    config: &'a ExtractionConfig,
    memory: Option<Arc<PatternMemory>>,
    cancel: CancellationToken,
    state: SessionState,
    received: Option<Vec<TableCandidate>>,
    validated: Vec<ValidatedTable>,
    resolved: Vec<ResolvedTable>,
    tables: Vec<CanonicalTable>,
    candidate_count: usize,
    accepted: usize,
    repaired: usize,
    rejected: usize,
}

impl<'a> ExtractionSession<'a> {
    pub fn new(document: impl Into<String>, config: &'a ExtractionConfig) -> Self {
        Self {
            document: document.into(),
            config,
            memory: None,
            cancel: CancellationToken::new(),
            state: SessionState::ReceivingCandidates,
            received: None,
            validated: Vec::new(),
            resolved: Vec::new(),
            tables: Vec::new(),
            candidate_count: 0,
            accepted: 0,
            repaired: 0,
            rejected: 0,
        }
    }

    /// Attach the shared pattern memory; its presence turns learning on
    pub fn with_memory(mut self, memory: Arc<PatternMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    /// Run every stage and report the outcome; never panics on bad input
    pub fn run(self, source: &dyn CandidateSource) -> DocumentResult {
        let document = self.document.clone();
        match self.drive(source) {
            Ok(result) => result,
            Err(error) => DocumentResult::from_error(&document, error),
        }
    }

    fn drive(mut self, source: &dyn CandidateSource) -> Result<DocumentResult, SessionError> {
        self.receive(source)?;
        self.validate()?;
        self.resolve_titles()?;
        self.merge()?;
        self.link()?;
        self.finish()
    }

    /// Pull the document's candidates from the feed
    pub fn receive(&mut self, source: &dyn CandidateSource) -> Result<(), SessionError> {
        if self.state != SessionState::ReceivingCandidates || self.received.is_some() {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::ReceivingCandidates,
            });
        }
        self.check_cancelled()?;

        let candidates = source.fetch()?;
        log::debug!("{}: received {} candidates", self.document, candidates.len());
        self.candidate_count = candidates.len();
        self.received = Some(candidates);
        Ok(())
    }

    /// Validate every candidate; rejected ones are dropped here
    pub fn validate(&mut self) -> Result<(), SessionError> {
        if self.received.is_none() {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::Validating,
            });
        }
        self.enter(SessionState::ReceivingCandidates, SessionState::Validating)?;

        let candidates = self.received.take().unwrap_or_default();
        for candidate in candidates {
            self.check_cancelled()?;
            let validated = validator::validate(candidate, self.config.confidence_threshold);
            match validated.verdict {
                Verdict::Reject => {
                    log::info!(
                        "{}: rejected candidate {} ({} anomalies)",
                        self.document,
                        validated.candidate.id,
                        validated.anomalies.len()
                    );
                    self.rejected += 1;
                }
                Verdict::AcceptWithRepair => {
                    self.accepted += 1;
                    self.repaired += 1;
                    self.validated.push(validated);
                }
                Verdict::Accept => {
                    self.accepted += 1;
                    self.validated.push(validated);
                }
            }
        }

        // Ids follow reading order
        self.validated.sort_by_key(|v| (v.candidate.region.page, v.candidate.region.ordinal));
        Ok(())
    }

    /// Attach titles and assign session-sequential ids
    pub fn resolve_titles(&mut self) -> Result<(), SessionError> {
        self.enter(SessionState::Validating, SessionState::ResolvingTitles)?;

        let validated = std::mem::take(&mut self.validated);
        for (idx, table) in validated.into_iter().enumerate() {
            self.check_cancelled()?;
            self.resolved.push(caption::resolve(
                table,
                idx as u32 + 1,
                &self.config.titles,
                self.config.exclude_headers,
            ));
        }
        Ok(())
    }

    /// Fold duplicate and continued detections together
    pub fn merge(&mut self) -> Result<(), SessionError> {
        self.enter(SessionState::ResolvingTitles, SessionState::Merging)?;

        let mut singles: Vec<CanonicalTable> = std::mem::take(&mut self.resolved)
            .into_iter()
            .map(CanonicalTable::from_resolved)
            .collect();
        merge::page_order(&mut singles);

        let mut merger = Merger::new(&self.config.merge);
        for table in singles {
            self.check_cancelled()?;
            merger.push(table);
        }
        self.tables = merger.finish();
        Ok(())
    }

    /// Assign sections and, when context capture is on, relationship edges
    pub fn link(&mut self) -> Result<(), SessionError> {
        self.enter(SessionState::Merging, SessionState::Linking)?;

        linker::assign_sections(&mut self.tables, &self.config.linking);
        if self.config.capture_context {
            self.check_cancelled()?;
            linker::link_tables(&mut self.tables, &self.config.linking);
        }
        Ok(())
    }

    /// Record patterns and publish the result
    pub fn finish(mut self) -> Result<DocumentResult, SessionError> {
        self.enter(SessionState::Linking, SessionState::Complete)?;

        let novel_patterns = self.memory.as_ref().map(|memory| {
            let mut novel = 0;
            for table in &self.tables {
                match memory.observe(table, &self.document) {
                    Ok(observation) if observation.is_novel() => novel += 1,
                    Ok(_) => {}
                    Err(e) => log::warn!(
                        "{}: pattern update for table {} lost: {}",
                        self.document,
                        table.table_id,
                        e
                    ),
                }
            }
            novel
        });

        let average_title_confidence = if self.tables.is_empty() {
            0.0
        } else {
            self.tables.iter().map(|t| t.title_confidence).sum::<f32>() / self.tables.len() as f32
        };
        let acceptance_rate = if self.candidate_count == 0 {
            0.0
        } else {
            self.accepted as f32 / self.candidate_count as f32
        };

        let metrics = QualityMetrics {
            candidates: self.candidate_count,
            accepted: self.accepted,
            repaired: self.repaired,
            rejected: self.rejected,
            acceptance_rate,
            average_title_confidence,
            tables: self.tables.len(),
            novel_patterns,
        };

        log::info!(
            "{}: {} tables from {} candidates ({} rejected)",
            self.document,
            metrics.tables,
            metrics.candidates,
            metrics.rejected
        );

        Ok(DocumentResult {
            document_id: document_id(&self.document),
            document: self.document,
            outcome: DocumentOutcome::Complete {
                tables: self.tables,
                metrics,
            },
        })
    }

    fn enter(&mut self, from: SessionState, to: SessionState) -> Result<(), SessionError> {
        if self.state != from {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.check_cancelled()?;
        log::debug!("{}: {:?} -> {:?}", self.document, from, to);
        self.state = to;
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled(self.state));
        }
        Ok(())
    }
}

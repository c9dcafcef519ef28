//! Candidate feeds
//!
//! The page analyzer lives outside this crate; sessions only see it through
//! [`CandidateSource`]. A feed either produces every candidate for a document
//! or fails as a whole.

use crate::candidate::TableCandidate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("feed parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("feed timed out after {0:?}")]
    Timeout(Duration),
    #[error("feed unavailable: {0}")]
    Unavailable(String),
}

/// Something that can produce the candidates of one document
pub trait CandidateSource: Send + Sync {
    fn fetch(&self) -> Result<Vec<TableCandidate>, SourceError>;
}

impl CandidateSource for Vec<TableCandidate> {
    fn fetch(&self) -> Result<Vec<TableCandidate>, SourceError> {
        Ok(self.clone())
    }
}

impl<S: CandidateSource + ?Sized> CandidateSource for Arc<S> {
    fn fetch(&self) -> Result<Vec<TableCandidate>, SourceError> {
        (**self).fetch()
    }
}

/// On-disk feed layout: either `{"candidates": [...]}` or a bare array
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedFile {
    Document { candidates: Vec<TableCandidate> },
    Candidates(Vec<TableCandidate>),
}

impl FeedFile {
    pub fn into_candidates(self) -> Vec<TableCandidate> {
        match self {
            FeedFile::Document { candidates } | FeedFile::Candidates(candidates) => candidates,
        }
    }
}

/// Candidates stored as JSON on disk
#[derive(Debug, Clone)]
pub struct JsonFeed {
    path: PathBuf,
}

impl JsonFeed {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Document name the feed describes: the file name without a trailing `.json`
    pub fn document_name(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match name.strip_suffix(".json") {
            Some(stem) if !stem.is_empty() => stem.to_string(),
            _ => name,
        }
    }
}

impl CandidateSource for JsonFeed {
    fn fetch(&self) -> Result<Vec<TableCandidate>, SourceError> {
        let raw = std::fs::read_to_string(&self.path)?;
        let feed: FeedFile = serde_json::from_str(&raw)?;
        Ok(feed.into_candidates())
    }
}

/// Bounds how long a feed may take
///
/// The inner fetch runs on its own thread. When the deadline passes the
/// session moves on and the thread is left to finish in the background.
#[derive(Debug)]
pub struct TimeoutSource<S> {
    inner: Arc<S>,
    timeout: Duration,
}

impl<S: CandidateSource + 'static> TimeoutSource<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
        }
    }
}

impl<S: CandidateSource + 'static> CandidateSource for TimeoutSource<S> {
    fn fetch(&self) -> Result<Vec<TableCandidate>, SourceError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        std::thread::Builder::new()
            .name("candidate-feed".into())
            .spawn(move || {
                // The receiver may be gone after a timeout
                let _ = tx.send(inner.fetch());
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(SourceError::Timeout(self.timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SourceError::Unavailable(
                "feed worker exited without a result".into(),
            )),
        }
    }
}

//! Pattern memory: structural fingerprints seen across documents
//!
//! Purely observational. Sessions report every canonical table here and get
//! back whether its shape is new; extraction output is never touched.
//!
//! The store is shared between worker threads. Lookups take a read lock,
//! occurrence counters are atomics, and insertion of an unseen fingerprint
//! happens under the write lock through the map's entry API so two workers
//! seeing the same new shape at once still produce exactly one entry. Lock
//! acquisition is retried a bounded number of times; giving up reports
//! contention and the caller drops that update.

use crate::merge::CanonicalTable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::time::Duration;

/// Attempts made to take a lock before reporting contention
const LOCK_ATTEMPTS: u32 = 3;
const LOCK_BACKOFF: Duration = Duration::from_millis(2);

#[derive(Debug, thiserror::Error)]
pub enum PatternMemoryError {
    #[error("pattern memory busy after {attempts} attempts")]
    Contention { attempts: u32 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("pattern memory parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse row-count class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowBucket {
    Empty,
    /// 1-5 rows
    Few,
    /// 6-20 rows
    Moderate,
    /// 21-100 rows
    Many,
    /// More than 100 rows
    Huge,
}

impl RowBucket {
    pub fn of(rows: usize) -> Self {
        match rows {
            0 => RowBucket::Empty,
            1..=5 => RowBucket::Few,
            6..=20 => RowBucket::Moderate,
            21..=100 => RowBucket::Many,
            _ => RowBucket::Huge,
        }
    }
}

/// Structural signature of a table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternFingerprint {
    pub column_count: usize,
    /// Character-class shape of each header ("Task No." -> "Aa Aa.")
    pub header_shapes: Vec<String>,
    pub row_bucket: RowBucket,
}

impl PatternFingerprint {
    pub fn of(table: &CanonicalTable) -> Self {
        Self {
            column_count: table.column_count,
            header_shapes: table.headers.iter().map(|h| token_shape(h)).collect(),
            row_bucket: RowBucket::of(table.data.len()),
        }
    }

    /// Stable short identifier
    pub fn pattern_id(&self) -> String {
        let key = format!(
            "{}|{}|{:?}",
            self.column_count,
            self.header_shapes.join("\u{1f}"),
            self.row_bucket
        );
        blake3::hash(key.as_bytes()).to_hex().as_str()[..16].to_string()
    }
}

/// Map characters to classes and collapse runs
fn token_shape(text: &str) -> String {
    let mut shape = String::new();
    let mut last: Option<char> = None;
    for c in text.trim().chars() {
        let class = if c.is_uppercase() {
            'A'
        } else if c.is_lowercase() {
            'a'
        } else if c.is_ascii_digit() {
            '9'
        } else if c.is_whitespace() {
            ' '
        } else {
            c
        };
        if last != Some(class) {
            shape.push(class);
            last = Some(class);
        }
    }
    shape
}

/// Result of reporting one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Novel { pattern_id: String },
    Seen { pattern_id: String, occurrences: u64 },
}

impl Observation {
    pub fn is_novel(&self) -> bool {
        matches!(self, Observation::Novel { .. })
    }
}

/// Learned pattern as exposed in snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub pattern_id: String,
    pub fingerprint: PatternFingerprint,
    pub example_title: String,
    pub first_document: String,
    pub column_count: usize,
    pub occurrences: u64,
    pub first_seen: DateTime<Utc>,
}

/// One novel-pattern event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    pub pattern_id: String,
    pub example_title: String,
    pub document: String,
    pub discovered_at: DateTime<Utc>,
}

/// Point-in-time copy of the memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSnapshot {
    pub total_patterns: usize,
    /// Fingerprint cap of the memory the snapshot was taken from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_limit: Option<usize>,
    pub patterns: Vec<PatternRecord>,
    pub discoveries: Vec<Discovery>,
}

#[derive(Debug)]
struct PatternEntry {
    pattern_id: String,
    example_title: String,
    first_document: String,
    first_seen: DateTime<Utc>,
    occurrences: AtomicU64,
    last_seen: AtomicU64,
}

#[derive(Debug, Default)]
struct Store {
    patterns: HashMap<PatternFingerprint, PatternEntry>,
    discoveries: Vec<Discovery>,
}

/// Process-wide store of learned table shapes
#[derive(Debug, Default)]
pub struct PatternMemory {
    store: RwLock<Store>,
    capacity: Option<usize>,
    clock: AtomicU64,
}

impl PatternMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the number of fingerprints; the least recently seen one is
    /// evicted to make room
    pub fn with_capacity_limit(limit: usize) -> Self {
        Self {
            capacity: Some(limit.max(1)),
            ..Self::default()
        }
    }

    /// Report a canonical table found in `document`
    pub fn observe(
        &self,
        table: &CanonicalTable,
        document: &str,
    ) -> Result<Observation, PatternMemoryError> {
        let fingerprint = PatternFingerprint::of(table);
        let tick = self.clock.fetch_add(1, Ordering::Relaxed) + 1;

        {
            let store = self.read_store()?;
            if let Some(entry) = store.patterns.get(&fingerprint) {
                return Ok(Self::bump(entry, tick));
            }
        }

        let mut store = self.write_store()?;
        if let Some(limit) = self.capacity {
            if store.patterns.len() >= limit && !store.patterns.contains_key(&fingerprint) {
                evict_least_recent(&mut store);
            }
        }

        let store = &mut *store;
        match store.patterns.entry(fingerprint) {
            Entry::Occupied(entry) => Ok(Self::bump(entry.get(), tick)),
            Entry::Vacant(slot) => {
                let pattern_id = slot.key().pattern_id();
                let now = Utc::now();
                log::info!(
                    "novel table pattern {} ({} columns) in {}: {:?}",
                    pattern_id,
                    slot.key().column_count,
                    document,
                    table.title
                );
                store.discoveries.push(Discovery {
                    pattern_id: pattern_id.clone(),
                    example_title: table.title.clone(),
                    document: document.to_string(),
                    discovered_at: now,
                });
                slot.insert(PatternEntry {
                    pattern_id: pattern_id.clone(),
                    example_title: table.title.clone(),
                    first_document: document.to_string(),
                    first_seen: now,
                    occurrences: AtomicU64::new(1),
                    last_seen: AtomicU64::new(tick),
                });
                Ok(Observation::Novel { pattern_id })
            }
        }
    }

    fn bump(entry: &PatternEntry, tick: u64) -> Observation {
        let occurrences = entry.occurrences.fetch_add(1, Ordering::Relaxed) + 1;
        entry.last_seen.fetch_max(tick, Ordering::Relaxed);
        Observation::Seen {
            pattern_id: entry.pattern_id.clone(),
            occurrences,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot_store().patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every record, oldest first
    pub fn snapshot(&self) -> PatternSnapshot {
        let store = self.snapshot_store();
        let mut patterns: Vec<PatternRecord> = store
            .patterns
            .iter()
            .map(|(fingerprint, entry)| PatternRecord {
                pattern_id: entry.pattern_id.clone(),
                fingerprint: fingerprint.clone(),
                example_title: entry.example_title.clone(),
                first_document: entry.first_document.clone(),
                column_count: fingerprint.column_count,
                occurrences: entry.occurrences.load(Ordering::Relaxed),
                first_seen: entry.first_seen,
            })
            .collect();
        patterns.sort_by(|a, b| {
            a.first_seen
                .cmp(&b.first_seen)
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });

        PatternSnapshot {
            total_patterns: patterns.len(),
            capacity_limit: self.capacity,
            patterns,
            discoveries: store.discoveries.clone(),
        }
    }

    /// Rebuild a memory from a snapshot
    pub fn from_snapshot(snapshot: PatternSnapshot) -> Self {
        let memory = match snapshot.capacity_limit {
            Some(limit) => Self::with_capacity_limit(limit),
            None => Self::new(),
        };
        {
            let mut store = memory
                .store
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for (tick, record) in snapshot.patterns.into_iter().enumerate() {
                store.patterns.insert(
                    record.fingerprint,
                    PatternEntry {
                        pattern_id: record.pattern_id,
                        example_title: record.example_title,
                        first_document: record.first_document,
                        first_seen: record.first_seen,
                        occurrences: AtomicU64::new(record.occurrences),
                        last_seen: AtomicU64::new(tick as u64),
                    },
                );
            }
            store.discoveries = snapshot.discoveries;
        }
        memory
            .clock
            .store(memory.len() as u64, Ordering::Relaxed);
        memory
    }

    /// Persist the current snapshot as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PatternMemoryError> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a memory saved with [`PatternMemory::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PatternMemoryError> {
        let raw = std::fs::read_to_string(path)?;
        let snapshot: PatternSnapshot = serde_json::from_str(&raw)?;
        Ok(Self::from_snapshot(snapshot))
    }

    fn read_store(&self) -> Result<RwLockReadGuard<'_, Store>, PatternMemoryError> {
        for attempt in 0..LOCK_ATTEMPTS {
            match self.store.try_read() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => std::thread::sleep(LOCK_BACKOFF * (attempt + 1)),
            }
        }
        Err(PatternMemoryError::Contention {
            attempts: LOCK_ATTEMPTS,
        })
    }

    fn write_store(&self) -> Result<RwLockWriteGuard<'_, Store>, PatternMemoryError> {
        for attempt in 0..LOCK_ATTEMPTS {
            match self.store.try_write() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => std::thread::sleep(LOCK_BACKOFF * (attempt + 1)),
            }
        }
        Err(PatternMemoryError::Contention {
            attempts: LOCK_ATTEMPTS,
        })
    }

    fn snapshot_store(&self) -> RwLockReadGuard<'_, Store> {
        self.store
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn evict_least_recent(store: &mut Store) {
    let oldest = store
        .patterns
        .iter()
        .min_by_key(|(_, entry)| entry.last_seen.load(Ordering::Relaxed))
        .map(|(fingerprint, _)| fingerprint.clone());
    if let Some(fingerprint) = oldest {
        log::debug!("pattern memory full, evicting {}", fingerprint.pattern_id());
        store.patterns.remove(&fingerprint);
    }
}

//! In-memory persistence gateway.
//!
//! Tables live behind one lock. A commit runs as a transaction that records
//! an undo entry for every row it touches; any error before the status flip
//! replays the undo log so no partial write is ever observable.
//!
//! Fault injection (`fail_next_commit`) aborts a commit after a chosen number
//! of row writes, which is how crash-mid-commit behaviour is exercised.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use lingo_models::{
    ChunkId, ChunkSpec, ChunkStatus, ChunkSummary, SubtitleArtifact, TranslationRow,
    VocabularyRow,
};

use crate::error::{StoreError, StoreResult};
use crate::gateway::{ChunkCommit, PersistenceGateway};
use crate::metrics::record_commit;

type VocabularyKey = (ChunkId, String);
type TranslationKey = (ChunkId, u32);

#[derive(Debug, Clone)]
struct ChunkRecord {
    spec: ChunkSpec,
    status: ChunkStatus,
    summary: ChunkSummary,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    chunks: HashMap<ChunkId, ChunkRecord>,
    vocabulary: BTreeMap<VocabularyKey, VocabularyRow>,
    translations: BTreeMap<TranslationKey, TranslationRow>,
    subtitles: HashMap<ChunkId, SubtitleArtifact>,
}

/// A fault armed for the next commit.
#[derive(Debug, Clone)]
pub struct CommitFault {
    /// Row writes that succeed before the fault fires
    pub after_writes: usize,
    /// Fire an integrity violation instead of a transient write failure
    pub integrity: bool,
}

enum Undo {
    Vocabulary(VocabularyKey, Option<VocabularyRow>),
    Translation(TranslationKey, Option<TranslationRow>),
    Subtitle(ChunkId, Option<SubtitleArtifact>),
    Chunk(ChunkId, Option<ChunkRecord>),
}

struct Transaction<'a> {
    tables: &'a mut Tables,
    undo: Vec<Undo>,
    writes: usize,
    fault: Option<CommitFault>,
}

impl<'a> Transaction<'a> {
    fn begin(tables: &'a mut Tables, fault: Option<CommitFault>) -> Self {
        Self {
            tables,
            undo: Vec::new(),
            writes: 0,
            fault,
        }
    }

    fn before_write(&mut self) -> StoreResult<()> {
        if let Some(fault) = &self.fault {
            if self.writes == fault.after_writes {
                let msg = format!("injected fault after {} writes", self.writes);
                return Err(if fault.integrity {
                    StoreError::integrity(msg)
                } else {
                    StoreError::WriteFailed(msg)
                });
            }
        }
        self.writes += 1;
        Ok(())
    }

    fn delete_vocabulary(&mut self, key: VocabularyKey) -> StoreResult<()> {
        self.before_write()?;
        let prev = self.tables.vocabulary.remove(&key);
        self.undo.push(Undo::Vocabulary(key, prev));
        Ok(())
    }

    fn put_vocabulary(&mut self, row: VocabularyRow) -> StoreResult<()> {
        self.before_write()?;
        let key = (row.chunk_id.clone(), row.word.clone());
        let prev = self.tables.vocabulary.insert(key.clone(), row);
        self.undo.push(Undo::Vocabulary(key, prev));
        Ok(())
    }

    fn delete_translation(&mut self, key: TranslationKey) -> StoreResult<()> {
        self.before_write()?;
        let prev = self.tables.translations.remove(&key);
        self.undo.push(Undo::Translation(key, prev));
        Ok(())
    }

    fn put_translation(&mut self, row: TranslationRow) -> StoreResult<()> {
        self.before_write()?;
        let key = (row.chunk_id.clone(), row.segment_index);
        let prev = self.tables.translations.insert(key.clone(), row);
        self.undo.push(Undo::Translation(key, prev));
        Ok(())
    }

    fn put_subtitle(&mut self, artifact: SubtitleArtifact) -> StoreResult<()> {
        self.before_write()?;
        let key = artifact.chunk_id.clone();
        let prev = self.tables.subtitles.insert(key.clone(), artifact);
        self.undo.push(Undo::Subtitle(key, prev));
        Ok(())
    }

    fn put_chunk(&mut self, record: ChunkRecord) -> StoreResult<()> {
        self.before_write()?;
        let key = record.spec.chunk_id.clone();
        let prev = self.tables.chunks.insert(key.clone(), record);
        self.undo.push(Undo::Chunk(key, prev));
        Ok(())
    }

    fn rollback(self) {
        let Transaction { tables, undo, .. } = self;
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Vocabulary(key, prev) => restore(&mut tables.vocabulary, key, prev),
                Undo::Translation(key, prev) => restore(&mut tables.translations, key, prev),
                Undo::Subtitle(key, prev) => match prev {
                    Some(v) => {
                        tables.subtitles.insert(key, v);
                    }
                    None => {
                        tables.subtitles.remove(&key);
                    }
                },
                Undo::Chunk(key, prev) => match prev {
                    Some(v) => {
                        tables.chunks.insert(key, v);
                    }
                    None => {
                        tables.chunks.remove(&key);
                    }
                },
            }
        }
    }
}

fn restore<K: Ord, V>(table: &mut BTreeMap<K, V>, key: K, prev: Option<V>) {
    match prev {
        Some(v) => {
            table.insert(key, v);
        }
        None => {
            table.remove(&key);
        }
    }
}

/// Gateway backed by process memory.
#[derive(Default)]
pub struct MemoryGateway {
    tables: Mutex<Tables>,
    fault: Mutex<Option<CommitFault>>,
    commits: Mutex<u64>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a transient write failure for the next commit.
    pub async fn fail_next_commit(&self, after_writes: usize) {
        *self.fault.lock().await = Some(CommitFault {
            after_writes,
            integrity: false,
        });
    }

    /// Arm an arbitrary fault for the next commit.
    pub async fn arm_fault(&self, fault: CommitFault) {
        *self.fault.lock().await = Some(fault);
    }

    /// Number of successful commits.
    pub async fn commit_count(&self) -> u64 {
        *self.commits.lock().await
    }

    pub async fn vocabulary(&self, chunk_id: &ChunkId) -> Vec<VocabularyRow> {
        let tables = self.tables.lock().await;
        tables
            .vocabulary
            .iter()
            .filter(|((id, _), _)| id == chunk_id)
            .map(|(_, row)| row.clone())
            .collect()
    }

    pub async fn translations(&self, chunk_id: &ChunkId) -> Vec<TranslationRow> {
        let tables = self.tables.lock().await;
        tables
            .translations
            .iter()
            .filter(|((id, _), _)| id == chunk_id)
            .map(|(_, row)| row.clone())
            .collect()
    }

    pub async fn subtitle(&self, chunk_id: &ChunkId) -> Option<SubtitleArtifact> {
        self.tables.lock().await.subtitles.get(chunk_id).cloned()
    }

    /// Vocabulary rows across all chunks.
    pub async fn vocabulary_total(&self) -> usize {
        self.tables.lock().await.vocabulary.len()
    }

    pub async fn chunk_updated_at(&self, chunk_id: &ChunkId) -> Option<DateTime<Utc>> {
        self.tables
            .lock()
            .await
            .chunks
            .get(chunk_id)
            .map(|c| c.updated_at)
    }

    fn validate(commit: &ChunkCommit) -> StoreResult<()> {
        if commit.new_status != ChunkStatus::Finalized {
            return Err(StoreError::integrity(format!(
                "commit must finalize chunk, got {}",
                commit.new_status
            )));
        }
        if commit.subtitle.chunk_id != commit.chunk_id {
            return Err(StoreError::integrity("subtitle belongs to another chunk"));
        }

        let mut words = HashSet::new();
        for row in &commit.vocabulary {
            if row.chunk_id != commit.chunk_id {
                return Err(StoreError::integrity("vocabulary row belongs to another chunk"));
            }
            if !words.insert(row.word.as_str()) {
                return Err(StoreError::integrity(format!(
                    "duplicate vocabulary word '{}'",
                    row.word
                )));
            }
        }

        let mut segments = HashSet::new();
        for row in &commit.translations {
            if row.chunk_id != commit.chunk_id {
                return Err(StoreError::integrity("translation row belongs to another chunk"));
            }
            if !segments.insert(row.segment_index) {
                return Err(StoreError::integrity(format!(
                    "duplicate translation for segment {}",
                    row.segment_index
                )));
            }
        }
        Ok(())
    }

    /// Replace the chunk's rows with the commit's rows and flip the status
    /// last. Stale rows from an earlier commit are deleted first so a re-run
    /// never leaves duplicates behind.
    fn apply(tx: &mut Transaction<'_>, commit: ChunkCommit) -> StoreResult<()> {
        let mut record = tx
            .tables
            .chunks
            .get(&commit.chunk_id)
            .cloned()
            .ok_or_else(|| StoreError::integrity(format!("unknown chunk {}", commit.chunk_id)))?;

        let stale_words: Vec<_> = tx
            .tables
            .vocabulary
            .keys()
            .filter(|(id, _)| *id == commit.chunk_id)
            .cloned()
            .collect();
        for key in stale_words {
            tx.delete_vocabulary(key)?;
        }
        let stale_translations: Vec<_> = tx
            .tables
            .translations
            .keys()
            .filter(|(id, _)| *id == commit.chunk_id)
            .cloned()
            .collect();
        for key in stale_translations {
            tx.delete_translation(key)?;
        }

        let summary = commit.summary();
        for row in commit.vocabulary {
            tx.put_vocabulary(row)?;
        }
        for row in commit.translations {
            tx.put_translation(row)?;
        }
        tx.put_subtitle(commit.subtitle)?;

        record.status = commit.new_status;
        record.summary = summary;
        record.updated_at = Utc::now();
        tx.put_chunk(record)
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn ensure_chunk(&self, chunk: &ChunkSpec) -> StoreResult<ChunkStatus> {
        let mut tables = self.tables.lock().await;
        let record = tables
            .chunks
            .entry(chunk.chunk_id.clone())
            .or_insert_with(|| ChunkRecord {
                spec: chunk.clone(),
                status: ChunkStatus::Created,
                summary: ChunkSummary::default(),
                updated_at: Utc::now(),
            });
        Ok(record.status)
    }

    async fn read_chunk_status(&self, chunk_id: &ChunkId) -> StoreResult<ChunkStatus> {
        self.tables
            .lock()
            .await
            .chunks
            .get(chunk_id)
            .map(|c| c.status)
            .ok_or_else(|| StoreError::not_found(chunk_id.as_str()))
    }

    async fn read_chunk_summary(&self, chunk_id: &ChunkId) -> StoreResult<ChunkSummary> {
        self.tables
            .lock()
            .await
            .chunks
            .get(chunk_id)
            .map(|c| c.summary.clone())
            .ok_or_else(|| StoreError::not_found(chunk_id.as_str()))
    }

    async fn commit_chunk_result(&self, commit: ChunkCommit) -> StoreResult<()> {
        let started = Instant::now();
        let chunk_id = commit.chunk_id.clone();

        if let Err(e) = Self::validate(&commit) {
            record_commit("rejected", started.elapsed().as_secs_f64());
            return Err(e);
        }

        let fault = self.fault.lock().await.take();
        let mut tables = self.tables.lock().await;
        let mut tx = Transaction::begin(&mut tables, fault);

        match Self::apply(&mut tx, commit) {
            Ok(()) => {
                let writes = tx.writes;
                drop(tx);
                drop(tables);
                *self.commits.lock().await += 1;
                record_commit("ok", started.elapsed().as_secs_f64());
                debug!(chunk_id = %chunk_id, writes, "Chunk committed");
                Ok(())
            }
            Err(e) => {
                let writes = tx.writes;
                tx.rollback();
                record_commit("rolled_back", started.elapsed().as_secs_f64());
                warn!(chunk_id = %chunk_id, writes, "Chunk commit rolled back: {}", e);
                Err(e)
            }
        }
    }

    async fn mark_chunk_failed(&self, chunk_id: &ChunkId) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let record = tables
            .chunks
            .get_mut(chunk_id)
            .ok_or_else(|| StoreError::not_found(chunk_id.as_str()))?;
        if record.status != ChunkStatus::Finalized {
            record.status = ChunkStatus::Failed;
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}

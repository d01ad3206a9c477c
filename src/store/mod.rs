mod hosted;
mod local;

pub use hosted::HostedIndex;
pub use local::LocalIndex;

use crate::chunker::Chunk;
use crate::config::AzureConfig;
use crate::error::CoreResult;
use chrono::{DateTime, Utc};
use std::path::Path;

/// `(chunk, score)`; score is provider-native, higher is better after RRF
/// normalization in the hybrid path.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f64,
}

/// Capability for mutating the index: upsert and delete chunks keyed by id
/// and source file.
pub trait WriteIndex: Send + Sync {
    fn ensure_index(&self) -> CoreResult<()>;
    fn upsert_chunks(&self, chunks: &[Chunk]) -> CoreResult<()>;
    fn delete_chunks_for_file(&self, source_file: &str) -> CoreResult<()>;
}

/// Capability for querying the index: a ranked list of (chunk, score) for
/// (query_text, query_vector, k), plus status aggregates.
pub trait ReadIndex: Send + Sync {
    fn search(&self, query: &str, q_vec: &[f32], top_k: usize) -> CoreResult<Vec<SearchHit>>;
    fn get_chunk_count(&self) -> usize;
    fn get_source_file_count(&self) -> usize;
    fn get_last_indexed_time(&self) -> Option<DateTime<Utc>>;
}

/// Startup-selected store capability, combining both roles since the local
/// backend's single SQLite connection pool serves both.
pub enum StoreHandle {
    Local(LocalIndex),
    Hosted(HostedIndex),
}

impl StoreHandle {
    pub fn local(database_path: &Path) -> CoreResult<Self> {
        Ok(StoreHandle::Local(LocalIndex::open(database_path)?))
    }

    pub fn hosted(config: &AzureConfig) -> Self {
        StoreHandle::Hosted(HostedIndex::new(config))
    }
}

impl WriteIndex for StoreHandle {
    fn ensure_index(&self) -> CoreResult<()> {
        match self {
            StoreHandle::Local(s) => s.ensure_index(),
            StoreHandle::Hosted(s) => s.ensure_index(),
        }
    }

    fn upsert_chunks(&self, chunks: &[Chunk]) -> CoreResult<()> {
        match self {
            StoreHandle::Local(s) => s.upsert_chunks(chunks),
            StoreHandle::Hosted(s) => s.upsert_chunks(chunks),
        }
    }

    fn delete_chunks_for_file(&self, source_file: &str) -> CoreResult<()> {
        match self {
            StoreHandle::Local(s) => s.delete_chunks_for_file(source_file),
            StoreHandle::Hosted(s) => s.delete_chunks_for_file(source_file),
        }
    }
}

impl ReadIndex for StoreHandle {
    fn search(&self, query: &str, q_vec: &[f32], top_k: usize) -> CoreResult<Vec<SearchHit>> {
        match self {
            StoreHandle::Local(s) => s.search(query, q_vec, top_k),
            StoreHandle::Hosted(s) => s.search(query, q_vec, top_k),
        }
    }

    fn get_chunk_count(&self) -> usize {
        match self {
            StoreHandle::Local(s) => s.get_chunk_count(),
            StoreHandle::Hosted(s) => s.get_chunk_count(),
        }
    }

    fn get_source_file_count(&self) -> usize {
        match self {
            StoreHandle::Local(s) => s.get_source_file_count(),
            StoreHandle::Hosted(s) => s.get_source_file_count(),
        }
    }

    fn get_last_indexed_time(&self) -> Option<DateTime<Utc>> {
        match self {
            StoreHandle::Local(s) => s.get_last_indexed_time(),
            StoreHandle::Hosted(s) => s.get_last_indexed_time(),
        }
    }
}

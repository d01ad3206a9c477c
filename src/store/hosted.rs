use chrono::{DateTime, Utc};

use super::{ReadIndex, SearchHit, WriteIndex};
use crate::chunker::Chunk;
use crate::config::AzureConfig;
use crate::error::{CoreError, CoreResult};

/// Hosted search index backend (native vector support). Stub surface only —
/// the abstract write/read index capabilities this core consumes; network
/// wiring to the actual hosted service belongs to the caller/transport layer.
pub struct HostedIndex {
    endpoint: String,
    #[allow(dead_code)]
    key: String,
    #[allow(dead_code)]
    index_name: String,
}

impl HostedIndex {
    pub fn new(config: &AzureConfig) -> Self {
        Self {
            endpoint: config.search_endpoint.clone(),
            key: config.search_key.clone(),
            index_name: config.search_index.clone(),
        }
    }
}

impl WriteIndex for HostedIndex {
    fn ensure_index(&self) -> CoreResult<()> {
        Err(CoreError::Store(format!(
            "hosted store not wired to a transport (endpoint {})",
            self.endpoint
        )))
    }

    fn upsert_chunks(&self, _chunks: &[Chunk]) -> CoreResult<()> {
        Err(CoreError::Store(format!(
            "hosted store not wired to a transport (endpoint {})",
            self.endpoint
        )))
    }

    fn delete_chunks_for_file(&self, _source_file: &str) -> CoreResult<()> {
        Err(CoreError::Store(format!(
            "hosted store not wired to a transport (endpoint {})",
            self.endpoint
        )))
    }
}

impl ReadIndex for HostedIndex {
    fn search(&self, _query: &str, _q_vec: &[f32], _top_k: usize) -> CoreResult<Vec<SearchHit>> {
        Err(CoreError::Store(format!(
            "hosted store not wired to a transport (endpoint {})",
            self.endpoint
        )))
    }

    fn get_chunk_count(&self) -> usize {
        0
    }

    fn get_source_file_count(&self) -> usize {
        0
    }

    fn get_last_indexed_time(&self) -> Option<DateTime<Utc>> {
        None
    }
}

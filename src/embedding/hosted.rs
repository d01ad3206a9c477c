use super::Embedder;
use crate::config::AzureConfig;
use crate::error::{CoreError, CoreResult};

/// Remote hosted embedding backend. Stub surface only — the abstract
/// `Embedder` capability this core consumes; network wiring to the actual
/// Azure embedding endpoint belongs to the caller/transport layer.
pub struct HostedEmbedder {
    endpoint: String,
    #[allow(dead_code)]
    key: String,
    dimension: usize,
}

impl HostedEmbedder {
    pub fn new(config: &AzureConfig) -> Self {
        Self {
            endpoint: config.embedding_endpoint.clone(),
            key: config.embedding_key.clone(),
            dimension: super::local::EMBEDDING_DIM,
        }
    }
}

impl Embedder for HostedEmbedder {
    fn embed_batch(&self, _texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        Err(CoreError::Embedder(format!(
            "hosted embedder not wired to a transport (endpoint {})",
            self.endpoint
        )))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

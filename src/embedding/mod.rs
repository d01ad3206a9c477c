mod hosted;
mod local;

pub use hosted::HostedEmbedder;
pub use local::LocalEmbedder;

use crate::config::AzureConfig;
use crate::error::CoreResult;
use std::path::Path;

/// Capability for mapping text to fixed-dimension, L2-normalized vectors.
/// The rest of the core consumes only this trait, never a concrete provider.
pub trait Embedder: Send + Sync {
    /// Embeds an ordered batch of texts, returning vectors in the same order.
    fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>>;

    fn embed_one(&self, text: &str) -> CoreResult<Vec<f32>> {
        Ok(self.embed_batch(&[text.to_string()])?.remove(0))
    }

    fn dimension(&self) -> usize;
}

/// Startup-selected embedder capability. Dispatch happens once, here; every
/// other module depends on `dyn Embedder`.
pub enum EmbedderHandle {
    Local(LocalEmbedder),
    Hosted(HostedEmbedder),
}

impl EmbedderHandle {
    pub fn local(model_path: Option<&Path>) -> CoreResult<Self> {
        Ok(EmbedderHandle::Local(LocalEmbedder::new(model_path)?))
    }

    pub fn hosted(config: &AzureConfig) -> Self {
        EmbedderHandle::Hosted(HostedEmbedder::new(config))
    }
}

impl Embedder for EmbedderHandle {
    fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        match self {
            EmbedderHandle::Local(e) => e.embed_batch(texts),
            EmbedderHandle::Hosted(e) => e.embed_batch(texts),
        }
    }

    fn dimension(&self) -> usize {
        match self {
            EmbedderHandle::Local(e) => e.dimension(),
            EmbedderHandle::Hosted(e) => e.dimension(),
        }
    }
}

use crate::{GenerationError, IndexError, RetrievedChunk};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Returns up to `top_k` chunks, most similar first.
    async fn similarity_search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, IndexError>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

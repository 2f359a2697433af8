use crate::embeddings::Embedder;
use crate::prompt::PromptTemplate;
use crate::stores::LocalVectorStore;
use crate::traits::{TextGenerator, VectorIndex};
use crate::{Answer, IndexError, QueryError, QueryOptions, RetrievedChunk};
use std::path::Path;
use tracing::{debug, info};

/// Retrieval-augmented question answering: embed the question, fetch the
/// nearest chunks, stuff them into the prompt and ask the generator.
pub struct RetrievalQa<E, V, G>
where
    E: Embedder,
    V: VectorIndex,
    G: TextGenerator,
{
    embedder: E,
    index: V,
    generator: G,
    prompt: PromptTemplate,
    options: QueryOptions,
}

impl<E, G> RetrievalQa<E, LocalVectorStore, G>
where
    E: Embedder,
    G: TextGenerator,
{
    /// Loads the persisted index at `index_path`. Fails without touching the
    /// generator when the index is missing, corrupt or built by another model.
    pub async fn from_index_path(
        index_path: &Path,
        embedder: E,
        generator: G,
    ) -> Result<Self, IndexError> {
        let index = LocalVectorStore::load(index_path, &embedder).await?;
        info!(
            index = %index_path.display(),
            chunks = index.len(),
            model = %embedder.model_name(),
            "vector index loaded"
        );
        Ok(Self::new(embedder, index, generator))
    }
}

impl<E, V, G> RetrievalQa<E, V, G>
where
    E: Embedder,
    V: VectorIndex,
    G: TextGenerator,
{
    pub fn new(embedder: E, index: V, generator: G) -> Self {
        Self {
            embedder,
            index,
            generator,
            prompt: PromptTemplate::default(),
            options: QueryOptions::default(),
        }
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> QueryOptions {
        self.options
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>, QueryError> {
        let query_vector = self.embedder.embed_query(question).await?;
        Ok(self
            .index
            .similarity_search(&query_vector, self.options.top_k)
            .await?)
    }

    pub async fn answer(&self, question: &str) -> Result<Answer, QueryError> {
        if question.trim().is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let sources = self.retrieve(question).await?;
        debug!(hits = sources.len(), top_k = self.options.top_k, "retrieved context");

        let prompt = self.prompt.render_with_sources(&sources, question);
        let text = self.generator.generate(&prompt).await?;

        Ok(Answer { text, sources })
    }
}

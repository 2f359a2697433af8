use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;
pub const NGRAM_MODEL_NAME: &str = "char-trigram-fnv1a";

pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_EMBEDDING_MODEL_DIMENSIONS: usize = 384;
pub const DEFAULT_INFERENCE_URL: &str = "https://router.huggingface.co/hf-inference/models";

const EMBED_BATCH: usize = 32;

/// Maps text to fixed-size vectors. Indexing and querying must use the same
/// model, which is why the name and dimension are part of the contract.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dimensions(&self) -> usize;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            EmbeddingError::InvalidResponse("no vector returned for query".to_string())
        })
    }
}

#[async_trait]
impl<T> Embedder for Box<T>
where
    T: Embedder + ?Sized,
{
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (**self).embed_documents(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed_query(text).await
    }
}

/// Hashed character-trigram embedder. Needs no network and no model download.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        NGRAM_MODEL_NAME
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

/// Sentence embeddings from the Hugging Face feature-extraction pipeline.
pub struct HuggingFaceEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
    token: Option<String>,
}

impl HuggingFaceEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        token: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            dimensions,
            token,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn endpoint(&self) -> Result<Url, EmbeddingError> {
        Ok(Url::parse(&format!(
            "{}/{}/pipeline/feature-extraction",
            self.base_url.trim_end_matches('/'),
            self.model
        ))?)
    }

    async fn embed_batch(
        &self,
        endpoint: &Url,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut request = self.client.post(endpoint.clone()).json(&json!({
            "inputs": batch,
            "options": { "wait_for_model": true },
        }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::BackendResponse { status, details });
        }

        let payload: Value = response.json().await?;
        parse_feature_vectors(&payload, batch.len(), self.dimensions)
    }
}

#[async_trait]
impl Embedder for HuggingFaceEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let endpoint = self.endpoint()?;
        let mut vectors = Vec::with_capacity(texts.len());
        for (position, batch) in texts.chunks(EMBED_BATCH).enumerate() {
            debug!(model = %self.model, batch = position, size = batch.len(), "embedding batch");
            vectors.extend(self.embed_batch(&endpoint, batch).await?);
        }
        Ok(vectors)
    }
}

/// Reads one vector per input. Token-level outputs (a matrix per input) are
/// mean-pooled; every vector is L2-normalized.
pub(crate) fn parse_feature_vectors(
    payload: &Value,
    expected_count: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if let Some(message) = payload.get("error").and_then(Value::as_str) {
        return Err(EmbeddingError::InvalidResponse(message.to_string()));
    }

    let rows = payload
        .as_array()
        .ok_or_else(|| EmbeddingError::InvalidResponse("expected a json array".to_string()))?;

    if rows.len() != expected_count {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {expected_count} vectors, got {}",
            rows.len()
        )));
    }

    rows.iter()
        .map(|row| {
            let mut vector = pooled_vector(row)?;
            if vector.len() != dimensions {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimensions,
                    actual: vector.len(),
                });
            }
            normalize(&mut vector);
            Ok(vector)
        })
        .collect()
}

fn pooled_vector(row: &Value) -> Result<Vec<f32>, EmbeddingError> {
    let items = row
        .as_array()
        .ok_or_else(|| EmbeddingError::InvalidResponse("vector is not an array".to_string()))?;

    if items.first().is_some_and(Value::is_array) {
        let tokens = items
            .iter()
            .map(pooled_vector)
            .collect::<Result<Vec<_>, _>>()?;
        let width = tokens.first().map(Vec::len).unwrap_or(0);
        let mut pooled = vec![0f32; width];
        for token in &tokens {
            for (slot, value) in pooled.iter_mut().zip(token) {
                *slot += value;
            }
        }
        for slot in &mut pooled {
            *slot /= tokens.len() as f32;
        }
        return Ok(pooled);
    }

    items
        .iter()
        .map(|value| {
            value.as_f64().map(|number| number as f32).ok_or_else(|| {
                EmbeddingError::InvalidResponse("vector holds a non-number".to_string())
            })
        })
        .collect()
}

fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

use crate::embeddings::Embedder;
use crate::store::{IndexManifest, IndexRecord, INDEX_FORMAT_VERSION, MANIFEST_FILE, RECORDS_FILE};
use crate::traits::VectorIndex;
use crate::{IndexError, RetrievedChunk, TextChunk};
use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Brute-force cosine index kept in memory and persisted as a directory of
/// JSON files.
#[derive(Debug, Clone)]
pub struct LocalVectorStore {
    manifest: IndexManifest,
    records: Vec<IndexRecord>,
}

impl LocalVectorStore {
    pub fn from_chunks(
        embedding_model: impl Into<String>,
        dimensions: usize,
        chunks: Vec<TextChunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        if chunks.len() != embeddings.len() {
            return Err(IndexError::InvalidArgument(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let records = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, vector)| {
                if vector.len() != dimensions {
                    return Err(IndexError::InvalidArgument(format!(
                        "embedding dimension {} != {}",
                        vector.len(),
                        dimensions
                    )));
                }
                Ok(IndexRecord { chunk, vector })
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        Ok(Self {
            manifest: IndexManifest {
                format_version: INDEX_FORMAT_VERSION,
                embedding_model: embedding_model.into(),
                dimensions,
                chunk_count: records.len(),
                created_at: Utc::now(),
            },
            records,
        })
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.manifest.dimensions
    }

    pub fn chunks(&self) -> impl Iterator<Item = &TextChunk> {
        self.records.iter().map(|record| &record.chunk)
    }

    /// Writes the index to `path`, replacing any index already there. The new
    /// files are staged next to `path` and moved in once complete.
    pub async fn save(&self, path: &Path) -> Result<(), IndexError> {
        let staging = staging_path(path)?;
        remove_dir_if_present(&staging).await?;
        fs::create_dir_all(&staging).await?;

        fs::write(
            staging.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&self.manifest)?,
        )
        .await?;
        fs::write(staging.join(RECORDS_FILE), serde_json::to_vec(&self.records)?)
            .await?;

        remove_dir_if_present(path).await?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&staging, path).await?;

        debug!(path = %path.display(), records = self.records.len(), "saved vector index");
        Ok(())
    }

    /// Loads the index at `path` and checks that it was built by the same
    /// embedding model the caller will query with.
    pub async fn load<E>(path: &Path, embedder: &E) -> Result<Self, IndexError>
    where
        E: Embedder + ?Sized,
    {
        let manifest_bytes = match fs::read(path.join(MANIFEST_FILE)).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(IndexError::Missing(path.display().to_string()));
            }
            Err(error) => return Err(IndexError::Io(error)),
        };

        let manifest: IndexManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|error| IndexError::Corrupt(format!("{MANIFEST_FILE}: {error}")))?;

        if manifest.format_version != INDEX_FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported index format version {}",
                manifest.format_version
            )));
        }

        if manifest.embedding_model != embedder.model_name()
            || manifest.dimensions != embedder.dimensions()
        {
            return Err(IndexError::ModelMismatch {
                indexed_model: manifest.embedding_model,
                indexed_dimensions: manifest.dimensions,
                query_model: embedder.model_name().to_string(),
                query_dimensions: embedder.dimensions(),
            });
        }

        let records_bytes = fs::read(path.join(RECORDS_FILE)).await.map_err(|error| {
            IndexError::Corrupt(format!("{RECORDS_FILE} unreadable: {error}"))
        })?;
        let records: Vec<IndexRecord> = serde_json::from_slice(&records_bytes)
            .map_err(|error| IndexError::Corrupt(format!("{RECORDS_FILE}: {error}")))?;

        if records.len() != manifest.chunk_count {
            return Err(IndexError::Corrupt(format!(
                "manifest lists {} chunks but {} records were found",
                manifest.chunk_count,
                records.len()
            )));
        }

        if let Some(record) = records
            .iter()
            .find(|record| record.vector.len() != manifest.dimensions)
        {
            return Err(IndexError::Corrupt(format!(
                "chunk {} has {} dimensions, expected {}",
                record.chunk.chunk_id,
                record.vector.len(),
                manifest.dimensions
            )));
        }

        debug!(path = %path.display(), records = records.len(), "loaded vector index");
        Ok(Self { manifest, records })
    }
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    async fn similarity_search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        if query_vector.len() != self.manifest.dimensions {
            return Err(IndexError::InvalidArgument(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.manifest.dimensions
            )));
        }

        let mut scored: Vec<(f32, &IndexRecord)> = self
            .records
            .iter()
            .map(|record| (cosine_similarity(query_vector, &record.vector), record))
            .collect();

        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, record)| RetrievedChunk {
                chunk: record.chunk.clone(),
                score,
            })
            .collect())
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

fn staging_path(path: &Path) -> Result<PathBuf, IndexError> {
    let name = path.file_name().and_then(|name| name.to_str()).ok_or_else(|| {
        IndexError::InvalidArgument(format!("index path has no file name: {}", path.display()))
    })?;
    Ok(path.with_file_name(format!("{name}.staging")))
}

async fn remove_dir_if_present(path: &Path) -> Result<(), IndexError> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(IndexError::Io(error)),
    }
}

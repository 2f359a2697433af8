use crate::embeddings::Embedder;
use crate::stores::LocalVectorStore;
use crate::{
    extract_page_texts, split_pages, DocumentPage, IngestError, IngestionOptions, TextChunk,
};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Lists `*.pdf` files (any case) in `folder`, sorted. A missing folder yields
/// an empty list.
pub fn discover_pdf_files(folder: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let walker = if recursive {
        WalkDir::new(folder)
    } else {
        WalkDir::new(folder).max_depth(1)
    };

    for entry in walker.into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadedDocuments {
    pub files_found: usize,
    pub pages: Vec<DocumentPage>,
    pub skipped_files: Vec<SkippedPdf>,
}

/// Extracts every page of every PDF in `folder`. Unreadable files are skipped
/// and reported rather than failing the whole load.
pub fn load_pdf_documents(folder: &Path, recursive: bool) -> LoadedDocuments {
    let files = discover_pdf_files(folder, recursive);

    if files.is_empty() {
        warn!(
            folder = %folder.display(),
            "no pdf files found; continuing with an empty document set"
        );
        return LoadedDocuments::default();
    }

    let mut loaded = LoadedDocuments {
        files_found: files.len(),
        ..LoadedDocuments::default()
    };

    for path in files {
        match load_pdf_pages(&path) {
            Ok(pages) => {
                debug!(path = %path.display(), pages = pages.len(), "loaded pdf");
                loaded.pages.extend(pages);
            }
            Err(error) => loaded.skipped_files.push(SkippedPdf {
                path,
                reason: error.to_string(),
            }),
        }
    }

    loaded
}

fn load_pdf_pages(path: &Path) -> Result<Vec<DocumentPage>, IngestError> {
    let checksum = digest_file(path)?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
        .to_string();
    let source_path = path.to_string_lossy().to_string();

    Ok(extract_page_texts(path)?
        .into_iter()
        .map(|page| DocumentPage {
            source_path: source_path.clone(),
            file_name: file_name.clone(),
            checksum: checksum.clone(),
            page: page.number,
            text: page.text,
        })
        .collect())
}

#[derive(Debug)]
pub struct IngestionReport {
    pub files_found: usize,
    pub page_count: usize,
    pub chunks: Vec<TextChunk>,
    pub skipped_files: Vec<SkippedPdf>,
    pub dimensions: usize,
}

/// Loads and chunks a folder of PDFs without embedding anything.
pub fn ingest_folder_chunks(
    folder: &Path,
    options: &IngestionOptions,
) -> Result<(LoadedDocuments, Vec<TextChunk>), IngestError> {
    let loaded = load_pdf_documents(folder, options.recursive);
    let chunks = split_pages(&loaded.pages, options)?;
    Ok((loaded, chunks))
}

/// Runs the whole ingestion stage: load, split, embed and persist to
/// `index_path`, replacing whatever index was there.
pub async fn ingest_folder<E>(
    folder: &Path,
    index_path: &Path,
    embedder: &E,
    options: &IngestionOptions,
) -> Result<IngestionReport, IngestError>
where
    E: Embedder + ?Sized,
{
    let (loaded, chunks) = ingest_folder_chunks(folder, options)?;
    info!(
        folder = %folder.display(),
        files = loaded.files_found,
        pages = loaded.pages.len(),
        chunk_count = chunks.len(),
        "split documents"
    );

    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
    let embeddings = embedder.embed_documents(&texts).await?;

    let store = LocalVectorStore::from_chunks(
        embedder.model_name(),
        embedder.dimensions(),
        chunks.clone(),
        embeddings,
    )?;
    store.save(index_path).await?;
    info!(index = %index_path.display(), chunk_count = store.len(), "vector index written");

    Ok(IngestionReport {
        files_found: loaded.files_found,
        page_count: loaded.pages.len(),
        chunks,
        skipped_files: loaded.skipped_files,
        dimensions: embedder.dimensions(),
    })
}

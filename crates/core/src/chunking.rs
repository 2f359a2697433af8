use crate::error::IngestError;
use crate::models::{DocumentPage, IngestionOptions, TextChunk};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Collapses runs of spaces inside each line and squeezes blank lines, keeping
/// paragraph and line breaks intact for the splitter.
pub fn clean_page_text(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut blank_run = 0usize;

    for line in text.replace('\u{a0}', " ").lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            continue;
        }

        if !cleaned.is_empty() {
            cleaned.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        cleaned.push_str(&line);
        blank_run = 0;
    }

    cleaned
}

/// Splits text on the coarsest separator present, recursing into pieces that
/// are still too long, then greedily merges neighbours back up to the chunk
/// size while carrying `chunk_overlap` characters into the next chunk.
///
/// Lengths are measured in characters. Every produced chunk is at most
/// `chunk_size` characters long.
#[derive(Debug, Clone)]
pub struct RecursiveCharacterSplitter {
    config: ChunkingConfig,
    separators: Vec<String>,
}

impl RecursiveCharacterSplitter {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            config,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn with_separators<I, S>(mut self, separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.separators = separators.into_iter().map(Into::into).collect();
        if self.separators.last().map_or(true, |last| !last.is_empty()) {
            // character-level fallback keeps the size bound
            self.separators.push(String::new());
        }
        self
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
            .into_iter()
            .filter(|chunk| !chunk.trim().is_empty())
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let (separator, remaining) = pick_separator(text, separators);

        let splits: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator)
                .filter(|piece| !piece.is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut pending = Vec::new();

        for piece in splits {
            if char_len(&piece) < self.config.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge_splits(&pending, separator));
                pending.clear();
            }

            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, remaining));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge_splits(&pending, separator));
        }

        chunks
    }

    fn merge_splits(&self, splits: &[String], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut merged = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for split in splits {
            let len = char_len(split);
            let joiner = |window: &VecDeque<&str>| {
                if window.is_empty() {
                    0
                } else {
                    separator_len
                }
            };

            if total + len + joiner(&window) > self.config.chunk_size && !window.is_empty() {
                push_joined(&mut merged, &window, separator);

                while total > self.config.chunk_overlap
                    || (total > 0 && total + len + joiner(&window) > self.config.chunk_size)
                {
                    let Some(first) = window.pop_front() else {
                        break;
                    };
                    total = total.saturating_sub(char_len(first) + joiner(&window));
                }
            }

            window.push_back(split.as_str());
            total += len + if window.len() > 1 { separator_len } else { 0 };
        }

        push_joined(&mut merged, &window, separator);
        merged
    }
}

fn pick_separator<'a>(text: &str, separators: &'a [String]) -> (&'a str, &'a [String]) {
    for (position, candidate) in separators.iter().enumerate() {
        if candidate.is_empty() {
            return ("", &[]);
        }
        if text.contains(candidate.as_str()) {
            return (candidate.as_str(), &separators[position + 1..]);
        }
    }
    (separators.last().map(String::as_str).unwrap_or(""), &[])
}

fn push_joined(target: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        target.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits every page into chunks, numbering them globally in page order.
pub fn split_pages(
    pages: &[DocumentPage],
    options: &IngestionOptions,
) -> Result<Vec<TextChunk>, IngestError> {
    let splitter = RecursiveCharacterSplitter::new(ChunkingConfig::from(options))?;
    let mut chunks = Vec::new();
    let mut cursor = 0u64;

    for page in pages {
        let cleaned = clean_page_text(&page.text);
        for text in splitter.split_text(&cleaned) {
            chunks.push(TextChunk {
                chunk_id: make_chunk_id(&page.source_path, page.page, cursor, &text),
                source_path: page.source_path.clone(),
                file_name: page.file_name.clone(),
                page: page.page,
                chunk_index: cursor,
                text,
            });
            cursor = cursor.saturating_add(1);
        }
    }

    Ok(chunks)
}

fn make_chunk_id(source_path: &str, page: u32, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    hasher.update(page.to_le_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk_size: usize, chunk_overlap: usize) -> RecursiveCharacterSplitter {
        RecursiveCharacterSplitter::new(ChunkingConfig {
            chunk_size,
            chunk_overlap,
        })
        .expect("valid config")
    }

    fn sample_text() -> String {
        (0..40)
            .map(|paragraph| {
                (0..12)
                    .map(|word| format!("term{paragraph}x{word}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn page_text_keeps_line_breaks() {
        let cleaned = clean_page_text("  A  \t lot\nof   spacing\n\n\n\nnext\u{a0}para ");
        assert_eq!(cleaned, "A lot\nof spacing\n\nnext para");
    }

    #[test]
    fn overlapping_word_windows() {
        let chunks = splitter(14, 5).split_text("aaaa bbbb cccc dddd eeee ffff");
        assert_eq!(
            chunks,
            vec!["aaaa bbbb cccc", "cccc dddd eeee", "eeee ffff"]
        );
    }

    #[test]
    fn chunks_never_exceed_chunk_size() {
        let text = format!("{}\n{}", sample_text(), "x".repeat(1_300));
        for size in [7, 50, 120, 500] {
            let chunks = splitter(size, size / 10).split_text(&text);
            assert!(!chunks.is_empty());
            assert!(chunks.iter().all(|chunk| chunk.chars().count() <= size));
        }
    }

    #[test]
    fn smaller_chunk_size_gives_more_chunks() {
        let text = sample_text();
        let counts: Vec<usize> = [40, 80, 160, 320, 640]
            .into_iter()
            .map(|size| splitter(size, 10).split_text(&text).len())
            .collect();

        assert!(counts.windows(2).all(|pair| pair[0] >= pair[1]), "{counts:?}");
        assert!(counts[0] > counts[4]);
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = splitter(500, 50).split_text("The capital of Example-land is Exemplar City.");
        assert_eq!(chunks, vec!["The capital of Example-land is Exemplar City."]);
    }

    #[test]
    fn custom_separators_still_bound_chunks() {
        let chunks = splitter(10, 2)
            .with_separators(["|"])
            .split_text("abcdefghijklmnopqrstuvwxyz|short");
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 10));
        assert!(chunks.contains(&"short".to_string()));
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let result = RecursiveCharacterSplitter::new(ChunkingConfig {
            chunk_size: 50,
            chunk_overlap: 50,
        });
        assert!(matches!(result, Err(IngestError::InvalidChunkConfig(_))));
    }

    #[test]
    fn pages_are_numbered_globally() {
        let page = |number: u32, text: &str| DocumentPage {
            source_path: "/tmp/a.pdf".to_string(),
            file_name: "a.pdf".to_string(),
            checksum: "c".to_string(),
            page: number,
            text: text.to_string(),
        };
        let pages = vec![page(1, "first page"), page(2, ""), page(3, "third page")];

        let chunks = split_pages(&pages, &IngestionOptions::default()).expect("chunks");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[1].page, 3);
        assert_ne!(chunks[0].chunk_id, chunks[1].chunk_id);
    }
}

use anyhow::Result;
use tracing::warn;

use crate::chunk::Chunk;
use crate::document::Document;
use crate::generate_doc_id;

pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separators: Vec<String>,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            separators: ["\n\n", "\n", " ", ""].iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Sliding-window splitter that tries coarse separators before fine ones.
///
/// Lengths are counted in characters. Separators stay attached to the front
/// of the piece that follows them, so joining pieces needs no glue.
pub struct RecursiveCharacterSplitter {
    config: SplitterConfig,
}

impl RecursiveCharacterSplitter {
    pub fn new(config: SplitterConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }
        if config.chunk_overlap > config.chunk_size {
            anyhow::bail!(
                "chunk_overlap ({}) is larger than chunk_size ({})",
                config.chunk_overlap,
                config.chunk_size
            );
        }
        Ok(Self { config })
    }

    pub fn with_sizes(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::new(SplitterConfig {
            chunk_size,
            chunk_overlap,
            ..SplitterConfig::default()
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.config.chunk_overlap
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.config.separators)
    }

    /// Split every document, carrying its metadata plus `start_index`
    pub fn split_documents(&self, docs: &[Document]) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for doc in docs {
            let source = doc.source();
            let doc_id = generate_doc_id(source);
            let mut search_from = 0;

            for text in self.split_text(&doc.content) {
                let start_byte = doc.content[search_from..]
                    .find(&text)
                    .map(|pos| search_from + pos)
                    .unwrap_or(search_from);
                let start = doc.content[..start_byte].chars().count();
                let end = start + text.chars().count();

                // Next chunk starts after this one's first character
                search_from = doc.content[start_byte..]
                    .chars()
                    .next()
                    .map(|c| start_byte + c.len_utf8())
                    .unwrap_or(start_byte);

                let mut metadata = doc.metadata.clone();
                metadata.insert("start_index".to_string(), start.into());

                chunks.push(
                    Chunk::new(doc_id.clone(), text, source.to_string(), (start, end))
                        .with_metadata(metadata),
                );
            }
        }

        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut final_chunks = Vec::new();

        // First separator present in the text wins; "" always matches
        let (separator, remaining) = separators
            .iter()
            .enumerate()
            .find(|(_, s)| s.is_empty() || text.contains(s.as_str()))
            .map(|(i, s)| (s.as_str(), &separators[i + 1..]))
            .unwrap_or(("", &[][..]));

        let mut good_splits: Vec<String> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) < self.config.chunk_size {
                good_splits.push(piece);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits));
                good_splits.clear();
            }

            if remaining.is_empty() {
                final_chunks.push(piece);
            } else {
                final_chunks.extend(self.split_recursive(&piece, remaining));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits));
        }

        final_chunks
    }

    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut docs = Vec::new();
        let mut window: Vec<(&str, usize)> = Vec::new();
        let mut total = 0;

        for split in splits {
            let len = char_len(split);

            if total + len > size && !window.is_empty() {
                if total > size {
                    warn!(length = total, chunk_size = size, "Created a chunk larger than chunk_size");
                }
                if let Some(doc) = join_window(&window) {
                    docs.push(doc);
                }

                // Keep at most `overlap` characters and make room for the next piece
                while total > overlap || (total + len > size && total > 0) {
                    let (_, first_len) = window.remove(0);
                    total -= first_len;
                }
            }

            window.push((split.as_str(), len));
            total += len;
        }

        if let Some(doc) = join_window(&window) {
            docs.push(doc);
        }

        docs
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn join_window(window: &[(&str, usize)]) -> Option<String> {
    let joined: String = window.iter().map(|(s, _)| *s).collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// "a\n\nb\n\nc" on "\n\n" gives ["a", "\n\nb", "\n\nc"]
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(|c| c.to_string()).collect();
    }

    let mut pieces = text.split(separator);
    let mut out = Vec::new();
    if let Some(first) = pieces.next() {
        out.push(first.to_string());
    }
    out.extend(pieces.map(|p| format!("{}{}", separator, p)));
    out.retain(|p| !p.is_empty());
    out
}

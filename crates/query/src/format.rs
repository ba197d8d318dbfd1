use ingest::Chunk;

/// How retrieved chunks are rendered into the `{context}` slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextFormat {
    Plain,
    WithMetadata,
}

impl ContextFormat {
    pub fn render(self, chunks: &[Chunk]) -> String {
        match self {
            ContextFormat::Plain => format_plain(chunks),
            ContextFormat::WithMetadata => format_with_metadata(chunks),
        }
    }
}

pub fn format_plain(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Text followed by its JSON metadata so the model can cite sources
pub fn format_with_metadata(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| {
            let metadata = serde_json::Value::Object(c.metadata.clone());
            format!("{}\nMetadata: {}", c.text, metadata)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

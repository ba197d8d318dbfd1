use anyhow::Result;
use index::Retriever;
use ingest::Chunk;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::format::ContextFormat;
use crate::llm::ChatModel;
use crate::prompt::PromptTemplate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub chunk_id: String,
    pub distance: f32,
}

impl SourceRef {
    fn from_hit((chunk, distance): &(Chunk, f32)) -> Self {
        Self {
            source: chunk.source.clone(),
            chunk_id: chunk.chunk_id.clone(),
            distance: *distance,
        }
    }
}

/// retrieve -> format -> prompt -> generate
#[derive(Clone)]
pub struct RagChain {
    retriever: Retriever,
    llm: Arc<dyn ChatModel>,
    template: PromptTemplate,
    format: ContextFormat,
}

impl RagChain {
    pub fn new(retriever: Retriever, llm: Arc<dyn ChatModel>) -> Self {
        Self {
            retriever,
            llm,
            template: PromptTemplate::docs_qa(),
            format: ContextFormat::WithMetadata,
        }
    }

    pub fn with_template(mut self, template: PromptTemplate, format: ContextFormat) -> Self {
        self.template = template;
        self.format = format;
        self
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    pub async fn ask(&self, question: &str) -> Result<Answer> {
        self.answer_with(self.llm.as_ref(), question).await
    }

    /// Run the chain against a different model
    pub async fn answer_with(&self, llm: &dyn ChatModel, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            anyhow::bail!("Question must not be empty");
        }

        let start = Instant::now();
        let hits = self.retriever.retrieve_with_scores(question).await?;
        let chunks: Vec<Chunk> = hits.iter().map(|(chunk, _)| chunk.clone()).collect();

        let context = self.format.render(&chunks);
        let prompt = self.template.render(question, &context);
        let answer = llm.generate(&prompt).await?.trim().to_string();

        info!(
            model = llm.model_name(),
            chunks = chunks.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Answered question"
        );

        Ok(Answer {
            answer,
            sources: hits.iter().map(SourceRef::from_hit).collect(),
        })
    }
}

use anyhow::Result;

const QUESTION: &str = "{question}";
const CONTEXT: &str = "{context}";

/// Concise answers, used by the indexer's chain
pub const RAG_PROMPT: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question. \
If you don't know the answer, just say that you don't know. \
Use three sentences maximum and keep the answer concise.
Question: {question}
Context: {context}
Answer:";

/// Detailed answers with source citations, used by the query surfaces
pub const DOCS_QA_PROMPT: &str = "You are an AI assistant specialized in helping with web application development tasks.
You are given a set of retrieved documents that are related to web application development.
Provide a comprehensive and detailed answer to the given question using the provided context.
If the provided context is insufficient, clearly mention what additional information is needed.

Please always specify the source of the material at the end. The source is included in the metadata in JSON format. Format the citation in markdown for better readability.

Question: {question}

Retrieved Documents:
{context}

Detailed Answer:
";

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        for placeholder in [QUESTION, CONTEXT] {
            if !template.contains(placeholder) {
                anyhow::bail!("Prompt template is missing {}", placeholder);
            }
        }
        Ok(Self { template })
    }

    pub fn rag() -> Self {
        Self { template: RAG_PROMPT.to_string() }
    }

    pub fn docs_qa() -> Self {
        Self { template: DOCS_QA_PROMPT.to_string() }
    }

    /// Fill both placeholders in one pass; substituted text is never scanned again
    pub fn render(&self, question: &str, context: &str) -> String {
        let mut out = String::with_capacity(self.template.len() + question.len() + context.len());
        let mut rest = self.template.as_str();

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            if let Some(after) = tail.strip_prefix(QUESTION) {
                out.push_str(question);
                rest = after;
            } else if let Some(after) = tail.strip_prefix(CONTEXT) {
                out.push_str(context);
                rest = after;
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }

        out.push_str(rest);
        out
    }
}

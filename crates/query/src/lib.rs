pub mod chain;
pub mod format;
pub mod llm;
pub mod prompt;

pub use chain::{Answer, RagChain, SourceRef};
pub use format::{ContextFormat, format_plain, format_with_metadata};
pub use llm::{ChatClient, ChatModel, DEFAULT_CHAT_MODEL, SUPPORTED_MODELS, is_supported_model};
pub use prompt::{DOCS_QA_PROMPT, PromptTemplate, RAG_PROMPT};

use anyhow::Result;
use api::{AppConfig, pipeline, telemetry};
use clap::Parser;
use index::Retriever;
use ingest::RecursiveCharacterSplitter;
use query::{ContextFormat, PromptTemplate, RagChain};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "make_vectorstore", about = "Load, split and embed a documents directory into a vector store", version)]
struct Args {
    /// Directory with .md, .txt, .html, .json and .csv files [default: $DOCS_DIR or ./kysely]
    #[arg(long)]
    docs: Option<PathBuf>,

    /// Where the store is written [default: $VECTORSTORE_DIR or ./vectorstore_faiss]
    #[arg(long)]
    out: Option<PathBuf>,

    /// Maximum characters per chunk
    #[arg(long, default_value_t = 1000)]
    chunk_size: usize,

    /// Characters shared by neighbouring chunks
    #[arg(long, default_value_t = 200)]
    chunk_overlap: usize,

    /// Rebuild even when a store already exists
    #[arg(long)]
    rebuild: bool,

    /// Ask one question against the store once it is ready
    #[arg(long)]
    check: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    telemetry::init_tracing();

    let args = Args::parse();
    let config = AppConfig::from_env()?;
    let docs_dir = args.docs.unwrap_or_else(|| config.docs_dir.clone());
    let out_dir = args.out.unwrap_or_else(|| config.vectorstore_dir.clone());

    let splitter = RecursiveCharacterSplitter::with_sizes(args.chunk_size, args.chunk_overlap)?;
    let embedder = pipeline::build_embedder(&config)?;

    let store =
        pipeline::build_or_load_store(&docs_dir, &out_dir, &splitter, embedder.as_ref(), args.rebuild).await?;

    info!(
        dir = %out_dir.display(),
        chunks = store.len(),
        dimension = store.dimension(),
        "Vector store ready"
    );

    if let Some(question) = args.check {
        let retriever = Retriever::new(Arc::new(store), embedder).with_k(config.retriever_k);
        let chain = RagChain::new(retriever, pipeline::build_chat(&config, &config.openai.chat_model)?)
            .with_template(PromptTemplate::rag(), ContextFormat::Plain);

        let answer = chain.ask(&question).await?;
        println!("{}", answer.answer);
    }

    Ok(())
}

use anyhow::Result;
use api::{AppConfig, pipeline, telemetry};
use clap::Parser;
use query::{Answer, RagChain, is_supported_model};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

#[derive(Parser)]
#[command(name = "ask", about = "Ask questions about the indexed documents", version)]
struct Args {
    /// Chat model [default: $CHAT_MODEL or gpt-3.5-turbo]
    #[arg(long)]
    model: Option<String>,

    /// Answer a single question and exit
    #[arg(long)]
    question: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    telemetry::init_tracing();

    let args = Args::parse();
    let config = AppConfig::from_env()?;
    let model = args.model.unwrap_or_else(|| config.openai.chat_model.clone());
    if !is_supported_model(&model) {
        warn!(model = %model, "Model is not in the supported list, trying anyway");
    }

    let embedder = pipeline::build_embedder(&config)?;
    let retriever = pipeline::load_retriever(&config, embedder).await?;
    let chain = RagChain::new(retriever, pipeline::build_chat(&config, &model)?);

    if let Some(question) = args.question {
        let answer = chain.ask(&question).await?;
        print_answer(&answer);
        return Ok(());
    }

    println!("Ask a question about the docs (Ctrl+D to exit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break; // EOF
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }

        match chain.ask(question).await {
            Ok(answer) => print_answer(&answer),
            Err(e) => eprintln!("Error: {:#}\n", e),
        }
    }

    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("\n{}\n", answer.answer);
    if !answer.sources.is_empty() {
        println!("Sources:");
        for source in &answer.sources {
            println!("  - {} (distance {:.4})", source.source, source.distance);
        }
        println!();
    }
}

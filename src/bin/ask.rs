use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use answerbot::gemini::GeminiClient;
use answerbot::models::{AskRequest, ConversationTurn};
use answerbot::search::TavilyClient;
use answerbot::{AnswerService, AppConfig};

#[derive(Parser, Debug)]
#[command(name = "ask")]
#[command(about = "Answer one question from live web search results and print the JSON answer")]
struct Cli {
    #[arg(long, short)]
    question: String,
    #[arg(long, help = "JSON file holding an array of prior conversation turns")]
    history: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let history = match &cli.history {
        Some(path) => load_history(path)?,
        None => Vec::new(),
    };

    let search = TavilyClient::new(
        config.search.base_url.clone(),
        config.search.api_key.clone(),
        config.search.timeout,
    )?;
    let generator = GeminiClient::new(
        config.gemini.base_url.clone(),
        config.gemini.model.clone(),
        config.gemini.api_key.clone(),
        config.gemini.timeout,
    )?;
    let answers = AnswerService::new(&config, Arc::new(search), Arc::new(generator));

    let answer = answers
        .answer(AskRequest {
            question: cli.question,
            history,
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}

fn load_history(path: &str) -> Result<Vec<ConversationTurn>> {
    let file = File::open(path).with_context(|| format!("failed to open {path}"))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse conversation history in {path}"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

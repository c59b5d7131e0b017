use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use answerbot::gemini::{self, GeminiClient};
use answerbot::search::{self, TavilyClient};
use answerbot::{run_server, AnswerService, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    if config.gemini.api_key.is_none() {
        tracing::warn!(
            "{} is not set; every ask request will fail until it is",
            gemini::API_KEY_ENV
        );
    }
    if config.search.api_key.is_none() {
        tracing::warn!(
            "{} is not set; web search will fail until it is",
            search::API_KEY_ENV
        );
    }

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

    run_server(config, answers).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

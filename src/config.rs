use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::gemini::GenerationConfig;
use crate::ranking::MAX_SOURCES;
use crate::retry::{RetryPolicy, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_RETRIES};

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub gemini: GeminiConfig,
    pub search: SearchConfig,
    pub generation: GenerationConfig,
    pub retry: RetryPolicy,
    pub max_sources: usize,
    pub history_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            gemini: GeminiConfig {
                api_key: None,
                base_url: "https://generativelanguage.googleapis.com".to_string(),
                model: "gemini-1.5-flash".to_string(),
                timeout: Duration::from_secs(90),
            },
            search: SearchConfig {
                api_key: None,
                base_url: "https://api.tavily.com".to_string(),
                timeout: Duration::from_secs(20),
            },
            generation: GenerationConfig::default(),
            retry: RetryPolicy::default(),
            max_sources: MAX_SOURCES,
            history_limit: 10,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: env::var("ANSWERBOT_BIND").unwrap_or(defaults.bind_addr),
            gemini: GeminiConfig {
                api_key: non_empty_var("GOOGLE_GEMINI_API_KEY"),
                base_url: env::var("GEMINI_BASE_URL").unwrap_or(defaults.gemini.base_url),
                model: env::var("GEMINI_MODEL").unwrap_or(defaults.gemini.model),
                timeout: Duration::from_secs(parsed_var("GENERATION_TIMEOUT_SECS", 90)),
            },
            search: SearchConfig {
                api_key: non_empty_var("TAVILY_API_KEY"),
                base_url: env::var("TAVILY_BASE_URL").unwrap_or(defaults.search.base_url),
                timeout: Duration::from_secs(parsed_var("SEARCH_TIMEOUT_SECS", 20)),
            },
            generation: GenerationConfig {
                temperature: parsed_var("GEN_TEMPERATURE", defaults.generation.temperature),
                top_p: parsed_var("GEN_TOP_P", defaults.generation.top_p),
                top_k: parsed_var("GEN_TOP_K", defaults.generation.top_k),
                max_output_tokens: parsed_var(
                    "GEN_MAX_OUTPUT_TOKENS",
                    defaults.generation.max_output_tokens,
                ),
            },
            retry: RetryPolicy {
                max_retries: parsed_var("RETRY_MAX_RETRIES", DEFAULT_MAX_RETRIES),
                initial_delay: Duration::from_millis(parsed_var(
                    "RETRY_INITIAL_DELAY_MS",
                    DEFAULT_INITIAL_DELAY.as_millis() as u64,
                )),
            },
            max_sources: nonzero_var("MAX_SOURCES", defaults.max_sources),
            history_limit: parsed_var("HISTORY_LIMIT", defaults.history_limit),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

// Zero would leave the prompt with no sources to cite.
fn nonzero_var(key: &str, default: usize) -> usize {
    match parsed_var(key, default) {
        0 => default,
        value => value,
    }
}

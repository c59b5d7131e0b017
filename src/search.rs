use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::models::SearchResult;

pub const API_KEY_ENV: &str = "TAVILY_API_KEY";

const MAX_RESULTS: usize = 15;
const MAX_CONTENT_CHARS: usize = 2_000;

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
}

#[derive(Clone)]
pub struct TavilyClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl TavilyClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build search http client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[derive(Serialize)]
struct SearchReq<'a> {
    query: &'a str,
    search_depth: &'a str,
    topic: &'a str,
    time_range: &'a str,
    max_results: usize,
    include_answer: bool,
    include_raw_content: bool,
}

#[derive(Deserialize)]
struct SearchResp {
    #[serde(default)]
    results: Vec<RawResult>,
}

#[derive(Debug, Default, Deserialize)]
struct RawResult {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    raw_content: Option<String>,
    #[serde(default)]
    published_date: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

#[async_trait]
impl WebSearch for TavilyClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .with_context(|| format!("{API_KEY_ENV} is not set"))?;

        tracing::info!("searching web for: {query}");
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(api_key)
            .json(&SearchReq {
                query,
                search_depth: "advanced",
                topic: "news",
                time_range: "month",
                max_results: MAX_RESULTS,
                include_answer: false,
                include_raw_content: true,
            })
            .send()
            .await
            .context("failed to call search service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("search service returned {status}: {}", body.trim());
        }

        let response = response
            .json::<SearchResp>()
            .await
            .context("invalid response format from search service")?;

        let results: Vec<SearchResult> =
            response.results.into_iter().filter_map(normalize_result).collect();
        tracing::info!("search returned {} usable results", results.len());
        Ok(results)
    }
}

fn normalize_result(raw: RawResult) -> Option<SearchResult> {
    let url = raw.url.filter(|u| !u.trim().is_empty())?;
    let snippet = raw.content.filter(|c| !c.trim().is_empty())?;

    let content = match raw.raw_content.as_deref() {
        Some(full) if !full.trim().is_empty() => clean_content(full),
        _ => clean_content(&snippet),
    };
    if content.is_empty() {
        return None;
    }

    let title = raw
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| title_from_url(&url));

    Some(SearchResult {
        publish_date: raw.published_date.as_deref().and_then(parse_publish_date),
        score: raw.score.unwrap_or(0.0),
        url,
        title,
        content,
    })
}

fn title_from_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path()),
        Err(_) => url.to_string(),
    }
}

pub fn parse_publish_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

struct Cleaners {
    script: Regex,
    style: Regex,
    line_break: Regex,
    tag: Regex,
}

fn cleaners() -> Option<&'static Cleaners> {
    static CLEANERS: OnceLock<Option<Cleaners>> = OnceLock::new();
    CLEANERS
        .get_or_init(|| {
            Some(Cleaners {
                script: Regex::new(r"(?is)<script.*?</script>").ok()?,
                style: Regex::new(r"(?is)<style.*?</style>").ok()?,
                line_break: Regex::new(r"(?i)<br\s*/?>").ok()?,
                tag: Regex::new(r"<[^>]+>").ok()?,
            })
        })
        .as_ref()
}

pub fn clean_content(content: &str) -> String {
    let mut text = content.to_string();
    if let Some(c) = cleaners() {
        text = c.script.replace_all(&text, "").into_owned();
        text = c.style.replace_all(&text, "").into_owned();
        text = c.line_break.replace_all(&text, "\n").into_owned();
        text = c.tag.replace_all(&text, " ").into_owned();
    }

    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_at_sentence(&text, MAX_CONTENT_CHARS)
}

fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let head: String = text.chars().take(max_chars).collect();
    match head.rfind(". ") {
        Some(end) => head[..=end].to_string(),
        None => head.trim_end().to_string(),
    }
}

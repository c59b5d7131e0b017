use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AskError, ProviderError};
use crate::prompt::Content;

pub const API_KEY_ENV: &str = "GOOGLE_GEMINI_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 4096,
        }
    }
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn ensure_configured(&self) -> Result<(), AskError> {
        Ok(())
    }

    async fn generate(
        &self,
        history: &[Content],
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, ProviderError>;
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateReq<'a> {
    contents: Vec<Content>,
    generation_config: &'a GenerationConfig,
}

#[derive(Deserialize)]
struct GenerateResp {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[async_trait]
impl AnswerGenerator for GeminiClient {
    fn ensure_configured(&self) -> Result<(), AskError> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(AskError::MissingCredential(API_KEY_ENV)),
        }
    }

    async fn generate(
        &self,
        history: &[Content],
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::new(None, format!("{API_KEY_ENV} is not set")))?;

        let mut contents = history.to_vec();
        contents.push(Content::text("user", prompt));

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&GenerateReq {
                contents,
                generation_config: config,
            })
            .send()
            .await
            .map_err(|err| {
                ProviderError::new(
                    err.status().map(|s| s.as_u16()),
                    format!("failed to call gemini generateContent: {err}"),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                Some(status.as_u16()),
                format!("gemini returned {status}: {}", normalize_err_body(&body)),
            ));
        }

        let response = response.json::<GenerateResp>().await.map_err(|err| {
            ProviderError::new(
                None,
                format!("failed to decode gemini generateContent response: {err}"),
            )
        })?;

        extract_text(response)
    }
}

fn extract_text(response: GenerateResp) -> Result<String, ProviderError> {
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|part| part.text)
                .collect::<String>()
        })
        .ok_or_else(|| ProviderError::new(None, "gemini returned no candidates"))?;

    if text.trim().is_empty() {
        return Err(ProviderError::new(None, "gemini returned an empty answer"));
    }
    Ok(text)
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(message) = json
            .get("error")
            .and_then(|err| err.get("message"))
            .and_then(|v| v.as_str())
        {
            return message.to_string();
        }
    }

    trimmed.to_string()
}

use thiserror::Error;

pub const RATE_LIMITED_MESSAGE: &str =
    "Service is temporarily busy. Please try again in a few moments.";

const RATE_LIMIT_STATUS: u16 = 429;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == Some(RATE_LIMIT_STATUS)
    }
}

#[derive(Debug, Error)]
pub enum AskError {
    #[error("{0} is not set")]
    MissingCredential(&'static str),
    #[error("No search results found")]
    NoResults,
    #[error("{0:#}")]
    Search(anyhow::Error),
    #[error("Failed to get response from Gemini: {0}")]
    RateLimited(ProviderError),
    #[error("Failed to get response from Gemini: {0}")]
    Upstream(ProviderError),
    #[error("invalid request: {0}")]
    Validation(String),
}

impl AskError {
    pub fn from_provider(err: ProviderError) -> Self {
        if err.is_rate_limited() {
            AskError::RateLimited(err)
        } else {
            AskError::Upstream(err)
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AskError::RateLimited(_) => RATE_LIMIT_STATUS,
            _ => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            AskError::RateLimited(_) => RATE_LIMITED_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

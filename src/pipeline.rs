use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;
use uuid::Uuid;

use crate::citations::reorder_by_reference;
use crate::config::AppConfig;
use crate::error::{AskError, ProviderError};
use crate::gemini::{AnswerGenerator, GenerationConfig};
use crate::models::{AnswerResult, AskRequest, SourceRef};
use crate::prompt::{self, sanitize_model_output};
use crate::ranking::rank_sources;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::search::WebSearch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Ranking,
    Prompting,
    Invoking,
    Reordering,
    Responded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Ranking => "ranking",
            Stage::Prompting => "prompting",
            Stage::Invoking => "invoking",
            Stage::Reordering => "reordering",
            Stage::Responded => "responded",
        };
        f.write_str(name)
    }
}

#[derive(Clone)]
pub struct AnswerService {
    search: Arc<dyn WebSearch>,
    generator: Arc<dyn AnswerGenerator>,
    generation: GenerationConfig,
    retry: RetryPolicy,
    max_sources: usize,
    history_limit: usize,
}

impl AnswerService {
    pub fn new(
        config: &AppConfig,
        search: Arc<dyn WebSearch>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        Self {
            search,
            generator,
            generation: config.generation,
            retry: config.retry,
            max_sources: config.max_sources,
            history_limit: config.history_limit,
        }
    }

    pub async fn answer(&self, request: AskRequest) -> Result<AnswerResult, AskError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("ask", %request_id);
        let started = Instant::now();

        let result = self.run(request).instrument(span.clone()).await;

        let latency_ms = started.elapsed().as_millis() as u64;
        span.in_scope(|| match &result {
            Ok(answer) => {
                tracing::info!(sources = answer.sources.len(), latency_ms, "answered")
            }
            Err(err) => {
                tracing::error!(status = err.status_code(), latency_ms, "ask failed: {err}")
            }
        });
        result
    }

    async fn run(&self, request: AskRequest) -> Result<AnswerResult, AskError> {
        enter(Stage::Received);
        if request.question.trim().is_empty() {
            return Err(AskError::Validation("question must not be empty".to_string()));
        }
        self.generator.ensure_configured()?;

        let results = self
            .search
            .search(&request.question)
            .await
            .map_err(AskError::Search)?;
        tracing::debug!("found {} search results", results.len());

        enter(Stage::Ranking);
        let ranked = rank_sources(results, self.max_sources)?;

        enter(Stage::Prompting);
        let history_start = request.history.len().saturating_sub(self.history_limit);
        let prepared = prompt::prepare(
            &ranked,
            &request.question,
            &request.history[history_start..],
        );

        enter(Stage::Invoking);
        let raw_answer = self
            .generate(&prepared.history, &prepared.prompt)
            .await
            .map_err(AskError::from_provider)?;

        enter(Stage::Reordering);
        let cleaned = sanitize_model_output(&raw_answer);
        let sources: Vec<SourceRef> = ranked.iter().map(SourceRef::from_result).collect();
        let reordered = reorder_by_reference(&cleaned, &sources);

        enter(Stage::Responded);
        Ok(AnswerResult {
            citations: reordered.sources.iter().map(|s| s.url.clone()).collect(),
            content: reordered.content,
            sources: reordered.sources,
        })
    }

    async fn generate(
        &self,
        history: &[prompt::Content],
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let generator = self.generator.as_ref();
        let generation = &self.generation;
        retry_with_backoff(&self.retry, ProviderError::is_rate_limited, || {
            generator.generate(history, prompt, generation)
        })
        .await
    }
}

fn enter(stage: Stage) {
    tracing::debug!(%stage, "pipeline stage");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use crate::models::{ConversationTurn, Role, SearchResult};
    use crate::prompt::Content;

    struct FakeSearch {
        results: anyhow::Result<Vec<SearchResult>>,
    }

    #[async_trait]
    impl WebSearch for FakeSearch {
        async fn search(&self, _query: &str) -> anyhow::Result<Vec<SearchResult>> {
            match &self.results {
                Ok(results) => Ok(results.clone()),
                Err(err) => Err(anyhow::anyhow!("{err}")),
            }
        }
    }

    #[derive(Default)]
    struct FakeGenerator {
        configured: bool,
        replies: Mutex<VecDeque<Result<String, ProviderError>>>,
        calls: Mutex<Vec<(Vec<Content>, String)>>,
    }

    impl FakeGenerator {
        fn replying(replies: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                configured: true,
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AnswerGenerator for FakeGenerator {
        fn ensure_configured(&self) -> Result<(), AskError> {
            if self.configured {
                Ok(())
            } else {
                Err(AskError::MissingCredential("GOOGLE_GEMINI_API_KEY"))
            }
        }

        async fn generate(
            &self,
            history: &[Content],
            prompt: &str,
            _config: &GenerationConfig,
        ) -> Result<String, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push((history.to_vec(), prompt.to_string()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::new(None, "no scripted reply")))
        }
    }

    fn result(url: &str, day: Option<u32>) -> SearchResult {
        SearchResult {
            url: url.to_string(),
            title: format!("title {url}"),
            content: format!("content {url}"),
            publish_date: day.map(|d| Utc.with_ymd_and_hms(2024, 6, d, 0, 0, 0).unwrap()),
            score: 0.5,
        }
    }

    fn service(search: FakeSearch, generator: Arc<FakeGenerator>) -> AnswerService {
        let mut config = AppConfig::default();
        config.retry.initial_delay = Duration::from_millis(10);
        AnswerService::new(&config, Arc::new(search), generator)
    }

    fn ask(question: &str) -> AskRequest {
        AskRequest {
            question: question.to_string(),
            history: vec![],
        }
    }

    #[tokio::test]
    async fn answers_with_reordered_sources() {
        // Ranked order by date: https://b (day 3), https://a (day 2), https://c (undated).
        let search = FakeSearch {
            results: Ok(vec![
                result("https://a", Some(2)),
                result("https://c", None),
                result("https://b", Some(3)),
            ]),
        };
        let generator = Arc::new(FakeGenerator::replying(vec![Ok(
            "Paris is known for [2] and [1,3].\n\n\n\nEnd.".to_string(),
        )]));

        let answer = service(search, generator.clone())
            .answer(ask("What is Paris known for?"))
            .await
            .unwrap();

        assert_eq!(answer.content, "Paris is known for [1] and [2,3].\n\nEnd.");
        assert_eq!(
            answer.citations,
            vec!["https://a", "https://b", "https://c"]
        );
        let source_urls: Vec<_> = answer.sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(source_urls, answer.citations);

        let calls = generator.calls.lock().unwrap();
        assert!(calls[0].1.contains("[Source 1] https://b"));
        assert!(calls[0].1.contains("[Source 3] https://c"));
    }

    #[tokio::test]
    async fn empty_search_fails_before_generation() {
        let generator = Arc::new(FakeGenerator::replying(vec![Ok("unused".to_string())]));
        let err = service(FakeSearch { results: Ok(vec![]) }, generator.clone())
            .answer(ask("anything"))
            .await
            .unwrap_err();

        assert!(matches!(err, AskError::NoResults));
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_credential_fails_before_search() {
        let generator = Arc::new(FakeGenerator::default());
        let search = FakeSearch {
            results: Err(anyhow::anyhow!("search must not be called")),
        };
        let err = service(search, generator).answer(ask("q")).await.unwrap_err();

        assert!(matches!(err, AskError::MissingCredential(_)));
        assert_eq!(err.to_string(), "GOOGLE_GEMINI_API_KEY is not set");
    }

    #[tokio::test]
    async fn search_failure_is_reported() {
        let search = FakeSearch {
            results: Err(anyhow::anyhow!("connection refused")),
        };
        let generator = Arc::new(FakeGenerator::replying(vec![]));
        let err = service(search, generator).answer(ask("q")).await.unwrap_err();

        assert!(matches!(err, AskError::Search(_)));
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.user_message(), "connection refused");
    }

    #[tokio::test]
    async fn missing_search_key_reaches_the_caller_verbatim() {
        let search = FakeSearch {
            results: Err(anyhow::anyhow!("TAVILY_API_KEY is not set")),
        };
        let generator = Arc::new(FakeGenerator::replying(vec![]));
        let err = service(search, generator).answer(ask("q")).await.unwrap_err();

        assert_eq!(err.user_message(), "TAVILY_API_KEY is not set");
    }

    #[tokio::test]
    async fn duplicate_search_results_are_cited_once() {
        let search = FakeSearch {
            results: Ok(vec![
                result("https://a", None),
                result("https://a", None),
                result("https://b", None),
            ]),
        };
        let generator = Arc::new(FakeGenerator::replying(vec![Ok("x [2] y [1]".to_string())]));

        let answer = service(search, generator.clone())
            .answer(ask("q"))
            .await
            .unwrap();

        assert_eq!(answer.content, "x [1] y [2]");
        assert_eq!(answer.citations, vec!["https://b", "https://a"]);
        let source_urls: Vec<_> = answer.sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(source_urls, answer.citations);

        let calls = generator.calls.lock().unwrap();
        assert!(calls[0].1.contains("[Source 2] https://b"));
        assert!(!calls[0].1.contains("[Source 3]"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_retried_then_succeeds() {
        let search = FakeSearch {
            results: Ok(vec![result("https://a", Some(1))]),
        };
        let generator = Arc::new(FakeGenerator::replying(vec![
            Err(ProviderError::new(Some(429), "slow down")),
            Ok("Answer [1].".to_string()),
        ]));

        let answer = service(search, generator.clone())
            .answer(ask("q"))
            .await
            .unwrap();

        assert_eq!(answer.content, "Answer [1].");
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_rate_limit_maps_to_429() {
        let search = FakeSearch {
            results: Ok(vec![result("https://a", Some(1))]),
        };
        let generator = Arc::new(FakeGenerator::replying(
            (0..5)
                .map(|_| Err(ProviderError::new(Some(429), "slow down")))
                .collect(),
        ));

        let err = service(search, generator.clone())
            .answer(ask("q"))
            .await
            .unwrap_err();

        assert!(matches!(err, AskError::RateLimited(_)));
        assert_eq!(err.status_code(), 429);
        assert_eq!(generator.call_count(), 4);
    }

    #[tokio::test]
    async fn provider_error_is_not_retried() {
        let search = FakeSearch {
            results: Ok(vec![result("https://a", Some(1))]),
        };
        let generator = Arc::new(FakeGenerator::replying(vec![
            Err(ProviderError::new(Some(400), "API key not valid")),
            Ok("unused".to_string()),
        ]));

        let err = service(search, generator.clone())
            .answer(ask("q"))
            .await
            .unwrap_err();

        assert_eq!(
            err.user_message(),
            "Failed to get response from Gemini: API key not valid"
        );
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn only_recent_history_is_forwarded() {
        let search = FakeSearch {
            results: Ok(vec![result("https://a", Some(1))]),
        };
        let generator = Arc::new(FakeGenerator::replying(vec![Ok("Done [1].".to_string())]));

        let history: Vec<ConversationTurn> = (0..14)
            .map(|i| ConversationTurn {
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                content: format!("turn {i}"),
                citations: None,
            })
            .collect();
        let request = AskRequest {
            question: "follow up".to_string(),
            history,
        };

        service(search, generator.clone())
            .answer(request)
            .await
            .unwrap();

        let calls = generator.calls.lock().unwrap();
        let forwarded = &calls[0].0;
        assert_eq!(forwarded.len(), 10);
        assert_eq!(forwarded[0], Content::text("user", "turn 4"));
        assert_eq!(forwarded[9], Content::text("model", "turn 13"));
    }

    #[tokio::test]
    async fn blank_question_is_a_validation_error() {
        let generator = Arc::new(FakeGenerator::replying(vec![]));
        let err = service(FakeSearch { results: Ok(vec![]) }, generator)
            .answer(ask("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, AskError::Validation(_)));
        assert_eq!(err.status_code(), 500);
    }
}

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{ConversationTurn, SearchResult};

const UNTITLED: &str = "Untitled";
const UNKNOWN_DATE: &str = "Unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Content {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

impl Content {
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub context: String,
    pub prompt: String,
    pub history: Vec<Content>,
}

pub fn prepare(
    sources: &[SearchResult],
    question: &str,
    history: &[ConversationTurn],
) -> PreparedPrompt {
    let context = build_context(sources);
    let prompt = build_answer_prompt(question, &context);
    PreparedPrompt {
        context,
        prompt,
        history: format_history(history),
    }
}

pub fn build_context(sources: &[SearchResult]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(idx, source)| {
            let title = if source.title.trim().is_empty() {
                UNTITLED
            } else {
                source.title.as_str()
            };
            let published = source
                .publish_date
                .map(|d| d.to_rfc3339())
                .unwrap_or_else(|| UNKNOWN_DATE.to_string());

            format!(
                "[Source {}] {}\nTitle: {}\nPublished: {}\nContent: {}\n---\n",
                idx + 1,
                source.url,
                title,
                published,
                source.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_answer_prompt(question: &str, context: &str) -> String {
    format!(
        "You are an advanced conversational AI research assistant. Analyze the web search results below \
and give a comprehensive, well-structured answer to the question.

Web Search Results:
{context}

Instructions for Response Generation:

1. Content Structure and Depth:
   - For analysis questions, open with a 2-3 sentence executive summary, break the topic into \
sections with clear headers, and end with takeaways and recommendations.
   - For informational questions, start with a brief overview of key findings, then organize \
details into logical sections with examples, data and statistics.

2. Source Integration and Citation:
   - Evaluate and synthesize information from ALL available sources.
   - Cite sources with [X] notation, where X is the source number above. Cite several sources \
at once as [X,Y].
   - Support every key fact with a citation and cross-reference sources where they agree or differ.

3. Formatting Standards:
   - Use ## for major sections and ### for subsections, with one blank line before headers.
   - Use bullet points or numbered lists where they help.
   - Never wrap the whole answer in a code fence.

4. Quality Guidelines:
   - Use specific examples and data points.
   - Compare perspectives from different sources and address counterarguments.
   - Keep the level of detail consistent across sections.

Question: {question}"
    )
}

pub fn format_history(history: &[ConversationTurn]) -> Vec<Content> {
    history
        .iter()
        .map(|turn| Content::text(turn.role.provider_role(), turn.content.clone()))
        .collect()
}

pub fn sanitize_model_output(answer: &str) -> String {
    let mut text = answer.trim().to_string();
    if text.starts_with("```") {
        let fenced = Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```$").ok();
        match fenced.as_ref().and_then(|re| re.captures(&text)) {
            Some(caps) => {
                if let Some(body) = caps.get(1) {
                    text = body.as_str().trim().to_string();
                }
            }
            None => text = text.replace("```", "").trim().to_string(),
        }
    }

    match Regex::new(r"\n{3,}") {
        Ok(blank_runs) => blank_runs.replace_all(&text, "\n\n").trim().to_string(),
        Err(_) => text,
    }
}

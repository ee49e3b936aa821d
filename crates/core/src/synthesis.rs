use crate::traits::EvidenceConsumer;
use crate::{CitedEvidence, EvidenceSourceError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

const BACKEND: &str = "openrouter";
const APP_TITLE: &str = "research-assist";

pub const SYSTEM_PROMPT: &str = "You are an expert research assistant who synthesizes information from multiple sources into clear, comprehensive answers.

When synthesizing information:
1. Lead with the most important insights that directly answer the question
2. Organize information logically with clear headings when helpful
3. Include relevant details and context that enhance understanding
4. Note any conflicting information and explain different viewpoints
5. Use citations [1], [2], etc. that correspond to the numbered sources
6. Write in a conversational but authoritative tone

Only state what the sources support.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Numbered source list followed by the instructions for the model.
pub fn build_prompt(query: &str, evidence: &[CitedEvidence]) -> String {
    let sources = evidence
        .iter()
        .map(|item| {
            format!(
                "[{}] {}\nSource: {}\nContent: {}\n",
                item.index, item.title, item.source, item.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Research Question: {query}\n\nSources Found:\n{sources}\n\
         Please provide a comprehensive answer based on these sources, citing them with [1], [2], etc. \
         If sources present different perspectives, acknowledge them."
    )
}

fn parse_completion(body: &Value) -> Result<String, EvidenceSourceError> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| EvidenceSourceError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "the model did not generate a response".to_string(),
        })
}

/// Chat-completions client for OpenRouter.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl OpenRouterClient {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: OPENROUTER_ENDPOINT.to_string(),
            api_key,
            model: model.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn request_body(&self, messages: &[ChatMessage]) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.2,
            "max_tokens": 4000,
            "stream": false,
            "top_p": 0.9,
            "frequency_penalty": 0.1,
            "presence_penalty": 0.1,
        })
    }

    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, EvidenceSourceError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            EvidenceSourceError::Request("OPENROUTER_API_KEY is not configured".to_string())
        })?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header("X-Title", APP_TITLE)
            .json(&self.request_body(messages))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(EvidenceSourceError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {message}"),
            });
        }

        parse_completion(&body)
    }
}

#[async_trait]
impl EvidenceConsumer for OpenRouterClient {
    async fn synthesize(
        &self,
        query: &str,
        evidence: &[CitedEvidence],
    ) -> Result<String, EvidenceSourceError> {
        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(build_prompt(query, evidence)),
        ];

        let answer = self.chat(&messages).await?;
        tracing::debug!(
            query,
            sources = evidence.len(),
            chars = answer.len(),
            "answer synthesized"
        );
        Ok(answer)
    }
}

// Local model toxicity tier, served by an Ollama instance (`/api/chat`).

use crate::core::moderation::{parse_verdict, TierError, VerdictProvider, TOXICITY_INSTRUCTION};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

/// Parse the body of a non-streaming `/api/chat` reply into a verdict.
fn parse_body(body: &str) -> Result<bool, TierError> {
    let response: OllamaResponse =
        serde_json::from_str(body).map_err(|e| TierError::Malformed(e.to_string()))?;
    parse_verdict(&response.message.content)
}

#[async_trait]
impl VerdictProvider for OllamaClient {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn verdict(&self, text: &str) -> Result<bool, TierError> {
        let request = OllamaRequest {
            model: &self.model,
            messages: vec![
                OllamaMessage {
                    role: "system",
                    content: TOXICITY_INSTRUCTION,
                },
                OllamaMessage {
                    role: "user",
                    content: text,
                },
            ],
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| TierError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TierError::Unavailable(format!(
                "local model returned {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TierError::Transport(e.to_string()))?;
        parse_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body() {
        let body = r#"{"model":"llama3","message":{"role":"assistant","content":"safe"},"done":true}"#;
        assert!(!parse_body(body).unwrap());
        assert!(matches!(parse_body("{}"), Err(TierError::Malformed(_))));
    }
}

// Remote toxicity tier: an OpenAI-compatible chat completion endpoint
// (OpenRouter by default) asked to answer `toxic` or `safe`.

use crate::core::moderation::{parse_verdict, TierError, VerdictProvider, TOXICITY_INSTRUCTION};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_OPENROUTER_MODEL: &str = "openai/gpt-4o-mini";

pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenRouterClient {
    pub fn new(
        api_key: String,
        model: String,
        url: String,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_key,
            model,
            url,
        })
    }

    fn payload(&self, text: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": TOXICITY_INSTRUCTION },
                { "role": "user", "content": text },
            ],
            "temperature": 0.0,
            "max_tokens": 3,
        })
    }
}

/// Pull the assistant reply out of a chat completion body.
pub fn extract_reply(body: &Value) -> Result<&str, TierError> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| TierError::Malformed("missing choices[0].message.content".to_string()))
}

#[async_trait]
impl VerdictProvider for OpenRouterClient {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn verdict(&self, text: &str) -> Result<bool, TierError> {
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.payload(text))
            .send()
            .await
            .map_err(|e| TierError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TierError::Unavailable(format!("{} - {}", status, body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TierError::Malformed(e.to_string()))?;

        parse_verdict(extract_reply(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_carries_instruction_and_text() {
        let client = OpenRouterClient::new(
            "key".to_string(),
            "some/model".to_string(),
            DEFAULT_OPENROUTER_URL.to_string(),
            Duration::from_secs(10),
        )
        .unwrap();
        let payload = client.payload("hello");
        assert_eq!(payload["model"], "some/model");
        assert_eq!(payload["messages"][0]["content"], TOXICITY_INSTRUCTION);
        assert_eq!(payload["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_extract_reply() {
        let body = json!({ "choices": [{ "message": { "content": "Toxic" } }] });
        assert!(parse_verdict(extract_reply(&body).unwrap()).unwrap());

        let empty = json!({ "choices": [] });
        assert!(matches!(extract_reply(&empty), Err(TierError::Malformed(_))));
    }
}

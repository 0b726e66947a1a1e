use async_trait::async_trait;
use mimic_core::config::ReasoningConfig;
use mimic_core::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::{CompletionRequest, ReasoningClient};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(api_key: &str, api_base: Option<&str>, model: &str, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            api_base: api_base
                .unwrap_or(ANTHROPIC_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            max_tokens,
        }
    }

    pub fn from_config(config: &ReasoningConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config(
                "reasoning apiKey is not set; run `mimicd onboard` first".to_string(),
            ));
        }
        Ok(Self::new(
            &config.api_key,
            config.api_base.as_deref(),
            &config.model,
            config.max_tokens,
        ))
    }

    /// Build the content blocks for a user message: images first, then text.
    fn build_content(request: &CompletionRequest) -> Vec<Value> {
        let mut blocks: Vec<Value> = Vec::new();
        for image in &request.images {
            blocks.push(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": "image/jpeg",
                    "data": image,
                }
            }));
        }
        blocks.push(json!({
            "type": "text",
            "text": request.prompt,
        }));
        blocks
    }
}

#[async_trait]
impl ReasoningClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let url = format!("{}/messages", self.api_base);

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{
                "role": "user",
                "content": Self::build_content(&request),
            }],
        });
        if let Some(system) = &request.system {
            body["system"] = Value::String(system.clone());
        }

        info!(
            url = %url,
            model = %self.model,
            images = request.images.len(),
            prompt_len = request.prompt.len(),
            "Calling Anthropic API"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Reasoning(format!("Anthropic request failed: {}", e)))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = %status, body = %raw_body, "Anthropic API error");
            return Err(Error::Reasoning(format!(
                "Anthropic API error {}: {}",
                status,
                truncate_body(&raw_body)
            )));
        }

        debug!(body_len = raw_body.len(), "Anthropic raw response");

        let resp: AnthropicResponse = serde_json::from_str(&raw_body).map_err(|e| {
            Error::Reasoning(format!(
                "Failed to parse Anthropic response: {}. Body: {}",
                e,
                truncate_body(&raw_body)
            ))
        })?;

        let text: String = resp
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            return Err(Error::Reasoning("Anthropic returned no text content".to_string()));
        }
        Ok(text)
    }
}

/// First 500 chars of an error body, cut on a char boundary.
fn truncate_body(body: &str) -> &str {
    match body.char_indices().nth(500) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_base_trailing_slash_is_trimmed() {
        let client = AnthropicClient::new("key", Some("https://proxy.example/v1/"), "m", 100);
        assert_eq!(client.api_base, "https://proxy.example/v1");
    }

    #[test]
    fn content_places_images_before_text() {
        let request = CompletionRequest {
            system: None,
            prompt: "describe".to_string(),
            images: vec!["aGk=".to_string()],
        };
        let blocks = AnthropicClient::build_content(&request);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["type"], "image");
        assert_eq!(blocks[0]["source"]["media_type"], "image/jpeg");
        assert_eq!(blocks[1]["type"], "text");
    }

    #[test]
    fn error_body_truncates_on_char_boundaries() {
        let multibyte = "é".repeat(400);
        let cut = truncate_body(&multibyte);
        assert_eq!(cut.chars().count(), 400);
        let long = format!("{}tail", "é".repeat(600));
        let cut = truncate_body(&long);
        assert_eq!(cut.chars().count(), 500);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn response_text_blocks_are_joined() {
        let raw = r#"{"content":[{"type":"text","text":"a"},{"type":"tool_use"},{"type":"text","text":"b"}]}"#;
        let resp: AnthropicResponse = serde_json::from_str(raw).unwrap();
        let text: String = resp
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(text, "a\nb");
    }
}

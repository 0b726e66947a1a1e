//! Vision-capable model access for frame analysis, replay planning, and
//! workflow distillation.

pub mod anthropic;
pub mod extract;

use async_trait::async_trait;
use mimic_core::Result;

/// A single completion request. Images are base64 JPEG frames attached
/// before the prompt text.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub images: Vec<String>,
}

#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

pub use anthropic::AnthropicClient;
pub use extract::{extract_json_array, extract_json_object, sanitize_json_text};

//! Vision model client (OpenAI chat completions with image input)
//!
//! One request per classification or extraction. No retries: the intake
//! flow flags the record and asks the employee to resend instead.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Vision client errors
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Vision API key not configured")]
    MissingApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Image resolution hint passed to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Detail {
    Low,
    High,
}

/// One vision request: a text prompt plus a single image
#[derive(Debug, Clone)]
pub struct VisionRequest<'a> {
    pub prompt: &'a str,
    pub image: &'a [u8],
    pub mime_type: &'a str,
    pub detail: Detail,
    pub max_tokens: u32,
}

/// Sends an image plus prompt to a vision model and returns its text reply
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn complete(&self, request: VisionRequest<'_>) -> Result<String, VisionError>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// OpenAI chat completions client
pub struct OpenAiVisionClient {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiVisionClient {
    pub fn new(api_key: String, model: String) -> Result<Self, VisionError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| VisionError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl VisionClient for OpenAiVisionClient {
    async fn complete(&self, request: VisionRequest<'_>) -> Result<String, VisionError> {
        if self.api_key.is_empty() {
            return Err(VisionError::MissingApiKey);
        }

        let data_url = format!(
            "data:{};base64,{}",
            request.mime_type,
            STANDARD.encode(request.image)
        );
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": request.prompt },
                    { "type": "image_url", "image_url": { "url": data_url, "detail": request.detail } }
                ]
            }],
            "max_tokens": request.max_tokens,
            "temperature": 0,
        });

        tracing::debug!(
            detail = ?request.detail,
            image_bytes = request.image.len(),
            "Calling vision API"
        );

        let response = self
            .http_client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VisionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VisionError::Api(status.as_u16(), text));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| VisionError::Parse(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .ok_or_else(|| VisionError::Parse("Response had no content".to_string()))
    }
}

/// MIME type for a stored image, by extension
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_api_key_fails_fast() {
        let client = OpenAiVisionClient::new(String::new(), "gpt-4o-mini".to_string()).unwrap();
        let result = client
            .complete(VisionRequest {
                prompt: "classify",
                image: b"fake",
                mime_type: "image/jpeg",
                detail: Detail::Low,
                max_tokens: 100,
            })
            .await;
        assert!(matches!(result, Err(VisionError::MissingApiKey)));
    }

    #[test]
    fn test_detail_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Detail::High).unwrap(), json!("high"));
    }

    #[test]
    fn test_mime_for_extension() {
        assert_eq!(mime_for_extension("JPG"), "image/jpeg");
        assert_eq!(mime_for_extension("png"), "image/png");
    }
}

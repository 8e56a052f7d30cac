use crate::errors::{AppError, ResultExt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Output format requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    Json,
}

/// One completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub temperature: f32,
    pub response_format: ResponseFormat,
}

impl GenerationRequest {
    pub fn json(prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            temperature,
            response_format: ResponseFormat::Json,
        }
    }
}

/// Raw model answer, expected to be JSON-shaped text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub raw_text: String,
}

/// Prompt in, JSON-shaped text out.
///
/// The pipeline does not depend on a provider's wire format beyond this.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, AppError>;
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct HttpTextGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpTextGenerator {
    /// Creates a new `HttpTextGenerator`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the API (e.g. `https://api.openai.com/v1`).
    /// * `api_key` - Bearer token.
    /// * `model` - Model name sent with every request.
    /// * `timeout` - Per-request timeout.
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::InternalError(format!("Failed to create LLM client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    pub fn from_config(config: &crate::config::Config) -> Result<Self, AppError> {
        Self::new(
            config.llm_base_url.clone(),
            config.llm_api_key.clone(),
            config.llm_model.clone(),
            config.llm_timeout,
        )
        .with_context(|| format!("building LLM client for {}", config.llm_base_url))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(default)]
    message: String,
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, AppError> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            "Requesting completion from {} (model {}, temperature {})",
            url,
            self.model,
            request.temperature
        );

        let mut body = json!({
            "model": self.model,
            "temperature": request.temperature,
            "messages": [
                { "role": "user", "content": request.prompt }
            ]
        });
        if request.response_format == ResponseFormat::Json {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!("LLM request timed out: {}", e))
                } else {
                    AppError::ExternalApiError(format!("LLM request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "LLM returned {}: {}",
                status, error_text
            )));
        }

        let completion: ChatCompletion = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse LLM response: {}", e))
        })?;

        if let Some(err) = completion.error {
            return Err(AppError::ExternalApiError(format!(
                "LLM returned an error: {}",
                err.message
            )));
        }

        let raw_text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| {
                AppError::ExternalApiError("LLM response has no message content".to_string())
            })?;

        Ok(GenerationResponse { raw_text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HttpTextGenerator::new(
            "https://example.com/v1/".to_string(),
            "token".to_string(),
            "gpt-4o-mini".to_string(),
            Duration::from_secs(5),
        );
        assert!(client.is_ok());
        assert_eq!(client.unwrap().base_url, "https://example.com/v1");
    }

    #[test]
    fn test_json_request_shape() {
        let request = GenerationRequest::json("hello", 0.3);
        assert_eq!(request.response_format, ResponseFormat::Json);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["response_format"], "json");
    }
}

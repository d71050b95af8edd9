//! Ollama HTTP provider.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::provider::{ChatMessage, Provider, ProviderError, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Like `with_base_url`, with an overall per-request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn transport_error(base_url: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else if err.is_connect() {
        ProviderError::NotAvailable(format!("{} ({})", base_url, err))
    } else {
        ProviderError::HttpError(err)
    }
}

/// Map a non-success reply from `/api/chat` to an error.
fn status_error(model: &str, status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.trim().to_string());

    if status == StatusCode::NOT_FOUND
        || (message.contains("not found") && message.contains(model))
    {
        ProviderError::ModelNotFound(model.to_string())
    } else {
        ProviderError::ApiError(format!("{}: {}", status, message))
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .is_ok()
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(format!("{}: {}", status, body.trim())));
        }

        let models: ModelsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        Ok(models.models.into_iter().map(|m| m.name).collect())
    }

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model,
            messages,
            stream: false,
        };

        tracing::debug!(
            "POST {}/api/chat model={} messages={}",
            self.base_url,
            model,
            messages.len()
        );

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(model, status, &body));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        Ok(chat_response.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_maps_to_model_not_found() {
        let body = r#"{"error":"model \"mistral\" not found, try pulling it first"}"#;
        assert!(matches!(
            status_error("mistral", StatusCode::NOT_FOUND, body),
            ProviderError::ModelNotFound(m) if m == "mistral"
        ));
        assert!(matches!(
            status_error("llama3.2", StatusCode::INTERNAL_SERVER_ERROR, r#"{"error":"boom"}"#),
            ProviderError::ApiError(m) if m.contains("boom")
        ));
    }

    #[test]
    fn request_body_matches_ollama_chat_api() {
        let messages = vec![ChatMessage::system("be brief")];
        let request = ChatRequest {
            model: "llama3.2",
            messages: &messages,
            stream: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "llama3.2");
        assert_eq!(value["stream"], false);
        assert_eq!(value["messages"][0]["role"], "system");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let provider = OllamaProvider::with_base_url("http://127.0.0.1:11434/");
        assert_eq!(provider.base_url(), "http://127.0.0.1:11434");
    }

    #[tokio::test]
    async fn unreachable_backend_is_not_available() {
        if ["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]
            .iter()
            .any(|v| std::env::var_os(v).is_some())
        {
            return;
        }

        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let provider = OllamaProvider::with_base_url(format!("http://127.0.0.1:{}", port));
        assert!(!provider.is_available().await);
        let err = provider.chat("llama3.2", &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotAvailable(_)), "got {:?}", err);
    }
}

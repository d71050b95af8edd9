//! AI providers and the client the chat loop talks to.

use std::sync::Arc;

pub mod ollama;
pub mod provider;

pub use ollama::OllamaProvider;
pub use provider::{ChatMessage, Provider, ProviderError};

use crate::core::Session;
use crate::error::{Error, Result};

/// System message prepended to every request. Never stored in the session.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful terminal AI assistant. You can:
- Answer questions and provide assistance
- Suggest scripts from the user's scripts folder
- Help with coding, debugging, and system administration
- Provide explanations and guidance

When you want a script to be run, write [EXECUTE_SCRIPT:filename] in your response.
The user will see this and can choose to run it.";

/// Sends conversations to a provider with the active model.
pub struct AiClient {
    provider: Arc<dyn Provider>,
    model: String,
    system_prompt: Option<String>,
}

impl AiClient {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    /// Replace the system prompt; `None` or blank sends none.
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Switch the model for later sends. Installation is checked on the
    /// next send, not here.
    pub fn set_model(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument("model name must not be empty".to_string()));
        }
        tracing::info!("Model changed {} -> {}", self.model, name);
        self.model = name.to_string();
        Ok(())
    }

    /// System prompt followed by the full session history.
    pub fn build_messages(&self, session: &Session) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(session.messages.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }
        messages.extend(session.messages.iter().map(ChatMessage::from));
        messages
    }

    /// Ask the active model for the next reply.
    pub async fn send(&self, session: &Session) -> Result<String> {
        self.send_with_model(session, &self.model).await
    }

    /// Ask `model` for the next reply to `session`.
    pub async fn send_with_model(&self, session: &Session, model: &str) -> Result<String> {
        let messages = self.build_messages(session);
        self.provider
            .chat(model, &messages)
            .await
            .map_err(|e| map_provider_error(e, model))
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        self.provider
            .list_models()
            .await
            .map_err(|e| map_provider_error(e, &self.model))
    }

    /// Cheap reachability check used at startup.
    pub async fn probe(&self) -> bool {
        self.provider.is_available().await
    }
}

fn map_provider_error(err: ProviderError, model: &str) -> Error {
    match err {
        ProviderError::NotAvailable(msg) => Error::Connection(msg),
        ProviderError::Timeout => Error::Connection("request timed out".to_string()),
        ProviderError::HttpError(e) if e.is_connect() || e.is_timeout() => {
            Error::Connection(e.to_string())
        }
        ProviderError::ModelNotFound(_) => Error::ModelNotFound(model.to_string()),
        other => Error::Backend(other.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use std::sync::Mutex;

    use super::provider::{ChatMessage, Provider, ProviderError, Result};

    /// Canned provider that records every request.
    pub struct StubProvider {
        pub reply: Mutex<std::result::Result<String, String>>,
        pub installed: Vec<String>,
        pub requests: Mutex<Vec<(String, Vec<ChatMessage>)>>,
    }

    impl StubProvider {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: Mutex::new(Ok(reply.to_string())),
                installed: vec!["llama3.2:latest".to_string()],
                requests: Mutex::new(Vec::new()),
            }
        }

        /// `kind` is "offline" or "missing".
        pub fn failing(kind: &str) -> Self {
            let stub = Self::replying("");
            *stub.reply.lock().unwrap() = Err(kind.to_string());
            stub
        }
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn is_available(&self) -> bool {
            !matches!(&*self.reply.lock().unwrap(), Err(kind) if kind == "offline")
        }

        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(self.installed.clone())
        }

        async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
            self.requests
                .lock()
                .unwrap()
                .push((model.to_string(), messages.to_vec()));
            match &*self.reply.lock().unwrap() {
                Ok(reply) => Ok(reply.clone()),
                Err(kind) if kind == "offline" => {
                    Err(ProviderError::NotAvailable("http://127.0.0.1:1".to_string()))
                }
                Err(_) => Err(ProviderError::ModelNotFound(model.to_string())),
            }
        }
    }
}

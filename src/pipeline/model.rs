//! Model collaborator: one trait for every request the session makes.
//!
//! [`ModelClient`] is the seam between the chat pipeline and the external
//! model service. The collector and the synthesizer only ever see this
//! trait; [`ProviderModel`] implements it on top of an
//! `edgequake_llm::LLMProvider`, and tests plug in scripted clients.
//!
//! Two delivery modes exist: [`ModelClient::complete`] returns the whole
//! text, [`ModelClient::stream`] yields text deltas. A client without native
//! streaming gets a one-chunk stream from the default implementation, so
//! callers never need to care which one they hold.

use crate::config::ChatConfig;
use crate::context::{ConversationTurn, Role};
use crate::error::{ModelError, PdfChatError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::debug;

/// Default model when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// A boxed stream of text deltas.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send>>;

/// Everything the model sees for one request.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system: Option<String>,
    /// Prior conversation turns, oldest first.
    pub history: Vec<ConversationTurn>,
    /// The query (or consolidation prompt) text.
    pub text: String,
    /// Page images attached to the query, in page order.
    pub images: Vec<ImageData>,
}

impl ModelRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_history(mut self, history: &[ConversationTurn]) -> Self {
        self.history = history.to_vec();
        self
    }

    pub fn with_images(mut self, images: Vec<ImageData>) -> Self {
        self.images = images;
        self
    }

    /// True when the request is a bare prompt: no system message, history
    /// or images.
    pub fn is_plain_prompt(&self) -> bool {
        self.system.is_none() && self.history.is_empty() && self.images.is_empty()
    }
}

/// The external model service.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Send the request and wait for the complete answer.
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError>;

    /// Send the request and receive the answer as text deltas.
    async fn stream(&self, request: &ModelRequest) -> Result<TextStream, ModelError> {
        let text = self.complete(request).await?;
        Ok(Box::pin(stream::once(async move { Ok(text) })))
    }
}

/// [`ModelClient`] backed by an edgequake-llm provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ChatConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }

    /// Resolve the provider named by `config` and wrap it.
    pub fn from_config(config: &ChatConfig) -> Result<Self, PdfChatError> {
        Ok(Self::new(resolve_provider(config)?, config))
    }
}

#[async_trait]
impl ModelClient for ProviderModel {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let messages = build_messages(request);
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(ModelError::from)?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.provider.name(),
            response.prompt_tokens,
            response.completion_tokens
        );

        if response.content.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(response.content)
    }

    async fn stream(&self, request: &ModelRequest) -> Result<TextStream, ModelError> {
        // Provider streaming takes a bare prompt; anything richer goes
        // through `chat` and is delivered as one chunk.
        if !self.provider.supports_streaming() || !request.is_plain_prompt() {
            let text = self.complete(request).await?;
            return Ok(Box::pin(stream::once(async move { Ok(text) })));
        }

        let inner = match self.provider.stream(&request.text).await {
            Ok(inner) => inner,
            Err(e) => match ModelError::from(e) {
                ModelError::Unsupported(what) => {
                    debug!("{}: streaming unsupported ({}); using chat", self.name(), what);
                    let text = self.complete(request).await?;
                    return Ok(Box::pin(stream::once(async move { Ok(text) })));
                }
                other => return Err(other),
            },
        };

        Ok(Box::pin(inner.map(|chunk| chunk.map_err(ModelError::from))))
    }
}

/// Lay out the chat messages for a request.
///
/// Order: system prompt, prior turns, then the query with the page images.
fn build_messages(request: &ModelRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.history.len() + 2);

    if let Some(system) = request.system.as_deref() {
        messages.push(ChatMessage::system(system));
    }

    for turn in &request.history {
        messages.push(match turn.role {
            Role::User => ChatMessage::user(turn.content.as_str()),
            Role::Assistant => ChatMessage::assistant(turn.content.as_str()),
        });
    }

    if request.images.is_empty() {
        messages.push(ChatMessage::user(request.text.as_str()));
    } else {
        messages.push(ChatMessage::user_with_images(
            request.text.as_str(),
            request.images.clone(),
        ));
    }

    messages
}

/// Build `CompletionOptions` from the session config.
fn build_options(config: &ChatConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. pre-built provider (`config.provider`)
/// 2. named provider + model (`config.provider_name`)
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set
/// 4. OpenAI when `OPENAI_API_KEY` is present
/// 5. `ProviderFactory::from_env` auto-detection
pub fn resolve_provider(config: &ChatConfig) -> Result<Arc<dyn LLMProvider>, PdfChatError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PdfChatError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PdfChatError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PdfChatError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Scripted model client for unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    type Responder = dyn Fn(&ModelRequest) -> Result<String, ModelError> + Send + Sync;

    /// Answers through a closure and records every request with the
    /// (tokio) time it arrived.
    pub struct ScriptedModel {
        responder: Box<Responder>,
        pub calls: Mutex<Vec<(Instant, ModelRequest)>>,
    }

    impl ScriptedModel {
        pub fn new(
            responder: impl Fn(&ModelRequest) -> Result<String, ModelError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                responder: Box::new(responder),
                calls: Mutex::new(Vec::new()),
            })
        }

        /// Page requests answer with "evidence for <image data>", anything
        /// without images echoes the prompt.
        pub fn echo() -> Arc<Self> {
            Self::new(|req| {
                if req.images.is_empty() {
                    Ok(format!("merged: {}", req.text))
                } else {
                    let tags: Vec<&str> = req.images.iter().map(|i| i.data.as_str()).collect();
                    Ok(format!("evidence for {}", tags.join(",")))
                }
            })
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn requests(&self) -> Vec<ModelRequest> {
            self.calls.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
        }

        pub fn timestamps(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
            self.calls
                .lock()
                .unwrap()
                .push((Instant::now(), request.clone()));
            (self.responder)(request)
        }
    }
}

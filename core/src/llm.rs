use crate::chat::{ChatMessage, MessageRole};
use crate::config::{AiRuntimeSettings, ConfigError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::debug;
use url::Url;

pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    OpenAi,
    AzureOpenAi,
    Mock,
}

impl LlmProviderKind {
    pub fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Some(Self::OpenAi),
            "azure_openai" | "azure" => Some(Self::AzureOpenAi),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error("OpenAI API key not configured. {0}")]
    NotConfigured(String),
    #[error("OpenAI API error: {status} {reason}")]
    Status { status: u16, reason: String },
    #[error("Invalid response structure from OpenAI API")]
    Malformed,
    #[error("{0}")]
    Transport(String),
}

impl CompletionError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Failures attributable to the AI service rather than the local request.
    pub fn is_service_failure(&self) -> bool {
        !matches!(self, Self::Transport(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl LlmConfig {
    pub fn new(provider: LlmProviderKind, model: Option<String>) -> Self {
        Self {
            provider,
            model,
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        }
    }

    fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub usage: Option<ModelUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[async_trait]
pub trait LanguageModelProvider: Send + Sync {
    async fn send_chat(
        &self,
        messages: &[ChatMessage],
        config: &LlmConfig,
    ) -> Result<ChatResponse, CompletionError>;
}

#[derive(Clone)]
pub struct LlmDriver {
    config: LlmConfig,
    provider: Arc<dyn LanguageModelProvider>,
    unavailable: Option<String>,
}

impl LlmDriver {
    pub fn new(config: LlmConfig, provider: Arc<dyn LanguageModelProvider>) -> Self {
        Self {
            config,
            provider,
            unavailable: None,
        }
    }

    pub fn from_settings(settings: &Result<AiRuntimeSettings, ConfigError>) -> Self {
        match settings {
            Ok(settings) => Self::with_settings(settings),
            Err(err) => Self::unconfigured(err.user_message()),
        }
    }

    pub fn with_settings(settings: &AiRuntimeSettings) -> Self {
        let config = LlmConfig::new(settings.provider.clone(), settings.model.clone());
        match (&settings.provider, &settings.openai, &settings.azure) {
            (LlmProviderKind::OpenAi, Some(openai), _) => Self::new(
                config,
                Arc::new(OpenAiProvider::new(
                    openai.base_url.clone(),
                    openai.api_key.clone(),
                )),
            ),
            (LlmProviderKind::AzureOpenAi, _, Some(azure)) => Self::new(
                config,
                Arc::new(AzureOpenAiProvider::new(
                    azure.endpoint.clone(),
                    azure.api_version.clone(),
                    azure.deployment_name.clone(),
                    azure.api_key.clone(),
                )),
            ),
            (LlmProviderKind::Mock, _, _) => Self::new(config, Arc::new(MockProvider)),
            _ => Self::unconfigured(ConfigError::Missing.user_message()),
        }
    }

    /// A driver that refuses every request with [`CompletionError::NotConfigured`].
    pub fn unconfigured(reason: String) -> Self {
        Self {
            config: LlmConfig::new(LlmProviderKind::OpenAi, None),
            provider: Arc::new(UnconfiguredProvider {
                reason: reason.clone(),
            }),
            unavailable: Some(reason),
        }
    }

    pub fn fake() -> Self {
        Self::new(
            LlmConfig::new(LlmProviderKind::Mock, Some("mock".into())),
            Arc::new(MockProvider),
        )
    }

    pub fn provider_kind(&self) -> LlmProviderKind {
        self.config.provider.clone()
    }

    pub fn is_configured(&self) -> bool {
        self.unavailable.is_none()
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable.as_deref()
    }

    pub async fn respond(&self, history: &[ChatMessage]) -> Result<ChatResponse, CompletionError> {
        self.provider.send_chat(history, &self.config).await
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a MessageRole,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

impl<'a> CompletionRequest<'a> {
    fn new(model: Option<&'a str>, messages: &'a [ChatMessage], config: &LlmConfig) -> Self {
        Self {
            model,
            messages: messages
                .iter()
                .map(|message| WireMessage {
                    role: &message.role,
                    content: &message.content,
                })
                .collect(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageBody>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

/// Shared request/response handling for the OpenAI-compatible endpoints.
async fn post_completion(
    request: reqwest::RequestBuilder,
    body: &CompletionRequest<'_>,
) -> Result<ChatResponse, CompletionError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|err| CompletionError::Transport(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(CompletionError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
        });
    }
    let value: Value = response
        .json()
        .await
        .map_err(|_| CompletionError::Malformed)?;
    parse_completion(value)
}

fn parse_completion(value: Value) -> Result<ChatResponse, CompletionError> {
    let body: CompletionBody =
        serde_json::from_value(value).map_err(|_| CompletionError::Malformed)?;
    let content = body
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .ok_or(CompletionError::Malformed)?
        .content
        .unwrap_or_default();
    debug!(chars = content.len(), "completion received");
    Ok(ChatResponse {
        message: ChatMessage::new(MessageRole::Assistant, content),
        usage: body.usage.map(|usage| ModelUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        }),
    })
}

pub struct OpenAiProvider {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(base_url: Url, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

pub struct AzureOpenAiProvider {
    http: reqwest::Client,
    endpoint: String,
    api_version: String,
    deployment: String,
    api_key: String,
}

impl AzureOpenAiProvider {
    pub fn new(endpoint: String, api_version: String, deployment: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_version,
            deployment,
            api_key,
        }
    }
}

struct MockProvider;

struct UnconfiguredProvider {
    reason: String,
}

#[async_trait]
impl LanguageModelProvider for OpenAiProvider {
    async fn send_chat(
        &self,
        messages: &[ChatMessage],
        config: &LlmConfig,
    ) -> Result<ChatResponse, CompletionError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let url = format!("{base}/chat/completions");
        let body = CompletionRequest::new(Some(config.model_or_default()), messages, config);
        post_completion(self.http.post(url).bearer_auth(&self.api_key), &body).await
    }
}

#[async_trait]
impl LanguageModelProvider for AzureOpenAiProvider {
    async fn send_chat(
        &self,
        messages: &[ChatMessage],
        config: &LlmConfig,
    ) -> Result<ChatResponse, CompletionError> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions",
            self.endpoint.trim_end_matches('/'),
            self.deployment
        );
        // The deployment selects the model, so none is sent.
        let body = CompletionRequest::new(None, messages, config);
        let request = self
            .http
            .post(url)
            .query(&[("api-version", self.api_version.as_str())])
            .header("api-key", &self.api_key);
        post_completion(request, &body).await
    }
}

#[async_trait]
impl LanguageModelProvider for MockProvider {
    async fn send_chat(
        &self,
        messages: &[ChatMessage],
        config: &LlmConfig,
    ) -> Result<ChatResponse, CompletionError> {
        synthetic_response("Mock", messages, config).await
    }
}

#[async_trait]
impl LanguageModelProvider for UnconfiguredProvider {
    async fn send_chat(
        &self,
        _messages: &[ChatMessage],
        _config: &LlmConfig,
    ) -> Result<ChatResponse, CompletionError> {
        Err(CompletionError::NotConfigured(self.reason.clone()))
    }
}

async fn synthetic_response(
    provider_name: &str,
    messages: &[ChatMessage],
    config: &LlmConfig,
) -> Result<ChatResponse, CompletionError> {
    sleep(Duration::from_millis(20)).await;
    let prompt = messages
        .iter()
        .rev()
        .find(|msg| msg.role == MessageRole::User)
        .map(|msg| msg.content.clone())
        .unwrap_or_else(|| "How can I help you today?".to_string());
    let reply = format!(
        "[{provider_name}] Model {:?}: received '{}'.",
        config.model_or_default(),
        prompt
    );
    Ok(ChatResponse {
        message: ChatMessage::new(MessageRole::Assistant, reply),
        usage: Some(ModelUsage {
            prompt_tokens: messages.len() * 10,
            completion_tokens: 25,
        }),
    })
}

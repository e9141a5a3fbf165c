use crate::error::SessionError;
use crate::llm::{CompletionError, LlmDriver};
use crate::sink::{PresentationSink, ViewEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Retained history, roughly the last ten exchanges.
pub const TRANSCRIPT_LIMIT: usize = 20;

pub const SYSTEM_INSTRUCTION: &str = "Draft a UK contract template, in JSON format, that has 'Definition of Requirement' section for services within UK jurisdiction.";

const SERVICE_APOLOGY: &str = "Sorry, I encountered an issue connecting to the AI service. Please check your API key and try again.";
const GENERIC_APOLOGY: &str =
    "Sorry, I encountered an error while processing your message. Please try again.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Role-tagged history bounded to the most recent [`TRANSCRIPT_LIMIT`] entries.
#[derive(Debug, Clone, Default)]
pub struct ChatTranscript {
    messages: Vec<ChatMessage>,
}

impl ChatTranscript {
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        if self.messages.len() > TRANSCRIPT_LIMIT {
            let excess = self.messages.len() - TRANSCRIPT_LIMIT;
            self.messages.drain(..excess);
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// The fixed system instruction followed by the retained history.
    pub fn request_messages(&self) -> Vec<ChatMessage> {
        std::iter::once(ChatMessage::new(MessageRole::System, SYSTEM_INSTRUCTION))
            .chain(self.messages.iter().cloned())
            .collect()
    }
}

/// Relays user messages to the completion API and mirrors the exchange to the sink.
#[derive(Clone)]
pub struct ChatSession {
    transcript: Arc<Mutex<ChatTranscript>>,
    llm: LlmDriver,
    sink: Arc<dyn PresentationSink>,
}

impl ChatSession {
    pub fn new(llm: LlmDriver, sink: Arc<dyn PresentationSink>) -> Self {
        Self {
            transcript: Arc::new(Mutex::new(ChatTranscript::default())),
            llm,
            sink,
        }
    }

    pub fn transcript(&self) -> ChatTranscript {
        self.transcript.lock().clone()
    }

    /// Show the chat, greeting `display_name` on first open.
    pub fn open(&self, display_name: Option<&str>) -> Result<(), SessionError> {
        self.sink.notify(ViewEvent::ClearError);
        if let Some(reason) = self.llm.unavailable_reason() {
            let cause = CompletionError::NotConfigured(reason.to_string());
            // Shown without the "Chat error" prefix used for failed sends.
            self.sink.notify(ViewEvent::Error {
                message: cause.to_string(),
            });
            return Err(SessionError::CompletionApi(cause));
        }
        self.sink.notify(ViewEvent::ChatOpened);
        if self.transcript.lock().is_empty() {
            self.show(
                MessageRole::Assistant,
                format!(
                    "Hello {}! I'm your TRUSTB contract mentor. How can I help you today?",
                    display_name.unwrap_or("there")
                ),
            );
        }
        Ok(())
    }

    /// Send one user message. Blank input is ignored.
    pub async fn send(&self, text: &str) -> Result<Option<ChatMessage>, SessionError> {
        let content = text.trim();
        if content.is_empty() {
            return Ok(None);
        }

        let user_message = ChatMessage::new(MessageRole::User, content);
        self.sink.notify(ViewEvent::ChatMessage {
            message: user_message.clone(),
        });
        let history = {
            let mut transcript = self.transcript.lock();
            transcript.push(user_message);
            transcript.request_messages()
        };

        match self.llm.respond(&history).await {
            Ok(response) => {
                let reply = response.message;
                if let Some(usage) = response.usage {
                    info!(
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        "completion received"
                    );
                }
                self.sink.notify(ViewEvent::ChatMessage {
                    message: reply.clone(),
                });
                self.transcript.lock().push(reply.clone());
                Ok(Some(reply))
            }
            Err(err) => {
                error!(%err, "failed to send chat message");
                let apology = if err.is_service_failure() {
                    SERVICE_APOLOGY
                } else {
                    GENERIC_APOLOGY
                };
                self.show(MessageRole::Assistant, apology.to_string());
                let err = SessionError::CompletionApi(err);
                self.sink.notify(ViewEvent::Error {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    pub fn clear(&self, display_name: Option<&str>) {
        self.transcript.lock().clear();
        self.sink.notify(ViewEvent::ChatCleared);
        self.show(
            MessageRole::Assistant,
            format!(
                "Hello {}! I'm your AI assistant. How can I help you today?",
                display_name.unwrap_or("there")
            ),
        );
    }

    /// Display-only message; greetings and apologies never enter the transcript.
    fn show(&self, role: MessageRole, content: String) {
        self.sink.notify(ViewEvent::ChatMessage {
            message: ChatMessage::new(role, content),
        });
    }
}

/// A labeled entry of a contract template rendered from a JSON reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractNode {
    pub label: String,
    pub value: ContractValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContractValue {
    Text(String),
    Section(Vec<ContractNode>),
}

/// Structure an assistant reply that is a JSON object or array. Anything else,
/// including bare JSON scalars, renders as plain text.
pub fn contract_sections(content: &str) -> Option<Vec<ContractNode>> {
    match serde_json::from_str::<Value>(content).ok()? {
        value @ (Value::Object(_) | Value::Array(_)) => Some(section_nodes(&value)),
        _ => None,
    }
}

fn section_nodes(value: &Value) -> Vec<ContractNode> {
    let entries: Vec<(String, &Value)> = match value {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(idx, v)| (idx.to_string(), v))
            .collect(),
        _ => Vec::new(),
    };
    entries
        .into_iter()
        .map(|(key, value)| ContractNode {
            label: format_label(&key),
            value: match value {
                Value::Object(_) | Value::Array(_) => ContractValue::Section(section_nodes(value)),
                Value::String(text) => ContractValue::Text(text.clone()),
                Value::Null => ContractValue::Text(String::new()),
                other => ContractValue::Text(other.to_string()),
            },
        })
        .collect()
}

/// `definitionOfRequirement` becomes `Definition Of Requirement`.
pub fn format_label(key: &str) -> String {
    let mut spaced = String::with_capacity(key.len() + 8);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            spaced.push(' ');
        }
        spaced.push(ch);
    }
    let mut chars = spaced.chars();
    let capitalized: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    capitalized.trim().to_string()
}

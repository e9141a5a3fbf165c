pub mod auth;
pub mod callback;
pub mod chat;
pub mod config;
pub mod error;
pub mod graph;
pub mod identity;
pub mod llm;
pub mod oidc;
pub mod provider;
pub mod sink;
pub mod store;
pub mod telemetry;
pub mod testing;

pub use auth::{
    ExecutionContext, SessionCoordinator, SessionOptions, SessionState, SignInOutcome,
    SignOutOutcome,
};
pub use chat::{ChatMessage, ChatSession, ChatTranscript, MessageRole};
pub use config::{ConfigError, IdentitySettings, SignetSettings};
pub use error::{ProviderError, SessionError};
pub use graph::{ApiError, GraphClient};
pub use identity::{AccessToken, AuthenticationResult, Identity, ScopeSet};
pub use llm::{CompletionError, LlmDriver, LlmProviderKind};
pub use oidc::OidcClient;
pub use provider::{AuthRequest, IdentityProvider, LogoutRequest};
pub use sink::{PresentationSink, RedirectFlow, ViewEvent};
pub use store::SessionStore;

use crate::graph::ApiError;
use crate::llm::CompletionError;

/// Failure reported by an [`IdentityProvider`](crate::provider::IdentityProvider).
///
/// The variants mirror the error codes the Microsoft identity platform client
/// libraries hand back, so callers can branch on them without string matching.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("unable to open the system browser: {0}")]
    PopupWindowError(String),
    #[error("the user closed the sign-in window before completing the flow")]
    PopupCanceled,
    #[error("an interactive authentication flow is already in progress")]
    InteractionInProgress,
    #[error("interaction required: {0}")]
    InteractionRequired(String),
    #[error("consent required: {0}")]
    ConsentRequired(String),
    #[error("no signed-in account is available")]
    NoAccount,
    #[error("state returned by the authorization server does not match the request")]
    StateMismatch,
    #[error("{code}: {description}")]
    Server { code: String, description: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("session storage error: {0}")]
    Storage(String),
    #[error("invalid identity configuration: {0}")]
    Configuration(String),
}

impl ProviderError {
    /// Stable error code, matching the identity platform's vocabulary.
    pub fn code(&self) -> &str {
        match self {
            Self::PopupWindowError(_) => "popup_window_error",
            Self::PopupCanceled => "user_cancelled",
            Self::InteractionInProgress => "interaction_in_progress",
            Self::InteractionRequired(_) => "interaction_required",
            Self::ConsentRequired(_) => "consent_required",
            Self::NoAccount => "no_account_error",
            Self::StateMismatch => "state_mismatch",
            Self::Server { code, .. } => code,
            Self::Network(_) => "network_error",
            Self::Storage(_) => "storage_error",
            Self::Configuration(_) => "invalid_configuration",
        }
    }

    /// Classify an OAuth error response body (`error` / `error_description`).
    pub fn from_oauth(code: &str, description: Option<&str>) -> Self {
        let description = description.unwrap_or_default().to_string();
        match code {
            "interaction_required" | "login_required" | "invalid_grant" => {
                Self::InteractionRequired(description)
            }
            "consent_required" => Self::ConsentRequired(description),
            "access_denied" | "user_cancelled" => Self::PopupCanceled,
            other => Self::Server {
                code: other.to_string(),
                description,
            },
        }
    }
}

/// Which operation was refused because an interactive flow is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedAction {
    SignIn,
    SignOut,
}

impl BlockedAction {
    fn wait_message(self) -> &'static str {
        match self {
            Self::SignIn => "Please wait for the current sign-in process to complete.",
            Self::SignOut => {
                "Please wait for the current authentication process to complete before signing out."
            }
        }
    }
}

/// Conditions the session coordinator and chat session surface to the user.
///
/// The `Display` output is the exact message shown in the error banner.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Failed to initialize authentication: {0}")]
    Initialization(ProviderError),
    #[error("{}", .blocked.wait_message())]
    InteractionAlreadyActive { blocked: BlockedAction },
    #[error("Sign in failed: {0}")]
    PopupBlocked(ProviderError),
    #[error("Sign in failed: {0}")]
    SignInFailed(ProviderError),
    #[error("Sign out failed: {0}")]
    SignOutFailed(ProviderError),
    #[error("Failed to get access token: {0}")]
    TokenAcquisitionFailed(ProviderError),
    #[error("Microsoft Graph call failed: {0}")]
    DownstreamApi(ApiError),
    #[error("Chat error: {0}")]
    CompletionApi(CompletionError),
}

impl SessionError {
    /// HTTP status carried by downstream or completion API failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::DownstreamApi(err) => err.status(),
            Self::CompletionApi(err) => err.status(),
            _ => None,
        }
    }
}

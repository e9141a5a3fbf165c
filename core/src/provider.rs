use crate::error::ProviderError;
use crate::identity::{AuthenticationResult, Identity, ScopeSet};
use async_trait::async_trait;
use url::Url;

/// Scopes plus the account a sign-in or token request is made on behalf of.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthRequest {
    pub scopes: ScopeSet,
    pub account: Option<Identity>,
}

impl AuthRequest {
    pub fn new(scopes: ScopeSet) -> Self {
        Self {
            scopes,
            account: None,
        }
    }

    pub fn for_account(scopes: ScopeSet, account: Option<Identity>) -> Self {
        Self { scopes, account }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogoutRequest {
    pub account: Option<Identity>,
    pub post_logout_redirect_uri: Option<Url>,
}

/// Client for an OAuth2/OIDC identity provider.
///
/// Token caching, silent renewal and PKCE live behind this trait; the session
/// coordinator only sequences calls and branches on [`ProviderError`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Load any persisted session state. Safe to call more than once.
    async fn initialize(&self) -> Result<(), ProviderError>;

    /// Complete a redirect-based sign-in started by a previous instance, if any.
    async fn handle_redirect_response(&self)
        -> Result<Option<AuthenticationResult>, ProviderError>;

    fn all_accounts(&self) -> Vec<Identity>;

    fn set_active_account(&self, account: Option<&Identity>);

    async fn login_popup(&self, request: &AuthRequest)
        -> Result<AuthenticationResult, ProviderError>;

    /// Hand the sign-in over to the browser. The result is picked up by
    /// [`IdentityProvider::handle_redirect_response`] on the next start.
    async fn login_redirect(&self, request: &AuthRequest) -> Result<(), ProviderError>;

    async fn logout_popup(&self, request: &LogoutRequest) -> Result<(), ProviderError>;

    async fn logout_redirect(&self, request: &LogoutRequest) -> Result<(), ProviderError>;

    async fn acquire_token_silent(
        &self,
        request: &AuthRequest,
    ) -> Result<AuthenticationResult, ProviderError>;

    async fn acquire_token_popup(
        &self,
        request: &AuthRequest,
    ) -> Result<AuthenticationResult, ProviderError>;
}

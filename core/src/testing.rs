//! Scripted collaborators for exercising the session coordinator without a
//! browser or network. Used by the integration tests and `xtask smoke`.

use crate::error::ProviderError;
use crate::identity::{AccessToken, AuthenticationResult, Identity, ScopeSet};
use crate::provider::{AuthRequest, IdentityProvider, LogoutRequest};
use crate::sink::{PresentationSink, ViewEvent};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Notify;

/// Builds an identity the way an ID token for `name` would describe it.
pub fn identity(name: &str, username: &str) -> Identity {
    let claims = json!({
        "oid": format!("oid-{}", username.replace('@', "-")),
        "tid": "tenant-1",
        "name": name,
        "preferred_username": username,
    });
    let claims = claims.as_object().cloned().unwrap_or_default();
    // `oid` and `tid` are present above, so this always yields an identity.
    Identity::from_claims(claims).unwrap_or_else(|| Identity {
        home_account_id: username.to_string(),
        name: Some(name.to_string()),
        username: username.to_string(),
        tenant_id: None,
        claims: Default::default(),
    })
}

pub fn auth_result(account: &Identity, secret: &str, scopes: ScopeSet) -> AuthenticationResult {
    AuthenticationResult {
        account: account.clone(),
        access_token: AccessToken::new(
            secret,
            scopes,
            Some(Utc::now() + chrono::Duration::hours(1)),
        ),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Initialize,
    HandleRedirectResponse,
    SetActiveAccount(Option<String>),
    LoginPopup,
    LoginRedirect,
    LogoutPopup,
    LogoutRedirect,
    AcquireTokenSilent(ScopeSet),
    AcquireTokenPopup(ScopeSet),
}

type Scripted<T> = Mutex<Result<T, ProviderError>>;

/// An [`IdentityProvider`] that answers every call with a preset result and
/// records the calls it received.
pub struct ScriptedProvider {
    accounts: Mutex<Vec<Identity>>,
    calls: Mutex<Vec<ProviderCall>>,
    login_gate: Mutex<Option<Arc<Notify>>>,
    initialize: Scripted<()>,
    redirect_response: Scripted<Option<AuthenticationResult>>,
    login_popup: Scripted<AuthenticationResult>,
    login_redirect: Scripted<()>,
    logout_popup: Scripted<()>,
    logout_redirect: Scripted<()>,
    silent: Scripted<AuthenticationResult>,
    token_popup: Scripted<AuthenticationResult>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            login_gate: Mutex::new(None),
            initialize: Mutex::new(Ok(())),
            redirect_response: Mutex::new(Ok(None)),
            login_popup: Mutex::new(Err(ProviderError::Server {
                code: "unscripted".into(),
                description: "login_popup was not scripted".into(),
            })),
            login_redirect: Mutex::new(Ok(())),
            logout_popup: Mutex::new(Ok(())),
            logout_redirect: Mutex::new(Ok(())),
            silent: Mutex::new(Err(ProviderError::InteractionRequired(
                "no cached token".into(),
            ))),
            token_popup: Mutex::new(Err(ProviderError::PopupCanceled)),
        }
    }

    pub fn with_account(self, account: Identity) -> Self {
        self.accounts.lock().push(account);
        self
    }

    pub fn on_initialize(self, result: Result<(), ProviderError>) -> Self {
        *self.initialize.lock() = result;
        self
    }

    pub fn on_redirect_response(
        self,
        result: Result<Option<AuthenticationResult>, ProviderError>,
    ) -> Self {
        *self.redirect_response.lock() = result;
        self
    }

    pub fn on_login_popup(self, result: Result<AuthenticationResult, ProviderError>) -> Self {
        *self.login_popup.lock() = result;
        self
    }

    pub fn on_login_redirect(self, result: Result<(), ProviderError>) -> Self {
        *self.login_redirect.lock() = result;
        self
    }

    pub fn on_logout_popup(self, result: Result<(), ProviderError>) -> Self {
        *self.logout_popup.lock() = result;
        self
    }

    pub fn on_logout_redirect(self, result: Result<(), ProviderError>) -> Self {
        *self.logout_redirect.lock() = result;
        self
    }

    pub fn on_silent(self, result: Result<AuthenticationResult, ProviderError>) -> Self {
        *self.silent.lock() = result;
        self
    }

    pub fn on_token_popup(self, result: Result<AuthenticationResult, ProviderError>) -> Self {
        *self.token_popup.lock() = result;
        self
    }

    /// `login_popup` waits on `gate` before answering.
    pub fn with_login_gate(self, gate: Arc<Notify>) -> Self {
        *self.login_gate.lock() = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&ProviderCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| matches(call)).count()
    }

    fn record(&self, call: ProviderCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    async fn initialize(&self) -> Result<(), ProviderError> {
        self.record(ProviderCall::Initialize);
        self.initialize.lock().clone()
    }

    async fn handle_redirect_response(
        &self,
    ) -> Result<Option<AuthenticationResult>, ProviderError> {
        self.record(ProviderCall::HandleRedirectResponse);
        self.redirect_response.lock().clone()
    }

    fn all_accounts(&self) -> Vec<Identity> {
        self.accounts.lock().clone()
    }

    fn set_active_account(&self, account: Option<&Identity>) {
        self.record(ProviderCall::SetActiveAccount(
            account.map(|account| account.home_account_id.clone()),
        ));
    }

    async fn login_popup(
        &self,
        _request: &AuthRequest,
    ) -> Result<AuthenticationResult, ProviderError> {
        self.record(ProviderCall::LoginPopup);
        let gate = self.login_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.login_popup.lock().clone()
    }

    async fn login_redirect(&self, _request: &AuthRequest) -> Result<(), ProviderError> {
        self.record(ProviderCall::LoginRedirect);
        self.login_redirect.lock().clone()
    }

    async fn logout_popup(&self, _request: &LogoutRequest) -> Result<(), ProviderError> {
        self.record(ProviderCall::LogoutPopup);
        self.logout_popup.lock().clone()
    }

    async fn logout_redirect(&self, _request: &LogoutRequest) -> Result<(), ProviderError> {
        self.record(ProviderCall::LogoutRedirect);
        self.logout_redirect.lock().clone()
    }

    async fn acquire_token_silent(
        &self,
        request: &AuthRequest,
    ) -> Result<AuthenticationResult, ProviderError> {
        self.record(ProviderCall::AcquireTokenSilent(request.scopes.clone()));
        self.silent.lock().clone()
    }

    async fn acquire_token_popup(
        &self,
        request: &AuthRequest,
    ) -> Result<AuthenticationResult, ProviderError> {
        self.record(ProviderCall::AcquireTokenPopup(request.scopes.clone()));
        self.token_popup.lock().clone()
    }
}

/// Keeps every event it is handed.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ViewEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ViewEvent> {
        self.events.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ViewEvent::Error { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl PresentationSink for RecordingSink {
    fn notify(&self, event: ViewEvent) {
        self.events.lock().push(event);
    }
}

//! Identity provider client for the Microsoft identity platform (v2 endpoints).
//!
//! Interactive flows use the authorization code grant with PKCE. The "popup"
//! variants open the system browser and wait on a loopback listener; the
//! "redirect" variants persist the pending request and return immediately so a
//! later run can finish the exchange from the URL the browser landed on.

use crate::callback::{AuthorizationResponse, BrowserLauncher, CallbackListener, SystemBrowser};
use crate::config::IdentitySettings;
use crate::error::ProviderError;
use crate::identity::{AccessToken, AuthenticationResult, Claims, Identity, ScopeSet};
use crate::provider::{AuthRequest, IdentityProvider, LogoutRequest};
use crate::store::{PendingRedirect, SessionCache, SessionStore};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use oauth2::{CsrfToken, PkceCodeChallenge};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Tokens expiring within this margin are renewed instead of served from cache.
const EXPIRY_MARGIN_MINUTES: i64 = 5;
const OFFLINE_ACCESS: &str = "offline_access";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Prompt {
    SelectAccount,
    None,
}

/// Held for the duration of an interactive flow.
struct InteractionLock<'a>(&'a AtomicBool);

impl<'a> InteractionLock<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ProviderError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| ProviderError::InteractionInProgress)
    }
}

impl Drop for InteractionLock<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct OidcClient {
    settings: IdentitySettings,
    http: reqwest::Client,
    store: SessionStore,
    cache: Mutex<SessionCache>,
    browser: Arc<dyn BrowserLauncher>,
    interaction: AtomicBool,
    redirect_response: Mutex<Option<Url>>,
}

impl OidcClient {
    pub fn new(settings: IdentitySettings, store: SessionStore) -> Self {
        Self::with_browser(settings, store, Arc::new(SystemBrowser))
    }

    pub fn with_browser(
        settings: IdentitySettings,
        store: SessionStore,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
            store,
            cache: Mutex::new(SessionCache::default()),
            browser,
            interaction: AtomicBool::new(false),
            redirect_response: Mutex::new(None),
        }
    }

    /// Record the URL the browser was sent back to after a redirect sign-in.
    /// It is consumed by the next [`IdentityProvider::handle_redirect_response`].
    pub fn deliver_redirect_response(&self, url: Url) {
        *self.redirect_response.lock() = Some(url);
    }

    pub fn has_pending_redirect(&self) -> bool {
        self.cache.lock().pending_redirect.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        let base = self.settings.authority.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/oauth2/v2.0/{path}"))
            .map_err(|err| ProviderError::Configuration(format!("invalid authority: {err}")))
    }

    fn authorize_url(
        &self,
        scopes: &ScopeSet,
        redirect_uri: &Url,
        state: &str,
        challenge: &str,
        prompt: Prompt,
        login_hint: Option<&str>,
    ) -> Result<Url, ProviderError> {
        let mut url = self.endpoint("authorize")?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("client_id", &self.settings.client_id);
            params.append_pair("response_type", "code");
            params.append_pair("redirect_uri", redirect_uri.as_str());
            params.append_pair("response_mode", "query");
            params.append_pair("scope", &scopes.with(OFFLINE_ACCESS).to_scope_string());
            params.append_pair("state", state);
            params.append_pair("code_challenge", challenge);
            params.append_pair("code_challenge_method", "S256");
            if let Prompt::SelectAccount = prompt {
                params.append_pair("prompt", "select_account");
            }
            if let Some(hint) = login_hint {
                params.append_pair("login_hint", hint);
            }
        }
        Ok(url)
    }

    fn end_session_url(&self, request: &LogoutRequest) -> Result<Url, ProviderError> {
        let mut url = self.endpoint("logout")?;
        {
            let mut params = url.query_pairs_mut();
            if let Some(redirect) = &request.post_logout_redirect_uri {
                params.append_pair("post_logout_redirect_uri", redirect.as_str());
            }
            if let Some(account) = &request.account {
                if !account.username.is_empty() {
                    params.append_pair("logout_hint", &account.username);
                }
            }
        }
        Ok(url)
    }

    fn persist(&self, cache: &SessionCache) {
        if let Err(err) = self.store.save(cache) {
            warn!(%err, "failed to persist session cache");
        }
    }

    async fn interactive(
        &self,
        request: &AuthRequest,
        prompt: Prompt,
    ) -> Result<AuthenticationResult, ProviderError> {
        let _lock = InteractionLock::acquire(&self.interaction)?;
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let state = CsrfToken::new_random();

        let listener = CallbackListener::bind(&self.settings.redirect_uri).await?;
        let redirect_uri = listener.redirect_uri().clone();
        let login_hint = request
            .account
            .as_ref()
            .map(|account| account.username.as_str())
            .filter(|hint| !hint.is_empty());
        let url = self.authorize_url(
            &request.scopes,
            &redirect_uri,
            state.secret(),
            challenge.as_str(),
            prompt,
            login_hint,
        )?;

        info!(scopes = %request.scopes, "opening browser for interactive authentication");
        self.browser
            .open(&url)
            .map_err(ProviderError::PopupWindowError)?;

        let response = listener.wait(self.settings.callback_window).await?;
        let code = response.into_code(state.secret())?;
        self.redeem_code(
            &code,
            verifier.secret(),
            &redirect_uri,
            &request.scopes,
            request.account.as_ref(),
        )
        .await
    }

    async fn redeem_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &Url,
        scopes: &ScopeSet,
        known_account: Option<&Identity>,
    ) -> Result<AuthenticationResult, ProviderError> {
        let scope = scopes.with(OFFLINE_ACCESS).to_scope_string();
        let form = [
            ("client_id", self.settings.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("code_verifier", verifier),
            ("scope", scope.as_str()),
        ];
        // Token-only requests carry no `openid`, so the response may lack an ID token.
        let response = self.post_token(&form).await?;
        self.accept_token_response(response, scopes, known_account)
    }

    async fn refresh(
        &self,
        account: &Identity,
        refresh_token: &str,
        scopes: &ScopeSet,
    ) -> Result<AuthenticationResult, ProviderError> {
        let scope = scopes.with(OFFLINE_ACCESS).to_scope_string();
        let form = [
            ("client_id", self.settings.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];
        debug!(account = %account.home_account_id, scopes = %scopes, "refreshing access token");
        let response = self.post_token(&form).await?;
        self.accept_token_response(response, scopes, Some(account))
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, ProviderError> {
        let url = self.endpoint("token")?;
        let response = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;
        if !status.is_success() {
            return Err(match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(error) => {
                    ProviderError::from_oauth(&error.error, error.error_description.as_deref())
                }
                Err(_) => ProviderError::Server {
                    code: status.as_u16().to_string(),
                    description: body,
                },
            });
        }
        serde_json::from_str(&body).map_err(|err| ProviderError::Server {
            code: "invalid_token_response".into(),
            description: err.to_string(),
        })
    }

    fn accept_token_response(
        &self,
        response: TokenResponse,
        requested: &ScopeSet,
        known_account: Option<&Identity>,
    ) -> Result<AuthenticationResult, ProviderError> {
        let account = match response.id_token.as_deref() {
            Some(id_token) => Identity::from_claims(decode_id_token_claims(id_token)?)
                .ok_or_else(|| ProviderError::Server {
                    code: "invalid_id_token".into(),
                    description: "ID token carries neither oid/tid nor sub".into(),
                })?,
            None => known_account.cloned().ok_or_else(|| ProviderError::Server {
                code: "missing_id_token".into(),
                description: "token response did not include an ID token".into(),
            })?,
        };
        let granted = response
            .scope
            .as_deref()
            .map(ScopeSet::parse)
            .filter(|scopes| !scopes.is_empty())
            .unwrap_or_else(|| requested.clone());
        let expires_on = response
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        let access_token = AccessToken::new(response.access_token, granted, expires_on);

        let mut cache = self.cache.lock();
        cache.upsert_account(account.clone(), response.refresh_token);
        cache.store_token(&account.home_account_id, access_token.clone());
        if cache.active_account.is_none() {
            cache.active_account = Some(account.home_account_id.clone());
        }
        self.persist(&cache);
        drop(cache);

        Ok(AuthenticationResult {
            account,
            access_token,
        })
    }

    fn forget(&self, account: Option<&Identity>) {
        let mut cache = self.cache.lock();
        match account {
            Some(account) => cache.remove_account(&account.home_account_id),
            None => {
                cache.accounts.clear();
                cache.access_tokens.clear();
                cache.active_account = None;
            }
        }
        self.persist(&cache);
    }
}

#[async_trait]
impl IdentityProvider for OidcClient {
    async fn initialize(&self) -> Result<(), ProviderError> {
        let loaded = self
            .store
            .load()
            .map_err(|err| ProviderError::Storage(err.to_string()))?;
        debug!(accounts = loaded.accounts.len(), "session cache loaded");
        *self.cache.lock() = loaded;
        Ok(())
    }

    async fn handle_redirect_response(
        &self,
    ) -> Result<Option<AuthenticationResult>, ProviderError> {
        let Some(url) = self.redirect_response.lock().take() else {
            return Ok(None);
        };
        let Some(pending) = self.cache.lock().pending_redirect.take() else {
            warn!("redirect response received without a pending sign-in, ignoring");
            return Ok(None);
        };
        self.persist(&self.cache.lock());

        let code = AuthorizationResponse::from_url(&url).into_code(&pending.state)?;
        let result = self
            .redeem_code(
                &code,
                &pending.verifier,
                &pending.redirect_uri,
                &pending.scopes,
                None,
            )
            .await?;
        info!(account = %result.account.home_account_id, "redirect sign-in completed");
        Ok(Some(result))
    }

    fn all_accounts(&self) -> Vec<Identity> {
        self.cache
            .lock()
            .accounts
            .iter()
            .map(|entry| entry.identity.clone())
            .collect()
    }

    fn set_active_account(&self, account: Option<&Identity>) {
        let mut cache = self.cache.lock();
        cache.active_account = account.map(|account| account.home_account_id.clone());
        self.persist(&cache);
    }

    async fn login_popup(&self, request: &AuthRequest) -> Result<AuthenticationResult, ProviderError> {
        self.interactive(request, Prompt::SelectAccount).await
    }

    async fn login_redirect(&self, request: &AuthRequest) -> Result<(), ProviderError> {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let state = CsrfToken::new_random();
        let redirect_uri = self.settings.redirect_uri.clone();
        let url = self.authorize_url(
            &request.scopes,
            &redirect_uri,
            state.secret(),
            challenge.as_str(),
            Prompt::SelectAccount,
            None,
        )?;

        {
            let mut cache = self.cache.lock();
            cache.pending_redirect = Some(PendingRedirect {
                state: state.secret().clone(),
                verifier: verifier.secret().clone(),
                scopes: request.scopes.clone(),
                redirect_uri,
                started_at: Utc::now(),
            });
            self.persist(&cache);
        }

        info!("handing sign-in over to the browser");
        self.browser
            .open(&url)
            .map_err(ProviderError::PopupWindowError)
    }

    async fn logout_popup(&self, request: &LogoutRequest) -> Result<(), ProviderError> {
        let _lock = InteractionLock::acquire(&self.interaction)?;
        let url = self.end_session_url(request)?;
        self.forget(request.account.as_ref());
        self.browser
            .open(&url)
            .map_err(ProviderError::PopupWindowError)
    }

    async fn logout_redirect(&self, request: &LogoutRequest) -> Result<(), ProviderError> {
        let url = self.end_session_url(request)?;
        self.forget(request.account.as_ref());
        info!("handing sign-out over to the browser");
        self.browser
            .open(&url)
            .map_err(ProviderError::PopupWindowError)
    }

    async fn acquire_token_silent(
        &self,
        request: &AuthRequest,
    ) -> Result<AuthenticationResult, ProviderError> {
        let (account, refresh_token, cached) = {
            let cache = self.cache.lock();
            let entry = match &request.account {
                Some(account) => cache.account(&account.home_account_id),
                None => cache.active(),
            }
            .ok_or(ProviderError::NoAccount)?;
            let cached = cache
                .token_for(
                    &entry.identity.home_account_id,
                    &request.scopes,
                    Utc::now(),
                    chrono::Duration::minutes(EXPIRY_MARGIN_MINUTES),
                )
                .cloned();
            (entry.identity.clone(), entry.refresh_token.clone(), cached)
        };

        if let Some(access_token) = cached {
            debug!(scopes = %request.scopes, "serving access token from cache");
            return Ok(AuthenticationResult {
                account,
                access_token,
            });
        }
        let refresh_token = refresh_token.ok_or_else(|| {
            ProviderError::InteractionRequired("no refresh token cached for account".into())
        })?;
        self.refresh(&account, &refresh_token, &request.scopes).await
    }

    async fn acquire_token_popup(
        &self,
        request: &AuthRequest,
    ) -> Result<AuthenticationResult, ProviderError> {
        self.interactive(request, Prompt::None).await
    }
}

/// Decode the payload segment of a JWT without verifying its signature.
///
/// Only used for ID tokens received directly from the token endpoint over TLS.
pub fn decode_id_token_claims(id_token: &str) -> Result<Claims, ProviderError> {
    let invalid = |detail: String| ProviderError::Server {
        code: "invalid_id_token".into(),
        description: detail,
    };
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| invalid("ID token is not a JWT".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|err| invalid(err.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|err| invalid(err.to_string()))
}

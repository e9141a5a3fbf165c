use crate::error::{BlockedAction, ProviderError, SessionError};
use crate::graph::GraphClient;
use crate::identity::{AccessToken, Identity, ScopeSet};
use crate::provider::{AuthRequest, IdentityProvider, LogoutRequest};
use crate::sink::{PresentationSink, RedirectFlow, ViewEvent};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    SignedOut,
    SigningIn,
    SignedIn,
}

/// Where the client is running. Anything other than a top-level window cannot
/// host a popup, so sign-out goes straight to the redirect flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionContext {
    #[default]
    TopLevel,
    Popup,
    Embedded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignInOutcome {
    /// Interactive sign-in completed in-process.
    SignedIn(Identity),
    /// An account was already cached and was taken over without interaction.
    Adopted(Identity),
    /// Another interactive sign-in is still running.
    Ignored,
    /// The browser now owns the flow; finish it with a fresh coordinator.
    Redirecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutOutcome {
    SignedOut,
    Redirecting,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub context: ExecutionContext,
    pub login_scopes: ScopeSet,
    pub token_scopes: ScopeSet,
    pub photo_scopes: ScopeSet,
    pub post_logout_redirect_uri: Option<Url>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            context: ExecutionContext::TopLevel,
            login_scopes: ScopeSet::login(),
            token_scopes: ScopeSet::graph(),
            photo_scopes: ScopeSet::photo(),
            post_logout_redirect_uri: None,
        }
    }
}

#[derive(Default)]
struct Session {
    identity: Option<Identity>,
    token: Option<AccessToken>,
}

/// Set while an interactive sign-in is outstanding.
///
/// Dropping the guard clears the flag. [`InteractionGuard::hand_off`] leaves it
/// set for the remainder of this coordinator's life.
struct InteractionGuard {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl InteractionGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: flag.clone(),
                armed: true,
            })
    }

    fn hand_off(mut self) {
        self.armed = false;
    }
}

impl Drop for InteractionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(false, Ordering::Release);
        }
    }
}

/// Owns the signed-in identity, the last access token and the interaction flag,
/// and sequences the identity provider's popup, redirect and silent flows.
#[derive(Clone)]
pub struct SessionCoordinator {
    provider: Arc<dyn IdentityProvider>,
    graph: GraphClient,
    sink: Arc<dyn PresentationSink>,
    options: Arc<SessionOptions>,
    session: Arc<Mutex<Session>>,
    interaction: Arc<AtomicBool>,
}

impl SessionCoordinator {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        graph: GraphClient,
        sink: Arc<dyn PresentationSink>,
        options: SessionOptions,
    ) -> Self {
        Self {
            provider,
            graph,
            sink,
            options: Arc::new(options),
            session: Arc::new(Mutex::new(Session::default())),
            interaction: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn state(&self) -> SessionState {
        if self.interaction_in_progress() {
            SessionState::SigningIn
        } else if self.session.lock().identity.is_some() {
            SessionState::SignedIn
        } else {
            SessionState::SignedOut
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.lock().identity.clone()
    }

    /// The most recently acquired token, whatever scopes it was requested for.
    pub fn access_token(&self) -> Option<AccessToken> {
        self.session.lock().token.clone()
    }

    pub fn interaction_in_progress(&self) -> bool {
        self.interaction.load(Ordering::Acquire)
    }

    /// Load persisted session state and pick up where a previous run left off:
    /// a completed redirect sign-in first, otherwise the first cached account.
    pub async fn initialize(&self) -> Result<Option<Identity>, SessionError> {
        let resolved = match self.provider.initialize().await {
            Ok(()) => self.provider.handle_redirect_response().await,
            Err(err) => Err(err),
        };
        match resolved {
            Ok(Some(result)) => {
                info!(account = %result.account.home_account_id, "redirect sign-in resolved");
                let identity = result.account;
                self.complete_sign_in(identity.clone());
                self.load_profile().await;
                Ok(Some(identity))
            }
            Ok(None) => match self.provider.all_accounts().into_iter().next() {
                Some(account) => {
                    debug!(account = %account.home_account_id, "restoring cached account");
                    self.adopt(account.clone(), true).await;
                    Ok(Some(account))
                }
                None => Ok(None),
            },
            Err(err) => Err(self.report(SessionError::Initialization(err))),
        }
    }

    pub async fn sign_in(&self) -> Result<SignInOutcome, SessionError> {
        let Some(guard) = InteractionGuard::try_acquire(&self.interaction) else {
            info!("authentication already in progress, ignoring sign-in request");
            return Ok(SignInOutcome::Ignored);
        };

        if let Some(account) = self.provider.all_accounts().into_iter().next() {
            drop(guard);
            info!(account = %account.home_account_id, "account already signed in");
            self.adopt(account.clone(), false).await;
            return Ok(SignInOutcome::Adopted(account));
        }

        self.sink.notify(ViewEvent::ClearError);
        let request = AuthRequest::new(self.options.login_scopes.clone());
        match self.provider.login_popup(&request).await {
            Ok(result) => {
                let identity = result.account;
                self.complete_sign_in(identity.clone());
                drop(guard);
                self.load_profile().await;
                Ok(SignInOutcome::SignedIn(identity))
            }
            Err(popup_err @ (ProviderError::PopupWindowError(_) | ProviderError::PopupCanceled)) => {
                warn!(err = %popup_err, "popup sign-in failed, falling back to redirect");
                match self.provider.login_redirect(&request).await {
                    Ok(()) => {
                        guard.hand_off();
                        self.sink.notify(ViewEvent::Redirecting {
                            flow: RedirectFlow::SignIn,
                        });
                        Ok(SignInOutcome::Redirecting)
                    }
                    Err(err) => Err(self.report(SessionError::PopupBlocked(err))),
                }
            }
            Err(ProviderError::InteractionInProgress) => {
                Err(self.report(SessionError::InteractionAlreadyActive {
                    blocked: BlockedAction::SignIn,
                }))
            }
            Err(err) => Err(self.report(SessionError::SignInFailed(err))),
        }
    }

    pub async fn sign_out(&self) -> Result<SignOutOutcome, SessionError> {
        if self.interaction_in_progress() {
            info!("authentication in progress, refusing to sign out");
            return Err(self.report(SessionError::InteractionAlreadyActive {
                blocked: BlockedAction::SignOut,
            }));
        }

        self.sink.notify(ViewEvent::ClearError);
        let request = LogoutRequest {
            account: self.identity(),
            post_logout_redirect_uri: self.options.post_logout_redirect_uri.clone(),
        };

        let outcome = match self.options.context {
            ExecutionContext::Popup | ExecutionContext::Embedded => {
                self.logout_redirect(&request).await
            }
            ExecutionContext::TopLevel => match self.provider.logout_popup(&request).await {
                Ok(()) => {
                    *self.session.lock() = Session::default();
                    self.interaction.store(false, Ordering::Release);
                    self.sink.notify(ViewEvent::SignedOut);
                    info!("signed out");
                    return Ok(SignOutOutcome::SignedOut);
                }
                Err(err) => {
                    warn!(%err, "popup logout failed, falling back to redirect");
                    self.logout_redirect(&request).await
                }
            },
        };
        outcome.map_err(|err| self.report(SessionError::SignOutFailed(err)))
    }

    async fn logout_redirect(
        &self,
        request: &LogoutRequest,
    ) -> Result<SignOutOutcome, ProviderError> {
        self.provider.logout_redirect(request).await?;
        self.sink.notify(ViewEvent::Redirecting {
            flow: RedirectFlow::SignOut,
        });
        Ok(SignOutOutcome::Redirecting)
    }

    /// Silent acquisition for the current account, falling back to a popup.
    pub async fn acquire_token(&self, scopes: &ScopeSet) -> Result<AccessToken, SessionError> {
        self.sink.notify(ViewEvent::ClearError);
        let request = AuthRequest::for_account(scopes.clone(), self.identity());
        let acquired = match self.provider.acquire_token_silent(&request).await {
            Ok(result) => Ok(result),
            Err(silent_err) => {
                warn!(
                    err = %silent_err,
                    %scopes,
                    "silent token acquisition failed, falling back to popup"
                );
                self.provider.acquire_token_popup(&request).await
            }
        };
        match acquired {
            Ok(result) => {
                let token = result.access_token;
                // Keyed by what was asked for, not what the server granted.
                let cached = AccessToken::new(token.secret(), scopes.clone(), token.expires_on());
                self.session.lock().token = Some(cached.clone());
                self.sink.notify(ViewEvent::Token {
                    token: token.secret().to_string(),
                });
                Ok(cached)
            }
            Err(err) => Err(self.report(SessionError::TokenAcquisitionFailed(err))),
        }
    }

    /// The cached token, only if it was requested for exactly `scopes`.
    pub fn cached_token(&self, scopes: &ScopeSet) -> Option<AccessToken> {
        self.session
            .lock()
            .token
            .as_ref()
            .filter(|token| token.scopes() == scopes)
            .cloned()
    }

    /// `GET /me` with the Graph token, acquiring one first if none is cached.
    pub async fn call_graph(&self) -> Result<Value, SessionError> {
        self.sink.notify(ViewEvent::ClearError);
        let scopes = self.options.token_scopes.clone();
        let token = match self.cached_token(&scopes) {
            Some(token) => token,
            None => self.acquire_token(&scopes).await?,
        };
        match self.graph.me(token.secret()).await {
            Ok(body) => {
                let rendered =
                    serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
                self.sink.notify(ViewEvent::ApiResponse { body: rendered });
                Ok(body)
            }
            Err(err) => Err(self.report(SessionError::DownstreamApi(err))),
        }
    }

    /// Push the identity's profile to the sink, then try for the photo.
    /// A missing or unreachable photo is not an error.
    pub async fn load_profile(&self) {
        let Some(identity) = self.identity() else {
            return;
        };
        self.sink.notify(ViewEvent::Profile {
            name: identity.display_name().to_string(),
            email: identity.email().to_string(),
            organization: identity.organization(),
        });

        let request = AuthRequest::for_account(self.options.photo_scopes.clone(), Some(identity));
        let token = match self.provider.acquire_token_silent(&request).await {
            Ok(result) => result.access_token,
            Err(err) => {
                info!(%err, "could not load user photo");
                return;
            }
        };
        match self.graph.photo(token.secret()).await {
            Ok(Some(photo)) => self.sink.notify(ViewEvent::Photo {
                content_type: photo.content_type,
                bytes: photo.bytes,
            }),
            Ok(None) => debug!("user has no photo"),
            Err(err) => info!(%err, "could not load user photo"),
        }
    }

    fn complete_sign_in(&self, identity: Identity) {
        self.provider.set_active_account(Some(&identity));
        {
            let mut session = self.session.lock();
            session.identity = Some(identity.clone());
            session.token = None;
        }
        info!(account = %identity.home_account_id, "signed in");
        self.sink.notify(ViewEvent::SignedIn {
            identity,
            fresh: true,
        });
    }

    async fn adopt(&self, identity: Identity, fresh: bool) {
        {
            let mut session = self.session.lock();
            let switched = session
                .identity
                .as_ref()
                .is_some_and(|current| current.home_account_id != identity.home_account_id);
            if switched {
                session.token = None;
            }
            session.identity = Some(identity.clone());
        }
        self.sink.notify(ViewEvent::SignedIn { identity, fresh });
        self.load_profile().await;
    }

    fn report(&self, err: SessionError) -> SessionError {
        error!(%err, "session operation failed");
        self.sink.notify(ViewEvent::Error {
            message: err.to_string(),
        });
        err
    }
}

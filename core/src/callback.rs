//! Loopback listener that receives the authorization server's redirect.
//!
//! The interactive flows open the system browser at the authorize endpoint and
//! wait here for the browser to come back to `redirect_uri` with either a code
//! or an error.

use crate::error::ProviderError;
use axum::extract::Query;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

const COMPLETED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Signet</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
<h2>Sign-in complete</h2>
<p>You can close this tab and return to Signet.</p>
</body>
</html>"#;

/// Query parameters the authorization server appends to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl AuthorizationResponse {
    pub fn from_url(url: &Url) -> Self {
        Self::from_pairs(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())))
    }

    fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut response = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "code" => response.code = Some(value),
                "state" => response.state = Some(value),
                "error" => response.error = Some(value),
                "error_description" => response.error_description = Some(value),
                _ => {}
            }
        }
        response
    }

    /// Check the state and turn the response into an authorization code.
    pub fn into_code(self, expected_state: &str) -> Result<String, ProviderError> {
        if let Some(error) = self.error {
            return Err(ProviderError::from_oauth(
                &error,
                self.error_description.as_deref(),
            ));
        }
        if self.state.as_deref() != Some(expected_state) {
            return Err(ProviderError::StateMismatch);
        }
        self.code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| ProviderError::Server {
                code: "missing_code".into(),
                description: "authorization response did not contain a code".into(),
            })
    }
}

/// Opens URLs for the user. Swapped out in tests for a scripted browser.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &Url) -> Result<(), String>;
}

pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &Url) -> Result<(), String> {
        open::that(url.as_str()).map_err(|err| err.to_string())
    }
}

/// A bound loopback server waiting for exactly one redirect.
pub struct CallbackListener {
    redirect_uri: Url,
    local_addr: SocketAddr,
    rx: oneshot::Receiver<AuthorizationResponse>,
    shutdown: Option<oneshot::Sender<()>>,
    _server: JoinHandle<()>,
}

impl CallbackListener {
    /// Bind to the host and port of `redirect_uri`. Port `0` picks a free port and
    /// the effective redirect URI reflects it.
    pub async fn bind(redirect_uri: &Url) -> Result<Self, ProviderError> {
        let host = match redirect_uri.host_str() {
            Some("localhost") | None => "127.0.0.1",
            Some(host) => host,
        };
        let port = redirect_uri.port_or_known_default().unwrap_or(0);
        let listener = TcpListener::bind((host, port)).await.map_err(|err| {
            ProviderError::Configuration(format!(
                "failed to bind callback listener on {host}:{port}: {err}"
            ))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| ProviderError::Configuration(err.to_string()))?;

        let mut effective = redirect_uri.clone();
        if port == 0 {
            effective
                .set_port(Some(local_addr.port()))
                .map_err(|_| ProviderError::Configuration("redirect URI cannot carry a port".into()))?;
        }

        let (tx, rx) = oneshot::channel();
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let router = callback_router(effective.path(), tx);
        let server = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = serve.await {
                debug!(%err, "callback listener stopped");
            }
        });
        debug!(addr = %local_addr, "callback listener bound");

        Ok(Self {
            redirect_uri: effective,
            local_addr,
            rx,
            shutdown: Some(shutdown),
            _server: server,
        })
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the redirect. Running out of `window` is treated as the user
    /// abandoning the browser window.
    pub async fn wait(mut self, window: Duration) -> Result<AuthorizationResponse, ProviderError> {
        match tokio::time::timeout(window, &mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ProviderError::PopupCanceled),
            Err(_) => {
                debug!(window_secs = window.as_secs(), "no authorization response received");
                Err(ProviderError::PopupCanceled)
            }
        }
    }
}

impl Drop for CallbackListener {
    // In-flight responses are allowed to finish so the browser still gets the page.
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn callback_router(path: &str, tx: oneshot::Sender<AuthorizationResponse>) -> Router {
    let tx = Arc::new(Mutex::new(Some(tx)));
    Router::new().route(
        path,
        get(move |Query(query): Query<HashMap<String, String>>| {
            let tx = tx.clone();
            async move {
                if let Some(sender) = tx.lock().await.take() {
                    let _ = sender.send(AuthorizationResponse::from_pairs(query));
                }
                Html(COMPLETED_PAGE)
            }
        }),
    )
}

use signet_core::auth::{ExecutionContext, SessionCoordinator, SessionOptions};
use signet_core::config::SignetSettings;
use signet_core::graph::GraphClient;
use signet_core::oidc::OidcClient;
use signet_core::sink::PresentationSink;
use signet_core::store::SessionStore;
use std::sync::Arc;
use url::Url;

/// Builds a coordinator as if the application had just started.
///
/// `redirect` is the address the browser landed on after a redirect sign-in;
/// the new coordinator finishes that sign-in during `initialize()`.
pub trait SessionFactory: Send + Sync {
    fn build(&self, sink: Arc<dyn PresentationSink>, redirect: Option<Url>) -> SessionCoordinator;
}

impl<F> SessionFactory for F
where
    F: Fn(Arc<dyn PresentationSink>, Option<Url>) -> SessionCoordinator + Send + Sync,
{
    fn build(&self, sink: Arc<dyn PresentationSink>, redirect: Option<Url>) -> SessionCoordinator {
        self(sink, redirect)
    }
}

/// Coordinators backed by the Microsoft identity platform and Graph.
pub struct OidcSessionFactory {
    settings: SignetSettings,
    context: ExecutionContext,
}

impl OidcSessionFactory {
    pub fn new(settings: SignetSettings, context: ExecutionContext) -> Self {
        Self { settings, context }
    }
}

impl SessionFactory for OidcSessionFactory {
    fn build(&self, sink: Arc<dyn PresentationSink>, redirect: Option<Url>) -> SessionCoordinator {
        let store = SessionStore::new(self.settings.session_dir.clone());
        let client = OidcClient::new(self.settings.identity.clone(), store);
        if let Some(url) = redirect {
            client.deliver_redirect_response(url);
        }
        let options = SessionOptions {
            context: self.context,
            post_logout_redirect_uri: Some(self.settings.identity.redirect_uri.clone()),
            ..SessionOptions::default()
        };
        SessionCoordinator::new(
            Arc::new(client),
            GraphClient::new(self.settings.graph_base_url.clone()),
            sink,
            options,
        )
    }
}

//! Shared fixtures for the Signet integration tests.

use signet_core::auth::{ExecutionContext, SessionCoordinator, SessionOptions};
use signet_core::graph::GraphClient;
use signet_core::identity::Identity;
use signet_core::testing::{self, RecordingSink, ScriptedProvider};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use url::Url;
use wiremock::MockServer;

pub fn test_runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

pub fn jane() -> Identity {
    testing::identity("Jane Doe", "jane@contoso.com")
}

/// A coordinator wired to a scripted provider, a recording sink and a Graph
/// mock server. Graph requests nobody mounted a mock for answer 404.
pub struct Harness {
    pub coordinator: SessionCoordinator,
    pub provider: Arc<ScriptedProvider>,
    pub sink: Arc<RecordingSink>,
    pub graph: MockServer,
}

impl Harness {
    pub async fn start(provider: ScriptedProvider) -> Self {
        Self::with_context(provider, ExecutionContext::TopLevel).await
    }

    pub async fn with_context(provider: ScriptedProvider, context: ExecutionContext) -> Self {
        let graph = MockServer::start().await;
        let provider = Arc::new(provider);
        let sink = Arc::new(RecordingSink::default());
        let options = SessionOptions {
            context,
            post_logout_redirect_uri: Url::parse("http://localhost:8400/").ok(),
            ..SessionOptions::default()
        };
        let coordinator = SessionCoordinator::new(
            provider.clone(),
            graph_client(&graph),
            sink.clone(),
            options,
        );
        Self {
            coordinator,
            provider,
            sink,
            graph,
        }
    }
}

pub fn graph_client(server: &MockServer) -> GraphClient {
    GraphClient::new(Url::parse(&format!("{}/v1.0", server.uri())).expect("graph url"))
}

/// Poll `condition` until it holds, yielding to other tasks in between.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Run `future` on a fresh single-threaded runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    test_runtime().block_on(future)
}

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use signet_core::auth::{SessionCoordinator, SessionOptions, SessionState};
use signet_core::chat::ChatSession;
use signet_core::graph::{GraphClient, DEFAULT_GRAPH_BASE};
use signet_core::identity::ScopeSet;
use signet_core::llm::LlmDriver;
use signet_core::testing::{self, RecordingSink, ScriptedProvider};
use signet_core::telemetry;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Signet")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive a scripted sign-in, token request and chat exchange through the core.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    let account = testing::identity("Smoke Tester", "smoke@signet.test");
    // Silent acquisition always fails, so the profile photo is never fetched.
    let provider = Arc::new(
        ScriptedProvider::new()
            .on_login_popup(Ok(testing::auth_result(
                &account,
                "smoke-login",
                ScopeSet::login(),
            )))
            .on_token_popup(Ok(testing::auth_result(
                &account,
                "smoke-graph",
                ScopeSet::graph(),
            ))),
    );
    let sink = Arc::new(RecordingSink::default());
    let coordinator = SessionCoordinator::new(
        provider.clone(),
        GraphClient::new(Url::parse(DEFAULT_GRAPH_BASE)?),
        sink.clone(),
        SessionOptions::default(),
    );
    let chat = ChatSession::new(LlmDriver::fake(), sink.clone());

    runtime.block_on(async {
        coordinator.initialize().await?;
        coordinator.sign_in().await?;
        let scopes = coordinator.options().token_scopes.clone();
        coordinator.acquire_token(&scopes).await?;
        chat.open(coordinator.identity().as_ref().map(|who| who.display_name()))?;
        chat.send("ping from xtask").await?;
        anyhow::Ok(())
    })?;

    if coordinator.state() != SessionState::SignedIn {
        bail!("expected a signed-in session, got {:?}", coordinator.state());
    }
    if !sink.errors().is_empty() {
        bail!("smoke run reported errors: {:?}", sink.errors());
    }
    info!(
        "events" = sink.events().len(),
        "provider_calls" = provider.calls().len(),
        "transcript" = chat.transcript().len(),
        "smoke test session completed"
    );

    Ok(())
}

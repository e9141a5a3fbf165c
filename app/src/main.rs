use anyhow::Context;
use clap::{Parser, Subcommand};
use eframe::egui;
use signet::{OidcSessionFactory, SessionFactory, SignetEguiApp};
use signet_core::auth::ExecutionContext;
use signet_core::config::SignetSettings;
use signet_core::llm::LlmDriver;
use signet_core::sink::{self, ViewEvent};
use signet_core::telemetry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "Signet", version, about = "Microsoft 365 sign-in, Graph and chat client")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    /// Path to signet.yaml; the standard locations are searched otherwise.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Running inside another window: sign-out always uses the browser redirect.
    #[arg(long)]
    embedded: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Restore the cached session without opening a window and print who is signed in.
    Whoami,
}

fn main() -> anyhow::Result<()> {
    telemetry::init_from_env("signet=info,signet_core=info")?;

    let cli = Cli::parse();
    let settings =
        SignetSettings::load(cli.config.as_deref()).context("failed to load Signet configuration")?;
    let context = if cli.embedded {
        ExecutionContext::Embedded
    } else {
        ExecutionContext::TopLevel
    };
    let runtime = Arc::new(Runtime::new()?);
    let llm = LlmDriver::from_settings(&settings.ai);
    let factory: Arc<dyn SessionFactory> = Arc::new(OidcSessionFactory::new(settings, context));

    if let Some(Command::Whoami) = cli.command {
        return whoami(&runtime, factory.as_ref());
    }

    let viewport = egui::ViewportBuilder::default()
        .with_inner_size(egui::vec2(720.0, 820.0))
        .with_min_inner_size(egui::vec2(480.0, 560.0));
    let native_options = eframe::NativeOptions {
        viewport,
        follow_system_theme: true,
        ..Default::default()
    };

    eframe::run_native(
        "Signet",
        native_options,
        Box::new(move |_cc| Box::new(SignetEguiApp::new(factory, llm, runtime))),
    )
    .map_err(|err| anyhow::anyhow!(err.to_string()))?;

    Ok(())
}

fn whoami(runtime: &Runtime, factory: &dyn SessionFactory) -> anyhow::Result<()> {
    let (sink, mut events) = sink::channel();
    let coordinator = factory.build(sink, None);
    let identity = runtime.block_on(coordinator.initialize());
    while let Ok(event) = events.try_recv() {
        if let ViewEvent::Profile {
            name,
            email,
            organization,
        } = event
        {
            println!("{name} <{email}> ({organization})");
        }
    }
    match identity? {
        Some(_) => Ok(()),
        None => {
            println!("Not signed in.");
            Ok(())
        }
    }
}

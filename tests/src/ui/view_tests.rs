use egui::RawInput;
use parking_lot::Mutex;
use signet::ui::UiActions;
use signet::{render_ui, SessionFactory, SignetEguiApp, ViewModel};
use signet_core::auth::{ExecutionContext, SessionCoordinator, SessionOptions};
use signet_core::chat::{ChatMessage, MessageRole};
use signet_core::error::ProviderError;
use signet_core::graph::GraphClient;
use signet_core::llm::LlmDriver;
use signet_core::sink::{PresentationSink, RedirectFlow, ViewEvent};
use signet_core::testing::{ProviderCall, ScriptedProvider};
use signet_tests::jane;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use url::Url;

fn background_runtime() -> Arc<Runtime> {
    Arc::new(
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime"),
    )
}

/// Builds coordinators over one scripted provider and remembers every
/// redirect address it was started with.
struct ScriptedFactory {
    provider: Arc<ScriptedProvider>,
    context: ExecutionContext,
    starts: Mutex<Vec<Option<Url>>>,
}

impl ScriptedFactory {
    fn new(provider: ScriptedProvider, context: ExecutionContext) -> Arc<Self> {
        Arc::new(Self {
            provider: Arc::new(provider),
            context,
            starts: Mutex::new(Vec::new()),
        })
    }

    fn starts(&self) -> Vec<Option<Url>> {
        self.starts.lock().clone()
    }
}

impl SessionFactory for ScriptedFactory {
    fn build(&self, sink: Arc<dyn PresentationSink>, redirect: Option<Url>) -> SessionCoordinator {
        self.starts.lock().push(redirect);
        let options = SessionOptions {
            context: self.context,
            ..SessionOptions::default()
        };
        // The scripted provider never grants a silent token, so Graph is not reached.
        let graph = GraphClient::new(Url::parse("http://127.0.0.1:9/v1.0").expect("graph url"));
        SessionCoordinator::new(self.provider.clone(), graph, sink, options)
    }
}

fn render_frame(ctx: &egui::Context, app: &mut SignetEguiApp) -> egui::FullOutput {
    ctx.run(RawInput::default(), |ctx| render_ui(ctx, app))
}

fn render_until(app: &mut SignetEguiApp, condition: impl Fn(&SignetEguiApp) -> bool) {
    let ctx = egui::Context::default();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        render_frame(&ctx, app);
        if condition(app) {
            return;
        }
        assert!(Instant::now() < deadline, "view never reached expected state");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn cached_account_is_shown_after_startup() {
    let factory = ScriptedFactory::new(
        ScriptedProvider::new().with_account(jane()),
        ExecutionContext::TopLevel,
    );
    let mut app = SignetEguiApp::new(factory.clone(), LlmDriver::fake(), background_runtime());

    render_until(&mut app, |app| app.view().profile.is_some());
    let view = app.view();
    assert!(view.signed_in());
    assert_eq!(view.display_name(), Some("Jane Doe"));
    assert_eq!(factory.starts(), vec![None]);
}

#[test]
fn pasted_redirect_address_restarts_the_session() {
    let factory = ScriptedFactory::new(ScriptedProvider::new(), ExecutionContext::TopLevel);
    let mut app = SignetEguiApp::new(factory.clone(), LlmDriver::fake(), background_runtime());

    app.handle(UiActions {
        complete_redirect: Some("http://localhost:8400/?code=abc&state=xyz".into()),
        ..UiActions::default()
    });
    let starts = factory.starts();
    assert_eq!(starts.len(), 2);
    assert_eq!(
        starts[1].as_ref().map(Url::as_str),
        Some("http://localhost:8400/?code=abc&state=xyz")
    );

    app.handle(UiActions {
        complete_redirect: Some("not a url".into()),
        ..UiActions::default()
    });
    assert_eq!(factory.starts().len(), 2);
    assert!(app
        .view()
        .error
        .as_deref()
        .is_some_and(|message| message.starts_with("Sign in failed: invalid redirect address")));
}

#[test]
fn cancelling_redirect_sign_in_frees_the_session() {
    let factory = ScriptedFactory::new(
        ScriptedProvider::new()
            .on_login_popup(Err(ProviderError::PopupWindowError("blocked".into()))),
        ExecutionContext::TopLevel,
    );
    let mut app = SignetEguiApp::new(factory.clone(), LlmDriver::fake(), background_runtime());

    app.handle(UiActions {
        sign_in: true,
        ..UiActions::default()
    });
    render_until(&mut app, |app| {
        app.view().redirecting == Some(RedirectFlow::SignIn)
    });
    assert!(app.coordinator().interaction_in_progress());

    app.handle(UiActions {
        cancel_redirect: true,
        ..UiActions::default()
    });
    assert_eq!(factory.starts(), vec![None, None]);
    assert!(app.view().redirecting.is_none());
    assert!(!app.coordinator().interaction_in_progress());

    app.handle(UiActions {
        sign_in: true,
        ..UiActions::default()
    });
    render_until(&mut app, |_| {
        factory.provider.count(|call| *call == ProviderCall::LoginPopup) == 2
    });
}

#[test]
fn browser_sign_out_restarts_the_session() {
    let factory = ScriptedFactory::new(
        ScriptedProvider::new().with_account(jane()),
        ExecutionContext::Embedded,
    );
    let mut app = SignetEguiApp::new(factory.clone(), LlmDriver::fake(), background_runtime());
    render_until(&mut app, |app| app.view().signed_in());

    app.handle(UiActions {
        sign_out: true,
        ..UiActions::default()
    });
    render_until(&mut app, |_| factory.starts().len() == 2);
    assert_eq!(factory.starts(), vec![None, None]);
}

#[test]
fn chat_round_trip_renders() {
    let factory = ScriptedFactory::new(ScriptedProvider::new(), ExecutionContext::TopLevel);
    let mut app = SignetEguiApp::new(factory, LlmDriver::fake(), background_runtime());

    app.handle(UiActions {
        open_chat: true,
        ..UiActions::default()
    });
    app.handle(UiActions {
        send_chat: Some("draft a contract".into()),
        ..UiActions::default()
    });
    render_until(&mut app, |app| {
        app.view()
            .chat
            .iter()
            .any(|message| message.content.contains("received 'draft a contract'"))
    });

    let view = app.view();
    assert!(view.chat_open);
    assert_eq!(view.chat[0].role, MessageRole::Assistant);
    assert!(view.chat[0].content.contains("Hello there!"));
    assert_eq!(view.chat[1].role, MessageRole::User);

    let ctx = egui::Context::default();
    let output = render_frame(&ctx, &mut app);
    assert!(!output.shapes.is_empty());
}

#[test]
fn unconfigured_chat_shows_error_banner() {
    let factory = ScriptedFactory::new(ScriptedProvider::new(), ExecutionContext::TopLevel);
    let llm = LlmDriver::unconfigured("Please update signet.yaml or set OPENAI_API_KEY.".into());
    let mut app = SignetEguiApp::new(factory, llm, background_runtime());

    app.handle(UiActions {
        open_chat: true,
        ..UiActions::default()
    });
    render_until(&mut app, |app| app.view().error.is_some());
    assert!(!app.view().chat_open);
    assert_eq!(
        app.view().error.as_deref(),
        Some("OpenAI API key not configured. Please update signet.yaml or set OPENAI_API_KEY.")
    );
}

#[test]
fn view_model_tracks_welcome_and_sign_out() {
    let now = Instant::now();
    let mut view = ViewModel::default();
    view.apply(
        ViewEvent::SignedIn {
            identity: jane(),
            fresh: true,
        },
        now,
    );
    view.apply(
        ViewEvent::Token {
            token: "secret".into(),
        },
        now,
    );
    view.apply(
        ViewEvent::ChatMessage {
            message: ChatMessage::new(MessageRole::User, "hi"),
        },
        now,
    );
    view.apply(
        ViewEvent::Error {
            message: "Microsoft Graph call failed".into(),
        },
        now,
    );
    assert!(view.welcome_visible(now + Duration::from_secs(1)));
    assert!(!view.welcome_visible(now + Duration::from_secs(6)));

    view.apply(ViewEvent::SignedOut, now);
    assert!(!view.signed_in());
    assert!(view.token.is_none());
    assert!(!view.welcome_visible(now));
    assert_eq!(view.chat.len(), 1);
    assert!(view.error.is_some());

    view.apply(ViewEvent::ClearError, now);
    assert!(view.error.is_none());
}

#[test]
fn view_model_versions_photos_and_tracks_redirects() {
    let now = Instant::now();
    let mut view = ViewModel::default();
    for bytes in [vec![1u8], vec![2u8]] {
        view.apply(
            ViewEvent::Photo {
                content_type: "image/png".into(),
                bytes,
            },
            now,
        );
    }
    let photo = view.photo.as_ref().expect("photo");
    assert_eq!(photo.revision, 2);
    assert_eq!(photo.bytes, vec![2]);

    view.apply(
        ViewEvent::Redirecting {
            flow: RedirectFlow::SignIn,
        },
        now,
    );
    assert_eq!(view.redirecting, Some(RedirectFlow::SignIn));
    view.apply(
        ViewEvent::SignedIn {
            identity: jane(),
            fresh: false,
        },
        now,
    );
    assert!(view.redirecting.is_none());
    assert!(!view.welcome_visible(now));
}

use crate::session::SessionFactory;
use crate::ui::{
    ChatPanel, ErrorBanner, GraphPanel, InputState, ProfilePanel, SignInPanel, ThemePalette,
    TokenPanel, UiActions, WelcomeNotice,
};
use crate::view::ViewModel;
use egui::{self, RichText, ScrollArea};
use signet_core::auth::SessionCoordinator;
use signet_core::chat::ChatSession;
use signet_core::llm::LlmDriver;
use signet_core::sink::{self, RedirectFlow, ViewEvent};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};
use url::Url;

pub struct SignetEguiApp {
    runtime: Arc<Runtime>,
    factory: Arc<dyn SessionFactory>,
    llm: LlmDriver,
    coordinator: SessionCoordinator,
    chat: ChatSession,
    events: UnboundedReceiver<ViewEvent>,
    view: ViewModel,
    input: InputState,
    photo_texture: Option<egui::TextureHandle>,
    photo_revision: u64,
}

impl SignetEguiApp {
    pub fn new(factory: Arc<dyn SessionFactory>, llm: LlmDriver, runtime: Arc<Runtime>) -> Self {
        let (coordinator, chat, events) = start_session(factory.as_ref(), &llm, &runtime, None);
        Self {
            runtime,
            factory,
            llm,
            coordinator,
            chat,
            events,
            view: ViewModel::default(),
            input: InputState::default(),
            photo_texture: None,
            photo_revision: 0,
        }
    }

    pub fn view(&self) -> &ViewModel {
        &self.view
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    /// Drop the current session and start a new one, the way a page reload would.
    pub fn reload(&mut self, redirect: Option<Url>) {
        let (coordinator, chat, events) =
            start_session(self.factory.as_ref(), &self.llm, &self.runtime, redirect);
        self.coordinator = coordinator;
        self.chat = chat;
        self.events = events;
        self.view = ViewModel::default();
        self.photo_texture = None;
        self.photo_revision = 0;
    }

    /// Fold pending session events into the view.
    pub fn process_events(&mut self) {
        let now = Instant::now();
        let mut signed_out_in_browser = false;
        while let Ok(event) = self.events.try_recv() {
            if let ViewEvent::Redirecting {
                flow: RedirectFlow::SignOut,
            } = &event
            {
                signed_out_in_browser = true;
            }
            self.view.apply(event, now);
        }
        if signed_out_in_browser {
            info!("sign-out handed to the browser, restarting session");
            self.reload(None);
        }
    }

    pub fn handle(&mut self, actions: UiActions) {
        if actions.sign_in {
            self.spawn_session(|session| async move {
                let _ = session.sign_in().await;
            });
        }
        if actions.sign_out {
            self.spawn_session(|session| async move {
                let _ = session.sign_out().await;
            });
        }
        if actions.get_token {
            self.spawn_session(|session| async move {
                let scopes = session.options().token_scopes.clone();
                let _ = session.acquire_token(&scopes).await;
            });
        }
        if actions.call_graph {
            self.spawn_session(|session| async move {
                let _ = session.call_graph().await;
            });
        }
        if actions.open_chat {
            let _ = self.chat.open(self.view.display_name());
        }
        if actions.close_chat {
            self.view.close_chat();
        }
        if actions.clear_chat {
            self.chat.clear(self.view.display_name());
        }
        if let Some(text) = actions.send_chat {
            let chat = self.chat.clone();
            self.runtime.spawn(async move {
                let _ = chat.send(&text).await;
            });
        }
        if actions.cancel_redirect {
            info!("redirect sign-in abandoned, restarting session");
            self.reload(None);
        }
        if let Some(address) = actions.complete_redirect {
            match Url::parse(&address) {
                Ok(url) => self.reload(Some(url)),
                Err(err) => {
                    self.view.error = Some(format!("Sign in failed: invalid redirect address: {err}"))
                }
            }
        }
    }

    fn spawn_session<F, Fut>(&self, task: F)
    where
        F: FnOnce(SessionCoordinator) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task(self.coordinator.clone()));
    }

    fn refresh_photo(&mut self, ctx: &egui::Context) {
        let Some(photo) = &self.view.photo else {
            self.photo_texture = None;
            return;
        };
        if photo.revision == self.photo_revision {
            return;
        }
        self.photo_revision = photo.revision;
        self.photo_texture = match image::load_from_memory(&photo.bytes) {
            Ok(decoded) => {
                let rgba = decoded.to_rgba8();
                let size = [rgba.width() as usize, rgba.height() as usize];
                let image = egui::ColorImage::from_rgba_unmultiplied(size, rgba.as_raw());
                Some(ctx.load_texture("user_photo", image, egui::TextureOptions::LINEAR))
            }
            Err(err) => {
                debug!(%err, content_type = %photo.content_type, "could not decode user photo");
                None
            }
        };
    }
}

fn start_session(
    factory: &dyn SessionFactory,
    llm: &LlmDriver,
    runtime: &Runtime,
    redirect: Option<Url>,
) -> (SessionCoordinator, ChatSession, UnboundedReceiver<ViewEvent>) {
    let (sink, events) = sink::channel();
    let coordinator = factory.build(sink.clone(), redirect);
    let chat = ChatSession::new(llm.clone(), sink);
    let session = coordinator.clone();
    runtime.spawn(async move {
        let _ = session.initialize().await;
    });
    (coordinator, chat, events)
}

pub fn render_ui(ctx: &egui::Context, app: &mut SignetEguiApp) {
    app.process_events();
    app.refresh_photo(ctx);

    let palette = if ctx.style().visuals.dark_mode {
        ThemePalette::for_dark()
    } else {
        ThemePalette::for_light()
    };
    ctx.set_visuals(palette.visuals(ctx.style().visuals.dark_mode));

    let now = Instant::now();
    let mut actions = UiActions::default();

    egui::TopBottomPanel::top("header").show(ctx, |ui| {
        ui.horizontal(|ui| {
            ui.heading(RichText::new("Signet").color(palette.accent));
            ui.label(RichText::new("Microsoft 365 sign-in").color(palette.text_secondary));
        });
    });

    egui::CentralPanel::default().show(ctx, |ui| {
        ScrollArea::vertical()
            .id_source("main")
            .auto_shrink([false; 2])
            .show(ui, |ui| {
                if app.view.welcome_visible(now) {
                    WelcomeNotice::show(ui, &palette, app.view.display_name());
                    ui.add_space(8.0);
                }
                if let Some(message) = &app.view.error {
                    ErrorBanner::show(ui, &palette, message);
                    ui.add_space(8.0);
                }
                if app.view.signed_in() {
                    ProfilePanel::show(
                        ui,
                        &palette,
                        &app.view,
                        app.photo_texture.as_ref(),
                        &mut actions,
                    );
                } else {
                    SignInPanel::show(ui, &palette, &app.view, &mut app.input, &mut actions);
                }
                if let Some(token) = &app.view.token {
                    ui.add_space(8.0);
                    TokenPanel::show(ui, &palette, token);
                }
                if let Some(body) = &app.view.api_response {
                    ui.add_space(8.0);
                    GraphPanel::show(ui, &palette, body);
                }
                if app.view.chat_open {
                    ui.add_space(8.0);
                    ChatPanel::show(ui, &palette, &app.view, &mut app.input, &mut actions);
                }
            });
    });

    app.handle(actions);
    // Background tasks report through the channel; poll it while idle.
    ctx.request_repaint_after(Duration::from_millis(250));
}

impl eframe::App for SignetEguiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        render_ui(ctx, self);
    }
}

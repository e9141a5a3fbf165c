use crate::view::{ProfileView, ViewModel};
use egui::{self, Align, Color32, Frame, Layout, Margin, RichText, ScrollArea, Vec2};
use signet_core::chat::{contract_sections, ChatMessage, ContractNode, ContractValue, MessageRole};
use signet_core::sink::RedirectFlow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThemePalette {
    pub background: Color32,
    pub surface: Color32,
    pub user_bubble: Color32,
    pub assistant_bubble: Color32,
    pub accent: Color32,
    pub success: Color32,
    pub text_primary: Color32,
    pub text_secondary: Color32,
    pub border: Color32,
    pub warning: Color32,
}

impl ThemePalette {
    pub fn for_dark() -> Self {
        Self {
            background: color_from_hex("#1E1E1E"),
            surface: color_from_hex("#2D2D30"),
            user_bubble: color_from_hex("#0F3A5F"),
            assistant_bubble: color_from_hex("#2D2D30"),
            accent: color_from_hex("#0078D4"),
            success: color_from_hex("#3FA34D"),
            text_primary: color_from_hex("#E6E6E6"),
            text_secondary: color_from_hex("#B0B0B0"),
            border: color_from_hex("#3B3B3B"),
            warning: color_from_hex("#C63C3C"),
        }
    }

    pub fn for_light() -> Self {
        Self {
            background: color_from_hex("#F3F2F1"),
            surface: color_from_hex("#FFFFFF"),
            user_bubble: color_from_hex("#DEECF9"),
            assistant_bubble: color_from_hex("#FFFFFF"),
            accent: color_from_hex("#0078D4"),
            success: color_from_hex("#107C10"),
            text_primary: color_from_hex("#201F1E"),
            text_secondary: color_from_hex("#605E5C"),
            border: color_from_hex("#D0D0D0"),
            warning: color_from_hex("#A4262C"),
        }
    }

    pub fn visuals(&self, dark_mode: bool) -> egui::Visuals {
        let mut visuals = if dark_mode {
            egui::Visuals::dark()
        } else {
            egui::Visuals::light()
        };
        visuals.window_fill = self.surface;
        visuals.panel_fill = self.background;
        visuals.extreme_bg_color = self.surface;
        visuals.widgets.noninteractive.bg_fill = self.surface;
        visuals.widgets.noninteractive.fg_stroke.color = self.text_primary;
        visuals.selection.bg_fill = self.accent;
        visuals.dark_mode = dark_mode;
        visuals
    }
}

fn color_from_hex(hex: &str) -> Color32 {
    let trimmed = hex.trim_start_matches('#');
    if trimmed.len() == 6 {
        if let Ok(value) = u32::from_str_radix(trimmed, 16) {
            let r = ((value >> 16) & 0xFF) as u8;
            let g = ((value >> 8) & 0xFF) as u8;
            let b = (value & 0xFF) as u8;
            return Color32::from_rgb(r, g, b);
        }
    }
    Color32::WHITE
}

/// Text the user is typing; survives across frames.
#[derive(Debug, Default)]
pub struct InputState {
    pub chat_draft: String,
    pub redirect_url: String,
}

/// What the user asked for during one frame.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UiActions {
    pub sign_in: bool,
    pub sign_out: bool,
    pub get_token: bool,
    pub call_graph: bool,
    pub open_chat: bool,
    pub close_chat: bool,
    pub clear_chat: bool,
    pub send_chat: Option<String>,
    pub complete_redirect: Option<String>,
    pub cancel_redirect: bool,
}

fn card<R>(
    ui: &mut egui::Ui,
    palette: &ThemePalette,
    add: impl FnOnce(&mut egui::Ui) -> R,
) -> R {
    Frame::none()
        .fill(palette.surface)
        .stroke(egui::Stroke::new(1.0, palette.border))
        .rounding(egui::Rounding::same(8.0))
        .inner_margin(Margin::symmetric(16.0, 12.0))
        .show(ui, |ui| {
            ui.set_width(ui.available_width());
            add(ui)
        })
        .inner
}

pub struct ErrorBanner;

impl ErrorBanner {
    pub fn show(ui: &mut egui::Ui, palette: &ThemePalette, message: &str) {
        Frame::none()
            .fill(palette.warning.linear_multiply(0.15))
            .stroke(egui::Stroke::new(1.0, palette.warning))
            .rounding(egui::Rounding::same(6.0))
            .inner_margin(Margin::symmetric(12.0, 8.0))
            .show(ui, |ui| {
                ui.set_width(ui.available_width());
                ui.label(RichText::new("Error").strong().color(palette.warning));
                ui.label(message);
            });
    }
}

pub struct WelcomeNotice;

impl WelcomeNotice {
    pub fn show(ui: &mut egui::Ui, palette: &ThemePalette, name: Option<&str>) {
        Frame::none()
            .fill(palette.success.linear_multiply(0.15))
            .stroke(egui::Stroke::new(1.0, palette.success))
            .rounding(egui::Rounding::same(6.0))
            .inner_margin(Margin::symmetric(12.0, 8.0))
            .show(ui, |ui| {
                ui.set_width(ui.available_width());
                ui.label(
                    RichText::new(format!("Welcome, {}!", name.unwrap_or("there")))
                        .strong()
                        .color(palette.success),
                );
                ui.label("You are signed in with your Microsoft 365 account.");
            });
    }
}

pub struct SignInPanel;

impl SignInPanel {
    pub fn show(
        ui: &mut egui::Ui,
        palette: &ThemePalette,
        view: &ViewModel,
        input: &mut InputState,
        actions: &mut UiActions,
    ) {
        card(ui, palette, |ui| {
            ui.heading("Sign in");
            ui.label(
                RichText::new("Use your Microsoft 365 work or school account.")
                    .color(palette.text_secondary),
            );
            ui.add_space(8.0);
            match view.redirecting {
                Some(RedirectFlow::SignIn) => {
                    ui.label(
                        "Finish signing in in your browser, then paste the address it landed on:",
                    );
                    ui.add(
                        egui::TextEdit::singleline(&mut input.redirect_url)
                            .hint_text("http://localhost:8400/?code=…")
                            .desired_width(f32::INFINITY),
                    );
                    let ready = !input.redirect_url.trim().is_empty();
                    ui.horizontal(|ui| {
                        if ui
                            .add_enabled(ready, egui::Button::new("Complete sign-in"))
                            .clicked()
                        {
                            actions.complete_redirect =
                                Some(input.redirect_url.trim().to_string());
                            input.redirect_url.clear();
                        }
                        if ui.button("Cancel").clicked() {
                            actions.cancel_redirect = true;
                            input.redirect_url.clear();
                        }
                    });
                }
                Some(RedirectFlow::SignOut) => {
                    ui.label("Signing out in your browser…");
                }
                None => {
                    if ui
                        .button(RichText::new("Sign in with Microsoft").strong())
                        .clicked()
                    {
                        actions.sign_in = true;
                    }
                }
            }
        });
    }
}

pub struct ProfilePanel;

impl ProfilePanel {
    pub fn show(
        ui: &mut egui::Ui,
        palette: &ThemePalette,
        view: &ViewModel,
        photo: Option<&egui::TextureHandle>,
        actions: &mut UiActions,
    ) {
        card(ui, palette, |ui| {
            ui.horizontal(|ui| {
                match photo {
                    Some(texture) => {
                        ui.image((texture.id(), egui::vec2(64.0, 64.0)));
                    }
                    None => {
                        let initial = view
                            .identity
                            .as_ref()
                            .map(|identity| identity.initial())
                            .unwrap_or('U');
                        ui.label(
                            RichText::new(initial.to_string())
                                .size(32.0)
                                .strong()
                                .color(palette.accent),
                        );
                    }
                }
                ui.add_space(12.0);
                ui.vertical(|ui| match &view.profile {
                    Some(ProfileView {
                        name,
                        email,
                        organization,
                    }) => {
                        ui.label(RichText::new(name).heading().strong());
                        ui.label(RichText::new(email).color(palette.text_secondary));
                        ui.label(
                            RichText::new(organization)
                                .color(palette.text_secondary)
                                .small(),
                        );
                    }
                    None => {
                        ui.spinner();
                    }
                });
            });
            ui.add_space(8.0);
            ui.horizontal_wrapped(|ui| {
                if ui.button("Get access token").clicked() {
                    actions.get_token = true;
                }
                if ui.button("Call Microsoft Graph").clicked() {
                    actions.call_graph = true;
                }
                if ui.button("Chat with OpenAI").clicked() {
                    actions.open_chat = true;
                }
                if ui.button("Sign out").clicked() {
                    actions.sign_out = true;
                }
            });
        });
    }
}

pub struct TokenPanel;

impl TokenPanel {
    pub fn show(ui: &mut egui::Ui, palette: &ThemePalette, token: &str) {
        card(ui, palette, |ui| {
            ui.horizontal(|ui| {
                ui.label(RichText::new("Access token").strong());
                if ui.small_button("Copy").clicked() {
                    ui.output_mut(|out| out.copied_text = token.to_string());
                }
            });
            let mut shown = token;
            ui.add(
                egui::TextEdit::multiline(&mut shown)
                    .desired_rows(3)
                    .desired_width(f32::INFINITY)
                    .code_editor(),
            );
        });
    }
}

pub struct GraphPanel;

impl GraphPanel {
    pub fn show(ui: &mut egui::Ui, palette: &ThemePalette, body: &str) {
        card(ui, palette, |ui| {
            ui.label(RichText::new("Microsoft Graph /me").strong());
            ScrollArea::vertical()
                .id_source("graph_response")
                .max_height(240.0)
                .show(ui, |ui| {
                    ui.code(body);
                });
        });
    }
}

pub struct ChatPanel;

impl ChatPanel {
    pub fn show(
        ui: &mut egui::Ui,
        palette: &ThemePalette,
        view: &ViewModel,
        input: &mut InputState,
        actions: &mut UiActions,
    ) {
        card(ui, palette, |ui| {
            ui.horizontal(|ui| {
                ui.label(RichText::new("Contract mentor").strong());
                ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                    if ui.small_button("Close").clicked() {
                        actions.close_chat = true;
                    }
                    if ui.small_button("Clear").clicked() {
                        actions.clear_chat = true;
                    }
                });
            });
            ui.separator();
            let initial = view
                .identity
                .as_ref()
                .map(|identity| identity.initial())
                .unwrap_or('U');
            ScrollArea::vertical()
                .id_source("chat_history")
                .stick_to_bottom(true)
                .max_height(360.0)
                .auto_shrink([false, true])
                .show(ui, |ui| {
                    for message in &view.chat {
                        Self::chat_bubble(ui, palette, message, initial);
                        ui.add_space(6.0);
                    }
                });
            ui.separator();
            let response = ui.add(
                egui::TextEdit::multiline(&mut input.chat_draft)
                    .hint_text("Ask about your contract…")
                    .desired_rows(2)
                    .desired_width(f32::INFINITY),
            );
            let enter_pressed = response.has_focus()
                && ui.input(|i| i.key_pressed(egui::Key::Enter) && !i.modifiers.shift);
            if ui.button("Send").clicked() || enter_pressed {
                let text = input.chat_draft.trim().to_string();
                input.chat_draft.clear();
                if !text.is_empty() {
                    actions.send_chat = Some(text);
                }
            }
        });
    }

    fn chat_bubble(
        ui: &mut egui::Ui,
        palette: &ThemePalette,
        message: &ChatMessage,
        initial: char,
    ) {
        let is_user = matches!(message.role, MessageRole::User);
        let bubble_color = if is_user {
            palette.user_bubble
        } else {
            palette.assistant_bubble
        };
        let total_width = ui.available_width().max(0.0);
        let bubble_width = if is_user {
            total_width.min(520.0).max(total_width * 0.5)
        } else {
            total_width
        };
        let leading_pad = (total_width - bubble_width).max(0.0);
        ui.horizontal(|ui| {
            if leading_pad > 0.0 {
                ui.add_space(leading_pad);
            }
            ui.allocate_ui_with_layout(
                Vec2::new(bubble_width, 0.0),
                Layout::top_down(Align::Min),
                |ui| {
                    ui.set_width(bubble_width);
                    Frame::none()
                        .fill(bubble_color)
                        .stroke(egui::Stroke::new(1.0, palette.border))
                        .rounding(egui::Rounding::same(10.0))
                        .inner_margin(Margin::symmetric(12.0, 8.0))
                        .show(ui, |ui| {
                            ui.horizontal(|ui| {
                                ui.label(RichText::new(avatar(message, initial)).strong());
                                ui.label(
                                    RichText::new(
                                        message
                                            .created_at
                                            .with_timezone(&chrono::Local)
                                            .format("%H:%M:%S")
                                            .to_string(),
                                    )
                                    .color(palette.text_secondary)
                                    .small(),
                                );
                            });
                            Self::message_body(ui, palette, message);
                        });
                },
            );
        });
    }

    fn message_body(ui: &mut egui::Ui, palette: &ThemePalette, message: &ChatMessage) {
        if message.role == MessageRole::Assistant {
            if let Some(sections) = contract_sections(&message.content) {
                ui.label(RichText::new("Contract Template").strong().color(palette.accent));
                contract_tree(ui, message.id, &sections, 0);
                if ui.small_button("Copy JSON").clicked() {
                    let pretty = serde_json::from_str::<serde_json::Value>(&message.content)
                        .and_then(|value| serde_json::to_string_pretty(&value))
                        .unwrap_or_else(|_| message.content.clone());
                    ui.output_mut(|out| out.copied_text = pretty);
                }
                return;
            }
        }
        if message.content.is_empty() {
            ui.label(RichText::new("No content received").italics());
        } else {
            ui.label(&message.content);
        }
    }
}

fn avatar(message: &ChatMessage, initial: char) -> String {
    match message.role {
        MessageRole::User => initial.to_string(),
        MessageRole::Assistant | MessageRole::System => "AI".to_string(),
    }
}

fn contract_tree(ui: &mut egui::Ui, message_id: Uuid, nodes: &[ContractNode], depth: usize) {
    for (idx, node) in nodes.iter().enumerate() {
        match &node.value {
            ContractValue::Text(text) => {
                ui.horizontal_wrapped(|ui| {
                    ui.label(RichText::new(format!("{}:", node.label)).strong());
                    ui.label(text);
                });
            }
            ContractValue::Section(children) => {
                egui::CollapsingHeader::new(RichText::new(&node.label).strong())
                    .id_source((message_id, depth, idx, &node.label))
                    .default_open(depth < 2)
                    .show(ui, |ui| contract_tree(ui, message_id, children, depth + 1));
            }
        }
    }
}

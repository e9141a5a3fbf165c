use signet_core::chat::ChatMessage;
use signet_core::identity::Identity;
use signet_core::sink::{RedirectFlow, ViewEvent};
use std::time::{Duration, Instant};

/// How long the welcome notice stays up after a sign-in.
pub const WELCOME_NOTICE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileView {
    pub name: String,
    pub email: String,
    pub organization: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoView {
    pub content_type: String,
    pub bytes: Vec<u8>,
    /// Bumped on every new photo so the renderer knows to re-upload the texture.
    pub revision: u64,
}

/// Everything the window shows, folded from the session's [`ViewEvent`]s.
#[derive(Debug, Default)]
pub struct ViewModel {
    pub identity: Option<Identity>,
    pub profile: Option<ProfileView>,
    pub photo: Option<PhotoView>,
    pub token: Option<String>,
    pub api_response: Option<String>,
    pub error: Option<String>,
    pub redirecting: Option<RedirectFlow>,
    pub chat_open: bool,
    pub chat: Vec<ChatMessage>,
    welcome_since: Option<Instant>,
    photo_revision: u64,
}

impl ViewModel {
    pub fn apply(&mut self, event: ViewEvent, now: Instant) {
        match event {
            ViewEvent::SignedIn { identity, fresh } => {
                self.identity = Some(identity);
                self.redirecting = None;
                if fresh {
                    self.welcome_since = Some(now);
                }
            }
            // Chat and the error banner outlive the session.
            ViewEvent::SignedOut => {
                self.identity = None;
                self.profile = None;
                self.photo = None;
                self.token = None;
                self.api_response = None;
                self.redirecting = None;
                self.welcome_since = None;
            }
            ViewEvent::Redirecting { flow } => self.redirecting = Some(flow),
            ViewEvent::Token { token } => self.token = Some(token),
            ViewEvent::Profile {
                name,
                email,
                organization,
            } => {
                self.profile = Some(ProfileView {
                    name,
                    email,
                    organization,
                })
            }
            ViewEvent::Photo {
                content_type,
                bytes,
            } => {
                self.photo_revision += 1;
                self.photo = Some(PhotoView {
                    content_type,
                    bytes,
                    revision: self.photo_revision,
                });
            }
            ViewEvent::ApiResponse { body } => self.api_response = Some(body),
            ViewEvent::Error { message } => self.error = Some(message),
            ViewEvent::ClearError => self.error = None,
            ViewEvent::ChatOpened => self.chat_open = true,
            ViewEvent::ChatMessage { message } => self.chat.push(message),
            ViewEvent::ChatCleared => self.chat.clear(),
        }
    }

    pub fn signed_in(&self) -> bool {
        self.identity.is_some()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.profile
            .as_ref()
            .map(|profile| profile.name.as_str())
            .or_else(|| self.identity.as_ref().map(Identity::display_name))
    }

    pub fn welcome_visible(&self, now: Instant) -> bool {
        self.welcome_since
            .map(|since| now.saturating_duration_since(since) < WELCOME_NOTICE)
            .unwrap_or(false)
    }

    pub fn close_chat(&mut self) {
        self.chat_open = false;
    }
}

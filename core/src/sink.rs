use crate::chat::ChatMessage;
use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RedirectFlow {
    SignIn,
    SignOut,
}

/// One-way notifications from the core to whatever renders the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewEvent {
    SignedIn {
        identity: Identity,
        /// Set after an actual sign-in; drives the welcome notice.
        fresh: bool,
    },
    SignedOut,
    Redirecting {
        flow: RedirectFlow,
    },
    Token {
        token: String,
    },
    Profile {
        name: String,
        email: String,
        organization: String,
    },
    Photo {
        content_type: String,
        bytes: Vec<u8>,
    },
    ApiResponse {
        body: String,
    },
    Error {
        message: String,
    },
    ClearError,
    ChatOpened,
    ChatMessage {
        message: ChatMessage,
    },
    ChatCleared,
}

pub trait PresentationSink: Send + Sync {
    fn notify(&self, event: ViewEvent);
}

impl PresentationSink for UnboundedSender<ViewEvent> {
    fn notify(&self, event: ViewEvent) {
        if self.send(event).is_err() {
            debug!("presentation sink closed, dropping view event");
        }
    }
}

/// Channel-backed sink; the receiving half is drained by the UI.
pub fn channel() -> (Arc<dyn PresentationSink>, UnboundedReceiver<ViewEvent>) {
    let (tx, rx) = unbounded_channel();
    (Arc::new(tx), rx)
}

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;
use url::Url;

pub const DEFAULT_GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Graph API call failed: {status} {reason}")]
    Status { status: u16, reason: String },
    #[error("{0}")]
    Transport(String),
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn from_status(status: StatusCode) -> Self {
        Self::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Bearer-authenticated client for the signed-in user's Graph resources.
#[derive(Clone)]
pub struct GraphClient {
    base_url: Url,
    http: reqwest::Client,
}

impl GraphClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn resource(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{path}")).map_err(|err| ApiError::Transport(err.to_string()))
    }

    /// `GET /me`
    pub async fn me(&self, token: &str) -> Result<Value, ApiError> {
        let url = self.resource("me")?;
        debug!(%url, "calling Microsoft Graph");
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::from_status(status));
        }
        response
            .json()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }

    /// `GET /me/photo/$value`. Users without a photo yield `None`.
    pub async fn photo(&self, token: &str) -> Result<Option<Photo>, ApiError> {
        let url = self.resource("me/photo/$value")?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ApiError::from_status(status));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        Ok(Some(Photo {
            content_type,
            bytes: bytes.to_vec(),
        }))
    }
}

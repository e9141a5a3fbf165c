use crate::graph::DEFAULT_GRAPH_BASE;
use crate::llm::{LlmProviderKind, DEFAULT_OPENAI_BASE};
use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/common";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8400/";
const DEFAULT_CALLBACK_WINDOW_SECS: u64 = 300;
/// Shipped sample value; treated the same as no key.
const API_KEY_PLACEHOLDER: &str = "YOUR_OPENAI_API_KEY_HERE";

#[derive(Debug, Clone)]
pub struct IdentitySettings {
    pub client_id: String,
    pub authority: Url,
    pub redirect_uri: Url,
    pub callback_window: Duration,
}

#[derive(Debug, Clone)]
pub struct AiRuntimeSettings {
    pub provider: LlmProviderKind,
    pub openai: Option<OpenAiSettings>,
    pub azure: Option<AzureOpenAiSettings>,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub model: Option<String>,
    pub base_url: Url,
}

#[derive(Debug, Clone)]
pub struct AzureOpenAiSettings {
    pub api_key: String,
    pub endpoint: String,
    pub api_version: String,
    pub deployment_name: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration not found")]
    Missing,
    #[error("configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Missing => "Please update signet.yaml or set OPENAI_API_KEY.".to_string(),
            Self::Invalid(detail) => format!("{detail}. Update signet.yaml."),
        }
    }
}

/// Everything the desktop client needs at startup.
///
/// The AI section is allowed to be absent or broken: sign-in still works and
/// the chat reports the problem when opened.
#[derive(Debug, Clone)]
pub struct SignetSettings {
    pub identity: IdentitySettings,
    pub ai: Result<AiRuntimeSettings, ConfigError>,
    pub graph_base_url: Url,
    pub session_dir: PathBuf,
}

impl SignetSettings {
    /// Load `signet.yaml` from `path`, or from the first standard location that
    /// exists, then apply `.env` and process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Ok(dotenv) = dotenvy::dotenv() {
            debug!(path = %dotenv.display(), "loaded .env");
        }
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => locate_config_file(),
        };
        let contents = match &path {
            Some(path) => Some(fs::read_to_string(path).map_err(|err| {
                ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
            })?),
            None => None,
        };
        if let Some(path) = &path {
            debug!(path = %path.display(), "using configuration file");
        }
        Self::from_sources(contents.as_deref(), |key| std::env::var(key).ok())
    }

    /// Resolve settings from YAML text and an environment lookup.
    pub fn from_sources(
        yaml: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file: SignetFile = match yaml {
            Some(contents) => serde_yaml::from_str::<Option<SignetFile>>(contents)
                .map_err(|err| ConfigError::Invalid(format!("invalid signet.yaml: {err}")))?
                .unwrap_or_default(),
            None => SignetFile::default(),
        };
        let env = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let identity = resolve_identity(file.identity.unwrap_or_default(), &env)?;
        let graph_base_url = parse_url(
            "graph base_url",
            file.graph
                .and_then(|graph| graph.base_url)
                .as_deref()
                .unwrap_or(DEFAULT_GRAPH_BASE),
        )?;
        let session_dir = file.session_dir.unwrap_or_else(default_session_dir);
        let ai = resolve_app_settings(file.app, &env);

        Ok(Self {
            identity,
            ai,
            graph_base_url,
            session_dir,
        })
    }
}

fn resolve_identity(
    section: IdentitySection,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<IdentitySettings, ConfigError> {
    let client_id = env("SIGNET_CLIENT_ID")
        .or(section.client_id)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            ConfigError::Invalid(
                "missing identity client_id (set SIGNET_CLIENT_ID or identity.client_id)".into(),
            )
        })?;
    let authority = env("SIGNET_AUTHORITY")
        .or(section.authority)
        .unwrap_or_else(|| DEFAULT_AUTHORITY.to_string());
    let redirect_uri = section
        .redirect_uri
        .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
    Ok(IdentitySettings {
        client_id,
        authority: parse_url("identity authority", &authority)?,
        redirect_uri: parse_url("identity redirect_uri", &redirect_uri)?,
        callback_window: Duration::from_secs(
            section
                .callback_window_secs
                .unwrap_or(DEFAULT_CALLBACK_WINDOW_SECS),
        ),
    })
}

fn resolve_app_settings(
    app: Option<AppSection>,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<AiRuntimeSettings, ConfigError> {
    let env_key = env("OPENAI_API_KEY");
    let app = match app {
        Some(app) => app,
        None if env_key.is_some() => AppSection::default(),
        None => return Err(ConfigError::Missing),
    };
    let provider = match env("LLM_PROVIDER") {
        Some(value) => LlmProviderKind::from_env_value(&value).ok_or_else(|| {
            ConfigError::Invalid(format!("unknown LLM_PROVIDER `{value}`"))
        })?,
        None => app.provider.unwrap_or(LlmProviderKind::OpenAi),
    };

    match provider {
        LlmProviderKind::OpenAi => {
            let section = app.openai.unwrap_or_default();
            let api_key = env_key
                .unwrap_or_else(|| section.api_key.trim().to_string());
            if api_key.is_empty() || api_key == API_KEY_PLACEHOLDER {
                return Err(ConfigError::Missing);
            }
            let base_url = parse_url(
                "openai base_url",
                section.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_BASE),
            )?;
            let model = section.model.filter(|model| !model.trim().is_empty());
            Ok(AiRuntimeSettings {
                provider,
                openai: Some(OpenAiSettings {
                    api_key,
                    model: model.clone(),
                    base_url,
                }),
                azure: None,
                model,
            })
        }
        LlmProviderKind::AzureOpenAi => {
            let section = app.azure_openai.unwrap_or_default();
            let required = |value: String, what: &str| {
                let value = value.trim().to_string();
                if value.is_empty() {
                    Err(ConfigError::Invalid(format!(
                        "missing Azure {what} in signet.yaml"
                    )))
                } else {
                    Ok(value)
                }
            };
            let api_key = required(section.api_key, "api key")?;
            let endpoint = required(section.endpoint, "endpoint")?;
            let api_version = required(section.api_version, "api version")?;
            let deployment_name = required(section.deployment_name, "deployment name")?;
            Ok(AiRuntimeSettings {
                provider,
                openai: None,
                azure: Some(AzureOpenAiSettings {
                    api_key,
                    endpoint,
                    api_version,
                    deployment_name: deployment_name.clone(),
                }),
                model: Some(deployment_name),
            })
        }
        LlmProviderKind::Mock => Ok(AiRuntimeSettings {
            provider,
            openai: None,
            azure: None,
            model: None,
        }),
    }
}

fn parse_url(what: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|err| ConfigError::Invalid(format!("invalid {what}: {err}")))
}

fn default_session_dir() -> PathBuf {
    match BaseDirs::new() {
        Some(base) => base.data_local_dir().join("signet"),
        None => PathBuf::from(".signet"),
    }
}

fn locate_config_file() -> Option<PathBuf> {
    signet_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn signet_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("signet");
        paths.push(config_dir.join("signet.yaml"));
        paths.push(config_dir.join("signet.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".signet").join("signet.yaml"));
        paths.push(home_dir.join(".signet").join("signet.yml"));
    }
    paths.push(PathBuf::from("signet.yaml"));
    paths.push(PathBuf::from("signet.yml"));
    paths
}

#[derive(Debug, Default, Deserialize)]
struct SignetFile {
    identity: Option<IdentitySection>,
    graph: Option<GraphSection>,
    app: Option<AppSection>,
    session_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct IdentitySection {
    client_id: Option<String>,
    authority: Option<String>,
    redirect_uri: Option<String>,
    callback_window_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GraphSection {
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AppSection {
    provider: Option<LlmProviderKind>,
    openai: Option<OpenAiSection>,
    azure_openai: Option<AzureSection>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiSection {
    #[serde(default)]
    api_key: String,
    model: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AzureSection {
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    deployment_name: String,
}

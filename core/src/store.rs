use crate::identity::{AccessToken, Identity, ScopeSet};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;
use uuid::Uuid;

const CACHE_FILE: &str = "session.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedAccount {
    pub identity: Identity,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedAccessToken {
    pub home_account_id: String,
    pub token: AccessToken,
}

/// Authorization request handed to the browser whose response has not been seen yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingRedirect {
    pub state: String,
    pub verifier: String,
    pub scopes: ScopeSet,
    pub redirect_uri: Url,
    pub started_at: DateTime<Utc>,
}

/// Everything the identity provider client keeps between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionCache {
    #[serde(default)]
    pub accounts: Vec<CachedAccount>,
    #[serde(default)]
    pub access_tokens: Vec<CachedAccessToken>,
    #[serde(default)]
    pub active_account: Option<String>,
    #[serde(default)]
    pub pending_redirect: Option<PendingRedirect>,
}

impl SessionCache {
    pub fn account(&self, home_account_id: &str) -> Option<&CachedAccount> {
        self.accounts
            .iter()
            .find(|entry| entry.identity.home_account_id == home_account_id)
    }

    pub fn active(&self) -> Option<&CachedAccount> {
        self.active_account
            .as_deref()
            .and_then(|id| self.account(id))
    }

    /// Insert or replace an account. A `None` refresh token keeps the old one.
    pub fn upsert_account(&mut self, identity: Identity, refresh_token: Option<String>) {
        match self
            .accounts
            .iter_mut()
            .find(|entry| entry.identity.home_account_id == identity.home_account_id)
        {
            Some(entry) => {
                entry.identity = identity;
                if refresh_token.is_some() {
                    entry.refresh_token = refresh_token;
                }
            }
            None => self.accounts.push(CachedAccount {
                identity,
                refresh_token,
            }),
        }
    }

    pub fn remove_account(&mut self, home_account_id: &str) {
        self.accounts
            .retain(|entry| entry.identity.home_account_id != home_account_id);
        self.access_tokens
            .retain(|entry| entry.home_account_id != home_account_id);
        if self.active_account.as_deref() == Some(home_account_id) {
            self.active_account = None;
        }
    }

    /// A token for the account whose granted scopes cover `scopes` and that is
    /// still valid `margin` from now.
    pub fn token_for(
        &self,
        home_account_id: &str,
        scopes: &ScopeSet,
        now: DateTime<Utc>,
        margin: chrono::Duration,
    ) -> Option<&AccessToken> {
        self.access_tokens
            .iter()
            .filter(|entry| entry.home_account_id == home_account_id)
            .map(|entry| &entry.token)
            .find(|token| scopes.is_subset_of(token.scopes()) && token.is_valid_at(now, margin))
    }

    /// Store a token, replacing any earlier one for the same account and scopes.
    pub fn store_token(&mut self, home_account_id: &str, token: AccessToken) {
        self.access_tokens.retain(|entry| {
            entry.home_account_id != home_account_id || entry.token.scopes() != token.scopes()
        });
        self.access_tokens.push(CachedAccessToken {
            home_account_id: home_account_id.to_string(),
            token,
        });
    }
}

/// Session cache persisted as a JSON document under a session directory.
#[derive(Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: PathBuf) -> Self {
        fs::create_dir_all(&root).ok();
        Self { root }
    }

    pub fn in_memory() -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("signet-session-{}", Uuid::new_v4()));
        Self::new(path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_path(&self) -> PathBuf {
        self.root.join(CACHE_FILE)
    }

    pub fn load(&self) -> Result<SessionCache> {
        let path = self.cache_path();
        if !path.exists() {
            return Ok(SessionCache::default());
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let cache = serde_json::from_str(&contents)
            .with_context(|| format!("invalid session cache at {}", path.display()))?;
        Ok(cache)
    }

    pub fn save(&self, cache: &SessionCache) -> Result<()> {
        fs::create_dir_all(&self.root).ok();
        let serialized = serde_json::to_vec_pretty(cache)?;
        fs::write(self.cache_path(), serialized)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let path = self.cache_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

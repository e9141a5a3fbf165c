use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub type Claims = Map<String, Value>;

/// The signed-in principal as described by its ID token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    /// `<oid>.<tid>` when both claims are present, otherwise `sub`.
    pub home_account_id: String,
    pub name: Option<String>,
    pub username: String,
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub claims: Claims,
}

impl Identity {
    pub fn from_claims(claims: Claims) -> Option<Self> {
        let text = |key: &str| {
            claims
                .get(key)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };
        let tenant_id = text("tid");
        let home_account_id = match (text("oid"), tenant_id.as_deref()) {
            (Some(oid), Some(tid)) => format!("{oid}.{tid}"),
            _ => text("sub")?,
        };
        let username = text("preferred_username")
            .or_else(|| text("email"))
            .or_else(|| text("upn"))
            .unwrap_or_default();
        let name = text("name");
        Some(Self {
            home_account_id,
            name,
            username,
            tenant_id,
            claims,
        })
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or("Unknown User")
    }

    pub fn email(&self) -> &str {
        if self.username.is_empty() {
            "No email available"
        } else {
            &self.username
        }
    }

    /// Organization claim, falling back to the tenant id.
    pub fn organization(&self) -> String {
        self.claims
            .get("organization")
            .and_then(Value::as_str)
            .or(self.tenant_id.as_deref())
            .unwrap_or("Organization info not available")
            .to_string()
    }

    pub fn initial(&self) -> char {
        self.name
            .as_deref()
            .and_then(|name| name.chars().next())
            .unwrap_or('U')
    }
}

/// An unordered set of OAuth scopes.
///
/// Scopes are kept sorted and de-duplicated so that two sets requesting the same
/// permissions compare equal regardless of the order they were declared in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ScopeSet(Vec<String>);

impl ScopeSet {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from(scopes.into_iter().map(Into::into).collect::<Vec<_>>())
    }

    /// Scopes requested when signing in.
    pub fn login() -> Self {
        Self::new(["openid", "profile", "email", "User.Read"])
    }

    /// Scopes requested for the Graph call site.
    pub fn graph() -> Self {
        Self::new(["User.Read", "Mail.Read"])
    }

    /// Scopes used to fetch the profile photo.
    pub fn photo() -> Self {
        Self::new(["User.Read"])
    }

    /// Parse a space separated scope string, as returned by token endpoints.
    pub fn parse(scopes: &str) -> Self {
        Self::new(scopes.split_whitespace())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn with(&self, scope: &str) -> Self {
        Self::new(self.iter().chain(std::iter::once(scope)))
    }

    /// Every scope in `self` is granted by `granted`, compared case-insensitively.
    pub fn is_subset_of(&self, granted: &ScopeSet) -> bool {
        self.iter()
            .all(|scope| granted.iter().any(|g| g.eq_ignore_ascii_case(scope)))
    }

    pub fn to_scope_string(&self) -> String {
        self.0.join(" ")
    }
}

impl From<Vec<String>> for ScopeSet {
    fn from(mut scopes: Vec<String>) -> Self {
        scopes.retain(|scope| !scope.trim().is_empty());
        scopes.sort();
        scopes.dedup();
        Self(scopes)
    }
}

impl From<ScopeSet> for Vec<String> {
    fn from(scopes: ScopeSet) -> Self {
        scopes.0
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_scope_string())
    }
}

/// Opaque bearer credential bound to the scopes it was granted for.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    scopes: ScopeSet,
    expires_on: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(
        secret: impl Into<String>,
        scopes: ScopeSet,
        expires_on: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            secret: secret.into(),
            scopes,
            expires_on,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    pub fn expires_on(&self) -> Option<DateTime<Utc>> {
        self.expires_on
    }

    /// Still usable at `now + margin`. Tokens without an expiry never go stale.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        match self.expires_on {
            Some(expiry) => now + margin < expiry,
            None => true,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("scopes", &self.scopes)
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// What an identity provider hands back after a successful sign-in or token request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticationResult {
    pub account: Identity,
    pub access_token: AccessToken,
}

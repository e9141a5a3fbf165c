use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::json;
use signet_core::auth::{SessionCoordinator, SessionOptions, SignInOutcome};
use signet_core::callback::BrowserLauncher;
use signet_core::config::IdentitySettings;
use signet_core::error::ProviderError;
use signet_core::identity::ScopeSet;
use signet_core::oidc::OidcClient;
use signet_core::provider::{AuthRequest, IdentityProvider, LogoutRequest};
use signet_core::sink::ViewEvent;
use signet_core::store::SessionStore;
use signet_core::testing::RecordingSink;
use signet_tests::{block_on, graph_client};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_PATH: &str = "/contoso/oauth2/v2.0/token";

/// Records every URL it is asked to open. When `follow` is set it plays the
/// authorization server and sends the browser back to the loopback listener.
struct ScriptedBrowser {
    opened: Mutex<Vec<Url>>,
    follow: Option<String>,
}

impl ScriptedBrowser {
    fn following(code: &str) -> Arc<Self> {
        Arc::new(Self {
            opened: Mutex::new(Vec::new()),
            follow: Some(code.to_string()),
        })
    }

    fn recording() -> Arc<Self> {
        Arc::new(Self {
            opened: Mutex::new(Vec::new()),
            follow: None,
        })
    }

    fn opened(&self) -> Vec<Url> {
        self.opened.lock().clone()
    }
}

impl BrowserLauncher for ScriptedBrowser {
    fn open(&self, url: &Url) -> Result<(), String> {
        self.opened.lock().push(url.clone());
        let Some(code) = &self.follow else {
            return Ok(());
        };
        let params = query(url);
        let Some(redirect_uri) = params.get("redirect_uri") else {
            return Ok(());
        };
        let mut target = Url::parse(redirect_uri).map_err(|err| err.to_string())?;
        target
            .query_pairs_mut()
            .append_pair("code", code)
            .append_pair("state", &params["state"]);
        tokio::spawn(async move {
            let _ = reqwest::get(target).await;
        });
        Ok(())
    }
}

fn query(url: &Url) -> HashMap<String, String> {
    url.query_pairs().into_owned().collect()
}

fn settings(server: &MockServer, redirect_uri: &str) -> IdentitySettings {
    IdentitySettings {
        client_id: "client-123".into(),
        authority: Url::parse(&format!("{}/contoso", server.uri())).expect("authority"),
        redirect_uri: Url::parse(redirect_uri).expect("redirect uri"),
        callback_window: Duration::from_secs(5),
    }
}

fn id_token(name: &str, username: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let claims = json!({
        "oid": "00000000-0000-0000-0000-00000000000a",
        "tid": "contoso-tenant",
        "sub": "subject-a",
        "name": name,
        "preferred_username": username,
    });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

async fn mount_code_exchange(server: &MockServer, code: &str, expected: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains(format!("code={code}")))
        .and(body_string_contains("code_verifier="))
        .and(body_string_contains("client_id=client-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "access_token": "user-read-token",
            "scope": "openid profile email User.Read",
            "expires_in": 3600,
            "refresh_token": "refresh-1",
            "id_token": id_token("Jane Doe", "jane@contoso.com"),
        })))
        .expect(expected)
        .mount(server)
        .await;
}

#[test]
fn popup_sign_in_round_trips_through_loopback() {
    block_on(async {
        let server = MockServer::start().await;
        mount_code_exchange(&server, "the-code", 1).await;
        let dir = TempDir::new().expect("temp dir");
        let browser = ScriptedBrowser::following("the-code");
        let client = OidcClient::with_browser(
            settings(&server, "http://127.0.0.1:0/"),
            SessionStore::new(dir.path().to_path_buf()),
            browser.clone(),
        );

        let result = client
            .login_popup(&AuthRequest::new(ScopeSet::login()))
            .await
            .expect("popup sign-in");
        assert_eq!(result.account.display_name(), "Jane Doe");
        assert_eq!(
            result.account.home_account_id,
            "00000000-0000-0000-0000-00000000000a.contoso-tenant"
        );
        assert_eq!(result.access_token.secret(), "user-read-token");

        let authorize = &browser.opened()[0];
        assert_eq!(authorize.path(), "/contoso/oauth2/v2.0/authorize");
        let params = query(authorize);
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["prompt"], "select_account");

        // Served from cache: the exchange mock expects exactly one call.
        let cached = client
            .acquire_token_silent(&AuthRequest::for_account(
                ScopeSet::photo(),
                Some(result.account.clone()),
            ))
            .await
            .expect("cached token");
        assert_eq!(cached.access_token.secret(), "user-read-token");

        let restarted = OidcClient::with_browser(
            settings(&server, "http://127.0.0.1:0/"),
            SessionStore::new(dir.path().to_path_buf()),
            ScriptedBrowser::recording(),
        );
        restarted.initialize().await.expect("initialize");
        assert_eq!(restarted.all_accounts(), vec![result.account]);
    });
}

#[test]
fn silent_acquisition_refreshes_for_new_scopes() {
    block_on(async {
        let server = MockServer::start().await;
        mount_code_exchange(&server, "the-code", 1).await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "mail-token",
                "scope": "Mail.Read User.Read",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;
        let client = OidcClient::with_browser(
            settings(&server, "http://127.0.0.1:0/"),
            SessionStore::in_memory(),
            ScriptedBrowser::following("the-code"),
        );
        let account = client
            .login_popup(&AuthRequest::new(ScopeSet::login()))
            .await
            .expect("sign in")
            .account;

        let request = AuthRequest::for_account(ScopeSet::graph(), Some(account.clone()));
        let refreshed = client.acquire_token_silent(&request).await.expect("refresh");
        assert_eq!(refreshed.access_token.secret(), "mail-token");
        assert_eq!(refreshed.account, account);

        let again = client.acquire_token_silent(&request).await.expect("cached");
        assert_eq!(again.access_token.secret(), "mail-token");
    });
}

#[test]
fn token_popup_keeps_account_when_no_id_token_is_returned() {
    block_on(async {
        let server = MockServer::start().await;
        mount_code_exchange(&server, "the-code", 1).await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("Mail.Read"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "access_token": "mail-token",
                "scope": "Mail.Read User.Read",
                "expires_in": 3600,
                "refresh_token": "refresh-2",
            })))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        let browser = ScriptedBrowser::following("the-code");
        let client = OidcClient::with_browser(
            settings(&server, "http://127.0.0.1:0/"),
            SessionStore::in_memory(),
            browser.clone(),
        );
        let account = client
            .login_popup(&AuthRequest::new(ScopeSet::login()))
            .await
            .expect("sign in")
            .account;

        let request = AuthRequest::for_account(ScopeSet::graph(), Some(account.clone()));
        let result = client
            .acquire_token_popup(&request)
            .await
            .expect("interactive token");
        assert_eq!(result.account, account);
        assert_eq!(result.access_token.secret(), "mail-token");

        let token_request = query(&browser.opened()[1]);
        assert_eq!(token_request["login_hint"], "jane@contoso.com");
        assert!(!token_request.contains_key("prompt"));

        let cached = client.acquire_token_silent(&request).await.expect("cached");
        assert_eq!(cached.access_token.secret(), "mail-token");
    });
}

#[test]
fn rejected_refresh_requires_interaction() {
    block_on(async {
        let server = MockServer::start().await;
        mount_code_exchange(&server, "the-code", 1).await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "AADSTS50173: the grant has expired",
            })))
            .mount(&server)
            .await;
        let client = OidcClient::with_browser(
            settings(&server, "http://127.0.0.1:0/"),
            SessionStore::in_memory(),
            ScriptedBrowser::following("the-code"),
        );
        client
            .login_popup(&AuthRequest::new(ScopeSet::login()))
            .await
            .expect("sign in");

        let err = client
            .acquire_token_silent(&AuthRequest::new(ScopeSet::graph()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InteractionRequired(ref d) if d.contains("AADSTS50173")));
    });
}

#[test]
fn redirect_sign_in_completes_in_a_new_client() {
    block_on(async {
        let server = MockServer::start().await;
        mount_code_exchange(&server, "redirect-code", 1).await;
        let dir = TempDir::new().expect("temp dir");
        let browser = ScriptedBrowser::recording();
        let first = OidcClient::with_browser(
            settings(&server, "http://localhost:8400/"),
            SessionStore::new(dir.path().to_path_buf()),
            browser.clone(),
        );
        first.initialize().await.expect("initialize");
        first
            .login_redirect(&AuthRequest::new(ScopeSet::login()))
            .await
            .expect("redirect");
        assert!(first.has_pending_redirect());

        let authorize = query(&browser.opened()[0]);
        assert_eq!(authorize["redirect_uri"], "http://localhost:8400/");
        let mut landing = Url::parse("http://localhost:8400/").expect("landing");
        landing
            .query_pairs_mut()
            .append_pair("code", "redirect-code")
            .append_pair("state", &authorize["state"])
            .append_pair("session_state", "ignored");

        let second = OidcClient::with_browser(
            settings(&server, "http://localhost:8400/"),
            SessionStore::new(dir.path().to_path_buf()),
            ScriptedBrowser::recording(),
        );
        second.deliver_redirect_response(landing);
        second.initialize().await.expect("initialize");
        assert!(second.has_pending_redirect());

        let result = second
            .handle_redirect_response()
            .await
            .expect("redirect response")
            .expect("completed sign-in");
        assert_eq!(result.account.username, "jane@contoso.com");
        assert!(!second.has_pending_redirect());
        assert!(second
            .handle_redirect_response()
            .await
            .expect("nothing left")
            .is_none());
    });
}

#[test]
fn redirect_with_foreign_state_is_rejected() {
    block_on(async {
        let server = MockServer::start().await;
        mount_code_exchange(&server, "redirect-code", 0).await;
        let client = OidcClient::with_browser(
            settings(&server, "http://localhost:8400/"),
            SessionStore::in_memory(),
            ScriptedBrowser::recording(),
        );
        client
            .login_redirect(&AuthRequest::new(ScopeSet::login()))
            .await
            .expect("redirect");

        client.deliver_redirect_response(
            Url::parse("http://localhost:8400/?code=redirect-code&state=forged").expect("url"),
        );
        let err = client.handle_redirect_response().await.unwrap_err();
        assert_eq!(err, ProviderError::StateMismatch);
        assert!(!client.has_pending_redirect());
    });
}

#[test]
fn logout_forgets_account_and_opens_end_session() {
    block_on(async {
        let server = MockServer::start().await;
        mount_code_exchange(&server, "the-code", 1).await;
        let browser = ScriptedBrowser::following("the-code");
        let client = OidcClient::with_browser(
            settings(&server, "http://127.0.0.1:0/"),
            SessionStore::in_memory(),
            browser.clone(),
        );
        let account = client
            .login_popup(&AuthRequest::new(ScopeSet::login()))
            .await
            .expect("sign in")
            .account;

        client
            .logout_popup(&LogoutRequest {
                account: Some(account),
                post_logout_redirect_uri: Url::parse("http://localhost:8400/").ok(),
            })
            .await
            .expect("logout");
        assert!(client.all_accounts().is_empty());
        let logout = browser.opened().last().cloned().expect("logout url");
        assert_eq!(logout.path(), "/contoso/oauth2/v2.0/logout");
        assert_eq!(query(&logout)["logout_hint"], "jane@contoso.com");
    });
}

#[test]
fn coordinator_signs_in_against_identity_platform() {
    block_on(async {
        let identity = MockServer::start().await;
        mount_code_exchange(&identity, "the-code", 1).await;
        let graph = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/photo/$value"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&graph)
            .await;

        let client = OidcClient::with_browser(
            settings(&identity, "http://127.0.0.1:0/"),
            SessionStore::in_memory(),
            ScriptedBrowser::following("the-code"),
        );
        let sink = Arc::new(RecordingSink::default());
        let coordinator = SessionCoordinator::new(
            Arc::new(client),
            graph_client(&graph),
            sink.clone(),
            SessionOptions::default(),
        );

        let outcome = coordinator.sign_in().await.expect("sign in");
        assert!(matches!(outcome, SignInOutcome::SignedIn(ref who) if who.display_name() == "Jane Doe"));
        assert!(sink.events().iter().any(|event| matches!(
            event,
            ViewEvent::Profile { email, .. } if email == "jane@contoso.com"
        )));
        assert!(sink.errors().is_empty());
    });
}

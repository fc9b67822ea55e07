// Session lifecycle: password login, token refresh, and expiry tracking.
//
// `SessionManager::ensure_valid` is the single entry point every outbound
// call goes through. The session lives behind an async mutex that is held
// across the login/refresh round-trip, so concurrent callers queue on the
// same attempt and observe its result instead of issuing their own.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::Endpoints;
use crate::error::Error;

/// Subtracted from every backend-reported token lifetime.
pub const SESSION_SAFETY_MARGIN: Duration = Duration::from_secs(120);

/// Millisecond wall clock used for expiry checks.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

// ── Credentials ─────────────────────────────────────────────────────

/// Account credentials, immutable for the lifetime of a manager.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
    /// Replaces the API key from [`Endpoints`] when set.
    pub api_key_override: Option<SecretString>,
}

// ── Session ─────────────────────────────────────────────────────────

/// An authenticated bearer token with its refresh token and expiry.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Account identifier the backend scopes device records under.
    pub subject_id: String,
    /// Expiry in epoch milliseconds, safety margin already applied.
    pub expires_at_ms: i64,
}

impl Session {
    /// Whether the session can still be used at `now_ms`.
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    id_token: Option<String>,
    refresh_token: Option<String>,
    local_id: Option<String>,
    expires_in: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: Option<String>,
    refresh_token: Option<String>,
    user_id: Option<String>,
    expires_in: Option<serde_json::Value>,
}

/// `{"error": {"code": 400, "message": "INVALID_PASSWORD"}}`
#[derive(Debug, Deserialize)]
struct AuthErrorBody {
    error: AuthErrorInner,
}

#[derive(Debug, Deserialize)]
struct AuthErrorInner {
    message: Option<String>,
}

/// Lifetimes arrive as either `"3600"` or `3600`.
fn parse_lifetime_secs(value: Option<&serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn require<T>(value: Option<T>, field: &'static str) -> Result<T, Error> {
    value.ok_or(Error::MissingField { field })
}

// ── SessionManager ──────────────────────────────────────────────────

/// Owns the credentials and the current [`Session`].
pub struct SessionManager {
    http: reqwest::Client,
    auth_url: Url,
    token_url: Url,
    api_key: SecretString,
    credentials: Credentials,
    session: Mutex<Option<Session>>,
    clock: Clock,
}

impl SessionManager {
    /// Create a manager. No network traffic happens until the first
    /// [`ensure_valid`](Self::ensure_valid).
    pub fn new(
        http: reqwest::Client,
        endpoints: &Endpoints,
        credentials: Credentials,
    ) -> Result<Self, Error> {
        let api_key = credentials
            .api_key_override
            .clone()
            .or_else(|| endpoints.api_key.clone())
            .ok_or(Error::MissingApiKey)?;

        Ok(Self {
            http,
            auth_url: endpoints.auth_url.clone(),
            token_url: endpoints.token_url.clone(),
            api_key,
            credentials,
            session: Mutex::new(None),
            clock: system_clock(),
        })
    }

    /// Replace the wall clock (tests drive expiry deterministically).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Return a session that is valid right now, logging in or refreshing
    /// as needed.
    ///
    /// A failed refresh falls back to exactly one full login; the refresh
    /// error itself is only logged.
    pub async fn ensure_valid(&self) -> Result<Session, Error> {
        let mut guard = self.session.lock().await;
        let now = (self.clock)();

        if let Some(session) = guard.as_ref() {
            if session.is_valid_at(now) {
                return Ok(session.clone());
            }
        }

        let refresh_token = guard.as_ref().map(|s| s.refresh_token.clone());
        let session = match refresh_token {
            Some(token) => match self.refresh(&token).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(error = %e, "token refresh failed, falling back to login");
                    self.login().await?
                }
            },
            None => self.login().await?,
        };

        *guard = Some(session.clone());
        Ok(session)
    }

    /// Snapshot of the stored session, valid or not.
    pub async fn current(&self) -> Option<Session> {
        self.session.lock().await.clone()
    }

    /// Force the next [`ensure_valid`](Self::ensure_valid) to renew the
    /// token. The refresh token is kept.
    pub async fn invalidate(&self) {
        if let Some(session) = self.session.lock().await.as_mut() {
            session.expires_at_ms = i64::MIN;
        }
    }

    /// Full password login.
    async fn login(&self) -> Result<Session, Error> {
        let url = self.endpoint(&self.auth_url, "accounts:signInWithPassword")?;
        debug!(email = %self.credentials.email, "logging in");

        let body = json!({
            "email": self.credentials.email,
            "password": self.credentials.password.expose_secret(),
            "returnSecureToken": true,
        });

        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let parsed: LoginResponse = Self::parse_auth_response(resp).await?;
        let lifetime = require(parse_lifetime_secs(parsed.expires_in.as_ref()), "expiresIn")?;
        let session = Session {
            access_token: SecretString::from(require(parsed.id_token, "idToken")?),
            refresh_token: SecretString::from(require(parsed.refresh_token, "refreshToken")?),
            subject_id: require(parsed.local_id, "localId")?,
            expires_at_ms: self.expiry_from(lifetime),
        };

        info!(subject = %session.subject_id, "login successful");
        Ok(session)
    }

    /// Exchange a refresh token for a new session.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<Session, Error> {
        let url = self.endpoint(&self.token_url, "token")?;
        debug!("refreshing session token");

        let resp = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
            ])
            .send()
            .await
            .map_err(Error::Transport)?;

        let parsed: RefreshResponse = Self::parse_auth_response(resp).await?;
        let lifetime = require(parse_lifetime_secs(parsed.expires_in.as_ref()), "expires_in")?;
        let session = Session {
            access_token: SecretString::from(require(parsed.id_token, "id_token")?),
            refresh_token: SecretString::from(require(parsed.refresh_token, "refresh_token")?),
            subject_id: require(parsed.user_id, "user_id")?,
            expires_at_ms: self.expiry_from(lifetime),
        };

        debug!(subject = %session.subject_id, "token refreshed");
        Ok(session)
    }

    fn expiry_from(&self, lifetime_secs: i64) -> i64 {
        let margin_ms = i64::try_from(SESSION_SAFETY_MARGIN.as_millis()).unwrap_or(i64::MAX);
        (self.clock)()
            .saturating_add(lifetime_secs.saturating_mul(1000))
            .saturating_sub(margin_ms)
    }

    /// `{base}/{action}?key={api_key}`. Built by hand because `Url::join`
    /// would read `accounts:` as a scheme.
    fn endpoint(&self, base: &Url, action: &str) -> Result<Url, Error> {
        let full = format!("{}/{action}", base.as_str().trim_end_matches('/'));
        let mut url = Url::parse(&full)?;
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }

    async fn parse_auth_response<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            let message = serde_json::from_str::<AuthErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or(body);
            return Err(Error::Authentication {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            warn!(status = status.as_u16(), error = %e, "undecodable auth response");
            Error::MalformedAuthResponse {
                message: e.to_string(),
            }
        })
    }
}

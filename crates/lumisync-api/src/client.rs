// Cloud REST client
//
// Wraps `reqwest::Client` with session-scoped URL construction and status
// handling for the device database: snapshot fetch, theme catalog, control
// PATCH, and opening the push event stream. Every call first obtains a
// valid token from the shared `SessionManager`.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::auth::{Credentials, Session, SessionManager};
use crate::error::Error;
use crate::stream::Connector;
use crate::transport::TransportConfig;

pub const DEFAULT_AUTH_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const DEFAULT_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";

/// Body stream handed to the event decoder.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

// ── Endpoints ───────────────────────────────────────────────────────

/// Backend base URLs and the project API key.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Password sign-in service.
    pub auth_url: Url,
    /// Refresh-token exchange service.
    pub token_url: Url,
    /// Realtime device database root.
    pub database_url: Url,
    /// Project API key. [`Credentials::api_key_override`] wins when set.
    pub api_key: Option<SecretString>,
}

impl Endpoints {
    /// Default auth services against the given database.
    pub fn new(database_url: Url) -> Result<Self, Error> {
        Ok(Self {
            auth_url: Url::parse(DEFAULT_AUTH_URL)?,
            token_url: Url::parse(DEFAULT_TOKEN_URL)?,
            database_url,
            api_key: None,
        })
    }
}

// ── Theme records ───────────────────────────────────────────────────

/// One entry of the remote theme catalog, as stored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThemeRecord {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub params: Vec<serde_json::Number>,
}

// ── CloudClient ─────────────────────────────────────────────────────

/// Raw HTTP client for the device database.
///
/// Returns untyped JSON payloads; the core crate owns the domain model.
pub struct CloudClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    database_url: Url,
    sessions: Arc<SessionManager>,
}

impl CloudClient {
    /// Build both HTTP clients from `transport` and a session manager for
    /// `credentials`.
    pub fn new(
        endpoints: &Endpoints,
        credentials: Credentials,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        let stream_http = transport.build_stream_client()?;
        let sessions = Arc::new(SessionManager::new(http.clone(), endpoints, credentials)?);
        Ok(Self::with_session_manager(
            http,
            stream_http,
            endpoints.database_url.clone(),
            sessions,
        ))
    }

    /// Assemble a client from pre-built parts.
    pub fn with_session_manager(
        http: reqwest::Client,
        stream_http: reqwest::Client,
        database_url: Url,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            http,
            stream_http,
            database_url,
            sessions,
        }
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{database}/{segments…}?auth={token}`; segments are percent-encoded.
    fn data_url(&self, session: &Session, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.database_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut()
            .append_pair("auth", session.access_token.expose_secret());
        Ok(url)
    }

    fn devices_url(&self, session: &Session) -> Result<Url, Error> {
        self.data_url(session, &["users", &session.subject_id, "devices.json"])
    }

    fn device_url(&self, session: &Session, device_id: &str) -> Result<Url, Error> {
        let leaf = format!("{device_id}.json");
        self.data_url(session, &["users", &session.subject_id, "devices", &leaf])
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Fetch the full device map. An empty database reads as `null` and
    /// comes back as an empty map.
    pub async fn fetch_devices(&self) -> Result<BTreeMap<String, serde_json::Value>, Error> {
        let session = self.sessions.ensure_valid().await?;
        let url = self.devices_url(&session)?;
        debug!(subject = %session.subject_id, "GET devices");

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        let devices: Option<BTreeMap<String, serde_json::Value>> = self.parse(resp).await?;
        Ok(devices.unwrap_or_default())
    }

    /// Fetch the theme catalog keyed by theme id. Records that do not
    /// decode are skipped with a warning.
    pub async fn fetch_themes(&self) -> Result<Vec<(String, ThemeRecord)>, Error> {
        let session = self.sessions.ensure_valid().await?;
        let url = self.data_url(&session, &["themes.json"])?;
        debug!("GET themes");

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        let raw: Option<BTreeMap<String, serde_json::Value>> = self.parse(resp).await?;

        Ok(raw
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(id, value)| match serde_json::from_value::<ThemeRecord>(value) {
                Ok(record) => Some((id, record)),
                Err(e) => {
                    warn!(theme = %id, error = %e, "skipping malformed theme record");
                    None
                }
            })
            .collect())
    }

    /// PATCH `body` onto one device record and return what the backend
    /// echoes back.
    pub async fn patch_device(
        &self,
        device_id: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        let session = self.sessions.ensure_valid().await?;
        let url = self.device_url(&session, device_id)?;
        debug!(device = %device_id, "PATCH device");

        let resp = self
            .http
            .patch(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;
        let updated: Option<serde_json::Value> = self.parse(resp).await?;
        Ok(updated.unwrap_or(serde_json::Value::Null))
    }

    /// Open the push stream on the device map.
    ///
    /// Checks the token first, so every reconnect re-validates the session.
    pub async fn open_event_stream(&self) -> Result<ByteStream, Error> {
        let session = self.sessions.ensure_valid().await?;
        let url = self.devices_url(&session)?;
        debug!(subject = %session.subject_id, "opening event stream");

        let resp = self
            .stream_http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(self.status_error(resp).await);
        }

        Ok(Box::pin(resp.bytes_stream().map(|r| r.map_err(Error::Transport))))
    }

    // ── Response helpers ─────────────────────────────────────────────

    async fn parse<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, Error> {
        if !resp.status().is_success() {
            return Err(self.status_error(resp).await);
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })
    }

    /// Turn a non-success response into [`Error::Http`]. A 401 also expires
    /// the cached token so the next call renews it.
    async fn status_error(&self, resp: reqwest::Response) -> Error {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.sessions.invalidate().await;
        }
        let body = resp.text().await.unwrap_or_default();
        Error::Http {
            status: status.as_u16(),
            body,
        }
    }
}

impl Connector for CloudClient {
    fn ensure_session(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move { self.sessions.ensure_valid().await.map(|_| ()) })
    }

    fn open(&self) -> BoxFuture<'_, Result<ByteStream, Error>> {
        Box::pin(self.open_event_stream())
    }
}

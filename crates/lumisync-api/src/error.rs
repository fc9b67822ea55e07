use thiserror::Error;

/// Top-level error type for the `lumisync-api` crate.
///
/// Covers every failure mode of the cloud surfaces: authentication,
/// transport, REST responses, and the push event stream.
/// `lumisync-core` maps these into engine-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login or token refresh rejected by the auth backend.
    #[error("Authentication failed (HTTP {status}): {message}")]
    Authentication { status: u16, message: String },

    /// A nominally successful auth response lacked a required field.
    #[error("Authentication response missing field `{field}`")]
    MissingField { field: &'static str },

    /// A 2xx auth response whose body could not be decoded.
    #[error("Malformed authentication response: {message}")]
    MalformedAuthResponse { message: String },

    /// No API key was configured and no override was supplied.
    #[error("No API key configured")]
    MissingApiKey,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status on a data request.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Stream ──────────────────────────────────────────────────────
    /// The event stream body ended without an error.
    #[error("Event stream ended")]
    StreamEnded,

    /// The operation was cancelled by its owner.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` for failures that a fresh login might resolve.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. }
                | Self::MissingField { .. }
                | Self::MalformedAuthResponse { .. }
        ) || matches!(self, Self::Http { status: 401 | 403, .. })
    }

    /// Returns `true` if this is a cancellation rather than a genuine failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Http { status: 404, .. } => true,
            _ => false,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. } | Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_distinguished() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::StreamEnded.is_cancelled());
    }

    #[test]
    fn auth_classification() {
        let err = Error::Authentication {
            status: 400,
            message: "INVALID_PASSWORD".into(),
        };
        assert!(err.is_auth());
        assert_eq!(err.status(), Some(400));
        assert!(
            Error::Http {
                status: 401,
                body: String::new()
            }
            .is_auth()
        );
        assert!(
            !Error::Http {
                status: 500,
                body: String::new()
            }
            .is_auth()
        );
    }
}

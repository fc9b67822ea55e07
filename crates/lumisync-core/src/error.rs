// ── Core error types ──
//
// Engine-facing errors from lumisync-core. Consumers never see raw reqwest
// errors or JSON bodies; the `From<lumisync_api::Error>` impl translates
// transport-layer failures into domain variants. The type is `Clone` so a
// single failed command can be handed to every coalesced waiter.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Session errors ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        message: String,
        status: Option<u16>,
    },

    #[error("No credentials configured")]
    NotConfigured,

    // ── Transport errors ─────────────────────────────────────────────
    #[error("Cannot reach cloud backend: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Request timed out")]
    Timeout,

    /// Non-success response on a direct request.
    #[error("Cloud request failed (HTTP {status}): {body}")]
    Transport { status: u16, body: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {id}")]
    DeviceNotFound { id: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Lifecycle ────────────────────────────────────────────────────
    /// The operation was torn down before it settled.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether this is a cancellation rather than a genuine failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<lumisync_api::Error> for CoreError {
    fn from(err: lumisync_api::Error) -> Self {
        use lumisync_api::Error as ApiError;

        match err {
            ApiError::Authentication { status, message } => CoreError::AuthenticationFailed {
                message,
                status: Some(status),
            },
            ApiError::MissingField { field } => CoreError::AuthenticationFailed {
                message: format!("auth response missing `{field}`"),
                status: None,
            },
            ApiError::MalformedAuthResponse { message } => CoreError::AuthenticationFailed {
                message: format!("malformed auth response: {message}"),
                status: None,
            },
            ApiError::MissingApiKey => CoreError::Config {
                message: "no API key configured".into(),
            },
            ApiError::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if let Some(status) = e.status() {
                    CoreError::Transport {
                        status: status.as_u16(),
                        body: e.to_string(),
                    }
                } else {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                }
            }
            ApiError::Http { status, body } => CoreError::Transport { status, body },
            ApiError::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            ApiError::Tls(msg) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            ApiError::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            ApiError::StreamEnded => CoreError::ConnectionFailed {
                reason: "event stream ended".into(),
            },
            ApiError::Cancelled => CoreError::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_maps_to_transport() {
        let err = CoreError::from(lumisync_api::Error::Http {
            status: 503,
            body: "overloaded".into(),
        });
        assert!(matches!(
            err,
            CoreError::Transport { status: 503, ref body } if body == "overloaded"
        ));
    }

    #[test]
    fn auth_status_is_preserved() {
        let err = CoreError::from(lumisync_api::Error::Authentication {
            status: 400,
            message: "EMAIL_NOT_FOUND".into(),
        });
        assert!(matches!(
            err,
            CoreError::AuthenticationFailed {
                status: Some(400),
                ..
            }
        ));
    }

    #[test]
    fn malformed_auth_response_is_an_auth_failure() {
        let err = CoreError::from(lumisync_api::Error::MalformedAuthResponse {
            message: "expected value at line 1 column 1".into(),
        });
        assert!(matches!(
            err,
            CoreError::AuthenticationFailed { status: None, ref message }
                if message.contains("expected value")
        ));
    }

    #[test]
    fn cancellation_survives_translation() {
        assert!(CoreError::from(lumisync_api::Error::Cancelled).is_cancelled());
    }
}

//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use lumisync_config::ConfigError;
use lumisync_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the cloud backend: {reason}")]
    #[diagnostic(
        code(lumisync::connection_failed),
        help("Check network access and the profile's database_url.")
    )]
    ConnectionFailed { reason: String },

    #[error("Cloud request failed (HTTP {status})")]
    #[diagnostic(code(lumisync::request_failed), help("Response body: {body}"))]
    Request { status: u16, body: String },

    #[error("Request timed out")]
    #[diagnostic(
        code(lumisync::timeout),
        help("Raise `timeout` in the profile or check backend responsiveness.")
    )]
    Timeout,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(lumisync::auth_failed),
        help(
            "Verify the email and password of profile '{profile}'.\n\
             The password is read from password_env, LUMISYNC_PASSWORD, the keyring, or the config file."
        )
    )]
    AuthFailed { profile: String, message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(lumisync::no_credentials),
        help("Set `email` in the profile and provide a password, e.g. via LUMISYNC_PASSWORD.")
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(lumisync::not_found),
        help("Run: lumisync snapshot to see what the account holds")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(lumisync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration could not be loaded: {source}")]
    #[diagnostic(
        code(lumisync::config),
        help("Expected a config file at: {path}")
    )]
    Config {
        #[source]
        source: ConfigError,
        path: String,
    },

    // ── Engine ───────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(lumisync::engine))]
    Engine(CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render JSON: {0}")]
    #[diagnostic(code(lumisync::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Request { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Config { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    /// Translate an engine error, naming the profile it ran under.
    pub fn from_core(err: CoreError, profile: &str) -> Self {
        match err {
            CoreError::AuthenticationFailed { message, .. } => Self::AuthFailed {
                profile: profile.into(),
                message,
            },
            CoreError::NotConfigured => Self::NoCredentials {
                profile: profile.into(),
            },
            CoreError::ConnectionFailed { reason } => Self::ConnectionFailed { reason },
            CoreError::Timeout => Self::Timeout,
            CoreError::Transport { status, body } => Self::Request { status, body },
            CoreError::DeviceNotFound { id } => Self::NotFound {
                resource_type: "device".into(),
                identifier: id,
            },
            CoreError::Config { message } => Self::Validation {
                field: "profile".into(),
                reason: message,
            },
            other => Self::Engine(other),
        }
    }
}

//! Shared configuration for lumisync.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `lumisync_core::EngineConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use lumisync_api::{Credentials, Endpoints, TlsMode};
use lumisync_core::EngineConfig;

const KEYRING_SERVICE: &str = "lumisync";

/// Env var consulted for the account password when a profile names none.
pub const PASSWORD_ENV: &str = "LUMISYNC_PASSWORD";

/// Env var consulted for the account email when a profile has none.
pub const EMAIL_ENV: &str = "LUMISYNC_EMAIL";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found in config")]
    UnknownProfile { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Pick a profile by name, falling back to `default_profile`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

/// One cloud account.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Account email.
    pub email: Option<String>,

    /// Password (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Web API key; overrides the one in the endpoints.
    pub api_key: Option<String>,

    /// Realtime database base URL.
    pub database_url: String,

    /// Override the identity service base URL.
    pub auth_url: Option<String>,

    /// Override the token refresh service base URL.
    pub token_url: Option<String>,

    /// Theme display names, in the order each device's theme group lists
    /// them.
    #[serde(default)]
    pub themes: Vec<String>,

    /// Pull refresh period in seconds; 0 disables it.
    pub refresh_interval_secs: Option<u64>,

    /// Request timeout in seconds.
    pub timeout: Option<u64>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Delay between stream reconnects, in milliseconds.
    pub reconnect_delay_ms: Option<u64>,

    /// Quiescence window for coalesced control writes, in milliseconds.
    pub coalesce_window_ms: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "lumisync", "lumisync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("lumisync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from an explicit file, merged with `LUMISYNC_`-prefixed env vars.
/// Nested keys use a double underscore: `LUMISYNC_PROFILES__HOME__EMAIL`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("LUMISYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the password: env var named by `password_env`, then
/// `LUMISYNC_PASSWORD`, then the system keyring, then plaintext.
fn resolve_password_with(
    profile: &Profile,
    profile_name: &str,
    env: &dyn Fn(&str) -> Option<String>,
) -> Option<SecretString> {
    // 1. Profile's password_env → env var lookup
    if let Some(pw) = profile.password_env.as_deref().and_then(env) {
        return Some(SecretString::from(pw));
    }

    // 2. Well-known env var
    if let Some(pw) = env(PASSWORD_ENV) {
        return Some(SecretString::from(pw));
    }

    // 3. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password")) {
        if let Ok(pw) = entry.get_password() {
            return Some(SecretString::from(pw));
        }
    }

    // 4. Plaintext in config
    profile.password.clone().map(SecretString::from)
}

/// Resolve account credentials. A profile without an email or password
/// yields `None`, which leaves the engine idle.
pub fn resolve_credentials(profile: &Profile, profile_name: &str) -> Option<Credentials> {
    resolve_credentials_with(profile, profile_name, &|name| std::env::var(name).ok())
}

fn resolve_credentials_with(
    profile: &Profile,
    profile_name: &str,
    env: &dyn Fn(&str) -> Option<String>,
) -> Option<Credentials> {
    let email = profile.email.clone().or_else(|| env(EMAIL_ENV))?;
    let password = resolve_password_with(profile, profile_name, env)?;
    Some(Credentials {
        email,
        password,
        api_key_override: None,
    })
}

// ── EngineConfig translation ────────────────────────────────────────

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

/// Build an `EngineConfig` from a profile.
pub fn profile_to_engine_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<EngineConfig, ConfigError> {
    build_engine_config(profile, resolve_credentials(profile, profile_name))
}

fn build_engine_config(
    profile: &Profile,
    credentials: Option<Credentials>,
) -> Result<EngineConfig, ConfigError> {
    let database_url = parse_url("database_url", &profile.database_url)?;
    let mut endpoints = Endpoints::new(database_url).map_err(|e| ConfigError::Validation {
        field: "database_url".into(),
        reason: e.to_string(),
    })?;
    if let Some(ref raw) = profile.auth_url {
        endpoints.auth_url = parse_url("auth_url", raw)?;
    }
    if let Some(ref raw) = profile.token_url {
        endpoints.token_url = parse_url("token_url", raw)?;
    }
    endpoints.api_key = profile.api_key.clone().map(SecretString::from);

    let mut config = EngineConfig::new(endpoints);
    config.credentials = credentials;
    config.themes.clone_from(&profile.themes);
    if let Some(secs) = profile.refresh_interval_secs {
        config.refresh_interval_secs = secs;
    }
    if let Some(secs) = profile.timeout {
        config.transport.timeout = Duration::from_secs(secs);
    }
    if let Some(ref ca_path) = profile.ca_cert {
        config.transport.tls = TlsMode::CustomCa(ca_path.clone());
    }
    if let Some(ms) = profile.reconnect_delay_ms {
        config.stream.reconnect_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = profile.coalesce_window_ms {
        config.coalesce_window = Duration::from_millis(ms);
    }
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn profile() -> Profile {
        Profile {
            email: Some("owner@example.com".into()),
            password: Some("plaintext".into()),
            database_url: "https://lights.example.com".into(),
            ..Profile::default()
        }
    }

    #[test]
    fn loads_profiles_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_profile = "home"

[profiles.home]
email = "owner@example.com"
database_url = "https://lights.example.com"
themes = ["Dancing Ocean", "Candle"]
refresh_interval_secs = 0
"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        let (name, home) = config.profile(None).unwrap();
        assert_eq!(name, "home");
        assert_eq!(home.themes, vec!["Dancing Ocean", "Candle"]);
        assert_eq!(home.refresh_interval_secs, Some(0));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert!(matches!(
            config.profile(Some("nope")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            default_profile: Some("work".into()),
            profiles: HashMap::from([("work".to_string(), profile())]),
        };
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let (_, work) = loaded.profile(None).unwrap();
        assert_eq!(work.email.as_deref(), Some("owner@example.com"));
    }

    #[test]
    fn password_env_wins_over_plaintext() {
        let mut p = profile();
        p.password_env = Some("HOME_LIGHTS_PW".into());
        let env = |name: &str| (name == "HOME_LIGHTS_PW").then(|| "from-env".to_string());

        let pw = resolve_password_with(&p, "lumisync-test-unset", &env).unwrap();
        assert_eq!(pw.expose_secret(), "from-env");
    }

    #[test]
    fn well_known_env_var_is_second() {
        let p = profile();
        let env = |name: &str| (name == PASSWORD_ENV).then(|| "global".to_string());

        let pw = resolve_password_with(&p, "lumisync-test-unset", &env).unwrap();
        assert_eq!(pw.expose_secret(), "global");
    }

    #[test]
    fn plaintext_is_the_last_resort() {
        let pw = resolve_password_with(&profile(), "lumisync-test-unset", &no_env).unwrap();
        assert_eq!(pw.expose_secret(), "plaintext");
    }

    #[test]
    fn missing_email_means_no_credentials() {
        let mut p = profile();
        p.email = None;
        assert!(resolve_credentials_with(&p, "lumisync-test-unset", &no_env).is_none());

        let env = |name: &str| (name == EMAIL_ENV).then(|| "env@example.com".to_string());
        let creds = resolve_credentials_with(&p, "lumisync-test-unset", &env).unwrap();
        assert_eq!(creds.email, "env@example.com");
    }

    #[test]
    fn profile_overrides_reach_engine_config() {
        let mut p = profile();
        p.auth_url = Some("https://auth.example.com/v1".into());
        p.api_key = Some("key-1".into());
        p.themes = vec!["Candle".into()];
        p.refresh_interval_secs = Some(60);
        p.timeout = Some(5);
        p.reconnect_delay_ms = Some(250);
        p.coalesce_window_ms = Some(75);

        let config = build_engine_config(&p, None).unwrap();
        assert!(config.credentials.is_none());
        assert_eq!(config.endpoints.auth_url.as_str(), "https://auth.example.com/v1");
        assert_eq!(
            config.endpoints.api_key.as_ref().map(|k| k.expose_secret().to_owned()),
            Some("key-1".to_string())
        );
        assert_eq!(config.themes, vec!["Candle".to_string()]);
        assert_eq!(config.refresh_interval_secs, 60);
        assert_eq!(config.transport.timeout, Duration::from_secs(5));
        assert_eq!(config.stream.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.coalesce_window, Duration::from_millis(75));
    }

    #[test]
    fn invalid_database_url_is_rejected() {
        let mut p = profile();
        p.database_url = "not a url".into();
        assert!(matches!(
            build_engine_config(&p, None),
            Err(ConfigError::Validation { field, .. }) if field == "database_url"
        ));
    }
}

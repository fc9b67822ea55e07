// ── Runtime engine configuration ──
//
// These types describe *how* to reach the cloud backend and which themes to
// track. They carry credential data and tuning, but never touch disk. The
// binary builds an `EngineConfig` from a profile and hands it in.

use std::time::Duration;

use lumisync_api::stream::StreamConfig;
use lumisync_api::{Credentials, Endpoints, TransportConfig};

use crate::coalesce::DEFAULT_QUIESCENCE_WINDOW;

/// Default period of the pull refresh, in seconds.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;

/// Configuration for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Account credentials. `None` keeps the engine idle: no snapshot,
    /// no stream.
    pub credentials: Option<Credentials>,
    pub endpoints: Endpoints,
    /// Ordered theme display names each device's theme group is built from.
    pub themes: Vec<String>,
    /// How often to re-pull the full snapshot (seconds). 0 = never.
    pub refresh_interval_secs: u64,
    pub transport: TransportConfig,
    pub stream: StreamConfig,
    /// Quiescence window for coalescers handed out by the engine.
    pub coalesce_window: Duration,
}

impl EngineConfig {
    /// Defaults for everything but the backend location.
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            credentials: None,
            endpoints,
            themes: Vec::new(),
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            transport: TransportConfig::default(),
            stream: StreamConfig::default(),
            coalesce_window: DEFAULT_QUIESCENCE_WINDOW,
        }
    }
}

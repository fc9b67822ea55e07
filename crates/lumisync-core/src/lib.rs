//! Sync engine between `lumisync-api` and consumers (daemon, automation
//! bindings).
//!
//! This crate owns the domain model and the reactive cache for one cloud
//! account:
//!
//! - **[`SyncEngine`]**: Central facade managing the full lifecycle:
//!   [`start()`](SyncEngine::start) authenticates, loads the device and theme
//!   snapshot, opens the push stream, and spawns the periodic refresh.
//!   Control writes go through [`send_control()`](SyncEngine::send_control)
//!   or a per-device [`CommandCoalescer`].
//!
//! - **[`DataStore`]**: Lock-free reactive storage built on
//!   `EntityCollection<T>` (`DashMap` + `tokio::sync::watch` channels) holding
//!   device mirrors and per-device theme groups.
//!
//! - **[`Reconciler`]**: Decides which tracked entities to create, update,
//!   or remove from a full snapshot or a single streamed delta.
//!
//! - **[`EntityStream<T>`]**: Subscription handle vended by the `DataStore`.
//!   Exposes `current()` / `latest()` / `changed()`.
//!
//! - **Domain model** ([`model`]): `DeviceState`, `Device`, and the theme
//!   catalog types.

pub mod coalesce;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use coalesce::{CommandCoalescer, ControlPatch, DEFAULT_QUIESCENCE_WINDOW, Intent};
pub use config::{DEFAULT_REFRESH_INTERVAL_SECS, EngineConfig};
pub use engine::{ConnectionState, EngineEvent, SyncEngine};
pub use error::CoreError;
pub use reconcile::{Action, Reconciler, Reconciliation};
pub use store::DataStore;
pub use stream::EntityStream;

pub use model::{Device, DeviceState, ThemeCatalog, ThemeDefinition, ThemeGroup};

// ── Sync engine ──
//
// Full lifecycle for one cloud account: initial snapshot, push stream with
// fixed-delay reconnect, periodic pull refresh, reconciliation of tracked
// entities, and control dispatch. Cache mutation is serialized behind the
// reconciler lock; the stream's dispatch task and snapshot refreshes are
// the only writers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use lumisync_api::CloudClient;
use lumisync_api::stream::{EntityUpdate, StreamEvent, StreamSession, StreamState};
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coalesce::{CommandCoalescer, ControlPatch};
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::model::{Device, DeviceState, ThemeCatalog, ThemeGroup};
use crate::reconcile::{Action, Reconciler};
use crate::store::DataStore;
use crate::stream::EntityStream;

const EVENT_CHANNEL_SIZE: usize = 256;

// ── ConnectionState ──────────────────────────────────────────────

/// Stream connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
    Closed,
}

impl From<StreamState> for ConnectionState {
    fn from(state: StreamState) -> Self {
        match state {
            StreamState::Connecting => Self::Connecting,
            StreamState::Streaming => Self::Streaming,
            StreamState::Reconnecting { .. } => Self::Reconnecting,
            StreamState::Closed => Self::Closed,
        }
    }
}

// ── EngineEvent ──────────────────────────────────────────────────

/// Change notifications for the binding layer.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    DeviceUpdated(Arc<Device>),
    DeviceRemoved { id: String },
    ThemeGroupChanged(Arc<ThemeGroup>),
    ThemeGroupRemoved { device_id: String },
}

// ── SyncEngine ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<EngineInner>`. Owns the session, the device
/// cache, and the single active stream subscription.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    /// `None` when no credentials are configured.
    client: Option<Arc<CloudClient>>,
    store: Arc<DataStore>,
    reconciler: Mutex<Reconciler>,
    catalog: ArcSwap<ThemeCatalog>,
    connection_state: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,
    /// Child token for the current run, replaced on every `start`.
    cancel_child: Mutex<CancellationToken>,
    stream: Mutex<Option<ActiveStream>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    warned_unconfigured: AtomicBool,
}

/// The running stream subscription and the task draining it.
struct ActiveStream {
    session: StreamSession,
    cancel: CancellationToken,
    dispatch: JoinHandle<()>,
}

impl SyncEngine {
    /// Create an engine. Does NOT touch the network; call
    /// [`start()`](Self::start) to load the snapshot and open the stream.
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        let client = match &config.credentials {
            Some(credentials) => Some(Arc::new(CloudClient::new(
                &config.endpoints,
                credentials.clone(),
                &config.transport,
            )?)),
            None => None,
        };

        let (connection_state, _) = watch::channel(ConnectionState::Idle);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Ok(Self {
            inner: Arc::new(EngineInner {
                reconciler: Mutex::new(Reconciler::new(config.themes.clone())),
                config,
                client,
                store: Arc::new(DataStore::new()),
                catalog: ArcSwap::from_pointee(ThemeCatalog::default()),
                connection_state,
                event_tx,
                cancel,
                cancel_child: Mutex::new(cancel_child),
                stream: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
                warned_unconfigured: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    pub fn is_configured(&self) -> bool {
        self.inner.client.is_some()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Load the snapshot, open the push stream, and spawn the periodic
    /// refresh.
    ///
    /// Without credentials this logs once and returns `Ok` with the engine
    /// left idle.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.client.is_none() {
            if !self.inner.warned_unconfigured.swap(true, Ordering::Relaxed) {
                warn!("no credentials configured, cloud sync disabled");
            }
            return Ok(());
        }

        self.inner
            .connection_state
            .send_replace(ConnectionState::Connecting);

        let child = self.inner.cancel.child_token();
        {
            let mut current = self.inner.cancel_child.lock().await;
            current.cancel();
            *current = child.clone();
        }

        if let Err(e) = self.full_refresh().await {
            self.inner.connection_state.send_replace(ConnectionState::Idle);
            return Err(e);
        }

        self.start_stream().await?;

        let interval_secs = self.inner.config.refresh_interval_secs;
        if interval_secs > 0 {
            let engine = self.clone();
            let cancel = child.clone();
            self.inner
                .task_handles
                .lock()
                .await
                .push(tokio::spawn(refresh_task(engine, interval_secs, cancel)));
        }

        info!(
            devices = self.inner.store.device_count(),
            theme_groups = self.inner.store.theme_group_count(),
            "sync engine started"
        );
        Ok(())
    }

    /// Open a new stream subscription, cancelling any previous one first.
    pub async fn start_stream(&self) -> Result<(), CoreError> {
        let client = self.client()?;
        let mut slot = self.inner.stream.lock().await;

        if let Some(previous) = slot.take() {
            debug!("replacing active stream subscription");
            previous.cancel.cancel();
            previous.session.shutdown().await;
            join_task("stream dispatch", previous.dispatch).await;
        }

        let cancel = self.inner.cancel_child.lock().await.child_token();
        let (tx, rx) = mpsc::unbounded_channel();
        let session = StreamSession::start(client, self.inner.config.stream.clone(), tx);
        let dispatch = tokio::spawn(dispatch_task(self.clone(), rx, cancel.clone()));

        *slot = Some(ActiveStream {
            session,
            cancel,
            dispatch,
        });
        Ok(())
    }

    /// Cancel the stream and background tasks and wait for them to exit.
    /// Safe to call when nothing is running.
    pub async fn stop(&self) {
        self.inner.cancel_child.lock().await.cancel();

        let active = self.inner.stream.lock().await.take();
        if let Some(active) = active {
            active.session.shutdown().await;
            join_task("stream dispatch", active.dispatch).await;
        }

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            join_task("background refresh", handle).await;
        }

        self.inner
            .connection_state
            .send_replace(ConnectionState::Closed);
        debug!("sync engine stopped");
    }

    /// Re-fetch the device map and theme catalog and reconcile against
    /// them. Errors surface to the caller.
    pub async fn full_refresh(&self) -> Result<(), CoreError> {
        let client = self.client()?;
        let (devices, themes) = tokio::try_join!(client.fetch_devices(), client.fetch_themes())?;

        let catalog = Arc::new(ThemeCatalog::from_records(&themes));
        self.inner.catalog.store(Arc::clone(&catalog));

        let devices: BTreeMap<String, Value> = devices
            .into_iter()
            .filter(|(id, payload)| {
                let keep = payload.is_object();
                if !keep {
                    warn!(device = %id, "ignoring non-object device record");
                }
                keep
            })
            .collect();

        let mut reconciler = self.inner.reconciler.lock().await;
        let result = reconciler.reconcile_snapshot(&devices, &catalog);
        let mut states: BTreeMap<String, DeviceState> = devices
            .into_iter()
            .filter_map(|(id, payload)| DeviceState::from_value(payload).map(|s| (id, s)))
            .collect();
        self.apply_actions(result.actions, &mut states);
        drop(reconciler);

        self.inner.store.mark_full_refresh();
        info!(
            devices = self.inner.store.device_count(),
            themes = catalog.len(),
            "full refresh complete"
        );
        Ok(())
    }

    // ── Control ──────────────────────────────────────────────────

    /// PATCH `body` onto a device record. The backend's echo is merged into
    /// the cache right away, ahead of the stream delta.
    pub async fn send_control(&self, id: &str, body: Value) -> Result<DeviceState, CoreError> {
        let client = self.client()?;
        let echoed = client.patch_device(id, &body).await.map_err(|e| {
            if e.is_not_found() {
                CoreError::DeviceNotFound { id: id.to_owned() }
            } else {
                CoreError::from(e)
            }
        })?;

        let _serialized = self.inner.reconciler.lock().await;
        let cached = self.inner.store.device(id);
        let mut state = cached
            .as_ref()
            .map(|d| d.state.clone())
            .unwrap_or_default();
        if !state.merge(&echoed) {
            state.merge(&body);
        }

        if cached.is_some() {
            let device = self.inner.store.upsert_device(id.to_owned(), state.clone());
            let _ = self.inner.event_tx.send(EngineEvent::DeviceUpdated(device));
        }
        Ok(state)
    }

    /// Write a raw control directive.
    pub async fn send_directive(&self, id: &str, directive: &str) -> Result<DeviceState, CoreError> {
        self.send_control(id, json!({ "controlData": directive }))
            .await
    }

    pub async fn set_power(&self, id: &str, on: bool) -> Result<DeviceState, CoreError> {
        self.send_control(id, json!({ "on": on })).await
    }

    pub async fn set_brightness(&self, id: &str, level: u32) -> Result<DeviceState, CoreError> {
        self.send_control(id, json!({ "brightness": level })).await
    }

    /// A coalescer that folds rapid [`ControlPatch`]es for one device into
    /// a single [`send_control`](Self::send_control).
    pub fn coalescer(&self, id: &str) -> CommandCoalescer<ControlPatch, DeviceState> {
        let engine = self.clone();
        let id = id.to_owned();
        CommandCoalescer::with_window(self.inner.config.coalesce_window, move |patch: ControlPatch| {
            let engine = engine.clone();
            let id = id.clone();
            async move { engine.send_control(&id, patch.into_value()).await }
        })
    }

    // ── State observation ────────────────────────────────────────

    /// Every cached device state keyed by id.
    pub fn get_snapshot(&self) -> BTreeMap<String, DeviceState> {
        self.inner.store.device_states()
    }

    pub fn devices(&self) -> EntityStream<Device> {
        self.inner.store.subscribe_devices()
    }

    pub fn theme_groups(&self) -> EntityStream<ThemeGroup> {
        self.inner.store.subscribe_theme_groups()
    }

    /// The catalog loaded by the most recent refresh.
    pub fn catalog(&self) -> Arc<ThemeCatalog> {
        self.inner.catalog.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    // ── Stream dispatch ──────────────────────────────────────────

    async fn handle_stream_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::State(state) => {
                let state = ConnectionState::from(state);
                debug!(%state, "stream state changed");
                self.inner.connection_state.send_replace(state);
            }
            StreamEvent::BeforeReconnect => {
                info!("refreshing snapshot before reconnect");
                if let Err(e) = self.full_refresh().await {
                    warn!(error = %e, "pre-reconnect refresh failed");
                }
            }
            StreamEvent::Update(update) => {
                self.inner.store.mark_stream_event();
                self.apply_update(update).await;
            }
            StreamEvent::Error(e) => {
                debug!(error = %e, "stream terminated, reconnect scheduled");
            }
        }
    }

    async fn apply_update(&self, update: EntityUpdate) {
        let catalog = self.inner.catalog.load_full();
        let mut reconciler = self.inner.reconciler.lock().await;

        match update {
            EntityUpdate::Delete { id } => {
                let result = reconciler.reconcile_delta(&id, None, &catalog);
                self.apply_actions(result.actions, &mut BTreeMap::new());
            }
            EntityUpdate::Replace { id, payload } => {
                if !payload.is_object() {
                    warn!(device = %id, "ignoring non-object device payload");
                    return;
                }
                let result = reconciler.reconcile_delta(&id, Some(&payload), &catalog);
                let mut states: BTreeMap<String, DeviceState> = DeviceState::from_value(payload)
                    .map(|state| (id, state))
                    .into_iter()
                    .collect();
                self.apply_actions(result.actions, &mut states);
            }
            EntityUpdate::Merge { id, payload } => {
                let mut state = self
                    .inner
                    .store
                    .device(&id)
                    .map(|d| d.state.clone())
                    .unwrap_or_default();
                if !state.merge(&payload) {
                    warn!(device = %id, "ignoring non-object partial update");
                    return;
                }
                let result = reconciler.reconcile_delta(&id, Some(&payload), &catalog);
                self.apply_actions(result.actions, &mut BTreeMap::from([(id, state)]));
            }
        }
    }

    /// Apply reconciliation actions to the store and broadcast what changed.
    /// `states` supplies the new state for every device upsert.
    fn apply_actions(&self, actions: Vec<Action>, states: &mut BTreeMap<String, DeviceState>) {
        let store = &self.inner.store;
        for action in actions {
            let event = match action {
                Action::UpsertDevice { id } => {
                    let Some(state) = states.remove(&id) else {
                        continue;
                    };
                    if store.device(&id).is_some_and(|d| d.state == state) {
                        continue;
                    }
                    EngineEvent::DeviceUpdated(store.upsert_device(id, state))
                }
                Action::RemoveDevice { id } => {
                    store.remove_device(&id);
                    debug!(device = %id, "device removed");
                    EngineEvent::DeviceRemoved { id }
                }
                Action::UpsertThemeGroup { device_id, themes } => {
                    if store
                        .theme_group(&device_id)
                        .is_some_and(|g| g.themes == themes)
                    {
                        continue;
                    }
                    EngineEvent::ThemeGroupChanged(
                        store.upsert_theme_group(ThemeGroup { device_id, themes }),
                    )
                }
                Action::RemoveThemeGroup { device_id } => {
                    store.remove_theme_group(&device_id);
                    EngineEvent::ThemeGroupRemoved { device_id }
                }
            };
            let _ = self.inner.event_tx.send(event);
        }
    }

    fn client(&self) -> Result<Arc<CloudClient>, CoreError> {
        self.inner.client.clone().ok_or(CoreError::NotConfigured)
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Drain the stream session's channel in order.
async fn dispatch_task(
    engine: SyncEngine,
    mut rx: mpsc::UnboundedReceiver<StreamEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                engine.handle_stream_event(event).await;
            }
        }
    }
}

/// Periodically re-pull the snapshot.
async fn refresh_task(engine: SyncEngine, interval_secs: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = engine.full_refresh().await {
                    warn!(error = %e, "periodic refresh failed");
                }
            }
        }
    }
}

/// Await a background task, surfacing a panic instead of dropping it.
async fn join_task(task: &'static str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        log_join_error(task, &e);
    }
}

fn log_join_error(task: &'static str, err: &JoinError) {
    if err.is_panic() {
        warn!(task, error = %err, "background task panicked");
    } else {
        debug!(task, "background task cancelled");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lumisync_api::Endpoints;
    use pretty_assertions::assert_eq;
    use url::Url;

    use super::*;
    use crate::model::ThemeDefinition;

    fn idle_engine(themes: &[&str]) -> SyncEngine {
        let endpoints = Endpoints::new(Url::parse("https://example.invalid/").unwrap()).unwrap();
        let mut config = EngineConfig::new(endpoints);
        config.themes = themes.iter().map(|t| (*t).to_owned()).collect();
        SyncEngine::new(config).unwrap()
    }

    fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn unconfigured_engine_stays_idle() {
        let engine = idle_engine(&[]);
        assert!(!engine.is_configured());
        engine.start().await.unwrap();
        engine.start().await.unwrap();
        assert_eq!(*engine.connection_state().borrow(), ConnectionState::Idle);
        assert!(matches!(
            engine.full_refresh().await,
            Err(CoreError::NotConfigured)
        ));
        engine.stop().await;
        assert_eq!(*engine.connection_state().borrow(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn merge_preserves_cached_fields() {
        let engine = idle_engine(&[]);
        engine
            .apply_update(EntityUpdate::Replace {
                id: "A".into(),
                payload: json!({ "on": true, "name": "Porch", "zone": 2 }),
            })
            .await;
        engine
            .apply_update(EntityUpdate::Merge {
                id: "A".into(),
                payload: json!({ "controlData": "LEDON" }),
            })
            .await;

        let snapshot = engine.get_snapshot();
        assert_eq!(
            snapshot["A"].to_value(),
            json!({ "on": true, "name": "Porch", "zone": 2, "controlData": "LEDON" })
        );
    }

    #[tokio::test]
    async fn replace_drops_fields_missing_from_payload() {
        let engine = idle_engine(&[]);
        for payload in [json!({ "on": true, "brightness": 30 }), json!({ "on": false })] {
            engine
                .apply_update(EntityUpdate::Replace {
                    id: "A".into(),
                    payload,
                })
                .await;
        }
        assert_eq!(engine.get_snapshot()["A"].to_value(), json!({ "on": false }));
    }

    #[tokio::test]
    async fn deletion_cascades_to_theme_group() {
        let engine = idle_engine(&["Dancing Ocean"]);
        engine.inner.catalog.store(Arc::new(ThemeCatalog::new([
            ThemeDefinition::new("x", "Dancing Ocean", "THEME:4"),
        ])));
        let mut events = engine.subscribe();

        engine
            .apply_update(EntityUpdate::Replace {
                id: "A".into(),
                payload: json!({ "on": true }),
            })
            .await;
        assert!(engine.store().theme_group("A").is_some());

        engine
            .apply_update(EntityUpdate::Delete { id: "A".into() })
            .await;
        assert!(engine.get_snapshot().is_empty());
        assert!(engine.store().theme_group("A").is_none());

        let events = drain(&mut events);
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], EngineEvent::DeviceUpdated(d) if d.id == "A"));
        assert!(matches!(&events[1], EngineEvent::ThemeGroupChanged(g) if g.themes.len() == 1));
        assert!(matches!(&events[2], EngineEvent::DeviceRemoved { id } if id == "A"));
        assert!(matches!(&events[3], EngineEvent::ThemeGroupRemoved { device_id } if device_id == "A"));
    }

    #[tokio::test]
    async fn unchanged_state_is_not_rebroadcast() {
        let engine = idle_engine(&[]);
        let mut events = engine.subscribe();
        for _ in 0..2 {
            engine
                .apply_update(EntityUpdate::Replace {
                    id: "A".into(),
                    payload: json!({ "on": true }),
                })
                .await;
        }
        assert_eq!(drain(&mut events).len(), 1);
    }

    #[tokio::test]
    async fn non_object_updates_are_ignored() {
        let engine = idle_engine(&[]);
        engine
            .apply_update(EntityUpdate::Replace {
                id: "A".into(),
                payload: json!("garbage"),
            })
            .await;
        engine
            .apply_update(EntityUpdate::Merge {
                id: "B".into(),
                payload: json!(7),
            })
            .await;
        assert!(engine.get_snapshot().is_empty());
    }

    #[test]
    fn stream_states_map_to_connection_states() {
        assert_eq!(
            ConnectionState::from(StreamState::Reconnecting {
                delay: Duration::from_secs(5)
            }),
            ConnectionState::Reconnecting
        );
        assert_eq!(ConnectionState::Streaming.to_string(), "Streaming");
    }

    #[tokio::test]
    async fn panicked_task_is_joined_without_propagating() {
        let handle: JoinHandle<()> = tokio::spawn(async { panic!("dispatch blew up") });
        join_task("stream dispatch", handle).await;

        let aborted = tokio::spawn(std::future::pending::<()>());
        aborted.abort();
        join_task("background refresh", aborted).await;
    }
}

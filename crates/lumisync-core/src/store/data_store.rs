// ── Central reactive data store ──
//
// Thread-safe storage for device mirrors and theme groups. Mutations are
// broadcast to subscribers via `watch` channels. The engine's dispatch path
// and snapshot refresh are the only writers.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::collection::EntityCollection;
use crate::model::{Device, DeviceState, ThemeGroup};
use crate::stream::EntityStream;

/// Reactive store for every tracked entity.
pub struct DataStore {
    pub(crate) devices: EntityCollection<Device>,
    pub(crate) theme_groups: EntityCollection<ThemeGroup>,
    pub(crate) last_full_refresh: watch::Sender<Option<DateTime<Utc>>>,
    pub(crate) last_stream_event: watch::Sender<Option<DateTime<Utc>>>,
}

impl DataStore {
    pub fn new() -> Self {
        let (last_full_refresh, _) = watch::channel(None);
        let (last_stream_event, _) = watch::channel(None);

        Self {
            devices: EntityCollection::new(),
            theme_groups: EntityCollection::new(),
            last_full_refresh,
            last_stream_event,
        }
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    /// Every cached device state keyed by id.
    pub fn device_states(&self) -> BTreeMap<String, DeviceState> {
        self.devices
            .snapshot()
            .iter()
            .map(|d| (d.id.clone(), d.state.clone()))
            .collect()
    }

    // ── Single-entity lookups ────────────────────────────────────────

    pub fn device(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.get(id)
    }

    pub fn theme_group(&self, device_id: &str) -> Option<Arc<ThemeGroup>> {
        self.theme_groups.get(device_id)
    }

    pub fn has_device(&self, id: &str) -> bool {
        self.devices.contains(id)
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.keys()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn theme_group_count(&self) -> usize {
        self.theme_groups.len()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_devices(&self) -> EntityStream<Device> {
        EntityStream::new(self.devices.subscribe())
    }

    pub fn subscribe_theme_groups(&self) -> EntityStream<ThemeGroup> {
        EntityStream::new(self.theme_groups.subscribe())
    }

    // ── Freshness ────────────────────────────────────────────────────

    pub fn last_full_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_full_refresh.borrow()
    }

    pub fn last_stream_event(&self) -> Option<DateTime<Utc>> {
        *self.last_stream_event.borrow()
    }

    // ── Mutation (engine only) ───────────────────────────────────────

    pub(crate) fn upsert_device(&self, id: String, state: DeviceState) -> Arc<Device> {
        let device = Device {
            id: id.clone(),
            state,
        };
        self.devices.upsert(id, device).0
    }

    pub(crate) fn remove_device(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.remove(id)
    }

    pub(crate) fn upsert_theme_group(&self, group: ThemeGroup) -> Arc<ThemeGroup> {
        self.theme_groups.upsert(group.device_id.clone(), group).0
    }

    pub(crate) fn remove_theme_group(&self, device_id: &str) -> Option<Arc<ThemeGroup>> {
        self.theme_groups.remove(device_id)
    }

    pub(crate) fn mark_full_refresh(&self) {
        self.last_full_refresh.send_replace(Some(Utc::now()));
    }

    pub(crate) fn mark_stream_event(&self) {
        self.last_stream_event.send_replace(Some(Utc::now()));
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ThemeDefinition;
    use serde_json::json;

    #[test]
    fn device_states_are_keyed_by_id() {
        let store = DataStore::new();
        let on = DeviceState::from_value(json!({ "on": true })).unwrap_or_default();
        store.upsert_device("b".into(), DeviceState::default());
        store.upsert_device("a".into(), on.clone());

        let states = store.device_states();
        assert_eq!(states.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(states.get("a"), Some(&on));
        assert_eq!(store.device_ids(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn theme_groups_are_keyed_by_device() {
        let store = DataStore::new();
        store.upsert_theme_group(ThemeGroup {
            device_id: "a".into(),
            themes: vec![ThemeDefinition::new("t", "Glow", "G")],
        });
        assert!(store.theme_group("a").is_some());
        assert!(store.remove_theme_group("a").is_some());
        assert_eq!(store.theme_group_count(), 0);
    }

    #[test]
    fn freshness_marks_are_recorded() {
        let store = DataStore::new();
        assert!(store.last_full_refresh().is_none());
        store.mark_full_refresh();
        store.mark_stream_event();
        assert!(store.last_full_refresh().is_some());
        assert!(store.last_stream_event().is_some());
    }
}

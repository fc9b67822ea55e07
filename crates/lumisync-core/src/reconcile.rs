// ── Entity reconciliation ──
//
// Decides which tracked entities (device mirrors and per-device theme
// groups) must be created, updated, or removed, given either a full
// snapshot or a single streamed delta. The reconciler only decides
// membership; applying state is the engine's job.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{ThemeCatalog, ThemeDefinition};

/// One membership decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    UpsertDevice {
        id: String,
    },
    RemoveDevice {
        id: String,
    },
    UpsertThemeGroup {
        device_id: String,
        themes: Vec<ThemeDefinition>,
    },
    RemoveThemeGroup {
        device_id: String,
    },
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub actions: Vec<Action>,
    /// Configured theme names the catalog did not know.
    pub unresolved: Vec<String>,
}

/// Tracks entity membership across snapshots and deltas.
#[derive(Debug, Default)]
pub struct Reconciler {
    theme_names: Vec<String>,
    devices: BTreeSet<String>,
    /// Device id → ids of the themes its group currently carries.
    groups: BTreeMap<String, Vec<String>>,
    /// Unresolved names already logged, so each is reported once.
    reported: HashSet<String>,
}

impl Reconciler {
    /// `theme_names` is the ordered list of display names every device's
    /// theme group is built from.
    pub fn new(theme_names: Vec<String>) -> Self {
        Self {
            theme_names,
            ..Self::default()
        }
    }

    /// Reconcile a full snapshot. Every present id is upserted; every
    /// tracked id the snapshot lacks is removed along with its theme group.
    pub fn reconcile_snapshot(
        &mut self,
        devices: &BTreeMap<String, Value>,
        catalog: &ThemeCatalog,
    ) -> Reconciliation {
        let (themes, unresolved) = self.resolve(catalog);
        let mut actions = Vec::new();

        let stale: Vec<String> = self
            .devices
            .iter()
            .filter(|id| !devices.contains_key(*id))
            .cloned()
            .collect();
        for id in &stale {
            self.remove_device(id, &mut actions);
        }

        for id in devices.keys() {
            self.upsert_device(id, &themes, true, &mut actions);
        }

        debug!(
            devices = devices.len(),
            removed = stale.len(),
            groups = self.groups.len(),
            "snapshot reconciled"
        );
        Reconciliation {
            actions,
            unresolved,
        }
    }

    /// Reconcile one streamed delta. `None` is a deletion and cascades to
    /// the device's theme group. A group upsert is only emitted when the
    /// device's resolved themes changed.
    pub fn reconcile_delta(
        &mut self,
        id: &str,
        payload: Option<&Value>,
        catalog: &ThemeCatalog,
    ) -> Reconciliation {
        let mut actions = Vec::new();
        if payload.is_none() {
            self.remove_device(id, &mut actions);
            return Reconciliation {
                actions,
                unresolved: Vec::new(),
            };
        }

        let (themes, unresolved) = self.resolve(catalog);
        self.upsert_device(id, &themes, false, &mut actions);
        Reconciliation {
            actions,
            unresolved,
        }
    }

    pub fn tracked_devices(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(String::as_str)
    }

    pub fn has_theme_group(&self, device_id: &str) -> bool {
        self.groups.contains_key(device_id)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn resolve(&mut self, catalog: &ThemeCatalog) -> (Vec<ThemeDefinition>, Vec<String>) {
        let (themes, unresolved) = catalog.resolve(&self.theme_names);
        for name in &unresolved {
            if self.reported.insert(name.clone()) {
                warn!(theme = %name, "configured theme not found in catalog");
            }
        }
        (themes, unresolved)
    }

    fn upsert_device(
        &mut self,
        id: &str,
        themes: &[ThemeDefinition],
        always_emit_group: bool,
        actions: &mut Vec<Action>,
    ) {
        self.devices.insert(id.to_owned());
        actions.push(Action::UpsertDevice { id: id.to_owned() });

        if themes.is_empty() {
            if self.groups.remove(id).is_some() {
                actions.push(Action::RemoveThemeGroup {
                    device_id: id.to_owned(),
                });
            }
            return;
        }

        let theme_ids: Vec<String> = themes.iter().map(|t| t.id.clone()).collect();
        let changed = self.groups.get(id) != Some(&theme_ids);
        if changed || always_emit_group {
            actions.push(Action::UpsertThemeGroup {
                device_id: id.to_owned(),
                themes: themes.to_vec(),
            });
        }
        self.groups.insert(id.to_owned(), theme_ids);
    }

    fn remove_device(&mut self, id: &str, actions: &mut Vec<Action>) {
        if self.devices.remove(id) {
            actions.push(Action::RemoveDevice { id: id.to_owned() });
        }
        if self.groups.remove(id).is_some() {
            actions.push(Action::RemoveThemeGroup {
                device_id: id.to_owned(),
            });
        }
    }
}

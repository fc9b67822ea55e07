// ── Path inflation ──
//
// Turns a `(path, data)` mutation into per-entity updates. The root path
// fans out into one full replacement per key; any deeper path rebuilds a
// partial object that is merged into the entity, never replacing it.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::warn;

const ROOT: &str = "/";

/// Result of inflating one mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum InflatedPatch {
    /// Root write: entity id → full payload, or `None` for deletion.
    RootFanout(BTreeMap<String, Option<Value>>),
    /// Partial object to overlay onto the entity's cached state.
    EntityMerge { id: String, payload: Value },
    /// The entity is gone.
    EntityDelete { id: String },
}

/// A single entity-level update, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityUpdate {
    /// Replace the cached state wholesale.
    Replace { id: String, payload: Value },
    /// Shallow-overlay `payload` onto the cached state.
    Merge { id: String, payload: Value },
    /// Remove the entity.
    Delete { id: String },
}

impl EntityUpdate {
    pub fn id(&self) -> &str {
        match self {
            Self::Replace { id, .. } | Self::Merge { id, .. } | Self::Delete { id } => id,
        }
    }
}

impl InflatedPatch {
    /// Flatten into entity updates in key order.
    pub fn into_updates(self) -> Vec<EntityUpdate> {
        match self {
            Self::RootFanout(entries) => entries
                .into_iter()
                .map(|(id, payload)| match payload {
                    Some(payload) => EntityUpdate::Replace { id, payload },
                    None => EntityUpdate::Delete { id },
                })
                .collect(),
            Self::EntityMerge { id, payload } => vec![EntityUpdate::Merge { id, payload }],
            Self::EntityDelete { id } => vec![EntityUpdate::Delete { id }],
        }
    }
}

fn decode_id(raw: &str) -> String {
    urlencoding::decode(raw).map_or_else(|_| raw.to_owned(), std::borrow::Cow::into_owned)
}

/// Inflate `data` written at `path`.
///
/// Returns `None` for writes that name no entity: a root write that is not
/// an object, or a path whose first segment is empty.
pub fn inflate(path: &str, data: Value) -> Option<InflatedPatch> {
    if path == ROOT || path.is_empty() {
        return match data {
            Value::Object(entries) => Some(InflatedPatch::RootFanout(
                entries
                    .into_iter()
                    .map(|(key, value)| {
                        let payload = (!value.is_null()).then_some(value);
                        (decode_id(&key), payload)
                    })
                    .collect(),
            )),
            other => {
                warn!(kind = json_kind(&other), "ignoring non-object root write");
                None
            }
        };
    }

    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let mut segments = trimmed.split('/').filter(|s| !s.is_empty());
    let id = decode_id(segments.next()?);

    if data.is_null() {
        return Some(InflatedPatch::EntityDelete { id });
    }

    let field_path: Vec<&str> = segments.collect();
    let payload = field_path.iter().rev().fold(data, |inner, segment| {
        let mut wrapper = Map::new();
        wrapper.insert(decode_id(segment), inner);
        Value::Object(wrapper)
    });

    Some(InflatedPatch::EntityMerge { id, payload })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn root_fanout_updates_and_deletes() {
        let patch = inflate("/", json!({"A": {"on": true}, "B": null}));
        let updates = patch.map(InflatedPatch::into_updates).unwrap_or_default();
        assert_eq!(
            updates,
            vec![
                EntityUpdate::Replace {
                    id: "A".into(),
                    payload: json!({"on": true}),
                },
                EntityUpdate::Delete { id: "B".into() },
            ]
        );
    }

    #[test]
    fn root_keys_are_percent_decoded() {
        let patch = inflate("/", json!({"dev%2F1": {"name": "Porch"}}));
        let Some(InflatedPatch::RootFanout(entries)) = patch else {
            panic!("expected fan-out, got {patch:?}");
        };
        assert!(entries.contains_key("dev/1"));
    }

    #[test]
    fn nested_path_rewraps_leaf() {
        let patch = inflate("/A/controlData", json!("LEDON"));
        assert_eq!(
            patch,
            Some(InflatedPatch::EntityMerge {
                id: "A".into(),
                payload: json!({"controlData": "LEDON"}),
            })
        );
    }

    #[test]
    fn deep_path_wraps_innermost_first() {
        let patch = inflate("/A/schedule/evening/start", json!(1800));
        assert_eq!(
            patch,
            Some(InflatedPatch::EntityMerge {
                id: "A".into(),
                payload: json!({"schedule": {"evening": {"start": 1800}}}),
            })
        );
    }

    #[test]
    fn entity_path_with_object_merges() {
        let patch = inflate("/A", json!({"brightness": 40}));
        assert_eq!(
            patch,
            Some(InflatedPatch::EntityMerge {
                id: "A".into(),
                payload: json!({"brightness": 40}),
            })
        );
    }

    #[test]
    fn null_data_deletes_entity() {
        assert_eq!(
            inflate("/A", Value::Null),
            Some(InflatedPatch::EntityDelete { id: "A".into() })
        );
        assert_eq!(
            inflate("/A%20B/on", Value::Null),
            Some(InflatedPatch::EntityDelete { id: "A B".into() })
        );
    }

    #[test]
    fn non_object_root_is_ignored() {
        assert_eq!(inflate("/", Value::Null), None);
        assert_eq!(inflate("/", json!(3)), None);
    }
}

// ── Device domain types ──

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

const ON: &str = "on";
const BRIGHTNESS: &str = "brightness";
const CONTROL_DATA: &str = "controlData";
const NAME: &str = "name";
const COLOR: &str = "color";

/// Cached state of one lighting device.
///
/// Known fields are typed; everything else lands in `extra` and is written
/// back untouched. A known key whose value has an unexpected type is kept
/// in `extra` verbatim rather than dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    /// Power intent.
    pub on: Option<bool>,
    pub brightness: Option<u32>,
    /// Free-form control directive last written to the device.
    pub control_data: Option<String>,
    pub name: Option<String>,
    /// Packed RGB color.
    pub color: Option<u32>,
    /// Unrecognized keys, preserved across merges.
    pub extra: Map<String, Value>,
}

impl DeviceState {
    /// Build from a JSON payload. Returns `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::from_map(map)),
            _ => None,
        }
    }

    pub fn from_map(mut map: Map<String, Value>) -> Self {
        let on = take(&mut map, ON, Value::as_bool);
        let brightness = take(&mut map, BRIGHTNESS, as_u32);
        let control_data = take(&mut map, CONTROL_DATA, as_string);
        let name = take(&mut map, NAME, as_string);
        let color = take(&mut map, COLOR, as_u32);

        Self {
            on,
            brightness,
            control_data,
            name,
            color,
            extra: map,
        }
    }

    /// Flatten back into the wire representation.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.extra.clone();
        if let Some(on) = self.on {
            map.insert(ON.into(), Value::Bool(on));
        }
        if let Some(brightness) = self.brightness {
            map.insert(BRIGHTNESS.into(), brightness.into());
        }
        if let Some(control_data) = &self.control_data {
            map.insert(CONTROL_DATA.into(), control_data.clone().into());
        }
        if let Some(name) = &self.name {
            map.insert(NAME.into(), name.clone().into());
        }
        if let Some(color) = self.color {
            map.insert(COLOR.into(), color.into());
        }
        map
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }

    /// Shallow-overlay `patch` onto this state.
    ///
    /// Each top-level key of `patch` replaces the cached value wholesale; a
    /// `null` value removes the key. Keys absent from `patch` are untouched.
    /// Returns `false` (and changes nothing) if `patch` is not an object.
    pub fn merge(&mut self, patch: &Value) -> bool {
        let Value::Object(patch) = patch else {
            return false;
        };

        let mut map = self.to_map();
        for (key, value) in patch {
            if value.is_null() {
                map.remove(key);
            } else {
                map.insert(key.clone(), value.clone());
            }
        }
        *self = Self::from_map(map);
        true
    }
}

impl Serialize for DeviceState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}

/// Remove `key` if its value has the expected type. Nulls are removed and
/// read as absent.
fn take<T>(
    map: &mut Map<String, Value>,
    key: &str,
    extract: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    let value = map.get(key)?;
    if value.is_null() {
        map.remove(key);
        return None;
    }
    let typed = extract(value)?;
    map.remove(key);
    Some(typed)
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|n| u32::try_from(n).ok())
}

fn as_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_owned)
}

/// A device mirror: identifier plus cached state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: String,
    pub state: DeviceState,
}

impl Device {
    /// Display name, falling back to the identifier.
    pub fn label(&self) -> &str {
        self.state.name.as_deref().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn state(value: Value) -> DeviceState {
        DeviceState::from_value(value).unwrap_or_default()
    }

    #[test]
    fn known_fields_are_typed_and_unknown_kept() {
        let s = state(json!({
            "on": true,
            "brightness": 80,
            "controlData": "LEDON",
            "name": "Porch",
            "color": 16_711_680,
            "firmware": "2.1.0"
        }));
        assert_eq!(s.on, Some(true));
        assert_eq!(s.brightness, Some(80));
        assert_eq!(s.control_data.as_deref(), Some("LEDON"));
        assert_eq!(s.name.as_deref(), Some("Porch"));
        assert_eq!(s.color, Some(0xFF_0000));
        assert_eq!(s.extra.get("firmware"), Some(&json!("2.1.0")));
    }

    #[test]
    fn mistyped_known_field_is_preserved_verbatim() {
        let s = state(json!({ "brightness": "high" }));
        assert_eq!(s.brightness, None);
        assert_eq!(s.to_value(), json!({ "brightness": "high" }));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(DeviceState::from_value(json!("LEDON")).is_none());
        assert!(DeviceState::from_value(Value::Null).is_none());
    }

    #[test]
    fn merge_is_a_shallow_overlay() {
        let mut s = state(json!({
            "on": true,
            "name": "Porch",
            "schedule": { "morning": 600, "evening": 1800 }
        }));
        assert!(s.merge(&json!({
            "controlData": "LEDON",
            "schedule": { "evening": 1900 }
        })));

        assert_eq!(
            s.to_value(),
            json!({
                "on": true,
                "name": "Porch",
                "controlData": "LEDON",
                "schedule": { "evening": 1900 }
            })
        );
    }

    #[test]
    fn merge_null_clears_field() {
        let mut s = state(json!({ "on": true, "color": 255, "note": "x" }));
        s.merge(&json!({ "color": null, "note": null }));
        assert_eq!(s.color, None);
        assert!(s.extra.is_empty());
        assert_eq!(s.on, Some(true));
    }

    #[test]
    fn merge_ignores_non_object() {
        let mut s = state(json!({ "on": true }));
        assert!(!s.merge(&json!(false)));
        assert_eq!(s.on, Some(true));
    }

    #[test]
    fn serializes_as_flat_object() {
        let s = state(json!({ "on": false, "zone": 3 }));
        let encoded = serde_json::to_value(&s).unwrap_or_default();
        assert_eq!(encoded, json!({ "on": false, "zone": 3 }));
    }

    #[test]
    fn label_falls_back_to_id() {
        let device = Device {
            id: "dev-1".into(),
            state: DeviceState::default(),
        };
        assert_eq!(device.label(), "dev-1");
    }
}

// ── Domain model ──
//
// Canonical types the engine caches and hands to consumers: device state
// mirrors, theme definitions, and the per-device theme groups built from
// them.

pub mod device;
pub mod theme;

pub use device::{Device, DeviceState};
pub use theme::{ThemeCatalog, ThemeDefinition, ThemeGroup};

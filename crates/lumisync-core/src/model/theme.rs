// ── Theme domain types ──

use std::collections::HashMap;
use std::fmt::Write as _;

use lumisync_api::ThemeRecord;
use serde::Serialize;
use tracing::warn;

/// A named lighting theme with its fully rendered control directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThemeDefinition {
    pub id: String,
    pub display_name: String,
    pub control_directive: String,
}

impl ThemeDefinition {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        control_directive: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            control_directive: control_directive.into(),
        }
    }

    pub fn from_record(id: String, record: &ThemeRecord) -> Self {
        Self {
            id,
            display_name: record.name.clone(),
            control_directive: Self::render(&record.code, &record.params),
        }
    }

    /// `code:p1,p2,…`, or the bare code when there are no parameters.
    pub fn render(code: &str, params: &[serde_json::Number]) -> String {
        let mut directive = code.to_owned();
        for (i, param) in params.iter().enumerate() {
            directive.push(if i == 0 { ':' } else { ',' });
            let _ = write!(directive, "{param}");
        }
        directive
    }
}

/// Theme definitions indexed case-insensitively by display name.
#[derive(Debug, Clone, Default)]
pub struct ThemeCatalog {
    themes: Vec<ThemeDefinition>,
    by_name: HashMap<String, usize>,
}

impl ThemeCatalog {
    /// Index `themes`. On a display-name collision the first entry wins.
    pub fn new(themes: impl IntoIterator<Item = ThemeDefinition>) -> Self {
        let mut catalog = Self::default();
        for theme in themes {
            let key = name_key(&theme.display_name);
            if catalog.by_name.contains_key(&key) {
                warn!(theme = %theme.id, name = %theme.display_name, "duplicate theme name, keeping first");
                continue;
            }
            catalog.by_name.insert(key, catalog.themes.len());
            catalog.themes.push(theme);
        }
        catalog
    }

    pub fn from_records(records: &[(String, ThemeRecord)]) -> Self {
        Self::new(
            records
                .iter()
                .map(|(id, record)| ThemeDefinition::from_record(id.clone(), record)),
        )
    }

    pub fn lookup(&self, display_name: &str) -> Option<&ThemeDefinition> {
        self.by_name
            .get(&name_key(display_name))
            .and_then(|&i| self.themes.get(i))
    }

    /// Resolve `names` in order. Returns the matching definitions and the
    /// names that matched nothing.
    pub fn resolve(&self, names: &[String]) -> (Vec<ThemeDefinition>, Vec<String>) {
        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        for name in names {
            match self.lookup(name) {
                Some(theme) => resolved.push(theme.clone()),
                None => unresolved.push(name.clone()),
            }
        }
        (resolved, unresolved)
    }

    pub fn len(&self) -> usize {
        self.themes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.themes.is_empty()
    }
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// The themes that apply to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThemeGroup {
    pub device_id: String,
    pub themes: Vec<ThemeDefinition>,
}

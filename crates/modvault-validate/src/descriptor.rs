//! Plugin descriptor (`.uplugin`) parsing.

use std::collections::BTreeMap;

use serde::Deserialize;

use modvault_core::ValidationError;

/// The plugin whose constraint doubles as the declared SML version.
pub const SML_PLUGIN: &str = "SML";

/// A `.uplugin` file. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginDescriptor {
    #[serde(default)]
    pub sem_version: Option<String>,

    #[serde(default)]
    pub friendly_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub created_by: String,

    #[serde(default)]
    pub plugins: Vec<PluginReference>,
}

/// One entry of the descriptor's `Plugins` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PluginReference {
    #[serde(rename = "Name")]
    pub name: String,

    /// Absent for engine plugins.
    #[serde(rename = "SemVersion", default)]
    pub sem_version: Option<String>,

    #[serde(rename = "bOptional", default)]
    pub optional: bool,
}

/// Dependencies split by optionality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredDependencies {
    pub required: BTreeMap<String, String>,
    pub optional: BTreeMap<String, String>,
}

impl PluginDescriptor {
    pub fn parse(path: &str, raw: &[u8]) -> Result<Self, ValidationError> {
        let raw = raw.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(raw);
        serde_json::from_slice(raw).map_err(|e| ValidationError::Malformed {
            reason: format!("{}: {}", path, e),
        })
    }

    /// Mod dependencies. Engine plugins (no `SemVersion`) are skipped.
    pub fn dependencies(&self) -> DeclaredDependencies {
        let mut deps = DeclaredDependencies::default();
        for plugin in &self.plugins {
            let Some(constraint) = &plugin.sem_version else {
                continue;
            };
            let map = if plugin.optional {
                &mut deps.optional
            } else {
                &mut deps.required
            };
            map.insert(plugin.name.clone(), constraint.clone());
        }
        deps
    }

    /// Constraint on the SML plugin, or empty.
    pub fn sml_version(&self) -> String {
        self.plugins
            .iter()
            .find(|p| p.name == SML_PLUGIN)
            .and_then(|p| p.sem_version.clone())
            .unwrap_or_default()
    }
}

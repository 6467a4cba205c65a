//! Module records, intents, and links.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path::{encode_module_path, escape};

/// Data carried by one intent parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentParameterData {
    /// Inline JSON; written into a link owned by the receiving module.
    Json(serde_json::Value),
    /// Name of an existing story-level link to share.
    LinkName(String),
    /// Reference to an entity.
    EntityReference(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentParameter {
    pub name: String,
    pub data: IntentParameterData,
}

/// A declarative request describing what a module should do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Intent {
    /// Verb the module resolver matches against module manifests.
    pub action: Option<String>,
    /// Module URL that handles this intent. When absent, the resolver picks one.
    pub handler: Option<String>,
    pub parameters: Vec<IntentParameter>,
}

impl Intent {
    pub fn with_handler(handler: impl Into<String>) -> Self {
        Self {
            handler: Some(handler.into()),
            ..Self::default()
        }
    }

    pub fn with_action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::default()
        }
    }

    pub fn parameter(mut self, name: impl Into<String>, data: IntentParameterData) -> Self {
        self.parameters.push(IntentParameter {
            name: name.into(),
            data,
        });
        self
    }
}

/// Whether a module was added by a client (`External`) or started by
/// another module in the same story (`Internal`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleSource {
    Internal,
    #[default]
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceArrangement {
    #[default]
    None,
    Copresent,
    Sequential,
    Ontop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceDependency {
    #[default]
    None,
    Dependent,
}

/// How a module's surface relates to its parent's surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceRelation {
    pub arrangement: SurfaceArrangement,
    pub dependency: SurfaceDependency,
    pub emphasis: f32,
}

impl Default for SurfaceRelation {
    fn default() -> Self {
        Self {
            arrangement: SurfaceArrangement::None,
            dependency: SurfaceDependency::None,
            emphasis: 1.0,
        }
    }
}

/// Address of a link: the owning module path plus the link name.
///
/// An empty module path denotes a story-level link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkPath {
    pub module_path: Vec<String>,
    pub link_name: String,
}

impl LinkPath {
    pub fn new(module_path: Vec<String>, link_name: impl Into<String>) -> Self {
        Self {
            module_path,
            link_name: link_name.into(),
        }
    }

    /// Encoded form used as a storage key suffix.
    pub fn encode(&self) -> String {
        format!(
            "{}/{}",
            encode_module_path(&self.module_path),
            escape(&self.link_name, &['/'])
        )
    }
}

impl fmt::Display for LinkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Maps an intent parameter name to the link that backs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleParameterMapEntry {
    pub name: String,
    pub link_path: LinkPath,
}

/// The persisted record of one module in a story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleData {
    pub module_url: String,
    pub module_path: Vec<String>,
    #[serde(default)]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub module_source: ModuleSource,
    #[serde(default)]
    pub surface_relation: Option<SurfaceRelation>,
    /// Embedded modules are displayed inside their parent and never handed
    /// to the story shell on their own.
    #[serde(default)]
    pub is_embedded: bool,
    #[serde(default)]
    pub module_deleted: bool,
    #[serde(default)]
    pub parameter_map: Vec<ModuleParameterMapEntry>,
}

impl ModuleData {
    pub fn new(module_url: impl Into<String>, module_path: Vec<String>) -> Self {
        let module_url = module_url.into();
        Self {
            intent: Some(Intent::with_handler(module_url.clone())),
            module_url,
            module_path,
            module_source: ModuleSource::External,
            surface_relation: Some(SurfaceRelation::default()),
            is_embedded: false,
            module_deleted: false,
            parameter_map: Vec::new(),
        }
    }

    /// The surface id of this module in the story shell.
    pub fn surface_id(&self) -> String {
        encode_module_path(&self.module_path)
    }

    /// Resolve a parameter name to the link path that backs it. Names that
    /// are not in the parameter map address a link owned by this module.
    pub fn link_path_for(&self, name: &str) -> LinkPath {
        self.parameter_map
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.link_path.clone())
            .unwrap_or_else(|| LinkPath::new(self.module_path.clone(), name))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentFilter {
    pub action: String,
}

/// Static description of a module, read out-of-band from its package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleManifest {
    pub binary: String,
    pub suggestion_headline: Option<String>,
    pub intent_filters: Vec<IntentFilter>,
    pub composition_pattern: Option<String>,
}

/// Lifecycle state of a running module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Starting,
    Running,
    Stopped,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_path_for_prefers_parameter_map() {
        let mut data = ModuleData::new("mod_url", vec!["root".to_string()]);
        data.parameter_map.push(ModuleParameterMapEntry {
            name: "shared".to_string(),
            link_path: LinkPath::new(Vec::new(), "story_link"),
        });

        assert_eq!(
            data.link_path_for("shared"),
            LinkPath::new(Vec::new(), "story_link")
        );
        assert_eq!(
            data.link_path_for("own"),
            LinkPath::new(vec!["root".to_string()], "own")
        );
    }

    #[test]
    fn test_link_path_encoding_escapes_slash() {
        let link = LinkPath::new(vec!["a".to_string(), "b".to_string()], "x/y");
        assert_eq!(link.encode(), "a:b/x\\/y");
    }

    #[test]
    fn test_module_data_defaults_when_deserializing() {
        let json = serde_json::json!({
            "module_url": "m",
            "module_path": ["root"],
        });
        let data: ModuleData = serde_json::from_value(json).unwrap();
        assert_eq!(data.module_source, ModuleSource::External);
        assert!(!data.is_embedded);
        assert!(!data.module_deleted);
        assert!(data.intent.is_none());
    }
}

//! Materials exchanged with the story shell and session shell.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::module::{ModuleManifest, ModuleSource, SurfaceRelation};

/// Opaque handle to a rendered view, passed through to whichever shell
/// composes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewHolderToken(String);

impl ViewHolderToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewHolderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A module's view, addressed by its surface id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewConnection {
    pub surface_id: String,
    pub view_holder_token: ViewHolderToken,
}

/// Layout hints for a surface added to the story shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceInfo {
    /// Surface id of the anchor; empty for root modules.
    pub parent_id: String,
    pub surface_relation: Option<SurfaceRelation>,
    pub module_manifest: Option<ModuleManifest>,
    pub module_source: ModuleSource,
}

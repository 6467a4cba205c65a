//! Story commands and their execution results.

use serde::{Deserialize, Serialize};

use crate::module::{Intent, LinkPath, SurfaceRelation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddMod {
    /// Module path of the new module. A single name given together with a
    /// surface parent is placed under that parent.
    pub mod_name: Vec<String>,
    pub intent: Intent,
    #[serde(default)]
    pub surface_relation: Option<SurfaceRelation>,
    /// Module whose surface anchors the new one. Empty for a root module.
    #[serde(default)]
    pub surface_parent_mod_name: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveMod {
    pub mod_name: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetLinkValue {
    pub path: LinkPath,
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusMod {
    pub mod_name: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetFocusState {
    pub focused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetKindOfProtoStoryOption {
    pub value: bool,
}

/// One mutation of a story, batched through the puppet master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoryCommand {
    AddMod(AddMod),
    RemoveMod(RemoveMod),
    SetLinkValue(SetLinkValue),
    FocusMod(FocusMod),
    SetFocusState(SetFocusState),
    SetKindOfProtoStoryOption(SetKindOfProtoStoryOption),
}

impl AddMod {
    /// The module path the new module is stored under.
    pub fn module_path(&self) -> Vec<String> {
        if self.mod_name.len() == 1 && !self.surface_parent_mod_name.is_empty() {
            let mut path = self.surface_parent_mod_name.clone();
            path.extend(self.mod_name.iter().cloned());
            return path;
        }
        self.mod_name.clone()
    }
}

impl StoryCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddMod(_) => "add_mod",
            Self::RemoveMod(_) => "remove_mod",
            Self::SetLinkValue(_) => "set_link_value",
            Self::FocusMod(_) => "focus_mod",
            Self::SetFocusState(_) => "set_focus_state",
            Self::SetKindOfProtoStoryOption(_) => "set_kind_of_proto_story_option",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteStatus {
    Ok,
    InvalidCommand,
    InvalidStoryId,
    StoryMustHaveMods,
    InvalidMod,
    /// No module satisfies the intent. Distinct from a generic failure.
    NoModulesFound,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub status: ExecuteStatus,
    pub story_id: Option<String>,
    pub error_message: Option<String>,
}

impl ExecuteResult {
    pub fn ok(story_id: impl Into<String>) -> Self {
        Self {
            status: ExecuteStatus::Ok,
            story_id: Some(story_id.into()),
            error_message: None,
        }
    }

    pub fn error(
        status: ExecuteStatus,
        story_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            story_id: Some(story_id.into()),
            error_message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ExecuteStatus::Ok
    }
}

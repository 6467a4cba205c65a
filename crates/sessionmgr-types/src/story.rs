//! Story records as persisted in the session store, plus the in-memory
//! runtime states a story controller reports.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an independent versioned key-value namespace in the page store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    /// Allocate a fresh, globally unique page id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Story creation flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryOptions {
    /// A proto story is a synthetic story that is hidden from story listings
    /// until it is promoted.
    pub kind_of_proto_story: bool,
}

/// Arbitrary client metadata attached to a story at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryInfoExtraEntry {
    pub key: String,
    pub value: String,
}

impl StoryInfoExtraEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Client-visible description of a story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryInfo {
    pub id: String,
    /// Milliseconds since the Unix epoch; zero if never focused.
    #[serde(default)]
    pub last_focus_time: i64,
    #[serde(default)]
    pub extra: Vec<StoryInfoExtraEntry>,
}

/// The `story:<name>` record in the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryData {
    pub story_name: String,
    #[serde(default)]
    pub story_options: StoryOptions,
    pub story_page_id: PageId,
    pub story_info: StoryInfo,
}

impl StoryData {
    /// The story id. Story ids and story names coincide.
    pub fn id(&self) -> &str {
        &self.story_info.id
    }
}

/// Runtime state of a story. Kept in memory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryState {
    Running,
    Stopping,
    #[default]
    Stopped,
}

impl StoryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for StoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visibility of a story's surfaces, orthogonal to [`StoryState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryVisibilityState {
    #[default]
    Default,
    Immersive,
}

/// Kind of a long-running activity a module reports while it is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OngoingActivityType {
    #[default]
    Unspecified,
    Video,
}

/// Focus state reported by the focus provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusInfo {
    pub focused_story_id: Option<String>,
    pub last_focus_change_timestamp: i64,
}

//! Command scripts.
//!
//! A script is a JSON array of batches, applied in order:
//!
//! ```json
//! [
//!   {
//!     "story": "notes",
//!     "start": true,
//!     "commands": [
//!       { "type": "add_mod", "mod_name": ["root"], "intent": { "handler": "notes" } }
//!     ]
//!   }
//! ]
//! ```

use std::path::Path;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use sessionmgr_types::{StoryCommand, StoryInfoExtraEntry, StoryOptions};

/// One puppet master `Execute` against one story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub story: String,
    #[serde(default)]
    pub commands: Vec<StoryCommand>,
    /// Start the story once the batch has been applied.
    #[serde(default)]
    pub start: bool,
    /// Options applied only if the batch creates the story.
    #[serde(default)]
    pub options: StoryOptions,
    #[serde(default)]
    pub extra: Vec<StoryInfoExtraEntry>,
}

pub fn parse_script(text: &str) -> Result<Vec<Batch>> {
    serde_json::from_str(text).context("invalid script")
}

pub fn load_script(path: &Path) -> Result<Vec<Batch>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    parse_script(&text).with_context(|| format!("in {}", path.display()))
}

//! Key layout of the session page and story pages.

use sessionmgr_types::{LinkPath, encode_module_path};

/// Prefix of `StoryData` records in the session page.
pub const STORY_KEY_PREFIX: &str = "story:";
/// Prefix of snapshot reference records in the session page.
pub const STORY_SNAPSHOT_KEY_PREFIX: &str = "story-snapshot:";
/// Prefix of `ModuleData` records in a story page.
pub const MODULE_KEY_PREFIX: &str = "module:";
/// Prefix of link values in a story page.
pub const LINK_KEY_PREFIX: &str = "link:";
/// Prefix of entity records in a story page.
pub const ENTITY_KEY_PREFIX: &str = "entity:";

pub fn story_key(story_name: &str) -> String {
    format!("{STORY_KEY_PREFIX}{story_name}")
}

pub fn story_snapshot_key(story_name: &str) -> String {
    format!("{STORY_SNAPSHOT_KEY_PREFIX}{story_name}")
}

pub fn module_key(module_path: &[String]) -> String {
    format!("{MODULE_KEY_PREFIX}{}", encode_module_path(module_path))
}

pub fn link_key(link_path: &LinkPath) -> String {
    format!("{LINK_KEY_PREFIX}{}", link_path.encode())
}

pub fn entity_key(cookie: &str) -> String {
    format!("{ENTITY_KEY_PREFIX}{cookie}")
}

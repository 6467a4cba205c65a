//! Story-scoped entities.
//!
//! An entity is a bag of typed payloads stored in the story page under a
//! random cookie. Its reference, `story:<story id>/<cookie>`, can be handed
//! to modules in other stories and resolved through the story provider.

use std::sync::Arc;

use sessionmgr_storage::{EntityRecord, StoryStorage};
use tracing::debug;

use crate::Result;

const REFERENCE_PREFIX: &str = "story:";

/// Creates and serves the entities of one story.
pub struct StoryEntityProvider {
    story_id: String,
    storage: Arc<StoryStorage>,
}

impl StoryEntityProvider {
    pub fn new(story_id: impl Into<String>, storage: Arc<StoryStorage>) -> Self {
        Self {
            story_id: story_id.into(),
            storage,
        }
    }

    /// Create an entity holding `data` as its `entity_type` payload.
    /// Returns the entity reference.
    pub async fn create_entity(&self, entity_type: &str, data: &str) -> Result<String> {
        let cookie = uuid::Uuid::new_v4().to_string();
        let mut record = EntityRecord::default();
        record.data.insert(entity_type.to_string(), data.to_string());
        self.storage.write_entity(&cookie, record).await?;
        debug!(story_id = %self.story_id, cookie = %cookie, entity_type, "Entity created");
        Ok(entity_reference(&self.story_id, &cookie))
    }

    /// Types the entity has payloads for; empty for unknown cookies.
    pub async fn get_types(&self, cookie: &str) -> Result<Vec<String>> {
        Ok(self
            .storage
            .read_entity(cookie)
            .await?
            .map(|record| record.types())
            .unwrap_or_default())
    }

    pub async fn get_data(&self, cookie: &str, entity_type: &str) -> Result<Option<String>> {
        Ok(self
            .storage
            .read_entity(cookie)
            .await?
            .and_then(|mut record| record.data.remove(entity_type)))
    }

    /// Replace one payload of an existing entity. Returns `false` if the
    /// entity does not exist.
    pub async fn write_data(&self, cookie: &str, entity_type: &str, data: &str) -> Result<bool> {
        let Some(mut record) = self.storage.read_entity(cookie).await? else {
            return Ok(false);
        };
        record.data.insert(entity_type.to_string(), data.to_string());
        self.storage.write_entity(cookie, record).await?;
        Ok(true)
    }
}

impl std::fmt::Debug for StoryEntityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryEntityProvider")
            .field("story_id", &self.story_id)
            .finish()
    }
}

pub fn entity_reference(story_id: &str, cookie: &str) -> String {
    format!("{REFERENCE_PREFIX}{story_id}/{cookie}")
}

/// Split a reference into story id and cookie.
pub fn parse_entity_reference(reference: &str) -> Option<(&str, &str)> {
    let rest = reference.strip_prefix(REFERENCE_PREFIX)?;
    let (story_id, cookie) = rest.rsplit_once('/')?;
    (!story_id.is_empty() && !cookie.is_empty()).then_some((story_id, cookie))
}

//! The handle a running module uses to reach back into its story.

use std::sync::{Arc, Weak};

use sessionmgr_types::{
    Intent, ModuleData, OngoingActivityType, SurfaceRelation, ViewHolderToken,
};

use crate::controller::StoryControllerImpl;
use crate::link::Link;
use crate::module_controller::ModuleController;
use crate::{Result, StoryError};

/// Story access for one module instance.
///
/// Holds only a weak reference to the story; once the story controller is
/// dropped every call fails with [`StoryError::ControllerReleased`].
pub struct ModuleContext {
    story_id: String,
    module_data: ModuleData,
    story: Weak<StoryControllerImpl>,
}

/// A module embedded in its parent's view.
#[derive(Debug)]
pub struct EmbeddedModule {
    pub controller: Arc<ModuleController>,
    /// View for the parent to display. `None` when an instance already
    /// running at that path was reused.
    pub view: Option<ViewHolderToken>,
}

impl ModuleContext {
    pub(crate) fn new(story_id: String, module_data: ModuleData, story: Weak<StoryControllerImpl>) -> Self {
        Self {
            story_id,
            module_data,
            story,
        }
    }

    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    pub fn module_path(&self) -> &[String] {
        &self.module_data.module_path
    }

    pub fn module_data(&self) -> &ModuleData {
        &self.module_data
    }

    /// The link bound to parameter `name` of this module.
    pub fn get_link(&self, name: &str) -> Result<Link> {
        Ok(self.story()?.get_link(self.module_data.link_path_for(name)))
    }

    /// Start a child module that gets its own surface in the story shell.
    pub async fn add_module_to_story(
        &self,
        name: &str,
        intent: Intent,
        surface_relation: Option<SurfaceRelation>,
    ) -> Result<Arc<ModuleController>> {
        let (controller, _) = self
            .story()?
            .add_internal_module(&self.module_data, name, intent, surface_relation, false)
            .await?;
        Ok(controller)
    }

    /// Start a child module whose view this module displays itself.
    pub async fn embed_module(&self, name: &str, intent: Intent) -> Result<EmbeddedModule> {
        let (controller, view) = self
            .story()?
            .add_internal_module(&self.module_data, name, intent, None, true)
            .await?;
        Ok(EmbeddedModule { controller, view })
    }

    /// Remove this module; the story stops if it was the last one.
    pub async fn remove_self_from_story(&self) -> Result<()> {
        self.story()?
            .remove_module_from_story(&self.module_data.module_path)
            .await
    }

    /// Focus this module's surface and ask for its story to be focused.
    pub async fn request_focus(&self) -> Result<()> {
        let story = self.story()?;
        story.focus_module(&self.module_data.module_path).await?;
        story.request_story_focus();
        Ok(())
    }

    /// Report an ongoing activity until the returned guard is dropped.
    pub fn start_ongoing_activity(&self, kind: OngoingActivityType) -> Result<OngoingActivity> {
        Ok(self
            .story()?
            .start_ongoing_activity(&self.module_data.module_path, kind))
    }

    /// Create an entity in the story and return its reference.
    pub async fn create_entity(&self, entity_type: &str, data: &str) -> Result<String> {
        let story = self.story()?;
        story.entity_provider().create_entity(entity_type, data).await
    }

    fn story(&self) -> Result<Arc<StoryControllerImpl>> {
        self.story
            .upgrade()
            .ok_or_else(|| StoryError::ControllerReleased(self.story_id.clone()))
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("story_id", &self.story_id)
            .field("module_path", &self.module_data.module_path)
            .finish()
    }
}

/// Keeps an ongoing activity registered with its story while alive.
#[must_use = "the activity ends when this guard is dropped"]
pub struct OngoingActivity {
    id: u64,
    story: Weak<StoryControllerImpl>,
}

impl OngoingActivity {
    pub(crate) fn new(id: u64, story: Weak<StoryControllerImpl>) -> Self {
        Self { id, story }
    }

    /// A guard for an activity that was never registered.
    pub(crate) fn inert() -> Self {
        Self {
            id: 0,
            story: Weak::new(),
        }
    }
}

impl Drop for OngoingActivity {
    fn drop(&mut self) {
        if let Some(story) = self.story.upgrade() {
            story.end_ongoing_activity(self.id);
        }
    }
}

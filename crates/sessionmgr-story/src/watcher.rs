//! Watcher interfaces for story, provider, module and focus events.
//!
//! Watchers are invoked synchronously from the runtime's own tasks and must
//! not block. Register them as `Arc<dyn ...>`.

use sessionmgr_types::{
    FocusInfo, ModuleData, ModuleState, OngoingActivityType, StoryInfo, StoryState,
    StoryVisibilityState,
};

/// Observes one story controller.
pub trait StoryWatcher: Send + Sync {
    fn on_state_change(&self, state: StoryState);

    fn on_module_added(&self, _module: &ModuleData) {}

    fn on_module_focused(&self, _module_path: &[String]) {}
}

/// Observes every story of a session.
pub trait StoryProviderWatcher: Send + Sync {
    fn on_change(&self, info: &StoryInfo, state: StoryState, visibility: StoryVisibilityState);

    /// Deletions carry only the id.
    fn on_delete(&self, story_id: &str);
}

/// Observes ongoing activities reported by modules.
pub trait StoryActivityWatcher: Send + Sync {
    fn on_story_activity_change(&self, story_id: &str, activities: &[OngoingActivityType]);
}

/// Observes one running module.
pub trait ModuleWatcher: Send + Sync {
    fn on_state_change(&self, state: ModuleState);
}

/// Receives focus changes from the focus provider.
pub trait FocusWatcher: Send + Sync {
    fn on_focus_change(&self, info: FocusInfo);
}

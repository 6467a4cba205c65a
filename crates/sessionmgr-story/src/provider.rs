//! The session-level story registry.
//!
//! [`StoryProviderImpl`] owns one runtime container per loaded story (story
//! storage, controller and entity provider), fans story state and activity
//! changes out to watchers, reacts to story records written or deleted by
//! any connection to the session page, and keeps a story shell preloaded so
//! the next story starts quickly.
//!
//! Every container mutation runs on the provider's own operation queue.
//! Locks guard only in-memory tables and are never held across an await or
//! while calling into a story controller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use sessionmgr_ops::{OperationHandle, OperationQueue};
use sessionmgr_storage::StoryStorage;
use sessionmgr_types::{
    FocusInfo, OngoingActivityType, StoryData, StoryInfo, StoryState, StoryVisibilityState,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Result;
use crate::controller::{StoryControllerImpl, StoryHost};
use crate::entity::StoryEntityProvider;
use crate::interfaces::StoryShell;
use crate::services::SessionServices;
use crate::watcher::{FocusWatcher, StoryActivityWatcher, StoryProviderWatcher};

/// The runtime objects of one loaded story.
pub struct StoryRuntimeContainer {
    pub storage: Arc<StoryStorage>,
    pub controller: Arc<StoryControllerImpl>,
    pub entity_provider: Arc<StoryEntityProvider>,
    story_data: Mutex<StoryData>,
}

impl StoryRuntimeContainer {
    /// The story record as last written.
    pub fn story_data(&self) -> StoryData {
        self.story_data.lock().clone()
    }
}

/// Registry of the stories in a session.
pub struct StoryProviderImpl {
    this: Weak<Self>,
    services: Arc<SessionServices>,
    queue: OperationQueue,
    containers: Mutex<HashMap<String, Arc<StoryRuntimeContainer>>>,
    watchers: Mutex<Vec<Arc<dyn StoryProviderWatcher>>>,
    activity_watchers: Mutex<Vec<Arc<dyn StoryActivityWatcher>>>,
    preloaded_shell: Mutex<Option<Arc<dyn StoryShell>>>,
    preload_task: Mutex<Option<JoinHandle<()>>>,
    preloading_stopped: AtomicBool,
}

impl StoryProviderImpl {
    pub fn new(services: SessionServices) -> Arc<Self> {
        let services = Arc::new(services);
        let provider = Arc::new_cyclic(|weak: &Weak<Self>| {
            let on_updated = weak.clone();
            services
                .session_storage
                .set_on_story_updated(Arc::new(move |story_id, story_data| {
                    if let Some(provider) = on_updated.upgrade() {
                        provider.on_story_storage_updated(story_id, story_data);
                    }
                }));
            let on_deleted = weak.clone();
            services
                .session_storage
                .set_on_story_deleted(Arc::new(move |story_id| {
                    if let Some(provider) = on_deleted.upgrade() {
                        provider.on_story_storage_deleted(story_id);
                    }
                }));

            Self {
                this: weak.clone(),
                services: services.clone(),
                queue: OperationQueue::new("story_provider"),
                containers: Mutex::new(HashMap::new()),
                watchers: Mutex::new(Vec::new()),
                activity_watchers: Mutex::new(Vec::new()),
                preloaded_shell: Mutex::new(None),
                preload_task: Mutex::new(None),
                preloading_stopped: AtomicBool::new(false),
            }
        });

        if let Some(focus_provider) = &provider.services.focus_provider {
            focus_provider.watch(Arc::new(ProviderFocusWatcher {
                provider: Arc::downgrade(&provider),
            }));
        }
        provider.schedule_story_shell_preload();
        provider
    }

    pub fn services(&self) -> &Arc<SessionServices> {
        &self.services
    }

    // ── Story runtimes ──────────────────────────────────────────────────

    /// The runtime container of a story, created on first use. `None` if the
    /// story does not exist.
    pub fn load_story_runtime(self: &Arc<Self>, story_id: &str) -> OperationHandle<Option<Arc<StoryRuntimeContainer>>> {
        let this = self.clone();
        let story_id = story_id.to_string();
        self.queue.add("LoadStoryRuntimeCall", async move {
            this.load_story_runtime_inner(story_id).await
        })
    }

    async fn load_story_runtime_inner(self: &Arc<Self>, story_id: String) -> Option<Arc<StoryRuntimeContainer>> {
        if let Some(container) = self.containers.lock().get(&story_id).cloned() {
            return Some(container);
        }

        let session_storage = &self.services.session_storage;
        let story_data = session_storage.get_story_data(&story_id).await.ok().flatten()?;
        let storage = session_storage.get_story_storage(&story_id).await.ok().flatten()?;

        let entity_provider = Arc::new(StoryEntityProvider::new(story_id.clone(), storage.clone()));
        let host: Weak<dyn StoryHost> = Arc::downgrade(self) as Weak<dyn StoryHost>;
        let controller = StoryControllerImpl::new(
            story_id.clone(),
            storage.clone(),
            entity_provider.clone(),
            self.services.clone(),
            host,
        );
        let container = Arc::new(StoryRuntimeContainer {
            storage,
            controller,
            entity_provider,
            story_data: Mutex::new(story_data),
        });
        self.containers.lock().insert(story_id.clone(), container.clone());
        debug!(story_id = %story_id, "Story runtime loaded");
        Some(container)
    }

    pub fn get_controller(self: &Arc<Self>, story_id: &str) -> impl Future<Output = Option<Arc<StoryControllerImpl>>> + Send + 'static {
        let load = self.load_story_runtime(story_id);
        async move {
            load.await
                .ok()
                .flatten()
                .map(|container| container.controller.clone())
        }
    }

    /// Info of every story that is not a proto story. `watcher`, if given,
    /// receives all later changes.
    pub fn get_stories(
        self: &Arc<Self>,
        watcher: Option<Arc<dyn StoryProviderWatcher>>,
    ) -> OperationHandle<Vec<StoryInfo>> {
        let this = self.clone();
        self.queue.add("GetStoriesCall", async move {
            let stories = this.story_infos().await;
            if let Some(watcher) = watcher {
                this.watchers.lock().push(watcher);
            }
            stories
        })
    }

    pub fn previous_stories(self: &Arc<Self>) -> OperationHandle<Vec<StoryInfo>> {
        let this = self.clone();
        self.queue.add("PreviousStoriesCall", async move { this.story_infos().await })
    }

    async fn story_infos(&self) -> Vec<StoryInfo> {
        self.services
            .session_storage
            .get_all_story_data()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|data| !data.story_options.kind_of_proto_story)
            .map(|data| data.story_info)
            .collect()
    }

    /// Ids of the loaded stories that are running.
    pub fn running_stories(&self) -> Vec<String> {
        let containers: Vec<_> = self.containers.lock().values().cloned().collect();
        let mut running: Vec<_> = containers
            .iter()
            .filter(|container| container.controller.state() == StoryState::Running)
            .map(|container| container.controller.story_id().to_string())
            .collect();
        running.sort();
        running
    }

    pub fn get_story_info(self: &Arc<Self>, story_id: &str) -> OperationHandle<Option<StoryInfo>> {
        let session_storage = self.services.session_storage.clone();
        let story_id = story_id.to_string();
        self.queue.add("GetStoryInfoCall", async move {
            session_storage
                .get_story_data(&story_id)
                .await
                .ok()
                .flatten()
                .map(|data| data.story_info)
        })
    }

    // ── Watchers ────────────────────────────────────────────────────────

    /// Register a watcher. It first receives the state of every loaded
    /// story, then live changes.
    ///
    /// The replay runs without holding the watcher table, so a watcher may
    /// register further watchers from its callbacks.
    pub fn watch(&self, watcher: Arc<dyn StoryProviderWatcher>) {
        let replayed = self.loaded_story_states();
        for (info, state, visibility) in &replayed {
            watcher.on_change(info, *state, *visibility);
        }
        self.watchers.lock().push(watcher.clone());

        // Changes made between the replay and the registration reached
        // neither path.
        for current in self.loaded_story_states() {
            if !replayed.contains(&current) {
                let (info, state, visibility) = current;
                watcher.on_change(&info, state, visibility);
            }
        }
    }

    pub fn watch_activity(&self, watcher: Arc<dyn StoryActivityWatcher>) {
        let replayed = self.loaded_story_activities();
        for (story_id, activities) in &replayed {
            watcher.on_story_activity_change(story_id, activities);
        }
        self.activity_watchers.lock().push(watcher.clone());

        for current in self.loaded_story_activities() {
            if !replayed.contains(&current) {
                watcher.on_story_activity_change(&current.0, &current.1);
            }
        }
    }

    fn loaded_story_activities(&self) -> Vec<(String, Vec<OngoingActivityType>)> {
        let controllers: Vec<_> = self
            .containers
            .lock()
            .values()
            .map(|container| container.controller.clone())
            .collect();
        controllers
            .iter()
            .map(|controller| (controller.story_id().to_string(), controller.activities()))
            .filter(|(_, activities)| !activities.is_empty())
            .collect()
    }

    fn loaded_story_states(&self) -> Vec<(StoryInfo, StoryState, StoryVisibilityState)> {
        let containers: Vec<_> = self.containers.lock().values().cloned().collect();
        containers
            .iter()
            .map(|container| container.story_data())
            .zip(containers.iter())
            .filter(|(data, _)| !data.story_options.kind_of_proto_story)
            .map(|(data, container)| {
                (
                    data.story_info,
                    container.controller.state(),
                    container.controller.visibility_state(),
                )
            })
            .collect()
    }

    fn notify_story_watchers(&self, story_data: &StoryData, state: StoryState, visibility: StoryVisibilityState) {
        if story_data.story_options.kind_of_proto_story {
            return;
        }
        let watchers = self.watchers.lock().clone();
        for watcher in watchers {
            watcher.on_change(&story_data.story_info, state, visibility);
        }
    }

    // ── Deletion ────────────────────────────────────────────────────────

    /// Delete a story and tear down its runtime. Completes once the runtime
    /// container is gone.
    pub fn delete_story(self: &Arc<Self>, story_id: &str) -> impl Future<Output = ()> + Send + 'static {
        let call = self.delete_story_call(story_id.to_string(), false);
        async move {
            if let Ok(Some(erase)) = call.await {
                let _ = erase.await;
            }
        }
    }

    /// Stop and forget a story runtime. `already_deleted` is set when the
    /// record is already gone from session storage. Returns the handle of
    /// the follow-up operation that erases the container.
    fn delete_story_call(
        self: &Arc<Self>,
        story_id: String,
        already_deleted: bool,
    ) -> OperationHandle<Option<OperationHandle<()>>> {
        let this = self.clone();
        self.queue.add("DeleteStoryCall", async move {
            if !already_deleted {
                let _ = this.services.session_storage.delete_story(&story_id).await;
            }

            let container = this.containers.lock().get(&story_id).cloned();
            let Some(container) = container else {
                return None;
            };
            let _ = container.controller.stop_for_delete().await;
            info!(story_id = %story_id, "Story deleted");

            // Erased in a follow-up so nothing still running inside this
            // operation touches a dropped container.
            let provider = this.clone();
            Some(this.queue.add("EraseStoryContainer", async move {
                let mut containers = provider.containers.lock();
                if containers
                    .get(&story_id)
                    .is_some_and(|current| Arc::ptr_eq(current, &container))
                {
                    containers.remove(&story_id);
                }
            }))
        })
    }

    fn on_story_storage_deleted(self: &Arc<Self>, story_id: String) {
        let call = self.delete_story_call(story_id.clone(), true);
        let this = self.clone();
        let _ = self.queue.add("NotifyStoryDeleted", async move {
            let _ = call.await;
            let watchers = this.watchers.lock().clone();
            for watcher in watchers {
                watcher.on_delete(&story_id);
            }
        });
    }

    fn on_story_storage_updated(&self, story_id: String, story_data: StoryData) {
        let container = self.containers.lock().get(&story_id).cloned();
        let (state, visibility) = match container {
            Some(container) => {
                *container.story_data.lock() = story_data.clone();
                (
                    container.controller.state(),
                    container.controller.visibility_state(),
                )
            }
            // Not loaded here; it cannot be running on this device.
            None => (StoryState::Stopped, StoryVisibilityState::Default),
        };
        self.notify_story_watchers(&story_data, state, visibility);
    }

    // ── Session teardown ────────────────────────────────────────────────

    /// Stop every loaded story as part of a session teardown.
    pub fn stop_all_stories(self: &Arc<Self>) -> OperationHandle<()> {
        let this = self.clone();
        self.queue.add("StopAllStoriesCall", async move {
            let controllers: Vec<_> = this
                .containers
                .lock()
                .values()
                .map(|container| container.controller.clone())
                .collect();
            join_all(controllers.iter().map(|controller| controller.stop_bulk())).await;
            info!(count = controllers.len(), "All stories stopped");
        })
    }

    /// Tear down the preloaded story shell and stop preloading.
    pub fn stop_story_shell(self: &Arc<Self>) -> OperationHandle<()> {
        let this = self.clone();
        self.preloading_stopped.store(true, Ordering::SeqCst);
        self.queue.add("StopStoryShellCall", async move {
            if let Some(task) = this.preload_task.lock().take() {
                task.abort();
            }
            let shell = this.preloaded_shell.lock().take();
            if let Some(shell) = shell {
                let teardown = tokio::spawn(async move { shell.teardown().await });
                if tokio::time::timeout(this.services.config.basic_timeout, teardown)
                    .await
                    .is_err()
                {
                    warn!("Preloaded story shell did not tear down in time");
                }
            }
        })
    }

    // ── Focus ───────────────────────────────────────────────────────────

    pub fn request_story_focus(&self, story_id: &str) {
        match &self.services.focus_provider {
            Some(focus_provider) => focus_provider.request(Some(story_id)),
            None => debug!(story_id, "No focus provider; focus request dropped"),
        }
    }

    fn on_focus_change(&self, info: FocusInfo) {
        let Some(story_id) = info.focused_story_id else {
            return;
        };
        let _ = self
            .services
            .session_storage
            .update_last_focused_timestamp(&story_id, info.last_focus_change_timestamp);
    }

    // ── Entities ────────────────────────────────────────────────────────

    /// Create an entity in a story. `None` if the story does not exist.
    pub fn create_entity(
        self: &Arc<Self>,
        story_id: &str,
        entity_type: &str,
        data: &str,
    ) -> impl Future<Output = Result<Option<String>>> + Send + 'static {
        let load = self.load_story_runtime(story_id);
        create_entity_in(load, entity_type.to_string(), data.to_string())
    }

    pub fn connect_to_story_entity_provider(
        self: &Arc<Self>,
        story_id: &str,
    ) -> impl Future<Output = Option<Arc<StoryEntityProvider>>> + Send + 'static {
        let load = self.load_story_runtime(story_id);
        async move {
            load.await
                .ok()
                .flatten()
                .map(|container| container.entity_provider.clone())
        }
    }

    /// Resolves once every operation admitted so far has completed.
    pub fn sync(&self) -> OperationHandle<()> {
        self.queue.sync()
    }

    // ── Shell preloading ────────────────────────────────────────────────

    /// Launch a story shell after the preload delay. Runs at construction
    /// and again each time a preloaded shell is taken by a starting story.
    fn schedule_story_shell_preload(self: &Arc<Self>) {
        let config = &self.services.config;
        if !config.story_shell_preload_enabled || self.preloading_stopped.load(Ordering::SeqCst) {
            return;
        }
        let delay = config.shell_preload_delay;
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(provider) = weak.upgrade() else {
                return;
            };
            match provider.services.story_shell_factory.launch_story_shell().await {
                Ok(shell) => {
                    let mut preloaded = provider.preloaded_shell.lock();
                    if preloaded.is_none() {
                        debug!("Story shell preloaded");
                        *preloaded = Some(shell);
                    }
                }
                Err(e) => warn!(error = %e, "Story shell preload failed"),
            }
        });
        if let Some(previous) = self.preload_task.lock().replace(task) {
            previous.abort();
        }
    }
}

#[async_trait]
impl StoryHost for StoryProviderImpl {
    async fn acquire_story_shell(&self) -> Result<Arc<dyn StoryShell>> {
        let preloaded = self.preloaded_shell.lock().take();
        if let Some(shell) = preloaded {
            debug!("Using preloaded story shell");
            if let Some(this) = self.this.upgrade() {
                this.schedule_story_shell_preload();
            }
            return Ok(shell);
        }
        self.services.story_shell_factory.launch_story_shell().await
    }

    fn notify_story_state_change(&self, story_id: &str) {
        let container = self.containers.lock().get(story_id).cloned();
        let Some(container) = container else {
            return;
        };
        self.notify_story_watchers(
            &container.story_data(),
            container.controller.state(),
            container.controller.visibility_state(),
        );
    }

    fn notify_story_activity_change(&self, story_id: &str, activities: &[OngoingActivityType]) {
        let watchers = self.activity_watchers.lock().clone();
        for watcher in watchers {
            watcher.on_story_activity_change(story_id, activities);
        }
    }

    fn request_story_focus(&self, story_id: &str) {
        StoryProviderImpl::request_story_focus(self, story_id);
    }
}

impl Drop for StoryProviderImpl {
    fn drop(&mut self) {
        if let Some(task) = self.preload_task.lock().take() {
            task.abort();
        }
    }
}

async fn create_entity_in(
    load: OperationHandle<Option<Arc<StoryRuntimeContainer>>>,
    entity_type: String,
    data: String,
) -> Result<Option<String>> {
    let Some(container) = load.await? else {
        return Ok(None);
    };
    let reference = container
        .entity_provider
        .create_entity(&entity_type, &data)
        .await?;
    Ok(Some(reference))
}

struct ProviderFocusWatcher {
    provider: Weak<StoryProviderImpl>,
}

impl FocusWatcher for ProviderFocusWatcher {
    fn on_focus_change(&self, info: FocusInfo) {
        if let Some(provider) = self.provider.upgrade() {
            provider.on_focus_change(info);
        }
    }
}

//! Per-story state machine.
//!
//! A [`StoryControllerImpl`] owns the running-module table, the views
//! waiting for their anchor to reach the story shell, the connected-view set,
//! the link handles it gave out and the ongoing activities of one story.
//! Every mutation runs as an operation on the controller's own queue; the
//! tables sit behind a mutex that is only ever held between suspension
//! points, never across one.
//!
//! ```text
//! STOPPED ── request_start ──▶ RUNNING ── stop ──▶ STOPPING ──▶ STOPPED
//! ```

mod launch;
mod shell;
mod snapshot;
mod stop;

pub use launch::should_restart_module_for_new_intent;

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use sessionmgr_ops::{OperationHandle, OperationQueue};
use sessionmgr_storage::StoryStorage;
use sessionmgr_types::{
    LinkPath, ModuleData, ModuleSource, OngoingActivityType, StoryState, StoryVisibilityState,
    encode_module_path,
};
use tracing::{debug, info};

use crate::Result;
use crate::entity::StoryEntityProvider;
use crate::interfaces::StoryShell;
use crate::link::Link;
use crate::module_context::{ModuleContext, OngoingActivity};
use crate::module_controller::ModuleController;
use crate::services::SessionServices;
use crate::watcher::StoryWatcher;

use shell::PendingView;

/// What a story controller needs from the session that owns it.
#[async_trait]
pub(crate) trait StoryHost: Send + Sync {
    /// A story shell for a starting story; preloaded if one is available.
    async fn acquire_story_shell(&self) -> Result<Arc<dyn StoryShell>>;

    fn notify_story_state_change(&self, story_id: &str);

    fn notify_story_activity_change(&self, story_id: &str, activities: &[OngoingActivityType]);

    fn request_story_focus(&self, story_id: &str);
}

/// One live module instance.
pub(crate) struct RunningModInfo {
    pub(crate) module_data: ModuleData,
    pub(crate) context: Arc<ModuleContext>,
    pub(crate) controller: Arc<ModuleController>,
}

struct ActivityEntry {
    id: u64,
    module_path: Vec<String>,
    kind: OngoingActivityType,
}

#[derive(Default)]
pub(crate) struct ControllerState {
    state: StoryState,
    visibility: StoryVisibilityState,
    story_shell: Option<Arc<dyn StoryShell>>,
    /// Label of the per-story environment; present while the story runs.
    environment: Option<String>,
    running_mods: Vec<RunningModInfo>,
    /// Views whose anchor has not reached the shell yet, by surface id.
    pending_views: BTreeMap<String, PendingView>,
    connected_views: HashSet<String>,
    links: Vec<Weak<AtomicBool>>,
    activities: Vec<ActivityEntry>,
    watchers: Vec<Arc<dyn StoryWatcher>>,
}

impl ControllerState {
    pub(crate) fn find_running(&self, module_path: &[String]) -> Option<&RunningModInfo> {
        self.running_mods
            .iter()
            .find(|info| info.module_data.module_path == module_path)
    }

    fn find_running_mut(&mut self, module_path: &[String]) -> Option<&mut RunningModInfo> {
        self.running_mods
            .iter_mut()
            .find(|info| info.module_data.module_path == module_path)
    }

    fn activity_kinds(&self) -> Vec<OngoingActivityType> {
        self.activities.iter().map(|entry| entry.kind).collect()
    }
}

/// The per-story controller.
pub struct StoryControllerImpl {
    story_id: String,
    story_storage: Arc<StoryStorage>,
    entity_provider: Arc<StoryEntityProvider>,
    services: Arc<SessionServices>,
    host: Weak<dyn StoryHost>,
    queue: OperationQueue,
    state: Arc<Mutex<ControllerState>>,
    /// Set while the story is being deleted; silences provider notifications.
    deleting: AtomicBool,
    next_activity_id: AtomicU64,
}

impl StoryControllerImpl {
    pub(crate) fn new(
        story_id: String,
        story_storage: Arc<StoryStorage>,
        entity_provider: Arc<StoryEntityProvider>,
        services: Arc<SessionServices>,
        host: Weak<dyn StoryHost>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self: &Weak<Self>| {
            let weak = weak_self.clone();
            story_storage.set_on_module_data_updated(Arc::new(move |module_data| {
                if let Some(controller) = weak.upgrade() {
                    controller.on_module_data_updated(module_data);
                }
            }));

            Self {
                queue: OperationQueue::new(format!("story:{story_id}")),
                story_id,
                story_storage,
                entity_provider,
                services,
                host,
                state: Arc::new(Mutex::new(ControllerState::default())),
                deleting: AtomicBool::new(false),
                next_activity_id: AtomicU64::new(1),
            }
        })
    }

    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    pub fn story_storage(&self) -> &Arc<StoryStorage> {
        &self.story_storage
    }

    pub fn entity_provider(&self) -> &Arc<StoryEntityProvider> {
        &self.entity_provider
    }

    pub fn state(&self) -> StoryState {
        self.state.lock().state
    }

    pub fn visibility_state(&self) -> StoryVisibilityState {
        self.state.lock().visibility
    }

    /// Register a watcher. It is told the current state right away.
    pub fn watch(&self, watcher: Arc<dyn StoryWatcher>) {
        let state = {
            let mut st = self.state.lock();
            st.watchers.push(watcher.clone());
            st.state
        };
        watcher.on_state_change(state);
    }

    /// Start the story. A no-op if it is already running. If no story shell
    /// can be started the story stays stopped.
    pub fn request_start(self: &Arc<Self>) -> OperationHandle<()> {
        let this = self.clone();
        self.queue.add("StartCall", async move { this.start().await })
    }

    /// Stop the story, detaching its view from the session shell first.
    pub fn stop(self: &Arc<Self>) -> OperationHandle<()> {
        let this = self.clone();
        self.queue.add("StopCall", async move { this.stop_story(false).await })
    }

    /// Stop the story as part of a session-wide teardown; the session shell
    /// is going away too, so the view is not detached.
    pub fn stop_bulk(self: &Arc<Self>) -> OperationHandle<()> {
        let this = self.clone();
        self.queue.add("StopCall(bulk)", async move { this.stop_story(true).await })
    }

    /// Stop ahead of deletion. State changes are not reported to the
    /// session, which reports the deletion instead.
    pub(crate) fn stop_for_delete(self: &Arc<Self>) -> OperationHandle<()> {
        self.deleting.store(true, Ordering::SeqCst);
        let this = self.clone();
        self.queue.add("StopForDeleteCall", async move { this.stop_story(false).await })
    }

    /// Module records of the running instances.
    pub fn get_active_modules(&self) -> OperationHandle<Vec<ModuleData>> {
        // Resolved on the queue so launches admitted earlier are included.
        self.read_state("GetActiveModulesCall", |state| {
            state
                .running_mods
                .iter()
                .map(|info| info.module_data.clone())
                .collect()
        })
    }

    /// Every persisted module record of the story, deleted ones included.
    pub fn get_modules(&self) -> OperationHandle<Vec<ModuleData>> {
        let storage = self.story_storage.clone();
        self.queue.add("GetModulesCall", async move {
            storage.read_all_module_data().await.unwrap_or_default()
        })
    }

    pub fn get_module_controller(&self, module_path: &[String]) -> OperationHandle<Option<Arc<ModuleController>>> {
        let module_path = module_path.to_vec();
        self.read_state("GetModuleControllerCall", move |state| {
            state
                .find_running(&module_path)
                .map(|info| info.controller.clone())
        })
    }

    /// A handle to a link of this story. Closed when the story stops.
    pub fn get_link(&self, link_path: LinkPath) -> Link {
        let closed = Arc::new(AtomicBool::new(false));
        {
            let mut st = self.state.lock();
            st.links.retain(|link| link.strong_count() > 0);
            st.links.push(Arc::downgrade(&closed));
        }
        Link::new(link_path, self.story_storage.clone(), closed)
    }

    pub fn focus_module(self: &Arc<Self>, module_path: &[String]) -> OperationHandle<()> {
        let this = self.clone();
        let surface_id = encode_module_path(module_path);
        self.queue.add("FocusCall", async move {
            let shell = this.state.lock().story_shell.clone();
            if let Some(shell) = shell {
                shell.focus_surface(&surface_id);
            }
        })
    }

    /// Ask the shell to defocus a module surface without waiting for it to
    /// finish.
    pub fn defocus_module(self: &Arc<Self>, module_path: &[String]) -> OperationHandle<()> {
        let this = self.clone();
        let surface_id = encode_module_path(module_path);
        self.queue.add("DefocusCall", async move {
            let shell = this.state.lock().story_shell.clone();
            if let Some(shell) = shell {
                tokio::spawn(async move { shell.defocus_surface(&surface_id).await });
            }
        })
    }

    pub fn request_visibility_state(self: &Arc<Self>, visibility: StoryVisibilityState) -> OperationHandle<()> {
        let this = self.clone();
        self.queue.add("SetVisibilityStateCall", async move {
            {
                let mut st = this.state.lock();
                if st.visibility == visibility {
                    return;
                }
                st.visibility = visibility;
            }
            this.notify_host_state_change();
        })
    }

    /// Story shell event: the user focused a surface.
    pub fn on_surface_focused(&self, surface_id: &str) {
        let (module_path, watchers) = {
            let st = self.state.lock();
            let module_path = st
                .running_mods
                .iter()
                .find(|info| info.module_data.surface_id() == surface_id)
                .map(|info| info.module_data.module_path.clone());
            (module_path, st.watchers.clone())
        };
        let Some(module_path) = module_path else {
            debug!(story_id = %self.story_id, surface_id, "Focus event for unknown surface");
            return;
        };
        for watcher in watchers {
            watcher.on_module_focused(&module_path);
        }
    }

    /// Resolves once every operation admitted so far has completed.
    pub fn sync(&self) -> OperationHandle<()> {
        self.queue.sync()
    }

    // ── Module context plumbing ─────────────────────────────────────────

    /// Story storage reported a module record change, local or remote.
    fn on_module_data_updated(self: &Arc<Self>, module_data: ModuleData) {
        let this = self.clone();
        let _ = self.queue.add("OnModuleDataUpdatedCall", async move {
            this.handle_module_data_updated(module_data).await
        });
    }

    async fn handle_module_data_updated(self: &Arc<Self>, module_data: ModuleData) {
        if self.state() != StoryState::Running {
            return;
        }
        if module_data.module_deleted {
            self.kill_module(&module_data.module_path).await;
            return;
        }
        // Internal modules are started by their parent, never from here.
        if module_data.module_source != ModuleSource::External {
            return;
        }
        self.launch_module_in_shell(module_data).await;
    }

    pub(crate) fn start_ongoing_activity(
        self: &Arc<Self>,
        module_path: &[String],
        kind: OngoingActivityType,
    ) -> OngoingActivity {
        let id = self.next_activity_id.fetch_add(1, Ordering::SeqCst);
        let kinds = {
            let mut st = self.state.lock();
            if st.find_running(module_path).is_none() {
                debug!(story_id = %self.story_id, "Activity from a module that is not running");
                return OngoingActivity::inert();
            }
            st.activities.push(ActivityEntry {
                id,
                module_path: module_path.to_vec(),
                kind,
            });
            st.activity_kinds()
        };
        self.notify_activity_change(&kinds);
        OngoingActivity::new(id, Arc::downgrade(self))
    }

    pub(crate) fn end_ongoing_activity(&self, id: u64) {
        let kinds = {
            let mut st = self.state.lock();
            let before = st.activities.len();
            st.activities.retain(|entry| entry.id != id);
            if st.activities.len() == before {
                return;
            }
            st.activity_kinds()
        };
        self.notify_activity_change(&kinds);
    }

    pub(crate) fn request_story_focus(&self) {
        if let Some(host) = self.host.upgrade() {
            host.request_story_focus(&self.story_id);
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn read_state<T, F>(&self, operation: &'static str, read: F) -> OperationHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&ControllerState) -> T + Send + 'static,
    {
        let state = self.state.clone();
        self.queue.add(operation, async move { read(&state.lock()) })
    }

    fn set_state(&self, state: StoryState) {
        {
            let mut st = self.state.lock();
            if st.state == state {
                return;
            }
            st.state = state;
        }
        info!(story_id = %self.story_id, state = %state, "Story state changed");
        self.notify_state_change();
    }

    fn notify_state_change(&self) {
        let (state, watchers) = {
            let st = self.state.lock();
            (st.state, st.watchers.clone())
        };
        for watcher in watchers {
            watcher.on_state_change(state);
        }
        self.notify_host_state_change();
    }

    fn notify_host_state_change(&self) {
        if self.deleting.load(Ordering::SeqCst) {
            return;
        }
        if let Some(host) = self.host.upgrade() {
            host.notify_story_state_change(&self.story_id);
        }
    }

    fn notify_activity_change(&self, kinds: &[OngoingActivityType]) {
        if let Some(host) = self.host.upgrade() {
            host.notify_story_activity_change(&self.story_id, kinds);
        }
    }

    pub(crate) fn activities(&self) -> Vec<OngoingActivityType> {
        self.state.lock().activity_kinds()
    }
}

impl std::fmt::Debug for StoryControllerImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryControllerImpl")
            .field("story_id", &self.story_id)
            .field("state", &self.state())
            .finish()
    }
}

//! Mock collaborators and recording watchers for tests.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for downstream crates and integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sessionmgr_types::{
    FocusInfo, Intent, ModuleManifest, ModuleState, OngoingActivityType, StoryInfo, StoryState,
    StoryVisibilityState, SurfaceInfo, ViewConnection, ViewHolderToken,
};
use tracing::debug;

use crate::interfaces::{
    FocusProvider, ModuleFacetReader, ModuleInstance, ModuleLaunchConfig, ModuleLauncher,
    ModuleResolver, ModuleResolverResult, SessionShell, SnapshotLoader, StoryShell,
    StoryShellFactory,
};
use crate::module_context::ModuleContext;
use crate::watcher::{
    FocusWatcher, ModuleWatcher, StoryActivityWatcher, StoryProviderWatcher, StoryWatcher,
};
use crate::{Result, StoryError};

// ─────────────────────────────────────────────────────────────────────────────
// Shells
// ─────────────────────────────────────────────────────────────────────────────

/// Calls a [`MockStoryShell`] received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ShellEvent {
    Initialize(String),
    AddSurface { surface_id: String, parent_id: String },
    Focus(String),
    Defocus(String),
    Snapshot,
    Teardown,
}

/// Story shell that records every call.
pub struct MockStoryShell {
    view: ViewHolderToken,
    events: Mutex<Vec<ShellEvent>>,
    snapshot: Mutex<Option<Vec<u8>>>,
    teardown_delay: Option<Duration>,
}

impl MockStoryShell {
    pub fn new() -> Self {
        Self {
            view: ViewHolderToken::generate(),
            events: Mutex::new(Vec::new()),
            snapshot: Mutex::new(None),
            teardown_delay: None,
        }
    }

    /// A shell whose teardown takes `delay`.
    pub fn with_teardown_delay(delay: Duration) -> Self {
        Self {
            teardown_delay: Some(delay),
            ..Self::new()
        }
    }

    /// Bytes returned by the next `take_snapshot`.
    pub fn set_snapshot(&self, snapshot: Vec<u8>) {
        *self.snapshot.lock() = Some(snapshot);
    }

    pub fn events(&self) -> Vec<ShellEvent> {
        self.events.lock().clone()
    }

    /// `(surface_id, parent_id)` of every surface added, in order.
    pub fn surfaces(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ShellEvent::AddSurface {
                    surface_id,
                    parent_id,
                } => Some((surface_id.clone(), parent_id.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: ShellEvent) {
        self.events.lock().push(event);
    }
}

impl Default for MockStoryShell {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoryShell for MockStoryShell {
    fn initialize(&self, story_id: &str) {
        self.record(ShellEvent::Initialize(story_id.to_string()));
    }

    fn view_token(&self) -> ViewHolderToken {
        self.view.clone()
    }

    fn add_surface(&self, view: ViewConnection, surface_info: SurfaceInfo) {
        self.record(ShellEvent::AddSurface {
            surface_id: view.surface_id,
            parent_id: surface_info.parent_id,
        });
    }

    fn focus_surface(&self, surface_id: &str) {
        self.record(ShellEvent::Focus(surface_id.to_string()));
    }

    async fn defocus_surface(&self, surface_id: &str) {
        self.record(ShellEvent::Defocus(surface_id.to_string()));
    }

    async fn take_snapshot(&self) -> Option<Vec<u8>> {
        self.record(ShellEvent::Snapshot);
        self.snapshot.lock().take()
    }

    async fn teardown(&self) {
        if let Some(delay) = self.teardown_delay {
            tokio::time::sleep(delay).await;
        }
        self.record(ShellEvent::Teardown);
    }
}

/// Launches [`MockStoryShell`]s and keeps them for inspection.
#[derive(Default)]
pub struct MockStoryShellFactory {
    shells: Mutex<Vec<Arc<MockStoryShell>>>,
    fail: AtomicBool,
    teardown_delay: Option<Duration>,
}

impl MockStoryShellFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_teardown_delay(delay: Duration) -> Self {
        Self {
            teardown_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Make every later launch fail.
    pub fn fail_launches(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn launched(&self) -> Vec<Arc<MockStoryShell>> {
        self.shells.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<MockStoryShell>> {
        self.shells.lock().last().cloned()
    }
}

#[async_trait]
impl StoryShellFactory for MockStoryShellFactory {
    async fn launch_story_shell(&self) -> Result<Arc<dyn StoryShell>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoryError::ShellLaunch("mock launch failure".to_string()));
        }
        let shell = Arc::new(match self.teardown_delay {
            Some(delay) => MockStoryShell::with_teardown_delay(delay),
            None => MockStoryShell::new(),
        });
        self.shells.lock().push(shell.clone());
        Ok(shell)
    }
}

/// Session shell that records attached and detached stories.
#[derive(Default)]
pub struct MockSessionShell {
    attached: Mutex<Vec<String>>,
    detached: Mutex<Vec<String>>,
    detach_delay: Option<Duration>,
}

impl MockSessionShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session shell that takes `delay` to detach a view.
    pub fn with_detach_delay(delay: Duration) -> Self {
        Self {
            detach_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn attached(&self) -> Vec<String> {
        self.attached.lock().clone()
    }

    pub fn detached(&self) -> Vec<String> {
        self.detached.lock().clone()
    }
}

#[async_trait]
impl SessionShell for MockSessionShell {
    fn attach_view(&self, story_id: &str, _view: ViewHolderToken) {
        self.attached.lock().push(story_id.to_string());
    }

    async fn detach_view(&self, story_id: &str) {
        if let Some(delay) = self.detach_delay {
            tokio::time::sleep(delay).await;
        }
        self.detached.lock().push(story_id.to_string());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

/// Module instance that records the intents it receives.
pub struct MockModuleInstance {
    view: ViewHolderToken,
    intents: Arc<Mutex<Vec<Intent>>>,
    teardowns: Arc<AtomicUsize>,
    fail_teardown: bool,
    focus_on_intent: Option<Arc<ModuleContext>>,
}

impl MockModuleInstance {
    pub fn new() -> Self {
        Self {
            view: ViewHolderToken::generate(),
            intents: Arc::new(Mutex::new(Vec::new())),
            teardowns: Arc::new(AtomicUsize::new(0)),
            fail_teardown: false,
            focus_on_intent: None,
        }
    }

    /// An instance that asks its story for focus from every intent it handles.
    pub fn focusing_on_intent(mut self, context: Arc<ModuleContext>) -> Self {
        self.focus_on_intent = Some(context);
        self
    }

    /// An instance whose teardown reports an unclean exit.
    pub fn failing_teardown(mut self) -> Self {
        self.fail_teardown = true;
        self
    }

    pub fn intents(&self) -> Arc<Mutex<Vec<Intent>>> {
        self.intents.clone()
    }

    pub fn teardown_count(&self) -> Arc<AtomicUsize> {
        self.teardowns.clone()
    }
}

impl Default for MockModuleInstance {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleInstance for MockModuleInstance {
    fn view_token(&self) -> Option<ViewHolderToken> {
        Some(self.view.clone())
    }

    async fn handle_intent(&self, intent: Intent) {
        self.intents.lock().push(intent);
        if let Some(context) = &self.focus_on_intent
            && let Err(e) = context.request_focus().await
        {
            debug!(error = %e, "Mock module focus request failed");
        }
    }

    async fn teardown(&self, _timeout: Duration) -> Result<()> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        if self.fail_teardown {
            return Err(StoryError::ModuleTeardown {
                module_url: "mock".to_string(),
                reason: "teardown failed".to_string(),
            });
        }
        Ok(())
    }
}

/// One launch seen by a [`MockModuleLauncher`].
#[derive(Clone)]
pub struct LaunchedModule {
    pub config: ModuleLaunchConfig,
    pub context: Arc<ModuleContext>,
    pub intents: Arc<Mutex<Vec<Intent>>>,
    pub teardowns: Arc<AtomicUsize>,
}

/// Launches [`MockModuleInstance`]s and records each launch.
#[derive(Default)]
pub struct MockModuleLauncher {
    launched: Mutex<Vec<LaunchedModule>>,
    failing_urls: Mutex<Vec<String>>,
    focus_on_intent: AtomicBool,
}

impl MockModuleLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make launches of `module_url` fail.
    pub fn fail_url(&self, module_url: impl Into<String>) {
        self.failing_urls.lock().push(module_url.into());
    }

    /// Make every later instance request focus through its module context
    /// whenever it handles an intent.
    pub fn focus_on_intent(&self) {
        self.focus_on_intent.store(true, Ordering::SeqCst);
    }

    pub fn launched(&self) -> Vec<LaunchedModule> {
        self.launched.lock().clone()
    }

    /// Launched module paths, in launch order.
    pub fn launched_paths(&self) -> Vec<Vec<String>> {
        self.launched
            .lock()
            .iter()
            .map(|launch| launch.config.module_path.clone())
            .collect()
    }

    /// The most recent launch at `module_path`.
    pub fn find(&self, module_path: &[&str]) -> Option<LaunchedModule> {
        self.launched
            .lock()
            .iter()
            .rev()
            .find(|launch| launch.config.module_path.iter().map(String::as_str).eq(module_path.iter().copied()))
            .cloned()
    }
}

#[async_trait]
impl ModuleLauncher for MockModuleLauncher {
    async fn launch(
        &self,
        config: ModuleLaunchConfig,
        context: Arc<ModuleContext>,
    ) -> Result<Box<dyn ModuleInstance>> {
        if self.failing_urls.lock().contains(&config.module_url) {
            return Err(StoryError::ModuleLaunch {
                module_url: config.module_url,
                reason: "mock launch failure".to_string(),
            });
        }
        let mut instance = MockModuleInstance::new();
        if self.focus_on_intent.load(Ordering::SeqCst) {
            instance = instance.focusing_on_intent(context.clone());
        }
        self.launched.lock().push(LaunchedModule {
            config,
            context,
            intents: instance.intents(),
            teardowns: instance.teardown_count(),
        });
        Ok(Box::new(instance))
    }
}

/// Resolves intents by action from a fixed table.
#[derive(Default)]
pub struct MockModuleResolver {
    by_action: HashMap<String, Vec<String>>,
}

impl MockModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, action: impl Into<String>, module_url: impl Into<String>) -> Self {
        self.by_action
            .entry(action.into())
            .or_default()
            .push(module_url.into());
        self
    }
}

#[async_trait]
impl ModuleResolver for MockModuleResolver {
    async fn find_modules(&self, intent: &Intent) -> Vec<ModuleResolverResult> {
        intent
            .action
            .as_ref()
            .and_then(|action| self.by_action.get(action))
            .map(|urls| {
                urls.iter()
                    .map(|module_url| ModuleResolverResult {
                        module_url: module_url.clone(),
                        manifest: None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Facet reader with no manifests.
#[derive(Default)]
pub struct MockFacetReader;

#[async_trait]
impl ModuleFacetReader for MockFacetReader {
    async fn get_module_manifest(&self, _module_url: &str) -> Option<ModuleManifest> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session services
// ─────────────────────────────────────────────────────────────────────────────

/// Focus provider that grants every request immediately.
#[derive(Default)]
pub struct MockFocusProvider {
    watchers: Mutex<Vec<Arc<dyn FocusWatcher>>>,
    requests: Mutex<Vec<Option<String>>>,
}

impl MockFocusProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<Option<String>> {
        self.requests.lock().clone()
    }
}

impl FocusProvider for MockFocusProvider {
    fn watch(&self, watcher: Arc<dyn FocusWatcher>) {
        self.watchers.lock().push(watcher);
    }

    fn request(&self, story_id: Option<&str>) {
        self.requests.lock().push(story_id.map(str::to_string));
        let info = FocusInfo {
            focused_story_id: story_id.map(str::to_string),
            last_focus_change_timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let watchers = self.watchers.lock().clone();
        for watcher in watchers {
            watcher.on_focus_change(info.clone());
        }
    }
}

/// Records every snapshot it is asked to display.
#[derive(Default)]
pub struct MockSnapshotLoader {
    loaded: Mutex<Vec<Vec<u8>>>,
}

impl MockSnapshotLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded(&self) -> Vec<Vec<u8>> {
        self.loaded.lock().clone()
    }
}

#[async_trait]
impl SnapshotLoader for MockSnapshotLoader {
    async fn load(&self, snapshot: Vec<u8>) {
        self.loaded.lock().push(snapshot);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording watchers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingStoryWatcher {
    states: Mutex<Vec<StoryState>>,
    focused: Mutex<Vec<Vec<String>>>,
}

impl RecordingStoryWatcher {
    pub fn states(&self) -> Vec<StoryState> {
        self.states.lock().clone()
    }

    pub fn focused(&self) -> Vec<Vec<String>> {
        self.focused.lock().clone()
    }
}

impl StoryWatcher for RecordingStoryWatcher {
    fn on_state_change(&self, state: StoryState) {
        self.states.lock().push(state);
    }

    fn on_module_focused(&self, module_path: &[String]) {
        self.focused.lock().push(module_path.to_vec());
    }
}

#[derive(Default)]
pub struct RecordingProviderWatcher {
    changes: Mutex<Vec<(StoryInfo, StoryState, StoryVisibilityState)>>,
    deletes: Mutex<Vec<String>>,
}

impl RecordingProviderWatcher {
    /// `(story_id, state)` of every change, in order.
    pub fn changes(&self) -> Vec<(String, StoryState)> {
        self.changes
            .lock()
            .iter()
            .map(|(info, state, _)| (info.id.clone(), *state))
            .collect()
    }

    pub fn last_info(&self, story_id: &str) -> Option<StoryInfo> {
        self.changes
            .lock()
            .iter()
            .rev()
            .find(|(info, _, _)| info.id == story_id)
            .map(|(info, _, _)| info.clone())
    }

    pub fn visibility_changes(&self) -> Vec<StoryVisibilityState> {
        self.changes.lock().iter().map(|(_, _, v)| *v).collect()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }
}

impl StoryProviderWatcher for RecordingProviderWatcher {
    fn on_change(&self, info: &StoryInfo, state: StoryState, visibility: StoryVisibilityState) {
        self.changes.lock().push((info.clone(), state, visibility));
    }

    fn on_delete(&self, story_id: &str) {
        self.deletes.lock().push(story_id.to_string());
    }
}

#[derive(Default)]
pub struct RecordingActivityWatcher {
    changes: Mutex<Vec<(String, Vec<OngoingActivityType>)>>,
}

impl RecordingActivityWatcher {
    pub fn changes(&self) -> Vec<(String, Vec<OngoingActivityType>)> {
        self.changes.lock().clone()
    }
}

impl StoryActivityWatcher for RecordingActivityWatcher {
    fn on_story_activity_change(&self, story_id: &str, activities: &[OngoingActivityType]) {
        self.changes
            .lock()
            .push((story_id.to_string(), activities.to_vec()));
    }
}

#[derive(Default)]
pub struct RecordingModuleWatcher {
    states: Mutex<Vec<ModuleState>>,
}

impl RecordingModuleWatcher {
    pub fn states(&self) -> Vec<ModuleState> {
        self.states.lock().clone()
    }
}

impl ModuleWatcher for RecordingModuleWatcher {
    fn on_state_change(&self, state: ModuleState) {
        self.states.lock().push(state);
    }
}

//! Lifecycle of one running module instance.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use sessionmgr_types::{Intent, ModuleData, ModuleState, encode_module_path};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::controller::StoryControllerImpl;
use crate::interfaces::ModuleInstance;
use crate::watcher::ModuleWatcher;
use crate::{Result, StoryError};

/// Controls one running module instance of a story.
///
/// Created when the instance is launched and released from the story's
/// running-module table when it is torn down. Teardown happens at most once;
/// later calls wait for the first to finish and return.
///
/// Intents are handed to the instance by a delivery task of its own, in the
/// order they were sent, so a module may call back into its story while it
/// handles one.
pub struct ModuleController {
    module_path: Vec<String>,
    module_url: String,
    story: Weak<StoryControllerImpl>,
    instance: Arc<dyn ModuleInstance>,
    intents: mpsc::UnboundedSender<Intent>,
    teardown_timeout: Duration,
    state: Mutex<ModuleState>,
    watchers: Mutex<Vec<Arc<dyn ModuleWatcher>>>,
    torn_down: tokio::sync::Mutex<bool>,
}

impl ModuleController {
    pub(crate) fn new(
        module_data: &ModuleData,
        story: Weak<StoryControllerImpl>,
        instance: Box<dyn ModuleInstance>,
        teardown_timeout: Duration,
    ) -> Arc<Self> {
        let instance: Arc<dyn ModuleInstance> = Arc::from(instance);
        let (intents, pending) = mpsc::unbounded_channel();
        tokio::spawn(deliver_intents(instance.clone(), pending));

        Arc::new(Self {
            module_path: module_data.module_path.clone(),
            module_url: module_data.module_url.clone(),
            story,
            instance,
            intents,
            teardown_timeout,
            state: Mutex::new(ModuleState::Starting),
            watchers: Mutex::new(Vec::new()),
            torn_down: tokio::sync::Mutex::new(false),
        })
    }

    pub fn module_path(&self) -> &[String] {
        &self.module_path
    }

    pub fn module_url(&self) -> &str {
        &self.module_url
    }

    pub fn state(&self) -> ModuleState {
        *self.state.lock()
    }

    /// Register a watcher; it is told the current state right away.
    pub fn watch(&self, watcher: Arc<dyn ModuleWatcher>) {
        let state = self.state();
        self.watchers.lock().push(watcher.clone());
        watcher.on_state_change(state);
    }

    pub async fn focus(&self) -> Result<()> {
        self.story()?.focus_module(&self.module_path).await?;
        Ok(())
    }

    pub async fn defocus(&self) -> Result<()> {
        self.story()?.defocus_module(&self.module_path).await?;
        Ok(())
    }

    /// Remove the module from its story. Completes once the removal is
    /// recorded; the instance stops shortly after.
    pub async fn stop(&self) -> Result<()> {
        self.story()?.stop_module(&self.module_path).await
    }

    /// Queue `intent` for the instance. Returns before it is handled.
    pub(crate) fn send_intent(&self, intent: Intent) {
        if self.intents.send(intent).is_err() {
            debug!(
                module = %encode_module_path(&self.module_path),
                "Intent dropped; delivery stopped"
            );
        }
    }

    pub(crate) fn mark_running(&self) {
        self.set_state(ModuleState::Running);
    }

    /// Stop the instance and release it from the story.
    pub(crate) async fn teardown(&self) {
        let mut torn_down = self.torn_down.lock().await;
        if *torn_down {
            return;
        }
        *torn_down = true;

        let module = encode_module_path(&self.module_path);
        match self.instance.teardown(self.teardown_timeout).await {
            Ok(()) => {
                debug!(module = %module, "Module stopped");
                self.set_state(ModuleState::Stopped);
            }
            Err(e) => {
                warn!(module = %module, error = %e, "Module did not stop cleanly");
                self.set_state(ModuleState::Error);
            }
        }

        if let Some(story) = self.story.upgrade() {
            story.release_module(&self.module_path);
        }
    }

    fn story(&self) -> Result<Arc<StoryControllerImpl>> {
        self.story
            .upgrade()
            .ok_or_else(|| StoryError::ControllerReleased(encode_module_path(&self.module_path)))
    }

    fn set_state(&self, state: ModuleState) {
        {
            let mut current = self.state.lock();
            if *current == state {
                return;
            }
            *current = state;
        }
        let watchers = self.watchers.lock().clone();
        for watcher in watchers {
            watcher.on_state_change(state);
        }
    }
}

/// Runs until the controller, and with it the sender, is dropped.
async fn deliver_intents(
    instance: Arc<dyn ModuleInstance>,
    mut intents: mpsc::UnboundedReceiver<Intent>,
) {
    while let Some(intent) = intents.recv().await {
        instance.handle_intent(intent).await;
    }
}

impl std::fmt::Debug for ModuleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleController")
            .field("module_path", &self.module_path)
            .field("module_url", &self.module_url)
            .field("state", &self.state())
            .finish()
    }
}

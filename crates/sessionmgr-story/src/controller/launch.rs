//! Starting the story and the modules in it.

use std::sync::Arc;

use sessionmgr_types::{
    Intent, ModuleData, ModuleManifest, ModuleSource, StoryState, SurfaceRelation,
    ViewHolderToken, encode_module_path,
};
use tracing::{debug, info, warn};

use super::shell::PendingView;
use super::{RunningModInfo, StoryControllerImpl};
use crate::interfaces::{ModuleLaunchConfig, StoryShell};
use crate::module_context::ModuleContext;
use crate::module_controller::ModuleController;
use crate::parameters::initialize_module_parameters;
use crate::{Result, StoryError};

/// Whether a running module must be restarted to handle `new_intent`
/// instead of receiving it in place.
pub fn should_restart_module_for_new_intent(old_intent: &Intent, new_intent: &Intent) -> bool {
    old_intent.handler != new_intent.handler
}

impl StoryControllerImpl {
    pub(super) async fn start(self: &Arc<Self>) {
        if self.state() != StoryState::Stopped {
            debug!(story_id = %self.story_id, "Start requested for a story that is not stopped");
            return;
        }

        let shell = match self.acquire_story_shell().await {
            Ok(shell) => shell,
            Err(e) => {
                warn!(story_id = %self.story_id, error = %e, "Failed to start story shell");
                return;
            }
        };
        shell.initialize(&self.story_id);
        if let Some(session_shell) = &self.services.session_shell {
            session_shell.attach_view(&self.story_id, shell.view_token());
        }

        {
            let mut st = self.state.lock();
            st.story_shell = Some(shell);
            st.environment = Some(format!("story-{}", self.story_id));
        }

        // Launched through the queue so they run after this call finishes.
        let modules = self.story_storage.read_all_module_data().await.unwrap_or_default();
        for module_data in modules {
            if module_data.module_deleted || module_data.is_embedded {
                continue;
            }
            let this = self.clone();
            let _ = self.queue.add("LaunchModuleInShellCall", async move {
                this.launch_module_in_shell(module_data).await
            });
        }

        info!(story_id = %self.story_id, "Story started");
        self.set_state(StoryState::Running);
    }

    async fn acquire_story_shell(&self) -> Result<Arc<dyn StoryShell>> {
        match self.host.upgrade() {
            Some(host) => host.acquire_story_shell().await,
            None => self.services.story_shell_factory.launch_story_shell().await,
        }
    }

    /// Launch a module (or hand it a new intent) and connect its view to the
    /// story shell.
    pub(super) async fn launch_module_in_shell(self: &Arc<Self>, module_data: ModuleData) {
        if self.state() != StoryState::Running {
            debug!(story_id = %self.story_id, "Not launching module into a story that is not running");
            return;
        }

        let manifest = self
            .services
            .module_facet_reader
            .get_module_manifest(&module_data.module_url)
            .await;

        let view = match self.launch_module(&module_data).await {
            Ok(Some(view)) => view,
            Ok(None) => return,
            Err(e) => {
                warn!(
                    story_id = %self.story_id,
                    module = %module_data.surface_id(),
                    error = %e,
                    "Module launch failed"
                );
                return;
            }
        };

        if module_data.is_embedded {
            return;
        }

        self.connect_view(PendingView::new(&module_data, manifest, view));
    }

    pub(super) fn connect_view(&self, view: PendingView) {
        let (calls, shell) = {
            let mut st = self.state.lock();
            let Some(shell) = st.story_shell.clone() else {
                return;
            };
            (st.route_view(view), shell)
        };
        for call in calls {
            call.apply(&shell);
        }
    }

    /// Start a module, or reuse the running instance at the same path.
    /// Returns the view of a newly started instance; reused instances keep
    /// their surface and return `None`.
    pub(super) async fn launch_module(
        self: &Arc<Self>,
        module_data: &ModuleData,
    ) -> Result<Option<ViewHolderToken>> {
        let existing = {
            let st = self.state.lock();
            st.find_running(&module_data.module_path)
                .map(|info| (info.module_data.intent.clone(), info.controller.clone()))
        };

        if let Some((old_intent, controller)) = existing {
            let restart = match (&old_intent, &module_data.intent) {
                (Some(old), Some(new)) => should_restart_module_for_new_intent(old, new),
                _ => false,
            };
            if !restart {
                if let Some(intent) = module_data.intent.clone() {
                    controller.send_intent(intent);
                }
                if let Some(info) = self.state.lock().find_running_mut(&module_data.module_path) {
                    info.module_data = module_data.clone();
                }
                debug!(module = %module_data.surface_id(), "Reused running module");
                return Ok(None);
            }
            debug!(module = %module_data.surface_id(), "Restarting module for new handler");
            controller.teardown().await;
        }

        self.start_module(module_data).await.map(Some)
    }

    async fn start_module(self: &Arc<Self>, module_data: &ModuleData) -> Result<ViewHolderToken> {
        let environment = self
            .state
            .lock()
            .environment
            .clone()
            .unwrap_or_else(|| format!("story-{}", self.story_id));
        let context = Arc::new(ModuleContext::new(
            self.story_id.clone(),
            module_data.clone(),
            Arc::downgrade(self),
        ));
        let config = ModuleLaunchConfig {
            story_id: self.story_id.clone(),
            module_path: module_data.module_path.clone(),
            module_url: module_data.module_url.clone(),
            environment,
        };

        let instance = self
            .services
            .module_launcher
            .launch(config, context.clone())
            .await?;
        let view = instance
            .view_token()
            .unwrap_or_else(ViewHolderToken::generate);
        let controller = ModuleController::new(
            module_data,
            Arc::downgrade(self),
            instance,
            self.services.config.basic_timeout,
        );

        let watchers = {
            let mut st = self.state.lock();
            st.running_mods.push(RunningModInfo {
                module_data: module_data.clone(),
                context,
                controller: controller.clone(),
            });
            st.watchers.clone()
        };
        if let Some(intent) = module_data.intent.clone() {
            controller.send_intent(intent);
        }
        controller.mark_running();

        info!(
            story_id = %self.story_id,
            module = %encode_module_path(&module_data.module_path),
            url = %module_data.module_url,
            "Module started"
        );
        for watcher in watchers {
            watcher.on_module_added(module_data);
        }
        Ok(view)
    }

    // ── Modules added by other modules ──────────────────────────────────

    /// Add a child of `parent` on behalf of the parent module. The record is
    /// persisted first; the launch is queued behind any pending story work.
    pub(crate) async fn add_internal_module(
        self: &Arc<Self>,
        parent: &ModuleData,
        name: &str,
        intent: Intent,
        surface_relation: Option<SurfaceRelation>,
        embedded: bool,
    ) -> Result<(Arc<ModuleController>, Option<ViewHolderToken>)> {
        let mut module_path = parent.module_path.clone();
        module_path.push(name.to_string());

        let (module_url, manifest) = self.resolve_module(&intent).await?;
        let parameter_map = initialize_module_parameters(
            &self.story_storage,
            &module_path,
            &intent,
            |link_name| parent.link_path_for(link_name),
        )
        .await;

        let module_data = ModuleData {
            module_url,
            module_path: module_path.clone(),
            intent: Some(intent),
            module_source: ModuleSource::Internal,
            surface_relation,
            is_embedded: embedded,
            module_deleted: false,
            parameter_map,
        };
        self.story_storage.write_module_data(module_data.clone()).await?;

        let this = self.clone();
        let launched = self
            .queue
            .add("AddModuleCall", async move {
                if this.state() != StoryState::Running {
                    return Err(StoryError::StoryNotRunning(this.story_id.clone()));
                }
                let view = this.launch_module(&module_data).await?;
                if !module_data.is_embedded {
                    if let Some(view) = view.clone() {
                        this.connect_view(PendingView::new(&module_data, manifest, view));
                    }
                }
                let controller = this
                    .state
                    .lock()
                    .find_running(&module_data.module_path)
                    .map(|info| info.controller.clone());
                controller
                    .map(|controller| (controller, view))
                    .ok_or_else(|| StoryError::ModuleLaunch {
                        module_url: module_data.module_url.clone(),
                        reason: "module exited during launch".to_string(),
                    })
            })
            .await??;
        Ok(launched)
    }

    async fn resolve_module(&self, intent: &Intent) -> Result<(String, Option<ModuleManifest>)> {
        if let Some(handler) = &intent.handler {
            let manifest = self
                .services
                .module_facet_reader
                .get_module_manifest(handler)
                .await;
            return Ok((handler.clone(), manifest));
        }
        self.services
            .module_resolver
            .find_modules(intent)
            .await
            .into_iter()
            .next()
            .map(|result| (result.module_url, result.manifest))
            .ok_or_else(|| StoryError::NoModulesFound(intent.action.clone().unwrap_or_default()))
    }
}

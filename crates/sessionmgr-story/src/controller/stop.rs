//! Stopping modules and the story.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::future::join_all;
use sessionmgr_types::{ModuleSource, StoryState, encode_module_path};
use tracing::{debug, info, warn};

use super::StoryControllerImpl;

impl StoryControllerImpl {
    pub(super) async fn stop_story(self: &Arc<Self>, bulk: bool) {
        if self.state() != StoryState::Running {
            debug!(story_id = %self.story_id, "Stop requested for a story that is not running");
            return;
        }
        self.set_state(StoryState::Stopping);
        let timeout = self.services.config.basic_timeout;

        // A bulk stop tears the session shell down too; there is nothing to
        // detach from.
        if !bulk {
            if let Some(session_shell) = self.services.session_shell.clone() {
                let story_id = self.story_id.clone();
                let detach = tokio::spawn(async move { session_shell.detach_view(&story_id).await });
                if tokio::time::timeout(timeout, detach).await.is_err() {
                    warn!(story_id = %self.story_id, "Session shell did not detach the story view in time");
                }
            }
        }

        let controllers: Vec<_> = self
            .state
            .lock()
            .running_mods
            .iter()
            .map(|info| info.controller.clone())
            .collect();
        join_all(controllers.iter().map(|controller| controller.teardown())).await;

        let shell = self.state.lock().story_shell.take();
        if let Some(shell) = shell {
            let teardown = tokio::spawn(async move { shell.teardown().await });
            if tokio::time::timeout(timeout, teardown).await.is_err() {
                warn!(story_id = %self.story_id, "Story shell did not tear down in time");
            }
        }

        if self.story_storage.sync().await.is_err() {
            warn!(story_id = %self.story_id, "Story storage went away while stopping");
        }

        {
            let mut st = self.state.lock();
            for closed in st.links.drain(..).filter_map(|link| link.upgrade()) {
                closed.store(true, Ordering::SeqCst);
            }
            assert!(
                st.activities.is_empty(),
                "story {} stopped with ongoing activities",
                self.story_id
            );
            st.pending_views.clear();
            st.connected_views.clear();
            st.environment = None;
        }

        info!(story_id = %self.story_id, bulk, "Story stopped");
        self.set_state(StoryState::Stopped);
    }

    /// Defocus and tear down the running instance at `module_path`.
    pub(super) async fn kill_module(&self, module_path: &[String]) {
        let target = {
            let st = self.state.lock();
            st.find_running(module_path).map(|info| {
                (
                    info.controller.clone(),
                    info.module_data.module_source,
                    st.story_shell.clone(),
                )
            })
        };
        let Some((controller, source, shell)) = target else {
            debug!(module = %encode_module_path(module_path), "No running module to kill");
            return;
        };

        if source == ModuleSource::External {
            if let Some(shell) = shell {
                shell.defocus_surface(&encode_module_path(module_path)).await;
            }
        }
        controller.teardown().await;
    }

    /// Drop a torn-down instance from every table. Called exactly once per
    /// instance, by its module controller.
    pub(crate) fn release_module(&self, module_path: &[String]) {
        let kinds = {
            let mut st = self.state.lock();
            let matches = st
                .running_mods
                .iter()
                .filter(|info| info.module_data.module_path == module_path)
                .count();
            assert_eq!(
                matches,
                1,
                "expected exactly one running instance at {}",
                encode_module_path(module_path)
            );
            st.running_mods
                .retain(|info| info.module_data.module_path != module_path);

            let surface_id = encode_module_path(module_path);
            st.pending_views.remove(&surface_id);
            st.connected_views.remove(&surface_id);

            let before = st.activities.len();
            st.activities.retain(|entry| entry.module_path != module_path);
            (st.activities.len() != before).then(|| st.activity_kinds())
        };
        if let Some(kinds) = kinds {
            self.notify_activity_change(&kinds);
        }
    }

    /// Mark the module deleted in story storage. The instance is torn down
    /// when the change comes back through the storage notification.
    pub(crate) async fn stop_module(self: &Arc<Self>, module_path: &[String]) -> crate::Result<()> {
        let storage = self.story_storage.clone();
        let module_path = module_path.to_vec();
        self.queue
            .add("StopModuleCall", async move {
                storage
                    .update_module_data(&module_path, |data| {
                        data.map(|mut data| {
                            data.module_deleted = true;
                            data
                        })
                    })
                    .await
            })
            .await??;
        Ok(())
    }

    /// A module asked to be removed: mark it deleted, tear it down, and stop
    /// the story once nothing is left running.
    pub(crate) async fn remove_module_from_story(self: &Arc<Self>, module_path: &[String]) -> crate::Result<()> {
        let this = self.clone();
        let module_path = module_path.to_vec();
        self.queue
            .add("RemoveModuleFromStoryCall", async move {
                let marked = this
                    .story_storage
                    .update_module_data(&module_path, |data| {
                        data.map(|mut data| {
                            data.module_deleted = true;
                            data
                        })
                    })
                    .await;
                this.kill_module(&module_path).await;
                if this.state.lock().running_mods.is_empty() {
                    let _ = this.stop();
                }
                marked
            })
            .await??;
        Ok(())
    }
}

use std::sync::Arc;

use sessionmgr_ops::OperationHandle;
use tracing::{debug, warn};

use super::StoryControllerImpl;

impl StoryControllerImpl {
    /// Show the last persisted snapshot through the snapshot loader, then
    /// ask the story shell for a fresh one and persist it.
    pub fn take_and_load_snapshot(self: &Arc<Self>) -> OperationHandle<()> {
        let this = self.clone();
        self.queue.add("TakeAndLoadSnapshotCall", async move {
            this.take_and_load_snapshot_inner().await
        })
    }

    async fn take_and_load_snapshot_inner(&self) {
        let session_storage = self.services.session_storage.clone();

        if let Some(loader) = self.services.snapshot_loader.clone() {
            match session_storage.read_snapshot(&self.story_id).await {
                Ok(Some(snapshot)) => loader.load(snapshot).await,
                Ok(None) => debug!(story_id = %self.story_id, "No snapshot to load"),
                Err(e) => warn!(story_id = %self.story_id, error = %e, "Failed to read snapshot"),
            }
        }

        let Some(shell) = self.state.lock().story_shell.clone() else {
            return;
        };
        let story_id = self.story_id.clone();
        let capture = tokio::spawn(async move {
            if let Some(snapshot) = shell.take_snapshot().await {
                let _ = session_storage.write_snapshot(&story_id, snapshot).await;
            }
        });
        // The capture keeps running if it misses the deadline; the snapshot
        // is persisted whenever it arrives.
        if tokio::time::timeout(self.services.config.snapshot_timeout, capture)
            .await
            .is_err()
        {
            warn!(story_id = %self.story_id, "Story shell snapshot timed out");
        }
    }
}

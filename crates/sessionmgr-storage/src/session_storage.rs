//! Session-level story metadata.
//!
//! Story records live in the session page under `story:<name>`; snapshot
//! references live under `story-snapshot:<name>`. Every public operation is
//! admitted on the storage's own [`OperationQueue`], so a create followed
//! immediately by a delete of the same story is observed in that order.
//!
//! Operations never fail observably. Store errors are logged and degrade to
//! absence (`None`, empty list) or to a completed no-op.

use std::sync::Arc;

use parking_lot::Mutex;
use sessionmgr_ops::{OperationHandle, OperationQueue};
use sessionmgr_types::{PageId, StoryData, StoryInfo, StoryInfoExtraEntry, StoryOptions};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::Result;
use crate::keys::{STORY_KEY_PREFIX, story_key, story_snapshot_key};
use crate::page::{Page, PageChange, PageStore};
use crate::story_storage::StoryStorage;

/// Called with `(story_id, data)` whenever a story record is written.
pub type StoryUpdatedCallback = Arc<dyn Fn(String, StoryData) + Send + Sync>;

/// Called with the story id whenever a story record is deleted.
pub type StoryDeletedCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_story_updated: Mutex<Option<StoryUpdatedCallback>>,
    on_story_deleted: Mutex<Option<StoryDeletedCallback>>,
}

/// Persistence and change notification for story metadata.
pub struct SessionStorage {
    store: Arc<dyn PageStore>,
    page: Arc<dyn Page>,
    queue: OperationQueue,
    callbacks: Arc<Callbacks>,
    watcher: JoinHandle<()>,
}

impl SessionStorage {
    /// Connect to the session page `session_page` of `store`.
    ///
    /// The change feed is subscribed before this returns, so every write
    /// issued afterwards (locally or by another connection) is reported.
    pub fn new(store: Arc<dyn PageStore>, session_page: &PageId) -> Self {
        let page = store.page(session_page);
        let callbacks = Arc::new(Callbacks::default());
        let watcher = tokio::spawn(watch_session_page(page.watch(), callbacks.clone()));

        Self {
            store,
            page,
            queue: OperationQueue::new("session_storage"),
            callbacks,
            watcher,
        }
    }

    pub fn page_id(&self) -> &PageId {
        self.page.id()
    }

    pub fn set_on_story_updated(&self, callback: StoryUpdatedCallback) {
        *self.callbacks.on_story_updated.lock() = Some(callback);
    }

    pub fn set_on_story_deleted(&self, callback: StoryDeletedCallback) {
        *self.callbacks.on_story_deleted.lock() = Some(callback);
    }

    /// Create a story and its backing page.
    ///
    /// A missing or empty name is replaced by a random UUID. Resolves to the
    /// story id and the id of the new backing page.
    pub fn create_story(
        &self,
        story_name: Option<String>,
        extra: Vec<StoryInfoExtraEntry>,
        options: StoryOptions,
    ) -> OperationHandle<(String, PageId)> {
        let page = self.page.clone();
        self.queue.add("SessionStorage::create_story", async move {
            let story_name = story_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let story_page_id = PageId::generate();

            let data = StoryData {
                story_name: story_name.clone(),
                story_options: options,
                story_page_id: story_page_id.clone(),
                story_info: StoryInfo {
                    id: story_name.clone(),
                    last_focus_time: 0,
                    extra,
                },
            };

            if let Err(e) = write_story_data(page.as_ref(), &data).await {
                error!(story_id = %story_name, error = %e, "Failed to write story record");
            } else {
                info!(story_id = %story_name, page = %story_page_id, "Story created");
            }
            (story_name, story_page_id)
        })
    }

    /// Delete a story: clear its backing page and remove its record and
    /// snapshot. Deleting an unknown story is a no-op.
    pub fn delete_story(&self, story_id: &str) -> OperationHandle<()> {
        let store = self.store.clone();
        let page = self.page.clone();
        let story_id = story_id.to_string();
        self.queue.add("SessionStorage::delete_story", async move {
            if let Err(e) = delete_story(store.as_ref(), page.as_ref(), &story_id).await {
                error!(story_id = %story_id, error = %e, "Failed to delete story");
            }
        })
    }

    pub fn get_story_data(&self, story_id: &str) -> OperationHandle<Option<StoryData>> {
        let page = self.page.clone();
        let story_id = story_id.to_string();
        self.queue.add("SessionStorage::get_story_data", async move {
            read_story_data(page.as_ref(), &story_id)
                .await
                .unwrap_or_else(|e| {
                    error!(story_id = %story_id, error = %e, "Failed to read story record");
                    None
                })
        })
    }

    pub fn get_all_story_data(&self) -> OperationHandle<Vec<StoryData>> {
        let page = self.page.clone();
        self.queue.add("SessionStorage::get_all_story_data", async move {
            let entries = match page.scan_prefix(STORY_KEY_PREFIX).await {
                Ok(entries) => entries,
                Err(e) => {
                    error!(error = %e, "Failed to scan story records");
                    return Vec::new();
                }
            };

            entries
                .into_iter()
                .filter_map(|(key, value)| match serde_json::from_str(&value) {
                    Ok(data) => Some(data),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Skipping unreadable story record");
                        None
                    }
                })
                .collect()
        })
    }

    /// Set the story's last-focus time. Writes nothing if the value is
    /// already `timestamp`.
    pub fn update_last_focused_timestamp(&self, story_id: &str, timestamp: i64) -> OperationHandle<()> {
        self.update_story("SessionStorage::update_last_focused_timestamp", story_id, move |data| {
            if data.story_info.last_focus_time == timestamp {
                return false;
            }
            data.story_info.last_focus_time = timestamp;
            true
        })
    }

    /// Replace the story's options. Writes nothing if they are unchanged.
    pub fn update_story_options(&self, story_id: &str, options: StoryOptions) -> OperationHandle<()> {
        self.update_story("SessionStorage::update_story_options", story_id, move |data| {
            if data.story_options == options {
                return false;
            }
            data.story_options = options;
            true
        })
    }

    /// Per-story storage over the story's backing page, or `None` if the
    /// story does not exist.
    pub fn get_story_storage(&self, story_id: &str) -> OperationHandle<Option<Arc<StoryStorage>>> {
        let store = self.store.clone();
        let page = self.page.clone();
        let story_id = story_id.to_string();
        self.queue.add("SessionStorage::get_story_storage", async move {
            match read_story_data(page.as_ref(), &story_id).await {
                Ok(Some(data)) => {
                    let story_page = store.page(&data.story_page_id);
                    Some(Arc::new(StoryStorage::new(story_id, story_page)))
                }
                Ok(None) => {
                    debug!(story_id = %story_id, "No story record; no story storage");
                    None
                }
                Err(e) => {
                    error!(story_id = %story_id, error = %e, "Failed to read story record");
                    None
                }
            }
        })
    }

    /// Persist a snapshot blob. The blob is stored out of line and only its
    /// reference is written under the snapshot key.
    pub fn write_snapshot(&self, story_id: &str, snapshot: Vec<u8>) -> OperationHandle<()> {
        let page = self.page.clone();
        let story_id = story_id.to_string();
        self.queue.add("SessionStorage::write_snapshot", async move {
            if let Err(e) = write_snapshot(page.as_ref(), &story_id, snapshot).await {
                error!(story_id = %story_id, error = %e, "Failed to write snapshot");
            }
        })
    }

    pub fn read_snapshot(&self, story_id: &str) -> OperationHandle<Option<Vec<u8>>> {
        let page = self.page.clone();
        let story_id = story_id.to_string();
        self.queue.add("SessionStorage::read_snapshot", async move {
            read_snapshot(page.as_ref(), &story_id)
                .await
                .unwrap_or_else(|e| {
                    error!(story_id = %story_id, error = %e, "Failed to read snapshot");
                    None
                })
        })
    }

    /// Resolves once every operation admitted so far has completed.
    pub fn sync(&self) -> OperationHandle<()> {
        self.queue.sync()
    }

    fn update_story<F>(&self, operation: &'static str, story_id: &str, mutate: F) -> OperationHandle<()>
    where
        F: FnOnce(&mut StoryData) -> bool + Send + 'static,
    {
        let page = self.page.clone();
        let story_id = story_id.to_string();
        self.queue.add(operation, async move {
            if let Err(e) = update_story_data(page.as_ref(), &story_id, mutate).await {
                error!(story_id = %story_id, error = %e, "Failed to update story record");
            }
        })
    }
}

impl Drop for SessionStorage {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn read_story_data(page: &dyn Page, story_id: &str) -> Result<Option<StoryData>> {
    match page.get(&story_key(story_id)).await? {
        Some(value) => Ok(Some(serde_json::from_str(&value)?)),
        None => Ok(None),
    }
}

async fn write_story_data(page: &dyn Page, data: &StoryData) -> Result<()> {
    page.put(&story_key(&data.story_name), serde_json::to_string(data)?)
        .await
}

async fn update_story_data<F>(page: &dyn Page, story_id: &str, mutate: F) -> Result<()>
where
    F: FnOnce(&mut StoryData) -> bool,
{
    let Some(mut data) = read_story_data(page, story_id).await? else {
        debug!(story_id = %story_id, "Update of unknown story ignored");
        return Ok(());
    };
    if mutate(&mut data) {
        write_story_data(page, &data).await?;
    }
    Ok(())
}

async fn write_snapshot(page: &dyn Page, story_id: &str, snapshot: Vec<u8>) -> Result<()> {
    let reference = page.create_reference(snapshot).await?;
    page.put_reference(&story_snapshot_key(story_id), &reference)
        .await
}

async fn read_snapshot(page: &dyn Page, story_id: &str) -> Result<Option<Vec<u8>>> {
    match page.get_reference(&story_snapshot_key(story_id)).await? {
        Some(reference) => page.fetch_reference(&reference).await,
        None => Ok(None),
    }
}

async fn delete_story(store: &dyn PageStore, page: &dyn Page, story_id: &str) -> Result<()> {
    let Some(data) = read_story_data(page, story_id).await? else {
        debug!(story_id = %story_id, "Delete of unknown story ignored");
        return Ok(());
    };

    store.page(&data.story_page_id).clear().await?;
    page.delete(&story_key(story_id)).await?;
    page.delete(&story_snapshot_key(story_id)).await?;
    info!(story_id = %story_id, "Story deleted");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Change feed
// ─────────────────────────────────────────────────────────────────────────────

async fn watch_session_page(mut changes: broadcast::Receiver<PageChange>, callbacks: Arc<Callbacks>) {
    loop {
        let change = match changes.recv().await {
            Ok(change) => change,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Session change feed lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match change {
            PageChange::Put { key, value } => {
                let Some(story_id) = key.strip_prefix(STORY_KEY_PREFIX) else {
                    continue;
                };
                let data: StoryData = match serde_json::from_str(&value) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Ignoring unreadable story record");
                        continue;
                    }
                };
                let callback = callbacks.on_story_updated.lock().clone();
                if let Some(callback) = callback {
                    callback(story_id.to_string(), data);
                }
            }
            PageChange::Delete { key } => {
                let Some(story_id) = key.strip_prefix(STORY_KEY_PREFIX) else {
                    continue;
                };
                let callback = callbacks.on_story_deleted.lock().clone();
                if let Some(callback) = callback {
                    callback(story_id.to_string());
                }
            }
        }
    }
}

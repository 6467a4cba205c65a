//! Per-story storage facade.
//!
//! Module records, link values and entity records of one story, stored in
//! the story's backing page. Like [`SessionStorage`](crate::SessionStorage),
//! every operation is admitted on an internal queue, so [`StoryStorage::sync`]
//! resolves only after all previously issued writes have landed.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sessionmgr_ops::{OperationHandle, OperationQueue};
use sessionmgr_types::{LinkPath, ModuleData, PageId};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::Result;
use crate::keys::{LINK_KEY_PREFIX, MODULE_KEY_PREFIX, entity_key, link_key, module_key};
use crate::page::{Page, PageChange};

/// Called with the new record whenever any module record of the story is
/// written, locally or remotely.
pub type ModuleDataCallback = Arc<dyn Fn(ModuleData) + Send + Sync>;

/// A link value changed. `value` is `None` when the link was erased.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkChange {
    /// Storage key of the link; compare against [`link_key`].
    pub key: String,
    pub value: Option<serde_json::Value>,
}

/// Data held for one entity: a payload per entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub data: BTreeMap<String, String>,
}

impl EntityRecord {
    pub fn types(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }
}

const LINK_FEED_CAPACITY: usize = 256;

pub struct StoryStorage {
    story_id: String,
    page: Arc<dyn Page>,
    queue: OperationQueue,
    on_module_data_updated: Arc<Mutex<Option<ModuleDataCallback>>>,
    link_changes: broadcast::Sender<LinkChange>,
    watcher: JoinHandle<()>,
}

impl StoryStorage {
    pub fn new(story_id: impl Into<String>, page: Arc<dyn Page>) -> Self {
        let story_id = story_id.into();
        let on_module_data_updated = Arc::new(Mutex::new(None));
        let (link_changes, _) = broadcast::channel(LINK_FEED_CAPACITY);
        let watcher = tokio::spawn(watch_story_page(
            story_id.clone(),
            page.watch(),
            on_module_data_updated.clone(),
            link_changes.clone(),
        ));

        Self {
            queue: OperationQueue::new(format!("story_storage:{story_id}")),
            story_id,
            page,
            on_module_data_updated,
            link_changes,
            watcher,
        }
    }

    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    pub fn page_id(&self) -> &PageId {
        self.page.id()
    }

    pub fn set_on_module_data_updated(&self, callback: ModuleDataCallback) {
        *self.on_module_data_updated.lock() = Some(callback);
    }

    // ── Module Data ─────────────────────────────────────────────────────

    pub fn read_module_data(&self, module_path: &[String]) -> OperationHandle<Option<ModuleData>> {
        let page = self.page.clone();
        let key = module_key(module_path);
        self.queue.add("StoryStorage::read_module_data", async move {
            read_json(page.as_ref(), &key).await.unwrap_or_else(|e| {
                error!(key = %key, error = %e, "Failed to read module record");
                None
            })
        })
    }

    /// Every module record of the story, parents before children.
    pub fn read_all_module_data(&self) -> OperationHandle<Vec<ModuleData>> {
        let page = self.page.clone();
        let story_id = self.story_id.clone();
        self.queue.add("StoryStorage::read_all_module_data", async move {
            let entries = match page.scan_prefix(MODULE_KEY_PREFIX).await {
                Ok(entries) => entries,
                Err(e) => {
                    error!(story_id = %story_id, error = %e, "Failed to scan module records");
                    return Vec::new();
                }
            };

            let mut modules: Vec<ModuleData> = entries
                .into_iter()
                .filter_map(|(key, value)| match serde_json::from_str(&value) {
                    Ok(data) => Some(data),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Skipping unreadable module record");
                        None
                    }
                })
                .collect();
            modules.sort_by(|a, b| a.module_path.cmp(&b.module_path));
            modules
        })
    }

    pub fn write_module_data(&self, data: ModuleData) -> OperationHandle<()> {
        let page = self.page.clone();
        self.queue.add("StoryStorage::write_module_data", async move {
            let key = module_key(&data.module_path);
            if let Err(e) = write_json(page.as_ref(), &key, &data).await {
                error!(key = %key, error = %e, "Failed to write module record");
            }
        })
    }

    /// Read-modify-write of one module record. `mutate` sees `None` if the
    /// record does not exist. Nothing is written if the result is `None` or
    /// equal to what was read.
    pub fn update_module_data<F>(&self, module_path: &[String], mutate: F) -> OperationHandle<()>
    where
        F: FnOnce(Option<ModuleData>) -> Option<ModuleData> + Send + 'static,
    {
        let page = self.page.clone();
        let key = module_key(module_path);
        self.queue.add("StoryStorage::update_module_data", async move {
            if let Err(e) = update_json(page.as_ref(), &key, mutate).await {
                error!(key = %key, error = %e, "Failed to update module record");
            }
        })
    }

    // ── Links ───────────────────────────────────────────────────────────

    pub fn get_link_value(&self, link_path: &LinkPath) -> OperationHandle<Option<serde_json::Value>> {
        let page = self.page.clone();
        let key = link_key(link_path);
        self.queue.add("StoryStorage::get_link_value", async move {
            read_json(page.as_ref(), &key).await.unwrap_or_else(|e| {
                error!(key = %key, error = %e, "Failed to read link");
                None
            })
        })
    }

    /// Write a link value. `None` erases the link.
    pub fn set_link_value(
        &self,
        link_path: &LinkPath,
        value: Option<serde_json::Value>,
    ) -> OperationHandle<()> {
        self.update_link_value(link_path, move |_| value)
    }

    pub fn update_link_value<F>(&self, link_path: &LinkPath, mutate: F) -> OperationHandle<()>
    where
        F: FnOnce(Option<serde_json::Value>) -> Option<serde_json::Value> + Send + 'static,
    {
        let page = self.page.clone();
        let key = link_key(link_path);
        self.queue.add("StoryStorage::update_link_value", async move {
            if let Err(e) = update_link(page.as_ref(), &key, mutate).await {
                error!(key = %key, error = %e, "Failed to update link");
            }
        })
    }

    /// Subscribe to link value changes from any writer.
    pub fn subscribe_links(&self) -> broadcast::Receiver<LinkChange> {
        self.link_changes.subscribe()
    }

    // ── Entities ────────────────────────────────────────────────────────

    pub fn read_entity(&self, cookie: &str) -> OperationHandle<Option<EntityRecord>> {
        let page = self.page.clone();
        let key = entity_key(cookie);
        self.queue.add("StoryStorage::read_entity", async move {
            read_json(page.as_ref(), &key).await.unwrap_or_else(|e| {
                error!(key = %key, error = %e, "Failed to read entity");
                None
            })
        })
    }

    pub fn write_entity(&self, cookie: &str, record: EntityRecord) -> OperationHandle<()> {
        let page = self.page.clone();
        let key = entity_key(cookie);
        self.queue.add("StoryStorage::write_entity", async move {
            if let Err(e) = write_json(page.as_ref(), &key, &record).await {
                error!(key = %key, error = %e, "Failed to write entity");
            }
        })
    }

    /// Resolves once every operation issued so far has completed.
    pub fn sync(&self) -> OperationHandle<()> {
        self.queue.sync()
    }
}

impl Drop for StoryStorage {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

impl std::fmt::Debug for StoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryStorage")
            .field("story_id", &self.story_id)
            .field("page", self.page.id())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn read_json<T: serde::de::DeserializeOwned>(page: &dyn Page, key: &str) -> Result<Option<T>> {
    match page.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_str(&value)?)),
        None => Ok(None),
    }
}

async fn write_json<T: Serialize + ?Sized>(page: &dyn Page, key: &str, value: &T) -> Result<()> {
    page.put(key, serde_json::to_string(value)?).await
}

async fn update_json<T, F>(page: &dyn Page, key: &str, mutate: F) -> Result<()>
where
    T: Serialize + serde::de::DeserializeOwned,
    F: FnOnce(Option<T>) -> Option<T>,
{
    let current: Option<T> = read_json(page, key).await?;
    let unchanged = current.as_ref().map(|value| serde_json::to_string(value)).transpose()?;
    match mutate(current) {
        Some(updated) => {
            let encoded = serde_json::to_string(&updated)?;
            if unchanged.as_deref() == Some(encoded.as_str()) {
                debug!(key = %key, "Record unchanged; skipping write");
                return Ok(());
            }
            page.put(key, encoded).await
        }
        None => Ok(()),
    }
}

async fn update_link<F>(page: &dyn Page, key: &str, mutate: F) -> Result<()>
where
    F: FnOnce(Option<serde_json::Value>) -> Option<serde_json::Value>,
{
    let current: Option<serde_json::Value> = read_json(page, key).await?;
    match mutate(current.clone()) {
        Some(value) if Some(&value) != current.as_ref() => write_json(page, key, &value).await,
        Some(_) => Ok(()),
        None if current.is_some() => page.delete(key).await,
        None => Ok(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Change feed
// ─────────────────────────────────────────────────────────────────────────────

async fn watch_story_page(
    story_id: String,
    mut changes: broadcast::Receiver<PageChange>,
    on_module_data_updated: Arc<Mutex<Option<ModuleDataCallback>>>,
    link_changes: broadcast::Sender<LinkChange>,
) {
    loop {
        let change = match changes.recv().await {
            Ok(change) => change,
            Err(RecvError::Lagged(missed)) => {
                warn!(story_id = %story_id, missed, "Story change feed lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match change {
            PageChange::Put { key, value } if key.starts_with(MODULE_KEY_PREFIX) => {
                let data: ModuleData = match serde_json::from_str(&value) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Ignoring unreadable module record");
                        continue;
                    }
                };
                let callback = on_module_data_updated.lock().clone();
                if let Some(callback) = callback {
                    callback(data);
                }
            }
            PageChange::Put { key, value } if key.starts_with(LINK_KEY_PREFIX) => {
                match serde_json::from_str(&value) {
                    Ok(value) => {
                        let _ = link_changes.send(LinkChange {
                            key,
                            value: Some(value),
                        });
                    }
                    Err(e) => warn!(key = %key, error = %e, "Ignoring unreadable link value"),
                }
            }
            PageChange::Delete { key } if key.starts_with(LINK_KEY_PREFIX) => {
                let _ = link_changes.send(LinkChange { key, value: None });
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLedger;
    use crate::page::PageStore;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    fn story_storage() -> StoryStorage {
        let ledger = MemoryLedger::new();
        StoryStorage::new("story", ledger.page(&PageId::new("story-page")))
    }

    #[tokio::test]
    async fn test_module_data_roundtrip_sorted_parent_first() {
        let storage = story_storage();
        let _ = storage.write_module_data(ModuleData::new("child", path(&["a", "b"])));
        let _ = storage.write_module_data(ModuleData::new("root", path(&["a"])));
        let _ = storage.write_module_data(ModuleData::new("other", path(&["0"])));

        let all = storage.read_all_module_data().await.unwrap();
        let paths: Vec<_> = all.iter().map(|m| m.module_path.clone()).collect();
        assert_eq!(paths, vec![path(&["0"]), path(&["a"]), path(&["a", "b"])]);

        let root = storage.read_module_data(&path(&["a"])).await.unwrap().unwrap();
        assert_eq!(root.module_url, "root");
    }

    #[tokio::test]
    async fn test_update_module_data_skips_unchanged() {
        let storage = story_storage();
        storage
            .write_module_data(ModuleData::new("m", path(&["a"])))
            .await
            .unwrap();

        let mut changes = storage.page.watch();
        storage
            .update_module_data(&path(&["a"]), |data| data)
            .await
            .unwrap();
        assert!(changes.try_recv().is_err());

        storage
            .update_module_data(&path(&["a"]), |data| {
                data.map(|mut d| {
                    d.module_deleted = true;
                    d
                })
            })
            .await
            .unwrap();
        assert_eq!(changes.try_recv().unwrap().key(), "module:a");
    }

    #[tokio::test]
    async fn test_module_data_callback_fires() {
        let storage = story_storage();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        storage.set_on_module_data_updated(Arc::new(move |data| {
            let _ = tx.send(data);
        }));

        storage
            .write_module_data(ModuleData::new("m", path(&["a"])))
            .await
            .unwrap();
        let data = rx.recv().await.unwrap();
        assert_eq!(data.module_path, path(&["a"]));
    }

    #[tokio::test]
    async fn test_link_set_get_and_erase() {
        let storage = story_storage();
        let link = LinkPath::new(path(&["a"]), "selection");
        let mut feed = storage.subscribe_links();

        storage
            .set_link_value(&link, Some(serde_json::json!({"id": 7})))
            .await
            .unwrap();
        assert_eq!(
            storage.get_link_value(&link).await.unwrap(),
            Some(serde_json::json!({"id": 7}))
        );

        storage.set_link_value(&link, None).await.unwrap();
        assert!(storage.get_link_value(&link).await.unwrap().is_none());

        let first = feed.recv().await.unwrap();
        assert_eq!(first.key, link_key(&link));
        assert_eq!(first.value, Some(serde_json::json!({"id": 7})));
        assert_eq!(feed.recv().await.unwrap().value, None);
    }

    #[tokio::test]
    async fn test_entity_roundtrip() {
        let storage = story_storage();
        let mut record = EntityRecord::default();
        record.data.insert("com.example.contact".to_string(), "{}".to_string());

        storage.write_entity("c1", record.clone()).await.unwrap();
        let back = storage.read_entity("c1").await.unwrap().unwrap();
        assert_eq!(back, record);
        assert_eq!(back.types(), vec!["com.example.contact".to_string()]);
        assert!(storage.read_entity("c2").await.unwrap().is_none());
    }
}

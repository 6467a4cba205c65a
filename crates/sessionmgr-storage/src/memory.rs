//! In-process page store.
//!
//! Every `SessionStorage` built over the same [`MemoryLedger`] shares its
//! pages, which makes a second instance behave like another device syncing
//! the same user's data.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sessionmgr_types::PageId;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::trace;

use crate::page::{Page, PageChange, PageStore, Reference};
use crate::Result;

/// Capacity of each page's change feed. Slow watchers past this lag behind
/// and are told how many changes they missed.
pub const CHANGE_FEED_CAPACITY: usize = 1024;

type BlobStore = Arc<Mutex<HashMap<Reference, Vec<u8>>>>;

/// In-memory [`PageStore`].
#[derive(Default)]
pub struct MemoryLedger {
    pages: Mutex<HashMap<PageId, Arc<MemoryPage>>>,
    blobs: BlobStore,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every page that has been opened.
    pub fn page_ids(&self) -> Vec<PageId> {
        let mut ids: Vec<_> = self.pages.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl PageStore for MemoryLedger {
    fn page(&self, id: &PageId) -> Arc<dyn Page> {
        let mut pages = self.pages.lock();
        let page = pages
            .entry(id.clone())
            .or_insert_with(|| Arc::new(MemoryPage::new(id.clone(), self.blobs.clone())));
        page.clone()
    }
}

/// One page of a [`MemoryLedger`].
pub struct MemoryPage {
    id: PageId,
    entries: RwLock<BTreeMap<String, String>>,
    blobs: BlobStore,
    changes: broadcast::Sender<PageChange>,
}

impl MemoryPage {
    fn new(id: PageId, blobs: BlobStore) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            id,
            entries: RwLock::new(BTreeMap::new()),
            blobs,
            changes,
        }
    }

    fn publish(&self, change: PageChange) {
        trace!(page = %self.id, key = %change.key(), "Page changed");
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl Page for MemoryPage {
    fn id(&self) -> &PageId {
        &self.id
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value.clone());
        // Publish under the lock so the feed order matches the write order.
        self.publish(PageChange::Put {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.publish(PageChange::Delete {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.write();
        for key in std::mem::take(&mut *entries).into_keys() {
            self.publish(PageChange::Delete { key });
        }
        Ok(())
    }

    async fn create_reference(&self, data: Vec<u8>) -> Result<Reference> {
        let reference = Reference::new(hex::encode(Sha256::digest(&data)));
        self.blobs.lock().insert(reference.clone(), data);
        Ok(reference)
    }

    async fn fetch_reference(&self, reference: &Reference) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(reference).cloned())
    }

    fn watch(&self) -> broadcast::Receiver<PageChange> {
        self.changes.subscribe()
    }
}

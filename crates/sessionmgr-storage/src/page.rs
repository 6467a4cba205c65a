//! Page store abstraction.
//!
//! A page is an independent key-value namespace inside a replicated store.
//! Writers on every device see each other's changes through [`Page::watch`];
//! a local write is reported to local watchers exactly like a remote one.
//!
//! # Architecture
//!
//! ```text
//! PageStore (trait)        - Resolves page ids to pages
//!     └── MemoryLedger     - In-process store shared by all connections
//!
//! Page (trait)             - Key-value operations, blob references, change feed
//!     └── MemoryPage
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sessionmgr_types::PageId;
use tokio::sync::broadcast;

use crate::Result;

/// A change to one key of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageChange {
    Put { key: String, value: String },
    /// Deletions carry only the key; the old value is gone.
    Delete { key: String },
}

impl PageChange {
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Content address of a blob stored outside the page's key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One versioned key-value namespace.
///
/// Last writer wins per key. Values are JSON text.
#[async_trait]
pub trait Page: Send + Sync {
    fn id(&self) -> &PageId;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: String) -> Result<()>;

    /// Deleting an absent key is a no-op and emits no change.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All entries whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    /// Remove every entry of the page.
    async fn clear(&self) -> Result<()>;

    /// Store `data` out of line and return its content address.
    async fn create_reference(&self, data: Vec<u8>) -> Result<Reference>;

    async fn fetch_reference(&self, reference: &Reference) -> Result<Option<Vec<u8>>>;

    /// Store a reference under `key`.
    async fn put_reference(&self, key: &str, reference: &Reference) -> Result<()> {
        self.put(key, serde_json::to_string(reference)?).await
    }

    /// Read back a reference stored with [`put_reference`](Self::put_reference).
    async fn get_reference(&self, key: &str) -> Result<Option<Reference>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Subscribe to changes made through any connection to this page.
    ///
    /// Only changes made after the call are delivered.
    fn watch(&self) -> broadcast::Receiver<PageChange>;
}

/// Resolves page ids to pages. Asking for an unknown page creates it empty.
pub trait PageStore: Send + Sync {
    fn page(&self, id: &PageId) -> Arc<dyn Page>;
}

//! Link handles: named shared values scoped to a module path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sessionmgr_storage::keys::link_key;
use sessionmgr_storage::{LinkChange, StoryStorage};
use sessionmgr_types::LinkPath;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::{Result, StoryError};

/// A binding to one link of a story.
///
/// Handles stay usable until the story stops, at which point every handle
/// the controller gave out is closed and further reads and writes fail
/// with [`StoryError::LinkClosed`].
pub struct Link {
    path: LinkPath,
    storage: Arc<StoryStorage>,
    closed: Arc<AtomicBool>,
}

impl Link {
    pub(crate) fn new(path: LinkPath, storage: Arc<StoryStorage>, closed: Arc<AtomicBool>) -> Self {
        Self {
            path,
            storage,
            closed,
        }
    }

    pub fn path(&self) -> &LinkPath {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn get(&self) -> Result<Option<serde_json::Value>> {
        self.check_open()?;
        Ok(self.storage.get_link_value(&self.path).await?)
    }

    pub async fn set(&self, value: serde_json::Value) -> Result<()> {
        self.check_open()?;
        Ok(self.storage.set_link_value(&self.path, Some(value)).await?)
    }

    pub async fn erase(&self) -> Result<()> {
        self.check_open()?;
        Ok(self.storage.set_link_value(&self.path, None).await?)
    }

    /// Stream of subsequent values of this link, from any writer.
    pub fn watch(&self) -> LinkWatcher {
        LinkWatcher {
            key: link_key(&self.path),
            changes: self.storage.subscribe_links(),
            closed: self.closed.clone(),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StoryError::LinkClosed(self.path.to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receives new values of one link.
pub struct LinkWatcher {
    key: String,
    changes: broadcast::Receiver<LinkChange>,
    closed: Arc<AtomicBool>,
}

impl LinkWatcher {
    /// The next value of the link; `Some(None)` when it was erased. Returns
    /// `None` once the link is closed or the story storage is gone.
    pub async fn changed(&mut self) -> Option<Option<serde_json::Value>> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            match self.changes.recv().await {
                Ok(change) if change.key == self.key => return Some(change.value),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    warn!(link = %self.key, missed, "Link watcher lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

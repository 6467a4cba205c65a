//! Story and session persistence.
//!
//! Session-wide story metadata lives in one page of a replicated page store
//! ([`SessionStorage`]); each story keeps its module records, links and
//! entities in its own backing page ([`StoryStorage`]). Both facades admit
//! every operation on an internal operation queue and report changes from
//! any writer through callbacks.

pub mod error;
pub mod keys;
pub mod memory;
pub mod page;
mod session_storage;
mod story_storage;

pub use error::{Result, StorageError};
pub use memory::MemoryLedger;
pub use page::{Page, PageChange, PageStore, Reference};
pub use session_storage::{SessionStorage, StoryDeletedCallback, StoryUpdatedCallback};
pub use story_storage::{EntityRecord, LinkChange, ModuleDataCallback, StoryStorage};

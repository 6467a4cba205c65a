//! Serial operation queue.
//!
//! Every stateful object in the story runtime owns an [`OperationQueue`]
//! and funnels its public mutations through it, so that operations on one
//! object never interleave even when they suspend on I/O. Callers get an
//! [`OperationHandle`] back and may await it or drop it.
//!
//! # Example
//!
//! ```rust,ignore
//! use sessionmgr_ops::OperationQueue;
//!
//! let queue = OperationQueue::new("story");
//! let handle = queue.add("compute", async { 40 + 2 });
//! assert_eq!(handle.await?, 42);
//! ```

mod error;
mod queue;

pub use error::{Error, Result};
pub use queue::{OperationHandle, OperationQueue};

//! FIFO queue of asynchronous operations executed one at a time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::error::{Error, Result};

type BoxedOperation = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct QueuedOperation {
    name: String,
    future: BoxedOperation,
}

/// Runs enqueued operations strictly in submission order, never more than
/// one at a time.
///
/// An operation may suspend; the next one starts only after it has fully
/// completed. Operations are enqueued at the moment [`add`](Self::add) is
/// called, not when the returned handle is first polled. Dropping the queue
/// aborts the running operation and abandons everything still pending.
///
/// An operation must never await another operation on the same queue: the
/// inner one cannot start until the outer one finishes. Nested steps are
/// written as plain futures awaited inline.
pub struct OperationQueue {
    name: Arc<str>,
    sender: mpsc::UnboundedSender<QueuedOperation>,
    pending: Arc<AtomicUsize>,
    driver: JoinHandle<()>,
}

impl OperationQueue {
    /// Create a queue and spawn its driver task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(name: impl Into<String>) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let driver = tokio::spawn(drive(name.clone(), receiver, pending.clone()));

        Self {
            name,
            sender,
            pending,
            driver,
        }
    }

    /// Name used in log output and abandonment errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of operations enqueued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Enqueue `future` to run after every previously enqueued operation.
    pub fn add<F, T>(&self, operation: impl Into<String>, future: F) -> OperationHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let operation = operation.into();
        let (result_tx, result_rx) = oneshot::channel();

        let queued = QueuedOperation {
            name: operation.clone(),
            future: Box::pin(async move {
                let value = future.await;
                // The caller may have dropped the handle; the work still ran.
                let _ = result_tx.send(value);
            }),
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(queued).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(queue = %self.name, operation = %operation, "Queue driver has stopped");
        }

        OperationHandle {
            queue: self.name.clone(),
            operation,
            receiver: result_rx,
        }
    }

    /// Enqueue an empty operation; resolves once every operation enqueued
    /// before it has completed.
    pub fn sync(&self) -> OperationHandle<()> {
        self.add("sync", async {})
    }
}

impl Drop for OperationQueue {
    fn drop(&mut self) {
        trace!(queue = %self.name, pending = self.pending(), "Tearing down operation queue");
        self.driver.abort();
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}

async fn drive(
    name: Arc<str>,
    mut receiver: mpsc::UnboundedReceiver<QueuedOperation>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(queued) = receiver.recv().await {
        trace!(queue = %name, operation = %queued.name, "Operation started");
        queued.future.await;
        pending.fetch_sub(1, Ordering::SeqCst);
        trace!(queue = %name, operation = %queued.name, "Operation finished");
    }
}

/// Completion handle for a queued operation.
///
/// Resolves to the operation's output, or to [`Error::Abandoned`] if the
/// queue was dropped before the operation finished. Dropping the handle does
/// not cancel the operation.
#[must_use = "dropping the handle does not cancel the operation; await it to observe the result"]
pub struct OperationHandle<T> {
    queue: Arc<str>,
    operation: String,
    receiver: oneshot::Receiver<T>,
}

impl<T> OperationHandle<T> {
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl<T> Future for OperationHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(Ok(value)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Abandoned {
                queue: self.queue.to_string(),
                operation: self.operation.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("queue", &self.queue)
            .field("operation", &self.operation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parking_lot::Mutex;

    /// Shared log for ordering assertions.
    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    #[tokio::test]
    async fn test_returns_operation_output() {
        let queue = OperationQueue::new("test");
        let value = queue.add("answer", async { 40 + 2 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_run_in_fifo_order_without_overlap() {
        let queue = OperationQueue::new("test");
        let log = Log::default();

        let mut handles = Vec::new();
        for (i, delay) in [30u64, 10, 20].into_iter().enumerate() {
            let log = log.clone();
            handles.push(queue.add(format!("op{i}"), async move {
                log.push(format!("start {i}"));
                tokio::time::sleep(Duration::from_millis(delay)).await;
                log.push(format!("end {i}"));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(
            log.entries(),
            vec!["start 0", "end 0", "start 1", "end 1", "start 2", "end 2"]
        );
    }

    #[tokio::test]
    async fn test_enqueued_eagerly_without_polling_handle() {
        let queue = OperationQueue::new("test");
        let log = Log::default();

        let first = {
            let log = log.clone();
            queue.add("first", async move { log.push("first") })
        };
        let second = {
            let log = log.clone();
            queue.add("second", async move { log.push("second") })
        };

        // Await only the later one; the earlier must already have run.
        second.await.unwrap();
        assert_eq!(log.entries(), vec!["first", "second"]);
        drop(first);
    }

    #[tokio::test]
    async fn test_dropped_handle_still_runs() {
        let queue = OperationQueue::new("test");
        let log = Log::default();

        let log2 = log.clone();
        drop(queue.add("fire_and_forget", async move { log2.push("ran") }));

        queue.sync().await.unwrap();
        assert_eq!(log.entries(), vec!["ran"]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_waits_for_prior_operations() {
        let queue = OperationQueue::new("test");
        let log = Log::default();

        let log2 = log.clone();
        let _slow = queue.add("slow", async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            log2.push("slow done");
        });

        queue.sync().await.unwrap();
        assert_eq!(log.entries(), vec!["slow done"]);
    }

    #[tokio::test]
    async fn test_pending_operations_abandoned_when_queue_dropped() {
        let queue = OperationQueue::new("story");
        let (_block_tx, block_rx) = oneshot::channel::<()>();

        let blocked = queue.add("blocked", async move {
            let _ = block_rx.await;
        });
        let waiting = queue.add("waiting", async { 1 });

        drop(queue);

        assert!(blocked.await.is_err());
        let err = waiting.await.unwrap_err();
        assert_eq!(
            err,
            Error::Abandoned {
                queue: "story".to_string(),
                operation: "waiting".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_operation_enqueued_from_inside_runs_after_current() {
        let queue = Arc::new(OperationQueue::new("test"));
        let log = Log::default();

        let inner_handle = {
            let queue_ref = queue.clone();
            let log = log.clone();
            queue
                .add("outer", async move {
                    log.push("outer start");
                    let log_inner = log.clone();
                    let inner = queue_ref.add("inner", async move { log_inner.push("inner") });
                    log.push("outer end");
                    inner
                })
                .await
                .unwrap()
        };

        inner_handle.await.unwrap();
        assert_eq!(log.entries(), vec!["outer start", "outer end", "inner"]);
    }
}

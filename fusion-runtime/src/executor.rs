//! Subgraph executors and their lifecycle.

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::services::SubgraphRequest;
use crate::services::SubgraphResponse;

/// A fetcher for subgraph data over some transport.
///
/// An executor turns one [`SubgraphRequest`] into a single response or, for
/// subscriptions, a stream of responses. Executors are built once per
/// subgraph by a transport factory and reused for every request.
#[async_trait]
pub trait SubgraphExecutor: Send + Sync {
    async fn execute(&self, request: SubgraphRequest) -> Result<SubgraphResponse, FetchError>;

    /// Release any resources held by this executor.
    ///
    /// Invoked exactly once, at shutdown, for executors registered on the
    /// [`ExecutorStack`]. The default does nothing.
    async fn dispose(&self) {}
}

/// A reference-counted, shareable executor.
pub type SharedExecutor = Arc<dyn SubgraphExecutor>;

/// Wrap an async closure as a [`SubgraphExecutor`].
///
/// Useful for tests and for hooks that substitute a canned executor via
/// `set_executor`.
pub fn from_fn<F, Fut>(f: F) -> SharedExecutor
where
    F: Fn(SubgraphRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SubgraphResponse, FetchError>> + Send + 'static,
{
    Arc::new(FnExecutor(f))
}

struct FnExecutor<F>(F);

#[async_trait]
impl<F, Fut> SubgraphExecutor for FnExecutor<F>
where
    F: Fn(SubgraphRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SubgraphResponse, FetchError>> + Send + 'static,
{
    async fn execute(&self, request: SubgraphRequest) -> Result<SubgraphResponse, FetchError> {
        (self.0)(request).await
    }
}

/// The set of transport executors awaiting disposal at shutdown.
///
/// Append-only while the runtime serves requests. `dispose_all` closes the
/// stack first so in-flight initializations cannot slip an executor past
/// disposal, then drains entries in LIFO order.
#[derive(Default)]
pub struct ExecutorStack {
    entries: Mutex<Vec<SharedExecutor>>,
    closed: AtomicBool,
}

impl ExecutorStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for disposal. Returns `false` when the stack is
    /// already closed, in which case the executor was not registered.
    pub fn push(&self, executor: SharedExecutor) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.entries
            .lock()
            .expect("lock poisoned")
            .push(executor);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The number of executors currently registered.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the stack and dispose every registered executor, most recently
    /// registered first.
    pub async fn dispose_all(&self) {
        self.closed.store(true, Ordering::Release);
        loop {
            let executor = self.entries.lock().expect("lock poisoned").pop();
            match executor {
                Some(executor) => executor.dispose().await,
                None => break,
            }
        }
    }
}

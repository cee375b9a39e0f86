//! Registry of per-subgraph executors, initialized on first use.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::OnceCell;

use crate::executor::SharedExecutor;
use crate::naming::SubgraphName;

/// Collection of lazily-initialized subgraph executors.
///
/// Each subgraph owns one cell. The cell is created synchronously, before any
/// await point, so concurrent first requests to the same subgraph race for
/// the same cell rather than starting independent initializations: the first
/// caller runs the initialization and everyone else awaits it. A failed
/// initialization leaves the cell empty, so the next request retries.
#[derive(Default)]
pub(crate) struct ExecutorCache {
    entries: Mutex<HashMap<SubgraphName, Arc<OnceCell<SharedExecutor>>>>,
}

impl ExecutorCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The cell for a subgraph, created on first access.
    pub(crate) fn entry(&self, name: &SubgraphName) -> Arc<OnceCell<SharedExecutor>> {
        self.entries
            .lock()
            .expect("lock poisoned")
            .entry(name.clone())
            .or_default()
            .clone()
    }

    /// Whether the subgraph's executor finished initializing.
    #[cfg(test)]
    pub(crate) fn is_initialized(&self, name: &SubgraphName) -> bool {
        self.entries
            .lock()
            .expect("lock poisoned")
            .get(name)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }
}

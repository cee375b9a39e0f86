//! Request and process-wide context.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json_bytes::Value;

use crate::json_ext::Object;

/// Context shared throughout the lifecycle of a single client request.
///
/// Cloning is cheap: clones share the same entry map, so data inserted by a
/// hook is visible to everything else holding the same request.
#[derive(Clone, Debug, Default)]
pub struct Context {
    /// An identifier assigned to the request by the host, if any. Surfaced to
    /// hooks and recorded on the per-request tracing span.
    request_id: Option<Arc<str>>,

    entries: Arc<DashMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context carrying the host-assigned request identifier.
    pub fn with_request_id(request_id: impl AsRef<str>) -> Self {
        Self {
            request_id: Some(Arc::from(request_id.as_ref())),
            entries: Default::default(),
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Insert a value, returning the previous one if the key was occupied.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }
}

/// Process-wide context supplied by the host at startup.
///
/// Carries any host fields that transports need when constructing executors.
/// Immutable after startup; the logger of the host lives in the global
/// `tracing` subscriber rather than here.
#[derive(Clone, Debug, Default)]
pub struct TransportContext {
    pub extensions: Object,
}

impl TransportContext {
    pub fn new(extensions: Object) -> Self {
        Self { extensions }
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn test_clones_share_entries() {
        let context = Context::with_request_id("req-1");
        let clone = context.clone();
        context.insert("k", json!(5));
        assert_eq!(clone.get("k"), Some(json!(5)));
        assert_eq!(clone.request_id(), Some("req-1"));
    }
}

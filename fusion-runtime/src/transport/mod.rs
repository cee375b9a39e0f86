//! Transport executor factories and their resolution.
//!
//! A transport is a protocol-specific strategy for talking to one subgraph.
//! The runtime never opens connections itself: it resolves a
//! [`TransportFactory`] for the transport kind named by a subgraph's
//! [`TransportEntry`] and lets the factory build the executor. Factories come
//! from an inline registry supplied at construction, or from the process-wide
//! registry that transport crates populate at startup under their
//! conventional module name.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use apollo_compiler::validation::Valid;
use apollo_compiler::Schema;
use async_trait::async_trait;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;
use tower::BoxError;

use crate::context::TransportContext;
use crate::error::FetchError;
use crate::executor::SharedExecutor;
use crate::json_ext::Object;
use crate::naming::SubgraphName;

/// Per-subgraph transport configuration carried by the supergraph.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TransportEntry {
    /// The transport kind, e.g. `"http"` or `"ws"`.
    pub kind: String,

    /// Where the subgraph lives. Interpretation is the transport's concern.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<String>,

    /// Transport-specific options, opaque to the runtime.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub options: Object,
}

#[buildstructor::buildstructor]
impl TransportEntry {
    #[builder(visibility = "pub")]
    fn new(
        kind: String,
        location: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        options: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            kind,
            location,
            options,
        }
    }
}

/// Late-bound accessor for a subgraph's schema, so supergraph hot-swaps stay
/// observable after executors are built.
pub type SubgraphSchemaGetter =
    Arc<dyn Fn(&SubgraphName) -> Option<Arc<Valid<Schema>>> + Send + Sync>;

/// Late-bound accessor for a subgraph's transport entry.
pub type TransportEntryGetter = Arc<dyn Fn(&SubgraphName) -> Option<TransportEntry> + Send + Sync>;

/// Everything a transport factory may consult while building the executor for
/// one subgraph.
///
/// The schema and transport entry are read through getters rather than
/// captured, so an executor built before a supergraph reload still observes
/// the current state on later reads.
#[derive(Clone)]
pub struct SubgraphTransportContext {
    subgraph_name: SubgraphName,
    transport_context: TransportContext,
    subgraph_schemas: SubgraphSchemaGetter,
    transport_entries: TransportEntryGetter,
}

impl SubgraphTransportContext {
    pub(crate) fn new(
        subgraph_name: SubgraphName,
        transport_context: TransportContext,
        subgraph_schemas: SubgraphSchemaGetter,
        transport_entries: TransportEntryGetter,
    ) -> Self {
        Self {
            subgraph_name,
            transport_context,
            subgraph_schemas,
            transport_entries,
        }
    }

    pub fn subgraph_name(&self) -> &SubgraphName {
        &self.subgraph_name
    }

    pub fn transport_context(&self) -> &TransportContext {
        &self.transport_context
    }

    /// The subgraph's current schema.
    pub fn subgraph_schema(&self) -> Option<Arc<Valid<Schema>>> {
        (self.subgraph_schemas)(&self.subgraph_name)
    }

    /// The subgraph's current transport entry.
    pub fn transport_entry(&self) -> Option<TransportEntry> {
        (self.transport_entries)(&self.subgraph_name)
    }
}

/// Builds the executor that serves every request to one subgraph.
///
/// Transport crates implement this once per transport kind. The factory is
/// called at most once per subgraph for the life of the runtime; the executor
/// it returns is cached, wrapped with the hook pipeline and registered for
/// disposal.
#[async_trait]
pub trait TransportFactory: std::fmt::Debug + Send + Sync + 'static {
    async fn subgraph_executor(
        &self,
        context: &SubgraphTransportContext,
    ) -> Result<SharedExecutor, BoxError>;
}

/// A reference-counted, shareable transport factory.
pub type SharedTransportFactory = Arc<dyn TransportFactory>;

/// An inline resolver function mapping a transport kind to a factory.
pub type TransportResolver =
    dyn Fn(&str) -> BoxFuture<'static, Option<SharedTransportFactory>> + Send + Sync;

/// Where the runtime looks for transport factories before falling back to the
/// process-wide registry.
#[derive(Clone)]
pub enum TransportSource {
    /// An inline mapping from transport kind to factory.
    Registry(HashMap<String, SharedTransportFactory>),
    /// An inline, possibly asynchronous resolver function.
    Resolver(Arc<TransportResolver>),
}

static TRANSPORT_REGISTRY: Lazy<Mutex<HashMap<String, SharedTransportFactory>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Register a transport factory under a module name.
///
/// Transport crates call this at startup with their conventional module name
/// (see [`conventional_transport_name`]) so subgraphs can reach them without
/// any inline configuration.
pub fn register_transport(name: impl Into<String>, factory: SharedTransportFactory) {
    TRANSPORT_REGISTRY
        .lock()
        .expect("lock poisoned")
        .insert(name.into(), factory);
}

/// Get a copy of the registered transport factories.
pub fn registered_transports() -> HashMap<String, SharedTransportFactory> {
    TRANSPORT_REGISTRY.lock().expect("lock poisoned").clone()
}

/// The module name a transport of the given kind is expected to register
/// under.
pub fn conventional_transport_name(kind: &str) -> String {
    format!("fusion-transport-{kind}")
}

/// Resolve the factory for a transport kind.
///
/// Resolution order, first match wins: the inline resolver function, the
/// inline mapping, then the process-wide registry under the conventional
/// module name.
pub(crate) async fn resolve_factory(
    source: Option<&TransportSource>,
    kind: &str,
) -> Result<SharedTransportFactory, FetchError> {
    tracing::debug!(transport.kind = kind, "resolving transport factory");
    match source {
        Some(TransportSource::Resolver(resolver)) => {
            if let Some(factory) = resolver(kind).await {
                return Ok(factory);
            }
        }
        Some(TransportSource::Registry(registry)) => {
            if let Some(factory) = registry.get(kind) {
                return Ok(factory.clone());
            }
        }
        None => {}
    }

    let module = conventional_transport_name(kind);
    if let Some(factory) = TRANSPORT_REGISTRY
        .lock()
        .expect("lock poisoned")
        .get(&module)
    {
        return Ok(factory.clone());
    }

    tracing::error!(
        transport.kind = kind,
        transport.module = module.as_str(),
        "no transport factory found"
    );
    Err(FetchError::TransportNotFound {
        kind: kind.to_string(),
        module,
    })
}

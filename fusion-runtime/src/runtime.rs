//! The runtime that routes operations to subgraph executors.

use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::validation::Valid;
use apollo_compiler::Schema;

use crate::context::Context;
use crate::context::TransportContext;
use crate::error::FetchError;
use crate::error::SchemaError;
use crate::executor::ExecutorStack;
use crate::executor::SharedExecutor;
use crate::graphql;
use crate::graphql::OperationKind;
use crate::naming::SubgraphName;
use crate::plugin::wrap_executor_with_hooks;
use crate::plugin::SubgraphExecuteHook;
use crate::service_registry::ExecutorCache;
use crate::services::SubgraphRequest;
use crate::services::SubgraphResponse;
use crate::spec::federation;
use crate::spec::federation::TranslationCache;
use crate::spec::schema;
use crate::spec::stitching;
use crate::spec::stitching::Subschema;
use crate::spec::stitching::UnifiedSchema;
use crate::transport;
use crate::transport::SubgraphSchemaGetter;
use crate::transport::SubgraphTransportContext;
use crate::transport::TransportEntry;
use crate::transport::TransportEntryGetter;
use crate::transport::TransportSource;

/// The subgraph execution plane of the gateway.
///
/// Owns the per-subgraph executor cache, the hook chain wrapped around every
/// executor, and the merger that composes subgraph schemas into the unified
/// schema. The unified schema's delegation layer calls
/// [`execute_subgraph`](FusionRuntime::execute_subgraph) for every subgraph
/// fetch.
pub struct FusionRuntime {
    transports: Option<TransportSource>,
    transport_entries: Arc<HashMap<SubgraphName, TransportEntry>>,
    subgraph_schemas: SubgraphSchemaGetter,
    hooks: Arc<[Arc<dyn SubgraphExecuteHook>]>,
    transport_context: TransportContext,
    executor_stack: Arc<ExecutorStack>,
    executors: ExecutorCache,
    translations: TranslationCache,
}

#[buildstructor::buildstructor]
impl FusionRuntime {
    #[builder(visibility = "pub")]
    fn new(
        transports: Option<TransportSource>,
        transport_entries: HashMap<SubgraphName, TransportEntry>,
        subgraph_schemas: Option<SubgraphSchemaGetter>,
        hooks: Vec<Arc<dyn SubgraphExecuteHook>>,
        transport_context: Option<TransportContext>,
        executor_stack: Option<Arc<ExecutorStack>>,
    ) -> Self {
        Self {
            transports,
            transport_entries: Arc::new(transport_entries),
            subgraph_schemas: subgraph_schemas.unwrap_or_else(|| Arc::new(|_| None)),
            hooks: hooks.into(),
            transport_context: transport_context.unwrap_or_default(),
            executor_stack: executor_stack.unwrap_or_default(),
            executors: ExecutorCache::new(),
            translations: TranslationCache::default(),
        }
    }
}

impl FusionRuntime {
    /// Execute a request against one subgraph.
    ///
    /// The first call for a subgraph resolves its transport, builds and
    /// caches the hook-wrapped executor and registers it for disposal;
    /// concurrent first calls share that one initialization. Every later
    /// call goes straight to the cached executor. A failed initialization is
    /// not cached: the next call retries it.
    pub async fn execute_subgraph(
        &self,
        subgraph_name: &SubgraphName,
        request: SubgraphRequest,
    ) -> Result<SubgraphResponse, FetchError> {
        if self.executor_stack.is_closed() {
            return Err(FetchError::ShutdownInProgress {
                service: subgraph_name.to_string(),
            });
        }
        let cell = self.executors.entry(subgraph_name);
        let executor = cell
            .get_or_try_init(|| self.build_executor(subgraph_name))
            .await?
            .clone();
        executor.execute(request).await
    }

    async fn build_executor(
        &self,
        subgraph_name: &SubgraphName,
    ) -> Result<SharedExecutor, FetchError> {
        let entry = self.transport_entries.get(subgraph_name).ok_or_else(|| {
            FetchError::TransportEntryNotFound {
                service: subgraph_name.to_string(),
            }
        })?;
        tracing::debug!(
            subgraph.name = %subgraph_name,
            transport.kind = entry.kind.as_str(),
            "initializing subgraph executor"
        );
        let factory = transport::resolve_factory(self.transports.as_ref(), &entry.kind).await?;
        let context = SubgraphTransportContext::new(
            subgraph_name.clone(),
            self.transport_context.clone(),
            self.schema_getter(),
            self.entry_getter(),
        );
        let executor = factory.subgraph_executor(&context).await.map_err(|err| {
            FetchError::TransportInitialization {
                service: subgraph_name.to_string(),
                reason: err.to_string(),
            }
        })?;
        // Register for disposal before the executor becomes reachable
        // through the cache.
        if !self.executor_stack.push(executor.clone()) {
            return Err(FetchError::ShutdownInProgress {
                service: subgraph_name.to_string(),
            });
        }
        Ok(wrap_executor_with_hooks(
            executor,
            subgraph_name.clone(),
            self.hooks.clone(),
            self.schema_getter(),
            self.entry_getter(),
        ))
    }

    fn schema_getter(&self) -> SubgraphSchemaGetter {
        self.subgraph_schemas.clone()
    }

    fn entry_getter(&self) -> TransportEntryGetter {
        let entries = self.transport_entries.clone();
        Arc::new(move |name: &SubgraphName| entries.get(name).cloned())
    }

    /// The transport entry of a subgraph, under any spelling of its name.
    pub fn transport_entry(&self, subgraph_name: &SubgraphName) -> Option<TransportEntry> {
        self.transport_entries.get(subgraph_name).cloned()
    }

    /// The current schema of a subgraph, under any spelling of its name.
    pub fn subgraph_schema(&self, subgraph_name: &SubgraphName) -> Option<Arc<Valid<Schema>>> {
        (self.subgraph_schemas)(subgraph_name)
    }

    /// The stack on which transport executors are registered for disposal.
    pub fn executor_stack(&self) -> &Arc<ExecutorStack> {
        &self.executor_stack
    }

    /// Quiesce new requests and dispose every transport executor, most
    /// recently initialized first.
    pub async fn shutdown(&self) {
        self.executor_stack.dispose_all().await;
    }

    /// Compose the subgraph schemas into one unified schema.
    ///
    /// Federated subgraphs are recognized by the `_service` field on their
    /// query root; their SDL is taken from inline `@link` metadata when
    /// present and fetched over the wire otherwise, then rewritten into the
    /// stitching dialect (cached by SDL content). All subgraphs are then
    /// stitched, with batching on by default and the per-subgraph merge
    /// strategy read from the stitching directives.
    pub async fn merge_unified_schema(&self) -> Result<UnifiedSchema, SchemaError> {
        let mut names: Vec<&SubgraphName> = self.transport_entries.keys().collect();
        names.sort_by(|a, b| a.key().cmp(b.key()));

        let mut subschemas = Vec::with_capacity(names.len());
        for name in names {
            let original =
                (self.subgraph_schemas)(name).ok_or_else(|| SchemaError::MissingSubgraph {
                    subgraph: name.to_string(),
                })?;
            let schema = if schema::is_federation_subgraph(&original) {
                let sdl = if schema::has_link_metadata(&original) {
                    schema::canonical_sdl(&original)
                } else {
                    self.fetch_service_sdl(name).await?
                };
                let translated = self.translations.translate(name, &sdl)?;
                let rebuilt = Arc::new(schema::parse_schema(&translated, name)?);
                schema::warn_dropped_definitions(&original, &rebuilt, name);
                rebuilt
            } else {
                original
            };
            let batch = self
                .transport_entries
                .get(name)
                .and_then(|entry| entry.options.get("batch"))
                .and_then(|batch| batch.as_bool())
                .unwrap_or(true);
            subschemas.push(Subschema::new(name.clone(), schema, batch));
        }
        stitching::stitch(subschemas)
    }

    async fn fetch_service_sdl(&self, subgraph_name: &SubgraphName) -> Result<String, SchemaError> {
        let request = SubgraphRequest::builder()
            .operation(
                graphql::Request::builder()
                    .query(federation::SERVICE_DEFINITION_QUERY)
                    .operation_name(federation::SERVICE_DEFINITION_OPERATION)
                    .build(),
            )
            .operation_kind(OperationKind::Query)
            .context(Context::new())
            .build();
        let response = self
            .execute_subgraph(subgraph_name, request)
            .await
            .map_err(|err| SchemaError::SdlFetch {
                subgraph: subgraph_name.to_string(),
                errors: vec![err.to_graphql_error()],
            })?;
        federation::extract_service_sdl(subgraph_name, response)
    }
}

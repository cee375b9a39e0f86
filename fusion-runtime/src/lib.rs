//! Execution core of a federated GraphQL gateway.
//!
//! The runtime composes the schemas of many upstream GraphQL subgraphs into
//! one unified schema and routes every subgraph fetch of a client operation
//! to the right transport executor, wrapped in a user-extensible hook
//! pipeline. It deliberately stops there: transports, servers, parsing and
//! validation of client operations all live with the host.

#![warn(unreachable_pub)]

mod context;
mod error;
mod executor;
pub mod graphql;
mod json_ext;
mod naming;
pub mod plugin;
mod request;
mod response;
mod runtime;
mod service_registry;
pub mod services;
pub mod spec;
pub mod transport;

pub use crate::context::Context;
pub use crate::context::TransportContext;
pub use crate::error::FetchError;
pub use crate::error::SchemaError;
pub use crate::executor::from_fn;
pub use crate::executor::ExecutorStack;
pub use crate::executor::SharedExecutor;
pub use crate::executor::SubgraphExecutor;
pub use crate::naming::InvalidSubgraphName;
pub use crate::naming::SubgraphName;
pub use crate::runtime::FusionRuntime;
pub use crate::services::SubgraphRequest;
pub use crate::services::SubgraphResponse;
pub use crate::spec::UnifiedSchema;
pub use crate::transport::TransportEntry;
pub use crate::transport::TransportFactory;
pub use crate::transport::TransportSource;

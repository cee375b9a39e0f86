//! Request and response types crossing the subgraph execution boundary.

pub use crate::services::subgraph::Request as SubgraphRequest;
pub use crate::services::subgraph::Response as SubgraphResponse;

pub mod subgraph;

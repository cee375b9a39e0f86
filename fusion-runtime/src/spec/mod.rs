//! Schema composition: canonical printing, federation rewriting, stitching.

pub(crate) mod federation;
pub(crate) mod schema;
pub(crate) mod stitching;

pub use federation::federation_to_stitching_sdl;
pub use federation::SERVICE_DEFINITION_OPERATION;
pub use federation::SERVICE_DEFINITION_QUERY;
pub use schema::canonical_sdl;
pub use schema::compare_documents;
pub use schema::compare_schemas;
pub use schema::is_federation_subgraph;
pub use schema::parse_schema;
pub use stitching::stitch;
pub use stitching::MergeTypeConfig;
pub use stitching::Subschema;
pub use stitching::UnifiedSchema;

//! Schema parsing, canonical printing and comparison.

use apollo_compiler::ast;
use apollo_compiler::validation::Valid;
use apollo_compiler::validation::WithErrors;
use apollo_compiler::Schema;

use crate::error::SchemaError;
use crate::naming::SubgraphName;

/// The conventional field a federation subgraph exposes on its query root.
pub(crate) const SERVICE_FIELD: &str = "_service";

pub(crate) fn parse_ast(sdl: &str, subgraph: &SubgraphName) -> Result<ast::Document, SchemaError> {
    let mut parser = apollo_compiler::parser::Parser::new();
    parser
        .parse_ast(sdl, format!("{subgraph}.graphql"))
        .map_err(|invalid| SchemaError::Parse {
            subgraph: subgraph.to_string(),
            reason: invalid.errors.to_string(),
        })
}

/// Parse and validate a subgraph schema from SDL.
pub fn parse_schema(sdl: &str, subgraph: &SubgraphName) -> Result<Valid<Schema>, SchemaError> {
    let ast = parse_ast(sdl, subgraph)?;
    ast.to_schema_validate()
        .map_err(|WithErrors { errors, .. }| SchemaError::Parse {
            subgraph: subgraph.to_string(),
            reason: errors.to_string(),
        })
}

/// Print a schema, directives included, in canonical form.
///
/// Type and directive definitions are sorted by name before printing, so two
/// schemas that differ only in whitespace or definition order produce the
/// same text. Cache keys and schema comparisons go through this.
pub fn canonical_sdl(schema: &Schema) -> String {
    let mut schema = schema.clone();
    schema.directive_definitions.sort_keys();
    schema.types.sort_keys();
    schema.to_string()
}

/// True iff both schemas print to the same canonical SDL.
pub fn compare_schemas(a: &Schema, b: &Schema) -> bool {
    canonical_sdl(a) == canonical_sdl(b)
}

/// True iff both documents print identically.
pub fn compare_documents(a: &ast::Document, b: &ast::Document) -> bool {
    a.to_string() == b.to_string()
}

/// A subgraph is federated iff its query root declares a `_service` field.
pub fn is_federation_subgraph(schema: &Schema) -> bool {
    schema
        .root_operation(ast::OperationType::Query)
        .and_then(|query| schema.get_object(query))
        .map(|query| query.fields.contains_key(SERVICE_FIELD))
        .unwrap_or(false)
}

/// Whether the schema definition already carries `@link` (or the legacy
/// `@core`) metadata, in which case its own SDL is authoritative and no
/// `_service` fetch is needed.
pub(crate) fn has_link_metadata(schema: &Schema) -> bool {
    let directives = &schema.schema_definition.directives;
    directives.get("link").is_some() || directives.get("core").is_some()
}

/// Log the definitions of `original` that did not survive into `rewritten`.
///
/// The rewrite is allowed to drop definitions (federation machinery mostly);
/// anything else that disappears is worth a warning but never an error.
pub(crate) fn warn_dropped_definitions(
    original: &Schema,
    rewritten: &Schema,
    subgraph: &SubgraphName,
) {
    for name in original.types.keys() {
        if !rewritten.types.contains_key(name) {
            tracing::warn!(
                subgraph = %subgraph,
                r#type = name.as_str(),
                "type is not present in the rewritten subgraph schema"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subgraph() -> SubgraphName {
        SubgraphName::new("products").unwrap()
    }

    #[test]
    fn test_compare_schemas_ignores_definition_order_and_whitespace() {
        let a = parse_schema(
            "type Query { products: [Product] }\ntype Product @key(selectionSet: \"{ id }\") { id: ID! }\ndirective @key(selectionSet: String!) repeatable on OBJECT",
            &subgraph(),
        )
        .unwrap();
        let b = parse_schema(
            "directive @key(selectionSet: String!) repeatable on OBJECT\n\ntype Product @key(selectionSet: \"{ id }\")  {\n  id: ID!\n}\ntype Query { products: [Product] }",
            &subgraph(),
        )
        .unwrap();
        assert!(compare_schemas(&a, &b));
        assert!(canonical_sdl(&a).contains("@key(selectionSet: \"{ id }\")"));
    }

    #[test]
    fn test_compare_schemas_detects_difference() {
        let a = parse_schema("type Query { x: Int }", &subgraph()).unwrap();
        let b = parse_schema("type Query { x: String }", &subgraph()).unwrap();
        assert!(!compare_schemas(&a, &b));
    }

    #[test]
    fn test_federation_detection() {
        let federated = parse_schema(
            "type Query { _service: _Service! } type _Service { sdl: String! }",
            &subgraph(),
        )
        .unwrap();
        assert!(is_federation_subgraph(&federated));

        let plain = parse_schema("type Query { hello: String }", &subgraph()).unwrap();
        assert!(!is_federation_subgraph(&plain));
    }

    #[test]
    fn test_link_metadata_detection() {
        let linked = parse_schema(
            r#"
            schema @link(url: "https://specs.apollo.dev/federation/v2.3") { query: Query }
            directive @link(url: String, import: [String]) repeatable on SCHEMA
            type Query { x: Int }
            "#,
            &subgraph(),
        )
        .unwrap();
        assert!(has_link_metadata(&linked));

        let plain = parse_schema("type Query { x: Int }", &subgraph()).unwrap();
        assert!(!has_link_metadata(&plain));
    }

    #[test]
    fn test_parse_error_names_subgraph() {
        let error = parse_schema("type Query {", &subgraph()).unwrap_err();
        assert!(error.to_string().contains("products"));
    }
}

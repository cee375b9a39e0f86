//! Federation subgraph support.
//!
//! Federated subgraphs describe cross-subgraph entities with federation
//! directives (`@key(fields:)`, `@requires(fields:)`, …). The stitching
//! engine speaks a different dialect: selection-set based directives
//! (`@key(selectionSet:)`, `@computed(selectionSet:)`, `@merge`). This module
//! fetches a federated subgraph's SDL and rewrites it into the stitching
//! dialect, caching the translation by SDL content so an unchanged subgraph
//! is not retranslated between supergraph reloads.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use apollo_compiler::ast;
use apollo_compiler::name;
use apollo_compiler::ty;
use apollo_compiler::Name;
use apollo_compiler::Node;
use sha2::Digest;
use sha2::Sha256;

use crate::error::SchemaError;
use crate::graphql;
use crate::naming::SubgraphName;
use crate::services::SubgraphResponse;
use crate::spec::schema::parse_ast;

/// The conventional operation used to ask a federated subgraph for its SDL.
pub const SERVICE_DEFINITION_OPERATION: &str = "__ApolloGetServiceDefinition__";

/// The full service definition query.
pub const SERVICE_DEFINITION_QUERY: &str =
    "query __ApolloGetServiceDefinition__ { _service { sdl } }";

/// Directive definitions of the stitching dialect, appended to a translated
/// schema when missing.
const STITCHING_DIRECTIVE_DEFINITIONS: &str = r#"
directive @key(selectionSet: String!) repeatable on OBJECT | INTERFACE
directive @merge(keyField: String, keyArg: String, additionalArgs: String, key: [String!], argsExpr: String) on FIELD_DEFINITION
directive @computed(selectionSet: String!) on FIELD_DEFINITION
directive @canonical on OBJECT | INTERFACE | INPUT_OBJECT | UNION | ENUM | SCALAR | FIELD_DEFINITION | INPUT_FIELD_DEFINITION
"#;

/// Federation directive definitions that have no meaning after translation.
const FEDERATION_DIRECTIVES: &[&str] = &[
    "key",
    "external",
    "requires",
    "provides",
    "extends",
    "shareable",
    "inaccessible",
    "override",
    "tag",
    "composeDirective",
    "interfaceObject",
    "link",
    "core",
];

/// Federation-internal type definitions dropped during translation.
const FEDERATION_TYPES: &[&str] = &[
    "_FieldSet",
    "FieldSet",
    "federation__FieldSet",
    "federation__Scope",
    "federation__Policy",
    "link__Import",
    "link__Purpose",
];

/// Directive applications stripped from types during translation.
const TYPE_DIRECTIVES_DROPPED: &[&str] = &[
    "extends",
    "shareable",
    "inaccessible",
    "tag",
    "interfaceObject",
];

/// Directive applications stripped from fields during translation.
const FIELD_DIRECTIVES_DROPPED: &[&str] =
    &["external", "provides", "shareable", "inaccessible", "tag", "override"];

/// Extract the SDL string out of a `{ _service { sdl } }` response.
pub(crate) fn extract_service_sdl(
    subgraph: &SubgraphName,
    response: SubgraphResponse,
) -> Result<String, SchemaError> {
    let response = match response {
        SubgraphResponse::Single(response) => response,
        SubgraphResponse::Stream(_) => {
            return Err(SchemaError::SdlFetch {
                subgraph: subgraph.to_string(),
                errors: vec![graphql::Error::builder()
                    .message("service definition query returned a stream")
                    .build()],
            });
        }
    };
    if response.has_errors() {
        return Err(SchemaError::SdlFetch {
            subgraph: subgraph.to_string(),
            errors: response.errors,
        });
    }
    response
        .data
        .as_ref()
        .and_then(|data| data.as_object())
        .and_then(|data| data.get("_service"))
        .and_then(|service| service.as_object())
        .and_then(|service| service.get("sdl"))
        .and_then(|sdl| sdl.as_str())
        .map(str::to_string)
        .ok_or_else(|| SchemaError::SdlFetch {
            subgraph: subgraph.to_string(),
            errors: vec![graphql::Error::builder()
                .message("service definition response carries no _service.sdl string")
                .build()],
        })
}

/// Rewrite federation SDL into the stitching dialect.
///
/// Idempotent after the first application: a schema already in the stitching
/// dialect passes through unchanged.
pub fn federation_to_stitching_sdl(
    sdl: &str,
    subgraph: &SubgraphName,
) -> Result<String, SchemaError> {
    let mut doc = parse_ast(sdl, subgraph)?;

    let base_names: HashSet<String> = doc
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            ast::Definition::ObjectTypeDefinition(node) => Some(node.name.to_string()),
            ast::Definition::InterfaceTypeDefinition(node) => Some(node.name.to_string()),
            _ => None,
        })
        .collect();

    // Un-extend orphan extensions and drop federation machinery definitions.
    let definitions = std::mem::take(&mut doc.definitions);
    for definition in definitions {
        match definition {
            ast::Definition::ObjectTypeExtension(node)
                if !base_names.contains(node.name.as_str()) =>
            {
                doc.definitions
                    .push(ast::Definition::ObjectTypeDefinition(Node::new(
                        ast::ObjectTypeDefinition {
                            description: None,
                            name: node.name.clone(),
                            implements_interfaces: node.implements_interfaces.clone(),
                            directives: node.directives.clone(),
                            fields: node.fields.clone(),
                        },
                    )));
            }
            ast::Definition::InterfaceTypeExtension(node)
                if !base_names.contains(node.name.as_str()) =>
            {
                doc.definitions
                    .push(ast::Definition::InterfaceTypeDefinition(Node::new(
                        ast::InterfaceTypeDefinition {
                            description: None,
                            name: node.name.clone(),
                            implements_interfaces: node.implements_interfaces.clone(),
                            directives: node.directives.clone(),
                            fields: node.fields.clone(),
                        },
                    )));
            }
            // The stitching dialect reuses the `@key` name; only the
            // federation-shaped definition (a `fields` argument instead of
            // `selectionSet`) is dropped.
            ast::Definition::DirectiveDefinition(node)
                if FEDERATION_DIRECTIVES.contains(&node.name.as_str())
                    && !declares_selection_set(&node) => {}
            ast::Definition::ScalarTypeDefinition(node)
                if FEDERATION_TYPES.contains(&node.name.as_str()) => {}
            ast::Definition::EnumTypeDefinition(node)
                if FEDERATION_TYPES.contains(&node.name.as_str()) => {}
            ast::Definition::SchemaDefinition(node) => {
                let mut definition = node.as_ref().clone();
                strip_link_directives(&mut definition.directives);
                doc.definitions
                    .push(ast::Definition::SchemaDefinition(Node::new(definition)));
            }
            ast::Definition::SchemaExtension(node) => {
                let mut extension = node.as_ref().clone();
                strip_link_directives(&mut extension.directives);
                if !extension.directives.is_empty() || !extension.root_operations.is_empty() {
                    doc.definitions
                        .push(ast::Definition::SchemaExtension(Node::new(extension)));
                }
            }
            other => doc.definitions.push(other),
        }
    }

    // Rewrite federation directives into the stitching dialect.
    let mut entity_types: Vec<Name> = Vec::new();
    for definition in doc.definitions.iter_mut() {
        match definition {
            ast::Definition::ObjectTypeDefinition(node) => {
                let ty = node.make_mut();
                rewrite_type_directives(&mut ty.directives, &ty.name, &mut entity_types);
                for field in ty.fields.iter_mut() {
                    rewrite_field_directives(field.make_mut());
                }
            }
            ast::Definition::InterfaceTypeDefinition(node) => {
                let ty = node.make_mut();
                rewrite_type_directives(&mut ty.directives, &ty.name, &mut entity_types);
                for field in ty.fields.iter_mut() {
                    rewrite_field_directives(field.make_mut());
                }
            }
            ast::Definition::ObjectTypeExtension(node) => {
                let ty = node.make_mut();
                rewrite_type_directives(&mut ty.directives, &ty.name, &mut entity_types);
                for field in ty.fields.iter_mut() {
                    rewrite_field_directives(field.make_mut());
                }
            }
            ast::Definition::InterfaceTypeExtension(node) => {
                let ty = node.make_mut();
                rewrite_type_directives(&mut ty.directives, &ty.name, &mut entity_types);
                for field in ty.fields.iter_mut() {
                    rewrite_field_directives(field.make_mut());
                }
            }
            _ => {}
        }
    }

    if !entity_types.is_empty() {
        append_entity_machinery(&mut doc, &entity_types);
    }
    append_missing_stitching_directives(&mut doc, subgraph)?;

    Ok(doc.to_string())
}

fn declares_selection_set(definition: &ast::DirectiveDefinition) -> bool {
    definition
        .arguments
        .iter()
        .any(|argument| argument.name.as_str() == "selectionSet")
}

fn strip_link_directives(directives: &mut ast::DirectiveList) {
    directives
        .0
        .retain(|directive| !matches!(directive.name.as_str(), "link" | "core"));
}

fn rewrite_type_directives(
    directives: &mut ast::DirectiveList,
    type_name: &Name,
    entity_types: &mut Vec<Name>,
) {
    for directive in directives.0.iter_mut() {
        if directive.name.as_str() != "key" {
            continue;
        }
        let Some(fields) = directive
            .specified_argument_by_name("fields")
            .and_then(|value| value.as_str())
        else {
            continue;
        };
        let selection_set = format!("{{ {fields} }}");
        *directive = Node::new(ast::Directive {
            name: name!("key"),
            arguments: vec![Node::new(ast::Argument {
                name: name!("selectionSet"),
                value: selection_set.into(),
            })],
        });
        if !entity_types.contains(type_name) {
            entity_types.push(type_name.clone());
        }
    }
    directives
        .0
        .retain(|directive| !TYPE_DIRECTIVES_DROPPED.contains(&directive.name.as_str()));
}

fn rewrite_field_directives(field: &mut ast::FieldDefinition) {
    for directive in field.directives.0.iter_mut() {
        if directive.name.as_str() != "requires" {
            continue;
        }
        let Some(fields) = directive
            .specified_argument_by_name("fields")
            .and_then(|value| value.as_str())
        else {
            continue;
        };
        let selection_set = format!("{{ {fields} }}");
        *directive = Node::new(ast::Directive {
            name: name!("computed"),
            arguments: vec![Node::new(ast::Argument {
                name: name!("selectionSet"),
                value: selection_set.into(),
            })],
        });
    }
    field
        .directives
        .0
        .retain(|directive| !FIELD_DIRECTIVES_DROPPED.contains(&directive.name.as_str()));
}

/// Add `_Any`, `_Entity` and the `_entities` merge field for the given entity
/// types, skipping any piece the document already has.
fn append_entity_machinery(doc: &mut ast::Document, entity_types: &[Name]) {
    let existing: HashSet<String> = doc
        .definitions
        .iter()
        .filter_map(type_definition_name)
        .collect();

    if !existing.contains("_Any") {
        doc.definitions
            .push(ast::Definition::ScalarTypeDefinition(Node::new(
                ast::ScalarTypeDefinition {
                    description: None,
                    name: name!("_Any"),
                    directives: Default::default(),
                },
            )));
    }

    if !existing.contains("_Entity") {
        doc.definitions
            .push(ast::Definition::UnionTypeDefinition(Node::new(
                ast::UnionTypeDefinition {
                    description: None,
                    name: name!("_Entity"),
                    directives: Default::default(),
                    members: entity_types.iter().cloned().collect(),
                },
            )));
    }

    let query_root = query_root_name(doc);
    let query = doc.definitions.iter_mut().find_map(|definition| {
        if let ast::Definition::ObjectTypeDefinition(node) = definition {
            (node.name == query_root).then(|| node.make_mut())
        } else {
            None
        }
    });
    match query {
        Some(query) => {
            if !query
                .fields
                .iter()
                .any(|field| field.name.as_str() == "_entities")
            {
                query.fields.push(entities_field());
            }
        }
        None => {
            doc.definitions
                .push(ast::Definition::ObjectTypeDefinition(Node::new(
                    ast::ObjectTypeDefinition {
                        description: None,
                        name: query_root,
                        implements_interfaces: Vec::new(),
                        directives: Default::default(),
                        fields: vec![entities_field()],
                    },
                )));
        }
    }
}

fn entities_field() -> Node<ast::FieldDefinition> {
    Node::new(ast::FieldDefinition {
        description: None,
        name: name!("_entities"),
        arguments: vec![Node::new(ast::InputValueDefinition {
            description: None,
            name: name!("representations"),
            ty: ty!([_Any!]!).into(),
            default_value: None,
            directives: Default::default(),
        })],
        ty: ty!([_Entity]!),
        directives: ast::DirectiveList(vec![Node::new(ast::Directive {
            name: name!("merge"),
            arguments: Vec::new(),
        })]),
    })
}

fn type_definition_name(definition: &ast::Definition) -> Option<String> {
    match definition {
        ast::Definition::ScalarTypeDefinition(node) => Some(node.name.to_string()),
        ast::Definition::ObjectTypeDefinition(node) => Some(node.name.to_string()),
        ast::Definition::InterfaceTypeDefinition(node) => Some(node.name.to_string()),
        ast::Definition::UnionTypeDefinition(node) => Some(node.name.to_string()),
        ast::Definition::EnumTypeDefinition(node) => Some(node.name.to_string()),
        ast::Definition::InputObjectTypeDefinition(node) => Some(node.name.to_string()),
        _ => None,
    }
}

pub(crate) fn query_root_name(doc: &ast::Document) -> Name {
    for definition in &doc.definitions {
        let root_operations = match definition {
            ast::Definition::SchemaDefinition(node) => &node.root_operations,
            ast::Definition::SchemaExtension(node) => &node.root_operations,
            _ => continue,
        };
        for root in root_operations {
            let (operation_type, name) = &**root;
            if *operation_type == ast::OperationType::Query {
                return name.clone();
            }
        }
    }
    name!("Query")
}

fn append_missing_stitching_directives(
    doc: &mut ast::Document,
    subgraph: &SubgraphName,
) -> Result<(), SchemaError> {
    let existing: HashSet<String> = doc
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            ast::Definition::DirectiveDefinition(node) => Some(node.name.to_string()),
            _ => None,
        })
        .collect();

    let stitching = parse_ast(STITCHING_DIRECTIVE_DEFINITIONS, subgraph)?;
    for definition in stitching.definitions {
        if let ast::Definition::DirectiveDefinition(node) = &definition {
            if existing.contains(node.name.as_str()) {
                continue;
            }
        }
        doc.definitions.push(definition);
    }
    Ok(())
}

/// Cache of federation→stitching translations, keyed per subgraph by SDL
/// content so an unchanged subgraph is not retranslated between reloads.
#[derive(Default)]
pub(crate) struct TranslationCache {
    entries: Mutex<HashMap<SubgraphName, CachedTranslation>>,
}

struct CachedTranslation {
    digest: [u8; 32],
    sdl: Arc<String>,
}

impl TranslationCache {
    pub(crate) fn translate(
        &self,
        subgraph: &SubgraphName,
        sdl: &str,
    ) -> Result<Arc<String>, SchemaError> {
        let digest: [u8; 32] = Sha256::digest(sdl.as_bytes()).into();
        if let Some(cached) = self.entries.lock().expect("lock poisoned").get(subgraph) {
            if cached.digest == digest {
                return Ok(cached.sdl.clone());
            }
        }
        let translated = Arc::new(federation_to_stitching_sdl(sdl, subgraph)?);
        self.entries.lock().expect("lock poisoned").insert(
            subgraph.clone(),
            CachedTranslation {
                digest,
                sdl: translated.clone(),
            },
        );
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::spec::schema::parse_schema;

    fn subgraph() -> SubgraphName {
        SubgraphName::new("users").unwrap()
    }

    const FEDERATED_SDL: &str = r#"
        type Query { x: Int }
        type User @key(fields: "id") { id: ID! name: String }
    "#;

    #[test]
    fn test_key_directive_is_rewritten_to_selection_set() {
        let translated = federation_to_stitching_sdl(FEDERATED_SDL, &subgraph()).unwrap();
        assert!(translated.contains(r#"@key(selectionSet: "{ id }")"#));
        assert!(!translated.contains("fields:"));
        assert!(translated.contains("union _Entity = User"));
        assert!(translated.contains("scalar _Any"));
        assert!(translated.contains("_entities(representations: [_Any!]!): [_Entity]! @merge"));
        // And the result is a valid schema in the stitching dialect.
        parse_schema(&translated, &subgraph()).unwrap();
    }

    #[test]
    fn test_requires_becomes_computed_and_external_is_dropped() {
        let sdl = r#"
            type Query { x: Int }
            type Review @key(fields: "id") {
                id: ID!
                author: String @external
                summary: String @requires(fields: "author")
            }
        "#;
        let translated = federation_to_stitching_sdl(sdl, &subgraph()).unwrap();
        assert!(translated.contains(r#"@computed(selectionSet: "{ author }")"#));
        assert!(!translated.contains("@external"));
        assert!(!translated.contains("@requires"));
    }

    #[test]
    fn test_orphan_extension_is_un_extended() {
        let sdl = r#"
            type Query { x: Int }
            extend type User @key(fields: "id") { id: ID! }
        "#;
        let translated = federation_to_stitching_sdl(sdl, &subgraph()).unwrap();
        assert!(translated.contains("type User"));
        assert!(!translated.contains("extend type User"));
        parse_schema(&translated, &subgraph()).unwrap();
    }

    #[test]
    fn test_translation_is_idempotent() {
        let once = federation_to_stitching_sdl(FEDERATED_SDL, &subgraph()).unwrap();
        let twice = federation_to_stitching_sdl(&once, &subgraph()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_translation_round_trip_is_stable_through_the_printer() {
        let translated = federation_to_stitching_sdl(FEDERATED_SDL, &subgraph()).unwrap();
        let schema = parse_schema(&translated, &subgraph()).unwrap();
        let printed = crate::spec::schema::canonical_sdl(&schema);
        let reparsed = parse_schema(&printed, &subgraph()).unwrap();
        assert!(crate::spec::schema::compare_schemas(&schema, &reparsed));
    }

    #[test]
    fn test_cache_returns_same_translation_for_same_content() {
        let cache = TranslationCache::default();
        let first = cache.translate(&subgraph(), FEDERATED_SDL).unwrap();
        let second = cache.translate(&subgraph(), FEDERATED_SDL).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let changed = cache
            .translate(&subgraph(), "type Query { y: Int }")
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &changed));
    }

    #[test]
    fn test_extract_service_sdl() {
        let response = SubgraphResponse::Single(
            graphql::Response::builder()
                .data(json!({"_service": {"sdl": "type Query { x: Int }"}}))
                .build(),
        );
        let sdl = extract_service_sdl(&subgraph(), response).unwrap();
        assert_eq!(sdl, "type Query { x: Int }");
    }

    #[test]
    fn test_extract_service_sdl_aggregates_errors() {
        let response = SubgraphResponse::Single(
            graphql::Response::builder()
                .error(
                    graphql::Error::builder()
                        .message("unauthorized")
                        .build(),
                )
                .build(),
        );
        let error = extract_service_sdl(&subgraph(), response).unwrap_err();
        assert!(error.to_string().contains("users"));
        assert_eq!(error.errors().len(), 1);
        assert_eq!(error.errors()[0].message, "unauthorized");
    }
}

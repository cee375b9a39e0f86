//! Schema stitching.
//!
//! Stitching combines the (possibly rewritten) subgraph schemas into one
//! unified schema and keeps, per subgraph, the merge strategy described by
//! its stitching directives. The upstream composition is trusted: beyond
//! GraphQL validity of the merged document there is no type-merging
//! validation here.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use apollo_compiler::Schema;

use crate::error::SchemaError;
use crate::naming::SubgraphName;
use crate::spec::federation::query_root_name;
use crate::spec::schema::canonical_sdl;
use crate::spec::schema::parse_ast;
use crate::spec::schema::SERVICE_FIELD;

const ENTITIES_FIELD: &str = "_entities";
const STITCHING_TYPES: &[&str] = &["_Service", "_Any", "_Entity"];

/// How one type of one subschema participates in cross-subgraph merging.
#[derive(Clone, Debug, Default)]
pub struct MergeTypeConfig {
    /// Key selection sets, from `@key(selectionSet:)` on the type.
    pub selection_sets: Vec<String>,

    /// The root field that resolves this type, from `@merge` on that field.
    pub merge_field: Option<String>,

    /// The key field sent to the merge field, from `@merge(keyField:)`.
    pub key_field: Option<String>,

    /// The argument name carrying keys, from `@merge(keyArg:)`.
    pub key_arg: Option<String>,

    /// Selection sets of computed fields, from `@computed(selectionSet:)`.
    pub computed_fields: HashMap<String, String>,
}

impl MergeTypeConfig {
    fn is_empty(&self) -> bool {
        self.selection_sets.is_empty()
            && self.merge_field.is_none()
            && self.computed_fields.is_empty()
    }
}

/// One subgraph as it participates in the stitched schema.
#[derive(Debug)]
pub struct Subschema {
    name: SubgraphName,
    schema: Arc<Valid<Schema>>,
    batch: bool,
    merge: HashMap<String, MergeTypeConfig>,
}

impl Subschema {
    /// Build a subschema, reading its merge strategy out of the stitching
    /// directives present on `schema`.
    pub fn new(name: SubgraphName, schema: Arc<Valid<Schema>>, batch: bool) -> Self {
        let merge = extract_merge_config(&schema);
        Self {
            name,
            schema,
            batch,
            merge,
        }
    }

    pub fn name(&self) -> &SubgraphName {
        &self.name
    }

    /// The post-rewrite schema this subschema executes against.
    pub fn schema(&self) -> &Arc<Valid<Schema>> {
        &self.schema
    }

    /// Whether requests to this subgraph may be batched.
    pub fn batch(&self) -> bool {
        self.batch
    }

    /// The merge strategy for one type, if it participates in merging.
    pub fn merge_config(&self, type_name: &str) -> Option<&MergeTypeConfig> {
        self.merge.get(type_name)
    }

    /// The types this subschema can merge.
    pub fn merged_types(&self) -> impl Iterator<Item = &str> {
        self.merge.keys().map(String::as_str)
    }
}

/// Read `@key` / `@merge` / `@computed` into per-type merge configuration.
fn extract_merge_config(schema: &Schema) -> HashMap<String, MergeTypeConfig> {
    let mut merge: HashMap<String, MergeTypeConfig> = HashMap::new();

    for (type_name, ty) in &schema.types {
        let (directives, fields) = match ty {
            ExtendedType::Object(object) => (&object.directives, &object.fields),
            ExtendedType::Interface(interface) => (&interface.directives, &interface.fields),
            _ => continue,
        };

        for key in directives.get_all("key") {
            if let Some(selection_set) = key
                .specified_argument_by_name("selectionSet")
                .and_then(|value| value.as_str())
            {
                merge
                    .entry(type_name.to_string())
                    .or_default()
                    .selection_sets
                    .push(selection_set.to_string());
            }
        }

        for (field_name, field) in fields {
            if let Some(computed) = field.directives.get("computed") {
                if let Some(selection_set) = computed
                    .specified_argument_by_name("selectionSet")
                    .and_then(|value| value.as_str())
                {
                    merge
                        .entry(type_name.to_string())
                        .or_default()
                        .computed_fields
                        .insert(field_name.to_string(), selection_set.to_string());
                }
            }
        }
    }

    // `@merge` lives on root fields and fans out over the field's return
    // type; a union return type covers every member.
    if let Some(query) = schema
        .root_operation(ast::OperationType::Query)
        .and_then(|query| schema.get_object(query))
    {
        for (field_name, field) in &query.fields {
            let Some(merge_directive) = field.directives.get("merge") else {
                continue;
            };
            let key_field = merge_directive
                .specified_argument_by_name("keyField")
                .and_then(|value| value.as_str())
                .map(str::to_string);
            let key_arg = merge_directive
                .specified_argument_by_name("keyArg")
                .and_then(|value| value.as_str())
                .map(str::to_string);

            let target = field.ty.inner_named_type();
            let targets: Vec<String> = match schema.types.get(target.as_str()) {
                Some(ExtendedType::Union(union)) => {
                    union.members.iter().map(|member| member.to_string()).collect()
                }
                _ => vec![target.to_string()],
            };
            for target in targets {
                let config = merge.entry(target).or_default();
                config.merge_field = Some(field_name.to_string());
                config.key_field.clone_from(&key_field);
                config.key_arg.clone_from(&key_arg);
            }
        }
    }

    merge.retain(|_, config| !config.is_empty());
    merge
}

/// The stitched schema and the map back to the subschemas it multiplexes.
#[derive(Debug)]
pub struct UnifiedSchema {
    schema: Arc<Valid<Schema>>,
    subschemas: HashMap<SubgraphName, Arc<Subschema>>,
}

impl UnifiedSchema {
    pub fn schema(&self) -> &Arc<Valid<Schema>> {
        &self.schema
    }

    /// The unified schema in canonical SDL form.
    pub fn sdl(&self) -> String {
        canonical_sdl(&self.schema)
    }

    /// The post-stitching subschema of one subgraph.
    pub fn subschema(&self, name: &SubgraphName) -> Option<&Arc<Subschema>> {
        self.subschemas.get(name)
    }

    pub fn subgraph_names(&self) -> impl Iterator<Item = &SubgraphName> {
        self.subschemas.keys()
    }
}

/// Stitch subschemas into one unified schema.
///
/// Object and interface types merge field-wise across subschemas (the first
/// definition of a field wins), unions merge members, enums merge values, and
/// everything else keeps its first definition. Directive applications of the
/// first definition and every directive definition are preserved. The
/// `_service` / `_entities` plumbing never reaches the unified schema.
pub fn stitch(subschemas: Vec<Subschema>) -> Result<UnifiedSchema, SchemaError> {
    let mut unified = ast::Document::new();
    // Definition index into `unified.definitions`, by type name.
    let mut types: HashMap<String, usize> = HashMap::new();
    let mut directive_definitions: HashSet<String> = HashSet::new();
    let mut has_schema_definition = false;

    for subschema in &subschemas {
        let sdl = canonical_sdl(subschema.schema());
        let doc = parse_ast(&sdl, subschema.name())?;
        let query_root = query_root_name(&doc);

        for definition in doc.definitions {
            match definition {
                ast::Definition::DirectiveDefinition(node) => {
                    if directive_definitions.insert(node.name.to_string()) {
                        unified
                            .definitions
                            .push(ast::Definition::DirectiveDefinition(node));
                    }
                }
                ast::Definition::SchemaDefinition(node) => {
                    if !has_schema_definition {
                        has_schema_definition = true;
                        unified
                            .definitions
                            .push(ast::Definition::SchemaDefinition(node));
                    }
                }
                ast::Definition::ObjectTypeDefinition(node) => {
                    let name = node.name.to_string();
                    if STITCHING_TYPES.contains(&name.as_str()) {
                        continue;
                    }
                    let mut node = node;
                    if node.name == query_root {
                        let object = node.make_mut();
                        object.fields.retain(|field| {
                            field.name.as_str() != SERVICE_FIELD
                                && field.name.as_str() != ENTITIES_FIELD
                        });
                    }
                    match types.get(&name) {
                        Some(&index) => {
                            merge_object_definition(&mut unified.definitions[index], &node)
                        }
                        None => {
                            types.insert(name, unified.definitions.len());
                            unified
                                .definitions
                                .push(ast::Definition::ObjectTypeDefinition(node));
                        }
                    }
                }
                ast::Definition::InterfaceTypeDefinition(node) => {
                    let name = node.name.to_string();
                    match types.get(&name) {
                        Some(&index) => {
                            merge_interface_definition(&mut unified.definitions[index], &node)
                        }
                        None => {
                            types.insert(name, unified.definitions.len());
                            unified
                                .definitions
                                .push(ast::Definition::InterfaceTypeDefinition(node));
                        }
                    }
                }
                ast::Definition::UnionTypeDefinition(node) => {
                    let name = node.name.to_string();
                    if STITCHING_TYPES.contains(&name.as_str()) {
                        continue;
                    }
                    match types.get(&name) {
                        Some(&index) => {
                            merge_union_definition(&mut unified.definitions[index], &node)
                        }
                        None => {
                            types.insert(name, unified.definitions.len());
                            unified
                                .definitions
                                .push(ast::Definition::UnionTypeDefinition(node));
                        }
                    }
                }
                ast::Definition::EnumTypeDefinition(node) => {
                    let name = node.name.to_string();
                    match types.get(&name) {
                        Some(&index) => {
                            merge_enum_definition(&mut unified.definitions[index], &node)
                        }
                        None => {
                            types.insert(name, unified.definitions.len());
                            unified
                                .definitions
                                .push(ast::Definition::EnumTypeDefinition(node));
                        }
                    }
                }
                ast::Definition::ScalarTypeDefinition(node) => {
                    let name = node.name.to_string();
                    if STITCHING_TYPES.contains(&name.as_str()) {
                        continue;
                    }
                    if !types.contains_key(&name) {
                        types.insert(name, unified.definitions.len());
                        unified
                            .definitions
                            .push(ast::Definition::ScalarTypeDefinition(node));
                    }
                }
                ast::Definition::InputObjectTypeDefinition(node) => {
                    let name = node.name.to_string();
                    if !types.contains_key(&name) {
                        types.insert(name, unified.definitions.len());
                        unified
                            .definitions
                            .push(ast::Definition::InputObjectTypeDefinition(node));
                    }
                }
                // Anything else (operations, fragments, extensions of the
                // canonical print) has no place in a stitched schema document.
                _ => {}
            }
        }
    }

    let schema = unified
        .to_schema_validate()
        .map_err(|invalid| SchemaError::Stitch {
            reason: invalid.errors.to_string(),
        })?;

    let subschemas = subschemas
        .into_iter()
        .map(|subschema| (subschema.name().clone(), Arc::new(subschema)))
        .collect();

    Ok(UnifiedSchema {
        schema: Arc::new(schema),
        subschemas,
    })
}

fn merge_object_definition(existing: &mut ast::Definition, incoming: &ast::ObjectTypeDefinition) {
    let ast::Definition::ObjectTypeDefinition(node) = existing else {
        return;
    };
    let object = node.make_mut();
    for interface in &incoming.implements_interfaces {
        if !object.implements_interfaces.contains(interface) {
            object.implements_interfaces.push(interface.clone());
        }
    }
    for field in &incoming.fields {
        if !object
            .fields
            .iter()
            .any(|existing| existing.name == field.name)
        {
            object.fields.push(field.clone());
        }
    }
}

fn merge_interface_definition(
    existing: &mut ast::Definition,
    incoming: &ast::InterfaceTypeDefinition,
) {
    let ast::Definition::InterfaceTypeDefinition(node) = existing else {
        return;
    };
    let interface = node.make_mut();
    for field in &incoming.fields {
        if !interface
            .fields
            .iter()
            .any(|existing| existing.name == field.name)
        {
            interface.fields.push(field.clone());
        }
    }
}

fn merge_union_definition(existing: &mut ast::Definition, incoming: &ast::UnionTypeDefinition) {
    let ast::Definition::UnionTypeDefinition(node) = existing else {
        return;
    };
    let union = node.make_mut();
    for member in &incoming.members {
        if !union.members.contains(member) {
            union.members.push(member.clone());
        }
    }
}

fn merge_enum_definition(existing: &mut ast::Definition, incoming: &ast::EnumTypeDefinition) {
    let ast::Definition::EnumTypeDefinition(node) = existing else {
        return;
    };
    let enum_type = node.make_mut();
    for value in &incoming.values {
        if !enum_type
            .values
            .iter()
            .any(|existing| existing.value == value.value)
        {
            enum_type.values.push(value.clone());
        }
    }
}

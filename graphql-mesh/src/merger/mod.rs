//! Schema merging: one unified schema out of every source's transformed schema.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast::OperationType;
use apollo_compiler::name;
use apollo_compiler::schema::ComponentName;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;

use crate::error::MeshError;
use crate::source::RawSource;
use crate::source::SourceExecutor;
use crate::transforms::Transform;

const ROOTS: [(OperationType, Name); 3] = [
    (OperationType::Query, name!("Query")),
    (OperationType::Mutation, name!("Mutation")),
    (OperationType::Subscription, name!("Subscription")),
];

/// What a merger works from.
pub struct MergeInput {
    pub raw_sources: Vec<Arc<RawSource>>,
    /// Extra SDL applied to the merged schema.
    pub type_defs: Vec<String>,
}

/// A source as the unified schema sees it: its schema after wrap transforms.
pub struct SubSchema {
    pub source: Arc<RawSource>,
    pub schema: Arc<Valid<Schema>>,
}

impl SubSchema {
    pub fn name(&self) -> &str {
        &self.source.name
    }

    pub fn executor(&self) -> &Arc<dyn SourceExecutor> {
        &self.source.executor
    }

    pub fn transforms(&self) -> &[Arc<dyn Transform>] {
        &self.source.transforms
    }

    /// The name of this source's root type for `operation`.
    pub fn root_type(&self, operation: OperationType) -> Option<&Name> {
        self.schema.root_operation(operation)
    }
}

impl fmt::Debug for SubSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubSchema")
            .field("name", &self.source.name)
            .finish()
    }
}

/// The result of merging.
pub struct UnifiedSchema {
    pub schema: Arc<Valid<Schema>>,
    /// One entry per raw source, in source order.
    pub sub_schemas: IndexMap<String, Arc<SubSchema>>,
    /// `(unified root type, field)` to the source serving it.
    pub root_field_owners: HashMap<(Name, Name), String>,
    /// `(type, field)` of non-root object types to every source defining it.
    pub type_field_sources: HashMap<(Name, Name), Vec<String>>,
}

impl UnifiedSchema {
    pub fn sub_schema(&self, source: &str) -> Option<&Arc<SubSchema>> {
        self.sub_schemas.get(source)
    }
}

/// Merges source schemas into one.
pub trait SchemaMerger: Send + Sync {
    fn merge(&self, input: MergeInput) -> Result<UnifiedSchema, MeshError>;
}

/// Stitches schemas together.
///
/// Root types are renamed to `Query`, `Mutation` and `Subscription`. Types of the same
/// name are unioned: object, interface and input object fields, enum values and union
/// members. When two sources define the same root field, the first one serves it.
#[derive(Debug, Default, Clone, Copy)]
pub struct StitchingMerger;

impl SchemaMerger for StitchingMerger {
    fn merge(&self, input: MergeInput) -> Result<UnifiedSchema, MeshError> {
        let mut sub_schemas = IndexMap::with_capacity(input.raw_sources.len());
        for source in input.raw_sources {
            let sub_schema = wrap(source)?;
            sub_schemas.insert(sub_schema.source.name.clone(), Arc::new(sub_schema));
        }

        let mut merged = Schema::new();
        let mut root_field_owners = HashMap::new();
        let mut type_field_sources: HashMap<(Name, Name), Vec<String>> = HashMap::new();
        for (source_name, sub_schema) in &sub_schemas {
            let schema = &sub_schema.schema;
            let mut renamed_roots = HashMap::new();
            for (operation, unified) in &ROOTS {
                if let Some(root) = schema.root_operation(*operation) {
                    renamed_roots.insert(root.clone(), unified.clone());
                    let definition = merged.schema_definition.make_mut();
                    let slot = match operation {
                        OperationType::Query => &mut definition.query,
                        OperationType::Mutation => &mut definition.mutation,
                        OperationType::Subscription => &mut definition.subscription,
                    };
                    slot.get_or_insert_with(|| ComponentName::from(unified.clone()));
                }
            }

            for (type_name, ty) in &schema.types {
                if ty.is_built_in() {
                    continue;
                }
                let root = renamed_roots.get(type_name);
                let unified_name = root.unwrap_or(type_name).clone();
                if let ExtendedType::Object(object) = ty {
                    for field_name in object.fields.keys() {
                        let key = (unified_name.clone(), field_name.clone());
                        if root.is_some() {
                            match root_field_owners.entry(key) {
                                Entry::Vacant(entry) => {
                                    entry.insert(source_name.clone());
                                }
                                Entry::Occupied(entry) => tracing::warn!(
                                    field = %format!("{unified_name}.{field_name}"),
                                    owner = %entry.get(),
                                    ignored = %source_name,
                                    "root field is defined by more than one source"
                                ),
                            }
                        } else {
                            type_field_sources
                                .entry(key)
                                .or_default()
                                .push(source_name.clone());
                        }
                    }
                }
                merge_type(&mut merged.types, unified_name, ty).map_err(MeshError::merge)?;
            }

            for (directive_name, definition) in &schema.directive_definitions {
                merged
                    .directive_definitions
                    .entry(directive_name.clone())
                    .or_insert_with(|| definition.clone());
            }
        }

        if merged.schema_definition.query.is_none() {
            return Err(MeshError::merge("no source provides a query root type"));
        }

        let mut sdl = merged.to_string();
        if !merged.directive_definitions.contains_key("live") {
            sdl.push_str("\ndirective @live on QUERY\n");
        }
        for type_defs in &input.type_defs {
            sdl.push('\n');
            sdl.push_str(type_defs);
        }
        let schema = Schema::parse_and_validate(sdl, "unified.graphql")
            .map_err(|with_errors| MeshError::merge(with_errors.errors.to_string()))?;
        tracing::debug!(
            sources = sub_schemas.len(),
            types = schema.types.len(),
            "unified schema built"
        );

        Ok(UnifiedSchema {
            schema: Arc::new(schema),
            sub_schemas,
            root_field_owners,
            type_field_sources,
        })
    }
}

fn wrap(source: Arc<RawSource>) -> Result<SubSchema, MeshError> {
    let mut schema = (*source.schema).clone();
    for transform in &source.transforms {
        schema = transform.transform_schema(schema).map_err(|error| {
            MeshError::merge(format!("source '{}': {error}", source.name))
        })?;
    }
    Ok(SubSchema {
        source,
        schema: Arc::new(schema),
    })
}

fn kind(ty: &ExtendedType) -> &'static str {
    match ty {
        ExtendedType::Scalar(_) => "scalar",
        ExtendedType::Object(_) => "object type",
        ExtendedType::Interface(_) => "interface",
        ExtendedType::Union(_) => "union",
        ExtendedType::Enum(_) => "enum",
        ExtendedType::InputObject(_) => "input object type",
    }
}

fn merge_type(
    types: &mut apollo_compiler::collections::IndexMap<Name, ExtendedType>,
    name: Name,
    incoming: &ExtendedType,
) -> Result<(), String> {
    let Some(existing) = types.get_mut(&name) else {
        let mut ty = incoming.clone();
        if let ExtendedType::Object(object) = &mut ty {
            if object.name != name {
                object.make_mut().name = name.clone();
            }
        }
        types.insert(name, ty);
        return Ok(());
    };
    match (existing, incoming) {
        (ExtendedType::Object(existing), ExtendedType::Object(incoming)) => {
            let existing = existing.make_mut();
            for (field_name, field) in &incoming.fields {
                existing
                    .fields
                    .entry(field_name.clone())
                    .or_insert_with(|| field.clone());
            }
            existing
                .implements_interfaces
                .extend(incoming.implements_interfaces.iter().cloned());
        }
        (ExtendedType::Interface(existing), ExtendedType::Interface(incoming)) => {
            let existing = existing.make_mut();
            for (field_name, field) in &incoming.fields {
                existing
                    .fields
                    .entry(field_name.clone())
                    .or_insert_with(|| field.clone());
            }
            existing
                .implements_interfaces
                .extend(incoming.implements_interfaces.iter().cloned());
        }
        (ExtendedType::Union(existing), ExtendedType::Union(incoming)) => {
            existing
                .make_mut()
                .members
                .extend(incoming.members.iter().cloned());
        }
        (ExtendedType::Enum(existing), ExtendedType::Enum(incoming)) => {
            let existing = existing.make_mut();
            for (value_name, value) in &incoming.values {
                existing
                    .values
                    .entry(value_name.clone())
                    .or_insert_with(|| value.clone());
            }
        }
        (ExtendedType::InputObject(existing), ExtendedType::InputObject(incoming)) => {
            let existing = existing.make_mut();
            for (field_name, field) in &incoming.fields {
                existing
                    .fields
                    .entry(field_name.clone())
                    .or_insert_with(|| field.clone());
            }
        }
        (ExtendedType::Scalar(_), ExtendedType::Scalar(_)) => {}
        (existing, incoming) => {
            return Err(format!(
                "type {name} is defined both as {} and as {}",
                kind(existing),
                kind(incoming)
            ));
        }
    }
    Ok(())
}

//! Resolvers of the unified schema.
//!
//! Root fields delegate to the source serving them. Fields of merged types are fetched
//! from the other sources defining the type, and configured additional resolvers call
//! sources through the in-context SDK.

mod additional;
mod delegate;
mod merge;

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::executable::OperationType;
use apollo_compiler::schema::ExtendedType;

use crate::configuration::AdditionalResolverConfig;
use crate::delegate::Requirements;
use crate::engine::Resolvers;
use crate::error::MeshError;
use crate::merger::UnifiedSchema;
use crate::sdk::InContextSdk;
use additional::AdditionalResolver;
use delegate::DelegateResolver;
use merge::MergedFieldResolver;

/// Fields every request for a type must fetch: merge keys and the parent fields of
/// additional resolvers.
pub(crate) fn collect_requirements(
    unified: &UnifiedSchema,
    additional: &[AdditionalResolverConfig],
) -> Result<Requirements, MeshError> {
    let mut requirements = Requirements::default();
    for sub_schema in unified.sub_schemas.values() {
        for (type_name, merge) in &sub_schema.source.merge {
            let type_name = type_name_of(unified, type_name)?;
            requirements
                .add(type_name, &merge.key_field)
                .map_err(MeshError::configuration)?;
        }
    }
    for resolver in additional {
        let type_name = type_name_of(unified, &resolver.target_type_name)?;
        if let Some(field_set) = &resolver.required_selection_set {
            requirements
                .add(type_name.clone(), field_set)
                .map_err(MeshError::configuration)?;
        }
        if let Some(key_field) = resolver.key_field.as_deref() {
            // only a direct field of the parent can be required
            if !key_field.contains('.') {
                requirements
                    .add(type_name, key_field)
                    .map_err(MeshError::configuration)?;
            }
        }
    }
    Ok(requirements)
}

fn type_name_of(unified: &UnifiedSchema, type_name: &str) -> Result<Name, MeshError> {
    unified
        .schema
        .types
        .get_key_value(type_name)
        .map(|(name, _)| name.clone())
        .ok_or_else(|| {
            MeshError::configuration(format!("type {type_name} is not part of the unified schema"))
        })
}

/// Builds the resolvers of the unified schema, before hooks are applied.
pub(crate) fn build_resolvers(
    unified: &UnifiedSchema,
    sdk: &InContextSdk,
    requirements: &Arc<Requirements>,
    additional: &[AdditionalResolverConfig],
) -> Result<Resolvers, MeshError> {
    let mut resolvers = Resolvers::new();
    for ((root, field_name), source) in &unified.root_field_owners {
        let Some(sub_schema) = unified.sub_schema(source) else {
            continue;
        };
        let operation_type = match root.as_str() {
            "Mutation" => OperationType::Mutation,
            "Subscription" => OperationType::Subscription,
            _ => OperationType::Query,
        };
        resolvers.insert(
            root.clone(),
            field_name.clone(),
            Arc::new(DelegateResolver {
                sub_schema: sub_schema.clone(),
                operation_type,
                field_name: field_name.clone(),
                requirements: requirements.clone(),
            }),
        );
    }

    add_merged_field_resolvers(unified, sdk, &mut resolvers)?;

    for config in additional {
        let type_name = type_name_of(unified, &config.target_type_name)?;
        let defined = match unified.schema.types.get(&type_name) {
            Some(ExtendedType::Object(object)) => {
                object.fields.contains_key(config.target_field_name.as_str())
            }
            _ => false,
        };
        if !defined {
            return Err(MeshError::configuration(format!(
                "additional resolver target {}.{} is not an object field of the unified schema",
                config.target_type_name, config.target_field_name
            )));
        }
        let Some(api) = sdk.source(&config.source_name) else {
            return Err(MeshError::configuration(format!(
                "additional resolver for {}.{} calls unknown source '{}'",
                config.target_type_name, config.target_field_name, config.source_name
            )));
        };
        if api
            .descriptor(&config.source_type_name, &config.source_field_name)
            .is_none()
        {
            return Err(MeshError::configuration(format!(
                "source '{}' has no operation {}.{}",
                config.source_name, config.source_type_name, config.source_field_name
            )));
        }
        let field_name = Name::new(&config.target_field_name)
            .map_err(|error| MeshError::configuration(error.to_string()))?;
        resolvers.insert(
            type_name,
            field_name,
            Arc::new(AdditionalResolver::new(config)?),
        );
    }
    Ok(resolvers)
}

/// A field of a merged type gets a merged resolver when some source defining the type
/// lacks it and a source having it declares how to look the type up.
fn add_merged_field_resolvers(
    unified: &UnifiedSchema,
    sdk: &InContextSdk,
    resolvers: &mut Resolvers,
) -> Result<(), MeshError> {
    let mut sources_of_type: HashMap<&Name, HashSet<&str>> = HashMap::new();
    for ((type_name, _), sources) in &unified.type_field_sources {
        sources_of_type
            .entry(type_name)
            .or_default()
            .extend(sources.iter().map(String::as_str));
    }

    for ((type_name, field_name), sources) in &unified.type_field_sources {
        let defined_everywhere = sources_of_type
            .get(type_name)
            .is_none_or(|all| all.len() == sources.len());
        if defined_everywhere {
            continue;
        }
        let provider = sources.iter().find_map(|source| {
            let sub_schema = unified.sub_schema(source)?;
            let merge = sub_schema.source.merge.get(type_name.as_str())?;
            Some((source, merge))
        });
        let Some((source, merge)) = provider else {
            continue;
        };
        let has_lookup = sdk
            .source(source)
            .and_then(|api| api.descriptor("Query", &merge.field_name))
            .is_some();
        if !has_lookup {
            return Err(MeshError::configuration(format!(
                "source '{source}' merges {type_name} through Query.{}, which it does not define",
                merge.field_name
            )));
        }
        tracing::trace!(%type_name, %field_name, %source, "merged field");
        resolvers.insert(
            type_name.clone(),
            field_name.clone(),
            Arc::new(MergedFieldResolver {
                source: source.clone(),
                merge: merge.clone(),
            }),
        );
    }
    Ok(())
}

//! Registers the unified schema with the execution engine.
//!
//! Every object field resolves through its [`FieldResolver`]. Resolved JSON travels
//! down the tree as the parent value of the next level.

use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast::Type;
use apollo_compiler::executable::OperationType;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::schema::InputValueDefinition;
use apollo_compiler::schema::ObjectType;
use apollo_compiler::validation::Valid;
use async_graphql::ErrorExtensionValues;
use async_graphql::QueryPathNode;
use async_graphql::QueryPathSegment;
use async_graphql::dynamic;
use async_graphql::dynamic::FieldFuture;
use async_graphql::dynamic::FieldValue;
use async_graphql::dynamic::SubscriptionFieldFuture;
use async_graphql::dynamic::TypeRef;
use async_graphql_value::ConstValue;
use futures::StreamExt;
use futures::stream::BoxStream;

use super::ExecutionRequest;
use super::resolver::DefaultFieldResolver;
use super::resolver::FieldResolver;
use super::resolver::ResolveInfo;
use super::resolver::ResolverParams;
use super::resolver::Resolvers;
use super::values::ast_value_to_const;
use super::values::const_to_json;
use super::values::json_to_const;
use crate::error::FieldError;
use crate::error::MeshError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;

type EngineResult<T> = async_graphql::Result<T>;

pub(super) fn build(schema: &Valid<Schema>, resolvers: &Resolvers) -> Result<dynamic::Schema, MeshError> {
    let root = |operation_type| schema.root_operation(operation_type).map(Name::as_str);
    let query = root(OperationType::Query).ok_or_else(|| MeshError::Executor {
        reason: "the schema has no query root type".into(),
    })?;
    let subscription = root(OperationType::Subscription);
    let outputs = Arc::new(OutputTypes::new(schema));

    let mut builder = dynamic::Schema::build(query, root(OperationType::Mutation), subscription);
    for (name, ty) in &schema.types {
        if ty.is_built_in() {
            continue;
        }
        builder = match ty {
            ExtendedType::Object(object) if subscription == Some(name.as_str()) => {
                builder.register(subscription_type(name, object, resolvers, &outputs))
            }
            ExtendedType::Object(object) => builder.register(object_type(name, object, resolvers, &outputs)),
            ExtendedType::Interface(interface) => {
                let mut registered = dynamic::Interface::new(name.as_str());
                for (field_name, definition) in &interface.fields {
                    let mut field = dynamic::InterfaceField::new(field_name.as_str(), type_ref(&definition.ty));
                    for argument in &definition.arguments {
                        field = field.argument(input_value(argument));
                    }
                    registered = registered.field(field);
                }
                builder.register(registered)
            }
            ExtendedType::Union(union_type) => {
                let registered = union_type
                    .members
                    .iter()
                    .fold(dynamic::Union::new(name.as_str()), |registered, member| {
                        registered.possible_type(member.as_str())
                    });
                builder.register(registered)
            }
            ExtendedType::Enum(enum_type) => {
                let registered = enum_type
                    .values
                    .keys()
                    .fold(dynamic::Enum::new(name.as_str()), |registered, value| {
                        registered.item(dynamic::EnumItem::new(value.as_str()))
                    });
                builder.register(registered)
            }
            ExtendedType::InputObject(input_object) => {
                let registered = input_object
                    .fields
                    .values()
                    .fold(dynamic::InputObject::new(name.as_str()), |registered, field| {
                        registered.field(input_value(field))
                    });
                builder.register(registered)
            }
            ExtendedType::Scalar(_) => builder.register(dynamic::Scalar::new(name.as_str())),
        };
    }
    builder.finish().map_err(|error| MeshError::Executor {
        reason: error.to_string(),
    })
}

fn object_type(
    name: &Name,
    object: &ObjectType,
    resolvers: &Resolvers,
    outputs: &Arc<OutputTypes>,
) -> dynamic::Object {
    let mut registered = dynamic::Object::new(name.as_str());
    if let Some(description) = &object.description {
        registered = registered.description(description.to_string());
    }
    for interface in &object.implements_interfaces {
        registered = registered.implement(interface.as_str());
    }
    for (field_name, definition) in &object.fields {
        let binding = FieldBinding::new(name, definition, resolvers, outputs);
        let mut field = dynamic::Field::new(field_name.as_str(), type_ref(&definition.ty), move |ctx| {
            FieldFuture::new(resolve_field(ctx, binding.clone()))
        });
        if let Some(description) = &definition.description {
            field = field.description(description.to_string());
        }
        for argument in &definition.arguments {
            field = field.argument(input_value(argument));
        }
        registered = registered.field(field);
    }
    registered
}

fn subscription_type(
    name: &Name,
    object: &ObjectType,
    resolvers: &Resolvers,
    outputs: &Arc<OutputTypes>,
) -> dynamic::Subscription {
    let mut registered = dynamic::Subscription::new(name.as_str());
    for (field_name, definition) in &object.fields {
        let binding = FieldBinding::new(name, definition, resolvers, outputs);
        let mut field =
            dynamic::SubscriptionField::new(field_name.as_str(), type_ref(&definition.ty), move |ctx| {
                SubscriptionFieldFuture::new(subscribe_field(ctx, binding.clone()))
            });
        for argument in &definition.arguments {
            field = field.argument(input_value(argument));
        }
        registered = registered.field(field);
    }
    registered
}

fn input_value(definition: &InputValueDefinition) -> dynamic::InputValue {
    let mut input = dynamic::InputValue::new(definition.name.as_str(), type_ref(&definition.ty));
    if let Some(default) = &definition.default_value {
        input = input.default_value(ast_value_to_const(default));
    }
    input
}

fn type_ref(ty: &Type) -> TypeRef {
    match ty {
        Type::Named(name) => TypeRef::named(name.as_str()),
        Type::NonNullNamed(name) => TypeRef::NonNull(Box::new(TypeRef::named(name.as_str()))),
        Type::List(inner) => TypeRef::List(Box::new(type_ref(inner))),
        Type::NonNullList(inner) => {
            TypeRef::NonNull(Box::new(TypeRef::List(Box::new(type_ref(inner)))))
        }
    }
}

/// What the engine needs to call one field's resolver.
struct FieldBinding {
    parent_type: Name,
    field_name: Name,
    return_type: Type,
    resolver: Arc<dyn FieldResolver>,
    outputs: Arc<OutputTypes>,
}

impl FieldBinding {
    fn new(
        parent_type: &Name,
        definition: &FieldDefinition,
        resolvers: &Resolvers,
        outputs: &Arc<OutputTypes>,
    ) -> Arc<Self> {
        let resolver = resolvers
            .get(parent_type, &definition.name)
            .cloned()
            .unwrap_or_else(|| Arc::new(DefaultFieldResolver));
        Arc::new(Self {
            parent_type: parent_type.clone(),
            field_name: definition.name.clone(),
            return_type: definition.ty.clone(),
            resolver,
            outputs: outputs.clone(),
        })
    }
}

async fn resolve_field<'a>(
    ctx: dynamic::ResolverContext<'a>,
    binding: Arc<FieldBinding>,
) -> EngineResult<Option<FieldValue<'a>>> {
    let request = ctx.data::<Arc<ExecutionRequest>>()?;
    let args = arguments(&ctx);
    let path = response_path(ctx.path_node.as_ref());
    let info = ResolveInfo {
        parent_type: &binding.parent_type,
        field_name: &binding.field_name,
        return_type: &binding.return_type,
        path: &path,
        request,
        node: &ctx.item.node,
    };
    let params = ResolverParams {
        root: parent_value(ctx.parent_value),
        args: &args,
        context: &request.context,
        info: &info,
    };
    let value = binding
        .resolver
        .resolve(params)
        .await
        .map_err(|error| engine_error(&error))?;
    Ok(binding.outputs.complete(&binding.return_type, value)?)
}

async fn subscribe_field<'a>(
    ctx: dynamic::ResolverContext<'a>,
    binding: Arc<FieldBinding>,
) -> EngineResult<BoxStream<'a, EngineResult<FieldValue<'a>>>> {
    let request = ctx.data::<Arc<ExecutionRequest>>()?;
    let args = arguments(&ctx);
    let path = response_path(ctx.path_node.as_ref());
    let info = ResolveInfo {
        parent_type: &binding.parent_type,
        field_name: &binding.field_name,
        return_type: &binding.return_type,
        path: &path,
        request,
        node: &ctx.item.node,
    };
    let params = ResolverParams {
        root: parent_value(ctx.parent_value),
        args: &args,
        context: &request.context,
        info: &info,
    };
    let events = binding
        .resolver
        .subscribe(params)
        .await
        .map_err(|error| engine_error(&error))?;
    Ok(events
        .map(move |event| {
            let value = event.map_err(|error| engine_error(&error))?;
            Ok(binding
                .outputs
                .complete(&binding.return_type, value)?
                .unwrap_or(FieldValue::NULL))
        })
        .boxed())
}

fn parent_value<'v>(value: &'v FieldValue<'_>) -> &'v Value {
    static NULL: Value = Value::Null;
    value.downcast_ref::<Value>().unwrap_or(&NULL)
}

fn arguments(ctx: &dynamic::ResolverContext<'_>) -> Object {
    ctx.args
        .as_index_map()
        .iter()
        .map(|(name, value)| (name.as_str().into(), const_to_json(value)))
        .collect()
}

fn response_path(node: Option<&QueryPathNode<'_>>) -> Path {
    let mut elements = Vec::new();
    let mut current = node;
    while let Some(node) = current {
        elements.push(match &node.segment {
            QueryPathSegment::Index(index) => PathElement::Index(*index),
            QueryPathSegment::Name(name) => PathElement::Key(name.to_string()),
        });
        current = node.parent;
    }
    elements.reverse();
    Path(elements)
}

fn engine_error(error: &FieldError) -> async_graphql::Error {
    let mut engine_error = async_graphql::Error::new(error.message.clone());
    if !error.extensions.is_empty() {
        let mut extensions = ErrorExtensionValues::default();
        for (key, value) in error.extensions.iter() {
            extensions.set(key.as_str(), json_to_const(value));
        }
        engine_error.extensions = Some(extensions);
    }
    engine_error
}

enum OutputKind {
    Object,
    /// An interface or union, with its possible object types.
    Abstract(Vec<Name>),
    Enum,
    Id,
    Scalar,
}

/// Turns resolved JSON into engine values according to the field's return type.
struct OutputTypes {
    kinds: HashMap<Name, OutputKind>,
}

impl OutputTypes {
    fn new(schema: &Schema) -> Self {
        let kinds = schema
            .types
            .iter()
            .map(|(name, ty)| {
                let kind = match ty {
                    ExtendedType::Object(_) => OutputKind::Object,
                    ExtendedType::Interface(_) => OutputKind::Abstract(
                        schema
                            .types
                            .iter()
                            .filter(|(_, candidate)| match candidate {
                                ExtendedType::Object(object) => object.implements_interfaces.contains(name),
                                _ => false,
                            })
                            .map(|(object, _)| object.clone())
                            .collect(),
                    ),
                    ExtendedType::Union(union_type) => OutputKind::Abstract(
                        union_type.members.iter().map(|member| member.name.clone()).collect(),
                    ),
                    ExtendedType::Enum(_) => OutputKind::Enum,
                    ExtendedType::Scalar(_) if name.as_str() == "ID" => OutputKind::Id,
                    ExtendedType::Scalar(_) | ExtendedType::InputObject(_) => OutputKind::Scalar,
                };
                (name.clone(), kind)
            })
            .collect();
        Self { kinds }
    }

    fn complete(&self, ty: &Type, value: Value) -> EngineResult<Option<FieldValue<'static>>> {
        if value.is_null() {
            return Ok(None);
        }
        match ty {
            Type::List(inner) | Type::NonNullList(inner) => {
                let Value::Array(items) = value else {
                    return Err(async_graphql::Error::new(format!(
                        "expected a list for type {ty}, got {value}"
                    )));
                };
                let items = items
                    .into_iter()
                    .map(|item| Ok(self.complete(inner, item)?.unwrap_or(FieldValue::NULL)))
                    .collect::<EngineResult<Vec<_>>>()?;
                Ok(Some(FieldValue::list(items)))
            }
            Type::Named(name) | Type::NonNullNamed(name) => self.complete_named(name, value).map(Some),
        }
    }

    fn complete_named(&self, name: &Name, value: Value) -> EngineResult<FieldValue<'static>> {
        match self.kinds.get(name) {
            Some(OutputKind::Object) => Ok(FieldValue::owned_any(value)),
            Some(OutputKind::Abstract(possible)) => {
                let object_type = match value.get("__typename").and_then(Value::as_str) {
                    Some(type_name) => possible.iter().find(|possible| possible.as_str() == type_name),
                    None if possible.len() == 1 => possible.first(),
                    None => None,
                };
                let Some(object_type) = object_type else {
                    return Err(async_graphql::Error::new(format!(
                        "abstract type {name} must resolve to one of its object types at runtime"
                    )));
                };
                let object_type = object_type.to_string();
                Ok(FieldValue::owned_any(value).with_type(object_type))
            }
            Some(OutputKind::Enum) => Ok(FieldValue::value(match value.as_str() {
                Some(variant) => ConstValue::Enum(async_graphql_value::Name::new(variant)),
                None => json_to_const(&value),
            })),
            Some(OutputKind::Id) => Ok(FieldValue::value(match &value {
                Value::Number(number) => ConstValue::String(number.to_string()),
                other => json_to_const(other),
            })),
            Some(OutputKind::Scalar) | None => Ok(FieldValue::value(json_to_const(&value))),
        }
    }
}

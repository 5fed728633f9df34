//! GraphQL execution of the unified schema, backed by the `async-graphql` dynamic engine.
//!
//! The engine parses, validates and walks operations. Every field is answered by the
//! [`FieldResolver`] registered for it, so resolvers only ever see JSON values.

mod compiled;
mod resolver;
mod schema;
pub(crate) mod values;

use std::sync::Arc;

use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::executable::Operation;
use apollo_compiler::validation::Valid;
use async_graphql::PathSegment;
use async_graphql::ServerError;
use async_graphql::Variables;
use async_graphql::dynamic;
use async_graphql::dynamic::DynamicRequest;
use async_graphql::dynamic::DynamicRequestExt;
use async_graphql::dynamic::FieldValue;
pub use compiled::CompiledOperation;
pub use compiled::CompiledQueryCache;
pub(crate) use compiled::DEFAULT_QUERY_CACHE_CAPACITY;
use futures::StreamExt;
pub use resolver::DefaultFieldResolver;
pub use resolver::FieldResolver;
pub use resolver::ResolveInfo;
pub use resolver::ResolverParams;
pub use resolver::Resolvers;
pub use resolver::ValueStream;
pub(crate) use resolver::default_field_value;

use crate::context::ResolverContext;
use crate::error::BAD_USER_INPUT;
use crate::error::GRAPHQL_VALIDATION_FAILED;
use crate::error::MeshError;
use crate::graphql;
use crate::graphql::Response;
use crate::graphql::ResponseStream;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use values::ast_value_to_json;
use values::const_to_json;

/// One execution of an operation.
#[derive(Clone)]
pub struct ExecutionRequest {
    pub document: Arc<CompiledOperation>,
    pub operation_name: Option<String>,
    pub variables: Object,
    pub root_value: Value,
    pub context: ResolverContext,
}

impl ExecutionRequest {
    pub fn new(document: Arc<CompiledOperation>, context: ResolverContext) -> Self {
        Self {
            document,
            operation_name: None,
            variables: Object::new(),
            root_value: Value::Object(Object::new()),
            context,
        }
    }

    /// The operation this request selects, if the document has it.
    pub fn operation(&self) -> Option<&Node<Operation>> {
        self.document.operation(self.operation_name.as_deref())
    }
}

/// Executes operations against a schema and its resolvers.
pub struct Executor {
    schema: Arc<Valid<Schema>>,
    resolvers: Resolvers,
    engine: dynamic::Schema,
}

impl Executor {
    pub fn new(schema: Arc<Valid<Schema>>, resolvers: Resolvers) -> Result<Self, MeshError> {
        let engine = schema::build(&schema, &resolvers)?;
        Ok(Self {
            schema,
            resolvers,
            engine,
        })
    }

    pub fn schema(&self) -> &Arc<Valid<Schema>> {
        &self.schema
    }

    pub fn resolvers(&self) -> &Resolvers {
        &self.resolvers
    }

    pub async fn execute(&self, request: &ExecutionRequest) -> Response {
        match engine_request(request) {
            Ok(engine_request) => into_response(self.engine.execute(engine_request).await),
            Err(response) => response,
        }
    }

    /// Executes a subscription: one response per event of the root field's stream.
    ///
    /// Other operation types produce a single-item stream.
    pub fn subscribe(&self, request: &ExecutionRequest) -> ResponseStream {
        match engine_request(request) {
            Ok(engine_request) => self
                .engine
                .execute_stream(engine_request)
                .map(into_response)
                .boxed(),
            Err(response) => futures::stream::once(async move { response }).boxed(),
        }
    }
}

/// Checks the operation and its variables, then hands the request to the engine.
fn engine_request(request: &ExecutionRequest) -> Result<DynamicRequest, Response> {
    let operation = request.operation().ok_or_else(|| {
        let message = match &request.operation_name {
            Some(name) => format!("Unknown operation named \"{name}\"."),
            None => "Must provide operation name if query contains multiple operations.".to_string(),
        };
        request_error(vec![
            graphql::Error::builder()
                .message(message)
                .extension_code(GRAPHQL_VALIDATION_FAILED)
                .build(),
        ])
    })?;
    let variables = coerce_variable_values(&operation.variables, &request.variables).map_err(request_error)?;
    let variables_json = serde_json::to_value(&variables).unwrap_or_default();

    let mut executed = request.clone();
    executed.variables = variables;
    let mut engine_request = async_graphql::Request::new(request.document.source())
        .variables(Variables::from_json(variables_json))
        .data(Arc::new(executed));
    if let Some(operation_name) = &request.operation_name {
        engine_request = engine_request.operation_name(operation_name.as_str());
    }
    engine_request.set_parsed_query(request.document.executable().clone());
    Ok(engine_request.root_value(FieldValue::owned_any(request.root_value.clone())))
}

fn request_error(errors: Vec<graphql::Error>) -> Response {
    Response::builder().errors(errors).build()
}

/// Applies defaults to the provided variables and checks required ones are present.
fn coerce_variable_values(
    definitions: &[Node<ast::VariableDefinition>],
    provided: &Object,
) -> Result<Object, Vec<graphql::Error>> {
    let mut coerced = Object::new();
    let mut errors = Vec::new();
    for definition in definitions {
        let name = definition.name.as_str();
        match provided.get(name) {
            Some(Value::Null) if definition.ty.is_non_null() => errors.push(
                graphql::Error::builder()
                    .message(format!(
                        "Variable \"${name}\" of non-null type \"{}\" must not be null.",
                        definition.ty
                    ))
                    .extension_code(BAD_USER_INPUT)
                    .build(),
            ),
            Some(value) => {
                coerced.insert(name, value.clone());
            }
            None => match &definition.default_value {
                Some(default) => {
                    coerced.insert(name, ast_value_to_json(default, &Object::new()));
                }
                None if definition.ty.is_non_null() => errors.push(
                    graphql::Error::builder()
                        .message(format!(
                            "Variable \"${name}\" of required type \"{}\" was not provided.",
                            definition.ty
                        ))
                        .extension_code(BAD_USER_INPUT)
                        .build(),
                ),
                None => {}
            },
        }
    }
    if errors.is_empty() {
        Ok(coerced)
    } else {
        Err(errors)
    }
}

/// Converts an engine response.
///
/// Data is absent only when the request failed before execution started.
fn into_response(response: async_graphql::Response) -> Response {
    let mut errors: Vec<graphql::Error> = response.errors.into_iter().map(into_error).collect();
    let not_executed = response.data == async_graphql::Value::Null
        && !errors.is_empty()
        && errors.iter().all(|error| error.path.is_none());
    let mut converted = Response::builder().build();
    if not_executed {
        for error in &mut errors {
            error
                .extensions
                .entry("code")
                .or_insert_with(|| Value::from(GRAPHQL_VALIDATION_FAILED));
        }
    } else {
        converted.data = Some(const_to_json(&response.data));
    }
    converted.errors = errors;
    converted
}

fn into_error(error: ServerError) -> graphql::Error {
    let mut converted = graphql::Error::builder().message(error.message).build();
    converted.locations = error
        .locations
        .iter()
        .map(|location| graphql::Location {
            line: location.line as u32,
            column: location.column as u32,
        })
        .collect();
    if !error.path.is_empty() {
        converted.path = Some(Path(
            error
                .path
                .iter()
                .map(|segment| match segment {
                    PathSegment::Field(key) => PathElement::Key(key.clone()),
                    PathSegment::Index(index) => PathElement::Index(*index),
                })
                .collect(),
        ));
    }
    if let Some(extensions) = &error.extensions
        && let Ok(Value::Object(extensions)) = serde_json::to_value(extensions).map(Value::from)
    {
        converted.extensions = extensions;
    }
    converted
}

#[cfg(test)]
mod tests;

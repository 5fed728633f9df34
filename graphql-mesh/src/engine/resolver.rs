use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::ast::Type;
use apollo_compiler::executable::Operation;
use async_graphql_parser::types as gql;
use async_trait::async_trait;
use futures::Stream;

use super::ExecutionRequest;
use super::values::field_to_ast;
use crate::context::ResolverContext;
use crate::error::FieldError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// Events produced by a subscription resolver.
pub type ValueStream = Pin<Box<dyn Stream<Item = Result<Value, FieldError>> + Send>>;

/// Everything the executor knows about the field being resolved.
#[derive(Clone, Copy)]
pub struct ResolveInfo<'a> {
    pub parent_type: &'a Name,
    pub field_name: &'a Name,
    pub return_type: &'a Type,
    pub path: &'a Path,
    pub(crate) request: &'a ExecutionRequest,
    pub(crate) node: &'a gql::Field,
}

impl<'a> ResolveInfo<'a> {
    /// The field as written in the operation, fragment spreads inlined.
    pub fn field(&self) -> ast::Field {
        field_to_ast(self.node, &self.request.document.executable().fragments)
    }

    pub fn response_key(&self) -> &'a str {
        self.node.response_key().node.as_str()
    }

    pub fn operation(&self) -> Option<&'a Node<Operation>> {
        self.request.operation()
    }

    pub fn operation_name(&self) -> Option<&'a str> {
        self.operation()
            .and_then(|operation| operation.name.as_ref())
            .map(|name| name.as_str())
    }

    /// The request variables, defaults applied.
    pub fn variables(&self) -> &'a Object {
        &self.request.variables
    }
}

impl fmt::Debug for ResolveInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveInfo")
            .field("parent_type", self.parent_type)
            .field("field_name", self.field_name)
            .field("path", self.path)
            .finish()
    }
}

/// The arguments of a resolver invocation.
#[derive(Clone, Copy)]
pub struct ResolverParams<'a> {
    pub root: &'a Value,
    pub args: &'a Object,
    pub context: &'a ResolverContext,
    pub info: &'a ResolveInfo<'a>,
}

/// Resolves one field of an object type.
#[async_trait]
pub trait FieldResolver: Send + Sync {
    async fn resolve(&self, params: ResolverParams<'_>) -> Result<Value, FieldError>;

    /// Resolves a subscription root field into its stream of events.
    async fn subscribe(&self, params: ResolverParams<'_>) -> Result<ValueStream, FieldError> {
        Err(FieldError::new(format!(
            "field {}.{} does not support subscriptions",
            params.info.parent_type, params.info.field_name
        )))
    }
}

/// Reads the field from the parent value, by response key first and field name second.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFieldResolver;

#[async_trait]
impl FieldResolver for DefaultFieldResolver {
    async fn resolve(&self, params: ResolverParams<'_>) -> Result<Value, FieldError> {
        Ok(default_field_value(params.root, params.info))
    }
}

pub(crate) fn default_field_value(root: &Value, info: &ResolveInfo<'_>) -> Value {
    match root {
        Value::Object(object) => object
            .get(info.response_key())
            .or_else(|| object.get(info.field_name.as_str()))
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Resolvers keyed by `(type, field)`. Fields without an entry use [`DefaultFieldResolver`].
#[derive(Clone, Default)]
pub struct Resolvers {
    map: HashMap<(Name, Name), Arc<dyn FieldResolver>>,
}

impl Resolvers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        type_name: Name,
        field_name: Name,
        resolver: Arc<dyn FieldResolver>,
    ) -> Option<Arc<dyn FieldResolver>> {
        self.map.insert((type_name, field_name), resolver)
    }

    /// Chained form of [`Resolvers::insert`].
    pub fn with(
        mut self,
        type_name: Name,
        field_name: Name,
        resolver: impl FieldResolver + 'static,
    ) -> Self {
        self.insert(type_name, field_name, Arc::new(resolver));
        self
    }

    pub fn get(&self, type_name: &Name, field_name: &Name) -> Option<&Arc<dyn FieldResolver>> {
        self.map.get(&(type_name.clone(), field_name.clone()))
    }

    pub fn contains(&self, type_name: &Name, field_name: &Name) -> bool {
        self.map
            .contains_key(&(type_name.clone(), field_name.clone()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Adds every entry of `other`, replacing existing ones.
    pub fn extend(&mut self, other: Resolvers) {
        self.map.extend(other.map);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(Name, Name), &Arc<dyn FieldResolver>)> {
        self.map.iter()
    }
}

impl fmt::Debug for Resolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.map.keys().map(|(ty, field)| format!("{ty}.{field}")))
            .finish()
    }
}

use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::executable::OperationType;
use async_trait::async_trait;
use tower::BoxError;

use crate::configuration::MockHandlerConfig;
use crate::context::ResolverContext;
use crate::engine::CompiledQueryCache;
use crate::engine::DEFAULT_QUERY_CACHE_CAPACITY;
use crate::engine::ExecutionRequest;
use crate::engine::Executor;
use crate::engine::Resolvers;
use crate::graphql::Response;
use crate::graphql::ResponseStream;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::source::HandlerContext;
use crate::source::MeshHandler;
use crate::source::MeshSource;
use crate::source::SourceExecutor;
use crate::source::SourceRequest;

/// A source executed in process, from SDL and resolvers.
#[derive(Clone)]
pub struct LocalHandler {
    sdl: String,
    resolvers: Resolvers,
    query_root: Value,
    mutation_root: Value,
    context_variables: Vec<String>,
    batch: Option<bool>,
}

impl LocalHandler {
    pub fn new(sdl: impl Into<String>, resolvers: Resolvers) -> Self {
        Self {
            sdl: sdl.into(),
            resolvers,
            query_root: Value::Object(Object::new()),
            mutation_root: Value::Object(Object::new()),
            context_variables: Vec::new(),
            batch: None,
        }
    }

    /// The root value of query operations.
    pub fn query_root(mut self, root: Value) -> Self {
        self.query_root = root;
        self
    }

    /// The root value of mutation operations.
    pub fn mutation_root(mut self, root: Value) -> Self {
        self.mutation_root = root;
        self
    }

    pub fn context_variables(mut self, names: Vec<String>) -> Self {
        self.context_variables = names;
        self
    }

    pub fn batch(mut self, batch: bool) -> Self {
        self.batch = Some(batch);
        self
    }
}

#[async_trait]
impl MeshHandler for LocalHandler {
    async fn get_mesh_source(&self, context: HandlerContext) -> Result<MeshSource, BoxError> {
        let schema = Schema::parse_and_validate(
            self.sdl.as_str(),
            format!("{}.graphql", context.source_name),
        )
        .map_err(|with_errors| with_errors.errors.to_string())?;
        let schema = Arc::new(schema);
        let executor = LocalExecutor {
            executor: Arc::new(Executor::new(schema.clone(), self.resolvers.clone())?),
            documents: CompiledQueryCache::new(schema.clone(), DEFAULT_QUERY_CACHE_CAPACITY),
            query_root: self.query_root.clone(),
            mutation_root: self.mutation_root.clone(),
        };
        Ok(MeshSource {
            schema: Arc::unwrap_or_clone(schema),
            executor: Arc::new(executor),
            context_variables: self.context_variables.clone(),
            batch: self.batch,
        })
    }
}

/// Serves the query and mutation data of its configuration.
///
/// Fields resolve from the configured root objects with default resolvers; abstract
/// values need a `__typename`.
#[derive(Clone)]
pub struct MockHandler {
    inner: LocalHandler,
}

impl MockHandler {
    pub fn new(config: MockHandlerConfig) -> Self {
        let inner = LocalHandler::new(config.schema, Resolvers::new())
            .query_root(Value::from(serde_json::Value::Object(config.query)));
        let inner = match config.mutation {
            Some(mutation) => inner.mutation_root(Value::from(serde_json::Value::Object(mutation))),
            None => inner,
        };
        Self { inner }
    }
}

#[async_trait]
impl MeshHandler for MockHandler {
    async fn get_mesh_source(&self, context: HandlerContext) -> Result<MeshSource, BoxError> {
        self.inner.get_mesh_source(context).await
    }
}

struct LocalExecutor {
    executor: Arc<Executor>,
    documents: CompiledQueryCache,
    query_root: Value,
    mutation_root: Value,
}

impl LocalExecutor {
    async fn prepare(&self, request: SourceRequest) -> Result<ExecutionRequest, Response> {
        let query = request.request.query.unwrap_or_default();
        let document = self
            .documents
            .get_or_compile(&query)
            .await
            .map_err(|errors| Response::builder().errors(errors).build())?;
        let mut execution = ExecutionRequest::new(document, ResolverContext::new(request.context));
        execution.operation_name = request.request.operation_name;
        execution.variables = request.request.variables;
        execution.root_value = match (request.root, execution.operation().map(|op| op.operation_type)) {
            (Some(root), _) => root,
            (None, Some(OperationType::Mutation)) => self.mutation_root.clone(),
            (None, _) => self.query_root.clone(),
        };
        Ok(execution)
    }
}

#[async_trait]
impl SourceExecutor for LocalExecutor {
    async fn execute(&self, request: SourceRequest) -> Result<Response, BoxError> {
        match self.prepare(request).await {
            Ok(execution) => Ok(self.executor.execute(&execution).await),
            Err(response) => Ok(response),
        }
    }

    async fn subscribe(&self, request: SourceRequest) -> Result<ResponseStream, BoxError> {
        match self.prepare(request).await {
            Ok(execution) => Ok(self.executor.subscribe(&execution)),
            Err(response) => Ok(Box::pin(futures::stream::once(async move { response }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::cache::InMemoryCache;
    use crate::graphql;
    use crate::pubsub::PubSub;

    fn context() -> HandlerContext {
        HandlerContext {
            source_name: "library".into(),
            cache: Arc::new(InMemoryCache::default()),
            pubsub: Arc::new(PubSub::new()),
        }
    }

    fn request(query: &str) -> SourceRequest {
        SourceRequest {
            request: graphql::Request::builder().query(query).build(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn mock_handler_serves_configured_data() {
        let config: MockHandlerConfig = serde_json::from_value(serde_json::json!({
            "schema": "type Query { books: [Book!]! } type Mutation { reset: Boolean } type Book { id: ID! title: String }",
            "query": {"books": [{"id": "1", "title": "Dune"}]},
            "mutation": {"reset": true}
        }))
        .unwrap();
        let source = MockHandler::new(config)
            .get_mesh_source(context())
            .await
            .unwrap();
        assert!(source.schema.get_object("Book").is_some());

        let response = source
            .executor
            .execute(request("{ books { title } }"))
            .await
            .unwrap();
        assert_eq!(response.data, Some(json!({"books": [{"title": "Dune"}]})));

        let response = source
            .executor
            .execute(request("mutation { reset }"))
            .await
            .unwrap();
        assert_eq!(response.data, Some(json!({"reset": true})));
    }

    #[tokio::test]
    async fn invalid_operations_are_reported_in_the_response() {
        let source = LocalHandler::new("type Query { a: Int }", Resolvers::new())
            .get_mesh_source(context())
            .await
            .unwrap();
        let response = source.executor.execute(request("{ b }")).await.unwrap();
        assert_eq!(response.data, None);
        assert_eq!(
            response.errors[0].extension_code().as_deref(),
            Some("GRAPHQL_VALIDATION_FAILED")
        );
    }

    #[tokio::test]
    async fn invalid_sdl_fails_the_source() {
        let result = LocalHandler::new("type Query { a: Unknown }", Resolvers::new())
            .get_mesh_source(context())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn caller_root_replaces_the_configured_root() {
        let source = LocalHandler::new("type Query { greeting: String }", Resolvers::new())
            .query_root(json!({"greeting": "configured"}))
            .get_mesh_source(context())
            .await
            .unwrap();

        let response = source.executor.execute(request("{ greeting }")).await.unwrap();
        assert_eq!(response.data, Some(json!({"greeting": "configured"})));

        let mut with_root = request("{ greeting }");
        with_root.root = Some(json!({"greeting": "from the parent"}));
        let response = source.executor.execute(with_root).await.unwrap();
        assert_eq!(response.data, Some(json!({"greeting": "from the parent"})));
    }
}

//! Sources: what handlers produce and how the mesh talks to them.

mod batching;
mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::validation::Valid;
use async_trait::async_trait;
pub use batching::BatchingExecutor;
use futures::StreamExt;
pub use registry::build_sources;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;

use crate::cache::KeyValueCache;
use crate::configuration::MergedTypeConfig;
use crate::graphql;
use crate::graphql::Response;
use crate::graphql::ResponseStream;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::pubsub::PubSub;
use crate::transforms::Transform;

/// A request sent to a source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceRequest {
    pub request: graphql::Request,
    /// The caller context values the source declared in its context variables.
    pub context: Object,
    /// Root value for sources that execute in process.
    pub root: Option<Value>,
}

/// Executes GraphQL requests against one source.
#[async_trait]
pub trait SourceExecutor: Send + Sync {
    async fn execute(&self, request: SourceRequest) -> Result<Response, BoxError>;

    async fn subscribe(&self, request: SourceRequest) -> Result<ResponseStream, BoxError> {
        let response = self.execute(request).await?;
        Ok(futures::stream::once(async move { response }).boxed())
    }
}

/// Adapts any [`tower::Service`] into a [`SourceExecutor`].
#[derive(Clone)]
pub struct ServiceExecutor<S> {
    service: S,
}

impl<S> ServiceExecutor<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> SourceExecutor for ServiceExecutor<S>
where
    S: Service<SourceRequest, Response = Response, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send,
{
    async fn execute(&self, request: SourceRequest) -> Result<Response, BoxError> {
        self.service.clone().oneshot(request).await
    }
}

/// What a handler returns for a source.
pub struct MeshSource {
    pub schema: Valid<Schema>,
    pub executor: Arc<dyn SourceExecutor>,
    pub context_variables: Vec<String>,
    /// The handler's batching preference, used when the source configuration has none.
    pub batch: Option<bool>,
}

impl MeshSource {
    pub fn new(schema: Valid<Schema>, executor: Arc<dyn SourceExecutor>) -> Self {
        Self {
            schema,
            executor,
            context_variables: Vec::new(),
            batch: None,
        }
    }
}

/// Resources handed to handlers.
#[derive(Clone)]
pub struct HandlerContext {
    pub source_name: String,
    pub cache: Arc<dyn KeyValueCache>,
    pub pubsub: Arc<PubSub>,
}

/// Produces a source's schema and executor.
#[async_trait]
pub trait MeshHandler: Send + Sync {
    async fn get_mesh_source(&self, context: HandlerContext) -> Result<MeshSource, BoxError>;
}

/// How one source is configured in a mesh.
#[derive(Clone)]
pub struct SourceConfig {
    pub name: String,
    pub handler: Arc<dyn MeshHandler>,
    pub transforms: Vec<Arc<dyn Transform>>,
    pub batch: Option<bool>,
    pub merge: BTreeMap<String, MergedTypeConfig>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, handler: Arc<dyn MeshHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            transforms: Vec::new(),
            batch: None,
            merge: BTreeMap::new(),
        }
    }

    pub fn transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn batch(mut self, batch: bool) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn merge(mut self, type_name: impl Into<String>, config: MergedTypeConfig) -> Self {
        self.merge.insert(type_name.into(), config);
        self
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("name", &self.name)
            .field("transforms", &self.transforms)
            .field("batch", &self.batch)
            .field("merge", &self.merge)
            .finish()
    }
}

/// A built source: its schema after no-wrap transforms, and how to reach it.
pub struct RawSource {
    pub name: String,
    pub schema: Arc<Valid<Schema>>,
    pub executor: Arc<dyn SourceExecutor>,
    /// Wrap transforms, in configuration order.
    pub transforms: Vec<Arc<dyn Transform>>,
    pub context_variables: Vec<String>,
    pub batch: bool,
    pub merge: BTreeMap<String, MergedTypeConfig>,
}

impl fmt::Debug for RawSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSource")
            .field("name", &self.name)
            .field("transforms", &self.transforms)
            .field("context_variables", &self.context_variables)
            .field("batch", &self.batch)
            .finish()
    }
}

//! Building and running a mesh.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use apollo_compiler::validation::Valid;
use futures::StreamExt;
use tracing::Instrument;

use crate::cache::InMemoryCache;
use crate::cache::KeyValueCache;
use crate::configuration::AdditionalResolverConfig;
use crate::configuration::Configuration;
use crate::configuration::HandlerConfig;
use crate::configuration::LiveQueryConfig;
use crate::configuration::TransformConfig;
use crate::context::MeshContext;
use crate::context::ResolverContext;
use crate::engine::CompiledOperation;
use crate::engine::CompiledQueryCache;
use crate::engine::DEFAULT_QUERY_CACHE_CAPACITY;
use crate::engine::ExecutionRequest;
use crate::engine::Executor;
use crate::engine::Resolvers;
use crate::error::MeshError;
use crate::graphql::Response;
use crate::graphql::ResponseStream;
use crate::handlers::GraphQLHandler;
use crate::handlers::MockHandler;
use crate::hooks::apply_resolver_hooks;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::live_query::ExecutionResult;
use crate::live_query::InvalidationMap;
use crate::live_query::LiveQueryStore;
use crate::merger::MergeInput;
use crate::merger::SchemaMerger;
use crate::merger::StitchingMerger;
use crate::merger::SubSchema;
use crate::pubsub::PubSub;
use crate::resolvers::build_resolvers;
use crate::resolvers::collect_requirements;
use crate::sdk::InContextSdk;
use crate::sdk_requester::SdkRequester;
use crate::source::MeshHandler;
use crate::source::RawSource;
use crate::source::SourceConfig;
use crate::source::build_sources;
use crate::transforms::FilterTransform;
use crate::transforms::PrefixTransform;
use crate::transforms::Transform;

/// Everything needed to build a mesh.
pub struct MeshOptions {
    sources: Vec<SourceConfig>,
    additional_type_defs: Vec<String>,
    additional_resolvers: Vec<AdditionalResolverConfig>,
    resolvers: Resolvers,
    live_query: LiveQueryConfig,
    cache: Option<Arc<dyn KeyValueCache>>,
    pubsub: Option<Arc<PubSub>>,
    merger: Option<Arc<dyn SchemaMerger>>,
    query_cache_capacity: NonZeroUsize,
}

#[buildstructor::buildstructor]
impl MeshOptions {
    /// `resolvers` are programmatic additional resolvers; they replace generated ones.
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)]
    fn new(
        sources: Vec<SourceConfig>,
        additional_type_defs: Vec<String>,
        additional_resolvers: Vec<AdditionalResolverConfig>,
        resolvers: Option<Resolvers>,
        live_query: Option<LiveQueryConfig>,
        cache: Option<Arc<dyn KeyValueCache>>,
        pubsub: Option<Arc<PubSub>>,
        merger: Option<Arc<dyn SchemaMerger>>,
        query_cache_capacity: Option<NonZeroUsize>,
    ) -> Self {
        Self {
            sources,
            additional_type_defs,
            additional_resolvers,
            resolvers: resolvers.unwrap_or_default(),
            live_query: live_query.unwrap_or_default(),
            cache,
            pubsub,
            merger,
            query_cache_capacity: query_cache_capacity.unwrap_or(DEFAULT_QUERY_CACHE_CAPACITY),
        }
    }
}

impl MeshOptions {
    /// Options for a configuration file, with the built-in handlers and transforms.
    pub fn from_configuration(configuration: Configuration) -> Result<Self, MeshError> {
        let mut sources = Vec::with_capacity(configuration.sources.len());
        for source in configuration.sources {
            let handler: Arc<dyn MeshHandler> = match source.handler {
                HandlerConfig::Graphql(graphql) => Arc::new(GraphQLHandler::new(graphql).map_err(
                    |error| MeshError::configuration(format!("source '{}': {error}", source.name)),
                )?),
                HandlerConfig::Mock(mock) => Arc::new(MockHandler::new(mock)),
            };
            let mut config = SourceConfig::new(source.name.clone(), handler);
            for transform in source.transforms {
                let transform: Arc<dyn Transform> = match transform {
                    TransformConfig::Prefix(prefix) => Arc::new(PrefixTransform::new(prefix).map_err(
                        |error| MeshError::configuration(format!("source '{}': {error}", source.name)),
                    )?),
                    TransformConfig::Filter(filter) => Arc::new(FilterTransform::new(filter).map_err(
                        |error| MeshError::configuration(format!("source '{}': {error}", source.name)),
                    )?),
                };
                config = config.transform(transform);
            }
            config.batch = source.batch;
            config.merge = source.merge;
            sources.push(config);
        }

        Ok(Self {
            sources,
            additional_type_defs: configuration.additional_type_defs.into_iter().collect(),
            additional_resolvers: configuration.additional_resolvers,
            resolvers: Resolvers::new(),
            live_query: configuration.live_query,
            cache: Some(Arc::new(InMemoryCache::new(configuration.cache.capacity))),
            pubsub: None,
            merger: None,
            query_cache_capacity: configuration.query_cache.capacity,
        })
    }
}

impl fmt::Debug for MeshOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshOptions")
            .field("sources", &self.sources)
            .field("additional_resolvers", &self.additional_resolvers.len())
            .field("resolvers", &self.resolvers)
            .finish()
    }
}

/// Builds every source, merges them and wires resolvers, invalidation and teardown.
pub async fn get_mesh(options: MeshOptions) -> Result<Mesh, MeshError> {
    let invalidations = InvalidationMap::compile(&options.live_query)?;
    let pubsub = options.pubsub.unwrap_or_default();
    let cache = options
        .cache
        .unwrap_or_else(|| Arc::new(InMemoryCache::default()));

    let raw_sources = build_sources(options.sources, cache.clone(), pubsub.clone()).await?;
    let merger = options.merger.unwrap_or_else(|| Arc::new(StitchingMerger));
    let unified = merger.merge(MergeInput {
        raw_sources: raw_sources.clone(),
        type_defs: options.additional_type_defs,
    })?;

    let requirements = Arc::new(collect_requirements(
        &unified,
        &options.additional_resolvers,
    )?);
    let sdk = InContextSdk::new(unified.sub_schemas.values(), requirements.clone());
    let mut resolvers = build_resolvers(
        &unified,
        &sdk,
        &requirements,
        &options.additional_resolvers,
    )?;
    resolvers.extend(options.resolvers);
    let resolvers = apply_resolver_hooks(&unified.schema, resolvers, &pubsub);

    let live_query_store = Arc::new(LiveQueryStore::new());
    invalidations.subscribe(&pubsub, live_query_store.clone());
    let on_destroy = live_query_store.clone();
    pubsub.destroy().subscribe(move |_| on_destroy.close());

    let context = Arc::new(MeshContext {
        pubsub,
        cache,
        live_query_store,
        sdk,
    });
    tracing::info!(
        sources = raw_sources.len(),
        types = unified.schema.types.len(),
        "mesh built"
    );
    Ok(Mesh {
        inner: Arc::new(MeshInner {
            executor: Arc::new(Executor::new(unified.schema.clone(), resolvers)?),
            documents: CompiledQueryCache::new(unified.schema.clone(), options.query_cache_capacity),
            schema: unified.schema,
            raw_sources,
            sub_schemas: unified.sub_schemas.into_values().collect(),
            context,
        }),
    })
}

/// What an operation is given as.
#[derive(Clone, Debug)]
pub enum Operation {
    Source(String),
    Document(Arc<Valid<ExecutableDocument>>),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Source(source) => f.write_str(source),
            Operation::Document(document) => {
                let document: &ExecutableDocument = document;
                write!(f, "{document}")
            }
        }
    }
}

impl From<&str> for Operation {
    fn from(source: &str) -> Self {
        Operation::Source(source.to_string())
    }
}

impl From<String> for Operation {
    fn from(source: String) -> Self {
        Operation::Source(source)
    }
}

impl From<Arc<Valid<ExecutableDocument>>> for Operation {
    fn from(document: Arc<Valid<ExecutableDocument>>) -> Self {
        Operation::Document(document)
    }
}

impl From<Valid<ExecutableDocument>> for Operation {
    fn from(document: Valid<ExecutableDocument>) -> Self {
        Operation::Document(Arc::new(document))
    }
}

/// One operation to run on the mesh.
#[derive(Clone, Debug)]
pub struct MeshRequest {
    pub operation: Operation,
    pub variables: Object,
    /// Caller values, visible to resolvers and forwarded to sources that declare them.
    pub context: Object,
    pub root_value: Value,
    pub operation_name: Option<String>,
}

#[buildstructor::buildstructor]
impl MeshRequest {
    /// Variables, context and operation name default to empty; the root value defaults
    /// to an empty object.
    #[builder(visibility = "pub")]
    fn new(
        operation: Operation,
        variables: Option<Object>,
        context: Option<Object>,
        root_value: Option<Value>,
        operation_name: Option<String>,
    ) -> Self {
        Self {
            operation,
            variables: variables.unwrap_or_default(),
            context: context.unwrap_or_default(),
            root_value: root_value.unwrap_or_else(|| Value::Object(Object::new())),
            operation_name,
        }
    }
}

impl From<Operation> for MeshRequest {
    fn from(operation: Operation) -> Self {
        MeshRequest::builder().operation(operation).build()
    }
}

impl From<&str> for MeshRequest {
    fn from(source: &str) -> Self {
        Operation::from(source).into()
    }
}

impl From<String> for MeshRequest {
    fn from(source: String) -> Self {
        Operation::from(source).into()
    }
}

struct MeshInner {
    schema: Arc<Valid<Schema>>,
    raw_sources: Vec<Arc<RawSource>>,
    sub_schemas: Vec<Arc<SubSchema>>,
    executor: Arc<Executor>,
    documents: CompiledQueryCache,
    context: Arc<MeshContext>,
}

/// A built mesh. Clones share the same instance.
#[derive(Clone)]
pub struct Mesh {
    inner: Arc<MeshInner>,
}

impl fmt::Debug for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mesh")
            .field("sources", &self.inner.sub_schemas)
            .finish()
    }
}

impl Mesh {
    /// The unified schema.
    pub fn schema(&self) -> &Arc<Valid<Schema>> {
        &self.inner.schema
    }

    pub fn raw_sources(&self) -> &[Arc<RawSource>] {
        &self.inner.raw_sources
    }

    /// The transformed view of a source.
    pub fn sub_schema(&self, source: &str) -> Option<&Arc<SubSchema>> {
        self.inner
            .sub_schemas
            .iter()
            .find(|sub_schema| sub_schema.name() == source)
    }

    pub fn cache(&self) -> &Arc<dyn KeyValueCache> {
        &self.inner.context.cache
    }

    pub fn pubsub(&self) -> &Arc<PubSub> {
        &self.inner.context.pubsub
    }

    pub fn live_query_store(&self) -> &Arc<LiveQueryStore> {
        &self.inner.context.live_query_store
    }

    pub fn sdk(&self) -> &InContextSdk {
        &self.inner.context.sdk
    }

    pub fn query_cache(&self) -> &CompiledQueryCache {
        &self.inner.documents
    }

    /// Executes an operation. Errors are reported in the response.
    pub async fn execute(&self, request: impl Into<MeshRequest>) -> ExecutionResult {
        let request = request.into();
        let span = tracing::info_span!(
            "mesh.execute",
            operation_name = request.operation_name.as_deref().unwrap_or_default()
        );
        async move {
            let execution = match self.prepare(request).await {
                Ok(execution) => execution,
                Err(response) => {
                    tracing::debug!(errors = response.errors.len(), "operation rejected");
                    return ExecutionResult::Single(response);
                }
            };
            tracing::debug!(operation_name = ?execution.operation_name, "executing operation");
            self.inner
                .context
                .live_query_store
                .execute(self.inner.executor.clone(), execution)
                .await
        }
        .instrument(span)
        .await
    }

    /// Executes a subscription; other operations yield a single response.
    pub async fn subscribe(&self, request: impl Into<MeshRequest>) -> ResponseStream {
        let request = request.into();
        let span = tracing::info_span!(
            "mesh.subscribe",
            operation_name = request.operation_name.as_deref().unwrap_or_default()
        );
        async move {
            match self.prepare(request).await {
                Ok(execution) => {
                    tracing::debug!(operation_name = ?execution.operation_name, "subscribing");
                    self.inner.executor.subscribe(&execution)
                }
                Err(response) => {
                    tracing::debug!(errors = response.errors.len(), "subscription rejected");
                    futures::stream::once(async move { response }).boxed()
                }
            }
        }
        .instrument(span)
        .await
    }

    pub fn sdk_requester(&self) -> SdkRequester<Mesh> {
        SdkRequester::new(self.clone())
    }

    /// Publishes the destroy event and ends live queries. Later calls do nothing.
    pub fn destroy(&self) {
        tracing::debug!("destroying mesh");
        self.inner.context.pubsub.teardown();
        self.inner.context.live_query_store.close();
    }

    async fn prepare(&self, request: MeshRequest) -> Result<ExecutionRequest, Response> {
        let document = match request.operation {
            Operation::Source(source) => self
                .inner
                .documents
                .get_or_compile(&source)
                .await
                .map_err(|errors| Response::builder().errors(errors).build())?,
            Operation::Document(document) => CompiledOperation::from_document(document)
                .map(Arc::new)
                .map_err(|errors| Response::builder().errors(errors).build())?,
        };
        let operation_name = request.operation_name.or_else(|| {
            document
                .operation(None)
                .and_then(|operation| operation.name.as_ref())
                .map(|name| name.to_string())
        });
        let context = ResolverContext::for_mesh(self.inner.context.clone(), request.context);
        let mut execution = ExecutionRequest::new(document, context);
        execution.operation_name = operation_name;
        execution.variables = request.variables;
        execution.root_value = request.root_value;
        Ok(execution)
    }
}

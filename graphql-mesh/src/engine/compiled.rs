use std::num::NonZeroUsize;
use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::executable::Operation;
use apollo_compiler::validation::Valid;
use async_graphql_parser::types as gql;

use crate::cache::storage::CacheStorage;
use crate::error::GRAPHQL_PARSE_FAILED;
use crate::error::GRAPHQL_VALIDATION_FAILED;
use crate::graphql;

pub(crate) const DEFAULT_QUERY_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

/// Directive marking live queries. Only the mesh interprets it, the engine never sees it.
const LIVE_DIRECTIVE: &str = "live";

/// An operation document validated against the unified schema and parsed for the engine.
#[derive(Debug)]
pub struct CompiledOperation {
    document: Arc<Valid<ExecutableDocument>>,
    source: String,
    executable: gql::ExecutableDocument,
}

impl CompiledOperation {
    pub fn compile(schema: &Valid<Schema>, source: &str) -> Result<Self, Vec<graphql::Error>> {
        let document = ExecutableDocument::parse_and_validate(schema, source, "operation.graphql")
            .map_err(|with_errors| {
                // Documents that do not even parse are reported as parse failures.
                let code = if apollo_compiler::ast::Document::parse(source, "operation.graphql").is_err() {
                    GRAPHQL_PARSE_FAILED
                } else {
                    GRAPHQL_VALIDATION_FAILED
                };
                graphql::Error::from_diagnostics(&with_errors.errors, code)
            })?;
        Self::from_document(Arc::new(document))
    }

    /// Wraps an already validated document.
    pub fn from_document(document: Arc<Valid<ExecutableDocument>>) -> Result<Self, Vec<graphql::Error>> {
        let mut engine_document = (**document).clone();
        let operations = engine_document
            .operations
            .anonymous
            .iter_mut()
            .chain(engine_document.operations.named.values_mut());
        for operation in operations {
            operation
                .make_mut()
                .directives
                .retain(|directive| directive.name != LIVE_DIRECTIVE);
        }
        let source = engine_document.to_string();
        let executable = async_graphql_parser::parse_query(&source).map_err(|error| {
            vec![
                graphql::Error::builder()
                    .message(error.to_string())
                    .extension_code(GRAPHQL_PARSE_FAILED)
                    .build(),
            ]
        })?;
        Ok(Self {
            document,
            source,
            executable,
        })
    }

    /// The validated document, directives included.
    pub fn document(&self) -> &Arc<Valid<ExecutableDocument>> {
        &self.document
    }

    pub fn operation(&self, name: Option<&str>) -> Option<&Node<Operation>> {
        self.document.operations.get(name).ok()
    }

    /// The text the engine executes.
    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn executable(&self) -> &gql::ExecutableDocument {
        &self.executable
    }
}

/// Compiled operations, keyed by their source text.
///
/// Repeated executions of the same operation text skip parsing and validation.
#[derive(Clone)]
pub struct CompiledQueryCache {
    schema: Arc<Valid<Schema>>,
    storage: CacheStorage<String, Arc<CompiledOperation>>,
}

impl CompiledQueryCache {
    pub fn new(schema: Arc<Valid<Schema>>, capacity: NonZeroUsize) -> Self {
        Self {
            schema,
            storage: CacheStorage::new(capacity),
        }
    }

    pub async fn get_or_compile(
        &self,
        source: &str,
    ) -> Result<Arc<CompiledOperation>, Vec<graphql::Error>> {
        let key = source.to_string();
        if let Some(operation) = self.storage.get(&key).await {
            tracing::trace!("compiled document cache hit");
            return Ok(operation);
        }
        let operation = Arc::new(CompiledOperation::compile(&self.schema, source)?);
        self.storage.insert(key, operation.clone()).await;
        Ok(operation)
    }

    pub async fn len(&self) -> usize {
        self.storage.len().await
    }
}

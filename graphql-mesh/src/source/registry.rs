use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tower::BoxError;

use super::BatchingExecutor;
use super::HandlerContext;
use super::RawSource;
use super::SourceConfig;
use super::SourceExecutor;
use crate::cache::KeyValueCache;
use crate::error::MeshError;
use crate::error::SourceFailure;
use crate::error::SourceFailures;
use crate::pubsub::PubSub;

/// Builds every configured source concurrently.
///
/// All handlers run to completion even when some fail; failures are then reported together.
pub async fn build_sources(
    configs: Vec<SourceConfig>,
    cache: Arc<dyn KeyValueCache>,
    pubsub: Arc<PubSub>,
) -> Result<Vec<Arc<RawSource>>, MeshError> {
    let mut names = HashSet::new();
    for config in &configs {
        if !names.insert(config.name.as_str()) {
            return Err(MeshError::DuplicateSource {
                name: config.name.clone(),
            });
        }
    }

    let results = join_all(configs.into_iter().map(|config| {
        let context = HandlerContext {
            source_name: config.name.clone(),
            cache: cache.clone(),
            pubsub: pubsub.clone(),
        };
        async move {
            let name = config.name.clone();
            let result = build_source(config, context).await;
            if let Err(error) = &result {
                tracing::error!(source = %name, %error, "failed to generate the schema for source");
            }
            (name, result)
        }
    }))
    .await;

    let mut sources = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (name, result) in results {
        match result {
            Ok(source) => sources.push(Arc::new(source)),
            Err(error) => failures.push(SourceFailure {
                source: name,
                reason: error.to_string(),
            }),
        }
    }
    if !failures.is_empty() {
        return Err(MeshError::SourceConstruction(SourceFailures(failures)));
    }
    Ok(sources)
}

async fn build_source(config: SourceConfig, context: HandlerContext) -> Result<RawSource, BoxError> {
    let source = config.handler.get_mesh_source(context).await?;

    let (no_wrap, wrap): (Vec<_>, Vec<_>) = config
        .transforms
        .into_iter()
        .partition(|transform| transform.no_wrap());
    let mut schema = source.schema;
    for transform in &no_wrap {
        schema = transform.transform_schema(schema)?;
    }

    // sources batch by default
    let batch = config.batch.or(source.batch).unwrap_or(true);
    let executor: Arc<dyn SourceExecutor> = if batch {
        Arc::new(BatchingExecutor::new(config.name.clone(), source.executor))
    } else {
        source.executor
    };
    tracing::debug!(source = %config.name, batch, wrap_transforms = wrap.len(), "source built");

    Ok(RawSource {
        name: config.name,
        schema: Arc::new(schema),
        executor,
        transforms: wrap,
        context_variables: source.context_variables,
        batch,
        merge: config.merge,
    })
}

//! Publishes a [`ResolverEvent`] after every field resolution of the unified schema.

use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::schema::ExtendedType;
use async_trait::async_trait;

use crate::engine::DefaultFieldResolver;
use crate::engine::FieldResolver;
use crate::engine::ResolverParams;
use crate::engine::Resolvers;
use crate::engine::ValueStream;
use crate::error::FieldError;
use crate::json_ext::Value;
use crate::pubsub::PubSub;
use crate::pubsub::ResolverData;
use crate::pubsub::ResolverEvent;
use crate::pubsub::ResolverEventInfo;

/// Wraps the resolver of every object field of `schema`, default ones included.
pub(crate) fn apply_resolver_hooks(
    schema: &Schema,
    resolvers: Resolvers,
    pubsub: &Arc<PubSub>,
) -> Resolvers {
    let mut hooked = Resolvers::new();
    for (type_name, ty) in &schema.types {
        let ExtendedType::Object(object) = ty else {
            continue;
        };
        if ty.is_built_in() {
            continue;
        }
        for field_name in object.fields.keys() {
            let inner = resolvers
                .get(type_name, field_name)
                .cloned()
                .unwrap_or_else(|| Arc::new(DefaultFieldResolver));
            hooked.insert(
                type_name.clone(),
                field_name.clone(),
                Arc::new(ObservedResolver {
                    inner,
                    pubsub: pubsub.clone(),
                }),
            );
        }
    }
    hooked
}

/// Returns exactly what the inner resolver returned.
struct ObservedResolver {
    inner: Arc<dyn FieldResolver>,
    pubsub: Arc<PubSub>,
}

#[async_trait]
impl FieldResolver for ObservedResolver {
    async fn resolve(&self, params: ResolverParams<'_>) -> Result<Value, FieldError> {
        let result = self.inner.resolve(params).await;
        let channel = self.pubsub.resolver_done();
        if channel.has_subscribers() {
            let info = params.info;
            channel.publish(&ResolverEvent {
                result: result.clone(),
                resolver_data: ResolverData {
                    info: ResolverEventInfo {
                        parent_type: info.parent_type.clone(),
                        field_name: info.field_name.clone(),
                        return_type: info.return_type.clone(),
                        path: info.path.clone(),
                        operation_name: info.operation_name().map(str::to_string),
                    },
                    args: params.args.clone(),
                    context: params.context.values().clone(),
                    root: params.root.clone(),
                },
            });
        }
        result
    }

    async fn subscribe(&self, params: ResolverParams<'_>) -> Result<ValueStream, FieldError> {
        self.inner.subscribe(params).await
    }
}

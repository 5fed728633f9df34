use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::executable::OperationType;
use async_trait::async_trait;

use crate::delegate::Requirements;
use crate::delegate::SelectionSource;
use crate::delegate::delegate;
use crate::delegate::delegate_subscription;
use crate::delegate::plan;
use crate::engine::FieldResolver;
use crate::engine::ResolverParams;
use crate::engine::ValueStream;
use crate::error::FieldError;
use crate::json_ext::Value;
use crate::merger::SubSchema;

/// Serves a unified root field from the source that defines it.
pub(crate) struct DelegateResolver {
    pub(crate) sub_schema: Arc<SubSchema>,
    pub(crate) operation_type: OperationType,
    pub(crate) field_name: Name,
    pub(crate) requirements: Arc<Requirements>,
}

#[async_trait]
impl FieldResolver for DelegateResolver {
    async fn resolve(&self, params: ResolverParams<'_>) -> Result<Value, FieldError> {
        let outgoing = plan(
            &self.sub_schema,
            self.operation_type,
            &self.field_name,
            SelectionSource::Caller(params.info),
            &self.requirements,
        )?;
        delegate(
            &self.sub_schema,
            self.operation_type,
            &self.field_name,
            params.args,
            &outgoing,
            None,
            params.context,
        )
        .await
    }

    async fn subscribe(&self, params: ResolverParams<'_>) -> Result<ValueStream, FieldError> {
        let outgoing = plan(
            &self.sub_schema,
            OperationType::Subscription,
            &self.field_name,
            SelectionSource::Caller(params.info),
            &self.requirements,
        )?;
        delegate_subscription(
            &self.sub_schema,
            &self.field_name,
            params.args,
            &outgoing,
            None,
            params.context,
        )
        .await
    }
}

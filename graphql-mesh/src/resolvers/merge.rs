use std::sync::Arc;

use async_trait::async_trait;

use crate::configuration::MergedTypeConfig;
use crate::engine::FieldResolver;
use crate::engine::ResolverParams;
use crate::engine::default_field_value;
use crate::error::FieldError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::sdk::ArgsFromKeys;
use crate::sdk::SdkCall;

/// Resolves a field of a merged type that the parent's source did not provide.
///
/// The entity is fetched from the source that has the field, through its batched lookup
/// field keyed by the type's key field.
pub(crate) struct MergedFieldResolver {
    pub(crate) source: String,
    pub(crate) merge: MergedTypeConfig,
}

#[async_trait]
impl FieldResolver for MergedFieldResolver {
    async fn resolve(&self, params: ResolverParams<'_>) -> Result<Value, FieldError> {
        if let Value::Object(parent) = params.root {
            let info = params.info;
            if let Some(value) = parent
                .get(info.response_key())
                .or_else(|| parent.get(info.field_name.as_str()))
            {
                return Ok(value.clone());
            }
        }
        let key = params
            .root
            .get(self.merge.key_field.as_str())
            .cloned()
            .unwrap_or(Value::Null);
        if key.is_null() {
            return Ok(Value::Null);
        }

        let api = params
            .context
            .mesh()
            .and_then(|mesh| mesh.sdk.source(&self.source))
            .ok_or_else(|| {
                FieldError::new(format!("source '{}' is not available", self.source))
            })?;
        let key_arg = self.merge.key_arg.clone();
        let args_from_keys: ArgsFromKeys = Arc::new(move |keys: &[Value]| {
            let mut args = Object::new();
            args.insert(key_arg.as_str(), Value::Array(keys.to_vec()));
            args
        });
        let call = SdkCall::builder()
            .context(params.context)
            .info(params.info)
            .key(key)
            .args_from_keys(args_from_keys)
            .build()
            .select_caller_field();
        let entity = api.call("Query", &self.merge.field_name, call).await?;
        Ok(default_field_value(&entity, params.info))
    }
}

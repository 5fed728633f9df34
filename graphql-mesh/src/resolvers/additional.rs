use std::sync::Arc;

use async_trait::async_trait;

use crate::configuration::AdditionalResolverConfig;
use crate::engine::FieldResolver;
use crate::engine::ResolverParams;
use crate::error::FieldError;
use crate::error::MeshError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::sdk::ArgsFromKeys;
use crate::sdk::SdkCall;
use crate::template::Template;

/// A resolver declared in configuration: one call to a source field, with arguments
/// rendered from the parent, the field arguments and the context.
#[derive(Debug)]
pub(crate) struct AdditionalResolver {
    source_name: String,
    source_type_name: String,
    source_field_name: String,
    source_args: Vec<(String, Template)>,
    result: Option<String>,
    /// `(key_field, keys_arg)` of batched resolvers.
    batch: Option<(String, String)>,
}

impl AdditionalResolver {
    pub(crate) fn new(config: &AdditionalResolverConfig) -> Result<Self, MeshError> {
        let source_args = config
            .source_args
            .iter()
            .map(|(name, template)| {
                template
                    .parse::<Template>()
                    .map(|template| (name.clone(), template))
                    .map_err(|error| {
                        MeshError::configuration(format!(
                            "resolver for {}.{}: {error}",
                            config.target_type_name, config.target_field_name
                        ))
                    })
            })
            .collect::<Result<_, _>>()?;
        let batch = match (&config.key_field, &config.keys_arg) {
            (Some(key_field), Some(keys_arg)) => Some((key_field.clone(), keys_arg.clone())),
            _ => None,
        };
        Ok(Self {
            source_name: config.source_name.clone(),
            source_type_name: config.source_type_name.clone(),
            source_field_name: config.source_field_name.clone(),
            source_args,
            result: config.result.clone(),
            batch,
        })
    }
}

#[async_trait]
impl FieldResolver for AdditionalResolver {
    async fn resolve(&self, params: ResolverParams<'_>) -> Result<Value, FieldError> {
        let api = params
            .context
            .mesh()
            .and_then(|mesh| mesh.sdk.source(&self.source_name))
            .ok_or_else(|| {
                FieldError::new(format!("source '{}' is not available", self.source_name))
            })?;

        let mut data = Object::new();
        data.insert("root", params.root.clone());
        data.insert("args", Value::Object(params.args.clone()));
        data.insert("context", Value::Object(params.context.values().clone()));
        let data = Value::Object(data);
        let args: Object = self
            .source_args
            .iter()
            .map(|(name, template)| (name.as_str().into(), template.render_value(&data)))
            .collect();

        let call = match &self.batch {
            Some((key_field, keys_arg)) => {
                let key = params
                    .root
                    .get_dotted(key_field)
                    .cloned()
                    .unwrap_or(Value::Null);
                if key.is_null() {
                    return Ok(Value::Null);
                }
                let keys_arg = keys_arg.clone();
                let args_from_keys: ArgsFromKeys = Arc::new(move |keys: &[Value]| {
                    let mut args = Object::new();
                    args.insert(keys_arg.as_str(), Value::Array(keys.to_vec()));
                    args
                });
                SdkCall::builder()
                    .args(args)
                    .context(params.context)
                    .info(params.info)
                    .key(key)
                    .args_from_keys(args_from_keys)
                    .build()
            }
            None => SdkCall::builder()
                .root(params.root)
                .args(args)
                .context(params.context)
                .info(params.info)
                .build(),
        };
        let value = api
            .call(&self.source_type_name, &self.source_field_name, call)
            .await?;
        Ok(match &self.result {
            Some(path) => value.get_dotted(path).cloned().unwrap_or(Value::Null),
            None => value,
        })
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use crate::configuration::LiveQueryConfig;
use crate::error::MeshError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::live_query::LiveQueryStore;
use crate::pubsub::PubSub;
use crate::pubsub::ResolverEvent;
use crate::pubsub::SubscriptionId;
use crate::template::Template;

/// Compiled invalidation rules: `Type.field` to the identifiers its resolution invalidates.
#[derive(Debug, Default)]
pub(crate) struct InvalidationMap {
    rules: HashMap<String, Vec<Template>>,
}

impl InvalidationMap {
    pub(crate) fn compile(config: &LiveQueryConfig) -> Result<Self, MeshError> {
        let mut rules: HashMap<String, Vec<Template>> = HashMap::new();
        for rule in &config.invalidations {
            let templates = rule
                .invalidate
                .iter()
                .map(|template| {
                    template.parse::<Template>().map_err(|error| {
                        MeshError::configuration(format!(
                            "invalidation rule for {}: {error}",
                            rule.field
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            rules.entry(rule.field.clone()).or_default().extend(templates);
        }
        Ok(Self { rules })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Identifiers invalidated by a resolution. A failed resolution renders with a null
    /// `result`.
    pub(crate) fn identifiers_for(&self, event: &ResolverEvent) -> Vec<String> {
        let result = event.result.as_ref().ok().cloned().unwrap_or(Value::Null);
        let data = &event.resolver_data;
        let path = format!("{}.{}", data.info.parent_type, data.info.field_name);
        let Some(templates) = self.rules.get(&path) else {
            return Vec::new();
        };

        let mut info = Object::new();
        info.insert("parentType", Value::from(data.info.parent_type.as_str()));
        info.insert("fieldName", Value::from(data.info.field_name.as_str()));
        info.insert("path", data.info.path.to_value());
        if let Some(operation_name) = &data.info.operation_name {
            info.insert("operationName", Value::from(operation_name.as_str()));
        }
        let mut values = Object::new();
        values.insert("args", Value::Object(data.args.clone()));
        values.insert("result", result);
        values.insert("root", data.root.clone());
        values.insert("context", Value::Object(data.context.clone()));
        values.insert("info", Value::Object(info));
        let values = Value::Object(values);

        templates
            .iter()
            .map(|template| template.render(&values))
            .collect()
    }

    /// Invalidates `store` after every matching resolution. Nothing is subscribed when
    /// there are no rules.
    pub(crate) fn subscribe(
        self,
        pubsub: &PubSub,
        store: Arc<LiveQueryStore>,
    ) -> Option<SubscriptionId> {
        if self.is_empty() {
            return None;
        }
        Some(pubsub.resolver_done().subscribe(move |event: &ResolverEvent| {
            let identifiers = self.identifiers_for(event);
            if !identifiers.is_empty() {
                store.invalidate(&identifiers);
            }
        }))
    }
}

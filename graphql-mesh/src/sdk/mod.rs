//! The in-context SDK.
//!
//! Every root field of every source view is registered once as a [`CallableDescriptor`].
//! Resolvers reach them through [`SourceApi::call`], which delegates into the view with
//! the caller's selection, an override, or a batch of keys.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::ast::Type;
use apollo_compiler::executable::OperationType;
use indexmap::IndexMap;

use crate::batching::MicroBatcher;
use crate::context::ResolverContext;
use crate::delegate::Outgoing;
use crate::delegate::Requirements;
use crate::delegate::SelectionSetInput;
use crate::delegate::SelectionSource;
use crate::delegate::delegate;
use crate::delegate::delegate_subscription;
use crate::delegate::is_composite;
use crate::delegate::plan;
use crate::delegate::root_field;
use crate::engine::ResolveInfo;
use crate::engine::ValueStream;
use crate::error::FieldError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::merger::SubSchema;

const ROOTS: [(OperationType, &str); 3] = [
    (OperationType::Query, "Query"),
    (OperationType::Mutation, "Mutation"),
    (OperationType::Subscription, "Subscription"),
];

/// Computes the arguments of a batched call from its unique keys.
pub type ArgsFromKeys = Arc<dyn Fn(&[Value]) -> Object + Send + Sync>;

/// Splits the result of a batched call into one value per key.
pub type ValuesFromResults = Arc<dyn Fn(&Value, &[Value]) -> Vec<Value> + Send + Sync>;

/// A root field of a source view that resolvers can call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallableDescriptor {
    pub source_name: String,
    pub operation_type: OperationType,
    /// The root type of the view.
    pub type_name: Name,
    pub field_name: Name,
    pub return_type: Type,
}

/// One SDK call.
#[derive(Clone, Default)]
pub struct SdkCall<'a> {
    /// The parent value of the calling resolver, used as the source's root value.
    /// Batched calls serve many parents and forward none.
    pub root: Option<&'a Value>,
    /// Arguments of the call. Batched calls share them and add the arguments built from
    /// their keys.
    pub args: Object,
    pub context: Option<&'a ResolverContext>,
    /// The resolver's info; its selection is forwarded unless overridden.
    pub info: Option<&'a ResolveInfo<'a>>,
    pub selection_set: Option<SelectionSetInput>,
    pub key: Option<Value>,
    pub args_from_keys: Option<ArgsFromKeys>,
    pub values_from_results: Option<ValuesFromResults>,
    select_caller_field: bool,
}

#[buildstructor::buildstructor]
impl<'a> SdkCall<'a> {
    #[builder(visibility = "pub")]
    fn new(
        root: Option<&'a Value>,
        args: Option<Object>,
        context: Option<&'a ResolverContext>,
        info: Option<&'a ResolveInfo<'a>>,
        selection_set: Option<SelectionSetInput>,
        key: Option<Value>,
        args_from_keys: Option<ArgsFromKeys>,
        values_from_results: Option<ValuesFromResults>,
    ) -> Self {
        Self {
            root,
            args: args.unwrap_or_default(),
            context,
            info,
            selection_set,
            key,
            args_from_keys,
            values_from_results,
            select_caller_field: false,
        }
    }

    /// Selects the resolving field itself on the target's return type, as entity
    /// lookups do.
    pub(crate) fn select_caller_field(mut self) -> Self {
        self.select_caller_field = true;
        self
    }
}

impl fmt::Debug for SdkCall<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkCall")
            .field("root", &self.root)
            .field("args", &self.args)
            .field("selection_set", &self.selection_set)
            .field("key", &self.key)
            .field("batched", &self.args_from_keys.is_some())
            .finish()
    }
}

/// Every source's callable root fields.
#[derive(Default)]
pub struct InContextSdk {
    sources: IndexMap<String, SourceApi>,
}

impl InContextSdk {
    pub(crate) fn new<'s>(
        sub_schemas: impl IntoIterator<Item = &'s Arc<SubSchema>>,
        requirements: Arc<Requirements>,
    ) -> Self {
        let sources = sub_schemas
            .into_iter()
            .map(|sub_schema| {
                let api = SourceApi::new(sub_schema.clone(), requirements.clone());
                (sub_schema.name().to_string(), api)
            })
            .collect();
        Self { sources }
    }

    pub fn source(&self, name: &str) -> Option<&SourceApi> {
        self.sources.get(name)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceApi> {
        self.sources.values()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &CallableDescriptor> {
        self.sources.values().flat_map(SourceApi::descriptors)
    }
}

/// The callable root fields of one source.
pub struct SourceApi {
    sub_schema: Arc<SubSchema>,
    descriptors: Vec<CallableDescriptor>,
    /// `(type, field)` to an index in `descriptors`; canonical root names are registered too.
    index: HashMap<(String, String), usize>,
    requirements: Arc<Requirements>,
    batcher: MicroBatcher<Value, Value>,
}

impl fmt::Debug for SourceApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceApi")
            .field("source", &self.sub_schema.name())
            .field("callables", &self.descriptors.len())
            .finish()
    }
}

impl SourceApi {
    fn new(sub_schema: Arc<SubSchema>, requirements: Arc<Requirements>) -> Self {
        let mut descriptors = Vec::new();
        let mut index = HashMap::new();
        for (operation_type, canonical) in ROOTS {
            let Some(root) = sub_schema.root_type(operation_type) else {
                continue;
            };
            let Some(object) = sub_schema.schema.get_object(root) else {
                continue;
            };
            for (field_name, field) in &object.fields {
                let position = descriptors.len();
                descriptors.push(CallableDescriptor {
                    source_name: sub_schema.name().to_string(),
                    operation_type,
                    type_name: root.clone(),
                    field_name: field_name.clone(),
                    return_type: field.ty.clone(),
                });
                index.insert((root.to_string(), field_name.to_string()), position);
                index
                    .entry((canonical.to_string(), field_name.to_string()))
                    .or_insert(position);
            }
        }
        tracing::trace!(source = %sub_schema.name(), callables = descriptors.len(), "sdk registered");
        Self {
            sub_schema,
            descriptors,
            index,
            requirements,
            batcher: MicroBatcher::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.sub_schema.name()
    }

    pub fn sub_schema(&self) -> &Arc<SubSchema> {
        &self.sub_schema
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &CallableDescriptor> {
        self.descriptors.iter()
    }

    pub fn descriptor(&self, type_name: &str, field_name: &str) -> Option<&CallableDescriptor> {
        self.index
            .get(&(type_name.to_string(), field_name.to_string()))
            .and_then(|position| self.descriptors.get(*position))
    }

    fn callable(&self, type_name: &str, field_name: &str) -> Result<&CallableDescriptor, FieldError> {
        self.descriptor(type_name, field_name).ok_or_else(|| {
            FieldError::new(format!(
                "source '{}' has no operation {type_name}.{field_name}",
                self.name()
            ))
        })
    }

    /// Calls `type_name.field_name` of this source.
    ///
    /// With both `key` and `args_from_keys`, calls made within one scheduling turn for the
    /// same field, selection and arguments share one request.
    pub async fn call(
        &self,
        type_name: &str,
        field_name: &str,
        call: SdkCall<'_>,
    ) -> Result<Value, FieldError> {
        let descriptor = self.callable(type_name, field_name)?;
        let outgoing = self.outgoing(descriptor, &call)?;
        let default_context = ResolverContext::default();
        let context = call.context.unwrap_or(&default_context);
        let target = Target {
            descriptor,
            outgoing: &outgoing,
            context,
        };
        match (call.key, call.args_from_keys) {
            (Some(key), Some(args_from_keys)) => {
                self.call_batched(target, call.args, key, args_from_keys, call.values_from_results)
                    .await
            }
            _ => {
                delegate(
                    &self.sub_schema,
                    descriptor.operation_type,
                    &descriptor.field_name,
                    &call.args,
                    &outgoing,
                    call.root,
                    context,
                )
                .await
            }
        }
    }

    /// Subscribes to a subscription root field of this source.
    pub async fn subscribe(
        &self,
        type_name: &str,
        field_name: &str,
        call: SdkCall<'_>,
    ) -> Result<ValueStream, FieldError> {
        let descriptor = self.callable(type_name, field_name)?;
        if descriptor.operation_type != OperationType::Subscription {
            return Err(FieldError::new(format!(
                "{type_name}.{field_name} of source '{}' is not a subscription",
                self.name()
            )));
        }
        let outgoing = self.outgoing(descriptor, &call)?;
        let default_context = ResolverContext::default();
        delegate_subscription(
            &self.sub_schema,
            &descriptor.field_name,
            &call.args,
            &outgoing,
            call.root,
            call.context.unwrap_or(&default_context),
        )
        .await
    }

    fn outgoing(
        &self,
        descriptor: &CallableDescriptor,
        call: &SdkCall<'_>,
    ) -> Result<Outgoing, FieldError> {
        let source = match (&call.selection_set, call.info) {
            (Some(input), info) => {
                let definition =
                    root_field(&self.sub_schema, descriptor.operation_type, &descriptor.field_name)?;
                let return_type = definition.ty.inner_named_type();
                if is_composite(&self.sub_schema.schema, return_type) {
                    let current = info.map(|info| info.field().selection_set);
                    SelectionSource::Override(input.normalize(
                        &self.sub_schema.schema,
                        return_type,
                        current.as_deref(),
                    )?)
                } else {
                    SelectionSource::Empty
                }
            }
            (None, Some(info)) if call.select_caller_field => SelectionSource::CallerField(info),
            (None, Some(info)) => SelectionSource::Caller(info),
            (None, None) => SelectionSource::Empty,
        };
        plan(
            &self.sub_schema,
            descriptor.operation_type,
            &descriptor.field_name,
            source,
            &self.requirements,
        )
    }

    /// Joins the calls made within one scheduling turn that target the same field with
    /// the same selection, arguments and forwarded context.
    async fn call_batched(
        &self,
        target: Target<'_>,
        args: Object,
        key: Value,
        args_from_keys: ArgsFromKeys,
        values_from_results: Option<ValuesFromResults>,
    ) -> Result<Value, FieldError> {
        let Target {
            descriptor,
            outgoing,
            context,
        } = target;
        let forwarded = context.pick(&self.sub_schema.source.context_variables);
        let batch_key = format!(
            "{}:{}:{}:{}:{}:{}",
            self.name(),
            descriptor.operation_type,
            descriptor.field_name,
            outgoing.fingerprint(),
            serde_json::to_string(&args).unwrap_or_default(),
            serde_json::to_string(&forwarded).unwrap_or_default()
        );
        let sub_schema = &self.sub_schema;
        self.batcher
            .submit(batch_key, key, move |keys| async move {
                let mut unique: Vec<Value> = Vec::with_capacity(keys.len());
                let slots: Vec<usize> = keys
                    .into_iter()
                    .map(|key| match unique.iter().position(|seen| *seen == key) {
                        Some(slot) => slot,
                        None => {
                            unique.push(key);
                            unique.len() - 1
                        }
                    })
                    .collect();
                let mut args = args;
                args.extend(args_from_keys(&unique));
                tracing::debug!(
                    source = %sub_schema.name(),
                    field = %descriptor.field_name,
                    keys = unique.len(),
                    callers = slots.len(),
                    "dispatching batched call"
                );
                let result = delegate(
                    sub_schema,
                    descriptor.operation_type,
                    &descriptor.field_name,
                    &args,
                    outgoing,
                    // one request serves many parents
                    None,
                    context,
                )
                .await;
                match result {
                    Ok(result) => {
                        let values = match &values_from_results {
                            Some(values_from_results) => values_from_results(&result, &unique),
                            None => positional(&result, unique.len()),
                        };
                        slots
                            .into_iter()
                            .map(|slot| Ok(values.get(slot).cloned().unwrap_or(Value::Null)))
                            .collect()
                    }
                    Err(error) => vec![Err(error); slots.len()],
                }
            })
            .await
    }
}

/// Where one call goes.
struct Target<'a> {
    descriptor: &'a CallableDescriptor,
    outgoing: &'a Outgoing,
    context: &'a ResolverContext,
}

/// An array result is split by position; any other result goes to every key.
fn positional(result: &Value, keys: usize) -> Vec<Value> {
    match result {
        Value::Array(items) => items.clone(),
        other => vec![other.clone(); keys],
    }
}

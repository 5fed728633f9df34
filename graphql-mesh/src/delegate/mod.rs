//! Delegation of one root field of a source view.
//!
//! The outgoing document is written against the transformed view, then every wrap
//! transform of the source translates it back (last transform first) before it reaches
//! the source executor. Results travel the other way.

mod selection;

use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::executable::FieldSet;
use apollo_compiler::executable::OperationType;
use apollo_compiler::executable::SelectionSet;
use indexmap::IndexSet;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::validation::Valid;
use futures::StreamExt;
use tracing::Instrument;

use crate::context::ResolverContext;
use crate::engine::ResolveInfo;
use crate::engine::ValueStream;
use crate::error::DELEGATION_FAILED;
use crate::error::FieldError;
use crate::graphql;
use crate::graphql::Response;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::merger::SubSchema;
use crate::source::SourceRequest;
use crate::transforms::Transform;
pub(crate) use selection::Requirements;
use selection::SelectionBuilder;
pub(crate) use selection::is_composite;
use selection::parse_field_set;
use selection::strip_braces;

/// Builds a selection set from the caller's current selection, if there is one.
pub type SelectionSetFactory =
    Arc<dyn Fn(Option<&[ast::Selection]>) -> SelectionSetInput + Send + Sync>;

/// A selection set replacing the caller's own when delegating.
#[derive(Clone)]
pub enum SelectionSetInput {
    /// GraphQL text, with or without the outer braces.
    Source(String),
    /// A selection set on the return type of the target field.
    Parsed(SelectionSet),
    Factory(SelectionSetFactory),
}

impl From<&str> for SelectionSetInput {
    fn from(source: &str) -> Self {
        SelectionSetInput::Source(source.to_string())
    }
}

impl From<String> for SelectionSetInput {
    fn from(source: String) -> Self {
        SelectionSetInput::Source(source)
    }
}

impl From<SelectionSet> for SelectionSetInput {
    fn from(selection_set: SelectionSet) -> Self {
        SelectionSetInput::Parsed(selection_set)
    }
}

impl fmt::Debug for SelectionSetInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionSetInput::Source(source) => f.debug_tuple("Source").field(source).finish(),
            SelectionSetInput::Parsed(selection_set) => {
                f.debug_tuple("Parsed").field(&selection_set.ty).finish()
            }
            SelectionSetInput::Factory(_) => f.write_str("Factory"),
        }
    }
}

impl SelectionSetInput {
    /// Normalizes to selections on `type_name` of `view`, checked against the view.
    pub(crate) fn normalize(
        &self,
        view: &Valid<Schema>,
        type_name: &Name,
        current: Option<&[ast::Selection]>,
    ) -> Result<Vec<ast::Selection>, FieldError> {
        let source = match self {
            SelectionSetInput::Source(source) => source.clone(),
            SelectionSetInput::Parsed(selection_set) => selection_set.to_string(),
            SelectionSetInput::Factory(factory) => {
                return match factory(current) {
                    SelectionSetInput::Factory(_) => Err(FieldError::with_code(
                        "a selection set factory must not return another factory",
                        DELEGATION_FAILED,
                    )),
                    produced => produced.normalize(view, type_name, current),
                };
            }
        };
        let invalid = |reason: String| {
            FieldError::with_code(
                format!("invalid selection set on {type_name}: {reason}"),
                DELEGATION_FAILED,
            )
        };
        FieldSet::parse_and_validate(view, type_name.clone(), strip_braces(&source), "selection_set.graphql")
            .map_err(|with_errors| invalid(with_errors.errors.to_string()))?;
        parse_field_set(&source).map_err(invalid)
    }
}

/// Where the selection of a delegated field comes from.
pub(crate) enum SelectionSource<'a> {
    /// The sub-selection of the field being resolved.
    Caller(&'a ResolveInfo<'a>),
    /// The field being resolved itself, selected on the delegated field's return type.
    CallerField(&'a ResolveInfo<'a>),
    Override(Vec<ast::Selection>),
    /// Only `__typename` and the requirements of the return type.
    Empty,
}

/// The selection and caller variables of a delegated field, before arguments are added.
#[derive(Debug, Clone, Default)]
pub(crate) struct Outgoing {
    selections: Vec<ast::Selection>,
    variable_definitions: Vec<Node<ast::VariableDefinition>>,
    variables: Object,
}

impl Outgoing {
    /// Identifies the selection, for grouping calls that can share one request.
    pub(crate) fn fingerprint(&self) -> String {
        let mut fingerprint = operation_document(
            OperationType::Query,
            self.variable_definitions.clone(),
            self.selections.clone(),
        )
        .to_string();
        fingerprint.push_str(&serde_json::to_string(&self.variables).unwrap_or_default());
        fingerprint
    }
}

pub(crate) fn root_field<'s>(
    sub_schema: &'s SubSchema,
    operation_type: OperationType,
    field_name: &Name,
) -> Result<&'s FieldDefinition, FieldError> {
    let root = sub_schema.root_type(operation_type).ok_or_else(|| {
        FieldError::with_code(
            format!(
                "source '{}' does not support {operation_type} operations",
                sub_schema.name()
            ),
            DELEGATION_FAILED,
        )
    })?;
    sub_schema
        .schema
        .type_field(root, field_name)
        .map(|definition| &*definition.node)
        .map_err(|_| {
            FieldError::with_code(
                format!("source '{}' has no field {root}.{field_name}", sub_schema.name()),
                DELEGATION_FAILED,
            )
        })
}

/// Computes the selection sent for `field_name`.
pub(crate) fn plan(
    sub_schema: &SubSchema,
    operation_type: OperationType,
    field_name: &Name,
    source: SelectionSource<'_>,
    requirements: &Requirements,
) -> Result<Outgoing, FieldError> {
    let view = &sub_schema.schema;
    let definition = root_field(sub_schema, operation_type, field_name)?;
    let return_type = definition.ty.inner_named_type();
    if !is_composite(view, return_type) {
        return Ok(Outgoing::default());
    }

    let empty = Object::new();
    let (caller, field) = match &source {
        SelectionSource::Caller(info) | SelectionSource::CallerField(info) => (Some(*info), Some(info.field())),
        SelectionSource::Override(_) | SelectionSource::Empty => (None, None),
    };
    let variables = caller.map(|info| info.variables()).unwrap_or(&empty);
    let mut builder = SelectionBuilder::new(view, variables, requirements);
    let selections = match (&source, &field) {
        (SelectionSource::Caller(_), Some(field)) => builder.build(return_type, &[field.selection_set.as_slice()]),
        (SelectionSource::CallerField(_), Some(field)) => builder.build_fields(return_type, &[field]),
        (SelectionSource::Override(selections), _) => builder.build(return_type, &[selections.as_slice()]),
        _ => builder.build(return_type, &[]),
    };

    let mut outgoing = Outgoing {
        selections,
        ..Default::default()
    };
    if let Some(operation) = caller.and_then(|info| info.operation()) {
        for definition in &operation.variables {
            if !builder.used_variables().contains(&definition.name) {
                continue;
            }
            outgoing.variable_definitions.push(definition.clone());
            if let Some(value) = variables.get(definition.name.as_str()) {
                outgoing
                    .variables
                    .insert(definition.name.as_str(), value.clone());
            }
        }
    }
    Ok(outgoing)
}

/// Renders the request for `field_name`, arguments passed as `$_arg_<name>` variables.
///
/// Arguments the view does not declare are ignored. A forwarded caller variable keeps
/// its name, the argument variable gets more leading underscores instead.
pub(crate) fn build_request(
    sub_schema: &SubSchema,
    operation_type: OperationType,
    field_name: &Name,
    args: &Object,
    outgoing: &Outgoing,
) -> Result<graphql::Request, FieldError> {
    let definition = root_field(sub_schema, operation_type, field_name)?;
    let mut variable_definitions = outgoing.variable_definitions.clone();
    let mut variables = outgoing.variables.clone();
    let mut taken: IndexSet<Name> = variable_definitions
        .iter()
        .map(|definition| definition.name.clone())
        .collect();
    let mut arguments = Vec::new();
    for (arg_name, value) in args.iter() {
        let Some(argument) = definition.argument_by_name(arg_name.as_str()) else {
            continue;
        };
        let mut variable_name = format!("_arg_{}", argument.name);
        while taken.contains(variable_name.as_str()) {
            variable_name.insert(0, '_');
        }
        let variable = Name::new(&variable_name)
            .map_err(|error| FieldError::with_code(error.to_string(), DELEGATION_FAILED))?;
        taken.insert(variable.clone());
        variable_definitions.push(Node::new(ast::VariableDefinition {
            name: variable.clone(),
            ty: argument.ty.clone(),
            default_value: None,
            directives: Default::default(),
        }));
        arguments.push(Node::new(ast::Argument {
            name: argument.name.clone(),
            value: Node::new(ast::Value::Variable(variable.clone())),
        }));
        variables.insert(variable.as_str(), value.clone());
    }

    let field = ast::Field {
        alias: None,
        name: field_name.clone(),
        arguments,
        directives: Default::default(),
        selection_set: outgoing.selections.clone(),
    };
    let mut document = operation_document(
        operation_type,
        variable_definitions,
        vec![ast::Selection::Field(Node::new(field))],
    );
    for transform in sub_schema.transforms().iter().rev() {
        document = transform.transform_request(document);
    }
    Ok(graphql::Request::builder()
        .query(document.to_string())
        .variables(variables)
        .build())
}

fn operation_document(
    operation_type: OperationType,
    variables: Vec<Node<ast::VariableDefinition>>,
    selection_set: Vec<ast::Selection>,
) -> ast::Document {
    let mut document = ast::Document::new();
    document
        .definitions
        .push(ast::Definition::OperationDefinition(Node::new(
            ast::OperationDefinition {
                operation_type,
                name: None,
                variables,
                directives: Default::default(),
                selection_set,
            },
        )));
    document
}

/// Sends the field to its source and returns the field's value.
pub(crate) async fn delegate(
    sub_schema: &SubSchema,
    operation_type: OperationType,
    field_name: &Name,
    args: &Object,
    outgoing: &Outgoing,
    root: Option<&Value>,
    context: &ResolverContext,
) -> Result<Value, FieldError> {
    let request = SourceRequest {
        request: build_request(sub_schema, operation_type, field_name, args, outgoing)?,
        context: context.pick(&sub_schema.source.context_variables),
        root: root.cloned(),
    };
    let span = tracing::info_span!(
        "mesh.delegate",
        source = %sub_schema.name(),
        operation = %operation_type,
        field = %field_name
    );
    async {
        tracing::debug!(query = ?request.request.query, "delegating");
        let response = sub_schema
            .executor()
            .execute(request)
            .await
            .map_err(FieldError::from_box_error)?;
        extract(sub_schema.transforms(), response, field_name)
    }
    .instrument(span)
    .await
}

/// Subscribes to a subscription root field of the source.
pub(crate) async fn delegate_subscription(
    sub_schema: &Arc<SubSchema>,
    field_name: &Name,
    args: &Object,
    outgoing: &Outgoing,
    root: Option<&Value>,
    context: &ResolverContext,
) -> Result<ValueStream, FieldError> {
    let request = SourceRequest {
        request: build_request(
            sub_schema,
            OperationType::Subscription,
            field_name,
            args,
            outgoing,
        )?,
        context: context.pick(&sub_schema.source.context_variables),
        root: root.cloned(),
    };
    tracing::debug!(source = %sub_schema.name(), field = %field_name, "delegating subscription");
    let responses = sub_schema
        .executor()
        .subscribe(request)
        .await
        .map_err(FieldError::from_box_error)?;
    let sub_schema = sub_schema.clone();
    let field_name = field_name.clone();
    Ok(responses
        .map(move |response| extract(sub_schema.transforms(), response, &field_name))
        .boxed())
}

/// Takes the field out of a source response.
///
/// A null field with errors fails; errors next to data are only logged.
fn extract(
    transforms: &[Arc<dyn Transform>],
    response: Response,
    field_name: &Name,
) -> Result<Value, FieldError> {
    let response = transforms
        .iter()
        .fold(response, |response, transform| transform.transform_result(response));
    let value = response
        .data
        .as_ref()
        .and_then(|data| data.get(field_name.as_str()))
        .cloned()
        .unwrap_or(Value::Null);
    if response.errors.is_empty() {
        return Ok(value);
    }
    if value.is_null() {
        return Err(FieldError::from_graphql_errors(&response.errors));
    }
    tracing::debug!(
        field = %field_name,
        errors = response.errors.len(),
        "source returned partial data"
    );
    Ok(value)
}

#[cfg(test)]
mod tests {
    use apollo_compiler::name;
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;
    use crate::configuration::PrefixConfig;
    use crate::test_support::RecordingExecutor;
    use crate::transforms::PrefixTransform;

    const SDL: &str = r#"
        type Query { book(id: ID!): Book books: [Book!]! count: Int }
        type Book { id: ID! title: String! related(id: ID): Book }
    "#;

    fn sub_schema(transforms: Vec<Arc<dyn Transform>>, executor: Arc<RecordingExecutor>) -> SubSchema {
        crate::test_support::sub_schema("books", SDL, transforms, executor)
    }

    #[test]
    fn string_and_parsed_selection_sets_are_equivalent() {
        let sub_schema = sub_schema(Vec::new(), Arc::default());
        let requirements = Requirements::default();
        let book = name!("Book");

        let from_text = SelectionSetInput::from("{ title }")
            .normalize(&sub_schema.schema, &book, None)
            .unwrap();
        let parsed = FieldSet::parse_and_validate(&sub_schema.schema, book.clone(), "title", "test.graphql")
            .unwrap()
            .into_inner()
            .selection_set;
        let parsed = SelectionSetInput::from(parsed)
            .normalize(&sub_schema.schema, &book, None)
            .unwrap();
        let from_factory = SelectionSetInput::Factory(Arc::new(|_| "title".into()))
            .normalize(&sub_schema.schema, &book, None)
            .unwrap();

        let requests: Vec<_> = [from_text, parsed, from_factory]
            .into_iter()
            .map(|selection_set| {
                let outgoing = plan(
                    &sub_schema,
                    OperationType::Query,
                    &name!("book"),
                    SelectionSource::Override(selection_set),
                    &requirements,
                )
                .unwrap();
                let mut args = Object::new();
                args.insert("id", json!("1"));
                build_request(&sub_schema, OperationType::Query, &name!("book"), &args, &outgoing)
                    .unwrap()
            })
            .collect();
        assert_eq!(requests[0], requests[1]);
        assert_eq!(requests[1], requests[2]);

        let query = requests[0].query.as_deref().unwrap();
        assert!(query.contains("$_arg_id: ID!"));
        assert!(query.contains("book(id: $_arg_id)"));
        assert_eq!(requests[0].variables.get("_arg_id"), Some(&json!("1")));
    }

    #[test]
    fn argument_variables_do_not_shadow_forwarded_variables() {
        let sub_schema = sub_schema(Vec::new(), Arc::default());
        let mut forwarded = Object::new();
        forwarded.insert("_arg_id", json!("caller"));
        let outgoing = Outgoing {
            selections: vec![ast::Selection::Field(Node::new(ast::Field {
                alias: None,
                name: name!("related"),
                arguments: vec![Node::new(ast::Argument {
                    name: name!("id"),
                    value: Node::new(ast::Value::Variable(name!("_arg_id"))),
                })],
                directives: Default::default(),
                selection_set: vec![ast::Selection::Field(Node::new(ast::Field {
                    alias: None,
                    name: name!("title"),
                    arguments: Vec::new(),
                    directives: Default::default(),
                    selection_set: Vec::new(),
                }))],
            }))],
            variable_definitions: vec![Node::new(ast::VariableDefinition {
                name: name!("_arg_id"),
                ty: Node::new(ast::Type::Named(name!("ID"))),
                default_value: None,
                directives: Default::default(),
            })],
            variables: forwarded,
        };
        let mut args = Object::new();
        args.insert("id", json!("argument"));

        let request = build_request(&sub_schema, OperationType::Query, &name!("books"), &args, &outgoing).unwrap();
        assert_eq!(request.variables.get("_arg_id"), Some(&json!("caller")));

        let request = build_request(&sub_schema, OperationType::Query, &name!("book"), &args, &outgoing).unwrap();
        assert_eq!(request.variables.get("_arg_id"), Some(&json!("caller")));
        assert_eq!(request.variables.get("__arg_id"), Some(&json!("argument")));
        let query = request.query.as_deref().unwrap();
        assert!(query.contains("book(id: $__arg_id)"));
        assert!(query.contains("related(id: $_arg_id)"));
    }

    #[test]
    fn invalid_selection_sets_are_field_errors() {
        let sub_schema = sub_schema(Vec::new(), Arc::default());
        let error = SelectionSetInput::from("{ pages }")
            .normalize(&sub_schema.schema, &name!("Book"), None)
            .unwrap_err();
        assert!(error.message.starts_with("invalid selection set on Book"));
    }

    #[tokio::test]
    async fn delegation_goes_through_wrap_transforms() {
        let recorder = Arc::new(RecordingExecutor::default());
        recorder.respond_with(
            Response::builder()
                .data(json!({"Books_books": [{"__typename": "Book", "title": "Dune"}]}))
                .build(),
        );
        let prefix = PrefixTransform::new(PrefixConfig {
            value: "Books_".into(),
            include_root_operations: true,
            include_types: true,
            ignore: Vec::new(),
        })
        .unwrap();
        let sub_schema = sub_schema(vec![Arc::new(prefix)], recorder.clone());
        assert!(sub_schema.schema.get_object("Books_Book").is_some());

        let outgoing = plan(
            &sub_schema,
            OperationType::Query,
            &name!("Books_books"),
            SelectionSource::Override(
                SelectionSetInput::from("title")
                    .normalize(&sub_schema.schema, &name!("Books_Book"), None)
                    .unwrap(),
            ),
            &Requirements::default(),
        )
        .unwrap();
        let mut values = Object::new();
        values.insert("token", json!("abc"));
        values.insert("secret", json!("hidden"));
        let value = delegate(
            &sub_schema,
            OperationType::Query,
            &name!("Books_books"),
            &Object::new(),
            &outgoing,
            Some(&json!({"shelf": 4})),
            &ResolverContext::new(values),
        )
        .await
        .unwrap();
        assert_eq!(value, json!([{"__typename": "Books_Book", "title": "Dune"}]));

        let requests = recorder.requests();
        assert!(recorder.queries()[0].contains("Books_books: books"));
        assert_eq!(Value::Object(requests[0].context.clone()), json!({"token": "abc"}));
        assert_eq!(requests[0].root, Some(json!({"shelf": 4})));
    }

    #[tokio::test]
    async fn null_fields_with_errors_fail() {
        let recorder = Arc::new(RecordingExecutor::default());
        recorder.respond_with(
            Response::builder()
                .data(json!({"count": null}))
                .error(graphql::Error::builder().message("boom").build())
                .build(),
        );
        let sub_schema = sub_schema(Vec::new(), recorder);
        let error = delegate(
            &sub_schema,
            OperationType::Query,
            &name!("count"),
            &Object::new(),
            &Outgoing::default(),
            None,
            &ResolverContext::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(error.message, "boom");
    }

    #[test]
    fn unknown_root_fields_are_named() {
        let sub_schema = sub_schema(Vec::new(), Arc::default());
        let error = plan(
            &sub_schema,
            OperationType::Query,
            &name!("authors"),
            SelectionSource::Empty,
            &Requirements::default(),
        )
        .unwrap_err();
        assert_eq!(error.message, "source 'books' has no field Query.authors");

        let error = plan(
            &sub_schema,
            OperationType::Mutation,
            &name!("addBook"),
            SelectionSource::Empty,
            &Requirements::default(),
        )
        .unwrap_err();
        assert_eq!(error.message, "source 'books' does not support mutation operations");
    }

    #[tokio::test]
    async fn subscriptions_extract_the_field_from_every_event() {
        let recorder = Arc::new(RecordingExecutor::default());
        recorder.respond_with(Response::builder().data(json!({"bookAdded": 3})).build());
        let sub_schema = Arc::new(crate::test_support::sub_schema(
            "feed",
            "type Query { ok: Boolean } type Subscription { bookAdded(shelf: Int): Int }",
            Vec::new(),
            recorder.clone(),
        ));
        let mut args = Object::new();
        args.insert("shelf", json!(2));
        let events: Vec<_> = delegate_subscription(
            &sub_schema,
            &name!("bookAdded"),
            &args,
            &Outgoing::default(),
            None,
            &ResolverContext::default(),
        )
        .await
        .unwrap()
        .collect()
        .await;
        assert_eq!(events, vec![Ok(json!(3))]);
        assert!(recorder.queries()[0].starts_with("subscription"));
        assert_eq!(recorder.requests()[0].request.variables.get("_arg_shelf"), Some(&json!(2)));
    }
}

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use async_trait::async_trait;
use futures::future::join_all;
use tower::BoxError;

use super::SourceExecutor;
use super::SourceRequest;
use crate::batching::MicroBatcher;
use crate::error::FieldError;
use crate::graphql;
use crate::graphql::Response;
use crate::graphql::ResponseStream;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;

/// Merges the queries sent to a source during one executor pass into a single request.
///
/// Root fields and variables of the `n`th query are prefixed with `_n_` and the merged
/// result is split back by prefix.
pub struct BatchingExecutor {
    source: String,
    inner: Arc<dyn SourceExecutor>,
    batcher: MicroBatcher<SourceRequest, Response>,
}

impl BatchingExecutor {
    pub fn new(source: String, inner: Arc<dyn SourceExecutor>) -> Self {
        Self {
            source,
            inner,
            batcher: MicroBatcher::default(),
        }
    }
}

#[async_trait]
impl SourceExecutor for BatchingExecutor {
    async fn execute(&self, request: SourceRequest) -> Result<Response, BoxError> {
        let Some(key) = batch_key(&request) else {
            return self.inner.execute(request).await;
        };
        let inner = self.inner.clone();
        let source = self.source.as_str();
        self.batcher
            .submit(key, request, move |requests| dispatch(source, inner, requests))
            .await
            .map_err(BoxError::from)
    }

    async fn subscribe(&self, request: SourceRequest) -> Result<ResponseStream, BoxError> {
        self.inner.subscribe(request).await
    }
}

/// Only single-operation queries whose root selections are plain fields can be merged.
/// Requests only share a batch when they carry the same context and root value.
fn batch_key(request: &SourceRequest) -> Option<String> {
    let query = request.request.query.as_deref()?;
    let document = ast::Document::parse(query, "request.graphql").ok()?;
    let operation = select_operation(&document, request.request.operation_name.as_deref())?;
    let mergeable = operation.operation_type == ast::OperationType::Query
        && document
            .definitions
            .iter()
            .all(|definition| matches!(definition, ast::Definition::OperationDefinition(_)))
        && operation
            .selection_set
            .iter()
            .all(|selection| matches!(selection, ast::Selection::Field(_)));
    if !mergeable {
        return None;
    }
    serde_json::to_string(&(&request.context, &request.root)).ok()
}

fn select_operation<'a>(
    document: &'a ast::Document,
    operation_name: Option<&str>,
) -> Option<&'a Node<ast::OperationDefinition>> {
    let mut operations = document.definitions.iter().filter_map(|definition| match definition {
        ast::Definition::OperationDefinition(operation) => Some(operation),
        _ => None,
    });
    match operation_name {
        Some(name) => {
            operations.find(|operation| operation.name.as_ref().is_some_and(|n| n == name))
        }
        None => match (operations.next(), operations.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        },
    }
}

async fn dispatch(
    source: &str,
    inner: Arc<dyn SourceExecutor>,
    requests: Vec<SourceRequest>,
) -> Vec<Result<Response, FieldError>> {
    let count = requests.len();
    if count > 1 {
        if let Some(merged) = merge_requests(&requests) {
            tracing::debug!(source, count, "sending merged request");
            return match inner.execute(merged).await {
                Ok(response) => split_response(response, count).into_iter().map(Ok).collect(),
                Err(error) => {
                    let error = FieldError::from_box_error(error);
                    vec![Err(error); count]
                }
            };
        }
    }
    join_all(requests.into_iter().map(|request| {
        let inner = inner.clone();
        async move {
            inner
                .execute(request)
                .await
                .map_err(FieldError::from_box_error)
        }
    }))
    .await
}

fn prefixed(prefix: &str, name: &str) -> Option<Name> {
    Name::new(&format!("{prefix}{name}")).ok()
}

fn merge_requests(requests: &[SourceRequest]) -> Option<SourceRequest> {
    let mut variable_definitions = Vec::new();
    let mut selection_set = Vec::new();
    let mut variables = Object::new();
    for (index, request) in requests.iter().enumerate() {
        let query = request.request.query.as_deref()?;
        let document = ast::Document::parse(query, "request.graphql").ok()?;
        let operation = select_operation(&document, request.request.operation_name.as_deref())?;
        let prefix = format!("_{index}_");

        for definition in &operation.variables {
            let mut definition = definition.clone();
            let renamed = prefixed(&prefix, &definition.name)?;
            if let Some(value) = request.request.variables.get(definition.name.as_str()) {
                variables.insert(renamed.as_str(), value.clone());
            }
            definition.make_mut().name = renamed;
            variable_definitions.push(definition);
        }
        for selection in &operation.selection_set {
            let ast::Selection::Field(field) = selection else {
                return None;
            };
            let mut field = field.clone();
            let field_mut = field.make_mut();
            let response_key = field_mut.alias.as_ref().unwrap_or(&field_mut.name);
            field_mut.alias = Some(prefixed(&prefix, response_key)?);
            prefix_field_variables(field_mut, &prefix);
            selection_set.push(ast::Selection::Field(field));
        }
    }

    let operation = ast::OperationDefinition {
        operation_type: ast::OperationType::Query,
        name: None,
        variables: variable_definitions,
        directives: Default::default(),
        selection_set,
    };
    let mut document = ast::Document::new();
    document
        .definitions
        .push(ast::Definition::OperationDefinition(Node::new(operation)));
    Some(SourceRequest {
        request: graphql::Request::builder()
            .query(document.to_string())
            .variables(variables)
            .build(),
        context: requests.first().map(|r| r.context.clone()).unwrap_or_default(),
        root: requests.first().and_then(|r| r.root.clone()),
    })
}

fn prefix_field_variables(field: &mut ast::Field, prefix: &str) {
    for argument in &mut field.arguments {
        prefix_value_variables(argument.make_mut().value.make_mut(), prefix);
    }
    for directive in field.directives.iter_mut() {
        for argument in &mut directive.make_mut().arguments {
            prefix_value_variables(argument.make_mut().value.make_mut(), prefix);
        }
    }
    prefix_selection_variables(&mut field.selection_set, prefix);
}

fn prefix_selection_variables(selections: &mut [ast::Selection], prefix: &str) {
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => prefix_field_variables(field.make_mut(), prefix),
            ast::Selection::InlineFragment(inline) => {
                prefix_selection_variables(&mut inline.make_mut().selection_set, prefix)
            }
            ast::Selection::FragmentSpread(_) => {}
        }
    }
}

fn prefix_value_variables(value: &mut ast::Value, prefix: &str) {
    match value {
        ast::Value::Variable(name) => {
            if let Some(renamed) = prefixed(prefix, name) {
                *name = renamed;
            }
        }
        ast::Value::List(items) => items
            .iter_mut()
            .for_each(|item| prefix_value_variables(item.make_mut(), prefix)),
        ast::Value::Object(fields) => fields
            .iter_mut()
            .for_each(|(_, item)| prefix_value_variables(item.make_mut(), prefix)),
        _ => {}
    }
}

/// `_3_books` -> `(3, "books")`
fn parse_prefixed(key: &str) -> Option<(usize, &str)> {
    let (index, original) = key.strip_prefix('_')?.split_once('_')?;
    Some((index.parse().ok()?, original))
}

fn split_response(response: Response, count: usize) -> Vec<Response> {
    let mut data = vec![Object::new(); count];
    let has_data = matches!(response.data, Some(Value::Object(_)));
    if let Some(Value::Object(object)) = response.data {
        for (key, value) in object {
            if let Some((index, original)) = parse_prefixed(key.as_str()) {
                if let Some(slot) = data.get_mut(index) {
                    slot.insert(original, value);
                }
            }
        }
    }

    let mut errors = vec![Vec::new(); count];
    for error in response.errors {
        let target = error
            .path
            .as_ref()
            .and_then(Path::first_key)
            .and_then(parse_prefixed)
            .map(|(index, original)| (index, original.to_string()));
        match target {
            Some((index, original)) if index < count => {
                let mut error = error;
                if let Some(path) = error.path.as_mut() {
                    path.0[0] = PathElement::Key(original);
                }
                errors[index].push(error);
            }
            _ => errors.iter_mut().for_each(|list| list.push(error.clone())),
        }
    }

    data.into_iter()
        .zip(errors)
        .map(|(data, errors)| {
            Response::builder()
                .and_data(has_data.then_some(Value::Object(data)))
                .errors(errors)
                .extensions(response.extensions.clone())
                .build()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    /// Answers merged requests by echoing each aliased root field's `id` variable.
    #[derive(Default)]
    struct Recording {
        calls: AtomicUsize,
        queries: Mutex<Vec<graphql::Request>>,
    }

    #[async_trait]
    impl SourceExecutor for Recording {
        async fn execute(&self, request: SourceRequest) -> Result<Response, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queries.lock().push(request.request.clone());
            let mut data = Object::new();
            for (name, value) in request.request.variables.iter() {
                let key = name.as_str().replace("id", "book");
                data.insert(key, json!({"id": value.clone()}));
            }
            Ok(Response::builder()
                .data(Value::Object(data))
                .error(
                    graphql::Error::builder()
                        .message("partial")
                        .path(Path::empty().join_key("_1_book"))
                        .build(),
                )
                .build())
        }
    }

    fn request(id: &str) -> SourceRequest {
        let mut variables = Object::new();
        variables.insert("id", json!(id));
        SourceRequest {
            request: graphql::Request::builder()
                .query("query($id: ID!) { book(id: $id) { id } }")
                .variables(variables)
                .build(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn merges_concurrent_queries_into_one_request() {
        let recording = Arc::new(Recording::default());
        let executor = BatchingExecutor::new("books".into(), recording.clone());

        let responses = join_all(["1", "2"].map(|id| executor.execute(request(id)))).await;

        assert_eq!(recording.calls.load(Ordering::SeqCst), 1);
        let sent = recording.queries.lock()[0].clone();
        assert_eq!(
            sent.query.as_deref(),
            Some(
                ast::Document::parse(
                    "query($_0_id: ID!, $_1_id: ID!) { _0_book: book(id: $_0_id) { id } _1_book: book(id: $_1_id) { id } }",
                    "expected.graphql"
                )
                .unwrap()
                .to_string()
                .as_str()
            )
        );

        let first = responses[0].as_ref().unwrap();
        let second = responses[1].as_ref().unwrap();
        assert_eq!(first.data, Some(json!({"book": {"id": "1"}})));
        assert!(first.errors.is_empty());
        assert_eq!(second.data, Some(json!({"book": {"id": "2"}})));
        assert_eq!(second.errors[0].path.as_ref().unwrap().to_string(), "/book");
    }

    #[tokio::test]
    async fn mutations_are_not_merged() {
        let recording = Arc::new(Recording::default());
        let executor = BatchingExecutor::new("books".into(), recording.clone());
        let mutation = SourceRequest {
            request: graphql::Request::builder()
                .query("mutation { reset }")
                .build(),
            ..Default::default()
        };
        assert_eq!(batch_key(&mutation), None);
        let _ = join_all([executor.execute(mutation.clone()), executor.execute(mutation)]).await;
        assert_eq!(recording.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn prefixed_keys() {
        assert_eq!(parse_prefixed("_12_books"), Some((12, "books")));
        assert_eq!(parse_prefixed("_x_books"), None);
        assert_eq!(parse_prefixed("books"), None);
    }
}

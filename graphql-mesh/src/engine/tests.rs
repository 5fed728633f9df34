use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use apollo_compiler::name;
use async_trait::async_trait;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json_bytes::json;

use super::*;
use crate::error::FieldError;

const SCHEMA: &str = r#"
    type Query {
      book(id: ID!): Book
      books: [Book!]!
      failing: String
      requiredFailing: Book!
      search: [SearchResult!]!
      node: Node
    }
    type Mutation {
      first: Int!
      second: Int!
    }
    type Subscription {
      ticks(limit: Int!): Int!
    }
    interface Node { id: ID! }
    union SearchResult = Book | Author
    type Book implements Node { id: ID! title: String! author: Author }
    type Author implements Node { id: ID! name: String! }
"#;

fn schema() -> Arc<Valid<Schema>> {
    Arc::new(Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap())
}

fn request(schema: &Valid<Schema>, query: &str) -> ExecutionRequest {
    let document = CompiledOperation::compile(schema, query).unwrap();
    ExecutionRequest::new(Arc::new(document), ResolverContext::default())
}

fn executor(schema: &Arc<Valid<Schema>>, resolvers: Resolvers) -> Executor {
    Executor::new(schema.clone(), resolvers).unwrap()
}

struct BookById;

#[async_trait]
impl FieldResolver for BookById {
    async fn resolve(&self, params: ResolverParams<'_>) -> Result<Value, FieldError> {
        let id = params.args.get("id").and_then(Value::as_str).unwrap_or_default();
        Ok(json!({"id": id, "title": format!("Book {id}"), "author": {"id": "a1", "name": "Ann"}}))
    }
}

struct Failing;

#[async_trait]
impl FieldResolver for Failing {
    async fn resolve(&self, _params: ResolverParams<'_>) -> Result<Value, FieldError> {
        Err(FieldError::with_code("nope", "FORBIDDEN"))
    }
}

struct Fixed(Value);

#[async_trait]
impl FieldResolver for Fixed {
    async fn resolve(&self, _params: ResolverParams<'_>) -> Result<Value, FieldError> {
        Ok(self.0.clone())
    }
}

struct Counter(Arc<AtomicUsize>);

#[async_trait]
impl FieldResolver for Counter {
    async fn resolve(&self, _params: ResolverParams<'_>) -> Result<Value, FieldError> {
        // yield so that a concurrent execution would interleave
        tokio::task::yield_now().await;
        Ok(Value::from(self.0.fetch_add(1, Ordering::SeqCst) as u64))
    }
}

struct Ticks;

#[async_trait]
impl FieldResolver for Ticks {
    async fn resolve(&self, _params: ResolverParams<'_>) -> Result<Value, FieldError> {
        Ok(Value::Null)
    }

    async fn subscribe(&self, params: ResolverParams<'_>) -> Result<ValueStream, FieldError> {
        let limit = params
            .args
            .get("limit")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        Ok(futures::stream::iter((0..limit).map(|tick| Ok(Value::from(tick)))).boxed())
    }
}

#[tokio::test]
async fn resolves_nested_fields_with_default_resolvers() {
    let schema = schema();
    let resolvers = Resolvers::new().with(name!("Query"), name!("book"), BookById);
    let executor = executor(&schema, resolvers);

    let response = executor
        .execute(&request(
            &schema,
            r#"{ book(id: "7") { __typename id heading: title author { name } } }"#,
        ))
        .await;

    assert_eq!(
        response.data,
        Some(json!({
            "book": {
                "__typename": "Book",
                "id": "7",
                "heading": "Book 7",
                "author": {"name": "Ann"}
            }
        }))
    );
    assert!(response.errors.is_empty());
}

#[tokio::test]
async fn field_errors_null_the_nearest_nullable_parent() {
    let schema = schema();
    let resolvers = Resolvers::new()
        .with(name!("Query"), name!("failing"), Failing)
        .with(name!("Query"), name!("requiredFailing"), Failing);
    let executor = executor(&schema, resolvers);

    let response = executor.execute(&request(&schema, "{ failing }")).await;
    assert_eq!(response.data, Some(json!({"failing": null})));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "nope");
    assert_eq!(response.errors[0].path.as_ref().unwrap().to_string(), "/failing");
    assert_eq!(response.errors[0].extension_code().as_deref(), Some("FORBIDDEN"));

    let response = executor
        .execute(&request(&schema, "{ failing requiredFailing { id } }"))
        .await;
    assert_eq!(response.data, Some(Value::Null));
    assert!(
        response
            .errors
            .iter()
            .any(|error| error.path.as_ref().map(ToString::to_string).as_deref() == Some("/requiredFailing"))
    );
}

#[tokio::test]
async fn null_in_non_null_list_item_nulls_the_list_owner() {
    let schema = schema();
    let resolvers = Resolvers::new().with(
        name!("Query"),
        name!("books"),
        Fixed(json!([{"id": "1", "title": "One"}, {"id": "2", "title": null}])),
    );
    let executor = executor(&schema, resolvers);

    let response = executor
        .execute(&request(&schema, "{ books { id title } }"))
        .await;
    // books is [Book!]! so the null bubbles to the root
    assert_eq!(response.data, Some(Value::Null));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        response.errors[0].path.as_ref().unwrap().to_string(),
        "/books/1/title"
    );
}

#[tokio::test]
async fn abstract_types_use_typename_and_fragments() {
    let schema = schema();
    let resolvers = Resolvers::new().with(
        name!("Query"),
        name!("search"),
        Fixed(json!([
            {"__typename": "Book", "id": "1", "title": "One"},
            {"__typename": "Author", "id": "a1", "name": "Ann"}
        ])),
    );
    let executor = executor(&schema, resolvers);

    let response = executor
        .execute(&request(
            &schema,
            r#"
            query {
              search {
                __typename
                ... on Book { title }
                ...AuthorFields
              }
            }
            fragment AuthorFields on Author { name }
            "#,
        ))
        .await;
    assert_eq!(
        response.data,
        Some(json!({
            "search": [
                {"__typename": "Book", "title": "One"},
                {"__typename": "Author", "name": "Ann"}
            ]
        }))
    );
}

#[tokio::test]
async fn mutation_fields_run_serially() {
    let schema = schema();
    let counter = Arc::new(AtomicUsize::new(0));
    let resolvers = Resolvers::new()
        .with(name!("Mutation"), name!("first"), Counter(counter.clone()))
        .with(name!("Mutation"), name!("second"), Counter(counter.clone()));
    let executor = executor(&schema, resolvers);

    let response = executor
        .execute(&request(&schema, "mutation { first second again: first }"))
        .await;
    assert_eq!(
        response.data,
        Some(json!({"first": 0, "second": 1, "again": 2}))
    );
}

#[tokio::test]
async fn operation_is_selected_by_name() {
    let schema = schema();
    let resolvers = Resolvers::new().with(name!("Query"), name!("book"), BookById);
    let executor = executor(&schema, resolvers);
    let query = r#"
        query First { book(id: "1") { id } }
        query Second { book(id: "2") { title } }
    "#;

    let mut named = request(&schema, query);
    named.operation_name = Some("Second".into());
    let response = executor.execute(&named).await;
    assert_eq!(response.data, Some(json!({"book": {"title": "Book 2"}})));

    let response = executor.execute(&request(&schema, query)).await;
    assert_eq!(response.data, None);
    assert_eq!(response.errors.len(), 1);
}

#[tokio::test]
async fn variables_are_coerced() {
    let schema = schema();
    let resolvers = Resolvers::new().with(name!("Query"), name!("book"), BookById);
    let executor = executor(&schema, resolvers);

    let mut with_variables = request(&schema, "query($id: ID!) { book(id: $id) { id } }");
    with_variables.variables.insert("id", json!("9"));
    let response = executor.execute(&with_variables).await;
    assert_eq!(response.data, Some(json!({"book": {"id": "9"}})));

    let missing = request(&schema, "query($id: ID!) { book(id: $id) { id } }");
    let response = executor.execute(&missing).await;
    assert_eq!(response.data, None);
    assert_eq!(
        response.errors[0].extension_code().as_deref(),
        Some("BAD_USER_INPUT")
    );
}

#[tokio::test]
async fn subscriptions_complete_every_event() {
    let schema = schema();
    let resolvers = Resolvers::new().with(name!("Subscription"), name!("ticks"), Ticks);
    let executor = executor(&schema, resolvers);

    let stream = executor.subscribe(&request(&schema, "subscription { ticks(limit: 3) }"));
    let responses: Vec<_> = stream.map(|response| response.data).collect().await;
    assert_eq!(
        responses,
        vec![
            Some(json!({"ticks": 0})),
            Some(json!({"ticks": 1})),
            Some(json!({"ticks": 2})),
        ]
    );
}

#[tokio::test]
async fn compiled_documents_are_reused() {
    let schema = schema();
    let cache = CompiledQueryCache::new(
        schema.clone(),
        std::num::NonZeroUsize::new(10).unwrap(),
    );
    let first = cache.get_or_compile("{ books { id } }").await.unwrap();
    let second = cache.get_or_compile("{ books { id } }").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len().await, 1);

    let errors = cache.get_or_compile("{ books { nope } }").await.unwrap_err();
    assert_eq!(
        errors[0].extension_code().as_deref(),
        Some("GRAPHQL_VALIDATION_FAILED")
    );
    let errors = cache.get_or_compile("{ books { ").await.unwrap_err();
    assert_eq!(
        errors[0].extension_code().as_deref(),
        Some("GRAPHQL_PARSE_FAILED")
    );
    assert_eq!(cache.len().await, 1);
}

struct Recording(Arc<parking_lot::Mutex<Vec<String>>>);

#[async_trait]
impl FieldResolver for Recording {
    async fn resolve(&self, params: ResolverParams<'_>) -> Result<Value, FieldError> {
        let info = params.info;
        self.0.lock().push(format!(
            "{} {} {} {}",
            info.path,
            info.response_key(),
            info.operation_name().unwrap_or_default(),
            info.field().selection_set.len()
        ));
        let field = info.field().to_string();
        self.0.lock().push(field);
        Ok(json!({"id": "1", "title": "One"}))
    }
}

#[tokio::test]
async fn resolve_info_describes_the_field_as_written() {
    let schema = schema();
    let recorded = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let resolvers = Resolvers::new().with(name!("Query"), name!("book"), Recording(recorded.clone()));
    let executor = executor(&schema, resolvers);

    let response = executor
        .execute(&request(
            &schema,
            r#"query Named { first: book(id: "1") { id ...Parts } } fragment Parts on Book { title }"#,
        ))
        .await;
    assert_eq!(response.data, Some(json!({"first": {"id": "1", "title": "One"}})));

    let recorded = recorded.lock().clone();
    assert_eq!(recorded[0], "/first first Named 2");
    assert!(recorded[1].starts_with("first: book(id: \"1\")"));
    assert!(recorded[1].contains("... on Book"));
    assert!(!recorded[1].contains("Parts"));
}

#[tokio::test]
async fn introspection_is_answered_by_the_engine() {
    let schema = schema();
    let executor = executor(&schema, Resolvers::new());

    let response = executor
        .execute(&request(&schema, r#"{ __type(name: "Author") { name fields { name } } }"#))
        .await;
    assert_eq!(
        response.data,
        Some(json!({"__type": {"name": "Author", "fields": [{"name": "id"}, {"name": "name"}]}}))
    );
}

#[tokio::test]
async fn live_directive_is_not_sent_to_the_engine() {
    let schema = Arc::new(
        Schema::parse_and_validate(
            format!("directive @live on QUERY\n{SCHEMA}"),
            "schema.graphql",
        )
        .unwrap(),
    );
    let resolvers = Resolvers::new().with(name!("Query"), name!("book"), BookById);
    let executor = executor(&schema, resolvers);

    let live = request(&schema, r#"query @live { book(id: "3") { id } }"#);
    assert!(live.operation().unwrap().directives.has("live"));
    let response = executor.execute(&live).await;
    assert_eq!(response.data, Some(json!({"book": {"id": "3"}})));
}

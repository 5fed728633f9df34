//! In-process sources shared by the integration tests.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use apollo_compiler::name;
use async_trait::async_trait;
use graphql_mesh::configuration::AdditionalResolverConfig;
use graphql_mesh::engine::FieldResolver;
use graphql_mesh::engine::ResolverParams;
use graphql_mesh::engine::Resolvers;
use graphql_mesh::error::FieldError;
use graphql_mesh::handlers::LocalHandler;
use graphql_mesh::json_ext::Value;
use graphql_mesh::source::HandlerContext;
use graphql_mesh::source::MeshHandler;
use graphql_mesh::source::MeshSource;
use graphql_mesh::source::SourceConfig;
use parking_lot::Mutex;
use serde_json_bytes::json;
use tower::BoxError;

pub const BOOKS_SDL: &str = r#"
    type Query {
        books: [Book!]!
        book(id: ID!): Book
    }
    type Mutation {
        updateBook(id: ID!, title: String!): Book
    }
    type Book {
        id: ID!
        title: String!
        authorId: ID!
    }
"#;

pub const AUTHORS_SDL: &str = r#"
    type Query {
        author(id: ID!): Author
        authors(ids: [ID!]!): [Author]!
    }
    type Author {
        id: ID!
        name: String!
    }
"#;

pub const REVIEWS_SDL: &str = r#"
    type Query {
        booksByIds(ids: [ID!]!): [Book]!
    }
    type Book {
        id: ID!
        rating: Int
    }
"#;

/// A resolver from a closure.
pub struct FnResolver<F>(pub F);

#[async_trait]
impl<F> FieldResolver for FnResolver<F>
where
    F: Fn(ResolverParams<'_>) -> Result<Value, FieldError> + Send + Sync,
{
    async fn resolve(&self, params: ResolverParams<'_>) -> Result<Value, FieldError> {
        (self.0)(params)
    }
}

fn arg(params: &ResolverParams<'_>, name: &str) -> String {
    params
        .args
        .get(name)
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string()
}

fn id_list(params: &ResolverParams<'_>) -> Vec<String> {
    params
        .args
        .get("ids")
        .and_then(|ids| ids.as_array())
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Counts calls per source field.
#[derive(Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    fn record(&self, field: &str) {
        self.0.lock().push(field.to_string());
    }

    pub fn count(&self, field: &str) -> usize {
        self.0.lock().iter().filter(|call| *call == field).count()
    }
}

/// A books source with mutable titles.
pub fn books(calls: &Calls) -> LocalHandler {
    let store = Arc::new(Mutex::new(vec![
        json!({"id": "1", "title": "Dune", "authorId": "a1"}),
        json!({"id": "2", "title": "Emma", "authorId": "a2"}),
        json!({"id": "3", "title": "Hyperion", "authorId": "a1"}),
    ]));
    let all = store.clone();
    let one = store.clone();
    let updated = store;
    let (books_calls, book_calls) = (calls.clone(), calls.clone());
    let resolvers = Resolvers::new()
        .with(
            name!("Query"),
            name!("books"),
            FnResolver(move |_params: ResolverParams<'_>| {
                books_calls.record("books");
                Ok(Value::Array(all.lock().clone()))
            }),
        )
        .with(
            name!("Query"),
            name!("book"),
            FnResolver(move |params: ResolverParams<'_>| {
                book_calls.record("book");
                let id = arg(&params, "id");
                Ok(one
                    .lock()
                    .iter()
                    .find(|book| book.get("id").and_then(|id| id.as_str()) == Some(id.as_str()))
                    .cloned()
                    .unwrap_or(Value::Null))
            }),
        )
        .with(
            name!("Mutation"),
            name!("updateBook"),
            FnResolver(move |params: ResolverParams<'_>| {
                let id = arg(&params, "id");
                let title = arg(&params, "title");
                let mut books = updated.lock();
                let Some(book) = books
                    .iter_mut()
                    .find(|book| book.get("id").and_then(|id| id.as_str()) == Some(id.as_str()))
                else {
                    return Err(FieldError::new(format!("no book {id}")));
                };
                if let Value::Object(fields) = &mut *book {
                    fields.insert("title", Value::from(title));
                }
                Ok(book.clone())
            }),
        );
    LocalHandler::new(BOOKS_SDL, resolvers)
}

/// An authors source counting its calls.
pub fn authors(calls: &Calls) -> LocalHandler {
    let name_of = |id: &str| match id {
        "a1" => Some("Frank Herbert"),
        "a2" => Some("Jane Austen"),
        _ => None,
    };
    let (author_calls, authors_calls) = (calls.clone(), calls.clone());
    let resolvers = Resolvers::new()
        .with(
            name!("Query"),
            name!("author"),
            FnResolver(move |params: ResolverParams<'_>| {
                author_calls.record("author");
                let id = arg(&params, "id");
                Ok(name_of(&id)
                    .map(|name| json!({"id": id, "name": name}))
                    .unwrap_or(Value::Null))
            }),
        )
        .with(
            name!("Query"),
            name!("authors"),
            FnResolver(move |params: ResolverParams<'_>| {
                authors_calls.record("authors");
                Ok(Value::Array(
                    id_list(&params)
                        .into_iter()
                        .map(|id| {
                            name_of(&id)
                                .map(|name| json!({"id": id, "name": name}))
                                .unwrap_or(Value::Null)
                        })
                        .collect(),
                ))
            }),
        );
    LocalHandler::new(AUTHORS_SDL, resolvers)
}

/// A reviews source contributing `Book.rating`.
pub fn reviews(calls: &Calls) -> LocalHandler {
    let calls = calls.clone();
    let resolvers = Resolvers::new().with(
        name!("Query"),
        name!("booksByIds"),
        FnResolver(move |params: ResolverParams<'_>| {
            calls.record("booksByIds");
            Ok(Value::Array(
                id_list(&params)
                    .into_iter()
                    .map(|id| {
                        let rating = id.parse::<i64>().map(|n| n + 2).unwrap_or(0);
                        json!({"id": id, "rating": rating})
                    })
                    .collect(),
            ))
        }),
    );
    LocalHandler::new(REVIEWS_SDL, resolvers)
}

pub fn source(name: &str, handler: LocalHandler) -> SourceConfig {
    SourceConfig::new(name, Arc::new(handler))
}

/// `Book.author`, resolved through `authors` with every key of one pass in a single call.
pub fn batched_author_resolver() -> AdditionalResolverConfig {
    AdditionalResolverConfig {
        target_type_name: "Book".into(),
        target_field_name: "author".into(),
        source_name: "authors".into(),
        source_type_name: "Query".into(),
        source_field_name: "authors".into(),
        source_args: Default::default(),
        required_selection_set: None,
        result: None,
        key_field: Some("authorId".into()),
        keys_arg: Some("ids".into()),
    }
}

/// `Book.author`, resolved through `author` once per book.
pub fn author_resolver() -> AdditionalResolverConfig {
    AdditionalResolverConfig {
        source_field_name: "author".into(),
        source_args: [("id".to_string(), "{root.authorId}".to_string())]
            .into_iter()
            .collect(),
        required_selection_set: Some("{ authorId }".into()),
        key_field: None,
        keys_arg: None,
        ..batched_author_resolver()
    }
}

pub const AUTHOR_TYPE_DEFS: &str = "extend type Book { author: Author }";

/// A handler that always fails, counting its invocations.
#[derive(Clone, Default)]
pub struct BrokenHandler(pub Arc<AtomicUsize>);

#[async_trait]
impl MeshHandler for BrokenHandler {
    async fn get_mesh_source(&self, _context: HandlerContext) -> Result<MeshSource, BoxError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err("connection refused".into())
    }
}

/// Wraps a handler, counting its invocations.
pub struct CountingHandler<H> {
    pub inner: H,
    pub invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl<H: MeshHandler> MeshHandler for CountingHandler<H> {
    async fn get_mesh_source(&self, context: HandlerContext) -> Result<MeshSource, BoxError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.inner.get_mesh_source(context).await
    }
}

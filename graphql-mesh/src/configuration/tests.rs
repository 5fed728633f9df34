use pretty_assertions::assert_eq;

use super::*;

const FULL: &str = r#"
sources:
  - name: books
    handler:
      graphql:
        endpoint: http://localhost:4001/graphql
        schema_url: http://localhost:4001/schema.graphql
        cache_schema: true
        timeout: 5s
        headers:
          authorization: "Bearer {context.token}"
        context_variables: [token]
    transforms:
      - prefix:
          value: Books_
          include_root_operations: true
      - filter:
          remove: [Query.internalStats]
    batch: false
    merge:
      Author:
        field_name: authorsByIds
  - name: authors
    handler:
      mock:
        schema: "type Query { authors: [Author!]! } type Author { id: ID! name: String! }"
        query:
          authors:
            - { id: "1", name: Ann }
additional_type_defs: "extend type Book { writer: Author }"
additional_resolvers:
  - target_type_name: Book
    target_field_name: writer
    source_name: authors
    source_field_name: authorsByIds
    required_selection_set: "{ authorId }"
    key_field: authorId
    keys_arg: ids
live_query:
  invalidations:
    - field: Mutation.addBook
      invalidate: ["Query.books"]
query_cache:
  capacity: 10
"#;

#[test]
fn deserializes_a_full_configuration() {
    let configuration: Configuration = FULL.parse().unwrap();
    assert_eq!(configuration.sources.len(), 2);

    let books = &configuration.sources[0];
    let HandlerConfig::Graphql(graphql) = &books.handler else {
        panic!("expected a graphql handler");
    };
    assert_eq!(graphql.timeout, Some(Duration::from_secs(5)));
    assert!(graphql.cache_schema);
    assert_eq!(graphql.context_variables, vec!["token".to_string()]);
    assert_eq!(books.batch, Some(false));
    assert_eq!(
        books.merge.get("Author"),
        Some(&MergedTypeConfig {
            field_name: "authorsByIds".into(),
            key_field: "id".into(),
            key_arg: "ids".into(),
        })
    );
    assert!(matches!(
        &books.transforms[0],
        TransformConfig::Prefix(PrefixConfig {
            include_root_operations: true,
            include_types: true,
            ..
        })
    ));

    let HandlerConfig::Mock(mock) = &configuration.sources[1].handler else {
        panic!("expected a mock handler");
    };
    assert_eq!(mock.query["authors"][0]["name"], "Ann");

    assert!(configuration.additional_resolvers[0].is_batched());
    assert_eq!(
        configuration.additional_resolvers[0].source_type_name,
        "Query"
    );
    assert_eq!(configuration.query_cache.capacity.get(), 10);
    assert_eq!(configuration.cache.capacity, DEFAULT_CACHE_CAPACITY);
}

#[test]
fn unknown_fields_are_rejected() {
    let error = "sources: []\nunknown: true\n"
        .parse::<Configuration>()
        .unwrap_err();
    assert!(matches!(error, ConfigurationError::DeserializeConfigError(_)));
}

#[test]
fn graphql_handler_needs_a_schema() {
    let error = r#"
sources:
  - name: books
    handler:
      graphql:
        endpoint: http://localhost:4001/graphql
"#
    .parse::<Configuration>()
    .unwrap_err();
    assert_eq!(
        error.to_string(),
        "graphql handler needs a schema: source 'books' sets neither `schema` nor `schema_url`"
    );
}

#[test]
fn half_configured_batch_resolver_is_rejected() {
    let error = r#"
additional_resolvers:
  - target_type_name: Book
    target_field_name: writer
    source_name: authors
    source_field_name: authorsByIds
    key_field: authorId
"#
    .parse::<Configuration>()
    .unwrap_err();
    assert!(matches!(
        error,
        ConfigurationError::InvalidConfiguration { .. }
    ));
}

#[test]
fn schema_generation() {
    let schema = serde_json::to_value(generate_config_schema()).unwrap();
    let properties = schema["properties"].as_object().unwrap();
    for section in [
        "sources",
        "additional_type_defs",
        "additional_resolvers",
        "live_query",
        "cache",
        "query_cache",
    ] {
        assert!(properties.contains_key(section), "missing {section}");
    }
}

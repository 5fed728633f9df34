use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::validation::Valid;
use parking_lot::RwLock;

use super::Transform;
use super::rename::Renames;
use super::revalidate;
use crate::configuration::PrefixConfig;
use crate::error::TransformError;
use crate::graphql::Response;

const NAME: &str = "prefix";

/// Prefixes type names and, optionally, root field names.
///
/// Root types and built-in types keep their names. Requests are translated back to the
/// original names and `__typename` values in results are prefixed.
#[derive(Debug)]
pub struct PrefixTransform {
    config: PrefixConfig,
    renames: RwLock<Option<Arc<(Renames, Renames)>>>,
}

impl PrefixTransform {
    pub fn new(config: PrefixConfig) -> Result<Self, TransformError> {
        if config.value.is_empty() {
            return Err(TransformError::InvalidOption {
                transform: NAME,
                reason: "the prefix value must not be empty".into(),
            });
        }
        Ok(Self {
            config,
            renames: RwLock::new(None),
        })
    }

    fn is_ignored(&self, coordinate: &str) -> bool {
        self.config.ignore.iter().any(|ignored| ignored == coordinate)
    }

    fn prefixed(&self, name: &str) -> Result<Name, TransformError> {
        Name::new(&format!("{}{name}", self.config.value)).map_err(|error| {
            TransformError::InvalidOption {
                transform: NAME,
                reason: error.to_string(),
            }
        })
    }

    fn compute_renames(&self, schema: &Schema) -> Result<Renames, TransformError> {
        let definition = &schema.schema_definition;
        let roots: Vec<(ast::OperationType, Name)> = [
            (ast::OperationType::Query, &definition.query),
            (ast::OperationType::Mutation, &definition.mutation),
            (ast::OperationType::Subscription, &definition.subscription),
        ]
        .into_iter()
        .filter_map(|(operation, root)| root.as_ref().map(|root| (operation, root.name.clone())))
        .collect();
        let is_root = |name: &Name| roots.iter().any(|(_, root)| root == name);

        let mut renames = Renames {
            roots: roots.clone(),
            ..Default::default()
        };
        if self.config.include_types {
            for (name, ty) in &schema.types {
                if ty.is_built_in() || is_root(name) || self.is_ignored(name) {
                    continue;
                }
                renames.types.insert(name.clone(), self.prefixed(name)?);
            }
        }
        if self.config.include_root_operations {
            for (_, root) in &roots {
                let Some(object) = schema.get_object(root) else {
                    continue;
                };
                let mut fields = HashMap::new();
                for field_name in object.fields.keys() {
                    if self.is_ignored(&format!("{root}.{field_name}")) {
                        continue;
                    }
                    fields.insert(field_name.clone(), self.prefixed(field_name)?);
                }
                renames.root_fields.insert(root.clone(), fields);
            }
        }
        Ok(renames)
    }

    fn renames(&self) -> Option<Arc<(Renames, Renames)>> {
        self.renames.read().clone()
    }
}

impl Transform for PrefixTransform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn transform_schema(&self, schema: Valid<Schema>) -> Result<Valid<Schema>, TransformError> {
        let renames = self.compute_renames(&schema)?;
        let mut document = ast::Document::parse(schema.to_string(), "prefix.graphql")
            .map_err(|with_errors| TransformError::InvalidSchema {
                transform: NAME,
                reason: with_errors.errors.to_string(),
            })?;
        renames.apply_to_schema(&mut document);
        let transformed = revalidate(NAME, document.to_string())?;
        let reversed = renames.reversed();
        *self.renames.write() = Some(Arc::new((renames, reversed)));
        Ok(transformed)
    }

    fn transform_request(&self, mut document: ast::Document) -> ast::Document {
        if let Some(renames) = self.renames() {
            renames.1.apply_to_operation(&mut document);
        }
        document
    }

    fn transform_result(&self, mut response: Response) -> Response {
        if let (Some(renames), Some(data)) = (self.renames(), response.data.as_mut()) {
            renames.0.apply_to_data(data);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    const SDL: &str = r#"
        type Query {
          book(id: ID!): Book
          books(filter: BookFilter): [Book!]!
        }
        input BookFilter { genre: Genre }
        enum Genre { FICTION HISTORY }
        type Book { id: ID! title: String! genre: Genre }
    "#;

    fn config(include_root_operations: bool) -> PrefixConfig {
        PrefixConfig {
            value: "Lib_".into(),
            include_root_operations,
            include_types: true,
            ignore: vec!["Query.book".into()],
        }
    }

    #[test]
    fn renames_types_but_not_roots_or_builtins() {
        let transform = PrefixTransform::new(config(false)).unwrap();
        let schema = Schema::parse_and_validate(SDL, "lib.graphql").unwrap();
        let transformed = transform.transform_schema(schema).unwrap();

        assert!(transformed.get_object("Lib_Book").is_some());
        assert!(transformed.types.contains_key("Lib_BookFilter"));
        assert!(transformed.types.contains_key("Lib_Genre"));
        assert!(transformed.get_object("Book").is_none());
        assert!(transformed.get_object("Query").is_some());
        assert!(transformed.types.contains_key("String"));
        assert_eq!(
            transformed
                .type_field("Query", "books")
                .unwrap()
                .ty
                .to_string(),
            "[Lib_Book!]!"
        );
    }

    #[test]
    fn round_trips_requests_and_results() {
        let transform = PrefixTransform::new(config(true)).unwrap();
        let schema = Schema::parse_and_validate(SDL, "lib.graphql").unwrap();
        let transformed = transform.transform_schema(schema).unwrap();
        // ignored root fields keep their name
        assert!(transformed.type_field("Query", "book").is_ok());
        assert!(transformed.type_field("Query", "Lib_books").is_ok());

        let request = ast::Document::parse(
            "query($filter: Lib_BookFilter) { Lib_books(filter: $filter) { id ... on Lib_Book { title } } }",
            "request.graphql",
        )
        .unwrap();
        let translated = transform.transform_request(request);
        let expected = ast::Document::parse(
            "query($filter: BookFilter) { Lib_books: books(filter: $filter) { id ... on Book { title } } }",
            "expected.graphql",
        )
        .unwrap();
        assert_eq!(translated.to_string(), expected.to_string());

        let response = Response::builder()
            .data(json!({"Lib_books": [{"__typename": "Book", "id": "1"}]}))
            .build();
        let response = transform.transform_result(response);
        assert_eq!(
            response.data,
            Some(json!({"Lib_books": [{"__typename": "Lib_Book", "id": "1"}]}))
        );
    }

    #[test]
    fn rejects_empty_prefix() {
        let mut options = config(false);
        options.value.clear();
        assert!(PrefixTransform::new(options).is_err());
    }
}

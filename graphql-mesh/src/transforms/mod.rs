//! Source schema transforms.
//!
//! A transform either wraps a source (its schema changes are translated back when
//! requests are delegated to it) or is applied once to the raw schema ("no-wrap").

mod filter;
mod prefix;
mod rename;

use std::fmt;

use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::validation::Valid;
pub use filter::FilterTransform;
pub use prefix::PrefixTransform;

use crate::error::TransformError;
use crate::graphql::Response;

/// A schema transform attached to one source.
pub trait Transform: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// No-wrap transforms rewrite the raw schema and never see requests.
    fn no_wrap(&self) -> bool {
        false
    }

    fn transform_schema(&self, schema: Valid<Schema>) -> Result<Valid<Schema>, TransformError>;

    /// Translates a request written against the transformed schema back to the source.
    fn transform_request(&self, document: ast::Document) -> ast::Document {
        document
    }

    /// Translates a source result into the shape of the transformed schema.
    fn transform_result(&self, response: Response) -> Response {
        response
    }
}

pub(crate) fn revalidate(
    transform: &'static str,
    sdl: String,
) -> Result<Valid<Schema>, TransformError> {
    Schema::parse_and_validate(sdl, format!("{transform}.graphql")).map_err(|with_errors| {
        TransformError::InvalidSchema {
            transform,
            reason: with_errors.errors.to_string(),
        }
    })
}

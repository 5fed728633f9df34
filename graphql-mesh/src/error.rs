//! Mesh errors.
use std::fmt;

use displaydoc::Display;
use thiserror::Error;
use tower::BoxError;

use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;

pub(crate) const GRAPHQL_PARSE_FAILED: &str = "GRAPHQL_PARSE_FAILED";
pub(crate) const GRAPHQL_VALIDATION_FAILED: &str = "GRAPHQL_VALIDATION_FAILED";
pub(crate) const BAD_USER_INPUT: &str = "BAD_USER_INPUT";
pub(crate) const DELEGATION_FAILED: &str = "DELEGATION_FAILED";
pub(crate) const SOURCE_REQUEST_FAILED: &str = "SOURCE_REQUEST_FAILED";

/// Errors raised while constructing a mesh.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum MeshError {
    /// failed to build sources: {0}
    SourceConstruction(SourceFailures),

    /// source name '{name}' is used more than once
    DuplicateSource {
        /// The duplicated name.
        name: String,
    },

    /// schema merge failed: {reason}
    Merge {
        /// The merge or validation failure.
        reason: String,
    },

    /// invalid configuration: {reason}
    Configuration {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// the schema cannot be executed: {reason}
    Executor {
        /// Why the execution engine rejected the schema.
        reason: String,
    },
}

impl MeshError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        MeshError::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn merge(reason: impl Into<String>) -> Self {
        MeshError::Merge {
            reason: reason.into(),
        }
    }
}

/// A source whose handler failed while the mesh was being built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

/// Every source that failed during one construction attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFailures(pub Vec<SourceFailure>);

impl SourceFailures {
    /// Names of the failing sources, in configuration order.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|failure| failure.source.as_str())
    }
}

impl fmt::Display for SourceFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, failure) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, "; ")?;
            }
            write!(f, "source '{}': {}", failure.source, failure.reason)?;
        }
        Ok(())
    }
}

/// Errors raised by schema transforms.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransformError {
    /// the '{transform}' transform produced an invalid schema: {reason}
    InvalidSchema {
        /// Name of the transform.
        transform: &'static str,
        /// Validation failure.
        reason: String,
    },

    /// invalid '{transform}' transform option: {reason}
    InvalidOption {
        /// Name of the transform.
        transform: &'static str,
        /// What is wrong with the option.
        reason: String,
    },
}

/// An error returned by a field resolver.
///
/// It becomes a [`graphql::Error`] located at the field's path in the response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FieldError {
    /// The error message.
    pub message: String,
    /// Extensions copied to the GraphQL error.
    pub extensions: Object,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extensions: Object::new(),
        }
    }

    pub fn with_code(message: impl Into<String>, code: &str) -> Self {
        let mut error = Self::new(message);
        error.extensions.insert("code", Value::from(code));
        error
    }

    /// Folds the errors returned by a source into one resolver error.
    pub fn from_graphql_errors(errors: &[graphql::Error]) -> Self {
        match errors {
            [] => Self::with_code("source returned no data", DELEGATION_FAILED),
            [single] => Self {
                message: single.message.clone(),
                extensions: single.extensions.clone(),
            },
            [first, ..] => Self {
                message: errors
                    .iter()
                    .map(|error| error.message.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
                extensions: first.extensions.clone(),
            },
        }
    }

    /// Wraps a transport or executor error, keeping field errors as they are.
    pub fn from_box_error(error: BoxError) -> Self {
        match error.downcast::<FieldError>() {
            Ok(field_error) => *field_error,
            Err(other) => Self::with_code(other.to_string(), SOURCE_REQUEST_FAILED),
        }
    }

    pub(crate) fn to_graphql_error(&self, path: Path) -> graphql::Error {
        graphql::Error::builder()
            .message(self.message.clone())
            .path(path)
            .extensions(self.extensions.clone())
            .build()
    }
}

impl From<graphql::Error> for FieldError {
    fn from(error: graphql::Error) -> Self {
        Self {
            message: error.message,
            extensions: error.extensions,
        }
    }
}

/// Errors returned by the SDK requester.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum SdkError {
    /// The operation returned GraphQL errors.
    #[error("{}", join_messages(.errors))]
    Aggregate {
        /// The errors exactly as the mesh returned them.
        errors: Vec<graphql::Error>,
        /// The operation text.
        query: String,
        /// The variables the operation ran with.
        variables: Object,
        /// Partial data, if any was returned.
        data: Option<Value>,
    },

    /// The result carried neither data nor errors.
    #[error("operation returned neither data nor errors")]
    MalformedResult,
}

fn join_messages(errors: &[graphql::Error]) -> String {
    errors
        .iter()
        .map(|error| error.message.as_str())
        .collect::<Vec<_>>()
        .join(",\n")
}

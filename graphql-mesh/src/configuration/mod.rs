//! Mesh configuration.
//!
//! The object model can be deserialized from YAML or JSON and turned into
//! [`MeshOptions`](crate::MeshOptions) with
//! [`MeshOptions::from_configuration`](crate::MeshOptions::from_configuration).

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use displaydoc::Display;
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::engine::DEFAULT_QUERY_CACHE_CAPACITY;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not deserialize configuration: {0}
    DeserializeConfigError(serde_yaml::Error),
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
}

/// The configuration of a mesh.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// The sources merged into the unified schema.
    #[serde(default)]
    pub sources: Vec<SourceConfiguration>,

    /// Extra type definitions added to the unified schema, usually extending source types
    /// with fields served by additional resolvers.
    #[serde(default)]
    pub additional_type_defs: Option<String>,

    /// Declarative resolvers for fields added through `additional_type_defs`.
    #[serde(default)]
    pub additional_resolvers: Vec<AdditionalResolverConfig>,

    /// Live query invalidation rules.
    #[serde(default)]
    pub live_query: LiveQueryConfig,

    /// The key-value cache shared with handlers.
    #[serde(default)]
    pub cache: Cache,

    /// The cache of parsed and validated operations.
    #[serde(default)]
    pub query_cache: QueryCache,
}

impl Configuration {
    /// Checks what deserialization cannot express.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for source in &self.sources {
            if let HandlerConfig::Graphql(graphql) = &source.handler {
                if graphql.schema.is_none() && graphql.schema_url.is_none() {
                    return Err(ConfigurationError::InvalidConfiguration {
                        message: "graphql handler needs a schema",
                        error: format!(
                            "source '{}' sets neither `schema` nor `schema_url`",
                            source.name
                        ),
                    });
                }
            }
        }
        for resolver in &self.additional_resolvers {
            if resolver.key_field.is_some() != resolver.keys_arg.is_some() {
                return Err(ConfigurationError::InvalidConfiguration {
                    message: "batched resolvers need both `key_field` and `keys_arg`",
                    error: format!(
                        "resolver for {}.{}",
                        resolver.target_type_name, resolver.target_field_name
                    ),
                });
            }
        }
        for rule in &self.live_query.invalidations {
            if rule.field.split_once('.').is_none() {
                return Err(ConfigurationError::InvalidConfiguration {
                    message: "invalidation fields are written `Type.field`",
                    error: rule.field.clone(),
                });
            }
        }
        Ok(())
    }
}

impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let configuration: Configuration =
            serde_yaml::from_str(s).map_err(ConfigurationError::DeserializeConfigError)?;
        configuration.validate()?;
        Ok(configuration)
    }
}

/// Generate a JSON schema for the configuration.
pub fn generate_config_schema() -> RootSchema {
    schemars::schema_for!(Configuration)
}

/// One source of the mesh.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SourceConfiguration {
    /// Unique name of the source. Resolvers reach its SDK under this name.
    pub name: String,

    /// How the source schema is obtained and queried.
    pub handler: HandlerConfig,

    /// Transforms applied to the source schema, in order.
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,

    /// Merge the requests sent to this source during one executor pass.
    /// Defaults to the handler's preference, then to `true`.
    #[serde(default)]
    pub batch: Option<bool>,

    /// Type merging: for each type name, how to fetch entities of that type by key.
    #[serde(default)]
    pub merge: BTreeMap<String, MergedTypeConfig>,
}

/// Source handlers.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum HandlerConfig {
    /// A GraphQL API reached over HTTP.
    Graphql(GraphQLHandlerConfig),
    /// Static data served from the configuration.
    Mock(MockHandlerConfig),
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GraphQLHandlerConfig {
    /// The URL requests are POSTed to.
    pub endpoint: String,

    /// The source schema, as SDL.
    #[serde(default)]
    pub schema: Option<String>,

    /// A URL serving the source schema as SDL, fetched when `schema` is not set.
    #[serde(default)]
    pub schema_url: Option<String>,

    /// Keep the fetched SDL in the mesh cache.
    #[serde(default)]
    pub cache_schema: bool,

    /// Request timeout.
    #[serde(default, with = "humantime_serde")]
    #[schemars(with = "Option<String>", default)]
    pub timeout: Option<Duration>,

    /// Headers sent with every request. Values may use `{context.name}` placeholders.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Names of the caller context values forwarded to this source.
    #[serde(default)]
    pub context_variables: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MockHandlerConfig {
    /// The source schema, as SDL.
    pub schema: String,

    /// Root value of query operations.
    #[serde(default)]
    pub query: serde_json::Map<String, serde_json::Value>,

    /// Root value of mutation operations.
    #[serde(default)]
    pub mutation: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Schema transforms.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum TransformConfig {
    Prefix(PrefixConfig),
    Filter(FilterConfig),
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PrefixConfig {
    /// Prepended to renamed names.
    pub value: String,

    /// Also prefix the fields of the root operation types.
    #[serde(default)]
    pub include_root_operations: bool,

    /// Prefix type names. Root types and built-in types are never renamed.
    #[serde(default = "default_true")]
    pub include_types: bool,

    /// Type names and `Type.field` coordinates left untouched.
    #[serde(default)]
    pub ignore: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// `Type.field` coordinates removed from the source schema.
    pub remove: Vec<String>,
}

/// How a source fetches entities of a merged type.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MergedTypeConfig {
    /// Query field returning a list of entities for a list of keys, in key order.
    pub field_name: String,

    /// The entity field holding its key.
    #[serde(default = "default_key_field")]
    pub key_field: String,

    /// The argument of `field_name` receiving the keys.
    #[serde(default = "default_keys_arg")]
    pub key_arg: String,
}

/// A resolver for a field of the unified schema, delegating to a source.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AdditionalResolverConfig {
    pub target_type_name: String,
    pub target_field_name: String,

    /// The source called by the resolver.
    pub source_name: String,

    /// The root type of the source field.
    #[serde(default = "default_source_type_name")]
    pub source_type_name: String,
    pub source_field_name: String,

    /// Arguments of the source field. Values are templates evaluated against
    /// `{root, args, context}`; a lone placeholder keeps the referenced value's type.
    #[serde(default)]
    pub source_args: BTreeMap<String, String>,

    /// Fields of the target type the resolver reads from its parent, added to every
    /// request that fetches the target type.
    #[serde(default)]
    pub required_selection_set: Option<String>,

    /// Dotted path extracted from the source result.
    #[serde(default)]
    pub result: Option<String>,

    /// Batched mode: the parent field whose values are collected as keys.
    #[serde(default)]
    pub key_field: Option<String>,

    /// Batched mode: the source argument receiving the collected keys.
    #[serde(default)]
    pub keys_arg: Option<String>,
}

impl AdditionalResolverConfig {
    pub(crate) fn is_batched(&self) -> bool {
        self.key_field.is_some() && self.keys_arg.is_some()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LiveQueryConfig {
    #[serde(default)]
    pub invalidations: Vec<InvalidationRule>,
}

/// Invalidates live query identifiers whenever a field resolves successfully.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InvalidationRule {
    /// `Type.field`, usually a mutation field.
    pub field: String,

    /// Identifier templates evaluated against `{args, result, root, context, info}`.
    pub invalidate: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Cache {
    /// Maximum number of entries.
    #[serde(default = "default_cache_capacity")]
    pub capacity: NonZeroUsize,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct QueryCache {
    /// Maximum number of compiled operations.
    #[serde(default = "default_query_cache_capacity")]
    pub capacity: NonZeroUsize,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self {
            capacity: default_query_cache_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_key_field() -> String {
    "id".into()
}

fn default_keys_arg() -> String {
    "ids".into()
}

fn default_source_type_name() -> String {
    "Query".into()
}

fn default_cache_capacity() -> NonZeroUsize {
    DEFAULT_CACHE_CAPACITY
}

fn default_query_cache_capacity() -> NonZeroUsize {
    DEFAULT_QUERY_CACHE_CAPACITY
}

#[cfg(test)]
mod tests;

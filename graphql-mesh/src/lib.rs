//! Unifies several GraphQL sources into one schema and resolves its fields by delegating
//! back to the sources.

#![warn(unreachable_pub)]

mod batching;
pub mod cache;
pub mod configuration;
pub mod context;
mod delegate;
pub mod engine;
pub mod error;
pub mod graphql;
pub mod handlers;
mod hooks;
pub mod json_ext;
pub mod live_query;
pub mod merger;
mod mesh;
pub mod pubsub;
mod resolvers;
pub mod sdk;
mod sdk_requester;
pub mod source;
mod template;
pub mod transforms;

#[cfg(test)]
mod test_support;

pub use configuration::Configuration;
pub use context::MeshContext;
pub use context::ResolverContext;
pub use delegate::SelectionSetFactory;
pub use delegate::SelectionSetInput;
pub use live_query::ExecutionResult;
pub use mesh::Mesh;
pub use mesh::MeshOptions;
pub use mesh::MeshRequest;
pub use mesh::Operation;
pub use mesh::get_mesh;
pub use sdk_requester::OperationExecutor;
pub use sdk_requester::SdkRequester;

//! Source handlers shipped with the mesh.

mod graphql;
mod local;

pub use graphql::GraphQLHandler;
pub use local::LocalHandler;
pub use local::MockHandler;

//! Mesh-wide and per-request resolver context.

use std::sync::Arc;

use crate::cache::KeyValueCache;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::live_query::LiveQueryStore;
use crate::pubsub::PubSub;
use crate::sdk::InContextSdk;
use crate::sdk::SourceApi;

/// Key under which [`ResolverContext::get`] returns the [`MeshContext`] itself.
pub const MESH_CONTEXT_KEY: &str = "mesh";

/// Built once per mesh and shared by every request.
pub struct MeshContext {
    pub pubsub: Arc<PubSub>,
    pub cache: Arc<dyn KeyValueCache>,
    pub live_query_store: Arc<LiveQueryStore>,
    pub sdk: InContextSdk,
}

/// What a context lookup found.
#[derive(Clone, Copy)]
pub enum ContextEntry<'a> {
    Mesh(&'a MeshContext),
    SourceApi(&'a SourceApi),
    Value(&'a Value),
}

/// The context resolvers receive: the mesh context plus the values supplied by the caller.
#[derive(Clone, Default)]
pub struct ResolverContext {
    mesh: Option<Arc<MeshContext>>,
    values: Object,
}

impl ResolverContext {
    /// A context outside of a mesh, as used by locally executed sources.
    pub fn new(values: Object) -> Self {
        Self { mesh: None, values }
    }

    pub fn for_mesh(mesh: Arc<MeshContext>, values: Object) -> Self {
        Self {
            mesh: Some(mesh),
            values,
        }
    }

    pub fn mesh(&self) -> Option<&MeshContext> {
        self.mesh.as_deref()
    }

    /// The values supplied by the caller of the operation.
    pub fn values(&self) -> &Object {
        &self.values
    }

    /// Looks `key` up: [`MESH_CONTEXT_KEY`], then source names, then caller values.
    pub fn get(&self, key: &str) -> Option<ContextEntry<'_>> {
        if let Some(mesh) = self.mesh.as_deref() {
            if key == MESH_CONTEXT_KEY {
                return Some(ContextEntry::Mesh(mesh));
            }
            if let Some(api) = mesh.sdk.source(key) {
                return Some(ContextEntry::SourceApi(api));
            }
        }
        self.values.get(key).map(ContextEntry::Value)
    }

    /// The caller values named by `names`, as forwarded to a source executor.
    pub(crate) fn pick(&self, names: &[String]) -> Object {
        names
            .iter()
            .filter_map(|name| {
                self.values
                    .get(name.as_str())
                    .map(|value| (name.as_str().into(), value.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn plain_context_only_exposes_values() {
        let mut values = Object::new();
        values.insert("token", json!("secret"));
        values.insert("locale", json!("fr"));
        let context = ResolverContext::new(values);

        assert!(matches!(
            context.get("token"),
            Some(ContextEntry::Value(value)) if value == &json!("secret")
        ));
        assert!(context.get(MESH_CONTEXT_KEY).is_none());
        assert!(context.mesh().is_none());

        let picked = context.pick(&["locale".to_string(), "missing".to_string()]);
        assert_eq!(Value::Object(picked), json!({"locale": "fr"}));
    }
}

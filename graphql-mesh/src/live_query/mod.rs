//! Live queries.
//!
//! A query operation carrying `@live` returns a stream. Its first item is the initial
//! result; every invalidation hitting one of the resource identifiers of the last result
//! re-executes the operation and yields a new item.

mod invalidation;

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::OperationType;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use futures::StreamExt;
pub(crate) use invalidation::InvalidationMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::engine::ExecutionRequest;
use crate::engine::Executor;
use crate::engine::values::ast_value_to_json;
use crate::graphql::Response;
use crate::graphql::ResponseStream;
use crate::graphql::ResponseVisitor;
use crate::json_ext::Object;
use crate::json_ext::ValueExt;

const LIVE_DIRECTIVE: &str = "live";

/// What executing an operation produced.
pub enum ExecutionResult {
    Single(Response),
    /// The results of a live query, starting with the initial one.
    Live(ResponseStream),
}

impl ExecutionResult {
    /// The single response, or the first response of a live query.
    pub async fn into_response(self) -> Option<Response> {
        match self {
            ExecutionResult::Single(response) => Some(response),
            ExecutionResult::Live(mut stream) => stream.next().await,
        }
    }
}

impl fmt::Debug for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionResult::Single(response) => f.debug_tuple("Single").field(response).finish(),
            ExecutionResult::Live(_) => f.write_str("Live"),
        }
    }
}

struct Registration {
    identifiers: HashSet<String>,
    notify: Arc<Notify>,
}

/// Tracks the live queries of a mesh.
#[derive(Default)]
pub struct LiveQueryStore {
    next_id: AtomicU64,
    closed: AtomicBool,
    registrations: Mutex<HashMap<u64, Registration>>,
}

impl fmt::Debug for LiveQueryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQueryStore")
            .field("active", &self.active())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl LiveQueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `operation` is a query carrying `@live`.
    pub fn is_live(operation: &Operation) -> bool {
        operation.operation_type == OperationType::Query
            && operation.directives.get(LIVE_DIRECTIVE).is_some()
    }

    /// Executes `request`; live queries become streams.
    ///
    /// Once the store is closed, live queries run once.
    pub async fn execute(
        self: &Arc<Self>,
        executor: Arc<Executor>,
        request: ExecutionRequest,
    ) -> ExecutionResult {
        let live = request.operation().is_some_and(|operation| Self::is_live(operation));
        let response = executor.execute(&request).await;
        if !live || self.is_closed() {
            return ExecutionResult::Single(response);
        }

        let identifiers = resource_identifiers(&request, &response);
        tracing::debug!(identifiers = ?identifiers, "live query registered");
        let notify = Arc::new(Notify::new());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registrations.lock().insert(
            id,
            Registration {
                identifiers,
                notify: notify.clone(),
            },
        );
        let state = LiveState {
            guard: RegistrationGuard {
                store: self.clone(),
                id,
            },
            notify,
            executor,
            request,
            initial: Some(response),
        };
        let stream = futures::stream::unfold(state, |mut state| async move {
            if let Some(initial) = state.initial.take() {
                return Some((initial, state));
            }
            state.notify.notified().await;
            let store = state.guard.store.clone();
            if store.is_closed() {
                return None;
            }
            let response = state.executor.execute(&state.request).await;
            let identifiers = resource_identifiers(&state.request, &response);
            if let Some(registration) = store.registrations.lock().get_mut(&state.guard.id) {
                registration.identifiers = identifiers;
            }
            tracing::debug!(id = state.guard.id, "live query re-executed");
            Some((response, state))
        });
        ExecutionResult::Live(stream.boxed())
    }

    /// Schedules a re-execution of every live query reading one of `identifiers`.
    ///
    /// Returns the number of live queries hit.
    pub fn invalidate<S: AsRef<str>>(&self, identifiers: &[S]) -> usize {
        let registrations = self.registrations.lock();
        let mut hit = 0;
        for registration in registrations.values() {
            let affected = identifiers
                .iter()
                .any(|identifier| registration.identifiers.contains(identifier.as_ref()));
            if affected {
                registration.notify.notify_one();
                hit += 1;
            }
        }
        tracing::debug!(identifiers = identifiers.len(), hit, "invalidated live queries");
        hit
    }

    /// Ends every live stream. Only the first call has an effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for registration in self.registrations.lock().values() {
            registration.notify.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of live streams still alive.
    pub fn active(&self) -> usize {
        self.registrations.lock().len()
    }
}

struct LiveState {
    guard: RegistrationGuard,
    notify: Arc<Notify>,
    executor: Arc<Executor>,
    request: ExecutionRequest,
    initial: Option<Response>,
}

/// Unregisters a live query when its stream is dropped.
struct RegistrationGuard {
    store: Arc<LiveQueryStore>,
    id: u64,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.store.registrations.lock().remove(&self.id);
    }
}

/// `Type.field` per root field, `Type.field(id:"v")` for root fields called with an `id`
/// argument, and `Type:id` for every object of the result with a selected `id`.
pub(crate) fn resource_identifiers(request: &ExecutionRequest, response: &Response) -> HashSet<String> {
    let mut collector = IdentifierCollector::default();
    let Some(operation) = request.operation() else {
        return collector.identifiers;
    };
    let root_type = operation.selection_set.ty.clone();
    collector.root_fields(
        request.document.document(),
        &root_type,
        &operation.selection_set,
        &request.variables,
    );
    if let Some(data) = &response.data {
        collector.visit(request.document.document(), operation, data);
    }
    collector.identifiers
}

#[derive(Default)]
struct IdentifierCollector {
    identifiers: HashSet<String>,
}

impl IdentifierCollector {
    fn root_fields(
        &mut self,
        document: &ExecutableDocument,
        root_type: &Name,
        selection_set: &SelectionSet,
        variables: &Object,
    ) {
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(field) => {
                    if field.name.starts_with("__") {
                        continue;
                    }
                    self.identifiers.insert(format!("{root_type}.{}", field.name));
                    if let Some(argument) = field.arguments.iter().find(|argument| argument.name == "id") {
                        let value = ast_value_to_json(&argument.value, variables);
                        self.identifiers.insert(format!(
                            "{root_type}.{}(id:{})",
                            field.name,
                            serde_json::to_string(&value).unwrap_or_default()
                        ));
                    }
                }
                Selection::InlineFragment(inline) => {
                    self.root_fields(document, root_type, &inline.selection_set, variables)
                }
                Selection::FragmentSpread(spread) => {
                    if let Some(fragment) = document.fragments.get(&spread.fragment_name) {
                        self.root_fields(document, root_type, &fragment.selection_set, variables)
                    }
                }
            }
        }
    }
}

impl ResponseVisitor for IdentifierCollector {
    fn visit_object(&mut self, ty: &Name, object: &Object) {
        let Some(id) = object.get("id").filter(|id| !id.is_null()) else {
            return;
        };
        let type_name = object
            .get("__typename")
            .and_then(|typename| typename.as_str())
            .unwrap_or(ty.as_str());
        self.identifiers
            .insert(format!("{type_name}:{}", id.to_template_string()));
    }
}

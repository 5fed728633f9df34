//! In-process typed event channels.
//!
//! The mesh publishes two events: [`ResolverEvent`] after every field resolution and
//! [`Destroy`] once when the mesh is torn down.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use apollo_compiler::Name;
use apollo_compiler::ast::Type;
use parking_lot::Mutex;

use crate::error::FieldError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// Identifies a handler registered on an [`EventChannel`].
pub type SubscriptionId = u64;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A channel carrying one event type.
pub struct EventChannel<T> {
    name: &'static str,
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, Handler<T>)>>,
}

impl<T> EventChannel<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push((id, Arc::new(handler)));
        tracing::trace!(channel = self.name, id, "handler subscribed");
        id
    }

    /// Returns whether a handler was registered under `id`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        before != handlers.len()
    }

    /// Calls every registered handler with `payload`.
    ///
    /// Handlers run outside of the registry lock so they may subscribe or unsubscribe.
    pub fn publish(&self, payload: &T) {
        let handlers: Vec<Handler<T>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(payload);
        }
    }

    pub fn has_subscribers(&self) -> bool {
        !self.handlers.lock().is_empty()
    }

    fn clear(&self) {
        self.handlers.lock().clear();
    }
}

/// Published when the mesh is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destroy;

/// Published after every field resolution, whether it succeeded or not.
#[derive(Debug, Clone)]
pub struct ResolverEvent {
    pub result: Result<Value, FieldError>,
    pub resolver_data: ResolverData,
}

#[derive(Debug, Clone)]
pub struct ResolverData {
    pub info: ResolverEventInfo,
    pub args: Object,
    pub context: Object,
    pub root: Value,
}

#[derive(Debug, Clone)]
pub struct ResolverEventInfo {
    pub parent_type: Name,
    pub field_name: Name,
    pub return_type: Type,
    pub path: Path,
    pub operation_name: Option<String>,
}

/// The mesh event bus.
pub struct PubSub {
    resolver_done: EventChannel<ResolverEvent>,
    destroy: EventChannel<Destroy>,
    destroyed: AtomicBool,
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSub {
    pub fn new() -> Self {
        Self {
            resolver_done: EventChannel::new("resolver_done"),
            destroy: EventChannel::new("destroy"),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn resolver_done(&self) -> &EventChannel<ResolverEvent> {
        &self.resolver_done
    }

    pub fn destroy(&self) -> &EventChannel<Destroy> {
        &self.destroy
    }

    /// Publishes [`Destroy`] and drops every handler. Only the first call has an effect.
    pub fn teardown(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("publishing destroy event");
        self.destroy.publish(&Destroy);
        self.resolver_done.clear();
        self.destroy.clear();
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use agent_rpc::{AgentRoomSession, RpcHandler, RpcInvocation};
use shared::protocol::{error_status, STATUS_SUCCESS};
use tracing::{debug, warn};
use uuid::Uuid;

/// A subscriber for one inbound method. Returns the status string to send
/// back to the agent, or `None` when the owning surface has already been
/// torn down (the registry prunes such listeners instead of invoking them
/// again).
pub(crate) type Listener = Arc<dyn Fn(&RpcInvocation) -> Option<String> + Send + Sync>;

#[derive(Default)]
struct MethodSubscriptions {
    listeners: Vec<(Uuid, Listener)>,
    /// Whether the underlying transport registration for this method has
    /// been performed against the currently attached session.
    bound: bool,
}

struct RegistryInner {
    session: Option<Arc<dyn AgentRoomSession>>,
    methods: HashMap<String, MethodSubscriptions>,
}

/// Fans inbound RPC calls out to every mounted surface subscribed to a
/// method, performing exactly one underlying transport registration per
/// method name. Subscriptions made before a session is attached are
/// retained and bound once `attach_session` runs, so no inbound call is
/// lost after the transport becomes available.
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                session: None,
                methods: HashMap::new(),
            })),
        }
    }

    /// Binds every method that currently has listeners. A registration
    /// failure is non-fatal: the surface keeps rendering whatever local
    /// state it already has.
    pub fn attach_session(&self, session: Arc<dyn AgentRoomSession>) {
        let mut inner = lock(&self.inner);
        inner.session = Some(Arc::clone(&session));
        let methods: Vec<String> = inner
            .methods
            .iter()
            .filter(|(_, subs)| !subs.listeners.is_empty())
            .map(|(method, _)| method.clone())
            .collect();
        for method in methods {
            bind_method(&mut inner, &self.inner, &method);
        }
    }

    /// Unregisters every bound method and drops the session reference.
    /// Existing listeners survive and re-bind on the next attach.
    pub fn detach_session(&self) {
        let mut inner = lock(&self.inner);
        if let Some(session) = inner.session.take() {
            for (method, subs) in inner.methods.iter_mut() {
                if subs.bound {
                    session.unregister_rpc_handler(method);
                    subs.bound = false;
                }
            }
        }
    }

    pub(crate) fn subscribe(&self, method: &str, listener: Listener) -> ListenerGuard {
        let id = Uuid::new_v4();
        let mut inner = lock(&self.inner);
        inner
            .methods
            .entry(method.to_string())
            .or_default()
            .listeners
            .push((id, listener));
        debug!(method, listener = %id, "rpc: listener subscribed");
        if inner.session.is_some() {
            bind_method(&mut inner, &self.inner, method);
        }
        ListenerGuard {
            method: method.to_string(),
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle for one subscription. Dropping it removes the listener
/// synchronously; removing the last listener for a method unregisters the
/// transport handler, so nothing leaks across remounts.
pub struct ListenerGuard {
    method: String,
    id: Uuid,
    inner: Weak<Mutex<RegistryInner>>,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut inner = lock(&inner);
        let Some(subs) = inner.methods.get_mut(&self.method) else {
            return;
        };
        subs.listeners.retain(|(id, _)| *id != self.id);
        if subs.listeners.is_empty() {
            let was_bound = subs.bound;
            inner.methods.remove(&self.method);
            if was_bound {
                if let Some(session) = inner.session.as_ref() {
                    session.unregister_rpc_handler(&self.method);
                }
            }
            debug!(method = %self.method, "rpc: last listener gone, method unregistered");
        }
    }
}

fn lock(inner: &Mutex<RegistryInner>) -> std::sync::MutexGuard<'_, RegistryInner> {
    inner.lock().unwrap_or_else(|err| err.into_inner())
}

fn bind_method(inner: &mut RegistryInner, shared: &Arc<Mutex<RegistryInner>>, method: &str) {
    let Some(session) = inner.session.as_ref() else {
        return;
    };
    let Some(subs) = inner.methods.get_mut(method) else {
        return;
    };
    if subs.bound {
        return;
    }
    let handler = transport_handler(method.to_string(), Arc::downgrade(shared));
    match session.register_rpc_handler(method, handler) {
        Ok(()) => {
            subs.bound = true;
            debug!(method, "rpc: transport handler registered");
        }
        Err(err) => {
            warn!(method, "rpc: transport registration failed (will render local state): {err}");
        }
    }
}

/// The single handler registered with the transport for a method; it holds
/// the registry weakly so a dropped client cannot be kept alive by the
/// session's handler table.
fn transport_handler(method: String, inner: Weak<Mutex<RegistryInner>>) -> RpcHandler {
    Arc::new(move |invocation: RpcInvocation| {
        let method = method.clone();
        let inner = inner.clone();
        Box::pin(async move { dispatch(&method, &inner, invocation) })
    })
}

fn dispatch(method: &str, inner: &Weak<Mutex<RegistryInner>>, invocation: RpcInvocation) -> String {
    let Some(inner) = inner.upgrade() else {
        return error_status("subscription registry is gone");
    };

    let listeners = {
        let guard = lock(&inner);
        guard
            .methods
            .get(method)
            .map(|subs| subs.listeners.clone())
            .unwrap_or_default()
    };

    if listeners.is_empty() {
        return error_status("no active subscriber");
    }

    let mut first_error: Option<String> = None;
    let mut handled = 0usize;
    let mut dead: Vec<Uuid> = Vec::new();
    for (id, listener) in &listeners {
        match listener(&invocation) {
            Some(status) => {
                handled += 1;
                if status != STATUS_SUCCESS && first_error.is_none() {
                    first_error = Some(status);
                }
            }
            None => dead.push(*id),
        }
    }

    if !dead.is_empty() {
        let mut guard = lock(&inner);
        if let Some(subs) = guard.methods.get_mut(method) {
            subs.listeners.retain(|(id, _)| !dead.contains(id));
        }
    }

    if handled == 0 {
        return error_status("no active subscriber");
    }
    first_error.unwrap_or_else(|| STATUS_SUCCESS.to_string())
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;

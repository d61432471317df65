//! 连接状态订阅者及其并发注册表。
//! Connection-state subscribers and their concurrent registry.

use crate::client::{ConnectionHandle, ConnectionState};
use dashmap::DashMap;
use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};
use tracing::error;

/// A subscriber notified of connection-state transitions.
///
/// 接收连接状态转换通知的订阅者。
pub trait ConnectionStateListener: Send + Sync + 'static {
    fn state_changed(&self, connection: &ConnectionHandle, state: ConnectionState);
}

impl<F> ConnectionStateListener for F
where
    F: Fn(&ConnectionHandle, ConnectionState) + Send + Sync + 'static,
{
    fn state_changed(&self, connection: &ConnectionHandle, state: ConnectionState) {
        self(connection, state)
    }
}

/// Shared reference to a listener; identity is the pointer.
pub type ListenerRef = Arc<dyn ConnectionStateListener>;

fn key_of(listener: &ListenerRef) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

/// Thread-safe set of connection-state listeners.
///
/// Notification works on a snapshot of the set taken at the start of the pass and
/// holds no lock while calling listeners, so `add`/`remove` never block on or fail
/// because of a running pass; a listener may even unbind itself from its callback.
///
/// 线程安全的连接状态订阅者集合。
///
/// 通知基于本轮开始时的集合快照，调用订阅者期间不持有任何锁，
/// 因此 `add`/`remove` 不会因正在进行的通知而阻塞或失败；订阅者甚至可以在回调中解绑自己。
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: DashMap<usize, ListenerRef>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener. Returns `false` if it was already present.
    pub fn add(&self, listener: ListenerRef) -> bool {
        self.listeners.insert(key_of(&listener), listener).is_none()
    }

    /// Removes a listener. Returns `false` if it was not present.
    pub fn remove(&self, listener: &ListenerRef) -> bool {
        self.listeners.remove(&key_of(listener)).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// A point-in-time copy of the registered listeners.
    pub fn snapshot(&self) -> Vec<ListenerRef> {
        self.listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Delivers `state` once to every listener registered when the pass starts.
    ///
    /// 将 `state` 向本轮开始时已注册的每个订阅者各投递一次。
    pub fn notify(&self, connection: &ConnectionHandle, state: ConnectionState) {
        for listener in self.snapshot() {
            deliver(listener.as_ref(), connection, state);
        }
    }
}

/// Calls one listener, containing a panic so the remaining listeners still run.
pub(crate) fn deliver(
    listener: &dyn ConnectionStateListener,
    connection: &ConnectionHandle,
    state: ConnectionState,
) {
    if catch_unwind(AssertUnwindSafe(|| listener.state_changed(connection, state))).is_err() {
        error!(%state, "Connection state listener panicked");
    }
}

//! 进程内共享的能力目录。
//! The in-process shared capability directory.
//!
//! 每种能力类型最多对应一个实例。注册会替换同类型的旧实例，而注销只会移除注册者自己的条目，
//! 因此过期的注册方永远不会移除较新的条目。
//!
//! Each capability type maps to at most one instance. Registering replaces an older
//! instance of the same type, while unregistering only removes the registrant's own
//! entry, so a stale registrant can never remove a newer one.

use crate::client::ConnectionHandle;
use dashmap::DashMap;
use std::{
    any::{Any, TypeId, type_name},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::{debug, trace};

/// Marker capability. Its presence in the directory signals that a live
/// connection to the ensemble exists.
///
/// 标记能力。它在目录中的存在即表示与集群之间存在一个活跃连接。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionAvailable;

/// The connection capability registered for in-process consumers.
///
/// 为进程内消费者注册的连接能力。
pub struct LiveConnection {
    /// The generation that owns the connection.
    /// 拥有该连接的代。
    pub generation: u64,
    pub handle: ConnectionHandle,
}

impl fmt::Debug for LiveConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveConnection")
            .field("generation", &self.generation)
            .field("connected", &self.handle.is_connected())
            .finish()
    }
}

struct Entry {
    id: u64,
    instance: Arc<dyn Any + Send + Sync>,
}

/// A mapping from capability type to one registered instance.
///
/// 从能力类型到单个已注册实例的映射。
#[derive(Default)]
pub struct ServiceDirectory {
    entries: DashMap<TypeId, Entry>,
    next_id: AtomicU64,
}

impl fmt::Debug for ServiceDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDirectory")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ServiceDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `instance` as the provider of capability `T`, replacing any
    /// previous provider.
    ///
    /// 将 `instance` 注册为能力 `T` 的提供者，并替换之前的提供者。
    pub fn register<T: Any + Send + Sync>(self: &Arc<Self>, instance: Arc<T>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let type_id = TypeId::of::<T>();
        if self.entries.insert(type_id, Entry { id, instance }).is_some() {
            debug!(capability = type_name::<T>(), "Replaced registered capability");
        } else {
            trace!(capability = type_name::<T>(), "Registered capability");
        }
        Registration {
            directory: Arc::clone(self),
            type_id,
            capability: type_name::<T>(),
            id,
        }
    }

    /// Returns the current provider of capability `T`.
    pub fn lookup<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let instance = self
            .entries
            .get(&TypeId::of::<T>())
            .map(|entry| Arc::clone(&entry.instance))?;
        instance.downcast::<T>().ok()
    }

    pub fn is_registered<T: Any + Send + Sync>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle to one registration. Dropping it leaves the registration in place;
/// call [`Registration::unregister`] to remove it.
///
/// 单个注册的句柄。丢弃句柄不会移除注册，需要显式调用 [`Registration::unregister`]。
pub struct Registration {
    directory: Arc<ServiceDirectory>,
    type_id: TypeId,
    capability: &'static str,
    id: u64,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("capability", &self.capability)
            .field("id", &self.id)
            .finish()
    }
}

impl Registration {
    /// Removes the registration. Returns `false` if it had already been replaced
    /// by a newer provider, in which case the newer one stays registered.
    ///
    /// 移除该注册。如果它已被更新的提供者替换则返回 `false`，此时较新的注册保持不变。
    pub fn unregister(self) -> bool {
        let removed = self
            .directory
            .entries
            .remove_if(&self.type_id, |_, entry| entry.id == self.id)
            .is_some();
        trace!(capability = self.capability, removed, "Unregistered capability");
        removed
    }
}

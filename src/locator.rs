//! 进程范围内发布当前活跃连接的槽位。
//! A process-wide slot publishing the currently live connection.

use crate::{client::ConnectionHandle, directory::LiveConnection};
use arc_swap::ArcSwapOption;
use std::{
    fmt,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::sync::Notify;
use tracing::debug;

/// Publishes the live connection handle to unrelated in-process consumers.
///
/// Reads never block. Unbinding is identity-checked: a superseded connection
/// can only clear the slot while it is still the one published.
///
/// 向进程内其他无关的消费者发布活跃连接句柄。
///
/// 读取永不阻塞。解绑会校验身份：被取代的连接只有在仍是当前发布者时才能清空槽位。
#[derive(Default)]
pub struct ConnectionLocator {
    slot: ArcSwapOption<LiveConnection>,
    bound: Notify,
}

impl fmt::Debug for ConnectionLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLocator")
            .field("slot", &self.slot.load().as_deref())
            .finish()
    }
}

impl ConnectionLocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide locator.
    ///
    /// 进程范围内共享的定位器。
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<ConnectionLocator>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(ConnectionLocator::new))
    }

    /// Publishes `connection`, replacing whatever was published before.
    pub fn bind_connection(&self, connection: Arc<LiveConnection>) {
        debug!(generation = connection.generation, "Binding live connection");
        self.slot.store(Some(connection));
        self.bound.notify_waiters();
    }

    /// Clears the slot if `connection` is the one currently published.
    /// Returns whether the slot was cleared.
    ///
    /// 如果 `connection` 是当前发布的连接则清空槽位，返回是否清空。
    pub fn unbind_connection(&self, connection: &Arc<LiveConnection>) -> bool {
        let expected = Some(Arc::clone(connection));
        let previous = self
            .slot
            .compare_and_swap(&expected, None::<Arc<LiveConnection>>);
        let cleared = matches!(&*previous, Some(p) if Arc::ptr_eq(p, connection));
        debug!(
            generation = connection.generation,
            cleared, "Unbinding live connection"
        );
        cleared
    }

    /// The currently published connection, if any.
    pub fn connection(&self) -> Option<Arc<LiveConnection>> {
        self.slot.load_full()
    }

    /// The handle of the currently published connection, if any.
    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.connection().map(|c| Arc::clone(&c.handle))
    }

    /// Waits until a connection is published, up to `timeout`.
    ///
    /// 等待连接被发布，最长等待 `timeout`。
    pub async fn wait_for_connection(&self, timeout: Duration) -> Option<Arc<LiveConnection>> {
        let wait = async {
            loop {
                let notified = self.bound.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(connection) = self.connection() {
                    return connection;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }
}

//! Traits for abstracting over coordination-service client implementations.
use super::settings::ClientSettings;
use crate::{error::Result, lifecycle::StateEventSink};
use async_trait::async_trait;
use std::sync::Arc;

/// A shared handle to a started (or starting) coordination client.
///
/// 已启动（或正在启动）的协调客户端的共享句柄。
pub type ConnectionHandle = Arc<dyn CoordinationClient>;

/// An asynchronous coordination-service client.
///
/// This trait allows for abstracting over the underlying client implementation,
/// enabling in-memory clients for testing or alternative wire implementations.
///
/// 异步协调服务客户端接口。
///
/// 此trait允许对底层客户端实现进行抽象，从而可以为测试提供内存实现或替换底层协议实现。
#[async_trait]
pub trait CoordinationClient: Send + Sync + 'static {
    /// Starts connecting. State transitions are reported through the
    /// `StateEventSink` the client was built with.
    ///
    /// 开始连接。状态转换通过构建时传入的 `StateEventSink` 报告。
    async fn start(&self) -> Result<()>;

    /// Stops the client and releases its session.
    ///
    /// May be called while `start` is still running, and must make it return. May be
    /// called more than once.
    ///
    /// 停止客户端并释放其会话。可能在 `start` 仍在执行时被调用，并且必须使其返回；可能被多次调用。
    async fn close(&self) -> Result<()>;

    /// Whether the client currently considers itself connected.
    /// 客户端当前是否认为自己处于连接状态。
    fn is_connected(&self) -> bool;
}

/// Builds clients for connect attempts.
///
/// 为每次连接尝试构建客户端。
pub trait ClientFactory: Send + Sync + 'static {
    /// Builds a client that is not yet started. The client must report every
    /// state transition to `events`.
    ///
    /// 构建一个尚未启动的客户端。客户端必须将所有状态转换报告给 `events`。
    fn build(&self, settings: &ClientSettings, events: StateEventSink) -> Result<ConnectionHandle>;
}


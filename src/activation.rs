//! The co-located collaborator that consumes the raw configuration and follows
//! connection state alongside the listeners.
//!
//! 与管理器同处的协作者：消费原始配置，并与订阅者一同跟踪连接状态。

use crate::{
    client::{ConnectionHandle, ConnectionState},
    config::ConfigMap,
};

/// Internal activation callback of the manager.
///
/// All methods default to no-ops so implementors only override what they need.
///
/// 管理器内部的激活回调。所有方法默认为空操作，实现者只需覆盖需要的部分。
pub trait ActivationHook: Send + Sync + 'static {
    /// Called with the full configuration on activation and on every reconfiguration,
    /// including the keys the manager does not inspect.
    ///
    /// 在激活和每次重新配置时以完整配置调用，包括管理器不解析的键。
    fn activate(&self, _config: &ConfigMap) {}

    /// Called before a reconfiguration re-activates the hook.
    fn on_disconnected(&self) {}

    /// Called for every connection-state transition, before the listeners.
    fn state_changed(&self, _connection: &ConnectionHandle, _state: ConnectionState) {}
}

/// An activation hook that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActivation;

impl ActivationHook for NoopActivation {}

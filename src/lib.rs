#![deny(clippy::expect_used, clippy::unwrap_used)]

//! Lifecycle management of a single shared connection to a coordination ensemble.
//! 协调服务集群单一共享连接的生命周期管理。
//!
//! A [`LifecycleManager`] builds a client from a flat configuration map, publishes the
//! live connection through a [`ServiceDirectory`] and a [`ConnectionLocator`], and fans
//! every connection-state transition out to registered listeners. Reconfiguration
//! replaces the whole connection; session loss triggers a rebuild.
//!
//! [`LifecycleManager`] 根据扁平的配置映射构建客户端，通过 [`ServiceDirectory`] 与
//! [`ConnectionLocator`] 发布活跃连接，并将每次连接状态转换分发给已注册的订阅者。
//! 重新配置会替换整个连接；会话丢失会触发重建。

pub mod activation;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod lifecycle;
pub mod listener;
pub mod locator;

pub use activation::{ActivationHook, NoopActivation};
pub use client::{
    ClientFactory, ClientSettings, ConnectionHandle, ConnectionState, CoordinationClient,
};
pub use config::{ConfigMap, ConfigSnapshot, ManagerConfig};
pub use directory::{ConnectionAvailable, LiveConnection, ServiceDirectory};
pub use error::{Error, Result};
pub use lifecycle::{LifecycleManager, LifecycleManagerBuilder, StateEventSink};
pub use listener::{ConnectionStateListener, ListenerRef, ListenerRegistry};
pub use locator::ConnectionLocator;

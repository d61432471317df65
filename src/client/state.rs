//! 连接状态定义
//! Connection state definitions

use std::fmt;

/// A connection-state transition reported by the coordination client.
///
/// 协调客户端报告的连接状态转换。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The first successful connection of a client.
    /// 客户端的首次成功连接。
    Connected,
    /// Connected to a read-only member of the ensemble.
    /// 已连接到集群的只读成员。
    ReadOnly,
    /// The connection came back after a suspension.
    /// 连接在挂起后恢复。
    Reconnected,
    /// The connection is interrupted; the session may still survive.
    /// 连接中断，会话可能仍然存活。
    Suspended,
    /// The session is gone.
    /// 会话已丢失。
    Lost,
}

impl ConnectionState {
    /// Whether the state means a usable connection exists.
    ///
    /// 该状态是否表示存在可用连接。
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::ReadOnly | ConnectionState::Reconnected
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::ReadOnly => "READ_ONLY",
            ConnectionState::Reconnected => "RECONNECTED",
            ConnectionState::Suspended => "SUSPENDED",
            ConnectionState::Lost => "LOST",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

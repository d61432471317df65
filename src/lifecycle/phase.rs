//! 代的阶段状态机
//! Generation phase state machine
//!
//! 每个代经历 `Created → Connecting → {Connected, ReadOnly, Suspended}`，在会话丢失时回到
//! `Connecting`，最终进入终态 `Closed`。
//!
//! Every generation moves through `Created → Connecting → {Connected, ReadOnly,
//! Suspended}`, returns to `Connecting` when the session is lost, and finally reaches
//! the terminal `Closed` phase.

use crate::client::ConnectionState;

/// Phase of one connection generation.
///
/// 单个连接代的阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationPhase {
    /// 已创建，尚未连接
    /// Created, never connected
    Created,
    /// 客户端已构建并启动，等待首个状态
    /// Client built and started, waiting for its first state
    Connecting,
    /// 已连接（含重连成功）
    /// Connected (including reconnected)
    Connected,
    /// 已连接到只读成员
    /// Connected to a read-only member
    ReadOnly,
    /// 连接挂起
    /// Connection suspended
    Suspended,
    /// 终态
    /// Terminal
    Closed,
}

impl GenerationPhase {
    /// The phase a connection-state event leads to.
    ///
    /// 连接状态事件导致的阶段。
    pub fn after(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected | ConnectionState::Reconnected => GenerationPhase::Connected,
            ConnectionState::ReadOnly => GenerationPhase::ReadOnly,
            ConnectionState::Suspended => GenerationPhase::Suspended,
            ConnectionState::Lost => GenerationPhase::Connecting,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GenerationPhase::Created => "Created",
            GenerationPhase::Connecting => "Connecting",
            GenerationPhase::Connected => "Connected",
            GenerationPhase::ReadOnly => "ReadOnly",
            GenerationPhase::Suspended => "Suspended",
            GenerationPhase::Closed => "Closed",
        }
    }

    pub fn is_closed(self) -> bool {
        self == GenerationPhase::Closed
    }
}

/// Phase validator responsible for the legality of phase transitions.
/// 阶段验证器，负责判断阶段转换是否合法。
pub struct PhaseValidator;

impl PhaseValidator {
    /// Validate if a phase transition is legal
    /// 验证阶段转换是否合法
    pub fn is_valid_transition(current: GenerationPhase, next: GenerationPhase) -> bool {
        use GenerationPhase::*;

        match (current, next) {
            // 终态不可离开
            // Nothing leaves the terminal phase
            (Closed, _) => false,

            // 任何非终态都可以关闭
            // Any live phase may close
            (_, Closed) => true,

            // 只有新建或丢失后的重连才会进入Connecting；同阶段幂等
            // Connecting is entered from creation or after a loss; same phase is idempotent
            (_, Connecting) => true,

            // 首个状态事件只能在客户端启动之后到达
            // State events only arrive after a client has started
            (Created, _) => false,

            (Connecting | Connected | ReadOnly | Suspended, Connected | ReadOnly | Suspended) => {
                true
            }

            (_, Created) => false,
        }
    }
}

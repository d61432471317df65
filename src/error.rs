//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use thiserror::Error;

/// The primary error type for the connection lifecycle library.
/// 连接生命周期库的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// A recognized configuration key carried a value that could not be parsed.
    /// 某个已识别的配置键的值无法解析。
    #[error("invalid value {value:?} for configuration key `{key}`")]
    InvalidConfig { key: &'static str, value: String },

    /// The configuration names no ensemble, so no client can be built from it.
    /// 配置中没有集群地址，因此无法构建客户端。
    #[error("no ensemble endpoint configured")]
    MissingEnsemble,

    /// The underlying coordination client reported a failure.
    /// 底层协调客户端报告了错误。
    #[error("coordination client error: {0}")]
    Client(String),

    /// The serialized task stream no longer accepts work (the manager was deactivated).
    /// 串行任务流已不再接受任务（管理器已停用）。
    #[error("serialized task stream is closed")]
    StreamClosed,
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

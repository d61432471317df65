//! The seam towards the underlying coordination-service client.
//!
//! 与底层协调服务客户端之间的接口层。
pub mod settings;
pub mod state;
pub mod traits;

pub use crate::lifecycle::StateEventSink;
pub use settings::{AuthInfo, ClientSettings, ClientSettingsBuilder, RetryNTimes, RetryPolicy};
pub use state::ConnectionState;
pub use traits::{ClientFactory, ConnectionHandle, CoordinationClient};

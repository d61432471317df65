//! Connection lifecycle: generations, the serialized task stream, and the manager.
//! 连接生命周期：代、串行任务流与管理器。

mod generation;
mod manager;
pub mod phase;
mod stream;

pub use manager::{LifecycleManager, LifecycleManagerBuilder};
pub use phase::{GenerationPhase, PhaseValidator};
pub use stream::StateEventSink;

#[cfg(test)]
pub mod test_utils;

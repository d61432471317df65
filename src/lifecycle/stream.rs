//! The serialized task stream.
//!
//! 串行任务流。
//!
//! A single worker task drains one queue; every action that affects a generation
//! (connect, reconnect after a loss, teardown, state handling) runs here, so no two
//! of them ever run concurrently.
//!
//! 单个工作任务消费同一个队列；所有影响代的操作（连接、丢失后重连、拆除、状态处理）都在这里执行，
//! 因此它们永远不会并发执行。

use super::generation::Generation;
use crate::{
    client::ConnectionState,
    error::{Error, Result},
};
use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

/// Work items executed by the stream worker.
///
/// 串行任务流执行的任务。
pub(crate) enum StreamTask {
    /// Build and start a client for the generation.
    /// 为该代构建并启动客户端。
    Connect(Arc<Generation>),
    /// A state transition reported by one client attempt of the generation.
    /// 该代某次客户端尝试报告的状态转换。
    StateChanged {
        generation: Weak<Generation>,
        attempt: u64,
        state: ConnectionState,
    },
    /// Release everything the generation holds, then acknowledge.
    /// 释放该代持有的全部资源，然后确认。
    Teardown {
        generation: Arc<Generation>,
        done: oneshot::Sender<()>,
    },
    /// Acknowledge once every earlier task has run.
    /// 在之前的所有任务执行完毕后确认。
    Barrier(oneshot::Sender<()>),
    /// Stop the worker.
    /// 停止工作任务。
    Shutdown,
}

/// Cloneable submission side of the stream.
///
/// 任务流的可克隆提交端。
#[derive(Clone)]
pub(crate) struct StreamHandle {
    tx: mpsc::UnboundedSender<StreamTask>,
    accepting: Arc<AtomicBool>,
}

impl StreamHandle {
    pub(crate) fn submit(&self, task: StreamTask) -> Result<()> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(Error::StreamClosed);
        }
        self.tx.send(task).map_err(|_| Error::StreamClosed)
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stops accepting work. Tasks already queued still run before the worker exits.
    ///
    /// 停止接收新任务。已排队的任务在工作任务退出前仍会执行。
    pub(crate) fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(StreamTask::Shutdown);
        }
    }
}

/// The worker side of the stream.
pub(crate) struct SerialStream {
    rx: mpsc::UnboundedReceiver<StreamTask>,
}

impl SerialStream {
    pub(crate) fn channel() -> (StreamHandle, SerialStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = StreamHandle {
            tx,
            accepting: Arc::new(AtomicBool::new(true)),
        };
        (handle, SerialStream { rx })
    }

    /// Runs the worker loop until shut down.
    ///
    /// 运行工作循环直到被关闭。
    pub(crate) async fn run(mut self) {
        debug!("Serialized lifecycle stream started");
        while let Some(task) = self.rx.recv().await {
            match task {
                StreamTask::Connect(generation) => generation.connect().await,
                StreamTask::StateChanged {
                    generation,
                    attempt,
                    state,
                } => match generation.upgrade() {
                    Some(generation) => generation.on_state_changed(attempt, state),
                    None => trace!(%state, "Dropping state event of a released generation"),
                },
                StreamTask::Teardown { generation, done } => {
                    generation.teardown().await;
                    let _ = done.send(());
                }
                StreamTask::Barrier(done) => {
                    let _ = done.send(());
                }
                StreamTask::Shutdown => break,
            }
        }
        info!("Serialized lifecycle stream stopped");
    }
}

/// Routes a client's state transitions back to its generation through the stream.
///
/// Each sink is bound to one connect attempt; events from an attempt that has since
/// been replaced are dropped by the generation.
///
/// 通过任务流将客户端的状态转换路由回其所属的代。
///
/// 每个 sink 绑定到一次连接尝试；来自已被替换的尝试的事件会被代丢弃。
#[derive(Clone)]
pub struct StateEventSink {
    generation: Weak<Generation>,
    attempt: u64,
    stream: StreamHandle,
}

impl std::fmt::Debug for StateEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateEventSink")
            .field("attempt", &self.attempt)
            .field("accepting", &self.stream.is_accepting())
            .finish()
    }
}

impl StateEventSink {
    pub(crate) fn new(generation: Weak<Generation>, attempt: u64, stream: StreamHandle) -> Self {
        Self {
            generation,
            attempt,
            stream,
        }
    }

    /// Reports a state transition. Never blocks; events emitted after the
    /// manager shut down are discarded.
    ///
    /// 报告一次状态转换。永不阻塞；管理器关闭后发出的事件会被丢弃。
    pub fn emit(&self, state: ConnectionState) {
        let task = StreamTask::StateChanged {
            generation: self.generation.clone(),
            attempt: self.attempt,
            state,
        };
        if self.stream.submit(task).is_err() {
            trace!(attempt = self.attempt, %state, "Stream closed, state event discarded");
        }
    }
}

//! 连接代 - 单次配置对应的连接生命周期对象
//! Connection generation - the connection lifecycle object of one configuration
//!
//! 一个代把一个配置快照、一个关闭标志、当前客户端以及它在共享目录中的注册绑定在一起。
//! 除 `begin_close` 设置关闭标志外，所有修改都只在串行任务流上发生。
//!
//! A generation ties one configuration snapshot to a closed flag, the current client,
//! and its registrations in the shared directory. Apart from `begin_close` raising the
//! closed flag, every mutation happens on the serialized stream.

use super::{
    phase::{GenerationPhase, PhaseValidator},
    stream::{StateEventSink, StreamHandle, StreamTask},
};
use crate::{
    activation::ActivationHook,
    client::{ClientFactory, ClientSettings, ConnectionHandle, ConnectionState},
    config::ConfigSnapshot,
    directory::{ConnectionAvailable, LiveConnection, Registration, ServiceDirectory},
    error::Error,
    listener::ListenerRegistry,
    locator::ConnectionLocator,
};
use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, error, info, trace, warn};

/// Collaborators shared by the manager and all of its generations.
///
/// 管理器及其所有代共享的协作者。
pub(crate) struct ManagerContext {
    pub(crate) factory: Arc<dyn ClientFactory>,
    pub(crate) directory: Arc<ServiceDirectory>,
    pub(crate) locator: Arc<ConnectionLocator>,
    pub(crate) listeners: Arc<ListenerRegistry>,
    pub(crate) activation: Arc<dyn ActivationHook>,
    pub(crate) stream: StreamHandle,
}

impl ManagerContext {
    /// Notifies the activation hook, then every registered listener, of `state`.
    ///
    /// 将 `state` 先通知激活回调，再通知所有已注册的订阅者。
    pub(crate) fn notify(&self, connection: &ConnectionHandle, state: ConnectionState) {
        let activation = &self.activation;
        if catch_unwind(AssertUnwindSafe(|| activation.state_changed(connection, state))).is_err()
        {
            error!(%state, "Activation hook panicked");
        }
        self.listeners.notify(connection, state);
    }
}

/// Resources owned by one connect attempt.
#[derive(Default)]
struct AttemptResources {
    client: Option<ConnectionHandle>,
    published: Option<Arc<LiveConnection>>,
    registrations: Vec<Registration>,
}

struct AttemptState {
    phase: GenerationPhase,
    /// 当前尝试的编号，状态事件据此过滤
    /// Number of the current attempt; state events are fenced by it
    attempt: u64,
    /// 自上次丢失以来是否出现过有利状态
    /// Whether a favorable state was seen since the last loss
    live: bool,
    resources: AttemptResources,
}

impl AttemptState {
    fn transition_to(&mut self, generation: u64, next: GenerationPhase) -> bool {
        if PhaseValidator::is_valid_transition(self.phase, next) {
            if self.phase != next {
                trace!(
                    generation,
                    from = self.phase.name(),
                    to = next.name(),
                    "Generation phase transition"
                );
            }
            self.phase = next;
            true
        } else {
            warn!(
                generation,
                current = self.phase.name(),
                attempted = next.name(),
                "Invalid generation phase transition"
            );
            false
        }
    }
}

/// One attempt-scoped connection lifecycle object.
///
/// 一个以配置为范围的连接生命周期对象。
pub(crate) struct Generation {
    id: u64,
    snapshot: ConfigSnapshot,
    closed: AtomicBool,
    state: Mutex<AttemptState>,
    ctx: Arc<ManagerContext>,
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generation")
            .field("id", &self.id)
            .field("ensemble", &self.snapshot.ensemble)
            .field("closed", &self.is_closed())
            .field("phase", &self.phase())
            .finish()
    }
}

impl Generation {
    pub(crate) fn new(id: u64, snapshot: ConfigSnapshot, ctx: Arc<ManagerContext>) -> Arc<Self> {
        debug!(generation = id, ensemble = ?snapshot.ensemble, "Created generation");
        Arc::new(Self {
            id,
            snapshot,
            closed: AtomicBool::new(false),
            state: Mutex::new(AttemptState {
                phase: GenerationPhase::Created,
                attempt: 0,
                live: false,
                resources: AttemptResources::default(),
            }),
            ctx,
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn snapshot(&self) -> &ConfigSnapshot {
        &self.snapshot
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn phase(&self) -> GenerationPhase {
        self.lock().phase
    }

    /// The current client, unless the generation is closed.
    ///
    /// 当前客户端；若代已关闭则返回 `None`。
    pub(crate) fn live_connection(&self) -> Option<ConnectionHandle> {
        if self.is_closed() {
            return None;
        }
        self.lock().resources.client.clone()
    }

    fn lock(&self) -> MutexGuard<'_, AttemptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds and starts a client. Runs on the serialized stream only.
    ///
    /// On the reconnect path the previous attempt's resources are released first.
    /// A closed generation never builds a new client.
    ///
    /// 构建并启动客户端。仅在串行任务流上运行。
    ///
    /// 在重连路径上会先释放上一次尝试的资源。已关闭的代永远不会构建新客户端。
    pub(crate) async fn connect(self: &Arc<Self>) {
        let previous = std::mem::take(&mut self.lock().resources);
        self.release(previous).await;

        if self.is_closed() {
            debug!(generation = self.id, "Generation closed before connect, skipping");
            return;
        }

        let settings = match ClientSettings::from_snapshot(&self.snapshot) {
            Ok(settings) => settings,
            Err(Error::MissingEnsemble) => {
                info!(generation = self.id, "No ensemble configured, staying idle");
                return;
            }
            Err(e) => {
                error!(generation = self.id, error = %e, "Invalid client settings");
                return;
            }
        };

        let attempt = {
            let mut state = self.lock();
            state.attempt += 1;
            state.live = false;
            state.transition_to(self.id, GenerationPhase::Connecting);
            state.attempt
        };
        let sink = StateEventSink::new(Arc::downgrade(self), attempt, self.ctx.stream.clone());

        let client = match self.ctx.factory.build(&settings, sink) {
            Ok(client) => client,
            Err(e) => {
                error!(
                    generation = self.id,
                    attempt,
                    error = %e,
                    "Cannot build coordination client"
                );
                return;
            }
        };
        self.lock().resources.client = Some(Arc::clone(&client));
        // 与 begin_close 配对：它先设置标志再读取客户端
        // Pairs with begin_close, which raises the flag before reading the client
        if self.is_closed() {
            debug!(generation = self.id, attempt, "Generation closed during build, not starting");
            return;
        }

        info!(
            generation = self.id,
            attempt,
            ensemble = %settings.connect_string,
            "Starting coordination client"
        );
        if let Err(e) = client.start().await {
            error!(
                generation = self.id,
                attempt,
                error = %e,
                "Cannot start coordination client"
            );
        }
    }

    /// Handles a state transition of one client attempt. Runs on the serialized stream only.
    ///
    /// 处理某次客户端尝试的状态转换。仅在串行任务流上运行。
    pub(crate) fn on_state_changed(self: &Arc<Self>, attempt: u64, state: ConnectionState) {
        if self.is_closed() {
            trace!(generation = self.id, %state, "Ignoring state event of a closed generation");
            return;
        }

        let (client, published) = {
            let mut guard = self.lock();
            if guard.attempt != attempt {
                trace!(
                    generation = self.id,
                    attempt,
                    current = guard.attempt,
                    %state,
                    "Ignoring state event of a replaced attempt"
                );
                return;
            }
            let Some(client) = guard.resources.client.clone() else {
                return;
            };
            guard.transition_to(self.id, GenerationPhase::after(state));

            let mut published = None;
            if state.is_connected() {
                guard.live = true;
                if guard.resources.registrations.is_empty() {
                    let live = Arc::new(LiveConnection {
                        generation: self.id,
                        handle: Arc::clone(&client),
                    });
                    let directory = &self.ctx.directory;
                    guard.resources.registrations = vec![
                        directory.register(Arc::clone(&live)),
                        directory.register(Arc::new(ConnectionAvailable)),
                    ];
                    guard.resources.published = Some(Arc::clone(&live));
                    published = Some(live);
                }
            } else if state == ConnectionState::Lost {
                guard.live = false;
            }
            (client, published)
        };

        if let Some(live) = published {
            self.ctx.locator.bind_connection(live);
            info!(generation = self.id, attempt, "Connection registered and published");
        }

        debug!(generation = self.id, attempt, %state, "Connection state changed");
        self.ctx.notify(&client, state);

        if state == ConnectionState::Lost && !self.is_closed() {
            info!(generation = self.id, "Session lost, scheduling reconnect");
            if let Err(e) = self.ctx.stream.submit(StreamTask::Connect(Arc::clone(self))) {
                warn!(generation = self.id, error = %e, "Cannot schedule reconnect");
            }
        }
    }

    /// Raises the closed flag and queues the teardown on the stream.
    ///
    /// Only the first call does anything; later calls return an already-finished
    /// [`PendingClose`]. The returned close also carries the current client, which
    /// [`PendingClose::wait`] stops on the caller before waiting for the stream.
    ///
    /// 设置关闭标志并将拆除任务排入任务流。只有第一次调用生效；之后的调用返回已完成的 [`PendingClose`]。
    /// 返回值同时携带当前客户端，[`PendingClose::wait`] 会先在调用方停止它，再等待任务流。
    pub(crate) fn begin_close(self: &Arc<Self>) -> PendingClose {
        if self.closed.swap(true, Ordering::AcqRel) {
            return PendingClose {
                generation: Arc::clone(self),
                client: None,
                step: CloseStep::AlreadyClosed,
            };
        }
        info!(generation = self.id, "Closing generation");
        let client = self.lock().resources.client.clone();

        let (done, rx) = oneshot::channel();
        let task = StreamTask::Teardown {
            generation: Arc::clone(self),
            done,
        };
        let step = match self.ctx.stream.submit(task) {
            Ok(()) => CloseStep::Queued(rx),
            Err(_) => CloseStep::Inline,
        };
        PendingClose {
            generation: Arc::clone(self),
            client,
            step,
        }
    }

    /// Closes the generation and waits, until `deadline` at most, for its resources to be
    /// released. Idempotent.
    ///
    /// 关闭该代并最多等待到 `deadline`，直到其资源释放完毕。幂等。
    pub(crate) async fn close(self: &Arc<Self>, deadline: Instant) -> bool {
        self.begin_close().wait(deadline).await
    }

    /// Synthesizes a final LOST if the connection is live, then releases everything.
    /// Runs on the serialized stream, or inline once the stream no longer runs.
    ///
    /// 如果连接处于活跃状态则合成最后一个 LOST 通知，然后释放所有资源。
    /// 在串行任务流上运行；任务流停止后则在调用方内联运行。
    pub(crate) async fn teardown(&self) {
        let (resources, live) = {
            let mut state = self.lock();
            state.transition_to(self.id, GenerationPhase::Closed);
            let live = std::mem::take(&mut state.live);
            (std::mem::take(&mut state.resources), live)
        };

        if live {
            if let Some(client) = &resources.client {
                self.ctx.notify(client, ConnectionState::Lost);
            }
        }
        self.release(resources).await;
        debug!(generation = self.id, "Generation released");
    }

    /// Unregisters, unpublishes, and stops the client. Every step runs even if an
    /// earlier one fails; the synchronous steps run first so a cancelled release never
    /// leaves the connection registered.
    ///
    /// 注销、取消发布并停止客户端。即使前面的步骤失败，后续步骤也都会执行；
    /// 同步步骤先执行，因此被取消的释放不会让连接保持注册状态。
    async fn release(&self, resources: AttemptResources) {
        let AttemptResources {
            client,
            published,
            registrations,
        } = resources;

        self.unpublish(published, registrations);
        if let Some(client) = client {
            stop_client(self.id, &client).await;
        }
    }

    fn unpublish(&self, published: Option<Arc<LiveConnection>>, registrations: Vec<Registration>) {
        for registration in registrations {
            registration.unregister();
        }
        if let Some(live) = published {
            self.ctx.locator.unbind_connection(&live);
        }
    }

    /// Removes the generation from the directory and the locator ahead of its teardown.
    /// Used when a close is abandoned at its deadline; the teardown still runs later.
    ///
    /// 在拆除之前将该代从目录和定位器中移除。用于关闭在截止时间被放弃的情况；拆除稍后仍会执行。
    fn withdraw(&self) {
        let (published, registrations) = {
            let mut state = self.lock();
            (
                state.resources.published.take(),
                std::mem::take(&mut state.resources.registrations),
            )
        };
        self.unpublish(published, registrations);
    }
}

async fn stop_client(generation: u64, client: &ConnectionHandle) {
    if let Err(e) = client.close().await {
        warn!(generation, error = %e, "Error while closing coordination client");
    }
}

enum CloseStep {
    AlreadyClosed,
    Queued(oneshot::Receiver<()>),
    Inline,
}

/// A close in progress; [`PendingClose::wait`] completes it.
///
/// 正在进行的关闭；[`PendingClose::wait`] 会等待其完成。
pub(crate) struct PendingClose {
    generation: Arc<Generation>,
    client: Option<ConnectionHandle>,
    step: CloseStep,
}

impl PendingClose {
    /// Stops the client on the caller, then waits for the teardown until `deadline`.
    ///
    /// Returns `false` if the deadline passed first. The generation is then withdrawn
    /// from the directory and the locator right away, and the queued teardown finishes
    /// the rest whenever the stream reaches it.
    ///
    /// 先在调用方停止客户端，再等待拆除完成，最长到 `deadline`。若截止时间先到则返回 `false`，
    /// 此时该代立即从目录和定位器中撤下，其余工作由排队的拆除任务在任务流执行到它时完成。
    pub(crate) async fn wait(self, deadline: Instant) -> bool {
        let generation = Arc::clone(&self.generation);
        if tokio::time::timeout_at(deadline, self.complete()).await.is_ok() {
            return true;
        }
        warn!(
            generation = generation.id,
            "Generation teardown did not finish in time, withdrawing it"
        );
        generation.withdraw();
        false
    }

    async fn complete(self) {
        if let Some(client) = &self.client {
            stop_client(self.generation.id, client).await;
        }
        match self.step {
            CloseStep::AlreadyClosed => {}
            CloseStep::Queued(rx) => {
                if rx.await.is_err() {
                    warn!(
                        generation = self.generation.id,
                        "Stream stopped before teardown ran, releasing inline"
                    );
                    self.generation.teardown().await;
                }
            }
            CloseStep::Inline => self.generation.teardown().await,
        }
    }
}

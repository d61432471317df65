//! 连接生命周期管理器 - 统一管理共享连接的完整生命周期
//! Connection Lifecycle Manager - Unified management of the shared connection's lifecycle
//!
//! 管理器持有一个可原子交换的"当前代"槽位。激活、重新配置与停用通过比较并交换来竞争该槽位；
//! 失败的一方关闭它自己构建、从未暴露过的代，而被替换的代只由替换它的一方关闭。
//!
//! The manager owns one atomically swappable "current generation" slot. Activation,
//! reconfiguration, and deactivation race for it by compare-and-swap; a losing installer
//! closes the generation it built and never exposed, and a displaced generation is only
//! ever closed by whoever displaced it.

use super::{
    generation::{Generation, ManagerContext},
    phase::GenerationPhase,
    stream::{SerialStream, StreamTask},
};
use crate::{
    activation::{ActivationHook, NoopActivation},
    client::{ClientFactory, ConnectionState},
    config::{ConfigMap, ConfigSnapshot, ManagerConfig},
    directory::ServiceDirectory,
    error::{Error, Result},
    listener::{ListenerRef, ListenerRegistry, deliver},
    locator::ConnectionLocator,
};
use arc_swap::ArcSwapOption;
use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::{sync::oneshot, task::JoinHandle, time::Instant};
use tracing::{Instrument, Span, debug, info, info_span, warn};

/// Whether two slot values refer to the same generation.
fn same_generation(a: &Option<Arc<Generation>>, b: &Option<Arc<Generation>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Lifecycle manager of the single shared coordination-service connection.
///
/// `activate`, `reconfigure`, `deactivate`, and the listener methods may be called
/// concurrently from any thread. The manager must be built inside a tokio runtime.
///
/// 单个共享协调服务连接的生命周期管理器。
///
/// `activate`、`reconfigure`、`deactivate` 以及订阅者相关方法可以从任意线程并发调用。
/// 管理器必须在 tokio 运行时中构建。
pub struct LifecycleManager {
    current: ArcSwapOption<Generation>,
    ctx: Arc<ManagerContext>,
    next_generation: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: ManagerConfig,
    span: Span,
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("current", &self.current.load_full())
            .field("listeners", &self.ctx.listeners.len())
            .field("accepting", &self.ctx.stream.is_accepting())
            .field("config", &self.config)
            .finish()
    }
}

impl LifecycleManager {
    pub fn builder(factory: Arc<dyn ClientFactory>) -> LifecycleManagerBuilder {
        LifecycleManagerBuilder::new(factory)
    }

    /// Activates the manager with its initial configuration.
    ///
    /// Returns once the connect is queued; its outcome is only reported through
    /// listeners. Activating an already active manager is a no-op.
    ///
    /// 使用初始配置激活管理器。连接任务入队后即返回；连接结果只通过订阅者报告。
    /// 对已激活的管理器再次激活不会产生任何效果。
    pub fn activate(&self, config: &ConfigMap) -> Result<()> {
        let _enter = self.span.enter();
        let snapshot = ConfigSnapshot::from_map(config)?;
        self.ensure_accepting()?;
        self.ctx.activation.activate(config);

        if !snapshot.has_ensemble() {
            info!("Activated without an ensemble, waiting for configuration");
            return Ok(());
        }

        let next = self.new_generation(snapshot);
        let empty: Option<Arc<Generation>> = None;
        let installed = same_generation(
            &self.current.compare_and_swap(&empty, Some(Arc::clone(&next))),
            &empty,
        );
        if !installed {
            warn!(
                generation = next.id(),
                "Manager is already active, ignoring activation"
            );
            return Ok(());
        }

        info!(generation = next.id(), "Activated");
        self.ctx.stream.submit(StreamTask::Connect(next))
    }

    /// Applies a new configuration.
    ///
    /// An unchanged snapshot keeps the current generation and, if it is connected,
    /// re-emits one CONNECTED so derived settings propagate. A changed snapshot installs
    /// a new generation and closes the displaced one. The displaced client is stopped on
    /// the caller, and waiting for its teardown is bounded by `drain_timeout`.
    ///
    /// 应用新配置。快照未变时保留当前代，若已连接则重新发出一次 CONNECTED 以传播派生设置；
    /// 快照变化时安装新的代并关闭被替换的代；被替换的客户端在调用方停止，等待其拆除的时间以 `drain_timeout` 为上限。
    pub async fn reconfigure(&self, config: &ConfigMap) -> Result<()> {
        self.reconfigure_inner(config)
            .instrument(self.span.clone())
            .await
    }

    async fn reconfigure_inner(&self, config: &ConfigMap) -> Result<()> {
        let snapshot = ConfigSnapshot::from_map(config)?;
        self.ensure_accepting()?;
        let deadline = Instant::now() + self.config.drain_timeout;
        self.ctx.activation.on_disconnected();
        self.ctx.activation.activate(config);

        let prev = self.current.load_full();
        match &prev {
            Some(current) if current.snapshot() == &snapshot => {
                self.refresh(current);
                return Ok(());
            }
            None if !snapshot.has_ensemble() => {
                debug!("No ensemble configured and nothing active, nothing to do");
                return Ok(());
            }
            _ => {}
        }

        let next = self.new_generation(snapshot);
        let installed = same_generation(
            &self.current.compare_and_swap(&prev, Some(Arc::clone(&next))),
            &prev,
        );
        if !installed {
            info!(
                generation = next.id(),
                "Lost reconfiguration race, discarding new generation"
            );
            next.close(deadline).await;
            return Ok(());
        }

        info!(
            generation = next.id(),
            displaced = prev.as_ref().map(|p| p.id()),
            "Configuration changed, switching generation"
        );
        // 先排入被替换代的拆除任务，保证订阅者不会在新代的 CONNECTED 之后收到旧代的 LOST
        // The displaced teardown is queued first so listeners never see its LOST after
        // the new generation's CONNECTED
        let pending = prev.as_ref().map(|displaced| displaced.begin_close());
        if let Err(e) = self.ctx.stream.submit(StreamTask::Connect(next)) {
            warn!(error = %e, "Cannot schedule connect for new generation");
        }
        if let Some(pending) = pending {
            pending.wait(deadline).await;
        }
        Ok(())
    }

    /// Tears the manager down: closes the current generation, stops accepting work,
    /// and waits for queued work to finish. The whole call is bounded by `drain_timeout`;
    /// past it the generation is withdrawn from the directory and the locator, and the
    /// call returns anyway.
    ///
    /// 停用管理器：关闭当前代，停止接收任务，并等待已排队任务完成。整个调用以 `drain_timeout` 为上限；
    /// 超过上限时该代会从目录和定位器中撤下，调用照常返回。
    pub async fn deactivate(&self) {
        self.deactivate_inner().instrument(self.span.clone()).await
    }

    async fn deactivate_inner(&self) {
        let deadline = Instant::now() + self.config.drain_timeout;
        if let Some(prev) = self.current.swap(None) {
            info!(generation = prev.id(), "Deactivating");
            prev.close(deadline).await;
        }
        self.ctx.stream.shutdown();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };
        match tokio::time::timeout_at(deadline, worker).await {
            Ok(Ok(())) => info!("Deactivated"),
            Ok(Err(e)) => warn!(error = %e, "Serialized stream worker failed"),
            Err(_) => warn!(
                timeout = ?self.config.drain_timeout,
                "Timed out waiting for the serialized stream to drain"
            ),
        }
    }

    /// Adds a listener. If a connection is live, the new listener alone receives one
    /// CONNECTED right away.
    ///
    /// 添加订阅者。若连接处于活跃状态，仅新订阅者会立即收到一次 CONNECTED。
    pub fn bind_listener(&self, listener: ListenerRef) {
        let _enter = self.span.enter();
        if !self.ctx.listeners.add(Arc::clone(&listener)) {
            debug!("Listener already bound");
            return;
        }
        let connection = self
            .current
            .load_full()
            .and_then(|current| current.live_connection());
        if let Some(connection) = connection.filter(|c| c.is_connected()) {
            deliver(listener.as_ref(), &connection, ConnectionState::Connected);
        }
    }

    pub fn unbind_listener(&self, listener: &ListenerRef) {
        self.ctx.listeners.remove(listener);
    }

    /// Waits until every task queued on the serialized stream before this call has run.
    ///
    /// 等待在本次调用之前排入串行任务流的所有任务执行完毕。
    pub async fn flush(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.ctx.stream.submit(StreamTask::Barrier(done))?;
        rx.await.map_err(|_| Error::StreamClosed)
    }

    /// Whether the current generation's client reports itself connected.
    pub fn is_connected(&self) -> bool {
        self.current
            .load_full()
            .and_then(|current| current.live_connection())
            .is_some_and(|c| c.is_connected())
    }

    /// Id of the current generation.
    pub fn current_generation(&self) -> Option<u64> {
        self.current.load_full().map(|current| current.id())
    }

    pub fn current_snapshot(&self) -> Option<ConfigSnapshot> {
        self.current
            .load_full()
            .map(|current| current.snapshot().clone())
    }

    pub fn current_phase(&self) -> Option<GenerationPhase> {
        self.current.load_full().map(|current| current.phase())
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.ctx.listeners
    }

    pub fn directory(&self) -> &Arc<ServiceDirectory> {
        &self.ctx.directory
    }

    pub fn locator(&self) -> &Arc<ConnectionLocator> {
        &self.ctx.locator
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.ctx.stream.is_accepting() {
            Ok(())
        } else {
            warn!("Manager is deactivated, ignoring lifecycle call");
            Err(Error::StreamClosed)
        }
    }

    fn new_generation(&self, snapshot: ConfigSnapshot) -> Arc<Generation> {
        let id = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        Generation::new(id, snapshot, Arc::clone(&self.ctx))
    }

    /// Re-emits CONNECTED for an unchanged configuration if the client says it is connected.
    fn refresh(&self, current: &Generation) {
        match current.live_connection().filter(|c| c.is_connected()) {
            Some(connection) => {
                debug!(
                    generation = current.id(),
                    "Configuration unchanged, refreshing listeners"
                );
                self.ctx.notify(&connection, ConnectionState::Connected);
            }
            None => debug!(
                generation = current.id(),
                "Configuration unchanged, not connected"
            ),
        }
    }
}

/// Dropping a manager that was not deactivated queues a teardown of the current
/// generation ahead of the shutdown, so its client is still closed on the stream.
/// Nothing waits for it.
impl Drop for LifecycleManager {
    fn drop(&mut self) {
        if let Some(current) = self.current.swap(None) {
            let _enter = self.span.enter();
            drop(current.begin_close());
        }
        self.ctx.stream.shutdown();
    }
}

/// Builder for [`LifecycleManager`].
///
/// [`LifecycleManager`] 的构建器。
pub struct LifecycleManagerBuilder {
    factory: Arc<dyn ClientFactory>,
    directory: Option<Arc<ServiceDirectory>>,
    locator: Option<Arc<ConnectionLocator>>,
    activation: Option<Arc<dyn ActivationHook>>,
    config: ManagerConfig,
    span: Option<Span>,
}

impl LifecycleManagerBuilder {
    fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            directory: None,
            locator: None,
            activation: None,
            config: ManagerConfig::default(),
            span: None,
        }
    }

    /// Directory the live connection and marker are registered in.
    /// Defaults to a fresh directory.
    pub fn directory(mut self, directory: Arc<ServiceDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Locator the live connection is published through.
    /// Defaults to [`ConnectionLocator::shared`].
    pub fn locator(mut self, locator: Arc<ConnectionLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn activation(mut self, activation: Arc<dyn ActivationHook>) -> Self {
        self.activation = Some(activation);
        self
    }

    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Span every log line of the manager and its stream worker is recorded in.
    ///
    /// 管理器及其任务流工作者的所有日志所在的 span。
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Builds the manager and spawns its serialized stream worker on the current
    /// tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn build(self) -> LifecycleManager {
        let span = self
            .span
            .unwrap_or_else(|| info_span!("ensemble_lifecycle"));
        let (stream, worker) = SerialStream::channel();
        let ctx = Arc::new(ManagerContext {
            factory: self.factory,
            directory: self.directory.unwrap_or_else(ServiceDirectory::new),
            locator: self.locator.unwrap_or_else(ConnectionLocator::shared),
            listeners: Arc::new(ListenerRegistry::new()),
            activation: self
                .activation
                .unwrap_or_else(|| Arc::new(NoopActivation)),
            stream,
        });
        let worker = tokio::spawn(worker.run().instrument(span.clone()));

        LifecycleManager {
            current: ArcSwapOption::empty(),
            ctx,
            next_generation: AtomicU64::new(0),
            worker: Mutex::new(Some(worker)),
            config: self.config,
            span,
        }
    }
}

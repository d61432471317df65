//! Common testing infrastructure for lifecycle tests.

use super::{LifecycleManager, StateEventSink};
use crate::{
    activation::ActivationHook,
    client::{ClientFactory, ClientSettings, ConnectionHandle, ConnectionState, CoordinationClient},
    config::{ConfigMap, ManagerConfig, keys},
    directory::{ConnectionAvailable, LiveConnection, ServiceDirectory},
    error::{Error, Result},
    listener::{ConnectionStateListener, ListenerRef},
    locator::ConnectionLocator,
};
use async_trait::async_trait;
use std::{
    sync::{
        Arc, Mutex, Once,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::Notify;

pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "ensemble_lifecycle=debug".to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A configuration map pointing at `ensemble`.
pub fn config(ensemble: &str) -> ConfigMap {
    let mut map = ConfigMap::new();
    map.insert(keys::ENSEMBLE_URL.to_string(), ensemble.to_string());
    map
}

/// Polls `predicate` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while !predicate() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    true
}

/// Identity of a connection as seen by listeners.
pub fn key_of<T: ?Sized>(connection: &Arc<T>) -> usize {
    Arc::as_ptr(connection) as *const () as usize
}

// --- Mock Client Infrastructure ---

/// A client whose state transitions are driven by the test.
pub struct MockClient {
    pub settings: ClientSettings,
    sink: StateEventSink,
    auto_connect: bool,
    fail_close: bool,
    start_behavior: StartBehavior,
    close_signal: Notify,
    connected: AtomicBool,
    started: AtomicBool,
    closed: AtomicBool,
}

/// How [`MockClient::start`] behaves before it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBehavior {
    Immediate,
    /// Blocks until the client is closed.
    UntilClosed,
    /// Blocks for a long time, ignoring `close`.
    Stuck,
}

impl MockClient {
    /// Reports `state` as the real client would.
    pub fn emit(&self, state: ConnectionState) {
        self.connected.store(state.is_connected(), Ordering::SeqCst);
        self.sink.emit(state);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn key(self: &Arc<Self>) -> usize {
        key_of(self)
    }
}

#[async_trait]
impl CoordinationClient for MockClient {
    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        match self.start_behavior {
            StartBehavior::Immediate => {}
            StartBehavior::UntilClosed => {
                tokio::select! {
                    _ = self.close_signal.notified() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_secs(10)) => {}
                }
            }
            StartBehavior::Stuck => tokio::time::sleep(Duration::from_secs(10)).await,
        }
        if self.auto_connect {
            self.emit(ConnectionState::Connected);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.close_signal.notify_one();
        if self.fail_close {
            return Err(Error::Client("close refused".into()));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Builds [`MockClient`]s and keeps every one of them for inspection.
pub struct MockFactory {
    clients: Mutex<Vec<Arc<MockClient>>>,
    pub auto_connect: AtomicBool,
    pub fail_close: AtomicBool,
    pub fail_build: AtomicBool,
    pub start_behavior: Mutex<StartBehavior>,
}

impl Default for MockFactory {
    fn default() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            auto_connect: AtomicBool::new(true),
            fail_close: AtomicBool::new(false),
            fail_build: AtomicBool::new(false),
            start_behavior: Mutex::new(StartBehavior::Immediate),
        }
    }
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn clients(&self) -> Vec<Arc<MockClient>> {
        self.clients.lock().unwrap().clone()
    }

    pub fn built(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<MockClient> {
        self.clients.lock().unwrap().last().cloned().unwrap()
    }
}

impl ClientFactory for MockFactory {
    fn build(&self, settings: &ClientSettings, events: StateEventSink) -> Result<ConnectionHandle> {
        if self.fail_build.load(Ordering::SeqCst) {
            return Err(Error::Client("build refused".into()));
        }
        let client = Arc::new(MockClient {
            settings: settings.clone(),
            sink: events,
            auto_connect: self.auto_connect.load(Ordering::SeqCst),
            fail_close: self.fail_close.load(Ordering::SeqCst),
            start_behavior: *self.start_behavior.lock().unwrap(),
            close_signal: Notify::new(),
            connected: AtomicBool::new(false),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.clients.lock().unwrap().push(client.clone());
        Ok(client)
    }
}

// --- Observers ---

/// Records every notification it receives, in order.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<(usize, ConnectionState)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(usize, ConnectionState)> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.events().into_iter().map(|(_, state)| state).collect()
    }
}

impl ConnectionStateListener for RecordingListener {
    fn state_changed(&self, connection: &ConnectionHandle, state: ConnectionState) {
        self.events.lock().unwrap().push((key_of(connection), state));
    }
}

/// Counts activation hook calls.
#[derive(Default)]
pub struct RecordingActivation {
    pub activated: AtomicUsize,
    pub disconnected: AtomicUsize,
    pub states: Mutex<Vec<ConnectionState>>,
}

impl ActivationHook for RecordingActivation {
    fn activate(&self, _config: &ConfigMap) {
        self.activated.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnected(&self) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }

    fn state_changed(&self, _connection: &ConnectionHandle, state: ConnectionState) {
        self.states.lock().unwrap().push(state);
    }
}

// --- Fixture ---

pub struct Fixture {
    pub manager: Arc<LifecycleManager>,
    pub factory: Arc<MockFactory>,
    pub directory: Arc<ServiceDirectory>,
    pub locator: Arc<ConnectionLocator>,
    pub activation: Arc<RecordingActivation>,
    pub listener: Arc<RecordingListener>,
}

impl Fixture {
    /// A manager with private directory and locator and one bound recording listener.
    pub fn new() -> Self {
        Self::with_factory(MockFactory::new())
    }

    pub fn with_factory(factory: Arc<MockFactory>) -> Self {
        Self::with_config(factory, ManagerConfig::default())
    }

    pub fn with_config(factory: Arc<MockFactory>, config: ManagerConfig) -> Self {
        init_tracing();
        let directory = ServiceDirectory::new();
        let locator = ConnectionLocator::new();
        let activation = Arc::new(RecordingActivation::default());
        let manager = LifecycleManager::builder(factory.clone())
            .directory(directory.clone())
            .locator(locator.clone())
            .activation(activation.clone())
            .config(config)
            .build();
        let listener = RecordingListener::new();
        manager.bind_listener(listener.clone());
        Self {
            manager: Arc::new(manager),
            factory,
            directory,
            locator,
            activation,
            listener,
        }
    }

    /// Waits until the latest client has entered `start`.
    pub async fn wait_started(&self) {
        let factory = &self.factory;
        let started = eventually(Duration::from_secs(2), || {
            factory.built() > 0 && factory.last().is_started()
        })
        .await;
        assert!(started, "client was never started");
    }

    pub fn listener_ref(&self) -> ListenerRef {
        self.listener.clone()
    }

    /// Lets follow-up work queued by earlier tasks (reconnects, state events) run.
    pub async fn settle(&self) {
        for _ in 0..8 {
            if self.manager.flush().await.is_err() {
                return;
            }
        }
    }
}

/// Asserts that `client` is the registered and published connection of the current generation.
pub fn assert_published(fixture: &Fixture, client: &Arc<MockClient>) {
    let live = fixture.directory.lookup::<LiveConnection>().unwrap();
    assert_eq!(key_of(&live.handle), client.key());
    assert_eq!(Some(live.generation), fixture.manager.current_generation());
    assert!(fixture.directory.is_registered::<ConnectionAvailable>());

    let located = fixture.locator.connection().unwrap();
    assert!(Arc::ptr_eq(&located, &live));
}

pub fn assert_unpublished(fixture: &Fixture) {
    assert!(fixture.directory.lookup::<LiveConnection>().is_none());
    assert!(!fixture.directory.is_registered::<ConnectionAvailable>());
    assert!(fixture.locator.connection().is_none());
}

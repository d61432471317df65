//! tests/common/harness.rs
use async_trait::async_trait;
use ensemble_lifecycle::{
    ClientFactory, ClientSettings, ConfigMap, ConnectionHandle, ConnectionState,
    CoordinationClient, ListenerRef, Result, StateEventSink, config::keys,
    listener::ConnectionStateListener,
};
use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, Once, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use tracing_subscriber::fmt::format::FmtSpan;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "ensemble_lifecycle=debug,lifecycle=info".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_test_writer()
            .init();
    });
}

/// Configuration with a short retry interval so tests stay fast.
pub fn config(ensemble: &str) -> ConfigMap {
    let mut map = ConfigMap::new();
    map.insert(keys::ENSEMBLE_URL.to_string(), ensemble.to_string());
    map.insert(keys::RETRY_MAX_COUNT.to_string(), "3".to_string());
    map.insert(keys::RETRY_INTERVAL_MS.to_string(), "10".to_string());
    map
}

/// Polls `predicate` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// --- Simulated Ensemble ---

/// An in-memory stand-in for a coordination ensemble.
///
/// Members can be taken down and brought back, sessions can be expired, and the
/// network between clients and members can be partitioned.
#[derive(Default)]
pub struct SimulatedEnsemble {
    up: Mutex<HashSet<String>>,
    partitioned: AtomicBool,
    clients: Mutex<Vec<Arc<SimClient>>>,
}

impl SimulatedEnsemble {
    pub fn with_members(members: &[&str]) -> Arc<Self> {
        let ensemble = Self::default();
        ensemble
            .up
            .lock()
            .unwrap()
            .extend(members.iter().map(|m| m.to_string()));
        Arc::new(ensemble)
    }

    pub fn start_member(&self, member: &str) {
        self.up.lock().unwrap().insert(member.to_string());
    }

    fn reachable(&self, endpoints: &[String]) -> bool {
        if self.partitioned.load(Ordering::SeqCst) {
            return false;
        }
        let up = self.up.lock().unwrap();
        endpoints.iter().any(|e| up.contains(e))
    }

    fn live_clients(&self) -> Vec<Arc<SimClient>> {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !c.closed.load(Ordering::SeqCst))
            .cloned()
            .collect()
    }

    /// Expires the session of every connected client.
    pub fn expire_sessions(&self) {
        for client in self.live_clients() {
            if client.connected.swap(false, Ordering::SeqCst) {
                info!(client = client.id, "Expiring session");
                client.sink.emit(ConnectionState::Lost);
            }
        }
    }

    /// Cuts every client off the ensemble without expiring sessions.
    pub fn partition(&self) {
        self.partitioned.store(true, Ordering::SeqCst);
        for client in self.live_clients() {
            if client.connected.swap(false, Ordering::SeqCst) {
                client.sink.emit(ConnectionState::Suspended);
            }
        }
    }

    pub fn heal(&self) {
        self.partitioned.store(false, Ordering::SeqCst);
        for client in self.live_clients() {
            if client.established.load(Ordering::SeqCst)
                && !client.connected.swap(true, Ordering::SeqCst)
            {
                client.sink.emit(ConnectionState::Reconnected);
            }
        }
    }

    /// Number of clients ever built against this ensemble.
    pub fn clients_built(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Number of clients not yet closed.
    pub fn open_clients(&self) -> usize {
        self.live_clients().len()
    }
}

/// A client that connects to a [`SimulatedEnsemble`] following its retry policy.
pub struct SimClient {
    id: usize,
    this: Weak<SimClient>,
    settings: ClientSettings,
    sink: StateEventSink,
    ensemble: Arc<SimulatedEnsemble>,
    connected: AtomicBool,
    established: AtomicBool,
    closed: AtomicBool,
    connector: Mutex<Option<JoinHandle<()>>>,
}

impl SimClient {
    async fn connect_loop(self: Arc<Self>) {
        let mut retries = 0;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            if self.ensemble.reachable(&self.settings.endpoints) {
                self.connected.store(true, Ordering::SeqCst);
                self.established.store(true, Ordering::SeqCst);
                debug!(client = self.id, "Connected to simulated ensemble");
                self.sink.emit(ConnectionState::Connected);
                return;
            }
            match self.settings.retry_policy.allow_retry(retries) {
                Some(interval) => {
                    retries += 1;
                    tokio::time::sleep(interval).await;
                }
                None => {
                    debug!(client = self.id, retries, "Retries exhausted");
                    self.sink.emit(ConnectionState::Lost);
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl CoordinationClient for SimClient {
    async fn start(&self) -> Result<()> {
        let Some(this) = self.this.upgrade() else {
            return Ok(());
        };
        let connector = tokio::spawn(this.connect_loop());
        *self.connector.lock().unwrap() = Some(connector);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if let Some(connector) = self.connector.lock().unwrap().take() {
            connector.abort();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Builds [`SimClient`]s against one ensemble.
pub struct SimFactory {
    pub ensemble: Arc<SimulatedEnsemble>,
    next_id: AtomicUsize,
}

impl SimFactory {
    pub fn new(ensemble: Arc<SimulatedEnsemble>) -> Arc<Self> {
        Arc::new(Self {
            ensemble,
            next_id: AtomicUsize::new(0),
        })
    }
}

impl ClientFactory for SimFactory {
    fn build(&self, settings: &ClientSettings, events: StateEventSink) -> Result<ConnectionHandle> {
        let client = Arc::new_cyclic(|this| SimClient {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            this: this.clone(),
            settings: settings.clone(),
            sink: events,
            ensemble: self.ensemble.clone(),
            connected: AtomicBool::new(false),
            established: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            connector: Mutex::new(None),
        });
        self.ensemble.clients.lock().unwrap().push(client.clone());
        Ok(client)
    }
}

// --- Observers ---

/// Records every state it is notified of.
#[derive(Default)]
pub struct StateRecorder {
    states: Mutex<Vec<ConnectionState>>,
}

impl StateRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn as_listener(self: &Arc<Self>) -> ListenerRef {
        self.clone()
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<ConnectionState> {
        self.states.lock().unwrap().last().copied()
    }
}

impl ConnectionStateListener for StateRecorder {
    fn state_changed(&self, _connection: &ConnectionHandle, state: ConnectionState) {
        self.states.lock().unwrap().push(state);
    }
}

//! Shared fakes and helpers between unit tests and integration tests.

use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;

use crate::list::ServerChangeEvent;
use crate::list::ServerEntry;
use crate::list::ServerId;
use crate::list::ServerTracker;
use crate::list::ServiceMask;
use crate::network::UpdateRpc;
use crate::network::UpdateRpcFactory;
use crate::proto::ServerListPayload;
use crate::proto::ServiceType;
use crate::NetworkError;
use crate::RosterConfig;

/// Install a log subscriber once so `RUST_LOG`-filtered output shows up
/// in test runs. Safe to call from every test; later calls are no-ops.
pub fn enable_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with a pool/timeout suitable for deterministic tests.
pub fn test_config(
    concurrent_rpcs: usize,
    rpc_timeout_ns: u64,
) -> RosterConfig {
    let mut config = RosterConfig::default();
    config.updater.concurrent_rpcs = concurrent_rpcs;
    config.updater.rpc_timeout_ns = rpc_timeout_ns;
    config
}

pub fn storage_and_membership() -> ServiceMask {
    ServiceMask::empty()
        .with(ServiceType::MasterService)
        .with(ServiceType::MembershipService)
}

/// Tracker that records every event it is handed.
#[derive(Default)]
pub struct RecordingTracker {
    events: Mutex<Vec<(ServerId, ServerChangeEvent)>>,
    callbacks_fired: AtomicUsize,
}

impl RecordingTracker {
    pub fn events(&self) -> Vec<(ServerId, ServerChangeEvent)> {
        self.events.lock().clone()
    }

    pub fn callbacks_fired(&self) -> usize {
        self.callbacks_fired.load(Ordering::SeqCst)
    }
}

impl ServerTracker for RecordingTracker {
    fn enqueue_change(
        &self,
        entry: &ServerEntry,
        event: ServerChangeEvent,
    ) {
        self.events.lock().push((entry.id, event));
    }

    fn fire_callback(&self) {
        self.callbacks_fired.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted behavior of one fake RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeRpcOutcome {
    Succeed,
    ServerNotUp,
    /// A non-ServerNotUp error; fatal for the updater.
    Fail,
    /// `is_ready` never turns true; completes only via timeout or cancel.
    NeverReady,
    ReadyAfter(Duration),
}

struct FakeFactoryState {
    /// Outcomes consumed per `begin_update` call; `Succeed` once drained.
    script: Mutex<VecDeque<FakeRpcOutcome>>,
    begun: Mutex<Vec<(ServerId, ServerListPayload)>>,
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
    cancelled: AtomicUsize,
}

/// [`UpdateRpcFactory`] with scripted outcomes and concurrency accounting.
pub struct FakeRpcFactory {
    state: Arc<FakeFactoryState>,
}

impl Default for FakeRpcFactory {
    fn default() -> Self {
        Self {
            state: Arc::new(FakeFactoryState {
                script: Mutex::new(VecDeque::new()),
                begun: Mutex::new(Vec::new()),
                outstanding: AtomicUsize::new(0),
                max_outstanding: AtomicUsize::new(0),
                cancelled: AtomicUsize::new(0),
            }),
        }
    }
}

impl FakeRpcFactory {
    /// Queue outcomes for the next `begin_update` calls, in order.
    pub fn script(
        &self,
        outcomes: impl IntoIterator<Item = FakeRpcOutcome>,
    ) {
        self.state.script.lock().extend(outcomes);
    }

    /// Every payload handed out so far, with its target.
    pub fn begun(&self) -> Vec<(ServerId, ServerListPayload)> {
        self.state.begun.lock().clone()
    }

    pub fn begun_count(&self) -> usize {
        self.state.begun.lock().len()
    }

    /// Most RPCs that were ever outstanding at the same time.
    pub fn max_outstanding(&self) -> usize {
        self.state.max_outstanding.load(Ordering::SeqCst)
    }

    pub fn cancelled_count(&self) -> usize {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Spin until `predicate` holds or the deadline expires.
    pub fn wait_until(
        &self,
        deadline: Duration,
        predicate: impl Fn(&Self) -> bool,
    ) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if predicate(self) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        predicate(self)
    }
}

impl UpdateRpcFactory for FakeRpcFactory {
    fn begin_update(
        &self,
        target: ServerId,
        _service_locator: &str,
        payload: &ServerListPayload,
    ) -> Box<dyn UpdateRpc> {
        let outcome = self
            .state
            .script
            .lock()
            .pop_front()
            .unwrap_or(FakeRpcOutcome::Succeed);
        self.state.begun.lock().push((target, payload.clone()));

        let outstanding = self.state.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_outstanding.fetch_max(outstanding, Ordering::SeqCst);

        Box::new(FakeRpc {
            target,
            outcome,
            started: Instant::now(),
            settled: false,
            factory: Arc::clone(&self.state),
        })
    }
}

struct FakeRpc {
    target: ServerId,
    outcome: FakeRpcOutcome,
    started: Instant,
    settled: bool,
    factory: Arc<FakeFactoryState>,
}

impl FakeRpc {
    fn settle(&mut self) {
        if !self.settled {
            self.settled = true;
            self.factory.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl UpdateRpc for FakeRpc {
    fn is_ready(&self) -> bool {
        match self.outcome {
            FakeRpcOutcome::NeverReady => false,
            FakeRpcOutcome::ReadyAfter(delay) => self.started.elapsed() >= delay,
            _ => true,
        }
    }

    fn wait(&mut self) -> std::result::Result<(), NetworkError> {
        self.settle();
        match self.outcome {
            FakeRpcOutcome::ServerNotUp => Err(NetworkError::ServerNotUp(self.target)),
            FakeRpcOutcome::Fail => Err(NetworkError::ConnectError(
                "scripted failure".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn cancel(&mut self) {
        if !self.settled {
            self.factory.cancelled.fetch_add(1, Ordering::SeqCst);
        }
        self.settle();
    }
}

impl Drop for FakeRpc {
    fn drop(&mut self) {
        self.settle();
    }
}

//! Connection pool lifecycle, reconnection and health probing

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::state::{ConnectionSettings, ConnectionState, ConnectionStatus, Signal};
use crate::store::{RecordStore, StoreConnector, StoreError, StoreResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn timeout_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

/// Owns the store handle and keeps it reachable.
///
/// The handle is replaced wholesale on every successful (re)connection;
/// callers fetch it with [`ConnectionManager::store`] for each unit of work
/// and must not hold it across long waits.
///
/// At most one reconnect loop and one health loop run per manager. Faults
/// and recoveries from every source are funnelled through one signal channel
/// and applied by a single transition function.
///
/// Must be created inside a Tokio runtime.
pub struct ConnectionManager<C: StoreConnector> {
    connector: C,
    settings: ConnectionSettings,
    store: RwLock<Option<C::Store>>,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    retry_delay: Mutex<Duration>,
    last_error: Mutex<Option<String>>,
    signals: mpsc::UnboundedSender<Signal>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl<C: StoreConnector> ConnectionManager<C> {
    pub fn new(connector: C, settings: ConnectionSettings) -> Arc<Self> {
        let (signals, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let manager = Arc::new(Self {
            connector,
            settings,
            store: RwLock::new(None),
            state,
            attempts: AtomicU32::new(0),
            retry_delay: Mutex::new(settings.reconnect_delay),
            last_error: Mutex::new(None),
            signals,
            dispatcher: Mutex::new(None),
            reconnect_task: Mutex::new(None),
            health_task: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        });

        let dispatcher = tokio::spawn(Self::dispatch(Arc::downgrade(&manager), receiver));
        *lock(&manager.dispatcher) = Some(dispatcher);
        manager
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Consecutive failed attempts in the current backoff period
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Delay the reconnect loop currently waits between attempts
    pub fn retry_delay(&self) -> Duration {
        *lock(&self.retry_delay)
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    pub fn is_reconnect_armed(&self) -> bool {
        lock(&self.reconnect_task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "connection state changed");
        }
    }

    fn record_error(&self, reason: Option<String>) {
        *lock(&self.last_error) = reason;
    }

    fn reset_backoff(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        *lock(&self.retry_delay) = self.settings.reconnect_delay;
    }

    /// The current store handle
    pub async fn store(&self) -> StoreResult<C::Store> {
        self.store.read().await.clone().ok_or(StoreError::NotConnected)
    }

    /// Open a new pool, probe it, and swap it in. The previous pool is
    /// closed after the swap; a failed attempt leaves it in place.
    async fn establish(&self) -> StoreResult<()> {
        let fresh = self.connector.open().await?;
        if let Err(e) = fresh.probe().await {
            fresh.close().await;
            return Err(e);
        }

        let previous = self.store.write().await.replace(fresh);
        if let Some(previous) = previous {
            previous.close().await;
        }
        Ok(())
    }

    /// Establish a new pool, replacing any existing one.
    ///
    /// On failure the error is returned, the state becomes `Reconnecting`
    /// and the reconnect loop is armed. A manager that was shut down arms
    /// nothing and ends in `Failed`.
    pub async fn connect(self: &Arc<Self>) -> StoreResult<()> {
        self.set_state(ConnectionState::Connecting);
        match self.establish().await {
            Ok(()) => {
                self.stop_reconnect();
                self.reset_backoff();
                self.record_error(None);
                self.set_state(ConnectionState::Connected);
                info!(target = %self.connector.describe(), "connected");
                Ok(())
            }
            Err(e) => {
                error!(target = %self.connector.describe(), error = %e, "connect failed");
                self.record_error(Some(e.to_string()));
                if self.shut_down.load(Ordering::SeqCst) {
                    self.set_state(ConnectionState::Failed);
                } else {
                    self.set_state(ConnectionState::Reconnecting);
                    self.start_reconnect();
                }
                Err(e)
            }
        }
    }

    /// Queue a signal for the transition function
    pub fn signal(&self, signal: Signal) {
        if self.signals.send(signal).is_err() {
            debug!("signal dropped; dispatcher stopped");
        }
    }

    /// Feed a store error into the fault path if it is a connectivity error
    pub fn report(&self, err: &StoreError) {
        if err.is_connectivity() {
            self.signal(Signal::Fault(err.to_string()));
        }
    }

    async fn dispatch(manager: Weak<Self>, mut receiver: mpsc::UnboundedReceiver<Signal>) {
        while let Some(signal) = receiver.recv().await {
            let Some(manager) = manager.upgrade() else {
                break;
            };
            manager.apply(signal);
        }
    }

    /// The single state-transition function
    fn apply(self: &Arc<Self>, signal: Signal) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let current = self.state();

        match signal {
            Signal::Fault(reason) => {
                self.record_error(Some(reason.clone()));
                if current == ConnectionState::Reconnecting {
                    debug!(%reason, "fault while already reconnecting");
                    return;
                }
                warn!(%reason, from = %current, "connection fault");
                self.set_state(ConnectionState::Reconnecting);
                self.start_reconnect();
            }
            Signal::Restored => {
                if matches!(current, ConnectionState::Connected | ConnectionState::Connecting) {
                    return;
                }
                self.stop_reconnect();
                self.reset_backoff();
                self.record_error(None);
                self.set_state(ConnectionState::Connected);
            }
        }
    }

    /// Arm the reconnect loop, cancelling any loop already armed.
    pub fn start_reconnect(self: &Arc<Self>) {
        let mut slot = lock(&self.reconnect_task);
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(tokio::spawn(Self::reconnect_loop(Arc::downgrade(self))));
    }

    /// Cancel the reconnect loop; a no-op when none is armed
    pub fn stop_reconnect(&self) {
        if let Some(task) = lock(&self.reconnect_task).take() {
            task.abort();
        }
    }

    async fn reconnect_loop(manager: Weak<Self>) {
        loop {
            let Some(delay) = manager.upgrade().map(|m| m.retry_delay()) else {
                return;
            };
            tokio::time::sleep(delay).await;

            let Some(manager) = manager.upgrade() else {
                return;
            };
            if manager.state() != ConnectionState::Reconnecting {
                debug!(state = %manager.state(), "reconnect loop no longer needed");
                return;
            }

            let attempt = manager.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let max = manager.settings.max_reconnect_attempts;
            match manager.establish().await {
                Ok(()) => {
                    info!(attempt, "reconnected");
                    manager.signal(Signal::Restored);
                    return;
                }
                Err(e) => {
                    warn!(attempt, max, error = %e, "reconnect attempt failed");
                    manager.record_error(Some(e.to_string()));
                    if attempt >= max {
                        let escalated = manager.settings.escalated_delay();
                        manager.attempts.store(0, Ordering::SeqCst);
                        *lock(&manager.retry_delay) = escalated;
                        warn!(
                            delay_ms = timeout_ms(escalated),
                            "reconnect attempts exhausted; retrying less often"
                        );
                    }
                }
            }
        }
    }

    /// Probe the current handle within the status timeout
    async fn probe_current(&self) -> StoreResult<()> {
        let store = self.store().await?;
        match tokio::time::timeout(self.settings.status_timeout, store.probe()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout_ms(self.settings.status_timeout))),
        }
    }

    /// Probe now and report the result as a signal. Returns whether the
    /// probe succeeded.
    pub async fn health_check(&self) -> bool {
        let result = self.probe_current().await;
        let state = self.state();
        match result {
            Ok(()) => {
                if matches!(state, ConnectionState::Failed | ConnectionState::Reconnecting) {
                    info!(from = %state, "health probe succeeded; connectivity restored");
                    self.signal(Signal::Restored);
                }
                true
            }
            Err(e) => {
                if state == ConnectionState::Connected {
                    warn!(error = %e, "health probe failed");
                    self.signal(Signal::Fault(e.to_string()));
                } else {
                    debug!(error = %e, %state, "health probe failed");
                }
                false
            }
        }
    }

    /// Re-verify connectivity before acting on it. Faults are reported.
    pub async fn verify(&self) -> bool {
        match self.probe_current().await {
            Ok(()) => true,
            Err(e) => {
                self.signal(Signal::Fault(e.to_string()));
                false
            }
        }
    }

    /// Start the periodic health probe, replacing any running one.
    pub fn start_health_monitor(self: &Arc<Self>) {
        let mut slot = lock(&self.health_task);
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let interval = self.settings.health_interval;
        *slot = Some(tokio::spawn(Self::health_loop(Arc::downgrade(self), interval)));
    }

    pub fn stop_health_monitor(&self) {
        if let Some(task) = lock(&self.health_task).take() {
            task.abort();
        }
    }

    async fn health_loop(manager: Weak<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(manager) = manager.upgrade() else {
                return;
            };
            manager.health_check().await;
        }
    }

    /// Record count and connectivity, bounded by the status timeout. Never
    /// fails: errors and timeouts are reported as a disconnection.
    pub async fn status(&self) -> ConnectionStatus {
        let query = async {
            let store = self.store().await?;
            store.record_count().await
        };
        let result = match tokio::time::timeout(self.settings.status_timeout, query).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout_ms(self.settings.status_timeout))),
        };

        match result {
            Ok(record_count) => ConnectionStatus {
                record_count,
                is_connected: true,
                connection_error: None,
                reconnecting: self.state() == ConnectionState::Reconnecting,
            },
            Err(e) => {
                warn!(error = %e, "status query failed");
                self.signal(Signal::Fault(e.to_string()));
                ConnectionStatus {
                    record_count: 0,
                    is_connected: false,
                    connection_error: Some(e.to_string()),
                    reconnecting: !self.shut_down.load(Ordering::SeqCst),
                }
            }
        }
    }

    /// Stop every background loop and close the pool.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.stop_reconnect();
        self.stop_health_monitor();
        if let Some(task) = lock(&self.dispatcher).take() {
            task.abort();
        }
        let current = self.store.write().await.take();
        if let Some(store) = current {
            store.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
        info!("connection manager shut down");
    }
}

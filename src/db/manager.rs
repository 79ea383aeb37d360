//! Connection manager: owns the active pool and the probe-and-failover loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::candidates::{HostCandidate, HostResolver, TargetConfig};
use super::connector::Connector;
use super::error::DbError;
use super::pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection, Slots};
use super::retry::RetryPolicy;
use super::state::{ConnectionEvent, ConnectionState, ConnectionStatus, Transition};

const HISTORY_LEN: usize = 32;
const SIGNAL_BUFFER: usize = 32;

/// Everything the manager needs to find, open and keep a database connection.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub targets: TargetConfig,
    pub pool: PoolConfig,
    pub retry: RetryPolicy,
    /// Resolve each candidate's host name before connecting to it.
    pub dns_probe: bool,
    /// Upper bound for the health endpoint's liveness query.
    pub health_timeout: Duration,
}

/// A physical connection of pool `generation` dropped.
#[derive(Debug)]
struct LostSignal {
    generation: u64,
    reason: String,
}

/// Single owner of the active pool.
///
/// Handlers share it through `Arc`. Every change of the active pool happens
/// while holding `switch_lock`; readers load the pool pointer lock-free.
pub struct ConnectionManager<C: Connector> {
    settings: DatabaseSettings,
    connector: Arc<C>,
    resolver: Arc<dyn HostResolver>,
    slots: Arc<Slots<C>>,
    active: ArcSwapOption<ConnectionPool<C>>,
    last_known_good: ArcSwapOption<HostCandidate>,
    switch_lock: tokio::sync::Mutex<()>,
    next_generation: AtomicU64,
    status: watch::Sender<ConnectionStatus>,
    history: Mutex<VecDeque<Transition>>,
    signals: mpsc::Sender<LostSignal>,
    signal_rx: Mutex<Option<mpsc::Receiver<LostSignal>>>,
    shutdown: watch::Sender<bool>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        settings: DatabaseSettings,
        connector: C,
        resolver: impl HostResolver + 'static,
    ) -> Arc<Self> {
        let (signals, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let (status, _) = watch::channel(ConnectionStatus::default());
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            slots: Slots::new(settings.pool.max_connections),
            settings,
            connector: Arc::new(connector),
            resolver: Arc::new(resolver),
            active: ArcSwapOption::empty(),
            last_known_good: ArcSwapOption::empty(),
            switch_lock: tokio::sync::Mutex::new(()),
            next_generation: AtomicU64::new(0),
            status,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LEN)),
            signals,
            signal_rx: Mutex::new(Some(signal_rx)),
            shutdown,
        })
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Receives a new status snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Most recent state transitions, oldest first.
    pub fn history(&self) -> Vec<Transition> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Current probe order.
    pub fn candidates(&self) -> Vec<HostCandidate> {
        let good = self.last_known_good.load_full();
        self.settings.targets.candidates(good.as_deref())
    }

    pub fn active_host(&self) -> Option<HostCandidate> {
        self.active.load_full().map(|pool| pool.target().clone())
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.active.load_full().map(|pool| pool.stats())
    }

    fn active_generation(&self) -> Option<u64> {
        self.active.load_full().map(|pool| pool.generation())
    }

    fn apply(&self, event: ConnectionEvent, update: impl FnOnce(&mut ConnectionStatus)) {
        let policy = &self.settings.retry;
        self.status.send_modify(|status| {
            let from = status.state;
            let to = from.on(event, policy);
            if from != to {
                tracing::info!("Database connection state {:?} -> {:?}", from, to);
                let now = Utc::now();
                status.changed_at = now;
                let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
                if history.len() == HISTORY_LEN {
                    history.pop_front();
                }
                history.push_back(Transition { from, to, at: now });
            }
            status.state = to;
            update(status);
        });
    }

    /// Resolves once the manager is `Fatal`, immediately if it already is.
    pub async fn fatal(&self) {
        let mut status = self.subscribe();
        loop {
            let state = status.borrow_and_update().state;
            if state == ConnectionState::Fatal {
                return;
            }
            if status.changed().await.is_err() {
                return;
            }
        }
    }

    /// Hands out a connection from the active pool.
    ///
    /// Callers never see probe failures: a pool that cannot reach its host
    /// signals the supervisor and the caller gets `NotConnected`.
    pub async fn acquire(&self) -> Result<PooledConnection<C>, DbError> {
        // A swap can retire the pool we loaded; one reload covers that race.
        for _ in 0..2 {
            let status = self.status();
            if status.state == ConnectionState::Fatal {
                return Err(DbError::FatalDisconnected {
                    passes: status.failed_passes,
                });
            }
            let pool = self.active.load_full().ok_or(DbError::NotConnected)?;

            match pool.acquire().await {
                Ok(conn) => return Ok(conn),
                Err(DbError::NotConnected) if pool.is_retired() => continue,
                Err(e @ DbError::PoolExhausted { .. }) => return Err(e),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(
                        "Acquire from {} failed: {}",
                        pool.target().address(),
                        e
                    );
                    self.signal_lost(pool.generation(), e.to_string());
                    return Err(DbError::NotConnected);
                }
                Err(e) => return Err(e),
            }
        }
        Err(DbError::NotConnected)
    }

    /// Returns a connection to its pool.
    pub fn release(&self, conn: PooledConnection<C>) {
        drop(conn);
    }

    /// Marks `conn` broken and tells the supervisor its pool lost a connection.
    pub fn report_connection_lost(&self, conn: &mut PooledConnection<C>, reason: &str) {
        conn.mark_broken();
        self.signal_lost(conn.generation(), reason.to_string());
    }

    fn signal_lost(&self, generation: u64, reason: String) {
        match self.signals.try_send(LostSignal { generation, reason }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Lost-connection signal dropped, recovery already pending");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Lost-connection signal dropped, supervisor not running");
            }
        }
    }

    /// Walks the candidate list once and returns the first pool that answers.
    pub async fn probe_pass(&self) -> Result<ConnectionPool<C>, DbError> {
        let mut last_error = DbError::NotConnected;

        for candidate in self.candidates() {
            if self.settings.dns_probe {
                if let Err(e) = self.resolver.resolve(&candidate.host, candidate.port).await {
                    tracing::warn!(
                        "Skipping {:?} candidate {}: {}",
                        candidate.source,
                        candidate.address(),
                        e
                    );
                    last_error = e;
                    continue;
                }
            }

            let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(
                "Trying {:?} candidate {} (generation {})",
                candidate.source,
                candidate.address(),
                generation
            );
            match ConnectionPool::open(
                candidate.clone(),
                Arc::clone(&self.connector),
                self.settings.pool.clone(),
                Arc::clone(&self.slots),
                generation,
            )
            .await
            {
                Ok(pool) => {
                    tracing::info!(
                        "Connected to MySQL at {} ({:?}), database {}",
                        candidate.address(),
                        candidate.source,
                        candidate.database
                    );
                    return Ok(pool);
                }
                Err(e) => {
                    tracing::warn!("Candidate {} failed: {}", candidate.address(), e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn install(&self, pool: ConnectionPool<C>, event: ConnectionEvent) {
        let _switch = self.switch_lock.lock().await;
        let target = pool.target().clone();
        let previous = self.active.swap(Some(Arc::new(pool)));
        self.last_known_good.store(Some(Arc::new(target.clone())));
        self.apply(event, |status| {
            status.active_host = Some(target.address());
            status.failed_passes = 0;
            status.last_error = None;
        });

        if let Some(old) = previous {
            old.retire().await;
        }
    }

    async fn enter_fatal(&self, passes: u32, error: &DbError) {
        let _switch = self.switch_lock.lock().await;
        let previous = self.active.swap(None);
        self.apply(ConnectionEvent::PassFailed { passes }, |status| {
            status.active_host = None;
            status.failed_passes = passes;
            status.last_error = Some(error.to_string());
        });
        tracing::error!(
            "Giving up on the database after {} failed probe passes: {}",
            passes,
            error
        );

        if let Some(old) = previous {
            old.retire().await;
        }
    }

    /// Opens a pool on `target` and makes it the active one.
    pub async fn reconfigure(&self, target: HostCandidate) -> Result<(), DbError> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pool = ConnectionPool::open(
            target,
            Arc::clone(&self.connector),
            self.settings.pool.clone(),
            Arc::clone(&self.slots),
            generation,
        )
        .await?;
        self.install(pool, ConnectionEvent::Reconfigured).await;
        Ok(())
    }

    /// Probes until a candidate answers or bounded retries run out.
    pub async fn establish(&self) -> Result<(), DbError> {
        let mut delays = self.settings.retry.backoff.delays();
        let mut failed: u32 = 0;

        loop {
            self.apply(ConnectionEvent::ProbeStarted, |_| {});
            let error = match self.probe_pass().await {
                Ok(pool) => {
                    self.install(pool, ConnectionEvent::ProbeSucceeded).await;
                    return Ok(());
                }
                Err(e) => e,
            };

            failed += 1;
            if !self.settings.retry.allows_another_pass(failed) {
                self.enter_fatal(failed, &error).await;
                return Err(DbError::FatalDisconnected { passes: failed });
            }

            let delay = delays.next().unwrap_or(Duration::from_secs(5));
            tracing::warn!(
                "Probe pass {} failed ({}), retrying in {:?}",
                failed,
                error,
                delay
            );
            self.apply(ConnectionEvent::PassFailed { passes: failed }, |status| {
                status.failed_passes = failed;
                status.last_error = Some(error.to_string());
            });
            tokio::time::sleep(delay).await;
        }
    }

    /// Starts the background task that connects and reconnects.
    ///
    /// Returns `None` when the supervisor was already started.
    pub fn spawn_supervisor(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let signals = self
            .signal_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let manager = Arc::clone(self);
        Some(tokio::spawn(async move { manager.supervise(signals).await }))
    }

    async fn supervise(&self, mut signals: mpsc::Receiver<LostSignal>) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                outcome = self.establish() => {
                    if let Err(e) = outcome {
                        tracing::error!("Automatic reconnection stopped: {}", e);
                    }
                }
                _ = shutdown_requested(&mut shutdown) => return,
            }

            loop {
                let signal = tokio::select! {
                    signal = signals.recv() => signal,
                    _ = shutdown_requested(&mut shutdown) => return,
                };
                let Some(LostSignal { generation, reason }) = signal else {
                    return;
                };

                if self.active_generation() != Some(generation) {
                    tracing::debug!("Ignoring lost-connection signal from retired pool {}", generation);
                    continue;
                }
                tracing::warn!("Connection to the active host dropped: {}", reason);
                self.apply(ConnectionEvent::ConnectionLost, |status| {
                    status.last_error = Some(reason);
                });
                break;
            }
        }
    }

    /// Stops the supervisor and closes the active pool.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let _switch = self.switch_lock.lock().await;
        if let Some(pool) = self.active.swap(None) {
            pool.retire().await;
        }
    }

    /// Runs the liveness query on a pooled connection within the health timeout.
    pub async fn health_check(&self) -> Result<(), DbError> {
        let timeout = self.settings.health_timeout;
        let check = async {
            let mut conn = self.acquire().await?;
            let pinged = self.connector.ping(&mut *conn).await;
            if let Err(e) = pinged {
                self.report_connection_lost(&mut conn, &e.to_string());
                return Err(e);
            }
            Ok(())
        };

        match tokio::time::timeout(timeout, check).await {
            Ok(result) => result,
            Err(_) => Err(DbError::LivenessCheckFailed {
                host: self
                    .active_host()
                    .map(|host| host.address())
                    .unwrap_or_default(),
                message: format!("no answer within {:?}", timeout),
            }),
        }
    }
}

/// Resolves once `true` is published on the shutdown channel or its sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *rx.borrow_and_update();
        if stop {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
